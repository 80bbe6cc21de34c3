//! A single broker connection.
//!
//! Frames on the wire are [i32 size][payload]. Requests on one socket are
//! strictly sequential: the stream lives behind an async mutex that is held
//! for the whole write/read exchange, so a response always belongs to the
//! request that was just written. A socket that failed or timed out is
//! dropped and the next request dials a fresh one.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use kafka_config::BrokerAddress;
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::codec::WireReader;
use crate::error::{Result, WireError};
use crate::messages::{encode_frame, Request};
use crate::retry::ClientOptions;

pub struct Connection {
    addr: BrokerAddress,
    options: Arc<ClientOptions>,
    correlation_id: AtomicI32,
    stream: Mutex<Option<TcpStream>>,
}

/// Dial the first reachable address, retrying whole rounds with backoff.
pub(crate) async fn connect_any(
    addresses: &[BrokerAddress],
    options: &ClientOptions,
) -> Result<(BrokerAddress, TcpStream)> {
    let attempts = options.retry.attempts();
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = options.retry.delay(attempt);
            warn!(
                "connection attempt {attempt}/{attempts} failed, retrying in {delay:?}"
            );
            tokio::time::sleep(delay).await;
        }
        for addr in addresses {
            let dial = TcpStream::connect((addr.host.as_str(), addr.port));
            let result = match tokio::time::timeout(options.request_timeout, dial).await {
                Ok(result) => result,
                Err(_) => Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {addr} timed out"),
                )),
            };
            match result {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("could not set TCP_NODELAY on {addr}: {e}");
                    }
                    debug!("connected to {addr}");
                    return Ok((addr.clone(), stream));
                }
                Err(e) => {
                    debug!("connect to {addr} failed: {e}");
                    last_error = Some(e);
                }
            }
        }
    }

    Err(WireError::Connection {
        addresses: addresses
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(","),
        attempts,
        source: last_error.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "no broker addresses")
        }),
    })
}

impl Connection {
    /// A connection that dials on its first request.
    pub(crate) fn lazy(addr: BrokerAddress, options: Arc<ClientOptions>) -> Self {
        Self {
            addr,
            options,
            correlation_id: AtomicI32::new(0),
            stream: Mutex::new(None),
        }
    }

    pub(crate) fn established(
        addr: BrokerAddress,
        options: Arc<ClientOptions>,
        stream: TcpStream,
    ) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
            ..Self::lazy(addr, options)
        }
    }

    pub fn addr(&self) -> &BrokerAddress {
        &self.addr
    }

    fn next_correlation_id(&self) -> i32 {
        self.correlation_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send one request and wait for its response.
    ///
    /// An IO failure on a previously healthy socket is retried once on a new
    /// connection. Timeouts are reported as-is.
    pub async fn send<R: Request>(&self, request: &R, timeout: Duration) -> Result<R::Response> {
        let mut slot = self.stream.lock().await;
        let mut reconnected = false;

        loop {
            let mut stream = match slot.take() {
                Some(stream) => stream,
                None => {
                    reconnected = true;
                    let (_, stream) =
                        connect_any(std::slice::from_ref(&self.addr), &self.options).await?;
                    stream
                }
            };

            let correlation_id = self.next_correlation_id();
            let frame = encode_frame(request, correlation_id, &self.options.client_id);
            debug!(
                "-> {} v{} to {} (correlation id {correlation_id}, {} bytes)",
                R::NAME,
                R::API_VERSION,
                self.addr,
                frame.len()
            );

            match self.exchange::<R>(&mut stream, &frame, timeout).await {
                Ok(body) => {
                    let mut reader = WireReader::new(body);
                    let received = reader.i32()?;
                    if received != correlation_id {
                        return Err(WireError::protocol(format!(
                            "{} response from {} has correlation id {received}, expected {correlation_id}",
                            R::NAME,
                            self.addr
                        )));
                    }
                    *slot = Some(stream);
                    return R::decode_response(&mut reader);
                }
                Err(WireError::Io(e)) if !reconnected => {
                    warn!("{} request to {} failed ({e}), reconnecting", R::NAME, self.addr);
                    reconnected = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn exchange<R: Request>(
        &self,
        stream: &mut TcpStream,
        frame: &[u8],
        timeout: Duration,
    ) -> Result<Bytes> {
        let max_frame_bytes = self.options.max_frame_bytes;
        let io = async {
            stream.write_all(frame).await?;
            stream.flush().await?;

            let size = stream.read_i32().await?;
            if size < 4 || size as usize > max_frame_bytes {
                return Err(WireError::protocol(format!(
                    "invalid {} response size {size} (max {max_frame_bytes})",
                    R::NAME
                )));
            }
            let mut body = BytesMut::zeroed(size as usize);
            stream.read_exact(&mut body).await?;
            Ok::<Bytes, WireError>(body.freeze())
        };

        match tokio::time::timeout(timeout, io).await {
            Ok(result) => result,
            Err(_) => Err(WireError::Timeout {
                api: R::NAME,
                broker: self.addr.to_string(),
                timeout,
            }),
        }
    }

    /// Close the socket if one is open.
    pub async fn close(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("error closing connection to {}: {e}", self.addr);
            }
            info!("closed connection to {}", self.addr);
        }
    }
}
