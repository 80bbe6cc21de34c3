//! In-process fake broker for tests.
//!
//! Serves the protocol subset the client speaks from an in-memory log:
//! topics → partitions → record values. Only compiled for tests or with the
//! `testing` feature.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::codec::{put_array_len, put_nullable_bytes, put_string, put_varint, WireReader};
use crate::error_code;
use crate::messages::{API_KEY_CREATE_TOPICS, API_KEY_FETCH, API_KEY_LIST_OFFSETS, API_KEY_METADATA};
use crate::{BrokerAddress, ClientOptions, RetryPolicy};

#[derive(Clone, Default)]
struct PartitionLog {
    /// First retained offset.
    start: i64,
    /// Indexed by offset; entries below `start` are no longer served.
    values: Vec<Option<Bytes>>,
    /// Reported with leader -1, as during an election.
    leaderless: bool,
}

type Log = BTreeMap<String, Vec<PartitionLog>>;

/// Encode uncompressed values as one RecordBatch v2 starting at `base_offset`.
pub fn encode_record_batch(base_offset: i64, values: &[Option<&[u8]>]) -> Bytes {
    let mut records = BytesMut::new();
    for (delta, value) in values.iter().enumerate() {
        let mut record = BytesMut::new();
        record.put_i8(0); // attributes
        put_varint(&mut record, 0); // timestamp delta
        put_varint(&mut record, delta as i64);
        put_varint(&mut record, -1); // null key
        match value {
            Some(value) => {
                put_varint(&mut record, value.len() as i64);
                record.put_slice(value);
            }
            None => put_varint(&mut record, -1),
        }
        put_varint(&mut record, 0); // no headers
        put_varint(&mut records, record.len() as i64);
        records.put(record);
    }

    let mut body = BytesMut::new();
    body.put_i32(0); // partition leader epoch
    body.put_i8(2); // magic
    body.put_u32(0); // crc, not checked by the client
    body.put_i16(0); // attributes
    body.put_i32(values.len().saturating_sub(1) as i32);
    body.put_i64(1_600_000_000_000); // base timestamp
    body.put_i64(1_600_000_000_000); // max timestamp
    body.put_i64(-1); // producer id
    body.put_i16(-1); // producer epoch
    body.put_i32(-1); // base sequence
    body.put_i32(values.len() as i32);
    body.put(records);

    let mut batch = BytesMut::new();
    batch.put_i64(base_offset);
    batch.put_i32(body.len() as i32);
    batch.put(body);
    batch.freeze()
}

/// Client options suited to tests: short timeouts, fast retries.
pub fn test_options() -> ClientOptions {
    ClientOptions {
        client_id: "test-client".to_string(),
        request_timeout: Duration::from_secs(2),
        max_frame_bytes: 16 * 1024 * 1024,
        retry: RetryPolicy {
            attempts: 2,
            backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
        },
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Serve,
    /// Accept connections and read requests but never answer.
    Silent,
}

pub struct FakeBroker {
    addr: SocketAddr,
    log: Arc<Mutex<Log>>,
    handle: JoinHandle<()>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        Self::spawn(Mode::Serve).await
    }

    pub async fn silent() -> Self {
        Self::spawn(Mode::Silent).await
    }

    async fn spawn(mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log: Arc<Mutex<Log>> = Arc::default();
        let shared = log.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let log = shared.clone();
                tokio::spawn(serve(stream, addr, log, mode));
            }
        });
        Self { addr, log, handle }
    }

    pub fn address(&self) -> BrokerAddress {
        BrokerAddress::new(self.addr.ip().to_string(), self.addr.port())
    }

    pub fn create_topic(&self, name: &str, partitions: usize) {
        self.log
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| vec![PartitionLog::default(); partitions]);
    }

    pub fn produce(&self, topic: &str, partition: usize, value: Option<&[u8]>) {
        let mut log = self.log.lock().unwrap();
        let partitions = log.get_mut(topic).expect("topic exists");
        partitions[partition]
            .values
            .push(value.map(Bytes::copy_from_slice));
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.log.lock().unwrap().keys().cloned().collect()
    }

    /// Take the partition's leader away (`false`) or bring it back (`true`).
    pub fn set_leader_available(&self, topic: &str, partition: usize, available: bool) {
        let mut log = self.log.lock().unwrap();
        log.get_mut(topic).expect("topic exists")[partition].leaderless = !available;
    }

    /// Stop serving records below `offset` of a partition, as retention would.
    pub fn truncate_before(&self, topic: &str, partition: usize, offset: i64) {
        let mut log = self.log.lock().unwrap();
        log.get_mut(topic).expect("topic exists")[partition].start = offset;
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut stream: TcpStream, addr: SocketAddr, log: Arc<Mutex<Log>>, mode: Mode) {
    loop {
        let Ok(size) = stream.read_i32().await else {
            return;
        };
        let mut frame = vec![0u8; size as usize];
        if stream.read_exact(&mut frame).await.is_err() {
            return;
        }
        if mode == Mode::Silent {
            continue;
        }

        let mut request = WireReader::new(Bytes::from(frame));
        let api_key = request.i16().unwrap();
        let _api_version = request.i16().unwrap();
        let correlation_id = request.i32().unwrap();
        let _client_id = request.nullable_string().unwrap();

        let mut body = BytesMut::new();
        body.put_i32(correlation_id);
        match api_key {
            API_KEY_METADATA => metadata(&mut request, &mut body, addr, &log),
            API_KEY_LIST_OFFSETS => list_offsets(&mut request, &mut body, &log),
            API_KEY_FETCH => {
                let max_wait_ms = fetch(&mut request, &mut body, &log);
                if let Some(wait) = max_wait_ms {
                    tokio::time::sleep(wait).await;
                }
            }
            API_KEY_CREATE_TOPICS => create_topics(&mut request, &mut body, &log),
            other => panic!("fake broker does not implement api key {other}"),
        }

        let mut response = BytesMut::new();
        response.put_i32(body.len() as i32);
        response.put(body);
        if stream.write_all(&response).await.is_err() {
            return;
        }
    }
}

fn metadata(request: &mut WireReader, body: &mut BytesMut, addr: SocketAddr, log: &Mutex<Log>) {
    let wanted: Option<Vec<String>> = request
        .nullable_array_len()
        .unwrap()
        .map(|len| (0..len).map(|_| request.string().unwrap()).collect());
    let log = log.lock().unwrap();
    let names: Vec<String> = wanted.unwrap_or_else(|| log.keys().cloned().collect());

    put_array_len(body, 1);
    body.put_i32(0);
    put_string(body, &addr.ip().to_string());
    body.put_i32(addr.port() as i32);
    body.put_i16(-1); // rack
    body.put_i32(0); // controller

    put_array_len(body, names.len());
    for name in names {
        match log.get(&name) {
            Some(partitions) => {
                body.put_i16(error_code::NONE);
                put_string(body, &name);
                body.put_i8(0);
                put_array_len(body, partitions.len());
                for (index, partition) in partitions.iter().enumerate() {
                    if partition.leaderless {
                        body.put_i16(error_code::LEADER_NOT_AVAILABLE);
                        body.put_i32(index as i32);
                        body.put_i32(-1);
                        put_array_len(body, 1);
                        body.put_i32(0);
                        put_array_len(body, 0);
                    } else {
                        body.put_i16(error_code::NONE);
                        body.put_i32(index as i32);
                        body.put_i32(0); // leader
                        put_array_len(body, 1);
                        body.put_i32(0);
                        put_array_len(body, 1);
                        body.put_i32(0);
                    }
                }
            }
            None => {
                body.put_i16(error_code::UNKNOWN_TOPIC_OR_PARTITION);
                put_string(body, &name);
                body.put_i8(0);
                put_array_len(body, 0);
            }
        }
    }
}

fn list_offsets(request: &mut WireReader, body: &mut BytesMut, log: &Mutex<Log>) {
    let _replica = request.i32().unwrap();
    let log = log.lock().unwrap();
    let topics = request.array_len().unwrap();
    put_array_len(body, topics);
    for _ in 0..topics {
        let topic = request.string().unwrap();
        put_string(body, &topic);
        let partitions = request.array_len().unwrap();
        put_array_len(body, partitions);
        for _ in 0..partitions {
            let partition = request.i32().unwrap();
            let timestamp = request.i64().unwrap();
            body.put_i32(partition);
            match log.get(&topic).and_then(|p| p.get(partition as usize)) {
                Some(partition) if partition.leaderless => {
                    body.put_i16(error_code::NOT_LEADER_OR_FOLLOWER);
                    body.put_i64(-1);
                    body.put_i64(-1);
                }
                Some(partition) => {
                    body.put_i16(error_code::NONE);
                    body.put_i64(-1);
                    body.put_i64(if timestamp == -2 {
                        partition.start
                    } else {
                        partition.values.len() as i64
                    });
                }
                None => {
                    body.put_i16(error_code::UNKNOWN_TOPIC_OR_PARTITION);
                    body.put_i64(-1);
                    body.put_i64(-1);
                }
            }
        }
    }
}

/// Returns how long to hold the response when nothing was available.
fn fetch(request: &mut WireReader, body: &mut BytesMut, log: &Mutex<Log>) -> Option<Duration> {
    let _replica = request.i32().unwrap();
    let max_wait_ms = request.i32().unwrap();
    let _min_bytes = request.i32().unwrap();
    let _max_bytes = request.i32().unwrap();
    let _isolation = request.i8().unwrap();
    let log = log.lock().unwrap();
    let mut empty = true;

    body.put_i32(0); // throttle
    let topics = request.array_len().unwrap();
    put_array_len(body, topics);
    for _ in 0..topics {
        let topic = request.string().unwrap();
        put_string(body, &topic);
        let partitions = request.array_len().unwrap();
        put_array_len(body, partitions);
        for _ in 0..partitions {
            let partition = request.i32().unwrap();
            let offset = request.i64().unwrap();
            let _partition_max_bytes = request.i32().unwrap();
            body.put_i32(partition);
            let Some(stored) = log.get(&topic).and_then(|p| p.get(partition as usize)) else {
                body.put_i16(error_code::UNKNOWN_TOPIC_OR_PARTITION);
                body.put_i64(-1);
                body.put_i64(-1);
                put_array_len(body, 0);
                put_nullable_bytes(body, None);
                continue;
            };
            let high_watermark = stored.values.len() as i64;
            if stored.leaderless {
                body.put_i16(error_code::NOT_LEADER_OR_FOLLOWER);
                body.put_i64(-1);
                body.put_i64(-1);
                put_array_len(body, 0);
                put_nullable_bytes(body, None);
                continue;
            }
            if offset < stored.start || offset > high_watermark {
                body.put_i16(error_code::OFFSET_OUT_OF_RANGE);
                body.put_i64(high_watermark);
                body.put_i64(high_watermark);
                put_array_len(body, 0);
                put_nullable_bytes(body, None);
                continue;
            }
            body.put_i16(error_code::NONE);
            body.put_i64(high_watermark);
            body.put_i64(high_watermark);
            put_array_len(body, 0);
            let pending: Vec<Option<&[u8]>> = stored.values[offset as usize..]
                .iter()
                .map(|v| v.as_deref())
                .collect();
            if pending.is_empty() {
                put_nullable_bytes(body, Some(&b""[..]));
            } else {
                empty = false;
                let batch = encode_record_batch(offset, &pending);
                put_nullable_bytes(body, Some(&batch[..]));
            }
        }
    }

    if empty {
        Some(Duration::from_millis(max_wait_ms.max(0) as u64))
    } else {
        None
    }
}

fn create_topics(request: &mut WireReader, body: &mut BytesMut, log: &Mutex<Log>) {
    let mut log = log.lock().unwrap();
    let topics = request.array_len().unwrap();
    put_array_len(body, topics);
    for _ in 0..topics {
        let name = request.string().unwrap();
        let partitions = request.i32().unwrap();
        let _replication = request.i16().unwrap();
        let _assignments = request.array_len().unwrap();
        let _configs = request.array_len().unwrap();
        put_string(body, &name);
        if log.contains_key(&name) {
            body.put_i16(error_code::TOPIC_ALREADY_EXISTS);
        } else if partitions < 1 {
            body.put_i16(error_code::INVALID_PARTITIONS);
        } else {
            log.insert(name, vec![PartitionLog::default(); partitions as usize]);
            body.put_i16(error_code::NONE);
        }
    }
    let _timeout = request.i32().unwrap();
}
