use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kafka_config::BrokerAddress;
use log::{info, warn};
use tokio::sync::Mutex;

use crate::connection::{connect_any, Connection};
use crate::error::{Result, WireError};
use crate::messages::{BrokerMetadata, MetadataRequest, MetadataResponse, Request};
use crate::retry::ClientOptions;

/// Connections to a Kafka cluster.
///
/// Requests without a specific target go to the bootstrap connection.
/// Partition-leader traffic goes through [`KafkaClient::send_to`], which
/// uses one connection per broker node learned from the last metadata
/// response.
pub struct KafkaClient {
    options: Arc<ClientOptions>,
    bootstrap: Connection,
    brokers: Mutex<HashMap<i32, Arc<Connection>>>,
}

impl KafkaClient {
    pub async fn connect(addresses: &[BrokerAddress], options: ClientOptions) -> Result<Self> {
        let (addr, stream) = connect_any(addresses, &options).await?;
        info!("connected to bootstrap broker {addr}");
        let options = Arc::new(options);
        Ok(Self {
            bootstrap: Connection::established(addr, options.clone(), stream),
            options,
            brokers: Mutex::new(HashMap::new()),
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn bootstrap_addr(&self) -> &BrokerAddress {
        self.bootstrap.addr()
    }

    /// Send to the bootstrap broker.
    pub async fn send<R: Request>(&self, request: &R, timeout: Duration) -> Result<R::Response> {
        self.bootstrap.send(request, timeout).await
    }

    /// Send to a specific broker node.
    pub async fn send_to<R: Request>(
        &self,
        node_id: i32,
        request: &R,
        timeout: Duration,
    ) -> Result<R::Response> {
        let connection = self.broker(node_id).await?;
        connection.send(request, timeout).await
    }

    /// Fetch metadata and remember the advertised broker addresses.
    pub async fn metadata(
        &self,
        request: &MetadataRequest,
        timeout: Duration,
    ) -> Result<MetadataResponse> {
        let response = self.send(request, timeout).await?;
        self.update_brokers(&response.brokers).await;
        Ok(response)
    }

    async fn broker(&self, node_id: i32) -> Result<Arc<Connection>> {
        self.brokers
            .lock()
            .await
            .get(&node_id)
            .cloned()
            .ok_or_else(|| WireError::protocol(format!("no known address for broker {node_id}")))
    }

    async fn update_brokers(&self, brokers: &[BrokerMetadata]) {
        let mut known = self.brokers.lock().await;
        for broker in brokers {
            let Ok(port) = u16::try_from(broker.port) else {
                warn!(
                    "broker {} advertised invalid port {}",
                    broker.node_id, broker.port
                );
                continue;
            };
            let addr = BrokerAddress::new(broker.host.clone(), port);
            let stale = known
                .get(&broker.node_id)
                .map_or(true, |existing| *existing.addr() != addr);
            if stale {
                info!("broker {} is at {addr}", broker.node_id);
                known.insert(
                    broker.node_id,
                    Arc::new(Connection::lazy(addr, self.options.clone())),
                );
            }
        }
    }

    /// Close every open socket.
    pub async fn shutdown(self) {
        self.bootstrap.close().await;
        for (_, connection) in self.brokers.lock().await.drain() {
            connection.close().await;
        }
    }
}
