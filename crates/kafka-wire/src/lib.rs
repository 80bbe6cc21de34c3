//! Minimal Kafka wire-protocol client.
//!
//! Speaks just enough of the binary protocol to list and create topics and
//! to fetch uncompressed records: Metadata v1, ListOffsets v1, Fetch v4 and
//! CreateTopics v0.

mod client;
pub mod codec;
mod connection;
pub mod error;
pub mod error_code;
pub mod messages;
pub mod records;
mod retry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::KafkaClient;
pub use connection::Connection;
pub use error::{Result, WireError};
pub use kafka_config::BrokerAddress;
pub use records::{Record, RecordHeader};
pub use retry::{ClientOptions, RetryPolicy};
