use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fetch sizing for the streaming consumer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConsumerConfig {
    /// How long the broker may hold a fetch open while waiting for `min_bytes`.
    #[serde(rename = "maxwaitms")]
    pub max_wait_ms: i32,
    #[serde(rename = "minbytes")]
    pub min_bytes: i32,
    #[serde(rename = "maxbytes")]
    pub max_bytes: i32,
    #[serde(rename = "partitionmaxbytes")]
    pub partition_max_bytes: i32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            max_wait_ms: 500,
            min_bytes: 1,
            max_bytes: 50 * 1024 * 1024,
            partition_max_bytes: 1024 * 1024,
        }
    }
}

impl ConsumerConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms.max(0) as u64)
    }
}
