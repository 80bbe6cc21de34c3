use std::time::Duration;

use kafka_config::{KafkaConfig, RetryConfig};

/// Bounded exponential backoff used when dialing brokers.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before the given attempt; attempt 0 starts immediately.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts,
            backoff: config.backoff(),
            max_backoff: config.max_backoff(),
        }
    }
}

/// Settings shared by every connection of a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub client_id: String,
    /// Upper bound for dialing a broker and for requests without their own deadline.
    pub request_timeout: Duration,
    pub max_frame_bytes: usize,
    pub retry: RetryPolicy,
}

impl From<&KafkaConfig> for ClientOptions {
    fn from(config: &KafkaConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            request_timeout: config.request_timeout(),
            max_frame_bytes: config.max_frame_bytes,
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions::from(&KafkaConfig::default())
    }
}
