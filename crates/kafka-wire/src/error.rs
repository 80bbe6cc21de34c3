//! Error types for the wire client.

use std::time::Duration;

use thiserror::Error;

use crate::error_code;

/// Errors raised while talking to a broker.
#[derive(Error, Debug)]
pub enum WireError {
    /// No broker could be reached after the configured retries
    #[error("could not connect to {addresses} after {attempts} attempt(s): {source}")]
    Connection {
        addresses: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// The broker did not answer within the deadline
    #[error("{api} request to {broker} timed out after {timeout:?}")]
    Timeout {
        api: &'static str,
        broker: String,
        timeout: Duration,
    },

    /// The response could not be understood
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The broker answered with an error code the caller cannot recover from
    #[error("broker returned {} (code {code}) for {context}", error_code::describe(*.code))]
    Broker { code: i16, context: String },

    /// IO error on an established connection
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    pub fn protocol(message: impl Into<String>) -> Self {
        WireError::Protocol(message.into())
    }

    pub fn broker(code: i16, context: impl Into<String>) -> Self {
        WireError::Broker {
            code,
            context: context.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WireError::Timeout { .. })
    }
}

/// Result type alias for wire operations
pub type Result<T> = std::result::Result<T, WireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_display() {
        let err = WireError::broker(error_code::UNKNOWN_TOPIC_OR_PARTITION, "topic 'missing'");
        let msg = err.to_string();
        assert!(msg.contains("UNKNOWN_TOPIC_OR_PARTITION"), "{msg}");
        assert!(msg.contains("code 3"), "{msg}");
    }

    #[test]
    fn test_timeout_display() {
        let err = WireError::Timeout {
            api: "Metadata",
            broker: "localhost:9092".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "Metadata request to localhost:9092 timed out after 5s"
        );
    }
}
