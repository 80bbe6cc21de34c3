use std::time::Duration;

use config::Config;
use config::File;
use serde::Deserialize;
use serde::Serialize;

mod bootstrap;
pub mod consumer;
pub use bootstrap::*;
pub use consumer::ConsumerConfig;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RetryConfig {
    pub attempts: u32,
    #[serde(rename = "backoffms")]
    pub backoff_ms: u64,
    #[serde(rename = "maxbackoffms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            attempts: 5,
            backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KafkaConfig {
    /// Comma separated bootstrap servers, `host:port` or `PLAINTEXT://host:port`.
    pub endpoint: String,
    #[serde(rename = "clientid")]
    pub client_id: String,
    #[serde(rename = "admintimeoutms")]
    pub admin_timeout_ms: u64,
    #[serde(rename = "requesttimeoutms")]
    pub request_timeout_ms: u64,
    #[serde(rename = "maxframebytes")]
    pub max_frame_bytes: usize,
    pub retry: RetryConfig,
    pub consumer: ConsumerConfig,
}

impl KafkaConfig {
    #[cfg(test)]
    pub fn local(endpoint: String) -> Self {
        Self {
            endpoint,
            ..KafkaConfig::default()
        }
    }

    pub fn from_env() -> anyhow::Result<KafkaConfig> {
        let mut builder = Config::builder();

        builder = builder.add_source(Config::try_from(&KafkaConfig::default())?);
        builder = builder
            .add_source(File::new(".kafka.config.yaml", config::FileFormat::Yaml).required(false));
        builder = builder
            .add_source(File::new(".kafka.config.json", config::FileFormat::Json).required(false));

        let path_from_env = std::env::var("KAFKA_CONFIG_PATH");
        builder = if let Ok(path_from_env) = path_from_env {
            log::info!("Loading config from: {path_from_env}");
            if path_from_env.ends_with("yaml") || path_from_env.ends_with("yml") {
                builder
                    .add_source(File::new(&path_from_env, config::FileFormat::Yaml).required(true))
            } else if path_from_env.ends_with("json") {
                builder
                    .add_source(File::new(&path_from_env, config::FileFormat::Json).required(true))
            } else {
                log::warn!("File type not supported. Ignore file: {path_from_env}");
                builder
            }
        } else {
            builder
        };

        builder = builder.add_source(config::Environment::with_prefix("KAFKA").separator("_"));

        let kafka_config: KafkaConfig = builder.build()?.try_deserialize()?;
        Ok(kafka_config)
    }

    /// Replaces the configured bootstrap servers, used for the `--bootstrap-server` flag.
    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        if let Some(endpoint) = endpoint {
            self.endpoint = endpoint;
        }
        self
    }

    pub fn brokers(&self) -> anyhow::Result<Vec<BrokerAddress>> {
        BrokerAddress::parse_list(&self.endpoint)
    }

    pub fn admin_timeout(&self) -> Duration {
        Duration::from_millis(self.admin_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        KafkaConfig {
            endpoint: "localhost:9092".to_string(),
            client_id: "risk-stream".to_string(),
            admin_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            max_frame_bytes: 100 * 1024 * 1024,
            retry: RetryConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{BrokerAddress, KafkaConfig};
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let cfg = KafkaConfig::default();
        assert_eq!(cfg.admin_timeout().as_secs(), 5);
        assert_eq!(cfg.consumer.max_wait_ms, 500);
        assert_eq!(
            cfg.brokers().unwrap(),
            vec![BrokerAddress::new("localhost", 9092)]
        );
    }

    #[test]
    #[serial]
    fn test_create_kafka_config() {
        std::env::set_var("KAFKA_ENDPOINT", "PLAINTEXT://kafka:19092");
        std::env::set_var("KAFKA_CLIENTID", "stedi");
        std::env::set_var("KAFKA_ADMINTIMEOUTMS", "1500");
        std::env::set_var("KAFKA_RETRY_ATTEMPTS", "2");
        std::env::set_var("KAFKA_CONSUMER_MAXWAITMS", "250");

        let cfg: KafkaConfig = KafkaConfig::from_env().unwrap();

        assert_eq!(cfg.endpoint, "PLAINTEXT://kafka:19092");
        assert_eq!(cfg.client_id, "stedi");
        assert_eq!(cfg.admin_timeout_ms, 1500);
        assert_eq!(cfg.retry.attempts, 2);
        assert_eq!(cfg.consumer.max_wait_ms, 250);
        assert_eq!(
            cfg.brokers().unwrap(),
            vec![BrokerAddress::new("kafka", 19092)]
        );

        std::env::remove_var("KAFKA_ENDPOINT");
        std::env::remove_var("KAFKA_CLIENTID");
        std::env::remove_var("KAFKA_ADMINTIMEOUTMS");
        std::env::remove_var("KAFKA_RETRY_ATTEMPTS");
        std::env::remove_var("KAFKA_CONSUMER_MAXWAITMS");
    }

    #[test]
    #[serial]
    fn test_config_from_file_using_env_path() {
        std::env::set_var("KAFKA_CONFIG_PATH", "resources/.kafka.example.yaml");
        let cfg: KafkaConfig = KafkaConfig::from_env().unwrap();

        assert_eq!(cfg.endpoint, "broker-1:9092,broker-2:9092");
        assert_eq!(cfg.retry.backoff_ms, 50);
        assert_eq!(cfg.consumer.max_bytes, 1_048_576);
        // untouched keys keep their defaults
        assert_eq!(cfg.admin_timeout_ms, 5_000);

        std::env::remove_var("KAFKA_CONFIG_PATH");
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        std::env::set_var("KAFKA_CONFIG_PATH", "resources/.kafka.example.yaml");
        std::env::set_var("KAFKA_ENDPOINT", "override:9093");
        let cfg: KafkaConfig = KafkaConfig::from_env().unwrap();

        assert_eq!(cfg.endpoint, "override:9093");

        std::env::remove_var("KAFKA_CONFIG_PATH");
        std::env::remove_var("KAFKA_ENDPOINT");
    }

    #[test]
    fn test_cli_endpoint_wins() {
        let cfg = KafkaConfig::local("a:1".to_string()).with_endpoint(Some("b:2".to_string()));
        assert_eq!(cfg.endpoint, "b:2");
        let cfg = cfg.with_endpoint(None);
        assert_eq!(cfg.endpoint, "b:2");
    }
}
