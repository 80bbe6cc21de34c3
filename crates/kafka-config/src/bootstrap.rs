use std::fmt;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use url::Url;

/// A single broker endpoint.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses one `host:port` or `SCHEME://host:port` entry.
    pub fn parse(entry: &str) -> anyhow::Result<Self> {
        let entry = entry.trim();
        let url = if entry.contains("://") {
            Url::parse(entry)
        } else {
            Url::parse(&format!("plaintext://{entry}"))
        }
        .with_context(|| format!("invalid bootstrap server '{entry}'"))?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow!("bootstrap server '{entry}' has no host"))?;
        let port = url
            .port()
            .ok_or_else(|| anyhow!("bootstrap server '{entry}' has no port"))?;

        Ok(Self::new(host, port))
    }

    /// Parses a comma separated bootstrap list.
    pub fn parse_list(endpoints: &str) -> anyhow::Result<Vec<Self>> {
        let brokers = endpoints
            .split(',')
            .filter(|e| !e.trim().is_empty())
            .map(BrokerAddress::parse)
            .collect::<anyhow::Result<Vec<_>>>()?;
        if brokers.is_empty() {
            bail!("no bootstrap servers configured");
        }
        Ok(brokers)
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::BrokerAddress;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_plain_and_scheme_entries() {
        assert_eq!(
            BrokerAddress::parse("localhost:9092").unwrap(),
            BrokerAddress::new("localhost", 9092)
        );
        assert_eq!(
            BrokerAddress::parse("PLAINTEXT://kafka:19092").unwrap(),
            BrokerAddress::new("kafka", 19092)
        );
    }

    #[test]
    fn parses_lists() {
        let brokers = BrokerAddress::parse_list("a:1, PLAINTEXT://b:2,,").unwrap();
        assert_eq!(
            brokers,
            vec![BrokerAddress::new("a", 1), BrokerAddress::new("b", 2)]
        );
    }

    #[test]
    fn rejects_missing_port() {
        let err = BrokerAddress::parse("kafka").unwrap_err();
        assert!(err.to_string().contains("no port"), "{err}");
    }

    #[test]
    fn rejects_empty_list() {
        assert!(BrokerAddress::parse_list(" , ").is_err());
    }

    #[test]
    fn displays_as_socket_address() {
        assert_eq!(BrokerAddress::new("kafka", 19092).to_string(), "kafka:19092");
    }
}
