use std::collections::HashSet;
use std::time::Duration;

use kafka_wire::error_code;
use kafka_wire::messages::{CreateTopicsRequest, MetadataRequest, MetadataResponse, TopicMetadata};
use kafka_wire::{KafkaClient, Result, WireError};
use log::{debug, info};

/// Default deadline for admin calls.
pub const DEFAULT_ADMIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyExisted,
}

/// Topic-level queries against the cluster.
///
/// Every call fetches fresh metadata under a single bounded attempt; a
/// timeout is returned to the caller rather than retried.
pub struct TopicAdmin<'a> {
    client: &'a KafkaClient,
    timeout: Duration,
}

impl<'a> TopicAdmin<'a> {
    pub fn new(client: &'a KafkaClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn cluster_metadata(&self) -> Result<MetadataResponse> {
        self.client
            .metadata(&MetadataRequest::all_topics(), self.timeout)
            .await
    }

    pub async fn list_topics(&self) -> Result<Vec<TopicMetadata>> {
        let mut topics = self.cluster_metadata().await?.topics;
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(topics)
    }

    pub async fn topic_exists(&self, topic: &str) -> Result<bool> {
        let metadata = self.cluster_metadata().await?;
        Ok(contains_topic(&metadata, topic))
    }

    /// Create `topic` unless the cluster already has it.
    pub async fn ensure_topic(
        &self,
        topic: &str,
        partitions: i32,
        replication_factor: i16,
    ) -> Result<EnsureOutcome> {
        let metadata = self.cluster_metadata().await?;
        if contains_topic(&metadata, topic) {
            return Ok(EnsureOutcome::AlreadyExisted);
        }

        let request = CreateTopicsRequest {
            name: topic.to_string(),
            num_partitions: partitions,
            replication_factor,
            timeout_ms: self.timeout.as_millis().min(i32::MAX as u128) as i32,
        };
        debug!(
            "creating topic {topic} ({partitions} partition(s), replication {replication_factor}) via controller {}",
            metadata.controller_id
        );
        let response = self
            .client
            .send_to(metadata.controller_id, &request, self.timeout)
            .await?;

        let code = response
            .topics
            .iter()
            .find(|(name, _)| name == topic)
            .map(|(_, code)| *code)
            .ok_or_else(|| {
                WireError::protocol(format!("CreateTopics response does not mention '{topic}'"))
            })?;
        match code {
            error_code::NONE => {
                info!("Topic {topic} created");
                Ok(EnsureOutcome::Created)
            }
            error_code::TOPIC_ALREADY_EXISTS => Ok(EnsureOutcome::AlreadyExisted),
            code => Err(WireError::broker(code, format!("creating topic '{topic}'"))),
        }
    }
}

fn contains_topic(metadata: &MetadataResponse, topic: &str) -> bool {
    let names: HashSet<&str> = metadata.topics.iter().map(|t| t.name.as_str()).collect();
    let exists = names.contains(topic);
    info!("Topic {topic} is {exists}");
    exists
}

#[cfg(test)]
mod tests {
    use super::*;
    use kafka_wire::testing::{test_options, FakeBroker};
    use pretty_assertions::assert_eq;

    async fn client_for(broker: &FakeBroker) -> KafkaClient {
        KafkaClient::connect(&[broker.address()], test_options())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_topic_exists() {
        let broker = FakeBroker::start().await;
        broker.create_topic("stedi-events", 1);
        broker.create_topic("other", 1);
        let client = client_for(&broker).await;
        let admin = TopicAdmin::new(&client, DEFAULT_ADMIN_TIMEOUT);

        assert!(admin.topic_exists("stedi-events").await.unwrap());
        assert!(admin.topic_exists("other").await.unwrap());
        assert!(!admin.topic_exists("missing").await.unwrap());
        // membership is exact, not a prefix match
        assert!(!admin.topic_exists("stedi").await.unwrap());
    }

    #[tokio::test]
    async fn test_topic_exists_on_empty_cluster() {
        let broker = FakeBroker::start().await;
        let client = client_for(&broker).await;
        let admin = TopicAdmin::new(&client, DEFAULT_ADMIN_TIMEOUT);

        assert!(!admin.topic_exists("stedi-events").await.unwrap());
    }

    #[tokio::test]
    async fn test_silent_broker_is_a_timeout_not_false() {
        let broker = FakeBroker::silent().await;
        let client = client_for(&broker).await;
        let admin = TopicAdmin::new(&client, Duration::from_millis(150));

        let err = admin.topic_exists("stedi-events").await.unwrap_err();
        assert!(err.is_timeout(), "{err:?}");
    }

    #[tokio::test]
    async fn test_list_topics_sorted() {
        let broker = FakeBroker::start().await;
        broker.create_topic("zeta", 1);
        broker.create_topic("alpha", 3);
        let client = client_for(&broker).await;
        let admin = TopicAdmin::new(&client, DEFAULT_ADMIN_TIMEOUT);

        let topics = admin.list_topics().await.unwrap();
        let summary: Vec<(&str, usize)> = topics
            .iter()
            .map(|t| (t.name.as_str(), t.partitions.len()))
            .collect();
        assert_eq!(summary, vec![("alpha", 3), ("zeta", 1)]);
    }

    #[tokio::test]
    async fn test_ensure_topic_creates_once() {
        let broker = FakeBroker::start().await;
        let client = client_for(&broker).await;
        let admin = TopicAdmin::new(&client, DEFAULT_ADMIN_TIMEOUT);

        assert_eq!(
            admin.ensure_topic("stedi-events", 2, 1).await.unwrap(),
            EnsureOutcome::Created
        );
        assert_eq!(broker.topic_names(), vec!["stedi-events".to_string()]);
        assert_eq!(
            admin.ensure_topic("stedi-events", 2, 1).await.unwrap(),
            EnsureOutcome::AlreadyExisted
        );
    }

    #[tokio::test]
    async fn test_ensure_topic_surfaces_broker_errors() {
        let broker = FakeBroker::start().await;
        let client = client_for(&broker).await;
        let admin = TopicAdmin::new(&client, DEFAULT_ADMIN_TIMEOUT);

        let err = admin.ensure_topic("bad", 0, 1).await.unwrap_err();
        match err {
            WireError::Broker { code, .. } => assert_eq!(code, error_code::INVALID_PARTITIONS),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
