use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use kafka_config::ConsumerConfig;
use kafka_wire::error_code;
use kafka_wire::messages::{
    FetchPartition, FetchRequest, ListOffsetsRequest, MetadataRequest, EARLIEST_TIMESTAMP,
    LATEST_TIMESTAMP,
};
use kafka_wire::{KafkaClient, Result, WireError};
use log::{debug, info, warn};

/// Where a fresh subscription starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartingOffset {
    /// Replay everything the broker still retains.
    Earliest,
    /// Only records produced after subscribing.
    #[default]
    Latest,
}

impl StartingOffset {
    fn timestamp(self) -> i64 {
        match self {
            StartingOffset::Earliest => EARLIEST_TIMESTAMP,
            StartingOffset::Latest => LATEST_TIMESTAMP,
        }
    }
}

impl fmt::Display for StartingOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartingOffset::Earliest => f.write_str("earliest"),
            StartingOffset::Latest => f.write_str("latest"),
        }
    }
}

/// One record pulled from the topic, payload still undecoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub partition: i32,
    pub offset: i64,
    pub timestamp: i64,
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
}

/// Anything the streaming pipeline can pull records from.
#[async_trait]
pub trait RecordSource: Send {
    /// Next batch of records; empty when nothing arrived before the poll timeout.
    async fn poll(&mut self) -> Result<Vec<RawRecord>>;
}

pub struct KafkaConsumer {
    client: KafkaClient,
    settings: ConsumerConfig,
}

impl KafkaConsumer {
    pub fn new(client: KafkaClient, settings: ConsumerConfig) -> Self {
        Self { client, settings }
    }

    /// Resolve the topic's partitions and their starting offsets.
    pub async fn subscribe(self, topic: &str, starting: StartingOffset) -> Result<Subscription> {
        let mut subscription = Subscription {
            client: self.client,
            settings: self.settings,
            topic: topic.to_string(),
            positions: BTreeMap::new(),
            stale_metadata: false,
        };
        subscription.refresh_leaders().await?;

        let partitions: Vec<i32> = subscription.positions.keys().copied().collect();
        subscription.seek(&partitions, starting).await?;
        info!(
            "subscribed to {topic} from {starting}: {:?}",
            subscription.offsets()
        );
        Ok(subscription)
    }
}

#[derive(Debug, Clone, Copy)]
struct Position {
    leader: i32,
    /// Next offset to fetch.
    offset: i64,
}

/// An active subscription to every partition of one topic.
///
/// Offsets live only in this struct; dropping it forgets them.
pub struct Subscription {
    client: KafkaClient,
    settings: ConsumerConfig,
    topic: String,
    positions: BTreeMap<i32, Position>,
    stale_metadata: bool,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next offset to be fetched, per partition.
    pub fn offsets(&self) -> Vec<(i32, i64)> {
        self.positions
            .iter()
            .map(|(partition, position)| (*partition, position.offset))
            .collect()
    }

    fn request_timeout(&self) -> Duration {
        self.client.options().request_timeout
    }

    async fn refresh_leaders(&mut self) -> Result<()> {
        let metadata = self
            .client
            .metadata(
                &MetadataRequest::topics([self.topic.as_str()]),
                self.request_timeout(),
            )
            .await?;
        let topic = metadata.topic(&self.topic).ok_or_else(|| {
            WireError::protocol(format!("metadata response does not mention '{}'", self.topic))
        })?;
        if topic.error_code != error_code::NONE {
            return Err(WireError::broker(
                topic.error_code,
                format!("topic '{}'", self.topic),
            ));
        }
        if topic.partitions.is_empty() {
            return Err(WireError::protocol(format!(
                "topic '{}' has no partitions",
                self.topic
            )));
        }

        let mut leaderless = false;
        for partition in &topic.partitions {
            let index = partition.partition_index;
            match self.positions.get_mut(&index) {
                Some(position) => {
                    if partition.leader_id < 0 {
                        warn!(
                            "{}/{index} has no leader, keeping offset {} until one is elected",
                            self.topic, position.offset
                        );
                        leaderless = true;
                    }
                    position.leader = partition.leader_id;
                }
                // a subscription cannot start on a partition without a leader
                None if partition.leader_id < 0 => {
                    return Err(WireError::broker(
                        error_code::LEADER_NOT_AVAILABLE,
                        format!("{}/{index}", self.topic),
                    ));
                }
                None => {
                    self.positions.insert(
                        index,
                        Position {
                            leader: partition.leader_id,
                            offset: 0,
                        },
                    );
                }
            }
        }
        self.stale_metadata = leaderless;
        Ok(())
    }

    fn by_leader(&self, partitions: &[i32]) -> BTreeMap<i32, Vec<i32>> {
        let mut grouped: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
        for partition in partitions {
            match self.positions.get(partition) {
                Some(position) if position.leader >= 0 => {
                    grouped.entry(position.leader).or_default().push(*partition);
                }
                _ => {}
            }
        }
        grouped
    }

    /// Move `partitions` to the earliest or latest offset the broker reports.
    async fn seek(&mut self, partitions: &[i32], to: StartingOffset) -> Result<()> {
        for (leader, partitions) in self.by_leader(partitions) {
            let request = ListOffsetsRequest::new(self.topic.as_str(), &partitions, to.timestamp());
            let response = self
                .client
                .send_to(leader, &request, self.request_timeout())
                .await?;
            for resolved in response.partitions(&self.topic) {
                if resolved.error_code != error_code::NONE {
                    return Err(WireError::broker(
                        resolved.error_code,
                        format!("listing offsets of {}/{}", self.topic, resolved.partition_index),
                    ));
                }
                if let Some(position) = self.positions.get_mut(&resolved.partition_index) {
                    position.offset = resolved.offset;
                }
            }
        }
        Ok(())
    }

    async fn fetch(&mut self) -> Result<Vec<RawRecord>> {
        if self.stale_metadata {
            self.refresh_leaders().await?;
        }

        let partitions: Vec<i32> = self.positions.keys().copied().collect();
        let timeout = self.request_timeout() + self.settings.max_wait();
        let mut records = Vec::new();
        let mut out_of_range = Vec::new();

        let leaders = self.by_leader(&partitions);
        if leaders.is_empty() {
            // nothing to fetch from; wait as an empty fetch would
            tokio::time::sleep(self.settings.max_wait()).await;
            return Ok(records);
        }

        for (leader, partitions) in leaders {
            let request = FetchRequest {
                max_wait_ms: self.settings.max_wait_ms,
                min_bytes: self.settings.min_bytes,
                max_bytes: self.settings.max_bytes,
                topic: self.topic.clone(),
                partitions: partitions
                    .iter()
                    .filter_map(|p| self.positions.get(p).map(|pos| (*p, pos.offset)))
                    .map(|(partition, fetch_offset)| FetchPartition {
                        partition,
                        fetch_offset,
                        max_bytes: self.settings.partition_max_bytes,
                    })
                    .collect(),
            };
            let response = self.client.send_to(leader, &request, timeout).await?;

            for (_, fetched) in response.into_partitions() {
                let Some(position) = self.positions.get_mut(&fetched.partition_index) else {
                    debug!("ignoring unrequested partition {}", fetched.partition_index);
                    continue;
                };
                match fetched.error_code {
                    error_code::NONE => {
                        for record in fetched.records {
                            if record.offset < position.offset {
                                continue;
                            }
                            position.offset = record.offset + 1;
                            records.push(RawRecord {
                                partition: fetched.partition_index,
                                offset: record.offset,
                                timestamp: record.timestamp,
                                key: record.key,
                                payload: record.value,
                            });
                        }
                    }
                    error_code::OFFSET_OUT_OF_RANGE => {
                        warn!(
                            "offset {} of {}/{} is out of range, resetting to earliest",
                            position.offset, self.topic, fetched.partition_index
                        );
                        out_of_range.push(fetched.partition_index);
                    }
                    code if error_code::is_leadership_change(code) => {
                        warn!(
                            "leadership of {}/{} moved ({}), refreshing metadata",
                            self.topic,
                            fetched.partition_index,
                            error_code::describe(code)
                        );
                        self.stale_metadata = true;
                    }
                    code => {
                        return Err(WireError::broker(
                            code,
                            format!("fetching {}/{}", self.topic, fetched.partition_index),
                        ))
                    }
                }
            }
        }

        if !out_of_range.is_empty() {
            self.seek(&out_of_range, StartingOffset::Earliest).await?;
        }
        Ok(records)
    }

    /// Release the broker connections.
    pub async fn close(self) {
        info!("closing subscription to {} at {:?}", self.topic, self.offsets());
        self.client.shutdown().await;
    }
}

#[async_trait]
impl RecordSource for Subscription {
    async fn poll(&mut self) -> Result<Vec<RawRecord>> {
        self.fetch().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kafka_wire::testing::{test_options, FakeBroker};
    use pretty_assertions::assert_eq;

    fn fast_settings() -> ConsumerConfig {
        ConsumerConfig {
            max_wait_ms: 20,
            ..ConsumerConfig::default()
        }
    }

    async fn subscribe(
        broker: &FakeBroker,
        topic: &str,
        starting: StartingOffset,
    ) -> Result<Subscription> {
        let client = KafkaClient::connect(&[broker.address()], test_options())
            .await
            .unwrap();
        KafkaConsumer::new(client, fast_settings())
            .subscribe(topic, starting)
            .await
    }

    fn payloads(records: &[RawRecord]) -> Vec<(i32, i64, &[u8])> {
        records
            .iter()
            .map(|r| (r.partition, r.offset, r.payload.as_deref().unwrap_or_default()))
            .collect()
    }

    #[tokio::test]
    async fn test_earliest_replays_existing_records() {
        let broker = FakeBroker::start().await;
        broker.create_topic("stedi-events", 1);
        broker.produce("stedi-events", 0, Some(&b"a"[..]));
        broker.produce("stedi-events", 0, Some(&b"b"[..]));

        let mut subscription = subscribe(&broker, "stedi-events", StartingOffset::Earliest)
            .await
            .unwrap();
        assert_eq!(subscription.offsets(), vec![(0, 0)]);

        let records = subscription.poll().await.unwrap();
        assert_eq!(
            payloads(&records),
            vec![(0, 0, &b"a"[..]), (0, 1, &b"b"[..])]
        );
        assert_eq!(subscription.offsets(), vec![(0, 2)]);
        subscription.close().await;
    }

    #[tokio::test]
    async fn test_latest_skips_existing_records() {
        let broker = FakeBroker::start().await;
        broker.create_topic("stedi-events", 1);
        broker.produce("stedi-events", 0, Some(&b"old"[..]));

        let mut subscription = subscribe(&broker, "stedi-events", StartingOffset::Latest)
            .await
            .unwrap();
        assert!(subscription.poll().await.unwrap().is_empty());

        broker.produce("stedi-events", 0, Some(&b"new"[..]));
        let records = subscription.poll().await.unwrap();
        assert_eq!(payloads(&records), vec![(0, 1, &b"new"[..])]);
    }

    #[tokio::test]
    async fn test_empty_poll_is_not_an_error() {
        let broker = FakeBroker::start().await;
        broker.create_topic("quiet", 1);

        let mut subscription = subscribe(&broker, "quiet", StartingOffset::Earliest)
            .await
            .unwrap();
        for _ in 0..3 {
            assert!(subscription.poll().await.unwrap().is_empty());
        }
        assert_eq!(subscription.offsets(), vec![(0, 0)]);
    }

    #[tokio::test]
    async fn test_reads_every_partition_in_order() {
        let broker = FakeBroker::start().await;
        broker.create_topic("multi", 2);
        broker.produce("multi", 1, Some(&b"p1-0"[..]));
        broker.produce("multi", 0, Some(&b"p0-0"[..]));
        broker.produce("multi", 1, Some(&b"p1-1"[..]));

        let mut subscription = subscribe(&broker, "multi", StartingOffset::Earliest)
            .await
            .unwrap();
        let records = subscription.poll().await.unwrap();
        assert_eq!(
            payloads(&records),
            vec![
                (0, 0, &b"p0-0"[..]),
                (1, 0, &b"p1-0"[..]),
                (1, 1, &b"p1-1"[..])
            ]
        );
    }

    #[tokio::test]
    async fn test_null_payload_is_passed_through() {
        let broker = FakeBroker::start().await;
        broker.create_topic("t", 1);
        broker.produce("t", 0, None);

        let mut subscription = subscribe(&broker, "t", StartingOffset::Earliest)
            .await
            .unwrap();
        let records = subscription.poll().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, None);
    }

    #[tokio::test]
    async fn test_unknown_topic_is_an_error() {
        let broker = FakeBroker::start().await;

        let err = subscribe(&broker, "missing", StartingOffset::Earliest)
            .await
            .err()
            .unwrap();
        match err {
            WireError::Broker { code, .. } => {
                assert_eq!(code, error_code::UNKNOWN_TOPIC_OR_PARTITION)
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_out_of_range_resets_to_earliest() {
        let broker = FakeBroker::start().await;
        broker.create_topic("t", 1);
        for value in [b"0", b"1", b"2"] {
            broker.produce("t", 0, Some(&value[..]));
        }
        let mut subscription = subscribe(&broker, "t", StartingOffset::Latest)
            .await
            .unwrap();
        assert_eq!(subscription.offsets(), vec![(0, 3)]);

        for value in [b"3", b"4", b"5"] {
            broker.produce("t", 0, Some(&value[..]));
        }
        broker.truncate_before("t", 0, 5);

        assert!(subscription.poll().await.unwrap().is_empty());
        assert_eq!(subscription.offsets(), vec![(0, 5)]);
        let records = subscription.poll().await.unwrap();
        assert_eq!(payloads(&records), vec![(0, 5, &b"5"[..])]);
    }

    #[tokio::test]
    async fn test_polls_through_leader_election() {
        let broker = FakeBroker::start().await;
        broker.create_topic("t", 1);
        broker.produce("t", 0, Some(&b"before"[..]));
        let mut subscription = subscribe(&broker, "t", StartingOffset::Earliest)
            .await
            .unwrap();
        assert_eq!(payloads(&subscription.poll().await.unwrap()), vec![(0, 0, &b"before"[..])]);

        broker.set_leader_available("t", 0, false);
        broker.produce("t", 0, Some(&b"during"[..]));
        // the leadership error, then a refresh that still finds no leader
        assert!(subscription.poll().await.unwrap().is_empty());
        assert!(subscription.poll().await.unwrap().is_empty());
        assert_eq!(subscription.offsets(), vec![(0, 1)]);

        broker.set_leader_available("t", 0, true);
        let records = subscription.poll().await.unwrap();
        assert_eq!(payloads(&records), vec![(0, 1, &b"during"[..])]);
        assert_eq!(subscription.offsets(), vec![(0, 2)]);
    }

    #[tokio::test]
    async fn test_subscribe_without_leader_is_an_error() {
        let broker = FakeBroker::start().await;
        broker.create_topic("t", 1);
        broker.set_leader_available("t", 0, false);

        let err = subscribe(&broker, "t", StartingOffset::Earliest)
            .await
            .err()
            .unwrap();
        match err {
            WireError::Broker { code, .. } => assert_eq!(code, error_code::LEADER_NOT_AVAILABLE),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_starting_offset_display() {
        assert_eq!(StartingOffset::Earliest.to_string(), "earliest");
        assert_eq!(StartingOffset::default(), StartingOffset::Latest);
    }
}
