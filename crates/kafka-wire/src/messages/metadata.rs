use bytes::{BufMut, BytesMut};

use super::{Request, API_KEY_METADATA};
use crate::codec::{put_array_len, put_string, WireReader};
use crate::error::Result;

/// Metadata v1. A `None` topic list asks for every topic.
#[derive(Debug, Clone, Default)]
pub struct MetadataRequest {
    pub topics: Option<Vec<String>>,
}

impl MetadataRequest {
    pub fn all_topics() -> Self {
        Self { topics: None }
    }

    pub fn topics(topics: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            topics: Some(topics.into_iter().map(Into::into).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataResponse {
    pub brokers: Vec<BrokerMetadata>,
    pub controller_id: i32,
    pub topics: Vec<TopicMetadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMetadata {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicMetadata {
    pub error_code: i16,
    pub name: String,
    pub is_internal: bool,
    pub partitions: Vec<PartitionMetadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionMetadata {
    pub error_code: i16,
    pub partition_index: i32,
    pub leader_id: i32,
    pub replica_nodes: Vec<i32>,
    pub isr_nodes: Vec<i32>,
}

impl TopicMetadata {
    pub fn partition_ids(&self) -> Vec<i32> {
        self.partitions.iter().map(|p| p.partition_index).collect()
    }
}

impl MetadataResponse {
    pub fn topic(&self, name: &str) -> Option<&TopicMetadata> {
        self.topics.iter().find(|t| t.name == name)
    }
}

impl Request for MetadataRequest {
    const API_KEY: i16 = API_KEY_METADATA;
    const API_VERSION: i16 = 1;
    const NAME: &'static str = "Metadata";
    type Response = MetadataResponse;

    fn encode(&self, buf: &mut BytesMut) {
        match &self.topics {
            None => buf.put_i32(-1),
            Some(topics) => {
                put_array_len(buf, topics.len());
                for topic in topics {
                    put_string(buf, topic);
                }
            }
        }
    }

    fn decode_response(reader: &mut WireReader) -> Result<MetadataResponse> {
        let brokers = reader.array(|r| {
            Ok(BrokerMetadata {
                node_id: r.i32()?,
                host: r.string()?,
                port: r.i32()?,
                rack: r.nullable_string()?,
            })
        })?;
        let controller_id = reader.i32()?;
        let topics = reader.array(|r| {
            Ok(TopicMetadata {
                error_code: r.i16()?,
                name: r.string()?,
                is_internal: r.bool()?,
                partitions: r.array(|p| {
                    Ok(PartitionMetadata {
                        error_code: p.i16()?,
                        partition_index: p.i32()?,
                        leader_id: p.i32()?,
                        replica_nodes: p.array(|n| n.i32())?,
                        isr_nodes: p.array(|n| n.i32())?,
                    })
                })?,
            })
        })?;

        Ok(MetadataResponse {
            brokers,
            controller_id,
            topics,
        })
    }
}
