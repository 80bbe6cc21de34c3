use bytes::{BufMut, BytesMut};

use super::{Request, API_KEY_LIST_OFFSETS};
use crate::codec::{put_array_len, put_string, WireReader};
use crate::error::Result;

/// Timestamp sentinel resolving to the log start offset.
pub const EARLIEST_TIMESTAMP: i64 = -2;
/// Timestamp sentinel resolving to the high watermark.
pub const LATEST_TIMESTAMP: i64 = -1;

/// ListOffsets v1, issued as a plain consumer (replica id -1).
#[derive(Debug, Clone)]
pub struct ListOffsetsRequest {
    pub topic: String,
    pub partitions: Vec<(i32, i64)>,
}

impl ListOffsetsRequest {
    pub fn new(topic: impl Into<String>, partitions: &[i32], timestamp: i64) -> Self {
        Self {
            topic: topic.into(),
            partitions: partitions.iter().map(|p| (*p, timestamp)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListOffsetsPartition {
    pub partition_index: i32,
    pub error_code: i16,
    pub timestamp: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListOffsetsResponse {
    pub topics: Vec<(String, Vec<ListOffsetsPartition>)>,
}

impl ListOffsetsResponse {
    pub fn partitions(&self, topic: &str) -> impl Iterator<Item = &ListOffsetsPartition> + '_ {
        let topic = topic.to_string();
        self.topics
            .iter()
            .filter(move |(name, _)| *name == topic)
            .flat_map(|(_, partitions)| partitions.iter())
    }
}

impl Request for ListOffsetsRequest {
    const API_KEY: i16 = API_KEY_LIST_OFFSETS;
    const API_VERSION: i16 = 1;
    const NAME: &'static str = "ListOffsets";
    type Response = ListOffsetsResponse;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(-1);
        put_array_len(buf, 1);
        put_string(buf, &self.topic);
        put_array_len(buf, self.partitions.len());
        for (partition, timestamp) in &self.partitions {
            buf.put_i32(*partition);
            buf.put_i64(*timestamp);
        }
    }

    fn decode_response(reader: &mut WireReader) -> Result<ListOffsetsResponse> {
        let topics = reader.array(|r| {
            let name = r.string()?;
            let partitions = r.array(|p| {
                Ok(ListOffsetsPartition {
                    partition_index: p.i32()?,
                    error_code: p.i16()?,
                    timestamp: p.i64()?,
                    offset: p.i64()?,
                })
            })?;
            Ok((name, partitions))
        })?;
        Ok(ListOffsetsResponse { topics })
    }
}
