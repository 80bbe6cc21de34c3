use bytes::{BufMut, BytesMut};

use super::{Request, API_KEY_FETCH};
use crate::codec::{put_array_len, put_string, WireReader};
use crate::error::Result;
use crate::records::{decode_record_batches, Record};

/// Fetch v4 for a single topic, read-uncommitted.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub max_wait_ms: i32,
    pub min_bytes: i32,
    pub max_bytes: i32,
    pub topic: String,
    pub partitions: Vec<FetchPartition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPartition {
    pub partition: i32,
    pub fetch_offset: i64,
    pub max_bytes: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub throttle_time_ms: i32,
    pub topics: Vec<(String, Vec<FetchedPartition>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPartition {
    pub partition_index: i32,
    pub error_code: i16,
    pub high_watermark: i64,
    pub records: Vec<Record>,
}

impl FetchResponse {
    pub fn into_partitions(self) -> impl Iterator<Item = (String, FetchedPartition)> {
        self.topics
            .into_iter()
            .flat_map(|(topic, partitions)| partitions.into_iter().map(move |p| (topic.clone(), p)))
    }
}

impl Request for FetchRequest {
    const API_KEY: i16 = API_KEY_FETCH;
    const API_VERSION: i16 = 4;
    const NAME: &'static str = "Fetch";
    type Response = FetchResponse;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(-1); // replica id
        buf.put_i32(self.max_wait_ms);
        buf.put_i32(self.min_bytes);
        buf.put_i32(self.max_bytes);
        buf.put_i8(0); // isolation level: read uncommitted
        put_array_len(buf, 1);
        put_string(buf, &self.topic);
        put_array_len(buf, self.partitions.len());
        for p in &self.partitions {
            buf.put_i32(p.partition);
            buf.put_i64(p.fetch_offset);
            buf.put_i32(p.max_bytes);
        }
    }

    fn decode_response(reader: &mut WireReader) -> Result<FetchResponse> {
        // records below the fetch offset are filtered by the consumer
        let throttle_time_ms = reader.i32()?;
        let topics = reader.array(|r| {
            let topic = r.string()?;
            let partitions = r.array(|p| {
                let partition_index = p.i32()?;
                let error_code = p.i16()?;
                let high_watermark = p.i64()?;
                let _last_stable_offset = p.i64()?;
                // aborted transactions: producer_id i64, first_offset i64
                let _aborted = p.array(|a| Ok((a.i64()?, a.i64()?)))?;
                let records = match p.nullable_bytes()? {
                    Some(data) => decode_record_batches(data, 0)?,
                    None => Vec::new(),
                };
                Ok(FetchedPartition {
                    partition_index,
                    error_code,
                    high_watermark,
                    records,
                })
            })?;
            Ok((topic, partitions))
        })?;

        Ok(FetchResponse {
            throttle_time_ms,
            topics,
        })
    }
}
