//! RecordBatch decoding
//!
//! Fetch responses carry a concatenation of RecordBatch v2 blobs:
//! - baseOffset: i64, batchLength: i32 (bytes after this field)
//! - partitionLeaderEpoch: i32, magic: i8 (= 2), crc: u32
//! - attributes: i16 (bits 0-2 compression, bit 4 transactional, bit 5 control)
//! - lastOffsetDelta: i32, baseTimestamp: i64, maxTimestamp: i64
//! - producerId: i64, producerEpoch: i16, baseSequence: i32
//! - recordsCount: i32, then the records, each varint-framed.
//!
//! The broker may cut the last batch short when it hits max_bytes; the
//! partial tail is ignored and fetched again from the next offset.

use bytes::Bytes;
use log::{debug, trace};

use crate::codec::WireReader;
use crate::error::{Result, WireError};

/// Size of the fixed part of a batch that precedes `batchLength`'s payload.
const BATCH_PREFIX_LEN: usize = 12;
const MAGIC_V2: i8 = 2;
const COMPRESSION_MASK: i16 = 0x07;
const CONTROL_FLAG: i16 = 0x20;

/// A single record as stored in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub offset: i64,
    pub timestamp: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<RecordHeader>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    pub key: String,
    pub value: Option<Bytes>,
}

/// Decode every complete batch in `data`, dropping records below `min_offset`.
pub fn decode_record_batches(data: Bytes, min_offset: i64) -> Result<Vec<Record>> {
    let mut reader = WireReader::new(data);
    let mut records = Vec::new();

    while reader.remaining() >= BATCH_PREFIX_LEN {
        let base_offset = reader.i64()?;
        let batch_length = reader.i32()?;
        if batch_length < 0 {
            return Err(WireError::protocol(format!(
                "negative batch length {batch_length} at offset {base_offset}"
            )));
        }
        if reader.remaining() < batch_length as usize {
            trace!(
                "ignoring partial batch at offset {base_offset} ({} of {batch_length} bytes)",
                reader.remaining()
            );
            break;
        }
        let batch = reader.take(batch_length as usize)?;
        decode_batch(base_offset, batch, min_offset, &mut records)?;
    }

    Ok(records)
}

fn decode_batch(
    base_offset: i64,
    batch: Bytes,
    min_offset: i64,
    records: &mut Vec<Record>,
) -> Result<()> {
    let mut reader = WireReader::new(batch);
    let _partition_leader_epoch = reader.i32()?;
    let magic = reader.i8()?;
    if magic != MAGIC_V2 {
        return Err(WireError::protocol(format!(
            "unsupported message format v{magic} at offset {base_offset}"
        )));
    }
    let _crc = reader.u32()?;
    let attributes = reader.i16()?;
    let _last_offset_delta = reader.i32()?;
    let base_timestamp = reader.i64()?;
    let _max_timestamp = reader.i64()?;
    // producer id (8), producer epoch (2), base sequence (4)
    reader.skip(14)?;
    let count = reader.i32()?;

    if attributes & CONTROL_FLAG != 0 {
        debug!("skipping control batch at offset {base_offset}");
        return Ok(());
    }
    let codec = attributes & COMPRESSION_MASK;
    if codec != 0 {
        return Err(WireError::protocol(format!(
            "compressed record batches are not supported (codec {codec} at offset {base_offset})"
        )));
    }

    for _ in 0..count.max(0) {
        let len = reader.varint()?;
        if len < 0 {
            return Err(WireError::protocol(format!("negative record length {len}")));
        }
        let mut record = WireReader::new(reader.take(len as usize)?);
        let _attributes = record.i8()?;
        let timestamp_delta = record.varint()?;
        let offset_delta = record.varint()?;
        let key = record.varint_bytes()?;
        let value = record.varint_bytes()?;
        let header_count = record.varint()?;
        let mut headers = Vec::with_capacity(header_count.clamp(0, 64) as usize);
        for _ in 0..header_count.max(0) {
            let key = record
                .varint_bytes()?
                .ok_or_else(|| WireError::protocol("null record header key"))?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| WireError::protocol(format!("record header key is not UTF-8: {e}")))?;
            let value = record.varint_bytes()?;
            headers.push(RecordHeader { key, value });
        }

        let offset = base_offset + offset_delta;
        if offset < min_offset {
            continue;
        }
        records.push(Record {
            offset,
            timestamp: base_timestamp + timestamp_delta,
            key,
            value,
            headers,
        });
    }

    Ok(())
}
