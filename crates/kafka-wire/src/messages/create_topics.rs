use bytes::{BufMut, BytesMut};

use super::{Request, API_KEY_CREATE_TOPICS};
use crate::codec::{put_array_len, put_string, WireReader};
use crate::error::Result;

/// CreateTopics v0 without manual assignments or topic configs.
#[derive(Debug, Clone)]
pub struct CreateTopicsRequest {
    pub name: String,
    pub num_partitions: i32,
    pub replication_factor: i16,
    pub timeout_ms: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTopicsResponse {
    pub topics: Vec<(String, i16)>,
}

impl Request for CreateTopicsRequest {
    const API_KEY: i16 = API_KEY_CREATE_TOPICS;
    const API_VERSION: i16 = 0;
    const NAME: &'static str = "CreateTopics";
    type Response = CreateTopicsResponse;

    fn encode(&self, buf: &mut BytesMut) {
        put_array_len(buf, 1);
        put_string(buf, &self.name);
        buf.put_i32(self.num_partitions);
        buf.put_i16(self.replication_factor);
        put_array_len(buf, 0); // assignments
        put_array_len(buf, 0); // configs
        buf.put_i32(self.timeout_ms);
    }

    fn decode_response(reader: &mut WireReader) -> Result<CreateTopicsResponse> {
        let topics = reader.array(|r| Ok((r.string()?, r.i16()?)))?;
        Ok(CreateTopicsResponse { topics })
    }
}
