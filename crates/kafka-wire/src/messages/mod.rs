//! Request/response bodies for the APIs the client speaks.
//!
//! Only non-flexible versions are used, so no tagged fields appear in
//! either headers or bodies:
//! - request header v1: api_key i16, api_version i16, correlation_id i32, client_id string
//! - response header v0: correlation_id i32

mod create_topics;
mod fetch;
mod list_offsets;
mod metadata;

pub use create_topics::*;
pub use fetch::*;
pub use list_offsets::*;
pub use metadata::*;

use bytes::{BufMut, BytesMut};

use crate::codec::{put_nullable_string, WireReader};
use crate::error::Result;

pub const API_KEY_FETCH: i16 = 1;
pub const API_KEY_LIST_OFFSETS: i16 = 2;
pub const API_KEY_METADATA: i16 = 3;
pub const API_KEY_CREATE_TOPICS: i16 = 19;

/// A request body together with the response it expects back.
pub trait Request {
    const API_KEY: i16;
    const API_VERSION: i16;
    const NAME: &'static str;
    type Response;

    fn encode(&self, buf: &mut BytesMut);

    fn decode_response(reader: &mut WireReader) -> Result<Self::Response>;
}

/// Build a complete size-prefixed frame for `request`.
pub fn encode_frame<R: Request>(request: &R, correlation_id: i32, client_id: &str) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64);
    // size placeholder, patched below
    buf.put_i32(0);
    buf.put_i16(R::API_KEY);
    buf.put_i16(R::API_VERSION);
    buf.put_i32(correlation_id);
    put_nullable_string(&mut buf, Some(client_id));
    request.encode(&mut buf);

    let size = (buf.len() - 4) as i32;
    buf[..4].copy_from_slice(&size.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(&MetadataRequest::all_topics(), 99, "test-client");

        let size = i32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
        assert_eq!(size as usize, frame.len() - 4);
        assert_eq!(&frame[4..6], &API_KEY_METADATA.to_be_bytes());
        assert_eq!(&frame[6..8], &1i16.to_be_bytes());
        assert_eq!(&frame[8..12], &99i32.to_be_bytes());
        assert_eq!(&frame[12..14], &11i16.to_be_bytes());
        assert_eq!(&frame[14..25], b"test-client");
        // null topic array requests every topic
        assert_eq!(&frame[25..], &(-1i32).to_be_bytes());
    }
}
