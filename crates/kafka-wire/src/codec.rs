//! Primitive encoding for the Kafka binary protocol.
//!
//! Fixed-width integers are big-endian. Strings carry an i16 length prefix
//! (-1 = null), byte blobs and arrays an i32 length prefix (-1 = null).
//! Records inside a RecordBatch use zigzag varints instead.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};

pub fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_i16(value.len() as i16);
    buf.put_slice(value.as_bytes());
}

pub fn put_nullable_string(buf: &mut BytesMut, value: Option<&str>) {
    match value {
        Some(value) => put_string(buf, value),
        None => buf.put_i16(-1),
    }
}

pub fn put_array_len(buf: &mut BytesMut, len: usize) {
    buf.put_i32(len as i32);
}

pub fn put_nullable_bytes(buf: &mut BytesMut, value: Option<&[u8]>) {
    match value {
        Some(value) => {
            buf.put_i32(value.len() as i32);
            buf.put_slice(value);
        }
        None => buf.put_i32(-1),
    }
}

/// Zigzag varint, as used for record fields.
pub fn put_varint(buf: &mut BytesMut, value: i64) {
    let mut n = ((value << 1) ^ (value >> 63)) as u64;
    while n >= 0x80 {
        buf.put_u8((n as u8 & 0x7f) | 0x80);
        n >>= 7;
    }
    buf.put_u8(n as u8);
}

/// Bounds-checked reader over a response body.
#[derive(Debug, Clone)]
pub struct WireReader {
    buf: Bytes,
}

macro_rules! read_fixed {
    ($name:ident, $ty:ty, $get:ident) => {
        pub fn $name(&mut self) -> Result<$ty> {
            self.ensure(std::mem::size_of::<$ty>(), stringify!($ty))?;
            Ok(self.buf.$get())
        }
    };
}

impl WireReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(WireError::protocol(format!(
                "truncated {what}: need {needed} byte(s), {} left",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    read_fixed!(i8, i8, get_i8);
    read_fixed!(i16, i16, get_i16);
    read_fixed!(i32, i32, get_i32);
    read_fixed!(i64, i64, get_i64);
    read_fixed!(u32, u32, get_u32);

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.i8()? != 0)
    }

    pub fn take(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len, "byte slice")?;
        Ok(self.buf.split_to(len))
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.ensure(len, "padding")?;
        self.buf.advance(len);
        Ok(())
    }

    pub fn nullable_string(&mut self) -> Result<Option<String>> {
        let len = self.i16()?;
        if len < 0 {
            return Ok(None);
        }
        let raw = self.take(len as usize)?;
        String::from_utf8(raw.to_vec())
            .map(Some)
            .map_err(|e| WireError::protocol(format!("string is not UTF-8: {e}")))
    }

    pub fn string(&mut self) -> Result<String> {
        self.nullable_string()?
            .ok_or_else(|| WireError::protocol("unexpected null string"))
    }

    pub fn nullable_bytes(&mut self) -> Result<Option<Bytes>> {
        let len = self.i32()?;
        if len < 0 {
            return Ok(None);
        }
        self.take(len as usize).map(Some)
    }

    /// Array length, `None` for a null array.
    pub fn nullable_array_len(&mut self) -> Result<Option<usize>> {
        let len = self.i32()?;
        if len < 0 {
            return Ok(None);
        }
        // every element occupies at least one byte
        self.ensure(len as usize, "array")?;
        Ok(Some(len as usize))
    }

    pub fn array_len(&mut self) -> Result<usize> {
        Ok(self.nullable_array_len()?.unwrap_or(0))
    }

    pub fn array<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let len = self.array_len()?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(item(self)?);
        }
        Ok(items)
    }

    /// Zigzag varint (up to 64 bits).
    pub fn varint(&mut self) -> Result<i64> {
        let mut value: u64 = 0;
        for shift in (0..64).step_by(7) {
            self.ensure(1, "varint")?;
            let byte = self.buf.get_u8();
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok((value >> 1) as i64 ^ -((value & 1) as i64));
            }
        }
        Err(WireError::protocol("varint longer than 10 bytes"))
    }

    /// Length-prefixed blob inside a record, `None` for length -1.
    pub fn varint_bytes(&mut self) -> Result<Option<Bytes>> {
        let len = self.varint()?;
        if len < 0 {
            return Ok(None);
        }
        self.take(len as usize).map(Some)
    }
}
