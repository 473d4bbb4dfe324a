//! Bounds-checked little-endian field access

use crate::error::{BrokerError, Result};

/// Reads fixed-offset fields out of a payload without ever indexing past its end
#[derive(Clone, Copy, Debug)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fail unless the payload holds at least `len` bytes
    pub fn require(&self, len: usize) -> Result<()> {
        if self.data.len() < len {
            return Err(BrokerError::PayloadTruncated {
                offset: 0,
                needed: len,
                len: self.data.len(),
            });
        }
        Ok(())
    }

    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        offset
            .checked_add(N)
            .and_then(|end| self.data.get(offset..end))
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(BrokerError::PayloadTruncated {
                offset,
                needed: N,
                len: self.data.len(),
            })
    }

    pub fn u8(&self, offset: usize) -> Result<u8> {
        Ok(self.array::<1>(offset)?[0])
    }

    pub fn flag(&self, offset: usize) -> Result<bool> {
        Ok(self.u8(offset)? != 0)
    }

    pub fn u32(&self, offset: usize) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array(offset)?))
    }

    pub fn i32(&self, offset: usize) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array(offset)?))
    }

    pub fn i64(&self, offset: usize) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array(offset)?))
    }

    /// Fixed-width UTF-16LE string field, truncated at the first NUL
    pub fn utf16z(&self, offset: usize, units: usize, field: &'static str) -> Result<String> {
        let width = units * 2;
        let raw = offset
            .checked_add(width)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(BrokerError::PayloadTruncated {
                offset,
                needed: width,
                len: self.data.len(),
            })?;

        let code_units = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0);

        char::decode_utf16(code_units)
            .collect::<std::result::Result<String, _>>()
            .map_err(|_| BrokerError::InvalidName(field))
    }
}

/// Appends little-endian fields in layout order
#[derive(Clone, Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn flag(&mut self, value: bool) -> &mut Self {
        self.u8(u8::from(value))
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Fixed-width UTF-16LE field. Always leaves room for the terminating NUL.
    pub fn utf16z(&mut self, value: &str, units: usize) -> &mut Self {
        let mut written = 0;
        for unit in value.encode_utf16().take(units.saturating_sub(1)) {
            self.buf.extend_from_slice(&unit.to_le_bytes());
            written += 1;
        }
        self.zeros((units - written) * 2)
    }

    pub fn zeros(&mut self, count: usize) -> &mut Self {
        self.buf.resize(self.buf.len() + count, 0);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}
