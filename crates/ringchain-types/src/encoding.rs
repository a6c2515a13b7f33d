//! Binary encoding primitives: varints, a bounds-checked read cursor and
//! the structural error type shared by block and transaction decoding.

use thiserror::Error;

/// Structural decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unexpected end of data at offset {offset} (need {needed} bytes, have {remaining})")]
    UnexpectedEof { offset: usize, needed: usize, remaining: usize },

    #[error("varint overflow at offset {0}")]
    VarintOverflow(usize),

    #[error("unknown {kind} tag 0x{tag:02x}")]
    UnknownTag { kind: &'static str, tag: u8 },

    #[error("value out of range for {0}")]
    OutOfRange(&'static str),

    #[error("{0} trailing bytes after object")]
    TrailingBytes(usize),

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

// ─── Varints ─────────────────────────────────────────────────────────────────

/// Encode a varint (little-endian base-128).
pub fn encode_varint(mut value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(10);
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        bytes.push(byte);
        if value == 0 {
            break;
        }
    }
    bytes
}

pub fn write_varint(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&encode_varint(value));
}

/// Decode a varint at `offset`. Returns (value, bytes_read).
pub fn decode_varint(data: &[u8], offset: usize) -> Result<(u64, usize), ParseError> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    for (i, &byte) in data.iter().skip(offset).enumerate() {
        if shift == 63 && byte > 1 {
            return Err(ParseError::VarintOverflow(offset));
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
        if shift > 63 {
            return Err(ParseError::VarintOverflow(offset));
        }
    }
    Err(ParseError::UnexpectedEof {
        offset,
        needed: 1,
        remaining: 0,
    })
}

// ─── Cursor ──────────────────────────────────────────────────────────────────

pub struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], ParseError> {
        if count > self.remaining() {
            return Err(ParseError::UnexpectedEof {
                offset: self.offset,
                needed: count,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.offset..self.offset + count];
        self.offset += count;
        Ok(slice)
    }

    pub fn read_byte(&mut self) -> Result<u8, ParseError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_varint(&mut self) -> Result<u64, ParseError> {
        let (value, read) = decode_varint(self.data, self.offset)?;
        self.offset += read;
        Ok(value)
    }

    /// Read a varint used as an element count, bounded by the bytes left
    /// so a hostile count cannot trigger a huge allocation.
    pub fn read_count(&mut self, min_element_size: usize) -> Result<usize, ParseError> {
        let count = self.read_varint()?;
        let max = (self.remaining() / min_element_size.max(1)) as u64;
        if count > max {
            return Err(ParseError::OutOfRange("element count"));
        }
        Ok(count as usize)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, ParseError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_array32(&mut self) -> Result<[u8; 32], ParseError> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.read_bytes(32)?);
        Ok(out)
    }

    pub fn read_blob(&mut self) -> Result<Vec<u8>, ParseError> {
        let len = self.read_count(1)?;
        Ok(self.read_bytes(len)?.to_vec())
    }

    /// Error unless every byte has been consumed.
    pub fn finish(&self) -> Result<(), ParseError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(ParseError::TrailingBytes(n)),
        }
    }
}

pub fn write_blob(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}
