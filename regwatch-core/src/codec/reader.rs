//! Forward-only decoding.

use byteorder::{BigEndian, ByteOrder};
use rmp::Marker;

use crate::boundary::GuestMemory;
use crate::error::{RegwatchError, Result};
use crate::types::Address;

/// Nesting limit for [`Decoder::skip`].
pub const MAX_SKIP_DEPTH: usize = 32;

/// A value that can be read from the wire format.
pub trait WireDecode: Sized {
    /// Read one value from `decoder`.
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self>;

    /// Decode a complete buffer.
    fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::decode(&mut Decoder::new(bytes))
    }
}

fn decode_error(err: impl std::fmt::Display) -> RegwatchError {
    RegwatchError::decode(err.to_string())
}

/// Cursor over an encoded buffer.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Start decoding `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.buf.len() < len {
            return Err(RegwatchError::decode(format!(
                "unexpected end of input: wanted {len} bytes, {} left",
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Look at the next marker without consuming it.
    pub fn peek_marker(&self) -> Result<Marker> {
        self.buf
            .first()
            .map(|&byte| Marker::from_u8(byte))
            .ok_or_else(|| RegwatchError::decode("unexpected end of input"))
    }

    /// Consume a nil marker if one is next.
    pub fn try_nil(&mut self) -> bool {
        if matches!(self.peek_marker(), Ok(Marker::Null)) {
            self.buf = &self.buf[1..];
            true
        } else {
            false
        }
    }

    /// Read a map header.
    pub fn read_map_len(&mut self) -> Result<u32> {
        rmp::decode::read_map_len(&mut self.buf).map_err(decode_error)
    }

    /// Read a UTF-8 string, borrowing from the input.
    pub fn read_str(&mut self) -> Result<&'a str> {
        let len = rmp::decode::read_str_len(&mut self.buf).map_err(decode_error)?;
        let bytes = self.take(len as usize)?;
        std::str::from_utf8(bytes).map_err(decode_error)
    }

    /// Read a byte string. String markers are accepted too.
    pub fn read_bin(&mut self) -> Result<&'a [u8]> {
        let len = match self.peek_marker()? {
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                rmp::decode::read_str_len(&mut self.buf).map_err(decode_error)?
            }
            _ => rmp::decode::read_bin_len(&mut self.buf).map_err(decode_error)?,
        };
        self.take(len as usize)
    }

    /// Read any integer that fits in an `i32`.
    pub fn read_i32(&mut self) -> Result<i32> {
        rmp::decode::read_int::<i32, _>(&mut self.buf).map_err(decode_error)
    }

    /// Read a boolean.
    pub fn read_bool(&mut self) -> Result<bool> {
        rmp::decode::read_bool(&mut self.buf).map_err(decode_error)
    }

    /// Read an optional value: nil decodes to `None`.
    pub fn read_optional<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<Option<T>> {
        if self.try_nil() {
            Ok(None)
        } else {
            read(self).map(Some)
        }
    }

    /// Read a string if one is next, otherwise skip whatever value is there.
    pub fn read_str_or_skip(&mut self) -> Result<Option<&'a str>> {
        match self.peek_marker()? {
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                self.read_str().map(Some)
            }
            _ => {
                self.skip()?;
                Ok(None)
            }
        }
    }

    fn read_len32(&mut self) -> Result<usize> {
        let len = BigEndian::read_u32(self.take(4)?);
        usize::try_from(len).map_err(|_| RegwatchError::decode(format!("length {len} too large")))
    }

    /// Skip one complete value of any type.
    pub fn skip(&mut self) -> Result<()> {
        self.skip_nested(0)
    }

    fn skip_nested(&mut self, depth: usize) -> Result<()> {
        if depth > MAX_SKIP_DEPTH {
            return Err(RegwatchError::decode(format!(
                "values nested deeper than {MAX_SKIP_DEPTH} levels"
            )));
        }

        let marker = Marker::from_u8(self.take(1)?[0]);
        let (payload, items) = match marker {
            Marker::Null | Marker::True | Marker::False | Marker::FixPos(_) | Marker::FixNeg(_) => {
                (0, 0)
            }
            Marker::U8 | Marker::I8 => (1, 0),
            Marker::U16 | Marker::I16 => (2, 0),
            Marker::U32 | Marker::I32 | Marker::F32 => (4, 0),
            Marker::U64 | Marker::I64 | Marker::F64 => (8, 0),
            Marker::FixStr(len) => (usize::from(len), 0),
            Marker::Str8 | Marker::Bin8 => (usize::from(self.take(1)?[0]), 0),
            Marker::Str16 | Marker::Bin16 => (usize::from(BigEndian::read_u16(self.take(2)?)), 0),
            Marker::Str32 | Marker::Bin32 => (self.read_len32()?, 0),
            Marker::FixArray(len) => (0, usize::from(len)),
            Marker::Array16 => (0, usize::from(BigEndian::read_u16(self.take(2)?))),
            Marker::Array32 => (0, self.read_len32()?),
            Marker::FixMap(len) => (0, 2 * usize::from(len)),
            Marker::Map16 => (0, 2 * usize::from(BigEndian::read_u16(self.take(2)?))),
            Marker::Map32 => (0, overflowing(self.read_len32()?.checked_mul(2))?),
            Marker::FixExt1 => (2, 0),
            Marker::FixExt2 => (3, 0),
            Marker::FixExt4 => (5, 0),
            Marker::FixExt8 => (9, 0),
            Marker::FixExt16 => (17, 0),
            Marker::Ext8 => (usize::from(self.take(1)?[0]) + 1, 0),
            Marker::Ext16 => (usize::from(BigEndian::read_u16(self.take(2)?)) + 1, 0),
            Marker::Ext32 => (overflowing(self.read_len32()?.checked_add(1))?, 0),
            Marker::Reserved => return Err(RegwatchError::decode("reserved marker 0xc1")),
        };

        self.take(payload)?;
        // every item needs at least its marker byte
        if items > self.buf.len() {
            return Err(RegwatchError::decode(format!(
                "{items} items declared but only {} bytes left",
                self.buf.len()
            )));
        }
        for _ in 0..items {
            self.skip_nested(depth + 1)?;
        }
        Ok(())
    }
}

fn overflowing(len: Option<usize>) -> Result<usize> {
    len.ok_or_else(|| RegwatchError::decode("declared length overflows"))
}

/// Decode a value stored at `data` in guest memory.
pub fn unpack<M, T>(memory: &M, data: Address, len: u32) -> Result<T>
where
    M: GuestMemory + ?Sized,
    T: WireDecode,
{
    T::from_slice(&memory.read(data, len)?)
}
