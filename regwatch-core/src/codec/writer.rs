//! Two-pass encoding.
//!
//! Every encoder is written once against [`std::io::Write`]. The first pass
//! runs it over a [`Sizer`], which only counts bytes; the second pass runs it
//! over a slice of exactly that size.

use std::io;

use crate::boundary::GuestMemory;
use crate::error::{RegwatchError, Result};
use crate::types::Address;

/// A value that can be written in the wire format.
pub trait WireEncode {
    /// Write `self` to `wr`.
    fn encode<W: io::Write>(&self, wr: &mut W) -> Result<()>;
}

/// An [`io::Write`] sink that records how many bytes went through it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sizer {
    len: usize,
}

impl Sizer {
    /// Bytes counted so far.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether nothing has been counted.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl io::Write for Sizer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.len += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn encode_error(err: impl std::fmt::Display) -> RegwatchError {
    RegwatchError::encode(err.to_string())
}

/// Write a map header.
pub fn write_map_len<W: io::Write>(wr: &mut W, len: u32) -> Result<()> {
    rmp::encode::write_map_len(wr, len)
        .map(|_| ())
        .map_err(encode_error)
}

/// Write a UTF-8 string.
pub fn write_str<W: io::Write>(wr: &mut W, value: &str) -> Result<()> {
    rmp::encode::write_str(wr, value).map_err(encode_error)
}

/// Write a byte string.
pub fn write_bin<W: io::Write>(wr: &mut W, value: &[u8]) -> Result<()> {
    rmp::encode::write_bin(wr, value).map_err(encode_error)
}

/// Write a 32-bit signed integer.
pub fn write_i32<W: io::Write>(wr: &mut W, value: i32) -> Result<()> {
    rmp::encode::write_i32(wr, value).map_err(encode_error)
}

/// Write a boolean.
pub fn write_bool<W: io::Write>(wr: &mut W, value: bool) -> Result<()> {
    rmp::encode::write_bool(wr, value).map_err(encode_error)
}

/// Write a nil marker.
pub fn write_nil<W: io::Write>(wr: &mut W) -> Result<()> {
    rmp::encode::write_nil(wr).map_err(encode_error)
}

fn len_u32(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| RegwatchError::encode(format!("{what} of {len} entries is too long")))
}

/// Write a string-to-string map.
pub fn write_string_map<'a, W, I>(wr: &mut W, len: usize, entries: I) -> Result<()>
where
    W: io::Write,
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    write_map_len(wr, len_u32(len, "map")?)?;
    for (key, value) in entries {
        write_str(wr, key)?;
        write_str(wr, value)?;
    }
    Ok(())
}

/// Size pass: the exact number of bytes `value` encodes to.
pub fn encoded_len<T: WireEncode + ?Sized>(value: &T) -> Result<usize> {
    let mut sizer = Sizer::default();
    value.encode(&mut sizer)?;
    Ok(sizer.len())
}

/// Write pass: encode into `buf`, which must be exactly the encoded size.
pub fn encode_into<T: WireEncode + ?Sized>(value: &T, buf: &mut [u8]) -> Result<()> {
    let expected = buf.len();
    let mut cursor: &mut [u8] = buf;
    value.encode(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(RegwatchError::encode(format!(
            "size pass reported {expected} bytes but {} were left unwritten",
            cursor.len()
        )));
    }
    Ok(())
}

/// Encode through both passes into a vector with no reallocation.
pub fn encode_to_vec<T: WireEncode + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; encoded_len(value)?];
    encode_into(value, &mut buf)?;
    Ok(buf)
}

/// Length of a buffer as guest memory addresses it.
///
/// Guest memory is 32-bit; a longer buffer is an encode error rather than a
/// silently truncated length.
pub fn wire_len(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| RegwatchError::encode(format!("buffer of {len} bytes exceeds guest memory")))
}

/// Encode `value` into a freshly allocated buffer in guest memory.
///
/// Returns the buffer address and length. The caller owns the buffer.
pub fn pack<M, T>(memory: &mut M, value: &T) -> Result<(Address, u32)>
where
    M: GuestMemory + ?Sized,
    T: WireEncode + ?Sized,
{
    let bytes = encode_to_vec(value)?;
    let len = wire_len(bytes.len())?;
    let address = memory.allocate(len)?;
    if let Err(err) = memory.write(address, &bytes) {
        memory.release(address)?;
        return Err(err);
    }
    Ok((address, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair(&'static str, i32);

    impl WireEncode for Pair {
        fn encode<W: io::Write>(&self, wr: &mut W) -> Result<()> {
            write_map_len(wr, 1)?;
            write_str(wr, self.0)?;
            write_i32(wr, self.1)
        }
    }

    #[test]
    fn sizer_matches_written_length() {
        let value = Pair("status", 401);
        let len = encoded_len(&value).unwrap();
        // fixmap + fixstr(6) + int32
        assert_eq!(len, 1 + 1 + 6 + 5);
        assert_eq!(encode_to_vec(&value).unwrap().len(), len);
    }

    #[test]
    fn wire_len_refuses_to_truncate() {
        assert_eq!(wire_len(31).unwrap(), 31);
        assert_eq!(wire_len(u32::MAX as usize).unwrap(), u32::MAX);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn wire_len_rejects_lengths_past_u32() {
        let err = wire_len(u32::MAX as usize + 1).unwrap_err();
        assert_eq!(err.code(), "E102");
    }

    #[test]
    fn short_buffer_fails() {
        let mut buf = [0u8; 4];
        assert!(encode_into(&Pair("status", 1), &mut buf).is_err());
    }

    #[test]
    fn oversized_buffer_fails() {
        let mut buf = [0u8; 64];
        let err = encode_into(&Pair("status", 1), &mut buf).unwrap_err();
        assert!(err.to_string().contains("unwritten"));
    }
}
