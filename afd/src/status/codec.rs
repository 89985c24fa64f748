//! Binary field helpers shared by the area record codecs.
//!
//! Records are encoded little-endian into a fixed-size region and padded
//! with zeroes. Bounded strings carry a `u16` length prefix; the bound is
//! enforced on both encode and decode so a corrupt file cannot make us
//! allocate unbounded memory.

use bytes::{Buf, BufMut};

use super::AreaError;

/// Appends a length-prefixed string, enforcing `max` bytes.
pub(crate) fn put_str(buf: &mut Vec<u8>, s: &str, max: usize) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(max);
    buf.put_u16_le(len as u16);
    buf.put_slice(&bytes[..len]);
}

/// Reads a length-prefixed string, enforcing `max` bytes.
pub(crate) fn get_str(buf: &mut &[u8], max: usize) -> Result<String, AreaError> {
    if buf.remaining() < 2 {
        return Err(AreaError::Truncated);
    }
    let len = buf.get_u16_le() as usize;
    if len > max || buf.remaining() < len {
        return Err(AreaError::Truncated);
    }
    let s = String::from_utf8(buf[..len].to_vec()).map_err(|_| AreaError::Truncated)?;
    buf.advance(len);
    Ok(s)
}

pub(crate) fn get_u8(buf: &mut &[u8]) -> Result<u8, AreaError> {
    if buf.remaining() < 1 {
        return Err(AreaError::Truncated);
    }
    Ok(buf.get_u8())
}

pub(crate) fn get_u16(buf: &mut &[u8]) -> Result<u16, AreaError> {
    if buf.remaining() < 2 {
        return Err(AreaError::Truncated);
    }
    Ok(buf.get_u16_le())
}

pub(crate) fn get_u32(buf: &mut &[u8]) -> Result<u32, AreaError> {
    if buf.remaining() < 4 {
        return Err(AreaError::Truncated);
    }
    Ok(buf.get_u32_le())
}

pub(crate) fn get_u64(buf: &mut &[u8]) -> Result<u64, AreaError> {
    if buf.remaining() < 8 {
        return Err(AreaError::Truncated);
    }
    Ok(buf.get_u64_le())
}

pub(crate) fn get_i64(buf: &mut &[u8]) -> Result<i64, AreaError> {
    if buf.remaining() < 8 {
        return Err(AreaError::Truncated);
    }
    Ok(buf.get_i64_le())
}
