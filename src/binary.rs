//! Little-endian field access at raw byte offsets.
//!
//! Every SCD structure is addressed by fixed offsets into a flat buffer, so
//! the rest of the crate goes through these helpers instead of slicing
//! directly. Out-of-range access is a [`Error::Format`]: a field that does not
//! fit means the container is truncated or its offsets are corrupt.

use crate::{Error, Result};

/// Width of an unsigned little-endian field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    U8,
    U16,
    U32,
}

impl Width {
    /// Map a bit count (8, 16 or 32) to a width.
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Width::U8),
            16 => Some(Width::U16),
            32 => Some(Width::U32),
            _ => None,
        }
    }

    /// Size of the field in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U16 => 2,
            Width::U32 => 4,
        }
    }
}

fn field(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| Error::out_of_bounds(offset, len, buf.len()))
}

fn field_mut(buf: &mut [u8], offset: usize, len: usize) -> Result<&mut [u8]> {
    let buf_len = buf.len();
    match offset.checked_add(len) {
        Some(end) if end <= buf_len => Ok(&mut buf[offset..end]),
        _ => Err(Error::out_of_bounds(offset, len, buf_len)),
    }
}

/// Read an unsigned field of the given width.
pub fn read_uint(buf: &[u8], width: Width, offset: usize) -> Result<u32> {
    let bytes = field(buf, offset, width.bytes())?;
    let mut value = [0u8; 4];
    value[..bytes.len()].copy_from_slice(bytes);
    Ok(u32::from_le_bytes(value))
}

/// Write the low `width` bytes of `value`.
pub fn write_uint(buf: &mut [u8], value: u32, width: Width, offset: usize) -> Result<()> {
    let n = width.bytes();
    field_mut(buf, offset, n)?.copy_from_slice(&value.to_le_bytes()[..n]);
    Ok(())
}

pub fn read_u8(buf: &[u8], offset: usize) -> Result<u8> {
    Ok(field(buf, offset, 1)?[0])
}

pub fn read_u16(buf: &[u8], offset: usize) -> Result<u16> {
    read_uint(buf, Width::U16, offset).map(|v| v as u16)
}

pub fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    read_uint(buf, Width::U32, offset)
}

pub fn read_u64(buf: &[u8], offset: usize) -> Result<u64> {
    let bytes = field(buf, offset, 8)?;
    let mut value = [0u8; 8];
    value.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(value))
}

pub fn read_f32(buf: &[u8], offset: usize) -> Result<f32> {
    read_u32(buf, offset).map(f32::from_bits)
}

pub fn write_u8(buf: &mut [u8], value: u8, offset: usize) -> Result<()> {
    write_uint(buf, u32::from(value), Width::U8, offset)
}

pub fn write_u32(buf: &mut [u8], value: u32, offset: usize) -> Result<()> {
    write_uint(buf, value, Width::U32, offset)
}

pub fn write_f32(buf: &mut [u8], value: f32, offset: usize) -> Result<()> {
    write_u32(buf, value.to_bits(), offset)
}

/// Write a length or offset that must fit the 32-bit on-disk field.
pub fn write_len(buf: &mut [u8], value: usize, offset: usize) -> Result<()> {
    let value = u32::try_from(value)
        .map_err(|_| Error::format(format!("value {} does not fit a 32-bit field", value)))?;
    write_u32(buf, value, offset)
}

/// Find the first occurrence of `pattern` at or after `from`.
pub fn find_pattern(buf: &[u8], pattern: &[u8], from: usize) -> Option<usize> {
    if pattern.is_empty() || from >= buf.len() || buf.len() - from < pattern.len() {
        return None;
    }

    buf[from..]
        .windows(pattern.len())
        .position(|window| window == pattern)
        .map(|pos| pos + from)
}

/// Find an ASCII tag and parse the decimal number that follows it.
///
/// Non-digit bytes between the tag and the number are skipped, so
/// `MARK1=1234`, `MARK1 "1234"` and `MARK1\0\x051234` all yield 1234.
pub fn find_tag_value(tag: &str, buf: &[u8]) -> Option<i32> {
    let pos = find_pattern(buf, tag.as_bytes(), 0)? + tag.len();
    let rest = buf.get(pos..)?;

    let start = rest.iter().position(u8::is_ascii_digit)?;
    let digits = &rest[start..];
    let len = digits
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());

    std::str::from_utf8(&digits[..len]).ok()?.parse().ok()
}
