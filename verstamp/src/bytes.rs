//! Little-endian field access with bounds checks.

use crate::error::ImageError;

pub(crate) fn slice(buf: &[u8], offset: usize, len: usize) -> Result<&[u8], ImageError> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or(ImageError::Truncated { offset, len })
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> Result<u16, ImageError> {
    let raw = slice(buf, offset, 2)?;
    Ok(u16::from_le_bytes([raw[0], raw[1]]))
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ImageError> {
    let raw = slice(buf, offset, 4)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

pub(crate) fn write_u16(buf: &mut [u8], offset: usize, value: u16) -> Result<(), ImageError> {
    write_bytes(buf, offset, &value.to_le_bytes())
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) -> Result<(), ImageError> {
    write_bytes(buf, offset, &value.to_le_bytes())
}

pub(crate) fn write_bytes(buf: &mut [u8], offset: usize, data: &[u8]) -> Result<(), ImageError> {
    let len = data.len();
    let target = offset
        .checked_add(len)
        .and_then(|end| buf.get_mut(offset..end))
        .ok_or(ImageError::Truncated { offset, len })?;
    target.copy_from_slice(data);
    Ok(())
}

/// Round `value` up to a multiple of `alignment` (a power of two, or zero for no-op).
pub(crate) fn align_up(value: usize, alignment: usize) -> Result<usize, ImageError> {
    if alignment <= 1 {
        return Ok(value);
    }
    let mask = alignment.saturating_sub(1);
    value
        .checked_add(mask)
        .map(|v| v & !mask)
        .ok_or_else(|| ImageError::Malformed(format!("offset {value:#x} overflows alignment")))
}

pub(crate) fn pad_to(buf: &mut Vec<u8>, alignment: usize) {
    while alignment > 1 && buf.len() % alignment != 0 {
        buf.push(0);
    }
}

pub(crate) fn to_u32(value: usize, what: &str) -> Result<u32, ImageError> {
    u32::try_from(value).map_err(|_| ImageError::Malformed(format!("{what} {value:#x} exceeds 32 bits")))
}

pub(crate) fn to_usize(value: u32) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// Encode a string as UTF-16LE bytes without terminator.
pub(crate) fn utf16_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}
