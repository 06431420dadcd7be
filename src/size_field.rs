//! Fixed-width decimal size fields
//!
//! Every length on the wire (file-name length, file size) travels as a block of
//! exactly `SIZE_FIELD_WIDTH` bytes holding ASCII digits followed by NUL padding.
//! Values with more than `SIZE_FIELD_WIDTH - 1` digits are truncated to their
//! leading digits, so callers must keep values within `max_representable_size()`.

use anyhow::{bail, Context, Result};
use std::io::{Read, Write};

use crate::framing::{recv_exact, send_exact};
use crate::protocol::SIZE_FIELD_WIDTH;

pub fn encode_size(n: u64) -> [u8; SIZE_FIELD_WIDTH] {
    let mut field = [0u8; SIZE_FIELD_WIDTH];
    let digits = n.to_string();
    let len = digits.len().min(SIZE_FIELD_WIDTH - 1);
    field[..len].copy_from_slice(&digits.as_bytes()[..len]);
    field
}

/// Parse the leading decimal digits of a size field.
/// Leading ASCII whitespace is skipped and parsing stops at the first non-digit
/// (normally the NUL padding). A field with no digits is an error.
pub fn decode_size(field: &[u8]) -> Result<u64> {
    let start = field
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(field.len());
    let digits = &field[start..];
    let end = digits
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        bail!(
            "size field holds no digits (starts with {:?})",
            String::from_utf8_lossy(&field[..field.len().min(8)])
        );
    }
    let text = std::str::from_utf8(&digits[..end]).context("size field utf8")?;
    text.parse::<u64>()
        .with_context(|| format!("size field out of range: {}", text))
}

pub fn send_size<W: Write + ?Sized>(w: &mut W, n: u64) -> Result<usize> {
    send_exact(w, &encode_size(n))
}

pub fn recv_size<R: Read + ?Sized>(r: &mut R) -> Result<u64> {
    let mut field = [0u8; SIZE_FIELD_WIDTH];
    recv_exact(r, &mut field)?;
    decode_size(&field)
}
