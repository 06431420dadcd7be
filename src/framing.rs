//! Exact-count transfers over a byte stream
//!
//! A single `read`/`write` on a stream socket may move fewer bytes than asked
//! for. These helpers loop until the whole buffer is moved or an error occurs.

use anyhow::Result;
use std::io::{self, ErrorKind, Read, Write};

/// Write all of `buf`, issuing as many writes as needed.
/// Returns `buf.len()` on success.
pub fn send_exact<W: Write + ?Sized>(w: &mut W, buf: &[u8]) -> Result<usize> {
    let mut sent = 0usize;
    while sent < buf.len() {
        match w.write(&buf[sent..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    format!("connection closed after sending {} of {} bytes", sent, buf.len()),
                )
                .into());
            }
            Ok(n) => sent += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(sent)
}

/// Fill all of `buf`, issuing as many reads as needed.
/// A read of 0 bytes before `buf` is full is an `UnexpectedEof` error.
pub fn recv_exact<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut received = 0usize;
    while received < buf.len() {
        match r.read(&mut buf[received..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!(
                        "connection closed after receiving {} of {} bytes",
                        received,
                        buf.len()
                    ),
                )
                .into());
            }
            Ok(n) => received += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(received)
}

/// True when `err` is (or wraps) an early close reported by the helpers above.
pub fn is_premature_close(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .map(|e| matches!(e.kind(), ErrorKind::UnexpectedEof | ErrorKind::WriteZero))
            .unwrap_or(false)
    })
}
