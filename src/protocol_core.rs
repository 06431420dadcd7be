//! Shared protocol checks used by the server before touching the filesystem

use anyhow::{bail, Context, Result};
use std::path::{Component, Path, PathBuf};

/// Reject a declared name length that would not fit the server's name buffer.
/// `capacity` counts the terminator slot, so `len == capacity` is also rejected.
pub fn check_name_len(len: u64, capacity: usize) -> Result<usize> {
    if len == 0 {
        bail!("empty file name");
    }
    if len >= capacity as u64 {
        bail!(
            "file name too long: {} bytes (max: {})",
            len,
            capacity.saturating_sub(1)
        );
    }
    Ok(len as usize)
}

/// Map a received file name to a path directly under `root`.
/// This prevents path traversal by:
/// 1. Requiring valid UTF-8 without NUL bytes
/// 2. Accepting exactly one plain path component (no separators, `.` or `..`)
pub fn resolve_destination(root: &Path, name: &[u8]) -> Result<PathBuf> {
    use Component::Normal;

    let name = std::str::from_utf8(name).context("utf8 file name")?;
    if name.contains('\0') {
        bail!("file name contains NUL byte");
    }
    if name.contains('/') || name.contains('\\') {
        bail!("file name contains a path separator: {:?}", name);
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Normal(s)), None) => Ok(root.join(s)),
        (first, _) => bail!("file name is not a plain file name: {:?} ({:?})", name, first),
    }
}
