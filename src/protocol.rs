//! Shared protocol constants for the sendfile transport
//!
//! Wire layout of one connection (client -> server):
//! `name_len (size field) | name bytes | file_size (size field) | payload`

// Width of every size field on the wire. The value is written as decimal ASCII
// and the unused tail is NUL. At most SIZE_FIELD_WIDTH - 1 digits are kept.
pub const SIZE_FIELD_WIDTH: usize = 100;

// Server-side cap for a single payload read. Files larger than this arrive in
// several chunks.
pub const MAX_FILE_CHUNK_SIZE: usize = 64 * 1024;

// Capacity of the server's name buffer. A declared name length that meets or
// exceeds this is rejected before any name bytes are read.
pub const MAX_FILE_NAME_SIZE: usize = 100;

// Pending connections allowed while the server is busy with a transfer
pub const LISTEN_BACKLOG: i32 = 100;

// Sleep after a failed accept, doubling per consecutive failure
pub const ACCEPT_BACKOFF_MIN_MS: u64 = 10;
pub const ACCEPT_BACKOFF_MAX_MS: u64 = 1000;

// Upper bound for one zero-copy sendfile call (8MB)
pub const SENDFILE_CHUNK: usize = 8 * 1024 * 1024;

// Buffer used when the platform has no zero-copy primitive (4MB)
pub const COPY_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Largest value whose decimal form fits in one size field without truncation.
/// Every `u64` fits at the default width; narrower widths truncate silently.
pub fn max_representable_size() -> Option<u64> {
    let digits = SIZE_FIELD_WIDTH.saturating_sub(1);
    if digits >= 20 {
        return Some(u64::MAX);
    }
    10u64.checked_pow(digits as u32).map(|p| p - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_width_holds_any_u64() {
        assert_eq!(max_representable_size(), Some(u64::MAX));
    }

    #[test]
    fn test_name_limit_fits_in_size_field() {
        assert!(MAX_FILE_NAME_SIZE.to_string().len() < SIZE_FIELD_WIDTH);
        assert!(MAX_FILE_CHUNK_SIZE > 0);
    }
}
