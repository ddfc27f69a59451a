//! Wire protocol for the medialift resumable chunked upload.
//!
//! Both sides of the upload (client engine and session store) depend on this
//! crate so that chunk math and payload shapes cannot drift apart.

mod wire;

pub use wire::{
    ChunkAck, CompleteUploadResponse, ErrorResponse, InitUploadRequest, InitUploadResponse,
};

/// Default chunk size: 8 MiB.
///
/// `totalChunks` is computed once at session init from this size, so changing
/// it requires both sides to agree. The server's policy is authoritative and
/// echoes the effective size in [`InitUploadResponse::chunk_size`].
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Header carrying the optional SHA-256 hex digest of a chunk body.
pub const CHECKSUM_HEADER: &str = "x-chunk-checksum";

/// Stable error codes carried in [`ErrorResponse::code`].
pub mod error_code {
    pub const INVALID_UPLOAD: &str = "invalid_upload";
    pub const NOT_FOUND: &str = "not_found";
    pub const CHUNK_OUT_OF_RANGE: &str = "chunk_out_of_range";
    pub const CHUNK_MISMATCH: &str = "chunk_mismatch";
    pub const INCOMPLETE: &str = "incomplete";
    pub const STORAGE: &str = "storage";
}

/// Number of chunks a file of `file_size` bytes splits into.
///
/// Ceil division; `file_size` must be > 0 (a zero-byte upload is rejected at
/// init before this is ever called).
pub fn total_chunks(file_size: u64, chunk_size: u64) -> u32 {
    (file_size.div_ceil(chunk_size)) as u32
}

/// Integer percentage `floor(received / total * 100)`, clamped to 100.
///
/// Progress is always derived through this helper from the acknowledged chunk
/// count so it can never drift from its source.
pub fn progress_percent(received: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (received as u64 * 100) / total as u64;
    pct.min(100) as u8
}

/// Byte length chunk `index` is expected to carry.
///
/// Every chunk is exactly `chunk_size` bytes except the final one, which
/// carries the remainder.
pub fn expected_chunk_len(file_size: u64, chunk_size: u64, index: u32) -> u64 {
    let start = index as u64 * chunk_size;
    chunk_size.min(file_size.saturating_sub(start))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_chunks_exact_multiple() {
        assert_eq!(total_chunks(16, 8), 2);
    }

    #[test]
    fn total_chunks_with_remainder() {
        // The reference scenario: 17 MiB at 8 MiB chunks -> 3 chunks.
        let mib = 1024 * 1024;
        assert_eq!(total_chunks(17 * mib, 8 * mib), 3);
    }

    #[test]
    fn total_chunks_single_byte() {
        assert_eq!(total_chunks(1, DEFAULT_CHUNK_SIZE), 1);
    }

    #[test]
    fn progress_is_floored() {
        // 1/3 -> 33, never rounded up.
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 66);
        assert_eq!(progress_percent(3, 3), 100);
    }

    #[test]
    fn progress_never_exceeds_100() {
        assert_eq!(progress_percent(5, 3), 100);
    }

    #[test]
    fn progress_monotonic_over_a_session() {
        let total = 7;
        let mut last = 0;
        for received in 0..=total {
            let p = progress_percent(received, total);
            assert!(p >= last, "progress decreased: {last} -> {p}");
            last = p;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn expected_len_full_and_tail() {
        let mib = 1024 * 1024;
        assert_eq!(expected_chunk_len(17 * mib, 8 * mib, 0), 8 * mib);
        assert_eq!(expected_chunk_len(17 * mib, 8 * mib, 1), 8 * mib);
        assert_eq!(expected_chunk_len(17 * mib, 8 * mib, 2), mib);
    }

    #[test]
    fn expected_len_past_end_is_zero() {
        assert_eq!(expected_chunk_len(16, 8, 2), 0);
    }
}
