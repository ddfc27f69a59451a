use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use medialift_protocol::{expected_chunk_len, total_chunks};

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Reads a file as fixed-size, index-addressed chunks.
///
/// Chunk `index` covers the byte range
/// `[index * chunk_size, min((index + 1) * chunk_size, file_size))`, so any
/// chunk can be re-read for a resume without tracking a cursor.
pub struct FileChunker {
    file: std::fs::File,
    file_size: u64,
    chunk_size: u64,
}

impl FileChunker {
    /// Opens `path` for chunked reading. `chunk_size` must be non-zero.
    pub fn open(path: &Path, chunk_size: u64) -> io::Result<Self> {
        if chunk_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "chunk size must be non-zero",
            ));
        }
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            file,
            file_size,
            chunk_size,
        })
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of chunks the file splits into.
    pub fn total_chunks(&self) -> u32 {
        total_chunks(self.file_size, self.chunk_size)
    }

    /// Reads chunk `index` in full.
    ///
    /// Fails with `InvalidInput` if `index` is past the end of the file.
    pub fn read_chunk(&mut self, index: u32) -> io::Result<Vec<u8>> {
        let len = expected_chunk_len(self.file_size, self.chunk_size, index);
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("chunk index {index} out of range"),
            ));
        }
        self.file
            .seek(SeekFrom::Start(index as u64 * self.chunk_size))?;
        let mut buf = vec![0u8; len as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}
