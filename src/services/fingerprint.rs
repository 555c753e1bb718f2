//! Content fingerprints: SHA-256 over the full byte stream, hex encoded.
//!
//! Input is consumed chunk by chunk, so memory use does not depend on the
//! payload size. Chunk boundaries never affect the digest.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{AppError, Result};

/// Hex length of a 256-bit digest
pub const HASH_HEX_LEN: usize = 64;

/// A content hash - 256 bits of SHA-256, 64 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash an in-memory buffer.
    pub fn from_data(data: &[u8]) -> Self {
        let mut fp = Fingerprinter::new();
        fp.update(data);
        fp.finalize()
    }

    /// Validate a client-supplied digest.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != HASH_HEX_LEN {
            return Err(AppError::Validation(format!(
                "content_hash must be {} hex characters, got {}",
                HASH_HEX_LEN,
                s.len()
            )));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AppError::Validation(
                "content_hash contains non-hex characters".to_string(),
            ));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Blob store key, sharded on the first byte: `ab/cdef...`
    pub fn blob_key(&self) -> String {
        format!("{}/{}", &self.0[..2], &self.0[2..])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental hasher that also counts the bytes it has seen
#[derive(Default)]
pub struct Fingerprinter {
    hasher: Sha256,
    bytes: u64,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> ContentHash {
        ContentHash(hex::encode(self.hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_known_digests() {
        assert_eq!(ContentHash::from_data(b"").as_str(), EMPTY_SHA256);
        assert_eq!(
            ContentHash::from_data(b"abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let whole = ContentHash::from_data(&data);

        for chunk_size in [1, 7, 64, 4096, 9_999] {
            let mut fp = Fingerprinter::new();
            for chunk in data.chunks(chunk_size) {
                fp.update(chunk);
            }
            assert_eq!(fp.bytes_seen(), data.len() as u64);
            assert_eq!(fp.finalize(), whole, "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn test_distinct_content_distinct_digest() {
        let a = ContentHash::from_data(b"This is a test file content");
        let b = ContentHash::from_data(b"This is a different test file content");
        let c = ContentHash::from_data(b"This is a test file content ");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, ContentHash::from_data(b"This is a test file content"));
    }

    #[test]
    fn test_parse_validates_format() {
        let ok = ContentHash::parse(&"AbCd".repeat(16)).unwrap();
        assert_eq!(ok.as_str(), "abcd".repeat(16));

        assert!(matches!(
            ContentHash::parse("abc"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            ContentHash::parse(&"g".repeat(64)),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            ContentHash::parse(&"a".repeat(65)),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_blob_key_is_sharded() {
        let hash = ContentHash::from_data(b"");
        assert_eq!(hash.blob_key(), format!("e3/{}", &EMPTY_SHA256[2..]));
    }
}
