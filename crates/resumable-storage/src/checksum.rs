//! Chunk checksums (TUS `Upload-Checksum`)

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256, Sha512};

use crate::traits::{StorageError, StorageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    pub const SUPPORTED: [&'static str; 2] = ["sha256", "sha512"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    pub fn hasher(&self) -> ChunkHasher {
        match self {
            ChecksumAlgorithm::Sha256 => ChunkHasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512 => ChunkHasher::Sha512(Sha512::new()),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChecksumAlgorithm {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            other => Err(StorageError::InvalidChecksum(format!(
                "Unsupported checksum algorithm: {}",
                other
            ))),
        }
    }
}

/// Expected digest of one chunk body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkChecksum {
    pub algorithm: ChecksumAlgorithm,
    pub digest: Vec<u8>,
}

impl ChunkChecksum {
    pub fn new(algorithm: ChecksumAlgorithm, digest: Vec<u8>) -> Self {
        Self { algorithm, digest }
    }

    /// Parse an `Upload-Checksum` header value: `<algorithm> <base64 digest>`.
    pub fn from_tus_header(header: &str) -> StorageResult<Self> {
        let mut parts = header.split_whitespace();
        let (Some(algorithm), Some(encoded), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(StorageError::InvalidChecksum(
                "Upload-Checksum must be '<algorithm> <base64 digest>'".to_string(),
            ));
        };

        let algorithm: ChecksumAlgorithm = algorithm.parse()?;
        let digest = STANDARD.decode(encoded).map_err(|_| {
            StorageError::InvalidChecksum("Upload-Checksum digest is not valid base64".to_string())
        })?;

        let expected_len = match algorithm {
            ChecksumAlgorithm::Sha256 => 32,
            ChecksumAlgorithm::Sha512 => 64,
        };
        if digest.len() != expected_len {
            return Err(StorageError::InvalidChecksum(format!(
                "{} digest must be {} bytes, got {}",
                algorithm,
                expected_len,
                digest.len()
            )));
        }

        Ok(Self { algorithm, digest })
    }

    /// Compute the checksum of `data` with `algorithm`.
    pub fn compute(algorithm: ChecksumAlgorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        Self {
            algorithm,
            digest: hasher.finalize(),
        }
    }

    pub fn matches(&self, digest: &[u8]) -> bool {
        self.digest == digest
    }
}

/// Incremental hasher fed while a chunk streams to disk.
pub enum ChunkHasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl ChunkHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            ChunkHasher::Sha256(h) => h.update(data),
            ChunkHasher::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            ChunkHasher::Sha256(h) => h.finalize().to_vec(),
            ChunkHasher::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sha256_header() {
        let expected = ChunkChecksum::compute(ChecksumAlgorithm::Sha256, b"hello");
        let header = format!("sha256 {}", STANDARD.encode(&expected.digest));
        let parsed = ChunkChecksum::from_tus_header(&header).unwrap();
        assert_eq!(parsed, expected);
        assert!(parsed.matches(&expected.digest));
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let result = ChunkChecksum::from_tus_header("md5 XrY7u+Ae7tCTyyK7j1rNww==");
        assert!(matches!(result, Err(StorageError::InvalidChecksum(_))));
    }

    #[test]
    fn test_rejects_wrong_digest_length() {
        let header = format!("sha512 {}", STANDARD.encode([0u8; 32]));
        assert!(ChunkChecksum::from_tus_header(&header).is_err());
    }

    #[test]
    fn test_rejects_malformed_header() {
        assert!(ChunkChecksum::from_tus_header("sha256").is_err());
        assert!(ChunkChecksum::from_tus_header("sha256 a b").is_err());
        assert!(ChunkChecksum::from_tus_header("sha256 ***").is_err());
    }

    #[test]
    fn test_incremental_hash_matches_one_shot() {
        let mut hasher = ChecksumAlgorithm::Sha512.hasher();
        hasher.update(b"hel");
        hasher.update(b"lo");
        let one_shot = ChunkChecksum::compute(ChecksumAlgorithm::Sha512, b"hello");
        assert!(one_shot.matches(&hasher.finalize()));
    }
}
