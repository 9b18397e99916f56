// src/hash.rs

//! Hashing for source integrity and artifact content addressing
//!
//! Two algorithms are supported:
//! - **SHA-256**: used for artifact content hashes and recommended for
//!   source checksums, since recipes usually copy them from upstream
//! - **XXH128**: accepted for source checksums of local, trusted inputs
//!   where only speed matters
//!
//! Checksums in recipes are written prefixed: `sha256:<hex>` or
//! `xxh128:<hex>`.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use xxhash_rust::xxh3::Xxh3;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-256 (256-bit cryptographic hash)
    #[default]
    Sha256,
    /// XXH128 (128-bit non-cryptographic hash)
    Xxh128,
}

impl HashAlgorithm {
    /// Length of the digest as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Xxh128 => 32,
        }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Xxh128 => "xxh128",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "xxh128" | "xxh3" => Ok(Self::Xxh128),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Errors from parsing or verifying hashes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("invalid hash length for {algorithm}: expected {expected}, got {got}")]
    InvalidLength {
        algorithm: HashAlgorithm,
        expected: usize,
        got: usize,
    },

    #[error("invalid hex in hash: {0}")]
    InvalidHex(String),

    #[error("{algorithm} mismatch: expected {expected}, got {actual}")]
    Mismatch {
        algorithm: HashAlgorithm,
        expected: String,
        actual: String,
    },
}

/// A digest together with the algorithm that produced it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest
    pub value: String,
}

impl ContentHash {
    /// Create a hash value, validating length and hex characters
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> Result<Self, HashError> {
        let value = value.into();
        if value.len() != algorithm.hex_len() {
            return Err(HashError::InvalidLength {
                algorithm,
                expected: algorithm.hex_len(),
                got: value.len(),
            });
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value));
        }
        Ok(Self {
            algorithm,
            value: value.to_ascii_lowercase(),
        })
    }

    /// Parse a prefixed checksum such as `sha256:abc...`
    ///
    /// Unlike package metadata, recipes must always name the algorithm.
    pub fn parse_prefixed(s: &str) -> Result<Self, HashError> {
        let (algo, digest) = s
            .split_once(':')
            .ok_or_else(|| HashError::UnknownAlgorithm(s.to_string()))?;
        Self::new(algo.parse()?, digest)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Format as `algorithm:digest`
    pub fn to_prefixed_string(&self) -> String {
        format!("{}:{}", self.algorithm.name(), self.value)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Incremental hasher over either algorithm
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    Xxh128(Box<Xxh3>),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Xxh128 => HasherState::Xxh128(Box::new(Xxh3::new())),
        };
        Self { algorithm, state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(hasher) => hasher.update(data),
            HasherState::Xxh128(hasher) => hasher.update(data),
        }
    }

    /// Feed a length-prefixed field so that adjacent fields cannot alias
    pub fn update_field(&mut self, tag: &str, value: &[u8]) {
        self.update(tag.as_bytes());
        self.update(&(value.len() as u64).to_le_bytes());
        self.update(value);
    }

    pub fn finalize(self) -> ContentHash {
        let value = match self.state {
            HasherState::Sha256(hasher) => format!("{:x}", hasher.finalize()),
            HasherState::Xxh128(hasher) => format!("{:032x}", hasher.digest128()),
        };
        ContentHash {
            algorithm: self.algorithm,
            value,
        }
    }
}

/// Hash a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> ContentHash {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Hash everything a reader yields
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<ContentHash> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Check that a file matches an expected checksum, streaming its content
///
/// The outer error is an I/O failure reading the file; the inner one a
/// mismatch.
pub fn verify_file(path: &Path, expected: &ContentHash) -> io::Result<Result<(), HashError>> {
    let mut file = File::open(path)?;
    let actual = hash_reader(expected.algorithm, &mut file)?;

    if actual.value == expected.value {
        Ok(Ok(()))
    } else {
        Ok(Err(HashError::Mismatch {
            algorithm: expected.algorithm,
            expected: expected.value.clone(),
            actual: actual.value,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sha256_known_value() {
        let hash = hash_bytes(HashAlgorithm::Sha256, b"Hello, World!");
        assert_eq!(
            hash.value,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_xxh128_length() {
        let hash = hash_bytes(HashAlgorithm::Xxh128, b"Hello, World!");
        assert_eq!(hash.value.len(), 32);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Xxh128] {
            let mut hasher = Hasher::new(algorithm);
            hasher.update(b"Hello, ");
            hasher.update(b"World!");
            assert_eq!(hasher.finalize(), hash_bytes(algorithm, b"Hello, World!"));
        }
    }

    #[test]
    fn test_update_field_separates_fields() {
        let mut a = Hasher::new(HashAlgorithm::Sha256);
        a.update_field("x", b"ab");
        a.update_field("x", b"c");

        let mut b = Hasher::new(HashAlgorithm::Sha256);
        b.update_field("x", b"a");
        b.update_field("x", b"bc");

        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_parse_prefixed() {
        let digest = "a".repeat(64);
        let hash = ContentHash::parse_prefixed(&format!("sha256:{}", digest)).unwrap();
        assert_eq!(hash.algorithm, HashAlgorithm::Sha256);
        assert_eq!(hash.to_prefixed_string(), format!("sha256:{}", digest));

        let upper = ContentHash::parse_prefixed(&format!("xxh128:{}", "AB".repeat(16))).unwrap();
        assert_eq!(upper.value, "ab".repeat(16));
    }

    #[test]
    fn test_parse_prefixed_rejects_bad_input() {
        assert!(matches!(
            ContentHash::parse_prefixed("md5:abc"),
            Err(HashError::UnknownAlgorithm(_))
        ));
        assert!(matches!(
            ContentHash::parse_prefixed("sha256:abc"),
            Err(HashError::InvalidLength { .. })
        ));
        assert!(matches!(
            ContentHash::parse_prefixed(&format!("sha256:{}", "z".repeat(64))),
            Err(HashError::InvalidHex(_))
        ));
        assert!(ContentHash::parse_prefixed(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_verify_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"Hello, World!").unwrap();

        let good = hash_bytes(HashAlgorithm::Sha256, b"Hello, World!");
        assert!(verify_file(file.path(), &good).unwrap().is_ok());

        let bad = hash_bytes(HashAlgorithm::Sha256, b"something else");
        assert!(matches!(
            verify_file(file.path(), &bad).unwrap(),
            Err(HashError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_verify_missing_file() {
        let hash = hash_bytes(HashAlgorithm::Sha256, b"");
        assert!(verify_file(Path::new("/nonexistent/galley-file"), &hash).is_err());
    }
}
