//! Content digest utilities
//!
//! Digests are written `algorithm:hex`. Four algorithms are accepted:
//! sha256 (the registry default), sha512, sha1 and md5. Syntax checks never
//! fail; computing with an algorithm outside that set does.

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use std::fmt;
use std::str::FromStr;

pub const SHA256_PREFIX: &str = "sha256:";

/// Hash algorithms a digest may name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
    Sha1,
    Md5,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Md5 => "md5",
        }
    }

    /// Length of the hex encoding of a full hash
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha512 => 128,
            DigestAlgorithm::Sha1 => 40,
            DigestAlgorithm::Md5 => 32,
        }
    }

    /// Start an incremental hash with this algorithm
    pub fn hasher(&self) -> DigestHasher {
        match self {
            DigestAlgorithm::Sha256 => DigestHasher::Sha256(sha2::Sha256::new()),
            DigestAlgorithm::Sha512 => DigestHasher::Sha512(sha2::Sha512::new()),
            DigestAlgorithm::Sha1 => DigestHasher::Sha1(sha1::Sha1::new()),
            DigestAlgorithm::Md5 => DigestHasher::Md5(md5::Md5::new()),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            "sha1" => Ok(DigestAlgorithm::Sha1),
            "md5" => Ok(DigestAlgorithm::Md5),
            other => Err(RegistryError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incremental hasher, fed chunk by chunk while a layer streams past
pub enum DigestHasher {
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
    Sha1(sha1::Sha1),
    Md5(md5::Md5),
}

impl DigestHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            DigestHasher::Sha256(h) => h.update(data),
            DigestHasher::Sha512(h) => h.update(data),
            DigestHasher::Sha1(h) => h.update(data),
            DigestHasher::Md5(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Digest {
        let (algorithm, hex) = match self {
            DigestHasher::Sha256(h) => (DigestAlgorithm::Sha256, hex::encode(h.finalize())),
            DigestHasher::Sha512(h) => (DigestAlgorithm::Sha512, hex::encode(h.finalize())),
            DigestHasher::Sha1(h) => (DigestAlgorithm::Sha1, hex::encode(h.finalize())),
            DigestHasher::Md5(h) => (DigestAlgorithm::Md5, hex::encode(h.finalize())),
        };
        Digest { algorithm, hex }
    }
}

/// A content hash identifier such as `sha256:9f86d0...`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    pub algorithm: DigestAlgorithm,
    pub hex: String,
}

impl Digest {
    /// SHA-256 of `data`
    pub fn sha256(data: &[u8]) -> Self {
        Digest {
            algorithm: DigestAlgorithm::Sha256,
            hex: hex::encode(sha2::Sha256::digest(data)),
        }
    }

    /// First twelve hex characters, the form used in progress labels
    pub fn short(&self) -> &str {
        &self.hex[..self.hex.len().min(12)]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        if !DigestUtils::validate(s) {
            return Err(RegistryError::InvalidDigestFormat(s.to_string()));
        }
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| RegistryError::InvalidDigestFormat(s.to_string()))?;
        Ok(Digest {
            algorithm: algorithm.parse()?,
            hex: hex.to_string(),
        })
    }
}

impl TryFrom<String> for Digest {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}

/// Associated helpers for computing and checking digest strings
pub struct DigestUtils;

impl DigestUtils {
    /// Hash `data` with the named algorithm
    pub fn calculate(data: &[u8], algorithm: &str) -> Result<Digest> {
        let algorithm: DigestAlgorithm = algorithm.parse()?;
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        Ok(hasher.finalize())
    }

    /// Syntax and allow-list check; never errors
    pub fn validate(digest: &str) -> bool {
        let Some((algorithm, hex)) = digest.split_once(':') else {
            return false;
        };
        let algorithm_ok = !algorithm.is_empty()
            && algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        let hex_ok = !hex.is_empty() && hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'));
        algorithm_ok && hex_ok && algorithm.parse::<DigestAlgorithm>().is_ok()
    }

    /// Recompute the digest of `data` and compare it with `expected`
    pub fn verify(data: &[u8], expected: &str) -> Result<bool> {
        if !Self::validate(expected) {
            return Err(RegistryError::InvalidInput(format!(
                "Invalid digest format: {}",
                expected
            )));
        }
        let expected: Digest = expected.parse()?;
        let actual = Self::calculate(data, expected.algorithm.as_str())?;
        Ok(actual == expected)
    }

    /// Shortened `algorithm:hex` for log lines
    pub fn format_short(digest: &str) -> String {
        match digest.split_once(':') {
            Some((algorithm, hex)) => format!("{}:{}", algorithm, &hex[..hex.len().min(12)]),
            None => digest[..digest.len().min(12)].to_string(),
        }
    }
}
