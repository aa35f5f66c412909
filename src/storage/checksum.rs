//! Rolling digests for streamed content.
//!
//! Digests are rendered algorithm-prefixed (`md5:<hex>`, `sha256:<hex>`)
//! so the algorithm survives alongside the value and re-verification can
//! pick the right hasher from the stored string alone.

use crate::errors::{Error, Result};
use md5::Context;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Digest algorithm applied to stored content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
}

impl ChecksumAlgorithm {
    /// Extract the algorithm from an algorithm-prefixed digest string.
    pub fn of_digest(digest: &str) -> Result<Self> {
        let (prefix, _) = digest
            .split_once(':')
            .ok_or_else(|| Error::Config(format!("digest `{digest}` has no algorithm prefix")))?;
        prefix.parse()
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            other => Err(Error::Config(format!("unknown checksum algorithm `{other}`"))),
        }
    }
}

/// Incremental hasher fed while bytes are streamed, so content is never
/// buffered whole just to digest it.
pub enum Hasher {
    Md5(Context),
    Sha256(Sha256),
}

impl Hasher {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Self::Md5(Context::new()),
            ChecksumAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Md5(ctx) => ctx.consume(bytes),
            Self::Sha256(hasher) => hasher.update(bytes),
        }
    }

    /// Finish the digest as an algorithm-prefixed lowercase hex string.
    pub fn finish(self) -> String {
        match self {
            Self::Md5(ctx) => format!("md5:{:x}", ctx.compute()),
            Self::Sha256(hasher) => {
                let digest = hasher.finalize();
                let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
                format!("sha256:{hex}")
            }
        }
    }
}
