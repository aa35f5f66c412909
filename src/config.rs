use crate::errors::{Error, Result};
use crate::storage::ChecksumAlgorithm;
use std::env;

/// Default lower bound for a multipart part size (5 MiB).
pub const MULTIPART_CHUNKSIZE_MIN: u64 = 5 * 1024 * 1024;

/// Default upper bound for a multipart part size (5 GiB).
pub const MULTIPART_CHUNKSIZE_MAX: u64 = 5 * 1024 * 1024 * 1024;

/// Engine configuration.
///
/// Constructed explicitly, via [`Default`], or from `OBJECT_STORE_*`
/// environment variables with [`EngineConfig::from_env`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Smallest accepted multipart part size in bytes.
    pub multipart_chunksize_min: u64,

    /// Largest accepted multipart part size in bytes.
    pub multipart_chunksize_max: u64,

    /// Digest algorithm applied to new content.
    pub default_checksum_algorithm: ChecksumAlgorithm,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            multipart_chunksize_min: MULTIPART_CHUNKSIZE_MIN,
            multipart_chunksize_max: MULTIPART_CHUNKSIZE_MAX,
            default_checksum_algorithm: ChecksumAlgorithm::Md5,
        }
    }
}

impl EngineConfig {
    /// Read configuration from the environment, falling back to defaults
    /// for unset variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            multipart_chunksize_min: env_u64(
                "OBJECT_STORE_MULTIPART_CHUNKSIZE_MIN",
                defaults.multipart_chunksize_min,
            )?,
            multipart_chunksize_max: env_u64(
                "OBJECT_STORE_MULTIPART_CHUNKSIZE_MAX",
                defaults.multipart_chunksize_max,
            )?,
            default_checksum_algorithm: match env::var("OBJECT_STORE_CHECKSUM_ALGORITHM") {
                Ok(value) => value.parse()?,
                Err(env::VarError::NotPresent) => defaults.default_checksum_algorithm,
                Err(err) => {
                    return Err(Error::Config(format!(
                        "reading OBJECT_STORE_CHECKSUM_ALGORITHM: {err}"
                    )));
                }
            },
        })
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|err| Error::Config(format!("parsing {name} value `{value}`: {err}"))),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(Error::Config(format!("reading {name}: {err}"))),
    }
}
