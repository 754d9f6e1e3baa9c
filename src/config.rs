//! Configuration for the download endpoint.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Smallest accepted copy chunk.
pub const MIN_CHUNK_SIZE: usize = 64 * 1024;

/// Largest accepted copy chunk.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Default copy chunk, independent of the requested range length.
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Path prefix the application is mounted under, e.g. `/app`.
    /// Empty, or starting with `/` and without a trailing `/`.
    #[serde(default)]
    pub context_path: String,

    /// Bytes read from the blob and flushed to the client per iteration.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Lengths above this are sent without a `Content-Length` header.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: u64,

    /// Cookie carrying the session id that scopes registered handles.
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,

    /// Listen address used by the demo server.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_content_length() -> u64 {
    i64::MAX as u64
}

fn default_session_cookie() -> String {
    "bigblob_session".to_string()
}

fn default_bind_address() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for DownloadConfig {
    fn default() -> Self {
        DownloadConfig {
            context_path: String::new(),
            chunk_size: default_chunk_size(),
            max_content_length: default_max_content_length(),
            session_cookie: default_session_cookie(),
            bind_address: default_bind_address(),
        }
    }
}

impl DownloadConfig {
    /// Load and validate a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate a YAML configuration document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: DownloadConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(ConfigError::Invalid(format!(
                "chunk_size must be between {} and {} bytes, got {}",
                MIN_CHUNK_SIZE, MAX_CHUNK_SIZE, self.chunk_size
            )));
        }

        if !self.context_path.is_empty()
            && (!self.context_path.starts_with('/') || self.context_path.ends_with('/'))
        {
            return Err(ConfigError::Invalid(format!(
                "context_path must start with '/' and not end with '/', got {:?}",
                self.context_path
            )));
        }

        if self.max_content_length == 0 {
            return Err(ConfigError::Invalid(
                "max_content_length must be greater than 0".to_string(),
            ));
        }

        if self.session_cookie.is_empty() {
            return Err(ConfigError::Invalid("session_cookie must not be empty".to_string()));
        }

        Ok(())
    }
}
