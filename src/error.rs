//! Error types for big blob downloads.

use std::io;
use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// A `Range` header that could not be turned into a single byte range.
///
/// Every variant carries the raw header text for diagnostics. These errors
/// never reach the client: the transfer falls back to the full resource.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeParseError {
    #[error("unsupported range unit: {0}")]
    UnsupportedUnit(String),

    #[error("multiple ranges are not supported: {0}")]
    MultipleRanges(String),

    #[error("malformed range: {0}")]
    Malformed(String),

    #[error("invalid range position: {0}")]
    InvalidPosition(String),

    #[error("range start is after range end: {0}")]
    StartAfterEnd(String),

    #[error("cannot apply range to an empty resource: {0}")]
    EmptyResource(String),
}

impl RangeParseError {
    /// The offending `Range` header value.
    pub fn header(&self) -> &str {
        match self {
            RangeParseError::UnsupportedUnit(header)
            | RangeParseError::MultipleRanges(header)
            | RangeParseError::Malformed(header)
            | RangeParseError::InvalidPosition(header)
            | RangeParseError::StartAfterEnd(header)
            | RangeParseError::EmptyResource(header) => header,
        }
    }
}

/// An unexpected I/O failure while streaming a blob.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("failed to open blob stream at offset {offset}: {source}")]
    Open {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("failed to read blob stream at offset {offset}: {source}")]
    Read {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("failed to write response at offset {offset}: {source}")]
    Write {
        offset: u64,
        #[source]
        source: io::Error,
    },
}

/// Terminal outcomes of a download request that are not a completed transfer.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("no blob registered under handle {0:?}")]
    NotFound(String),

    #[error("blob under handle {0:?} is gone")]
    Gone(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl DownloadError {
    /// Map the error to the status code sent to the client.
    ///
    /// A missing handle is answered with 204 and an explicitly gone one with
    /// 404. Neither is retryable.
    pub fn status(&self) -> StatusCode {
        match self {
            DownloadError::NotFound(_) => StatusCode::NO_CONTENT,
            DownloadError::Gone(_) => StatusCode::NOT_FOUND,
            DownloadError::Transfer(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DownloadError {
    fn into_response(self) -> Response {
        match self {
            DownloadError::Transfer(_) => {
                (self.status(), "failed to stream blob").into_response()
            }
            _ => self.status().into_response(),
        }
    }
}

/// Errors raised while loading or validating [`DownloadConfig`](crate::DownloadConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
