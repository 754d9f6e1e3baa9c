//! # axum-bigblob
//!
//! Single-use downloads of large blobs for [`axum`][1], with support for
//! single byte-range requests (RFC 7233).
//!
//! Some other part of the application registers a [`Blob`] in the
//! [`SessionRegistry`] and hands the client a link containing the
//! `nxbigblob` marker segment and the returned handle. The first request
//! for that link takes the blob out of the registry and streams it; later
//! requests for the same handle get `204 No Content`.
//!
//! Bodies are streamed in fixed-size chunks through the
//! [`TransferEngine`], never buffered in full. A `Range: bytes=A-B`,
//! `bytes=A-` or `bytes=-N` header produces a `206 Partial Content`
//! answer; anything else the parser rejects, multi-range requests
//! included, is answered with the full blob.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use axum_bigblob::{router, AppState, DownloadConfig, MemoryBlob, SessionRegistry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let sessions = Arc::new(SessionRegistry::new());
//!     let blob = MemoryBlob::new("Hello world").with_filename("hello.txt");
//!     let handle = sessions.register("session-1", Arc::new(blob));
//!
//!     let state = AppState::new(DownloadConfig::default(), sessions);
//!     println!("download from {}", state.download_path(&handle));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();
//!     axum::serve(listener, router(state)).await.unwrap();
//! }
//! ```
//!
//! [1]: https://docs.rs/axum

mod blob;
mod config;
mod disposition;
mod error;
mod file;
mod handler;
mod range;
mod registry;
mod stream;
mod transfer;

pub use blob::{Blob, BlobReader, MemoryBlob};
pub use config::{DownloadConfig, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use disposition::{DispositionEncoder, Rfc2231Disposition};
pub use error::{ConfigError, DownloadError, RangeParseError, TransferError};
pub use file::FileBlob;
pub use handler::{blob_handle, router, AppState, BIG_BLOB_MARKER};
pub use range::parse_range;
pub use registry::{BlobLookup, SessionRegistry};
pub use stream::{channel, ChannelSink, TransferBody};
pub use transfer::{
    DisconnectClassifier, PeerClosed, ResponseHead, ResponseSink, TransferEngine,
    TransferOutcome, TransferPlan,
};

/// Represents a single byte range with inclusive start and end positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        ByteRange { start, end }
    }

    /// The whole of a resource of `size` bytes. `size` must be non-zero.
    pub fn full(size: u64) -> Self {
        ByteRange { start: 0, end: size.saturating_sub(1) }
    }

    /// Everything up to the end of the stream, for resources of unknown size.
    pub fn unbounded() -> Self {
        ByteRange { start: 0, end: u64::MAX }
    }

    pub fn len(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        (self.end - self.start).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}
