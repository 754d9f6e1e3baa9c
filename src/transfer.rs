//! The stream transfer engine.
//!
//! [`TransferEngine::transfer`] decides status and headers for a blob and an
//! optional `Range` header, then copies the selected byte window from the
//! blob's stream into a [`ResponseSink`] one chunk at a time, flushing after
//! every chunk. Write failures are classified: a peer that went away ends the
//! transfer quietly, anything else is reported as [`TransferOutcome::Failed`].

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum_extra::headers::{AcceptRanges, ContentLength, ContentRange, HeaderMapExt};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tracing::{debug, error, warn};

use crate::blob::{Blob, BlobReader};
use crate::config::{DownloadConfig, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::disposition::DispositionEncoder;
use crate::error::TransferError;
use crate::range::parse_range;
use crate::ByteRange;

const FALLBACK_FILENAME: &str = "file";
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Status line and headers, produced before the first body byte.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Value of the `Content-Length` header, if one was set.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .parse()
            .ok()
    }
}

/// Where the engine writes a response.
///
/// The engine calls [`disable_buffering`](ResponseSink::disable_buffering)
/// once, then [`send_head`](ResponseSink::send_head), then alternates
/// [`write`](ResponseSink::write) and [`flush`](ResponseSink::flush).
#[async_trait]
pub trait ResponseSink: Send {
    /// Switch a buffering sink to pass-through. The body must reach the
    /// client incrementally.
    fn disable_buffering(&mut self) {}

    async fn send_head(&mut self, head: ResponseHead) -> io::Result<()>;

    async fn write(&mut self, chunk: Bytes) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()>;
}

/// Decides whether a sink error means the client went away.
pub trait DisconnectClassifier: Send + Sync {
    fn is_peer_closed(&self, err: &io::Error) -> bool;
}

/// Treats broken pipes and reset, aborted or closed connections as client
/// disconnects.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerClosed;

impl DisconnectClassifier for PeerClosed {
    fn is_peer_closed(&self, err: &io::Error) -> bool {
        matches!(
            err.kind(),
            io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::UnexpectedEof
        )
    }
}

/// Result of one transfer attempt.
#[derive(Debug)]
pub enum TransferOutcome {
    Complete { bytes: u64 },
    /// The client closed the connection. Nothing more may be written.
    ClientDisconnected { bytes: u64 },
    /// An unexpected I/O failure; the source has already been released.
    Failed(TransferError),
}

/// The byte window a transfer will send and how to announce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub range: ByteRange,
    /// `true` for a 206 answer to a valid `Range` header.
    pub partial: bool,
    /// Known total size of the blob, `None` when unknown or zero.
    pub total: Option<u64>,
}

enum CopyError {
    Source { offset: u64, source: io::Error },
    Sink { offset: u64, written: u64, source: io::Error },
}

pub struct TransferEngine {
    chunk_size: usize,
    max_content_length: u64,
    classifier: Arc<dyn DisconnectClassifier>,
}

impl TransferEngine {
    /// Build an engine from `config`. A chunk size outside
    /// [`MIN_CHUNK_SIZE`]`..=`[`MAX_CHUNK_SIZE`] is clamped into that range.
    pub fn new(config: &DownloadConfig) -> Self {
        let chunk_size = config.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        if chunk_size != config.chunk_size {
            warn!(
                configured = config.chunk_size,
                chunk_size, "chunk size out of range, clamped"
            );
        }
        TransferEngine {
            chunk_size,
            max_content_length: config.max_content_length,
            classifier: Arc::new(PeerClosed),
        }
    }

    /// Replace the transport-specific disconnect predicate.
    pub fn with_classifier(mut self, classifier: impl DisconnectClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Resolve the byte window for a blob of `size` bytes.
    ///
    /// An unparsable `Range` header is logged and ignored, the whole blob is
    /// sent instead. Blobs of unknown or zero size are streamed to their end.
    pub fn plan(&self, size: Option<u64>, range_header: Option<&str>) -> TransferPlan {
        let Some(size) = size.filter(|size| *size > 0) else {
            return TransferPlan {
                range: ByteRange::unbounded(),
                partial: false,
                total: None,
            };
        };

        let requested = range_header.and_then(|header| match parse_range(header, size) {
            Ok(range) => Some(range),
            Err(e) => {
                warn!(header = e.header(), "{e}, sending full content");
                None
            }
        });

        match requested {
            Some(range) => TransferPlan { range, partial: true, total: Some(size) },
            None => TransferPlan {
                range: ByteRange::full(size),
                partial: false,
                total: Some(size),
            },
        }
    }

    /// Build status and headers for `plan`.
    pub fn response_head(
        &self,
        blob: &dyn Blob,
        plan: &TransferPlan,
        disposition: &dyn DispositionEncoder,
    ) -> ResponseHead {
        let mut headers = HeaderMap::new();

        let filename = blob
            .filename()
            .filter(|name| !name.is_empty())
            .unwrap_or(FALLBACK_FILENAME);
        let content_disposition = HeaderValue::from_str(&disposition.encode(filename))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
        headers.insert(CONTENT_DISPOSITION, content_disposition);

        let content_type = blob
            .mime_type()
            .and_then(|mime| HeaderValue::from_str(mime).ok())
            .unwrap_or_else(|| HeaderValue::from_static(FALLBACK_MIME_TYPE));
        headers.insert(CONTENT_TYPE, content_type);

        let Some(total) = plan.total else {
            return ResponseHead { status: StatusCode::OK, headers };
        };

        let status = if plan.partial {
            headers.typed_insert(AcceptRanges::bytes());
            // an inclusive range always has an end, so this cannot fail
            if let Ok(content_range) =
                ContentRange::bytes(plan.range.start..=plan.range.end, total)
            {
                headers.typed_insert(content_range);
            }
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        };

        let length = plan.range.len();
        if length <= self.max_content_length {
            headers.typed_insert(ContentLength(length));
        }

        ResponseHead { status, headers }
    }

    /// Send `blob` to `sink`, honouring `range_header` when it is valid.
    ///
    /// The blob stream is dropped before this returns, whatever the outcome.
    pub async fn transfer<S>(
        &self,
        blob: &dyn Blob,
        range_header: Option<&str>,
        disposition: &dyn DispositionEncoder,
        sink: &mut S,
    ) -> TransferOutcome
    where
        S: ResponseSink + ?Sized,
    {
        let plan = self.plan(blob.byte_size(), range_header);

        let mut reader = match blob.stream_from(plan.range.start).await {
            Ok(reader) => reader,
            Err(source) => {
                let err = TransferError::Open { offset: plan.range.start, source };
                error!("{err}");
                return TransferOutcome::Failed(err);
            }
        };

        let head = self.response_head(blob, &plan, disposition);
        sink.disable_buffering();
        if let Err(e) = sink.send_head(head).await {
            return self.sink_failure(plan.range.start, 0, e);
        }

        let outcome = match self.copy_range(&mut reader, plan.range, sink).await {
            Ok(written) => match sink.flush().await {
                Ok(()) => {
                    debug!(
                        start = plan.range.start,
                        bytes = written,
                        partial = plan.partial,
                        "transfer complete"
                    );
                    TransferOutcome::Complete { bytes: written }
                }
                Err(e) => self.sink_failure(plan.range.start + written, written, e),
            },
            Err(CopyError::Sink { offset, written, source }) => {
                self.sink_failure(offset, written, source)
            }
            Err(CopyError::Source { offset, source }) => {
                let err = TransferError::Read { offset, source };
                error!("{err}");
                TransferOutcome::Failed(err)
            }
        };

        drop(reader);
        outcome
    }

    fn sink_failure(&self, offset: u64, written: u64, source: io::Error) -> TransferOutcome {
        if self.classifier.is_peer_closed(&source) {
            debug!(offset, bytes = written, "client disconnected: {source}");
            TransferOutcome::ClientDisconnected { bytes: written }
        } else {
            let err = TransferError::Write { offset, source };
            error!("{err}");
            TransferOutcome::Failed(err)
        }
    }

    /// Copy `range` from a reader already positioned at `range.start`.
    async fn copy_range<S>(
        &self,
        reader: &mut BlobReader,
        range: ByteRange,
        sink: &mut S,
    ) -> Result<u64, CopyError>
    where
        S: ResponseSink + ?Sized,
    {
        let mut offset = range.start;
        let mut written = 0;

        while offset <= range.end {
            // never read past the end of the range
            let remaining = range.end - offset;
            let limit = usize::try_from(remaining)
                .map_or(self.chunk_size, |remaining| remaining.saturating_add(1))
                .min(self.chunk_size);

            let mut buffer = allocate_buffer(self.chunk_size);
            let read = reader
                .read_buf(&mut (&mut buffer).limit(limit))
                .await
                .map_err(|source| CopyError::Source { offset, source })?;
            if read == 0 {
                break;
            }

            sink.write(buffer.freeze())
                .await
                .map_err(|source| CopyError::Sink { offset, written, source })?;
            sink.flush()
                .await
                .map_err(|source| CopyError::Sink { offset, written, source })?;

            offset += read as u64;
            written += read as u64;
        }

        Ok(written)
    }
}

fn allocate_buffer(capacity: usize) -> BytesMut {
    BytesMut::with_capacity(capacity)
}
