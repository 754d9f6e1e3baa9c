use std::fmt;
use std::io::{self, Cursor};
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Readable byte stream of a blob, owned by a single transfer.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// A binary object that can be downloaded.
///
/// Implementations hand out a fresh stream for every call to [`Blob::stream`];
/// the transfer engine owns it for the duration of the transfer and drops it
/// on every exit path.
#[async_trait]
pub trait Blob: Send + Sync {
    /// Total size in bytes, `None` when unknown.
    ///
    /// A size of `Some(0)` is treated like an unknown size: no range handling
    /// and no `Content-Length`.
    fn byte_size(&self) -> Option<u64>;

    fn filename(&self) -> Option<&str>;

    fn mime_type(&self) -> Option<&str>;

    /// Open a stream positioned at the first byte.
    async fn stream(&self) -> io::Result<BlobReader>;

    /// Open a stream positioned at `offset`.
    ///
    /// The default reads and discards `offset` bytes. Sources that can seek
    /// should override it. Skipping past the end is not an error, the stream
    /// is simply exhausted.
    async fn stream_from(&self, offset: u64) -> io::Result<BlobReader> {
        let mut reader = self.stream().await?;
        if offset > 0 {
            tokio::io::copy(&mut (&mut reader).take(offset), &mut tokio::io::sink()).await?;
        }
        Ok(reader)
    }
}

/// A [`Blob`] held entirely in memory.
#[derive(Clone)]
pub struct MemoryBlob {
    data: Bytes,
    filename: Option<String>,
    mime_type: Option<String>,
}

impl MemoryBlob {
    pub fn new(data: impl Into<Bytes>) -> Self {
        MemoryBlob {
            data: data.into(),
            filename: None,
            mime_type: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

impl fmt::Debug for MemoryBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBlob")
            .field("byte_size", &self.data.len())
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

#[async_trait]
impl Blob for MemoryBlob {
    fn byte_size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    async fn stream(&self) -> io::Result<BlobReader> {
        Ok(Box::pin(Cursor::new(self.data.clone())))
    }

    async fn stream_from(&self, offset: u64) -> io::Result<BlobReader> {
        let mut cursor = Cursor::new(self.data.clone());
        cursor.set_position(offset);
        Ok(Box::pin(cursor))
    }
}
