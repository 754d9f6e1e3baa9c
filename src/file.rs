use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncSeekExt;

use crate::blob::{Blob, BlobReader};

/// Implements [`Blob`] for a file on disk.
///
/// The size is fixed when the blob is constructed. A file that changes size
/// afterwards is streamed as it is found, the copy loop stops at end of file.
#[derive(Debug, Clone)]
pub struct FileBlob {
    path: PathBuf,
    byte_size: u64,
    filename: Option<String>,
    mime_type: String,
}

impl FileBlob {
    /// Calls [`tokio::fs::metadata`] to determine the file size.
    pub async fn from_path(path: impl Into<PathBuf>) -> io::Result<FileBlob> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(FileBlob::sized(path, metadata.len()))
    }

    /// Construct a [`FileBlob`] with a byte size supplied manually.
    pub fn sized(path: impl Into<PathBuf>, byte_size: u64) -> FileBlob {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        let mime_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_owned();
        FileBlob { path, byte_size, filename, mime_type }
    }

    /// Override the filename derived from the path.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Override the guessed MIME type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Blob for FileBlob {
    fn byte_size(&self) -> Option<u64> {
        Some(self.byte_size)
    }

    fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    fn mime_type(&self) -> Option<&str> {
        Some(&self.mime_type)
    }

    async fn stream(&self) -> io::Result<BlobReader> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(Box::pin(file))
    }

    async fn stream_from(&self, offset: u64) -> io::Result<BlobReader> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        if offset > 0 {
            file.seek(io::SeekFrom::Start(offset)).await?;
        }
        Ok(Box::pin(file))
    }
}
