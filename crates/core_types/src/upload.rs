use std::fmt;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::{KbError, KbResult};

pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

type BoxedReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// File contents handed to an adapter for upload.
///
/// The name and length come from the source handle; bytes are only pulled when the
/// outbound request body is polled.
pub struct UploadSource {
    file_name: String,
    content_length: u64,
    reader: BoxedReader,
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSource")
            .field("file_name", &self.file_name)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl UploadSource {
    pub fn new(
        file_name: impl Into<String>,
        content_length: u64,
        reader: impl AsyncRead + Send + Sync + Unpin + 'static,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_length,
            reader: Box::new(reader),
        }
    }

    pub async fn from_path(path: &Path) -> KbResult<Self> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                KbError::InvalidArgument(format!("`{}` has no usable file name", path.display()))
            })?
            .to_string();
        let file = tokio::fs::File::open(path).await.map_err(|err| {
            KbError::InvalidArgument(format!("cannot open `{}`: {err}", path.display()))
        })?;
        let metadata = file.metadata().await.map_err(|err| {
            KbError::InvalidArgument(format!("cannot stat `{}`: {err}", path.display()))
        })?;

        Ok(Self::new(file_name, metadata.len(), file))
    }

    pub fn from_bytes(file_name: impl Into<String>, bytes: Bytes) -> Self {
        let content_length = bytes.len() as u64;
        Self::new(file_name, content_length, io::Cursor::new(bytes))
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn into_stream(self, chunk_size: usize) -> ChunkedReader {
        ChunkedReader {
            reader: self.reader,
            buffer: vec![0; chunk_size.max(1)],
            finished: false,
        }
    }
}

/// Yields the reader's bytes in pieces no larger than the buffer.
pub struct ChunkedReader {
    reader: BoxedReader,
    buffer: Vec<u8>,
    finished: bool,
}

impl Stream for ChunkedReader {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        let mut read_buf = ReadBuf::new(&mut this.buffer);
        match Pin::new(&mut this.reader).poll_read(cx, &mut read_buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(err)) => {
                this.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Ok(())) => {
                let filled = read_buf.filled();
                if filled.is_empty() {
                    this.finished = true;
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Ok(Bytes::copy_from_slice(filled))))
                }
            }
        }
    }
}
