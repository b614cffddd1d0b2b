//! Upload sources and byte-length estimation

use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use std::io;
use std::path::PathBuf;
use tokio::io::AsyncRead;

/// Data to upload
///
/// Consumed exactly once, front to back. The engine never seeks or restarts
/// a source.
pub enum UploadSource {
    /// In-memory buffer
    Buffer(Bytes),
    /// UTF-8 text, uploaded as its bytes
    Text(String),
    /// Owned byte array
    Bytes(Vec<u8>),
    /// Stream of byte chunks, with its size when the producer knows it
    Stream {
        stream: BoxStream<'static, io::Result<Bytes>>,
        size: Option<u64>,
    },
    /// Pull-based reader, with its size when known
    Reader {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        size: Option<u64>,
    },
    /// File on the local file system
    File(PathBuf),
}

impl UploadSource {
    pub fn stream(stream: BoxStream<'static, io::Result<Bytes>>) -> Self {
        UploadSource::Stream { stream, size: None }
    }

    pub fn sized_stream(stream: BoxStream<'static, io::Result<Bytes>>, size: u64) -> Self {
        UploadSource::Stream {
            stream,
            size: Some(size),
        }
    }

    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        UploadSource::Reader {
            reader: Box::new(reader),
            size: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        UploadSource::File(path.into())
    }

    /// Byte length when it can be known without reading the data
    ///
    /// Returns `None` for unsized streams and readers, and for files whose
    /// metadata cannot be read. Never consumes any bytes.
    pub fn byte_length(&self) -> Option<u64> {
        match self {
            UploadSource::Buffer(buf) => Some(buf.len() as u64),
            UploadSource::Text(text) => Some(text.len() as u64),
            UploadSource::Bytes(bytes) => Some(bytes.len() as u64),
            UploadSource::Stream { size, .. } | UploadSource::Reader { size, .. } => *size,
            UploadSource::File(path) => match std::fs::metadata(path) {
                Ok(meta) if meta.is_file() => Some(meta.len()),
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Cannot stat upload source");
                    None
                }
            },
        }
    }
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadSource::Buffer(buf) => f.debug_tuple("Buffer").field(&buf.len()).finish(),
            UploadSource::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            UploadSource::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            UploadSource::Stream { size, .. } => {
                f.debug_struct("Stream").field("size", size).finish()
            }
            UploadSource::Reader { size, .. } => {
                f.debug_struct("Reader").field("size", size).finish()
            }
            UploadSource::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

impl From<Bytes> for UploadSource {
    fn from(value: Bytes) -> Self {
        UploadSource::Buffer(value)
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(value: Vec<u8>) -> Self {
        UploadSource::Bytes(value)
    }
}

impl From<String> for UploadSource {
    fn from(value: String) -> Self {
        UploadSource::Text(value)
    }
}

impl From<&str> for UploadSource {
    fn from(value: &str) -> Self {
        UploadSource::Text(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Write;

    #[test]
    fn test_in_memory_lengths() {
        assert_eq!(UploadSource::from(Bytes::from_static(b"abc")).byte_length(), Some(3));
        assert_eq!(UploadSource::from("héllo").byte_length(), Some(6));
        assert_eq!(UploadSource::from(vec![0u8; 42]).byte_length(), Some(42));
    }

    #[test]
    fn test_streams_report_declared_size_only() {
        let chunks = futures::stream::iter(vec![Ok(Bytes::from_static(b"data"))]);
        assert_eq!(UploadSource::stream(chunks.boxed()).byte_length(), None);

        let chunks = futures::stream::iter(vec![Ok(Bytes::from_static(b"data"))]);
        assert_eq!(UploadSource::sized_stream(chunks.boxed(), 4).byte_length(), Some(4));

        let reader = UploadSource::reader(std::io::Cursor::new(vec![1u8, 2, 3]));
        assert_eq!(reader.byte_length(), None);
    }

    #[test]
    fn test_file_length_from_metadata() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 1000]).unwrap();
        file.flush().unwrap();

        assert_eq!(UploadSource::file(file.path()).byte_length(), Some(1000));
    }

    #[test]
    fn test_missing_file_is_unknown() {
        let source = UploadSource::file("/definitely/not/here.bin");
        assert_eq!(source.byte_length(), None);
    }
}
