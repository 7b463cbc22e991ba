//! Byte-range sources for part uploads
//!
//! Each part task opens its own bounded view of the source, so tasks never
//! share a reader or a file cursor.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Read buffer size for file-backed bodies (256 KiB)
const READ_CHUNK_SIZE: usize = 256 * 1024;

/// Body of a single part or object, with a known length
pub struct PartBody {
    length: u64,
    stream: BoxStream<'static, io::Result<Bytes>>,
}

impl PartBody {
    /// Body backed by an in-memory buffer
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            length: data.len() as u64,
            stream: stream::once(async move { Ok(data) }).boxed(),
        }
    }

    /// Body backed by a stream that yields exactly `length` bytes
    pub fn from_stream(length: u64, stream: BoxStream<'static, io::Result<Bytes>>) -> Self {
        Self { length, stream }
    }

    /// Declared length in bytes
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Consume the body as a stream of chunks
    pub fn into_stream(self) -> BoxStream<'static, io::Result<Bytes>> {
        self.stream
    }

    /// Buffer the whole body, checking it matches the declared length
    pub async fn collect(self) -> io::Result<Bytes> {
        let expected = self.length;
        let mut buf = BytesMut::with_capacity(expected as usize);
        let mut stream = self.stream;
        while let Some(chunk) = stream.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        if buf.len() as u64 != expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("body yielded {} of {} bytes", buf.len(), expected),
            ));
        }
        Ok(buf.freeze())
    }
}

/// A read-only source that can hand out independent byte ranges
#[async_trait]
pub trait PartSource: Send + Sync {
    /// Total size in bytes
    fn size(&self) -> u64;

    /// Open a view restricted to `[offset, offset + length)`
    async fn open_range(&self, offset: u64, length: u64) -> io::Result<PartBody>;
}

fn check_range(size: u64, offset: u64, length: u64) -> io::Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "range {}+{} is outside a source of {} bytes",
                offset, length, size
            ),
        )),
    }
}

#[async_trait]
impl PartSource for Bytes {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    async fn open_range(&self, offset: u64, length: u64) -> io::Result<PartBody> {
        check_range(self.len() as u64, offset, length)?;
        let start = offset as usize;
        Ok(PartBody::from_bytes(self.slice(start..start + length as usize)))
    }
}

/// A file on local disk
#[derive(Clone, Debug)]
pub struct FileSource {
    path: PathBuf,
    size: u64,
}

impl FileSource {
    /// Open a file source, capturing its size
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(Self {
            path,
            size: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole file as one body
    pub async fn open_all(&self) -> io::Result<PartBody> {
        self.open_range(0, self.size).await
    }
}

#[async_trait]
impl PartSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn open_range(&self, offset: u64, length: u64) -> io::Result<PartBody> {
        check_range(self.size, offset, length)?;
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(io::SeekFrom::Start(offset)).await?;
        let reader = file.take(length);

        let stream = stream::try_unfold((reader, 0u64), move |(mut reader, read)| async move {
            if read == length {
                return Ok(None);
            }
            let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
            let n = reader.read_buf(&mut buf).await?;
            if n == 0 {
                // File shrank after it was opened.
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended after {} of {} bytes", read, length),
                ));
            }
            Ok(Some((buf.freeze(), (reader, read + n as u64))))
        });

        Ok(PartBody::from_stream(length, stream.boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_bytes_range() {
        let source = Bytes::from_static(b"0123456789");
        let body = source.open_range(3, 4).await.unwrap();
        assert_eq!(body.len(), 4);
        assert_eq!(body.collect().await.unwrap(), Bytes::from_static(b"3456"));
        assert!(source.open_range(8, 3).await.is_err());
    }

    #[tokio::test]
    async fn test_file_range_is_bounded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let source = FileSource::open(file.path()).await.unwrap();
        assert_eq!(source.size(), data.len() as u64);

        let body = source.open_range(300_000, 600_000).await.unwrap();
        let read = body.collect().await.unwrap();
        assert_eq!(&read[..], &data[300_000..900_000]);

        assert!(source.open_range(999_999, 2).await.is_err());
    }

    #[tokio::test]
    async fn test_directory_is_not_a_source() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileSource::open(dir.path()).await.is_err());
    }
}
