use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use super::ByteSource;
use crate::common::DEFAULT_READ_SIZE;
use crate::error::{Error, Result};

/// Adapts any seekable async reader, such as a local file, into a source.
///
/// 将任意可定位的异步读取器（例如本地文件）适配为数据源。
pub struct ReaderSource<R> {
    reader: R,
    buffer: BytesMut,
    chunk_size: usize,
    size: Option<u64>,
    cancelled: bool,
}

impl<R> ReaderSource<R>
where
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    pub fn new(reader: R, size: Option<u64>) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(DEFAULT_READ_SIZE),
            chunk_size: DEFAULT_READ_SIZE,
            size,
            cancelled: false,
        }
    }

    /// Sets the maximum number of bytes returned per chunk.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

impl ReaderSource<File> {
    /// Opens a local file; its length becomes the source size.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path).await?;
        let len = file.metadata().await?.len();
        Ok(Self::new(file, Some(len)))
    }
}

#[async_trait]
impl<R> ByteSource for ReaderSource<R>
where
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.cancelled {
            return Ok(None);
        }
        self.buffer.reserve(self.chunk_size);
        let n = (&mut self.reader)
            .take(self.chunk_size as u64)
            .read_buf(&mut self.buffer)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buffer.split().freeze()))
    }

    async fn reopen_at(&mut self, offset: u64) -> Result<()> {
        if let Some(size) = self.size.filter(|size| offset > *size) {
            return Err(Error::SeekFailed {
                offset,
                reason: format!("offset is past the end ({size} bytes)"),
            });
        }
        self.reader
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::SeekFailed {
                offset,
                reason: e.to_string(),
            })?;
        self.buffer.clear();
        self.cancelled = false;
        Ok(())
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }

    fn size(&self) -> Option<u64> {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_reads_in_bounded_chunks() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut source = ReaderSource::new(Cursor::new(data.clone()), Some(100)).with_chunk_size(30);

        let mut out = Vec::new();
        let mut sizes = Vec::new();
        while let Some(chunk) = source.read_chunk().await.unwrap() {
            sizes.push(chunk.len());
            out.extend_from_slice(&chunk);
        }
        assert_eq!(out, data);
        assert!(sizes.iter().all(|n| *n <= 30));
    }

    #[tokio::test]
    async fn test_reopen_seeks_reader() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut source = ReaderSource::new(Cursor::new(data), Some(100));
        source.cancel();
        assert!(source.read_chunk().await.unwrap().is_none());

        source.reopen_at(90).await.unwrap();
        let chunk = source.read_chunk().await.unwrap().unwrap();
        assert_eq!(&chunk[..], &(90..100u8).collect::<Vec<_>>()[..]);
        assert!(source.reopen_at(101).await.is_err());
    }
}
