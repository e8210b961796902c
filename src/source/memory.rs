use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use super::ByteSource;
use crate::error::{Error, Result};

/// Replays an in-memory file through a repeating chunk plan.
///
/// The plan lists chunk sizes that are cycled until the data runs out, which
/// makes network-style fragmentation reproducible. An empty plan delivers the
/// rest of the file in one chunk.
///
/// 按可循环的分块计划回放内存中的文件，用于复现网络式的分片。
pub struct MemorySource {
    data: Bytes,
    plan: Vec<usize>,
    step: usize,
    cursor: usize,
    cancelled: bool,
    ranges: bool,
    report_size: bool,
    reopens: Arc<Mutex<Vec<u64>>>,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            plan: Vec::new(),
            step: 0,
            cursor: 0,
            cancelled: false,
            ranges: true,
            report_size: true,
            reopens: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Cycles through `plan` for chunk sizes. Zero entries yield empty chunks.
    pub fn with_chunk_plan(mut self, plan: impl Into<Vec<usize>>) -> Self {
        self.plan = plan.into();
        self
    }

    /// Rejects every reopen at a non-zero offset, like a server without range
    /// support.
    pub fn without_ranges(mut self) -> Self {
        self.ranges = false;
        self
    }

    /// Hides the total length, like a response without `Content-Length`.
    pub fn without_size(mut self) -> Self {
        self.report_size = false;
        self
    }

    /// Shared log of every offset this source was reopened at.
    pub fn reopen_log(&self) -> Arc<Mutex<Vec<u64>>> {
        Arc::clone(&self.reopens)
    }

    fn next_len(&mut self) -> usize {
        let remaining = self.data.len() - self.cursor;
        if self.plan.is_empty() {
            return remaining;
        }
        let len = self.plan[self.step % self.plan.len()];
        self.step += 1;
        len.min(remaining)
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.cancelled || self.cursor >= self.data.len() {
            return Ok(None);
        }
        let len = self.next_len();
        let chunk = self.data.slice(self.cursor..self.cursor + len);
        self.cursor += len;
        Ok(Some(chunk))
    }

    async fn reopen_at(&mut self, offset: u64) -> Result<()> {
        if let Ok(mut log) = self.reopens.lock() {
            log.push(offset);
        }
        if offset > 0 && !self.ranges {
            return Err(Error::SeekFailed {
                offset,
                reason: "source does not support range requests".into(),
            });
        }
        if offset > self.data.len() as u64 {
            return Err(Error::SeekFailed {
                offset,
                reason: format!("offset is past the end ({} bytes)", self.data.len()),
            });
        }
        self.cursor = offset as usize;
        self.cancelled = false;
        Ok(())
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }

    fn size(&self) -> Option<u64> {
        self.report_size.then_some(self.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(source: &mut MemorySource) -> Vec<usize> {
        let mut sizes = Vec::new();
        while let Some(chunk) = source.read_chunk().await.unwrap() {
            sizes.push(chunk.len());
        }
        sizes
    }

    #[tokio::test]
    async fn test_chunk_plan_cycles() {
        let mut source = MemorySource::new(vec![0u8; 10]).with_chunk_plan([3, 1]);
        assert_eq!(drain(&mut source).await, vec![3, 1, 3, 1, 2]);
    }

    #[tokio::test]
    async fn test_cancel_until_reopen() {
        let mut source = MemorySource::new(vec![7u8; 10]).with_chunk_plan([4]);
        source.read_chunk().await.unwrap();
        source.cancel();
        assert!(source.read_chunk().await.unwrap().is_none());

        source.reopen_at(8).await.unwrap();
        assert_eq!(drain(&mut source).await, vec![2]);
        assert_eq!(*source.reopen_log().lock().unwrap(), vec![8]);
    }

    #[tokio::test]
    async fn test_range_refusal() {
        let mut source = MemorySource::new(vec![0u8; 10]).without_ranges();
        assert!(source.reopen_at(0).await.is_ok());
        let err = source.reopen_at(4).await.unwrap_err();
        assert!(matches!(err, Error::SeekFailed { offset: 4, .. }));
    }

    #[tokio::test]
    async fn test_reopen_past_end_fails() {
        let mut source = MemorySource::new(vec![0u8; 10]);
        assert!(source.reopen_at(10).await.is_ok());
        assert!(source.reopen_at(11).await.is_err());
        assert_eq!(source.size(), Some(10));
        assert_eq!(MemorySource::new(vec![0u8; 3]).without_size().size(), None);
    }
}
