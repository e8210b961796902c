//! Raw byte sources feeding the loader.
//!
//! A source yields arbitrarily sized chunks of the encrypted file in order and
//! can be cancelled and reopened at an absolute byte offset.
//!
//! 为加载器提供原始字节的数据源。数据源按顺序产出任意大小的数据块，
//! 并支持取消以及在绝对偏移处重新打开。

pub mod memory;
pub mod reader;

#[cfg(feature = "http")]
pub mod http;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub use memory::MemorySource;
pub use reader::ReaderSource;

#[cfg(feature = "http")]
pub use http::HttpSource;

/// A lazy, finite sequence of raw byte chunks.
///
/// 惰性、有限的原始字节块序列。
#[async_trait]
pub trait ByteSource: Send {
    /// Returns the next chunk, or `None` once the source is exhausted.
    ///
    /// Chunks may be empty. A cancelled source returns `None` until it is
    /// reopened.
    ///
    /// 返回下一个数据块；数据源耗尽时返回 `None`。
    async fn read_chunk(&mut self) -> Result<Option<Bytes>>;

    /// Drops any in-flight transfer and restarts delivery at `offset`.
    ///
    /// Fails with [`Error::SeekFailed`](crate::Error::SeekFailed) when the
    /// transport cannot start at that offset.
    ///
    /// 丢弃正在进行的传输并从 `offset` 处重新开始。
    async fn reopen_at(&mut self, offset: u64) -> Result<()>;

    /// Abandons the in-flight transfer.
    fn cancel(&mut self);

    /// Total length of the underlying file, when known.
    fn size(&self) -> Option<u64>;
}

#[async_trait]
impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        (**self).read_chunk().await
    }

    async fn reopen_at(&mut self, offset: u64) -> Result<()> {
        (**self).reopen_at(offset).await
    }

    fn cancel(&mut self) {
        (**self).cancel()
    }

    fn size(&self) -> Option<u64> {
        (**self).size()
    }
}
