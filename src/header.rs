//! The header stage: collects the fixed-size plaintext header that opens every
//! stream and asks the oracle whether the rest is encrypted.
//!
//! 头部阶段：收集每个流开头固定大小的明文头部，并交由解密引擎判断后续数据是否加密。

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::common::HEADER_SIZE;
use crate::error::{Error, Result};
use crate::oracle::{DecryptionHandle, DecryptionOracle};
use crate::source::ByteSource;

/// Classification of a stream, fixed until the next full re-open.
///
/// 流的加密分类，在下一次完整重新打开前保持不变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encryption {
    #[default]
    Unknown,
    Encrypted,
    Plaintext,
}

impl Encryption {
    pub fn is_encrypted(self) -> bool {
        self == Encryption::Encrypted
    }
}

/// Accumulates chunks until exactly [`HEADER_SIZE`] bytes are available.
#[derive(Debug, Default)]
pub struct HeaderAssembler {
    header: BytesMut,
}

impl HeaderAssembler {
    pub fn new() -> Self {
        Self {
            header: BytesMut::with_capacity(HEADER_SIZE),
        }
    }

    pub fn len(&self) -> usize {
        self.header.len()
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.header.len() == HEADER_SIZE
    }

    /// Takes what the header still needs from `chunk` and returns the rest.
    pub fn feed(&mut self, mut chunk: Bytes) -> Bytes {
        let need = HEADER_SIZE - self.header.len();
        let take = need.min(chunk.len());
        self.header.extend_from_slice(&chunk.split_to(take));
        chunk
    }

    /// Returns the complete header, or `ShortHeader` if it is incomplete.
    pub fn finish(self) -> Result<Bytes> {
        if !self.is_complete() {
            return Err(Error::ShortHeader {
                read: self.header.len(),
            });
        }
        Ok(self.header.freeze())
    }
}

/// Reads the header from a freshly (re)opened source.
///
/// Returns the header and the bytes of the last chunk that belong past it.
///
/// 从新打开的数据源中读取头部，返回头部以及越过头部的剩余字节。
pub async fn read_header<S: ByteSource + ?Sized>(source: &mut S) -> Result<(Bytes, Bytes)> {
    let mut assembler = HeaderAssembler::new();
    let mut spill = Bytes::new();
    while !assembler.is_complete() {
        match source.read_chunk().await? {
            Some(chunk) => spill = assembler.feed(chunk),
            None => break,
        }
    }
    let header = assembler.finish()?;
    Ok((header, spill))
}

/// Submits the header to the oracle.
pub fn classify<O: DecryptionOracle>(
    handle: &mut DecryptionHandle<O>,
    header: &[u8],
) -> Result<Encryption> {
    let encryption = if handle.classify(header)? {
        Encryption::Encrypted
    } else {
        Encryption::Plaintext
    };
    debug!(?encryption, "classified stream header");
    Ok(encryption)
}
