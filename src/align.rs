//! Block alignment between arbitrarily sized source chunks and the oracle.
//!
//! Source chunks are appended to a holding buffer. Whenever the buffer holds
//! one or more whole blocks, those blocks are decrypted in a single oracle
//! call and released; the partial tail stays behind together with the
//! absolute file offset of its first byte.
//!
//! A *batch* starts whenever the buffer goes from empty to non-empty. Only the
//! first flush of a batch seeks the oracle; later flushes of the same batch
//! continue from the cursor the oracle advanced on its own.
//!
//! 在任意大小的数据块与解密引擎之间进行块对齐。
//! 只有整块（8KB 的整数倍）会被提交解密，不足一块的尾部数据连同其文件偏移一起保留。

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::common::{block_index, BLOCK_SIZE};
use crate::error::Result;
use crate::oracle::{DecryptionHandle, DecryptionOracle, PlaintextBlocks};

/// Holds less than one block of undecrypted bytes between flushes.
#[derive(Debug, Default)]
pub struct AlignmentBuffer {
    held: BytesMut,
    origin: u64,
    // Set when a batch starts; the oracle cursor is unknown until its first flush.
    unseeked: bool,
}

impl AlignmentBuffer {
    /// Creates an empty buffer whose next batch starts at `origin`.
    pub fn new(origin: u64) -> Self {
        Self {
            held: BytesMut::with_capacity(BLOCK_SIZE * 2),
            origin,
            unseeked: true,
        }
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Absolute file offset of the first held byte.
    pub fn origin(&self) -> u64 {
        self.origin
    }

    /// Absolute file offset one past the last held byte.
    pub fn end(&self) -> u64 {
        self.origin + self.held.len() as u64
    }

    /// Drops every held byte; the next batch starts at `origin`.
    pub fn reset_at(&mut self, origin: u64) {
        self.held.clear();
        self.origin = origin;
        self.unseeked = true;
    }

    /// Appends `chunk`, which begins at absolute file offset `offset`, and
    /// returns the decrypted bytes of every block completed by it.
    ///
    /// The returned bytes are always a whole number of blocks; the remainder
    /// stays held. A continuing batch must be contiguous with the held bytes.
    ///
    /// 追加从绝对偏移 `offset` 开始的数据块，并返回由此凑齐的所有整块的解密结果。
    pub fn ingest<O: DecryptionOracle>(
        &mut self,
        chunk: &[u8],
        offset: u64,
        handle: &mut DecryptionHandle<O>,
        plaintext: &dyn PlaintextBlocks,
    ) -> Result<Bytes> {
        if self.held.is_empty() {
            self.origin = offset;
            self.unseeked = true;
        } else {
            debug_assert_eq!(self.end(), offset, "continuing batch must be contiguous");
        }
        let base = self.origin;

        self.held.extend_from_slice(chunk);
        let aligned = self.held.len() / BLOCK_SIZE * BLOCK_SIZE;
        if aligned == 0 {
            trace!(held = self.held.len(), origin = base, "waiting for a whole block");
            return Ok(Bytes::new());
        }

        let mut out = self.held.split_to(aligned);
        self.origin = base + aligned as u64;
        trace!(
            offset = base,
            blocks = aligned / BLOCK_SIZE,
            held = self.held.len(),
            new_batch = self.unseeked,
            "flushing aligned blocks"
        );

        decrypt_aligned(&mut out, base, self.unseeked, handle, plaintext)?;
        self.unseeked = false;
        Ok(out.freeze())
    }
}

/// Decrypts a block-aligned run starting at absolute offset `base`.
///
/// Consecutive encrypted blocks go to the oracle in one call. Plaintext blocks
/// are left untouched and the oracle cursor is moved past them explicitly.
fn decrypt_aligned<O: DecryptionOracle>(
    data: &mut [u8],
    base: u64,
    new_batch: bool,
    handle: &mut DecryptionHandle<O>,
    plaintext: &dyn PlaintextBlocks,
) -> Result<()> {
    let first = block_index(base);
    let blocks = data.len() / BLOCK_SIZE;
    let is_plain = |data: &[u8], i: usize| {
        plaintext.is_plaintext(first + i as u64, &data[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE])
    };

    // The oracle cursor already points at `first` only when this flush
    // continues an earlier flush of the same batch.
    let mut cursor_valid = !new_batch;
    let mut i = 0;
    while i < blocks {
        let run_plain = is_plain(data, i);
        let mut j = i + 1;
        while j < blocks && is_plain(data, j) == run_plain {
            j += 1;
        }

        if run_plain {
            handle.seek_block(first + j as u64)?;
            cursor_valid = true;
            trace!(from = first + i as u64, to = first + j as u64, "skipping plaintext blocks");
        } else {
            if !cursor_valid {
                handle.seek_block(first + i as u64)?;
                cursor_valid = true;
            }
            handle.decrypt(&mut data[i * BLOCK_SIZE..j * BLOCK_SIZE])?;
        }
        i = j;
    }
    Ok(())
}
