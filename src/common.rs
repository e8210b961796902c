//! Constants and offset arithmetic shared by every stage of the loader.
//!
//! 加载器各阶段共享的常量与偏移量计算。

pub(crate) mod buffer;
pub mod config;
pub mod position;

/// Size of the plaintext header at the start of every stream.
pub const HEADER_SIZE: usize = 512;

/// Size of one decryption block. The oracle only accepts multiples of it.
pub const BLOCK_SIZE: usize = 8192;

pub const DEFAULT_QUEUE_CAPACITY: usize = 20 * 1024 * 1024;

pub const DEFAULT_READ_SIZE: usize = 64 * 1024;

/// Returns the index of the block containing the absolute file `offset`.
///
/// Offsets inside the header map to block 0.
///
/// 返回包含绝对文件偏移 `offset` 的块索引。
pub fn block_index(offset: u64) -> u64 {
    offset.saturating_sub(HEADER_SIZE as u64) / BLOCK_SIZE as u64
}

/// Returns the absolute file offset at which block `index` begins.
///
/// 返回块 `index` 在文件中的起始偏移。
pub fn block_start(index: u64) -> u64 {
    HEADER_SIZE as u64 + index * BLOCK_SIZE as u64
}
