//! Predicates for blocks that are stored unencrypted inside an encrypted stream.
//!
//! Some formats leave certain blocks (for example the first payload block,
//! carrying the container's program tables) in the clear. Such blocks must not
//! be passed through the oracle, but the oracle's block cursor still has to
//! move past them.
//!
//! 用于识别加密流中以明文存储的块的判定器。

/// Decides whether a raw, still undecrypted block is already plaintext.
pub trait PlaintextBlocks: Send + Sync {
    fn is_plaintext(&self, index: u64, block: &[u8]) -> bool;
}

/// Every block of an encrypted stream is encrypted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPlaintextBlocks;

impl PlaintextBlocks for NoPlaintextBlocks {
    fn is_plaintext(&self, _index: u64, _block: &[u8]) -> bool {
        false
    }
}

/// Treats a block as plaintext when its first byte is the container's
/// synchronization marker.
#[derive(Debug, Clone, Copy)]
pub struct SyncBytePlaintext {
    marker: u8,
}

impl SyncBytePlaintext {
    /// MPEG transport stream packet sync byte.
    pub const MPEG_TS: u8 = 0x47;

    pub fn new(marker: u8) -> Self {
        Self { marker }
    }
}

impl Default for SyncBytePlaintext {
    fn default() -> Self {
        Self::new(Self::MPEG_TS)
    }
}

impl PlaintextBlocks for SyncBytePlaintext {
    fn is_plaintext(&self, _index: u64, block: &[u8]) -> bool {
        block.first() == Some(&self.marker)
    }
}

impl<F> PlaintextBlocks for F
where
    F: Fn(u64, &[u8]) -> bool + Send + Sync,
{
    fn is_plaintext(&self, index: u64, block: &[u8]) -> bool {
        self(index, block)
    }
}
