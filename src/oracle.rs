//! The decryption engine contract and the handle that owns it.
//!
//! The engine itself is opaque: it classifies a header, decrypts whole blocks
//! in place and keeps an internal block cursor that advances by one for every
//! block it decrypts. The loader must seek that cursor before any decrypt that
//! does not directly continue the previous one.
//!
//! 解密引擎契约及其所有权句柄。引擎内部维护块游标，
//! 每解密一个块游标加一；非连续解密前必须先 seek。

pub mod plaintext;

use crate::common::BLOCK_SIZE;
use crate::error::{Error, OracleOp, Result};

pub use plaintext::{NoPlaintextBlocks, PlaintextBlocks, SyncBytePlaintext};

/// An opaque, stateful block decryption engine.
///
/// Construction of the implementing type plays the role of the engine's
/// `init`; a failed init never produces a value, so there is no "null handle".
///
/// 不透明、有状态的块解密引擎。实现类型的构造即引擎的 `init`。
pub trait DecryptionOracle: Send {
    /// Inspects the fixed-size header and reports whether the stream is encrypted.
    ///
    /// `Err` carries the engine's failure code.
    fn classify(&mut self, header: &[u8]) -> std::result::Result<bool, i32>;

    /// Moves the internal block cursor to `index`.
    fn seek_block(&mut self, index: u64);

    /// Decrypts `data` in place. `data.len()` is always a multiple of
    /// [`BLOCK_SIZE`]; the cursor advances by `data.len() / BLOCK_SIZE`.
    fn decrypt_in_place(&mut self, data: &mut [u8]) -> std::result::Result<(), i32>;

    /// Releases engine resources. Called exactly once.
    fn deinit(&mut self) {}
}

impl<T: DecryptionOracle + ?Sized> DecryptionOracle for Box<T> {
    fn classify(&mut self, header: &[u8]) -> std::result::Result<bool, i32> {
        (**self).classify(header)
    }

    fn seek_block(&mut self, index: u64) {
        (**self).seek_block(index)
    }

    fn decrypt_in_place(&mut self, data: &mut [u8]) -> std::result::Result<(), i32> {
        (**self).decrypt_in_place(data)
    }

    fn deinit(&mut self) {
        (**self).deinit()
    }
}

/// Exclusive ownership of one oracle session.
///
/// The oracle is released exactly once, either by [`release`](Self::release)
/// or on drop. Every call after release fails with [`Error::Stopped`] and never
/// reaches the oracle.
///
/// 解密引擎会话的独占所有权。引擎只会被释放一次。
pub struct DecryptionHandle<O: DecryptionOracle> {
    oracle: Option<O>,
}

impl<O: DecryptionOracle> DecryptionHandle<O> {
    pub fn new(oracle: O) -> Self {
        Self {
            oracle: Some(oracle),
        }
    }

    pub fn is_live(&self) -> bool {
        self.oracle.is_some()
    }

    fn live(&mut self) -> Result<&mut O> {
        self.oracle.as_mut().ok_or(Error::Stopped)
    }

    pub fn classify(&mut self, header: &[u8]) -> Result<bool> {
        self.live()?
            .classify(header)
            .map_err(|code| Error::Oracle {
                op: OracleOp::Classify,
                code,
            })
    }

    pub fn seek_block(&mut self, index: u64) -> Result<()> {
        self.live()?.seek_block(index);
        Ok(())
    }

    /// Decrypts a block-aligned buffer in one oracle call.
    pub fn decrypt(&mut self, data: &mut [u8]) -> Result<()> {
        if data.len() % BLOCK_SIZE != 0 {
            return Err(Error::MisalignedBlock { len: data.len() });
        }
        if data.is_empty() {
            return Ok(());
        }
        self.live()?
            .decrypt_in_place(data)
            .map_err(|code| Error::Oracle {
                op: OracleOp::Decrypt,
                code,
            })
    }

    /// Deinitializes the oracle. Returns `false` if it was already released.
    pub fn release(&mut self) -> bool {
        match self.oracle.take() {
            Some(mut oracle) => {
                oracle.deinit();
                true
            }
            None => false,
        }
    }
}

impl<O: DecryptionOracle> Drop for DecryptionHandle<O> {
    fn drop(&mut self) {
        self.release();
    }
}
