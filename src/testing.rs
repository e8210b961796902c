//! Test doubles shared by the unit tests, the integration tests and the
//! benches: a keystream oracle that depends on its block cursor, and helpers
//! to build encrypted files for it. Not part of the supported API.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::common::{BLOCK_SIZE, HEADER_SIZE};
use crate::oracle::DecryptionOracle;

pub const MAGIC: &[u8] = b"BLKENC01";

pub fn keystream(block: u64, i: usize) -> u8 {
    (block.wrapping_mul(131).wrapping_add(i as u64 * 7) % 251) as u8 ^ 0x5a
}

pub fn make_header(encrypted: bool) -> Vec<u8> {
    let mut header: Vec<u8> = (0..HEADER_SIZE).map(|i| (i % 97) as u8).collect();
    if encrypted {
        header[..MAGIC.len()].copy_from_slice(MAGIC);
    }
    header
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 13 % 256) as u8).collect()
}

/// Header followed by the payload, encrypted block by block when `encrypted`.
pub fn build_file(plain: &[u8], encrypted: bool) -> Vec<u8> {
    let mut file = make_header(encrypted);
    file.extend(plain.iter().enumerate().map(|(i, b)| {
        if encrypted {
            b ^ keystream((i / BLOCK_SIZE) as u64, i % BLOCK_SIZE)
        } else {
            *b
        }
    }));
    file
}

/// The logical file a consumer should see: header plus the whole-block part
/// of the decrypted payload.
pub fn expected_output(plain: &[u8], encrypted: bool) -> Vec<u8> {
    let mut out = make_header(encrypted);
    let len = if encrypted {
        plain.len() / BLOCK_SIZE * BLOCK_SIZE
    } else {
        plain.len()
    };
    out.extend_from_slice(&plain[..len]);
    out
}

#[derive(Default)]
struct OracleState {
    cursor: u64,
    classifications: usize,
    seeks: Vec<u64>,
    decrypts: Vec<usize>,
    decrypt_calls: usize,
    deinits: usize,
    fail_always: Option<i32>,
    // (call number, code): fails that single call only.
    fail_once: Option<(usize, i32)>,
}

/// XORs each block with a keystream chosen by the oracle's own cursor, so a
/// missing or wrong seek produces wrong output.
#[derive(Clone, Default)]
pub struct KeystreamOracle {
    state: Arc<Mutex<OracleState>>,
}

impl KeystreamOracle {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, OracleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every decrypt call from now on fails with `code`.
    pub fn fail_decrypt_with(&self, code: i32) {
        self.state().fail_always = Some(code);
    }

    /// Only the `nth` decrypt call (1-based) fails with `code`.
    pub fn fail_nth_decrypt(&self, nth: usize, code: i32) {
        self.state().fail_once = Some((nth, code));
    }

    pub fn seeks(&self) -> Vec<u64> {
        self.state().seeks.clone()
    }

    pub fn decrypt_lengths(&self) -> Vec<usize> {
        self.state().decrypts.clone()
    }

    pub fn deinit_count(&self) -> usize {
        self.state().deinits
    }

    pub fn classify_count(&self) -> usize {
        self.state().classifications
    }
}

impl DecryptionOracle for KeystreamOracle {
    fn classify(&mut self, header: &[u8]) -> Result<bool, i32> {
        if header.len() != HEADER_SIZE {
            return Err(-2);
        }
        self.state().classifications += 1;
        Ok(header.starts_with(MAGIC))
    }

    fn seek_block(&mut self, index: u64) {
        let mut state = self.state();
        state.cursor = index;
        state.seeks.push(index);
    }

    fn decrypt_in_place(&mut self, data: &mut [u8]) -> Result<(), i32> {
        let mut state = self.state();
        state.decrypt_calls += 1;
        if let Some(code) = state.fail_always {
            return Err(code);
        }
        if let Some((nth, code)) = state.fail_once {
            if nth == state.decrypt_calls {
                // The engine has consumed the blocks even though it failed.
                state.cursor += (data.len() / BLOCK_SIZE) as u64;
                return Err(code);
            }
        }
        state.decrypts.push(data.len());
        for block in data.chunks_mut(BLOCK_SIZE) {
            let index = state.cursor;
            for (i, b) in block.iter_mut().enumerate() {
                *b ^= keystream(index, i);
            }
            state.cursor += 1;
        }
        Ok(())
    }

    fn deinit(&mut self) {
        self.state().deinits += 1;
    }
}
