//! Push-mode decryption for transports that deliver `(offset, bytes)` pairs
//! on their own schedule.
//!
//! Runs the same alignment logic as [`DecryptingLoader`](crate::DecryptingLoader)
//! synchronously. A push whose offset does not continue the previous one is
//! taken as a transport-level seek and starts a new batch.
//!
//! 推送模式解密：适用于按自身节奏投递 `(偏移, 数据)` 的传输层。
//! 偏移不连续的推送被视为传输层 seek，并开始新的批次。

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::align::AlignmentBuffer;
use crate::common::HEADER_SIZE;
use crate::error::{Error, Result};
use crate::header::{classify, Encryption};
use crate::oracle::{DecryptionHandle, DecryptionOracle, NoPlaintextBlocks, PlaintextBlocks};

pub struct OffsetFeeder<O: DecryptionOracle> {
    handle: DecryptionHandle<O>,
    plaintext: Box<dyn PlaintextBlocks>,
    align: AlignmentBuffer,
    encryption: Encryption,
    expected_offset: Option<u64>,
    size: Option<u64>,
    eof: bool,
    // Oracle failure; cleared by the next discontinuous push or a new header.
    failure: Option<Error>,
}

impl<O: DecryptionOracle> OffsetFeeder<O> {
    pub fn new(oracle: O) -> Self {
        Self {
            handle: DecryptionHandle::new(oracle),
            plaintext: Box::new(NoPlaintextBlocks),
            align: AlignmentBuffer::new(HEADER_SIZE as u64),
            encryption: Encryption::Unknown,
            expected_offset: None,
            size: None,
            eof: false,
            failure: None,
        }
    }

    pub fn with_plaintext_blocks(mut self, predicate: impl PlaintextBlocks + 'static) -> Self {
        self.plaintext = Box::new(predicate);
        self
    }

    /// Sets the total file size used by [`is_eof`](Self::is_eof).
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn encryption(&self) -> Encryption {
        self.encryption
    }

    /// Whether the last push reached the known end of the file.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Undecrypted bytes waiting for the rest of their block.
    pub fn buffered(&self) -> usize {
        self.align.len()
    }

    /// Classifies the stream from the bytes at offset 0 and returns them.
    ///
    /// The first [`HEADER_SIZE`] bytes come back verbatim; anything after them
    /// is treated as a payload push at offset [`HEADER_SIZE`].
    pub fn push_header(&mut self, data: Bytes) -> Result<Bytes> {
        if data.len() < HEADER_SIZE {
            return Err(Error::ShortHeader { read: data.len() });
        }
        let header = data.slice(..HEADER_SIZE);
        self.encryption = classify(&mut self.handle, &header)?;
        self.align.reset_at(HEADER_SIZE as u64);
        self.expected_offset = Some(HEADER_SIZE as u64);
        self.failure = None;

        if data.len() == HEADER_SIZE {
            self.eof = self.size.is_some_and(|size| HEADER_SIZE as u64 >= size);
            return Ok(header);
        }
        let payload = self.push(HEADER_SIZE as u64, &data[HEADER_SIZE..])?;
        let mut out = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&payload);
        Ok(out.freeze())
    }

    /// Feeds payload bytes starting at absolute file `offset` and returns
    /// whatever became decryptable.
    pub fn push(&mut self, offset: u64, data: &[u8]) -> Result<Bytes> {
        if !self.handle.is_live() {
            return Err(Error::Stopped);
        }
        if self.encryption == Encryption::Unknown {
            return Err(Error::NotOpen);
        }

        if self.expected_offset != Some(offset) {
            debug!(
                expected = ?self.expected_offset,
                offset,
                dropped = self.align.len(),
                "offset discontinuity, starting a new batch"
            );
            self.align.reset_at(offset);
            self.failure = None;
        } else if let Some(err) = self.failure.as_ref().and_then(Error::replay) {
            return Err(err);
        }
        let end = offset + data.len() as u64;
        self.expected_offset = Some(end);
        self.eof = self.size.is_some_and(|size| end >= size);

        if !self.encryption.is_encrypted() {
            return Ok(Bytes::copy_from_slice(data));
        }
        let result = self
            .align
            .ingest(data, offset, &mut self.handle, self.plaintext.as_ref());
        if let Err(err) = &result {
            debug!(%err, offset, "decryption failed, waiting for a seek");
            self.align.reset_at(end);
            self.failure = err.replay();
        }
        result
    }

    /// Releases the oracle. Later pushes fail with [`Error::Stopped`].
    pub fn stop(&mut self) {
        if self.handle.release() {
            debug!("feeder stopped");
        }
    }
}
