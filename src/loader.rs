//! The consumer-facing loader: turns a raw [`ByteSource`] into a plain,
//! seekable stream of decrypted bytes.
//!
//! 面向消费者的加载器：将原始数据源转换为普通的、可定位的解密字节流。

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use tracing::{debug, trace, warn};

use crate::common::config::{LoaderConfig, SeekMode};
use crate::common::{block_index, block_start, HEADER_SIZE};
use crate::error::{Error, Result};
use crate::header::{classify, read_header, Encryption};
use crate::oracle::{DecryptionHandle, DecryptionOracle, NoPlaintextBlocks, PlaintextBlocks};
use crate::session::StreamSession;
use crate::source::ByteSource;

/// The capability set a host player expects from a loader.
///
/// 宿主播放器对加载器要求的能力集合。
#[async_trait]
pub trait Loader: Send {
    /// Opens the stream from offset 0 and classifies its header.
    async fn open(&mut self) -> Result<()>;

    /// Fills `buf` with the next bytes of the logical file.
    ///
    /// `Ok(0)` signals the end of the stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Moves the read position to the absolute file offset `offset`.
    async fn seek(&mut self, offset: u64) -> Result<()>;

    /// Total file size, or 0 when it is unknown or seeking is unavailable.
    ///
    /// This is the raw source length. For an encrypted stream whose payload
    /// ends in a partial block, reading stops at the last whole block, so
    /// fewer bytes than `size()` are delivered.
    fn size(&self) -> u64;

    /// Cancels the source and releases the oracle. The loader cannot be
    /// reused afterwards.
    fn stop(&mut self);
}

/// A [`Loader`] that decrypts a block-encrypted stream on the fly.
///
/// 在读取过程中即时解密分块加密流的加载器。
pub struct DecryptingLoader<S, O: DecryptionOracle> {
    source: S,
    handle: DecryptionHandle<O>,
    plaintext: Box<dyn PlaintextBlocks>,
    config: LoaderConfig,
    session: Option<StreamSession>,
    stopped: bool,
}

impl<S, O> DecryptingLoader<S, O>
where
    S: ByteSource,
    O: DecryptionOracle,
{
    pub fn new(source: S, oracle: O, config: LoaderConfig) -> Self {
        Self {
            source,
            handle: DecryptionHandle::new(oracle),
            plaintext: Box::new(NoPlaintextBlocks),
            config,
            session: None,
            stopped: false,
        }
    }

    /// Sets the predicate for blocks stored in the clear inside an encrypted
    /// stream.
    pub fn with_plaintext_blocks(mut self, predicate: impl PlaintextBlocks + 'static) -> Self {
        self.plaintext = Box::new(predicate);
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// The state of the open stream, if any.
    pub fn session(&self) -> Option<&StreamSession> {
        self.session.as_ref()
    }

    pub fn encryption(&self) -> Encryption {
        self.session
            .as_ref()
            .map_or(Encryption::Unknown, StreamSession::encryption)
    }

    /// Absolute offset of the next raw byte to be taken from the source.
    pub fn position(&self) -> u64 {
        self.session.as_ref().map_or(0, StreamSession::position)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn live_session(&mut self) -> Result<&mut StreamSession> {
        if self.stopped {
            return Err(Error::Stopped);
        }
        self.session.as_mut().ok_or(Error::NotOpen)
    }

    /// Reads and classifies the header of a source positioned at offset 0.
    ///
    /// `session.skip` header bytes are withheld from the consumer.
    async fn load_header(
        source: &mut S,
        handle: &mut DecryptionHandle<O>,
        session: &mut StreamSession,
    ) -> Result<()> {
        let (mut header, spill) = read_header(source).await?;
        let encryption = classify(handle, &header)?;

        let withheld = session.skip.min(HEADER_SIZE as u64) as usize;
        header.advance(withheld);

        session.reset(HEADER_SIZE as u64);
        session.encryption = encryption;
        session.header_remainder = (!header.is_empty()).then_some(header);
        session.pending = (!spill.is_empty()).then_some(spill);
        Ok(())
    }

    /// Returns the next non-empty raw chunk: leftovers first, then the source.
    async fn next_raw(source: &mut S, session: &mut StreamSession) -> Result<Option<Bytes>> {
        if let Some(pending) = session.pending.take() {
            return Ok(Some(pending));
        }
        loop {
            if session.source_done {
                return Ok(None);
            }
            if let Some(size) = source.size() {
                if session.position() >= size {
                    trace!(size, "reached the known end of the source");
                    session.source_done = true;
                    return Ok(None);
                }
            }
            match source.read_chunk().await? {
                Some(chunk) if chunk.is_empty() => continue,
                Some(chunk) => return Ok(Some(chunk)),
                None => {
                    session.source_done = true;
                    return Ok(None);
                }
            }
        }
    }

    /// Restarts the source at `offset` and clears the session.
    async fn restart(&mut self, offset: u64) -> Result<()> {
        self.source.cancel();
        let session = self.session.as_mut().ok_or(Error::NotOpen)?;
        session.reset(offset);
        if let Err(err) = self.source.reopen_at(offset).await {
            session.source_done = true;
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl<S, O> Loader for DecryptingLoader<S, O>
where
    S: ByteSource,
    O: DecryptionOracle,
{
    async fn open(&mut self) -> Result<()> {
        if self.stopped {
            return Err(Error::Stopped);
        }
        self.session = None;
        self.source.reopen_at(0).await?;

        let mut session = StreamSession::new(0, Encryption::Unknown);
        Self::load_header(&mut self.source, &mut self.handle, &mut session).await?;
        debug!(encryption = ?session.encryption(), size = ?self.source.size(), "stream opened");
        self.session = Some(session);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.live_session()?;
        let Self {
            source,
            handle,
            plaintext,
            session,
            ..
        } = self;
        let session = session.as_mut().ok_or(Error::NotOpen)?;

        if buf.is_empty() {
            return Ok(0);
        }

        // A seek into the header re-opened the source; classify again first.
        if session.encryption == Encryption::Unknown {
            Self::load_header(source, handle, session).await?;
        }

        // Header bytes are never mixed with payload in one response.
        if let Some(header) = session.header_remainder.as_mut() {
            let n = header.len().min(buf.len());
            buf[..n].copy_from_slice(&header[..n]);
            header.advance(n);
            if header.is_empty() {
                session.header_remainder = None;
            }
            return Ok(n);
        }

        if let Some(err) = session.failure.as_ref().and_then(Error::replay) {
            return Err(err);
        }

        let mut written = 0;
        loop {
            if session.skip > 0 && !session.ready.is_empty() {
                let n = (session.ready.len() as u64).min(session.skip);
                session.ready.advance(n as usize);
                session.skip -= n;
            }
            if !session.ready.is_empty() {
                let n = session.ready.len().min(buf.len() - written);
                buf[written..written + n].copy_from_slice(&session.ready[..n]);
                session.ready.advance(n);
                written += n;
            }
            if written == buf.len() {
                break;
            }

            let Some(chunk) = Self::next_raw(source, session).await? else {
                break;
            };
            let offset = session.position();
            session.tracker.advance(chunk.len() as u64);
            if !session.encryption.is_encrypted() {
                session.ready = chunk;
                continue;
            }
            match session.align.ingest(&chunk, offset, handle, plaintext.as_ref()) {
                Ok(decrypted) => session.ready = decrypted,
                Err(err) => {
                    // The oracle cursor is unknown now; nothing after this
                    // point can be decrypted in order.
                    warn!(%err, offset, "decryption failed, ending the stream");
                    let end = session.position();
                    session.align.reset_at(end);
                    session.ready = Bytes::new();
                    session.source_done = true;
                    session.failure = err.replay();
                    if written > 0 && session.failure.is_some() {
                        break;
                    }
                    return Err(err);
                }
            }
        }

        if written == 0 && session.source_done && !session.align.is_empty() {
            debug!(
                dropped = session.align.len(),
                offset = session.align.origin(),
                "dropping trailing partial block"
            );
            let end = session.position();
            session.align.reset_at(end);
        }
        trace!(written, position = session.position(), held = session.align.len(), "read");
        Ok(written)
    }

    async fn seek(&mut self, offset: u64) -> Result<()> {
        let mut encryption = self.live_session()?.encryption;
        if self.config.seek_mode() == SeekMode::Streaming {
            warn!(offset, "seek is not honoured in streaming mode");
            return Ok(());
        }

        if offset < HEADER_SIZE as u64 {
            debug!(offset, "seek into the header, re-opening the stream");
            self.restart(0).await?;
            let session = self.live_session()?;
            session.encryption = Encryption::Unknown;
            session.skip = offset;
            return Ok(());
        }

        if encryption == Encryption::Unknown {
            // Block alignment depends on the classification.
            self.restart(0).await?;
            let Self {
                source,
                handle,
                session,
                ..
            } = self;
            let session = session.as_mut().ok_or(Error::NotOpen)?;
            Self::load_header(source, handle, session).await?;
            encryption = session.encryption;
        }

        let restart = if encryption.is_encrypted() {
            let index = block_index(offset);
            self.handle.seek_block(index)?;
            block_start(index)
        } else {
            offset
        };
        debug!(offset, restart, "seeking");
        self.restart(restart).await?;
        self.live_session()?.skip = offset - restart;
        Ok(())
    }

    fn size(&self) -> u64 {
        match self.config.seek_mode() {
            SeekMode::Streaming => 0,
            SeekMode::RangeRestart => self.source.size().unwrap_or(0),
        }
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.source.cancel();
        self.handle.release();
        self.session = None;
        debug!("loader stopped");
    }
}
