use bytes::Bytes;

use crate::align::AlignmentBuffer;
use crate::common::position::PositionTracker;
use crate::error::Error;
use crate::header::Encryption;

/// Per-stream state owned by an open loader.
///
/// Everything here is discarded by a seek or a stop; only the classification
/// survives a seek that stays past the header.
///
/// 打开的加载器所拥有的单个流的状态。
#[derive(Debug, Default)]
pub struct StreamSession {
    pub(crate) tracker: PositionTracker,
    pub(crate) encryption: Encryption,
    /// Raw header bytes not yet handed to the consumer.
    pub(crate) header_remainder: Option<Bytes>,
    /// Bytes read from the source but not yet consumed.
    pub(crate) pending: Option<Bytes>,
    pub(crate) align: AlignmentBuffer,
    /// Decrypted bytes that did not fit into the caller's buffer.
    pub(crate) ready: Bytes,
    /// Decrypted bytes still to be discarded after an unaligned seek.
    pub(crate) skip: u64,
    pub(crate) source_done: bool,
    /// Set by an oracle failure; reads keep failing until a seek or re-open.
    pub(crate) failure: Option<Error>,
}

impl StreamSession {
    pub(crate) fn new(position: u64, encryption: Encryption) -> Self {
        Self {
            tracker: PositionTracker::new(position),
            encryption,
            align: AlignmentBuffer::new(position),
            ..Default::default()
        }
    }

    /// Repositions the raw cursor and drops every buffered byte.
    pub(crate) fn reset(&mut self, to: u64) {
        self.tracker.reset(to);
        self.header_remainder = None;
        self.pending = None;
        self.align.reset_at(to);
        self.ready = Bytes::new();
        self.skip = 0;
        self.source_done = false;
        self.failure = None;
    }

    pub fn position(&self) -> u64 {
        self.tracker.position()
    }

    pub fn encryption(&self) -> Encryption {
        self.encryption
    }

    /// Whether an oracle failure has ended this stream.
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Undecrypted bytes parked in the alignment buffer.
    pub fn aligned_backlog(&self) -> usize {
        self.align.len()
    }

    /// Decrypted bytes waiting for the next read.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }
}
