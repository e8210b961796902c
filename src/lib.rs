//! `block-loader` adapts an arbitrarily chunked network byte stream to a
//! block-cipher decryption engine that only accepts whole, offset-addressed
//! 8 KiB blocks, and exposes the result as a plain seekable byte stream.
//!
//! A stream is a 512-byte plaintext header followed by the block payload.
//! [`DecryptingLoader`] pulls raw chunks from a [`ByteSource`], classifies the
//! header through a [`DecryptionOracle`], realigns the payload to block
//! boundaries and decrypts it. [`Producer`] runs a loader ahead of the consumer
//! behind a watermark gate, and [`OffsetFeeder`] serves push-style transports.

pub mod align;
pub mod common;
pub mod error;
pub mod feed;
pub mod header;
pub mod loader;
pub mod oracle;
pub mod producer;
pub mod session;
pub mod source;

#[doc(hidden)]
pub mod testing;

pub use common::config::{ConfigBuilder, LoaderConfig, SeekMode};
pub use common::{BLOCK_SIZE, HEADER_SIZE};
pub use error::{Error, OracleOp, Result};
pub use feed::OffsetFeeder;
pub use header::Encryption;
pub use loader::{DecryptingLoader, Loader};
pub use oracle::{DecryptionHandle, DecryptionOracle, NoPlaintextBlocks, PlaintextBlocks, SyncBytePlaintext};
pub use producer::{BackpressureGate, BoundedQueue, Producer, ProducerHandle, QueueReader};
pub use source::{ByteSource, MemorySource, ReaderSource};

#[cfg(feature = "http")]
pub use source::HttpSource;
