use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// The oracle operation that reported a failure code.
///
/// 返回错误码的解密引擎操作。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleOp {
    Classify,
    Decrypt,
}

impl fmt::Display for OracleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleOp::Classify => f.write_str("classify"),
            OracleOp::Decrypt => f.write_str("decrypt"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("source ended after {read} of 512 header bytes")]
    ShortHeader { read: usize },

    #[error("decrypt length {len} is not a multiple of the block size")]
    MisalignedBlock { len: usize },

    #[error("decryption oracle {op} failed with code {code}")]
    Oracle { op: OracleOp, code: i32 },

    #[error("source could not be reopened at offset {offset}: {reason}")]
    SeekFailed { offset: u64, reason: String },

    #[error("source I/O failed: {0}")]
    Source(#[from] io::Error),

    #[cfg(feature = "http")]
    #[error("HTTP transport failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("loader is not open")]
    NotOpen,

    #[error("loader has been stopped")]
    Stopped,

    #[error("producer stalled for {waited:?} waiting for the consumer to drain")]
    Stalled { waited: Duration },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// A copy of an oracle-side failure, so it can be reported on every later
    /// read of a stream it ended. Transport errors have no copy.
    pub(crate) fn replay(&self) -> Option<Error> {
        match self {
            Error::Oracle { op, code } => Some(Error::Oracle { op: *op, code: *code }),
            Error::MisalignedBlock { len } => Some(Error::MisalignedBlock { len: *len }),
            Error::Stopped => Some(Error::Stopped),
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Source(e) => e,
            Error::ShortHeader { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            Error::Stalled { .. } => io::Error::new(io::ErrorKind::TimedOut, err),
            Error::Oracle { .. } | Error::MisalignedBlock { .. } => {
                io::Error::new(io::ErrorKind::InvalidData, err)
            }
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

// 定义一个统一的 Result 类型
pub type Result<T> = std::result::Result<T, Error>;
