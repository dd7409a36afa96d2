//! Error types for biotext

use thiserror::Error;

/// Result type alias for biotext operations
pub type Result<T> = std::result::Result<T, BiotextError>;

/// Error types that can occur in biotext
///
/// Variants carry owned message strings so a failure recorded by the
/// background reader thread can be handed back, unchanged, on every
/// subsequent consumer call until the stream is closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BiotextError {
    /// File could not be opened
    #[error("cannot open {path}: {msg}")]
    Open {
        /// Path that failed to open
        path: String,
        /// Operating-system error text
        msg: String,
    },

    /// Read from the underlying file failed
    #[error("read failed: {0}")]
    Read(String),

    /// Compressed input could not be decoded
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// Input violates a validity bound (pathologically long line or token)
    #[error("{0}")]
    MalformedInput(String),

    /// Buffer allocation or growth failed
    #[error("out of memory: {0}")]
    Nomem(String),

    /// API contract violation by the caller
    #[error("{0}")]
    ImproperCall(&'static str),

    /// Reader thread could not be spawned
    #[error("failed to spawn reader thread: {0}")]
    ThreadCreate(String),

    /// Stream ended before a requested amount of input was available
    #[error("unexpected end of file")]
    UnexpectedEof,
}

impl BiotextError {
    /// Wrap an open failure for `path`.
    pub(crate) fn open(path: &std::path::Path, err: &std::io::Error) -> Self {
        BiotextError::Open {
            path: path.display().to_string(),
            msg: err.to_string(),
        }
    }

    /// Wrap a plain-file read failure.
    pub(crate) fn read(err: &std::io::Error) -> Self {
        BiotextError::Read(err.to_string())
    }
}
