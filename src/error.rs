//! Error types for nvkv
//!
//! Provides a unified error type for all operations, plus the
//! language-neutral `Status` code callers can match on.

use thiserror::Error;

/// Result type alias using NvkvError
pub type Result<T> = std::result::Result<T, NvkvError>;

/// Unified error type for nvkv operations
#[derive(Debug, Error)]
pub enum NvkvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Space Errors
    // -------------------------------------------------------------------------
    #[error("Out of memory in shard {shard}")]
    OutOfMemory { shard: usize },

    #[error("Hash index is full")]
    IndexFull,

    // -------------------------------------------------------------------------
    // Argument Errors
    // -------------------------------------------------------------------------
    #[error("Invalid key length: expected 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Value too large: {len} bytes (max {max})")]
    ValueTooLarge { len: usize, max: usize },

    // -------------------------------------------------------------------------
    // Layout Errors
    // -------------------------------------------------------------------------
    #[error("Layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("Store corrupted: {0}")]
    Corrupted(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl NvkvError {
    /// Map this error onto the coarse status code of the engine API
    pub fn status(&self) -> Status {
        match self {
            NvkvError::OutOfMemory { .. } | NvkvError::IndexFull => Status::OutOfMemory,
            _ => Status::IoError,
        }
    }
}

impl From<bincode::Error> for NvkvError {
    fn from(err: bincode::Error) -> Self {
        NvkvError::Serialization(err.to_string())
    }
}

/// Status codes of the Get/Set contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    IoError,
    OutOfMemory,
}

impl Status {
    /// Status of a completed `get`
    pub fn of_get<T>(result: &Result<Option<T>>) -> Status {
        match result {
            Ok(Some(_)) => Status::Ok,
            Ok(None) => Status::NotFound,
            Err(e) => e.status(),
        }
    }

    /// Status of a completed `set`
    pub fn of_set(result: &Result<()>) -> Status {
        match result {
            Ok(()) => Status::Ok,
            Err(e) => e.status(),
        }
    }
}
