use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AsarError {
    #[error("Archive not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("No entry at {0} in archive")]
    EntryNotFound(String),

    #[error("Destination already exists: {}", path.display())]
    DestinationExists { path: PathBuf },

    #[error("Corrupt archive header: {0}")]
    CorruptHeader(String),

    #[error("Entry out of bounds: offset {offset} + size {size} exceeds blob length {blob_len}")]
    OutOfBounds { offset: u64, size: u64, blob_len: u64 },

    #[error("Unpacked file missing: {}", path.display())]
    MissingUnpackedFile { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AsarError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        AsarError::CorruptHeader(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AsarError>;
