use thiserror::Error;

/// Failure to turn bytes into a response (or back) under compression.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Truncated {section}: need {needed} bytes, {available} available")]
    Truncated {
        section: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    /// Unrecoverable setup problem, the store instance is unusable.
    #[error("Init failure: {0}")]
    InitFailure(String),

    /// Read or write against the underlying engine failed.
    #[error("Backend I/O error: {0}")]
    BackendIo(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid key pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[cfg(feature = "fjall")]
impl From<fjall::Error> for StorageError {
    fn from(err: fjall::Error) -> Self {
        StorageError::BackendIo(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StorageError::BackendIo(err.to_string())
    }
}
