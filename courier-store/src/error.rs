//! Error types for the courier-store crate.

use std::io;

use thiserror::Error;

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O operation failed (dataset or journal read/write).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// A referenced entity does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// Persisted data is inconsistent or unreadable.
    #[error("Corrupted store data: {0}")]
    Corrupted(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("RON encode error: {0}")]
    Encode(#[from] ron::Error),

    #[error("RON decode error: {0}")]
    Decode(#[from] ron::de::SpannedError),
}

impl From<ron::Error> for StoreError {
    fn from(err: ron::Error) -> Self {
        Self::Serialization(err.into())
    }
}

impl From<ron::de::SpannedError> for StoreError {
    fn from(err: ron::de::SpannedError) -> Self {
        Self::Serialization(err.into())
    }
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let store_err = StoreError::from(io_err);

        assert!(matches!(store_err, StoreError::Io(_)));
        assert!(store_err.to_string().contains("access denied"));
    }

    #[test]
    fn test_not_found_message() {
        let err = StoreError::not_found("campaign", 12);
        assert_eq!(err.to_string(), "campaign 12 not found");
    }

    #[test]
    fn test_decode_error_conversion() {
        let err: StoreError = ron::from_str::<u32>("not a number").unwrap_err().into();
        assert!(matches!(
            err,
            StoreError::Serialization(SerializationError::Decode(_))
        ));
    }
}
