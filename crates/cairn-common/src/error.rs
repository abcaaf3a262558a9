//! Error types for Cairn.

use thiserror::Error;

use crate::page::PageId;

/// Result type alias using CairnError.
pub type Result<T> = std::result::Result<T, CairnError>;

/// Errors that can occur in Cairn operations.
#[derive(Debug, Error)]
pub enum CairnError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer pool errors
    #[error("buffer pool exhausted, every frame is pinned")]
    PoolExhausted,

    #[error("invalid page id: {0}")]
    InvalidPageId(PageId),

    // B+ tree errors
    #[error("B+ tree corrupted: {0}")]
    TreeCorrupted(String),

    // Configuration errors
    #[error("invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: CairnError = io_err.into();
        assert!(matches!(err, CairnError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_pool_exhausted_display() {
        let err = CairnError::PoolExhausted;
        assert_eq!(
            err.to_string(),
            "buffer pool exhausted, every frame is pinned"
        );
    }

    #[test]
    fn test_invalid_page_id_display() {
        let err = CairnError::InvalidPageId(PageId(42));
        assert_eq!(err.to_string(), "invalid page id: 42");
    }

    #[test]
    fn test_tree_corrupted_display() {
        let err = CairnError::TreeCorrupted("leaf chain broken".to_string());
        assert_eq!(err.to_string(), "B+ tree corrupted: leaf chain broken");
    }

    #[test]
    fn test_invalid_parameter_display() {
        let err = CairnError::InvalidParameter {
            name: "leaf_max_size".to_string(),
            value: "1".to_string(),
        };
        assert_eq!(err.to_string(), "invalid parameter: leaf_max_size = 1");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(CairnError::PoolExhausted)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CairnError>();
    }
}
