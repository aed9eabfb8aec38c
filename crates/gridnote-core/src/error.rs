//! Error types for annotation operations.

use thiserror::Error;

/// Errors raised by the annotation core.
#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("Annotation {id} is locked by another session")]
    LockDenied { id: String },
    #[error("Invalid structural edit: {0}")]
    InvalidStructuralEdit(String),
    #[error("A history transaction is already open")]
    TransactionAlreadyOpen,
    #[error("No history transaction is open")]
    NoOpenTransaction,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for annotation operations.
pub type Result<T> = std::result::Result<T, AnnotationError>;
