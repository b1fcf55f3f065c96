//! Error types for the model engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Positions belong to different roots: {0} and {1}")]
    InvalidRoot(String, String),

    #[error("Invalid move target: {0}")]
    InvalidMoveTarget(String),

    #[error("Operation base version {operation} does not match document version {document}")]
    OperationVersionConflict { operation: u64, document: u64 },

    #[error("Operation transformation failed: {0}")]
    OperationTransformation(String),

    #[error("Another operation is being applied")]
    ApplicationInProgress,

    #[error("Inverse operation no longer applies: {0}")]
    StaleInversion(String),

    #[error("Unexpected attribute value for key {0}")]
    UnexpectedAttribute(String),

    #[error("Invalid markup at {pos}: {message}")]
    Markup { pos: usize, message: String },

    #[error("Document has been dropped")]
    DocumentDropped,

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModelError {
    pub(crate) fn address(message: impl Into<String>) -> Self {
        ModelError::InvalidAddress(message.into())
    }

    pub(crate) fn markup(pos: usize, message: impl Into<String>) -> Self {
        ModelError::Markup {
            pos,
            message: message.into(),
        }
    }

    /// Structural errors indicate a caller bug and must reach the caller.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ModelError::InvalidAddress(_)
                | ModelError::InvalidRoot(..)
                | ModelError::InvalidMoveTarget(_)
                | ModelError::UnexpectedAttribute(_)
        )
    }
}

pub type ModelResult<T> = Result<T, ModelError>;
