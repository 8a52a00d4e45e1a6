//! Model error types.

use thiserror::Error;

use crate::FileState;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: FileState, to: FileState },

    #[error("Size already recorded: {0}")]
    SizeAlreadyRecorded(&'static str),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl ModelError {
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }
}
