use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Single error taxonomy used across the engine and exposed over RPC.
///
/// Every variant carries a stable `code()` so the surrounding layer can map
/// failures without matching on message text. Messages are user-facing where
/// the operation demands it (closure gating), diagnostic otherwise.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed or out-of-range input. Always raised before any store access.
    #[error("{message}")]
    Validation { message: String },

    /// A referenced record does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: i64 },

    /// A one-way transition was attempted a second time.
    #[error("{entity} {id} is already closed")]
    AlreadyClosed { entity: String, id: i64 },

    /// A state-machine gate rejected the operation. The message names the
    /// exact blocking condition and is meant to be shown to the user as-is.
    #[error("{message}")]
    Conflict { message: String },

    /// The record store failed underneath the engine.
    #[error("store operation failed: {op}")]
    Store { op: String, details: String },
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: i64) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
            id,
        }
    }

    pub fn already_closed(entity: impl Into<String>, id: i64) -> Self {
        EngineError::AlreadyClosed {
            entity: entity.into(),
            id,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        EngineError::Conflict {
            message: message.into(),
        }
    }

    pub fn store(op: impl Into<String>, err: impl std::fmt::Display) -> Self {
        EngineError::Store {
            op: op.into(),
            details: err.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "VALIDATION_FAILED",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::AlreadyClosed { .. } => "ALREADY_CLOSED",
            EngineError::Conflict { .. } => "CONFLICT_STATE",
            EngineError::Store { .. } => "STORE_FAILED",
        }
    }
}
