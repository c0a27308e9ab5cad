use thiserror::Error;

use crate::core::types::Horizon;

/// Error taxonomy for the relative-strength core.
///
/// Component-level numeric failures never surface here; they degrade to
/// neutral values inside the calculation engine. These variants cover the
/// failures that cross a module boundary: rejected store writes,
/// collaborator failures, and the circuit breaker latching.
#[derive(Error, Debug)]
pub enum RsError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("data unavailable for {horizon}: {reason}")]
    DataUnavailable { horizon: Horizon, reason: String },

    #[error("fetch error for {horizon}: {cause}")]
    Fetch { horizon: Horizon, cause: anyhow::Error },

    #[error("system error: {0}")]
    System(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("engine not initialized")]
    Uninitialized,
}

pub type Result<T> = std::result::Result<T, RsError>;
