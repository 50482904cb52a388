use crate::propagation::Fidelity;
use thiserror::Error;

/// Hard failures raised by a [`crate::Propagator`].
#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("invalid orbital state: {0}")]
    InvalidState(String),
    #[error("propagator used before initialize()")]
    NotInitialized,
    #[error("invalid propagation step: {0}")]
    InvalidStep(String),
}

/// Errors that abort a simulation run.
///
/// Everything recoverable (constraint violations, rejected mode transitions, missing
/// optional parameters, backend fallback) is reported as a [`crate::SimEvent`] instead.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("initialization failed: {0}")]
    Initialization(String),
    #[error(transparent)]
    Propagation(#[from] PropagationError),
    #[error("{requested} fidelity backend unavailable: {reason}")]
    BackendUnavailable { requested: Fidelity, reason: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
