//! Error types for the policy runtime.

use thiserror::Error;

/// Errors that can occur in runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Rejected statement or evaluation input.
    #[error("datalog error: {0}")]
    Datalog(#[from] verdict_datalog::DatalogError),

    /// No policy with this name.
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// A policy with this name already exists.
    #[error("policy already exists: {0}")]
    PolicyExists(String),

    /// Rule sent to a policy that only stores facts.
    #[error("policy {0} only holds facts")]
    RulesNotSupported(String),

    /// A simulated sequence that cannot be applied.
    #[error("invalid simulation: {0}")]
    Simulation(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration that is not valid JSON.
    #[error("configuration JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
