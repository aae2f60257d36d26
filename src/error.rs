//! Domain error type for the advisory pipeline.
//!
//! Every per-message failure in the decision and alert paths is expressed as
//! an [`AdvisorError`]. None of them is allowed to stop a consume loop: the
//! loops log the error and move on to the next message. Startup code uses
//! `anyhow` instead and wraps these where it needs to.

use thiserror::Error;

/// Failures raised by the feature pipeline, strategies, settings and sinks.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdvisorError {
    /// A statistical strategy was asked to predict before it was fitted.
    #[error("model not trained")]
    NotTrained,

    /// A statistical strategy was fitted a second time.
    #[error("model already trained")]
    AlreadyTrained,

    /// A reading field lies outside its physical bounds.
    #[error("{field} out of domain: {value}")]
    OutOfDomain { field: &'static str, value: f64 },

    /// A required column is absent (or could not be mapped).
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// The notification sink could not deliver a report.
    #[error("notification sink unavailable: {0}")]
    SinkUnavailable(String),

    /// A settings patch was rejected as a whole.
    #[error("invalid settings patch: {0}")]
    InvalidPatch(String),

    /// Fitting a model failed.
    #[error("training failed: {0}")]
    Training(String),

    /// The message bus refused a publish.
    #[error("bus error: {0}")]
    Bus(String),
}

pub type Result<T> = std::result::Result<T, AdvisorError>;
