// crates/core/src/error.rs
use serde::Serialize;
use thiserror::Error;

/// Errors reported by [`crate::SessionRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("session identifier space exhausted (widths {initial}..={max} all collided)")]
    IdSpaceExhausted { initial: usize, max: usize },
}

/// Returned by the interaction channel when a waiting job is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interaction interrupted: the job is being stopped")]
pub struct Interrupted;

/// How a job body ends when it does not produce output.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job observed a stop request and unwound.
    #[error("job cancelled")]
    Cancelled,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl From<Interrupted> for JobError {
    fn from(_: Interrupted) -> Self {
        Self::Cancelled
    }
}

/// A job failure captured on the job thread and handed to the supervising thread.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("job '{job}' failed: {message}")]
pub struct JobFailure {
    pub job: String,
    pub message: String,
    /// True when the job thread panicked instead of returning an error.
    pub panicked: bool,
}

impl JobFailure {
    pub fn new(job: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            message: message.into(),
            panicked: false,
        }
    }

    pub(crate) fn from_panic(job: impl Into<String>, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "job thread panicked".to_string()
        };
        Self {
            job: job.into(),
            message,
            panicked: true,
        }
    }
}

/// Errors building a job from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CatalogError {
    #[error("unknown job kind: {0}")]
    UnknownKind(String),

    #[error("invalid parameters for job '{kind}': {message}")]
    InvalidParams { kind: String, message: String },
}

/// Errors starting a job thread.
#[derive(Debug, Error)]
#[error("failed to spawn job thread for '{job}': {source}")]
pub struct SpawnError {
    pub job: String,
    #[source]
    pub source: std::io::Error,
}

/// Errors validating configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid configuration value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}
