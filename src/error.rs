use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for s3-csi-e2e operations
#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Timed out after {timeout:?} waiting for {what}")]
    WaitTimeout { what: String, timeout: Duration },

    #[error("Wait for {what} failed: {message}")]
    Wait { what: String, message: String },

    #[error("S3 {operation} failed: {message}")]
    S3 { operation: &'static str, message: String },

    #[error("Exec in pod {pod} failed: {message}")]
    Exec { pod: String, message: String },

    #[error("Command exited with code {exit_code}: {command}\nstderr: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Invalid path spec {path:?}: {reason}")]
    InvalidPathSpec { path: String, reason: String },

    /// `stderr` is kept for callers; the message shows it once through `source`
    #[error("materialise paths failed: {source}")]
    Materialise {
        #[source]
        source: Box<E2eError>,
        stderr: String,
    },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Timed out after {timeout:?} waiting for pod {pod} to report {pattern:?}")]
    PollTimeout {
        pod: String,
        pattern: String,
        timeout: Duration,
    },

    #[error("Wait for pod {pod} cancelled")]
    Cancelled { pod: String },

    #[error("Task {index} panicked: {message}")]
    TaskPanicked { index: usize, message: String },

    #[error("Task {index} was cancelled")]
    TaskCancelled { index: usize },

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid benchmark output: {0}")]
    Benchmark(String),

    #[error("{context}: {} error(s): {}", .errors.len(), join_errors(.errors))]
    Aggregate {
        context: String,
        errors: Vec<E2eError>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn join_errors(errors: &[E2eError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl E2eError {
    /// Build an S3 error from any SDK error, keeping the operation name
    pub fn s3(operation: &'static str, err: impl std::fmt::Debug) -> Self {
        E2eError::S3 {
            operation,
            message: format!("{:?}", err),
        }
    }

    /// True when the error is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, E2eError::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Collapse a list of errors into a single result, preserving every failure
    pub fn aggregate(context: impl Into<String>, errors: Vec<E2eError>) -> Result<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(E2eError::Aggregate {
                context: context.into(),
                errors,
            })
        }
    }
}

/// Result type alias for s3-csi-e2e operations
pub type Result<T> = std::result::Result<T, E2eError>;
