//! Error taxonomy for the orchestrator core

use thiserror::Error;

/// Result type alias using the orchestrator error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors: raised before any device interaction
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Verification failures
    #[error("Dependency cycle detected: {}", format_cycles(.cycles))]
    DependencyCycle { cycles: Vec<Vec<String>> },

    #[error("Test dependency '{test_id}' has not been executed yet; run the dependency test first")]
    DependencyNotExecuted { test_id: String },

    #[error("Test dependency '{test_id}' did not pass on its last run; run the dependency test first")]
    DependencyFailed { test_id: String },

    #[error("Prerequisite '{id}' failed: {reason}")]
    PrerequisiteFailed { id: String, reason: String },

    // Step failures
    #[error("Step failed: {0}")]
    StepFailed(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Screenshot mismatch: similarity {similarity:.3} is below required {required:.3}")]
    ScreenshotMismatch { similarity: f64, required: f64 },

    #[error("Companion element protocol is not available")]
    CompanionUnavailable,

    // Transport / device failures
    #[error("Device command failed: {0}")]
    Device(String),

    #[error("Companion protocol error: {0}")]
    Companion(String),

    #[error("{operation} timed out after {ms}ms")]
    Timeout { operation: String, ms: u64 },

    // Scheduling
    #[error("An execution is already running")]
    AlreadyRunning,

    #[error("Already recording")]
    AlreadyRecording,

    // Local disk failures (screenshots, reference images) are not device faults
    #[error("File error at {path}: {source}")]
    Artifact {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Transport and device failures escalate a test to `error` rather than `failed`.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Device(_) | Error::Companion(_) | Error::Timeout { .. } | Error::Io(_)
        )
    }

    pub fn artifact(path: &std::path::Path, source: std::io::Error) -> Self {
        Error::Artifact {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn timeout(operation: impl Into<String>, ms: u64) -> Self {
        Error::Timeout {
            operation: operation.into(),
            ms,
        }
    }
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|cycle| cycle.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}
