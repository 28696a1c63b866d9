use thiserror::Error;

use crate::models::{AlertId, CaptureMode, SourceKind};

/// All errors produced by the session core.
///
/// None of these are fatal: the controller turns each into a status message
/// and either skips a tick or performs a controlled state transition.
#[derive(Error, Debug)]
pub enum ProctorError {
    /// Access to a capture source was refused or failed.
    #[error("{}", denied_message(kind))]
    SourceAcquisitionDenied { kind: SourceKind, reason: String },

    /// A Ready source was terminated outside the application.
    #[error("{} ended outside the application", .0.display_name())]
    SourceEndedExternally(SourceKind),

    /// Monitoring was requested before the mode's sources were Ready.
    #[error("{}", not_ready_message(.0))]
    SourcesNotReady(CaptureMode),

    /// No alert with this id exists in the store.
    #[error("Alert {0} not found")]
    AlertNotFound(AlertId),

    /// Tick interval outside the accepted 1–10 s range.
    #[error("Invalid capture interval: {0}s (expected 1-10)")]
    InvalidTickInterval(u64),

    /// A frame could not be encoded.
    #[error("Failed to encode frame: {0}")]
    Encode(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The session runtime task is no longer running.
    #[error("Session runtime has stopped")]
    RuntimeStopped,

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the proctor crates.
pub type Result<T> = std::result::Result<T, ProctorError>;

fn denied_message(kind: &SourceKind) -> &'static str {
    match kind {
        SourceKind::Camera => "Webcam access denied. Please enable camera permissions.",
        SourceKind::Screen => "Screen capture access denied or cancelled.",
    }
}

fn not_ready_message(mode: &CaptureMode) -> &'static str {
    match mode {
        CaptureMode::Camera => "Please turn on webcam first",
        CaptureMode::Screen => "Please start screen capture first",
        CaptureMode::Both => "Please enable both webcam and screen capture",
    }
}
