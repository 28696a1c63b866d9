//! Runtime layer for the proctoring monitor.
//!
//! Talks to the detection service, runs the session state machine, and drives
//! it from a single tokio task.

pub mod controller;
pub mod detection_client;
pub mod orchestrator;

#[cfg(test)]
mod testing;

pub use controller::{SessionController, SessionPhase, SessionSnapshot};
pub use detection_client::{DetectionClient, DetectionError, DetectionErrorKind, Detector};
pub use orchestrator::{MonitoringHandle, SessionHandle, SessionOrchestrator};

pub use proctor_capture as capture;
pub use proctor_core as core;
