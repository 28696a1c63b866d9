//! Shared data model, error taxonomy, alert history and settings for the
//! proctoring monitor.

pub mod alerts;
pub mod error;
pub mod formatting;
pub mod models;
pub mod settings;

pub use error::{ProctorError, Result};
