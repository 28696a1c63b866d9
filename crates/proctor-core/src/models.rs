//! Core data model shared by the capture, runtime and front-end crates.
//!
//! Everything here is plain data: capture modes and source kinds, the
//! [`Sample`] handed to the detection service, the [`Verdict`] it returns,
//! and the [`AlertEntry`] / [`SessionStats`] records the session keeps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Status labels ─────────────────────────────────────────────────────────────

/// Verdict label the service uses for a confirmed positive.
pub const STATUS_CHEATING_DETECTED: &str = "Cheating Detected";

/// Verdict label the service uses for a not-yet-confirmed positive.
pub const STATUS_SUSPICIOUS: &str = "Suspicious";

/// Confidence strictly above this value yields a [`Severity::High`] alert.
pub const HIGH_SEVERITY_CONFIDENCE: f64 = 80.0;

// ── SourceKind ────────────────────────────────────────────────────────────────

/// The two kinds of live capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Camera,
    Screen,
}

impl SourceKind {
    /// Both kinds, camera first.
    pub const ALL: [SourceKind; 2] = [SourceKind::Camera, SourceKind::Screen];

    /// Target resolution requested from the acquisition layer.
    pub fn target_resolution(self) -> (u32, u32) {
        match self {
            SourceKind::Camera => (640, 480),
            SourceKind::Screen => (1920, 1080),
        }
    }

    /// Human-facing noun used in status messages ("Webcam", "Screen capture").
    pub fn display_name(self) -> &'static str {
        match self {
            SourceKind::Camera => "Webcam",
            SourceKind::Screen => "Screen capture",
        }
    }

    /// Label burnt into composite samples.
    pub fn composite_label(self) -> &'static str {
        match self {
            SourceKind::Camera => "Webcam",
            SourceKind::Screen => "Screen Capture",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Camera => f.write_str("camera"),
            SourceKind::Screen => f.write_str("screen"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "camera" | "webcam" | "cam" => Ok(SourceKind::Camera),
            "screen" | "display" => Ok(SourceKind::Screen),
            other => Err(format!("unknown source kind: {other}")),
        }
    }
}

// ── CaptureMode ───────────────────────────────────────────────────────────────

/// Which source(s) feed frame sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    #[default]
    Camera,
    Screen,
    Both,
}

impl CaptureMode {
    /// `true` when `kind` must be Ready before monitoring may run in this mode.
    pub fn requires(self, kind: SourceKind) -> bool {
        match self {
            CaptureMode::Camera => kind == SourceKind::Camera,
            CaptureMode::Screen => kind == SourceKind::Screen,
            CaptureMode::Both => true,
        }
    }

    /// The source kinds this mode needs, camera first.
    pub fn required_kinds(self) -> &'static [SourceKind] {
        match self {
            CaptureMode::Camera => &[SourceKind::Camera],
            CaptureMode::Screen => &[SourceKind::Screen],
            CaptureMode::Both => &SourceKind::ALL,
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Camera => f.write_str("camera"),
            CaptureMode::Screen => f.write_str("screen"),
            CaptureMode::Both => f.write_str("both"),
        }
    }
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "camera" | "webcam" => Ok(CaptureMode::Camera),
            "screen" => Ok(CaptureMode::Screen),
            "both" | "dual" => Ok(CaptureMode::Both),
            other => Err(format!("unknown capture mode: {other}")),
        }
    }
}

// ── SourceState ───────────────────────────────────────────────────────────────

/// Lifecycle state of a single capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    #[default]
    Idle,
    Starting,
    Ready,
    Stopped,
    Errored,
}

impl SourceState {
    /// `true` while a stream is held or being acquired.
    pub fn is_active(self) -> bool {
        matches!(self, SourceState::Starting | SourceState::Ready)
    }
}

// ── Sample ────────────────────────────────────────────────────────────────────

/// One encoded still image taken from the active source(s).
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Capture mode the sample was composed for.
    pub mode: CaptureMode,
    /// JPEG-encoded image bytes.
    pub encoded_image: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
}

// ── Verdict ───────────────────────────────────────────────────────────────────

/// Eye-level metrics reported alongside a verdict.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EyeAnalysis {
    pub eyes_detected: bool,
    pub eyes_count: u32,
    pub eye_ratio: f64,
    /// Ordered human-readable observations.
    #[serde(default)]
    pub details: Vec<String>,
}

/// How a verdict affects the session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictClass {
    /// Confirmed positive: alert plus detection counter increment.
    CheatingDetected,
    /// Unconfirmed positive: alert only.
    Suspicious,
    /// Anything else ("Safe", "Normal", "Error", ...).
    Clear,
}

/// Structured detection result for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Free-form classification label.
    pub status_label: String,
    /// Confidence score, 0–100.
    pub confidence: f64,
    pub faces_count: u32,
    /// How long the suspicious condition has persisted, in milliseconds.
    pub duration_ms: f64,
    /// Ordered reasons given by the service.
    #[serde(default)]
    pub details: Vec<String>,
    #[serde(default)]
    pub eye_analysis: Option<EyeAnalysis>,
    /// Authoritative cumulative count, when the service supplies one.
    #[serde(default)]
    pub reported_total_detections: Option<u64>,
}

impl Verdict {
    pub fn classify(&self) -> VerdictClass {
        match self.status_label.as_str() {
            STATUS_CHEATING_DETECTED => VerdictClass::CheatingDetected,
            STATUS_SUSPICIOUS => VerdictClass::Suspicious,
            _ => VerdictClass::Clear,
        }
    }

    /// `true` when this verdict should produce an alert.
    pub fn is_qualifying(&self) -> bool {
        self.classify() != VerdictClass::Clear
    }
}

// ── Alerts ────────────────────────────────────────────────────────────────────

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// `High` above [`HIGH_SEVERITY_CONFIDENCE`], otherwise `Medium`.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > HIGH_SEVERITY_CONFIDENCE {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => f.write_str("low"),
            Severity::Medium => f.write_str("medium"),
            Severity::High => f.write_str("high"),
        }
    }
}

/// Unique, monotonically increasing alert identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AlertId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse().map(AlertId)
    }
}

/// A retained record of one qualifying verdict. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEntry {
    pub id: AlertId,
    /// JPEG bytes of the sample that triggered the alert.
    pub image: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub source_mode: CaptureMode,
    pub status_label: String,
    pub confidence: f64,
    pub faces_count: u32,
    pub duration_ms: f64,
    pub details: Vec<String>,
    pub eye_analysis: Option<EyeAnalysis>,
}

/// Image-free view of an [`AlertEntry`] for presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSummary {
    pub id: AlertId,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub source_mode: CaptureMode,
    pub status_label: String,
    pub confidence: f64,
    pub faces_count: u32,
    pub image_bytes: usize,
}

impl From<&AlertEntry> for AlertSummary {
    fn from(entry: &AlertEntry) -> Self {
        Self {
            id: entry.id,
            timestamp: entry.timestamp,
            severity: entry.severity,
            source_mode: entry.source_mode,
            status_label: entry.status_label.clone(),
            confidence: entry.confidence,
            faces_count: entry.faces_count,
            image_bytes: entry.image.len(),
        }
    }
}

// ── SessionStats ──────────────────────────────────────────────────────────────

/// Running session counters owned by the controller.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionStats {
    /// Seconds spent monitoring since the last `start_monitoring`.
    pub elapsed_seconds: u64,
    /// Confirmed detections since the last clear.
    pub cumulative_detections: u64,
    /// Most recent eye metrics reported by the service.
    pub last_eye_metrics: Option<EyeAnalysis>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
