//! HTTP client for the remote face/eye detection service.
//!
//! One attempt per call, no retries: retry policy belongs to the caller.
//! `POST {base}/analyze` takes `{"image": "data:image/jpeg;base64,..."}` and
//! answers `{success, result, total_detections?, error?}`.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use proctor_core::models::{EyeAnalysis, Sample, Verdict};
use reqwest::Client;
use serde::{Deserialize, Serialize};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Coarse classification of a [`DetectionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionErrorKind {
    Unreachable,
    Malformed,
    Rejected,
}

/// Errors from one detection request.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("detection service unreachable: {0}")]
    Unreachable(String),

    #[error("detection service returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("malformed detection response: {0}")]
    Malformed(String),

    /// The service answered `success: false`.
    #[error("detection rejected: {0}")]
    Rejected(String),
}

impl DetectionError {
    pub fn kind(&self) -> DetectionErrorKind {
        match self {
            DetectionError::Unreachable(_) | DetectionError::HttpStatus { .. } => {
                DetectionErrorKind::Unreachable
            }
            DetectionError::Malformed(_) => DetectionErrorKind::Malformed,
            DetectionError::Rejected(_) => DetectionErrorKind::Rejected,
        }
    }
}

// ── Detector seam ─────────────────────────────────────────────────────────────

/// Anything that can turn a sample into a verdict.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn analyze(&self, sample: &Sample) -> Result<Verdict, DetectionError>;

    /// Ask the service to forget its session counters.
    async fn reset(&self) -> Result<(), DetectionError> {
        Ok(())
    }
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    image: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    success: bool,
    #[serde(default)]
    result: Option<WireResult>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    total_detections: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireResult {
    status: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    details: Vec<String>,
    /// Seconds.
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    faces_count: u32,
    #[serde(default)]
    eye_analysis: Option<WireEyeAnalysis>,
}

#[derive(Debug, Deserialize)]
struct WireEyeAnalysis {
    #[serde(default)]
    eyes_detected: bool,
    #[serde(default)]
    eyes_count: u32,
    #[serde(default)]
    eye_ratio: f64,
    #[serde(default)]
    eye_details: Vec<String>,
}

impl AnalyzeResponse {
    fn into_verdict(self) -> Result<Verdict, DetectionError> {
        if !self.success {
            return Err(DetectionError::Rejected(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        let result = self
            .result
            .ok_or_else(|| DetectionError::Malformed("response missing result".to_string()))?;

        Ok(Verdict {
            status_label: result.status,
            confidence: result.confidence,
            faces_count: result.faces_count,
            duration_ms: result.duration * 1000.0,
            details: result.details,
            eye_analysis: result.eye_analysis.map(|e| EyeAnalysis {
                eyes_detected: e.eyes_detected,
                eyes_count: e.eyes_count,
                eye_ratio: e.eye_ratio,
                details: e.eye_details,
            }),
            reported_total_detections: self.total_detections,
        })
    }
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceHealth {
    pub status: String,
    #[serde(default)]
    pub opencv_version: Option<String>,
    #[serde(default)]
    pub face_cascade_loaded: bool,
    #[serde(default)]
    pub eye_cascade_loaded: bool,
}

/// Encode a sample as a JPEG data URI.
pub fn data_uri(sample: &Sample) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&sample.encoded_image)
    )
}

// ── DetectionClient ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DetectionClient {
    http: Client,
    base_url: String,
}

impl DetectionClient {
    /// Client for `base_url` with a per-request `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DetectionError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectionError::Unreachable(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe `GET /health`.
    pub async fn health(&self) -> Result<ServiceHealth, DetectionError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DetectionError::Unreachable(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| DetectionError::Malformed(format!("failed to parse health: {e}")))
    }
}

#[async_trait]
impl Detector for DetectionClient {
    async fn analyze(&self, sample: &Sample) -> Result<Verdict, DetectionError> {
        let url = format!("{}/analyze", self.base_url);
        let image = data_uri(sample);

        tracing::debug!(
            bytes = sample.encoded_image.len(),
            width = sample.width,
            height = sample.height,
            "submitting sample"
        );

        let response = self
            .http
            .post(&url)
            .json(&AnalyzeRequest { image: &image })
            .send()
            .await
            .map_err(|e| DetectionError::Unreachable(e.to_string()))?;
        let response = check_status(response).await?;

        let body: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| DetectionError::Malformed(format!("failed to parse response: {e}")))?;

        body.into_verdict()
    }

    async fn reset(&self) -> Result<(), DetectionError> {
        let url = format!("{}/reset", self.base_url);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| DetectionError::Unreachable(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }
}

/// Map non-2xx responses to [`DetectionError::HttpStatus`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DetectionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_else(|_| "(no body)".into());
    Err(DetectionError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
