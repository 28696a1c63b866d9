//! Scripted collaborators shared by the controller and orchestrator tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use proctor_capture::{CaptureBackend, CaptureRequest, EndSignal, MediaStream};
use proctor_core::models::{EyeAnalysis, SourceKind, Verdict};

use crate::detection_client::{DetectionError, Detector};

// ── Capture ───────────────────────────────────────────────────────────────────

struct SolidStream {
    frame: Option<RgbaImage>,
}

impl MediaStream for SolidStream {
    fn current_frame(&self) -> Option<RgbaImage> {
        self.frame.clone()
    }

    fn release(&mut self) {
        self.frame = None;
    }
}

/// Grants small solid frames (64×48 camera, 96×54 screen) unless a kind is
/// denied, and records the end signal of every acquisition.
#[derive(Default)]
pub(crate) struct TestBackend {
    denied: Mutex<Vec<SourceKind>>,
    signals: Mutex<Vec<EndSignal>>,
    pub(crate) acquisitions: AtomicUsize,
}

impl TestBackend {
    pub(crate) fn deny(&self, kind: SourceKind) {
        self.denied.lock().unwrap().push(kind);
    }

    pub(crate) fn allow(&self, kind: SourceKind) {
        self.denied.lock().unwrap().retain(|k| *k != kind);
    }

    /// Fire the end signal of the latest `kind` stream.
    pub(crate) fn revoke(&self, kind: SourceKind) {
        let signal = self
            .signals
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.kind() == kind)
            .cloned()
            .unwrap();
        signal.notify();
    }
}

#[async_trait]
impl CaptureBackend for TestBackend {
    async fn acquire(
        &self,
        request: CaptureRequest,
        on_end: EndSignal,
    ) -> Result<Box<dyn MediaStream>, String> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if self.denied.lock().unwrap().contains(&request.kind) {
            return Err("Permission denied".to_string());
        }
        let (w, h) = match request.kind {
            SourceKind::Camera => (64, 48),
            SourceKind::Screen => (96, 54),
        };
        self.signals.lock().unwrap().push(on_end);
        Ok(Box::new(SolidStream {
            frame: Some(RgbaImage::from_pixel(w, h, Rgba([90, 140, 200, 255]))),
        }))
    }
}

// ── Detection ─────────────────────────────────────────────────────────────────

pub(crate) fn verdict(label: &str, confidence: f64) -> Verdict {
    Verdict {
        status_label: label.to_string(),
        confidence,
        faces_count: 1,
        duration_ms: 0.0,
        details: vec![],
        eye_analysis: None,
        reported_total_detections: None,
    }
}

/// The "Cheating Detected" verdict at 92% with a normal-blink eye block.
pub(crate) fn cheating_verdict() -> Verdict {
    Verdict {
        eye_analysis: Some(EyeAnalysis {
            eyes_detected: true,
            eyes_count: 2,
            eye_ratio: 0.31,
            details: vec!["normal blink".to_string()],
        }),
        ..verdict("Cheating Detected", 92.0)
    }
}

type Scripted = (Duration, Result<Verdict, DetectionError>);

/// Detector answering from a script; once exhausted it answers "Safe".
#[derive(Default)]
pub(crate) struct ScriptedDetector {
    script: Mutex<VecDeque<Scripted>>,
    pub(crate) calls: AtomicUsize,
    pub(crate) resets: AtomicUsize,
}

impl ScriptedDetector {
    pub(crate) fn then(self, delay: Duration, result: Result<Verdict, DetectionError>) -> Self {
        self.script.lock().unwrap().push_back((delay, result));
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn analyze(&self, _sample: &proctor_core::models::Sample) -> Result<Verdict, DetectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some((delay, result)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                result
            }
            None => Ok(verdict("Safe", 95.0)),
        }
    }

    async fn reset(&self) -> Result<(), DetectionError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
