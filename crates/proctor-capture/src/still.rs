//! Capture backend that serves still image files as live sources.
//!
//! Useful for headless runs and demos: each configured kind is "acquired" by
//! decoding its image file once, and the stream keeps returning that frame.
//! [`StillImageBackend::revoke`] simulates the OS terminating a stream.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use image::RgbaImage;
use proctor_core::models::SourceKind;

use crate::source::{CaptureBackend, CaptureRequest, EndSignal, MediaStream};

#[derive(Debug, Default)]
pub struct StillImageBackend {
    sources: HashMap<SourceKind, PathBuf>,
    /// End signal of the latest acquisition per kind.
    live: Mutex<HashMap<SourceKind, EndSignal>>,
}

impl StillImageBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `path` whenever `kind` is requested.
    pub fn with_source(mut self, kind: SourceKind, path: impl Into<PathBuf>) -> Self {
        self.sources.insert(kind, path.into());
        self
    }

    pub fn has_source(&self, kind: SourceKind) -> bool {
        self.sources.contains_key(&kind)
    }

    /// Terminate the most recent `kind` stream as if from outside the
    /// application. Returns `false` if it was never acquired.
    pub fn revoke(&self, kind: SourceKind) -> bool {
        let signal = match self.live.lock() {
            Ok(mut live) => live.remove(&kind),
            Err(_) => None,
        };
        match signal {
            Some(signal) => {
                tracing::info!(%kind, "revoking still-image source");
                signal.notify();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CaptureBackend for StillImageBackend {
    async fn acquire(
        &self,
        request: CaptureRequest,
        on_end: EndSignal,
    ) -> Result<Box<dyn MediaStream>, String> {
        let path = self
            .sources
            .get(&request.kind)
            .cloned()
            .ok_or_else(|| format!("no {} source configured", request.kind))?;

        let decode_path = path.clone();
        let frame = tokio::task::spawn_blocking(move || image::open(&decode_path))
            .await
            .map_err(|e| format!("image decode task failed: {e}"))?
            .map_err(|e| format!("cannot open {}: {e}", path.display()))?
            .to_rgba8();

        if (frame.width(), frame.height()) != (request.width, request.height) {
            tracing::debug!(
                kind = %request.kind,
                requested = ?(request.width, request.height),
                native = ?frame.dimensions(),
                "still image does not match requested resolution; using native size"
            );
        }

        if let Ok(mut live) = self.live.lock() {
            live.insert(request.kind, on_end);
        }

        Ok(Box::new(StillStream {
            frame: Some(frame),
        }))
    }
}

/// Stream that repeats one decoded frame until released.
struct StillStream {
    frame: Option<RgbaImage>,
}

impl MediaStream for StillStream {
    fn current_frame(&self) -> Option<RgbaImage> {
        self.frame.clone()
    }

    fn release(&mut self) {
        self.frame = None;
    }
}
