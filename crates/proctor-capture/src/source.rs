//! Capture-source lifecycle.
//!
//! A [`SourceHandle`] owns at most one live [`MediaStream`] for its
//! [`SourceKind`] and walks an explicit state machine:
//!
//! ```text
//! Idle ──start──▶ Starting ──ok──▶ Ready ──stop / ended──▶ Stopped
//!                    │                                      │
//!                    └──denied──▶ Errored ◀──────start──────┘ (on failure)
//! ```
//!
//! Acquisition itself is delegated to a [`CaptureBackend`]. Every transition
//! is announced on the handle's event channel, and the backend is handed an
//! [`EndSignal`] it fires when the stream is terminated outside the
//! application (revoked screen share, unplugged camera).

use async_trait::async_trait;
use image::RgbaImage;
use proctor_core::models::{SourceKind, SourceState};
use proctor_core::{ProctorError, Result};
use tokio::sync::mpsc;

// ── Backend seam ──────────────────────────────────────────────────────────────

/// Parameters passed to the acquisition layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub kind: SourceKind,
    /// Requested frame width; the stream may deliver a different native size.
    pub width: u32,
    pub height: u32,
}

impl CaptureRequest {
    pub fn for_kind(kind: SourceKind) -> Self {
        let (width, height) = kind.target_resolution();
        Self { kind, width, height }
    }
}

/// A live, exclusively owned media stream.
pub trait MediaStream: Send {
    /// The most recent decoded frame at native resolution, if one exists yet.
    fn current_frame(&self) -> Option<RgbaImage>;

    /// Stop the underlying tracks. Must tolerate repeated calls.
    fn release(&mut self);
}

/// Acquires media streams (permission prompt, device open, screen picker).
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Open a stream for `request`. `on_end` must be fired if the stream is
    /// later terminated by anything other than [`MediaStream::release`].
    ///
    /// Errors carry a human-readable reason (denied, cancelled, no device).
    async fn acquire(
        &self,
        request: CaptureRequest,
        on_end: EndSignal,
    ) -> std::result::Result<Box<dyn MediaStream>, String>;
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Notifications emitted by source handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEvent {
    /// The handle moved to `state`.
    StateChanged { kind: SourceKind, state: SourceState },
    /// The stream opened under `generation` was terminated externally.
    Ended { kind: SourceKind, generation: u64 },
}

/// Termination callback handed to the backend for one acquisition.
#[derive(Debug, Clone)]
pub struct EndSignal {
    kind: SourceKind,
    generation: u64,
    tx: mpsc::UnboundedSender<SourceEvent>,
}

impl EndSignal {
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Report that the stream ended outside the application.
    pub fn notify(&self) {
        if self
            .tx
            .send(SourceEvent::Ended {
                kind: self.kind,
                generation: self.generation,
            })
            .is_err()
        {
            tracing::debug!(kind = %self.kind, "end signal dropped; controller gone");
        }
    }
}

// ── SourceHandle ──────────────────────────────────────────────────────────────

/// State machine around a single capture source.
pub struct SourceHandle {
    kind: SourceKind,
    state: SourceState,
    stream: Option<Box<dyn MediaStream>>,
    last_error: Option<String>,
    /// Bumped on every `start`, so end signals from older streams are ignored.
    generation: u64,
    events: mpsc::UnboundedSender<SourceEvent>,
}

impl SourceHandle {
    pub fn new(kind: SourceKind, events: mpsc::UnboundedSender<SourceEvent>) -> Self {
        Self {
            kind,
            state: SourceState::Idle,
            stream: None,
            last_error: None,
            generation: 0,
            events,
        }
    }

    /// Acquire a fresh stream, releasing any existing one first.
    ///
    /// On failure the handle is left `Errored` with the reason recorded and a
    /// [`ProctorError::SourceAcquisitionDenied`] is returned.
    pub async fn start(&mut self, backend: &dyn CaptureBackend) -> Result<()> {
        self.release_stream();
        self.generation += 1;
        self.last_error = None;
        self.set_state(SourceState::Starting);

        let on_end = EndSignal {
            kind: self.kind,
            generation: self.generation,
            tx: self.events.clone(),
        };

        match backend.acquire(CaptureRequest::for_kind(self.kind), on_end).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.set_state(SourceState::Ready);
                tracing::info!(kind = %self.kind, generation = self.generation, "source ready");
                Ok(())
            }
            Err(reason) => {
                tracing::warn!(kind = %self.kind, %reason, "source acquisition failed");
                self.last_error = Some(reason.clone());
                self.set_state(SourceState::Errored);
                Err(ProctorError::SourceAcquisitionDenied {
                    kind: self.kind,
                    reason,
                })
            }
        }
    }

    /// Release the stream and move to `Stopped`. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let released = self.release_stream();
        if released || self.state != SourceState::Stopped {
            self.set_state(SourceState::Stopped);
            tracing::info!(kind = %self.kind, "source stopped");
        }
    }

    /// React to an external end signal. Returns `true` when the handle went
    /// from `Ready` to `Stopped`; signals for older streams are ignored.
    pub fn handle_ended(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != SourceState::Ready {
            tracing::debug!(
                kind = %self.kind,
                generation,
                current = self.generation,
                "ignoring stale end signal"
            );
            return false;
        }
        self.release_stream();
        self.set_state(SourceState::Stopped);
        tracing::warn!(kind = %self.kind, "source ended externally");
        true
    }

    /// Current frame, only while `Ready`.
    pub fn frame(&self) -> Option<RgbaImage> {
        if self.state != SourceState::Ready {
            return None;
        }
        self.stream.as_ref()?.current_frame()
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SourceState::Ready
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    // ── Private helpers ───────────────────────────────────────────────────

    fn release_stream(&mut self) -> bool {
        match self.stream.take() {
            Some(mut stream) => {
                stream.release();
                true
            }
            None => false,
        }
    }

    fn set_state(&mut self, state: SourceState) {
        self.state = state;
        // The controller may already be gone during teardown.
        let _ = self.events.send(SourceEvent::StateChanged {
            kind: self.kind,
            state,
        });
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.release_stream();
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("has_stream", &self.stream.is_some())
            .field("last_error", &self.last_error)
            .field("generation", &self.generation)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Rgba;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Stream serving a fixed frame and counting releases.
    pub(crate) struct FakeStream {
        frame: Option<RgbaImage>,
        releases: Arc<AtomicUsize>,
    }

    impl MediaStream for FakeStream {
        fn current_frame(&self) -> Option<RgbaImage> {
            self.frame.clone()
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Backend that grants or denies per kind and keeps the end signals.
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub(crate) deny: Mutex<Vec<SourceKind>>,
        pub(crate) sizes: Mutex<Vec<(SourceKind, u32, u32, [u8; 4])>>,
        pub(crate) releases: Arc<AtomicUsize>,
        pub(crate) signals: Mutex<Vec<EndSignal>>,
        pub(crate) requests: Mutex<Vec<CaptureRequest>>,
    }

    impl FakeBackend {
        pub(crate) fn with_frame(self, kind: SourceKind, w: u32, h: u32, color: [u8; 4]) -> Self {
            self.sizes.lock().unwrap().push((kind, w, h, color));
            self
        }

        pub(crate) fn denying(self, kind: SourceKind) -> Self {
            self.deny.lock().unwrap().push(kind);
            self
        }

        pub(crate) fn last_signal(&self, kind: SourceKind) -> EndSignal {
            self.signals
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|s| s.kind() == kind)
                .cloned()
                .unwrap()
        }
    }

    #[async_trait]
    impl CaptureBackend for FakeBackend {
        async fn acquire(
            &self,
            request: CaptureRequest,
            on_end: EndSignal,
        ) -> std::result::Result<Box<dyn MediaStream>, String> {
            self.requests.lock().unwrap().push(request);
            if self.deny.lock().unwrap().contains(&request.kind) {
                return Err("NotAllowedError: Permission denied".to_string());
            }
            let frame = self
                .sizes
                .lock()
                .unwrap()
                .iter()
                .find(|(k, ..)| *k == request.kind)
                .map(|(_, w, h, c)| RgbaImage::from_pixel(*w, *h, Rgba(*c)));
            self.signals.lock().unwrap().push(on_end);
            Ok(Box::new(FakeStream {
                frame,
                releases: Arc::clone(&self.releases),
            }))
        }
    }

    fn handle(kind: SourceKind) -> (SourceHandle, mpsc::UnboundedReceiver<SourceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SourceHandle::new(kind, tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SourceEvent>) -> Vec<SourceEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn test_start_success_transitions_to_ready() {
        let backend = FakeBackend::default().with_frame(SourceKind::Camera, 640, 480, [1, 2, 3, 255]);
        let (mut h, mut rx) = handle(SourceKind::Camera);
        assert_eq!(h.state(), SourceState::Idle);

        h.start(&backend).await.unwrap();

        assert!(h.is_ready());
        assert!(h.last_error().is_none());
        assert_eq!(h.frame().map(|f| f.dimensions()), Some((640, 480)));
        assert_eq!(
            drain(&mut rx),
            vec![
                SourceEvent::StateChanged { kind: SourceKind::Camera, state: SourceState::Starting },
                SourceEvent::StateChanged { kind: SourceKind::Camera, state: SourceState::Ready },
            ]
        );
    }

    #[tokio::test]
    async fn test_start_requests_target_resolution() {
        let backend = FakeBackend::default();
        let (mut screen, _rx) = handle(SourceKind::Screen);
        screen.start(&backend).await.unwrap();

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].width, 1920);
        assert_eq!(requests[0].height, 1080);
    }

    #[tokio::test]
    async fn test_start_denied_transitions_to_errored() {
        let backend = FakeBackend::default().denying(SourceKind::Camera);
        let (mut h, _rx) = handle(SourceKind::Camera);

        let err = h.start(&backend).await.unwrap_err();

        assert!(matches!(
            err,
            ProctorError::SourceAcquisitionDenied { kind: SourceKind::Camera, .. }
        ));
        assert_eq!(h.state(), SourceState::Errored);
        assert!(h.last_error().unwrap().contains("Permission denied"));
        assert!(h.frame().is_none());
    }

    #[tokio::test]
    async fn test_restart_releases_previous_stream() {
        let backend = FakeBackend::default();
        let (mut h, _rx) = handle(SourceKind::Camera);

        h.start(&backend).await.unwrap();
        h.start(&backend).await.unwrap();

        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
        assert_eq!(h.generation(), 2);
        assert!(h.is_ready());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let backend = FakeBackend::default();
        let (mut h, mut rx) = handle(SourceKind::Screen);
        h.start(&backend).await.unwrap();
        drain(&mut rx);

        h.stop();
        h.stop();

        assert_eq!(h.state(), SourceState::Stopped);
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
        // Only one Stopped notification.
        assert_eq!(
            drain(&mut rx),
            vec![SourceEvent::StateChanged { kind: SourceKind::Screen, state: SourceState::Stopped }]
        );
    }

    #[tokio::test]
    async fn test_external_end_stops_ready_source() {
        let backend = FakeBackend::default();
        let (mut h, mut rx) = handle(SourceKind::Screen);
        h.start(&backend).await.unwrap();
        drain(&mut rx);

        backend.last_signal(SourceKind::Screen).notify();
        let event = rx.recv().await.unwrap();
        let SourceEvent::Ended { generation, .. } = event else {
            panic!("expected Ended, got {event:?}");
        };

        assert!(h.handle_ended(generation));
        assert_eq!(h.state(), SourceState::Stopped);
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
        // Second delivery is a no-op.
        assert!(!h.handle_ended(generation));
    }

    #[tokio::test]
    async fn test_stale_end_signal_ignored_after_restart() {
        let backend = FakeBackend::default();
        let (mut h, _rx) = handle(SourceKind::Screen);
        h.start(&backend).await.unwrap();
        let old_generation = h.generation();
        h.start(&backend).await.unwrap();

        assert!(!h.handle_ended(old_generation));
        assert!(h.is_ready());
    }

    #[tokio::test]
    async fn test_drop_releases_stream() {
        let backend = FakeBackend::default();
        {
            let (mut h, _rx) = handle(SourceKind::Camera);
            h.start(&backend).await.unwrap();
        }
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
    }
}
