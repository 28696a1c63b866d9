//! Session state machine.
//!
//! [`SessionController`] owns both capture sources, the alert history and the
//! session counters. It is a plain struct driven by one caller at a time: the
//! orchestrator feeds it commands, timer ticks, source events and analysis
//! completions, and publishes [`SessionController::snapshot`] after each.
//!
//! ```text
//! Idle ──mode / source start──▶ SourcesPending ──start_monitoring──▶ Monitoring
//!   ▲                                  ▲                                 │
//!   └──────── sources stopped ─────────┴── stop / required source lost ──┘
//! ```
//!
//! Every submitted sample carries a [`Ticket`]. Completions whose epoch no
//! longer matches (monitoring stopped or restarted since) are discarded.
//! Completions older than the latest applied one still record their alert but
//! never overwrite fresher eye metrics, status or the authoritative count.

use std::sync::Arc;
use std::time::Duration;

use proctor_capture::{CaptureBackend, FrameCompositor, SourceEvent, SourceHandle};
use proctor_core::alerts::{AlertStats, AlertStore, ExportedAlert, RECENT_ALERTS_LIMIT};
use proctor_core::formatting::{format_elapsed, verdict_status_line};
use proctor_core::models::{
    AlertId, AlertSummary, CaptureMode, Sample, SessionStats, SourceKind, SourceState, Verdict,
    VerdictClass,
};
use proctor_core::{ProctorError, Result};
use tokio::sync::mpsc;

use crate::detection_client::DetectionError;

/// Default seconds between ticks.
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 2;

/// Accepted tick interval range, in seconds.
pub const TICK_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 1..=10;

const STATUS_MONITORING_ACTIVE: &str = "Monitoring active...";
const STATUS_MONITORING_STOPPED: &str = "Monitoring stopped";
const STATUS_CONNECTION_ERROR: &str = "Connection error - check if the detection service is running";

// ── Public types ──────────────────────────────────────────────────────────────

/// Coarse controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No source active, not monitoring.
    Idle,
    /// At least one source starting or ready, not monitoring.
    SourcesPending,
    Monitoring,
}

/// Identifies one submitted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    /// Monitoring run the sample belongs to.
    pub epoch: u64,
    /// Issue order within the controller's lifetime.
    pub seq: u64,
}

/// A sample ready to be sent to the detector.
#[derive(Debug, Clone)]
pub struct PendingAnalysis {
    pub ticket: Ticket,
    pub sample: Sample,
}

/// What [`SessionController::apply_analysis`] did with a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisOutcome {
    /// Monitoring stopped or restarted since the sample was taken.
    Discarded,
    /// Verdict applied. `stale` is true when a newer completion had already
    /// been applied.
    Applied { alert: Option<AlertId>, stale: bool },
    Failed { stale: bool },
}

/// Observable session state for presentation layers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub mode: CaptureMode,
    pub status: String,
    pub stats: SessionStats,
    /// `stats.elapsed_seconds` as `MM:SS`.
    pub elapsed_display: String,
    pub camera: SourceState,
    pub screen: SourceState,
    pub monitoring: bool,
    pub tick_interval_secs: u64,
    pub alert_count: usize,
    /// Most recent first.
    pub recent_alerts: Vec<AlertSummary>,
    pub alert_stats: AlertStats,
}

// ── SessionController ─────────────────────────────────────────────────────────

pub struct SessionController {
    mode: CaptureMode,
    camera: SourceHandle,
    screen: SourceHandle,
    backend: Arc<dyn CaptureBackend>,
    compositor: FrameCompositor,
    alerts: AlertStore,
    stats: SessionStats,
    monitoring: bool,
    status: String,
    tick_interval: Duration,
    /// Bumped whenever monitoring starts or stops.
    epoch: u64,
    next_seq: u64,
    /// Highest sequence number whose completion has been applied.
    latest_applied_seq: u64,
}

impl SessionController {
    /// Build a controller around `backend`. The returned receiver carries the
    /// source events the caller must route back into
    /// [`SessionController::handle_source_event`].
    pub fn new(backend: Arc<dyn CaptureBackend>) -> (Self, mpsc::UnboundedReceiver<SourceEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let controller = Self {
            mode: CaptureMode::default(),
            camera: SourceHandle::new(SourceKind::Camera, events_tx.clone()),
            screen: SourceHandle::new(SourceKind::Screen, events_tx),
            backend,
            compositor: FrameCompositor::new(),
            alerts: AlertStore::new(),
            stats: SessionStats::default(),
            monitoring: false,
            status: String::new(),
            tick_interval: Duration::from_secs(DEFAULT_TICK_INTERVAL_SECS),
            epoch: 0,
            next_seq: 0,
            latest_applied_seq: 0,
        };
        (controller, events_rx)
    }

    // ── Source commands ───────────────────────────────────────────────────

    /// Switch capture mode.
    ///
    /// Sources the new mode does not need are stopped, compatible ones keep
    /// running, and required ones that are not Ready are started. If
    /// monitoring is active and the new mode is not immediately satisfied,
    /// monitoring stops first. Returns the first acquisition failure.
    pub async fn set_capture_mode(&mut self, mode: CaptureMode) -> Result<()> {
        if mode != self.mode {
            tracing::info!(from = %self.mode, to = %mode, "capture mode changed");
        }
        self.mode = mode;

        for kind in SourceKind::ALL {
            if !mode.requires(kind) && self.handle(kind).state().is_active() {
                self.handle_mut(kind).stop();
            }
        }

        if self.monitoring && !self.required_ready() {
            self.stop_monitoring();
        }

        let mut first_error = None;
        for &kind in mode.required_kinds() {
            if self.handle(kind).is_ready() {
                continue;
            }
            if let Err(e) = self.start_source(kind).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn start_camera(&mut self) -> Result<()> {
        self.start_source(SourceKind::Camera).await
    }

    pub fn stop_camera(&mut self) {
        self.stop_source(SourceKind::Camera);
    }

    pub async fn start_screen_share(&mut self) -> Result<()> {
        self.start_source(SourceKind::Screen).await
    }

    pub fn stop_screen_share(&mut self) {
        self.stop_source(SourceKind::Screen);
    }

    /// Ready ⇄ Stopped for the camera.
    pub async fn toggle_camera_source(&mut self) -> Result<()> {
        self.toggle_source(SourceKind::Camera).await
    }

    /// Ready ⇄ Stopped for the screen share.
    pub async fn toggle_screen_source(&mut self) -> Result<()> {
        self.toggle_source(SourceKind::Screen).await
    }

    /// (Re)acquire `kind`. Any existing stream is released first.
    pub async fn start_source(&mut self, kind: SourceKind) -> Result<()> {
        self.status = format!("Starting {}...", kind.display_name().to_lowercase());

        let backend = Arc::clone(&self.backend);
        let result = self.handle_mut(kind).start(backend.as_ref()).await;

        match result {
            Ok(()) => {
                self.status = format!("{} ready", kind.display_name());
                Ok(())
            }
            Err(e) => {
                if self.monitoring && self.mode.requires(kind) {
                    self.stop_monitoring();
                }
                self.status = e.to_string();
                Err(e)
            }
        }
    }

    /// Release `kind`, stopping monitoring first if the active mode needs it.
    pub fn stop_source(&mut self, kind: SourceKind) {
        if self.monitoring && self.mode.requires(kind) {
            self.stop_monitoring();
        }
        self.handle_mut(kind).stop();
        self.status = format!("{} stopped", kind.display_name());
    }

    pub async fn toggle_source(&mut self, kind: SourceKind) -> Result<()> {
        if self.handle(kind).is_ready() {
            self.stop_source(kind);
            Ok(())
        } else {
            self.start_source(kind).await
        }
    }

    // ── Monitoring ────────────────────────────────────────────────────────

    /// Enter Monitoring. Rejected with a hint, and no state change, unless
    /// every source the mode requires is Ready. A no-op while already
    /// monitoring.
    pub fn start_monitoring(&mut self) -> Result<()> {
        if self.monitoring {
            return Ok(());
        }
        if !self.required_ready() {
            let err = ProctorError::SourcesNotReady(self.mode);
            self.status = err.to_string();
            tracing::info!(mode = %self.mode, "monitoring rejected; sources not ready");
            return Err(err);
        }

        self.monitoring = true;
        self.epoch += 1;
        self.stats.elapsed_seconds = 0;
        self.status = STATUS_MONITORING_ACTIVE.to_string();
        tracing::info!(
            mode = %self.mode,
            epoch = self.epoch,
            interval_secs = self.tick_interval.as_secs(),
            "monitoring started"
        );
        Ok(())
    }

    /// Leave Monitoring. Idempotent. In-flight requests are not cancelled;
    /// their completions will be discarded.
    pub fn stop_monitoring(&mut self) {
        if !self.monitoring {
            return;
        }
        self.monitoring = false;
        self.epoch += 1;
        self.status = STATUS_MONITORING_STOPPED.to_string();
        tracing::info!(elapsed = self.stats.elapsed_seconds, "monitoring stopped");
    }

    /// Change the tick period. Takes effect at the next timer re-arm.
    pub fn set_tick_interval(&mut self, secs: u64) -> Result<()> {
        if !TICK_INTERVAL_RANGE.contains(&secs) {
            return Err(ProctorError::InvalidTickInterval(secs));
        }
        self.tick_interval = Duration::from_secs(secs);
        tracing::info!(secs, "tick interval updated");
        Ok(())
    }

    /// One second of monitoring has passed.
    pub fn on_elapsed_tick(&mut self) {
        if self.monitoring {
            self.stats.elapsed_seconds += 1;
        }
    }

    /// Take a sample for this tick, or `None` when not monitoring or a
    /// required source has no frame.
    pub fn begin_tick(&mut self) -> Option<PendingAnalysis> {
        if !self.monitoring {
            return None;
        }
        let Some(sample) = self.compositor.sample(self.mode, &self.camera, &self.screen) else {
            tracing::debug!(mode = %self.mode, "no sample this tick");
            return None;
        };

        self.next_seq += 1;
        let ticket = Ticket {
            epoch: self.epoch,
            seq: self.next_seq,
        };
        tracing::debug!(seq = ticket.seq, bytes = sample.encoded_image.len(), "tick sampled");
        Some(PendingAnalysis { ticket, sample })
    }

    /// Fold one detector completion into the session.
    pub fn apply_analysis(
        &mut self,
        ticket: Ticket,
        sample: &Sample,
        result: std::result::Result<Verdict, DetectionError>,
    ) -> AnalysisOutcome {
        if !self.monitoring || ticket.epoch != self.epoch {
            tracing::debug!(seq = ticket.seq, "discarding completion from an earlier run");
            return AnalysisOutcome::Discarded;
        }

        let stale = ticket.seq <= self.latest_applied_seq;
        if !stale {
            self.latest_applied_seq = ticket.seq;
        }

        let verdict = match result {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(seq = ticket.seq, stale, error = %e, "analysis failed");
                if !stale {
                    self.status = match &e {
                        DetectionError::Rejected(message) => format!("Analysis failed: {message}"),
                        _ => STATUS_CONNECTION_ERROR.to_string(),
                    };
                }
                return AnalysisOutcome::Failed { stale };
            }
        };

        let alert = self
            .alerts
            .record_if_qualifying(&verdict, sample, sample.mode)
            .map(|entry| entry.id);

        match (stale, verdict.reported_total_detections) {
            (false, Some(total)) => self.stats.cumulative_detections = total,
            (true, Some(_)) => {}
            (_, None) => {
                if verdict.classify() == VerdictClass::CheatingDetected {
                    self.stats.cumulative_detections += 1;
                }
            }
        }

        if !stale {
            if let Some(eyes) = &verdict.eye_analysis {
                self.stats.last_eye_metrics = Some(eyes.clone());
            }
            self.status = verdict_status_line(&verdict);
        }

        tracing::debug!(
            seq = ticket.seq,
            stale,
            label = %verdict.status_label,
            confidence = verdict.confidence,
            detections = self.stats.cumulative_detections,
            "verdict applied"
        );
        AnalysisOutcome::Applied { alert, stale }
    }

    // ── Alerts ────────────────────────────────────────────────────────────

    /// Empty the alert history and reset the detection counter. Completions
    /// issued before the clear can no longer restore the old count.
    pub fn clear_alerts(&mut self) {
        self.alerts.clear();
        self.stats.cumulative_detections = 0;
        self.latest_applied_seq = self.next_seq;
    }

    pub fn export_alert(&self, id: AlertId) -> Result<ExportedAlert> {
        self.alerts.export(id)
    }

    pub fn alerts(&self) -> &AlertStore {
        &self.alerts
    }

    // ── Source events ─────────────────────────────────────────────────────

    /// React to a notification from one of the source handles.
    pub fn handle_source_event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::StateChanged { kind, state } => {
                tracing::debug!(%kind, ?state, "source state changed");
            }
            SourceEvent::Ended { kind, generation } => {
                if !self.handle_mut(kind).handle_ended(generation) {
                    return;
                }
                if self.monitoring && self.mode.requires(kind) {
                    self.stop_monitoring();
                }
                self.status = ProctorError::SourceEndedExternally(kind).to_string();
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────

    pub fn phase(&self) -> SessionPhase {
        if self.monitoring {
            SessionPhase::Monitoring
        } else if self.camera.state().is_active() || self.screen.state().is_active() {
            SessionPhase::SourcesPending
        } else {
            SessionPhase::Idle
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn source_state(&self, kind: SourceKind) -> SourceState {
        self.handle(kind).state()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase(),
            mode: self.mode,
            status: self.status.clone(),
            stats: self.stats.clone(),
            elapsed_display: format_elapsed(self.stats.elapsed_seconds),
            camera: self.camera.state(),
            screen: self.screen.state(),
            monitoring: self.monitoring,
            tick_interval_secs: self.tick_interval.as_secs(),
            alert_count: self.alerts.len(),
            recent_alerts: self
                .alerts
                .recent(RECENT_ALERTS_LIMIT)
                .into_iter()
                .map(AlertSummary::from)
                .collect(),
            alert_stats: self.alerts.stats(),
        }
    }

    /// Stop monitoring and release both sources.
    pub fn shutdown(&mut self) {
        self.stop_monitoring();
        for kind in SourceKind::ALL {
            if self.handle(kind).state().is_active() {
                self.handle_mut(kind).stop();
            }
        }
        tracing::info!("session controller shut down");
    }

    // ── Private helpers ───────────────────────────────────────────────────

    fn handle(&self, kind: SourceKind) -> &SourceHandle {
        match kind {
            SourceKind::Camera => &self.camera,
            SourceKind::Screen => &self.screen,
        }
    }

    fn handle_mut(&mut self, kind: SourceKind) -> &mut SourceHandle {
        match kind {
            SourceKind::Camera => &mut self.camera,
            SourceKind::Screen => &mut self.screen,
        }
    }

    fn required_ready(&self) -> bool {
        self.mode
            .required_kinds()
            .iter()
            .all(|&kind| self.handle(kind).is_ready())
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("mode", &self.mode)
            .field("camera", &self.camera)
            .field("screen", &self.screen)
            .field("monitoring", &self.monitoring)
            .field("epoch", &self.epoch)
            .field("alerts", &self.alerts.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
