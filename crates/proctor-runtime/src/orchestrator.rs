//! Async session orchestrator.
//!
//! Runs a [`SessionController`] inside one tokio task. Commands arrive over an
//! `mpsc` channel from [`SessionHandle`], detector calls run as spawned tasks
//! whose completions come back on a second channel, and the elapsed and tick
//! timers are owned by the loop itself. Every processed event is followed by a
//! fresh [`SessionSnapshot`] on a `watch` channel, so presentation code never
//! touches the controller directly.

use std::sync::Arc;
use std::time::Duration;

use proctor_capture::SourceEvent;
use proctor_core::alerts::ExportedAlert;
use proctor_core::models::{AlertId, CaptureMode, SourceKind, Verdict};
use proctor_core::{ProctorError, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::controller::{PendingAnalysis, SessionController, SessionSnapshot};
use crate::detection_client::{DetectionError, Detector};

const ELAPSED_PERIOD: Duration = Duration::from_secs(1);

// ── Commands ──────────────────────────────────────────────────────────────────

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    SetCaptureMode(CaptureMode, Reply<()>),
    StartSource(SourceKind, Reply<()>),
    StopSource(SourceKind, Reply<()>),
    ToggleSource(SourceKind, Reply<()>),
    StartMonitoring(Reply<()>),
    StopMonitoring(Reply<()>),
    ClearAlerts(Reply<()>),
    ExportAlert(AlertId, Reply<ExportedAlert>),
    SetTickInterval(u64, Reply<()>),
    Shutdown(Reply<()>),
}

/// A finished detector call.
struct Completion {
    pending: PendingAnalysis,
    result: std::result::Result<Verdict, DetectionError>,
}

// ── SessionOrchestrator ───────────────────────────────────────────────────────

/// Owns the controller until [`SessionOrchestrator::start`] moves it into the
/// session task.
pub struct SessionOrchestrator {
    controller: SessionController,
    source_events: mpsc::UnboundedReceiver<SourceEvent>,
    detector: Arc<dyn Detector>,
    /// Ask the service to reset its counters when alerts are cleared.
    remote_reset: bool,
}

impl SessionOrchestrator {
    /// `source_events` is the receiver returned by [`SessionController::new`].
    pub fn new(
        controller: SessionController,
        source_events: mpsc::UnboundedReceiver<SourceEvent>,
        detector: Arc<dyn Detector>,
    ) -> Self {
        Self {
            controller,
            source_events,
            detector,
            remote_reset: true,
        }
    }

    pub fn with_remote_reset(mut self, enabled: bool) -> Self {
        self.remote_reset = enabled;
        self
    }

    /// Spawn the session loop.
    ///
    /// Returns the command handle, a receiver for snapshots, and a
    /// [`MonitoringHandle`] for the task itself.
    pub fn start(self) -> (SessionHandle, watch::Receiver<SessionSnapshot>, MonitoringHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (snap_tx, snap_rx) = watch::channel(self.controller.snapshot());

        let handle = tokio::spawn(self.session_loop(cmd_rx, snap_tx));

        (
            SessionHandle { tx: cmd_tx },
            snap_rx,
            MonitoringHandle { handle },
        )
    }

    // ── Private implementation ────────────────────────────────────────────

    /// Exits on `Shutdown` or when every [`SessionHandle`] is dropped.
    async fn session_loop(
        self,
        mut commands: mpsc::Receiver<Command>,
        snapshots: watch::Sender<SessionSnapshot>,
    ) {
        let Self {
            mut controller,
            mut source_events,
            detector,
            remote_reset,
        } = self;
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
        let mut timers = Timers::default();

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown(reply)) => {
                        controller.shutdown();
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(cmd) => {
                        handle_command(&mut controller, cmd, &detector, remote_reset).await;
                    }
                    None => {
                        tracing::debug!("all session handles dropped; exiting loop");
                        controller.shutdown();
                        break;
                    }
                },
                Some(event) = source_events.recv() => {
                    controller.handle_source_event(event);
                }
                Some(done) = done_rx.recv() => {
                    let outcome = controller.apply_analysis(
                        done.pending.ticket,
                        &done.pending.sample,
                        done.result,
                    );
                    tracing::debug!(seq = done.pending.ticket.seq, ?outcome, "completion handled");
                }
                _ = next_tick(&mut timers.tick) => {
                    if let Some(pending) = controller.begin_tick() {
                        spawn_analysis(Arc::clone(&detector), pending, done_tx.clone());
                    }
                }
                _ = next_tick(&mut timers.elapsed) => {
                    controller.on_elapsed_tick();
                }
            }

            timers.sync(&controller);
            snapshots.send_replace(controller.snapshot());
        }

        snapshots.send_replace(controller.snapshot());
    }
}

async fn handle_command(
    controller: &mut SessionController,
    cmd: Command,
    detector: &Arc<dyn Detector>,
    remote_reset: bool,
) {
    // A dropped reply receiver only means the caller stopped waiting.
    match cmd {
        Command::SetCaptureMode(mode, reply) => {
            let _ = reply.send(controller.set_capture_mode(mode).await);
        }
        Command::StartSource(kind, reply) => {
            let _ = reply.send(controller.start_source(kind).await);
        }
        Command::StopSource(kind, reply) => {
            controller.stop_source(kind);
            let _ = reply.send(Ok(()));
        }
        Command::ToggleSource(kind, reply) => {
            let _ = reply.send(controller.toggle_source(kind).await);
        }
        Command::StartMonitoring(reply) => {
            let _ = reply.send(controller.start_monitoring());
        }
        Command::StopMonitoring(reply) => {
            controller.stop_monitoring();
            let _ = reply.send(Ok(()));
        }
        Command::ClearAlerts(reply) => {
            controller.clear_alerts();
            if remote_reset {
                spawn_remote_reset(Arc::clone(detector));
            }
            let _ = reply.send(Ok(()));
        }
        Command::ExportAlert(id, reply) => {
            let _ = reply.send(controller.export_alert(id));
        }
        Command::SetTickInterval(secs, reply) => {
            let _ = reply.send(controller.set_tick_interval(secs));
        }
        Command::Shutdown(reply) => {
            let _ = reply.send(Ok(()));
        }
    }
}

fn spawn_analysis(
    detector: Arc<dyn Detector>,
    pending: PendingAnalysis,
    done: mpsc::UnboundedSender<Completion>,
) {
    tokio::spawn(async move {
        let result = detector.analyze(&pending.sample).await;
        if done.send(Completion { pending, result }).is_err() {
            tracing::debug!("session loop gone; dropping completion");
        }
    });
}

fn spawn_remote_reset(detector: Arc<dyn Detector>) {
    tokio::spawn(async move {
        match detector.reset().await {
            Ok(()) => tracing::info!("remote detection counters reset"),
            Err(e) => tracing::warn!(error = %e, "remote reset failed"),
        }
    });
}

// ── Timers ────────────────────────────────────────────────────────────────────

/// The two periodic actions. Both exist only while monitoring.
#[derive(Default)]
struct Timers {
    tick: Option<Interval>,
    elapsed: Option<Interval>,
    tick_period: Duration,
    /// Controller epoch the timers were armed for.
    epoch: u64,
}

impl Timers {
    /// Arm, re-arm or cancel to match the controller.
    fn sync(&mut self, controller: &SessionController) {
        if !controller.is_monitoring() {
            if self.tick.take().is_some() {
                tracing::debug!("timers cancelled");
            }
            self.elapsed = None;
            return;
        }

        let restarted = self.epoch != controller.epoch();
        let period = controller.tick_interval();

        if restarted || self.elapsed.is_none() {
            self.elapsed = Some(time::interval_at(Instant::now() + ELAPSED_PERIOD, ELAPSED_PERIOD));
        }
        if restarted || self.tick.is_none() || self.tick_period != period {
            let mut tick = time::interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.tick = Some(tick);
            self.tick_period = period;
            tracing::debug!(period_secs = period.as_secs(), "tick timer armed");
        }
        self.epoch = controller.epoch();
    }
}

/// Next tick of `interval`, or never when it is unset.
async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

// ── SessionHandle ─────────────────────────────────────────────────────────────

/// Cloneable command endpoint for a running session.
///
/// Every method waits for the loop to process the command. Once the loop has
/// exited they return [`ProctorError::RuntimeStopped`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    pub async fn set_capture_mode(&self, mode: CaptureMode) -> Result<()> {
        self.request(|reply| Command::SetCaptureMode(mode, reply)).await
    }

    pub async fn start_camera(&self) -> Result<()> {
        self.request(|reply| Command::StartSource(SourceKind::Camera, reply)).await
    }

    pub async fn stop_camera(&self) -> Result<()> {
        self.request(|reply| Command::StopSource(SourceKind::Camera, reply)).await
    }

    pub async fn start_screen_share(&self) -> Result<()> {
        self.request(|reply| Command::StartSource(SourceKind::Screen, reply)).await
    }

    pub async fn stop_screen_share(&self) -> Result<()> {
        self.request(|reply| Command::StopSource(SourceKind::Screen, reply)).await
    }

    pub async fn toggle_camera_source(&self) -> Result<()> {
        self.request(|reply| Command::ToggleSource(SourceKind::Camera, reply)).await
    }

    pub async fn toggle_screen_source(&self) -> Result<()> {
        self.request(|reply| Command::ToggleSource(SourceKind::Screen, reply)).await
    }

    pub async fn start_monitoring(&self) -> Result<()> {
        self.request(Command::StartMonitoring).await
    }

    pub async fn stop_monitoring(&self) -> Result<()> {
        self.request(Command::StopMonitoring).await
    }

    pub async fn clear_alerts(&self) -> Result<()> {
        self.request(Command::ClearAlerts).await
    }

    pub async fn export_alert(&self, id: AlertId) -> Result<ExportedAlert> {
        self.request(|reply| Command::ExportAlert(id, reply)).await
    }

    pub async fn set_tick_interval(&self, secs: u64) -> Result<()> {
        self.request(|reply| Command::SetTickInterval(secs, reply)).await
    }

    /// Stop monitoring, release both sources and end the loop.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| ProctorError::RuntimeStopped)?;
        reply_rx.await.map_err(|_| ProctorError::RuntimeStopped)?
    }
}

// ── MonitoringHandle ──────────────────────────────────────────────────────────

/// A handle to the background session task.
pub struct MonitoringHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl MonitoringHandle {
    /// Immediately abort the session loop.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the loop to exit on its own.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                tracing::warn!(error = %e, "session task failed");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
