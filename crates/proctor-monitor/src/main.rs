mod bootstrap;
mod console;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use proctor_capture::{CaptureBackend, StillImageBackend};
use proctor_core::formatting::format_elapsed;
use proctor_core::models::{SourceKind, SourceState};
use proctor_core::settings::Settings;
use proctor_runtime::{
    DetectionClient, Detector, SessionController, SessionHandle, SessionOrchestrator,
    SessionSnapshot,
};
use tokio::sync::{mpsc, watch};

use crate::console::{ConsoleCommand, SourceAction, HELP};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load_with_last_used();

    let app_dir = bootstrap::ensure_directories()?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_ref())?;

    tracing::info!("Proctor Monitor v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Mode: {}, Interval: {}s, Endpoint: {}",
        settings.capture_mode(),
        settings.interval,
        settings.endpoint
    );

    let backend = Arc::new(build_backend(&settings));
    let client = DetectionClient::new(
        settings.endpoint.clone(),
        Duration::from_secs(settings.request_timeout),
    )?;

    match client.health().await {
        Ok(health) => tracing::info!(
            status = %health.status,
            opencv = health.opencv_version.as_deref().unwrap_or("unknown"),
            face_cascade = health.face_cascade_loaded,
            eye_cascade = health.eye_cascade_loaded,
            "detection service reachable"
        ),
        Err(e) => tracing::warn!(error = %e, "detection service health check failed"),
    }

    let (controller, source_events) =
        SessionController::new(Arc::clone(&backend) as Arc<dyn CaptureBackend>);
    let detector: Arc<dyn Detector> = Arc::new(client);
    let (session, snapshots, task) = SessionOrchestrator::new(controller, source_events, detector)
        .with_remote_reset(!settings.no_remote_reset)
        .start();

    let status_logger = tokio::spawn(log_status_changes(snapshots.clone()));

    session.set_tick_interval(settings.interval).await?;
    if let Err(e) = session.set_capture_mode(settings.capture_mode()).await {
        tracing::warn!(error = %e, "could not acquire sources for {}", settings.capture_mode());
    }
    if settings.autostart {
        if let Err(e) = session.start_monitoring().await {
            tracing::warn!(error = %e, "autostart failed");
        }
    }

    let export_dir = settings
        .export_dir
        .clone()
        .unwrap_or_else(|| bootstrap::default_export_dir(&app_dir));

    let console = Console {
        session: session.clone(),
        snapshots,
        backend,
        export_dir,
    };

    tokio::select! {
        _ = console.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received; shutting down session");
        }
    }

    if let Err(e) = session.shutdown().await {
        tracing::debug!(error = %e, "session already stopped");
    }
    task.join().await;
    status_logger.abort();

    Ok(())
}

/// Build the capture backend from `--camera-image` / `--screen-image`.
fn build_backend(settings: &Settings) -> StillImageBackend {
    let mut backend = StillImageBackend::new();
    if let Some(path) = &settings.camera_image {
        backend = backend.with_source(SourceKind::Camera, path);
    }
    if let Some(path) = &settings.screen_image {
        backend = backend.with_source(SourceKind::Screen, path);
    }
    for kind in SourceKind::ALL {
        if !backend.has_source(kind) {
            tracing::debug!(%kind, "no image configured; acquisition will be denied");
        }
    }
    backend
}

/// Log status text changes and new alerts until the session ends.
async fn log_status_changes(mut snapshots: watch::Receiver<SessionSnapshot>) {
    let mut last_status = String::new();
    let mut last_alerts = 0usize;

    while snapshots.changed().await.is_ok() {
        let snap = snapshots.borrow_and_update().clone();

        if snap.status != last_status && !snap.status.is_empty() {
            tracing::info!(status = %snap.status, "session status");
            last_status = snap.status.clone();
        }
        if snap.alert_count > last_alerts {
            if let Some(alert) = snap.recent_alerts.first() {
                tracing::warn!(
                    alert_id = %alert.id,
                    severity = %alert.severity,
                    confidence = alert.confidence,
                    label = %alert.status_label,
                    "new alert"
                );
            }
        }
        last_alerts = snap.alert_count;
    }
}

// ── Console ───────────────────────────────────────────────────────────────────

struct Console {
    session: SessionHandle,
    snapshots: watch::Receiver<SessionSnapshot>,
    backend: Arc<StillImageBackend>,
    export_dir: PathBuf,
}

impl Console {
    /// Read commands from stdin until `quit` or end of input.
    async fn run(&self) {
        println!("{HELP}");
        let mut lines = spawn_stdin_reader();

        while let Some(line) = lines.recv().await {
            match console::parse_command(&line) {
                Ok(None) => {}
                Ok(Some(ConsoleCommand::Quit)) => break,
                Ok(Some(cmd)) => {
                    if let Err(e) = self.execute(cmd).await {
                        println!("error: {e}");
                    }
                }
                Err(message) => println!("{message}"),
            }
        }
    }

    async fn execute(&self, cmd: ConsoleCommand) -> Result<()> {
        match cmd {
            ConsoleCommand::Mode(mode) => self.session.set_capture_mode(mode).await?,
            ConsoleCommand::Source(kind, action) => self.source(kind, action).await?,
            ConsoleCommand::Revoke(kind) => {
                if !self.backend.revoke(kind) {
                    println!("{} is not running", kind.display_name());
                }
            }
            ConsoleCommand::Start => self.session.start_monitoring().await?,
            ConsoleCommand::Stop => self.session.stop_monitoring().await?,
            ConsoleCommand::Clear => self.session.clear_alerts().await?,
            ConsoleCommand::Export(id) => {
                let exported = self.session.export_alert(id).await?;
                let path = write_export(&self.export_dir, &exported.file_name, &exported.bytes).await?;
                println!("saved {}", path.display());
            }
            ConsoleCommand::Interval(secs) => self.session.set_tick_interval(secs).await?,
            ConsoleCommand::Status => print_status(&self.snapshots.borrow()),
            ConsoleCommand::Alerts => print_alerts(&self.snapshots.borrow()),
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => {}
        }
        Ok(())
    }

    async fn source(&self, kind: SourceKind, action: SourceAction) -> proctor_core::Result<()> {
        match (kind, action) {
            (SourceKind::Camera, SourceAction::On) => self.session.start_camera().await,
            (SourceKind::Camera, SourceAction::Off) => self.session.stop_camera().await,
            (SourceKind::Camera, SourceAction::Toggle) => self.session.toggle_camera_source().await,
            (SourceKind::Screen, SourceAction::On) => self.session.start_screen_share().await,
            (SourceKind::Screen, SourceAction::Off) => self.session.stop_screen_share().await,
            (SourceKind::Screen, SourceAction::Toggle) => self.session.toggle_screen_source().await,
        }
    }
}

/// Stdin is read on a plain thread so a pending read never holds up runtime
/// shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });
    rx
}

async fn write_export(dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

fn source_label(state: SourceState) -> &'static str {
    match state {
        SourceState::Idle => "off",
        SourceState::Starting => "starting",
        SourceState::Ready => "on",
        SourceState::Stopped => "stopped",
        SourceState::Errored => "error",
    }
}

fn print_status(snap: &SessionSnapshot) {
    println!(
        "phase: {:?}  mode: {}  camera: {}  screen: {}  interval: {}s",
        snap.phase,
        snap.mode,
        source_label(snap.camera),
        source_label(snap.screen),
        snap.tick_interval_secs
    );
    println!(
        "elapsed: {}  detections: {}  alerts: {} (high {}, medium {})",
        format_elapsed(snap.stats.elapsed_seconds),
        snap.stats.cumulative_detections,
        snap.alert_count,
        snap.alert_stats.high,
        snap.alert_stats.medium
    );
    if let Some(eyes) = &snap.stats.last_eye_metrics {
        println!(
            "eyes: detected={} count={} ratio={:.3}",
            eyes.eyes_detected, eyes.eyes_count, eyes.eye_ratio
        );
    }
    if !snap.status.is_empty() {
        println!("status: {}", snap.status);
    }
}

fn print_alerts(snap: &SessionSnapshot) {
    if snap.recent_alerts.is_empty() {
        println!("no alerts");
        return;
    }
    for alert in &snap.recent_alerts {
        println!(
            "#{:<4} {}  {:<6}  {:<18}  {:>5.1}%  faces={}  mode={}",
            alert.id,
            alert
                .timestamp
                .with_timezone(&chrono::Local)
                .format("%H:%M:%S"),
            alert.severity,
            alert.status_label,
            alert.confidence,
            alert.faces_count,
            alert.source_mode
        );
    }
    if snap.alert_count > snap.recent_alerts.len() {
        println!("({} older alerts retained)", snap.alert_count - snap.recent_alerts.len());
    }
}
