use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use serde::{Deserialize, Serialize};

use crate::models::CaptureMode;

/// Default detection service base URL.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:5000";

/// Camera and screen monitoring client for a remote face/eye detection service
#[derive(Parser, Debug, Clone)]
#[command(
    name = "proctor-monitor",
    about = "Camera and screen monitoring client for a remote face/eye detection service",
    version
)]
pub struct Settings {
    /// Capture mode
    #[arg(long, default_value = "camera", value_parser = ["camera", "webcam", "screen", "both"])]
    pub mode: String,

    /// Seconds between samples (1-10)
    #[arg(long, default_value = "2", value_parser = clap::value_parser!(u64).range(1..=10))]
    pub interval: u64,

    /// Detection service base URL
    #[arg(long, env = "PROCTOR_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Per-request timeout for the detection service, in seconds
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..=120))]
    pub request_timeout: u64,

    /// Image file served as the camera source
    #[arg(long)]
    pub camera_image: Option<PathBuf>,

    /// Image file served as the screen-share source
    #[arg(long)]
    pub screen_image: Option<PathBuf>,

    /// Acquire sources and start monitoring immediately
    #[arg(long)]
    pub autostart: bool,

    /// Directory exported alert images are written to
    #[arg(long)]
    pub export_dir: Option<PathBuf>,

    /// Do not reset the service's session counter when alerts are cleared
    #[arg(long)]
    pub no_remote_reset: bool,

    /// Verbosity of the session log
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Append log output to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Shorthand for --log-level DEBUG
    #[arg(long)]
    pub debug: bool,

    /// Forget the remembered mode, interval and endpoint
    #[arg(long)]
    pub clear: bool,
}

/// Mode, interval and endpoint remembered between runs in
/// `~/.proctor-monitor/last_used.json`.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct LastUsedParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

const LAST_USED_FILE: &str = "last_used.json";

impl LastUsedParams {
    pub fn config_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::config_path_in(&home)
    }

    pub fn config_path_in(home: &Path) -> PathBuf {
        home.join(".proctor-monitor").join(LAST_USED_FILE)
    }

    /// Missing or unreadable files yield empty params.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::debug!(path = %path.display(), error = %e, "ignoring corrupt last-used file");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Write through a sibling temp file so a crash never leaves half a file.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let body = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        let staging = path.with_extension("json.tmp");
        std::fs::write(&staging, body)?;
        std::fs::rename(&staging, path)
    }

    pub fn clear_at(path: &Path) -> std::io::Result<()> {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Fill in every field the user did not pass on the command line.
    /// Remembered values that no longer validate are skipped.
    fn merge_into(self, settings: &mut Settings, matches: &ArgMatches) {
        let from_cli = |id: &str| matches.value_source(id) == Some(ValueSource::CommandLine);

        if let Some(mode) = self.mode.filter(|m| m.parse::<CaptureMode>().is_ok()) {
            if !from_cli("mode") {
                settings.mode = mode;
            }
        }
        if let Some(interval) = self.interval.filter(|i| (1..=10).contains(i)) {
            if !from_cli("interval") {
                settings.interval = interval;
            }
        }
        if let Some(endpoint) = self.endpoint {
            if !from_cli("endpoint") {
                settings.endpoint = endpoint;
            }
        }
    }
}

impl From<&Settings> for LastUsedParams {
    fn from(s: &Settings) -> Self {
        Self {
            mode: Some(s.capture_mode().to_string()),
            interval: Some(s.interval),
            endpoint: Some(s.endpoint.clone()),
        }
    }
}

impl Settings {
    /// Parse the process arguments against `~/.proctor-monitor/last_used.json`.
    pub fn load_with_last_used() -> Self {
        Self::load_with_last_used_impl(
            std::env::args_os().collect(),
            &LastUsedParams::config_path(),
        )
    }

    /// Parse `args`, back-fill from the file at `config_path`, then write the
    /// effective values back. `--clear` deletes the file and persists nothing.
    pub fn load_with_last_used_impl(args: Vec<OsString>, config_path: &Path) -> Self {
        let matches = Settings::command().get_matches_from(args);
        let mut settings = match Settings::from_arg_matches(&matches) {
            Ok(settings) => settings,
            Err(e) => e.exit(),
        };

        if settings.clear {
            if let Err(e) = LastUsedParams::clear_at(config_path) {
                tracing::warn!(error = %e, "failed to clear saved configuration");
            }
        } else {
            LastUsedParams::load_from(config_path).merge_into(&mut settings, &matches);
            if let Err(e) = LastUsedParams::from(&settings).save_to(config_path) {
                tracing::debug!(error = %e, "could not persist last-used parameters");
            }
        }

        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }

    /// Parsed capture mode. The CLI value parser restricts the string, so the
    /// fallback only applies to hand-built settings.
    pub fn capture_mode(&self) -> CaptureMode {
        self.mode.parse().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    /// Temp home with `last_used.json` pre-populated.
    fn seeded(mode: &str, interval: u64) -> (TempDir, PathBuf) {
        let home = TempDir::new().unwrap();
        let path = LastUsedParams::config_path_in(home.path());
        LastUsedParams {
            mode: Some(mode.to_string()),
            interval: Some(interval),
            endpoint: None,
        }
        .save_to(&path)
        .unwrap();
        (home, path)
    }

    #[test]
    fn test_defaults() {
        let s = Settings::parse_from(["proctor-monitor"]);

        assert_eq!(s.mode, "camera");
        assert_eq!(s.capture_mode(), CaptureMode::Camera);
        assert_eq!((s.interval, s.request_timeout), (2, 10));
        assert_eq!(s.camera_image, None);
        assert_eq!(s.screen_image, None);
        assert!(!s.autostart && !s.no_remote_reset && !s.debug && !s.clear);
        assert_eq!(s.log_level, "INFO");
    }

    #[test]
    fn test_interval_range_enforced() {
        assert!(Settings::try_parse_from(["proctor-monitor", "--interval", "0"]).is_err());
        assert!(Settings::try_parse_from(["proctor-monitor", "--interval", "11"]).is_err());
        let s = Settings::try_parse_from(["proctor-monitor", "--interval", "10"]).unwrap();
        assert_eq!(s.interval, 10);
    }

    #[test]
    fn test_mode_alias() {
        let s = Settings::parse_from(["proctor-monitor", "--mode", "webcam"]);
        assert_eq!(s.capture_mode(), CaptureMode::Camera);
        let s = Settings::parse_from(["proctor-monitor", "--mode", "both"]);
        assert_eq!(s.capture_mode(), CaptureMode::Both);
    }

    #[test]
    fn test_params_file_round_trip() {
        let home = TempDir::new().unwrap();
        let path = LastUsedParams::config_path_in(home.path());
        let params = LastUsedParams {
            mode: Some("both".to_string()),
            interval: Some(5),
            endpoint: Some("http://10.0.0.2:5000".to_string()),
        };
        params.save_to(&path).unwrap();

        assert_eq!(LastUsedParams::load_from(&path), params);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_or_corrupt_file_is_empty() {
        let home = TempDir::new().unwrap();
        let path = LastUsedParams::config_path_in(home.path());
        assert_eq!(LastUsedParams::load_from(&path), LastUsedParams::default());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(LastUsedParams::load_from(&path), LastUsedParams::default());
    }

    #[test]
    fn test_remembered_values_fill_gaps() {
        let (_home, path) = seeded("screen", 7);

        let s = Settings::load_with_last_used_impl(args(&["proctor-monitor"]), &path);

        assert_eq!(s.capture_mode(), CaptureMode::Screen);
        assert_eq!(s.interval, 7);
        assert_eq!(s.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_command_line_beats_remembered_values() {
        let (_home, path) = seeded("screen", 7);

        let s = Settings::load_with_last_used_impl(
            args(&["proctor-monitor", "--mode", "both", "--interval", "3"]),
            &path,
        );
        assert_eq!(s.capture_mode(), CaptureMode::Both);
        assert_eq!(s.interval, 3);

        let saved = LastUsedParams::load_from(&path);
        assert_eq!(saved.mode.as_deref(), Some("both"));
        assert_eq!(saved.interval, Some(3));
        assert_eq!(saved.endpoint.as_deref(), Some(DEFAULT_ENDPOINT));
    }

    #[test]
    fn test_out_of_range_remembered_values_skipped() {
        let (_home, path) = seeded("hologram", 99);

        let s = Settings::load_with_last_used_impl(args(&["proctor-monitor"]), &path);

        assert_eq!(s.capture_mode(), CaptureMode::Camera);
        assert_eq!(s.interval, 2);
    }

    #[test]
    fn test_clear_deletes_file_without_rewriting() {
        let (_home, path) = seeded("both", 4);

        let s = Settings::load_with_last_used_impl(args(&["proctor-monitor", "--clear"]), &path);

        assert!(s.clear);
        assert_eq!(s.capture_mode(), CaptureMode::Camera);
        assert!(!path.exists());
    }

    #[test]
    fn test_clear_without_file_is_fine() {
        let home = TempDir::new().unwrap();
        let path = LastUsedParams::config_path_in(home.path());
        assert!(LastUsedParams::clear_at(&path).is_ok());
    }

    #[test]
    fn test_debug_flag_forces_debug_level() {
        let home = TempDir::new().unwrap();
        let path = LastUsedParams::config_path_in(home.path());

        let s = Settings::load_with_last_used_impl(
            args(&["proctor-monitor", "--log-level", "ERROR", "--debug"]),
            &path,
        );

        assert_eq!(s.log_level, "DEBUG");
    }
}
