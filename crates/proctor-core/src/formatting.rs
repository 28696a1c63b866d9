//! Small text helpers shared by the controller and front-ends.

use chrono::{DateTime, Utc};

use crate::models::{AlertId, Verdict};

/// Format elapsed monitoring time as `MM:SS`.
///
/// Minutes are not wrapped into hours.
///
/// # Examples
///
/// ```
/// use proctor_core::formatting::format_elapsed;
///
/// assert_eq!(format_elapsed(0), "00:00");
/// assert_eq!(format_elapsed(75), "01:15");
/// assert_eq!(format_elapsed(6000), "100:00");
/// ```
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Status line for a successful verdict: the label, followed by the first eye
/// observation when the service sent one.
///
/// ```
/// use proctor_core::formatting::verdict_status_line;
/// use proctor_core::models::{EyeAnalysis, Verdict};
///
/// let mut v = Verdict {
///     status_label: "Suspicious".into(),
///     confidence: 60.0,
///     faces_count: 1,
///     duration_ms: 0.0,
///     details: vec![],
///     eye_analysis: None,
///     reported_total_detections: None,
/// };
/// assert_eq!(verdict_status_line(&v), "Suspicious");
///
/// v.eye_analysis = Some(EyeAnalysis {
///     eyes_detected: true,
///     eyes_count: 1,
///     eye_ratio: 0.01,
///     details: vec!["Only one eye detected".into()],
/// });
/// assert_eq!(verdict_status_line(&v), "Suspicious | Eyes: Only one eye detected");
/// ```
pub fn verdict_status_line(verdict: &Verdict) -> String {
    let first_eye_detail = verdict
        .eye_analysis
        .as_ref()
        .and_then(|eyes| eyes.details.first());

    match first_eye_detail {
        Some(detail) => format!("{} | Eyes: {}", verdict.status_label, detail),
        None => verdict.status_label.clone(),
    }
}

/// File name used when exporting an alert image.
pub fn export_file_name(timestamp: DateTime<Utc>, id: AlertId) -> String {
    format!("detection_{}_{}.jpg", timestamp.format("%Y%m%d_%H%M%S"), id)
}
