//! In-memory alert history for one monitoring session.
//!
//! [`AlertStore`] keeps every qualifying verdict in arrival order for the
//! lifetime of the session (until [`AlertStore::clear`]), and offers a capped
//! most-recent-first view for presentation.

use chrono::Utc;

use crate::error::{ProctorError, Result};
use crate::formatting::export_file_name;
use crate::models::{AlertEntry, AlertId, CaptureMode, EyeAnalysis, Sample, Severity, Verdict};

/// Number of alerts shown in the recent-alerts view.
pub const RECENT_ALERTS_LIMIT: usize = 5;

// ── Derived statistics ────────────────────────────────────────────────────────

/// Counts and last-seen metrics computed over the retained alerts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertStats {
    pub total: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    /// Eye metrics attached to the newest alert that carried any.
    pub last_eye_metrics: Option<EyeAnalysis>,
}

/// An alert image ready to be written out.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedAlert {
    pub id: AlertId,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

// ── AlertStore ────────────────────────────────────────────────────────────────

/// Ordered, append-only alert history.
#[derive(Debug)]
pub struct AlertStore {
    entries: Vec<AlertEntry>,
    /// Next id to hand out. Not reset by `clear`, so ids stay unique for the
    /// lifetime of the store.
    next_id: u64,
}

impl AlertStore {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    /// Append an alert for `verdict` when its label is "Suspicious" or
    /// "Cheating Detected". Returns the new entry, or `None` for any other
    /// label.
    pub fn record_if_qualifying(
        &mut self,
        verdict: &Verdict,
        sample: &Sample,
        mode: CaptureMode,
    ) -> Option<&AlertEntry> {
        if !verdict.is_qualifying() {
            return None;
        }

        let id = AlertId(self.next_id);
        self.next_id += 1;

        let entry = AlertEntry {
            id,
            image: sample.encoded_image.clone(),
            timestamp: Utc::now(),
            severity: Severity::from_confidence(verdict.confidence),
            source_mode: mode,
            status_label: verdict.status_label.clone(),
            confidence: verdict.confidence,
            faces_count: verdict.faces_count,
            duration_ms: verdict.duration_ms,
            details: verdict.details.clone(),
            eye_analysis: verdict.eye_analysis.clone(),
        };

        tracing::info!(
            alert_id = %id,
            severity = %entry.severity,
            confidence = entry.confidence,
            label = %entry.status_label,
            "alert recorded"
        );

        self.entries.push(entry);
        self.entries.last()
    }

    /// Remove every alert.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            tracing::info!(count = self.entries.len(), "alerts cleared");
        }
        self.entries.clear();
    }

    /// Up to `n` alerts, most recent first.
    pub fn recent(&self, n: usize) -> Vec<&AlertEntry> {
        self.entries.iter().rev().take(n).collect()
    }

    /// Full history in arrival order.
    pub fn all(&self) -> &[AlertEntry] {
        &self.entries
    }

    pub fn get(&self, id: AlertId) -> Option<&AlertEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Severity counts and the newest eye metrics.
    pub fn stats(&self) -> AlertStats {
        let mut stats = AlertStats {
            total: self.entries.len(),
            ..Default::default()
        };
        for entry in &self.entries {
            match entry.severity {
                Severity::High => stats.high += 1,
                Severity::Medium => stats.medium += 1,
                Severity::Low => stats.low += 1,
            }
        }
        stats.last_eye_metrics = self
            .entries
            .iter()
            .rev()
            .find_map(|e| e.eye_analysis.clone());
        stats
    }

    /// Package the image of alert `id` for download.
    pub fn export(&self, id: AlertId) -> Result<ExportedAlert> {
        let entry = self.get(id).ok_or(ProctorError::AlertNotFound(id))?;
        Ok(ExportedAlert {
            id,
            file_name: export_file_name(entry.timestamp, id),
            bytes: entry.image.clone(),
        })
    }
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
