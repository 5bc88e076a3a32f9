use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;

use crate::report::domain::detection_event::{format_timestamp, DetectionEvent};
use crate::shared::error::DetectionError;

/// Tabular layouts a detection report can be exported in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReportFormat {
    #[default]
    Csv,
    Json,
    /// Numbered, human-readable blocks.
    Text,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Json => "json",
            ReportFormat::Text => "txt",
        }
    }

    /// Renders `events`, which must already be in report order.
    pub fn render(&self, events: &[DetectionEvent]) -> Result<String, DetectionError> {
        match self {
            ReportFormat::Csv => Ok(render_csv(events)),
            ReportFormat::Json => render_json(events),
            ReportFormat::Text => Ok(render_text(events)),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Csv => write!(f, "csv"),
            ReportFormat::Json => write!(f, "json"),
            ReportFormat::Text => write!(f, "text"),
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ReportFormat::Csv),
            "json" => Ok(ReportFormat::Json),
            "text" | "txt" => Ok(ReportFormat::Text),
            other => Err(format!("unknown report format '{other}' (csv, json, text)")),
        }
    }
}

#[derive(Serialize)]
struct ReportRow<'a> {
    event_id: u64,
    subject: &'a str,
    timestamp: String,
    timestamp_seconds: f64,
    first_frame: usize,
    last_frame: usize,
    confidence: f64,
    mask_detected: bool,
    mask_confidence: f64,
    saved_image_path: Option<String>,
    clip_path: Option<String>,
}

impl<'a> From<&'a DetectionEvent> for ReportRow<'a> {
    fn from(event: &'a DetectionEvent) -> Self {
        Self {
            event_id: event.event_id,
            subject: &event.subject_id,
            timestamp: format_timestamp(event.timestamp),
            timestamp_seconds: event.timestamp.as_secs_f64(),
            first_frame: event.first_frame_index,
            last_frame: event.last_frame_index,
            confidence: event.confidence,
            mask_detected: event.mask_detected,
            mask_confidence: event.mask_confidence,
            saved_image_path: event
                .saved_face_image_path
                .as_ref()
                .map(|p| p.display().to_string()),
            clip_path: event.clip_path.as_ref().map(|p| p.display().to_string()),
        }
    }
}

const CSV_HEADER: &str = "event_id,subject,timestamp,timestamp_seconds,first_frame,last_frame,\
confidence,mask_detected,mask_confidence,saved_image_path,clip_path";

fn render_csv(events: &[DetectionEvent]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for row in events.iter().map(ReportRow::from) {
        let fields = [
            row.event_id.to_string(),
            csv_field(row.subject),
            row.timestamp,
            format!("{:.3}", row.timestamp_seconds),
            row.first_frame.to_string(),
            row.last_frame.to_string(),
            format!("{:.4}", row.confidence),
            row.mask_detected.to_string(),
            format!("{:.4}", row.mask_confidence),
            csv_field(row.saved_image_path.as_deref().unwrap_or("")),
            csv_field(row.clip_path.as_deref().unwrap_or("")),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

/// Quotes a field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn render_json(events: &[DetectionEvent]) -> Result<String, DetectionError> {
    let rows: Vec<ReportRow> = events.iter().map(ReportRow::from).collect();
    Ok(serde_json::to_string_pretty(&rows)?)
}

fn render_text(events: &[DetectionEvent]) -> String {
    let rule_heavy = "=".repeat(50);
    let rule_light = "-".repeat(50);
    let mut out = format!("Face Detection Report\n{rule_heavy}\n");
    if events.is_empty() {
        out.push_str("No detections.\n");
    }
    for (n, event) in events.iter().enumerate() {
        let mask = if event.mask_detected { "Yes" } else { "No" };
        let image = display_or_dash(event.saved_face_image_path.as_deref());
        let clip = display_or_dash(event.clip_path.as_deref());
        out.push_str(&format!(
            "Detection #{}\n\
             Subject: {}\n\
             Frames: {}-{}\n\
             Timestamp: {}\n\
             Confidence: {:.2}%\n\
             Mask: {} ({:.2}%)\n\
             Image Path: {}\n\
             Clip Path: {}\n\
             {rule_light}\n",
            n + 1,
            event.subject_id,
            event.first_frame_index,
            event.last_frame_index,
            format_timestamp(event.timestamp),
            event.confidence * 100.0,
            mask,
            event.mask_confidence * 100.0,
            image,
            clip,
        ));
    }
    out
}

fn display_or_dash(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string())
}
