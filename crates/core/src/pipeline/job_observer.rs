use std::collections::HashMap;

use crate::pipeline::job_state::{JobStatus, ProgressSnapshot};
use crate::report::domain::detection_event::DetectionEvent;
use crate::shared::error::DetectionError;

/// Receives a job's progress from its worker thread.
///
/// Decouples the pipeline from whatever presents progress (log output, a
/// GUI, a test double). Callbacks run on the worker between frames and must
/// return promptly; they may call back into the job's
/// [`JobHandle`](crate::pipeline::job_control::JobHandle).
pub trait JobObserver: Send {
    /// Called after every analyzed or skipped frame.
    fn on_progress(&mut self, snapshot: &ProgressSnapshot);

    /// The worker observed a status change.
    fn on_status(&mut self, status: JobStatus, snapshot: &ProgressSnapshot);

    /// A detection event was closed and stored.
    fn on_event(&mut self, event: &DetectionEvent);

    /// A frame could not be analyzed but the job carries on.
    fn on_frame_error(&mut self, error: &DetectionError);

    /// How long a named stage took for one frame.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// End-of-job report. Default: no-op.
    fn summary(&self, _snapshot: &ProgressSnapshot) {}
}

/// Observer that discards everything.
pub struct NullJobObserver;

impl JobObserver for NullJobObserver {
    fn on_progress(&mut self, _snapshot: &ProgressSnapshot) {}
    fn on_status(&mut self, _status: JobStatus, _snapshot: &ProgressSnapshot) {}
    fn on_event(&mut self, _event: &DetectionEvent) {}
    fn on_frame_error(&mut self, _error: &DetectionError) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
}

/// Logs progress through the `log` facade and summarizes stage timings.
///
/// Progress lines are throttled to one every `throttle_frames` analyzed
/// frames to keep long videos from flooding the log.
pub struct LogJobObserver {
    throttle_frames: usize,
    timings: HashMap<String, Vec<f64>>,
    last_logged: Option<usize>,
}

impl LogJobObserver {
    pub fn new(throttle_frames: usize) -> Self {
        Self {
            throttle_frames: throttle_frames.max(1),
            timings: HashMap::new(),
            last_logged: None,
        }
    }

    /// Returns the formatted summary string, or `None` if nothing was timed.
    pub fn summary_string(&self, snapshot: &ProgressSnapshot) -> Option<String> {
        if self.timings.is_empty() {
            return None;
        }

        let elapsed_ms = snapshot.elapsed.as_secs_f64() * 1000.0;
        let frames = snapshot.frames_analyzed;
        let mut lines = vec![format!(
            "Job summary ({frames} frames analyzed, {} skipped, {} events, {:.1}s):",
            snapshot.frames_skipped_on_error,
            snapshot.events_recorded,
            elapsed_ms / 1000.0
        )];

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &self.timings[stage];
            let total_ms: f64 = durations.iter().sum();
            let avg_ms = if durations.is_empty() {
                0.0
            } else {
                total_ms / durations.len() as f64
            };
            let pct = if elapsed_ms > 0.0 {
                total_ms / elapsed_ms * 100.0
            } else {
                0.0
            };
            lines.push(format!(
                "  {stage:12}: avg {avg_ms:6.1}ms  total {total_ms:7.0}ms  ({pct:4.1}%)"
            ));
        }

        if frames > 0 && elapsed_ms > 0.0 {
            let fps = frames as f64 / (elapsed_ms / 1000.0);
            lines.push(format!("  Throughput: {fps:.1} fps"));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }

    fn should_log(&self, frames_analyzed: usize) -> bool {
        frames_analyzed > 0
            && self.last_logged != Some(frames_analyzed)
            && frames_analyzed % self.throttle_frames == 0
    }
}

impl Default for LogJobObserver {
    fn default() -> Self {
        Self::new(50)
    }
}

impl JobObserver for LogJobObserver {
    fn on_progress(&mut self, snapshot: &ProgressSnapshot) {
        if !self.should_log(snapshot.frames_analyzed) {
            return;
        }
        self.last_logged = Some(snapshot.frames_analyzed);
        let current = snapshot.current_frame_index;
        let total = snapshot.total_frames;
        if total > 0 {
            let pct = (current + 1) as f64 / total as f64 * 100.0;
            log::info!(
                "Processing: frame {current}/{total} ({pct:.1}%), {} event(s)",
                snapshot.events_recorded
            );
        } else {
            log::info!(
                "Processing: frame {current}, {} event(s)",
                snapshot.events_recorded
            );
        }
    }

    fn on_status(&mut self, status: JobStatus, snapshot: &ProgressSnapshot) {
        match (&status, &snapshot.failure, &snapshot.pause_reason) {
            (JobStatus::Failed, Some(failure), _) => match failure.frame_index {
                Some(index) => log::error!("Job failed at frame {index}: {}", failure.message),
                None => log::error!("Job failed: {}", failure.message),
            },
            (JobStatus::Paused, _, Some(reason)) => {
                log::warn!("Job paused at frame {}: {reason}", snapshot.current_frame_index)
            }
            _ => log::info!("Job {status} at frame {}", snapshot.current_frame_index),
        }
    }

    fn on_event(&mut self, event: &DetectionEvent) {
        log::info!(
            "Detected '{}' in frames {}-{} (confidence {:.1}%, mask {})",
            event.subject_id,
            event.first_frame_index,
            event.last_frame_index,
            event.confidence * 100.0,
            if event.mask_detected { "yes" } else { "no" }
        );
    }

    fn on_frame_error(&mut self, error: &DetectionError) {
        log::warn!("Skipping frame: {error}");
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn summary(&self, snapshot: &ProgressSnapshot) {
        if let Some(text) = self.summary_string(snapshot) {
            log::info!("\n\n{text}");
        }
    }
}
