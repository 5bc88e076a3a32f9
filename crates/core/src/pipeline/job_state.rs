use std::fmt;
use std::time::{Duration, Instant};

use crate::shared::error::DetectionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Created,
    Running,
    Paused,
    Stopped,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Stopped | JobStatus::Completed | JobStatus::Failed
        )
    }

    /// Running or paused: the worker still owns the job.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Paused)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Created => "created",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Stopped => "stopped",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a job failed, kept for diagnosis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureInfo {
    pub message: String,
    /// Frame being processed when the failure happened, if any.
    pub frame_index: Option<usize>,
}

/// Immutable copy of a job's state handed to readers.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressSnapshot {
    pub status: JobStatus,
    pub current_frame_index: usize,
    pub total_frames: usize,
    pub elapsed: Duration,
    pub frames_analyzed: usize,
    pub frames_skipped_on_error: usize,
    pub events_recorded: usize,
    /// Set while the job is paused because a resource limit was hit.
    pub pause_reason: Option<String>,
    pub failure: Option<FailureInfo>,
}

/// The single live state of one job. Only the job's worker and its control
/// handle mutate it, always under the job's lock.
#[derive(Debug)]
pub struct JobState {
    status: JobStatus,
    current_frame_index: usize,
    total_frames: usize,
    frames_analyzed: usize,
    frames_skipped_on_error: usize,
    events_recorded: usize,
    pause_reason: Option<String>,
    failure: Option<FailureInfo>,
    started_at: Option<Instant>,
    finished_after: Option<Duration>,
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

impl JobState {
    pub fn new() -> Self {
        Self {
            status: JobStatus::Created,
            current_frame_index: 0,
            total_frames: 0,
            frames_analyzed: 0,
            frames_skipped_on_error: 0,
            events_recorded: 0,
            pause_reason: None,
            failure: None,
            started_at: None,
            finished_after: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn start(&mut self, total_frames: usize) -> Result<(), DetectionError> {
        self.expect(&[JobStatus::Created], "start")?;
        self.status = JobStatus::Running;
        self.total_frames = total_frames;
        self.started_at = Some(Instant::now());
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), DetectionError> {
        self.expect(&[JobStatus::Running], "pause")?;
        self.status = JobStatus::Paused;
        Ok(())
    }

    /// Pauses because a resource cap was hit; the reason stays visible in
    /// snapshots until the job is resumed.
    pub fn pause_for(&mut self, reason: String) -> Result<(), DetectionError> {
        self.pause()?;
        self.pause_reason = Some(reason);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), DetectionError> {
        self.expect(&[JobStatus::Paused], "resume")?;
        self.status = JobStatus::Running;
        self.pause_reason = None;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), DetectionError> {
        self.expect(&[JobStatus::Running, JobStatus::Paused], "stop")?;
        self.finish(JobStatus::Stopped);
        Ok(())
    }

    /// End of stream. A pause that arrives after the last frame does not
    /// hold completion back.
    pub fn complete(&mut self) -> Result<(), DetectionError> {
        self.expect(&[JobStatus::Running, JobStatus::Paused], "complete")?;
        self.finish(JobStatus::Completed);
        Ok(())
    }

    /// Moves any non-terminal job to `Failed`. A terminal job is left as is.
    pub fn fail(&mut self, message: String, frame_index: Option<usize>) {
        if self.status.is_terminal() {
            return;
        }
        self.failure = Some(FailureInfo {
            message,
            frame_index,
        });
        self.finish(JobStatus::Failed);
    }

    pub fn record_frame(&mut self, index: usize) {
        self.current_frame_index = index;
        self.frames_analyzed += 1;
    }

    pub fn record_skipped_frame(&mut self, index: usize) {
        self.current_frame_index = index;
        self.frames_skipped_on_error += 1;
    }

    pub fn record_events(&mut self, count: usize) {
        self.events_recorded += count;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.finished_after.unwrap_or_else(|| {
            self.started_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO)
        });
        ProgressSnapshot {
            status: self.status,
            current_frame_index: self.current_frame_index,
            total_frames: self.total_frames,
            elapsed,
            frames_analyzed: self.frames_analyzed,
            frames_skipped_on_error: self.frames_skipped_on_error,
            events_recorded: self.events_recorded,
            pause_reason: self.pause_reason.clone(),
            failure: self.failure.clone(),
        }
    }

    fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.pause_reason = None;
        self.finished_after = Some(
            self.started_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO),
        );
    }

    fn expect(&self, allowed: &[JobStatus], action: &'static str) -> Result<(), DetectionError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(DetectionError::InvalidTransition {
                from: self.status,
                action,
            })
        }
    }
}
