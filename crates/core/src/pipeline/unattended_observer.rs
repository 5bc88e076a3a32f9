use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::pipeline::job_control::JobHandle;
use crate::pipeline::job_observer::JobObserver;
use crate::pipeline::job_state::{JobStatus, ProgressSnapshot};
use crate::report::domain::detection_event::DetectionEvent;
use crate::report::domain::report_format::ReportFormat;
use crate::shared::error::DetectionError;

/// What an unattended run does when the job pauses on a resource limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResourceLimitPolicy {
    /// End the job, keeping the events stored so far.
    #[default]
    Stop,
    /// Carry on; the offending frame has already been skipped.
    Resume,
}

impl fmt::Display for ResourceLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceLimitPolicy::Stop => write!(f, "stop"),
            ResourceLimitPolicy::Resume => write!(f, "resume"),
        }
    }
}

impl FromStr for ResourceLimitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stop" => Ok(ResourceLimitPolicy::Stop),
            "resume" => Ok(ResourceLimitPolicy::Resume),
            other => Err(format!(
                "resource limit policy must be 'stop' or 'resume', got '{other}'"
            )),
        }
    }
}

/// Wraps another observer for runs with nobody at the controls.
///
/// Answers resource-limit pauses with a fixed policy and, when a report
/// path is set, rewrites the report after every stored event so an
/// interrupted run leaves its results on disk.
pub struct UnattendedObserver {
    inner: Box<dyn JobObserver>,
    handle: JobHandle,
    policy: ResourceLimitPolicy,
    report: Option<(PathBuf, ReportFormat)>,
}

impl UnattendedObserver {
    pub fn new(
        inner: Box<dyn JobObserver>,
        handle: JobHandle,
        policy: ResourceLimitPolicy,
    ) -> Self {
        Self {
            inner,
            handle,
            policy,
            report: None,
        }
    }

    pub fn with_report(mut self, path: impl Into<PathBuf>, format: ReportFormat) -> Self {
        self.report = Some((path.into(), format));
        self
    }

    fn apply_policy(&self, reason: &str) {
        log::warn!("Resource limit hit ({reason}), applying policy '{}'", self.policy);
        let applied = match self.policy {
            ResourceLimitPolicy::Stop => self.handle.stop(),
            ResourceLimitPolicy::Resume => self.handle.resume(),
        };
        if let Err(e) = applied {
            log::debug!("Resource limit policy not applied: {e}");
        }
    }
}

impl JobObserver for UnattendedObserver {
    fn on_progress(&mut self, snapshot: &ProgressSnapshot) {
        self.inner.on_progress(snapshot);
        if snapshot.status == JobStatus::Paused {
            if let Some(reason) = &snapshot.pause_reason {
                self.apply_policy(reason);
            }
        }
    }

    fn on_status(&mut self, status: JobStatus, snapshot: &ProgressSnapshot) {
        self.inner.on_status(status, snapshot);
    }

    fn on_event(&mut self, event: &DetectionEvent) {
        self.inner.on_event(event);
        if let Some((path, format)) = &self.report {
            if let Err(e) = self.handle.store().write_report(path, *format) {
                log::warn!("Could not update report {}: {e}", path.display());
            }
        }
    }

    fn on_frame_error(&mut self, error: &DetectionError) {
        self.inner.on_frame_error(error);
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.inner.timing(stage, duration_ms);
    }

    fn summary(&self, snapshot: &ProgressSnapshot) {
        self.inner.summary(snapshot);
    }
}
