use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use crate::report::domain::detection_event::DetectionEvent;
use crate::report::domain::report_format::ReportFormat;
use crate::shared::error::DetectionError;

/// Append-only record of a job's detection events.
///
/// Owned by the job's worker, the only writer. Readers get a
/// [`DetectionStoreView`], which can export at any time, including while the
/// job is still running.
#[derive(Debug, Default)]
pub struct DetectionStore {
    events: Arc<RwLock<Vec<DetectionEvent>>>,
}

impl DetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends after every event already stored; nothing is reordered or removed.
    pub fn append(&mut self, event: DetectionEvent) {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(
            events.last().map_or(true, |last| last.event_id < event.event_id),
            "event ids must increase"
        );
        log::debug!(
            "Stored event {} for '{}' (frames {}-{})",
            event.event_id,
            event.subject_id,
            event.first_frame_index,
            event.last_frame_index
        );
        events.push(event);
    }

    pub fn view(&self) -> DetectionStoreView {
        DetectionStoreView {
            events: Arc::clone(&self.events),
        }
    }

    pub fn len(&self) -> usize {
        self.view().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-only handle onto a [`DetectionStore`].
#[derive(Clone, Debug)]
pub struct DetectionStoreView {
    events: Arc<RwLock<Vec<DetectionEvent>>>,
}

impl DetectionStoreView {
    fn read(&self) -> RwLockReadGuard<'_, Vec<DetectionEvent>> {
        self.events.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Snapshot of the stored events in append order.
    pub fn events(&self) -> Vec<DetectionEvent> {
        self.read().clone()
    }

    /// Snapshot ordered by timestamp; ties keep append order.
    pub fn events_by_timestamp(&self) -> Vec<DetectionEvent> {
        let mut events = self.events();
        events.sort_by_key(|e| (e.timestamp, e.event_id));
        events
    }

    pub fn export(&self, format: ReportFormat) -> Result<String, DetectionError> {
        format.render(&self.events_by_timestamp())
    }

    /// Writes an export to `path`, creating parent directories as needed.
    ///
    /// The report is written to a `.part` sibling and renamed into place, so
    /// `path` always holds a complete report.
    pub fn write_report(&self, path: &Path, format: ReportFormat) -> Result<(), DetectionError> {
        let report = self.export(format)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut partial = path.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);
        fs::write(&partial, report)?;
        fs::rename(&partial, path)?;
        log::debug!(
            "Wrote {} report with {} detection(s) to {}",
            format,
            self.len(),
            path.display()
        );
        Ok(())
    }
}
