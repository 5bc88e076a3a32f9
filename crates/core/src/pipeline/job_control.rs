use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::pipeline::job_state::{JobState, JobStatus, ProgressSnapshot};
use crate::report::domain::detection_store::DetectionStoreView;
use crate::shared::error::DetectionError;

/// What the worker should do at a frame boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// Shared job state plus the condition variable the worker sleeps on while
/// paused.
#[derive(Debug, Default)]
pub(crate) struct JobControl {
    state: Mutex<JobState>,
    changed: Condvar,
}

impl JobControl {
    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` to the state and wakes every waiter.
    pub(crate) fn update<T>(&self, f: impl FnOnce(&mut JobState) -> T) -> T {
        let result = f(&mut self.lock());
        self.changed.notify_all();
        result
    }

    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        self.lock().snapshot()
    }

    pub(crate) fn status(&self) -> JobStatus {
        self.lock().status()
    }

    /// Blocks while the job is paused. Returns [`Flow::Stop`] once the job
    /// is in any state other than running.
    pub(crate) fn wait_while_paused(&self) -> Flow {
        let state = self
            .changed
            .wait_while(self.lock(), |s| s.status() == JobStatus::Paused)
            .unwrap_or_else(PoisonError::into_inner);
        if state.status() == JobStatus::Running {
            Flow::Continue
        } else {
            Flow::Stop
        }
    }

    /// Blocks until the job leaves the running/paused states.
    fn wait_until_settled(&self) -> ProgressSnapshot {
        self.changed
            .wait_while(self.lock(), |s| s.status().is_active())
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }
}

/// Controls a job from any thread.
///
/// Cheap to clone; every clone addresses the same job. Pause and stop are
/// observed by the worker at the next frame boundary.
#[derive(Clone)]
pub struct JobHandle {
    control: Arc<JobControl>,
    store: DetectionStoreView,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl JobHandle {
    pub(crate) fn new(control: Arc<JobControl>, store: DetectionStoreView) -> Self {
        Self {
            control,
            store,
            worker: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn attach_worker(&self, worker: JoinHandle<()>) {
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker);
    }

    /// Suspends the job after the frame in flight. Only valid while running.
    pub fn pause(&self) -> Result<(), DetectionError> {
        self.control.update(|s| s.pause())?;
        log::info!("Pause requested");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), DetectionError> {
        self.control.update(|s| s.resume())?;
        log::info!("Resume requested");
        Ok(())
    }

    /// Ends the job for good. Tracks still open are discarded; events
    /// already stored stay available.
    pub fn stop(&self) -> Result<(), DetectionError> {
        self.control.update(|s| s.stop())?;
        log::info!("Stop requested");
        Ok(())
    }

    pub fn status(&self) -> JobStatus {
        self.control.status()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.control.snapshot()
    }

    /// Read-only view of the job's detection store.
    pub fn store(&self) -> DetectionStoreView {
        self.store.clone()
    }

    /// Blocks until the worker has finished and returns the final snapshot.
    ///
    /// Returns immediately for a job that was never started.
    pub fn wait(&self) -> ProgressSnapshot {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                self.control
                    .update(|s| s.fail("worker thread panicked".into(), None));
            }
        }
        self.control.wait_until_settled()
    }
}
