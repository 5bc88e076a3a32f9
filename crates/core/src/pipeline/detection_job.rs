use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::detection::domain::face_backend::FaceBackend;
use crate::detection::domain::face_matcher::FaceMatcher;
use crate::detection::domain::mask_scorer::{LowerFaceTextureScorer, MaskScorer};
use crate::detection::domain::reference_gallery::{Gallery, SubjectReferences};
use crate::detection::domain::track_aggregator::{ClosedTrack, TrackAggregator};
use crate::pipeline::clip_recorder::{ClipOutput, ClipRecorder};
use crate::pipeline::infrastructure::threaded_frame_pump::FramePump;
use crate::pipeline::job_control::{Flow, JobControl, JobHandle};
use crate::pipeline::job_observer::{JobObserver, NullJobObserver};
use crate::pipeline::job_state::{JobState, JobStatus, ProgressSnapshot};
use crate::report::domain::detection_event::DetectionEvent;
use crate::report::domain::detection_store::DetectionStore;
use crate::shared::detection_config::{DecodeErrorPolicy, DetectionConfig};
use crate::shared::error::DetectionError;
use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::image_reader::ImageReader;
use crate::video::domain::image_writer::ImageWriter;
use crate::video::domain::video_reader::VideoReader;

/// Reduces a subject id to filename-safe characters.
pub(crate) fn file_safe(subject_id: &str) -> String {
    subject_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Where best-frame face crops are written.
pub struct CropOutput {
    dir: PathBuf,
    writer: Box<dyn ImageWriter>,
}

impl CropOutput {
    pub fn new(dir: impl Into<PathBuf>, writer: Box<dyn ImageWriter>) -> Self {
        Self {
            dir: dir.into(),
            writer,
        }
    }

    /// `<subject>_<event_id>_f<frame>.jpg`
    fn path_for(&self, subject_id: &str, event_id: u64, frame_index: usize) -> PathBuf {
        self.dir.join(format!(
            "{}_{event_id}_f{frame_index}.jpg",
            file_safe(subject_id)
        ))
    }

    fn save(
        &self,
        subject_id: &str,
        event_id: u64,
        frame_index: usize,
        crop: &Frame,
    ) -> Result<PathBuf, DetectionError> {
        let path = self.path_for(subject_id, event_id, frame_index);
        self.writer.write(&path, crop, None)?;
        Ok(path)
    }
}

/// One scan of one video for a set of reference subjects.
///
/// Built in `Created` state. [`DetectionJob::start`] embeds the reference
/// gallery and opens the video on the calling thread, so bad references or
/// unreadable media are reported before the job ever runs. Frames are then
/// decoded on one thread and analyzed in order on another.
pub struct DetectionJob {
    config: DetectionConfig,
    video_path: PathBuf,
    subjects: Vec<SubjectReferences>,
    reader: Box<dyn VideoReader>,
    image_reader: Box<dyn ImageReader>,
    backend: Box<dyn FaceBackend>,
    mask_scorer: Box<dyn MaskScorer>,
    observer: Box<dyn JobObserver>,
    crops: Option<CropOutput>,
    clips: Option<ClipOutput>,
    control: Arc<JobControl>,
    store: DetectionStore,
    handle: JobHandle,
}

impl DetectionJob {
    pub fn new(
        config: DetectionConfig,
        video_path: impl Into<PathBuf>,
        subjects: Vec<SubjectReferences>,
        reader: Box<dyn VideoReader>,
        image_reader: Box<dyn ImageReader>,
        backend: Box<dyn FaceBackend>,
    ) -> Result<Self, DetectionError> {
        config.validate()?;
        let control = Arc::new(JobControl::default());
        let store = DetectionStore::new();
        let handle = JobHandle::new(Arc::clone(&control), store.view());
        Ok(Self {
            mask_scorer: Box::new(LowerFaceTextureScorer::new(config.mask_threshold)),
            config,
            video_path: video_path.into(),
            subjects,
            reader,
            image_reader,
            backend,
            observer: Box::new(NullJobObserver),
            crops: None,
            clips: None,
            control,
            store,
            handle,
        })
    }

    pub fn with_mask_scorer(mut self, scorer: Box<dyn MaskScorer>) -> Self {
        self.mask_scorer = scorer;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn JobObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_crop_output(mut self, crops: CropOutput) -> Self {
        self.crops = Some(crops);
        self
    }

    /// Records a clip from the start of each appearance. Ignored when
    /// `clip_duration_seconds` is 0.
    pub fn with_clip_output(mut self, clips: ClipOutput) -> Self {
        self.clips = Some(clips);
        self
    }

    /// A handle onto this job, usable before and after [`start`](Self::start).
    pub fn handle(&self) -> JobHandle {
        self.handle.clone()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.control.snapshot()
    }

    /// Builds the gallery, opens the video and hands the job to a worker.
    ///
    /// On error the job is `Failed` and never reaches `Running`.
    pub fn start(mut self) -> Result<JobHandle, DetectionError> {
        if self.config.clip_duration_seconds == 0.0 && self.clips.take().is_some() {
            log::info!("Clip duration is 0, not recording clips");
        }
        let (gallery, metadata) = match self.prepare() {
            Ok(prepared) => prepared,
            Err(e) => {
                log::error!("Job could not start: {e}");
                self.control.update(|s| s.fail(e.to_string(), None));
                let snapshot = self.control.snapshot();
                self.observer.on_status(JobStatus::Failed, &snapshot);
                return Err(e);
            }
        };

        self.control.update(|s| s.start(metadata.total_frames))?;
        let snapshot = self.control.snapshot();
        self.observer.on_status(JobStatus::Running, &snapshot);
        log::info!(
            "Scanning {} ({}x{}, {:.2} fps, {} frames) for {} subject(s), every {} frame(s)",
            self.video_path.display(),
            metadata.width,
            metadata.height,
            metadata.fps,
            metadata.total_frames,
            gallery.subject_count(),
            self.config.frame_skip
        );

        let DetectionJob {
            config,
            reader,
            backend,
            mask_scorer,
            observer,
            crops,
            clips,
            control,
            store,
            handle,
            ..
        } = self;

        let clips = clips
            .map(|output| ClipRecorder::new(output, metadata, config.clip_duration_seconds));
        // Clips need every decoded frame; the worker then samples itself.
        let stride = if clips.is_some() { 1 } else { config.frame_skip };
        let pump = FramePump::spawn(reader, stride, config.max_pending_frames);
        let worker = FrameWorker {
            matcher: FaceMatcher::new(config.match_threshold, config.max_faces_per_frame),
            aggregator: TrackAggregator::new(config.effective_gap_tolerance()),
            frame_skip: config.frame_skip,
            decode_error_policy: config.decode_error_policy,
            max_frame_pixels: config.max_frame_pixels,
            gallery,
            backend,
            mask_scorer,
            observer,
            crops,
            clips,
            control,
            store,
            next_event_id: 1,
        };
        handle.attach_worker(std::thread::spawn(move || worker.run(pump)));
        Ok(handle)
    }

    fn prepare(&mut self) -> Result<(Gallery, VideoMetadata), DetectionError> {
        if let Some(crops) = &self.crops {
            fs::create_dir_all(&crops.dir)?;
        }
        if let Some(clips) = &self.clips {
            fs::create_dir_all(clips.dir())?;
        }
        let gallery = Gallery::build(
            &self.subjects,
            self.image_reader.as_ref(),
            self.backend.as_mut(),
            self.config.max_reference_images,
        )?;
        let metadata = self.reader.open(&self.video_path)?;
        Ok((gallery, metadata))
    }
}

/// Failure escaping the per-frame step, with the frame it happened on.
type FrameFailure = (DetectionError, Option<usize>);

/// Runs match → mask → aggregate → store for each sampled frame, in frame
/// order.
struct FrameWorker {
    gallery: Gallery,
    matcher: FaceMatcher,
    aggregator: TrackAggregator,
    backend: Box<dyn FaceBackend>,
    mask_scorer: Box<dyn MaskScorer>,
    observer: Box<dyn JobObserver>,
    crops: Option<CropOutput>,
    clips: Option<ClipRecorder>,
    control: Arc<JobControl>,
    store: DetectionStore,
    frame_skip: usize,
    decode_error_policy: DecodeErrorPolicy,
    max_frame_pixels: u64,
    next_event_id: u64,
}

impl FrameWorker {
    fn run(mut self, pump: FramePump) {
        let outcome = self.process_stream(&pump);
        pump.shutdown();

        match outcome {
            Ok(Flow::Continue) => {
                if let Err(e) = self.finish_stream() {
                    self.control.update(|s| s.fail(e.to_string(), None));
                }
            }
            Ok(Flow::Stop) => {
                log::info!(
                    "Discarding {} open track(s) after stop",
                    self.aggregator.open_tracks()
                );
            }
            Err((e, frame_index)) => {
                let message = e.to_string();
                self.control.update(|s| s.fail(message, frame_index));
            }
        }
        if let Some(clips) = &mut self.clips {
            if let Err(e) = clips.finish() {
                log::warn!("Clip left incomplete: {e}");
            }
        }

        let snapshot = self.control.snapshot();
        self.observer.on_status(snapshot.status, &snapshot);
        self.observer.summary(&snapshot);
    }

    fn process_stream(&mut self, pump: &FramePump) -> Result<Flow, FrameFailure> {
        loop {
            let wait_start = Instant::now();
            let Some(item) = pump.recv() else {
                return Ok(Flow::Continue);
            };
            self.observer.timing("decode_wait", elapsed_ms(wait_start));

            if self.await_turn() == Flow::Stop {
                return Ok(Flow::Stop);
            }

            match item {
                Ok(frame) => {
                    let index = frame.index();
                    if let Some(clips) = &mut self.clips {
                        clips.feed(&frame).map_err(|e| (e, Some(index)))?;
                    }
                    if self.is_sampled(index) {
                        self.process_frame(frame).map_err(|e| (e, Some(index)))?;
                    }
                }
                Err(DetectionError::FrameDecode { index, .. }) if !self.is_sampled(index) => {}
                Err(DetectionError::FrameDecode { index, reason }) => {
                    let error = DetectionError::FrameDecode { index, reason };
                    if self.decode_error_policy == DecodeErrorPolicy::Abort {
                        return Err((error, Some(index)));
                    }
                    self.control.update(|s| s.record_skipped_frame(index));
                    self.observer.on_frame_error(&error);
                    self.observer.on_progress(&self.control.snapshot());
                }
                Err(e) => return Err((e, None)),
            }
        }
    }

    fn is_sampled(&self, index: usize) -> bool {
        index % self.frame_skip == 0
    }

    /// Blocks while paused, reporting the pause to the observer.
    fn await_turn(&mut self) -> Flow {
        if self.control.status() != JobStatus::Paused {
            return self.control.wait_while_paused();
        }
        let snapshot = self.control.snapshot();
        self.observer.on_status(JobStatus::Paused, &snapshot);
        let flow = self.control.wait_while_paused();
        if flow == Flow::Continue {
            let snapshot = self.control.snapshot();
            self.observer.on_status(JobStatus::Running, &snapshot);
        }
        flow
    }

    fn process_frame(&mut self, frame: Frame) -> Result<(), DetectionError> {
        let index = frame.index();
        if frame.pixel_count() > self.max_frame_pixels {
            self.pause_for_oversized(&frame);
            return Ok(());
        }

        let t = Instant::now();
        let matches = self
            .matcher
            .match_frame(&frame, &self.gallery, self.backend.as_mut())?;
        self.observer.timing("match", elapsed_ms(t));

        let t = Instant::now();
        let assessed: Vec<_> = matches
            .into_iter()
            .map(|m| {
                let mask = self.mask_scorer.assess(&frame, &m.face_region);
                (m, mask)
            })
            .collect();
        self.observer.timing("mask", elapsed_ms(t));

        let t = Instant::now();
        let closed = self.aggregator.observe(&frame, &assessed);
        if let Some(clips) = &mut self.clips {
            for subject_id in self.aggregator.started_at(index) {
                clips.start(&subject_id, &frame)?;
            }
        }
        let events = self.build_events(closed)?;
        self.observer.timing("aggregate", elapsed_ms(t));

        let store = &mut self.store;
        let committed = self.control.update(|s| {
            s.record_frame(index);
            commit(s, store, &events)
        });
        self.settle(events, committed);
        self.observer.on_progress(&self.control.snapshot());
        Ok(())
    }

    /// Skips a frame above the pixel cap and pauses so the caller can decide
    /// whether to resume or stop.
    fn pause_for_oversized(&mut self, frame: &Frame) {
        let error = DetectionError::ResourceExhausted(format!(
            "frame {} is {}x{}, above the limit of {} pixels",
            frame.index(),
            frame.width(),
            frame.height(),
            self.max_frame_pixels
        ));
        let reason = error.to_string();
        let paused = self.control.update(|s| {
            s.record_skipped_frame(frame.index());
            s.pause_for(reason)
        });
        if let Err(e) = paused {
            log::debug!("Not pausing for oversized frame: {e}");
        }
        self.observer.on_frame_error(&error);
        self.observer.on_progress(&self.control.snapshot());
    }

    /// Flushes open tracks and completes the job in one step, so a stop that
    /// lands after the last frame wins over the flush.
    fn finish_stream(&mut self) -> Result<(), DetectionError> {
        if let Some(clips) = &mut self.clips {
            clips.finish()?;
        }
        let closed = self.aggregator.finish();
        let events = self.build_events(closed)?;

        let store = &mut self.store;
        let committed = self.control.update(|s| {
            if !commit(s, store, &events) {
                return Ok(false);
            }
            s.complete().map(|_| true)
        })?;
        self.settle(events, committed);
        Ok(())
    }

    /// Turns closed tracks into events, saving crops when configured.
    fn build_events(&mut self, closed: Vec<ClosedTrack>) -> Result<Vec<DetectionEvent>, DetectionError> {
        let mut events = Vec::with_capacity(closed.len());
        for track in closed {
            let event_id = self.next_event_id;
            self.next_event_id += 1;

            let saved_face_image_path = match (&self.crops, &track.best_crop) {
                (Some(crops), Some(crop)) => Some(crops.save(
                    &track.subject_id,
                    event_id,
                    track.best_frame_index,
                    crop,
                )?),
                _ => None,
            };
            let clip_path = self
                .clips
                .as_mut()
                .and_then(|clips| clips.take_path(&track.subject_id, track.first_frame_index));

            events.push(DetectionEvent {
                event_id,
                subject_id: track.subject_id,
                first_frame_index: track.first_frame_index,
                last_frame_index: track.last_frame_index,
                timestamp: track.timestamp,
                confidence: track.confidence,
                mask_detected: track.mask_detected,
                mask_confidence: track.mask_confidence,
                best_frame_index: track.best_frame_index,
                saved_face_image_path,
                clip_path,
            });
        }
        Ok(events)
    }

    /// Announces committed events; otherwise drops them with their crops.
    fn settle(&mut self, events: Vec<DetectionEvent>, committed: bool) {
        if committed {
            for event in &events {
                self.observer.on_event(event);
            }
            return;
        }
        if events.is_empty() {
            return;
        }
        log::info!("Discarding {} event(s) closed after stop", events.len());
        for path in events.iter().filter_map(|e| e.saved_face_image_path.as_ref()) {
            if let Err(e) = fs::remove_file(path) {
                log::debug!("Could not remove {}: {e}", path.display());
            }
        }
    }
}

/// Stores `events` and counts them, unless the job has already been stopped
/// or failed. Runs under the job lock, so no stop can land in between.
fn commit(state: &mut JobState, store: &mut DetectionStore, events: &[DetectionEvent]) -> bool {
    if !state.status().is_active() {
        return false;
    }
    state.record_events(events.len());
    for event in events {
        store.append(event.clone());
    }
    true
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::domain::detection_store::DetectionStoreView;
    use crate::report::domain::report_format::ReportFormat;
    use crate::shared::region::Region;
    use crate::testing::{
        marked_frame, ClipLog, ScriptedBackend, ScriptedImageReader, ScriptedVideoReader,
        VIDEO_HEIGHT, VIDEO_WIDTH,
    };
    use crate::video::infrastructure::image_file_writer::ImageFileWriter;
    use std::sync::Mutex;
    use std::time::Duration;

    const ALICE: [f32; 3] = [1.0, 0.0, 0.0];
    const BOB: [f32; 3] = [0.0, 1.0, 0.0];
    const STRANGER: [f32; 3] = [0.0, 0.0, 1.0];

    fn face() -> Region {
        Region::new(20, 20, 60, 60)
    }

    fn other_face() -> Region {
        Region::new(90, 20, 50, 50)
    }

    fn config() -> DetectionConfig {
        DetectionConfig {
            frame_skip: 1,
            match_threshold: 0.5,
            track_gap_tolerance: 10,
            ..Default::default()
        }
    }

    fn references() -> (ScriptedImageReader, Vec<SubjectReferences>) {
        let mut images = ScriptedImageReader::default();
        images.insert("alice.jpg", marked_frame(1));
        images.insert("bob.jpg", marked_frame(2));
        let subjects = vec![
            SubjectReferences::new("alice", vec![PathBuf::from("alice.jpg")]),
            SubjectReferences::new("bob", vec![PathBuf::from("bob.jpg")]),
        ];
        (images, subjects)
    }

    fn backend() -> ScriptedBackend {
        let mut backend = ScriptedBackend::default();
        backend.script_image(1, vec![(face(), ALICE.to_vec())]);
        backend.script_image(2, vec![(face(), BOB.to_vec())]);
        backend
    }

    fn job(
        config: DetectionConfig,
        reader: ScriptedVideoReader,
        backend: ScriptedBackend,
    ) -> DetectionJob {
        let (images, subjects) = references();
        DetectionJob::new(
            config,
            "scripted.mp4",
            subjects,
            Box::new(reader),
            Box::new(images),
            Box::new(backend),
        )
        .unwrap()
    }

    fn run(job: DetectionJob) -> (ProgressSnapshot, Vec<DetectionEvent>) {
        let handle = job.start().unwrap();
        let snapshot = handle.wait();
        (snapshot, handle.store().events())
    }

    fn spans(events: &[DetectionEvent]) -> Vec<(&str, usize, usize)> {
        events
            .iter()
            .map(|e| (e.subject_id.as_str(), e.first_frame_index, e.last_frame_index))
            .collect()
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..2000 {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("condition not reached within 2s");
    }

    #[derive(Clone, Copy)]
    enum Action {
        Pause,
        Stop,
    }

    /// Records what the worker reports and optionally controls the job
    /// from inside the worker once a given frame has been analyzed.
    #[derive(Clone, Default)]
    struct Watcher {
        statuses: Arc<Mutex<Vec<JobStatus>>>,
        frames: Arc<Mutex<Vec<usize>>>,
        frame_errors: Arc<Mutex<usize>>,
        trigger: Option<(usize, Action, JobHandle)>,
    }

    impl Watcher {
        fn acting_at(mut self, frame: usize, action: Action, handle: JobHandle) -> Self {
            self.trigger = Some((frame, action, handle));
            self
        }

        fn statuses(&self) -> Vec<JobStatus> {
            self.statuses.lock().unwrap().clone()
        }

        fn frames(&self) -> Vec<usize> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl JobObserver for Watcher {
        fn on_progress(&mut self, snapshot: &ProgressSnapshot) {
            let index = snapshot.current_frame_index;
            self.frames.lock().unwrap().push(index);
            if let Some((at, action, handle)) = &self.trigger {
                if *at == index {
                    match action {
                        Action::Pause => handle.pause().unwrap(),
                        Action::Stop => handle.stop().unwrap(),
                    }
                }
            }
        }

        fn on_status(&mut self, status: JobStatus, _snapshot: &ProgressSnapshot) {
            self.statuses.lock().unwrap().push(status);
        }

        fn on_event(&mut self, _event: &DetectionEvent) {}

        fn on_frame_error(&mut self, _error: &DetectionError) {
            *self.frame_errors.lock().unwrap() += 1;
        }

        fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    }

    #[test]
    fn test_no_matching_faces_completes_without_events() {
        let mut backend = backend();
        backend.script_frames(0..=99, vec![(face(), STRANGER.to_vec())]);
        let (snapshot, events) = run(job(config(), ScriptedVideoReader::new(100), backend));

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert!(events.is_empty());
        assert_eq!(snapshot.frames_analyzed, 100);
        assert_eq!(snapshot.events_recorded, 0);
    }

    #[test]
    fn test_continuous_appearance_yields_one_event() {
        let mut backend = backend();
        backend.script_frames(10..=60, vec![(face(), ALICE.to_vec())]);
        let (snapshot, events) = run(job(config(), ScriptedVideoReader::new(100), backend));

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(spans(&events), vec![("alice", 10, 60)]);
        let event = &events[0];
        assert_eq!(event.event_id, 1);
        assert_eq!(event.timestamp, Duration::from_millis(400));
        assert!((0.0..=1.0).contains(&event.confidence));
        assert!(!event.mask_detected);
    }

    #[test]
    fn test_gap_longer_than_tolerance_yields_two_events() {
        let mut backend = backend();
        backend.script_frames(10..=30, vec![(face(), ALICE.to_vec())]);
        backend.script_frames(46..=70, vec![(face(), ALICE.to_vec())]);
        let (_, events) = run(job(config(), ScriptedVideoReader::new(100), backend));

        assert_eq!(spans(&events), vec![("alice", 10, 30), ("alice", 46, 70)]);
    }

    #[test]
    fn test_track_open_at_end_of_stream_is_flushed() {
        let mut backend = backend();
        backend.script_frames(80..=99, vec![(face(), ALICE.to_vec())]);
        let (_, events) = run(job(config(), ScriptedVideoReader::new(100), backend));

        assert_eq!(spans(&events), vec![("alice", 80, 99)]);
    }

    #[test]
    fn test_frame_skip_samples_every_nth_frame() {
        let mut backend = backend();
        backend.script_frames(10..=30, vec![(face(), ALICE.to_vec())]);
        backend.script_frames(46..=70, vec![(face(), ALICE.to_vec())]);
        let config = DetectionConfig {
            frame_skip: 5,
            ..config()
        };
        let watcher = Watcher::default();
        let job = job(config, ScriptedVideoReader::new(100), backend)
            .with_observer(Box::new(watcher.clone()));
        let (snapshot, events) = run(job);

        assert_eq!(snapshot.frames_analyzed, 20);
        assert!(watcher.frames().iter().all(|i| i % 5 == 0));
        assert_eq!(spans(&events), vec![("alice", 10, 30), ("alice", 50, 70)]);
    }

    #[test]
    fn test_ambiguous_reference_never_runs() {
        let mut images = ScriptedImageReader::default();
        images.insert("pair.jpg", marked_frame(7));
        let mut backend = backend();
        backend.script_image(
            7,
            vec![(face(), ALICE.to_vec()), (other_face(), BOB.to_vec())],
        );
        let watcher = Watcher::default();
        let job = DetectionJob::new(
            config(),
            "scripted.mp4",
            vec![SubjectReferences::new("alice", vec![PathBuf::from("pair.jpg")])],
            Box::new(ScriptedVideoReader::new(10)),
            Box::new(images),
            Box::new(backend),
        )
        .unwrap()
        .with_observer(Box::new(watcher.clone()));
        let handle = job.handle();

        let err = job.start().err().unwrap();
        assert!(matches!(err, DetectionError::AmbiguousFace { faces: 2, .. }));
        assert_eq!(handle.status(), JobStatus::Failed);
        assert!(!watcher.statuses().contains(&JobStatus::Running));
        assert_eq!(handle.wait().status, JobStatus::Failed);
    }

    #[test]
    fn test_unreadable_video_never_runs() {
        let job = job(config(), ScriptedVideoReader::failing_open(), backend());
        let handle = job.handle();
        let err = job.start().err().unwrap();
        assert!(matches!(err, DetectionError::Media { .. }));
        assert_eq!(handle.status(), JobStatus::Failed);
        assert!(handle.store().is_empty());
    }

    #[test]
    fn test_pause_and_resume_matches_uninterrupted_run() {
        let script = || {
            let mut backend = backend();
            backend.script_frames(10..=24, vec![(face(), ALICE.to_vec())]);
            backend.script_frames(
                25..=30,
                vec![(face(), ALICE.to_vec()), (other_face(), BOB.to_vec())],
            );
            backend.script_frames(31..=70, vec![(other_face(), BOB.to_vec())]);
            backend
        };
        let (_, expected) = run(job(config(), ScriptedVideoReader::new(100), script()));

        let job = job(config(), ScriptedVideoReader::new(100), script());
        let handle = job.handle();
        let watcher = Watcher::default().acting_at(40, Action::Pause, handle.clone());
        let job = job.with_observer(Box::new(watcher.clone()));
        job.start().unwrap();

        wait_for(|| handle.status() == JobStatus::Paused);
        let paused_at = handle.snapshot();
        assert_eq!(paused_at.current_frame_index, 40);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(handle.snapshot().frames_analyzed, paused_at.frames_analyzed);

        handle.resume().unwrap();
        let snapshot = handle.wait();

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(watcher.frames(), (0..100).collect::<Vec<_>>());
        assert_eq!(handle.store().events(), expected);
        assert!(watcher.statuses().contains(&JobStatus::Paused));
    }

    #[test]
    fn test_stop_keeps_only_closed_events() {
        let mut backend = backend();
        backend.script_frames(10..=30, vec![(face(), ALICE.to_vec())]);
        backend.script_frames(46..=70, vec![(face(), ALICE.to_vec())]);
        let job = job(config(), ScriptedVideoReader::new(100), backend);
        let handle = job.handle();
        let job = job.with_observer(Box::new(Watcher::default().acting_at(
            50,
            Action::Stop,
            handle.clone(),
        )));
        job.start().unwrap();
        let snapshot = handle.wait();

        assert_eq!(snapshot.status, JobStatus::Stopped);
        assert_eq!(snapshot.current_frame_index, 50);
        assert_eq!(spans(&handle.store().events()), vec![("alice", 10, 30)]);
        let csv = handle.store().export(ReportFormat::Csv).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(matches!(
            handle.resume(),
            Err(DetectionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_stop_while_paused() {
        let mut backend = backend();
        backend.script_frames(0..=99, vec![(face(), ALICE.to_vec())]);
        let job = job(config(), ScriptedVideoReader::new(100), backend);
        let handle = job.handle();
        let job = job.with_observer(Box::new(Watcher::default().acting_at(
            20,
            Action::Pause,
            handle.clone(),
        )));
        job.start().unwrap();

        wait_for(|| handle.status() == JobStatus::Paused);
        handle.stop().unwrap();
        let snapshot = handle.wait();

        assert_eq!(snapshot.status, JobStatus::Stopped);
        assert_eq!(snapshot.frames_analyzed, 21);
        assert!(handle.store().is_empty());
    }

    #[test]
    fn test_stop_after_final_frame_discards_flushed_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = backend();
        backend.script_frames(80..=99, vec![(face(), ALICE.to_vec())]);
        let job = job(config(), ScriptedVideoReader::new(100), backend).with_crop_output(
            CropOutput::new(dir.path(), Box::new(ImageFileWriter::new())),
        );
        let handle = job.handle();
        let job = job.with_observer(Box::new(Watcher::default().acting_at(
            99,
            Action::Stop,
            handle.clone(),
        )));
        job.start().unwrap();
        let snapshot = handle.wait();

        assert_eq!(snapshot.status, JobStatus::Stopped);
        assert_eq!(snapshot.events_recorded, 0);
        assert!(handle.store().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Notes, for each announced event, whether the store already held it.
    struct StoreWatcher {
        store: DetectionStoreView,
        seen: Arc<Mutex<Vec<(u64, bool)>>>,
    }

    impl JobObserver for StoreWatcher {
        fn on_progress(&mut self, _snapshot: &ProgressSnapshot) {}
        fn on_status(&mut self, _status: JobStatus, _snapshot: &ProgressSnapshot) {}
        fn on_event(&mut self, event: &DetectionEvent) {
            let stored = self.store.events().iter().any(|e| e.event_id == event.event_id);
            self.seen.lock().unwrap().push((event.event_id, stored));
        }
        fn on_frame_error(&mut self, _error: &DetectionError) {}
        fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    }

    #[test]
    fn test_events_stored_before_announced() {
        let mut backend = backend();
        backend.script_frames(10..=30, vec![(face(), ALICE.to_vec())]);
        backend.script_frames(80..=99, vec![(face(), ALICE.to_vec())]);
        let job = job(config(), ScriptedVideoReader::new(100), backend);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let store = job.handle().store();
        let job = job.with_observer(Box::new(StoreWatcher {
            store,
            seen: Arc::clone(&seen),
        }));
        run(job);

        assert_eq!(*seen.lock().unwrap(), vec![(1, true), (2, true)]);
    }

    fn clip_config() -> DetectionConfig {
        DetectionConfig {
            frame_skip: 5,
            clip_duration_seconds: 0.2,
            ..config()
        }
    }

    #[test]
    fn test_clip_covers_every_frame_from_track_start() {
        let dir = tempfile::tempdir().unwrap();
        let clips = ClipLog::default();
        let mut backend = backend();
        backend.script_frames(10..=30, vec![(face(), ALICE.to_vec())]);
        let reader = ScriptedVideoReader::new(100).with_decode_error(12);
        let job = job(clip_config(), reader, backend)
            .with_clip_output(ClipOutput::new(dir.path(), Box::new(clips.factory())));
        let (snapshot, events) = run(job);

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.frames_analyzed, 20);
        // Frame 12 is never analyzed, so its decode failure is not counted.
        assert_eq!(snapshot.frames_skipped_on_error, 0);

        let recorded = clips.clips();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].frames, vec![10, 11, 13, 14, 15]);
        assert!(recorded[0].closed);
        assert_eq!(spans(&events), vec![("alice", 10, 30)]);
        assert_eq!(events[0].clip_path, Some(dir.path().join("alice_f10.mp4")));
    }

    #[test]
    fn test_zero_clip_duration_records_nothing() {
        let clips = ClipLog::default();
        let mut backend = backend();
        backend.script_frames(10..=30, vec![(face(), ALICE.to_vec())]);
        let config = DetectionConfig {
            clip_duration_seconds: 0.0,
            ..clip_config()
        };
        let job = job(config, ScriptedVideoReader::new(100), backend)
            .with_clip_output(ClipOutput::new("unused", Box::new(clips.factory())));
        let (_, events) = run(job);

        assert!(clips.clips().is_empty());
        assert_eq!(events[0].clip_path, None);
    }

    #[test]
    fn test_export_ordered_by_timestamp_not_close_order() {
        let mut backend = backend();
        backend.script_frames(10..=80, vec![(face(), BOB.to_vec())]);
        backend.script_frames(
            40..=50,
            vec![(face(), BOB.to_vec()), (other_face(), ALICE.to_vec())],
        );
        let job = job(config(), ScriptedVideoReader::new(100), backend);
        let handle = job.start().unwrap();
        handle.wait();

        let stored: Vec<String> = handle
            .store()
            .events()
            .into_iter()
            .map(|e| e.subject_id)
            .collect();
        assert_eq!(stored, vec!["alice", "bob"]);

        let csv = handle.store().export(ReportFormat::Csv).unwrap();
        let exported: Vec<&str> = csv
            .lines()
            .skip(1)
            .map(|l| l.split(',').nth(1).unwrap())
            .collect();
        assert_eq!(exported, vec!["bob", "alice"]);
    }

    #[test]
    fn test_decode_error_skipped_under_skip_policy() {
        let mut backend = backend();
        backend.script_frames(10..=30, vec![(face(), ALICE.to_vec())]);
        let reader = ScriptedVideoReader::new(50).with_decode_error(15);
        let watcher = Watcher::default();
        let job = job(config(), reader, backend).with_observer(Box::new(watcher.clone()));
        let (snapshot, events) = run(job);

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.frames_skipped_on_error, 1);
        assert_eq!(snapshot.frames_analyzed, 49);
        assert_eq!(*watcher.frame_errors.lock().unwrap(), 1);
        assert_eq!(spans(&events), vec![("alice", 10, 30)]);
    }

    #[test]
    fn test_decode_error_fails_under_abort_policy() {
        let config = DetectionConfig {
            decode_error_policy: DecodeErrorPolicy::Abort,
            ..config()
        };
        let reader = ScriptedVideoReader::new(50).with_decode_error(15);
        let (snapshot, _) = run(job(config, reader, backend()));

        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.failure.unwrap().frame_index, Some(15));
    }

    #[test]
    fn test_backend_failure_keeps_prior_events() {
        let mut backend = backend();
        backend.script_frames(10..=20, vec![(face(), ALICE.to_vec())]);
        backend.fail_on_frame(40);
        let (snapshot, events) = run(job(config(), ScriptedVideoReader::new(100), backend));

        assert_eq!(snapshot.status, JobStatus::Failed);
        let failure = snapshot.failure.unwrap();
        assert_eq!(failure.frame_index, Some(40));
        assert!(failure.message.contains("scripted failure"));
        assert_eq!(spans(&events), vec![("alice", 10, 20)]);
    }

    #[test]
    fn test_oversized_frame_pauses_and_reports() {
        let config = DetectionConfig {
            max_frame_pixels: (VIDEO_WIDTH * VIDEO_HEIGHT) as u64,
            ..config()
        };
        let reader = ScriptedVideoReader::new(40).with_oversized_frame(20);
        let job = job(config, reader, backend());
        let handle = job.start().unwrap();

        wait_for(|| handle.status() == JobStatus::Paused);
        let paused = handle.snapshot();
        assert_eq!(paused.current_frame_index, 20);
        assert!(paused.pause_reason.unwrap().contains("resource limit exceeded"));

        handle.resume().unwrap();
        let snapshot = handle.wait();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.frames_skipped_on_error, 1);
        assert_eq!(snapshot.frames_analyzed, 39);
    }

    #[test]
    fn test_best_crop_saved_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let crops_dir = dir.path().join("crops");
        let mut backend = backend();
        backend.script_frames(10..=20, vec![(face(), vec![1.0, 0.2, 0.0])]);
        backend.script_frame(15, vec![(face(), ALICE.to_vec())]);
        let job = job(config(), ScriptedVideoReader::new(40), backend)
            .with_crop_output(CropOutput::new(&crops_dir, Box::new(ImageFileWriter::new())));
        let (_, events) = run(job);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].best_frame_index, 15);
        let path = events[0].saved_face_image_path.clone().unwrap();
        assert_eq!(path, crops_dir.join("alice_1_f15.jpg"));
        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (60, 60));
    }

    #[test]
    fn test_crop_file_name_is_sanitized() {
        let crops = CropOutput::new("/out", Box::new(ImageFileWriter::new()));
        assert_eq!(
            crops.path_for("Jane Doe/2", 3, 120),
            PathBuf::from("/out/Jane_Doe_2_3_f120.jpg")
        );
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let (images, subjects) = references();
        let result = DetectionJob::new(
            DetectionConfig {
                frame_skip: 0,
                ..config()
            },
            "scripted.mp4",
            subjects,
            Box::new(ScriptedVideoReader::new(1)),
            Box::new(images),
            Box::new(backend()),
        );
        assert!(matches!(result, Err(DetectionError::InvalidConfig(_))));
    }
}
