use std::collections::HashMap;
use std::path::PathBuf;

use crate::pipeline::detection_job::file_safe;
use crate::shared::error::DetectionError;
use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::video_writer::VideoWriter;

/// Builds a fresh, unopened writer for each clip.
pub type VideoWriterFactory = Box<dyn Fn() -> Box<dyn VideoWriter> + Send>;

/// Where detection clips are written.
pub struct ClipOutput {
    dir: PathBuf,
    new_writer: VideoWriterFactory,
}

impl ClipOutput {
    pub fn new(dir: impl Into<PathBuf>, new_writer: VideoWriterFactory) -> Self {
        Self {
            dir: dir.into(),
            new_writer,
        }
    }

    pub(crate) fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// `<subject>_f<frame>.mp4`
    fn path_for(&self, subject_id: &str, frame_index: usize) -> PathBuf {
        self.dir
            .join(format!("{}_f{frame_index}.mp4", file_safe(subject_id)))
    }
}

struct ActiveClip {
    subject_id: String,
    path: PathBuf,
    writer: Box<dyn VideoWriter>,
    remaining: usize,
}

/// Records a fixed-length clip of every decoded frame from the moment a
/// subject's appearance starts.
///
/// One clip per subject records at a time. An appearance starting while its
/// subject's clip is still recording shares that clip.
pub(crate) struct ClipRecorder {
    output: ClipOutput,
    metadata: VideoMetadata,
    frames_per_clip: usize,
    active: Vec<ActiveClip>,
    assigned: HashMap<(String, usize), PathBuf>,
}

impl ClipRecorder {
    pub(crate) fn new(output: ClipOutput, metadata: VideoMetadata, duration_seconds: f64) -> Self {
        let frames_per_clip = ((metadata.nominal_fps() * duration_seconds).round() as usize).max(1);
        Self {
            output,
            metadata,
            frames_per_clip,
            active: Vec::new(),
            assigned: HashMap::new(),
        }
    }

    /// Appends `frame` to every clip still recording and closes the full ones.
    pub(crate) fn feed(&mut self, frame: &Frame) -> Result<(), DetectionError> {
        if self.active.is_empty() {
            return Ok(());
        }
        if !self.fits(frame) {
            log::debug!(
                "Frame {} left out of clips: {}x{} differs from the stream",
                frame.index(),
                frame.width(),
                frame.height()
            );
            return Ok(());
        }
        for clip in &mut self.active {
            clip.writer.write(frame)?;
            clip.remaining -= 1;
        }
        self.close_full()
    }

    /// Marks the start of an appearance of `subject_id` at `frame`.
    pub(crate) fn start(&mut self, subject_id: &str, frame: &Frame) -> Result<(), DetectionError> {
        let path = match self.active.iter().find(|c| c.subject_id == subject_id) {
            Some(clip) => clip.path.clone(),
            None => self.open_clip(subject_id, frame)?,
        };
        self.assigned
            .insert((subject_id.to_string(), frame.index()), path);
        Ok(())
    }

    /// Clip covering the appearance of `subject_id` that began at
    /// `first_frame_index`, if one was started.
    pub(crate) fn take_path(&mut self, subject_id: &str, first_frame_index: usize) -> Option<PathBuf> {
        self.assigned
            .remove(&(subject_id.to_string(), first_frame_index))
    }

    /// Closes every clip still recording. All are closed even if one fails;
    /// the first failure is returned.
    pub(crate) fn finish(&mut self) -> Result<(), DetectionError> {
        let mut first_error = None;
        for mut clip in self.active.drain(..) {
            if let Err(e) = clip.writer.close() {
                log::warn!("Could not finalize clip {}: {e}", clip.path.display());
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn open_clip(&mut self, subject_id: &str, frame: &Frame) -> Result<PathBuf, DetectionError> {
        let path = self.output.path_for(subject_id, frame.index());
        let mut writer = (self.output.new_writer)();
        writer.open(&path, &self.metadata)?;
        let mut remaining = self.frames_per_clip;
        if self.fits(frame) {
            writer.write(frame)?;
            remaining -= 1;
        }
        log::debug!(
            "Recording {} frame(s) for '{subject_id}' to {}",
            self.frames_per_clip,
            path.display()
        );
        self.active.push(ActiveClip {
            subject_id: subject_id.to_string(),
            path: path.clone(),
            writer,
            remaining,
        });
        self.close_full()?;
        Ok(path)
    }

    fn close_full(&mut self) -> Result<(), DetectionError> {
        let (full, recording): (Vec<_>, Vec<_>) =
            self.active.drain(..).partition(|c| c.remaining == 0);
        self.active = recording;
        for mut clip in full {
            clip.writer.close()?;
            log::info!("Saved clip {}", clip.path.display());
        }
        Ok(())
    }

    fn fits(&self, frame: &Frame) -> bool {
        (frame.width(), frame.height()) == (self.metadata.width, self.metadata.height)
    }
}

impl Drop for ClipRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::warn!("Clip left incomplete: {e}");
        }
    }
}
