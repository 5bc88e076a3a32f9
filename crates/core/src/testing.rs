//! In-memory stand-ins for the video, image and inference adapters.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::detection::domain::embedding::Embedding;
use crate::detection::domain::face_backend::FaceBackend;
use crate::shared::error::DetectionError;
use crate::shared::frame::Frame;
use crate::shared::region::Region;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::image_reader::ImageReader;
use crate::video::domain::video_reader::VideoReader;
use crate::video::domain::video_writer::VideoWriter;

pub const IMAGE_WIDTH: u32 = 120;
pub const IMAGE_HEIGHT: u32 = 120;
pub const VIDEO_WIDTH: u32 = 160;
pub const VIDEO_HEIGHT: u32 = 120;
pub const VIDEO_FPS: f64 = 25.0;

/// A reference photo identified by `marker` in its first byte.
pub fn marked_frame(marker: u8) -> Frame {
    let mut data = vec![0u8; (IMAGE_WIDTH * IMAGE_HEIGHT * 3) as usize];
    data[0] = marker;
    Frame::new(data, IMAGE_WIDTH, IMAGE_HEIGHT, 3, 0, Duration::ZERO)
}

/// A textured video frame at decode position `index`.
pub fn video_frame(index: usize) -> Frame {
    let (w, h) = (VIDEO_WIDTH as usize, VIDEO_HEIGHT as usize);
    let data = (0..w * h)
        .flat_map(|i| {
            let v = if (i % w + i / w) % 2 == 0 { 220 } else { 30 };
            [v, v, v]
        })
        .collect();
    Frame::new(
        data,
        VIDEO_WIDTH,
        VIDEO_HEIGHT,
        3,
        index,
        Duration::from_secs_f64(index as f64 / VIDEO_FPS),
    )
}

type ScriptedFaces = Vec<(Region, Vec<f32>)>;

/// Face backend answering from a script: reference photos are looked up by
/// marker byte, video frames by index.
#[derive(Default)]
pub struct ScriptedBackend {
    images: HashMap<u8, ScriptedFaces>,
    frames: HashMap<usize, ScriptedFaces>,
    failing_frames: HashSet<usize>,
    embed_calls: usize,
}

impl ScriptedBackend {
    pub fn script_image(&mut self, marker: u8, faces: ScriptedFaces) {
        self.images.insert(marker, faces);
    }

    pub fn script_frame(&mut self, index: usize, faces: ScriptedFaces) {
        self.frames.insert(index, faces);
    }

    /// Shows the same faces on every frame in `range`.
    pub fn script_frames(&mut self, range: std::ops::RangeInclusive<usize>, faces: ScriptedFaces) {
        for index in range {
            self.frames.insert(index, faces.clone());
        }
    }

    pub fn fail_on_frame(&mut self, index: usize) {
        self.failing_frames.insert(index);
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls
    }

    fn faces_for(&self, frame: &Frame) -> Result<&[(Region, Vec<f32>)], DetectionError> {
        if frame.width() == IMAGE_WIDTH {
            return Ok(self
                .images
                .get(&frame.data()[0])
                .map(Vec::as_slice)
                .unwrap_or(&[]));
        }
        if self.failing_frames.contains(&frame.index()) {
            return Err(DetectionError::Inference(format!(
                "scripted failure at frame {}",
                frame.index()
            )));
        }
        Ok(self
            .frames
            .get(&frame.index())
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }
}

impl FaceBackend for ScriptedBackend {
    fn locate_faces(&mut self, frame: &Frame) -> Result<Vec<Region>, DetectionError> {
        Ok(self.faces_for(frame)?.iter().map(|(r, _)| *r).collect())
    }

    fn embed(&mut self, frame: &Frame, region: &Region) -> Result<Embedding, DetectionError> {
        self.embed_calls += 1;
        self.faces_for(frame)?
            .iter()
            .find(|(r, _)| r == region)
            .map(|(_, values)| Embedding::new(values.clone()))
            .ok_or_else(|| DetectionError::Inference(format!("no scripted face at {region:?}")))
    }
}

#[derive(Default)]
pub struct ScriptedImageReader {
    images: HashMap<PathBuf, Frame>,
}

impl ScriptedImageReader {
    pub fn insert(&mut self, path: impl Into<PathBuf>, frame: Frame) {
        self.images.insert(path.into(), frame);
    }
}

impl ImageReader for ScriptedImageReader {
    fn read(&self, path: &Path) -> Result<Frame, DetectionError> {
        self.images.get(path).cloned().ok_or_else(|| {
            DetectionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ))
        })
    }
}

/// Video reader producing `frame_count` textured frames.
pub struct ScriptedVideoReader {
    frame_count: usize,
    decode_errors: HashSet<usize>,
    oversized: HashSet<usize>,
    fail_open: bool,
    opened: bool,
}

impl ScriptedVideoReader {
    pub fn new(frame_count: usize) -> Self {
        Self {
            frame_count,
            decode_errors: HashSet::new(),
            oversized: HashSet::new(),
            fail_open: false,
            opened: false,
        }
    }

    pub fn with_decode_error(mut self, index: usize) -> Self {
        self.decode_errors.insert(index);
        self
    }

    /// Frames at these positions come out wider than [`VIDEO_WIDTH`].
    pub fn with_oversized_frame(mut self, index: usize) -> Self {
        self.oversized.insert(index);
        self
    }

    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::new(0)
        }
    }
}

impl VideoReader for ScriptedVideoReader {
    fn open(&mut self, path: &Path) -> Result<VideoMetadata, DetectionError> {
        if self.fail_open {
            return Err(DetectionError::Media {
                path: path.to_path_buf(),
                reason: "no video stream".into(),
            });
        }
        self.opened = true;
        Ok(VideoMetadata {
            width: VIDEO_WIDTH,
            height: VIDEO_HEIGHT,
            fps: VIDEO_FPS,
            total_frames: self.frame_count,
            codec: "scripted".into(),
            source_path: Some(path.to_path_buf()),
        })
    }

    fn frames(&mut self) -> Box<dyn Iterator<Item = Result<Frame, DetectionError>> + '_> {
        if !self.opened {
            return Box::new(std::iter::empty());
        }
        Box::new((0..self.frame_count).map(move |index| {
            if self.decode_errors.contains(&index) {
                return Err(DetectionError::FrameDecode {
                    index,
                    reason: "scripted corruption".into(),
                });
            }
            if self.oversized.contains(&index) {
                let (w, h) = (VIDEO_WIDTH * 2, VIDEO_HEIGHT);
                return Ok(Frame::new(
                    vec![0u8; (w * h * 3) as usize],
                    w,
                    h,
                    3,
                    index,
                    Duration::from_secs_f64(index as f64 / VIDEO_FPS),
                ));
            }
            Ok(video_frame(index))
        }))
    }

    fn close(&mut self) {
        self.opened = false;
    }
}

/// One file a [`ScriptedVideoWriter`] was asked to produce.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedClip {
    pub path: PathBuf,
    pub frames: Vec<usize>,
    pub closed: bool,
}

/// Shared record of every clip written by writers from [`ClipLog::factory`].
#[derive(Clone, Default)]
pub struct ClipLog {
    clips: Arc<Mutex<Vec<RecordedClip>>>,
}

impl ClipLog {
    pub fn clips(&self) -> Vec<RecordedClip> {
        self.clips.lock().unwrap().clone()
    }

    pub fn factory(&self) -> impl Fn() -> Box<dyn VideoWriter> + Send + 'static {
        let log = self.clone();
        move || -> Box<dyn VideoWriter> {
            Box::new(ScriptedVideoWriter {
                log: log.clone(),
                current: None,
            })
        }
    }
}

/// Video writer that records frame indices instead of encoding.
pub struct ScriptedVideoWriter {
    log: ClipLog,
    current: Option<usize>,
}

impl VideoWriter for ScriptedVideoWriter {
    fn open(&mut self, path: &Path, metadata: &VideoMetadata) -> Result<(), DetectionError> {
        assert_eq!((metadata.width, metadata.height), (VIDEO_WIDTH, VIDEO_HEIGHT));
        let mut clips = self.log.clips.lock().unwrap();
        clips.push(RecordedClip {
            path: path.to_path_buf(),
            frames: Vec::new(),
            closed: false,
        });
        self.current = Some(clips.len() - 1);
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), DetectionError> {
        let current = self.current.expect("write before open");
        let mut clips = self.log.clips.lock().unwrap();
        if (frame.width(), frame.height()) != (VIDEO_WIDTH, VIDEO_HEIGHT) {
            return Err(DetectionError::Encode {
                path: clips[current].path.clone(),
                reason: "frame size changed".into(),
            });
        }
        clips[current].frames.push(frame.index());
        Ok(())
    }

    fn close(&mut self) -> Result<(), DetectionError> {
        if let Some(current) = self.current.take() {
            self.log.clips.lock().unwrap()[current].closed = true;
        }
        Ok(())
    }
}
