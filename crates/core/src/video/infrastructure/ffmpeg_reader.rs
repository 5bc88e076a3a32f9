use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;

use crate::shared::error::DetectionError;
use crate::shared::frame::Frame;
use crate::shared::video_metadata::{VideoMetadata, FALLBACK_FPS};
use crate::video::domain::video_reader::VideoReader;

/// Decodes video frames via ffmpeg-next (libavformat + libavcodec).
///
/// Converts each decoded frame to RGB24 and wraps it in a [`Frame`] whose
/// timestamp is derived from its decode position and the stream frame rate,
/// or from the frame's pts when the stream reports no usable rate.
pub struct FfmpegReader {
    input_ctx: Option<ffmpeg_next::format::context::Input>,
    video_stream_index: usize,
    metadata: Option<VideoMetadata>,
}

// Safety: FfmpegReader is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegReader {}

impl FfmpegReader {
    pub fn new() -> Self {
        Self {
            input_ctx: None,
            video_stream_index: 0,
            metadata: None,
        }
    }
}

impl Default for FfmpegReader {
    fn default() -> Self {
        Self::new()
    }
}

fn media_error(path: &Path, reason: impl std::fmt::Display) -> DetectionError {
    DetectionError::Media {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

impl VideoReader for FfmpegReader {
    fn open(&mut self, path: &Path) -> Result<VideoMetadata, DetectionError> {
        ffmpeg_next::init().map_err(|e| media_error(path, e))?;

        let ictx = ffmpeg_next::format::input(path).map_err(|e| media_error(path, e))?;

        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| media_error(path, "no video stream found"))?;

        let video_stream_index = stream.index();
        let decoder = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| media_error(path, e))?;

        let rate = stream.rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };

        let metadata = VideoMetadata {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            total_frames: stream.frames().max(0) as usize,
            codec: decoder
                .codec()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
            source_path: Some(path.to_path_buf()),
        };
        log::info!(
            "Opened {}: {}x{} @ {:.2} fps, {} frames ({})",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.fps,
            metadata.total_frames,
            metadata.codec
        );

        self.video_stream_index = video_stream_index;
        self.metadata = Some(metadata.clone());
        self.input_ctx = Some(ictx);

        Ok(metadata)
    }

    fn frames(&mut self) -> Box<dyn Iterator<Item = Result<Frame, DetectionError>> + '_> {
        let (Some(ictx), Some(metadata)) = (self.input_ctx.as_mut(), self.metadata.clone()) else {
            return Box::new(std::iter::once(Err(DetectionError::Media {
                path: PathBuf::new(),
                reason: "FfmpegReader: not opened".into(),
            })));
        };
        let path = metadata.source_path.clone().unwrap_or_default();

        let decoder = ictx
            .stream(self.video_stream_index)
            .ok_or_else(|| media_error(&path, "video stream disappeared"))
            .and_then(|stream| {
                let time_base = stream.time_base();
                ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
                    .and_then(|ctx| ctx.decoder().video())
                    .map(|decoder| (decoder, time_base))
                    .map_err(|e| media_error(&path, e))
            });
        let (decoder, time_base) = match decoder {
            Ok(d) => d,
            Err(e) => return Box::new(std::iter::once(Err(e))),
        };

        Box::new(FfmpegFrameIter {
            ictx,
            decoder,
            scaler: None,
            metadata,
            time_base: (time_base.numerator(), time_base.denominator()),
            last_timestamp: None,
            video_stream_index: self.video_stream_index,
            frame_index: 0,
            flushing: false,
            done: false,
        })
    }

    fn close(&mut self) {
        self.input_ctx = None;
        self.metadata = None;
    }
}

/// Scaler plus the input geometry it was built for.
struct RgbScaler {
    context: scaling::Context,
    input: (Pixel, u32, u32),
}

/// Lazy iterator that decodes video frames one at a time, avoiding the need
/// to buffer the entire video in memory.
struct FfmpegFrameIter<'a> {
    ictx: &'a mut ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: Option<RgbScaler>,
    metadata: VideoMetadata,
    time_base: (i32, i32),
    last_timestamp: Option<Duration>,
    video_stream_index: usize,
    frame_index: usize,
    flushing: bool,
    done: bool,
}

impl FfmpegFrameIter<'_> {
    /// Consumes the next decode position and reports it as corrupt.
    fn decode_error(&mut self, reason: impl std::fmt::Display) -> DetectionError {
        let index = self.frame_index;
        self.frame_index += 1;
        DetectionError::FrameDecode {
            index,
            reason: reason.to_string(),
        }
    }

    fn try_receive(&mut self) -> Option<Result<Frame, DetectionError>> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => Some(self.convert(&decoded)),
            Err(ffmpeg_next::Error::Eof) => None,
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                None
            }
            Err(e) => Some(Err(self.decode_error(e))),
        }
    }

    fn convert(
        &mut self,
        decoded: &ffmpeg_next::util::frame::video::Video,
    ) -> Result<Frame, DetectionError> {
        let (format, width, height) = (decoded.format(), decoded.width(), decoded.height());

        // Rebuild the scaler when the stream changes resolution mid-file.
        let stale = self
            .scaler
            .as_ref()
            .map_or(true, |s| s.input != (format, width, height));
        if stale {
            match scaling::Context::get(
                format,
                width,
                height,
                Pixel::RGB24,
                width,
                height,
                scaling::Flags::BILINEAR,
            ) {
                Ok(context) => {
                    self.scaler = Some(RgbScaler {
                        context,
                        input: (format, width, height),
                    })
                }
                Err(e) => return Err(self.decode_error(e)),
            }
        }

        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
        let scaled = match self.scaler.as_mut() {
            Some(scaler) => scaler.context.run(decoded, &mut rgb_frame),
            None => return Err(self.decode_error("scaler unavailable")),
        };
        if let Err(e) = scaled {
            return Err(self.decode_error(e));
        }

        let pixels = extract_rgb_pixels(&rgb_frame, width, height);
        let index = self.frame_index;
        self.frame_index += 1;
        let timestamp = self.metadata.timestamp_of(index).unwrap_or_else(|| {
            pts_timestamp(decoded.timestamp(), self.time_base, self.last_timestamp)
        });
        self.last_timestamp = Some(timestamp);
        Ok(Frame::new(pixels, width, height, 3, index, timestamp))
    }
}

impl Iterator for FfmpegFrameIter<'_> {
    type Item = Result<Frame, DetectionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if let Some(result) = self.try_receive() {
            return Some(result);
        }

        if self.flushing {
            self.done = true;
            return None;
        }

        loop {
            let Some((stream, packet)) = self.ictx.packets().next() else {
                let _ = self.decoder.send_eof();
                self.flushing = true;
                if let Some(result) = self.try_receive() {
                    return Some(result);
                }
                self.done = true;
                return None;
            };

            if stream.index() != self.video_stream_index {
                continue;
            }

            if let Err(e) = self.decoder.send_packet(&packet) {
                return Some(Err(self.decode_error(e)));
            }

            if let Some(result) = self.try_receive() {
                return Some(result);
            }
        }
    }
}

/// Spacing assumed between frames that carry neither a usable rate nor pts.
fn fallback_frame_interval() -> Duration {
    Duration::from_secs_f64(1.0 / FALLBACK_FPS)
}

/// Timestamp for a frame of a stream without a usable frame rate.
///
/// Uses `pts × time_base` when that moves forward from `previous`, otherwise
/// steps `previous` by one frame at [`FALLBACK_FPS`], keeping timestamps
/// strictly increasing.
fn pts_timestamp(pts: Option<i64>, time_base: (i32, i32), previous: Option<Duration>) -> Duration {
    let (num, den) = time_base;
    let from_pts = pts
        .filter(|&p| p >= 0 && num > 0 && den > 0)
        .map(|p| Duration::from_secs_f64(p as f64 * num as f64 / den as f64));
    match (from_pts, previous) {
        (Some(t), Some(prev)) if t > prev => t,
        (Some(t), None) => t,
        (_, Some(prev)) => prev + fallback_frame_interval(),
        (None, None) => Duration::ZERO,
    }
}

/// Copies pixel data from an ffmpeg frame into a contiguous RGB buffer.
///
/// ffmpeg frames may have padding bytes at the end of each row (stride > width*3).
/// This function strips that padding to produce a tightly-packed pixel buffer.
fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;
    let h = height as usize;

    let mut pixels = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}
