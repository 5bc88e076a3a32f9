use std::path::{Path, PathBuf};

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;
use ffmpeg_next::Rational;

use crate::shared::error::DetectionError;
use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::video_writer::VideoWriter;

/// Encodes RGB frames to MPEG-4 via ffmpeg-next.
pub struct FfmpegWriter {
    session: Option<Session>,
}

/// Everything tied to one open output file.
struct Session {
    path: PathBuf,
    octx: ffmpeg_next::format::context::Output,
    encoder: ffmpeg_next::codec::encoder::video::Encoder,
    scaler: scaling::Context,
    width: u32,
    height: u32,
    encoder_time_base: Rational,
    frame_count: i64,
}

// Safety: FfmpegWriter is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegWriter {}

impl FfmpegWriter {
    pub fn new() -> Self {
        Self { session: None }
    }
}

impl Default for FfmpegWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_error(path: &Path, reason: impl std::fmt::Display) -> DetectionError {
    DetectionError::Encode {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

impl VideoWriter for FfmpegWriter {
    fn open(&mut self, path: &Path, metadata: &VideoMetadata) -> Result<(), DetectionError> {
        ffmpeg_next::init().map_err(|e| encode_error(path, e))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut octx = ffmpeg_next::format::output(path).map_err(|e| encode_error(path, e))?;
        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);

        // MPEG-4 part 2 ships with every ffmpeg build.
        let codec = ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::MPEG4)
            .ok_or_else(|| encode_error(path, "MPEG4 encoder not found"))?;
        let mut ost = octx
            .add_stream(Some(codec))
            .map_err(|e| encode_error(path, e))?;

        let mut encoder_ctx = ffmpeg_next::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| encode_error(path, e))?;
        encoder_ctx.set_width(metadata.width);
        encoder_ctx.set_height(metadata.height);
        encoder_ctx.set_format(Pixel::YUV420P);

        let fps = (metadata.nominal_fps().round() as i32).max(1);
        let encoder_time_base = Rational(1, fps);
        encoder_ctx.set_time_base(encoder_time_base);
        encoder_ctx.set_frame_rate(Some(Rational(fps, 1)));
        if global_header {
            encoder_ctx.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }

        let encoder = encoder_ctx
            .open_with(ffmpeg_next::Dictionary::new())
            .map_err(|e| encode_error(path, e))?;
        ost.set_parameters(&encoder);
        octx.write_header().map_err(|e| encode_error(path, e))?;

        let scaler = scaling::Context::get(
            Pixel::RGB24,
            metadata.width,
            metadata.height,
            Pixel::YUV420P,
            metadata.width,
            metadata.height,
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| encode_error(path, e))?;

        log::debug!(
            "Opened clip {} ({}x{} @ {fps} fps)",
            path.display(),
            metadata.width,
            metadata.height
        );
        self.session = Some(Session {
            path: path.to_path_buf(),
            octx,
            encoder,
            scaler,
            width: metadata.width,
            height: metadata.height,
            encoder_time_base,
            frame_count: 0,
        });
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), DetectionError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| encode_error(Path::new(""), "writer not opened"))?;
        session.write(frame)
    }

    fn close(&mut self) -> Result<(), DetectionError> {
        match self.session.take() {
            Some(session) => session.finish(),
            None => Ok(()),
        }
    }
}

impl Session {
    fn write(&mut self, frame: &Frame) -> Result<(), DetectionError> {
        if (frame.width(), frame.height()) != (self.width, self.height) || frame.channels() != 3 {
            return Err(encode_error(
                &self.path,
                format!(
                    "frame {} is {}x{}, stream is {}x{}",
                    frame.index(),
                    frame.width(),
                    frame.height(),
                    self.width,
                    self.height
                ),
            ));
        }

        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::new(
            Pixel::RGB24,
            self.width,
            self.height,
        );
        let stride = rgb_frame.stride(0);
        let row_bytes = self.width as usize * 3;
        let dst = rgb_frame.data_mut(0);
        for (row, src) in frame.data().chunks_exact(row_bytes).enumerate() {
            dst[row * stride..row * stride + row_bytes].copy_from_slice(src);
        }

        let mut yuv_frame = ffmpeg_next::util::frame::video::Video::empty();
        self.scaler
            .run(&rgb_frame, &mut yuv_frame)
            .map_err(|e| encode_error(&self.path, e))?;
        yuv_frame.set_pts(Some(self.frame_count));
        self.encoder
            .send_frame(&yuv_frame)
            .map_err(|e| encode_error(&self.path, e))?;
        self.drain_packets()?;
        self.frame_count += 1;
        Ok(())
    }

    fn drain_packets(&mut self) -> Result<(), DetectionError> {
        let stream_time_base = self
            .octx
            .stream(0)
            .map(|s| s.time_base())
            .ok_or_else(|| encode_error(&self.path, "output stream missing"))?;
        let mut encoded = ffmpeg_next::Packet::empty();
        while self.encoder.receive_packet(&mut encoded).is_ok() {
            encoded.set_stream(0);
            encoded.rescale_ts(self.encoder_time_base, stream_time_base);
            encoded
                .write_interleaved(&mut self.octx)
                .map_err(|e| encode_error(&self.path, e))?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<(), DetectionError> {
        self.encoder
            .send_eof()
            .map_err(|e| encode_error(&self.path, e))?;
        self.drain_packets()?;
        self.octx
            .write_trailer()
            .map_err(|e| encode_error(&self.path, e))?;
        log::debug!(
            "Closed clip {} after {} frame(s)",
            self.path.display(),
            self.frame_count
        );
        Ok(())
    }
}
