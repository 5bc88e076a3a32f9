use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::shared::error::DetectionError;
use crate::shared::frame::Frame;
use crate::video::domain::frame_sampler::FrameSampler;
use crate::video::domain::video_reader::VideoReader;

/// Decodes on a dedicated thread into a bounded queue.
///
/// Layout: `reader → sampler → [queue of at most `capacity` frames] → consumer`
///
/// The decoder blocks once the queue is full, which caps the number of
/// decoded-but-unanalyzed frames. Dropping the receiver or setting
/// `cancelled` ends the thread at the next frame.
pub struct FramePump {
    frames: Receiver<Result<Frame, DetectionError>>,
    cancelled: Arc<AtomicBool>,
    decoder: Option<JoinHandle<()>>,
}

impl FramePump {
    pub fn spawn(reader: Box<dyn VideoReader>, stride: usize, capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let cancelled = Arc::new(AtomicBool::new(false));
        let decoder = spawn_decoder(reader, stride, tx, Arc::clone(&cancelled));
        Self {
            frames: rx,
            cancelled,
            decoder: Some(decoder),
        }
    }

    /// Next sampled frame, or `None` at end of stream.
    pub fn recv(&self) -> Option<Result<Frame, DetectionError>> {
        self.frames.recv().ok()
    }

    /// Frames decoded and waiting.
    #[cfg(test)]
    fn queued(&self) -> usize {
        self.frames.len()
    }

    /// Cancels decoding and joins the decoder thread.
    pub fn shutdown(mut self) {
        self.stop_decoder();
    }

    fn stop_decoder(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
        // Unblock a decoder waiting on a full queue.
        while self.frames.try_recv().is_ok() {}
        if let Some(decoder) = self.decoder.take() {
            if decoder.join().is_err() {
                log::error!("Decoder thread panicked");
            }
        }
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        self.stop_decoder();
    }
}

fn spawn_decoder(
    mut reader: Box<dyn VideoReader>,
    stride: usize,
    frame_tx: Sender<Result<Frame, DetectionError>>,
    cancelled: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for frame_result in FrameSampler::new(reader.frames(), stride) {
            if cancelled.load(Ordering::Relaxed) {
                break;
            }
            if frame_tx.send(frame_result).is_err() {
                break;
            }
        }
        reader.close();
    })
}
