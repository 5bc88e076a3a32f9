use std::time::Duration;

use ndarray::ArrayView3;

use crate::shared::region::Region;

/// A single decoded video/image frame: contiguous RGB bytes in row-major order.
///
/// `index` is the true decode position in the source, so `timestamp` stays
/// wall-clock accurate even when frames are sampled with a stride.
/// Frames are immutable once produced.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
    timestamp: Duration,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
        index: usize,
        timestamp: Duration,
    ) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
            timestamp,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Copies the part of `region` that lies inside the frame.
    ///
    /// Returns `None` when the clamped region is empty. The crop keeps the
    /// source frame's index and timestamp.
    pub fn crop(&self, region: &Region) -> Option<Frame> {
        let clamped = region.clamp_to(self.width, self.height)?;
        let channels = self.channels as usize;
        let row_len = self.width as usize * channels;
        let x1 = clamped.x as usize * channels;
        let x2 = x1 + clamped.width as usize * channels;

        let mut data = Vec::with_capacity(clamped.area() as usize * channels);
        for row in clamped.y as usize..(clamped.y + clamped.height) as usize {
            let start = row * row_len;
            data.extend_from_slice(&self.data[start + x1..start + x2]);
        }

        Some(Frame::new(
            data,
            clamped.width as u32,
            clamped.height as u32,
            self.channels,
            self.index,
            self.timestamp,
        ))
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
