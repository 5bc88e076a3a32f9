/// An axis-aligned face bounding box in frame pixel coordinates.
///
/// Coordinates may extend past the frame edges (detectors report faces
/// that are partially out of view); use [`Region::clamp_to`] before
/// indexing pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds a region from floating-point corners, rounding outward.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        let left = x1.min(x2).floor() as i32;
        let top = y1.min(y2).floor() as i32;
        let right = x1.max(x2).ceil() as i32;
        let bottom = y1.max(y2).ceil() as i32;
        Self::new(left, top, right - left, bottom - top)
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    /// Intersection with the `[0, frame_w) x [0, frame_h)` frame extents.
    ///
    /// Returns `None` when nothing of the region is visible.
    pub fn clamp_to(&self, frame_w: u32, frame_h: u32) -> Option<Region> {
        let x1 = self.x.max(0);
        let y1 = self.y.max(0);
        let x2 = (self.x.saturating_add(self.width)).min(frame_w as i32);
        let y2 = (self.y.saturating_add(self.height)).min(frame_h as i32);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Region::new(x1, y1, x2 - x1, y2 - y1))
    }

    /// The bottom `fraction` of the region (e.g. 0.45 = below the eye line).
    pub fn bottom_part(&self, fraction: f64) -> Region {
        let fraction = fraction.clamp(0.0, 1.0);
        let part_h = (self.height as f64 * fraction).round() as i32;
        Region::new(self.x, self.y + self.height - part_h, self.width, part_h)
    }
}
