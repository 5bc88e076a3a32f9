//! The single distance → confidence mapping used by every component.
//!
//! `confidence = 1 / (1 + (d / DISTANCE_SCALE)^2)`: equals 1 at distance 0,
//! is strictly decreasing for all `d >= 0`, and approaches 0 as `d` grows.
//! `DISTANCE_SCALE` is the distance that maps to a confidence of exactly 0.5.

/// Distance at which confidence is 0.5.
pub const DISTANCE_SCALE: f64 = 1.0;

/// Maps an embedding distance to a confidence in `[0, 1]`.
///
/// Negative distances are treated as 0 and NaN as "no evidence" (0).
pub fn confidence_from_distance(distance: f64) -> f64 {
    if distance.is_nan() {
        return 0.0;
    }
    let d = distance.max(0.0) / DISTANCE_SCALE;
    (1.0 / (1.0 + d * d)).clamp(0.0, 1.0)
}
