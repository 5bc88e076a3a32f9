use std::time::Duration;

use crate::detection::domain::confidence::confidence_from_distance;
use crate::detection::domain::face_matcher::CandidateMatch;
use crate::detection::domain::mask_scorer::MaskAssessment;
use crate::shared::frame::Frame;

/// A finished run of matches for one subject, ready to become an event.
#[derive(Clone, Debug)]
pub struct ClosedTrack {
    pub subject_id: String,
    pub first_frame_index: usize,
    pub last_frame_index: usize,
    /// Timestamp of the first matched frame.
    pub timestamp: Duration,
    pub confidence: f64,
    pub mask_detected: bool,
    pub mask_confidence: f64,
    pub best_frame_index: usize,
    /// Face crop from the best-confidence frame.
    pub best_crop: Option<Frame>,
}

#[derive(Debug)]
struct OpenTrack {
    first_frame_index: usize,
    last_frame_index: usize,
    timestamp: Duration,
    best_distance: f64,
    best_frame_index: usize,
    best_crop: Option<Frame>,
    mask_detected: bool,
    mask_confidence: f64,
}

impl OpenTrack {
    fn start(frame: &Frame, candidate: &CandidateMatch, mask: MaskAssessment) -> Self {
        Self {
            first_frame_index: frame.index(),
            last_frame_index: frame.index(),
            timestamp: frame.timestamp(),
            best_distance: candidate.distance,
            best_frame_index: frame.index(),
            best_crop: frame.crop(&candidate.face_region),
            mask_detected: mask.detected,
            mask_confidence: mask.confidence,
        }
    }

    /// Folds in a later match, keeping the strongest evidence seen so far.
    fn extend(&mut self, frame: &Frame, candidate: &CandidateMatch, mask: MaskAssessment) {
        self.last_frame_index = frame.index();
        if candidate.distance < self.best_distance {
            self.best_distance = candidate.distance;
            self.best_frame_index = frame.index();
            self.best_crop = frame.crop(&candidate.face_region);
        }
        self.mask_detected |= mask.detected;
        self.mask_confidence = self.mask_confidence.max(mask.confidence);
    }

    fn close(self, subject_id: String) -> ClosedTrack {
        ClosedTrack {
            subject_id,
            first_frame_index: self.first_frame_index,
            last_frame_index: self.last_frame_index,
            timestamp: self.timestamp,
            confidence: confidence_from_distance(self.best_distance),
            mask_detected: self.mask_detected,
            mask_confidence: self.mask_confidence,
            best_frame_index: self.best_frame_index,
            best_crop: self.best_crop,
        }
    }
}

/// Collapses per-frame matches into one track per continuous appearance.
///
/// Per subject: idle until the first match, tracking while matches keep
/// arriving within `gap_tolerance` frames (native rate) of the previous one,
/// closed once the gap is exceeded or the stream ends. Input must arrive in
/// strictly increasing frame order.
pub struct TrackAggregator {
    gap_tolerance: usize,
    open: Vec<(String, OpenTrack)>,
    last_frame_index: Option<usize>,
}

impl TrackAggregator {
    pub fn new(gap_tolerance: usize) -> Self {
        Self {
            gap_tolerance,
            open: Vec::new(),
            last_frame_index: None,
        }
    }

    /// Processes one analyzed frame and its matches.
    ///
    /// Returns tracks closed because `frame` lies beyond their gap
    /// tolerance, ordered by first frame.
    pub fn observe(
        &mut self,
        frame: &Frame,
        matches: &[(CandidateMatch, MaskAssessment)],
    ) -> Vec<ClosedTrack> {
        let index = frame.index();
        debug_assert!(
            self.last_frame_index.map_or(true, |last| index > last),
            "frames must arrive in increasing order"
        );
        self.last_frame_index = Some(index);

        let closed = self.close_stale(index);

        for (candidate, mask) in matches {
            match self
                .open
                .iter_mut()
                .find(|(id, _)| *id == candidate.subject_id)
            {
                Some((_, track)) => track.extend(frame, candidate, *mask),
                None => {
                    log::debug!(
                        "Track started for '{}' at frame {}",
                        candidate.subject_id,
                        index
                    );
                    self.open.push((
                        candidate.subject_id.clone(),
                        OpenTrack::start(frame, candidate, *mask),
                    ));
                }
            }
        }
        closed
    }

    /// Closes every open track; used at end of stream.
    pub fn finish(&mut self) -> Vec<ClosedTrack> {
        let mut closed: Vec<ClosedTrack> = self
            .open
            .drain(..)
            .map(|(id, track)| track.close(id))
            .collect();
        closed.sort_by_key(|t| t.first_frame_index);
        closed
    }

    pub fn open_tracks(&self) -> usize {
        self.open.len()
    }

    /// Subjects whose current track began at frame `index`.
    pub fn started_at(&self, index: usize) -> Vec<String> {
        self.open
            .iter()
            .filter(|(_, track)| track.first_frame_index == index)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn close_stale(&mut self, index: usize) -> Vec<ClosedTrack> {
        let tolerance = self.gap_tolerance;
        let (stale, fresh): (Vec<_>, Vec<_>) = self
            .open
            .drain(..)
            .partition(|(_, track)| index.saturating_sub(track.last_frame_index + 1) > tolerance);
        self.open = fresh;

        let mut closed: Vec<ClosedTrack> = stale
            .into_iter()
            .map(|(id, track)| {
                log::debug!(
                    "Track closed for '{}' (frames {}-{})",
                    id,
                    track.first_frame_index,
                    track.last_frame_index
                );
                track.close(id)
            })
            .collect();
        closed.sort_by_key(|t| t.first_frame_index);
        closed
    }
}
