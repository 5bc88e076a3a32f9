use crate::detection::domain::face_backend::FaceBackend;
use crate::detection::domain::reference_gallery::Gallery;
use crate::shared::error::DetectionError;
use crate::shared::frame::Frame;
use crate::shared::region::Region;

/// A face in one frame that is close enough to a gallery subject.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateMatch {
    pub frame_index: usize,
    pub subject_id: String,
    pub distance: f64,
    pub face_region: Region,
}

/// Matches localized faces against a [`Gallery`].
pub struct FaceMatcher {
    threshold: f64,
    max_faces: usize,
}

impl FaceMatcher {
    pub fn new(threshold: f64, max_faces: usize) -> Self {
        Self {
            threshold,
            max_faces: max_faces.max(1),
        }
    }

    /// Candidate matches for one frame, at most one per subject.
    ///
    /// Only the `max_faces` largest regions are embedded. Each region is
    /// claimed by at most one subject (the closest under the threshold), and
    /// when several regions match the same subject the closest one wins.
    /// Output is ordered by gallery subject order.
    pub fn match_frame(
        &self,
        frame: &Frame,
        gallery: &Gallery,
        backend: &mut dyn FaceBackend,
    ) -> Result<Vec<CandidateMatch>, DetectionError> {
        let regions = self.select_regions(backend.locate_faces(frame)?);

        let mut best: Vec<Option<CandidateMatch>> = vec![None; gallery.subject_count()];
        for region in regions {
            let embedding = backend.embed(frame, &region)?;
            let closest = gallery
                .subject_distances(&embedding)
                .enumerate()
                .filter(|(_, (_, d))| *d <= self.threshold)
                .min_by(|a, b| a.1 .1.total_cmp(&b.1 .1));

            let Some((slot, (subject_id, distance))) = closest else {
                continue;
            };
            let is_better = best[slot]
                .as_ref()
                .map_or(true, |current| distance < current.distance);
            if is_better {
                best[slot] = Some(CandidateMatch {
                    frame_index: frame.index(),
                    subject_id: subject_id.to_string(),
                    distance,
                    face_region: region,
                });
            }
        }

        Ok(best.into_iter().flatten().collect())
    }

    /// Largest regions first, capped at `max_faces`. Ties break on position
    /// so the selection is stable across runs.
    fn select_regions(&self, mut regions: Vec<Region>) -> Vec<Region> {
        regions.retain(|r| r.area() > 0);
        if regions.len() > self.max_faces {
            log::debug!(
                "Frame has {} faces, analyzing the {} largest",
                regions.len(),
                self.max_faces
            );
        }
        regions.sort_by(|a, b| {
            b.area()
                .cmp(&a.area())
                .then(a.y.cmp(&b.y))
                .then(a.x.cmp(&b.x))
        });
        regions.truncate(self.max_faces);
        regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::embedding::Embedding;
    use crate::detection::domain::reference_gallery::ReferenceEmbedding;
    use crate::testing::{video_frame, ScriptedBackend};
    use approx::assert_relative_eq;
    use std::path::PathBuf;

    fn gallery() -> Gallery {
        let reference = |subject: &str, values: Vec<f32>| ReferenceEmbedding {
            subject_id: subject.to_string(),
            source_image_path: PathBuf::from(format!("{subject}.jpg")),
            embedding: Embedding::new(values),
        };
        Gallery::from_embeddings(vec![
            reference("alice", vec![1.0, 0.0, 0.0]),
            reference("bob", vec![0.0, 1.0, 0.0]),
        ])
    }

    fn region(x: i32, size: i32) -> Region {
        Region::new(x, 10, size, size)
    }

    #[test]
    fn test_no_faces_no_matches() {
        let mut backend = ScriptedBackend::default();
        let matcher = FaceMatcher::new(1.0, 20);
        let matches = matcher
            .match_frame(&video_frame(0), &gallery(), &mut backend)
            .unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_match_under_threshold_is_kept() {
        let mut backend = ScriptedBackend::default();
        backend.script_frame(7, vec![(region(0, 30), vec![1.0, 0.1, 0.0])]);
        let matcher = FaceMatcher::new(0.5, 20);
        let matches = matcher
            .match_frame(&video_frame(7), &gallery(), &mut backend)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].subject_id, "alice");
        assert_eq!(matches[0].frame_index, 7);
        assert_eq!(matches[0].face_region, region(0, 30));
        assert!(matches[0].distance < 0.1);
    }

    #[test]
    fn test_match_over_threshold_is_dropped() {
        let mut backend = ScriptedBackend::default();
        backend.script_frame(0, vec![(region(0, 30), vec![0.0, 0.0, 1.0])]);
        let matcher = FaceMatcher::new(1.0, 20);
        let matches = matcher
            .match_frame(&video_frame(0), &gallery(), &mut backend)
            .unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_region_claimed_by_closest_subject_only() {
        let mut backend = ScriptedBackend::default();
        // Under the threshold for both, closer to bob.
        backend.script_frame(0, vec![(region(0, 30), vec![0.6, 0.8, 0.0])]);
        let matcher = FaceMatcher::new(2.0, 20);
        let matches = matcher
            .match_frame(&video_frame(0), &gallery(), &mut backend)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].subject_id, "bob");
    }

    #[test]
    fn test_closest_region_wins_per_subject() {
        let mut backend = ScriptedBackend::default();
        backend.script_frame(
            0,
            vec![
                (region(0, 30), vec![1.0, 0.4, 0.0]),
                (region(50, 30), vec![1.0, 0.05, 0.0]),
            ],
        );
        let matcher = FaceMatcher::new(1.0, 20);
        let matches = matcher
            .match_frame(&video_frame(0), &gallery(), &mut backend)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].face_region, region(50, 30));
        assert_relative_eq!(
            matches[0].distance,
            Embedding::new(vec![1.0, 0.05, 0.0]).distance(&Embedding::new(vec![1.0, 0.0, 0.0])),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_two_subjects_in_one_frame() {
        let mut backend = ScriptedBackend::default();
        backend.script_frame(
            0,
            vec![
                (region(0, 30), vec![0.0, 1.0, 0.0]),
                (region(50, 30), vec![1.0, 0.0, 0.0]),
            ],
        );
        let matcher = FaceMatcher::new(0.5, 20);
        let matches = matcher
            .match_frame(&video_frame(0), &gallery(), &mut backend)
            .unwrap();
        let subjects: Vec<&str> = matches.iter().map(|m| m.subject_id.as_str()).collect();
        assert_eq!(subjects, vec!["alice", "bob"]);
    }

    #[test]
    fn test_only_largest_regions_are_embedded() {
        let mut backend = ScriptedBackend::default();
        backend.script_frame(
            0,
            vec![
                (region(0, 10), vec![1.0, 0.0, 0.0]),
                (region(20, 40), vec![0.0, 1.0, 0.0]),
            ],
        );
        let matcher = FaceMatcher::new(0.5, 1);
        let matches = matcher
            .match_frame(&video_frame(0), &gallery(), &mut backend)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].subject_id, "bob");
        assert_eq!(backend.embed_calls(), 1);
    }

    #[test]
    fn test_matching_is_deterministic() {
        let mut backend = ScriptedBackend::default();
        backend.script_frame(
            3,
            vec![
                (region(0, 30), vec![0.9, 0.2, 0.0]),
                (region(50, 30), vec![0.2, 0.9, 0.0]),
            ],
        );
        let matcher = FaceMatcher::new(1.0, 20);
        let first = matcher
            .match_frame(&video_frame(3), &gallery(), &mut backend)
            .unwrap();
        let second = matcher
            .match_frame(&video_frame(3), &gallery(), &mut backend)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_backend_failure_propagates() {
        let mut backend = ScriptedBackend::default();
        backend.fail_on_frame(2);
        let matcher = FaceMatcher::new(1.0, 20);
        let result = matcher.match_frame(&video_frame(2), &gallery(), &mut backend);
        assert!(matches!(result, Err(DetectionError::Inference(_))));
    }
}
