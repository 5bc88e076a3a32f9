use std::collections::HashSet;
use std::path::PathBuf;

use crate::detection::domain::embedding::Embedding;
use crate::detection::domain::face_backend::FaceBackend;
use crate::shared::constants::MAX_REFERENCE_IMAGES;
use crate::shared::error::DetectionError;
use crate::video::domain::image_reader::ImageReader;

/// One reference photo's identity vector.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceEmbedding {
    pub subject_id: String,
    pub source_image_path: PathBuf,
    pub embedding: Embedding,
}

/// The photos supplied for one subject before embedding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectReferences {
    pub subject_id: String,
    pub image_paths: Vec<PathBuf>,
}

impl SubjectReferences {
    pub fn new(subject_id: impl Into<String>, image_paths: Vec<PathBuf>) -> Self {
        Self {
            subject_id: subject_id.into(),
            image_paths,
        }
    }
}

/// Subject identity → reference embeddings, immutable for a job's lifetime.
///
/// Every subject holds at least one embedding. Subjects keep the order in
/// which they were supplied.
#[derive(Clone, Debug, Default)]
pub struct Gallery {
    subjects: Vec<(String, Vec<ReferenceEmbedding>)>,
}

impl Gallery {
    /// Embeds every reference photo.
    ///
    /// Each photo must contain exactly one face. Photos beyond
    /// `max_images_per_subject` are ignored with a warning; the cap itself
    /// never exceeds [`MAX_REFERENCE_IMAGES`].
    pub fn build(
        references: &[SubjectReferences],
        reader: &dyn ImageReader,
        backend: &mut dyn FaceBackend,
        max_images_per_subject: usize,
    ) -> Result<Self, DetectionError> {
        if references.is_empty() {
            return Err(DetectionError::InvalidConfig(
                "at least one subject is required".into(),
            ));
        }

        let cap = max_images_per_subject.clamp(1, MAX_REFERENCE_IMAGES);
        let mut seen = HashSet::new();
        let mut embeddings = Vec::new();
        for subject in references {
            if subject.subject_id.trim().is_empty() {
                return Err(DetectionError::InvalidConfig(
                    "subject name must not be empty".into(),
                ));
            }
            if !seen.insert(subject.subject_id.as_str()) {
                return Err(DetectionError::InvalidConfig(format!(
                    "subject '{}' given more than once",
                    subject.subject_id
                )));
            }
            if subject.image_paths.is_empty() {
                return Err(DetectionError::EmptyGallery {
                    subject: subject.subject_id.clone(),
                });
            }
            if subject.image_paths.len() > cap {
                log::warn!(
                    "Subject '{}' has {} reference images, using the first {}",
                    subject.subject_id,
                    subject.image_paths.len(),
                    cap
                );
            }

            for path in subject.image_paths.iter().take(cap) {
                let image = reader.read(path)?;
                let faces = backend.locate_faces(&image)?;
                let face = match faces.as_slice() {
                    [] => return Err(DetectionError::NoFaceFound { path: path.clone() }),
                    [face] => *face,
                    many => {
                        return Err(DetectionError::AmbiguousFace {
                            path: path.clone(),
                            faces: many.len(),
                        })
                    }
                };
                let embedding = backend.embed(&image, &face)?;
                log::debug!(
                    "Embedded reference {} for '{}'",
                    path.display(),
                    subject.subject_id
                );
                embeddings.push(ReferenceEmbedding {
                    subject_id: subject.subject_id.clone(),
                    source_image_path: path.clone(),
                    embedding,
                });
            }
        }

        let gallery = Self::from_embeddings(embeddings);
        log::info!(
            "Reference gallery ready: {} subject(s), {} embedding(s)",
            gallery.subject_count(),
            gallery.embedding_count()
        );
        Ok(gallery)
    }

    /// Groups precomputed embeddings by subject, in first-seen order.
    pub fn from_embeddings(embeddings: Vec<ReferenceEmbedding>) -> Self {
        let mut subjects: Vec<(String, Vec<ReferenceEmbedding>)> = Vec::new();
        for reference in embeddings {
            match subjects.iter_mut().find(|(id, _)| *id == reference.subject_id) {
                Some((_, set)) => set.push(reference),
                None => subjects.push((reference.subject_id.clone(), vec![reference])),
            }
        }
        Self { subjects }
    }

    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }

    pub fn embedding_count(&self) -> usize {
        self.subjects.iter().map(|(_, set)| set.len()).sum()
    }

    /// Distance from `query` to each subject's closest reference.
    ///
    /// The minimum over a subject's set is used rather than an average, so
    /// dissimilar shots of the same person do not blur each other out.
    pub fn subject_distances<'a>(
        &'a self,
        query: &'a Embedding,
    ) -> impl Iterator<Item = (&'a str, f64)> + 'a {
        self.subjects.iter().map(move |(id, set)| {
            let best = set
                .iter()
                .map(|r| r.embedding.distance(query))
                .fold(f64::INFINITY, f64::min);
            (id.as_str(), best)
        })
    }
}

#[cfg(test)]
impl Gallery {
    fn references(&self, subject_id: &str) -> &[ReferenceEmbedding] {
        self.subjects
            .iter()
            .find(|(id, _)| id == subject_id)
            .map(|(_, set)| set.as_slice())
            .unwrap_or(&[])
    }
}
