use super::{DetectionPolicy, FaceVerifier, VerifyError};
use crate::detector::FaceDetector;
use crate::jpeg::JpegImage;
use crate::recognizer::FaceRecognizer;
use crate::types::{BoundingBox, Embedding, ImageSlot, Verification};
use std::path::Path;

/// In-process verifier: SCRFD detection, ArcFace embeddings, cosine
/// similarity against a fixed threshold.
pub struct OnnxVerifier {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    policy: DetectionPolicy,
    threshold: f32,
}

impl OnnxVerifier {
    pub fn load(
        scrfd_path: &Path,
        arcface_path: &Path,
        policy: DetectionPolicy,
        threshold: f32,
    ) -> Result<Self, VerifyError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self {
            detector,
            recognizer,
            policy,
            threshold,
        })
    }

    fn embed(&mut self, image: &JpegImage, slot: ImageSlot) -> Result<Embedding, VerifyError> {
        let rgb = image
            .to_rgb()
            .map_err(|source| VerifyError::Image { slot, source })?;
        let faces = self.detector.detect(&rgb)?;
        let face = select_face(&faces, self.policy, slot)?;
        tracing::debug!(%slot, confidence = face.confidence, faces = faces.len(), "face selected");
        Ok(self.recognizer.extract(&rgb, face)?)
    }
}

impl FaceVerifier for OnnxVerifier {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn verify(
        &mut self,
        first: &JpegImage,
        second: &JpegImage,
    ) -> Result<Verification, VerifyError> {
        let a = self.embed(first, ImageSlot::First)?;
        let b = self.embed(second, ImageSlot::Second)?;
        let similarity = a.similarity(&b);
        tracing::debug!(similarity, threshold = self.threshold, "embeddings compared");
        Ok(Verification::from_similarity(similarity, self.threshold))
    }
}

/// Pick the face to compare according to the detection policy.
///
/// `faces` must be sorted by descending confidence, as the detector returns them.
pub fn select_face(
    faces: &[BoundingBox],
    policy: DetectionPolicy,
    slot: ImageSlot,
) -> Result<&BoundingBox, VerifyError> {
    match (policy, faces) {
        (_, []) => Err(VerifyError::NoFaceDetected(slot)),
        (DetectionPolicy::Strict, [face]) => Ok(face),
        (DetectionPolicy::Strict, many) => Err(VerifyError::MultipleFaces {
            slot,
            count: many.len(),
        }),
        (DetectionPolicy::Best, [best, ..]) => Ok(best),
    }
}
