//! Boundary to the face detection and embedding capability.

use std::path::Path;

use image::RgbImage;
use thiserror::Error;

use crate::config::Settings;
use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Embedding, FaceRegion};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("face detection failed: {0}")]
    Detection(#[from] DetectorError),
    #[error("embedding extraction failed: {0}")]
    Embedding(#[from] RecognizerError),
    #[error("{0}")]
    Other(String),
}

/// Finds faces in an image and turns a detected face into an embedding.
///
/// Implementations may keep mutable inference state, hence `&mut self`.
pub trait EmbeddingProvider {
    /// Detect faces, in the provider's natural order.
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, ProviderError>;

    /// Compute the embedding of one face previously returned by `detect_faces`.
    fn embed(&mut self, image: &RgbImage, face: &FaceRegion) -> Result<Embedding, ProviderError>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, ProviderError> {
        (**self).detect_faces(image)
    }

    fn embed(&mut self, image: &RgbImage, face: &FaceRegion) -> Result<Embedding, ProviderError> {
        (**self).embed(image, face)
    }
}

/// SCRFD detection plus ArcFace embeddings.
pub struct OnnxProvider {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxProvider {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(scrfd_path: &Path, arcface_path: &Path) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self {
            detector,
            recognizer,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ProviderError> {
        Self::load(&settings.scrfd_model_path(), &settings.arcface_model_path())
    }
}

impl EmbeddingProvider for OnnxProvider {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, ProviderError> {
        Ok(self.detector.detect(image)?)
    }

    fn embed(&mut self, image: &RgbImage, face: &FaceRegion) -> Result<Embedding, ProviderError> {
        Ok(self.recognizer.extract(image, face)?)
    }
}
