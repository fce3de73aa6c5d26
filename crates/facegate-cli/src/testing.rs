//! Fakes shared by the CLI's unit tests.

use facegate_core::{Embedding, EmbeddingProvider, FaceRegion, ProviderError};
use image::{Rgb, RgbImage};

/// Pixel (0,0): red = number of faces, green/blue = embedding.
pub struct PixelProvider;

impl EmbeddingProvider for PixelProvider {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, ProviderError> {
        let count = image.get_pixel(0, 0)[0] as usize;
        Ok((0..count)
            .map(|_| FaceRegion {
                x: 1.0,
                y: 1.0,
                width: 4.0,
                height: 4.0,
                confidence: 0.9,
            })
            .collect())
    }

    fn embed(&mut self, image: &RgbImage, _face: &FaceRegion) -> Result<Embedding, ProviderError> {
        let px = image.get_pixel(0, 0);
        Ok(Embedding::new(vec![px[1] as f32 / 255.0, px[2] as f32 / 255.0]))
    }
}

/// Fails the first `failures` detections, then behaves like [`PixelProvider`].
pub struct FlakyProvider {
    pub failures: usize,
}

impl EmbeddingProvider for FlakyProvider {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, ProviderError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(ProviderError::Other("inference session lost".into()));
        }
        PixelProvider.detect_faces(image)
    }

    fn embed(&mut self, image: &RgbImage, face: &FaceRegion) -> Result<Embedding, ProviderError> {
        PixelProvider.embed(image, face)
    }
}

pub fn face_image(faces: u8, g: u8, b: u8) -> RgbImage {
    RgbImage::from_pixel(16, 16, Rgb([faces, g, b]))
}
