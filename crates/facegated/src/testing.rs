//! Fakes shared by the daemon's unit tests.

use std::io::Cursor;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use facegate_core::{
    AccessGate, Embedding, EmbeddingProvider, EuclideanMatcher, FaceRegion, ProviderError,
    TemplateStore,
};
use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;

/// Pixel (0,0): red = number of faces, green/blue = embedding.
pub struct PixelProvider;

impl EmbeddingProvider for PixelProvider {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, ProviderError> {
        let count = image.get_pixel(0, 0)[0] as usize;
        Ok((0..count)
            .map(|i| FaceRegion {
                x: i as f32,
                y: 0.0,
                width: 1.0,
                height: 1.0,
                confidence: 0.9,
            })
            .collect())
    }

    fn embed(&mut self, image: &RgbImage, _face: &FaceRegion) -> Result<Embedding, ProviderError> {
        let px = image.get_pixel(0, 0);
        Ok(Embedding::new(vec![px[1] as f32 / 255.0, px[2] as f32 / 255.0]))
    }
}

pub struct BrokenProvider;

impl EmbeddingProvider for BrokenProvider {
    fn detect_faces(&mut self, _image: &RgbImage) -> Result<Vec<FaceRegion>, ProviderError> {
        Err(ProviderError::Other("inference session lost".into()))
    }

    fn embed(&mut self, _image: &RgbImage, _face: &FaceRegion) -> Result<Embedding, ProviderError> {
        Err(ProviderError::Other("inference session lost".into()))
    }
}

pub fn face_image(faces: u8, g: u8, b: u8) -> RgbImage {
    RgbImage::from_pixel(4, 4, Rgb([faces, g, b]))
}

pub fn png(image: &RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn data_uri(image: &RgbImage) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png(image)))
}

pub fn gate_in(dir: &TempDir) -> AccessGate {
    let store = Arc::new(TemplateStore::open(dir.path().join("template.bin")));
    AccessGate::new(store, EuclideanMatcher::default())
}
