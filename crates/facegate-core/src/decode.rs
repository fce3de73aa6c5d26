//! Image decoding for uploaded stills and data URIs.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image data is empty")]
    Empty,
    #[error("data URI has no ',' separating header and payload")]
    MissingPayload,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("could not decode image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode encoded image bytes (PNG, JPEG, ...) into an RGB raster.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let image = image::load_from_memory(bytes)?;
    Ok(image.to_rgb8())
}

/// Strip the `data:<mime>;base64,` header, returning the payload.
///
/// Everything up to and including the first comma is the header.
pub fn strip_data_uri(uri: &str) -> Result<&str, DecodeError> {
    uri.split_once(',')
        .map(|(_, payload)| payload.trim())
        .ok_or(DecodeError::MissingPayload)
}

/// Decode the base64 payload of a data URI into raw image bytes.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, DecodeError> {
    let payload = strip_data_uri(uri)?;
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(STANDARD.decode(payload)?)
}
