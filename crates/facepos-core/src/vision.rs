//! Frame handling between the request layer and the store: data-URL image
//! decode/encode, face cropping, and the detector/embedder seams.
//!
//! Detection and embedding are external capabilities; this module only fixes
//! their shapes and the 128x128 crop the embedding model expects.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

use crate::types::Embedding;

/// Side length of the square face crop fed to the embedding model.
pub const FACE_INPUT_SIZE: u32 = 128;

const BASE64_MARKER: &str = ";base64,";
const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("invalid base64 image payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face box {bbox:?} does not overlap the {width}x{height} frame")]
    BoxOutOfFrame {
        bbox: BoundingBox,
        width: u32,
        height: u32,
    },
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Face region in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
        }
    }

    /// Box covering the whole frame.
    pub fn full(frame: &RgbImage) -> Self {
        Self::new(0.0, 0.0, frame.width() as f32, frame.height() as f32)
    }
}

/// Locates the face to embed in a frame.
pub trait FaceDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<BoundingBox, VisionError>;
}

/// Maps a `FACE_INPUT_SIZE` square face crop to an embedding.
pub trait FaceEmbedder {
    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, VisionError>;
}

/// Detector that returns a region found elsewhere (or the whole frame).
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedRegion {
    pub region: Option<BoundingBox>,
}

impl FaceDetector for FixedRegion {
    fn detect(&mut self, frame: &RgbImage) -> Result<BoundingBox, VisionError> {
        Ok(self.region.unwrap_or_else(|| BoundingBox::full(frame)))
    }
}

/// Decode a `data:image/...;base64,` URL (or bare base64) into an RGB frame.
pub fn decode_data_url(data: &str) -> Result<RgbImage, VisionError> {
    let payload = data
        .split_once(BASE64_MARKER)
        .map_or(data, |(_, payload)| payload);
    let bytes = STANDARD.decode(payload.trim())?;
    Ok(image::load_from_memory(&bytes)?.to_rgb8())
}

/// Decode raw image bytes, or a data URL if the bytes start with `data:`.
pub fn decode_frame(bytes: &[u8]) -> Result<RgbImage, VisionError> {
    if bytes.starts_with(b"data:") {
        return decode_data_url(&String::from_utf8_lossy(bytes));
    }
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Encode a frame as a `data:image/png;base64,` URL.
pub fn encode_png_data_url(frame: &RgbImage) -> Result<String, VisionError> {
    let mut buf = Vec::new();
    frame.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(format!("{PNG_DATA_URL_PREFIX}{}", STANDARD.encode(buf)))
}

/// Crop `bbox` (clamped to the frame) and resize it to `size x size`.
pub fn crop_face(frame: &RgbImage, bbox: &BoundingBox, size: u32) -> Result<RgbImage, VisionError> {
    let (w, h) = frame.dimensions();
    let x0 = bbox.x.max(0.0).floor() as u32;
    let y0 = bbox.y.max(0.0).floor() as u32;
    let x1 = ((bbox.x + bbox.width).ceil().max(0.0) as u32).min(w);
    let y1 = ((bbox.y + bbox.height).ceil().max(0.0) as u32).min(h);

    if x1 <= x0 || y1 <= y0 {
        return Err(VisionError::BoxOutOfFrame {
            bbox: *bbox,
            width: w,
            height: h,
        });
    }

    let roi = imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image();
    // Triangle is the closest of the image filters to area averaging on downscale.
    Ok(imageops::resize(&roi, size, size, FilterType::Triangle))
}

/// Detect, crop and embed the face in `frame`. Returns the crop alongside
/// the embedding so callers can echo it back.
pub fn embed_face<D, E>(
    detector: &mut D,
    embedder: &mut E,
    frame: &RgbImage,
) -> Result<(Embedding, RgbImage), VisionError>
where
    D: FaceDetector + ?Sized,
    E: FaceEmbedder + ?Sized,
{
    let bbox = detector.detect(frame)?;
    tracing::debug!(?bbox, "face located");
    let roi = crop_face(frame, &bbox, FACE_INPUT_SIZE)?;
    let embedding = embedder.embed(&roi)?;
    Ok((embedding, roi))
}
