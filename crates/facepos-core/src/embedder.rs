//! Face embedding model via ONNX Runtime.
//!
//! The model takes a 1x128x128x3 (NHWC) tensor of raw pixel values in BGR
//! channel order, which is how it was trained, and returns one
//! `vector_size`-long embedding. No normalization is applied to the output;
//! the acceptance window is calibrated against raw values.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

use crate::types::Embedding;
use crate::vision::{FaceEmbedder, VisionError, FACE_INPUT_SIZE};

pub struct OnnxEmbedder {
    session: Session,
    vector_size: usize,
}

impl OnnxEmbedder {
    /// Load the embedding model from `model_path`.
    ///
    /// The model must take exactly one input (the NHWC BGR face tensor).
    pub fn load(model_path: &str, vector_size: usize) -> Result<Self, VisionError> {
        if !Path::new(model_path).exists() {
            return Err(VisionError::ModelNotFound(format!(
                "{model_path} (expected an ONNX face embedding model taking 1x{FACE_INPUT_SIZE}x{FACE_INPUT_SIZE}x3 BGR pixels)"
            )));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let input_count = session.inputs().len();
        if input_count != 1 {
            return Err(VisionError::InferenceFailed(format!(
                "{model_path}: face embedding model must have one input tensor, found {input_count}"
            )));
        }

        tracing::info!(
            path = model_path,
            input = session.inputs()[0].name(),
            layout = "NHWC",
            channels = "BGR",
            pixel_range = "0-255 raw",
            crop = FACE_INPUT_SIZE,
            vector_size,
            "face embedding model ready"
        );

        Ok(Self {
            session,
            vector_size,
        })
    }

    /// Pack a face crop into an NHWC float tensor, RGB → BGR.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = FACE_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
        for (x, y, pixel) in face.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let (x, y) = (x as usize, y as usize);
            tensor[[0, y, x, 0]] = b as f32;
            tensor[[0, y, x, 1]] = g as f32;
            tensor[[0, y, x, 2]] = r as f32;
        }
        tensor
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, VisionError> {
        let input = if face.dimensions() == (FACE_INPUT_SIZE, FACE_INPUT_SIZE) {
            Self::preprocess(face)
        } else {
            let resized = imageops::resize(face, FACE_INPUT_SIZE, FACE_INPUT_SIZE, FilterType::Triangle);
            Self::preprocess(&resized)
        };

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::InferenceFailed(format!("reading f32 embedding output: {e}")))?;

        if raw.len() != self.vector_size {
            return Err(VisionError::InferenceFailed(format!(
                "model returned {} values, store is configured for {}-dim embeddings",
                raw.len(),
                self.vector_size
            )));
        }

        Ok(Embedding::new(raw.to_vec()))
    }
}
