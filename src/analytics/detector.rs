use ndarray::{Array4, ArrayView4};
use opencv::core::Mat;
use opencv::prelude::*;
use thiserror::Error;

use super::decoder::{decode, DecodeError, DecodeParams, DetectionBox, RawOutput};
use super::letterbox::{to_input_tensor, Letterbox};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("empty frame")]
    EmptyFrame,
    #[error("opencv: {0}")]
    Opencv(#[from] opencv::Error),
    #[error("inference runtime: {0}")]
    Runtime(String),
    #[error("tensor shape: {0}")]
    Shape(String),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
}

/// The model call. Implementations receive an NHWC `[1, S, S, 3]` RGB tensor
/// scaled to `[0, 1]` where `S` is `input_size()`.
pub trait InferenceBackend: Send {
    fn name(&self) -> &'static str;

    fn input_size(&self) -> u32;

    fn infer(&mut self, input: ArrayView4<'_, f32>) -> Result<RawOutput, DetectError>;
}

/// Letterboxes a frame, runs the backend and decodes its output back into
/// frame coordinates.
pub struct Detector {
    backend: Box<dyn InferenceBackend>,
    params: DecodeParams,
    pad_color: f64,
}

impl Detector {
    pub fn new(backend: Box<dyn InferenceBackend>, params: DecodeParams, pad_color: f64) -> Self {
        Self {
            backend,
            params,
            pad_color,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Runs one inference on a blank input so shape problems surface at startup.
    pub fn warm_up(&mut self) -> Result<(), DetectError> {
        let size = self.backend.input_size() as usize;
        let input = Array4::<f32>::zeros((1, size, size, 3));
        self.backend.infer(input.view())?;
        Ok(())
    }

    pub fn detect(&mut self, frame: &Mat) -> Result<Vec<DetectionBox>, DetectError> {
        let rows = frame.rows();
        let cols = frame.cols();
        if rows == 0 || cols == 0 {
            return Err(DetectError::EmptyFrame);
        }

        let letterbox = Letterbox::new(cols, rows, self.backend.input_size());
        let padded = letterbox.apply(frame, self.pad_color)?;
        let input = to_input_tensor(&padded)?;

        let raw = self.backend.infer(input.view())?;
        Ok(decode(&raw, &letterbox, &self.params)?)
    }
}
