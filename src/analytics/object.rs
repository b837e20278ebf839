use ndarray::ArrayView4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;

use crate::config::{DetectorConfig, InputLayout, OutputKind};

use super::decoder::RawOutput;
use super::detector::{DetectError, InferenceBackend};

fn runtime<E: std::fmt::Display>(e: E) -> DetectError {
    DetectError::Runtime(e.to_string())
}

/// ONNX Runtime session for either an end-to-end box model or a raw grid model.
pub struct OnnxBackend {
    session: Session,
    input_size: u32,
    input_layout: InputLayout,
    output: OutputKind,
}

impl OnnxBackend {
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectError> {
        let builder = Session::builder()
            .map_err(runtime)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(runtime)?
            .with_intra_threads(config.intra_threads)
            .map_err(runtime)?;

        let session = builder
            .commit_from_file(&config.model_path)
            .map_err(runtime)?;

        tracing::info!(
            model = %config.model_path.display(),
            output = ?config.output,
            input_size = config.input_size,
            "onnx session ready"
        );

        Ok(Self {
            session,
            input_size: config.input_size,
            input_layout: config.input_layout,
            output: config.output,
        })
    }
}

impl InferenceBackend for OnnxBackend {
    fn name(&self) -> &'static str {
        match self.output {
            OutputKind::Preboxed => "onnx-preboxed",
            OutputKind::Grid => "onnx-grid",
        }
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn infer(&mut self, input: ArrayView4<'_, f32>) -> Result<RawOutput, DetectError> {
        let tensor = match self.input_layout {
            InputLayout::Nhwc => input.as_standard_layout().into_owned(),
            InputLayout::Nchw => input
                .permuted_axes([0, 3, 1, 2])
                .as_standard_layout()
                .into_owned(),
        };

        let tensor_ref = TensorRef::from_array_view(tensor.view())
            .map_err(runtime)?
            .into_dyn();
        let outputs = self.session.run(ort::inputs![tensor_ref]).map_err(runtime)?;

        let output = outputs[0]
            .try_extract_array::<f32>()
            .map_err(runtime)?
            .to_owned();
        drop(outputs);

        let raw = match self.output {
            OutputKind::Preboxed => RawOutput::preboxed_from_array(output)?,
            OutputKind::Grid => RawOutput::grid_from_array(output)?,
        };
        Ok(raw)
    }
}
