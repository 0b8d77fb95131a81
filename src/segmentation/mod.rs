mod backend;
mod dense;
mod instance;
mod preprocess;

pub use backend::{ExecutionTarget, InferenceBackend, ModelInputSpec, Tensor};
pub use dense::DenseDecoder;
pub use instance::InstanceDecoder;
pub use preprocess::Preprocessor;

use std::path::Path;

use image::{GrayImage, RgbaImage};

use crate::error::SegmentationError;
use crate::geometry::Letterbox;

/// The structural family of the loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ModelKind {
    /// Detection head plus prototype masks (multi-instance).
    Instance,
    /// Single per-pixel probability map.
    Dense,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instance => write!(f, "instance"),
            Self::Dense => write!(f, "dense"),
        }
    }
}

/// Per-frame mask producer; the seam the pipeline is generic over.
pub trait Segmenter {
    /// Produces a mask sized exactly to the frame. Errors here are
    /// per-tick: the pipeline recovers by substituting an empty mask.
    fn infer(&mut self, frame: &RgbaImage) -> Result<GrayImage, SegmentationError>;

    /// The model's input dimensions, (width, height).
    fn input_size(&self) -> (u32, u32);
}

/// The decoder variants form a closed set dispatched by tag.
enum MaskDecoder {
    Instance(InstanceDecoder),
    Dense(DenseDecoder),
}

/// Composes the inference backend, the letterbox geometry and a decoder
/// variant into `infer(frame) -> frame-aligned mask`.
pub struct Segmentor {
    backend: InferenceBackend,
    preprocessor: Preprocessor,
    decoder: MaskDecoder,
}

impl Segmentor {
    pub fn new(
        model_path: &Path,
        kind: ModelKind,
        targets: &[ExecutionTarget],
    ) -> Result<Self, SegmentationError> {
        // Introspection defaults per model family; overridden by whatever
        // static shape the session declares.
        let default_spec = match kind {
            ModelKind::Instance => ModelInputSpec::new("input", 640, 640),
            ModelKind::Dense => ModelInputSpec::new("image", 256, 256),
        };

        let backend = InferenceBackend::load(model_path, targets, default_spec)?;
        let spec = backend.input_spec();
        let preprocessor = Preprocessor::new(spec.width, spec.height);
        let decoder = match kind {
            ModelKind::Instance => MaskDecoder::Instance(InstanceDecoder::default()),
            ModelKind::Dense => MaskDecoder::Dense(DenseDecoder::default()),
        };

        Ok(Self {
            backend,
            preprocessor,
            decoder,
        })
    }

    /// The execution target that won session negotiation, for diagnostics.
    pub fn active_target(&self) -> ExecutionTarget {
        self.backend.active_target()
    }
}

impl Segmenter for Segmentor {
    fn infer(&mut self, frame: &RgbaImage) -> Result<GrayImage, SegmentationError> {
        let (frame_w, frame_h) = frame.dimensions();
        let spec = self.backend.input_spec();
        let letterbox = Letterbox::new(frame_w, frame_h, spec.width, spec.height);

        let pixels = self.preprocessor.letterbox_to_tensor(frame, &letterbox);
        let outputs = self.backend.run(pixels)?;

        match &self.decoder {
            MaskDecoder::Instance(decoder) => decoder.decode(&outputs, &letterbox),
            MaskDecoder::Dense(decoder) => decoder.decode(&outputs, frame_w, frame_h),
        }
    }

    fn input_size(&self) -> (u32, u32) {
        let spec = self.backend.input_spec();
        (spec.width, spec.height)
    }
}
