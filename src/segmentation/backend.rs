use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::ValueType;

use crate::error::SegmentationError;

/// A hardware/software path capable of running the loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExecutionTarget {
    #[value(name = "tensorrt", alias = "trt")]
    TensorRT,
    Cuda,
    Cpu,
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TensorRT => write!(f, "tensorrt"),
            Self::Cuda => write!(f, "cuda"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

impl ExecutionTarget {
    fn dispatch(self) -> ExecutionProviderDispatch {
        // error_on_failure so an unavailable provider fails the session
        // commit instead of silently running on the CPU, which would make
        // the ordered fallback meaningless.
        match self {
            Self::TensorRT => TensorRTExecutionProvider::default()
                .build()
                .error_on_failure(),
            Self::Cuda => CUDAExecutionProvider::default().build().error_on_failure(),
            Self::Cpu => CPUExecutionProvider::default().build(),
        }
    }
}

/// The model's input contract, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInputSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

impl ModelInputSpec {
    pub fn new(name: &str, width: u32, height: u32) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
        }
    }
}

/// A named output tensor, owned so decoders never touch the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        Self { shape, data }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

/// Owns a loaded ONNX session plus the negotiated execution target and the
/// resolved input spec. One backend serves at most one inference at a time.
pub struct InferenceBackend {
    session: Session,
    active: ExecutionTarget,
    input: ModelInputSpec,
    output_names: Vec<String>,
}

impl InferenceBackend {
    /// Tries each execution target in order; the first one to produce a
    /// session wins. `default_input` fills in whatever the session's
    /// metadata does not declare.
    pub fn load(
        model_path: &Path,
        targets: &[ExecutionTarget],
        default_input: ModelInputSpec,
    ) -> Result<Self, SegmentationError> {
        let (session, active) = negotiate(targets, |target| {
            Session::builder()?
                .with_execution_providers([target.dispatch()])?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(4)?
                .commit_from_file(model_path)
                .with_context(|| format!("failed to load model from {}", model_path.display()))
        })?;

        let input = resolve_input_spec(&session, default_input);
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        tracing::info!(
            "model loaded on {active}: input '{}' {}x{}, outputs {:?}",
            input.name,
            input.width,
            input.height,
            output_names
        );

        Ok(Self {
            session,
            active,
            input,
            output_names,
        })
    }

    pub fn active_target(&self) -> ExecutionTarget {
        self.active
    }

    pub fn input_spec(&self) -> &ModelInputSpec {
        &self.input
    }

    /// Runs one inference over an NCHW [1, 3, H, W] pixel buffer and
    /// returns every output as an owned named tensor.
    pub fn run(&mut self, pixels: Vec<f32>) -> Result<Vec<(String, Tensor)>, SegmentationError> {
        let shape = [
            1usize,
            3,
            self.input.height as usize,
            self.input.width as usize,
        ];
        let input = ort::value::Tensor::from_array((shape, pixels.into_boxed_slice()))?;
        let outputs = self
            .session
            .run(ort::inputs![self.input.name.as_str() => input])?;

        let mut tensors = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let (shape, data) = outputs[name.as_str()].try_extract_tensor::<f32>()?;
            let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            tensors.push((name.clone(), Tensor::new(shape, data.to_vec())));
        }
        Ok(tensors)
    }
}

/// Ordered fallback over execution targets. Generic over the session
/// constructor so the negotiation logic is testable without a model file.
fn negotiate<S>(
    targets: &[ExecutionTarget],
    mut build: impl FnMut(ExecutionTarget) -> Result<S>,
) -> Result<(S, ExecutionTarget), SegmentationError> {
    let mut last: Option<anyhow::Error> = None;
    for &target in targets {
        match build(target) {
            Ok(session) => {
                tracing::info!("execution target '{target}' active");
                return Ok((session, target));
            }
            Err(e) => {
                tracing::warn!("execution target '{target}' unavailable: {e:#}");
                last = Some(e);
            }
        }
    }

    let tried = targets
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    Err(SegmentationError::ModelLoad {
        tried,
        source: match last {
            Some(e) => e.into(),
            None => "no execution targets configured".into(),
        },
    })
}

fn resolve_input_spec(session: &Session, default: ModelInputSpec) -> ModelInputSpec {
    let Some(input) = session.inputs.first() else {
        return default;
    };

    let mut spec = ModelInputSpec {
        name: input.name.clone(),
        ..default
    };

    if let ValueType::Tensor { ref shape, .. } = input.input_type {
        let dims: Vec<i64> = shape.iter().copied().collect();
        if dims.len() >= 2 {
            let h = dims[dims.len() - 2];
            let w = dims[dims.len() - 1];
            // Dynamic axes are reported as -1; keep the default for those.
            if w > 0 && h > 0 {
                spec.width = w as u32;
                spec.height = h as u32;
            }
        }
    }

    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn negotiation_falls_back_to_second_target() {
        let (session, active) = negotiate(
            &[ExecutionTarget::Cuda, ExecutionTarget::Cpu],
            |target| match target {
                ExecutionTarget::Cuda => Err(anyhow!("always fails to construct")),
                other => Ok(format!("session on {other}")),
            },
        )
        .unwrap();

        assert_eq!(active, ExecutionTarget::Cpu);
        assert_eq!(session, "session on cpu");
    }

    #[test]
    fn negotiation_stops_at_first_success() {
        let mut attempts = Vec::new();
        let (_, active) = negotiate(
            &[ExecutionTarget::TensorRT, ExecutionTarget::Cuda, ExecutionTarget::Cpu],
            |target| {
                attempts.push(target);
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(active, ExecutionTarget::TensorRT);
        assert_eq!(attempts, vec![ExecutionTarget::TensorRT]);
    }

    #[test]
    fn negotiation_reports_last_error_when_all_fail() {
        let err = negotiate(
            &[ExecutionTarget::Cuda, ExecutionTarget::Cpu],
            |target| -> Result<()> { Err(anyhow!("{target} refused")) },
        )
        .unwrap_err();

        match err {
            SegmentationError::ModelLoad { tried, source } => {
                assert_eq!(tried, "cuda, cpu");
                assert!(source.to_string().contains("cpu refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn negotiation_with_no_targets_is_model_load_error() {
        let err = negotiate(&[], |_| -> Result<()> { Ok(()) }).unwrap_err();
        assert!(matches!(err, SegmentationError::ModelLoad { .. }));
    }

    #[test]
    fn target_names_round_trip() {
        assert_eq!(ExecutionTarget::TensorRT.to_string(), "tensorrt");
        assert_eq!(ExecutionTarget::Cuda.to_string(), "cuda");
        assert_eq!(ExecutionTarget::Cpu.to_string(), "cpu");
    }
}
