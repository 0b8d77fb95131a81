use thiserror::Error;

/// Failures produced by the segmentation core.
///
/// `ModelLoad` is fatal: it means no execution target produced a usable
/// session. `Inference` and `Decode` are per-tick failures: the pipeline
/// logs them, substitutes a transparent mask and keeps running.
#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("no execution target could load the model (tried: {tried})")]
    ModelLoad {
        tried: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("inference call failed")]
    Inference(#[from] ort::Error),

    #[error("unexpected model output: {0}")]
    Decode(String),
}
