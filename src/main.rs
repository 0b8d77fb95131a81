use anyhow::{Context, Result};
use clap::Parser;

use backdrop::background::{parse_hex_color, BackgroundEffect, FitMode};
use backdrop::capture::WebcamCapture;
use backdrop::output::V4L2Output;
use backdrop::pipeline::Pipeline;
use backdrop::segmentation::{ExecutionTarget, ModelKind, Segmentor};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1920)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 1080)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to the segmentation model (ONNX file)
    #[arg(long)]
    model: String,

    /// Structural family of the model
    #[arg(long, value_enum, default_value_t = ModelKind::Instance)]
    model_kind: ModelKind,

    /// Ordered list of execution targets; the first one that loads wins
    #[arg(long, value_enum, value_delimiter = ',',
          default_values_t = [ExecutionTarget::Cuda, ExecutionTarget::Cpu])]
    execution_targets: Vec<ExecutionTarget>,

    /// Background color as #rrggbb (used when no image is given)
    #[arg(long, default_value = "#1e1e1e")]
    background_color: String,

    /// Background image path; overrides the background color
    #[arg(long)]
    background_image: Option<String>,

    /// How the background image is fitted to the frame
    #[arg(long, value_enum, default_value_t = FitMode::Stretch)]
    background_fit: FitMode,

    /// Show the mask (grayscale silhouette) instead of the composite
    #[arg(long)]
    show_matte: bool,
}

fn build_background(args: &Args) -> Result<BackgroundEffect> {
    if let Some(path) = &args.background_image {
        let image = image::open(path)
            .with_context(|| format!("Failed to load background image {path}"))?
            .into_rgba8();
        return Ok(BackgroundEffect::Image {
            image,
            fit: args.background_fit,
        });
    }
    let color = parse_hex_color(&args.background_color)?;
    Ok(BackgroundEffect::SolidColor(color))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Backdrop starting");

    // Initialize capture
    let capture = WebcamCapture::new(args.input_device, args.capture_width, args.capture_height)
        .context("Failed to initialize webcam capture")?;

    // Initialize output
    let output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;

    // Load the segmentation model with ordered execution-target fallback
    tracing::info!(
        "Loading {} segmentation model from {}",
        args.model_kind,
        args.model
    );
    let segmentor = Segmentor::new(
        args.model.as_ref(),
        args.model_kind,
        &args.execution_targets,
    )
    .context("Failed to load segmentation model")?;
    tracing::info!("Active execution target: {}", segmentor.active_target());

    let background = build_background(&args)?;

    let mut pipeline = Pipeline::new(
        capture,
        output,
        segmentor,
        background,
        args.fps,
        args.show_matte,
    );

    tracing::info!("Press Ctrl+C to stop");
    pipeline.run()
}
