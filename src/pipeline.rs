use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::GrayImage;

use crate::background::{BackgroundEffect, BackgroundHandle};
use crate::capture::FrameSource;
use crate::compositor::{mask_preview, Compositor};
use crate::output::OutputSink;
use crate::segmentation::Segmenter;

/// The pipeline's lifecycle. `Error` is terminal; everything else cycles
/// Idle -> Initializing -> Running -> Stopping -> Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Initializing,
    Running,
    Stopping,
    Error,
}

enum Tick {
    Presented,
    Skipped,
}

/// Orchestrator: one tick pulls a frame, asks the segmenter for a mask,
/// composites it against the current background effect and presents the
/// result. Strictly sequential; frames are dropped, never queued.
pub struct Pipeline<C, O, S>
where
    C: FrameSource,
    O: OutputSink,
    S: Segmenter,
{
    capture: C,
    output: O,
    segmenter: S,
    compositor: Compositor,
    background: BackgroundHandle,
    state: PipelineState,
    stop: Arc<AtomicBool>,
    target_fps: u32,
    show_matte: bool,

    frame_count: u64,
    total_capture_time: Duration,
    total_segment_time: Duration,
    total_output_time: Duration,
}

impl<C, O, S> Pipeline<C, O, S>
where
    C: FrameSource,
    O: OutputSink,
    S: Segmenter,
{
    pub fn new(
        capture: C,
        output: O,
        segmenter: S,
        background: BackgroundEffect,
        target_fps: u32,
        show_matte: bool,
    ) -> Self {
        Self {
            capture,
            output,
            segmenter,
            compositor: Compositor::new(),
            background: BackgroundHandle::new(background),
            state: PipelineState::Idle,
            stop: Arc::new(AtomicBool::new(false)),
            target_fps,
            show_matte,
            frame_count: 0,
            total_capture_time: Duration::ZERO,
            total_segment_time: Duration::ZERO,
            total_output_time: Duration::ZERO,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Handle for swapping the background effect while the loop runs.
    /// The swap is whole-object and picked up at the start of the next
    /// tick; the tick in flight keeps the effect it already read.
    pub fn background(&self) -> BackgroundHandle {
        self.background.clone()
    }

    /// Replaces the active background effect (atomic swap).
    pub fn replace_background(&self, effect: BackgroundEffect) {
        self.background.replace(effect);
    }

    /// Cooperative stop flag, checked between ticks.
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Runs the tick loop until stopped or a fatal error occurs.
    pub fn run(&mut self) -> Result<()> {
        self.state = PipelineState::Initializing;

        let (cw, ch) = self.capture.resolution();
        let (ow, oh) = self.output.resolution();
        let (mw, mh) = self.segmenter.input_size();
        tracing::info!("Capture: {cw}x{ch}, output: {ow}x{oh}, model input: {mw}x{mh}");
        tracing::info!("Target FPS: {}", self.target_fps);
        tracing::info!("Starting main pipeline loop");

        let frame_duration = Duration::from_secs_f32(1.0 / self.target_fps as f32);
        self.state = PipelineState::Running;

        loop {
            if self.stop.load(Ordering::Relaxed) {
                self.state = PipelineState::Stopping;
                break;
            }

            let loop_start = Instant::now();

            if let Err(e) = self.tick() {
                self.state = PipelineState::Error;
                return Err(e);
            }

            // Frame rate limiting
            let elapsed = loop_start.elapsed();
            if elapsed < frame_duration {
                std::thread::sleep(frame_duration - elapsed);
            }
        }

        tracing::info!("Pipeline stopped after {} frames", self.frame_count);
        self.state = PipelineState::Idle;
        Ok(())
    }

    /// One tick: grab, segment, composite, present.
    ///
    /// A zero-dimension frame is "not ready" and skips the tick; a failed
    /// segmentation is logged and replaced by a transparent mask. Only
    /// capture and present failures bubble up.
    fn tick(&mut self) -> Result<Tick> {
        let capture_start = Instant::now();
        let frame = self.capture.grab().context("Failed to capture frame")?;
        self.total_capture_time += capture_start.elapsed();

        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            tracing::trace!("frame not ready, skipping tick");
            return Ok(Tick::Skipped);
        }

        // Read the effect once per tick so a concurrent swap can never
        // hand us a half-replaced background.
        let effect = self.background.current();

        let segment_start = Instant::now();
        let mask = match self.segmenter.infer(&frame) {
            Ok(mask) => mask,
            Err(e) => {
                tracing::warn!("segmentation failed, substituting empty mask: {e:#}");
                GrayImage::new(width, height)
            }
        };
        self.total_segment_time += segment_start.elapsed();

        let output_start = Instant::now();
        if self.show_matte {
            let preview = mask_preview(&mask);
            self.output
                .write_frame(&preview)
                .context("Failed to write frame")?;
        } else {
            let composited = self.compositor.composite(&frame, &mask, &effect);
            self.output
                .write_frame(composited)
                .context("Failed to write frame")?;
        }
        self.total_output_time += output_start.elapsed();

        self.frame_count += 1;

        // Log stats every 30 frames
        if self.frame_count % 30 == 0 {
            let n = self.frame_count as f64;
            let avg_capture_ms = self.total_capture_time.as_secs_f64() * 1000.0 / n;
            let avg_segment_ms = self.total_segment_time.as_secs_f64() * 1000.0 / n;
            let avg_output_ms = self.total_output_time.as_secs_f64() * 1000.0 / n;
            let total_ms = avg_capture_ms + avg_segment_ms + avg_output_ms;
            let actual_fps = 1000.0 / total_ms;

            tracing::info!(
                "Frame {}: capture={:.1}ms, segment={:.1}ms, output={:.1}ms, total={:.1}ms, fps={:.1}",
                self.frame_count,
                avg_capture_ms,
                avg_segment_ms,
                avg_output_ms,
                total_ms,
                actual_fps
            );
        }

        Ok(Tick::Presented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SegmentationError;
    use image::{Rgba, RgbaImage};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct ScriptedCapture {
        frames: Vec<Option<RgbaImage>>,
        next: usize,
    }

    impl ScriptedCapture {
        fn new(frames: Vec<Option<RgbaImage>>) -> Self {
            Self { frames, next: 0 }
        }
    }

    impl FrameSource for ScriptedCapture {
        fn grab(&mut self) -> Result<RgbaImage> {
            let i = self.next;
            self.next += 1;
            match self.frames.get(i) {
                Some(Some(frame)) => Ok(frame.clone()),
                Some(None) => Ok(RgbaImage::new(0, 0)),
                None => anyhow::bail!("camera unplugged"),
            }
        }

        fn resolution(&self) -> (u32, u32) {
            (16, 8)
        }
    }

    #[derive(Clone, Default)]
    struct CollectingSink {
        frames: Rc<RefCell<Vec<RgbaImage>>>,
    }

    impl OutputSink for CollectingSink {
        fn write_frame(&mut self, frame: &RgbaImage) -> Result<()> {
            self.frames.borrow_mut().push(frame.clone());
            Ok(())
        }

        fn resolution(&self) -> (u32, u32) {
            (16, 8)
        }
    }

    /// Full-foreground, full-background or failing segmenter; optionally
    /// swaps the background mid-inference to probe read-once semantics.
    struct StubSegmenter {
        full: bool,
        fail: bool,
        swap_during_infer: Option<(BackgroundHandle, BackgroundEffect)>,
    }

    impl StubSegmenter {
        fn foreground() -> Self {
            Self {
                full: true,
                fail: false,
                swap_during_infer: None,
            }
        }

        fn background() -> Self {
            Self {
                full: false,
                fail: false,
                swap_during_infer: None,
            }
        }

        fn failing() -> Self {
            Self {
                full: true,
                fail: true,
                swap_during_infer: None,
            }
        }
    }

    impl Segmenter for StubSegmenter {
        fn infer(&mut self, frame: &RgbaImage) -> Result<GrayImage, SegmentationError> {
            if let Some((handle, effect)) = self.swap_during_infer.take() {
                handle.replace(effect);
            }
            if self.fail {
                return Err(SegmentationError::Decode("scripted failure".into()));
            }
            let (w, h) = frame.dimensions();
            let fill = if self.full { 255 } else { 0 };
            Ok(GrayImage::from_pixel(w, h, image::Luma([fill])))
        }

        fn input_size(&self) -> (u32, u32) {
            (8, 8)
        }
    }

    fn frame(color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(16, 8, Rgba(color))
    }

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];

    fn pipeline(
        frames: Vec<Option<RgbaImage>>,
        segmenter: StubSegmenter,
    ) -> (
        Pipeline<ScriptedCapture, CollectingSink, StubSegmenter>,
        Rc<RefCell<Vec<RgbaImage>>>,
    ) {
        let sink = CollectingSink::default();
        let written = sink.frames.clone();
        let pipeline = Pipeline::new(
            ScriptedCapture::new(frames),
            sink,
            segmenter,
            BackgroundEffect::SolidColor(Rgba(BLUE)),
            30,
            false,
        );
        (pipeline, written)
    }

    #[test]
    fn foreground_mask_presents_the_frame() {
        let (mut p, written) =
            pipeline(vec![Some(frame(RED))], StubSegmenter::foreground());
        assert!(matches!(p.tick().unwrap(), Tick::Presented));
        let frames = written.borrow();
        assert!(frames[0].pixels().all(|px| px == &Rgba(RED)));
    }

    #[test]
    fn empty_mask_presents_the_background() {
        let (mut p, written) =
            pipeline(vec![Some(frame(RED))], StubSegmenter::background());
        p.tick().unwrap();
        let frames = written.borrow();
        assert!(frames[0].pixels().all(|px| px == &Rgba(BLUE)));
    }

    #[test]
    fn not_ready_frame_skips_without_presenting() {
        let (mut p, written) = pipeline(vec![None], StubSegmenter::foreground());
        assert!(matches!(p.tick().unwrap(), Tick::Skipped));
        assert!(written.borrow().is_empty());
    }

    #[test]
    fn segmentation_failure_substitutes_empty_mask() {
        // The tick still presents; with an all-transparent mask the
        // output equals the background.
        let (mut p, written) = pipeline(vec![Some(frame(RED))], StubSegmenter::failing());
        assert!(matches!(p.tick().unwrap(), Tick::Presented));
        let frames = written.borrow();
        assert!(frames[0].pixels().all(|px| px == &Rgba(BLUE)));
    }

    #[test]
    fn background_swap_lands_on_the_next_tick() {
        let mut segmenter = StubSegmenter::background();
        let (mut p, written) = pipeline(
            vec![Some(frame(RED)), Some(frame(RED))],
            StubSegmenter::background(),
        );
        // Arm the swap on the real pipeline's segmenter: it fires while
        // tick 1 is already past its once-per-tick effect read.
        segmenter.swap_during_infer = Some((
            p.background(),
            BackgroundEffect::SolidColor(Rgba(GREEN)),
        ));
        p.segmenter = segmenter;

        p.tick().unwrap();
        p.tick().unwrap();

        let frames = written.borrow();
        assert!(frames[0].pixels().all(|px| px == &Rgba(BLUE)), "tick 1 keeps the old effect");
        assert!(frames[1].pixels().all(|px| px == &Rgba(GREEN)), "tick 2 sees the swap");
    }

    #[test]
    fn replace_background_takes_effect() {
        let (mut p, written) = pipeline(
            vec![Some(frame(RED))],
            StubSegmenter::background(),
        );
        p.replace_background(BackgroundEffect::SolidColor(Rgba(GREEN)));
        p.tick().unwrap();
        assert!(written.borrow()[0].pixels().all(|px| px == &Rgba(GREEN)));
    }

    #[test]
    fn capture_failure_ends_run_in_error_state() {
        let (mut p, _) = pipeline(vec![Some(frame(RED))], StubSegmenter::foreground());
        // Second grab fails: the scripted capture runs out of frames.
        let err = p.run().unwrap_err();
        assert!(err.to_string().contains("Failed to capture frame"));
        assert_eq!(p.state(), PipelineState::Error);
    }

    #[test]
    fn stop_flag_returns_pipeline_to_idle() {
        let (mut p, _) = pipeline(vec![], StubSegmenter::foreground());
        p.stop_signal().store(true, Ordering::Relaxed);
        p.run().unwrap();
        assert_eq!(p.state(), PipelineState::Idle);
    }

    #[test]
    fn show_matte_presents_the_mask_preview() {
        let sink = CollectingSink::default();
        let written = sink.frames.clone();
        let mut p = Pipeline::new(
            ScriptedCapture::new(vec![Some(frame(RED))]),
            sink,
            StubSegmenter::foreground(),
            BackgroundEffect::SolidColor(Rgba(BLUE)),
            30,
            true,
        );
        p.tick().unwrap();
        assert!(written.borrow()[0]
            .pixels()
            .all(|px| px == &Rgba([255, 255, 255, 255])));
    }
}
