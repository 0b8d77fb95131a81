use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use image::{imageops, Rgba, RgbaImage};

/// How a background image is fitted to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FitMode {
    /// Non-aspect-preserving scale to fill the frame exactly.
    Stretch,
    /// Aspect-preserving scale-to-cover with a centred crop.
    Fill,
}

impl std::fmt::Display for FitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stretch => write!(f, "stretch"),
            Self::Fill => write!(f, "fill"),
        }
    }
}

/// A replacement background. Immutable once constructed; changing the
/// background means building a new effect and swapping it in whole.
#[derive(Debug, Clone)]
pub enum BackgroundEffect {
    SolidColor(Rgba<u8>),
    Image { image: RgbaImage, fit: FitMode },
}

impl BackgroundEffect {
    /// Renders the effect at the given frame size.
    pub fn render(&self, width: u32, height: u32) -> RgbaImage {
        match self {
            Self::SolidColor(color) => RgbaImage::from_pixel(width, height, *color),
            Self::Image { image, fit } => match fit {
                FitMode::Stretch => imageops::resize(
                    image,
                    width,
                    height,
                    imageops::FilterType::Triangle,
                ),
                FitMode::Fill => {
                    let (iw, ih) = image.dimensions();
                    let scale = (width as f32 / iw as f32).max(height as f32 / ih as f32);
                    // Ceil so the overscaled image always covers the frame.
                    let nw = ((iw as f32 * scale).ceil() as u32).max(width);
                    let nh = ((ih as f32 * scale).ceil() as u32).max(height);
                    let resized =
                        imageops::resize(image, nw, nh, imageops::FilterType::Triangle);
                    let x0 = (nw - width) / 2;
                    let y0 = (nh - height) / 2;
                    imageops::crop_imm(&resized, x0, y0, width, height).to_image()
                }
            },
        }
    }
}

/// Parses a `#rrggbb` hex color into an opaque RGBA pixel.
pub fn parse_hex_color(s: &str) -> Result<Rgba<u8>> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    // Byte length alone is not enough: multi-byte characters would make
    // the fixed slices below fall on a non-char boundary.
    if hex.len() != 6 || !hex.is_ascii() {
        bail!("expected #rrggbb, got {s:?}");
    }
    let r = u8::from_str_radix(&hex[0..2], 16).with_context(|| format!("bad color {s:?}"))?;
    let g = u8::from_str_radix(&hex[2..4], 16).with_context(|| format!("bad color {s:?}"))?;
    let b = u8::from_str_radix(&hex[4..6], 16).with_context(|| format!("bad color {s:?}"))?;
    Ok(Rgba([r, g, b, 255]))
}

/// Shared handle to the active background effect.
///
/// The running loop reads the effect exactly once per tick; an external
/// actor may swap it at any time. The swap replaces the whole effect
/// object, so a tick never composites against a half-updated background.
#[derive(Clone)]
pub struct BackgroundHandle {
    inner: Arc<Mutex<Arc<BackgroundEffect>>>,
}

impl BackgroundHandle {
    pub fn new(effect: BackgroundEffect) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Arc::new(effect))),
        }
    }

    /// Replaces the active effect. Takes effect on the next tick.
    pub fn replace(&self, effect: BackgroundEffect) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(effect);
    }

    /// Snapshot of the current effect; the per-tick read.
    pub fn current(&self) -> Arc<BackgroundEffect> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
