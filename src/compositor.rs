use std::sync::Arc;

use image::{GrayImage, RgbaImage};

use crate::background::BackgroundEffect;

/// Merges a frame, its foreground mask and the active background effect.
///
/// The composite is a two-operator chain and the order is fixed: the mask
/// first cuts the frame down to its foreground (destination-in), then the
/// rendered background is laid beneath the remainder (destination-over).
/// Swapping the two steps silently produces the inverse cutout.
///
/// Scratch buffers (the rendered background and the output frame) are
/// owned and reused; the background is re-rendered only when the effect
/// object or the frame geometry changes.
pub struct Compositor {
    background: RgbaImage,
    output: RgbaImage,
    rendered_for: Option<Arc<BackgroundEffect>>,
}

impl Compositor {
    pub fn new() -> Self {
        Self {
            background: RgbaImage::new(0, 0),
            output: RgbaImage::new(0, 0),
            rendered_for: None,
        }
    }

    /// Mask dimensions must equal frame dimensions.
    pub fn composite(
        &mut self,
        frame: &RgbaImage,
        mask: &GrayImage,
        effect: &Arc<BackgroundEffect>,
    ) -> &RgbaImage {
        let (width, height) = frame.dimensions();
        debug_assert_eq!(mask.dimensions(), (width, height));

        let stale = self.background.dimensions() != (width, height)
            || !self
                .rendered_for
                .as_ref()
                .is_some_and(|prev| Arc::ptr_eq(prev, effect));
        if stale {
            self.background = effect.render(width, height);
            self.rendered_for = Some(Arc::clone(effect));
        }

        if self.output.dimensions() != (width, height) {
            self.output = RgbaImage::new(width, height);
        }

        let fg = frame.as_raw();
        let bg = self.background.as_raw();
        let out: &mut [u8] = &mut self.output;
        for (i, m) in mask.as_raw().iter().enumerate() {
            let o = i * 4;
            let a = *m as u32;
            // destination-in with the mask, then destination-over the
            // background; collapses to a per-pixel lerp for opaque frames.
            for c in 0..3 {
                out[o + c] = ((fg[o + c] as u32 * a + bg[o + c] as u32 * (255 - a)) / 255) as u8;
            }
            out[o + 3] = 255;
        }

        &self.output
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

/// Grayscale visualization of a mask, for `--show-matte`.
pub fn mask_preview(mask: &GrayImage) -> RgbaImage {
    let (width, height) = mask.dimensions();
    RgbaImage::from_fn(width, height, |x, y| {
        let v = mask.get_pixel(x, y)[0];
        image::Rgba([v, v, v, 255])
    })
}
