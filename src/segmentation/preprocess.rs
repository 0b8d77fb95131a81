use image::RgbaImage;

use crate::geometry::Letterbox;

/// Turns camera frames into normalized NCHW model input.
///
/// Owns the letterbox canvas so the per-tick path does not reallocate it;
/// the canvas is sized once from the model input spec.
pub struct Preprocessor {
    input_w: u32,
    input_h: u32,
    canvas: RgbaImage,
}

impl Preprocessor {
    pub fn new(input_w: u32, input_h: u32) -> Self {
        Self {
            input_w,
            input_h,
            canvas: RgbaImage::new(input_w, input_h),
        }
    }

    /// Letterboxes `frame` into the model rectangle and converts the
    /// result to a [1, 3, H, W] float buffer normalized to [0, 1].
    pub fn letterbox_to_tensor(&mut self, frame: &RgbaImage, letterbox: &Letterbox) -> Vec<f32> {
        debug_assert_eq!(
            (letterbox.dst_w, letterbox.dst_h),
            (self.input_w, self.input_h)
        );

        letterbox.place(frame, &mut self.canvas);

        let (w, h) = (self.input_w as usize, self.input_h as usize);
        let stride = w * h;
        let mut tensor = vec![0f32; 3 * stride];
        let raw = self.canvas.as_raw();

        for i in 0..stride {
            let p = i * 4;
            tensor[i] = raw[p] as f32 / 255.0;
            tensor[stride + i] = raw[p + 1] as f32 / 255.0;
            tensor[2 * stride + i] = raw[p + 2] as f32 / 255.0;
        }

        tensor
    }
}
