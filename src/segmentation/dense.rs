use image::{imageops, GrayImage};

use super::backend::Tensor;
use crate::error::SegmentationError;

/// Probability cutoff for the dense mask. The boundary is exclusive
/// (strict `>`), unlike the instance decoder's inclusive sigmoid cutoff;
/// the asymmetry is inherited behavior and kept deliberately.
pub const PROBABILITY_THRESHOLD: f32 = 0.5;

/// Decoder for single dense-mask models: one per-pixel probability plane,
/// thresholded directly.
pub struct DenseDecoder {
    pub threshold: f32,
}

impl Default for DenseDecoder {
    fn default() -> Self {
        Self {
            threshold: PROBABILITY_THRESHOLD,
        }
    }
}

impl DenseDecoder {
    /// Decodes the probability plane and resizes it to frame dimensions.
    ///
    /// The model letterboxes its input with the same centering as the
    /// preprocessor, so the plane maps onto the frame by a direct resize.
    pub fn decode(
        &self,
        outputs: &[(String, Tensor)],
        frame_w: u32,
        frame_h: u32,
    ) -> Result<GrayImage, SegmentationError> {
        let tensor = outputs
            .iter()
            .map(|(_, t)| t)
            .find(|t| t.rank() >= 3)
            .ok_or_else(|| {
                SegmentationError::Decode("no output tensor of rank >= 3".into())
            })?;

        // 4-D [batch, channel, h, w] or 3-D [channel, h, w]; either way
        // the trailing two axes are the mask grid and the first plane is
        // the probability map.
        let mask_h = tensor.shape[tensor.rank() - 2];
        let mask_w = tensor.shape[tensor.rank() - 1];
        let plane_len = mask_h * mask_w;
        if plane_len == 0 || tensor.data.len() < plane_len {
            return Err(SegmentationError::Decode(format!(
                "dense mask plane {mask_w}x{mask_h} does not fit tensor of {} values",
                tensor.data.len()
            )));
        }

        let plane = GrayImage::from_fn(mask_w as u32, mask_h as u32, |x, y| {
            let v = tensor.data[(y as usize) * mask_w + x as usize];
            image::Luma([if v > self.threshold { 255 } else { 0 }])
        });

        if plane.dimensions() == (frame_w, frame_h) {
            return Ok(plane);
        }
        Ok(imageops::resize(
            &plane,
            frame_w,
            frame_h,
            imageops::FilterType::Nearest,
        ))
    }
}
