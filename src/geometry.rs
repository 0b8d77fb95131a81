use image::{imageops, GrayImage, RgbaImage};

/// Aspect-preserving placement of a source frame inside a fixed target
/// rectangle, plus the exact inverse mapping back to source coordinates.
///
/// `scale = min(dst_w/src_w, dst_h/src_h)`, the scaled frame is centred
/// and the remainder is padded with black. Under integer rounding the two
/// bars on an axis may differ by one pixel; the offset is the floor of
/// half the slack, matching the original placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub src_w: u32,
    pub src_h: u32,
    pub dst_w: u32,
    pub dst_h: u32,
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub scaled_w: u32,
    pub scaled_h: u32,
}

impl Letterbox {
    /// Source and target dimensions must be non-zero.
    pub fn new(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Self {
        debug_assert!(src_w > 0 && src_h > 0 && dst_w > 0 && dst_h > 0);

        let scale = (dst_w as f32 / src_w as f32).min(dst_h as f32 / src_h as f32);
        let scaled_w = ((src_w as f32 * scale).round() as u32).max(1);
        let scaled_h = ((src_h as f32 * scale).round() as u32).max(1);
        let offset_x = (dst_w.saturating_sub(scaled_w)) / 2;
        let offset_y = (dst_h.saturating_sub(scaled_h)) / 2;

        Self {
            src_w,
            src_h,
            dst_w,
            dst_h,
            scale,
            offset_x,
            offset_y,
            scaled_w,
            scaled_h,
        }
    }

    /// Forward map: source-frame coordinates to target (model) space.
    pub fn to_target(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.offset_x as f32 + x * self.scale,
            self.offset_y as f32 + y * self.scale,
        )
    }

    /// Inverse map: target (model) coordinates back to the source frame.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }

    /// Draws `frame` into `canvas` (sized `dst_w` x `dst_h`) at the
    /// letterbox placement, bars filled with opaque black.
    pub fn place(&self, frame: &RgbaImage, canvas: &mut RgbaImage) {
        debug_assert_eq!(canvas.dimensions(), (self.dst_w, self.dst_h));

        for px in canvas.pixels_mut() {
            *px = image::Rgba([0, 0, 0, 255]);
        }

        let resized = if frame.dimensions() == (self.scaled_w, self.scaled_h) {
            frame.clone()
        } else {
            imageops::resize(
                frame,
                self.scaled_w,
                self.scaled_h,
                imageops::FilterType::Triangle,
            )
        };

        imageops::replace(canvas, &resized, self.offset_x as i64, self.offset_y as i64);
    }

    /// Projects a plane laid out over target space (at `pw` x `ph`
    /// resolution) back onto a source-frame-sized mask, sampling nearest
    /// through the forward mapping. Used to undo the letterbox when a
    /// decoded mask plane has to align with the camera frame.
    pub fn project_plane(&self, plane: &[u8], pw: u32, ph: u32) -> GrayImage {
        debug_assert_eq!(plane.len(), (pw * ph) as usize);

        let sx = pw as f32 / self.dst_w as f32;
        let sy = ph as f32 / self.dst_h as f32;

        GrayImage::from_fn(self.src_w, self.src_h, |fx, fy| {
            let (tx, ty) = self.to_target(fx as f32 + 0.5, fy as f32 + 0.5);
            let px = ((tx * sx) as u32).min(pw - 1);
            let py = ((ty * sy) as u32).min(ph - 1);
            image::Luma([plane[(py * pw + px) as usize]])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_frame_pads_vertically() {
        let lb = Letterbox::new(1920, 1080, 640, 640);
        assert_eq!((lb.scaled_w, lb.scaled_h), (640, 360));
        assert_eq!((lb.offset_x, lb.offset_y), (0, 140));
    }

    #[test]
    fn tall_frame_pads_horizontally() {
        let lb = Letterbox::new(1080, 1920, 640, 640);
        assert_eq!((lb.scaled_w, lb.scaled_h), (360, 640));
        assert_eq!((lb.offset_x, lb.offset_y), (140, 0));
    }

    #[test]
    fn placement_corner_maps_back_to_origin() {
        let lb = Letterbox::new(1920, 1080, 640, 640);
        let (x, y) = lb.to_source(lb.offset_x as f32, lb.offset_y as f32);
        assert!(x.abs() <= 1.0 && y.abs() <= 1.0);
    }

    #[test]
    fn forward_then_inverse_round_trips_within_one_pixel() {
        for &(sw, sh) in &[(1920u32, 1080u32), (640, 480), (720, 1280), (333, 777)] {
            let lb = Letterbox::new(sw, sh, 640, 640);
            for &(x, y) in &[
                (0.0f32, 0.0f32),
                (sw as f32 - 1.0, sh as f32 - 1.0),
                (sw as f32 / 2.0, sh as f32 / 2.0),
                (17.0, 203.0),
            ] {
                let (tx, ty) = lb.to_target(x, y);
                let (bx, by) = lb.to_source(tx, ty);
                assert!(
                    (bx - x).abs() <= 1.0 && (by - y).abs() <= 1.0,
                    "{sw}x{sh}: ({x},{y}) -> ({bx},{by})"
                );
            }
        }
    }

    #[test]
    fn place_fills_bars_with_black() {
        let lb = Letterbox::new(100, 50, 64, 64);
        let frame = RgbaImage::from_pixel(100, 50, image::Rgba([200, 10, 10, 255]));
        let mut canvas = RgbaImage::new(64, 64);
        lb.place(&frame, &mut canvas);

        // Top bar is letterbox fill, centre row is frame content.
        assert_eq!(canvas.get_pixel(32, 0), &image::Rgba([0, 0, 0, 255]));
        assert_eq!(canvas.get_pixel(32, 32), &image::Rgba([200, 10, 10, 255]));
    }

    #[test]
    fn project_plane_matches_frame_dimensions() {
        let lb = Letterbox::new(320, 240, 640, 640);
        let plane = vec![255u8; 160 * 160];
        let mask = lb.project_plane(&plane, 160, 160);
        assert_eq!(mask.dimensions(), (320, 240));
        assert!(mask.pixels().all(|p| p[0] == 255));
    }
}
