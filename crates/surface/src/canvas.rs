//! 2D drawing target for overlay composition.
//!
//! A [`Canvas`] is an owned RGBA8 buffer at the output resolution. The
//! compositing context draws the decoded frame into it as an opaque base
//! layer, then hands it to the overlay callback, which paints on top with
//! alpha-blended primitives. All drawing is clipped to the canvas bounds.

use ob_common::{Resolution, VideoFrame};

/// Straight-alpha source-over blend of one pixel.
///
/// Decoded video is opaque, so the destination alpha stays saturated and
/// source-over reduces to a per-channel lerp by the source alpha.
#[inline]
fn blend_pixel(dst: &mut [u8], src: [u8; 4]) {
    let a = src[3] as u32;
    if a == 255 {
        dst[..4].copy_from_slice(&src);
        return;
    }
    if a == 0 {
        return;
    }
    let inv = 255 - a;
    for c in 0..3 {
        let s = src[c] as u32;
        let d = dst[c] as u32;
        dst[c] = ((s * a + d * inv + 127) / 255) as u8;
    }
    let out_a = a + (dst[3] as u32 * inv + 127) / 255;
    dst[3] = out_a.min(255) as u8;
}

/// An RGBA8 pixel buffer with alpha-blended drawing primitives.
pub struct Canvas {
    resolution: Resolution,
    data: Vec<u8>,
}

impl Canvas {
    /// Create a transparent-black canvas at the given resolution.
    pub fn new(resolution: Resolution) -> Self {
        Canvas {
            resolution,
            data: vec![0u8; resolution.rgba_byte_size() as usize],
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// The backing RGBA bytes in row-major order.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Read one pixel, or `None` outside the canvas.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        let idx = (y as usize * self.resolution.width as usize + x as usize) * 4;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[idx..idx + 4]);
        Some(px)
    }

    /// Overwrite every pixel with an opaque color. No blending.
    pub fn clear(&mut self, rgba: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Fill a rectangle with an alpha-blended solid color.
    ///
    /// Coordinates may be negative or extend past the edges; the rectangle
    /// is clipped to the canvas.
    pub fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, rgba: [u8; 4]) {
        let cw = self.resolution.width as i64;
        let ch = self.resolution.height as i64;
        let x0 = (x as i64).clamp(0, cw);
        let y0 = (y as i64).clamp(0, ch);
        let x1 = (x as i64 + width as i64).clamp(0, cw);
        let y1 = (y as i64 + height as i64).clamp(0, ch);
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        for row in y0..y1 {
            let row_offset = row as usize * cw as usize * 4;
            for col in x0..x1 {
                let idx = row_offset + col as usize * 4;
                blend_pixel(&mut self.data[idx..idx + 4], rgba);
            }
        }
    }

    /// Alpha-blend an RGBA image with its top-left corner at `(x, y)`.
    ///
    /// `pixels` must hold `size.rgba_byte_size()` bytes in row-major order.
    /// The image is clipped to the canvas; a short buffer draws nothing.
    pub fn blit(&mut self, x: i32, y: i32, pixels: &[u8], size: Resolution) {
        if (pixels.len() as u64) < size.rgba_byte_size() {
            return;
        }
        let cw = self.resolution.width as i64;
        let ch = self.resolution.height as i64;
        let x0 = (x as i64).clamp(0, cw);
        let y0 = (y as i64).clamp(0, ch);
        let x1 = (x as i64 + size.width as i64).clamp(0, cw);
        let y1 = (y as i64 + size.height as i64).clamp(0, ch);
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        let src_stride = size.width as usize * 4;
        for row in y0..y1 {
            let src_row = (row - y as i64) as usize * src_stride;
            let dst_row = row as usize * cw as usize * 4;
            for col in x0..x1 {
                let src_idx = src_row + (col - x as i64) as usize * 4;
                let dst_idx = dst_row + col as usize * 4;
                let mut px = [0u8; 4];
                px.copy_from_slice(&pixels[src_idx..src_idx + 4]);
                blend_pixel(&mut self.data[dst_idx..dst_idx + 4], px);
            }
        }
    }

    /// Draw a decoded frame as the opaque base layer, scaled to fill the
    /// whole canvas with nearest-neighbor sampling after rotating it by
    /// `rotation_degrees` counter-clockwise (quarter-turns only).
    ///
    /// 270° counter-clockwise is a 90° clockwise turn, which uprights a
    /// source whose container declares a 90° display rotation.
    pub fn draw_frame(&mut self, frame: &VideoFrame, rotation_degrees: u32) {
        let sw = frame.resolution.width as usize;
        let sh = frame.resolution.height as usize;
        if sw == 0 || sh == 0 {
            return;
        }
        let quarter = (rotation_degrees % 360) / 90;
        let (rw, rh) = if quarter % 2 == 1 { (sh, sw) } else { (sw, sh) };
        let tw = self.resolution.width as usize;
        let th = self.resolution.height as usize;
        let src = &frame.data;

        for dy in 0..th {
            let ry = dy * rh / th;
            let dst_row = dy * tw * 4;
            for dx in 0..tw {
                let rx = dx * rw / tw;
                // Inverse map from rotated coordinates back to the source.
                let (sx, sy) = match quarter {
                    0 => (rx, ry),
                    1 => (sw - 1 - ry, rx),
                    2 => (sw - 1 - rx, sh - 1 - ry),
                    _ => (ry, sh - 1 - rx),
                };
                let src_idx = (sy * sw + sx) * 4;
                let dst_idx = dst_row + dx * 4;
                self.data[dst_idx..dst_idx + 4].copy_from_slice(&src[src_idx..src_idx + 4]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ob_common::MediaTime;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn two_pixel_frame() -> VideoFrame {
        // RED at (0,0), BLUE at (1,0).
        let mut data = Vec::new();
        data.extend_from_slice(&RED);
        data.extend_from_slice(&BLUE);
        VideoFrame::new(Resolution::new(2, 1), MediaTime::ZERO, data)
    }

    #[test]
    fn new_canvas_is_transparent_black() {
        let canvas = Canvas::new(Resolution::new(2, 2));
        assert_eq!(canvas.data().len(), 16);
        assert_eq!(canvas.pixel(0, 0), Some([0, 0, 0, 0]));
        assert_eq!(canvas.pixel(2, 0), None);
    }

    #[test]
    fn clear_overwrites_without_blending() {
        let mut canvas = Canvas::new(Resolution::new(2, 2));
        canvas.clear([10, 20, 30, 255]);
        assert_eq!(canvas.pixel(1, 1), Some([10, 20, 30, 255]));
    }

    #[test]
    fn opaque_fill_replaces_pixels() {
        let mut canvas = Canvas::new(Resolution::new(4, 4));
        canvas.clear([0, 0, 0, 255]);
        canvas.fill_rect(1, 1, 2, 2, RED);
        assert_eq!(canvas.pixel(0, 0), Some([0, 0, 0, 255]));
        assert_eq!(canvas.pixel(1, 1), Some(RED));
        assert_eq!(canvas.pixel(2, 2), Some(RED));
        assert_eq!(canvas.pixel(3, 3), Some([0, 0, 0, 255]));
    }

    #[test]
    fn half_alpha_fill_lerps_toward_source() {
        let mut canvas = Canvas::new(Resolution::new(1, 1));
        canvas.clear([0, 0, 0, 255]);
        canvas.fill_rect(0, 0, 1, 1, [255, 0, 0, 128]);
        // (255 * 128 + 0 * 127 + 127) / 255 = 128, alpha stays opaque.
        assert_eq!(canvas.pixel(0, 0), Some([128, 0, 0, 255]));
    }

    #[test]
    fn zero_alpha_fill_is_a_no_op() {
        let mut canvas = Canvas::new(Resolution::new(1, 1));
        canvas.clear([9, 9, 9, 255]);
        canvas.fill_rect(0, 0, 1, 1, [255, 255, 255, 0]);
        assert_eq!(canvas.pixel(0, 0), Some([9, 9, 9, 255]));
    }

    #[test]
    fn fill_clips_to_bounds() {
        let mut canvas = Canvas::new(Resolution::new(2, 2));
        canvas.clear([0, 0, 0, 255]);
        canvas.fill_rect(-1, -1, 2, 2, RED);
        assert_eq!(canvas.pixel(0, 0), Some(RED));
        assert_eq!(canvas.pixel(1, 0), Some([0, 0, 0, 255]));
        assert_eq!(canvas.pixel(0, 1), Some([0, 0, 0, 255]));
        // Fully off-canvas rectangles draw nothing.
        canvas.fill_rect(5, 5, 10, 10, BLUE);
        canvas.fill_rect(-10, -10, 4, 4, BLUE);
        assert_eq!(canvas.pixel(1, 1), Some([0, 0, 0, 255]));
    }

    #[test]
    fn blit_blends_and_clips() {
        let mut canvas = Canvas::new(Resolution::new(2, 1));
        canvas.clear([0, 0, 0, 255]);
        // 2x1 image placed at x=1: only its left pixel lands.
        let image = [RED, BLUE].concat();
        canvas.blit(1, 0, &image, Resolution::new(2, 1));
        assert_eq!(canvas.pixel(0, 0), Some([0, 0, 0, 255]));
        assert_eq!(canvas.pixel(1, 0), Some(RED));
    }

    #[test]
    fn blit_with_short_buffer_draws_nothing() {
        let mut canvas = Canvas::new(Resolution::new(2, 1));
        canvas.clear([0, 0, 0, 255]);
        let image = [255u8, 0, 0, 255];
        canvas.blit(0, 0, &image, Resolution::new(2, 1));
        assert_eq!(canvas.pixel(0, 0), Some([0, 0, 0, 255]));
    }

    #[test]
    fn draw_frame_without_rotation_scales_nearest() {
        let mut canvas = Canvas::new(Resolution::new(4, 1));
        canvas.draw_frame(&two_pixel_frame(), 0);
        // Left half samples RED, right half BLUE.
        assert_eq!(canvas.pixel(0, 0), Some(RED));
        assert_eq!(canvas.pixel(1, 0), Some(RED));
        assert_eq!(canvas.pixel(2, 0), Some(BLUE));
        assert_eq!(canvas.pixel(3, 0), Some(BLUE));
    }

    #[test]
    fn draw_frame_rotated_270_turns_clockwise() {
        // [RED BLUE] turned 90° clockwise reads RED over BLUE.
        let mut canvas = Canvas::new(Resolution::new(1, 2));
        canvas.draw_frame(&two_pixel_frame(), 270);
        assert_eq!(canvas.pixel(0, 0), Some(RED));
        assert_eq!(canvas.pixel(0, 1), Some(BLUE));
    }

    #[test]
    fn draw_frame_rotated_90_turns_counter_clockwise() {
        // [RED BLUE] turned 90° counter-clockwise reads BLUE over RED.
        let mut canvas = Canvas::new(Resolution::new(1, 2));
        canvas.draw_frame(&two_pixel_frame(), 90);
        assert_eq!(canvas.pixel(0, 0), Some(BLUE));
        assert_eq!(canvas.pixel(0, 1), Some(RED));
    }

    #[test]
    fn draw_frame_rotated_180_flips_both_axes() {
        let mut canvas = Canvas::new(Resolution::new(2, 1));
        canvas.draw_frame(&two_pixel_frame(), 180);
        assert_eq!(canvas.pixel(0, 0), Some(BLUE));
        assert_eq!(canvas.pixel(1, 0), Some(RED));
    }
}
