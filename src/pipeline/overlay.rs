use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use rayon::prelude::*;

use crate::types::{Frame, Landmark, LandmarkSet};

pub const CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (5, 9),
    (9, 13),
    (13, 17),
];

pub const SKELETON_LINE_THICKNESS: i32 = 5;
const LINE_COLOR: [u8; 4] = [56, 189, 248, 255];
const POINT_COLOR: [u8; 4] = [248, 113, 113, 255];

/// Maps normalized landmarks of an `image` sized frame onto a `view` that
/// shows the frame scaled to fill it, centred and cropped on the long side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayGeometry {
    image_w: f32,
    image_h: f32,
    view_w: f32,
    view_h: f32,
    mirrored: bool,
}

impl OverlayGeometry {
    pub fn new(image: (u32, u32), view: (u32, u32), mirrored: bool) -> Self {
        Self {
            image_w: image.0.max(1) as f32,
            image_h: image.1.max(1) as f32,
            view_w: view.0 as f32,
            view_h: view.1 as f32,
            mirrored,
        }
    }

    pub fn scale(&self) -> f32 {
        (self.view_w / self.image_w).max(self.view_h / self.image_h)
    }

    /// Top-left corner of the scaled image in view space; negative on the
    /// cropped axis.
    pub fn offset(&self) -> (f32, f32) {
        let scale = self.scale();
        (
            (self.view_w - self.image_w * scale) / 2.0,
            (self.view_h - self.image_h * scale) / 2.0,
        )
    }

    pub fn map(&self, landmark: &Landmark) -> (f32, f32) {
        let scale = self.scale();
        let (off_x, off_y) = self.offset();
        let mut x = landmark.x * self.image_w;
        if self.mirrored {
            x = self.image_w - x;
        }
        let y = landmark.y * self.image_h;
        (x * scale + off_x, y * scale + off_y)
    }
}

/// Scales `frame` to cover a `view_w` x `view_h` canvas and draws every
/// hand's skeleton on top.
pub fn render_preview(
    frame: &Frame,
    landmarks: Option<&LandmarkSet>,
    view_w: u32,
    view_h: u32,
    mirrored: bool,
) -> Result<Vec<u8>> {
    if view_w == 0 || view_h == 0 {
        return Err(anyhow!("preview area has zero size"));
    }

    let src_image =
        fir::images::ImageRef::new(frame.width, frame.height, &frame.rgba, fir::PixelType::U8x4)
            .context("preview frame does not match its size")?;
    let mut dst_image = fir::images::Image::new(view_w, view_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear))
        .fit_into_destination(Some((0.5, 0.5)));
    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .context("preview resize failed")?;
    let mut canvas = dst_image.into_vec();

    if mirrored {
        canvas
            .par_chunks_exact_mut(view_w as usize * 4)
            .for_each(mirror_row);
    }

    if let Some(set) = landmarks {
        let geometry = OverlayGeometry::new((frame.width, frame.height), (view_w, view_h), mirrored);
        for hand in &set.hands {
            let points: Vec<(f32, f32)> = hand.points.iter().map(|p| geometry.map(p)).collect();
            draw_skeleton(&mut canvas, view_w, view_h, &points);
        }
    }

    Ok(canvas)
}

fn mirror_row(row: &mut [u8]) {
    let pixels = row.len() / 4;
    for i in 0..pixels / 2 {
        let j = pixels - 1 - i;
        for c in 0..4 {
            row.swap(i * 4 + c, j * 4 + c);
        }
    }
}

pub fn draw_skeleton(buffer: &mut [u8], width: u32, height: u32, points: &[(f32, f32)]) {
    if points.len() < 2 {
        return;
    }

    for &(a, b) in CONNECTIONS {
        if let (Some(pa), Some(pb)) = (points.get(a), points.get(b)) {
            draw_line(
                buffer,
                width,
                height,
                pa,
                pb,
                LINE_COLOR,
                SKELETON_LINE_THICKNESS,
            );
        }
    }

    let point_radius = (SKELETON_LINE_THICKNESS / 2).max(2) + 2;
    for &(x, y) in points {
        draw_circle(
            buffer,
            width,
            height,
            (x as i32, y as i32),
            point_radius,
            POINT_COLOR,
        );
    }
}

fn draw_line(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    p0: &(f32, f32),
    p1: &(f32, f32),
    color: [u8; 4],
    thickness: i32,
) {
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        put_pixel_safe(buffer, width, height, x0, y0, color);
        if radius > 0 {
            for ox in -radius..=radius {
                for oy in -radius..=radius {
                    if (ox != 0 || oy != 0) && ox.abs() + oy.abs() <= radius {
                        put_pixel_safe(buffer, width, height, x0 + ox, y0 + oy, color);
                    }
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    center: (i32, i32),
    radius: i32,
    color: [u8; 4],
) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(buffer, width, height, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel_safe(buffer: &mut [u8], width: u32, height: u32, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    if ux >= width || uy >= height {
        return;
    }
    let idx = ((uy * width + ux) as usize) * 4;
    if idx + 3 < buffer.len() {
        buffer[idx..idx + 4].copy_from_slice(&color);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::types::tests::hand_from_fn;

    fn black_frame(width: u32, height: u32) -> Frame {
        Frame {
            rgba: vec![0; (width * height * 4) as usize],
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    fn pixel(canvas: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * width + x) * 4) as usize;
        [canvas[idx], canvas[idx + 1], canvas[idx + 2], canvas[idx + 3]]
    }

    #[test]
    fn fill_scale_crops_long_side() {
        let geometry = OverlayGeometry::new((640, 480), (400, 400), false);
        assert_abs_diff_eq!(geometry.scale(), 400.0 / 480.0);
        let (off_x, off_y) = geometry.offset();
        assert_abs_diff_eq!(off_x, -200.0 / 3.0, epsilon = 1e-3);
        assert_abs_diff_eq!(off_y, 0.0);

        let (x, y) = geometry.map(&Landmark::new(0.5, 0.5));
        assert_abs_diff_eq!(x, 200.0, epsilon = 1e-3);
        assert_abs_diff_eq!(y, 200.0, epsilon = 1e-3);
    }

    #[test]
    fn mirroring_flips_x_only() {
        let plain = OverlayGeometry::new((640, 480), (640, 480), false);
        let mirrored = OverlayGeometry::new((640, 480), (640, 480), true);
        let point = Landmark::new(0.25, 0.75);
        let (px, py) = plain.map(&point);
        let (mx, my) = mirrored.map(&point);
        assert_abs_diff_eq!(px, 160.0);
        assert_abs_diff_eq!(mx, 480.0);
        assert_abs_diff_eq!(py, my);
    }

    #[test]
    fn preview_is_view_sized_with_skeleton() {
        let frame = black_frame(64, 48);
        let set = LandmarkSet {
            hands: vec![hand_from_fn(|i| (0.2 + i as f32 * 0.02, 0.5))],
        };
        let canvas = render_preview(&frame, Some(&set), 32, 32, false).unwrap();
        assert_eq!(canvas.len(), 32 * 32 * 4);

        let geometry = OverlayGeometry::new((64, 48), (32, 32), false);
        let (x, y) = geometry.map(&set.hands[0].points[10]);
        assert_eq!(pixel(&canvas, 32, x as u32, y as u32), POINT_COLOR);
        assert_eq!(pixel(&canvas, 32, 0, 0)[..3], [0, 0, 0]);
    }

    #[test]
    fn mirror_row_reverses_pixels() {
        let mut row = vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3];
        mirror_row(&mut row);
        assert_eq!(row, vec![3, 3, 3, 3, 2, 2, 2, 2, 1, 1, 1, 1]);
    }

    #[test]
    fn zero_sized_view_is_rejected() {
        assert!(render_preview(&black_frame(4, 4), None, 0, 10, false).is_err());
    }
}
