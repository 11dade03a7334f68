use super::{Arc, ImageBuffer, ImageFrame, RenderImage, Rgba};

/// Swaps red and blue in place. GPUI uploads image frames as BGRA.
fn rgba_to_bgra(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
}

/// Wraps a finished RGBA preview canvas into an image GPUI can paint
/// without going through the async asset pipeline.
pub(super) fn canvas_to_image(mut canvas: Vec<u8>, width: u32, height: u32) -> Option<Arc<RenderImage>> {
    rgba_to_bgra(&mut canvas);
    let buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(width, height, canvas)?;
    Some(Arc::new(RenderImage::new(vec![ImageFrame::new(buffer)])))
}

/// Largest size with the `width`:`height` aspect that fits in
/// `max_w`x`max_h`. Never returns a zero side.
pub(super) fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (max_w.max(1), max_h.max(1));
    }
    let scale = (max_w as f32 / width as f32).min(max_h as f32 / height as f32);
    (
        ((width as f32 * scale).round() as u32).clamp(1, max_w.max(1)),
        ((height as f32 * scale).round() as u32).clamp(1, max_h.max(1)),
    )
}

/// Device pixel size for a preview drawn at `logical` points.
pub(super) fn device_size(logical: (f32, f32), scale_factor: f32) -> (u32, u32) {
    let scale = scale_factor.max(1.0);
    (
        (logical.0 * scale).round().max(1.0) as u32,
        (logical.1 * scale).round().max(1.0) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swaps_red_and_blue() {
        let mut pixels = vec![1, 2, 3, 4, 10, 20, 30, 40];
        rgba_to_bgra(&mut pixels);
        assert_eq!(pixels, vec![3, 2, 1, 4, 30, 20, 10, 40]);
    }

    #[test]
    fn mismatched_canvas_is_rejected() {
        assert!(canvas_to_image(vec![0; 12], 2, 2).is_none());
    }

    #[test]
    fn thumbnails_keep_the_photo_aspect() {
        assert_eq!(fit_within(640, 480, 268, 268), (268, 201));
        assert_eq!(fit_within(480, 640, 268, 268), (201, 268));
        assert_eq!(fit_within(100, 50, 400, 400), (400, 200));
        assert_eq!(fit_within(4000, 1, 100, 100), (100, 1));
        assert_eq!(fit_within(0, 10, 30, 20), (30, 20));
    }

    #[test]
    fn device_size_scales_and_rounds() {
        assert_eq!(device_size((560.0, 420.0), 2.0), (1120, 840));
        assert_eq!(device_size((10.4, 0.0), 0.5), (10, 1));
    }
}
