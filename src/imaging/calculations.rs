//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Dimensions of an image scaled to `target_width`, aspect ratio preserved.
///
/// Never upscales: a target wider than the original returns the original
/// dimensions. The height is at least one pixel.
///
/// # Examples
/// ```
/// # use image_opt::imaging::scaled_dimensions;
/// assert_eq!(scaled_dimensions((2000, 1500), 512), (512, 384));
/// assert_eq!(scaled_dimensions((300, 200), 512), (300, 200));
/// ```
pub fn scaled_dimensions(original: (u32, u32), target_width: u32) -> (u32, u32) {
    let (orig_w, orig_h) = original;
    if target_width >= orig_w || orig_w == 0 {
        return original;
    }
    let h = (orig_h as f64 * target_width as f64 / orig_w as f64).round() as u32;
    (target_width, h.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_scales_height_proportionally() {
        assert_eq!(scaled_dimensions((1600, 900), 800), (800, 450));
    }

    #[test]
    fn portrait_scales_height_proportionally() {
        assert_eq!(scaled_dimensions((1000, 2000), 500), (500, 1000));
    }

    #[test]
    fn rounding_to_nearest_pixel() {
        // 1024 * 768/1000 = 786.4
        assert_eq!(scaled_dimensions((1000, 1024), 768), (768, 786));
    }

    #[test]
    fn never_upscales() {
        assert_eq!(scaled_dimensions((400, 300), 1024), (400, 300));
        assert_eq!(scaled_dimensions((400, 300), 400), (400, 300));
    }

    #[test]
    fn extreme_panorama_keeps_one_pixel_height() {
        assert_eq!(scaled_dimensions((10_000, 2), 100), (100, 1));
    }
}
