//! Image cleanup applied to every page before recognition.

use image::{DynamicImage, GrayImage, Luma};

/// How much [`enhance_contrast`] stretches pixel values away from the mean.
pub const CONTRAST_FACTOR: f32 = 1.5;

/// Weights of the 3x3 sharpening kernel, divided by [`SHARPEN_SCALE`].
const SHARPEN_KERNEL: [[i32; 3]; 3] = [[-2, -2, -2], [-2, 32, -2], [-2, -2, -2]];

/// Sum of [`SHARPEN_KERNEL`], so flat regions are unchanged.
const SHARPEN_SCALE: i32 = 16;

/// Convert to grayscale, boost contrast, then sharpen.
///
/// This is pure: the same input always produces the same output.
pub fn preprocess(image: &DynamicImage) -> GrayImage {
    let gray = to_grayscale(image);
    let contrasted = enhance_contrast(&gray, CONTRAST_FACTOR);
    sharpen(&contrasted)
}

/// Convert to 8-bit luminance. Grayscale input comes back unchanged.
pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    image.to_luma8()
}

/// Scale the distance of every pixel from the image's mean luminance by
/// `factor`.
pub fn enhance_contrast(image: &GrayImage, factor: f32) -> GrayImage {
    let pixel_count = u64::from(image.width()) * u64::from(image.height());
    if pixel_count == 0 {
        return image.clone();
    }
    let sum = image.pixels().map(|p| u64::from(p[0])).sum::<u64>();
    let mean = ((sum + pixel_count / 2) / pixel_count) as f32;

    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let value = mean + factor * (f32::from(pixel[0]) - mean);
        pixel[0] = value.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Apply the sharpening kernel. Border pixels, which don't have a full
/// neighbourhood, are copied unchanged.
pub fn sharpen(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut out = image.clone();
    if width < 3 || height < 3 {
        return out;
    }

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut acc = 0;
            for (dy, row) in SHARPEN_KERNEL.iter().enumerate() {
                for (dx, weight) in row.iter().enumerate() {
                    let px = image.get_pixel(x + dx as u32 - 1, y + dy as u32 - 1)[0];
                    acc += weight * i32::from(px);
                }
            }
            let value = (acc + SHARPEN_SCALE / 2).div_euclid(SHARPEN_SCALE);
            out.put_pixel(x, y, Luma([value.clamp(0, 255) as u8]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    #[test]
    fn grayscale_of_grayscale_is_unchanged() {
        let gray = GrayImage::from_fn(5, 4, |x, y| Luma([(x * 40 + y * 7) as u8]));
        let again = to_grayscale(&DynamicImage::ImageLuma8(gray.clone()));
        assert_eq!(again, gray);
    }

    #[test]
    fn color_becomes_single_channel() {
        let rgb = RgbImage::from_pixel(6, 2, Rgb([200, 30, 90]));
        let out = preprocess(&DynamicImage::ImageRgb8(rgb));
        assert_eq!(out.dimensions(), (6, 2));
        assert_eq!(out.as_raw().len(), 12);
    }

    #[test]
    fn flat_images_are_unchanged() {
        let gray = GrayImage::from_pixel(8, 8, Luma([137]));
        let out = preprocess(&DynamicImage::ImageLuma8(gray.clone()));
        assert_eq!(out, gray);
    }

    #[test]
    fn contrast_stretches_around_the_mean() {
        // Mean is 150, so 100 -> 75 and 200 -> 225.
        let gray = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 100 } else { 200 }]));
        let out = enhance_contrast(&gray, CONTRAST_FACTOR);
        assert_eq!(out.as_raw(), &vec![75, 225]);
    }

    #[test]
    fn contrast_clamps_to_valid_range() {
        let gray = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 0 } else { 255 }]));
        let out = enhance_contrast(&gray, 3.0);
        assert_eq!(out.as_raw(), &vec![0, 255]);
    }

    #[test]
    fn sharpen_amplifies_a_bright_center() {
        let mut gray = GrayImage::from_pixel(3, 3, Luma([100]));
        gray.put_pixel(1, 1, Luma([110]));
        let out = sharpen(&gray);
        // (32 * 110 - 16 * 100) / 16 = 120
        assert_eq!(out.get_pixel(1, 1)[0], 120);
        // Borders are untouched.
        assert_eq!(out.get_pixel(0, 0)[0], 100);
        assert_eq!(out.get_pixel(2, 1)[0], 100);
    }

    #[test]
    fn tiny_images_survive() {
        let gray = GrayImage::from_pixel(2, 1, Luma([9]));
        assert_eq!(sharpen(&gray), gray);
        let empty = GrayImage::new(0, 0);
        assert_eq!(preprocess(&DynamicImage::ImageLuma8(empty.clone())), empty);
    }
}
