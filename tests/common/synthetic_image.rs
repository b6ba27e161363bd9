#![allow(dead_code)]

use food_depth::image::{ImageF32, ImageU8};

/// Generates a high-contrast interleaved checkerboard.
pub fn checkerboard_u8(width: usize, height: usize, channels: usize, cell: usize) -> Vec<u8> {
    assert!(width > 0 && height > 0, "image dimensions must be positive");
    assert!(cell > 0, "cell size must be positive");

    let mut img = vec![0u8; width * height * channels];
    for y in 0..height {
        for x in 0..width {
            let sum = x / cell + y / cell;
            let val = if sum & 1 == 0 { 0u8 } else { 255u8 };
            let base = (y * width + x) * channels;
            img[base..base + channels].fill(val);
        }
    }
    img
}

/// RGB checkerboard with values exactly 0 and 1.
pub fn checkerboard_rgb(width: usize, height: usize, cell: usize) -> ImageF32 {
    let buffer = checkerboard_u8(width, height, 3, cell);
    ImageU8 {
        w: width,
        h: height,
        channels: 3,
        stride: width * 3,
        data: &buffer,
    }
    .to_f32()
}

/// Smooth RGB ramp, brighter to the right and down.
pub fn gradient_rgb(width: usize, height: usize) -> ImageF32 {
    let sx = width.saturating_sub(1).max(1) as f32;
    let sy = height.saturating_sub(1).max(1) as f32;
    ImageF32::from_fn(width, height, 3, |x, y, c| {
        let base = 0.6 * x as f32 / sx + 0.3 * y as f32 / sy;
        (base + 0.05 * c as f32).min(1.0)
    })
}

/// `out(x, y) = image(clamp(x + dx), y)`: content moves left for positive `dx`.
pub fn shift_columns(image: &ImageF32, dx: isize) -> ImageF32 {
    let max_x = image.w as isize - 1;
    ImageF32::from_fn(image.w, image.h, image.channels, |x, y, c| {
        let sx = (x as isize + dx).clamp(0, max_x) as usize;
        image.get(sx, y, c)
    })
}
