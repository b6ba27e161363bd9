//! Reflection padding of the two spatial axes.
//!
//! Mirrors interior samples without repeating the edge pixel (the
//! TensorFlow/NumPy `REFLECT` mode): padding `[a b c d]` by 2 gives
//! `[c b a b c d c b]`. Channels are never padded.
//!
//! Pooling-style operators (SSIM) pad with reflection, while bilinear
//! sampling in the warper clamps to the edge. The two policies are distinct.
use crate::image::ImageF32;

/// Mirror an out-of-range index back into `[0, n)`.
#[inline]
pub(crate) fn reflect_index(i: isize, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let m = i.rem_euclid(period);
    if m >= n as isize {
        (period - m) as usize
    } else {
        m as usize
    }
}

fn check_padding(image_w: usize, image_h: usize, pad_h: usize, pad_w: usize) {
    assert!(
        (pad_h == 0 || pad_h < image_h) && (pad_w == 0 || pad_w < image_w),
        "reflection padding ({pad_h}, {pad_w}) requires a larger image than {image_h}x{image_w}"
    );
}

/// Pad `pad_h` rows above and below and `pad_w` columns left and right.
pub fn reflect_pad(image: &ImageF32, pad_h: usize, pad_w: usize) -> ImageF32 {
    check_padding(image.w, image.h, pad_h, pad_w);
    let (w, h, ch) = image.shape();
    let out_w = w + 2 * pad_w;
    let out_h = h + 2 * pad_h;
    let mut out = ImageF32::new(out_w, out_h, ch);
    for py in 0..out_h {
        let sy = reflect_index(py as isize - pad_h as isize, h);
        for px in 0..out_w {
            let sx = reflect_index(px as isize - pad_w as isize, w);
            let src = image.idx(sx, sy, 0);
            let dst = out.idx(px, py, 0);
            out.data[dst..dst + ch].copy_from_slice(&image.data[src..src + ch]);
        }
    }
    out
}

/// Adjoint of [`reflect_pad`]: fold a gradient on the padded grid back onto
/// the `w × h` source grid, summing contributions of mirrored samples.
pub fn reflect_pad_backward(
    grad_padded: &ImageF32,
    pad_h: usize,
    pad_w: usize,
    w: usize,
    h: usize,
) -> ImageF32 {
    assert_eq!(
        (grad_padded.w, grad_padded.h),
        (w + 2 * pad_w, h + 2 * pad_h),
        "padded gradient does not match the requested padding"
    );
    check_padding(w, h, pad_h, pad_w);
    let ch = grad_padded.channels;
    let mut out = ImageF32::new(w, h, ch);
    for py in 0..grad_padded.h {
        let sy = reflect_index(py as isize - pad_h as isize, h);
        for px in 0..grad_padded.w {
            let sx = reflect_index(px as isize - pad_w as isize, w);
            for c in 0..ch {
                out.add(sx, sy, c, grad_padded.get(px, py, c));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflects_without_repeating_edge() {
        let row = ImageF32::from_vec(4, 1, 1, vec![1.0, 2.0, 3.0, 4.0]);
        let padded = reflect_pad(&row, 0, 2);
        assert_eq!(padded.data, vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0]);
    }

    #[test]
    fn pads_rows_and_keeps_channels() {
        let img = ImageF32::from_fn(2, 3, 2, |x, y, c| (10 * y + x) as f32 + 0.5 * c as f32);
        let padded = reflect_pad(&img, 1, 1);
        assert_eq!(padded.shape(), (4, 5, 2));
        // top-left corner mirrors (1, 1)
        assert_eq!(padded.pixel(0, 0), img.pixel(1, 1));
        // bottom row mirrors row h-2
        assert_eq!(padded.pixel(1, 4), img.pixel(0, 1));
    }

    #[test]
    fn backward_is_adjoint_of_forward() {
        let img = ImageF32::from_fn(4, 3, 1, |x, y, _| (x * 3 + y * 7) as f32 * 0.1);
        let probe = ImageF32::from_fn(6, 5, 1, |x, y, _| ((x + 2 * y) % 5) as f32 - 1.5);
        let lhs: f32 = reflect_pad(&img, 1, 1)
            .data
            .iter()
            .zip(&probe.data)
            .map(|(a, b)| a * b)
            .sum();
        let folded = reflect_pad_backward(&probe, 1, 1, 4, 3);
        let rhs: f32 = img.data.iter().zip(&folded.data).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() < 1e-4, "lhs={lhs} rhs={rhs}");
    }

    #[test]
    #[should_panic(expected = "reflection padding")]
    fn padding_wider_than_image_panics() {
        let img = ImageF32::new(2, 2, 1);
        let _ = reflect_pad(&img, 1, 2);
    }
}
