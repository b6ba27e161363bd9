//! Differentiable structural dissimilarity over 3×3 windows.
//!
//! Both images are reflect-padded by one pixel, local statistics are taken
//! with a stride-1 3×3 box filter in "valid" mode, so the output keeps the
//! input resolution:
//!
//! ```text
//! ssim = (2·μx·μy + c1)(2·σxy + c2) / ((μx² + μy² + c1)(σx + σy + c2))
//! out  = clip((1 − ssim) / 2, 0, 1)
//! ```
//!
//! with `c1 = 0.01²`, `c2 = 0.03²`. Statistics are per channel; the output
//! has the channel count of the inputs.
use crate::image::ImageF32;
use crate::padding::{reflect_pad, reflect_pad_backward};

pub const SSIM_C1: f32 = 0.01 * 0.01;
pub const SSIM_C2: f32 = 0.03 * 0.03;

const WINDOW: usize = 3;
const WINDOW_AREA: f32 = (WINDOW * WINDOW) as f32;

#[derive(Clone, Copy, Debug)]
struct WindowStats {
    mu_x: f32,
    mu_y: f32,
    sigma_x: f32,
    sigma_y: f32,
    sigma_xy: f32,
}

impl WindowStats {
    #[inline]
    fn gather(xp: &ImageF32, yp: &ImageF32, x: usize, y: usize, c: usize) -> Self {
        let (mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0f32, 0.0, 0.0, 0.0, 0.0);
        for wy in y..y + WINDOW {
            for wx in x..x + WINDOW {
                let a = xp.get(wx, wy, c);
                let b = yp.get(wx, wy, c);
                sx += a;
                sy += b;
                sxx += a * a;
                syy += b * b;
                sxy += a * b;
            }
        }
        let mu_x = sx / WINDOW_AREA;
        let mu_y = sy / WINDOW_AREA;
        Self {
            mu_x,
            mu_y,
            sigma_x: sxx / WINDOW_AREA - mu_x * mu_x,
            sigma_y: syy / WINDOW_AREA - mu_y * mu_y,
            sigma_xy: sxy / WINDOW_AREA - mu_x * mu_y,
        }
    }

    #[inline]
    fn numerator_terms(&self) -> (f32, f32) {
        (
            2.0 * self.mu_x * self.mu_y + SSIM_C1,
            2.0 * self.sigma_xy + SSIM_C2,
        )
    }

    #[inline]
    fn denominator_terms(&self) -> (f32, f32) {
        (
            self.mu_x * self.mu_x + self.mu_y * self.mu_y + SSIM_C1,
            self.sigma_x + self.sigma_y + SSIM_C2,
        )
    }

    #[inline]
    fn ssim(&self) -> f32 {
        let (n1, n2) = self.numerator_terms();
        let (d1, d2) = self.denominator_terms();
        (n1 * n2) / (d1 * d2)
    }
}

fn check_pair(x: &ImageF32, y: &ImageF32) {
    assert!(
        x.same_shape(y),
        "SSIM inputs must share a shape: {:?} vs {:?}",
        x.shape(),
        y.shape()
    );
}

/// Per-pixel, per-channel dissimilarity `clip((1 − ssim)/2, 0, 1)`.
pub fn ssim_dissimilarity(x: &ImageF32, y: &ImageF32) -> ImageF32 {
    check_pair(x, y);
    let (w, h, ch) = x.shape();
    let xp = reflect_pad(x, 1, 1);
    let yp = reflect_pad(y, 1, 1);
    ImageF32::from_fn(w, h, ch, |px, py, c| {
        let stats = WindowStats::gather(&xp, &yp, px, py, c);
        ((1.0 - stats.ssim()) * 0.5).clamp(0.0, 1.0)
    })
}

/// Gradient of `Σ grad_out ⊙ ssim_dissimilarity(x, y)` with respect to `y`.
///
/// Pixels whose dissimilarity was clipped contribute nothing.
pub fn ssim_dissimilarity_backward(x: &ImageF32, y: &ImageF32, grad_out: &ImageF32) -> ImageF32 {
    check_pair(x, y);
    assert!(
        grad_out.same_shape(x),
        "upstream gradient {:?} must match SSIM output {:?}",
        grad_out.shape(),
        x.shape()
    );
    let (w, h, ch) = x.shape();
    let xp = reflect_pad(x, 1, 1);
    let yp = reflect_pad(y, 1, 1);
    let mut grad_padded = ImageF32::new(xp.w, xp.h, ch);

    for py in 0..h {
        for px in 0..w {
            for c in 0..ch {
                let g = grad_out.get(px, py, c);
                if g == 0.0 {
                    continue;
                }
                let stats = WindowStats::gather(&xp, &yp, px, py, c);
                let ssim = stats.ssim();
                let dissim = (1.0 - ssim) * 0.5;
                if !(0.0..=1.0).contains(&dissim) {
                    continue;
                }
                let (n1, n2) = stats.numerator_terms();
                let (d1, d2) = stats.denominator_terms();
                let den = d1 * d2;
                // partials of ssim w.r.t. the y-side statistics
                let d_mu_y = 2.0 * stats.mu_x * n2 / den - ssim * 2.0 * stats.mu_y / d1;
                let d_sigma_y = -ssim / d2;
                let d_sigma_xy = 2.0 * n1 / den;
                // chain through (1 − ssim)/2
                let scale = -0.5 * g / WINDOW_AREA;
                for wy in py..py + WINDOW {
                    for wx in px..px + WINDOW {
                        let a = xp.get(wx, wy, c);
                        let b = yp.get(wx, wy, c);
                        let d_b = d_mu_y
                            + d_sigma_y * 2.0 * (b - stats.mu_y)
                            + d_sigma_xy * (a - stats.mu_x);
                        grad_padded.add(wx, wy, c, scale * d_b);
                    }
                }
            }
        }
    }

    reflect_pad_backward(&grad_padded, 1, 1, w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(w: usize, h: usize, phase: f32) -> ImageF32 {
        ImageF32::from_fn(w, h, 3, |x, y, c| {
            0.5 + 0.4 * ((x as f32) * 0.9 + (y as f32) * 0.5 + c as f32 + phase).sin()
        })
    }

    #[test]
    fn identical_images_have_zero_dissimilarity() {
        let img = pattern(7, 5, 0.0);
        let d = ssim_dissimilarity(&img, &img);
        assert_eq!(d.shape(), img.shape());
        assert!(d.data.iter().all(|v| v.abs() < 1e-6), "max={}", d.max_value());
    }

    #[test]
    fn flat_images_are_handled_without_nan() {
        let a = ImageF32::new(4, 4, 1);
        let b = ImageF32::filled(4, 4, 1, 1.0);
        let d = ssim_dissimilarity(&a, &b);
        assert!(d.data.iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v)));
        // luminance term alone: (1 - c1 / (1 + c1)) / 2
        let expected = (1.0 - SSIM_C1 / (1.0 + SSIM_C1)) * 0.5;
        assert!((d.get(1, 1, 0) - expected).abs() < 1e-5);
    }

    #[test]
    fn dissimilarity_grows_with_difference() {
        let a = pattern(6, 6, 0.0);
        let near = ssim_dissimilarity(&a, &pattern(6, 6, 0.1)).mean();
        let far = ssim_dissimilarity(&a, &pattern(6, 6, 1.5)).mean();
        assert!(near < far, "near={near} far={far}");
    }

    #[test]
    fn backward_matches_finite_differences() {
        let x = pattern(5, 4, 0.0);
        let y = pattern(5, 4, 0.8);
        let probe = ImageF32::from_fn(5, 4, 3, |px, py, c| ((px + 2 * py + c) % 4) as f32 * 0.25);
        let objective = |img: &ImageF32| -> f64 {
            ssim_dissimilarity(&x, img)
                .data
                .iter()
                .zip(&probe.data)
                .map(|(&a, &b)| a as f64 * b as f64)
                .sum()
        };
        let grad = ssim_dissimilarity_backward(&x, &y, &probe);
        let eps = 1e-3;
        for &(px, py, c) in &[(0usize, 0usize, 0usize), (2, 1, 1), (4, 3, 2), (1, 2, 0)] {
            let mut plus = y.clone();
            let mut minus = y.clone();
            plus.add(px, py, c, eps);
            minus.add(px, py, c, -eps);
            let numeric = (objective(&plus) - objective(&minus)) / (2.0 * eps as f64);
            let analytic = grad.get(px, py, c) as f64;
            assert!(
                (numeric - analytic).abs() < 5e-3 + 2e-2 * numeric.abs(),
                "({px},{py},{c}): numeric={numeric} analytic={analytic}"
            );
        }
    }
}
