//! Edge-aware depth smoothness.
//!
//! Depth is divided by its mean first so the penalty does not reward
//! shrinking the whole map. Forward differences are weighted by
//! `exp(−mean_c |∂I|)`, relaxing the penalty across image edges:
//!
//! ```text
//! n  = d / (mean(d) + ε)
//! L  = mean |∂x n · exp(−|∂x I|)| + mean |∂y n · exp(−|∂y I|)|
//! ```
//!
//! An axis of extent one has no differences and contributes zero.
use crate::image::ImageF32;

pub const SMOOTHNESS_EPS: f32 = 1e-7;

/// Edge weights along x (`h × (w−1)`) and y (`(h−1) × w`), row-major.
fn edge_weights(image: &ImageF32) -> (Vec<f32>, Vec<f32>) {
    let (w, h, ch) = image.shape();
    let ch_f = ch as f32;
    let grad_mean = |x0: usize, y0: usize, x1: usize, y1: usize| {
        image
            .pixel(x0, y0)
            .iter()
            .zip(image.pixel(x1, y1))
            .map(|(a, b)| (a - b).abs())
            .sum::<f32>()
            / ch_f
    };
    let mut wx = Vec::with_capacity(h * w.saturating_sub(1));
    for y in 0..h {
        for x in 0..w.saturating_sub(1) {
            wx.push((-grad_mean(x, y, x + 1, y)).exp());
        }
    }
    let mut wy = Vec::with_capacity(h.saturating_sub(1) * w);
    for y in 0..h.saturating_sub(1) {
        for x in 0..w {
            wy.push((-grad_mean(x, y, x, y + 1)).exp());
        }
    }
    (wx, wy)
}

fn check_inputs(image: &ImageF32, depth: &ImageF32) {
    assert_eq!(depth.channels, 1, "depth must be single-channel");
    assert!(
        image.same_extent(depth),
        "image {:?} and depth {:?} differ in extent",
        image.shape(),
        depth.shape()
    );
}

#[inline]
fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Scalar edge-aware smoothness of `depth` guided by `image`.
pub fn depth_smoothness(image: &ImageF32, depth: &ImageF32) -> f32 {
    check_inputs(image, depth);
    let (w, h) = (depth.w, depth.h);
    let denom = depth.mean() + SMOOTHNESS_EPS;
    let (wx, wy) = edge_weights(image);

    let mut total = 0.0f32;
    if !wx.is_empty() {
        let mut sum = 0.0f64;
        for y in 0..h {
            for x in 0..w - 1 {
                let dx = (depth.get(x, y, 0) - depth.get(x + 1, y, 0)) / denom;
                sum += (dx * wx[y * (w - 1) + x]).abs() as f64;
            }
        }
        total += (sum / wx.len() as f64) as f32;
    }
    if !wy.is_empty() {
        let mut sum = 0.0f64;
        for y in 0..h - 1 {
            for x in 0..w {
                let dy = (depth.get(x, y, 0) - depth.get(x, y + 1, 0)) / denom;
                sum += (dy * wy[y * w + x]).abs() as f64;
            }
        }
        total += (sum / wy.len() as f64) as f32;
    }
    total
}

/// Gradient of [`depth_smoothness`] with respect to `depth`.
///
/// The image only shapes the weights and receives no gradient.
pub fn depth_smoothness_backward(image: &ImageF32, depth: &ImageF32) -> ImageF32 {
    check_inputs(image, depth);
    let (w, h) = (depth.w, depth.h);
    let denom = depth.mean() + SMOOTHNESS_EPS;
    let (wx, wy) = edge_weights(image);

    // gradient with respect to the normalized map n
    let mut grad_n = ImageF32::new(w, h, 1);
    if !wx.is_empty() {
        let scale = 1.0 / wx.len() as f32;
        for y in 0..h {
            for x in 0..w - 1 {
                let weight = wx[y * (w - 1) + x];
                let s = sign(depth.get(x, y, 0) - depth.get(x + 1, y, 0)) * weight * scale;
                grad_n.add(x, y, 0, s);
                grad_n.add(x + 1, y, 0, -s);
            }
        }
    }
    if !wy.is_empty() {
        let scale = 1.0 / wy.len() as f32;
        for y in 0..h - 1 {
            for x in 0..w {
                let weight = wy[y * w + x];
                let s = sign(depth.get(x, y, 0) - depth.get(x, y + 1, 0)) * weight * scale;
                grad_n.add(x, y, 0, s);
                grad_n.add(x, y + 1, 0, -s);
            }
        }
    }

    // n_j = d_j / (mean(d) + ε)  ⇒  ∂L/∂d_j = g_j/denom − Σ g_i d_i / (denom² · N)
    let coupling: f64 = grad_n
        .data
        .iter()
        .zip(&depth.data)
        .map(|(&g, &d)| g as f64 * d as f64)
        .sum();
    let shift = (coupling / (denom as f64 * denom as f64 * depth.len() as f64)) as f32;
    grad_n.map(|g| g / denom - shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textured(w: usize, h: usize) -> ImageF32 {
        ImageF32::from_fn(w, h, 3, |x, y, c| {
            0.5 + 0.3 * ((x as f32) * 0.8 - (y as f32) * 1.1 + c as f32).cos()
        })
    }

    #[test]
    fn constant_depth_is_perfectly_smooth() {
        let image = textured(6, 5);
        let depth = ImageF32::filled(6, 5, 1, 3.7);
        assert_eq!(depth_smoothness(&image, &depth), 0.0);
        let grad = depth_smoothness_backward(&image, &depth);
        assert!(grad.data.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn penalty_is_scale_invariant() {
        let image = textured(5, 5);
        let depth = ImageF32::from_fn(5, 5, 1, |x, y, _| 1.0 + 0.2 * x as f32 + 0.1 * y as f32);
        let scaled = depth.map(|d| 10.0 * d);
        let a = depth_smoothness(&image, &depth);
        let b = depth_smoothness(&image, &scaled);
        assert!(a > 0.0);
        assert!((a - b).abs() < 1e-5 * a.max(1.0), "{a} vs {b}");
    }

    #[test]
    fn image_edges_relax_the_penalty() {
        let depth = ImageF32::from_fn(4, 4, 1, |x, _, _| if x < 2 { 1.0 } else { 2.0 });
        let flat = ImageF32::filled(4, 4, 3, 0.5);
        let edge = ImageF32::from_fn(4, 4, 3, |x, _, _| if x < 2 { 0.0 } else { 1.0 });
        assert!(depth_smoothness(&edge, &depth) < depth_smoothness(&flat, &depth));
    }

    #[test]
    fn degenerate_axes_contribute_nothing() {
        let row_image = textured(4, 1);
        let row = ImageF32::from_vec(4, 1, 1, vec![1.0, 2.0, 1.0, 2.0]);
        assert!(depth_smoothness(&row_image, &row) > 0.0);
        let pixel = ImageF32::filled(1, 1, 1, 2.0);
        assert_eq!(depth_smoothness(&textured(1, 1), &pixel), 0.0);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let image = textured(5, 4);
        let depth = ImageF32::from_fn(5, 4, 1, |x, y, _| {
            2.0 + 0.7 * ((x as f32) * 1.3).sin() + 0.4 * ((y as f32) * 0.9 + 0.2).cos()
        });
        let grad = depth_smoothness_backward(&image, &depth);
        let eps = 1e-3;
        for &(x, y) in &[(0usize, 0usize), (2, 1), (4, 3), (1, 2)] {
            let mut plus = depth.clone();
            let mut minus = depth.clone();
            plus.add(x, y, 0, eps);
            minus.add(x, y, 0, -eps);
            let numeric = (depth_smoothness(&image, &plus) as f64
                - depth_smoothness(&image, &minus) as f64)
                / (2.0 * eps as f64);
            let analytic = grad.get(x, y, 0) as f64;
            assert!(
                (numeric - analytic).abs() < 2e-3 + 2e-2 * numeric.abs(),
                "({x},{y}): numeric={numeric} analytic={analytic}"
            );
        }
    }
}
