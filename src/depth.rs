//! Disparity normalization and depth-map resampling.
//!
//! The depth network emits disparities in `[0, 1]`. They are mapped affinely
//! into `[1/max_depth, 1/min_depth]` and inverted:
//!
//! ```text
//! disp  = min_disp + (max_disp − min_disp) · raw
//! depth = 1 / disp
//! ```
//!
//! so `raw = 0 → max_depth` and `raw = 1 → min_depth`. Training and
//! inference must use the same mapping; it is evaluated in exactly this
//! order everywhere in the crate.
use crate::error::DepthError;
use crate::image::ImageF32;
use serde::{Deserialize, Serialize};

/// Depth bounds of a trained model.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthRange {
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for DepthRange {
    fn default() -> Self {
        Self {
            min_depth: 1.0,
            max_depth: 100.0,
        }
    }
}

impl DepthRange {
    /// Bounds used by the volume-estimation service.
    pub const SERVING: DepthRange = DepthRange {
        min_depth: 0.01,
        max_depth: 10.0,
    };
    /// Bounds used when inspecting network outputs offline.
    pub const EVALUATION: DepthRange = DepthRange {
        min_depth: 0.1,
        max_depth: 10.0,
    };

    pub fn new(min_depth: f32, max_depth: f32) -> Self {
        Self {
            min_depth,
            max_depth,
        }
    }
}

/// Maps raw `[0, 1]` disparities to bounded depth.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthNormalizer {
    range: DepthRange,
    min_disp: f32,
    max_disp: f32,
}

impl DepthNormalizer {
    pub fn new(range: DepthRange) -> Result<Self, DepthError> {
        let DepthRange {
            min_depth,
            max_depth,
        } = range;
        let valid = min_depth.is_finite()
            && max_depth.is_finite()
            && min_depth > 0.0
            && max_depth > min_depth;
        if !valid {
            return Err(DepthError::InvalidDepthRange {
                min_depth,
                max_depth,
            });
        }
        Ok(Self {
            range,
            min_disp: 1.0 / max_depth,
            max_disp: 1.0 / min_depth,
        })
    }

    pub fn range(&self) -> DepthRange {
        self.range
    }

    pub fn min_disp(&self) -> f32 {
        self.min_disp
    }

    pub fn max_disp(&self) -> f32 {
        self.max_disp
    }

    #[inline]
    pub fn disparity(&self, raw: f32) -> f32 {
        self.min_disp + (self.max_disp - self.min_disp) * raw
    }

    #[inline]
    pub fn depth(&self, raw: f32) -> f32 {
        1.0 / self.disparity(raw)
    }

    /// Inverse of [`Self::depth`].
    #[inline]
    pub fn raw_from_depth(&self, depth: f32) -> f32 {
        (1.0 / depth - self.min_disp) / (self.max_disp - self.min_disp)
    }

    /// Element-wise `raw → depth`.
    pub fn normalize(&self, raw: &ImageF32) -> ImageF32 {
        raw.map(|r| self.depth(r))
    }

    /// Element-wise `depth → raw`.
    pub fn denormalize(&self, depth: &ImageF32) -> ImageF32 {
        depth.map(|d| self.raw_from_depth(d))
    }

    /// Chain `∂L/∂depth` back to `∂L/∂raw`.
    pub fn normalize_backward(&self, raw: &ImageF32, grad_depth: &ImageF32) -> ImageF32 {
        let span = self.max_disp - self.min_disp;
        raw.zip_map(grad_depth, |r, g| {
            let disp = self.disparity(r);
            -g * span / (disp * disp)
        })
    }

    /// Upsample a coarse-scale disparity by `factor`, then normalize.
    pub fn depth_for_display(&self, raw: &ImageF32, factor: usize) -> ImageF32 {
        self.normalize(&upsample_nearest(raw, factor))
    }
}

/// Repeat every pixel `factor` times along both axes.
pub fn upsample_nearest(map: &ImageF32, factor: usize) -> ImageF32 {
    assert!(factor >= 1, "upsampling factor must be at least 1");
    if factor == 1 {
        return map.clone();
    }
    ImageF32::from_fn(map.w * factor, map.h * factor, map.channels, |x, y, c| {
        map.get(x / factor, y / factor, c)
    })
}

/// Adjoint of [`upsample_nearest`]: sum each `factor × factor` block.
pub fn upsample_nearest_backward(grad: &ImageF32, factor: usize) -> ImageF32 {
    assert!(factor >= 1, "upsampling factor must be at least 1");
    assert!(
        grad.w % factor == 0 && grad.h % factor == 0,
        "gradient {}x{} is not a multiple of factor {factor}",
        grad.w,
        grad.h
    );
    if factor == 1 {
        return grad.clone();
    }
    let mut out = ImageF32::new(grad.w / factor, grad.h / factor, grad.channels);
    for y in 0..grad.h {
        for x in 0..grad.w {
            for c in 0..grad.channels {
                out.add(x / factor, y / factor, c, grad.get(x, y, c));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer(min: f32, max: f32) -> DepthNormalizer {
        DepthNormalizer::new(DepthRange::new(min, max)).unwrap()
    }

    #[test]
    fn boundaries_map_to_depth_limits() {
        let n = normalizer(1.0, 10.0);
        assert!((n.depth(0.0) - 10.0).abs() < 1e-5);
        assert!((n.depth(1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn interior_disparities_stay_inside_range() {
        for range in [DepthRange::default(), DepthRange::SERVING, DepthRange::EVALUATION] {
            let n = DepthNormalizer::new(range).unwrap();
            for i in 1..100 {
                let d = n.depth(i as f32 / 100.0);
                assert!(
                    d > range.min_depth && d < range.max_depth,
                    "depth {d} escaped {range:?}"
                );
            }
        }
    }

    #[test]
    fn depth_round_trips_through_raw() {
        let n = normalizer(0.1, 10.0);
        for &d in &[0.15f32, 0.5, 1.0, 3.3, 9.9] {
            let back = n.depth(n.raw_from_depth(d));
            assert!((back - d).abs() / d < 1e-5, "{d} -> {back}");
        }
    }

    #[test]
    fn display_depth_upsamples_then_normalizes() {
        let n = normalizer(0.1, 10.0);
        let coarse = ImageF32::from_vec(2, 1, 1, vec![0.0, 1.0]);
        let shown = n.depth_for_display(&coarse, 4);
        assert_eq!(shown.shape(), (8, 4, 1));
        assert!((shown.get(3, 3, 0) - 10.0).abs() < 1e-4);
        assert!((shown.get(4, 0, 0) - 0.1).abs() < 1e-6);
        let back = n.denormalize(&shown);
        assert!((back.get(0, 0, 0)).abs() < 1e-5 && (back.get(7, 0, 0) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        for (min, max) in [(0.0, 1.0), (-1.0, 2.0), (5.0, 5.0), (2.0, f32::INFINITY)] {
            assert!(DepthNormalizer::new(DepthRange::new(min, max)).is_err());
        }
    }

    #[test]
    fn backward_matches_finite_differences() {
        let n = normalizer(1.0, 10.0);
        let raw = ImageF32::from_vec(3, 1, 1, vec![0.1, 0.5, 0.9]);
        let grad = n.normalize_backward(&raw, &ImageF32::filled(3, 1, 1, 1.0));
        for x in 0..3 {
            let r = raw.get(x, 0, 0);
            let eps = 1e-3;
            let numeric = (n.depth(r + eps) - n.depth(r - eps)) / (2.0 * eps);
            let analytic = grad.get(x, 0, 0);
            assert!(
                (numeric - analytic).abs() < 1e-2 * numeric.abs().max(1.0),
                "raw={r}: numeric={numeric} analytic={analytic}"
            );
        }
    }

    #[test]
    fn nearest_upsampling_repeats_pixels() {
        let map = ImageF32::from_vec(2, 1, 1, vec![1.0, 2.0]);
        let up = upsample_nearest(&map, 2);
        assert_eq!(up.shape(), (4, 2, 1));
        assert_eq!(up.data, vec![1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0]);
        let folded = upsample_nearest_backward(&ImageF32::filled(4, 2, 1, 1.0), 2);
        assert_eq!(folded.data, vec![4.0, 4.0]);
    }
}
