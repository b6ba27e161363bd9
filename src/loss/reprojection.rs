//! Minimum-reprojection loss with optional auto-masking.
//!
//! For a target frame and two reprojections (from the previous and next
//! frames) the loss per pixel and channel is
//!
//! ```text
//! alpha · min(ssim(t, r_prev), ssim(t, r_next)) + (1 − alpha) · min(l1(t, r_prev), l1(t, r_next))
//! ```
//!
//! where `ssim` is the per-channel dissimilarity map and `l1` the absolute
//! difference averaged over channels (broadcast across channels). Taking the
//! minimum assumes at least one source view explains each pixel, which
//! handles occlusions at frame borders.
//!
//! Auto-masking evaluates the same blend against the un-warped source frames
//! and keeps the loss only where the reprojection is strictly better. Masked
//! elements are replaced by zero with an explicit select. The map is
//! returned unreduced.
use super::LossParams;
use crate::image::ImageF32;
use crate::ssim::{ssim_dissimilarity, ssim_dissimilarity_backward};
use log::debug;

/// Inputs of the reprojection loss, in the order the training graph
/// concatenates them.
#[derive(Clone, Copy, Debug)]
pub struct ReprojectionInputs<'a> {
    pub prev_frame: &'a ImageF32,
    pub next_frame: &'a ImageF32,
    pub reprojection_prev: &'a ImageF32,
    pub reprojection_next: &'a ImageF32,
}

impl ReprojectionInputs<'_> {
    fn check(&self, target: &ImageF32) {
        for (name, img) in [
            ("prev_frame", self.prev_frame),
            ("next_frame", self.next_frame),
            ("reprojection_prev", self.reprojection_prev),
            ("reprojection_next", self.reprojection_next),
        ] {
            assert!(
                img.same_shape(target),
                "{name} {:?} does not match target {:?}",
                img.shape(),
                target.shape()
            );
        }
    }
}

/// Unreduced loss map plus the auto-mask that produced it.
#[derive(Clone, Debug)]
pub struct ReprojectionLoss {
    /// Per-pixel, per-channel loss (target shape).
    pub loss: ImageF32,
    /// `true` where the reprojection beat the un-warped sources; `None`
    /// when masking is disabled.
    pub mask: Option<Vec<bool>>,
}

impl ReprojectionLoss {
    pub fn mean(&self) -> f32 {
        self.loss.mean()
    }

    /// Fraction of elements suppressed by the auto-mask.
    pub fn masked_fraction(&self) -> f32 {
        match &self.mask {
            Some(mask) if !mask.is_empty() => {
                mask.iter().filter(|keep| !**keep).count() as f32 / mask.len() as f32
            }
            _ => 0.0,
        }
    }
}

/// Absolute difference averaged over channels; single-channel output.
pub fn mean_absolute_error(a: &ImageF32, b: &ImageF32) -> ImageF32 {
    assert!(
        a.same_shape(b),
        "shape mismatch: {:?} vs {:?}",
        a.shape(),
        b.shape()
    );
    let ch = a.channels as f32;
    ImageF32::from_fn(a.w, a.h, 1, |x, y, _| {
        a.pixel(x, y)
            .iter()
            .zip(b.pixel(x, y))
            .map(|(p, q)| (p - q).abs())
            .sum::<f32>()
            / ch
    })
}

/// Blended metric of the better of two candidates, with branch choices.
struct BlendedMinimum {
    loss: ImageF32,
    /// Per pixel: the first candidate had the smaller (or equal) L1.
    l1_first: Vec<bool>,
    /// Per element: the first candidate had the smaller (or equal) SSIM term.
    ssim_first: Vec<bool>,
}

fn blended_minimum(
    target: &ImageF32,
    first: &ImageF32,
    second: &ImageF32,
    alpha: f32,
) -> BlendedMinimum {
    let l1_a = mean_absolute_error(target, first);
    let l1_b = mean_absolute_error(target, second);
    let ssim_a = ssim_dissimilarity(target, first);
    let ssim_b = ssim_dissimilarity(target, second);

    let (w, h, ch) = target.shape();
    let mut loss = ImageF32::new(w, h, ch);
    let mut l1_first = vec![false; w * h];
    let mut ssim_first = vec![false; w * h * ch];
    for y in 0..h {
        for x in 0..w {
            let (a, b) = (l1_a.get(x, y, 0), l1_b.get(x, y, 0));
            let pick_a = a <= b;
            l1_first[y * w + x] = pick_a;
            let l1 = if pick_a { a } else { b };
            for c in 0..ch {
                let i = loss.idx(x, y, c);
                let (sa, sb) = (ssim_a.data[i], ssim_b.data[i]);
                ssim_first[i] = sa <= sb;
                let s = if sa <= sb { sa } else { sb };
                loss.data[i] = alpha * s + (1.0 - alpha) * l1;
            }
        }
    }
    BlendedMinimum {
        loss,
        l1_first,
        ssim_first,
    }
}

fn automask(
    target: &ImageF32,
    inputs: &ReprojectionInputs<'_>,
    reprojected: &ImageF32,
    alpha: f32,
) -> Vec<bool> {
    let source = blended_minimum(target, inputs.prev_frame, inputs.next_frame, alpha);
    reprojected
        .data
        .iter()
        .zip(&source.loss.data)
        .map(|(r, s)| r < s)
        .collect()
}

/// Masked minimum-reprojection loss map (target shape, unreduced).
pub fn reprojection_loss(
    target: &ImageF32,
    inputs: &ReprojectionInputs<'_>,
    params: &LossParams,
) -> ReprojectionLoss {
    inputs.check(target);
    let blended = blended_minimum(
        target,
        inputs.reprojection_prev,
        inputs.reprojection_next,
        params.alpha,
    );
    if !params.automask {
        return ReprojectionLoss {
            loss: blended.loss,
            mask: None,
        };
    }

    let mask = automask(target, inputs, &blended.loss, params.alpha);
    let loss = ImageF32::from_vec(
        target.w,
        target.h,
        target.channels,
        blended
            .loss
            .data
            .iter()
            .zip(&mask)
            .map(|(&l, &keep)| if keep { l } else { 0.0 })
            .collect(),
    );
    let result = ReprojectionLoss {
        loss,
        mask: Some(mask),
    };
    debug!(
        "reprojection_loss: mean={:.6} masked={:.1}%",
        result.mean(),
        100.0 * result.masked_fraction()
    );
    result
}

/// Gradients of `Σ grad_loss ⊙ reprojection_loss(..)` with respect to the
/// previous- and next-frame reprojections.
///
/// Each minimum routes the gradient to the branch it selected (the previous
/// frame on ties); masked elements pass no gradient. Source frames are data
/// and receive no gradient.
pub fn reprojection_loss_backward(
    target: &ImageF32,
    inputs: &ReprojectionInputs<'_>,
    params: &LossParams,
    grad_loss: &ImageF32,
) -> (ImageF32, ImageF32) {
    inputs.check(target);
    assert!(
        grad_loss.same_shape(target),
        "upstream gradient {:?} must match the loss map {:?}",
        grad_loss.shape(),
        target.shape()
    );
    let alpha = params.alpha;
    let blended = blended_minimum(
        target,
        inputs.reprojection_prev,
        inputs.reprojection_next,
        alpha,
    );
    let effective = if params.automask {
        let mask = automask(target, inputs, &blended.loss, alpha);
        ImageF32::from_vec(
            target.w,
            target.h,
            target.channels,
            grad_loss
                .data
                .iter()
                .zip(&mask)
                .map(|(&g, &keep)| if keep { g } else { 0.0 })
                .collect(),
        )
    } else {
        grad_loss.clone()
    };

    let (w, h, ch) = target.shape();
    let mut ssim_grad_prev = ImageF32::new(w, h, ch);
    let mut ssim_grad_next = ImageF32::new(w, h, ch);
    let mut grad_prev = ImageF32::new(w, h, ch);
    let mut grad_next = ImageF32::new(w, h, ch);
    for y in 0..h {
        for x in 0..w {
            let mut l1_grad = 0.0;
            for c in 0..ch {
                let i = effective.idx(x, y, c);
                let g = effective.data[i];
                if blended.ssim_first[i] {
                    ssim_grad_prev.data[i] = alpha * g;
                } else {
                    ssim_grad_next.data[i] = alpha * g;
                }
                l1_grad += (1.0 - alpha) * g;
            }
            if l1_grad == 0.0 {
                continue;
            }
            let (chosen, grad) = if blended.l1_first[y * w + x] {
                (inputs.reprojection_prev, &mut grad_prev)
            } else {
                (inputs.reprojection_next, &mut grad_next)
            };
            for c in 0..ch {
                // ∂|r − t|/∂r = sign(r − t), zero at equality
                let diff = chosen.get(x, y, c) - target.get(x, y, c);
                let sign = if diff > 0.0 {
                    1.0
                } else if diff < 0.0 {
                    -1.0
                } else {
                    0.0
                };
                grad.add(x, y, c, l1_grad * sign / ch as f32);
            }
        }
    }

    grad_prev.add_assign(&ssim_dissimilarity_backward(
        target,
        inputs.reprojection_prev,
        &ssim_grad_prev,
    ));
    grad_next.add_assign(&ssim_dissimilarity_backward(
        target,
        inputs.reprojection_next,
        &ssim_grad_next,
    ));
    (grad_prev, grad_next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(w: usize, h: usize, phase: f32) -> ImageF32 {
        ImageF32::from_fn(w, h, 3, |x, y, c| {
            0.5 + 0.35 * ((x as f32) * 1.3 + (y as f32) * 0.7 + 0.5 * c as f32 + phase).sin()
        })
    }

    fn unmasked() -> LossParams {
        LossParams {
            automask: false,
            ..Default::default()
        }
    }

    #[test]
    fn mae_averages_over_channels() {
        let a = ImageF32::from_vec(1, 1, 3, vec![0.0, 0.5, 1.0]);
        let b = ImageF32::from_vec(1, 1, 3, vec![0.3, 0.5, 0.4]);
        let mae = mean_absolute_error(&a, &b);
        assert_eq!(mae.shape(), (1, 1, 1));
        assert!((mae.get(0, 0, 0) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn unmasked_loss_is_symmetric_in_sources() {
        let target = frame(6, 5, 0.0);
        let (prev, next) = (frame(6, 5, 0.4), frame(6, 5, -0.9));
        let (rp, rn) = (frame(6, 5, 0.2), frame(6, 5, -0.3));
        let forward = reprojection_loss(
            &target,
            &ReprojectionInputs {
                prev_frame: &prev,
                next_frame: &next,
                reprojection_prev: &rp,
                reprojection_next: &rn,
            },
            &unmasked(),
        );
        let swapped = reprojection_loss(
            &target,
            &ReprojectionInputs {
                prev_frame: &next,
                next_frame: &prev,
                reprojection_prev: &rn,
                reprojection_next: &rp,
            },
            &unmasked(),
        );
        assert!(forward.mask.is_none());
        assert_eq!(forward.loss.data, swapped.loss.data);
    }

    #[test]
    fn perfect_reprojection_is_zero_under_mask() {
        let target = frame(6, 6, 0.0);
        let prev = frame(6, 6, 0.7);
        let next = frame(6, 6, -0.5);
        let rn = frame(6, 6, 0.3);
        let result = reprojection_loss(
            &target,
            &ReprojectionInputs {
                prev_frame: &prev,
                next_frame: &next,
                reprojection_prev: &target,
                reprojection_next: &rn,
            },
            &LossParams::default(),
        );
        assert!(result.loss.data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn static_scene_is_masked_out() {
        // sources identical to the target: reprojection cannot do better
        let target = frame(5, 5, 0.0);
        let rp = frame(5, 5, 0.2);
        let result = reprojection_loss(
            &target,
            &ReprojectionInputs {
                prev_frame: &target,
                next_frame: &target,
                reprojection_prev: &rp,
                reprojection_next: &rp,
            },
            &LossParams::default(),
        );
        assert_eq!(result.masked_fraction(), 1.0);
        assert_eq!(result.mean(), 0.0);
    }

    #[test]
    fn backward_matches_finite_differences() {
        // The previous reprojection is close to the target, the next one and
        // both sources are inverted, so every min and mask decision is stable.
        let (w, h) = (5, 4);
        let target = frame(w, h, 0.0);
        let inverted = target.map(|v| 1.0 - v);
        let rp = ImageF32::from_fn(w, h, 3, |x, y, c| {
            let phase = (x as f32) * 2.1 + (y as f32) * 1.7 + c as f32 + 0.3;
            target.get(x, y, c) + 0.05 * phase.sin()
        });
        let params = LossParams::default();
        let probe = ImageF32::from_fn(w, h, 3, |x, y, c| 0.5 + ((x + y + c) % 3) as f32 * 0.25);
        let objective = |a: &ImageF32, b: &ImageF32| -> f64 {
            let inputs = ReprojectionInputs {
                prev_frame: &inverted,
                next_frame: &inverted,
                reprojection_prev: a,
                reprojection_next: b,
            };
            reprojection_loss(&target, &inputs, &params)
                .loss
                .data
                .iter()
                .zip(&probe.data)
                .map(|(&v, &p)| v as f64 * p as f64)
                .sum()
        };
        let inputs = ReprojectionInputs {
            prev_frame: &inverted,
            next_frame: &inverted,
            reprojection_prev: &rp,
            reprojection_next: &inverted,
        };
        let (gp, gn) = reprojection_loss_backward(&target, &inputs, &params, &probe);
        assert!(gn.data.iter().all(|&g| g == 0.0));
        let eps = 1e-3;
        for &(x, y, c) in &[(1usize, 1usize, 0usize), (3, 2, 1), (0, 3, 2), (4, 0, 1)] {
            let mut plus = rp.clone();
            let mut minus = rp.clone();
            plus.add(x, y, c, eps);
            minus.add(x, y, c, -eps);
            let numeric =
                (objective(&plus, &inverted) - objective(&minus, &inverted)) / (2.0 * eps as f64);
            let analytic = gp.get(x, y, c) as f64;
            assert!(
                (numeric - analytic).abs() < 1e-2 + 5e-2 * numeric.abs(),
                "({x},{y},{c}): numeric={numeric} analytic={analytic}"
            );
        }
    }
}
