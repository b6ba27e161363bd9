//! Multi-scale view-synthesis objective.
//!
//! One training sample is a frame triplet, disparity maps at one or more
//! scales, and the raw poses of the previous and next frames relative to the
//! current one. Per scale the disparity is upsampled to frame resolution,
//! normalized to depth, and used to warp both neighbours into the current
//! view. The scale loss is
//!
//! ```text
//! mean(reprojection_loss) + smoothness_weight · depth_smoothness(curr, depth)
//! ```
//!
//! and the objective is the mean over scales.
//! [`ViewSynthesisObjective::evaluate_with_gradients`] also returns the
//! gradients with respect to every disparity map and both poses.
use super::reprojection::{reprojection_loss, reprojection_loss_backward, ReprojectionInputs};
use super::smoothness::{depth_smoothness, depth_smoothness_backward};
use super::LossParams;
use crate::camera::CameraModel;
use crate::depth::{upsample_nearest, upsample_nearest_backward, DepthNormalizer};
use crate::error::DepthError;
use crate::image::ImageF32;
use crate::pose::PoseVector;
use crate::warp::{inverse_warp, inverse_warp_backward};
use log::debug;
use serde::Serialize;

/// Consecutive frames; `curr` is the target view.
#[derive(Clone, Debug)]
pub struct FrameTriplet {
    pub prev: ImageF32,
    pub curr: ImageF32,
    pub next: ImageF32,
}

impl FrameTriplet {
    pub fn new(prev: ImageF32, curr: ImageF32, next: ImageF32) -> Result<Self, DepthError> {
        if !prev.same_shape(&curr) || !next.same_shape(&curr) {
            return Err(DepthError::InvalidSample(format!(
                "frame shapes differ: prev {:?}, curr {:?}, next {:?}",
                prev.shape(),
                curr.shape(),
                next.shape()
            )));
        }
        check_extent(curr.w, curr.h)?;
        Ok(Self { prev, curr, next })
    }

    pub fn width(&self) -> usize {
        self.curr.w
    }

    pub fn height(&self) -> usize {
        self.curr.h
    }
}

/// SSIM pads frames by one reflected pixel, which needs two rows and columns.
fn check_extent(w: usize, h: usize) -> Result<(), DepthError> {
    if w < 2 || h < 2 {
        return Err(DepthError::InvalidSample(format!(
            "frames must be at least 2x2, got {w}x{h}"
        )));
    }
    Ok(())
}

/// Network outputs for one frame triplet.
#[derive(Clone, Debug)]
pub struct ObjectiveSample {
    pub frames: FrameTriplet,
    /// Raw `[0, 1]` disparities, finest first. Each must divide the frame
    /// extent by the same integer factor along both axes.
    pub disparities: Vec<ImageF32>,
    /// Raw pose of the previous frame relative to the current one.
    pub pose_prev: PoseVector,
    /// Raw pose of the next frame relative to the current one.
    pub pose_next: PoseVector,
}

impl ObjectiveSample {
    /// Upsampling factor of every disparity scale.
    pub fn scale_factors(&self) -> Result<Vec<usize>, DepthError> {
        if self.disparities.is_empty() {
            return Err(DepthError::InvalidSample(
                "at least one disparity scale is required".into(),
            ));
        }
        let (w, h) = (self.frames.width(), self.frames.height());
        check_extent(w, h)?;
        self.disparities
            .iter()
            .enumerate()
            .map(|(scale, disp)| {
                let fits = disp.channels == 1
                    && disp.w > 0
                    && disp.h > 0
                    && w % disp.w == 0
                    && h % disp.h == 0
                    && w / disp.w == h / disp.h
                    && w / disp.w >= 1;
                if fits {
                    Ok(w / disp.w)
                } else {
                    Err(DepthError::InvalidSample(format!(
                        "disparity scale {scale} has shape {:?}, frames are {w}x{h}",
                        disp.shape()
                    )))
                }
            })
            .collect()
    }
}

/// Scalar summary of one scale.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleReport {
    pub scale: usize,
    pub factor: usize,
    pub reprojection: f32,
    pub smoothness: f32,
    /// `reprojection + smoothness_weight · smoothness`.
    pub total: f32,
    pub masked_fraction: f32,
    pub invalid_prev: usize,
    pub invalid_next: usize,
}

/// Intermediate maps of one scale.
#[derive(Clone, Debug)]
pub struct ScaleOutput {
    pub report: ScaleReport,
    pub depth: ImageF32,
    pub reprojection_prev: ImageF32,
    pub reprojection_next: ImageF32,
    pub loss_map: ImageF32,
}

#[derive(Clone, Debug)]
pub struct ObjectiveOutput {
    /// Mean of the per-scale totals.
    pub total: f32,
    pub scales: Vec<ScaleOutput>,
}

impl ObjectiveOutput {
    pub fn reports(&self) -> Vec<ScaleReport> {
        self.scales.iter().map(|s| s.report.clone()).collect()
    }
}

/// Gradients of [`ObjectiveOutput::total`].
#[derive(Clone, Debug)]
pub struct ObjectiveGradients {
    /// One map per disparity scale, shaped like the input.
    pub disparities: Vec<ImageF32>,
    pub pose_prev: PoseVector,
    pub pose_next: PoseVector,
}

/// The self-supervised training objective for a fixed camera and depth range.
#[derive(Clone, Debug)]
pub struct ViewSynthesisObjective {
    camera: CameraModel,
    normalizer: DepthNormalizer,
    params: LossParams,
}

impl ViewSynthesisObjective {
    pub fn new(camera: CameraModel, normalizer: DepthNormalizer, params: LossParams) -> Self {
        Self {
            camera,
            normalizer,
            params,
        }
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    pub fn normalizer(&self) -> &DepthNormalizer {
        &self.normalizer
    }

    pub fn params(&self) -> &LossParams {
        &self.params
    }

    fn forward_scale(
        &self,
        sample: &ObjectiveSample,
        scale: usize,
        factor: usize,
    ) -> (ScaleOutput, ImageF32) {
        let frames = &sample.frames;
        let upsampled = upsample_nearest(&sample.disparities[scale], factor);
        let depth = self.normalizer.normalize(&upsampled);
        let warped_prev = inverse_warp(&frames.prev, &depth, &sample.pose_prev, &self.camera);
        let warped_next = inverse_warp(&frames.next, &depth, &sample.pose_next, &self.camera);

        let inputs = ReprojectionInputs {
            prev_frame: &frames.prev,
            next_frame: &frames.next,
            reprojection_prev: &warped_prev.image,
            reprojection_next: &warped_next.image,
        };
        let loss = reprojection_loss(&frames.curr, &inputs, &self.params);
        let reprojection = loss.mean();
        let smoothness = depth_smoothness(&frames.curr, &depth);
        let report = ScaleReport {
            scale,
            factor,
            reprojection,
            smoothness,
            total: reprojection + self.params.smoothness_weight * smoothness,
            masked_fraction: loss.masked_fraction(),
            invalid_prev: warped_prev.coords.invalid_count(),
            invalid_next: warped_next.coords.invalid_count(),
        };
        debug!(
            "scale {scale} (x{factor}): reprojection={:.6} smoothness={:.6} masked={:.1}%",
            report.reprojection,
            report.smoothness,
            100.0 * report.masked_fraction
        );
        let output = ScaleOutput {
            report,
            depth,
            reprojection_prev: warped_prev.image,
            reprojection_next: warped_next.image,
            loss_map: loss.loss,
        };
        (output, upsampled)
    }

    /// Evaluate the objective on one sample.
    pub fn evaluate(&self, sample: &ObjectiveSample) -> Result<ObjectiveOutput, DepthError> {
        let factors = sample.scale_factors()?;
        let scales: Vec<ScaleOutput> = factors
            .iter()
            .enumerate()
            .map(|(scale, &factor)| self.forward_scale(sample, scale, factor).0)
            .collect();
        let total = scales.iter().map(|s| s.report.total).sum::<f32>() / scales.len() as f32;
        Ok(ObjectiveOutput { total, scales })
    }

    /// Evaluate the objective and back-propagate it to the network outputs.
    pub fn evaluate_with_gradients(
        &self,
        sample: &ObjectiveSample,
    ) -> Result<(ObjectiveOutput, ObjectiveGradients), DepthError> {
        let factors = sample.scale_factors()?;
        let frames = &sample.frames;
        let scale_weight = 1.0 / factors.len() as f32;

        let mut scales = Vec::with_capacity(factors.len());
        let mut grad_disparities = Vec::with_capacity(factors.len());
        let mut pose_prev = [0.0f32; 6];
        let mut pose_next = [0.0f32; 6];
        for (scale, &factor) in factors.iter().enumerate() {
            let (output, upsampled) = self.forward_scale(sample, scale, factor);

            let loss_len = output.loss_map.len().max(1) as f32;
            let grad_map = ImageF32::filled(
                frames.curr.w,
                frames.curr.h,
                frames.curr.channels,
                scale_weight / loss_len,
            );
            let inputs = ReprojectionInputs {
                prev_frame: &frames.prev,
                next_frame: &frames.next,
                reprojection_prev: &output.reprojection_prev,
                reprojection_next: &output.reprojection_next,
            };
            let (grad_rep_prev, grad_rep_next) =
                reprojection_loss_backward(&frames.curr, &inputs, &self.params, &grad_map);
            let warp_prev = inverse_warp_backward(
                &frames.prev,
                &output.depth,
                &sample.pose_prev,
                &self.camera,
                &grad_rep_prev,
            );
            let warp_next = inverse_warp_backward(
                &frames.next,
                &output.depth,
                &sample.pose_next,
                &self.camera,
                &grad_rep_next,
            );

            let smooth_scale = scale_weight * self.params.smoothness_weight;
            let mut grad_depth = depth_smoothness_backward(&frames.curr, &output.depth)
                .map(|g| g * smooth_scale);
            grad_depth.add_assign(&warp_prev.depth);
            grad_depth.add_assign(&warp_next.depth);

            let grad_raw = self.normalizer.normalize_backward(&upsampled, &grad_depth);
            grad_disparities.push(upsample_nearest_backward(&grad_raw, factor));
            for i in 0..6 {
                pose_prev[i] += warp_prev.pose[i];
                pose_next[i] += warp_next.pose[i];
            }
            scales.push(output);
        }

        let total = scales.iter().map(|s| s.report.total).sum::<f32>() / scales.len() as f32;
        Ok((
            ObjectiveOutput { total, scales },
            ObjectiveGradients {
                disparities: grad_disparities,
                pose_prev,
                pose_next,
            },
        ))
    }
}
