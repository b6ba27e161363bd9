//! Self-supervised training losses.
//!
//! - [`reprojection`]: masked minimum-reprojection loss blending SSIM and L1.
//! - [`smoothness`]: edge-aware smoothness penalty on mean-normalized depth.
//! - [`objective`]: multi-scale view-synthesis objective chaining the depth
//!   normalizer, the inverse warper and both losses, with gradients.
pub mod objective;
pub mod reprojection;
pub mod smoothness;

use serde::{Deserialize, Serialize};

pub use objective::{
    FrameTriplet, ObjectiveGradients, ObjectiveOutput, ObjectiveSample, ScaleOutput, ScaleReport,
    ViewSynthesisObjective,
};
pub use reprojection::{
    mean_absolute_error, reprojection_loss, reprojection_loss_backward, ReprojectionInputs,
    ReprojectionLoss,
};
pub use smoothness::{depth_smoothness, depth_smoothness_backward};

/// Loss weighting knobs.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossParams {
    /// Weight of the SSIM term; `1 − alpha` weights the L1 term.
    pub alpha: f32,
    /// Zero the loss wherever the un-warped source frames already match
    /// the target at least as well as the reprojections.
    pub automask: bool,
    /// Weight of the smoothness penalty in the combined objective.
    pub smoothness_weight: f32,
}

impl Default for LossParams {
    fn default() -> Self {
        Self {
            alpha: 0.85,
            automask: true,
            smoothness_weight: 1e-3,
        }
    }
}
