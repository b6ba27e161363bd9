#![doc = include_str!("../README.md")]

// Geometry and sampling primitives
pub mod camera;
pub mod padding;
pub mod pose;
pub mod sampling;
pub mod warp;

// Losses and depth handling
pub mod depth;
pub mod loss;
pub mod ssim;

// Plumbing
pub mod batch;
pub mod config;
pub mod error;
pub mod image;
pub mod registry;

// --- High-level re-exports -------------------------------------------------

pub use crate::camera::{CameraModel, Intrinsics};
pub use crate::depth::{DepthNormalizer, DepthRange};
pub use crate::error::DepthError;
pub use crate::loss::{LossParams, ObjectiveSample, ViewSynthesisObjective};
pub use crate::pose::{Pose, PoseVector, POSE_SCALING};
pub use crate::warp::{inverse_warp, inverse_warp_backward, WarpOutput};

// --- Prelude ---------------------------------------------------------------

/// Small prelude for quick experiments.
///
/// ```no_run
/// use food_depth::prelude::*;
///
/// # fn main() -> Result<(), DepthError> {
/// let (w, h) = (64usize, 48usize);
/// let source = ImageF32::filled(w, h, 3, 0.5);
/// let depth = ImageF32::filled(w, h, 1, 2.0);
///
/// let camera = CameraModel::from_fov(70.0, w, h)?;
/// let warped = inverse_warp(&source, &depth, &[10.0, 0.0, 0.0, 0.0, 0.0, 0.0], &camera);
/// let ssim = ssim_dissimilarity(&source, &warped.image);
/// println!("mean dissimilarity={:.4}", ssim.mean());
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    pub use crate::image::ImageF32;
    pub use crate::loss::{reprojection_loss, ReprojectionInputs};
    pub use crate::ssim::ssim_dissimilarity;
    pub use crate::{
        inverse_warp, CameraModel, DepthError, DepthNormalizer, DepthRange, LossParams,
        ViewSynthesisObjective,
    };
}
