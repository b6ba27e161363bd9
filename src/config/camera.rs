use crate::camera::{CameraModel, Intrinsics};
use crate::error::DepthError;
use log::warn;
use serde::{Deserialize, Serialize};

/// Field of view assumed by the serving layer when the client sends none.
pub const DEFAULT_FOV_DEG: f32 = 70.0;

/// Camera intrinsics given explicitly or derived from a field of view.
///
/// Explicit intrinsics win when both are present; with neither, the
/// default normalized camera (unit focal lengths, centred principal point)
/// is used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intrinsics: Option<Intrinsics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fov_deg: Option<f32>,
}

impl CameraConfig {
    pub fn from_fov(fov_deg: f32) -> Self {
        Self {
            intrinsics: None,
            fov_deg: Some(fov_deg),
        }
    }

    /// Build the camera for frames of `width × height` pixels.
    pub fn build(&self, width: usize, height: usize) -> Result<CameraModel, DepthError> {
        match (self.intrinsics, self.fov_deg) {
            (Some(intrinsics), fov) => {
                if let Some(fov) = fov {
                    warn!("camera config sets both intrinsics and fov_deg={fov}; using intrinsics");
                }
                CameraModel::from_intrinsics(&intrinsics)
            }
            (None, Some(fov)) => CameraModel::from_fov(fov, width, height),
            (None, None) => Ok(CameraModel::default()),
        }
    }
}
