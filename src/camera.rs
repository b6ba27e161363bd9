//! Pinhole camera model in normalized image coordinates.
//!
//! Pixel column `x ∈ [0, W−1]` maps to `u = x / (W−1)` and row `y` to
//! `v = y / (H−1)`, so a single intrinsics matrix `K` serves every
//! resolution of a multi-scale network. `K` is fixed for the lifetime of a
//! loaded model and its inverse is computed once at construction.
//!
//! The model is immutable after construction and therefore `Send + Sync`;
//! any external execution context sharing it must be synchronized by the
//! caller.
use crate::error::DepthError;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Determinant magnitude below which `K` is rejected as singular.
const SINGULAR_DET: f64 = 1e-12;

/// Focal lengths and principal point in normalized image coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Default for Intrinsics {
    /// Unit focal lengths with the principal point at the image centre.
    fn default() -> Self {
        Self {
            fx: 1.0,
            fy: 1.0,
            cx: 0.5,
            cy: 0.5,
        }
    }
}

impl Intrinsics {
    pub fn k_matrix(&self) -> Matrix3<f32> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }
}

/// Projection of a camera-frame point onto the normalized image plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImagePoint {
    pub u: f32,
    pub v: f32,
    /// `false` when the point lies on or behind the camera plane.
    pub valid: bool,
}

/// Intrinsics matrix together with its cached inverse.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraModel {
    k: Matrix3<f32>,
    k_inv: Matrix3<f32>,
}

impl Default for CameraModel {
    fn default() -> Self {
        let intrinsics = Intrinsics::default();
        let k = intrinsics.k_matrix();
        // Closed-form inverse of an upper-triangular pinhole matrix.
        let k_inv = Matrix3::new(
            1.0 / intrinsics.fx,
            0.0,
            -intrinsics.cx / intrinsics.fx,
            0.0,
            1.0 / intrinsics.fy,
            -intrinsics.cy / intrinsics.fy,
            0.0,
            0.0,
            1.0,
        );
        Self { k, k_inv }
    }
}

impl CameraModel {
    /// Build from an arbitrary 3×3 intrinsics matrix.
    pub fn new(k: Matrix3<f32>) -> Result<Self, DepthError> {
        if k.iter().any(|v| !v.is_finite()) {
            return Err(DepthError::NonFiniteIntrinsics);
        }
        let k64 = k.cast::<f64>();
        let det = k64.determinant();
        if det.abs() < SINGULAR_DET {
            return Err(DepthError::SingularIntrinsics { det });
        }
        let k_inv = k64
            .try_inverse()
            .ok_or(DepthError::SingularIntrinsics { det })?
            .cast::<f32>();
        Ok(Self { k, k_inv })
    }

    pub fn from_intrinsics(intrinsics: &Intrinsics) -> Result<Self, DepthError> {
        Self::new(intrinsics.k_matrix())
    }

    /// Build normalized intrinsics from a horizontal field of view.
    ///
    /// `fx = 0.5 / tan(fov / 2)`; `fy` is rescaled by `(W−1)/(H−1)` so that
    /// pixels stay square in the normalized convention.
    pub fn from_fov(fov_deg: f32, width: usize, height: usize) -> Result<Self, DepthError> {
        if !(fov_deg > 0.0 && fov_deg < 180.0) {
            return Err(DepthError::InvalidFieldOfView(fov_deg));
        }
        let fx = 0.5 / (0.5 * fov_deg.to_radians()).tan();
        let span_x = width.saturating_sub(1).max(1) as f32;
        let span_y = height.saturating_sub(1).max(1) as f32;
        let fy = fx * span_x / span_y;
        Self::from_intrinsics(&Intrinsics {
            fx,
            fy,
            cx: 0.5,
            cy: 0.5,
        })
    }

    #[inline]
    pub fn k(&self) -> &Matrix3<f32> {
        &self.k
    }

    #[inline]
    pub fn k_inv(&self) -> &Matrix3<f32> {
        &self.k_inv
    }

    /// Unit-depth ray `K⁻¹·[u, v, 1]ᵗ` through a normalized image point.
    #[inline]
    pub fn pixel_to_ray(&self, u: f32, v: f32) -> Vector3<f32> {
        self.k_inv * Vector3::new(u, v, 1.0)
    }

    /// Project a camera-frame point with `K·p / z`.
    ///
    /// Points with `z ≤ 0` are flagged invalid and divided by a tiny positive
    /// depth instead, so the result stays finite.
    #[inline]
    pub fn project(&self, point: &Vector3<f32>) -> ImagePoint {
        let q = self.k * point;
        let valid = q.z > 0.0;
        let z = q.z.max(crate::warp::MIN_PROJECTED_DEPTH);
        ImagePoint {
            u: q.x / z,
            v: q.y / z,
            valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singular_matrix_is_rejected() {
        let k = Matrix3::new(1.0, 0.0, 0.5, 2.0, 0.0, 1.0, 0.0, 0.0, 1.0);
        match CameraModel::new(k) {
            Err(DepthError::SingularIntrinsics { .. }) => {}
            other => panic!("expected singular error, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_matrix_is_rejected() {
        let mut k = Intrinsics::default().k_matrix();
        k[(0, 0)] = f32::NAN;
        assert!(matches!(
            CameraModel::new(k),
            Err(DepthError::NonFiniteIntrinsics)
        ));
    }

    #[test]
    fn default_inverse_matches_general_inverse() {
        let closed = CameraModel::default();
        let general = CameraModel::from_intrinsics(&Intrinsics::default()).unwrap();
        assert!((closed.k_inv() - general.k_inv()).abs().max() < 1e-6);
        assert!((closed.k() * closed.k_inv() - Matrix3::identity()).abs().max() < 1e-6);
    }

    #[test]
    fn ray_projects_back_to_pixel() {
        let cam = CameraModel::from_intrinsics(&Intrinsics {
            fx: 0.8,
            fy: 1.1,
            cx: 0.45,
            cy: 0.55,
        })
        .unwrap();
        let ray = cam.pixel_to_ray(0.2, 0.9);
        let p = cam.project(&(ray * 3.5));
        assert!(p.valid);
        assert!((p.u - 0.2).abs() < 1e-5);
        assert!((p.v - 0.9).abs() < 1e-5);
    }

    #[test]
    fn points_behind_camera_are_invalid() {
        let cam = CameraModel::default();
        let p = cam.project(&Vector3::new(0.1, 0.1, -1.0));
        assert!(!p.valid);
        assert!(p.u.is_finite() && p.v.is_finite());
    }

    #[test]
    fn fov_intrinsics_keep_square_pixels() {
        let cam = CameraModel::from_fov(90.0, 101, 51).unwrap();
        let k = cam.k();
        assert!((k[(0, 0)] - 0.5).abs() < 1e-6);
        assert!((k[(1, 1)] - 1.0).abs() < 1e-6);
        assert!(CameraModel::from_fov(180.0, 10, 10).is_err());
    }
}
