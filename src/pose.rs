//! Relative camera pose as predicted by the pose network.
//!
//! A pose vector is `[tx, ty, tz, rx, ry, rz]`: translation followed by
//! Euler angles in radians with `R = Rx(rx)·Ry(ry)·Rz(rz)`. It maps points
//! from the target camera frame into the source camera frame,
//! `p_src = R·p_tgt + t`. Network outputs are small by convention and are
//! multiplied by [`POSE_SCALING`] before use.
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Scale applied to raw network pose outputs.
pub const POSE_SCALING: f32 = 0.01;

/// Raw 6-DoF pose vector as emitted by the pose network.
pub type PoseVector = [f32; 6];

/// Rigid transform from the target camera frame to a source camera frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub translation: [f32; 3],
    pub rotation: [f32; 3],
}

impl Pose {
    pub fn identity() -> Self {
        Self::default()
    }

    /// Interpret an already scaled 6-vector.
    pub fn from_vector(v: &PoseVector) -> Self {
        Self {
            translation: [v[0], v[1], v[2]],
            rotation: [v[3], v[4], v[5]],
        }
    }

    /// Apply [`POSE_SCALING`] to a raw network output.
    pub fn from_raw(raw: &PoseVector) -> Self {
        let scaled = raw.map(|v| v * POSE_SCALING);
        Self::from_vector(&scaled)
    }

    pub fn to_vector(&self) -> PoseVector {
        let [tx, ty, tz] = self.translation;
        let [rx, ry, rz] = self.rotation;
        [tx, ty, tz, rx, ry, rz]
    }

    pub fn translation_vector(&self) -> Vector3<f32> {
        Vector3::from(self.translation)
    }

    pub fn rotation_matrix(&self) -> Matrix3<f32> {
        let [rx, ry, rz] = self.rotation;
        rot_x(rx) * rot_y(ry) * rot_z(rz)
    }

    /// Partial derivatives `∂R/∂rx`, `∂R/∂ry`, `∂R/∂rz`.
    pub fn rotation_jacobians(&self) -> [Matrix3<f32>; 3] {
        let [rx, ry, rz] = self.rotation;
        let (x, y, z) = (rot_x(rx), rot_y(ry), rot_z(rz));
        [
            d_rot_x(rx) * y * z,
            x * d_rot_y(ry) * z,
            x * y * d_rot_z(rz),
        ]
    }

    pub fn transform_point(&self, p: &Vector3<f32>) -> Vector3<f32> {
        self.rotation_matrix() * p + self.translation_vector()
    }
}

fn rot_x(a: f32) -> Matrix3<f32> {
    let (s, c) = a.sin_cos();
    Matrix3::new(1.0, 0.0, 0.0, 0.0, c, -s, 0.0, s, c)
}

fn rot_y(a: f32) -> Matrix3<f32> {
    let (s, c) = a.sin_cos();
    Matrix3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c)
}

fn rot_z(a: f32) -> Matrix3<f32> {
    let (s, c) = a.sin_cos();
    Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
}

fn d_rot_x(a: f32) -> Matrix3<f32> {
    let (s, c) = a.sin_cos();
    Matrix3::new(0.0, 0.0, 0.0, 0.0, -s, -c, 0.0, c, -s)
}

fn d_rot_y(a: f32) -> Matrix3<f32> {
    let (s, c) = a.sin_cos();
    Matrix3::new(-s, 0.0, c, 0.0, 0.0, 0.0, -c, 0.0, -s)
}

fn d_rot_z(a: f32) -> Matrix3<f32> {
    let (s, c) = a.sin_cos();
    Matrix3::new(-s, -c, 0.0, c, -s, 0.0, 0.0, 0.0, 0.0)
}
