//! Projective inverse warping of a source frame into the target view.
//!
//! Pipeline (per target pixel `(x, y)`)
//! - Normalize: `u = x / (W−1)`, `v = y / (H−1)`.
//! - Back-project: `P = depth(x, y) · K⁻¹ · [u, v, 1]ᵗ`.
//! - Transform: `Q = R·P + t` with the pose scaled by [`POSE_SCALING`].
//! - Project: `(u', v') = (K·Q)_{xy} / (K·Q)_z`; non-positive depth marks the
//!   pixel invalid and is clamped to [`MIN_PROJECTED_DEPTH`].
//! - Sample the source at `(u'·(W−1), v'·(H−1))` bilinearly with
//!   clamp-to-edge borders.
//!
//! The backward pass propagates an upstream image gradient to the source
//! image, the depth map and the raw pose vector. Rows are warped in parallel
//! when the `parallel` feature is enabled; the backward pass scatters into
//! shared buffers and runs sequentially.
use crate::camera::CameraModel;
use crate::image::ImageF32;
use crate::pose::{Pose, PoseVector, POSE_SCALING};
use crate::sampling::BilinearTap;
use log::{debug, warn};
use nalgebra::{Matrix3, Vector3};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Smallest projected depth used as a divisor.
pub const MIN_PROJECTED_DEPTH: f32 = 1e-10;

/// Source-frame sampling locations in pixel units (before clamping).
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectedCoords {
    pub w: usize,
    pub h: usize,
    pub xy: Vec<[f32; 2]>,
    /// `false` where the transformed point was on or behind the source camera.
    pub valid: Vec<bool>,
}

impl ProjectedCoords {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> [f32; 2] {
        self.xy[y * self.w + x]
    }

    #[inline]
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        self.valid[y * self.w + x]
    }

    pub fn invalid_count(&self) -> usize {
        self.valid.iter().filter(|v| !**v).count()
    }
}

/// Reprojected image plus the coordinates it was sampled at.
#[derive(Clone, Debug)]
pub struct WarpOutput {
    pub image: ImageF32,
    pub coords: ProjectedCoords,
}

/// Gradients of a scalar objective with respect to the warp inputs.
#[derive(Clone, Debug)]
pub struct WarpGradients {
    pub source: ImageF32,
    pub depth: ImageF32,
    /// Gradient with respect to the raw (unscaled) pose vector.
    pub pose: PoseVector,
}

struct PixelGeometry {
    /// `K⁻¹·[u, v, 1]ᵗ`
    ray: Vector3<f32>,
    /// Back-projected target point `P`.
    point: Vector3<f32>,
    /// `K·Q`
    projected: Vector3<f32>,
    x: f32,
    y: f32,
    valid: bool,
}

struct WarpGeometry<'a> {
    camera: &'a CameraModel,
    rotation: Matrix3<f32>,
    translation: Vector3<f32>,
    to_norm_x: f32,
    to_norm_y: f32,
    span_x: f32,
    span_y: f32,
}

impl<'a> WarpGeometry<'a> {
    fn new(camera: &'a CameraModel, pose: &Pose, w: usize, h: usize) -> Self {
        let span_x = w.saturating_sub(1) as f32;
        let span_y = h.saturating_sub(1) as f32;
        Self {
            camera,
            rotation: pose.rotation_matrix(),
            translation: pose.translation_vector(),
            to_norm_x: if span_x > 0.0 { 1.0 / span_x } else { 0.0 },
            to_norm_y: if span_y > 0.0 { 1.0 / span_y } else { 0.0 },
            span_x,
            span_y,
        }
    }

    #[inline]
    fn pixel(&self, x: usize, y: usize, depth: f32) -> PixelGeometry {
        let ray = self
            .camera
            .pixel_to_ray(x as f32 * self.to_norm_x, y as f32 * self.to_norm_y);
        let point = ray * depth;
        let transformed = self.rotation * point + self.translation;
        let image_point = self.camera.project(&transformed);
        PixelGeometry {
            ray,
            point,
            projected: self.camera.k() * transformed,
            x: image_point.u * self.span_x,
            y: image_point.v * self.span_y,
            valid: image_point.valid,
        }
    }
}

fn check_inputs(source: &ImageF32, depth: &ImageF32) {
    assert!(
        source.same_extent(depth),
        "source {}x{} and depth {}x{} must share the target resolution",
        source.w,
        source.h,
        depth.w,
        depth.h
    );
    assert_eq!(depth.channels, 1, "depth map must have a single channel");
}

/// Warp `source` into the target view described by `depth` and `raw_pose`.
///
/// `raw_pose` is the unscaled network output; [`POSE_SCALING`] is applied
/// here. The output has the shape of `source`.
pub fn inverse_warp(
    source: &ImageF32,
    depth: &ImageF32,
    raw_pose: &PoseVector,
    camera: &CameraModel,
) -> WarpOutput {
    check_inputs(source, depth);
    let (w, h, ch) = source.shape();
    let mut image = ImageF32::new(w, h, ch);
    let mut xy = vec![[0.0f32; 2]; w * h];
    let mut valid = vec![false; w * h];
    if w == 0 || h == 0 {
        return WarpOutput {
            image,
            coords: ProjectedCoords { w, h, xy, valid },
        };
    }

    let pose = Pose::from_raw(raw_pose);
    let geometry = WarpGeometry::new(camera, &pose, w, h);
    let stride = image.stride;
    let warp_row = |y: usize, row: &mut [f32], xy_row: &mut [[f32; 2]], valid_row: &mut [bool]| {
        for x in 0..w {
            let px = geometry.pixel(x, y, depth.get(x, y, 0));
            let tap = BilinearTap::clamped(px.x, px.y, w, h);
            for c in 0..ch {
                row[x * ch + c] = tap.sample(source, c);
            }
            xy_row[x] = [px.x, px.y];
            valid_row[x] = px.valid;
        }
    };

    #[cfg(feature = "parallel")]
    {
        image
            .data
            .par_chunks_mut(stride)
            .zip(xy.par_chunks_mut(w))
            .zip(valid.par_chunks_mut(w))
            .enumerate()
            .for_each(|(y, ((row, xy_row), valid_row))| warp_row(y, row, xy_row, valid_row));
    }
    #[cfg(not(feature = "parallel"))]
    {
        image
            .data
            .chunks_mut(stride)
            .zip(xy.chunks_mut(w))
            .zip(valid.chunks_mut(w))
            .enumerate()
            .for_each(|(y, ((row, xy_row), valid_row))| warp_row(y, row, xy_row, valid_row));
    }

    let coords = ProjectedCoords { w, h, xy, valid };
    let invalid = coords.invalid_count();
    if invalid == w * h {
        warn!("inverse_warp: every pixel projects behind the source camera (pose={raw_pose:?})");
    } else if invalid > 0 {
        debug!("inverse_warp: {invalid}/{} pixels behind the source camera", w * h);
    }
    WarpOutput { image, coords }
}

/// Backward pass of [`inverse_warp`].
///
/// Given `grad_output = ∂L/∂(warped image)`, returns `∂L/∂source`,
/// `∂L/∂depth` and `∂L/∂raw_pose`. Invalid pixels still pass gradient to
/// the source image but not to depth or pose.
pub fn inverse_warp_backward(
    source: &ImageF32,
    depth: &ImageF32,
    raw_pose: &PoseVector,
    camera: &CameraModel,
    grad_output: &ImageF32,
) -> WarpGradients {
    check_inputs(source, depth);
    assert!(
        grad_output.same_shape(source),
        "upstream gradient {:?} must match the warped image {:?}",
        grad_output.shape(),
        source.shape()
    );
    let (w, h, ch) = source.shape();
    let mut grad_source = ImageF32::new(w, h, ch);
    let mut grad_depth = ImageF32::new_gray(w, h);
    let mut grad_pose = [0.0f64; 6];

    let pose = Pose::from_raw(raw_pose);
    let geometry = WarpGeometry::new(camera, &pose, w, h);
    let jacobians = pose.rotation_jacobians();
    let k_t = camera.k().transpose();

    for y in 0..h {
        for x in 0..w {
            let px = geometry.pixel(x, y, depth.get(x, y, 0));
            let tap = BilinearTap::clamped(px.x, px.y, w, h);
            let (mut g_x, mut g_y) = (0.0f32, 0.0f32);
            for c in 0..ch {
                let g = grad_output.get(x, y, c);
                if g == 0.0 {
                    continue;
                }
                tap.scatter(&mut grad_source, c, g);
                let (dx, dy) = tap.coordinate_gradient(source, c);
                g_x += g * dx;
                g_y += g * dy;
            }

            let z = px.projected.z;
            if !px.valid || z <= MIN_PROJECTED_DEPTH || (g_x == 0.0 && g_y == 0.0) {
                continue;
            }
            // d/du' and d/dv' on the normalized image plane
            let g_u = g_x * geometry.span_x;
            let g_v = g_y * geometry.span_y;
            let (u, v) = (px.projected.x / z, px.projected.y / z);
            let g_q = Vector3::new(g_u / z, g_v / z, -(g_u * u + g_v * v) / z);
            let g_transformed = k_t * g_q;

            grad_depth.set(x, y, 0, g_transformed.dot(&(geometry.rotation * px.ray)));
            for i in 0..3 {
                grad_pose[i] += g_transformed[i] as f64;
            }
            for (k, jac) in jacobians.iter().enumerate() {
                grad_pose[3 + k] += g_transformed.dot(&(jac * px.point)) as f64;
            }
        }
    }

    WarpGradients {
        source: grad_source,
        depth: grad_depth,
        pose: grad_pose.map(|g| (g * POSE_SCALING as f64) as f32),
    }
}
