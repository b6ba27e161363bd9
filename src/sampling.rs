//! Bilinear sampling with clamp-to-edge boundary handling.
//!
//! Sample coordinates are clamped into `[0, W−1] × [0, H−1]` before the
//! interpolation weights are computed, so any out-of-range request
//! replicates the nearest edge pixel. On an axis where clamping was active
//! the sample is constant with respect to the coordinate, and the reported
//! coordinate derivative on that axis is zero.
use crate::image::ImageF32;

/// Interpolation stencil for one sample location.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BilinearTap {
    pub x0: usize,
    pub x1: usize,
    pub y0: usize,
    pub y1: usize,
    /// Fractional offset from `x0` towards `x1`.
    pub tx: f32,
    /// Fractional offset from `y0` towards `y1`.
    pub ty: f32,
    /// `true` when the x coordinate lies strictly inside the sampling range.
    pub slope_x: bool,
    /// `true` when the y coordinate lies strictly inside the sampling range.
    pub slope_y: bool,
}

impl BilinearTap {
    /// Build the stencil for `(x, y)` in pixel units on a `w × h` grid.
    #[inline]
    pub fn clamped(x: f32, y: f32, w: usize, h: usize) -> Self {
        debug_assert!(w > 0 && h > 0, "sampling an empty image");
        let (x0, x1, tx, slope_x) = axis_stencil(x, w);
        let (y0, y1, ty, slope_y) = axis_stencil(y, h);
        Self {
            x0,
            x1,
            y0,
            y1,
            tx,
            ty,
            slope_x,
            slope_y,
        }
    }

    /// Interpolated value of channel `c`.
    #[inline]
    pub fn sample(&self, img: &ImageF32, c: usize) -> f32 {
        let [i00, i10, i01, i11] = self.corners(img, c);
        let top = i00 * (1.0 - self.tx) + i10 * self.tx;
        let bottom = i01 * (1.0 - self.tx) + i11 * self.tx;
        top * (1.0 - self.ty) + bottom * self.ty
    }

    /// Derivatives of the sample of channel `c` with respect to `(x, y)`.
    #[inline]
    pub fn coordinate_gradient(&self, img: &ImageF32, c: usize) -> (f32, f32) {
        let [i00, i10, i01, i11] = self.corners(img, c);
        let dx = if self.slope_x {
            (i10 - i00) * (1.0 - self.ty) + (i11 - i01) * self.ty
        } else {
            0.0
        };
        let dy = if self.slope_y {
            (i01 - i00) * (1.0 - self.tx) + (i11 - i10) * self.tx
        } else {
            0.0
        };
        (dx, dy)
    }

    /// Adjoint with respect to the sampled image: distribute `g` onto the
    /// four corners of channel `c`.
    #[inline]
    pub fn scatter(&self, grad: &mut ImageF32, c: usize, g: f32) {
        let (tx, ty) = (self.tx, self.ty);
        grad.add(self.x0, self.y0, c, g * (1.0 - tx) * (1.0 - ty));
        grad.add(self.x1, self.y0, c, g * tx * (1.0 - ty));
        grad.add(self.x0, self.y1, c, g * (1.0 - tx) * ty);
        grad.add(self.x1, self.y1, c, g * tx * ty);
    }

    #[inline]
    fn corners(&self, img: &ImageF32, c: usize) -> [f32; 4] {
        [
            img.get(self.x0, self.y0, c),
            img.get(self.x1, self.y0, c),
            img.get(self.x0, self.y1, c),
            img.get(self.x1, self.y1, c),
        ]
    }
}

#[inline]
fn axis_stencil(coord: f32, n: usize) -> (usize, usize, f32, bool) {
    let max = (n - 1) as f32;
    // NaN coordinates collapse onto the first sample.
    let inside = coord > 0.0 && coord < max;
    let clamped = if coord.is_nan() { 0.0 } else { coord.clamp(0.0, max) };
    let i0 = (clamped.floor() as usize).min(n - 1);
    let i1 = (i0 + 1).min(n - 1);
    (i0, i1, clamped - i0 as f32, inside)
}

/// Sample every channel of `img` at `(x, y)` into `out`.
pub fn sample_bilinear(img: &ImageF32, x: f32, y: f32, out: &mut [f32]) {
    assert_eq!(out.len(), img.channels, "output slice must hold one value per channel");
    let tap = BilinearTap::clamped(x, y, img.w, img.h);
    for (c, o) in out.iter_mut().enumerate() {
        *o = tap.sample(img, c);
    }
}
