//! Owned f32 image with interleaved channels in row-major layout.
//!
//! A pixel `(x, y)` occupies `channels` consecutive elements starting at
//! `y * stride + x * channels`; `stride == w * channels`. Depth and
//! disparity maps are single-channel images, frames are three-channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageF32 {
    /// Image width in pixels
    pub w: usize,
    /// Image height in pixels
    pub h: usize,
    /// Interleaved channels per pixel
    pub channels: usize,
    /// Number of f32 elements between consecutive rows (equals `w * channels`)
    pub stride: usize,
    /// Backing storage in row-major order
    pub data: Vec<f32>,
}

impl ImageF32 {
    /// Construct a zero-initialized buffer of size `w × h × channels`.
    pub fn new(w: usize, h: usize, channels: usize) -> Self {
        Self::filled(w, h, channels, 0.0)
    }

    /// Single-channel zero buffer.
    pub fn new_gray(w: usize, h: usize) -> Self {
        Self::new(w, h, 1)
    }

    /// Buffer with every element set to `value`.
    pub fn filled(w: usize, h: usize, channels: usize, value: f32) -> Self {
        Self {
            w,
            h,
            channels,
            stride: w * channels,
            data: vec![value; w * h * channels],
        }
    }

    /// Wrap an existing interleaved buffer.
    pub fn from_vec(w: usize, h: usize, channels: usize, data: Vec<f32>) -> Self {
        assert_eq!(
            data.len(),
            w * h * channels,
            "buffer length does not match {w}x{h}x{channels}"
        );
        Self {
            w,
            h,
            channels,
            stride: w * channels,
            data,
        }
    }

    /// Build an image by evaluating `f(x, y, c)` for every element.
    pub fn from_fn(
        w: usize,
        h: usize,
        channels: usize,
        mut f: impl FnMut(usize, usize, usize) -> f32,
    ) -> Self {
        let mut data = Vec::with_capacity(w * h * channels);
        for y in 0..h {
            for x in 0..w {
                for c in 0..channels {
                    data.push(f(x, y, c));
                }
            }
        }
        Self::from_vec(w, h, channels, data)
    }

    #[inline]
    /// Convert (x, y, c) to a linear index into `data`.
    pub fn idx(&self, x: usize, y: usize, c: usize) -> usize {
        y * self.stride + x * self.channels + c
    }
    #[inline]
    pub fn get(&self, x: usize, y: usize, c: usize) -> f32 {
        self.data[self.idx(x, y, c)]
    }
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, c: usize, v: f32) {
        let i = self.idx(x, y, c);
        self.data[i] = v;
    }
    #[inline]
    pub fn add(&mut self, x: usize, y: usize, c: usize, v: f32) {
        let i = self.idx(x, y, c);
        self.data[i] += v;
    }
    /// All channels of pixel (x, y).
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
        let start = self.idx(x, y, 0);
        &self.data[start..start + self.channels]
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.w, self.h, self.channels)
    }

    pub fn same_shape(&self, other: &ImageF32) -> bool {
        self.shape() == other.shape()
    }

    pub fn same_extent(&self, other: &ImageF32) -> bool {
        self.w == other.w && self.h == other.h
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Mean over every element; zero for an empty image.
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }

    pub fn max_value(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn min_value(&self) -> f32 {
        self.data.iter().copied().fold(f32::INFINITY, f32::min)
    }

    /// Element-wise map into a new image of the same shape.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> ImageF32 {
        ImageF32 {
            data: self.data.iter().map(|&v| f(v)).collect(),
            ..self.clone_shape()
        }
    }

    /// Element-wise combination of two equally shaped images.
    pub fn zip_map(&self, other: &ImageF32, f: impl Fn(f32, f32) -> f32) -> ImageF32 {
        assert!(
            self.same_shape(other),
            "shape mismatch: {:?} vs {:?}",
            self.shape(),
            other.shape()
        );
        ImageF32 {
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect(),
            ..self.clone_shape()
        }
    }

    /// Accumulate `other` into `self` element-wise.
    pub fn add_assign(&mut self, other: &ImageF32) {
        assert!(
            self.same_shape(other),
            "shape mismatch: {:?} vs {:?}",
            self.shape(),
            other.shape()
        );
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
    }

    fn clone_shape(&self) -> ImageF32 {
        ImageF32 {
            w: self.w,
            h: self.h,
            channels: self.channels,
            stride: self.stride,
            data: Vec::new(),
        }
    }
}

impl crate::image::traits::ImageView for ImageF32 {
    type Pixel = f32;

    #[inline]
    fn width(&self) -> usize {
        self.w
    }
    #[inline]
    fn height(&self) -> usize {
        self.h
    }
    #[inline]
    fn channels(&self) -> usize {
        self.channels
    }
    #[inline]
    fn stride(&self) -> usize {
        self.stride
    }
    #[inline]
    fn row(&self, y: usize) -> &[f32] {
        let start = y * self.stride;
        &self.data[start..start + self.w * self.channels]
    }
    #[inline]
    fn as_slice(&self) -> Option<&[f32]> {
        Some(&self.data[..])
    }
}

impl crate::image::traits::ImageViewMut for ImageF32 {
    #[inline]
    fn row_mut(&mut self, y: usize) -> &mut [f32] {
        let start = y * self.stride;
        let end = start + self.w * self.channels;
        &mut self.data[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_indexing_matches_layout() {
        let img = ImageF32::from_fn(3, 2, 3, |x, y, c| (100 * y + 10 * x + c) as f32);
        assert_eq!(img.stride, 9);
        assert_eq!(img.get(2, 1, 1), 121.0);
        assert_eq!(img.pixel(1, 0), &[10.0, 11.0, 12.0]);
    }

    #[test]
    fn mean_of_empty_image_is_zero() {
        assert_eq!(ImageF32::new(0, 0, 1).mean(), 0.0);
    }
}
