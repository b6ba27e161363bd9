use super::{ImageF32, ImageView, ImageViewMut};

/// Borrowed 8-bit interleaved image, e.g. a decoded RGB frame.
#[derive(Clone, Debug)]
pub struct ImageU8<'a> {
    pub w: usize,
    pub h: usize,
    pub channels: usize,
    pub stride: usize, // bytes between rows
    pub data: &'a [u8],
}

impl<'a> ImageU8<'a> {
    /// Convert to an owned float image with values in `[0, 1]`.
    pub fn to_f32(&self) -> ImageF32 {
        let mut out = ImageF32::new(self.w, self.h, self.channels);
        for y in 0..self.h {
            let src = self.row(y);
            let dst = out.row_mut(y);
            for (d, &s) in dst.iter_mut().zip(src) {
                *d = s as f32 / 255.0;
            }
        }
        out
    }
}

impl<'a> ImageView for ImageU8<'a> {
    type Pixel = u8;

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
    fn row(&self, y: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + self.w * self.channels]
    }
    #[inline]
    fn as_slice(&self) -> Option<&[u8]> {
        (self.stride == self.w * self.channels)
            .then_some(&self.data[..self.w * self.h * self.channels])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_scales_to_unit_range() {
        let bytes = [0u8, 255, 51, 102, 0, 255];
        let view = ImageU8 {
            w: 2,
            h: 1,
            channels: 3,
            stride: 6,
            data: &bytes,
        };
        let img = view.to_f32();
        assert_eq!(img.get(0, 0, 1), 1.0);
        assert!((img.get(0, 0, 2) - 0.2).abs() < 1e-6);
        assert!((img.get(1, 0, 0) - 0.4).abs() < 1e-6);
    }
}
