//! I/O helpers for frames, disparity maps and JSON.
//!
//! - `load_rgb_image`: read a PNG/JPEG/etc. into a three-channel `ImageF32` in `[0, 1]`.
//! - `load_gray_image`: read an image as a single-channel map in `[0, 1]`
//!   (used for network disparity dumps).
//! - `save_image_f32`: write a one- or three-channel `ImageF32` to disk, clamping to `[0, 1]`.
//! - `save_depth_image`: write a depth map scaled by a maximum depth.
//! - `write_json_file` / `read_json_file`: pretty JSON with parent-dir creation.
use super::{ImageF32, ImageU8, ImageView};
use crate::error::DepthError;
use image::{GrayImage, Luma, Rgb, RgbImage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Load an image from disk as RGB with values in `[0, 1]`.
pub fn load_rgb_image(path: &Path) -> Result<ImageF32, DepthError> {
    let img = image::open(path)
        .map_err(|source| DepthError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .into_rgb8();
    let (w, h) = (img.width() as usize, img.height() as usize);
    let data = img.into_raw();
    let view = ImageU8 {
        w,
        h,
        channels: 3,
        stride: w * 3,
        data: &data,
    };
    Ok(view.to_f32())
}

/// Load an image from disk as a single-channel map with values in `[0, 1]`.
pub fn load_gray_image(path: &Path) -> Result<ImageF32, DepthError> {
    let img = image::open(path)
        .map_err(|source| DepthError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .into_luma8();
    let (w, h) = (img.width() as usize, img.height() as usize);
    let data = img.into_raw();
    let view = ImageU8 {
        w,
        h,
        channels: 1,
        stride: w,
        data: &data,
    };
    Ok(view.to_f32())
}

/// Save a float image, clamping values in [0, 1] to [0, 255].
pub fn save_image_f32(image: &ImageF32, path: &Path) -> Result<(), DepthError> {
    ensure_parent_dir(path)?;
    let to_u8 = |v: f32| (v * 255.0).clamp(0.0, 255.0) as u8;
    let result = match image.channels {
        1 => {
            let mut out = GrayImage::new(image.w as u32, image.h as u32);
            for (y, row) in image.rows().enumerate() {
                for (x, &px) in row.iter().enumerate() {
                    out.put_pixel(x as u32, y as u32, Luma([to_u8(px)]));
                }
            }
            out.save(path)
        }
        3 => {
            let mut out = RgbImage::new(image.w as u32, image.h as u32);
            for (y, row) in image.rows().enumerate() {
                for (x, px) in row.chunks_exact(3).enumerate() {
                    out.put_pixel(
                        x as u32,
                        y as u32,
                        Rgb([to_u8(px[0]), to_u8(px[1]), to_u8(px[2])]),
                    );
                }
            }
            out.save(path)
        }
        other => return Err(DepthError::UnsupportedChannels(other)),
    };
    result.map_err(|source| DepthError::Image {
        path: path.to_path_buf(),
        source,
    })
}

/// Save a depth map as grayscale, mapping `[0, max_depth]` to `[0, 255]`.
pub fn save_depth_image(depth: &ImageF32, max_depth: f32, path: &Path) -> Result<(), DepthError> {
    let scale = if max_depth > 0.0 { 1.0 / max_depth } else { 1.0 };
    save_image_f32(&depth.map(|d| d * scale), path)
}

/// Serialize a value as pretty JSON to `path`, creating parent directories.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<(), DepthError> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(value).map_err(|source| DepthError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| DepthError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and deserialize a JSON document.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, DepthError> {
    let data = fs::read_to_string(path).map_err(|source| DepthError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| DepthError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn ensure_parent_dir(path: &Path) -> Result<(), DepthError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| DepthError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}
