//! JSON configuration for tools built on the crate.
pub mod camera;
pub mod warp_demo;

pub use camera::{CameraConfig, DEFAULT_FOV_DEG};
pub use warp_demo::{load_config, WarpDemoConfig};
