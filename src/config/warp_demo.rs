use super::camera::CameraConfig;
use crate::depth::DepthRange;
use crate::loss::LossParams;
use crate::pose::PoseVector;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct WarpDemoConfig {
    pub frames: FramePaths,
    /// Grayscale disparity image; its resolution must divide the frames'.
    pub disparity: PathBuf,
    pub pose_prev: PoseVector,
    pub pose_next: PoseVector,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub depth: DepthRange,
    #[serde(default)]
    pub loss: LossParams,
    pub output: WarpDemoOutputConfig,
}

#[derive(Debug, Deserialize)]
pub struct FramePaths {
    pub prev: PathBuf,
    pub curr: PathBuf,
    pub next: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct WarpDemoOutputConfig {
    pub reprojection_prev: PathBuf,
    pub reprojection_next: PathBuf,
    pub depth_image: PathBuf,
    pub report_json: PathBuf,
}

pub fn load_config(path: &Path) -> Result<WarpDemoConfig, String> {
    let data = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
    serde_json::from_str(&data)
        .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_sections_fall_back_to_defaults() {
        let json = r#"{
            "frames": { "prev": "a.png", "curr": "b.png", "next": "c.png" },
            "disparity": "disp.png",
            "pose_prev": [1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            "pose_next": [-1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            "depth": { "max_depth": 10.0 },
            "output": {
                "reprojection_prev": "out/prev.png",
                "reprojection_next": "out/next.png",
                "depth_image": "out/depth.png",
                "report_json": "out/report.json"
            }
        }"#;
        let config: WarpDemoConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.depth, DepthRange::new(1.0, 10.0));
        assert_eq!(config.loss, LossParams::default());
        assert_eq!(config.camera, CameraConfig::default());
        assert_eq!(config.pose_next[0], -1.0);
    }
}
