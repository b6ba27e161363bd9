//! Crate-wide error type.
//!
//! Only construction-time and I/O failures are reported through
//! [`DepthError`]. Numeric kernels treat shape mismatches as caller contract
//! violations and panic with a descriptive message instead.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DepthError {
    #[error("intrinsics matrix is singular (det = {det:e})")]
    SingularIntrinsics { det: f64 },
    #[error("intrinsics matrix contains non-finite entries")]
    NonFiniteIntrinsics,
    #[error("field of view must lie in (0, 180) degrees, got {0}")]
    InvalidFieldOfView(f32),
    #[error("invalid depth range: min_depth={min_depth}, max_depth={max_depth}")]
    InvalidDepthRange { min_depth: f32, max_depth: f32 },
    #[error("reflection padding ({pad_h}, {pad_w}) too large for a {height}x{width} image")]
    InvalidPadding {
        pad_h: usize,
        pad_w: usize,
        height: usize,
        width: usize,
    },
    #[error("unknown operation identifier `{0}`")]
    UnknownOperation(String),
    #[error("invalid config for `{op}`: {reason}")]
    InvalidOpConfig { op: String, reason: String },
    #[error("operation `{op}` expects {expected}, got {got}")]
    InvalidOpInputs {
        op: &'static str,
        expected: &'static str,
        got: String,
    },
    #[error("duplicate layer name `{0}`")]
    DuplicateLayer(String),
    #[error("layer `{layer}` references unknown inbound layer `{inbound}`")]
    UnknownInbound { layer: String, inbound: String },
    #[error("weights reference unknown layer `{0}`")]
    UnboundWeights(String),
    #[error("weight tensor for `{layer}` has shape {shape:?} but {values} values")]
    WeightShape {
        layer: String,
        shape: Vec<usize>,
        values: usize,
    },
    #[error("invalid objective sample: {0}")]
    InvalidSample(String),
    #[error("unsupported channel count {0} (expected 1 or 3)")]
    UnsupportedChannels(usize),
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image codec failure on {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("JSON failure on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
