//! Custom operations and persisted model graphs.
//!
//! A model is stored as two JSON documents: a structural description that
//! lists layers by stable class identifier plus their config, and a weight
//! file mapping layer names to flat tensors. [`OpRegistry`] maps identifiers
//! to factories so a description can be rebuilt into a [`ModelGraph`];
//! weights are bound afterwards by layer name.
//!
//! Built-in identifiers:
//! - `ProjectionLayer`: inverse warp of `[source, depth, pose]`.
//! - `ReflectionPadding2D`: reflect padding of `[image]`.
//! - `InverseDepthNormalization`: raw disparity to depth of `[raw]`.
use crate::camera::{CameraModel, Intrinsics};
use crate::depth::{DepthNormalizer, DepthRange};
use crate::error::DepthError;
use crate::image::io::{read_json_file, write_json_file};
use crate::image::ImageF32;
use crate::padding::reflect_pad;
use crate::pose::PoseVector;
use crate::warp::inverse_warp;
use log::debug;
use nalgebra::Matrix3;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

pub const PROJECTION_LAYER: &str = "ProjectionLayer";
pub const REFLECTION_PADDING_2D: &str = "ReflectionPadding2D";
pub const INVERSE_DEPTH_NORMALIZATION: &str = "InverseDepthNormalization";

/// A value flowing between graph layers.
#[derive(Clone, Debug, PartialEq)]
pub enum OpValue {
    Image(ImageF32),
    Pose(PoseVector),
}

impl OpValue {
    fn kind(&self) -> String {
        match self {
            OpValue::Image(img) => format!("image{:?}", img.shape()),
            OpValue::Pose(_) => "pose".to_string(),
        }
    }
}

fn describe(inputs: &[&OpValue]) -> String {
    let kinds: Vec<String> = inputs.iter().map(|v| v.kind()).collect();
    format!("[{}]", kinds.join(", "))
}

/// A serializable layer with no trainable state of its own.
pub trait CustomOp: fmt::Debug + Send + Sync {
    /// Stable class identifier written to the model description.
    fn identifier(&self) -> &'static str;
    /// Config that rebuilds an identical op through the registry.
    fn config(&self) -> Value;
    fn forward(&self, inputs: &[&OpValue]) -> Result<ImageF32, DepthError>;
}

fn parse_config<T: DeserializeOwned>(op: &str, config: &Value) -> Result<T, DepthError> {
    // an absent config means "all defaults"
    let config = if config.is_null() {
        Value::Object(Default::default())
    } else {
        config.clone()
    };
    serde_json::from_value(config).map_err(|e| DepthError::InvalidOpConfig {
        op: op.to_string(),
        reason: e.to_string(),
    })
}

fn to_value<T: Serialize>(config: &T) -> Value {
    // plain structs of numbers always serialize
    serde_json::to_value(config).unwrap_or(Value::Null)
}

/// Full 3×3 intrinsics, row-major, so skewed cameras persist unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub intrinsics_mat: [[f32; 3]; 3],
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self::from_matrix(&Intrinsics::default().k_matrix())
    }
}

impl ProjectionConfig {
    pub fn from_matrix(k: &Matrix3<f32>) -> Self {
        Self {
            intrinsics_mat: std::array::from_fn(|r| std::array::from_fn(|c| k[(r, c)])),
        }
    }

    fn matrix(&self) -> Matrix3<f32> {
        Matrix3::from_fn(|r, c| self.intrinsics_mat[r][c])
    }
}

/// Inverse warping as a graph layer.
#[derive(Clone, Debug)]
pub struct ProjectionOp {
    config: ProjectionConfig,
    camera: CameraModel,
}

impl ProjectionOp {
    pub fn new(config: ProjectionConfig) -> Result<Self, DepthError> {
        let camera = CameraModel::new(config.matrix())?;
        Ok(Self { config, camera })
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }
}

impl CustomOp for ProjectionOp {
    fn identifier(&self) -> &'static str {
        PROJECTION_LAYER
    }

    fn config(&self) -> Value {
        to_value(&self.config)
    }

    fn forward(&self, inputs: &[&OpValue]) -> Result<ImageF32, DepthError> {
        match inputs {
            [OpValue::Image(source), OpValue::Image(depth), OpValue::Pose(pose)]
                if depth.channels == 1 && source.same_extent(depth) =>
            {
                Ok(inverse_warp(source, depth, pose, &self.camera).image)
            }
            _ => Err(DepthError::InvalidOpInputs {
                op: PROJECTION_LAYER,
                expected: "[source image, single-channel depth of the same extent, pose]",
                got: describe(inputs),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionPaddingConfig {
    /// `(rows, columns)` added on each side.
    pub padding: (usize, usize),
}

impl Default for ReflectionPaddingConfig {
    fn default() -> Self {
        Self { padding: (1, 1) }
    }
}

#[derive(Clone, Debug)]
pub struct ReflectionPaddingOp {
    config: ReflectionPaddingConfig,
}

impl ReflectionPaddingOp {
    pub fn new(config: ReflectionPaddingConfig) -> Self {
        Self { config }
    }
}

impl CustomOp for ReflectionPaddingOp {
    fn identifier(&self) -> &'static str {
        REFLECTION_PADDING_2D
    }

    fn config(&self) -> Value {
        to_value(&self.config)
    }

    fn forward(&self, inputs: &[&OpValue]) -> Result<ImageF32, DepthError> {
        let [OpValue::Image(image)] = inputs else {
            return Err(DepthError::InvalidOpInputs {
                op: REFLECTION_PADDING_2D,
                expected: "[image]",
                got: describe(inputs),
            });
        };
        let (pad_h, pad_w) = self.config.padding;
        let fits = (pad_h == 0 || pad_h < image.h) && (pad_w == 0 || pad_w < image.w);
        if !fits {
            return Err(DepthError::InvalidPadding {
                pad_h,
                pad_w,
                height: image.h,
                width: image.w,
            });
        }
        Ok(reflect_pad(image, pad_h, pad_w))
    }
}

#[derive(Clone, Debug)]
pub struct InverseDepthNormalizationOp {
    normalizer: DepthNormalizer,
}

impl InverseDepthNormalizationOp {
    pub fn new(range: DepthRange) -> Result<Self, DepthError> {
        Ok(Self {
            normalizer: DepthNormalizer::new(range)?,
        })
    }
}

impl CustomOp for InverseDepthNormalizationOp {
    fn identifier(&self) -> &'static str {
        INVERSE_DEPTH_NORMALIZATION
    }

    fn config(&self) -> Value {
        to_value(&self.normalizer.range())
    }

    fn forward(&self, inputs: &[&OpValue]) -> Result<ImageF32, DepthError> {
        match inputs {
            [OpValue::Image(raw)] => Ok(self.normalizer.normalize(raw)),
            _ => Err(DepthError::InvalidOpInputs {
                op: INVERSE_DEPTH_NORMALIZATION,
                expected: "[raw disparity image]",
                got: describe(inputs),
            }),
        }
    }
}

pub type OpFactory = fn(&Value) -> Result<Box<dyn CustomOp>, DepthError>;

fn build_projection(config: &Value) -> Result<Box<dyn CustomOp>, DepthError> {
    let config: ProjectionConfig = parse_config(PROJECTION_LAYER, config)?;
    Ok(Box::new(ProjectionOp::new(config)?))
}

fn build_reflection_padding(config: &Value) -> Result<Box<dyn CustomOp>, DepthError> {
    let config: ReflectionPaddingConfig = parse_config(REFLECTION_PADDING_2D, config)?;
    Ok(Box::new(ReflectionPaddingOp::new(config)))
}

fn build_inverse_depth_normalization(config: &Value) -> Result<Box<dyn CustomOp>, DepthError> {
    let range: DepthRange = parse_config(INVERSE_DEPTH_NORMALIZATION, config)?;
    Ok(Box::new(InverseDepthNormalizationOp::new(range)?))
}

/// Identifier → factory table.
#[derive(Clone)]
pub struct OpRegistry {
    factories: BTreeMap<String, OpFactory>,
}

impl fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpRegistry")
            .field("identifiers", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for OpRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(PROJECTION_LAYER, build_projection);
        registry.register(REFLECTION_PADDING_2D, build_reflection_padding);
        registry.register(INVERSE_DEPTH_NORMALIZATION, build_inverse_depth_normalization);
        registry
    }
}

impl OpRegistry {
    /// A registry without the built-in operations.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register or replace the factory for `identifier`.
    pub fn register(&mut self, identifier: &str, factory: OpFactory) {
        self.factories.insert(identifier.to_string(), factory);
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.factories.contains_key(identifier)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(&self, identifier: &str, config: &Value) -> Result<Box<dyn CustomOp>, DepthError> {
        let factory = self
            .factories
            .get(identifier)
            .ok_or_else(|| DepthError::UnknownOperation(identifier.to_string()))?;
        factory(config)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerDescription {
    pub name: String,
    pub class_name: String,
    #[serde(default)]
    pub config: Value,
    /// Graph inputs or earlier layers, in argument order.
    #[serde(default)]
    pub inbound: Vec<String>,
}

/// Structural description of a model, without weights.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    pub layers: Vec<LayerDescription>,
    /// Layer whose output is the model output; defaults to the last layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ModelDescription {
    pub fn load(path: &Path) -> Result<Self, DepthError> {
        read_json_file(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), DepthError> {
        write_json_file(path, self)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl WeightTensor {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self { shape, values }
    }

    fn check(&self, layer: &str) -> Result<(), DepthError> {
        if self.shape.iter().product::<usize>() != self.values.len() {
            return Err(DepthError::WeightShape {
                layer: layer.to_string(),
                shape: self.shape.clone(),
                values: self.values.len(),
            });
        }
        Ok(())
    }
}

/// Layer name → tensor, stored separately from the description.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightSet {
    pub tensors: BTreeMap<String, WeightTensor>,
}

impl WeightSet {
    pub fn insert(&mut self, layer: &str, tensor: WeightTensor) {
        self.tensors.insert(layer.to_string(), tensor);
    }

    pub fn get(&self, layer: &str) -> Option<&WeightTensor> {
        self.tensors.get(layer)
    }

    pub fn load(path: &Path) -> Result<Self, DepthError> {
        read_json_file(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), DepthError> {
        write_json_file(path, self)
    }
}

#[derive(Debug)]
struct GraphLayer {
    name: String,
    inbound: Vec<String>,
    op: Box<dyn CustomOp>,
}

/// A model rebuilt from its description, with optional bound weights.
#[derive(Debug)]
pub struct ModelGraph {
    name: String,
    inputs: Vec<String>,
    layers: Vec<GraphLayer>,
    output: Option<String>,
    weights: WeightSet,
}

impl ModelGraph {
    pub fn from_description(
        description: &ModelDescription,
        registry: &OpRegistry,
    ) -> Result<Self, DepthError> {
        let mut known: HashSet<&str> = HashSet::new();
        for input in &description.inputs {
            if !known.insert(input.as_str()) {
                return Err(DepthError::DuplicateLayer(input.clone()));
            }
        }
        let mut layers = Vec::with_capacity(description.layers.len());
        for layer in &description.layers {
            if known.contains(layer.name.as_str()) {
                return Err(DepthError::DuplicateLayer(layer.name.clone()));
            }
            if let Some(missing) = layer.inbound.iter().find(|i| !known.contains(i.as_str())) {
                return Err(DepthError::UnknownInbound {
                    layer: layer.name.clone(),
                    inbound: missing.clone(),
                });
            }
            let op = registry.build(&layer.class_name, &layer.config)?;
            known.insert(layer.name.as_str());
            layers.push(GraphLayer {
                name: layer.name.clone(),
                inbound: layer.inbound.clone(),
                op,
            });
        }
        if let Some(output) = &description.output {
            if !layers.iter().any(|l| &l.name == output) {
                return Err(DepthError::UnknownInbound {
                    layer: "<output>".to_string(),
                    inbound: output.clone(),
                });
            }
        }
        debug!(
            "ModelGraph `{}`: rebuilt {} layers from {} inputs",
            description.name,
            layers.len(),
            description.inputs.len()
        );
        Ok(Self {
            name: description.name.clone(),
            inputs: description.inputs.clone(),
            layers,
            output: description.output.clone(),
            weights: WeightSet::default(),
        })
    }

    /// Describe the graph; round-trips through [`Self::from_description`].
    pub fn to_description(&self) -> ModelDescription {
        ModelDescription {
            name: self.name.clone(),
            inputs: self.inputs.clone(),
            layers: self
                .layers
                .iter()
                .map(|l| LayerDescription {
                    name: l.name.clone(),
                    class_name: l.op.identifier().to_string(),
                    config: l.op.config(),
                    inbound: l.inbound.clone(),
                })
                .collect(),
            output: self.output.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|l| l.name.as_str())
    }

    pub fn layer(&self, name: &str) -> Option<&dyn CustomOp> {
        self.layers
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.op.as_ref())
    }

    /// Attach weights by layer name. Fails without modifying the graph if
    /// any tensor names an unknown layer or has inconsistent shape.
    pub fn bind_weights(&mut self, weights: WeightSet) -> Result<(), DepthError> {
        for (layer, tensor) in &weights.tensors {
            if self.layer(layer).is_none() {
                return Err(DepthError::UnboundWeights(layer.clone()));
            }
            tensor.check(layer)?;
        }
        debug!(
            "ModelGraph `{}`: bound {} weight tensors",
            self.name,
            weights.tensors.len()
        );
        self.weights = weights;
        Ok(())
    }

    pub fn weights(&self) -> &WeightSet {
        &self.weights
    }

    /// Run every layer in order and return the output layer's image.
    pub fn run(&self, feeds: &BTreeMap<String, OpValue>) -> Result<ImageF32, DepthError> {
        let mut values: BTreeMap<&str, OpValue> = BTreeMap::new();
        for input in &self.inputs {
            let value = feeds.get(input).ok_or_else(|| DepthError::UnknownInbound {
                layer: self.name.clone(),
                inbound: input.clone(),
            })?;
            values.insert(input.as_str(), value.clone());
        }
        let mut last = None;
        for layer in &self.layers {
            let args: Vec<&OpValue> = layer
                .inbound
                .iter()
                .filter_map(|name| values.get(name.as_str()))
                .collect();
            let out = layer.op.forward(&args)?;
            values.insert(layer.name.as_str(), OpValue::Image(out));
            last = Some(layer.name.as_str());
        }
        let target = self.output.as_deref().or(last);
        match target.and_then(|name| values.remove(name)) {
            Some(OpValue::Image(img)) => Ok(img),
            _ => Err(DepthError::InvalidOpInputs {
                op: "ModelGraph",
                expected: "at least one layer",
                got: "an empty graph".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_registry_knows_builtins() {
        let registry = OpRegistry::default();
        let ids: Vec<&str> = registry.identifiers().collect();
        assert_eq!(
            ids,
            vec![INVERSE_DEPTH_NORMALIZATION, PROJECTION_LAYER, REFLECTION_PADDING_2D]
        );
        assert!(matches!(
            registry.build("Lambda", &Value::Null),
            Err(DepthError::UnknownOperation(_))
        ));
    }

    #[test]
    fn missing_config_uses_layer_defaults() {
        let registry = OpRegistry::default();
        let pad = registry.build(REFLECTION_PADDING_2D, &Value::Null).unwrap();
        assert_eq!(pad.config(), json!({ "padding": [1, 1] }));
        let norm = registry
            .build(INVERSE_DEPTH_NORMALIZATION, &json!({}))
            .unwrap();
        assert_eq!(norm.config(), json!({ "min_depth": 1.0, "max_depth": 100.0 }));
        let proj = registry.build(PROJECTION_LAYER, &Value::Null).unwrap();
        assert_eq!(
            proj.config(),
            json!({ "intrinsics_mat": [[1.0, 0.0, 0.5], [0.0, 1.0, 0.5], [0.0, 0.0, 1.0]] })
        );
    }

    #[test]
    fn skewed_intrinsics_survive_a_config_round_trip() {
        let k = Matrix3::new(0.9, 0.15, 0.45, 0.0, 1.1, 0.55, 0.0, 0.0, 1.0);
        let op = ProjectionOp::new(ProjectionConfig::from_matrix(&k)).unwrap();
        let rebuilt = OpRegistry::default()
            .build(PROJECTION_LAYER, &op.config())
            .unwrap();
        assert_eq!(rebuilt.config(), op.config());
        let parsed: ProjectionConfig = serde_json::from_value(rebuilt.config()).unwrap();
        let restored = ProjectionOp::new(parsed).unwrap();
        assert_eq!(restored.camera().k(), &k);
        assert_eq!(restored.camera().k()[(0, 1)], 0.15);
    }

    #[test]
    fn malformed_config_is_rejected() {
        let registry = OpRegistry::default();
        let err = registry
            .build(REFLECTION_PADDING_2D, &json!({ "padding": "wide" }))
            .unwrap_err();
        assert!(matches!(err, DepthError::InvalidOpConfig { .. }));
        let err = registry
            .build(
                INVERSE_DEPTH_NORMALIZATION,
                &json!({ "min_depth": 5.0, "max_depth": 2.0 }),
            )
            .unwrap_err();
        assert!(matches!(err, DepthError::InvalidDepthRange { .. }));
    }

    #[test]
    fn ops_validate_their_inputs() {
        let pad = ReflectionPaddingOp::new(ReflectionPaddingConfig { padding: (2, 2) });
        let tiny = OpValue::Image(ImageF32::new(2, 2, 1));
        assert!(matches!(
            pad.forward(&[&tiny]),
            Err(DepthError::InvalidPadding { .. })
        ));
        let pose = OpValue::Pose([0.0; 6]);
        assert!(matches!(
            pad.forward(&[&pose]),
            Err(DepthError::InvalidOpInputs { .. })
        ));
    }
}
