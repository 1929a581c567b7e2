//! Portable pipeline descriptions.
//!
//! A pipeline is a component table: transforms, the collections they
//! produce and consume, the coders of those collections and their windowing
//! strategies. Pipelines are serializable and can be loaded from JSON, YAML
//! or TOML; payload bytes travel as base64 strings.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A pipeline description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Top-level transforms, in declaration order.
    #[serde(default)]
    pub root_transform_ids: Vec<String>,

    pub components: Components,
}

/// Shared component table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Components {
    #[serde(default)]
    pub transforms: IndexMap<String, Transform>,
    #[serde(default)]
    pub pcollections: IndexMap<String, PCollection>,
    #[serde(default)]
    pub coders: IndexMap<String, Coder>,
    #[serde(default)]
    pub windowing_strategies: IndexMap<String, WindowingStrategy>,
}

/// A URN plus an opaque, URN-specific payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub urn: String,
    #[serde(default, with = "payload_bytes")]
    pub payload: Vec<u8>,
}

impl FunctionSpec {
    pub fn new(urn: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            urn: urn.into(),
            payload,
        }
    }
}

/// One pipeline step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub unique_name: String,

    #[serde(default)]
    pub subtransforms: Vec<String>,

    /// Absent for composite transforms.
    #[serde(default)]
    pub spec: Option<FunctionSpec>,

    /// Local input name to collection id.
    #[serde(default)]
    pub inputs: IndexMap<String, String>,

    /// Local output name to collection id.
    #[serde(default)]
    pub outputs: IndexMap<String, String>,
}

impl Transform {
    pub fn new(unique_name: impl Into<String>) -> Self {
        Self {
            unique_name: unique_name.into(),
            ..Default::default()
        }
    }

    pub fn spec(mut self, spec: FunctionSpec) -> Self {
        self.spec = Some(spec);
        self
    }

    pub fn input(mut self, name: impl Into<String>, pcollection: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), pcollection.into());
        self
    }

    pub fn output(mut self, name: impl Into<String>, pcollection: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), pcollection.into());
        self
    }

    pub fn urn(&self) -> Option<&str> {
        self.spec.as_ref().map(|s| s.urn.as_str())
    }

    pub fn is_leaf(&self) -> bool {
        self.subtransforms.is_empty()
    }
}

/// Whether a collection has a finite number of elements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsBounded {
    #[default]
    Bounded,
    Unbounded,
}

/// A logical data collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PCollection {
    #[serde(default)]
    pub unique_name: String,
    pub coder_id: String,
    #[serde(default)]
    pub is_bounded: IsBounded,
    pub windowing_strategy_id: String,
}

/// A coder entry in the component table.
///
/// `payload` is URN-specific text; serde coders store their format name here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coder {
    pub urn: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub components: Vec<String>,
}

impl Coder {
    pub fn new(urn: impl Into<String>) -> Self {
        Self {
            urn: urn.into(),
            payload: String::new(),
            components: Vec::new(),
        }
    }

    pub fn payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn component(mut self, coder_id: impl Into<String>) -> Self {
        self.components.push(coder_id.into());
        self
    }
}

/// Windowing strategy of a collection; only the window coder matters here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowingStrategy {
    pub window_coder_id: String,
}

/// A transform together with its id in the component table.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformNode {
    pub id: String,
    pub transform: Transform,
}

impl TransformNode {
    pub fn new(id: impl Into<String>, transform: Transform) -> Self {
        Self {
            id: id.into(),
            transform,
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a transform by id.
    pub fn node(&self, id: &str) -> Option<TransformNode> {
        self.components
            .transforms
            .get(id)
            .map(|t| TransformNode::new(id, t.clone()))
    }

    /// All leaf (primitive) transforms, in component-table order.
    pub fn leaf_nodes(&self) -> Vec<TransformNode> {
        self.components
            .transforms
            .iter()
            .filter(|(_, t)| t.is_leaf())
            .map(|(id, t)| TransformNode::new(id.clone(), t.clone()))
            .collect()
    }

    /// Parse a pipeline from bytes, detecting the format from the path.
    pub fn from_bytes(data: &[u8], path: Option<&str>) -> Result<Self, PipelineError> {
        let format = path
            .and_then(detect_format)
            .unwrap_or_else(|| "yaml".to_string());

        Self::from_bytes_format(data, &format)
    }

    /// Parse a pipeline from bytes with an explicit format.
    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, PipelineError> {
        parse_document(data, format).map_err(PipelineError::Parse)
    }

    /// Serialize the pipeline.
    pub fn to_bytes(&self, format: &str) -> Result<Vec<u8>, PipelineError> {
        render_document(self, format).map_err(PipelineError::Parse)
    }
}

/// Errors related to pipeline descriptions.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to parse pipeline: {0}")]
    Parse(String),
}

/// Detect a document format from a file path extension.
pub(crate) fn detect_format(path: &str) -> Option<String> {
    let ext = path.rsplit('.').next()?;
    match ext.to_lowercase().as_str() {
        "json" => Some("json".into()),
        "yaml" | "yml" => Some("yaml".into()),
        "toml" => Some("toml".into()),
        _ => None,
    }
}

pub(crate) fn parse_document<T: serde::de::DeserializeOwned>(
    data: &[u8],
    format: &str,
) -> Result<T, String> {
    match format {
        "json" => serde_json::from_slice(data).map_err(|e| e.to_string()),
        "yaml" | "yml" => serde_yaml::from_slice(data).map_err(|e| e.to_string()),
        "toml" => {
            let s = std::str::from_utf8(data).map_err(|e| format!("Invalid UTF-8: {}", e))?;
            toml::from_str(s).map_err(|e| e.to_string())
        }
        _ => Err(format!("Unsupported document format: {}", format)),
    }
}

pub(crate) fn render_document<T: Serialize>(value: &T, format: &str) -> Result<Vec<u8>, String> {
    match format {
        "json" => serde_json::to_vec_pretty(value).map_err(|e| e.to_string()),
        "yaml" | "yml" => serde_yaml::to_string(value)
            .map(|s| s.into_bytes())
            .map_err(|e| e.to_string()),
        "toml" => toml::to_string_pretty(value)
            .map(|s| s.into_bytes())
            .map_err(|e| e.to_string()),
        _ => Err(format!("Unsupported document format: {}", format)),
    }
}

mod payload_bytes {
    use base64::prelude::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64_STANDARD
            .decode(text.trim())
            .map_err(serde::de::Error::custom)
    }
}
