//! Finite-record producers and the registry that builds them from specs.
//!
//! A read transform's payload names a source by URN and carries its encoded
//! description. The `SourceRegistry` maps URNs to decoders, the same way a
//! converter registry maps ids to implementations.

use crate::envelope::{Element, Envelope, Timestamp};
use crate::options::PipelineOptions;
use crate::pipeline::FunctionSpec;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Built-in source URNs.
pub mod urn {
    pub const VALUES: &str = "xylem:source:values:v1";
    pub const RANGE: &str = "xylem:source:range:v1";
    pub const IMPULSE: &str = "xylem:source:impulse:v1";
}

/// A producer of a finite number of envelopes.
pub trait BoundedSource: Send + Sync + fmt::Debug {
    /// Rough size of everything this source will produce.
    fn estimated_size_bytes(&self, options: &PipelineOptions) -> Result<u64, SourceError>;

    /// Split into sub-sources of roughly `desired_bundle_size_bytes` each.
    ///
    /// An empty result means the source has nothing to read.
    fn split(
        &self,
        desired_bundle_size_bytes: u64,
        options: &PipelineOptions,
    ) -> Result<Vec<Arc<dyn BoundedSource>>, SourceError>;

    /// Read every envelope of this source.
    fn read(&self, options: &PipelineOptions) -> Result<Vec<Envelope>, SourceError>;

    /// Human-readable description for logs and error messages.
    fn describe(&self) -> String;
}

/// Decoder from an encoded source description to a source.
pub type SourceFactory =
    Arc<dyn Fn(&[u8]) -> Result<Arc<dyn BoundedSource>, SourceError> + Send + Sync>;

/// Registry of source decoders indexed by URN.
#[derive(Clone)]
pub struct SourceRegistry {
    factories: IndexMap<String, SourceFactory>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("urns", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// Registry with the values, range and impulse sources.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(urn::VALUES, |data| {
            ValuesSource::decode(data).map(|s| Arc::new(s) as Arc<dyn BoundedSource>)
        });
        registry.register(urn::RANGE, |data| {
            RangeSource::decode(data).map(|s| Arc::new(s) as Arc<dyn BoundedSource>)
        });
        registry.register(urn::IMPULSE, |_| {
            Ok(Arc::new(ImpulseSource) as Arc<dyn BoundedSource>)
        });
        registry
    }

    pub fn register<F>(&mut self, urn: impl Into<String>, factory: F)
    where
        F: Fn(&[u8]) -> Result<Arc<dyn BoundedSource>, SourceError> + Send + Sync + 'static,
    {
        self.factories.insert(urn.into(), Arc::new(factory));
    }

    /// Build the source described by `spec`.
    pub fn from_spec(&self, spec: &FunctionSpec) -> Result<Arc<dyn BoundedSource>, SourceError> {
        let factory = self
            .factories
            .get(&spec.urn)
            .ok_or_else(|| SourceError::UnknownUrn(spec.urn.clone()))?;
        factory(&spec.payload)
    }

    pub fn urns(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// Errors raised while building or reading a source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("no source registered for URN '{0}'")]
    UnknownUrn(String),

    #[error("invalid source description: {0}")]
    Decode(String),

    #[error("read failed: {0}")]
    Read(String),
}

/// One inline element of a values source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedValue {
    pub value: Element,
    #[serde(default = "min_timestamp")]
    pub timestamp: Timestamp,
}

fn min_timestamp() -> Timestamp {
    Timestamp::MIN
}

/// Inline elements, each in the global window.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValuesSource {
    pub elements: Vec<TimestampedValue>,
}

impl ValuesSource {
    pub fn new(elements: Vec<TimestampedValue>) -> Self {
        Self { elements }
    }

    pub fn decode(data: &[u8]) -> Result<Self, SourceError> {
        serde_json::from_slice(data).map_err(|e| SourceError::Decode(e.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>, SourceError> {
        serde_json::to_vec(self).map_err(|e| SourceError::Decode(e.to_string()))
    }

    fn element_size(element: &TimestampedValue) -> u64 {
        serde_json::to_vec(&element.value)
            .map(|v| v.len() as u64)
            .unwrap_or(0)
            + 8
    }
}

impl BoundedSource for ValuesSource {
    fn estimated_size_bytes(&self, _options: &PipelineOptions) -> Result<u64, SourceError> {
        Ok(self.elements.iter().map(Self::element_size).sum())
    }

    fn split(
        &self,
        desired_bundle_size_bytes: u64,
        _options: &PipelineOptions,
    ) -> Result<Vec<Arc<dyn BoundedSource>>, SourceError> {
        let mut bundles: Vec<Arc<dyn BoundedSource>> = Vec::new();
        let mut current = Vec::new();
        let mut current_size = 0;

        for element in &self.elements {
            current_size += Self::element_size(element);
            current.push(element.clone());
            if current_size >= desired_bundle_size_bytes {
                bundles.push(Arc::new(ValuesSource::new(std::mem::take(&mut current))));
                current_size = 0;
            }
        }
        if !current.is_empty() {
            bundles.push(Arc::new(ValuesSource::new(current)));
        }

        Ok(bundles)
    }

    fn read(&self, _options: &PipelineOptions) -> Result<Vec<Envelope>, SourceError> {
        Ok(self
            .elements
            .iter()
            .map(|e| Envelope::in_global_window(e.value.clone(), e.timestamp))
            .collect())
    }

    fn describe(&self) -> String {
        format!("Values({} elements)", self.elements.len())
    }
}

/// The integers `[start, end)` at the minimum timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSource {
    pub start: i64,
    pub end: i64,
}

impl RangeSource {
    const ELEMENT_SIZE: u64 = 8;

    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn decode(data: &[u8]) -> Result<Self, SourceError> {
        let source: RangeSource =
            serde_json::from_slice(data).map_err(|e| SourceError::Decode(e.to_string()))?;
        if source.end < source.start {
            return Err(SourceError::Decode(format!(
                "range end {} is before start {}",
                source.end, source.start
            )));
        }
        Ok(source)
    }

    pub fn encode(&self) -> Result<Vec<u8>, SourceError> {
        serde_json::to_vec(self).map_err(|e| SourceError::Decode(e.to_string()))
    }

    fn len(&self) -> u64 {
        if self.end <= self.start {
            return 0;
        }
        self.end.abs_diff(self.start)
    }
}

impl BoundedSource for RangeSource {
    fn estimated_size_bytes(&self, _options: &PipelineOptions) -> Result<u64, SourceError> {
        Ok(self.len().saturating_mul(Self::ELEMENT_SIZE))
    }

    fn split(
        &self,
        desired_bundle_size_bytes: u64,
        _options: &PipelineOptions,
    ) -> Result<Vec<Arc<dyn BoundedSource>>, SourceError> {
        let per_bundle = (desired_bundle_size_bytes / Self::ELEMENT_SIZE).max(1) as i64;
        let mut bundles: Vec<Arc<dyn BoundedSource>> = Vec::new();
        let mut start = self.start;
        while start < self.end {
            let end = start.saturating_add(per_bundle).min(self.end);
            bundles.push(Arc::new(RangeSource::new(start, end)));
            start = end;
        }
        Ok(bundles)
    }

    fn read(&self, _options: &PipelineOptions) -> Result<Vec<Envelope>, SourceError> {
        Ok((self.start..self.end)
            .map(|n| Envelope::in_global_window(n, Timestamp::MIN))
            .collect())
    }

    fn describe(&self) -> String {
        format!("Range({}..{})", self.start, self.end)
    }
}

/// A single empty byte string in the global window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImpulseSource;

impl BoundedSource for ImpulseSource {
    fn estimated_size_bytes(&self, _options: &PipelineOptions) -> Result<u64, SourceError> {
        Ok(1)
    }

    fn split(
        &self,
        _desired_bundle_size_bytes: u64,
        _options: &PipelineOptions,
    ) -> Result<Vec<Arc<dyn BoundedSource>>, SourceError> {
        Ok(vec![Arc::new(ImpulseSource)])
    }

    fn read(&self, _options: &PipelineOptions) -> Result<Vec<Envelope>, SourceError> {
        Ok(vec![Envelope::in_global_window(
            Element::Bytes(Vec::new()),
            Timestamp::MIN,
        )])
    }

    fn describe(&self) -> String {
        "Impulse".to_string()
    }
}
