//! Source adapter: wraps a finite producer into an engine streaming source.

use crate::engine::{DataStream, EngineError, ExecutionEnvironment, TypeInfo, WatermarkStrategy};
use crate::envelope::Envelope;
use crate::options::PipelineOptions;
use crate::source::{BoundedSource, SourceError};
use std::sync::Arc;

/// A bounded source prepared for the engine.
///
/// `parallelism` is a hint: the engine runs at most that many readers, and
/// fewer when the source yields fewer splits.
#[derive(Debug, Clone)]
pub struct BoundedSourceAdapter {
    name: String,
    source: Arc<dyn BoundedSource>,
    options: Arc<PipelineOptions>,
    parallelism: usize,
}

impl BoundedSourceAdapter {
    pub fn bounded(
        name: impl Into<String>,
        source: Arc<dyn BoundedSource>,
        options: Arc<PipelineOptions>,
        parallelism: usize,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            options,
            parallelism,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn source(&self) -> &Arc<dyn BoundedSource> {
        &self.source
    }

    /// Split the source into roughly `parallelism` bundles.
    ///
    /// A source with nothing to read yields no splits and completes
    /// immediately.
    pub fn plan_splits(&self) -> Result<Vec<Arc<dyn BoundedSource>>, SourceError> {
        let estimated = self.source.estimated_size_bytes(&self.options)?;
        let desired = (estimated / self.parallelism.max(1) as u64).max(1);
        self.source.split(desired, &self.options)
    }

    pub fn read_split(&self, split: &dyn BoundedSource) -> Result<Vec<Envelope>, SourceError> {
        split.read(&self.options)
    }
}

/// Attach `source` to the environment as a named, uid-tagged stream without
/// watermarks.
///
/// The uid is `name`, so translating the same transform again yields the
/// same operator identity.
pub fn attach_bounded_source(
    env: &mut ExecutionEnvironment,
    name: &str,
    source: Arc<dyn BoundedSource>,
    options: Arc<PipelineOptions>,
    parallelism: usize,
    type_info: TypeInfo,
) -> Result<DataStream, EngineError> {
    if env.graph().find_by_uid(name).is_some() {
        return Err(EngineError::DuplicateUid(name.to_string()));
    }
    let adapter = BoundedSourceAdapter::bounded(name, source, options, parallelism);
    env.from_source(adapter, WatermarkStrategy::NoWatermarks, name, type_info)?
        .uid(env, name)
}
