//! Translation context: the state shared by every translator of a run.
//!
//! The context owns the execution environment and the registry of
//! translated collections. The registry is append-only: a collection id maps
//! to exactly one stream for the whole run.

use crate::engine::{DataStream, EngineError, ExecutionEnvironment, ExecutionResult, TypeInfo};
use crate::options::PipelineOptions;
use crate::pipeline::{Components, Pipeline};
use crate::resolver::{self, ResolveError};
use indexmap::IndexMap;
use std::sync::Arc;

/// Which coder flavor shapes translated outputs. Fixed for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TranslationMode {
    /// Outputs carry native values typed with the declared coders.
    #[default]
    Legacy,
    /// Outputs carry wire values so runtimes that do not share the native
    /// coders can consume them.
    Portable,
}

impl TranslationMode {
    /// Coders used to produce and to declare a collection's records.
    pub fn coder_pair(
        self,
        pcollection_id: &str,
        components: &Components,
    ) -> Result<CoderPair, ResolveError> {
        match self {
            TranslationMode::Legacy => Ok(CoderPair::Native(TypeInfo::new(
                resolver::legacy_coder(pcollection_id, components)?,
            ))),
            TranslationMode::Portable => Ok(CoderPair::Bridged {
                native: TypeInfo::new(resolver::sdk_coder(pcollection_id, components)?),
                wire: TypeInfo::new(resolver::wire_coder(pcollection_id, components)?),
            }),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TranslationMode::Legacy => "legacy",
            TranslationMode::Portable => "portable",
        }
    }
}

impl std::fmt::Display for TranslationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Coders for one translated collection.
#[derive(Debug, Clone, PartialEq)]
pub enum CoderPair {
    /// Produced and declared with the same coder.
    Native(TypeInfo),
    /// Produced with `native`, bridged and declared with `wire`.
    Bridged { native: TypeInfo, wire: TypeInfo },
}

impl CoderPair {
    /// Type the source produces.
    pub fn source_type(&self) -> &TypeInfo {
        match self {
            CoderPair::Native(info) => info,
            CoderPair::Bridged { native, .. } => native,
        }
    }

    /// Type declared on the registered stream.
    pub fn output_type(&self) -> &TypeInfo {
        match self {
            CoderPair::Native(info) => info,
            CoderPair::Bridged { wire, .. } => wire,
        }
    }

    pub fn is_bridged(&self) -> bool {
        matches!(self, CoderPair::Bridged { .. })
    }
}

/// Shared state of a translation run.
#[derive(Debug, Clone)]
pub struct TranslationContext {
    env: ExecutionEnvironment,
    options: Arc<PipelineOptions>,
    mode: TranslationMode,
    streams: IndexMap<String, DataStream>,
}

impl TranslationContext {
    pub fn new(env: ExecutionEnvironment, options: PipelineOptions) -> Self {
        let mode = options.mode();
        Self {
            env,
            options: Arc::new(options),
            mode,
            streams: IndexMap::new(),
        }
    }

    /// Context with an environment configured from `options`.
    pub fn from_options(options: PipelineOptions) -> Self {
        let env = ExecutionEnvironment::from_options(&options);
        Self::new(env, options)
    }

    pub fn execution_environment(&self) -> &ExecutionEnvironment {
        &self.env
    }

    pub fn execution_environment_mut(&mut self) -> &mut ExecutionEnvironment {
        &mut self.env
    }

    pub fn pipeline_options(&self) -> &Arc<PipelineOptions> {
        &self.options
    }

    pub fn mode(&self) -> TranslationMode {
        self.mode
    }

    pub fn is_portable(&self) -> bool {
        self.mode == TranslationMode::Portable
    }

    /// Engine type of a collection as declared, without any bridging.
    pub fn type_info(&self, pipeline: &Pipeline, pcollection_id: &str) -> Result<TypeInfo, ResolveError> {
        resolver::legacy_coder(pcollection_id, &pipeline.components).map(TypeInfo::new)
    }

    /// Register the stream of a collection. Each id is registered once.
    pub fn add_stream(
        &mut self,
        pcollection_id: impl Into<String>,
        stream: DataStream,
    ) -> Result<(), ContextError> {
        let id = pcollection_id.into();
        if self.streams.contains_key(&id) {
            return Err(ContextError::DuplicateStream(id));
        }
        self.streams.insert(id, stream);
        Ok(())
    }

    pub fn stream(&self, pcollection_id: &str) -> Option<&DataStream> {
        self.streams.get(pcollection_id)
    }

    /// Registered streams in registration order.
    pub fn streams(&self) -> impl Iterator<Item = (&str, &DataStream)> {
        self.streams.iter().map(|(id, s)| (id.as_str(), s))
    }

    /// Run the stream of a registered collection and collect its records.
    pub fn execute(&self, pcollection_id: &str) -> Result<ExecutionResult, ContextError> {
        let stream = self
            .stream(pcollection_id)
            .ok_or_else(|| ContextError::UnknownStream(pcollection_id.to_string()))?;
        Ok(self.env.execute_collect(stream)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("collection '{0}' is already registered")]
    DuplicateStream(String),

    #[error("collection '{0}' has no registered stream")]
    UnknownStream(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::attach_bounded_source;
    use crate::coder::{CoderSpec, SerdeFormat, WindowCoder, WindowedValueCoder, urn};
    use crate::pipeline::{Coder, PCollection, WindowingStrategy};
    use crate::source::RangeSource;

    fn components() -> Components {
        let mut c = Components::default();
        c.coders
            .insert("c_json".into(), Coder::new(urn::SERDE).payload("json"));
        c.coders.insert("c_global".into(), Coder::new(urn::GLOBAL_WINDOW));
        c.windowing_strategies.insert(
            "ws".into(),
            WindowingStrategy {
                window_coder_id: "c_global".into(),
            },
        );
        c.pcollections.insert(
            "pc".into(),
            PCollection {
                unique_name: "pc".into(),
                coder_id: "c_json".into(),
                is_bounded: Default::default(),
                windowing_strategy_id: "ws".into(),
            },
        );
        c
    }

    fn stream(context: &mut TranslationContext, name: &str) -> DataStream {
        let options = context.pipeline_options().clone();
        attach_bounded_source(
            context.execution_environment_mut(),
            name,
            Arc::new(RangeSource::new(0, 3)),
            options,
            1,
            TypeInfo::new(WindowedValueCoder::new(CoderSpec::VarInt, WindowCoder::Global)),
        )
        .unwrap()
    }

    #[test]
    fn test_mode_follows_options() {
        let context = TranslationContext::new(
            ExecutionEnvironment::new(1),
            PipelineOptions::new().portable(true),
        );
        assert!(context.is_portable());
        assert_eq!(context.mode(), TranslationMode::Portable);
    }

    #[test]
    fn test_coder_pairs() {
        let c = components();
        let json = CoderSpec::Serde(SerdeFormat::Json);

        let legacy = TranslationMode::Legacy.coder_pair("pc", &c).unwrap();
        assert!(!legacy.is_bridged());
        assert_eq!(legacy.source_type(), legacy.output_type());
        assert_eq!(legacy.output_type().coder().value, json);

        let portable = TranslationMode::Portable.coder_pair("pc", &c).unwrap();
        assert!(portable.is_bridged());
        assert_eq!(
            portable.source_type().coder().value,
            CoderSpec::length_prefix(json)
        );
        assert_eq!(
            portable.output_type().coder().value,
            CoderSpec::length_prefix(CoderSpec::Bytes)
        );
    }

    #[test]
    fn test_registry_is_append_only() {
        let mut context = TranslationContext::new(ExecutionEnvironment::new(1), PipelineOptions::new());
        let first = stream(&mut context, "First");
        let second = stream(&mut context, "Second");

        context.add_stream("pc", first.clone()).unwrap();
        let err = context.add_stream("pc", second).unwrap_err();
        assert!(matches!(err, ContextError::DuplicateStream(id) if id == "pc"));
        assert_eq!(context.stream("pc"), Some(&first));
        assert_eq!(context.streams().count(), 1);
    }

    #[test]
    fn test_execute_registered_stream() {
        let mut context = TranslationContext::new(ExecutionEnvironment::new(1), PipelineOptions::new());
        let s = stream(&mut context, "Range");
        context.add_stream("pc", s).unwrap();

        assert_eq!(context.execute("pc").unwrap().envelopes.len(), 3);
        assert!(matches!(
            context.execute("other"),
            Err(ContextError::UnknownStream(_))
        ));
    }

    #[test]
    fn test_type_info_is_declared_coder() {
        let context = TranslationContext::from_options(PipelineOptions::new().portable(true));
        let pipeline = Pipeline {
            components: components(),
            ..Default::default()
        };
        let info = context.type_info(&pipeline, "pc").unwrap();
        assert_eq!(info.coder().value, CoderSpec::Serde(SerdeFormat::Json));
    }
}
