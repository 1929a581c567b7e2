//! Xylem: translate portable pipeline descriptions into streaming graphs.
//!
//! A pipeline is a table of transforms whose payloads describe what they do.
//! Xylem walks the table, turns each supported transform into a fragment of
//! an in-process stream graph and registers the fragment under the
//! collection it produces. In portable mode every output is re-shaped from
//! its native coder into a wire coder that other runtimes can decode.

pub mod adapter;
pub mod bridge;
pub mod coder;
pub mod context;
pub mod engine;
pub mod envelope;
pub mod options;
pub mod payload;
pub mod pipeline;
pub mod resolver;
pub mod source;
pub mod translate;

pub use adapter::{BoundedSourceAdapter, attach_bounded_source};
pub use bridge::{from_wire_types, into_wire_types};
pub use coder::{CoderError, CoderSpec, SerdeFormat, WindowCoder, WindowedValueCoder};
pub use context::{CoderPair, ContextError, TranslationContext, TranslationMode};
pub use engine::{
    DataStream, EngineError, ExecutionEnvironment, ExecutionResult, ExecutionStats, StreamGraph,
    StreamNode, TypeInfo, WatermarkStrategy,
};
pub use envelope::{Element, Envelope, PaneInfo, PaneTiming, Timestamp, Window};
pub use options::{OptionsError, PipelineOptions};
pub use payload::{PayloadError, ReadPayload};
pub use pipeline::{
    Coder, Components, FunctionSpec, IsBounded, PCollection, Pipeline, PipelineError, Transform,
    TransformNode, WindowingStrategy,
};
pub use resolver::{CoderPolicy, ResolveError};
pub use source::{BoundedSource, ImpulseSource, RangeSource, SourceError, SourceRegistry, ValuesSource};
pub use translate::{
    BoundedReadTranslator, ImpulseTranslator, PipelineTranslator, TransformTranslator,
    TranslateError, TranslateErrorKind, Translator,
};
