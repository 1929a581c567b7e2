//! Transform translation: from pipeline transforms to stream graph fragments.
//!
//! Each supported transform URN has a translator. `Translator` is the closed
//! set of them; `PipelineTranslator` walks a whole pipeline in dependency
//! order and dispatches every leaf transform to its translator.

mod impulse;
mod read;

pub use impulse::ImpulseTranslator;
pub use read::BoundedReadTranslator;

use crate::adapter::attach_bounded_source;
use crate::bridge::into_wire_types;
use crate::context::{CoderPair, ContextError, TranslationContext};
use crate::engine::{DataStream, EngineError, ExecutionEnvironment};
use crate::options::PipelineOptions;
use crate::payload::PayloadError;
use crate::pipeline::{Pipeline, TransformNode};
use crate::resolver::ResolveError;
use crate::source::{BoundedSource, SourceError, SourceRegistry};
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;

/// Transform URNs with a translator.
pub mod urn {
    pub const IMPULSE: &str = "xylem:transform:impulse:v1";
    pub const READ: &str = "xylem:transform:read:v1";
}

/// Turns one transform into a fragment of the context's stream graph.
pub trait TransformTranslator {
    /// Translate `node` and register its output in `context`.
    ///
    /// On error nothing is registered for the node.
    fn translate(
        &self,
        node: &TransformNode,
        pipeline: &Pipeline,
        context: &mut TranslationContext,
    ) -> Result<(), TranslateError>;
}

/// All transform translators.
#[derive(Debug, Clone)]
pub enum Translator {
    Impulse(ImpulseTranslator),
    BoundedRead(BoundedReadTranslator),
}

impl Translator {
    /// Translator for a transform URN, if there is one.
    pub fn for_urn(urn: &str, sources: &Arc<SourceRegistry>) -> Option<Self> {
        match urn {
            urn::IMPULSE => Some(Translator::Impulse(ImpulseTranslator)),
            urn::READ => Some(Translator::BoundedRead(BoundedReadTranslator::new(
                sources.clone(),
            ))),
            _ => None,
        }
    }

    pub fn urns() -> &'static [&'static str] {
        &[urn::IMPULSE, urn::READ]
    }
}

impl TransformTranslator for Translator {
    fn translate(
        &self,
        node: &TransformNode,
        pipeline: &Pipeline,
        context: &mut TranslationContext,
    ) -> Result<(), TranslateError> {
        match self {
            Translator::Impulse(t) => t.translate(node, pipeline, context),
            Translator::BoundedRead(t) => t.translate(node, pipeline, context),
        }
    }
}

/// Translates every leaf transform of a pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineTranslator {
    sources: Arc<SourceRegistry>,
}

impl PipelineTranslator {
    pub fn new(sources: SourceRegistry) -> Self {
        Self {
            sources: Arc::new(sources),
        }
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Translate all leaf transforms, producers before consumers.
    ///
    /// Translation stops at the first error, and `context` is left as it
    /// was: either every transform is registered or none is.
    pub fn translate(
        &self,
        pipeline: &Pipeline,
        context: &mut TranslationContext,
    ) -> Result<(), TranslateError> {
        let order = topological_order(pipeline)?;

        let mut plan = Vec::with_capacity(order.len());
        for node in order {
            let urn = node.transform.urn().unwrap_or_default();
            let translator = Translator::for_urn(urn, &self.sources).ok_or_else(|| {
                TranslateError::new(
                    &node.transform.unique_name,
                    TranslateErrorKind::UnsupportedTransform(format!("no translator for '{}'", urn)),
                )
            })?;
            plan.push((node, translator));
        }

        let mut staged = context.clone();
        for (node, translator) in &plan {
            translator.translate(node, pipeline, &mut staged)?;
        }
        *context = staged;

        tracing::info!(
            transforms = plan.len(),
            mode = %context.mode(),
            "translated pipeline"
        );
        Ok(())
    }
}

/// Leaf transforms ordered so that every producer precedes its consumers.
///
/// Ties keep component-table order.
pub fn topological_order(pipeline: &Pipeline) -> Result<Vec<TransformNode>, TranslateError> {
    let leaves = pipeline.leaf_nodes();

    let mut producers: IndexMap<&str, &str> = IndexMap::new();
    for node in &leaves {
        if node.transform.spec.is_none() {
            return Err(TranslateError::new(
                &node.transform.unique_name,
                TranslateErrorKind::MalformedGraph("primitive transform has no spec".into()),
            ));
        }
        for pcollection in node.transform.outputs.values() {
            if producers
                .insert(pcollection.as_str(), node.id.as_str())
                .is_some()
            {
                return Err(TranslateError::new(
                    &node.transform.unique_name,
                    TranslateErrorKind::MalformedGraph(format!(
                        "collection '{}' has more than one producer",
                        pcollection
                    )),
                ));
            }
        }
    }

    let mut dependencies: Vec<IndexSet<&str>> = Vec::with_capacity(leaves.len());
    for node in &leaves {
        let mut deps = IndexSet::new();
        for pcollection in node.transform.inputs.values() {
            let producer = producers.get(pcollection.as_str()).ok_or_else(|| {
                TranslateError::new(
                    &node.transform.unique_name,
                    TranslateErrorKind::MalformedGraph(format!(
                        "input collection '{}' has no producer",
                        pcollection
                    )),
                )
            })?;
            deps.insert(*producer);
        }
        dependencies.push(deps);
    }

    let mut done: IndexSet<&str> = IndexSet::new();
    let mut ordered = Vec::with_capacity(leaves.len());
    while ordered.len() < leaves.len() {
        let next = leaves.iter().enumerate().find(|(i, node)| {
            !done.contains(node.id.as_str()) && dependencies[*i].iter().all(|d| done.contains(d))
        });
        let Some((_, node)) = next else {
            let stuck = leaves
                .iter()
                .find(|node| !done.contains(node.id.as_str()))
                .map(|node| node.transform.unique_name.as_str())
                .unwrap_or_default();
            return Err(TranslateError::new(
                stuck,
                TranslateErrorKind::MalformedGraph("transforms form a cycle".into()),
            ));
        };
        done.insert(node.id.as_str());
        ordered.push(node.clone());
    }

    Ok(ordered)
}

/// The single output collection of a node.
pub(crate) fn single_output(node: &TransformNode) -> Result<&str, TranslateError> {
    let outputs = &node.transform.outputs;
    match outputs.values().next() {
        Some(id) if outputs.len() == 1 => Ok(id.as_str()),
        _ => Err(TranslateError::new(
            &node.transform.unique_name,
            TranslateErrorKind::MalformedGraph(format!(
                "expected exactly one output, found {}",
                outputs.len()
            )),
        )),
    }
}

/// Attach `source` as the producer of `output` and register the result.
///
/// In portable mode a bridge operator follows the source and the stream is
/// declared with the wire type. A failure leaves the graph as it was.
pub(crate) fn translate_source(
    node: &TransformNode,
    output: &str,
    pipeline: &Pipeline,
    context: &mut TranslationContext,
    source: Arc<dyn BoundedSource>,
) -> Result<(), TranslateError> {
    let name = node.transform.unique_name.as_str();

    if context.stream(output).is_some() {
        return Err(TranslateError::new(
            name,
            ContextError::DuplicateStream(output.to_string()).into(),
        ));
    }

    let env = context.execution_environment();
    let parallelism = if env.max_parallelism() > 0 {
        env.max_parallelism()
    } else {
        env.parallelism()
    };

    let coders = context
        .mode()
        .coder_pair(output, &pipeline.components)
        .in_transform(name)?;

    let description = source.describe();
    let options = context.pipeline_options().clone();
    let env = context.execution_environment_mut();
    let mark = env.graph().len();
    let stream = match attach_with_bridge(env, name, source, options, parallelism, coders) {
        Ok(stream) => stream,
        Err(err) => {
            env.truncate_graph(mark);
            return Err(TranslateError::new(name, err.into()));
        }
    };

    tracing::debug!(
        transform = name,
        output,
        source = %description,
        mode = %context.mode(),
        parallelism,
        "translated source"
    );

    if let Err(err) = context.add_stream(output, stream) {
        context.execution_environment_mut().truncate_graph(mark);
        return Err(TranslateError::new(name, err.into()));
    }
    Ok(())
}

/// Source node, then the bridge map when the coders differ. The bridge
/// carries no uid; only the source is addressed by the transform name.
fn attach_with_bridge(
    env: &mut ExecutionEnvironment,
    name: &str,
    source: Arc<dyn BoundedSource>,
    options: Arc<PipelineOptions>,
    parallelism: usize,
    coders: CoderPair,
) -> Result<DataStream, EngineError> {
    let stream = attach_bounded_source(
        env,
        name,
        source,
        options,
        parallelism,
        coders.source_type().clone(),
    )?;

    match coders {
        CoderPair::Native(_) => Ok(stream),
        CoderPair::Bridged { native, wire } => {
            let bridge = format!("{}/into-wire", name);
            let (from, to) = (native.coder().clone(), wire.coder().clone());
            stream
                .map(env, &bridge, move |envelope| {
                    into_wire_types(&from, &to, envelope)
                })?
                .returns(env, wire)
        }
    }
}

/// Failure to translate one transform.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("failed to translate transform '{transform}': {kind}")]
pub struct TranslateError {
    /// Unique name of the offending transform.
    pub transform: String,
    pub kind: TranslateErrorKind,
}

impl TranslateError {
    pub fn new(transform: &str, kind: TranslateErrorKind) -> Self {
        Self {
            transform: transform.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranslateErrorKind {
    #[error("malformed graph: {0}")]
    MalformedGraph(String),

    #[error("cannot decode payload: {0}")]
    PayloadDecode(String),

    #[error("cannot construct source: {0}")]
    SourceConstruction(String),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("unsupported transform: {0}")]
    UnsupportedTransform(String),
}

impl From<ResolveError> for TranslateErrorKind {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::UnknownCollection(_) => Self::UnknownCollection(err.to_string()),
            ResolveError::UnsupportedCoder { .. } => Self::SourceConstruction(err.to_string()),
            ResolveError::UnknownCoder(_)
            | ResolveError::UnknownWindowingStrategy(_)
            | ResolveError::InvalidCoder { .. } => Self::MalformedGraph(err.to_string()),
        }
    }
}

impl From<ContextError> for TranslateErrorKind {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::DuplicateStream(_) => Self::MalformedGraph(err.to_string()),
            ContextError::UnknownStream(_) => Self::UnknownCollection(err.to_string()),
            ContextError::Engine(e) => e.into(),
        }
    }
}

impl From<EngineError> for TranslateErrorKind {
    fn from(err: EngineError) -> Self {
        Self::SourceConstruction(err.to_string())
    }
}

impl From<SourceError> for TranslateErrorKind {
    fn from(err: SourceError) -> Self {
        Self::SourceConstruction(err.to_string())
    }
}

impl From<PayloadError> for TranslateErrorKind {
    fn from(err: PayloadError) -> Self {
        Self::PayloadDecode(err.to_string())
    }
}

/// Attach the transform name to a module-level error.
pub(crate) trait InTransform<T> {
    fn in_transform(self, transform: &str) -> Result<T, TranslateError>;
}

impl<T, E: Into<TranslateErrorKind>> InTransform<T> for Result<T, E> {
    fn in_transform(self, transform: &str) -> Result<T, TranslateError> {
        self.map_err(|e| TranslateError::new(transform, e.into()))
    }
}
