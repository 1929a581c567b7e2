//! In-process streaming engine model.
//!
//! Translation builds a `StreamGraph` inside an `ExecutionEnvironment`:
//! source nodes fed by bounded source adapters and map nodes chained after
//! them. `DataStream` is a handle to the last node of such a chain together
//! with the record type it declares. The environment can also run a chain
//! to completion with `execute_collect`, which is what the CLI and tests use
//! to observe translated graphs.

use crate::adapter::BoundedSourceAdapter;
use crate::coder::WindowedValueCoder;
use crate::envelope::Envelope;
use crate::options::PipelineOptions;
use crate::source::{BoundedSource, SourceError};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Engine-side record type: the coder the engine uses for a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeInfo {
    coder: WindowedValueCoder,
}

impl TypeInfo {
    pub fn new(coder: WindowedValueCoder) -> Self {
        Self { coder }
    }

    pub fn coder(&self) -> &WindowedValueCoder {
        &self.coder
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.coder, f)
    }
}

/// How a source emits event-time progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkStrategy {
    /// The source never emits watermarks; its end is the only signal.
    NoWatermarks,
}

/// Per-record function of a map node.
pub type MapFn = Arc<dyn Fn(Envelope) -> Result<Envelope, EngineError> + Send + Sync>;

/// Index of a node in the stream graph.
pub type NodeId = usize;

#[derive(Clone)]
pub enum Operator {
    Source {
        adapter: BoundedSourceAdapter,
        watermarks: WatermarkStrategy,
    },
    Map {
        input: NodeId,
        function: MapFn,
    },
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Source {
                adapter,
                watermarks,
            } => f
                .debug_struct("Source")
                .field("adapter", adapter)
                .field("watermarks", watermarks)
                .finish(),
            Operator::Map { input, .. } => f.debug_struct("Map").field("input", input).finish(),
        }
    }
}

/// One operator in the graph.
#[derive(Debug, Clone)]
pub struct StreamNode {
    pub id: NodeId,
    pub name: String,
    /// Stable operator identity, if one was assigned.
    pub uid: Option<String>,
    pub parallelism: usize,
    pub type_info: TypeInfo,
    pub operator: Operator,
}

impl StreamNode {
    pub fn watermarks(&self) -> Option<WatermarkStrategy> {
        match &self.operator {
            Operator::Source { watermarks, .. } => Some(*watermarks),
            Operator::Map { .. } => None,
        }
    }

    pub fn input(&self) -> Option<NodeId> {
        match &self.operator {
            Operator::Source { .. } => None,
            Operator::Map { input, .. } => Some(*input),
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self.operator, Operator::Source { .. })
    }
}

/// Append-only operator graph.
#[derive(Debug, Clone, Default)]
pub struct StreamGraph {
    nodes: Vec<StreamNode>,
}

impl StreamGraph {
    pub fn node(&self, id: NodeId) -> Option<&StreamNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[StreamNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find_by_uid(&self, uid: &str) -> Option<&StreamNode> {
        self.nodes.iter().find(|n| n.uid.as_deref() == Some(uid))
    }

    fn push(&mut self, name: &str, parallelism: usize, type_info: TypeInfo, operator: Operator) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(StreamNode {
            id,
            name: name.to_string(),
            uid: None,
            parallelism,
            type_info,
            operator,
        });
        id
    }

    fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut StreamNode, EngineError> {
        self.nodes.get_mut(id).ok_or(EngineError::UnknownNode(id))
    }
}

/// The engine's job-level environment.
#[derive(Debug, Clone)]
pub struct ExecutionEnvironment {
    parallelism: usize,
    /// 0 when unset.
    max_parallelism: usize,
    graph: StreamGraph,
}

impl ExecutionEnvironment {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism,
            max_parallelism: 0,
            graph: StreamGraph::default(),
        }
    }

    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }

    /// Environment configured from pipeline options; the default
    /// parallelism falls back to the number of available cores.
    pub fn from_options(options: &PipelineOptions) -> Self {
        let parallelism = options.parallelism.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        Self::new(parallelism).with_max_parallelism(options.max_parallelism.unwrap_or(0))
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    pub fn graph(&self) -> &StreamGraph {
        &self.graph
    }

    /// Drop every node added after the graph had `len` nodes.
    pub(crate) fn truncate_graph(&mut self, len: usize) {
        self.graph.truncate(len);
    }

    /// Add a source node fed by `adapter`.
    ///
    /// The node runs with the adapter's parallelism hint, which must be
    /// positive.
    pub fn from_source(
        &mut self,
        adapter: BoundedSourceAdapter,
        watermarks: WatermarkStrategy,
        name: &str,
        type_info: TypeInfo,
    ) -> Result<DataStream, EngineError> {
        if name.is_empty() {
            return Err(EngineError::EmptyName);
        }
        if adapter.parallelism() == 0 {
            return Err(EngineError::InvalidParallelism(name.to_string()));
        }

        let parallelism = adapter.parallelism();
        let node = self.graph.push(
            name,
            parallelism,
            type_info.clone(),
            Operator::Source {
                adapter,
                watermarks,
            },
        );
        Ok(DataStream { node, type_info })
    }

    /// Run the chain ending at `stream` and collect its output.
    ///
    /// Splits are read by at most `parallelism` readers; the output keeps
    /// split order regardless of how many readers ran.
    pub fn execute_collect(&self, stream: &DataStream) -> Result<ExecutionResult, EngineError> {
        let start = Instant::now();
        let (adapter, chain) = self.chain(stream.node)?;

        let splits = adapter.plan_splits()?;
        let readers = adapter.parallelism().min(splits.len());
        tracing::debug!(
            source = adapter.name(),
            splits = splits.len(),
            readers,
            "reading bounded source"
        );

        let outputs = read_splits(adapter, &splits, readers, &chain)?;
        let envelopes: Vec<Envelope> = outputs.into_iter().flatten().collect();

        Ok(ExecutionResult {
            stats: ExecutionStats {
                duration: start.elapsed(),
                splits: splits.len(),
                readers,
                records: envelopes.len(),
            },
            envelopes,
        })
    }

    /// Source adapter and map functions, source first, for the chain ending
    /// at `last`.
    fn chain(&self, last: NodeId) -> Result<(&BoundedSourceAdapter, Vec<MapFn>), EngineError> {
        let mut functions = Vec::new();
        let mut current = last;
        loop {
            let node = self.graph.node(current).ok_or(EngineError::UnknownNode(current))?;
            match &node.operator {
                Operator::Source { adapter, .. } => {
                    functions.reverse();
                    return Ok((adapter, functions));
                }
                Operator::Map { input, function } => {
                    functions.push(function.clone());
                    current = *input;
                }
            }
        }
    }
}

fn run_split(
    adapter: &BoundedSourceAdapter,
    split: &dyn BoundedSource,
    chain: &[MapFn],
) -> Result<Vec<Envelope>, EngineError> {
    adapter
        .read_split(split)?
        .into_iter()
        .map(|envelope| chain.iter().try_fold(envelope, |env, f| f(env)))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn read_splits(
    adapter: &BoundedSourceAdapter,
    splits: &[Arc<dyn BoundedSource>],
    _readers: usize,
    chain: &[MapFn],
) -> Result<Vec<Vec<Envelope>>, EngineError> {
    splits
        .iter()
        .map(|split| run_split(adapter, split.as_ref(), chain))
        .collect()
}

#[cfg(feature = "parallel")]
fn read_splits(
    adapter: &BoundedSourceAdapter,
    splits: &[Arc<dyn BoundedSource>],
    readers: usize,
    chain: &[MapFn],
) -> Result<Vec<Vec<Envelope>>, EngineError> {
    use rayon::prelude::*;

    if splits.is_empty() {
        return Ok(Vec::new());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(readers)
        .build()
        .map_err(|e| EngineError::Runtime(e.to_string()))?;

    pool.install(|| {
        splits
            .par_iter()
            .map(|split| run_split(adapter, split.as_ref(), chain))
            .collect()
    })
}

/// Handle to the output of a node, plus the record type it declares.
#[derive(Debug, Clone, PartialEq)]
pub struct DataStream {
    node: NodeId,
    type_info: TypeInfo,
}

impl DataStream {
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    /// Assign a stable operator identity. Uids are unique per graph.
    pub fn uid(self, env: &mut ExecutionEnvironment, uid: &str) -> Result<Self, EngineError> {
        let taken = env
            .graph
            .find_by_uid(uid)
            .is_some_and(|other| other.id != self.node);
        if taken {
            return Err(EngineError::DuplicateUid(uid.to_string()));
        }
        env.graph.node_mut(self.node)?.uid = Some(uid.to_string());
        Ok(self)
    }

    /// Chain a per-record function after this stream.
    ///
    /// The new node inherits this stream's parallelism and type; use
    /// `returns` to declare a different output type.
    pub fn map<F, E>(
        self,
        env: &mut ExecutionEnvironment,
        name: &str,
        f: F,
    ) -> Result<Self, EngineError>
    where
        F: Fn(Envelope) -> Result<Envelope, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        if name.is_empty() {
            return Err(EngineError::EmptyName);
        }
        let parallelism = env
            .graph
            .node(self.node)
            .ok_or(EngineError::UnknownNode(self.node))?
            .parallelism;

        let operator = name.to_string();
        let function: MapFn = Arc::new(move |envelope| {
            f(envelope).map_err(|e| EngineError::Function {
                operator: operator.clone(),
                message: e.to_string(),
            })
        });

        let node = env.graph.push(
            name,
            parallelism,
            self.type_info.clone(),
            Operator::Map {
                input: self.node,
                function,
            },
        );
        Ok(DataStream {
            node,
            type_info: self.type_info,
        })
    }

    /// Declare the record type this stream produces.
    pub fn returns(
        mut self,
        env: &mut ExecutionEnvironment,
        type_info: TypeInfo,
    ) -> Result<Self, EngineError> {
        env.graph.node_mut(self.node)?.type_info = type_info.clone();
        self.type_info = type_info;
        Ok(self)
    }
}

/// Output of `execute_collect`.
#[derive(Debug)]
pub struct ExecutionResult {
    pub envelopes: Vec<Envelope>,
    pub stats: ExecutionStats,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    pub duration: Duration,
    pub splits: usize,
    /// Readers actually used: the parallelism hint clamped to the splits.
    pub readers: usize,
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("operator '{0}' must have a positive parallelism")]
    InvalidParallelism(String),

    #[error("operator name must not be empty")]
    EmptyName,

    #[error("uid '{0}' is already used by another operator")]
    DuplicateUid(String),

    #[error("no node {0} in the stream graph")]
    UnknownNode(NodeId),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("operator '{operator}' failed: {message}")]
    Function { operator: String, message: String },

    #[error("runtime error: {0}")]
    Runtime(String),
}
