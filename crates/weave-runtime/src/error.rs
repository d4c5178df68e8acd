//! Error types for the runtime crate.

use thiserror::Error;
use weave_core::{DataType, SubgraphIndex};

/// Runtime execution errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No executor is registered for a subgraph.
    #[error("No executor registered for subgraph {0}")]
    ExecutorNotFound(SubgraphIndex),

    /// The registered executor cannot be driven through tensor wiring.
    #[error("Executor for subgraph {0} does not support tensor wiring")]
    ExecutorKind(SubgraphIndex),

    /// An executor was entered while it was already running.
    #[error("Executor for subgraph {0} is already running")]
    ExecutorBusy(SubgraphIndex),

    /// A condition subgraph did not produce a single boolean element.
    #[error("Malformed condition output: {0}")]
    MalformedCondition(String),

    /// Source, destination and descriptor sets of a copy plan differ in length.
    #[error("Copy plan size mismatch: {src} sources, {dst} destinations, {descriptors} descriptors")]
    PermuteSizeMismatch {
        src: usize,
        dst: usize,
        descriptors: usize,
    },

    /// A copy plan was run before `prepare()`.
    #[error("Copy plan was run before being prepared")]
    PlanNotPrepared,

    /// Source and destination element types differ.
    #[error("Data type mismatch: expected {expected:?}, got {actual:?}")]
    DataTypeMismatch {
        expected: DataType,
        actual: DataType,
    },

    /// A tensor needs a new shape but has no dynamic-allocation info.
    #[error("Tensor cannot change shape: {0}")]
    DynamicShapeUnsupported(String),

    /// Invalid input/output.
    #[error("Invalid input or output: {0}")]
    InvalidInputOutput(String),

    /// The configured loop iteration bound was exceeded.
    #[error("While loop exceeded {0} iterations")]
    IterationLimit(u64),

    /// Execution failed.
    #[error("Execution failed: {0}")]
    ExecutionError(String),

    /// An operation failed while its executor was running.
    #[error("Operation '{op}' failed: {source}")]
    OperationFailed {
        op: String,
        #[source]
        source: Box<RuntimeError>,
    },

    /// Invalid tensor.
    #[error("Invalid tensor: {0}")]
    TensorError(String),

    /// A kernel does not support the element type it was given.
    #[error("{op}: unsupported data type {dtype:?}")]
    UnsupportedDataType { op: &'static str, dtype: DataType },

    /// Invalid runtime configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Graph construction or validation error.
    #[error(transparent)]
    Core(#[from] weave_core::Error),
}

impl RuntimeError {
    /// The innermost error, looking through operation wrappers.
    pub fn root_cause(&self) -> &RuntimeError {
        match self {
            RuntimeError::OperationFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
