//! Core intermediate representation and shared types for weave.
//!
//! This crate provides the abstractions the runtime consumes:
//! - Subgraph IR (`Graph`, `Operand`, `Operation`) with use/def tracking
//! - Multi-subgraph models (`Model`) addressed by `SubgraphIndex`
//! - Element types, layouts and constant tensor values
//! - A `GraphBuilder` for assembling subgraphs in code
//! - NumPy-style broadcasting helpers

pub mod broadcast;
pub mod builder;
pub mod ir;
pub mod types;

pub use broadcast::{broadcast_shape, BroadcastIndexer};
pub use builder::GraphBuilder;
pub use ir::{
    Graph, Model, OpKind, Operand, OperandIndex, Operation, OperationIndex, SubgraphIndex,
};
pub use types::{DataType, Layout, OperandInfo, TensorData, TensorValue};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for graph construction and validation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Operand {0} not found")]
    OperandNotFound(OperandIndex),

    #[error("Operation {0} not found")]
    OperationNotFound(OperationIndex),

    #[error("Subgraph {0} not found")]
    SubgraphNotFound(SubgraphIndex),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Data error: {0}")]
    Data(String),
}
