//! CPU runtime for multi-subgraph models with control flow.
//!
//! This crate executes `weave_core::Model`s. Each subgraph gets its own
//! executor; `While` and `If` operations drive the executors of the
//! subgraphs they reference.
//!
//! # Architecture
//!
//! 1. **Tensors** - `TensorHandle`s share one buffer per operand and may
//!    turn dynamic when their shape changes at run time
//! 2. **Copy plans** - `CopyPlan`s wire one `TensorSet` into another,
//!    skipping positions nothing observes
//! 3. **Executors** - `LinearExecutor` runs a subgraph's kernels in order;
//!    the `ExecutorMap` resolves executors by subgraph index
//! 4. **Control flow** - `WhileLayer` and `IfLayer` move data between the
//!    enclosing subgraph and nested executors through copy plans
//!
//! # Example
//!
//! ```no_run
//! use weave_runtime::{RuntimeConfig, Session, Tensor};
//! # fn load() -> weave_core::Model { unimplemented!() }
//!
//! fn main() -> anyhow::Result<()> {
//!     let model = load();
//!     let session = Session::new(model, RuntimeConfig::from_env()?)?;
//!     let outputs = session.run(&[Tensor::scalar(0i32)])?;
//!     println!("{:?}", outputs[0].to_vec::<i32>()?);
//!     Ok(())
//! }
//! ```

mod config;
pub mod control_flow;
mod error;
mod executor;
mod executor_map;
mod function;
mod kernel_generator;
pub mod kernels;
mod permute;
mod session;
mod tensor;
mod tensor_set;

pub use config::{RuntimeConfig, MAX_LOOP_ITERATIONS_ENV, VALIDATE_GRAPHS_ENV};
pub use control_flow::{IfLayer, WhileLayer, WhileState};
pub use error::{Result, RuntimeError};
pub use executor::{Executor, LinearExecutor, WiredExecutor};
pub use executor_map::{borrow_executor, ExecutorMap, ExecutorMapHandle, SharedExecutor};
pub use function::Function;
pub use kernel_generator::KernelGenerator;
pub use permute::{CopyFilter, CopyPlan, OperandDescriptor};
pub use session::Session;
pub use tensor::{Element, Tensor, TensorHandle, TensorId};
pub use tensor_set::{DynAllocInfo, DynAllocInfoMap, TensorSet};
