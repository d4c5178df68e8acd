//! The unit of work an executor dispatches.

use crate::error::Result;

/// A runnable operation bound to its input and output tensors.
///
/// Functions are generated once when an executor is built and run every time
/// the executor runs. Control-flow layers and CPU kernels both implement it.
pub trait Function {
    fn run(&mut self) -> Result<()>;
}
