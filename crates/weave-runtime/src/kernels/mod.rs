//! Reference CPU kernels.
//!
//! Kernels read their inputs' actual shapes on every run, so shapes flow
//! through a subgraph at run time. When a result's shape differs from the
//! output tensor's, the output is reallocated and marked dynamic.

mod binary_elementwise;
mod comparison;
mod concat;
mod unary;

pub use binary_elementwise::BinaryElementwiseLayer;
pub use comparison::ComparisonLayer;
pub use concat::ConcatLayer;
pub use unary::{IdentityLayer, LogicalNotLayer, UnaryMathLayer};

use crate::error::{Result, RuntimeError};
use crate::permute::write_in_layout;
use crate::tensor::{Element, Tensor, TensorHandle};
use weave_core::{broadcast_shape, BroadcastIndexer, Layout};

/// Write `result` into `output`, reallocating it if the shape changed.
///
/// Shapes are compared in the output's layout, and rank-4 results of the
/// other layout are permuted on the way in.
pub(crate) fn store_output(output: &TensorHandle, result: Tensor) -> Result<()> {
    output.access_mut(|out| {
        if out.dtype() != result.dtype() {
            return Err(RuntimeError::DataTypeMismatch {
                expected: out.dtype(),
                actual: result.dtype(),
            });
        }
        let shape = result.shape_in_layout(out.layout());
        if out.shape() != shape.as_slice() {
            tracing::debug!(
                from = ?out.shape(),
                to = ?shape,
                "Reallocating kernel output"
            );
            out.reallocate(&shape);
            out.set_dynamic();
        }
        write_in_layout(&result, out);
        Ok(())
    })
}

/// Layout of a result computed elementwise from `a` and `b`.
///
/// The higher-rank operand decides. Two rank-4 operands must agree, since
/// their raw element orders cannot be zipped otherwise.
pub(crate) fn combined_layout(a: &Tensor, b: &Tensor) -> Result<Layout> {
    match (a.shape().len(), b.shape().len()) {
        (4, 4) if a.layout() != b.layout() => Err(RuntimeError::TensorError(format!(
            "Cannot combine {:?} and {:?} operands",
            a.layout(),
            b.layout()
        ))),
        (ra, rb) if rb > ra => Ok(b.layout()),
        _ => Ok(a.layout()),
    }
}

/// Apply `f` pairwise over `a` and `b` broadcast to a common shape.
pub(crate) fn broadcast_zip<T: Element, U>(
    a: &Tensor,
    b: &Tensor,
    f: impl Fn(T, T) -> U,
) -> Result<(Vec<U>, Vec<usize>)> {
    let shape = broadcast_shape(a.shape(), b.shape())?;
    let ia = BroadcastIndexer::new(a.shape(), &shape)?;
    let ib = BroadcastIndexer::new(b.shape(), &shape)?;
    let av = a.to_vec::<T>()?;
    let bv = b.to_vec::<T>()?;
    let len: usize = shape.iter().product();

    let values = (0..len)
        .map(|i| f(av[ia.index(i)], bv[ib.index(i)]))
        .collect();
    Ok((values, shape))
}

/// Fail unless both operands share an element type.
pub(crate) fn check_same_dtype(a: &Tensor, b: &Tensor) -> Result<()> {
    if a.dtype() == b.dtype() {
        Ok(())
    } else {
        Err(RuntimeError::DataTypeMismatch {
            expected: a.dtype(),
            actual: b.dtype(),
        })
    }
}
