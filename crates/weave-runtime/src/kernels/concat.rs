//! Concatenation along one axis.

use super::store_output;
use crate::error::{Result, RuntimeError};
use crate::function::Function;
use crate::tensor::{Tensor, TensorHandle};

/// Joins its inputs along `axis`.
///
/// Inputs must share an element type and rank, and agree on every
/// dimension except `axis`.
pub struct ConcatLayer {
    axis: usize,
    inputs: Vec<TensorHandle>,
    output: TensorHandle,
}

impl ConcatLayer {
    pub fn new(axis: usize, inputs: Vec<TensorHandle>, output: TensorHandle) -> Self {
        Self {
            axis,
            inputs,
            output,
        }
    }

    fn compute(&self, tensors: &[Tensor]) -> Result<Tensor> {
        let first = tensors
            .first()
            .ok_or_else(|| RuntimeError::InvalidInputOutput("Concat needs inputs".to_string()))?;
        let rank = first.shape().len();
        if self.axis >= rank {
            return Err(RuntimeError::TensorError(format!(
                "Concat axis {} out of range for rank {}",
                self.axis, rank
            )));
        }

        let mut shape = first.shape().to_vec();
        shape[self.axis] = 0;
        for tensor in tensors {
            if tensor.dtype() != first.dtype() {
                return Err(RuntimeError::DataTypeMismatch {
                    expected: first.dtype(),
                    actual: tensor.dtype(),
                });
            }
            let compatible = tensor.shape().len() == rank
                && tensor
                    .shape()
                    .iter()
                    .zip(first.shape())
                    .enumerate()
                    .all(|(i, (a, b))| i == self.axis || a == b)
                && (rank != 4 || tensor.layout() == first.layout());
            if !compatible {
                return Err(RuntimeError::TensorError(format!(
                    "Concat inputs {:?} and {:?} differ outside axis {}",
                    first.shape(),
                    tensor.shape(),
                    self.axis
                )));
            }
            shape[self.axis] += tensor.shape()[self.axis];
        }

        // Each input contributes one contiguous chunk per outer index.
        let outer: usize = shape[..self.axis].iter().product();
        let inner: usize = shape[self.axis + 1..].iter().product::<usize>() * first.dtype().size();
        let mut bytes = Vec::with_capacity(shape.iter().product::<usize>() * first.dtype().size());
        for o in 0..outer {
            for tensor in tensors {
                let chunk = tensor.shape()[self.axis] * inner;
                bytes.extend_from_slice(&tensor.as_bytes()[o * chunk..(o + 1) * chunk]);
            }
        }

        Ok(Tensor::from_raw(bytes, &shape, first.dtype())?.with_layout(first.layout()))
    }
}

impl Function for ConcatLayer {
    fn run(&mut self) -> Result<()> {
        let tensors = self
            .inputs
            .iter()
            .map(|h| h.access(|t| Ok(t.clone())))
            .collect::<Result<Vec<_>>>()?;
        let result = self.compute(&tensors)?;
        store_output(&self.output, result)
    }
}
