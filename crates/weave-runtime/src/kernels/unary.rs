//! Unary kernels.
//!
//! Covers: Erf, Logistic, LogicalNot, Identity

use super::store_output;
use crate::error::{Result, RuntimeError};
use crate::function::Function;
use crate::tensor::{Tensor, TensorHandle};
use weave_core::DataType;

/// Float-only unary math.
pub struct UnaryMathLayer {
    name: &'static str,
    f32_fn: fn(f32) -> f32,
    input: TensorHandle,
    output: TensorHandle,
}

impl UnaryMathLayer {
    /// Gauss error function.
    pub fn erf(input: TensorHandle, output: TensorHandle) -> Self {
        Self {
            name: "Erf",
            f32_fn: libm::erff,
            input,
            output,
        }
    }

    /// Sigmoid, `1 / (1 + e^-x)`.
    pub fn logistic(input: TensorHandle, output: TensorHandle) -> Self {
        Self {
            name: "Logistic",
            f32_fn: |x| 1.0 / (1.0 + libm::expf(-x)),
            input,
            output,
        }
    }

    fn compute(&self, input: &Tensor) -> Result<Tensor> {
        if input.dtype() != DataType::F32 {
            return Err(RuntimeError::UnsupportedDataType {
                op: self.name,
                dtype: input.dtype(),
            });
        }
        let values: Vec<f32> = input
            .to_vec::<f32>()?
            .into_iter()
            .map(self.f32_fn)
            .collect();
        Ok(Tensor::from_vec(values, input.shape()).with_layout(input.layout()))
    }
}

impl Function for UnaryMathLayer {
    fn run(&mut self) -> Result<()> {
        let result = self.input.access(|t| self.compute(t))?;
        store_output(&self.output, result)
    }
}

/// Boolean negation.
pub struct LogicalNotLayer {
    input: TensorHandle,
    output: TensorHandle,
}

impl LogicalNotLayer {
    pub fn new(input: TensorHandle, output: TensorHandle) -> Self {
        Self { input, output }
    }
}

impl Function for LogicalNotLayer {
    fn run(&mut self) -> Result<()> {
        let result = self.input.access(|t| {
            if t.dtype() != DataType::Bool {
                return Err(RuntimeError::UnsupportedDataType {
                    op: "LogicalNot",
                    dtype: t.dtype(),
                });
            }
            let values = t.to_bools()?.into_iter().map(|b| !b).collect();
            Ok(Tensor::from_bools(values, t.shape()).with_layout(t.layout()))
        })?;
        store_output(&self.output, result)
    }
}

/// Copies its input unchanged.
pub struct IdentityLayer {
    input: TensorHandle,
    output: TensorHandle,
}

impl IdentityLayer {
    pub fn new(input: TensorHandle, output: TensorHandle) -> Self {
        Self { input, output }
    }
}

impl Function for IdentityLayer {
    fn run(&mut self) -> Result<()> {
        let result = self.input.access(|t| Ok(t.clone()))?;
        store_output(&self.output, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn f32_handle(values: Vec<f32>) -> TensorHandle {
        let len = values.len();
        TensorHandle::new(Tensor::from_vec(values, &[len]))
    }

    #[test]
    fn test_erf_values() {
        let out = TensorHandle::new(Tensor::zeros(DataType::F32, &[3]));
        UnaryMathLayer::erf(f32_handle(vec![0.0, 1.0, -0.5]), out.clone())
            .run()
            .unwrap();
        let values = out.access(|t| t.to_vec::<f32>()).unwrap();
        assert_relative_eq!(values[0], 0.0);
        assert_relative_eq!(values[1], 0.842_700_8, epsilon = 1e-5);
        assert_relative_eq!(values[2], -0.520_499_9, epsilon = 1e-5);
    }

    #[test]
    fn test_erf_rejects_integers() {
        let mut layer = UnaryMathLayer::erf(
            TensorHandle::new(Tensor::scalar(1i32)),
            TensorHandle::new(Tensor::zeros(DataType::I32, &[])),
        );
        assert!(matches!(
            layer.run(),
            Err(RuntimeError::UnsupportedDataType {
                op: "Erf",
                dtype: DataType::I32
            })
        ));
    }

    #[test]
    fn test_logistic_values() {
        let out = TensorHandle::new(Tensor::zeros(DataType::F32, &[2]));
        UnaryMathLayer::logistic(f32_handle(vec![0.0, 2.0]), out.clone())
            .run()
            .unwrap();
        let values = out.access(|t| t.to_vec::<f32>()).unwrap();
        assert_relative_eq!(values[0], 0.5);
        assert_relative_eq!(values[1], 0.880_797_1, epsilon = 1e-6);
    }

    #[test]
    fn test_logical_not() {
        let out = TensorHandle::new(Tensor::zeros(DataType::Bool, &[2]));
        LogicalNotLayer::new(
            TensorHandle::new(Tensor::from_bools(vec![true, false], &[2])),
            out.clone(),
        )
        .run()
        .unwrap();
        assert_eq!(out.access(|t| t.to_bools()).unwrap(), vec![false, true]);
    }

    #[test]
    fn test_identity_follows_input_shape() {
        let out = TensorHandle::new(Tensor::zeros(DataType::I32, &[1]));
        IdentityLayer::new(
            TensorHandle::new(Tensor::from_vec(vec![4i32, 5], &[2])),
            out.clone(),
        )
        .run()
        .unwrap();
        assert_eq!(out.access(|t| t.to_vec::<i32>()).unwrap(), vec![4, 5]);
        assert!(out.is_dynamic());
    }
}
