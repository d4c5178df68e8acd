//! Binary arithmetic family.
//!
//! Covers: Add, Sub, Mul

use super::{broadcast_zip, check_same_dtype, combined_layout, store_output};
use crate::error::{Result, RuntimeError};
use crate::function::Function;
use crate::tensor::{Tensor, TensorHandle};
use weave_core::DataType;

/// Binary arithmetic with NumPy-style broadcasting.
///
/// Integer arithmetic wraps on overflow. `Bool` operands are rejected.
pub struct BinaryElementwiseLayer {
    name: &'static str,
    f32_fn: fn(f32, f32) -> f32,
    i32_fn: fn(i32, i32) -> i32,
    i64_fn: fn(i64, i64) -> i64,
    u8_fn: fn(u8, u8) -> u8,
    lhs: TensorHandle,
    rhs: TensorHandle,
    output: TensorHandle,
}

impl BinaryElementwiseLayer {
    pub fn add(lhs: TensorHandle, rhs: TensorHandle, output: TensorHandle) -> Self {
        Self {
            name: "Add",
            f32_fn: |a, b| a + b,
            i32_fn: i32::wrapping_add,
            i64_fn: i64::wrapping_add,
            u8_fn: u8::wrapping_add,
            lhs,
            rhs,
            output,
        }
    }

    pub fn sub(lhs: TensorHandle, rhs: TensorHandle, output: TensorHandle) -> Self {
        Self {
            name: "Sub",
            f32_fn: |a, b| a - b,
            i32_fn: i32::wrapping_sub,
            i64_fn: i64::wrapping_sub,
            u8_fn: u8::wrapping_sub,
            lhs,
            rhs,
            output,
        }
    }

    pub fn mul(lhs: TensorHandle, rhs: TensorHandle, output: TensorHandle) -> Self {
        Self {
            name: "Mul",
            f32_fn: |a, b| a * b,
            i32_fn: i32::wrapping_mul,
            i64_fn: i64::wrapping_mul,
            u8_fn: u8::wrapping_mul,
            lhs,
            rhs,
            output,
        }
    }

    fn compute(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        check_same_dtype(a, b)?;
        let layout = combined_layout(a, b)?;
        let tensor = match a.dtype() {
            DataType::F32 => {
                let (values, shape) = broadcast_zip(a, b, self.f32_fn)?;
                Tensor::from_vec(values, &shape)
            }
            DataType::I32 => {
                let (values, shape) = broadcast_zip(a, b, self.i32_fn)?;
                Tensor::from_vec(values, &shape)
            }
            DataType::I64 => {
                let (values, shape) = broadcast_zip(a, b, self.i64_fn)?;
                Tensor::from_vec(values, &shape)
            }
            DataType::U8 => {
                let (values, shape) = broadcast_zip(a, b, self.u8_fn)?;
                Tensor::from_vec(values, &shape)
            }
            dtype => {
                return Err(RuntimeError::UnsupportedDataType {
                    op: self.name,
                    dtype,
                })
            }
        };
        Ok(tensor.with_layout(layout))
    }
}

impl Function for BinaryElementwiseLayer {
    fn run(&mut self) -> Result<()> {
        let result = self
            .lhs
            .access(|a| self.rhs.access(|b| self.compute(a, b)))?;
        store_output(&self.output, result)
    }
}
