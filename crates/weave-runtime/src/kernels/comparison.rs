//! Comparison family.
//!
//! Covers: Equal, Greater, Less

use super::{broadcast_zip, check_same_dtype, combined_layout, store_output};
use crate::error::Result;
use crate::function::Function;
use crate::tensor::{Tensor, TensorHandle};
use weave_core::DataType;

/// Elementwise comparison with broadcasting, producing a `Bool` tensor.
///
/// `Bool` operands compare as 0/1 bytes.
pub struct ComparisonLayer {
    f32_fn: fn(f32, f32) -> bool,
    i32_fn: fn(i32, i32) -> bool,
    i64_fn: fn(i64, i64) -> bool,
    u8_fn: fn(u8, u8) -> bool,
    lhs: TensorHandle,
    rhs: TensorHandle,
    output: TensorHandle,
}

impl ComparisonLayer {
    /// A == B
    pub fn equal(lhs: TensorHandle, rhs: TensorHandle, output: TensorHandle) -> Self {
        Self {
            f32_fn: |a, b| a == b,
            i32_fn: |a, b| a == b,
            i64_fn: |a, b| a == b,
            u8_fn: |a, b| a == b,
            lhs,
            rhs,
            output,
        }
    }

    /// A > B
    pub fn greater(lhs: TensorHandle, rhs: TensorHandle, output: TensorHandle) -> Self {
        Self {
            f32_fn: |a, b| a > b,
            i32_fn: |a, b| a > b,
            i64_fn: |a, b| a > b,
            u8_fn: |a, b| a > b,
            lhs,
            rhs,
            output,
        }
    }

    /// A < B
    pub fn less(lhs: TensorHandle, rhs: TensorHandle, output: TensorHandle) -> Self {
        Self {
            f32_fn: |a, b| a < b,
            i32_fn: |a, b| a < b,
            i64_fn: |a, b| a < b,
            u8_fn: |a, b| a < b,
            lhs,
            rhs,
            output,
        }
    }

    fn compute(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        check_same_dtype(a, b)?;
        let layout = combined_layout(a, b)?;
        let (values, shape) = match a.dtype() {
            DataType::F32 => broadcast_zip(a, b, self.f32_fn)?,
            DataType::I32 => broadcast_zip(a, b, self.i32_fn)?,
            DataType::I64 => broadcast_zip(a, b, self.i64_fn)?,
            DataType::U8 | DataType::Bool => broadcast_zip(a, b, self.u8_fn)?,
        };
        Ok(Tensor::from_bools(values, &shape).with_layout(layout))
    }
}

impl Function for ComparisonLayer {
    fn run(&mut self) -> Result<()> {
        let result = self
            .lhs
            .access(|a| self.rhs.access(|b| self.compute(a, b)))?;
        store_output(&self.output, result)
    }
}
