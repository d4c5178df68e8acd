//! Core types for element types, layouts, operand metadata and constant values.

use crate::{Error, Result};

/// Element data type of an operand or tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    I32,
    I64,
    U8,
    /// One byte per element, 0 is false and anything else is true.
    Bool,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::I64 => 8,
            DataType::U8 | DataType::Bool => 1,
        }
    }
}

/// Memory layout of a rank-4 tensor.
///
/// Tensors of any other rank ignore the layout; copying between two
/// rank-4 tensors with different layouts permutes the element order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Layout {
    #[default]
    Nhwc,
    Nchw,
}

/// Declared type information of an operand.
///
/// The shape is the one assumed at graph construction time. Runtime tensors
/// start with this shape and may diverge from it once they become dynamic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandInfo {
    pub dtype: DataType,
    pub shape: Vec<usize>,
    pub layout: Layout,
}

impl OperandInfo {
    /// Create operand info with the default layout.
    pub fn new(dtype: DataType, shape: &[usize]) -> Self {
        Self {
            dtype,
            shape: shape.to_vec(),
            layout: Layout::default(),
        }
    }

    /// Create operand info for a rank-0 tensor.
    pub fn scalar(dtype: DataType) -> Self {
        Self::new(dtype, &[])
    }

    /// Override the layout.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Number of elements implied by the declared shape.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size in bytes implied by the declared shape.
    pub fn size_bytes(&self) -> usize {
        self.num_elements() * self.dtype.size()
    }
}

/// Raw constant data, one variant per element type.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    Bool(Vec<bool>),
}

impl TensorData {
    /// Get the number of elements.
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::U8(v) => v.len(),
            TensorData::Bool(v) => v.len(),
        }
    }

    /// Check if there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type of this data.
    pub fn dtype(&self) -> DataType {
        match self {
            TensorData::F32(_) => DataType::F32,
            TensorData::I32(_) => DataType::I32,
            TensorData::I64(_) => DataType::I64,
            TensorData::U8(_) => DataType::U8,
            TensorData::Bool(_) => DataType::Bool,
        }
    }
}

/// A constant tensor attached to an operand (weights, loop bounds, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct TensorValue {
    pub data: TensorData,
    pub shape: Vec<usize>,
}

impl TensorValue {
    /// Create a value, checking that the data length matches the shape.
    pub fn new(data: TensorData, shape: Vec<usize>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(Error::Shape(format!(
                "Data length {} doesn't match shape {:?} (product = {})",
                data.len(),
                shape,
                expected
            )));
        }
        Ok(Self { data, shape })
    }

    /// Create a rank-0 value holding a single element.
    pub fn scalar(data: TensorData) -> Result<Self> {
        Self::new(data, vec![])
    }

    /// Element type of this value.
    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    /// Operand info describing this value.
    pub fn info(&self) -> OperandInfo {
        OperandInfo::new(self.dtype(), &self.shape)
    }

    /// Serialize to little-endian bytes, the runtime's buffer format.
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.data {
            TensorData::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::I32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::I64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::U8(v) => v.clone(),
            TensorData::Bool(v) => v.iter().map(|&b| b as u8).collect(),
        }
    }

    /// Parse a value from little-endian bytes.
    pub fn from_bytes(bytes: &[u8], dtype: DataType, shape: &[usize]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if bytes.len() != numel * dtype.size() {
            return Err(Error::Data(format!(
                "Invalid byte length for {:?} tensor: expected {}, got {}",
                dtype,
                numel * dtype.size(),
                bytes.len()
            )));
        }

        let data = match dtype {
            DataType::F32 => TensorData::F32(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DataType::I32 => TensorData::I32(
                bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DataType::I64 => TensorData::I64(
                bytes
                    .chunks_exact(8)
                    .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
            DataType::U8 => TensorData::U8(bytes.to_vec()),
            DataType::Bool => TensorData::Bool(bytes.iter().map(|&b| b != 0).collect()),
        };

        Self::new(data, shape.to_vec())
    }
}
