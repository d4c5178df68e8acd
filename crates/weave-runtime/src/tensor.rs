//! Runtime tensors and shared tensor handles.

use crate::error::{Result, RuntimeError};
use bytemuck::Pod;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use weave_core::{DataType, Layout, OperandInfo, TensorData, TensorValue};

/// Rust element types with a runtime `DataType`.
///
/// `Bool` tensors are stored one byte per element and are read and written
/// through [`Tensor::from_bools`] and [`Tensor::to_bools`].
pub trait Element: Pod {
    const DTYPE: DataType;
}

impl Element for f32 {
    const DTYPE: DataType = DataType::F32;
}

impl Element for i32 {
    const DTYPE: DataType = DataType::I32;
}

impl Element for i64 {
    const DTYPE: DataType = DataType::I64;
}

impl Element for u8 {
    const DTYPE: DataType = DataType::U8;
}

/// A CPU tensor: raw little-endian bytes plus shape, element type and layout.
///
/// A tensor is *static* until something changes its shape at run time, after
/// which it is *dynamic*. The transition is one-way.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<u8>,
    shape: Vec<usize>,
    dtype: DataType,
    layout: Layout,
    dynamic: bool,
}

impl Tensor {
    /// Create a tensor from a vector with a given shape.
    ///
    /// # Panics
    /// Panics if the data length doesn't match the shape.
    ///
    /// # Example
    /// ```
    /// # use weave_runtime::Tensor;
    /// let tensor = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]);
    /// assert_eq!(tensor.shape(), &[2, 2]);
    /// ```
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Self {
        let expected_len: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_len,
            "Data length {} doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_len
        );

        Self {
            data: bytemuck::cast_slice(&data).to_vec(),
            shape: shape.to_vec(),
            dtype: T::DTYPE,
            layout: Layout::default(),
            dynamic: false,
        }
    }

    /// Create a boolean tensor.
    ///
    /// # Panics
    /// Panics if the data length doesn't match the shape.
    pub fn from_bools(data: Vec<bool>, shape: &[usize]) -> Self {
        let expected_len: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_len,
            "Data length {} doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_len
        );

        Self {
            data: data.into_iter().map(u8::from).collect(),
            shape: shape.to_vec(),
            dtype: DataType::Bool,
            layout: Layout::default(),
            dynamic: false,
        }
    }

    /// Create a rank-0 tensor.
    pub fn scalar<T: Element>(value: T) -> Self {
        Self::from_vec(vec![value], &[])
    }

    /// Create a zero-filled tensor.
    pub fn zeros(dtype: DataType, shape: &[usize]) -> Self {
        let len: usize = shape.iter().product();
        Self {
            data: vec![0; len * dtype.size()],
            shape: shape.to_vec(),
            dtype,
            layout: Layout::default(),
            dynamic: false,
        }
    }

    /// Create a zero-filled tensor matching declared operand info.
    pub fn from_info(info: &OperandInfo) -> Self {
        Self::zeros(info.dtype, &info.shape).with_layout(info.layout)
    }

    /// Create a tensor holding a constant value.
    pub fn from_value(value: &TensorValue) -> Self {
        Self {
            data: value.to_bytes(),
            shape: value.shape.clone(),
            dtype: value.dtype(),
            layout: Layout::default(),
            dynamic: false,
        }
    }

    /// Create a tensor from raw little-endian bytes.
    pub fn from_raw(data: Vec<u8>, shape: &[usize], dtype: DataType) -> Result<Self> {
        let expected: usize = shape.iter().product::<usize>() * dtype.size();
        if data.len() != expected {
            return Err(RuntimeError::TensorError(format!(
                "{} bytes cannot hold a {:?} tensor of shape {:?} ({} bytes)",
                data.len(),
                dtype,
                shape,
                expected
            )));
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
            dtype,
            layout: Layout::default(),
            dynamic: false,
        })
    }

    /// Override the layout.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Get a slice view of the tensor data.
    ///
    /// # Errors
    /// Returns an error if `T` doesn't match the element type.
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        self.check_element::<T>()?;
        if self.data.is_empty() {
            return Ok(&[]);
        }
        bytemuck::try_cast_slice(&self.data)
            .map_err(|e| RuntimeError::TensorError(format!("Cannot view tensor data: {e}")))
    }

    /// Convert tensor to a Vec.
    ///
    /// # Errors
    /// Returns an error if `T` doesn't match the element type.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_element::<T>()?;
        Ok(self
            .data
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Read a boolean tensor.
    pub fn to_bools(&self) -> Result<Vec<bool>> {
        if self.dtype != DataType::Bool {
            return Err(RuntimeError::DataTypeMismatch {
                expected: DataType::Bool,
                actual: self.dtype,
            });
        }
        Ok(self.data.iter().map(|&b| b != 0).collect())
    }

    /// Convert to a constant value.
    pub fn to_value(&self) -> Result<TensorValue> {
        let value = TensorValue::from_bytes(&self.data, self.dtype, &self.shape)?;
        Ok(value)
    }

    /// Typed element data.
    pub fn data(&self) -> Result<TensorData> {
        Ok(self.to_value()?.data)
    }

    fn check_element<T: Element>(&self) -> Result<()> {
        // Bool storage may be viewed as bytes.
        let compatible =
            T::DTYPE == self.dtype || (T::DTYPE == DataType::U8 && self.dtype == DataType::Bool);
        if compatible {
            Ok(())
        } else {
            Err(RuntimeError::DataTypeMismatch {
                expected: self.dtype,
                actual: T::DTYPE,
            })
        }
    }

    /// Raw bytes of the tensor data.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Replace the buffer with a zero-filled one of the given shape.
    pub fn reallocate(&mut self, shape: &[usize]) {
        let len: usize = shape.iter().product();
        self.data = vec![0; len * self.dtype.size()];
        self.shape = shape.to_vec();
    }

    /// Get the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Shape this tensor's data takes when stored in `layout`.
    ///
    /// Only rank-4 shapes are permuted between NHWC and NCHW.
    pub fn shape_in_layout(&self, layout: Layout) -> Vec<usize> {
        permute_shape(&self.shape, self.layout, layout)
    }

    /// Get the data type of the tensor.
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Get the total number of elements in the tensor.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Check if the tensor is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Mark the tensor dynamic. There is no way back.
    pub fn set_dynamic(&mut self) {
        self.dynamic = true;
    }
}

/// Permute a rank-4 shape between layouts; other ranks are returned as-is.
pub(crate) fn permute_shape(shape: &[usize], from: Layout, to: Layout) -> Vec<usize> {
    match (shape, from, to) {
        (&[n, h, w, c], Layout::Nhwc, Layout::Nchw) => vec![n, c, h, w],
        (&[n, c, h, w], Layout::Nchw, Layout::Nhwc) => vec![n, h, w, c],
        _ => shape.to_vec(),
    }
}

// ──────────────────────────────── Handles ────────────────────────────────

/// Process-unique identity of a tensor handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u64);

impl TensorId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        TensorId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Shared handle to a runtime tensor.
///
/// Handles are cheap to clone and all clones refer to the same buffer.
/// They are `!Send`, so a tensor is only ever touched by one thread.
#[derive(Clone)]
pub struct TensorHandle {
    id: TensorId,
    inner: Rc<RefCell<Tensor>>,
}

impl TensorHandle {
    pub fn new(tensor: Tensor) -> Self {
        Self {
            id: TensorId::next(),
            inner: Rc::new(RefCell::new(tensor)),
        }
    }

    pub fn id(&self) -> TensorId {
        self.id
    }

    /// Whether both handles refer to the same tensor.
    pub fn same_tensor(&self, other: &TensorHandle) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `f` with shared access to the tensor.
    pub fn access<R>(&self, f: impl FnOnce(&Tensor) -> Result<R>) -> Result<R> {
        let tensor = self.inner.try_borrow().map_err(|_| {
            RuntimeError::TensorError(format!("Tensor {} is being written", self.id))
        })?;
        f(&tensor)
    }

    /// Run `f` with exclusive access to the tensor.
    pub fn access_mut<R>(&self, f: impl FnOnce(&mut Tensor) -> Result<R>) -> Result<R> {
        let mut tensor = self.inner.try_borrow_mut().map_err(|_| {
            RuntimeError::TensorError(format!("Tensor {} is already borrowed", self.id))
        })?;
        f(&mut tensor)
    }

    pub fn shape(&self) -> Vec<usize> {
        self.inner.borrow().shape.clone()
    }

    pub fn dtype(&self) -> DataType {
        self.inner.borrow().dtype
    }

    pub fn layout(&self) -> Layout {
        self.inner.borrow().layout
    }

    pub fn is_dynamic(&self) -> bool {
        self.inner.borrow().dynamic
    }

    /// Mark the tensor dynamic. There is no way back.
    pub fn set_dynamic(&self) {
        self.inner.borrow_mut().set_dynamic();
    }

    /// Copy the current tensor out of the handle.
    pub fn snapshot(&self) -> Tensor {
        self.inner.borrow().clone()
    }
}

impl fmt::Debug for TensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(t) => f
                .debug_struct("TensorHandle")
                .field("id", &self.id)
                .field("dtype", &t.dtype)
                .field("shape", &t.shape)
                .field("dynamic", &t.dynamic)
                .finish(),
            Err(_) => f
                .debug_struct("TensorHandle")
                .field("id", &self.id)
                .finish_non_exhaustive(),
        }
    }
}
