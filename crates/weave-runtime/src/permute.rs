//! Copy plans wiring one tensor set into another.
//!
//! A `CopyPlan` pairs a source set with a destination set position by
//! position, keeping only the positions its `CopyFilter` accepts. Plans are
//! built and prepared once, then run any number of times.
//!
//! Running a plan copies each kept source into its destination. When the
//! shapes disagree the destination is reallocated to the source shape and
//! marked dynamic, which requires dynamic-allocation info for it. Rank-4
//! tensors stored in different layouts are permuted element by element.

use crate::error::{Result, RuntimeError};
use crate::tensor::{permute_shape, Tensor, TensorHandle};
use crate::tensor_set::{DynAllocInfoMap, TensorSet};
use weave_core::{Graph, Layout, OperandIndex};

/// Usage facts about the operand behind one destination position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandDescriptor {
    /// Number of operations consuming the operand.
    pub uses: usize,
    /// Whether the operand is an output of its graph.
    pub is_graph_output: bool,
}

impl OperandDescriptor {
    /// Describe an operand of `graph`.
    pub fn of(graph: &Graph, index: OperandIndex) -> Result<Self> {
        Ok(Self {
            uses: graph.operand(index)?.use_count(),
            is_graph_output: graph.is_output(index),
        })
    }

    /// Describe each operand in `indices`, in order.
    pub fn of_all(graph: &Graph, indices: &[OperandIndex]) -> Result<Vec<Self>> {
        indices.iter().map(|&i| Self::of(graph, i)).collect()
    }
}

/// Which positions of a wiring are copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyFilter {
    /// Every position.
    All,
    /// Positions whose operand is consumed.
    Used,
    /// Positions whose operand is consumed or externally observable.
    UsedOrGraphOutput,
    /// Positions whose operand is consumed but not a graph output.
    UsedExceptGraphOutput,
}

impl CopyFilter {
    pub fn keeps(&self, descriptor: &OperandDescriptor) -> bool {
        match self {
            CopyFilter::All => true,
            CopyFilter::Used => descriptor.uses > 0,
            CopyFilter::UsedOrGraphOutput => descriptor.uses > 0 || descriptor.is_graph_output,
            CopyFilter::UsedExceptGraphOutput => {
                descriptor.uses > 0 && !descriptor.is_graph_output
            }
        }
    }
}

/// A precomputed, filtered wiring between two tensor sets.
#[derive(Debug)]
pub struct CopyPlan {
    src: Vec<TensorHandle>,
    dst: Vec<TensorHandle>,
    dst_dyn_alloc: DynAllocInfoMap,
    pairs: Option<Vec<(TensorHandle, TensorHandle)>>,
}

impl CopyPlan {
    /// Build a plan wiring `src` into `dst`.
    ///
    /// `descriptors` describe the destination operands and select, through
    /// `filter`, which positions are kept.
    ///
    /// # Errors
    ///
    /// Returns `PermuteSizeMismatch` if the three sequences differ in length.
    pub fn new(
        src: &TensorSet,
        dst: &TensorSet,
        descriptors: &[OperandDescriptor],
        filter: CopyFilter,
        dst_dyn_alloc: DynAllocInfoMap,
    ) -> Result<Self> {
        if src.len() != dst.len() || dst.len() != descriptors.len() {
            return Err(RuntimeError::PermuteSizeMismatch {
                src: src.len(),
                dst: dst.len(),
                descriptors: descriptors.len(),
            });
        }

        let (src, dst) = src
            .iter()
            .zip(dst.iter())
            .zip(descriptors)
            .filter(|(_, descriptor)| filter.keeps(descriptor))
            .map(|((s, d), _)| (s.clone(), d.clone()))
            .unzip();

        Ok(Self {
            src,
            dst,
            dst_dyn_alloc,
            pairs: None,
        })
    }

    /// Fix the pairing. Self-copies are dropped. Calling this again is a no-op.
    pub fn prepare(&mut self) {
        if self.pairs.is_some() {
            return;
        }
        let pairs: Vec<_> = self
            .src
            .iter()
            .zip(&self.dst)
            .filter(|(s, d)| !s.same_tensor(d))
            .map(|(s, d)| (s.clone(), d.clone()))
            .collect();
        tracing::debug!(
            kept = pairs.len(),
            filtered = self.src.len(),
            "Prepared copy plan"
        );
        self.pairs = Some(pairs);
    }

    pub fn is_prepared(&self) -> bool {
        self.pairs.is_some()
    }

    /// The prepared (source, destination) pairs.
    pub fn pairs(&self) -> Result<&[(TensorHandle, TensorHandle)]> {
        self.pairs.as_deref().ok_or(RuntimeError::PlanNotPrepared)
    }

    /// Copy every prepared pair.
    pub fn run(&self) -> Result<()> {
        for (src, dst) in self.pairs()? {
            let may_reallocate = self.dst_dyn_alloc.contains_key(&dst.id());
            src.access(|s| dst.access_mut(|d| copy_tensor(s, d, may_reallocate)))?;
        }
        Ok(())
    }
}

/// Copy `src` into `dst`, reallocating `dst` when the shapes disagree.
fn copy_tensor(src: &Tensor, dst: &mut Tensor, may_reallocate: bool) -> Result<()> {
    if src.dtype() != dst.dtype() {
        return Err(RuntimeError::DataTypeMismatch {
            expected: dst.dtype(),
            actual: src.dtype(),
        });
    }

    let target_shape = src.shape_in_layout(dst.layout());
    if src.is_dynamic() || dst.is_dynamic() || target_shape != dst.shape() {
        if !may_reallocate {
            return Err(RuntimeError::DynamicShapeUnsupported(format!(
                "destination of shape {:?} cannot take source of shape {:?}",
                dst.shape(),
                target_shape
            )));
        }
        if target_shape != dst.shape() {
            tracing::debug!(from = ?dst.shape(), to = ?target_shape, "Reallocating tensor");
        }
        dst.reallocate(&target_shape);
        dst.set_dynamic();
    }

    write_in_layout(src, dst);
    Ok(())
}

/// Write `src` into `dst`, whose shape already matches `src` seen in
/// `dst`'s layout.
pub(crate) fn write_in_layout(src: &Tensor, dst: &mut Tensor) {
    if permutes(src, dst.layout()) {
        permute_into(src, dst);
    } else {
        dst.as_bytes_mut().copy_from_slice(src.as_bytes());
    }
}

fn permutes(src: &Tensor, dst_layout: Layout) -> bool {
    src.shape().len() == 4 && src.layout() != dst_layout
}

/// Copy a rank-4 tensor into a destination of the other layout.
fn permute_into(src: &Tensor, dst: &mut Tensor) {
    let elem = src.dtype().size();
    let shape = src.shape();
    let dst_shape = permute_shape(shape, src.layout(), dst.layout());
    let src_bytes = src.as_bytes();
    let dst_bytes = dst.as_bytes_mut();

    // Source strides, in elements, for each destination axis.
    let src_strides = strides(shape);
    let axis_map: [usize; 4] = match src.layout() {
        // dst NCHW axis -> src NHWC axis
        Layout::Nhwc => [0, 3, 1, 2],
        // dst NHWC axis -> src NCHW axis
        Layout::Nchw => [0, 2, 3, 1],
    };

    let mut offset = 0;
    for a in 0..dst_shape[0] {
        for b in 0..dst_shape[1] {
            for c in 0..dst_shape[2] {
                for d in 0..dst_shape[3] {
                    let coords = [a, b, c, d];
                    let src_index: usize = (0..4)
                        .map(|axis| coords[axis] * src_strides[axis_map[axis]])
                        .sum();
                    dst_bytes[offset * elem..(offset + 1) * elem]
                        .copy_from_slice(&src_bytes[src_index * elem..(src_index + 1) * elem]);
                    offset += 1;
                }
            }
        }
    }
}

fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}
