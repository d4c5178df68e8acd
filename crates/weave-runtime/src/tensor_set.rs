//! Ordered tensor sets and dynamic-allocation info.

use crate::tensor::{TensorHandle, TensorId};
use std::collections::HashMap;
use std::ops::Index;
use weave_core::OperandIndex;

/// Handles aligned positionally to a subgraph's inputs or outputs.
#[derive(Debug, Clone, Default)]
pub struct TensorSet {
    handles: Vec<TensorHandle>,
}

impl TensorSet {
    pub fn new(handles: Vec<TensorHandle>) -> Self {
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&TensorHandle> {
        self.handles.get(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TensorHandle> {
        self.handles.iter()
    }

    pub fn as_slice(&self) -> &[TensorHandle] {
        &self.handles
    }

    /// Shapes of every tensor, in order.
    pub fn shapes(&self) -> Vec<Vec<usize>> {
        self.handles.iter().map(TensorHandle::shape).collect()
    }
}

impl Index<usize> for TensorSet {
    type Output = TensorHandle;

    fn index(&self, position: usize) -> &TensorHandle {
        &self.handles[position]
    }
}

impl FromIterator<TensorHandle> for TensorSet {
    fn from_iter<I: IntoIterator<Item = TensorHandle>>(iter: I) -> Self {
        Self {
            handles: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a TensorSet {
    type Item = &'a TensorHandle;
    type IntoIter = std::slice::Iter<'a, TensorHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.handles.iter()
    }
}

/// Permission for a tensor to be reallocated at run time.
///
/// Only tensors with an entry in a `DynAllocInfoMap` may change shape; the
/// entry records which operand the buffer backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynAllocInfo {
    pub operand: OperandIndex,
}

/// Dynamic-allocation info keyed by tensor identity.
pub type DynAllocInfoMap = HashMap<TensorId, DynAllocInfo>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    #[test]
    fn test_tensor_set_order() {
        let a = TensorHandle::new(Tensor::scalar(1i32));
        let b = TensorHandle::new(Tensor::from_vec(vec![1.0f32, 2.0], &[2]));
        let set: TensorSet = [a.clone(), b.clone()].into_iter().collect();

        assert_eq!(set.len(), 2);
        assert!(set[0].same_tensor(&a));
        assert!(set.get(1).is_some_and(|h| h.same_tensor(&b)));
        assert!(set.get(2).is_none());
        assert_eq!(set.shapes(), vec![vec![], vec![2]]);
    }
}
