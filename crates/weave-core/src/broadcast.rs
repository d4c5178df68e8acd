//! Broadcasting helpers for elementwise kernels.

use crate::{Error, Result};

/// Compute the NumPy-style broadcast shape of two input shapes.
///
/// Shapes are aligned from the rightmost dimension; dimensions match when
/// they are equal or one of them is 1, and missing leading dimensions count
/// as 1.
///
/// ```text
/// broadcast_shape(&[2, 3, 4], &[3, 4])       -> [2, 3, 4]
/// broadcast_shape(&[8, 1, 6, 1], &[7, 1, 5]) -> [8, 7, 6, 5]
/// broadcast_shape(&[], &[3])                 -> [3]
/// ```
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut result = Vec::with_capacity(rank);

    for i in 0..rank {
        let da = aligned_dim(a, rank, i);
        let db = aligned_dim(b, rank, i);
        match (da, db) {
            _ if da == db => result.push(da),
            (1, _) => result.push(db),
            (_, 1) => result.push(da),
            _ => {
                return Err(Error::Shape(format!(
                    "Cannot broadcast shapes {:?} and {:?} at dimension {i}",
                    a, b
                )))
            }
        }
    }

    Ok(result)
}

fn aligned_dim(shape: &[usize], rank: usize, i: usize) -> usize {
    let offset = rank - shape.len();
    if i < offset {
        1
    } else {
        shape[i - offset]
    }
}

/// Maps flat indices of a broadcast output back to flat indices of one input.
#[derive(Debug, Clone)]
pub struct BroadcastIndexer {
    out_shape: Vec<usize>,
    /// Input strides aligned to the output rank, 0 on broadcast dimensions.
    strides: Vec<usize>,
}

impl BroadcastIndexer {
    /// Build an indexer for `input` broadcast to `output`.
    pub fn new(input: &[usize], output: &[usize]) -> Result<Self> {
        if input.len() > output.len() {
            return Err(Error::Shape(format!(
                "Cannot broadcast {:?} to lower-rank {:?}",
                input, output
            )));
        }
        let rank = output.len();
        let mut strides = vec![0; rank];
        let mut stride = 1;
        for i in (0..rank).rev() {
            let dim = aligned_dim(input, rank, i);
            if dim == output[i] {
                strides[i] = if dim == 1 { 0 } else { stride };
            } else if dim != 1 {
                return Err(Error::Shape(format!(
                    "Cannot broadcast {:?} to {:?}",
                    input, output
                )));
            }
            stride *= dim;
        }
        Ok(Self {
            out_shape: output.to_vec(),
            strides,
        })
    }

    /// Input flat index for the given output flat index.
    pub fn index(&self, mut flat: usize) -> usize {
        let mut offset = 0;
        for i in (0..self.out_shape.len()).rev() {
            let dim = self.out_shape[i];
            if dim == 0 {
                return 0;
            }
            offset += (flat % dim) * self.strides[i];
            flat /= dim;
        }
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_same_shape() {
        assert_eq!(broadcast_shape(&[2, 3], &[2, 3]).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_broadcast_complex() {
        assert_eq!(
            broadcast_shape(&[8, 1, 6, 1], &[7, 1, 5]).unwrap(),
            vec![8, 7, 6, 5]
        );
    }

    #[test]
    fn test_broadcast_scalar_rank0() {
        assert_eq!(broadcast_shape(&[], &[3]).unwrap(), vec![3]);
        assert_eq!(broadcast_shape(&[], &[]).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn test_broadcast_incompatible() {
        assert!(broadcast_shape(&[2, 3], &[2, 4]).is_err());
    }

    #[test]
    fn test_indexer_row_broadcast() {
        // [3] broadcast over [2, 3]
        let indexer = BroadcastIndexer::new(&[3], &[2, 3]).unwrap();
        let mapped: Vec<usize> = (0..6).map(|i| indexer.index(i)).collect();
        assert_eq!(mapped, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_indexer_column_broadcast() {
        // [2, 1] broadcast over [2, 3]
        let indexer = BroadcastIndexer::new(&[2, 1], &[2, 3]).unwrap();
        let mapped: Vec<usize> = (0..6).map(|i| indexer.index(i)).collect();
        assert_eq!(mapped, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_indexer_scalar() {
        let indexer = BroadcastIndexer::new(&[], &[4]).unwrap();
        assert!((0..4).all(|i| indexer.index(i) == 0));
    }
}
