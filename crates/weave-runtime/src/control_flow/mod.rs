//! Control-flow layers driving nested subgraph executors.

mod if_layer;
mod while_layer;

pub use if_layer::IfLayer;
pub use while_layer::{WhileLayer, WhileState};

use crate::error::{Result, RuntimeError};
use crate::permute::{CopyFilter, OperandDescriptor};
use crate::tensor::TensorHandle;
use crate::tensor_set::TensorSet;
use weave_core::DataType;

/// Read a condition: exactly one tensor holding one `Bool` element.
pub(crate) fn read_condition(tensors: &[TensorHandle]) -> Result<bool> {
    let [tensor] = tensors else {
        return Err(RuntimeError::MalformedCondition(format!(
            "expected one tensor, got {}",
            tensors.len()
        )));
    };
    tensor.access(|t| {
        if t.dtype() != DataType::Bool {
            return Err(RuntimeError::MalformedCondition(format!(
                "expected Bool, got {:?}",
                t.dtype()
            )));
        }
        if t.len() != 1 {
            return Err(RuntimeError::MalformedCondition(format!(
                "expected one element, got shape {:?}",
                t.shape()
            )));
        }
        Ok(t.as_bytes()[0] != 0)
    })
}

/// Mark each observable output dynamic when its incoming source has a
/// different shape.
pub(crate) fn mark_outputs_dynamic(
    sources: &TensorSet,
    outputs: &TensorSet,
    descriptors: &[OperandDescriptor],
) -> Result<()> {
    for ((source, output), descriptor) in sources.iter().zip(outputs).zip(descriptors) {
        if !CopyFilter::UsedOrGraphOutput.keeps(descriptor) || source.same_tensor(output) {
            continue;
        }
        let incoming = source.access(|t| Ok(t.shape_in_layout(output.layout())))?;
        if incoming != output.shape() {
            output.set_dynamic();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    #[test]
    fn test_read_condition() {
        let yes = TensorHandle::new(Tensor::from_bools(vec![true], &[]));
        let no = TensorHandle::new(Tensor::from_bools(vec![false], &[1]));
        assert!(read_condition(&[yes]).unwrap());
        assert!(!read_condition(&[no]).unwrap());
    }

    #[test]
    fn test_read_condition_malformed() {
        let int = TensorHandle::new(Tensor::scalar(1i32));
        let pair = TensorHandle::new(Tensor::from_bools(vec![true, true], &[2]));
        let one = TensorHandle::new(Tensor::from_bools(vec![true], &[]));

        for tensors in [vec![int], vec![pair], vec![], vec![one.clone(), one]] {
            assert!(matches!(
                read_condition(&tensors),
                Err(RuntimeError::MalformedCondition(_))
            ));
        }
    }

    #[test]
    fn test_mark_outputs_dynamic_skips_unobservable() {
        let source = TensorSet::new(vec![
            TensorHandle::new(Tensor::zeros(DataType::F32, &[4])),
            TensorHandle::new(Tensor::zeros(DataType::F32, &[4])),
            TensorHandle::new(Tensor::zeros(DataType::F32, &[1])),
        ]);
        let outputs = TensorSet::new(vec![
            TensorHandle::new(Tensor::zeros(DataType::F32, &[1])),
            TensorHandle::new(Tensor::zeros(DataType::F32, &[1])),
            TensorHandle::new(Tensor::zeros(DataType::F32, &[1])),
        ]);
        let descriptors = [
            OperandDescriptor {
                uses: 1,
                is_graph_output: false,
            },
            OperandDescriptor {
                uses: 0,
                is_graph_output: false,
            },
            OperandDescriptor {
                uses: 0,
                is_graph_output: true,
            },
        ];
        mark_outputs_dynamic(&source, &outputs, &descriptors).unwrap();

        assert!(outputs[0].is_dynamic());
        assert!(!outputs[1].is_dynamic());
        assert!(!outputs[2].is_dynamic());
    }
}
