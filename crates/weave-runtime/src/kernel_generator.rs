//! Builds the `Function` that runs each operation.

use crate::config::RuntimeConfig;
use crate::control_flow::{IfLayer, WhileLayer};
use crate::error::{Result, RuntimeError};
use crate::executor_map::ExecutorMapHandle;
use crate::function::Function;
use crate::kernels::{
    BinaryElementwiseLayer, ComparisonLayer, ConcatLayer, IdentityLayer, LogicalNotLayer,
    UnaryMathLayer,
};
use crate::permute::OperandDescriptor;
use crate::tensor::TensorHandle;
use crate::tensor_set::{DynAllocInfoMap, TensorSet};
use weave_core::{Graph, OpKind, OperandIndex, Operation};

/// Generates functions for the operations of one subgraph.
///
/// Control-flow operations are bound to a handle on the executor map and
/// resolve their nested executors when they run.
pub struct KernelGenerator {
    executors: ExecutorMapHandle,
    config: RuntimeConfig,
}

impl KernelGenerator {
    pub fn new(executors: ExecutorMapHandle, config: RuntimeConfig) -> Self {
        Self { executors, config }
    }

    /// Build the function for `op`.
    ///
    /// `tensors` holds one handle per operand of `graph`; `dyn_alloc` lists
    /// the handles that may be reallocated.
    pub fn generate(
        &self,
        graph: &Graph,
        op: &Operation,
        tensors: &[TensorHandle],
        dyn_alloc: &DynAllocInfoMap,
    ) -> Result<Box<dyn Function>> {
        let tensor = |index: OperandIndex| {
            tensors.get(index.index()).cloned().ok_or_else(|| {
                RuntimeError::InvalidInputOutput(format!(
                    "No tensor for operand {index} of '{}'",
                    op.name
                ))
            })
        };
        let slot = |indices: &[OperandIndex], i: usize| {
            indices.get(i).copied().ok_or_else(|| {
                RuntimeError::InvalidInputOutput(format!(
                    "{} operation '{}' is missing operand slot {i}",
                    op.kind.name(),
                    op.name
                ))
            })
        };
        let input = |i: usize| slot(&op.inputs, i).and_then(&tensor);
        let output = || slot(&op.outputs, 0).and_then(&tensor);

        let function: Box<dyn Function> = match op.kind {
            OpKind::Add => Box::new(BinaryElementwiseLayer::add(input(0)?, input(1)?, output()?)),
            OpKind::Sub => Box::new(BinaryElementwiseLayer::sub(input(0)?, input(1)?, output()?)),
            OpKind::Mul => Box::new(BinaryElementwiseLayer::mul(input(0)?, input(1)?, output()?)),
            OpKind::Less => Box::new(ComparisonLayer::less(input(0)?, input(1)?, output()?)),
            OpKind::Greater => Box::new(ComparisonLayer::greater(input(0)?, input(1)?, output()?)),
            OpKind::Equal => Box::new(ComparisonLayer::equal(input(0)?, input(1)?, output()?)),
            OpKind::LogicalNot => Box::new(LogicalNotLayer::new(input(0)?, output()?)),
            OpKind::Erf => Box::new(UnaryMathLayer::erf(input(0)?, output()?)),
            OpKind::Logistic => Box::new(UnaryMathLayer::logistic(input(0)?, output()?)),
            OpKind::Identity => Box::new(IdentityLayer::new(input(0)?, output()?)),
            OpKind::Concat { axis } => {
                let inputs = op
                    .inputs
                    .iter()
                    .map(|&i| tensor(i))
                    .collect::<Result<Vec<_>>>()?;
                Box::new(ConcatLayer::new(axis, inputs, output()?))
            }
            OpKind::While { cond, body } => {
                let (inputs, outputs, descriptors, outputs_dyn_alloc) =
                    self.control_flow_wiring(graph, op, &tensor, dyn_alloc)?;
                Box::new(
                    WhileLayer::new(
                        cond,
                        body,
                        inputs,
                        outputs,
                        descriptors,
                        outputs_dyn_alloc,
                        self.executors.clone(),
                    )
                    .with_max_iterations(self.config.max_loop_iterations),
                )
            }
            OpKind::If {
                then_branch,
                else_branch,
            } => {
                let (inputs, outputs, descriptors, outputs_dyn_alloc) =
                    self.control_flow_wiring(graph, op, &tensor, dyn_alloc)?;
                Box::new(IfLayer::new(
                    then_branch,
                    else_branch,
                    inputs,
                    outputs,
                    descriptors,
                    outputs_dyn_alloc,
                    self.executors.clone(),
                ))
            }
        };
        Ok(function)
    }

    /// Tensor sets, output descriptors and output dyn-alloc info for a
    /// control-flow operation.
    fn control_flow_wiring(
        &self,
        graph: &Graph,
        op: &Operation,
        tensor: &dyn Fn(OperandIndex) -> Result<TensorHandle>,
        dyn_alloc: &DynAllocInfoMap,
    ) -> Result<(TensorSet, TensorSet, Vec<OperandDescriptor>, DynAllocInfoMap)> {
        let inputs = op
            .inputs
            .iter()
            .map(|&i| tensor(i))
            .collect::<Result<TensorSet>>()?;
        let outputs = op
            .outputs
            .iter()
            .map(|&i| tensor(i))
            .collect::<Result<TensorSet>>()?;
        let descriptors = OperandDescriptor::of_all(graph, &op.outputs)?;
        let outputs_dyn_alloc = outputs
            .iter()
            .filter_map(|h| dyn_alloc.get(&h.id()).map(|info| (h.id(), *info)))
            .collect();
        Ok((inputs, outputs, descriptors, outputs_dyn_alloc))
    }
}
