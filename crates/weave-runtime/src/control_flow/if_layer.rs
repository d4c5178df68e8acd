//! The If layer: run one of two subgraphs.

use super::{mark_outputs_dynamic, read_condition};
use crate::error::{Result, RuntimeError};
use crate::executor_map::{borrow_executor, ExecutorMapHandle};
use crate::function::Function;
use crate::permute::{CopyFilter, CopyPlan, OperandDescriptor};
use crate::tensor_set::{DynAllocInfoMap, TensorSet};
use weave_core::SubgraphIndex;

/// Runs an If operation.
///
/// Input 0 is the boolean condition; inputs 1.. feed whichever branch runs.
pub struct IfLayer {
    then_branch: SubgraphIndex,
    else_branch: SubgraphIndex,
    inputs: TensorSet,
    outputs: TensorSet,
    output_descriptors: Vec<OperandDescriptor>,
    outputs_dyn_alloc: DynAllocInfoMap,
    executors: ExecutorMapHandle,
}

impl IfLayer {
    pub fn new(
        then_branch: SubgraphIndex,
        else_branch: SubgraphIndex,
        inputs: TensorSet,
        outputs: TensorSet,
        output_descriptors: Vec<OperandDescriptor>,
        outputs_dyn_alloc: DynAllocInfoMap,
        executors: ExecutorMapHandle,
    ) -> Self {
        Self {
            then_branch,
            else_branch,
            inputs,
            outputs,
            output_descriptors,
            outputs_dyn_alloc,
            executors,
        }
    }
}

impl Function for IfLayer {
    #[tracing::instrument(
        skip_all,
        fields(then_branch = %self.then_branch, else_branch = %self.else_branch)
    )]
    fn run(&mut self) -> Result<()> {
        let Some((condition, branch_inputs)) = self.inputs.as_slice().split_first() else {
            return Err(RuntimeError::InvalidInputOutput(
                "If needs a condition input".to_string(),
            ));
        };
        let branch = if read_condition(std::slice::from_ref(condition))? {
            self.then_branch
        } else {
            self.else_branch
        };
        tracing::debug!(branch = %branch, "Selected branch");

        let executor = self.executors.get(branch)?;
        let mut guard = borrow_executor(&executor, branch)?;
        let executor = guard
            .as_wired_mut()
            .ok_or(RuntimeError::ExecutorKind(branch))?;

        let branch_inputs: TensorSet = branch_inputs.iter().cloned().collect();
        if executor.input_tensors().len() != branch_inputs.len()
            || executor.output_tensors().len() != self.outputs.len()
        {
            return Err(RuntimeError::InvalidInputOutput(format!(
                "If passes {} -> {} values but branch {} takes {} -> {}",
                branch_inputs.len(),
                self.outputs.len(),
                branch,
                executor.input_tensors().len(),
                executor.output_tensors().len()
            )));
        }

        let graph = executor.graph();
        let input_descriptors = OperandDescriptor::of_all(graph, graph.inputs())?;
        let mut pre_copy = CopyPlan::new(
            &branch_inputs,
            executor.input_tensors(),
            &input_descriptors,
            CopyFilter::Used,
            executor.inputs_dyn_alloc_info().clone(),
        )?;
        let branch_outputs = executor.output_tensors().clone();
        let mut post_copy = CopyPlan::new(
            &branch_outputs,
            &self.outputs,
            &self.output_descriptors,
            CopyFilter::UsedOrGraphOutput,
            self.outputs_dyn_alloc.clone(),
        )?;
        pre_copy.prepare();
        post_copy.prepare();

        executor.execute(&branch_inputs, &pre_copy)?;
        mark_outputs_dynamic(&branch_outputs, &self.outputs, &self.output_descriptors)?;
        post_copy.run()
    }
}
