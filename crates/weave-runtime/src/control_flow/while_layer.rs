//! The While loop layer.
//!
//! A While operation carries a tuple of values through repeated runs of a
//! body subgraph for as long as a condition subgraph returns true:
//!
//! ```text
//! Init -> CondEval -> LoopDecision -> (BodyEval -> CondEval -> LoopDecision)* -> Finalize
//! ```
//!
//! Data moves between the operation's tensors and the two executors through
//! six copy plans, all built and prepared before the first condition runs:
//!
//! | plan                    | filter (on destination)    |
//! |-------------------------|----------------------------|
//! | op input -> cond input  | used                       |
//! | op input -> op output   | used or graph output       |
//! | op input -> body input  | all                        |
//! | body output -> cond in  | used                       |
//! | body output -> body in  | used, not a graph output   |
//! | body output -> op out   | used or graph output       |
//!
//! The first condition and body runs read the operation inputs; later runs
//! read the body's previous outputs. Outputs are finalized from the operation
//! inputs when the body never ran and from the last body outputs otherwise.
//!
//! The body executor stays borrowed for the whole run. The condition executor
//! is borrowed only while it executes, so a loop nested in the body may reuse
//! the same condition subgraph.

use super::{mark_outputs_dynamic, read_condition};
use crate::error::{Result, RuntimeError};
use crate::executor::WiredExecutor;
use crate::executor_map::{borrow_executor, ExecutorMapHandle, SharedExecutor};
use crate::function::Function;
use crate::permute::{CopyFilter, CopyPlan, OperandDescriptor};
use crate::tensor_set::{DynAllocInfoMap, TensorSet};
use weave_core::SubgraphIndex;

/// Position of a While run in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhileState {
    Init,
    CondEval,
    LoopDecision,
    BodyEval,
    Finalize,
    Done,
}

/// Runs a While operation.
pub struct WhileLayer {
    cond: SubgraphIndex,
    body: SubgraphIndex,
    inputs: TensorSet,
    outputs: TensorSet,
    /// Descriptors of the output operands in the enclosing graph.
    output_descriptors: Vec<OperandDescriptor>,
    outputs_dyn_alloc: DynAllocInfoMap,
    executors: ExecutorMapHandle,
    max_iterations: Option<u64>,
}

impl WhileLayer {
    pub fn new(
        cond: SubgraphIndex,
        body: SubgraphIndex,
        inputs: TensorSet,
        outputs: TensorSet,
        output_descriptors: Vec<OperandDescriptor>,
        outputs_dyn_alloc: DynAllocInfoMap,
        executors: ExecutorMapHandle,
    ) -> Self {
        Self {
            cond,
            body,
            inputs,
            outputs,
            output_descriptors,
            outputs_dyn_alloc,
            executors,
            max_iterations: None,
        }
    }

    /// Fail with `IterationLimit` after `limit` body runs. `None` never fails.
    pub fn with_max_iterations(mut self, limit: Option<u64>) -> Self {
        self.max_iterations = limit;
        self
    }

    fn check_arity(&self, cond: &dyn WiredExecutor, body: &dyn WiredExecutor) -> Result<()> {
        let arity = self.inputs.len();
        let counts = [
            ("operation outputs", self.outputs.len()),
            ("output descriptors", self.output_descriptors.len()),
            ("condition inputs", cond.input_tensors().len()),
            ("body inputs", body.input_tensors().len()),
            ("body outputs", body.output_tensors().len()),
        ];
        for (what, count) in counts {
            if count != arity {
                return Err(RuntimeError::InvalidInputOutput(format!(
                    "While carries {arity} values but has {count} {what}"
                )));
            }
        }
        Ok(())
    }

    /// Advance the loop by one state.
    fn transition(&self, state: WhileState, run: &mut LoopRun<'_>) -> Result<WhileState> {
        let next = match state {
            WhileState::Init => WhileState::CondEval,
            WhileState::CondEval => {
                let mut guard = borrow_executor(run.cond, self.cond)?;
                let cond = guard
                    .as_wired_mut()
                    .ok_or(RuntimeError::ExecutorKind(self.cond))?;
                if run.iterations == 0 {
                    cond.execute(&self.inputs, &run.plans.op_in_to_cond_in)?;
                } else {
                    cond.execute(&run.plans.body_outputs, &run.plans.body_out_to_cond_in)?;
                }
                WhileState::LoopDecision
            }
            WhileState::LoopDecision => {
                if !read_condition(run.plans.cond_outputs.as_slice())? {
                    WhileState::Finalize
                } else if let Some(limit) = self.max_iterations.filter(|&l| run.iterations >= l)
                {
                    tracing::warn!(limit, "While loop hit its iteration limit");
                    return Err(RuntimeError::IterationLimit(limit));
                } else {
                    WhileState::BodyEval
                }
            }
            WhileState::BodyEval => {
                if run.iterations == 0 {
                    run.body.execute(&self.inputs, &run.plans.op_in_to_body_in)?;
                } else {
                    run.body
                        .execute(&run.plans.body_outputs, &run.plans.body_out_to_body_in)?;
                }
                run.iterations += 1;
                tracing::trace!(iteration = run.iterations, "Body finished");
                WhileState::CondEval
            }
            WhileState::Finalize => {
                let (sources, plan) = if run.iterations == 0 {
                    (&self.inputs, &run.plans.op_in_to_op_out)
                } else {
                    (&run.plans.body_outputs, &run.plans.body_out_to_op_out)
                };
                mark_outputs_dynamic(sources, &self.outputs, &self.output_descriptors)?;
                plan.run()?;
                WhileState::Done
            }
            WhileState::Done => WhileState::Done,
        };
        Ok(next)
    }
}

impl Function for WhileLayer {
    #[tracing::instrument(skip_all, fields(cond = %self.cond, body = %self.body))]
    fn run(&mut self) -> Result<()> {
        let cond_executor = self.executors.get(self.cond)?;
        let body_executor = self.executors.get(self.body)?;

        let mut body_guard = borrow_executor(&body_executor, self.body)?;
        let body = body_guard
            .as_wired_mut()
            .ok_or(RuntimeError::ExecutorKind(self.body))?;

        let plans = {
            let mut cond_guard = borrow_executor(&cond_executor, self.cond)?;
            let cond = cond_guard
                .as_wired_mut()
                .ok_or(RuntimeError::ExecutorKind(self.cond))?;
            self.check_arity(cond, body)?;
            WhilePlans::build(self, cond, body)?
        };

        let mut run = LoopRun {
            cond: &cond_executor,
            body,
            plans,
            iterations: 0,
        };
        let mut state = WhileState::Init;
        while state != WhileState::Done {
            state = self.transition(state, &mut run)?;
        }

        tracing::debug!(iterations = run.iterations, "While loop finished");
        Ok(())
    }
}

/// State of one While run. Only the body is borrowed throughout.
struct LoopRun<'a> {
    cond: &'a SharedExecutor,
    body: &'a mut dyn WiredExecutor,
    plans: WhilePlans,
    iterations: u64,
}

/// The six wirings of one While run.
struct WhilePlans {
    op_in_to_cond_in: CopyPlan,
    op_in_to_op_out: CopyPlan,
    op_in_to_body_in: CopyPlan,
    body_out_to_cond_in: CopyPlan,
    body_out_to_body_in: CopyPlan,
    body_out_to_op_out: CopyPlan,
    body_outputs: TensorSet,
    cond_outputs: TensorSet,
}

impl WhilePlans {
    fn build(
        layer: &WhileLayer,
        cond: &dyn WiredExecutor,
        body: &dyn WiredExecutor,
    ) -> Result<Self> {
        let cond_inputs = cond.input_tensors();
        let cond_descriptors = OperandDescriptor::of_all(cond.graph(), cond.graph().inputs())?;
        let cond_dyn_alloc = cond.inputs_dyn_alloc_info();

        let body_inputs = body.input_tensors();
        let body_descriptors = OperandDescriptor::of_all(body.graph(), body.graph().inputs())?;
        let body_dyn_alloc = body.inputs_dyn_alloc_info();
        let body_outputs = body.output_tensors().clone();

        let mut plans = Self {
            op_in_to_cond_in: CopyPlan::new(
                &layer.inputs,
                cond_inputs,
                &cond_descriptors,
                CopyFilter::Used,
                cond_dyn_alloc.clone(),
            )?,
            op_in_to_op_out: CopyPlan::new(
                &layer.inputs,
                &layer.outputs,
                &layer.output_descriptors,
                CopyFilter::UsedOrGraphOutput,
                layer.outputs_dyn_alloc.clone(),
            )?,
            op_in_to_body_in: CopyPlan::new(
                &layer.inputs,
                body_inputs,
                &body_descriptors,
                CopyFilter::All,
                body_dyn_alloc.clone(),
            )?,
            body_out_to_cond_in: CopyPlan::new(
                &body_outputs,
                cond_inputs,
                &cond_descriptors,
                CopyFilter::Used,
                cond_dyn_alloc.clone(),
            )?,
            body_out_to_body_in: CopyPlan::new(
                &body_outputs,
                body_inputs,
                &body_descriptors,
                CopyFilter::UsedExceptGraphOutput,
                body_dyn_alloc.clone(),
            )?,
            body_out_to_op_out: CopyPlan::new(
                &body_outputs,
                &layer.outputs,
                &layer.output_descriptors,
                CopyFilter::UsedOrGraphOutput,
                layer.outputs_dyn_alloc.clone(),
            )?,
            body_outputs,
            cond_outputs: cond.output_tensors().clone(),
        };

        for plan in [
            &mut plans.op_in_to_cond_in,
            &mut plans.op_in_to_op_out,
            &mut plans.op_in_to_body_in,
            &mut plans.body_out_to_cond_in,
            &mut plans.body_out_to_body_in,
            &mut plans.body_out_to_op_out,
        ] {
            plan.prepare();
        }
        Ok(plans)
    }
}
