//! Subgraph executors.
//!
//! An executor runs one subgraph end to end. The `Executor` trait is the
//! top-level entry (user tensors in, owned tensors out). Executors that own
//! addressable input and output tensors also implement `WiredExecutor`,
//! which is how control-flow layers drive nested subgraphs: they copy into
//! the executor's input tensors and read back its output tensors directly.

use crate::error::{Result, RuntimeError};
use crate::function::Function;
use crate::kernel_generator::KernelGenerator;
use crate::permute::{CopyFilter, CopyPlan, OperandDescriptor};
use crate::tensor::{Tensor, TensorHandle};
use crate::tensor_set::{DynAllocInfo, DynAllocInfoMap, TensorSet};
use weave_core::{Graph, SubgraphIndex};

/// Runs one subgraph to completion.
pub trait Executor {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Run with user-provided inputs, returning copies of the outputs.
    fn run(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>>;

    /// Access the tensor-wiring interface, if this executor supports it.
    fn as_wired_mut(&mut self) -> Option<&mut dyn WiredExecutor> {
        None
    }
}

/// An executor whose input and output tensors can be wired into directly.
pub trait WiredExecutor {
    /// The subgraph this executor runs.
    fn graph(&self) -> &Graph;

    /// Tensors bound to the subgraph inputs, in input order.
    fn input_tensors(&self) -> &TensorSet;

    /// Tensors bound to the subgraph outputs, in output order.
    fn output_tensors(&self) -> &TensorSet;

    /// Which input tensors may be reallocated at run time.
    fn inputs_dyn_alloc_info(&self) -> &DynAllocInfoMap;

    /// Run the subgraph.
    ///
    /// `src` is the set that `pre_copy` copies from; any input whose shape
    /// differs from its source is marked dynamic before the copy runs.
    fn execute(&mut self, src: &TensorSet, pre_copy: &CopyPlan) -> Result<()>;
}

/// Runs a subgraph's operations in topological order on the CPU.
///
/// Every operand gets one tensor for the lifetime of the executor. Constants
/// are filled at construction; every other tensor may be reallocated.
pub struct LinearExecutor {
    index: SubgraphIndex,
    name: String,
    graph: Graph,
    inputs: TensorSet,
    outputs: TensorSet,
    inputs_dyn_alloc: DynAllocInfoMap,
    functions: Vec<(String, Box<dyn Function>)>,
}

impl LinearExecutor {
    /// Allocate tensors for `graph` and generate one function per operation.
    pub fn new(index: SubgraphIndex, graph: Graph, generator: &KernelGenerator) -> Result<Self> {
        let tensors: Vec<TensorHandle> = graph
            .operands()
            .map(|(_, operand)| {
                let tensor = match operand.constant() {
                    Some(value) => Tensor::from_value(value),
                    None => Tensor::from_info(operand.info()),
                };
                TensorHandle::new(tensor)
            })
            .collect();

        let dyn_alloc: DynAllocInfoMap = graph
            .operands()
            .filter(|(_, operand)| !operand.is_constant())
            .map(|(i, _)| (tensors[i.index()].id(), DynAllocInfo { operand: i }))
            .collect();

        let mut functions = Vec::with_capacity(graph.operation_count());
        for op_index in graph.topological_order()? {
            let op = graph.operation(op_index)?;
            let function = generator.generate(&graph, op, &tensors, &dyn_alloc)?;
            functions.push((op.name.clone(), function));
        }

        let inputs: TensorSet = graph
            .inputs()
            .iter()
            .map(|i| tensors[i.index()].clone())
            .collect();
        let outputs: TensorSet = graph
            .outputs()
            .iter()
            .map(|i| tensors[i.index()].clone())
            .collect();
        let inputs_dyn_alloc = inputs
            .iter()
            .filter_map(|h| dyn_alloc.get(&h.id()).map(|info| (h.id(), *info)))
            .collect();

        tracing::debug!(
            subgraph = %index,
            name = graph.name(),
            functions = functions.len(),
            "Built executor"
        );

        Ok(Self {
            index,
            name: graph.name().to_string(),
            graph,
            inputs,
            outputs,
            inputs_dyn_alloc,
            functions,
        })
    }

    pub fn subgraph_index(&self) -> SubgraphIndex {
        self.index
    }

    fn run_functions(&mut self) -> Result<()> {
        for (name, function) in &mut self.functions {
            let _span = tracing::debug_span!("op", name = name.as_str()).entered();
            function
                .run()
                .map_err(|e| RuntimeError::OperationFailed {
                    op: name.clone(),
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }
}

impl Executor for LinearExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let src: TensorSet = inputs
            .iter()
            .cloned()
            .map(TensorHandle::new)
            .collect();
        let descriptors = OperandDescriptor::of_all(&self.graph, self.graph.inputs())?;
        let mut plan = CopyPlan::new(
            &src,
            &self.inputs,
            &descriptors,
            CopyFilter::All,
            self.inputs_dyn_alloc.clone(),
        )
        .map_err(|_| {
            RuntimeError::InvalidInputOutput(format!(
                "Subgraph '{}' expects {} inputs, got {}",
                self.name,
                self.inputs.len(),
                inputs.len()
            ))
        })?;
        plan.prepare();

        self.execute(&src, &plan)?;

        Ok(self.outputs.iter().map(TensorHandle::snapshot).collect())
    }

    fn as_wired_mut(&mut self) -> Option<&mut dyn WiredExecutor> {
        Some(self)
    }
}

impl WiredExecutor for LinearExecutor {
    fn graph(&self) -> &Graph {
        &self.graph
    }

    fn input_tensors(&self) -> &TensorSet {
        &self.inputs
    }

    fn output_tensors(&self) -> &TensorSet {
        &self.outputs
    }

    fn inputs_dyn_alloc_info(&self) -> &DynAllocInfoMap {
        &self.inputs_dyn_alloc
    }

    fn execute(&mut self, src: &TensorSet, pre_copy: &CopyPlan) -> Result<()> {
        if src.len() != self.inputs.len() {
            return Err(RuntimeError::InvalidInputOutput(format!(
                "Subgraph '{}' expects {} inputs, got {}",
                self.name,
                self.inputs.len(),
                src.len()
            )));
        }

        for (source, input) in src.iter().zip(&self.inputs) {
            if source.same_tensor(input) {
                continue;
            }
            let source_shape = source.access(|t| Ok(t.shape_in_layout(input.layout())))?;
            if source_shape != input.shape() {
                if !self.inputs_dyn_alloc.contains_key(&input.id()) {
                    return Err(RuntimeError::DynamicShapeUnsupported(format!(
                        "input of '{}' with shape {:?} cannot take shape {:?}",
                        self.name,
                        input.shape(),
                        source_shape
                    )));
                }
                input.set_dynamic();
            }
        }

        pre_copy.run()?;
        self.run_functions()
    }
}
