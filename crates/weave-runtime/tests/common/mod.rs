//! Common test utilities for runtime integration tests.
//!
//! This module provides shared graph builders and executor wrappers used
//! across multiple test files in the runtime integration test suite.

#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;
use weave_core::{
    DataType, Graph, GraphBuilder, Model, OpKind, OperandIndex, OperandInfo, SubgraphIndex,
    TensorData, TensorValue,
};
use weave_runtime::{
    CopyPlan, DynAllocInfoMap, Executor, ExecutorMap, KernelGenerator, LinearExecutor, Result,
    RuntimeConfig, Tensor, TensorSet, WiredExecutor,
};

/// Install a test-friendly tracing subscriber (idempotent).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn i32_scalar() -> OperandInfo {
    OperandInfo::scalar(DataType::I32)
}

pub fn bool_scalar() -> OperandInfo {
    OperandInfo::scalar(DataType::Bool)
}

pub fn i32_const(b: &mut GraphBuilder, name: &str, value: i32) -> OperandIndex {
    b.constant(
        name,
        TensorValue::scalar(TensorData::I32(vec![value])).expect("scalar value"),
    )
}

pub fn f32_const(b: &mut GraphBuilder, name: &str, value: f32) -> OperandIndex {
    b.constant(
        name,
        TensorValue::scalar(TensorData::F32(vec![value])).expect("scalar value"),
    )
}

/// Read a single i32 element.
pub fn scalar_i32(tensor: &Tensor) -> i32 {
    let values = tensor.to_vec::<i32>().expect("i32 tensor");
    assert_eq!(values.len(), 1, "expected one element, got {values:?}");
    values[0]
}

/// Condition graph `counter < limit`.
///
/// `ignored` declares further carried inputs the condition never reads.
pub fn counter_cond_graph(limit: i32, ignored: &[OperandInfo]) -> Graph {
    let mut b = GraphBuilder::new("cond");
    let counter = b.input("counter", i32_scalar());
    for (i, info) in ignored.iter().enumerate() {
        b.input(format!("ignored_{i}"), info.clone());
    }
    let limit = i32_const(&mut b, "limit", limit);
    let keep_going = b
        .op("less", OpKind::Less, &[counter, limit], bool_scalar())
        .expect("less");
    b.output(keep_going).expect("output");
    b.build().expect("valid cond graph")
}

/// Body graph: `counter + 1`.
pub fn increment_body_graph() -> Graph {
    let mut b = GraphBuilder::new("body");
    let counter = b.input("counter", i32_scalar());
    let one = i32_const(&mut b, "one", 1);
    let next = b
        .op("inc", OpKind::Add, &[counter, one], i32_scalar())
        .expect("add");
    b.output(next).expect("output");
    b.build().expect("valid body graph")
}

/// Primary graph with a single While over the given carried operands.
pub fn while_main_graph(carried: &[OperandInfo], cond: u32, body: u32) -> Graph {
    let mut b = GraphBuilder::new("main");
    let inputs: Vec<OperandIndex> = carried
        .iter()
        .enumerate()
        .map(|(i, info)| b.input(format!("in_{i}"), info.clone()))
        .collect();
    let outputs = b
        .op_multi(
            "loop",
            OpKind::While {
                cond: SubgraphIndex(cond),
                body: SubgraphIndex(body),
            },
            &inputs,
            carried.to_vec(),
        )
        .expect("while");
    for output in outputs {
        b.output(output).expect("output");
    }
    b.build().expect("valid main graph")
}

/// `main(counter) = while counter < limit { counter + 1 }`.
///
/// Subgraphs: 0 = main, 1 = cond, 2 = body.
pub fn counter_loop_model(limit: i32) -> Model {
    let mut model = Model::new();
    model.push(while_main_graph(&[i32_scalar()], 1, 2));
    model.push(counter_cond_graph(limit, &[]));
    model.push(increment_body_graph());
    model
}

/// Build one `LinearExecutor` per subgraph, wrapping each in a
/// `CountingExecutor`. Returns the map and one counter per subgraph.
pub fn counting_executors(
    model: &Model,
    config: RuntimeConfig,
) -> Result<(ExecutorMap, Vec<Rc<Cell<usize>>>)> {
    let map = ExecutorMap::new();
    let generator = KernelGenerator::new(map.handle(), config);
    let mut counters = Vec::new();
    for (index, graph) in model.subgraphs() {
        let inner = LinearExecutor::new(index, graph.clone(), &generator)?;
        let runs = Rc::new(Cell::new(0));
        counters.push(runs.clone());
        map.insert(index, Box::new(CountingExecutor { inner, runs }));
    }
    Ok((map, counters))
}

/// Delegates to a `LinearExecutor`, counting wired executions.
pub struct CountingExecutor {
    inner: LinearExecutor,
    runs: Rc<Cell<usize>>,
}

impl Executor for CountingExecutor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn run(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        self.inner.run(inputs)
    }

    fn as_wired_mut(&mut self) -> Option<&mut dyn WiredExecutor> {
        Some(self)
    }
}

impl WiredExecutor for CountingExecutor {
    fn graph(&self) -> &Graph {
        self.inner.graph()
    }

    fn input_tensors(&self) -> &TensorSet {
        self.inner.input_tensors()
    }

    fn output_tensors(&self) -> &TensorSet {
        self.inner.output_tensors()
    }

    fn inputs_dyn_alloc_info(&self) -> &DynAllocInfoMap {
        self.inner.inputs_dyn_alloc_info()
    }

    fn execute(&mut self, src: &TensorSet, pre_copy: &CopyPlan) -> Result<()> {
        self.runs.set(self.runs.get() + 1);
        self.inner.execute(src, pre_copy)
    }
}

/// An executor that only supports top-level runs.
pub struct OpaqueExecutor;

impl Executor for OpaqueExecutor {
    fn name(&self) -> &str {
        "opaque"
    }

    fn run(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        Ok(inputs.to_vec())
    }
}
