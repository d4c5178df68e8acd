//! Ergonomic construction of subgraphs.

use crate::ir::{Graph, OpKind, OperandIndex, Operation};
use crate::types::{OperandInfo, TensorValue};
use crate::Result;

/// Builds a `Graph` operation by operation.
///
/// ```
/// use weave_core::{DataType, GraphBuilder, OpKind, OperandInfo, TensorData, TensorValue};
///
/// let mut b = GraphBuilder::new("cond");
/// let x = b.input("x", OperandInfo::scalar(DataType::I32));
/// let limit = b.constant("limit", TensorValue::scalar(TensorData::I32(vec![3])).unwrap());
/// let keep_going = b
///     .op("less", OpKind::Less, &[x, limit], OperandInfo::scalar(DataType::Bool))
///     .unwrap();
/// b.output(keep_going).unwrap();
/// let graph = b.build().unwrap();
/// assert_eq!(graph.outputs().len(), 1);
/// ```
#[derive(Debug)]
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: Graph::new(name),
        }
    }

    /// Declare a graph input.
    pub fn input(&mut self, name: impl Into<String>, info: OperandInfo) -> OperandIndex {
        let index = self.graph.add_operand(name, info);
        self.graph.push_input(index);
        index
    }

    /// Declare a constant operand.
    pub fn constant(&mut self, name: impl Into<String>, value: TensorValue) -> OperandIndex {
        self.graph.add_constant(name, value)
    }

    /// Add a single-output operation; the output operand is named after it.
    pub fn op(
        &mut self,
        name: impl Into<String>,
        kind: OpKind,
        inputs: &[OperandIndex],
        output: OperandInfo,
    ) -> Result<OperandIndex> {
        let outputs = self.op_multi(name, kind, inputs, vec![output])?;
        Ok(outputs[0])
    }

    /// Add an operation with any number of outputs.
    pub fn op_multi(
        &mut self,
        name: impl Into<String>,
        kind: OpKind,
        inputs: &[OperandIndex],
        outputs: Vec<OperandInfo>,
    ) -> Result<Vec<OperandIndex>> {
        let name = name.into();
        let output_indices: Vec<OperandIndex> = outputs
            .into_iter()
            .enumerate()
            .map(|(i, info)| self.graph.add_operand(format!("{name}:{i}"), info))
            .collect();
        self.graph.add_operation(Operation::new(
            name,
            kind,
            inputs.to_vec(),
            output_indices.clone(),
        ))?;
        Ok(output_indices)
    }

    /// Mark an operand as a graph output.
    pub fn output(&mut self, index: OperandIndex) -> Result<()> {
        self.graph.add_output(index)
    }

    /// Validate and return the graph.
    pub fn build(self) -> Result<Graph> {
        self.graph.validate()?;
        Ok(self.graph)
    }

    /// Return the graph without validating it.
    pub fn build_unchecked(self) -> Graph {
        self.graph
    }
}
