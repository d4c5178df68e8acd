//! Subgraph intermediate representation.
//!
//! A `Model` is an ordered list of subgraphs. Each `Graph` owns:
//! - **Operands** (`Operand`): typed value slots, with use/def tracking
//! - **Operations** (`Operation`): operators reading and writing operands
//! - Ordered input and output operand sequences
//!
//! Control-flow operations (`While`, `If`) reference other subgraphs of the
//! same model by `SubgraphIndex`.

use crate::types::{OperandInfo, TensorValue};
use crate::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::fmt;

/// Index of an operand within its subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperandIndex(pub u32);

/// Index of an operation within its subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationIndex(pub u32);

/// Index of a subgraph within its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubgraphIndex(pub u32);

impl SubgraphIndex {
    /// The entry subgraph of every model.
    pub const PRIMARY: SubgraphIndex = SubgraphIndex(0);
}

impl OperandIndex {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl OperationIndex {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl SubgraphIndex {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for OperandIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for OperationIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl fmt::Display for SubgraphIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subg#{}", self.0)
    }
}

// ──────────────────────────────── Operand ────────────────────────────────

/// A typed value slot in a subgraph.
#[derive(Debug, Clone)]
pub struct Operand {
    name: String,
    info: OperandInfo,
    /// Operations consuming this operand, one entry per consuming input slot.
    uses: Vec<OperationIndex>,
    /// Operation producing this operand, if any.
    def: Option<OperationIndex>,
    constant: Option<TensorValue>,
}

impl Operand {
    fn new(name: String, info: OperandInfo, constant: Option<TensorValue>) -> Self {
        Self {
            name,
            info,
            uses: Vec::new(),
            def: None,
            constant,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> &OperandInfo {
        &self.info
    }

    /// Operations consuming this operand.
    pub fn uses(&self) -> &[OperationIndex] {
        &self.uses
    }

    /// Number of consuming input slots.
    pub fn use_count(&self) -> usize {
        self.uses.len()
    }

    /// Operation producing this operand.
    pub fn def(&self) -> Option<OperationIndex> {
        self.def
    }

    /// Constant value, for operands backed by model data.
    pub fn constant(&self) -> Option<&TensorValue> {
        self.constant.as_ref()
    }

    pub fn is_constant(&self) -> bool {
        self.constant.is_some()
    }
}

// ──────────────────────────────── Operation ──────────────────────────────

/// Operator kinds understood by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Sub,
    Mul,
    Less,
    Greater,
    Equal,
    LogicalNot,
    Erf,
    Logistic,
    Concat { axis: usize },
    Identity,
    /// Loop `body` while the single boolean output of `cond` is true.
    ///
    /// Inputs are the initial loop-carried values; outputs have the same
    /// arity and receive the final values.
    While {
        cond: SubgraphIndex,
        body: SubgraphIndex,
    },
    /// Run one of two subgraphs depending on the boolean scalar in input 0.
    If {
        then_branch: SubgraphIndex,
        else_branch: SubgraphIndex,
    },
}

impl OpKind {
    /// Operator name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Add => "Add",
            OpKind::Sub => "Sub",
            OpKind::Mul => "Mul",
            OpKind::Less => "Less",
            OpKind::Greater => "Greater",
            OpKind::Equal => "Equal",
            OpKind::LogicalNot => "LogicalNot",
            OpKind::Erf => "Erf",
            OpKind::Logistic => "Logistic",
            OpKind::Concat { .. } => "Concat",
            OpKind::Identity => "Identity",
            OpKind::While { .. } => "While",
            OpKind::If { .. } => "If",
        }
    }

    pub fn is_control_flow(&self) -> bool {
        matches!(self, OpKind::While { .. } | OpKind::If { .. })
    }

    /// Subgraphs referenced by this operation.
    pub fn subgraphs(&self) -> Vec<SubgraphIndex> {
        match *self {
            OpKind::While { cond, body } => vec![cond, body],
            OpKind::If {
                then_branch,
                else_branch,
            } => vec![then_branch, else_branch],
            _ => Vec::new(),
        }
    }
}

/// An operator instance reading and writing operands.
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub kind: OpKind,
    pub inputs: Vec<OperandIndex>,
    pub outputs: Vec<OperandIndex>,
}

impl Operation {
    pub fn new(
        name: impl Into<String>,
        kind: OpKind,
        inputs: Vec<OperandIndex>,
        outputs: Vec<OperandIndex>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs,
            outputs,
        }
    }
}

// ──────────────────────────────── Graph ──────────────────────────────────

/// A self-contained subgraph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    name: String,
    operands: Vec<Operand>,
    operations: Vec<Operation>,
    inputs: Vec<OperandIndex>,
    outputs: Vec<OperandIndex>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ── Operands ──

    /// Add a runtime operand and return its index.
    pub fn add_operand(&mut self, name: impl Into<String>, info: OperandInfo) -> OperandIndex {
        let index = OperandIndex(self.operands.len() as u32);
        self.operands.push(Operand::new(name.into(), info, None));
        index
    }

    /// Add a constant operand backed by `value`.
    pub fn add_constant(&mut self, name: impl Into<String>, value: TensorValue) -> OperandIndex {
        let index = OperandIndex(self.operands.len() as u32);
        self.operands
            .push(Operand::new(name.into(), value.info(), Some(value)));
        index
    }

    pub fn operand(&self, index: OperandIndex) -> Result<&Operand> {
        self.operands
            .get(index.index())
            .ok_or(Error::OperandNotFound(index))
    }

    /// Iterate over all operands with their indices.
    pub fn operands(&self) -> impl Iterator<Item = (OperandIndex, &Operand)> {
        self.operands
            .iter()
            .enumerate()
            .map(|(i, operand)| (OperandIndex(i as u32), operand))
    }

    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    // ── Operations ──

    /// Add an operation, registering its uses and definitions.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand index is out of range or an output
    /// operand already has a producer.
    pub fn add_operation(&mut self, operation: Operation) -> Result<OperationIndex> {
        let index = OperationIndex(self.operations.len() as u32);

        for &input in &operation.inputs {
            self.operand(input)?;
        }
        for &output in &operation.outputs {
            let operand = self.operand(output)?;
            if let Some(existing) = operand.def {
                return Err(Error::InvalidGraph(format!(
                    "Operand {} ('{}') already produced by {}",
                    output, operand.name, existing
                )));
            }
            if operand.is_constant() {
                return Err(Error::InvalidGraph(format!(
                    "Constant operand {} ('{}') cannot be an operation output",
                    output, operand.name
                )));
            }
        }

        for &input in &operation.inputs {
            self.operands[input.index()].uses.push(index);
        }
        for &output in &operation.outputs {
            self.operands[output.index()].def = Some(index);
        }

        self.operations.push(operation);
        Ok(index)
    }

    pub fn operation(&self, index: OperationIndex) -> Result<&Operation> {
        self.operations
            .get(index.index())
            .ok_or(Error::OperationNotFound(index))
    }

    /// Iterate over all operations with their indices.
    pub fn operations(&self) -> impl Iterator<Item = (OperationIndex, &Operation)> {
        self.operations
            .iter()
            .enumerate()
            .map(|(i, op)| (OperationIndex(i as u32), op))
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    // ── Inputs / outputs ──

    pub fn add_input(&mut self, index: OperandIndex) -> Result<()> {
        self.operand(index)?;
        self.inputs.push(index);
        Ok(())
    }

    /// Push an input known to be in range.
    pub(crate) fn push_input(&mut self, index: OperandIndex) {
        self.inputs.push(index);
    }

    pub fn add_output(&mut self, index: OperandIndex) -> Result<()> {
        self.operand(index)?;
        self.outputs.push(index);
        Ok(())
    }

    /// Graph input operands, in declaration order.
    pub fn inputs(&self) -> &[OperandIndex] {
        &self.inputs
    }

    /// Graph output operands, in declaration order.
    pub fn outputs(&self) -> &[OperandIndex] {
        &self.outputs
    }

    pub fn is_input(&self, index: OperandIndex) -> bool {
        self.inputs.contains(&index)
    }

    /// Whether the operand is externally observable as a graph output.
    pub fn is_output(&self, index: OperandIndex) -> bool {
        self.outputs.contains(&index)
    }

    // ── Queries ──

    /// Operations ordered so that producers run before consumers.
    ///
    /// # Errors
    ///
    /// Returns an error if the operations form a cycle.
    pub fn topological_order(&self) -> Result<Vec<OperationIndex>> {
        let mut dag: DiGraph<OperationIndex, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..self.operations.len())
            .map(|i| dag.add_node(OperationIndex(i as u32)))
            .collect();

        for (i, op) in self.operations.iter().enumerate() {
            for input in &op.inputs {
                if let Some(producer) = self.operands[input.index()].def {
                    dag.add_edge(nodes[producer.index()], nodes[i], ());
                }
            }
        }

        let sorted = toposort(&dag, None).map_err(|cycle| {
            let op = dag[cycle.node_id()];
            Error::InvalidGraph(format!(
                "Subgraph '{}' has a cycle through operation {}",
                self.name, op
            ))
        })?;

        Ok(sorted.into_iter().map(|node| dag[node]).collect())
    }

    /// Check structural invariants of this subgraph in isolation.
    ///
    /// - graph inputs are neither produced by an operation nor constant
    /// - every consumed operand is a graph input, a constant, or produced
    /// - graph outputs are produced, constant, or graph inputs
    /// - operations have the arity their kind requires
    /// - operations form no cycle
    pub fn validate(&self) -> Result<()> {
        for &input in &self.inputs {
            let operand = self.operand(input)?;
            if operand.def.is_some() || operand.is_constant() {
                return Err(Error::InvalidGraph(format!(
                    "Graph input {} ('{}') of '{}' must not be produced or constant",
                    input, operand.name, self.name
                )));
            }
        }

        for (index, operand) in self.operands() {
            let available =
                operand.def.is_some() || operand.is_constant() || self.is_input(index);
            if !available && (operand.use_count() > 0 || self.is_output(index)) {
                return Err(Error::InvalidGraph(format!(
                    "Operand {} ('{}') of '{}' is read but never produced",
                    index, operand.name, self.name
                )));
            }
        }

        for (index, op) in self.operations() {
            check_arity(index, op)?;
        }

        self.topological_order()?;
        Ok(())
    }
}

fn check_arity(index: OperationIndex, op: &Operation) -> Result<()> {
    let (inputs, outputs) = (op.inputs.len(), op.outputs.len());
    let ok = match op.kind {
        OpKind::Add
        | OpKind::Sub
        | OpKind::Mul
        | OpKind::Less
        | OpKind::Greater
        | OpKind::Equal => inputs == 2 && outputs == 1,
        OpKind::LogicalNot | OpKind::Erf | OpKind::Logistic | OpKind::Identity => {
            inputs == 1 && outputs == 1
        }
        OpKind::Concat { .. } => inputs >= 1 && outputs == 1,
        OpKind::While { .. } => inputs == outputs,
        OpKind::If { .. } => inputs >= 1,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidGraph(format!(
            "{} operation {} ('{}') has invalid arity: {} inputs, {} outputs",
            op.kind.name(),
            index,
            op.name,
            inputs,
            outputs
        )))
    }
}

// ──────────────────────────────── Model ──────────────────────────────────

/// An ordered collection of subgraphs; index 0 is the entry subgraph.
#[derive(Debug, Clone, Default)]
pub struct Model {
    subgraphs: Vec<Graph>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subgraph and return its index.
    pub fn push(&mut self, graph: Graph) -> SubgraphIndex {
        let index = SubgraphIndex(self.subgraphs.len() as u32);
        self.subgraphs.push(graph);
        index
    }

    pub fn subgraph(&self, index: SubgraphIndex) -> Result<&Graph> {
        self.subgraphs
            .get(index.index())
            .ok_or(Error::SubgraphNotFound(index))
    }

    pub fn primary(&self) -> Result<&Graph> {
        self.subgraph(SubgraphIndex::PRIMARY)
    }

    /// Iterate over all subgraphs with their indices.
    pub fn subgraphs(&self) -> impl Iterator<Item = (SubgraphIndex, &Graph)> {
        self.subgraphs
            .iter()
            .enumerate()
            .map(|(i, g)| (SubgraphIndex(i as u32), g))
    }

    pub fn len(&self) -> usize {
        self.subgraphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subgraphs.is_empty()
    }

    /// Validate every subgraph and the signatures of control-flow references.
    pub fn validate(&self) -> Result<()> {
        if self.subgraphs.is_empty() {
            return Err(Error::InvalidGraph("Model has no subgraphs".to_string()));
        }
        for (index, graph) in self.subgraphs() {
            graph.validate()?;
            for (op_index, op) in graph.operations() {
                self.check_control_flow(index, op_index, op)?;
            }
        }
        tracing::debug!(subgraphs = self.len(), "Validated model");
        Ok(())
    }

    fn check_control_flow(
        &self,
        owner: SubgraphIndex,
        op_index: OperationIndex,
        op: &Operation,
    ) -> Result<()> {
        let mismatch = |what: String| {
            Error::InvalidGraph(format!(
                "{} operation {} ('{}') in {}: {}",
                op.kind.name(),
                op_index,
                op.name,
                owner,
                what
            ))
        };

        match op.kind {
            OpKind::While { cond, body } => {
                let cond_graph = self.subgraph(cond)?;
                let body_graph = self.subgraph(body)?;
                let arity = op.inputs.len();
                if cond_graph.inputs().len() != arity {
                    return Err(mismatch(format!(
                        "condition takes {} inputs, operation has {}",
                        cond_graph.inputs().len(),
                        arity
                    )));
                }
                if cond_graph.outputs().len() != 1 {
                    return Err(mismatch(format!(
                        "condition must have exactly one output, has {}",
                        cond_graph.outputs().len()
                    )));
                }
                if body_graph.inputs().len() != arity || body_graph.outputs().len() != arity {
                    return Err(mismatch(format!(
                        "body signature {} -> {} does not match {} loop-carried values",
                        body_graph.inputs().len(),
                        body_graph.outputs().len(),
                        arity
                    )));
                }
            }
            OpKind::If {
                then_branch,
                else_branch,
            } => {
                for branch in [then_branch, else_branch] {
                    let graph = self.subgraph(branch)?;
                    if graph.inputs().len() + 1 != op.inputs.len()
                        || graph.outputs().len() != op.outputs.len()
                    {
                        return Err(mismatch(format!(
                            "branch {} signature {} -> {} does not match operation {} -> {}",
                            branch,
                            graph.inputs().len(),
                            graph.outputs().len(),
                            op.inputs.len() - 1,
                            op.outputs.len()
                        )));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}
