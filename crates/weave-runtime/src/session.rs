//! Model loading and execution entry point.

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::executor::LinearExecutor;
use crate::executor_map::ExecutorMap;
use crate::kernel_generator::KernelGenerator;
use crate::tensor::Tensor;
use weave_core::{Model, SubgraphIndex};

/// A loaded model: one executor per subgraph.
///
/// # Example
/// ```
/// use weave_core::{DataType, GraphBuilder, Model, OpKind, OperandInfo};
/// use weave_runtime::{RuntimeConfig, Session, Tensor};
///
/// # fn main() -> anyhow::Result<()> {
/// let mut b = GraphBuilder::new("main");
/// let x = b.input("x", OperandInfo::new(DataType::F32, &[2]));
/// let y = b.op("sigmoid", OpKind::Logistic, &[x], OperandInfo::new(DataType::F32, &[2]))?;
/// b.output(y)?;
///
/// let mut model = Model::new();
/// model.push(b.build()?);
///
/// let session = Session::new(model, RuntimeConfig::default())?;
/// let outputs = session.run(&[Tensor::from_vec(vec![0.0f32, 0.0], &[2])])?;
/// assert_eq!(outputs[0].to_vec::<f32>()?, vec![0.5, 0.5]);
/// # Ok(())
/// # }
/// ```
pub struct Session {
    executors: ExecutorMap,
    config: RuntimeConfig,
}

impl Session {
    /// Build executors for every subgraph of `model`.
    #[tracing::instrument(skip_all, fields(subgraphs = model.len()))]
    pub fn new(model: Model, config: RuntimeConfig) -> Result<Self> {
        if config.validate_graphs {
            model.validate()?;
        }

        let executors = ExecutorMap::new();
        let generator = KernelGenerator::new(executors.handle(), config.clone());
        for (index, graph) in model.subgraphs() {
            let _span = tracing::debug_span!("subgraph", index = %index, name = graph.name())
                .entered();
            let executor = LinearExecutor::new(index, graph.clone(), &generator)?;
            executors.insert(index, Box::new(executor));
        }

        Ok(Self { executors, config })
    }

    /// Run the primary subgraph.
    #[tracing::instrument(skip_all, fields(inputs = inputs.len()))]
    pub fn run(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        self.executors.run(SubgraphIndex::PRIMARY, inputs)
    }

    /// Run any subgraph as a top-level entry point.
    pub fn run_subgraph(&self, index: SubgraphIndex, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        self.executors.run(index, inputs)
    }

    pub fn executors(&self) -> &ExecutorMap {
        &self.executors
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}
