//! Registry of executors keyed by subgraph index.

use crate::error::{Result, RuntimeError};
use crate::executor::Executor;
use crate::tensor::Tensor;
use std::cell::{RefCell, RefMut};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use weave_core::SubgraphIndex;

/// A registered executor, shared between the map and whoever is running it.
pub type SharedExecutor = Rc<RefCell<Box<dyn Executor>>>;

type Entries = RefCell<HashMap<SubgraphIndex, SharedExecutor>>;

/// Executors for every subgraph of a model.
///
/// Cloning the map shares the registry. Executors are borrowed exclusively
/// while they run, so re-entering a running executor fails with
/// `ExecutorBusy` instead of aliasing its tensors.
#[derive(Clone, Default)]
pub struct ExecutorMap {
    entries: Rc<Entries>,
}

impl ExecutorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the executor for `index`, replacing any previous one.
    pub fn insert(&self, index: SubgraphIndex, executor: Box<dyn Executor>) {
        self.entries
            .borrow_mut()
            .insert(index, Rc::new(RefCell::new(executor)));
    }

    /// Look up the executor for `index`.
    pub fn get(&self, index: SubgraphIndex) -> Result<SharedExecutor> {
        self.entries
            .borrow()
            .get(&index)
            .cloned()
            .ok_or(RuntimeError::ExecutorNotFound(index))
    }

    pub fn contains(&self, index: SubgraphIndex) -> bool {
        self.entries.borrow().contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Run the executor for `index` as a top-level entry point.
    pub fn run(&self, index: SubgraphIndex, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let executor = self.get(index)?;
        let mut executor = borrow_executor(&executor, index)?;
        executor.run(inputs)
    }

    /// A non-owning handle for functions stored inside the executors.
    pub fn handle(&self) -> ExecutorMapHandle {
        ExecutorMapHandle {
            entries: Rc::downgrade(&self.entries),
        }
    }
}

/// Exclusively borrow a shared executor.
pub fn borrow_executor(
    executor: &SharedExecutor,
    index: SubgraphIndex,
) -> Result<RefMut<'_, Box<dyn Executor>>> {
    executor
        .try_borrow_mut()
        .map_err(|_| RuntimeError::ExecutorBusy(index))
}

/// Weak reference to an `ExecutorMap`.
///
/// Control-flow layers live inside executors owned by the map, so they hold
/// this instead of the map itself.
#[derive(Clone)]
pub struct ExecutorMapHandle {
    entries: Weak<Entries>,
}

impl ExecutorMapHandle {
    /// Resolve the executor for `index`.
    pub fn get(&self, index: SubgraphIndex) -> Result<SharedExecutor> {
        let entries = self.entries.upgrade().ok_or_else(|| {
            RuntimeError::ExecutionError("Executor map was dropped".to_string())
        })?;
        let found = entries.borrow().get(&index).cloned();
        found.ok_or(RuntimeError::ExecutorNotFound(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Executor for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn run(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
            Ok(inputs.to_vec())
        }
    }

    #[test]
    fn test_missing_executor() {
        let map = ExecutorMap::new();
        assert!(matches!(
            map.get(SubgraphIndex(3)),
            Err(RuntimeError::ExecutorNotFound(SubgraphIndex(3)))
        ));
        assert!(matches!(
            map.handle().get(SubgraphIndex(3)),
            Err(RuntimeError::ExecutorNotFound(_))
        ));
    }

    #[test]
    fn test_run_registered_executor() {
        let map = ExecutorMap::new();
        map.insert(SubgraphIndex(0), Box::new(Echo));
        assert!(map.contains(SubgraphIndex(0)));
        assert_eq!(map.len(), 1);

        let outputs = map.run(SubgraphIndex(0), &[Tensor::scalar(3i32)]).unwrap();
        assert_eq!(outputs[0].to_vec::<i32>().unwrap(), vec![3]);

        let via_handle = map.handle().get(SubgraphIndex(0)).unwrap();
        assert!(Rc::ptr_eq(&via_handle, &map.get(SubgraphIndex(0)).unwrap()));
    }

    #[test]
    fn test_reentry_is_busy() {
        let map = ExecutorMap::new();
        map.insert(SubgraphIndex(0), Box::new(Echo));

        let executor = map.get(SubgraphIndex(0)).unwrap();
        let _running = borrow_executor(&executor, SubgraphIndex(0)).unwrap();
        assert!(matches!(
            map.run(SubgraphIndex(0), &[]),
            Err(RuntimeError::ExecutorBusy(SubgraphIndex(0)))
        ));
    }

    #[test]
    fn test_handle_outlived_map() {
        let map = ExecutorMap::new();
        let handle = map.handle();
        drop(map);
        assert!(matches!(
            handle.get(SubgraphIndex(0)),
            Err(RuntimeError::ExecutionError(_))
        ));
    }

    #[test]
    fn test_echo_is_not_wired() {
        let mut echo = Echo;
        assert!(echo.as_wired_mut().is_none());
    }
}
