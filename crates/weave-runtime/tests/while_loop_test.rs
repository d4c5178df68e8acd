//! End-to-end tests for the While layer.

mod common;

use common::{
    bool_scalar, counter_cond_graph, counter_loop_model, counting_executors, f32_const,
    i32_const, i32_scalar, increment_body_graph, init_tracing, scalar_i32, while_main_graph,
    OpaqueExecutor,
};
use weave_core::{
    DataType, GraphBuilder, Model, OpKind, OperandInfo, SubgraphIndex, TensorData, TensorValue,
};
use weave_runtime::{
    Executor, ExecutorMap, KernelGenerator, LinearExecutor, RuntimeConfig, RuntimeError, Session,
    Tensor, WiredExecutor,
};

const MAIN: SubgraphIndex = SubgraphIndex(0);
const COND: usize = 1;
const BODY: usize = 2;

#[test]
fn test_counter_below_limit_runs_body_three_times() {
    init_tracing();
    let model = counter_loop_model(3);
    let (executors, runs) = counting_executors(&model, RuntimeConfig::default()).unwrap();

    let outputs = executors.run(MAIN, &[Tensor::scalar(0i32)]).unwrap();

    assert_eq!(scalar_i32(&outputs[0]), 3);
    assert_eq!(runs[BODY].get(), 3, "body invocations");
    assert_eq!(runs[COND].get(), 4, "condition invocations");
}

#[test]
fn test_counter_at_limit_skips_body() {
    init_tracing();
    let model = counter_loop_model(3);
    let (executors, runs) = counting_executors(&model, RuntimeConfig::default()).unwrap();

    let outputs = executors.run(MAIN, &[Tensor::scalar(5i32)]).unwrap();

    assert_eq!(scalar_i32(&outputs[0]), 5);
    assert_eq!(runs[BODY].get(), 0, "body invocations");
    assert_eq!(runs[COND].get(), 1, "condition invocations");
    assert!(!outputs[0].is_dynamic());
}

#[test]
fn test_single_iteration_matches_one_body_run() {
    init_tracing();
    let session = Session::new(counter_loop_model(3), RuntimeConfig::default()).unwrap();

    let looped = session.run(&[Tensor::scalar(2i32)]).unwrap();
    let direct = session
        .run_subgraph(SubgraphIndex(BODY as u32), &[Tensor::scalar(2i32)])
        .unwrap();

    assert_eq!(scalar_i32(&looped[0]), 3);
    assert_eq!(looped[0].to_vec::<i32>().unwrap(), direct[0].to_vec::<i32>().unwrap());
    assert_eq!(looped[0].shape(), direct[0].shape());
}

#[test]
fn test_repeated_runs_are_deterministic() {
    init_tracing();
    let session = Session::new(counter_loop_model(4), RuntimeConfig::default()).unwrap();

    let results: Vec<i32> = [0, 9, 0, 1, 0]
        .into_iter()
        .map(|start| scalar_i32(&session.run(&[Tensor::scalar(start)]).unwrap()[0]))
        .collect();

    assert_eq!(results, vec![4, 9, 4, 4, 4]);
}

/// Carries (counter, acc, tag). The condition reads only the counter, the
/// body doubles `acc` and returns `tag` untouched.
fn three_slot_model() -> Model {
    let acc_info = OperandInfo::new(DataType::F32, &[2]);
    let tag_info = OperandInfo::scalar(DataType::I64);

    let mut body = GraphBuilder::new("body");
    let counter = body.input("counter", i32_scalar());
    let acc = body.input("acc", acc_info.clone());
    let tag = body.input("tag", tag_info.clone());
    let one = i32_const(&mut body, "one", 1);
    let two = f32_const(&mut body, "two", 2.0);
    let next = body
        .op("inc", OpKind::Add, &[counter, one], i32_scalar())
        .unwrap();
    let doubled = body
        .op("double", OpKind::Mul, &[acc, two], acc_info.clone())
        .unwrap();
    body.output(next).unwrap();
    body.output(doubled).unwrap();
    body.output(tag).unwrap();

    let mut model = Model::new();
    model.push(while_main_graph(
        &[i32_scalar(), acc_info.clone(), tag_info.clone()],
        1,
        2,
    ));
    model.push(counter_cond_graph(3, &[acc_info, tag_info]));
    model.push(body.build().unwrap());
    model
}

#[test]
fn test_unused_slots_are_carried_through() {
    init_tracing();
    let model = three_slot_model();

    // The condition never reads `acc` or `tag`; the body never reads `tag`.
    let cond = model.subgraph(SubgraphIndex(1)).unwrap();
    assert!(cond.inputs()[1..]
        .iter()
        .all(|&i| cond.operand(i).unwrap().use_count() == 0));

    let session = Session::new(model, RuntimeConfig::default()).unwrap();
    let outputs = session
        .run(&[
            Tensor::scalar(0i32),
            Tensor::from_vec(vec![1.0f32, -0.5], &[2]),
            Tensor::scalar(77i64),
        ])
        .unwrap();

    assert_eq!(scalar_i32(&outputs[0]), 3);
    assert_eq!(outputs[1].to_vec::<f32>().unwrap(), vec![8.0, -4.0]);
    assert_eq!(outputs[2].to_vec::<i64>().unwrap(), vec![77]);

    // Copies into the condition skip the unread slots, so their buffers
    // still hold the zeros they were allocated with.
    let cond_executor = session.executors().get(SubgraphIndex(1)).unwrap();
    let mut cond_executor = cond_executor.borrow_mut();
    let cond_inputs = cond_executor.as_wired_mut().unwrap().input_tensors();
    let acc_slot = cond_inputs[1].snapshot();
    let tag_slot = cond_inputs[2].snapshot();
    assert_eq!(acc_slot.to_vec::<f32>().unwrap(), vec![0.0, 0.0]);
    assert_eq!(tag_slot.to_vec::<i64>().unwrap(), vec![0]);
    assert!(!acc_slot.is_dynamic());
    assert_eq!(scalar_i32(&cond_inputs[0].snapshot()), 3);
}

#[test]
fn test_unused_slots_with_zero_iterations() {
    init_tracing();
    let session = Session::new(three_slot_model(), RuntimeConfig::default()).unwrap();
    let outputs = session
        .run(&[
            Tensor::scalar(10i32),
            Tensor::from_vec(vec![1.0f32, 2.0], &[2]),
            Tensor::scalar(-1i64),
        ])
        .unwrap();

    assert_eq!(scalar_i32(&outputs[0]), 10);
    assert_eq!(outputs[1].to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
    assert_eq!(outputs[2].to_vec::<i64>().unwrap(), vec![-1]);
}

/// Carries (counter, x); every iteration doubles the length of `x`.
fn growing_model(limit: i32) -> Model {
    let x_info = OperandInfo::new(DataType::F32, &[1]);

    let mut body = GraphBuilder::new("body");
    let counter = body.input("counter", i32_scalar());
    let x = body.input("x", x_info.clone());
    let one = i32_const(&mut body, "one", 1);
    let next = body
        .op("inc", OpKind::Add, &[counter, one], i32_scalar())
        .unwrap();
    let grown = body
        .op(
            "grow",
            OpKind::Concat { axis: 0 },
            &[x, x],
            OperandInfo::new(DataType::F32, &[2]),
        )
        .unwrap();
    body.output(next).unwrap();
    body.output(grown).unwrap();

    let mut model = Model::new();
    model.push(while_main_graph(&[i32_scalar(), x_info.clone()], 1, 2));
    model.push(counter_cond_graph(limit, &[x_info]));
    model.push(body.build().unwrap());
    model
}

#[test]
fn test_loop_grows_tensor_dynamically() {
    init_tracing();
    let session = Session::new(growing_model(3), RuntimeConfig::default()).unwrap();

    let outputs = session
        .run(&[Tensor::scalar(0i32), Tensor::from_vec(vec![1.5f32], &[1])])
        .unwrap();

    assert_eq!(scalar_i32(&outputs[0]), 3);
    assert_eq!(outputs[1].shape(), &[8]);
    assert_eq!(outputs[1].to_vec::<f32>().unwrap(), vec![1.5; 8]);
    assert!(outputs[1].is_dynamic());
    assert!(!outputs[0].is_dynamic());
}

#[test]
fn test_dynamic_shapes_reset_on_next_run() {
    init_tracing();
    let session = Session::new(growing_model(2), RuntimeConfig::default()).unwrap();

    let first = session
        .run(&[Tensor::scalar(0i32), Tensor::from_vec(vec![1.0f32], &[1])])
        .unwrap();
    assert_eq!(first[1].shape(), &[4]);

    // Zero iterations: the output takes the input's shape again.
    let second = session
        .run(&[Tensor::scalar(5i32), Tensor::from_vec(vec![2.0f32], &[1])])
        .unwrap();
    assert_eq!(second[1].shape(), &[1]);
    assert_eq!(second[1].to_vec::<f32>().unwrap(), vec![2.0]);
}

/// Outer body over (i, acc): runs an inner loop over (0, acc), returns
/// (i + 1, inner acc).
fn outer_body_graph(inner_cond: u32, inner_body: u32) -> weave_core::Graph {
    let mut body = GraphBuilder::new("outer_body");
    let i = body.input("i", i32_scalar());
    let acc = body.input("acc", i32_scalar());
    let one = i32_const(&mut body, "one", 1);
    let zero = i32_const(&mut body, "zero", 0);
    let next_i = body
        .op("inc_i", OpKind::Add, &[i, one], i32_scalar())
        .unwrap();
    let inner = body
        .op_multi(
            "inner_loop",
            OpKind::While {
                cond: SubgraphIndex(inner_cond),
                body: SubgraphIndex(inner_body),
            },
            &[zero, acc],
            vec![i32_scalar(), i32_scalar()],
        )
        .unwrap();
    body.output(next_i).unwrap();
    body.output(inner[1]).unwrap();
    body.build().unwrap()
}

/// Inner body over (j, acc): returns (j + 1, acc + 1).
fn inner_body_graph() -> weave_core::Graph {
    let mut inner_body = GraphBuilder::new("inner_body");
    let j = inner_body.input("j", i32_scalar());
    let acc = inner_body.input("acc", i32_scalar());
    let one = i32_const(&mut inner_body, "one", 1);
    let next_j = inner_body
        .op("inc_j", OpKind::Add, &[j, one], i32_scalar())
        .unwrap();
    let next_acc = inner_body
        .op("inc_acc", OpKind::Add, &[acc, one], i32_scalar())
        .unwrap();
    inner_body.output(next_j).unwrap();
    inner_body.output(next_acc).unwrap();
    inner_body.build().unwrap()
}

/// Outer loop runs three times; each time an inner loop adds 2 to `acc`.
fn nested_model() -> Model {
    let mut model = Model::new();
    // 0: main(i, acc)
    model.push(while_main_graph(&[i32_scalar(), i32_scalar()], 1, 2));
    // 1: outer cond, i < 3
    model.push(counter_cond_graph(3, &[i32_scalar()]));
    // 2: outer body
    model.push(outer_body_graph(3, 4));
    // 3: inner cond, j < 2
    model.push(counter_cond_graph(2, &[i32_scalar()]));
    // 4: inner body
    model.push(inner_body_graph());
    model
}

/// Both loops use subgraph 1 (`counter < 3`) as their condition.
fn shared_cond_nested_model() -> Model {
    let mut model = Model::new();
    model.push(while_main_graph(&[i32_scalar(), i32_scalar()], 1, 2));
    model.push(counter_cond_graph(3, &[i32_scalar()]));
    model.push(outer_body_graph(1, 3));
    model.push(inner_body_graph());
    model
}

#[test]
fn test_nested_loops() {
    init_tracing();
    let model = nested_model();
    let (executors, runs) = counting_executors(&model, RuntimeConfig::default()).unwrap();

    let outputs = executors
        .run(MAIN, &[Tensor::scalar(0i32), Tensor::scalar(0i32)])
        .unwrap();

    assert_eq!(scalar_i32(&outputs[0]), 3);
    assert_eq!(scalar_i32(&outputs[1]), 6);
    assert_eq!(runs[2].get(), 3, "outer body invocations");
    assert_eq!(runs[4].get(), 6, "inner body invocations");
}

#[test]
fn test_nested_loops_share_condition_subgraph() {
    init_tracing();
    let model = shared_cond_nested_model();
    let (executors, runs) = counting_executors(&model, RuntimeConfig::default()).unwrap();

    let outputs = executors
        .run(MAIN, &[Tensor::scalar(0i32), Tensor::scalar(0i32)])
        .unwrap();

    assert_eq!(scalar_i32(&outputs[0]), 3);
    assert_eq!(scalar_i32(&outputs[1]), 9);
    assert_eq!(runs[2].get(), 3, "outer body invocations");
    assert_eq!(runs[3].get(), 9, "inner body invocations");
    // 4 outer checks plus 4 inner checks per outer iteration.
    assert_eq!(runs[1].get(), 16, "condition invocations");

    // A second run starts from fresh copies, not leftovers of the inner loop.
    let again = executors
        .run(MAIN, &[Tensor::scalar(1i32), Tensor::scalar(10i32)])
        .unwrap();
    assert_eq!(scalar_i32(&again[0]), 3);
    assert_eq!(scalar_i32(&again[1]), 16);
}

#[test]
fn test_iteration_limit() {
    init_tracing();
    let config = RuntimeConfig::default().with_max_loop_iterations(5);
    let session = Session::new(counter_loop_model(1_000), config).unwrap();

    let err = session.run(&[Tensor::scalar(0i32)]).unwrap_err();
    assert!(matches!(err.root_cause(), RuntimeError::IterationLimit(5)));
}

#[test]
fn test_iteration_limit_allows_exact_count() {
    init_tracing();
    let config = RuntimeConfig::default().with_max_loop_iterations(3);
    let session = Session::new(counter_loop_model(3), config).unwrap();

    let outputs = session.run(&[Tensor::scalar(0i32)]).unwrap();
    assert_eq!(scalar_i32(&outputs[0]), 3);
}

#[test]
fn test_non_bool_condition_is_malformed() {
    init_tracing();
    let mut cond = GraphBuilder::new("cond");
    let x = cond.input("x", i32_scalar());
    let one = i32_const(&mut cond, "one", 1);
    let y = cond.op("add", OpKind::Add, &[x, one], i32_scalar()).unwrap();
    cond.output(y).unwrap();

    let mut model = Model::new();
    model.push(while_main_graph(&[i32_scalar()], 1, 2));
    model.push(cond.build().unwrap());
    model.push(increment_body_graph());

    let session = Session::new(model, RuntimeConfig::default()).unwrap();
    let err = session.run(&[Tensor::scalar(0i32)]).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        RuntimeError::MalformedCondition(_)
    ));
}

#[test]
fn test_multi_element_condition_is_malformed() {
    init_tracing();
    let mut cond = GraphBuilder::new("cond");
    let x = cond.input("x", i32_scalar());
    let limits = cond.constant(
        "limits",
        TensorValue::new(TensorData::I32(vec![3, 4]), vec![2]).unwrap(),
    );
    let y = cond
        .op(
            "less",
            OpKind::Less,
            &[x, limits],
            OperandInfo::new(DataType::Bool, &[2]),
        )
        .unwrap();
    cond.output(y).unwrap();

    let mut model = Model::new();
    model.push(while_main_graph(&[i32_scalar()], 1, 2));
    model.push(cond.build().unwrap());
    model.push(increment_body_graph());

    let session = Session::new(model, RuntimeConfig::default()).unwrap();
    let err = session.run(&[Tensor::scalar(0i32)]).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        RuntimeError::MalformedCondition(_)
    ));
}

#[test]
fn test_missing_body_executor() {
    init_tracing();
    let model = counter_loop_model(3);
    let executors = ExecutorMap::new();
    let generator = KernelGenerator::new(executors.handle(), RuntimeConfig::default());
    for index in [0u32, 1] {
        let index = SubgraphIndex(index);
        let graph = model.subgraph(index).unwrap().clone();
        executors.insert(
            index,
            Box::new(LinearExecutor::new(index, graph, &generator).unwrap()),
        );
    }

    let err = executors.run(MAIN, &[Tensor::scalar(0i32)]).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        RuntimeError::ExecutorNotFound(SubgraphIndex(2))
    ));
}

#[test]
fn test_body_executor_without_wiring() {
    init_tracing();
    let model = counter_loop_model(3);
    let (executors, _) = counting_executors(&model, RuntimeConfig::default()).unwrap();
    executors.insert(SubgraphIndex(2), Box::new(OpaqueExecutor));

    let err = executors.run(MAIN, &[Tensor::scalar(0i32)]).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        RuntimeError::ExecutorKind(SubgraphIndex(2))
    ));
}

#[test]
fn test_shared_cond_and_body_is_busy() {
    init_tracing();
    let mut shared = GraphBuilder::new("shared");
    let x = shared.input("x", i32_scalar());
    let limit = i32_const(&mut shared, "limit", 3);
    let y = shared
        .op("less", OpKind::Less, &[x, limit], bool_scalar())
        .unwrap();
    shared.output(y).unwrap();

    let mut model = Model::new();
    model.push(while_main_graph(&[i32_scalar()], 1, 1));
    model.push(shared.build().unwrap());

    let session = Session::new(model, RuntimeConfig::default()).unwrap();
    let err = session.run(&[Tensor::scalar(0i32)]).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        RuntimeError::ExecutorBusy(SubgraphIndex(1))
    ));
}

#[test]
fn test_recursive_body_is_busy() {
    init_tracing();
    let mut model = Model::new();
    // The loop body is the primary subgraph itself.
    model.push(while_main_graph(&[i32_scalar()], 1, 0));
    model.push(counter_cond_graph(3, &[]));

    let session = Session::new(model, RuntimeConfig::default()).unwrap();
    let err = session.run(&[Tensor::scalar(0i32)]).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        RuntimeError::ExecutorBusy(SubgraphIndex(0))
    ));
}

#[test]
fn test_wrapped_error_names_loop_operation() {
    init_tracing();
    let config = RuntimeConfig::default().with_max_loop_iterations(1);
    let session = Session::new(counter_loop_model(10), config).unwrap();

    let err = session.run(&[Tensor::scalar(0i32)]).unwrap_err();
    assert!(err.to_string().contains("'loop'"), "{err}");
}
