use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use flowcore::activity::{Activity, ActivityContext, Metadata};
use flowcore::data::attribute::DataType;
use flowcore::data::mapper::MappingDef;
use flowcore::definition::builder::FlowBuilder;
use flowcore::definition::FlowDefinition;
use flowcore::error::FlowError;
use flowcore::instance::changes::{Change, ChangeType};
use flowcore::instance::{FlowInstance, InstanceSnapshot, MemoryChangeSink};
use flowcore::model::{FlowStatus, LinkStatus, TaskContext, TaskStatus};
use flowcore::runtime::{Engine, EngineConfig};
use serde_json::{Value, json};

#[derive(Debug)]
struct EchoActivity {
    metadata: Metadata,
    calls: Arc<AtomicUsize>,
}

impl Activity for EchoActivity {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn eval(&self, ctx: &dyn ActivityContext) -> Result<bool, flowcore::error::ActivityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let value = ctx.get_input("value").unwrap_or(Value::Null);
        ctx.set_output("result", value)
            .map_err(|e| flowcore::error::ActivityError::new(e.to_string()))?;
        Ok(true)
    }
}

/// Never finishes on its own; completed through `Engine::complete_task`.
#[derive(Debug)]
struct WaitActivity {
    metadata: Metadata,
}

impl Activity for WaitActivity {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn eval(&self, _ctx: &dyn ActivityContext) -> Result<bool, flowcore::error::ActivityError> {
        Ok(false)
    }
}

struct TestEngine {
    engine: Engine,
    sink: Arc<MemoryChangeSink>,
    echo_calls: Arc<AtomicUsize>,
}

fn setup_engine(config: EngineConfig) -> TestEngine {
    let sink = Arc::new(MemoryChangeSink::new());
    let engine = Engine::with_config(config).with_change_sink(sink.clone());

    let echo_calls = Arc::new(AtomicUsize::new(0));
    engine.register_activity(Arc::new(EchoActivity {
        metadata: Metadata::new("echo")
            .with_input("value", DataType::Any)
            .with_output("result", DataType::Any),
        calls: echo_calls.clone(),
    }));
    engine.register_activity(Arc::new(WaitActivity {
        metadata: Metadata::new("wait").with_output("result", DataType::Any),
    }));

    TestEngine {
        engine,
        sink,
        echo_calls,
    }
}

fn default_engine() -> TestEngine {
    setup_engine(EngineConfig::default())
}

fn task_status(engine: &Engine, instance_id: &str, task_id: &str) -> Option<TaskStatus> {
    engine
        .instance(instance_id)
        .and_then(|inst| inst.task_inst(task_id))
        .map(|t| t.status())
}

fn register(engine: &Engine, def: FlowDefinition) {
    engine.register_flow(def);
}

#[test]
fn test_linear_flow_passes_data_between_tasks() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("linear")
            .task("a", "echo")
            .input("value", "hi")
            .build()
            .task("b", "echo")
            .map_input(MappingDef::assign("value", "$activity[a].result"))
            .build()
            .link("a", "b")
            .definition()
            .expect("Failed to build definition"),
    );

    let inst = t
        .engine
        .start_flow("linear", HashMap::new())
        .expect("Failed to run flow");

    assert_eq!(inst.status(), FlowStatus::Completed);
    assert_eq!(inst.attr_value("_A.b.result"), Some(json!("hi")));
    assert_eq!(task_status(&t.engine, inst.id(), "a"), Some(TaskStatus::Done));
    assert_eq!(task_status(&t.engine, inst.id(), "b"), Some(TaskStatus::Done));
    assert_eq!(inst.link_insts()[0].status(), LinkStatus::True);
    assert_eq!(t.echo_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_conditional_branch_skips_other_path() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("branch")
            .noop("check")
            .task("big", "echo")
            .input("value", "big")
            .build()
            .task("small", "echo")
            .input("value", "small")
            .build()
            .link_if("check", "big", "${count} > 3")
            .link_if("check", "small", "${count} <= 3")
            .definition()
            .expect("Failed to build definition"),
    );

    let attrs = HashMap::from([("count".to_string(), json!(5))]);
    let inst = t.engine.start_flow("branch", attrs).expect("Failed to run flow");

    assert_eq!(inst.status(), FlowStatus::Completed);
    assert_eq!(task_status(&t.engine, inst.id(), "big"), Some(TaskStatus::Done));
    assert_eq!(task_status(&t.engine, inst.id(), "small"), Some(TaskStatus::Skipped));
    assert_eq!(inst.attr_value("_A.big.result"), Some(json!("big")));
    assert_eq!(inst.attr_value("_A.small.result"), None);
}

#[test]
fn test_skip_propagates_down_a_chain() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("skip-chain")
            .attr("go", false)
            .noop("a")
            .noop("b")
            .noop("c")
            .link_if("a", "b", "go")
            .link("b", "c")
            .definition()
            .expect("Failed to build definition"),
    );

    let inst = t
        .engine
        .start_flow("skip-chain", HashMap::new())
        .expect("Failed to run flow");

    assert_eq!(inst.status(), FlowStatus::Completed);
    assert_eq!(task_status(&t.engine, inst.id(), "b"), Some(TaskStatus::Skipped));
    assert_eq!(task_status(&t.engine, inst.id(), "c"), Some(TaskStatus::Skipped));

    let statuses: Vec<LinkStatus> = inst.link_insts().iter().map(|l| l.status()).collect();
    assert_eq!(statuses, vec![LinkStatus::False, LinkStatus::Skipped]);
}

#[test]
fn test_join_runs_once_after_all_branches() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("join")
            .noop("a")
            .noop("b")
            .noop("c")
            .task("d", "echo")
            .input("value", "joined")
            .build()
            .link("a", "b")
            .link("a", "c")
            .link("b", "d")
            .link("c", "d")
            .definition()
            .expect("Failed to build definition"),
    );

    let inst = t
        .engine
        .start_flow("join", HashMap::new())
        .expect("Failed to run flow");

    assert_eq!(inst.status(), FlowStatus::Completed);
    assert_eq!(t.echo_calls.load(Ordering::SeqCst), 1);
    assert_eq!(task_status(&t.engine, inst.id(), "d"), Some(TaskStatus::Done));
}

#[test]
fn test_join_with_one_live_branch_still_runs() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("half-join")
            .attr("left", true)
            .noop("a")
            .noop("b")
            .noop("c")
            .task("d", "echo")
            .build()
            .link_if("a", "b", "left")
            .link_if("a", "c", "!left")
            .link("b", "d")
            .link("c", "d")
            .definition()
            .expect("Failed to build definition"),
    );

    let inst = t
        .engine
        .start_flow("half-join", HashMap::new())
        .expect("Failed to run flow");

    assert_eq!(inst.status(), FlowStatus::Completed);
    assert_eq!(task_status(&t.engine, inst.id(), "c"), Some(TaskStatus::Skipped));
    assert_eq!(task_status(&t.engine, inst.id(), "d"), Some(TaskStatus::Done));
    assert_eq!(t.echo_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unhandled_failure_fails_flow() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("fails")
            .task("a", "error")
            .input("message", "broken")
            .build()
            .task("b", "echo")
            .build()
            .link("a", "b")
            .definition()
            .expect("Failed to build definition"),
    );

    let inst = t
        .engine
        .start_flow("fails", HashMap::new())
        .expect("Failed to run flow");

    assert_eq!(inst.status(), FlowStatus::Failed);
    assert_eq!(task_status(&t.engine, inst.id(), "a"), Some(TaskStatus::Failed));
    assert_eq!(task_status(&t.engine, inst.id(), "b"), None);
    assert_eq!(t.echo_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_error_link_handles_failure() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("handled")
            .task("a", "error")
            .build()
            .task("next", "echo")
            .build()
            .task("handler", "echo")
            .input("value", "recovered")
            .build()
            .link("a", "next")
            .link_error("a", "handler")
            .definition()
            .expect("Failed to build definition"),
    );

    let inst = t
        .engine
        .start_flow("handled", HashMap::new())
        .expect("Failed to run flow");

    assert_eq!(inst.status(), FlowStatus::Completed);
    assert_eq!(task_status(&t.engine, inst.id(), "a"), Some(TaskStatus::Failed));
    assert_eq!(task_status(&t.engine, inst.id(), "next"), Some(TaskStatus::Skipped));
    assert_eq!(task_status(&t.engine, inst.id(), "handler"), Some(TaskStatus::Done));
    assert_eq!(inst.attr_value("_A.handler.result"), Some(json!("recovered")));
}

#[test]
fn test_error_link_not_taken_on_success() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("no-error")
            .task("a", "echo")
            .build()
            .task("handler", "echo")
            .build()
            .link_error("a", "handler")
            .definition()
            .expect("Failed to build definition"),
    );

    let inst = t
        .engine
        .start_flow("no-error", HashMap::new())
        .expect("Failed to run flow");

    assert_eq!(inst.status(), FlowStatus::Completed);
    assert_eq!(task_status(&t.engine, inst.id(), "handler"), Some(TaskStatus::Skipped));
    assert_eq!(t.echo_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_waiting_task_suspends_until_completed() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("waits")
            .task("a", "wait")
            .build()
            .task("b", "echo")
            .map_input(MappingDef::assign("value", "$activity[a].result"))
            .build()
            .link("a", "b")
            .definition()
            .expect("Failed to build definition"),
    );

    let inst = t
        .engine
        .start_flow("waits", HashMap::new())
        .expect("Failed to run flow");

    assert_eq!(inst.status(), FlowStatus::Active);
    assert_eq!(task_status(&t.engine, inst.id(), "a"), Some(TaskStatus::Waiting));
    assert_eq!(task_status(&t.engine, inst.id(), "b"), None);

    let outputs = HashMap::from([("result".to_string(), json!("ok"))]);
    t.engine
        .complete_task(inst.id(), "a", outputs)
        .expect("Failed to complete task");

    assert_eq!(inst.status(), FlowStatus::Completed);
    assert_eq!(inst.attr_value("_A.b.result"), Some(json!("ok")));
}

#[test]
fn test_complete_task_rejects_non_waiting_task() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("done-already")
            .task("a", "echo")
            .build()
            .definition()
            .expect("Failed to build definition"),
    );

    let inst = t
        .engine
        .start_flow("done-already", HashMap::new())
        .expect("Failed to run flow");

    let result = t.engine.complete_task(inst.id(), "a", HashMap::new());
    assert!(result.is_err());
}

#[test]
fn test_snapshot_resume_continues_flow() {
    let flow = || {
        FlowBuilder::new("resumable")
            .attr("customer", "acme")
            .task("a", "wait")
            .build()
            .task("b", "echo")
            .map_input(MappingDef::assign("value", "$flow.customer"))
            .build()
            .link("a", "b")
            .definition()
            .expect("Failed to build definition")
    };

    // 1. Run until the flow suspends on the waiting task
    let first = default_engine();
    register(&first.engine, flow());
    let inst = first
        .engine
        .start_flow("resumable", HashMap::new())
        .expect("Failed to run flow");
    assert_eq!(inst.status(), FlowStatus::Active);

    let json = inst.snapshot().to_json().expect("Failed to serialize snapshot");
    let snapshot = InstanceSnapshot::from_json(&json).expect("Failed to parse snapshot");
    assert_eq!(snapshot.tasks.len(), 1);
    assert_eq!(snapshot.tasks[0].status, TaskStatus::Waiting);

    // 2. Rehydrate on a fresh engine
    let second = default_engine();
    register(&second.engine, flow());
    let resumed = second
        .engine
        .resume_flow(snapshot)
        .expect("Failed to resume flow");

    assert_eq!(resumed.id(), inst.id());
    assert_eq!(resumed.status(), FlowStatus::Active);
    assert_eq!(resumed.attr_value("customer"), Some(json!("acme")));

    // 3. Finish it there
    second
        .engine
        .complete_task(resumed.id(), "a", HashMap::new())
        .expect("Failed to complete task");

    assert_eq!(resumed.status(), FlowStatus::Completed);
    assert_eq!(resumed.attr_value("_A.b.result"), Some(json!("acme")));

    // Numbering continues after the checkpoint
    let first_seq = second.sink.records().first().map(|r| r.seq).expect("records");
    assert_eq!(first_seq, inst.snapshot().seq + 1);
}

#[test]
fn test_resume_of_unstarted_instance_runs_it() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("fresh")
            .task("a", "echo")
            .input("value", 1)
            .build()
            .definition()
            .expect("Failed to build definition"),
    );

    let inst = t
        .engine
        .new_instance("fresh", None)
        .expect("Failed to create instance");
    let resumed = t
        .engine
        .resume_flow(inst.snapshot())
        .expect("Failed to resume flow");

    assert_eq!(resumed.status(), FlowStatus::Completed);
    assert_eq!(resumed.attr_value("_A.a.result"), Some(json!(1)));
}

#[test]
fn test_snapshot_of_other_flow_rejected() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("one")
            .noop("a")
            .definition()
            .expect("Failed to build definition"),
    );
    let two = t.engine.register_flow(
        FlowBuilder::new("two")
            .noop("x")
            .definition()
            .expect("Failed to build definition"),
    );

    let inst = t.engine.new_instance("one", None).expect("instance");
    let err = FlowInstance::restore(two, t.engine.services(), inst.snapshot(), None)
        .expect_err("foreign snapshot must be rejected");
    assert_eq!(
        err,
        FlowError::SnapshotMismatch {
            expected: "two".to_string(),
            actual: "one".to_string(),
        }
    );
}

#[test]
fn test_resume_rejects_tasks_unknown_to_the_flow() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("one")
            .noop("a")
            .definition()
            .expect("Failed to build definition"),
    );
    register(
        &t.engine,
        FlowBuilder::new("two")
            .noop("x")
            .definition()
            .expect("Failed to build definition"),
    );

    let inst = t
        .engine
        .start_flow("one", HashMap::new())
        .expect("Failed to run flow");
    let mut snapshot = inst.snapshot();
    snapshot.flow_id = "two".to_string();

    let err = t
        .engine
        .resume_flow(snapshot)
        .expect_err("snapshot with unknown task must fail");
    assert_eq!(
        err.downcast_ref::<FlowError>(),
        Some(&FlowError::UnknownTask("a".to_string()))
    );
}

#[test]
fn test_failed_flow_is_not_completed_by_late_task() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("late")
            .task("a", "wait")
            .build()
            .task("b", "error")
            .build()
            .definition()
            .expect("Failed to build definition"),
    );

    let inst = t
        .engine
        .start_flow("late", HashMap::new())
        .expect("Failed to run flow");
    assert_eq!(inst.status(), FlowStatus::Failed);
    assert_eq!(task_status(&t.engine, inst.id(), "a"), Some(TaskStatus::Waiting));

    let outputs = HashMap::from([("result".to_string(), json!("ok"))]);
    let result = t.engine.complete_task(inst.id(), "a", outputs);

    assert!(result.is_err());
    assert_eq!(inst.status(), FlowStatus::Failed);
    assert_eq!(task_status(&t.engine, inst.id(), "a"), Some(TaskStatus::Waiting));
    assert_eq!(inst.attr_value("_A.a.result"), None);
}

#[test]
fn test_change_records_are_ordered() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("recorded")
            .noop("a")
            .noop("b")
            .link("a", "b")
            .definition()
            .expect("Failed to build definition"),
    );

    t.engine
        .start_flow("recorded", HashMap::new())
        .expect("Failed to run flow");

    let records = t.sink.records();
    let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
    let expected: Vec<u64> = (1..=records.len() as u64).collect();
    assert_eq!(seqs, expected);

    assert_eq!(
        records.first().map(|r| &r.change),
        Some(&Change::FlowStatus {
            status: FlowStatus::Active
        })
    );
    assert_eq!(
        records.last().map(|r| &r.change),
        Some(&Change::FlowStatus {
            status: FlowStatus::Completed
        })
    );
    assert!(records.iter().any(|r| r.chg_type == ChangeType::Add
        && r.change
            == Change::TaskStatus {
                task_id: "b".to_string(),
                status: TaskStatus::NotStarted,
            }));
}

#[test]
fn test_max_steps_guard() {
    let config = EngineConfig {
        max_steps: 1,
        ..Default::default()
    };
    let t = setup_engine(config);
    register(
        &t.engine,
        FlowBuilder::new("long")
            .noop("a")
            .noop("b")
            .link("a", "b")
            .definition()
            .expect("Failed to build definition"),
    );

    let result = t.engine.start_flow("long", HashMap::new());
    assert!(result.is_err());
}

#[test]
fn test_flow_without_tasks_completes() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("empty")
            .definition()
            .expect("Failed to build definition"),
    );

    let inst = t
        .engine
        .start_flow("empty", HashMap::new())
        .expect("Failed to run flow");

    assert_eq!(inst.status(), FlowStatus::Completed);
}

#[test]
fn test_unknown_flow_and_model() {
    let t = default_engine();
    assert!(t.engine.start_flow("nope", HashMap::new()).is_err());

    let config = EngineConfig {
        flow_model: "missing".to_string(),
        ..Default::default()
    };
    let t = setup_engine(config);
    register(
        &t.engine,
        FlowBuilder::new("x")
            .noop("a")
            .definition()
            .expect("Failed to build definition"),
    );
    assert!(t.engine.start_flow("x", HashMap::new()).is_err());
}

#[test]
fn test_expression_activity_and_log() {
    let t = default_engine();
    register(
        &t.engine,
        FlowBuilder::new("builtins")
            .task("calc", "expression")
            .input("expression", "count * 2")
            .build()
            .task("say", "log")
            .input("message", "done")
            .input("flowInfo", true)
            .build()
            .link("calc", "say")
            .definition()
            .expect("Failed to build definition"),
    );

    let attrs = HashMap::from([("count".to_string(), json!(21))]);
    let inst = t.engine.start_flow("builtins", attrs).expect("Failed to run flow");

    assert_eq!(inst.status(), FlowStatus::Completed);
    assert_eq!(inst.attr_value("_A.calc.result"), Some(json!(42)));
}
