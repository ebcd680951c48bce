//! Lifecycle tests for single-threaded runs.
//!
//! Each test builds a small tree of `ScriptedNode`s, runs it on the
//! same-thread service and checks the interleaving of node phases and
//! listener events recorded in the `Journal`.


use canopy_engine::config::ConfigurationParameters;
use canopy_engine::interrupt;
use canopy_engine::prelude::*;
use canopy_engine::testkit::EventKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use test_utils::{
    Ctx, Fault, Journal, Phase, Run, ScriptedNode, case, container, engine_id, root, run,
    run_with,
};

fn same_thread() -> ConfigurationParameters {
    ConfigurationParameters::new()
}

// ─────────────────────────────────────────────────────────────────────────────
// Happy path
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn phases_and_events_interleave_in_lifecycle_order() {
    let journal = Journal::new();
    let root = root(&journal);
    root.add_child(case(&engine_id(), "leaf", ScriptedNode::new("leaf", &journal)));

    let run = run(&root, &journal, same_thread());
    run.assert_well_formed();

    assert_eq!(
        journal.entries_for("leaf"),
        vec![
            "prepare",
            "should_be_skipped",
            "@started",
            "around>",
            "before",
            "execute",
            "after",
            "around<",
            "clean_up",
            "node_finished(successful)",
            "@finished(successful)",
        ]
    );

    let leaf_finished = journal.index_of("leaf:@finished(successful)").unwrap();
    assert!(journal.index_of("root:execute").unwrap() < journal.index_of("leaf:prepare").unwrap());
    assert!(leaf_finished < journal.index_of("root:after").unwrap());
    assert_eq!(run.summary().nodes_executed, 2);
    assert_eq!(run.summary().worker_threads, 1);
}

#[test]
fn context_flows_from_parent_to_child() {
    let journal = Journal::new();
    let root = root(&journal);
    let outer = container(&engine_id(), "outer", ScriptedNode::new("outer", &journal));
    outer.add_child(case(outer.unique_id(), "inner", ScriptedNode::new("inner", &journal)));
    root.add_child(outer);

    run(&root, &journal, same_thread()).assert_well_formed();

    assert_eq!(journal.context_of("root").as_deref(), Some("root"));
    assert_eq!(journal.context_of("outer").as_deref(), Some("root/outer"));
    assert_eq!(journal.context_of("inner").as_deref(), Some("root/outer/inner"));
}

#[test]
fn children_run_in_declaration_order_on_the_same_thread() {
    let journal = Journal::new();
    let root = root(&journal);
    for name in ["a", "b", "c"] {
        root.add_child(case(&engine_id(), name, ScriptedNode::new(name, &journal)));
    }

    run(&root, &journal, same_thread()).assert_well_formed();

    let a = journal.index_of("a:@finished(successful)").unwrap();
    let b = journal.index_of("b:@started").unwrap();
    let b_done = journal.index_of("b:@finished(successful)").unwrap();
    let c = journal.index_of("c:@started").unwrap();
    assert!(a < b && b_done < c);
}

// ─────────────────────────────────────────────────────────────────────────────
// Failures
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn failing_prepare_synthesizes_start_and_skips_everything_else() {
    let journal = Journal::new();
    let root = root(&journal);
    let leaf = case(
        &engine_id(),
        "leaf",
        ScriptedNode::new("leaf", &journal).fault(Phase::Prepare, Fault::Fail),
    );
    root.add_child(Arc::clone(&leaf));

    let run = run(&root, &journal, same_thread());
    run.assert_well_formed();

    assert_eq!(
        journal.entries_for("leaf"),
        vec![
            "prepare",
            "@started",
            "node_finished(failed, no context)",
            "@finished(failed)",
        ]
    );
    assert_eq!(run.status(&leaf), Some(Status::Failed));
    assert_eq!(run.status(&root), Some(Status::Successful));
}

#[test]
fn failing_before_skips_execute_children_and_after() {
    let journal = Journal::new();
    let root = root(&journal);
    let parent = container(
        &engine_id(),
        "parent",
        ScriptedNode::new("parent", &journal).fault(Phase::Before, Fault::Fail),
    );
    parent.add_child(case(parent.unique_id(), "child", ScriptedNode::new("child", &journal)));
    root.add_child(Arc::clone(&parent));

    let run = run(&root, &journal, same_thread());
    run.assert_well_formed();

    assert_eq!(
        journal.entries_for("parent"),
        vec![
            "prepare",
            "should_be_skipped",
            "@started",
            "around>",
            "before",
            "around<",
            "clean_up",
            "node_finished(failed)",
            "@finished(failed)",
        ]
    );
    assert!(journal.entries_for("child").is_empty());
}

#[test]
fn failing_execute_still_runs_after_but_not_children() {
    let journal = Journal::new();
    let root = root(&journal);
    let parent = container(
        &engine_id(),
        "parent",
        ScriptedNode::new("parent", &journal).fault(Phase::Execute, Fault::Fail),
    );
    parent.add_child(case(parent.unique_id(), "child", ScriptedNode::new("child", &journal)));
    root.add_child(Arc::clone(&parent));

    let run = run(&root, &journal, same_thread());
    run.assert_well_formed();

    assert!(journal.contains("parent:after"));
    assert!(journal.contains("parent:clean_up"));
    assert!(journal.entries_for("child").is_empty());
    assert_eq!(run.status(&parent), Some(Status::Failed));
}

#[test]
fn failures_of_several_phases_are_combined() {
    let journal = Journal::new();
    let root = root(&journal);
    let leaf = case(
        &engine_id(),
        "leaf",
        ScriptedNode::new("leaf", &journal)
            .fault(Phase::Execute, Fault::Fail)
            .fault(Phase::After, Fault::Panic)
            .fault(Phase::CleanUp, Fault::Fail),
    );
    root.add_child(Arc::clone(&leaf));

    let run = run(&root, &journal, same_thread());
    run.assert_well_formed();

    let event = run.recorder.terminal_event(leaf.unique_id()).unwrap();
    match event.result().and_then(TestExecutionResult::failure) {
        Some(Failure::Multiple(failures)) => {
            assert_eq!(failures.len(), 3);
            assert!(matches!(&failures[1], Failure::Panic(m) if m == "leaf failed in after"));
        }
        other => panic!("expected combined failures, got {other:?}"),
    }
}

#[test]
fn aborted_execute_reports_aborted() {
    let journal = Journal::new();
    let root = root(&journal);
    let leaf = case(
        &engine_id(),
        "leaf",
        ScriptedNode::new("leaf", &journal).fault(Phase::Execute, Fault::Abort),
    );
    root.add_child(Arc::clone(&leaf));

    let run = run(&root, &journal, same_thread());
    assert_eq!(run.status(&leaf), Some(Status::Aborted));
}

#[test]
fn child_failure_does_not_fail_siblings_or_parent() {
    let journal = Journal::new();
    let root = root(&journal);
    let bad = case(
        &engine_id(),
        "bad",
        ScriptedNode::new("bad", &journal).fault(Phase::Execute, Fault::Panic),
    );
    let good = case(&engine_id(), "good", ScriptedNode::new("good", &journal));
    root.add_child(Arc::clone(&bad)).add_child(Arc::clone(&good));

    let run = run(&root, &journal, same_thread());
    run.assert_well_formed();

    assert_eq!(run.status(&bad), Some(Status::Failed));
    assert_eq!(run.status(&good), Some(Status::Successful));
    assert_eq!(run.status(&root), Some(Status::Successful));
}

#[test]
fn fatal_failure_aborts_the_run() {
    let journal = Journal::new();
    let root = root(&journal);
    root.add_child(case(
        &engine_id(),
        "doomed",
        ScriptedNode::new("doomed", &journal).fault(Phase::Execute, Fault::Fatal),
    ));
    root.add_child(case(&engine_id(), "never", ScriptedNode::new("never", &journal)));

    let run = run(&root, &journal, same_thread());

    match &run.outcome {
        Err(ExecutionError::Fatal(message)) => assert_eq!(message, "doomed failed in execute"),
        other => panic!("expected fatal error, got {other:?}"),
    }
    assert!(!journal.contains("doomed:@finished(failed)"));
    assert!(journal.entries_for("never").is_empty());
}

/// Panics when a node named `target` starts.
struct PanicsOnStart {
    target: &'static str,
}

impl EngineExecutionListener for PanicsOnStart {
    fn execution_started(&self, descriptor: &dyn Descriptor) {
        if descriptor.display_name() == self.target {
            panic!("listener rejected {}", self.target);
        }
    }
}

fn listener_panic_run(params: ConfigurationParameters) -> (Journal, Arc<TestDescriptor<Ctx>>, Run) {
    let journal = Journal::new();
    let root = root(&journal);
    root.add_child(case(&engine_id(), "a", ScriptedNode::new("a", &journal)));
    root.add_child(case(&engine_id(), "b", ScriptedNode::new("b", &journal)));

    let listener: Arc<dyn EngineExecutionListener> = Arc::new(PanicsOnStart { target: "a" });
    let run = run_with(&root, &journal, params, vec![("panics", listener)]);
    (journal, root, run)
}

#[test]
fn listener_panic_aborts_the_run_without_blaming_the_parent() {
    let (journal, root, run) = listener_panic_run(same_thread());

    match &run.outcome {
        Err(ExecutionError::Panicked(message)) => assert_eq!(message, "listener rejected a"),
        other => panic!("expected panicked error, got {other:?}"),
    }
    assert_eq!(run.status(&root), None);
    assert!(!journal.contains("root:@finished(failed)"));
    assert!(journal.entries_for("b").is_empty());
}

#[test]
fn listener_panic_on_a_worker_aborts_the_run() {
    let params = ConfigurationParameters::new()
        .with("canopy.execution.parallel.enabled", "true")
        .with("canopy.execution.parallel.mode.default", "concurrent")
        .with("canopy.execution.parallel.config.strategy", "fixed")
        .with("canopy.execution.parallel.config.fixed.parallelism", "2");

    let (journal, root, run) = listener_panic_run(params);

    match &run.outcome {
        Err(ExecutionError::Panicked(message)) => assert_eq!(message, "listener rejected a"),
        other => panic!("expected panicked error, got {other:?}"),
    }
    assert_eq!(run.status(&root), None);
    assert!(!journal.contains("root:@finished(failed)"));
    assert!(!journal.contains("b:@finished(failed)"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Skipping
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn skipped_node_cleans_up_and_reports_reason() {
    let journal = Journal::new();
    let root = root(&journal);
    let parent = container(
        &engine_id(),
        "parent",
        ScriptedNode::new("parent", &journal).skipped("disabled on this platform"),
    );
    parent.add_child(case(parent.unique_id(), "child", ScriptedNode::new("child", &journal)));
    root.add_child(Arc::clone(&parent));

    let run = run(&root, &journal, same_thread());
    run.assert_well_formed();

    assert_eq!(
        journal.entries_for("parent"),
        vec![
            "prepare",
            "should_be_skipped",
            "clean_up",
            "node_skipped",
            "@skipped"
        ]
    );
    assert!(journal.entries_for("child").is_empty());
    let skipped = run.recorder.terminal_event(parent.unique_id()).unwrap();
    assert_eq!(skipped.kind, EventKind::Skipped);
    assert_eq!(skipped.reason(), Some("disabled on this platform"));
}

#[test]
fn failing_skip_check_reports_failure_instead_of_skip() {
    let journal = Journal::new();
    let root = root(&journal);
    let leaf = case(
        &engine_id(),
        "leaf",
        ScriptedNode::new("leaf", &journal)
            .skipped("ignored")
            .fault(Phase::ShouldBeSkipped, Fault::Fail),
    );
    root.add_child(Arc::clone(&leaf));

    let run = run(&root, &journal, same_thread());
    run.assert_well_formed();

    assert_eq!(run.status(&leaf), Some(Status::Failed));
    assert!(!journal.contains("leaf:execute"));
    assert!(journal.contains("leaf:clean_up"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle notifications
// ─────────────────────────────────────────────────────────────────────────────

fn finished_hook_run(fault: Fault) -> Journal {
    let journal = Journal::new();
    let root = root(&journal);
    let leaf = case(
        &engine_id(),
        "leaf",
        ScriptedNode::new("leaf", &journal).fault(Phase::NodeFinished, fault),
    );
    let sibling = case(&engine_id(), "sibling", ScriptedNode::new("sibling", &journal));
    root.add_child(Arc::clone(&leaf));
    root.add_child(Arc::clone(&sibling));

    let run = run(&root, &journal, same_thread());
    run.assert_well_formed();

    assert_eq!(run.status(&leaf), Some(Status::Successful));
    assert_eq!(run.status(&sibling), Some(Status::Successful));
    assert_eq!(run.status(&root), Some(Status::Successful));
    journal
}

#[test]
fn failing_node_finished_does_not_change_the_result() {
    let journal = finished_hook_run(Fault::Fail);

    let entries = journal.entries_for("leaf");
    assert_eq!(
        entries[entries.len() - 2..],
        ["node_finished(successful)", "@finished(successful)"]
    );
}

#[test]
fn panicking_node_finished_is_contained() {
    let journal = finished_hook_run(Fault::Panic);

    assert!(journal.contains("leaf:@finished(successful)"));
    assert!(journal.contains("sibling:@finished(successful)"));
}

#[test]
fn fatal_node_finished_aborts_the_run() {
    let journal = Journal::new();
    let root = root(&journal);
    root.add_child(case(
        &engine_id(),
        "leaf",
        ScriptedNode::new("leaf", &journal).fault(Phase::NodeFinished, Fault::Fatal),
    ));

    let run = run(&root, &journal, same_thread());

    match &run.outcome {
        Err(ExecutionError::Fatal(message)) => assert_eq!(message, "leaf failed in node_finished"),
        other => panic!("expected fatal error, got {other:?}"),
    }
    assert!(!journal.contains("leaf:@finished(successful)"));
}

#[test]
fn failing_node_skipped_still_reports_the_skip() {
    let journal = Journal::new();
    let root = root(&journal);
    let leaf = case(
        &engine_id(),
        "leaf",
        ScriptedNode::new("leaf", &journal)
            .skipped("not today")
            .fault(Phase::NodeSkipped, Fault::Fail),
    );
    let sibling = case(&engine_id(), "sibling", ScriptedNode::new("sibling", &journal));
    root.add_child(Arc::clone(&leaf));
    root.add_child(Arc::clone(&sibling));

    let run = run(&root, &journal, same_thread());
    run.assert_well_formed();

    assert_eq!(
        journal.entries_for("leaf"),
        vec!["prepare", "should_be_skipped", "clean_up", "node_skipped", "@skipped"]
    );
    let skipped = run.recorder.terminal_event(leaf.unique_id()).unwrap();
    assert_eq!(skipped.kind, EventKind::Skipped);
    assert_eq!(skipped.reason(), Some("not today"));
    assert_eq!(run.status(&sibling), Some(Status::Successful));
}

// ─────────────────────────────────────────────────────────────────────────────
// Idempotence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn a_descriptor_attached_twice_executes_once() {
    let journal = Journal::new();
    let root = root(&journal);
    let leaf = case(&engine_id(), "leaf", ScriptedNode::new("leaf", &journal));
    root.add_child(Arc::clone(&leaf)).add_child(Arc::clone(&leaf));

    let run = run(&root, &journal, same_thread());
    run.assert_well_formed();

    assert_eq!(
        journal.entries().iter().filter(|e| *e == "leaf:execute").count(),
        1
    );
    assert_eq!(run.recorder.kinds_for(leaf.unique_id()).len(), 2);
    assert_eq!(run.summary().nodes_executed, 2);
}

#[test]
fn duplicate_unique_ids_execute_once() {
    let journal = Journal::new();
    let root = root(&journal);
    let first = TestDescriptor::test(
        engine_id().append("test", "dup"),
        "first",
        ScriptedNode::new("first", &journal),
    );
    let second = TestDescriptor::test(
        engine_id().append("test", "dup"),
        "second",
        ScriptedNode::new("second", &journal),
    );
    root.add_child(first).add_child(second);

    run(&root, &journal, same_thread()).assert_well_formed();

    assert!(journal.contains("first:execute"));
    assert!(journal.entries_for("second").is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver errors and thread hygiene
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn root_with_resources_is_rejected_before_anything_runs() {
    let journal = Journal::new();
    let root = TestDescriptor::container(
        engine_id(),
        "root",
        ScriptedNode::new("root", &journal).resource(ExclusiveResource::read_write("db")),
    );

    let run = run(&root, &journal, same_thread());

    assert!(matches!(
        run.outcome,
        Err(ExecutionError::RootDeclaresResources { ref resources, .. })
            if resources == &[ExclusiveResource::read_write("db")]
    ));
    assert!(journal.entries().is_empty());
}

#[test]
fn invalid_configuration_is_reported() {
    let journal = Journal::new();
    let root = root(&journal);
    let params = ConfigurationParameters::new().with("canopy.execution.parallel.enabled", "maybe");

    let run = run(&root, &journal, params);

    assert!(matches!(run.outcome, Err(ExecutionError::Configuration(_))));
    assert!(journal.entries().is_empty());
}

#[test]
fn interrupt_left_by_a_node_does_not_leak_into_the_next() {
    let journal = Journal::new();
    let root = root(&journal);
    let seen_interrupted = Arc::new(AtomicBool::new(true));
    let seen = Arc::clone(&seen_interrupted);

    root.add_child(case(
        &engine_id(),
        "rude",
        ScriptedNode::new("rude", &journal).work(|_| interrupt::current().interrupt()),
    ));
    root.add_child(case(
        &engine_id(),
        "polite",
        ScriptedNode::new("polite", &journal)
            .work(move |_| seen.store(interrupt::is_interrupted(), Ordering::SeqCst)),
    ));

    let run = run(&root, &journal, same_thread());
    run.assert_well_formed();

    assert!(!seen_interrupted.load(Ordering::SeqCst));
    assert!(!interrupt::is_interrupted());
    assert!(journal.contains("rude:@finished(successful)"));
}
