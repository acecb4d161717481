//! Engine behavior: execution, dependencies, delegate decisions and retries.

mod support;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use steadyflow::config::{EngineConfig, DEFAULT_STATE_KEY};
use steadyflow::engine::WorkflowEngine;
use steadyflow::flow::{AnyFlow, FlowCore};
use steadyflow::progress::FlowProgress;
use steadyflow::state::{FlowIndex, MemoryStateStore, StateStore};
use steadyflow::testing::SignalBoard;
use support::*;

fn setup(
    retry: steadyflow::config::RetryPolicy,
) -> (
    WorkflowEngine<TestFlows>,
    Arc<RecordingDelegate>,
    tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>,
    SignalBoard,
) {
    let board = SignalBoard::new();
    let (delegate, events) = RecordingDelegate::new();
    let engine = build_engine(MemoryStateStore::new(), &board, delegate.clone(), retry);
    (engine, delegate, events, board)
}

#[tokio::test(flavor = "multi_thread")]
async fn one_step_flow_reports_twice_and_completes() {
    let (engine, delegate, mut events, _board) = setup(fast_retry(Some(3)));
    let (flow, one) = TestFlows::one(FlowCore::new("test_flow_1").with_tags(["sync"]));

    engine.execute_new_flow(flow);
    let done = next_event(&mut events, is_success).await;

    assert_eq!(done.flow_id, "test_flow_1");
    assert_eq!(done.tags, BTreeSet::from(["sync".to_string()]));
    assert_eq!(delegate.calls_for("test_flow_1").len(), 2);
    assert_eq!(one.step1.output(), "1");
    assert!(engine.is_empty().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn two_step_flow_runs_steps_in_order() {
    let (engine, delegate, mut events, _board) = setup(fast_retry(Some(3)));
    let (flow, two) = TestFlows::two(FlowCore::new("test_flow_2"));

    engine.execute_new_flow(flow);
    next_event(&mut events, is_success).await;

    let calls = delegate.calls_for("test_flow_2");
    assert_eq!(calls.len(), 4);
    assert!(calls[..3].iter().all(|p| !p.is_terminal()));
    assert_eq!(two.step1.output(), "1");
    assert_eq!(two.step11.output(), "1");
}

#[tokio::test(flavor = "multi_thread")]
async fn configurator_injects_dependencies() {
    let (engine, _delegate, mut events, _board) = setup(fast_retry(Some(3)));
    let (flow, one) = TestFlows::one(FlowCore::new("configured"));

    engine.execute_new_flow(flow);
    next_event(&mut events, is_success).await;

    assert_eq!(one.dependency().as_deref(), Some(DEPENDENCY));
    assert_eq!(one.step1.dependency().as_deref(), Some(DEPENDENCY));
}

#[tokio::test(flavor = "multi_thread")]
async fn dependent_flow_waits_for_its_dependency() {
    let (engine, delegate, mut events, board) = setup(fast_retry(Some(3)));
    let (blocking, blocking_flow) = TestFlows::blocking("blocking_flow_1");
    let (dependent, _) = TestFlows::two(FlowCore::new("test_flow_2").waiting_for(["blocking_flow_1"]));

    engine.execute_new_flow(blocking);
    engine.execute_new_flow(dependent);

    assert_eq!(
        engine.pending_ids().await.unwrap(),
        BTreeSet::from(["test_flow_2".to_string()])
    );
    assert_no_event(&mut events, Duration::from_millis(300), is_success).await;
    assert!(delegate.calls_for("test_flow_2").is_empty());

    board.signal(blocking_flow.step_id());
    next_event(&mut events, |e| e.flow_id == "blocking_flow_1" && is_success(e)).await;
    next_event(&mut events, |e| e.flow_id == "test_flow_2" && is_success(e)).await;

    assert!(engine.pending_ids().await.unwrap().is_empty());
    assert!(engine.is_empty().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_dependency_counts_as_completed() {
    let (engine, _delegate, mut events, _board) = setup(fast_retry(Some(3)));
    let (flow, _) = TestFlows::one(FlowCore::new("orphan").waiting_for(["never_submitted"]));

    engine.execute_new_flow(flow);
    let done = next_event(&mut events, is_success).await;

    assert_eq!(done.flow_id, "orphan");
}

#[tokio::test(flavor = "multi_thread")]
async fn resubmitting_a_tracked_flow_is_a_no_op() {
    let (engine, _delegate, mut events, board) = setup(fast_retry(Some(3)));
    let (first, blocking_flow) = TestFlows::blocking("upload");
    let (second, _) = TestFlows::blocking("upload");

    engine.execute_new_flow(first);
    engine.execute_new_flow(second);

    assert_eq!(engine.len().await.unwrap(), 1);
    match engine.flow("upload").await.unwrap() {
        Some(TestFlows::Blocking(tracked)) => assert!(Arc::ptr_eq(&tracked, &blocking_flow)),
        _ => panic!("first submission should stay tracked"),
    }

    board.signal(blocking_flow.step_id());
    next_event(&mut events, is_success).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_completion_is_retried() {
    let (engine, delegate, mut events, _board) = setup(fast_retry(Some(3)));
    let rejected_once = Arc::new(AtomicBool::new(false));
    let flag = rejected_once.clone();
    delegate.accept_with(move |event| !event.progress.is_success() || flag.swap(true, Ordering::SeqCst));
    let (flow, configurable) = TestFlows::configurable(ConfigurableFlow::new("reject_once"));

    engine.execute_new_flow(flow);
    next_event(&mut events, is_success).await;
    next_event(&mut events, is_success).await;

    assert!(rejected_once.load(Ordering::SeqCst));
    assert_eq!(configurable.step.execution_count(), 2);
    assert!(engine.is_empty().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_flow_is_retried_until_it_succeeds() {
    let (engine, _delegate, mut events, _board) = setup(fast_retry(Some(3)));
    let (flow, configurable) = TestFlows::configurable(ConfigurableFlow::new("flaky"));
    configurable.step.set_should_fail(true);

    engine.execute_new_flow(flow);
    let failed = next_event(&mut events, |e| e.progress.is_failure()).await;
    configurable.step.set_should_fail(false);

    assert!(matches!(
        failed.progress,
        FlowProgress::Failure { ref code, .. } if code.as_str() == "TEST_ERROR"
    ));
    next_event(&mut events, is_success).await;
    assert_eq!(configurable.step.execution_count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_is_archived_as_pending() {
    let retry = steadyflow::config::RetryPolicy {
        base_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(1),
        max_retries: Some(3),
    };
    let store = MemoryStateStore::new();
    let board = SignalBoard::new();
    let (delegate, mut events) = RecordingDelegate::new();
    let engine = build_engine(store.clone(), &board, delegate, retry);
    let (flow, configurable) = TestFlows::configurable(ConfigurableFlow::new("flaky"));
    configurable.step.set_should_fail(true);

    engine.execute_new_flow(flow);
    next_event(&mut events, |e| e.progress.is_failure()).await;

    let entry = engine.entry("flaky").await.unwrap().unwrap();
    assert_eq!(entry.progress, FlowProgress::Pending);
    assert_eq!(entry.retry_count, 1);

    let archived: FlowIndex<TestFlows> = store.load(DEFAULT_STATE_KEY).unwrap().unwrap();
    let archived = archived.get("flaky").unwrap();
    assert_eq!(archived.retry_count, 1);
    assert_eq!(archived.progress, FlowProgress::Pending);
    assert_eq!(archived.flow.flow().progress(), FlowProgress::Pending);

    configurable.step.set_should_fail(false);
    next_event(&mut events, is_success).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_flow_is_disposed() {
    let (engine, _delegate, mut events, _board) = setup(fast_retry(Some(2)));
    let (flow, configurable) = TestFlows::configurable(ConfigurableFlow::new("hopeless"));
    configurable.step.set_should_fail(true);

    engine.execute_new_flow(flow);
    for _ in 0..3 {
        next_event(&mut events, |e| e.progress.is_failure()).await;
    }
    assert_no_event(&mut events, Duration::from_millis(500), |e| e.progress.is_failure()).await;

    assert_eq!(configurable.step.execution_count(), 3);
    assert!(configurable.step.was_disposed());
    assert!(engine.flow("hopeless").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_without_retry_stays_tracked() {
    let (engine, _delegate, mut events, _board) = setup(fast_retry(Some(3)));
    let (flow, configurable) =
        TestFlows::configurable(ConfigurableFlow::new("fragile").without_retry());
    configurable.step.set_should_fail(true);

    engine.execute_new_flow(flow);
    next_event(&mut events, |e| e.progress.is_failure()).await;
    assert_no_event(&mut events, Duration::from_millis(300), |_| true).await;

    let entry = engine.entry("fragile").await.unwrap().unwrap();
    assert!(entry.progress.is_failure());
    assert_eq!(entry.retry_count, 0);
    assert_eq!(configurable.step.execution_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_reaches_every_step() {
    let (engine, _delegate, mut events, _board) = setup(fast_retry(Some(3)));
    let (flow, configurable) =
        TestFlows::configurable(ConfigurableFlow::new("to_cancel").without_retry());
    configurable.step.set_should_fail(true);

    engine.execute_new_flow(flow);
    next_event(&mut events, |e| e.progress.is_failure()).await;
    engine.cancel().await.unwrap();

    assert!(configurable.step.was_cancelled());
}

#[tokio::test(flavor = "multi_thread")]
async fn disposing_removes_the_flow() {
    let (engine, _delegate, mut events, board) = setup(fast_retry(Some(3)));
    let (flow, blocking_flow) = TestFlows::blocking("doomed");

    engine.execute_new_flow(flow);
    next_event(&mut events, |e| e.flow_id == "doomed").await;
    engine.dispose_flow("doomed");

    assert!(engine.is_empty().await.unwrap());

    // The step still finishes, but the engine no longer tracks the flow.
    board.signal(blocking_flow.step_id());
    assert_no_event(&mut events, Duration::from_millis(300), is_success).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn flows_can_be_filtered() {
    let (engine, _delegate, _events, board) = setup(fast_retry(Some(3)));
    let (photos, photos_flow) = TestFlows::blocking("photos");
    let (videos, videos_flow) = TestFlows::blocking("videos");

    engine.execute_new_flow(photos);
    engine.execute_new_flow(videos);

    let matching = engine
        .flows(|flow| flow.flow().id().starts_with("photo"))
        .await
        .unwrap();
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0].flow().id(), "photos");

    board.signal(photos_flow.step_id());
    board.signal(videos_flow.step_id());
}

#[tokio::test(flavor = "multi_thread")]
async fn submitted_flow_is_archived() {
    let store = MemoryStateStore::new();
    let board = SignalBoard::new();
    let (delegate, mut events) = RecordingDelegate::new();
    let engine = build_engine(store.clone(), &board, delegate, fast_retry(Some(3)));
    let (flow, blocking_flow) = TestFlows::blocking("archived");

    engine.execute_new_flow(flow);
    assert_eq!(engine.len().await.unwrap(), 1);

    let archived: FlowIndex<TestFlows> = store.load(DEFAULT_STATE_KEY).unwrap().unwrap();
    assert!(archived.contains("archived"));

    board.signal(blocking_flow.step_id());
    next_event(&mut events, is_success).await;
    assert!(engine.is_empty().await.unwrap());

    let archived: FlowIndex<TestFlows> = store.load(DEFAULT_STATE_KEY).unwrap().unwrap();
    assert!(archived.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn resume_all_runs_once() {
    let (engine, _delegate, mut events, _board) = setup(fast_retry(Some(3)));
    let (flow, configurable) = TestFlows::configurable(ConfigurableFlow::new("in_flight"));
    configurable.step.set_stalls(true);

    engine.execute_new_flow(flow);
    next_event(&mut events, |e| e.flow_id == "in_flight").await;

    engine.resume_all();
    engine.resume_all();
    assert_eq!(engine.len().await.unwrap(), 1);
    assert_no_event(&mut events, Duration::from_millis(300), |_| true).await;

    assert_eq!(configurable.step.execution_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn resume_all_leaves_failed_flows_alone() {
    let (delegate, mut events) = RecordingDelegate::new();
    let engine = WorkflowEngine::<TestFlows>::builder(MemoryStateStore::new())
        .config(EngineConfig {
            auto_resume: false,
            ..EngineConfig::default()
        })
        .delegate(delegate)
        .build();
    let (flow, configurable) =
        TestFlows::configurable(ConfigurableFlow::new("stays_failed").without_retry());
    configurable.step.set_should_fail(true);

    engine.execute_new_flow(flow);
    next_event(&mut events, |e| e.progress.is_failure()).await;

    engine.resume_all();
    assert_no_event(&mut events, Duration::from_millis(300), |_| true).await;

    assert_eq!(configurable.step.execution_count(), 1);
    let entry = engine.entry("stays_failed").await.unwrap().unwrap();
    assert!(entry.progress.is_failure());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_flows_all_complete() {
    const FLOWS: usize = 20;
    let (engine, delegate, mut events, _board) = setup(fast_retry(Some(3)));

    for i in 0..FLOWS {
        let (flow, _) = TestFlows::one(FlowCore::new(format!("flow_{i}")));
        engine.execute_new_flow(flow);
    }

    let mut done = BTreeSet::new();
    while done.len() < FLOWS {
        let event = next_event(&mut events, is_success).await;
        assert!(done.insert(event.flow_id.clone()), "{} completed twice", event.flow_id);
    }

    assert!(engine.is_empty().await.unwrap());
    for i in 0..FLOWS {
        let calls = delegate.calls_for(&format!("flow_{i}"));
        assert_eq!(calls.len(), 2);
        assert_eq!(calls.iter().filter(|p| p.is_success()).count(), 1);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn dependent_starts_after_its_dependency_gives_up() {
    let (engine, _delegate, mut events, _board) = setup(fast_retry(Some(1)));
    let (upload, configurable) = TestFlows::configurable(ConfigurableFlow::new("upload"));
    configurable.step.set_should_fail(true);
    let (notify, _) = TestFlows::one(FlowCore::new("notify").waiting_for(["upload"]));

    engine.execute_new_flow(upload);
    engine.execute_new_flow(notify);
    next_event(&mut events, |e| e.flow_id == "notify" && is_success(e)).await;

    assert_eq!(configurable.step.execution_count(), 2);
    assert!(configurable.step.was_disposed());
    assert!(engine.pending_ids().await.unwrap().is_empty());
    assert!(engine.is_empty().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn disposing_a_dependency_starts_its_dependents() {
    let (engine, _delegate, mut events, board) = setup(fast_retry(Some(3)));
    let (blocking, blocking_flow) = TestFlows::blocking("upload");
    let (notify, _) = TestFlows::one(FlowCore::new("notify").waiting_for(["upload"]));

    engine.execute_new_flow(blocking);
    engine.execute_new_flow(notify);
    assert_eq!(
        engine.pending_ids().await.unwrap(),
        BTreeSet::from(["notify".to_string()])
    );

    engine.dispose_flow("upload");
    next_event(&mut events, |e| e.flow_id == "notify" && is_success(e)).await;
    assert!(engine.is_empty().await.unwrap());

    board.signal(blocking_flow.step_id());
}
