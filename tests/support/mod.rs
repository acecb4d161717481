//! Test flow family shared by the integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use steadyflow::config::RetryPolicy;
use steadyflow::engine::{EngineDelegate, WorkflowEngine};
use steadyflow::flow::{AnyFlow, Flow, FlowCore, FlowId, Step, StepState};
use steadyflow::progress::{FlowProgress, StepProgress};
use steadyflow::state::StateStore;
use steadyflow::testing::{BlockingFlow, SignalBoard};
use tokio::sync::mpsc;

/// Value injected into every test flow by the engine configurator.
pub const DEPENDENCY: &str = "42";

/// Step that succeeds right away and records an output.
#[derive(Serialize, Deserialize)]
pub struct OutputStep {
    state: StepState,
    #[serde(skip)]
    output: Mutex<String>,
    #[serde(skip)]
    dependency: Mutex<Option<String>>,
}

impl OutputStep {
    pub fn new(id: &str) -> Self {
        Self {
            state: StepState::new(id),
            output: Mutex::new("0".to_string()),
            dependency: Mutex::new(None),
        }
    }

    pub fn output(&self) -> String {
        self.output.lock().unwrap().clone()
    }

    pub fn dependency(&self) -> Option<String> {
        self.dependency.lock().unwrap().clone()
    }

    fn configure(&self, dependency: &str) {
        *self.dependency.lock().unwrap() = Some(dependency.to_string());
    }
}

impl Step for OutputStep {
    fn state(&self) -> &StepState {
        &self.state
    }

    fn execute(&self) {
        self.state.update_progress(StepProgress::InProgress(0.0));
        *self.output.lock().unwrap() = "1".to_string();
        self.state.update_progress(StepProgress::Success);
    }
}

#[derive(Serialize, Deserialize)]
pub struct OneStepFlow {
    core: FlowCore,
    pub step1: OutputStep,
    #[serde(skip)]
    dependency: Mutex<Option<String>>,
}

impl OneStepFlow {
    pub fn new(core: FlowCore) -> Self {
        Self {
            core,
            step1: OutputStep::new("step1"),
            dependency: Mutex::new(None),
        }
    }

    pub fn dependency(&self) -> Option<String> {
        self.dependency.lock().unwrap().clone()
    }
}

impl Flow for OneStepFlow {
    fn core(&self) -> &FlowCore {
        &self.core
    }

    fn steps(&self) -> Vec<&dyn Step> {
        vec![&self.step1]
    }
}

#[derive(Serialize, Deserialize)]
pub struct TwoStepFlow {
    core: FlowCore,
    pub step1: OutputStep,
    pub step11: OutputStep,
}

impl TwoStepFlow {
    pub fn new(core: FlowCore) -> Self {
        Self {
            core,
            step1: OutputStep::new("step1"),
            step11: OutputStep::new("step11"),
        }
    }
}

impl Flow for TwoStepFlow {
    fn core(&self) -> &FlowCore {
        &self.core
    }

    fn steps(&self) -> Vec<&dyn Step> {
        vec![&self.step1, &self.step11]
    }
}

/// Step whose outcome is controlled by the test.
#[derive(Serialize, Deserialize)]
pub struct ConfigurableStep {
    pub state: StepState,
    #[serde(skip)]
    should_fail: AtomicBool,
    /// Stop after reporting `InProgress`, leaving the step in flight.
    #[serde(default)]
    stalls: AtomicBool,
    #[serde(skip)]
    execution_count: AtomicUsize,
    #[serde(skip)]
    cancelled: AtomicBool,
    #[serde(skip)]
    disposed: AtomicBool,
}

impl ConfigurableStep {
    pub fn new(id: &str) -> Self {
        Self {
            state: StepState::new(id),
            should_fail: AtomicBool::new(false),
            stalls: AtomicBool::new(false),
            execution_count: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_stalls(&self, stalls: bool) {
        self.stalls.store(stalls, Ordering::SeqCst);
    }

    pub fn execution_count(&self) -> usize {
        self.execution_count.load(Ordering::SeqCst)
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn was_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Step for ConfigurableStep {
    fn state(&self) -> &StepState {
        &self.state
    }

    fn execute(&self) {
        self.execution_count.fetch_add(1, Ordering::SeqCst);
        if self.stalls.load(Ordering::SeqCst) {
            self.state.update_progress(StepProgress::InProgress(0.1));
            return;
        }
        self.state.update_progress(StepProgress::InProgress(0.0));
        if self.should_fail.load(Ordering::SeqCst) {
            self.state
                .update_progress(StepProgress::failure("TEST_ERROR", "Configured to fail"));
        } else {
            self.state.update_progress(StepProgress::Success);
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

fn retry_by_default() -> bool {
    true
}

#[derive(Serialize, Deserialize)]
pub struct ConfigurableFlow {
    core: FlowCore,
    pub step: ConfigurableStep,
    #[serde(default = "retry_by_default")]
    retry_on_failure: bool,
}

impl ConfigurableFlow {
    pub fn new(id: &str) -> Self {
        Self {
            core: FlowCore::new(id),
            step: ConfigurableStep::new("configurable_step"),
            retry_on_failure: true,
        }
    }

    pub fn without_retry(mut self) -> Self {
        self.retry_on_failure = false;
        self
    }
}

impl Flow for ConfigurableFlow {
    fn core(&self) -> &FlowCore {
        &self.core
    }

    fn steps(&self) -> Vec<&dyn Step> {
        vec![&self.step]
    }

    fn should_retry_on_failure_after_restore(&self) -> bool {
        self.retry_on_failure
    }
}

/// Every flow kind the tests use.
#[derive(Clone, Serialize, Deserialize)]
pub enum TestFlows {
    Blocking(Arc<BlockingFlow>),
    One(Arc<OneStepFlow>),
    Two(Arc<TwoStepFlow>),
    Configurable(Arc<ConfigurableFlow>),
}

impl AnyFlow for TestFlows {
    fn flow(&self) -> Arc<dyn Flow> {
        match self {
            TestFlows::Blocking(flow) => flow.clone(),
            TestFlows::One(flow) => flow.clone(),
            TestFlows::Two(flow) => flow.clone(),
            TestFlows::Configurable(flow) => flow.clone(),
        }
    }
}

impl TestFlows {
    pub fn blocking(id: &str) -> (Self, Arc<BlockingFlow>) {
        let flow = Arc::new(BlockingFlow::new(id));
        (TestFlows::Blocking(flow.clone()), flow)
    }

    pub fn one(core: FlowCore) -> (Self, Arc<OneStepFlow>) {
        let flow = Arc::new(OneStepFlow::new(core));
        (TestFlows::One(flow.clone()), flow)
    }

    pub fn two(core: FlowCore) -> (Self, Arc<TwoStepFlow>) {
        let flow = Arc::new(TwoStepFlow::new(core));
        (TestFlows::Two(flow.clone()), flow)
    }

    pub fn configurable(flow: ConfigurableFlow) -> (Self, Arc<ConfigurableFlow>) {
        let flow = Arc::new(flow);
        (TestFlows::Configurable(flow.clone()), flow)
    }

    /// Inject test dependencies, the way an application configurator would.
    fn configure(&self, board: &SignalBoard) {
        match self {
            TestFlows::Blocking(flow) => flow.attach(board),
            TestFlows::One(flow) => {
                *flow.dependency.lock().unwrap() = Some(DEPENDENCY.to_string());
                flow.step1.configure(DEPENDENCY);
            }
            TestFlows::Two(flow) => {
                flow.step1.configure(DEPENDENCY);
                flow.step11.configure(DEPENDENCY);
            }
            TestFlows::Configurable(_) => {}
        }
    }
}

/// One delegate callback.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub flow_id: FlowId,
    pub progress: FlowProgress,
    pub tags: BTreeSet<String>,
}

type Acceptance = Box<dyn FnMut(&ProgressEvent) -> bool + Send>;

/// Delegate recording every callback and forwarding it to the test.
pub struct RecordingDelegate {
    calls: Mutex<BTreeMap<FlowId, Vec<ProgressEvent>>>,
    events: mpsc::UnboundedSender<ProgressEvent>,
    acceptance: Mutex<Option<Acceptance>>,
}

impl RecordingDelegate {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let delegate = Arc::new(Self {
            calls: Mutex::new(BTreeMap::new()),
            events,
            acceptance: Mutex::new(None),
        });
        (delegate, rx)
    }

    /// Decide which completions to accept; all are accepted by default.
    pub fn accept_with(&self, acceptance: impl FnMut(&ProgressEvent) -> bool + Send + 'static) {
        *self.acceptance.lock().unwrap() = Some(Box::new(acceptance));
    }

    pub fn calls_for(&self, flow_id: &str) -> Vec<FlowProgress> {
        self.calls
            .lock()
            .unwrap()
            .get(flow_id)
            .map(|events| events.iter().map(|e| e.progress.clone()).collect())
            .unwrap_or_default()
    }
}

impl EngineDelegate<TestFlows> for RecordingDelegate {
    fn on_flow_progress(
        &self,
        _engine: &WorkflowEngine<TestFlows>,
        flow_id: &FlowId,
        progress: &FlowProgress,
        tags: &BTreeSet<String>,
    ) -> bool {
        let event = ProgressEvent {
            flow_id: flow_id.clone(),
            progress: progress.clone(),
            tags: tags.clone(),
        };
        self.calls
            .lock()
            .unwrap()
            .entry(flow_id.clone())
            .or_default()
            .push(event.clone());
        let accepted = match self.acceptance.lock().unwrap().as_mut() {
            Some(accept) => accept(&event),
            None => true,
        };
        let _ = self.events.send(event);
        accepted
    }
}

/// Retry policy with delays short enough for tests.
pub fn fast_retry(max_retries: Option<u32>) -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        max_retries,
    }
}

/// Engine configured like an application would: test dependencies and the
/// signal board are injected into every flow.
pub fn build_engine(
    store: impl StateStore,
    board: &SignalBoard,
    delegate: Arc<RecordingDelegate>,
    retry: RetryPolicy,
) -> WorkflowEngine<TestFlows> {
    let board = board.clone();
    WorkflowEngine::builder(store)
        .retry(retry)
        .delegate(delegate)
        .configurator(move |flow: &TestFlows| flow.configure(&board))
        .build()
}

/// Wait for the first event matching `matches`, skipping the others.
pub async fn next_event(
    events: &mut mpsc::UnboundedReceiver<ProgressEvent>,
    matches: impl Fn(&ProgressEvent) -> bool,
) -> ProgressEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("delegate dropped");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for progress")
}

/// Assert that no matching event arrives within `window`.
pub async fn assert_no_event(
    events: &mut mpsc::UnboundedReceiver<ProgressEvent>,
    window: Duration,
    matches: impl Fn(&ProgressEvent) -> bool,
) {
    let found = tokio::time::timeout(window, async {
        while let Some(event) = events.recv().await {
            if matches(&event) {
                return Some(event);
            }
        }
        None
    })
    .await;
    if let Ok(Some(event)) = found {
        panic!("unexpected progress event: {event:?}");
    }
}

pub fn is_success(event: &ProgressEvent) -> bool {
    event.progress.is_success()
}
