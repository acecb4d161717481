//! The engine actor: sole owner of the registry and the state store.
//!
//! Every mutation of the registry and every lifecycle decision (start,
//! dispose, retry, dependency unblocking) happens here, one command at a
//! time. Flows and timers only post [`Command`]s through weak senders, so
//! the actor stops once the last [`WorkflowEngine`] handle is dropped.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, WeakUnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, error, info_span, trace, warn, Span};

use crate::config::EngineConfig;
use crate::flow::{
    short_id, AnyFlow, Flow, FlowId, FlowLink, FlowProgressSink, StepProgressSink,
};
use crate::progress::FlowProgress;
use crate::state::{FlowEntry, FlowIndex, StateStore};

use super::delegate::{EngineDelegate, FlowConfigurator};
use super::WorkflowEngine;

type FlowFilter<A> = Box<dyn Fn(&A) -> bool + Send>;

/// Messages handled by the actor.
pub(crate) enum Command<A: AnyFlow> {
    Submit(A),
    Progress {
        flow_id: FlowId,
        progress: FlowProgress,
        tags: BTreeSet<String>,
    },
    RetryDue(FlowId),
    Dispose(FlowId),
    ResumeAll,
    Cancel(oneshot::Sender<()>),
    Flow {
        id: FlowId,
        reply: oneshot::Sender<Option<A>>,
    },
    Flows {
        filter: FlowFilter<A>,
        reply: oneshot::Sender<Vec<A>>,
    },
    Entry {
        id: FlowId,
        reply: oneshot::Sender<Option<FlowEntry<A>>>,
    },
    PendingIds(oneshot::Sender<BTreeSet<FlowId>>),
    Len(oneshot::Sender<usize>),
}

/// Progress sink installed on every flow. Posts to the actor.
struct EngineSink<A: AnyFlow> {
    commands: WeakUnboundedSender<Command<A>>,
}

impl<A: AnyFlow> FlowProgressSink for EngineSink<A> {
    fn flow_did_progress(&self, flow_id: &FlowId, progress: FlowProgress, tags: &BTreeSet<String>) {
        let Some(commands) = self.commands.upgrade() else {
            trace!("engine stopped, dropping progress of {}", short_id(flow_id));
            return;
        };
        let _ = commands.send(Command::Progress {
            flow_id: flow_id.clone(),
            progress,
            tags: tags.clone(),
        });
    }
}

pub(crate) struct EngineActor<A: AnyFlow, S: StateStore> {
    index: FlowIndex<A>,
    store: S,
    config: EngineConfig,
    delegate: Option<Arc<dyn EngineDelegate<A>>>,
    configurator: Option<FlowConfigurator<A>>,
    commands: WeakUnboundedSender<Command<A>>,
    span: Span,
    /// Resume-all already ran; flows it resumed are in flight.
    resumed: bool,
}

impl<A: AnyFlow, S: StateStore> EngineActor<A, S> {
    pub(crate) fn new(
        store: S,
        config: EngineConfig,
        delegate: Option<Arc<dyn EngineDelegate<A>>>,
        configurator: Option<FlowConfigurator<A>>,
        commands: WeakUnboundedSender<Command<A>>,
    ) -> Self {
        let span = info_span!("engine", state_key = %config.state_key);
        Self {
            index: FlowIndex::new(),
            store,
            config,
            delegate,
            configurator,
            commands,
            span,
            resumed: false,
        }
    }

    pub(crate) async fn run(mut self, mut commands: UnboundedReceiver<Command<A>>) {
        while let Some(command) = commands.recv().await {
            // Messages posted by flows after the last handle was dropped.
            let Some(sender) = self.commands.upgrade() else {
                break;
            };
            let engine = WorkflowEngine { tx: sender };
            self.handle(command, &engine);
        }
        debug!(parent: &self.span, "engine stopped with {} tracked flows", self.index.len());
    }

    fn handle(&mut self, command: Command<A>, engine: &WorkflowEngine<A>) {
        match command {
            Command::Submit(flow) => self.execute_new_flow(flow),
            Command::Progress {
                flow_id,
                progress,
                tags,
            } => self.on_flow_progress(engine, &flow_id, progress, &tags),
            Command::RetryDue(flow_id) => self.execute_retry(&flow_id),
            Command::Dispose(flow_id) => self.dispose_flow(&flow_id),
            Command::ResumeAll => self.resume_all(),
            Command::Cancel(reply) => {
                self.cancel_all();
                let _ = reply.send(());
            }
            Command::Flow { id, reply } => {
                let _ = reply.send(self.index.get(&id).map(|entry| entry.flow.clone()));
            }
            Command::Flows { filter, reply } => {
                let flows = self
                    .index
                    .entries()
                    .filter(|(_, entry)| filter(&entry.flow))
                    .map(|(_, entry)| entry.flow.clone())
                    .collect();
                let _ = reply.send(flows);
            }
            Command::Entry { id, reply } => {
                let _ = reply.send(self.index.get(&id).cloned());
            }
            Command::PendingIds(reply) => {
                let _ = reply.send(self.index.pending_ids().clone());
            }
            Command::Len(reply) => {
                let _ = reply.send(self.index.len());
            }
        }
    }

    /// Load the persisted registry and keep only the flows worth resuming.
    pub(crate) fn restore(&mut self) {
        debug!(parent: &self.span, "restore flow states after unarchiving");
        let loaded = match self.store.load::<FlowIndex<A>>(&self.config.state_key) {
            Ok(Some(index)) => index,
            Ok(None) => FlowIndex::new(),
            Err(e) => {
                error!(parent: &self.span, "ignoring unreadable engine state: {}", e);
                FlowIndex::new()
            }
        };

        let mut kept = FlowIndex::new();
        for entry in loaded.into_entries() {
            if let Some(progress) = self.restore_flow(&entry.flow) {
                // A restart opens a fresh backoff window.
                kept.insert_or_update(FlowEntry::new(entry.flow, progress));
            }
        }
        self.index = kept;
    }

    fn restore_flow(&self, any: &A) -> Option<FlowProgress> {
        let flow = any.flow();
        debug!(parent: &self.span, "…restoring {}", flow.id());

        self.configure_flow_dependencies(any);
        flow.after_restore();

        match flow.progress() {
            FlowProgress::Failure { .. } if flow.should_retry_on_failure_after_restore() => {
                debug!(
                    parent: &self.span,
                    "flow {} was archived in error state, will retry with backoff",
                    flow.core().short_id()
                );
                flow.reset();
                Some(FlowProgress::Pending)
            }
            FlowProgress::Success | FlowProgress::Failure { .. } => {
                debug!(
                    parent: &self.span,
                    "flow {} was archived in successful or error state, dispose it",
                    flow.core().short_id()
                );
                flow.dispose();
                None
            }
            progress => Some(progress),
        }
    }

    /// Resume every tracked flow whose dependencies are satisfied.
    ///
    /// Runs at most once per engine: resuming again would execute steps that
    /// are still in progress a second time.
    pub(crate) fn resume_all(&mut self) {
        if self.resumed {
            debug!(parent: &self.span, "flows were already resumed, ignoring");
            return;
        }
        self.resumed = true;
        debug!(parent: &self.span, "resume flows after unarchiving");
        let flows: Vec<Arc<dyn Flow>> = self
            .index
            .entries()
            .map(|(_, entry)| entry.flow.flow())
            .collect();
        for flow in flows {
            self.execute_flow_or_mark_pending(&flow, true);
        }
    }

    fn execute_new_flow(&mut self, any: A) {
        let flow = any.flow();
        debug!(parent: &self.span, "execute new flow {}", flow.core().short_id());
        self.configure_flow_dependencies(&any);

        if self.index.contains(flow.id()) {
            debug!(parent: &self.span, "flow {} already exists", flow.id());
            return;
        }

        self.index
            .insert_or_update(FlowEntry::new(any, FlowProgress::Pending));
        self.archive_flows();
        self.execute_flow_or_mark_pending(&flow, false);
    }

    fn execute_flow_or_mark_pending(&mut self, flow: &Arc<dyn Flow>, as_resume: bool) {
        if !self.index.are_completed(flow.wait_for()) {
            debug!(
                parent: &self.span,
                "flow {} has incomplete dependent flows, mark as pending",
                flow.core().short_id()
            );
            self.index.mark_pending(flow.id(), true);
            return;
        }

        self.index.mark_pending(flow.id(), false);
        if as_resume {
            flow.resume();
        } else {
            flow.start();
        }
    }

    /// Start the pending flows that were only waiting for `flow_id`.
    ///
    /// Returns whether any pending flow depends on `flow_id`.
    fn start_pending_flows(&mut self, flow_id: &str) -> bool {
        let mut has_dependents = false;
        for any in self.index.pending_flows() {
            let flow = any.flow();
            if !flow.wait_for().contains(flow_id) {
                continue;
            }
            has_dependents = true;
            if self.index.are_completed(flow.wait_for()) {
                debug!(
                    parent: &self.span,
                    "dependencies of {} are complete, starting it",
                    flow.core().short_id()
                );
                self.index.mark_pending(flow.id(), false);
                flow.start();
            }
        }
        has_dependents
    }

    fn on_flow_progress(
        &mut self,
        engine: &WorkflowEngine<A>,
        flow_id: &FlowId,
        progress: FlowProgress,
        tags: &BTreeSet<String>,
    ) {
        debug!(parent: &self.span, "flow {} did update progress to {}", flow_id, progress);

        if self
            .index
            .update_progress(flow_id, progress.clone())
            .is_none()
        {
            error!(parent: &self.span, "updating progress for unknown flow: {}", flow_id);
            return;
        }

        if progress.is_success() && self.start_pending_flows(flow_id) {
            self.archive_flows();
        }

        let accepted = self
            .delegate
            .as_ref()
            .map(|delegate| delegate.on_flow_progress(engine, flow_id, &progress, tags))
            .unwrap_or(true);

        match progress {
            FlowProgress::Success if accepted => {
                self.index.reset_retry_count(flow_id);
                self.dispose_flow(flow_id);
            }
            FlowProgress::Success => {
                debug!(
                    parent: &self.span,
                    "delegate rejected flow {} completion, scheduling retry",
                    flow_id
                );
                self.schedule_retry(flow_id);
            }
            FlowProgress::Failure { .. } => {
                let retry = self
                    .index
                    .get(flow_id)
                    .is_some_and(|entry| entry.flow.flow().should_retry_on_failure_after_restore());
                if retry {
                    self.schedule_retry(flow_id);
                }
            }
            _ => {}
        }
    }

    /// Reset the flow, persist it as `Pending` with one more retry, then
    /// arm a timer. Gives up once the retry ceiling is reached.
    fn schedule_retry(&mut self, flow_id: &str) {
        let Some(entry) = self.index.get(flow_id) else {
            return;
        };
        let retry_count = entry.retry_count;
        let flow = entry.flow.flow();

        if self.config.retry.is_exhausted(retry_count) {
            warn!(
                parent: &self.span,
                "flow {} exceeded max retries ({}), disposing",
                flow_id,
                retry_count
            );
            self.dispose_flow(flow_id);
            return;
        }

        let delay = self.config.retry.delay_for(retry_count);

        // Archived as pending so a crash before the timer fires still resumes it.
        flow.reset();
        self.index.update_progress(flow_id, FlowProgress::Pending);
        let retry_number = self.index.increment_retry_count(flow_id);
        self.archive_flows();

        debug!(
            parent: &self.span,
            "scheduling retry #{} for flow {} in {:.1}s",
            retry_number,
            flow_id,
            delay.as_secs_f64()
        );

        let commands = self.commands.clone();
        let flow_id = flow_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::RetryDue(flow_id));
            }
        });
    }

    fn execute_retry(&mut self, flow_id: &str) {
        let Some(entry) = self.index.get(flow_id) else {
            debug!(parent: &self.span, "flow {} no longer exists, skipping retry", flow_id);
            return;
        };
        let flow = entry.flow.flow();
        debug!(
            parent: &self.span,
            "executing retry #{} for flow {}",
            entry.retry_count,
            flow_id
        );
        self.execute_flow_or_mark_pending(&flow, false);
    }

    fn dispose_flow(&mut self, flow_id: &str) {
        debug!(parent: &self.span, "dispose flow {}", flow_id);
        match self.index.remove(flow_id) {
            Some(entry) => {
                entry.flow.flow().dispose();
                // An unknown dependency counts as completed.
                self.start_pending_flows(flow_id);
                self.archive_flows();
            }
            None => warn!(parent: &self.span, "flow to dispose not found: {}", flow_id),
        }
    }

    fn cancel_all(&self) {
        debug!(parent: &self.span, "cancel {} flows", self.index.len());
        for (_, entry) in self.index.entries() {
            entry.flow.flow().cancel();
        }
    }

    fn archive_flows(&self) {
        trace!(parent: &self.span, "archive all flows");
        if let Err(e) = self.store.save(&self.config.state_key, &self.index) {
            error!(parent: &self.span, "failed to archive flows: {}", e);
        }
    }

    /// Point the flow's progress at this engine and its steps' progress at
    /// the flow, then hand the flow to the configurator.
    fn configure_flow_dependencies(&self, any: &A) {
        let flow = any.flow();
        trace!(
            parent: &self.span,
            "configure flow dependencies for {}",
            flow.core().short_id()
        );

        let flow_span = info_span!(parent: &self.span, "flow", flow_id = %flow.core().short_id());
        let sink: Arc<dyn FlowProgressSink> = Arc::new(EngineSink {
            commands: self.commands.clone(),
        });
        flow.core()
            .bind(Arc::downgrade(&flow), sink, flow_span.clone());

        let link: Arc<dyn StepProgressSink> = Arc::new(FlowLink::new(&flow));
        for step in flow.steps() {
            let step_span = info_span!(parent: &flow_span, "step", step_id = %step.id());
            step.state().bind(link.clone(), step_span);
        }

        if let Some(configure) = &self.configurator {
            configure(any);
        }
    }
}
