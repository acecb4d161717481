//! Flow and step collaborator contracts.
//!
//! A [`Flow`] is an ordered, fixed sequence of [`Step`]s tracked as one unit
//! of work. Concrete flows embed a [`FlowCore`] and their steps embed a
//! [`StepState`]; everything else (start, resume, progress derivation,
//! advancing to the next step) comes from the trait's provided methods.
//!
//! Applications list every concrete flow kind in one serializable enum and
//! implement [`AnyFlow`] for it, so the engine can persist heterogeneous
//! flows in a single registry.
//!
//! # Concurrency
//!
//! Each flow serializes its own step transitions on a private queue
//! ([`FlowCore::dispatch`]). `start`, `resume` and advancing after a step
//! succeeds are queued there and return immediately. The engine may call
//! `reset`, `cancel` and `dispose` directly; they only touch step state
//! through its own locks and never call back into the engine synchronously.

mod core;
mod queue;
mod sink;
mod step;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use crate::progress::{FlowProgress, StepProgress};

pub use self::core::FlowCore;
pub use queue::SerialQueue;
pub(crate) use sink::FlowLink;
pub use sink::{FlowProgressSink, StepProgressSink};
pub use step::{Step, StepId, StepState};

/// Unique identifier of a flow; also the registry key.
pub type FlowId = String;

/// A named, ordered sequence of steps.
pub trait Flow: Send + Sync + 'static {
    fn core(&self) -> &FlowCore;

    /// Steps in execution order. The order never changes.
    fn steps(&self) -> Vec<&dyn Step>;

    /// Whether a failed run should be retried, both right away and when the
    /// flow is found failed after a restart.
    fn should_retry_on_failure_after_restore(&self) -> bool {
        false
    }

    fn id(&self) -> &FlowId {
        self.core().id()
    }

    fn tags(&self) -> &BTreeSet<String> {
        self.core().tags()
    }

    fn wait_for(&self) -> &BTreeSet<FlowId> {
        self.core().wait_for()
    }

    /// Progress derived from the steps (see [`FlowProgress::derive`]).
    fn progress(&self) -> FlowProgress {
        let steps: Vec<StepProgress> = self.steps().iter().map(|s| s.progress()).collect();
        FlowProgress::derive(&steps)
    }

    fn step_in_progress(&self) -> Option<&dyn Step> {
        self.steps()
            .into_iter()
            .find(|step| step.progress().is_in_progress())
    }

    /// Execute the first pending step.
    fn start(&self) {
        trace!(parent: &self.core().span(), "start");
        self.core().dispatch(|flow| flow.execute_next_pending());
    }

    /// Continue where the flow stopped: re-run the step that was in
    /// progress, or start the next pending one. Failed flows are left alone.
    fn resume(&self) {
        trace!(parent: &self.core().span(), "resume");
        self.core().dispatch(|flow| {
            if let FlowProgress::Failure { code, message } = flow.progress() {
                debug!(
                    parent: &flow.core().span(),
                    "can't resume flow {} in failure state with error {}: {}",
                    flow.core().short_id(),
                    code,
                    message
                );
            } else if let Some(step) = flow.step_in_progress() {
                step.execute();
            } else {
                flow.execute_next_pending();
            }
        });
    }

    /// Run the first pending step. Must be called from the flow's queue.
    fn execute_next_pending(&self) {
        let span = self.core().span();
        if let Some(step) = self.step_in_progress() {
            debug!(
                parent: &span,
                "not starting the next pending step while {} is still in progress",
                step.id()
            );
            return;
        }

        let steps = self.steps();
        let Some(next) = steps.iter().find(|step| step.progress().is_pending()) else {
            debug!(
                parent: &span,
                "flow {} has no remaining step to execute",
                self.core().short_id()
            );
            // An empty flow never hears from a step, so report for it.
            if steps.is_empty() {
                self.send_progress();
            }
            return;
        };

        debug!(
            parent: &span,
            "flow {} start step {}",
            self.core().short_id(),
            next.id()
        );
        next.execute();
    }

    /// Put every step back to `Pending`.
    fn reset(&self) {
        trace!(parent: &self.core().span(), "reset");
        for step in self.steps() {
            step.reset();
            step.state().set_progress(StepProgress::Pending);
        }
    }

    /// Propagated to every step; advisory.
    fn cancel(&self) {
        trace!(parent: &self.core().span(), "cancel");
        for step in self.steps() {
            step.cancel();
        }
    }

    /// Release resources held by the steps.
    fn dispose(&self) {
        trace!(parent: &self.core().span(), "dispose");
        for step in self.steps() {
            step.dispose();
        }
    }

    /// Called once after the flow was loaded from persisted state and bound.
    fn after_restore(&self) {
        for step in self.steps() {
            step.after_restore();
        }
    }

    /// Forward the current aggregate progress to the engine.
    fn send_progress(&self) {
        if let Some(sink) = self.core().sink() {
            sink.flow_did_progress(self.id(), self.progress(), self.tags());
        }
    }

    /// Called by a step of this flow whenever its progress changes.
    fn step_did_progress(&self, step_id: &str, progress: &StepProgress) {
        let aggregate = self.progress();
        trace!(
            parent: &self.core().span(),
            "flow {} step did progress - {}: {}, completion: {:.2}",
            self.core().short_id(),
            step_id,
            progress,
            aggregate.completion_value()
        );
        self.send_progress();

        if progress.is_success() {
            let step_id = step_id.to_string();
            self.core().dispatch(move |flow| {
                // The engine may have reset the flow for a retry in the meantime.
                let still_done = flow
                    .steps()
                    .iter()
                    .any(|step| step.id() == step_id && step.progress().is_success());
                if still_done {
                    flow.execute_next_pending();
                }
            });
        }
    }
}

/// Closed set of an application's concrete flow kinds.
///
/// Usually an enum with one variant per flow type, each holding an
/// `Arc<ConcreteFlow>`. Adding a flow kind means adding a variant.
pub trait AnyFlow: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn flow(&self) -> Arc<dyn Flow>;
}

/// Shorten an identifier for log lines: text before the first `_`, an
/// ellipsis, then the last six characters.
pub fn short_id(id: &str) -> String {
    let prefix = id.split_once('_').map(|(head, _)| head).unwrap_or("");
    let chars: Vec<char> = id.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(6)..].iter().collect();
    format!("{}…{}", prefix, tail)
}
