//! Step collaborator contract and the shared step state.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{trace, Span};

use crate::progress::StepProgress;

use super::sink::StepProgressSink;

/// Identifier of a step, unique within its flow.
pub type StepId = String;

/// One unit of sequential work inside a flow.
///
/// Implementations own whatever private state they need and embed a
/// [`StepState`] for the parts the engine relies on. `execute` reports its
/// outcome through [`StepState::update_progress`]; it may block for as long
/// as it needs since it runs on its flow's queue.
pub trait Step: Send + Sync {
    fn state(&self) -> &StepState;

    fn execute(&self);

    /// Re-attach resources that were not persisted.
    fn after_restore(&self) {
        trace!(parent: &self.state().span(), "{} after restore", self.id());
    }

    /// Advisory: the step still has to report a terminal progress.
    fn cancel(&self) {
        trace!(parent: &self.state().span(), "{} cancel", self.id());
    }

    /// Clear private state before the step runs again. Progress itself is
    /// reset by the owning flow.
    fn reset(&self) {
        trace!(parent: &self.state().span(), "{} reset", self.id());
    }

    fn dispose(&self) {
        trace!(parent: &self.state().span(), "{} dispose", self.id());
    }

    fn id(&self) -> &str {
        self.state().id()
    }

    fn progress(&self) -> StepProgress {
        self.state().progress()
    }
}

#[derive(Default)]
struct StepBinding {
    sink: Option<Arc<dyn StepProgressSink>>,
    span: Option<Span>,
}

/// Identifier and progress of a step, plus its link to the owning flow.
///
/// Only the identifier and progress are persisted; the link is restored by
/// the engine every time it configures the flow.
#[derive(Serialize, Deserialize)]
pub struct StepState {
    id: StepId,
    #[serde(default)]
    progress: RwLock<StepProgress>,
    #[serde(skip)]
    binding: RwLock<StepBinding>,
}

impl StepState {
    pub fn new(id: impl Into<StepId>) -> Self {
        Self {
            id: id.into(),
            progress: RwLock::new(StepProgress::Pending),
            binding: RwLock::new(StepBinding::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn progress(&self) -> StepProgress {
        self.progress
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record new progress and notify the owning flow.
    pub fn update_progress(&self, progress: StepProgress) {
        trace!(parent: &self.span(), "{} updating progress to {}", self.id, progress);
        self.set_progress(progress.clone());
        let sink = self
            .binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sink
            .clone();
        if let Some(sink) = sink {
            sink.step_did_progress(&self.id, &progress);
        }
    }

    /// Record new progress without notifying anyone.
    pub fn set_progress(&self, progress: StepProgress) {
        *self.progress.write().unwrap_or_else(PoisonError::into_inner) = progress;
    }

    /// Span the step logs under; disabled until the step is bound.
    pub fn span(&self) -> Span {
        self.binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .span
            .clone()
            .unwrap_or_else(Span::none)
    }

    pub fn is_bound(&self) -> bool {
        self.binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sink
            .is_some()
    }

    pub(crate) fn bind(&self, sink: Arc<dyn StepProgressSink>, span: Span) {
        let mut binding = self.binding.write().unwrap_or_else(PoisonError::into_inner);
        binding.sink = Some(sink);
        binding.span = Some(span);
    }
}

impl fmt::Debug for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepState")
            .field("id", &self.id)
            .field("progress", &self.progress())
            .field("bound", &self.is_bound())
            .finish()
    }
}
