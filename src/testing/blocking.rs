//! A flow whose single step blocks until it is signalled.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::flow::{Flow, FlowCore, FlowId, Step, StepState};
use crate::progress::StepProgress;

use super::SignalBoard;

/// Step that reports `InProgress(0)`, then blocks its flow's queue until
/// its identifier is raised on the attached [`SignalBoard`].
#[derive(Serialize, Deserialize)]
pub struct BlockingStep {
    state: StepState,
    #[serde(skip)]
    board: RwLock<Option<SignalBoard>>,
}

impl BlockingStep {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            state: StepState::new(id),
            board: RwLock::new(None),
        }
    }

    /// Wake this step through `board`. Not persisted; attach again after a
    /// restore.
    pub fn attach(&self, board: &SignalBoard) {
        *self.board.write().unwrap_or_else(PoisonError::into_inner) = Some(board.clone());
    }

    fn board(&self) -> Option<SignalBoard> {
        self.board
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Step for BlockingStep {
    fn state(&self) -> &StepState {
        &self.state
    }

    fn execute(&self) {
        trace!(parent: &self.state.span(), "{} executing", self.id());
        self.state.update_progress(StepProgress::InProgress(0.0));

        let Some(board) = self.board() else {
            warn!(parent: &self.state.span(), "{} has no signal board attached", self.id());
            self.state.update_progress(StepProgress::failure(
                "no_signal_board",
                "blocking step executed without a signal board",
            ));
            return;
        };
        if board.wait_blocking(self.id()) {
            self.state.update_progress(StepProgress::Success);
        } else {
            self.state.update_progress(StepProgress::failure(
                "no_runtime",
                "blocking step executed outside a tokio runtime",
            ));
        }
    }
}

/// Flow made of one [`BlockingStep`]. The step identifier is the flow
/// identifier followed by `-step`: raise `"upload-step"` to release flow
/// `"upload"`.
#[derive(Serialize, Deserialize)]
pub struct BlockingFlow {
    core: FlowCore,
    blocking_step: BlockingStep,
}

impl BlockingFlow {
    pub fn new(id: impl Into<FlowId>) -> Self {
        Self::with_core(FlowCore::new(id))
    }

    /// Build around a core carrying tags or dependencies.
    pub fn with_core(core: FlowCore) -> Self {
        let blocking_step = BlockingStep::new(format!("{}-step", core.id()));
        Self {
            core,
            blocking_step,
        }
    }

    pub fn blocking_step(&self) -> &BlockingStep {
        &self.blocking_step
    }

    pub fn step_id(&self) -> &str {
        self.blocking_step.id()
    }

    pub fn attach(&self, board: &SignalBoard) {
        self.blocking_step.attach(board);
    }
}

impl Flow for BlockingFlow {
    fn core(&self) -> &FlowCore {
        &self.core
    }

    fn steps(&self) -> Vec<&dyn Step> {
        vec![&self.blocking_step]
    }
}
