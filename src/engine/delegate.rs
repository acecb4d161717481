//! Application hooks into the engine.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::flow::{AnyFlow, FlowId};
use crate::progress::FlowProgress;

use super::WorkflowEngine;

/// Observer of every recorded progress update.
///
/// Runs on the engine actor right after the registry was updated. The return
/// value only matters for [`FlowProgress::Success`]: `false` rejects the
/// completion and schedules a retry instead of disposing the flow.
///
/// Implementations must not block; they may post new work through `engine`.
pub trait EngineDelegate<A: AnyFlow>: Send + Sync + 'static {
    fn on_flow_progress(
        &self,
        engine: &WorkflowEngine<A>,
        flow_id: &FlowId,
        progress: &FlowProgress,
        tags: &BTreeSet<String>,
    ) -> bool;
}

impl<A, F> EngineDelegate<A> for F
where
    A: AnyFlow,
    F: Fn(&WorkflowEngine<A>, &FlowId, &FlowProgress, &BTreeSet<String>) -> bool
        + Send
        + Sync
        + 'static,
{
    fn on_flow_progress(
        &self,
        engine: &WorkflowEngine<A>,
        flow_id: &FlowId,
        progress: &FlowProgress,
        tags: &BTreeSet<String>,
    ) -> bool {
        self(engine, flow_id, progress, tags)
    }
}

/// Called at the end of every configuration pass so applications can inject
/// their own dependencies into a flow.
pub type FlowConfigurator<A> = Arc<dyn Fn(&A) + Send + Sync>;
