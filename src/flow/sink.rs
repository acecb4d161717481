//! Progress sinks connecting steps to flows and flows to the engine.
//!
//! Progress travels step → flow → engine. Each layer holds a sink to the next
//! one and the sink never keeps its target alive.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use crate::progress::{FlowProgress, StepProgress};

use super::{Flow, FlowId};

/// Receives a flow's aggregate progress. Implemented by the engine.
pub trait FlowProgressSink: Send + Sync {
    fn flow_did_progress(&self, flow_id: &FlowId, progress: FlowProgress, tags: &BTreeSet<String>);
}

/// Receives a step's progress changes. Implemented by the owning flow.
pub trait StepProgressSink: Send + Sync {
    fn step_did_progress(&self, step_id: &str, progress: &StepProgress);
}

/// Non-owning link from a step back to its flow.
pub(crate) struct FlowLink {
    flow: Weak<dyn Flow>,
}

impl FlowLink {
    pub(crate) fn new(flow: &Arc<dyn Flow>) -> Self {
        Self {
            flow: Arc::downgrade(flow),
        }
    }
}

impl StepProgressSink for FlowLink {
    fn step_did_progress(&self, step_id: &str, progress: &StepProgress) {
        if let Some(flow) = self.flow.upgrade() {
            flow.step_did_progress(step_id, progress);
        }
    }
}
