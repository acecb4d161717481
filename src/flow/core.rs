//! Shared state embedded by every concrete flow.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde::{Deserialize, Serialize};
use tracing::{warn, Span};

use super::queue::SerialQueue;
use super::sink::FlowProgressSink;
use super::{short_id, Flow, FlowId};

#[derive(Default)]
struct FlowBinding {
    this: Option<Weak<dyn Flow>>,
    sink: Option<Arc<dyn FlowProgressSink>>,
    span: Option<Span>,
}

/// Identity, grouping metadata and dependencies of a flow, together with the
/// runtime links the engine installs.
///
/// Concrete flows embed one `FlowCore` and return it from [`Flow::core`].
/// Only `id`, `tags` and `wait_for` are persisted.
#[derive(Serialize, Deserialize)]
pub struct FlowCore {
    id: FlowId,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    wait_for: BTreeSet<FlowId>,
    #[serde(skip)]
    binding: RwLock<FlowBinding>,
    #[serde(skip)]
    queue: SerialQueue,
}

impl FlowCore {
    pub fn new(id: impl Into<FlowId>) -> Self {
        Self {
            id: id.into(),
            tags: BTreeSet::new(),
            wait_for: BTreeSet::new(),
            binding: RwLock::new(FlowBinding::default()),
            queue: SerialQueue::new(),
        }
    }

    /// Add grouping tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Add flows that must succeed before this one starts.
    pub fn waiting_for<I, S>(mut self, flows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<FlowId>,
    {
        self.wait_for.extend(flows.into_iter().map(Into::into));
        self
    }

    pub fn id(&self) -> &FlowId {
        &self.id
    }

    pub fn short_id(&self) -> String {
        short_id(&self.id)
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn wait_for(&self) -> &BTreeSet<FlowId> {
        &self.wait_for
    }

    /// Span the flow logs under; disabled until the flow is bound.
    pub fn span(&self) -> Span {
        self.binding()
            .span
            .clone()
            .unwrap_or_else(Span::none)
    }

    pub fn is_bound(&self) -> bool {
        self.binding().sink.is_some()
    }

    pub(crate) fn sink(&self) -> Option<Arc<dyn FlowProgressSink>> {
        self.binding().sink.clone()
    }

    pub(crate) fn bind(&self, this: Weak<dyn Flow>, sink: Arc<dyn FlowProgressSink>, span: Span) {
        let mut binding = self.binding.write().unwrap_or_else(PoisonError::into_inner);
        binding.this = Some(this);
        binding.sink = Some(sink);
        binding.span = Some(span);
    }

    /// Run `job` on this flow's serial queue.
    ///
    /// The job receives the flow if it is still alive when the job runs. Jobs
    /// submitted before the flow is bound are dropped.
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce(&dyn Flow) + Send + 'static,
    {
        let this = self.binding().this.clone();
        let Some(this) = this else {
            warn!(
                "flow {} is not bound to an engine, dropping queued work",
                self.short_id()
            );
            return;
        };
        self.queue.dispatch(move || {
            if let Some(flow) = this.upgrade() {
                job(flow.as_ref());
            }
        });
    }

    fn binding(&self) -> std::sync::RwLockReadGuard<'_, FlowBinding> {
        self.binding.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for FlowCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowCore")
            .field("id", &self.id)
            .field("tags", &self.tags)
            .field("wait_for", &self.wait_for)
            .field("bound", &self.is_bound())
            .finish()
    }
}
