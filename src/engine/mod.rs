//! The workflow engine.
//!
//! [`WorkflowEngine`] is a cheap, clonable handle to an actor task that owns
//! the flow registry and its state store. Submitting and disposing flows
//! never block; queries are async and resolve once the actor has handled
//! every command posted before them.
//!
//! # Lifecycle of a flow
//!
//! `Submitted → [PendingDependency] → Running → Completed | RetryScheduled → Running | Exhausted`
//!
//! - A flow waits in `PendingDependency` while any flow in its `wait_for`
//!   set is tracked and not yet successful. Unknown dependencies count as
//!   completed.
//! - On `Success` the [`EngineDelegate`] may reject the completion, which
//!   schedules a retry instead of disposing the flow.
//! - On `Failure` a flow that opts in through
//!   [`Flow::should_retry_on_failure_after_restore`](crate::flow::Flow::should_retry_on_failure_after_restore)
//!   is retried with exponential backoff until the retry ceiling is reached.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use serde::{Deserialize, Serialize};
//! use steadyflow::engine::WorkflowEngine;
//! use steadyflow::flow::AnyFlow;
//! use steadyflow::state::MemoryStateStore;
//! use steadyflow::testing::BlockingFlow;
//! # #[derive(Clone, Serialize, Deserialize)]
//! # enum Flows { Blocking(Arc<BlockingFlow>) }
//! # impl AnyFlow for Flows {
//! #     fn flow(&self) -> Arc<dyn steadyflow::flow::Flow> {
//! #         match self { Flows::Blocking(f) => f.clone() }
//! #     }
//! # }
//!
//! # async fn demo() -> steadyflow::error::Result<()> {
//! let engine = WorkflowEngine::<Flows>::builder(MemoryStateStore::new()).build();
//! engine.execute_new_flow(Flows::Blocking(Arc::new(BlockingFlow::new("upload_1"))));
//! assert_eq!(engine.len().await?, 1);
//! # Ok(())
//! # }
//! ```

mod actor;
mod delegate;

pub use delegate::{EngineDelegate, FlowConfigurator};

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;
use tracing::warn;

use crate::config::{EngineConfig, RetryPolicy};
use crate::error::{Result, SteadyflowError};
use crate::flow::{AnyFlow, FlowId};
use crate::state::{FlowEntry, StateStore};

use actor::{Command, EngineActor};

/// Handle to a running workflow engine.
///
/// The engine keeps running while at least one handle exists.
pub struct WorkflowEngine<A: AnyFlow> {
    tx: UnboundedSender<Command<A>>,
}

impl<A: AnyFlow> Clone for WorkflowEngine<A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<A: AnyFlow> std::fmt::Debug for WorkflowEngine<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<A: AnyFlow> WorkflowEngine<A> {
    /// Start configuring an engine persisting to `store`.
    pub fn builder<S: StateStore>(store: S) -> EngineBuilder<A, S> {
        EngineBuilder::new(store)
    }

    /// Register and start a flow, or park it until its dependencies
    /// succeed. Submitting an identifier that is already tracked is a no-op.
    pub fn execute_new_flow(&self, flow: A) {
        self.post(Command::Submit(flow));
    }

    /// Remove a flow from the registry and release its resources. Flows
    /// waiting only on it are started.
    pub fn dispose_flow(&self, flow_id: impl Into<FlowId>) {
        self.post(Command::Dispose(flow_id.into()));
    }

    /// Resume every tracked flow whose dependencies are satisfied. Only
    /// needed when the engine was built with `auto_resume` off: resuming
    /// happens once per engine and later calls are ignored.
    pub fn resume_all(&self) {
        self.post(Command::ResumeAll);
    }

    /// Propagate cancellation to every step of every tracked flow.
    ///
    /// Advisory: steps still report their terminal progress.
    pub async fn cancel(&self) -> Result<()> {
        self.request(Command::Cancel).await
    }

    pub async fn flow(&self, flow_id: &str) -> Result<Option<A>> {
        let id = flow_id.to_string();
        self.request(|reply| Command::Flow { id, reply }).await
    }

    /// Tracked flows matching `predicate`, in identifier order.
    pub async fn flows<F>(&self, predicate: F) -> Result<Vec<A>>
    where
        F: Fn(&A) -> bool + Send + 'static,
    {
        let filter = Box::new(predicate);
        self.request(|reply| Command::Flows { filter, reply }).await
    }

    /// Registry entry (flow, last progress, retry count) of a tracked flow.
    pub async fn entry(&self, flow_id: &str) -> Result<Option<FlowEntry<A>>> {
        let id = flow_id.to_string();
        self.request(|reply| Command::Entry { id, reply }).await
    }

    /// Identifiers of flows parked on unfinished dependencies.
    pub async fn pending_ids(&self) -> Result<BTreeSet<FlowId>> {
        self.request(Command::PendingIds).await
    }

    /// Number of tracked flows.
    pub async fn len(&self) -> Result<usize> {
        self.request(Command::Len).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn post(&self, command: Command<A>) {
        if self.tx.send(command).is_err() {
            warn!("workflow engine is closed, dropping command");
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command<A>) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .map_err(|_| SteadyflowError::EngineClosed)?;
        response.await.map_err(|_| SteadyflowError::EngineClosed)
    }
}

/// Assembles a [`WorkflowEngine`].
pub struct EngineBuilder<A: AnyFlow, S: StateStore> {
    store: S,
    config: EngineConfig,
    delegate: Option<Arc<dyn EngineDelegate<A>>>,
    configurator: Option<FlowConfigurator<A>>,
}

impl<A: AnyFlow, S: StateStore> EngineBuilder<A, S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            config: EngineConfig::default(),
            delegate: None,
            configurator: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn delegate<D: EngineDelegate<A>>(mut self, delegate: Arc<D>) -> Self {
        let delegate: Arc<dyn EngineDelegate<A>> = delegate;
        self.delegate = Some(delegate);
        self
    }

    /// Hook called on every flow after the engine bound it.
    pub fn configurator<F>(mut self, configure: F) -> Self
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let configure: FlowConfigurator<A> = Arc::new(configure);
        self.configurator = Some(configure);
        self
    }

    /// Restore the persisted registry, resume it if configured, and start
    /// the actor.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn build(self) -> WorkflowEngine<A> {
        let (tx, rx) = mpsc::unbounded_channel();
        let auto_resume = self.config.auto_resume;

        let mut actor = EngineActor::new(
            self.store,
            self.config,
            self.delegate,
            self.configurator,
            tx.downgrade(),
        );
        actor.restore();
        if auto_resume {
            actor.resume_all();
        }
        tokio::spawn(actor.run(rx));

        WorkflowEngine { tx }
    }
}
