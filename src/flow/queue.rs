//! Per-flow serial execution queue.

use std::sync::OnceLock;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs one at a time, in submission order, off the caller's thread.
///
/// The worker task is started on first use from the ambient tokio runtime.
/// Each job runs on the blocking pool, so a step may block for as long as it
/// needs without stalling the runtime. Dispatching from inside a running job
/// is allowed: the new job runs after the current one returns.
#[derive(Default)]
pub struct SerialQueue {
    sender: OnceLock<UnboundedSender<Job>>,
}

impl SerialQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a job. Never blocks.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        let Some(sender) = self.sender() else {
            error!("No tokio runtime available, dropping queued flow job");
            return;
        };
        if sender.send(Box::new(job)).is_err() {
            warn!("Flow queue worker has stopped, dropping job");
        }
    }

    fn sender(&self) -> Option<&UnboundedSender<Job>> {
        if let Some(sender) = self.sender.get() {
            return Some(sender);
        }
        let handle = Handle::try_current().ok()?;
        Some(self.sender.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            handle.spawn(drain(rx));
            tx
        }))
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("started", &self.sender.get().is_some())
            .finish()
    }
}

async fn drain(mut jobs: UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        if let Err(e) = tokio::task::spawn_blocking(job).await {
            error!("Flow job panicked: {}", e);
        }
    }
}
