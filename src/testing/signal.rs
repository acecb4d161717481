//! Latched wake-up signals keyed by identifier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{trace, warn};

/// Board of named, latched signals.
///
/// A signal stays raised once sent, so a waiter arriving late is released
/// immediately, and every waiter on the same name is released together.
/// Clones share the same board.
#[derive(Debug, Clone, Default)]
pub struct SignalBoard {
    latches: Arc<Mutex<HashMap<String, watch::Sender<bool>>>>,
}

impl SignalBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal `name`, releasing current and future waiters.
    pub fn signal(&self, name: &str) {
        trace!("signal {}", name);
        self.with_latch(name, |latch| latch.send_replace(true));
    }

    pub fn is_signalled(&self, name: &str) -> bool {
        self.lock().get(name).is_some_and(|latch| *latch.borrow())
    }

    /// Wait until `name` is raised.
    pub async fn wait(&self, name: &str) {
        let mut raised = self.with_latch(name, watch::Sender::subscribe);
        // The board keeps the sender, so the channel never closes.
        let _ = raised.wait_for(|up| *up).await;
    }

    /// Block the current thread until `name` is raised.
    ///
    /// Must run outside async code, e.g. on the blocking pool where flow
    /// steps execute. Returns `false` without waiting when no tokio runtime
    /// is available.
    pub fn wait_blocking(&self, name: &str) -> bool {
        match Handle::try_current() {
            Ok(handle) => {
                handle.block_on(self.wait(name));
                true
            }
            Err(_) => {
                warn!("no tokio runtime, cannot wait for signal {}", name);
                false
            }
        }
    }

    fn with_latch<R>(&self, name: &str, f: impl FnOnce(&watch::Sender<bool>) -> R) -> R {
        let mut latches = self.lock();
        let latch = latches
            .entry(name.to_string())
            .or_insert_with(|| watch::channel(false).0);
        f(latch)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, watch::Sender<bool>>> {
        self.latches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
