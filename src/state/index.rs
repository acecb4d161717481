//! The flow registry.
//!
//! [`FlowIndex`] maps flow identifiers to their [`FlowEntry`] and tracks the
//! flows blocked on unfinished dependencies. The whole index is the unit of
//! persistence. It is not synchronized; the engine actor is its only owner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::flow::{AnyFlow, FlowId};
use crate::progress::FlowProgress;

/// A tracked flow with its last reported progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEntry<A> {
    pub flow: A,
    pub progress: FlowProgress,
    #[serde(default)]
    pub retry_count: u32,
    /// Last time `progress` was written.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl<A> FlowEntry<A> {
    pub fn new(flow: A, progress: FlowProgress) -> Self {
        Self {
            flow,
            progress,
            retry_count: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Registry of tracked flows plus the set gated on dependencies.
///
/// Every identifier in `pending` is also a key of `flows`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowIndex<A> {
    #[serde(default = "BTreeMap::new")]
    flows: BTreeMap<FlowId, FlowEntry<A>>,
    #[serde(default)]
    pending: BTreeSet<FlowId>,
}

impl<A> Default for FlowIndex<A> {
    fn default() -> Self {
        Self {
            flows: BTreeMap::new(),
            pending: BTreeSet::new(),
        }
    }
}

impl<A: AnyFlow> FlowIndex<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert by the entry's flow identifier.
    pub fn insert_or_update(&mut self, entry: FlowEntry<A>) {
        let id = entry.flow.flow().id().clone();
        self.flows.insert(id, entry);
    }

    /// Replace the stored progress, keeping the retry count.
    ///
    /// Returns the previous progress, or `None` if the flow is unknown.
    pub fn update_progress(&mut self, id: &str, progress: FlowProgress) -> Option<FlowProgress> {
        let entry = self.flows.get_mut(id)?;
        entry.updated_at = Utc::now();
        Some(std::mem::replace(&mut entry.progress, progress))
    }

    /// Add or remove `id` from the dependency-gated set. Unknown ids are
    /// never added.
    pub fn mark_pending(&mut self, id: &str, pending: bool) {
        if pending {
            if self.flows.contains_key(id) {
                self.pending.insert(id.to_string());
            }
        } else {
            self.pending.remove(id);
        }
    }

    /// Remove a flow from both the map and the pending set.
    pub fn remove(&mut self, id: &str) -> Option<FlowEntry<A>> {
        self.pending.remove(id);
        self.flows.remove(id)
    }

    /// Returns the new count, or 0 for an unknown flow.
    pub fn increment_retry_count(&mut self, id: &str) -> u32 {
        match self.flows.get_mut(id) {
            Some(entry) => {
                entry.retry_count = entry.retry_count.saturating_add(1);
                entry.retry_count
            }
            None => 0,
        }
    }

    pub fn reset_retry_count(&mut self, id: &str) {
        if let Some(entry) = self.flows.get_mut(id) {
            entry.retry_count = 0;
        }
    }

    pub fn retry_count(&self, id: &str) -> u32 {
        self.flows.get(id).map(|e| e.retry_count).unwrap_or(0)
    }

    /// Flows currently gated on dependencies.
    pub fn pending_flows(&self) -> Vec<A> {
        self.pending
            .iter()
            .filter_map(|id| self.flows.get(id))
            .map(|entry| entry.flow.clone())
            .collect()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    pub fn pending_ids(&self) -> &BTreeSet<FlowId> {
        &self.pending
    }

    pub fn get(&self, id: &str) -> Option<&FlowEntry<A>> {
        self.flows.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.flows.contains_key(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&FlowId, &FlowEntry<A>)> {
        self.flows.iter()
    }

    /// Consume the index, yielding its entries in identifier order.
    pub fn into_entries(self) -> impl Iterator<Item = FlowEntry<A>> {
        self.flows.into_values()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Whether every identifier in `ids` is unknown or recorded as
    /// successful. Unknown flows count as completed.
    pub fn are_completed(&self, ids: &BTreeSet<FlowId>) -> bool {
        ids.iter().all(|id| {
            self.flows
                .get(id)
                .map(|entry| entry.progress.is_success())
                .unwrap_or(true)
        })
    }
}
