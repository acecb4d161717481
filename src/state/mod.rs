//! Flow registry and its persistence.
//!
//! - [`FlowIndex`] / [`FlowEntry`]: the registry the engine owns
//! - [`StateStore`]: the persistence contract, with [`FileStateStore`] and
//!   [`MemoryStateStore`] implementations

pub mod index;
pub mod store;

pub use index::{FlowEntry, FlowIndex};
pub use store::{FileStateStore, MemoryStateStore, StateStore};
