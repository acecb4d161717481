//! Steadyflow - durable workflow orchestration.
//!
//! Steadyflow tracks a registry of multi-step flows, persists their progress
//! after every change so a process can crash and resume, starts flows once
//! the flows they wait for succeeded, and retries failed or rejected flows
//! with exponential backoff.
//!
//! # Modules
//!
//! - [`progress`] - Step and flow progress values and the derivation rule
//! - [`flow`] - The `Flow` / `Step` contracts and their building blocks
//! - [`state`] - The flow registry and state stores
//! - [`engine`] - The workflow engine, its delegate and configurator hooks
//! - [`config`] - Engine configuration and retry backoff
//! - [`testing`] - Blocking collaborators for tests
//! - [`cli`] - Command-line interface
//! - [`error`] - Error types and result aliases
//!
//! # Example
//!
//! ```
//! use steadyflow::progress::{FlowProgress, StepProgress};
//!
//! let steps = [StepProgress::Success, StepProgress::InProgress(0.5)];
//! let progress = FlowProgress::derive(&steps);
//! assert_eq!(progress.completion_value(), 0.75);
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod flow;
pub mod progress;
pub mod state;
pub mod testing;

pub use config::{EngineConfig, RetryPolicy};
pub use engine::{EngineDelegate, WorkflowEngine};
pub use error::{Result, SteadyflowError};
pub use flow::{AnyFlow, Flow, FlowCore, FlowId, Step, StepState};
pub use progress::{FlowProgress, StepProgress};
