//! Collaborators for exercising an engine in tests.
//!
//! [`BlockingFlow`] holds its flow in flight until a test raises the step's
//! identifier on a [`SignalBoard`]. Hand the board to every blocking flow
//! from the engine configurator, so restored flows are attached too:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use serde::{Deserialize, Serialize};
//! # use steadyflow::flow::{AnyFlow, Flow};
//! # use steadyflow::state::MemoryStateStore;
//! use steadyflow::engine::WorkflowEngine;
//! use steadyflow::testing::{BlockingFlow, SignalBoard};
//! # #[derive(Clone, Serialize, Deserialize)]
//! # enum Flows { Blocking(Arc<BlockingFlow>) }
//! # impl AnyFlow for Flows {
//! #     fn flow(&self) -> Arc<dyn Flow> { match self { Flows::Blocking(f) => f.clone() } }
//! # }
//! # async fn demo() {
//! let board = SignalBoard::new();
//! let engine = WorkflowEngine::<Flows>::builder(MemoryStateStore::new())
//!     .configurator({
//!         let board = board.clone();
//!         move |flow: &Flows| match flow {
//!             Flows::Blocking(f) => f.attach(&board),
//!         }
//!     })
//!     .build();
//!
//! engine.execute_new_flow(Flows::Blocking(Arc::new(BlockingFlow::new("upload"))));
//! board.signal("upload-step");
//! # }
//! ```

mod blocking;
mod signal;

pub use blocking::{BlockingFlow, BlockingStep};
pub use signal::SignalBoard;
