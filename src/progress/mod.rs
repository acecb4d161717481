//! Progress value types.
//!
//! [`StepProgress`] describes one step, [`FlowProgress`] a whole flow. A
//! flow's progress is never stored by the flow itself: it is derived from its
//! steps with [`FlowProgress::derive`].

mod flow;
mod step;

pub use flow::FlowProgress;
pub use step::{ErrorCode, StepProgress};
