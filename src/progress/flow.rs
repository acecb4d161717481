//! Flow-level progress and the rule deriving it from step progress.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::step::{ErrorCode, StepProgress};

/// Aggregate state of a flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowProgress {
    /// No step has started.
    #[default]
    Pending,
    /// Step `step` (zero-based) of `total` is the last one that moved.
    Executing {
        step: usize,
        progress: StepProgress,
        total: usize,
    },
    /// Every step succeeded.
    Success,
    /// A step failed; the flow does not continue.
    Failure { code: ErrorCode, message: String },
    /// A step was cancelled.
    Cancelled,
}

impl FlowProgress {
    /// Derive a flow's progress from its ordered step progresses.
    ///
    /// The last step that is not `Pending` decides. A flow without steps is
    /// successful. A succeeded step that is not the final one yields the
    /// transitional `Executing { progress: Success, .. }` value: the next step
    /// has not started yet.
    pub fn derive(steps: &[StepProgress]) -> Self {
        if steps.is_empty() {
            return Self::Success;
        }

        let Some(index) = steps.iter().rposition(|p| !p.is_pending()) else {
            return Self::Pending;
        };

        let total = steps.len();
        match &steps[index] {
            StepProgress::Failure { code, message } => Self::Failure {
                code: code.clone(),
                message: message.clone(),
            },
            progress @ StepProgress::InProgress(_) => Self::Executing {
                step: index,
                progress: progress.clone(),
                total,
            },
            StepProgress::Success if index == total - 1 => Self::Success,
            StepProgress::Success => Self::Executing {
                step: index,
                progress: StepProgress::Success,
                total,
            },
            StepProgress::Cancelled => Self::Cancelled,
            StepProgress::Pending => unreachable!("rposition skipped pending steps"),
        }
    }

    /// Merge the progress of two independent flows.
    ///
    /// The result does not depend on argument order. `Executing` wins over
    /// everything; two executing flows add their step counts and average their
    /// current completion into a synthetic in-progress step. `Failure` wins
    /// over the remaining states. `Pending` wins over `Success` and
    /// `Cancelled`, and `Success` wins over `Cancelled`.
    pub fn combine(&self, other: &Self) -> Self {
        match (self, other) {
            (
                Self::Executing {
                    step: a_step,
                    progress: a_progress,
                    total: a_total,
                },
                Self::Executing {
                    step: b_step,
                    progress: b_progress,
                    total: b_total,
                },
            ) => Self::Executing {
                step: a_step + b_step,
                progress: StepProgress::InProgress(
                    (a_progress.completion_value() + b_progress.completion_value()) / 2.0,
                ),
                total: a_total + b_total,
            },
            (Self::Executing { .. }, _) => self.clone(),
            (_, Self::Executing { .. }) => other.clone(),

            // Two distinct failures: keep the smaller one so the merge stays symmetric.
            (
                Self::Failure {
                    code: a_code,
                    message: a_message,
                },
                Self::Failure {
                    code: b_code,
                    message: b_message,
                },
            ) => {
                if (a_code, a_message) <= (b_code, b_message) {
                    self.clone()
                } else {
                    other.clone()
                }
            }
            (Self::Failure { .. }, _) => self.clone(),
            (_, Self::Failure { .. }) => other.clone(),

            (Self::Pending, _) | (_, Self::Pending) => Self::Pending,
            (Self::Cancelled, Self::Cancelled) => Self::Cancelled,
            _ => Self::Success,
        }
    }

    /// Overall completion between 0 and 1.
    pub fn completion_value(&self) -> f32 {
        match self {
            Self::Executing {
                step,
                progress,
                total,
            } => {
                if *total == 0 {
                    return 0.0;
                }
                (*step as f32 + progress.completion_value()) / *total as f32
            }
            Self::Success => 1.0,
            Self::Pending | Self::Failure { .. } | Self::Cancelled => 0.0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// Whether the flow reached a state it will not leave on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure { .. } | Self::Cancelled
        )
    }
}

impl fmt::Display for FlowProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Executing {
                step,
                progress,
                total,
            } => write!(f, "executing step {}/{} ({})", step + 1, total, progress),
            Self::Success => write!(f, "success"),
            Self::Failure { code, message } => write!(f, "failure [{}]: {}", code, message),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
