//! Step-level progress.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code reported by a failing step.
pub type ErrorCode = String;

/// Current state of a single step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepProgress {
    /// Not started yet.
    #[default]
    Pending,
    /// Running, with a completion fraction in `0.0..=1.0`.
    InProgress(f32),
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Failure { code: ErrorCode, message: String },
    /// Stopped before completion.
    Cancelled,
}

impl StepProgress {
    /// Build a failure progress value.
    pub fn failure(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self::Failure {
            code: code.into(),
            message: message.into(),
        }
    }

    /// How far along the step is, between 0 and 1.
    ///
    /// Failed steps count as complete: they will not run further.
    pub fn completion_value(&self) -> f32 {
        match self {
            Self::Pending | Self::Cancelled => 0.0,
            Self::InProgress(fraction) => *fraction,
            Self::Success | Self::Failure { .. } => 1.0,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for StepProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress(fraction) => write!(f, "in progress ({:.0}%)", fraction * 100.0),
            Self::Success => write!(f, "success"),
            Self::Failure { code, message } => write!(f, "failure [{}]: {}", code, message),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
