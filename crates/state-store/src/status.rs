//! Saga status state machine.

use serde::{Deserialize, Serialize};

/// The status of a saga in its lifecycle.
///
/// Status transitions:
/// ```text
/// NotStarted ──► Running ──┬──► Completed
///                          ├──► Failed ──► Compensating ──┬──► Compensated
///                          │                              └──► PartiallyCompensated
///                          ├──► TimedOut
///                          └──► Cancelled
/// Running ◄──► Suspended (awaiting retry)
/// ```
/// Any non-terminal status may additionally transition to `Cancelled`
/// on an explicit cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Saga has not started yet.
    #[default]
    NotStarted,

    /// Saga steps are being executed.
    Running,

    /// Saga is parked awaiting a scheduled retry.
    Suspended,

    /// A step failed and compensating transactions are in progress.
    Compensating,

    /// All steps completed successfully (terminal).
    Completed,

    /// A step failed; the saga may still be compensated.
    Failed,

    /// Every compensable step was undone after a failure (terminal).
    Compensated,

    /// At least one compensation failed (terminal).
    PartiallyCompensated,

    /// Total running time exceeded the configured timeout (terminal).
    TimedOut,

    /// The saga was cancelled by an explicit request (terminal).
    Cancelled,
}

impl SagaStatus {
    /// Returns true if forward execution can begin or continue.
    pub fn can_run(&self) -> bool {
        matches!(self, SagaStatus::NotStarted | SagaStatus::Running)
    }

    /// Returns true if the saga can be resumed from its current step.
    pub fn can_resume(&self) -> bool {
        matches!(self, SagaStatus::Running | SagaStatus::Suspended)
    }

    /// Returns true if compensation may begin. `Running` is included to
    /// support abandoning a saga mid-flight.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaStatus::Failed | SagaStatus::Running)
    }

    /// Returns true if the saga can be cancelled.
    pub fn can_cancel(&self) -> bool {
        matches!(self, SagaStatus::Running | SagaStatus::Suspended)
    }

    /// Returns true if no further lifecycle operations apply.
    ///
    /// `Failed` is not terminal: a failed saga remains eligible for
    /// compensation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed
                | SagaStatus::Compensated
                | SagaStatus::PartiallyCompensated
                | SagaStatus::TimedOut
                | SagaStatus::Cancelled
        )
    }

    /// Returns true if records in this status are eligible for cleanup.
    pub fn is_cleanable(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Compensated)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::NotStarted => "NotStarted",
            SagaStatus::Running => "Running",
            SagaStatus::Suspended => "Suspended",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
            SagaStatus::Compensated => "Compensated",
            SagaStatus::PartiallyCompensated => "PartiallyCompensated",
            SagaStatus::TimedOut => "TimedOut",
            SagaStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSagaStatusError(pub String);

impl std::fmt::Display for ParseSagaStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown saga status: {}", self.0)
    }
}

impl std::error::Error for ParseSagaStatusError {}

impl std::str::FromStr for SagaStatus {
    type Err = ParseSagaStatusError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "NotStarted" => Ok(SagaStatus::NotStarted),
            "Running" => Ok(SagaStatus::Running),
            "Suspended" => Ok(SagaStatus::Suspended),
            "Compensating" => Ok(SagaStatus::Compensating),
            "Completed" => Ok(SagaStatus::Completed),
            "Failed" => Ok(SagaStatus::Failed),
            "Compensated" => Ok(SagaStatus::Compensated),
            "PartiallyCompensated" => Ok(SagaStatus::PartiallyCompensated),
            "TimedOut" => Ok(SagaStatus::TimedOut),
            "Cancelled" => Ok(SagaStatus::Cancelled),
            other => Err(ParseSagaStatusError(other.to_string())),
        }
    }
}
