use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Terminal status of one task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TaskStatus {
    Success,
    PartialSuccess,
    Failed,
    Cancelled,
    NoData,
    UpToDate,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Success => "success",
            TaskStatus::PartialSuccess => "partial_success",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::NoData => "no_data",
            TaskStatus::UpToDate => "up_to_date",
        }
    }

    /// Whether the task persisted everything it set out to.
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::NoData | TaskStatus::UpToDate
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage at which a batch gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BatchFailure {
    Fetch,
    Transform,
    Persist,
    Internal,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BatchFailure::Fetch => "fetch",
            BatchFailure::Transform => "transform",
            BatchFailure::Persist => "persist",
            BatchFailure::Internal => "internal",
        })
    }
}

/// Result of one batch's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BatchOutcome {
    /// Rows persisted; zero when the batch had nothing to write.
    Completed { rows: u64 },
    Failed(BatchFailure),
    Cancelled,
}

impl BatchOutcome {
    pub fn rows(&self) -> u64 {
        match self {
            BatchOutcome::Completed { rows } => *rows,
            _ => 0,
        }
    }
}

/// Terminal value returned to the caller of a task run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TaskResult {
    pub status: TaskStatus,
    pub rows_affected: u64,
    pub failed_batches: usize,
    pub message: String,
}

impl TaskResult {
    pub fn new(
        status: TaskStatus,
        rows_affected: u64,
        failed_batches: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            rows_affected,
            failed_batches,
            message: message.into(),
        }
    }

    pub fn up_to_date(message: impl Into<String>) -> Self {
        Self::new(TaskStatus::UpToDate, 0, 0, message)
    }

    pub fn no_data(message: impl Into<String>) -> Self {
        Self::new(TaskStatus::NoData, 0, 0, message)
    }

    /// Folds per-batch outcomes into one result.
    ///
    /// Cancellation outranks failure; failures with some rows persisted are a
    /// partial success; failures with nothing persisted are a failure; a clean
    /// run that wrote nothing reports `NoData`.
    pub fn from_outcomes(outcomes: &[BatchOutcome]) -> Self {
        if outcomes.is_empty() {
            return Self::no_data("no batches to run");
        }

        let total = outcomes.len();
        let rows: u64 = outcomes.iter().map(BatchOutcome::rows).sum();
        let failed = outcomes
            .iter()
            .filter(|o| matches!(o, BatchOutcome::Failed(_)))
            .count();
        let cancelled = outcomes
            .iter()
            .filter(|o| matches!(o, BatchOutcome::Cancelled))
            .count();

        let status = if cancelled > 0 {
            TaskStatus::Cancelled
        } else if failed > 0 && rows > 0 {
            TaskStatus::PartialSuccess
        } else if failed > 0 {
            TaskStatus::Failed
        } else if rows > 0 {
            TaskStatus::Success
        } else {
            TaskStatus::NoData
        };

        let mut message = format!("{rows} rows persisted across {total} batches");
        if failed > 0 {
            message.push_str(&format!("; {failed} of {total} batches failed"));
        }
        if cancelled > 0 {
            message.push_str(&format!(
                "; {cancelled} of {total} batches cancelled"
            ));
        }

        Self::new(status, rows, failed + cancelled, message)
    }
}
