use crate::sync::ledger::FileStatus;

/// Outcome of evaluating one file against its ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// No record yet, or an unchanged failure still inside the retry budget.
    TransferNew,
    /// Size or modification time differs from the record. Always attempted,
    /// regardless of how many retries the previous content burned.
    TransferDueToChange,
    /// Unchanged and the last attempt succeeded.
    SkipAlreadyProcessed,
    /// Unchanged, failing, and past the retry budget. Stays skipped until
    /// the file changes.
    SkipRetryExhausted,
}

impl SyncDecision {
    pub fn is_transfer(self) -> bool {
        matches!(self, Self::TransferNew | Self::TransferDueToChange)
    }
}

/// Pure decision function. Change detection wins over retry exhaustion:
/// a changed file resets the problem, so it is retried even when the
/// previous content exhausted its budget.
pub fn evaluate(status: &FileStatus, max_retries: i64) -> SyncDecision {
    if !status.exists {
        return SyncDecision::TransferNew;
    }
    if status.size_changed || status.mod_time_changed {
        return SyncDecision::TransferDueToChange;
    }
    if status.processed {
        return SyncDecision::SkipAlreadyProcessed;
    }
    if status.retry_count > max_retries {
        return SyncDecision::SkipRetryExhausted;
    }
    SyncDecision::TransferNew
}
