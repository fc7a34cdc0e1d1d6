//! Operation tracking errors.

use fleet_domain::{JobId, OperationStatus};
use fleet_id::HistoryId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("operation history {0} not found")]
    NotFound(HistoryId),

    /// Job keys are minted fresh per run; a repeat means the caller reused one.
    #[error("an operation history for job {0} already exists")]
    DuplicateJobId(JobId),

    #[error("operation history {0} is not a group operation")]
    NotAGroup(HistoryId),

    #[error("operation history {id} is already {status}")]
    NotInProgress { id: HistoryId, status: OperationStatus },

    #[error("operation history {0} is still in progress")]
    InProgress(HistoryId),

    #[error("{0} is not a terminal status")]
    NotTerminal(OperationStatus),
}
