//! Operation history tracking.
//!
//! - `history`: one entry and its atomically published state
//! - `tracker`: the table of entries, group correlation and timeouts
//! - `service`: dispatch to agents, report handling and the timeout sweeper

mod error;
mod history;
mod service;
mod tracker;

pub use error::TrackerError;
pub use history::{HistoryScope, HistorySnapshot, HistoryState, OperationHistory, ResourceTarget};
pub use service::{GroupExecution, GroupTarget, OperationConfig, OperationService};
pub use tracker::{group_outcome, NewOperation, OperationTracker, TimeoutSweep, TIMEOUT_PARAMETER};
