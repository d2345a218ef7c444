//! Errors and terminal outcomes of a dispatch session.

use crate::model::{DriverId, RideId};
use crate::store::StoreError;

/// Why a dispatch call could not run or finish.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// A session for this ride is already active. Contract error on the
    /// caller's side, never merged into the running session.
    #[error("ride {0} is already being dispatched")]
    AlreadyDispatching(RideId),
    /// The store stayed unavailable past the transient-retry budget.
    #[error("store failure during dispatch: {0}")]
    Store(#[from] StoreError),
}

/// Terminal state of a completed dispatch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The ride left pending through acceptance. `driver` is the candidate
    /// targeted when the transition was observed; `None` when the ride was
    /// accepted through some other channel before any offer was written.
    Accepted { driver: Option<DriverId> },
    /// The ride was cancelled, either by the rider or via
    /// [`crate::DispatchEngine::cancel_dispatch`].
    Cancelled,
    /// No eligible driver accepted within the discovery and ring budgets.
    NoDriversAvailable,
}
