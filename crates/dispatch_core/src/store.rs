//! Boundary contract between the dispatch engine and the ride/driver store.
//!
//! The store is external and concurrently mutated by other actors (a driver
//! accepting, a rider cancelling). Every status read must be treated as
//! possibly stale the instant it returns.

pub mod memory;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::model::{DriverCandidate, DriverId, RideId, RideStatus, VehicleClass};

pub use memory::InMemoryRideStore;

/// Store-level failures, split by how the engine must react.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Transient read/write failure (network, timeout). Retried with backoff.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The ride row no longer exists.
    #[error("ride {0} not found")]
    RideNotFound(RideId),
    /// A write lost against a concurrent status change.
    #[error("conflicting write on ride {0}")]
    Conflict(RideId),
}

/// A ride row change pushed by the store's notification channel.
///
/// Delivery is best-effort: events may be lost, duplicated, or reordered.
/// Consumers must re-read the row before acting on one.
#[derive(Debug, Clone)]
pub struct RideChange {
    pub ride_id: RideId,
    pub status: RideStatus,
}

/// Read/write surface the dispatch engine needs from the store.
#[async_trait]
pub trait RideStore: Send + Sync {
    /// All drivers with `is_available == true` and exactly this vehicle class.
    async fn list_available_drivers(
        &self,
        vehicle_class: VehicleClass,
    ) -> Result<Vec<DriverCandidate>, StoreError>;

    /// Current status of the ride row.
    async fn get_ride_status(&self, ride_id: RideId) -> Result<RideStatus, StoreError>;

    /// Point the ride at a driver being offered it, or clear the field.
    ///
    /// Must fail with [`StoreError::Conflict`] if the ride is no longer
    /// pending, so a racing acceptance is never overwritten.
    async fn set_target_driver(
        &self,
        ride_id: RideId,
        driver_id: Option<DriverId>,
    ) -> Result<(), StoreError>;

    /// Optional push channel for ride row changes.
    ///
    /// `None` when the store has no realtime feed; the engine then relies on
    /// polling alone. When present, the feed only shortens waits. Correctness
    /// never depends on it.
    fn subscribe_changes(&self) -> Option<broadcast::Receiver<RideChange>> {
        None
    }
}
