//! Store wrappers that fault specific calls, for exercising the
//! conflicting-write and change-feed degradation paths.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dispatch_core::store::InMemoryRideStore;
use dispatch_core::{
    DriverCandidate, DriverId, RideChange, RideId, RideStatus, RideStore, StoreError, VehicleClass,
};
use tokio::sync::broadcast;

enum WriteFault {
    /// The currently targeted driver accepts just before the write lands.
    AcceptBeforeWrite,
    /// The ride row is gone by the time the write lands.
    RowDeleted,
}

/// Delegates to an [`InMemoryRideStore`] but faults the `fault_at_write`-th
/// target-driver write (1-based).
pub struct WriteRaceStore {
    inner: Arc<InMemoryRideStore>,
    fault: WriteFault,
    fault_at_write: u32,
    writes_seen: AtomicU32,
}

impl WriteRaceStore {
    pub fn accept_before_write(inner: Arc<InMemoryRideStore>, fault_at_write: u32) -> Self {
        Self {
            inner,
            fault: WriteFault::AcceptBeforeWrite,
            fault_at_write,
            writes_seen: AtomicU32::new(0),
        }
    }

    pub fn row_deleted_at_write(inner: Arc<InMemoryRideStore>, fault_at_write: u32) -> Self {
        Self {
            inner,
            fault: WriteFault::RowDeleted,
            fault_at_write,
            writes_seen: AtomicU32::new(0),
        }
    }

    fn row_gone(&self) -> bool {
        matches!(self.fault, WriteFault::RowDeleted)
            && self.writes_seen.load(Ordering::SeqCst) >= self.fault_at_write
    }
}

#[async_trait]
impl RideStore for WriteRaceStore {
    async fn list_available_drivers(
        &self,
        vehicle_class: VehicleClass,
    ) -> Result<Vec<DriverCandidate>, StoreError> {
        self.inner.list_available_drivers(vehicle_class).await
    }

    async fn get_ride_status(&self, ride_id: RideId) -> Result<RideStatus, StoreError> {
        if self.row_gone() {
            return Err(StoreError::RideNotFound(ride_id));
        }
        self.inner.get_ride_status(ride_id).await
    }

    async fn set_target_driver(
        &self,
        ride_id: RideId,
        driver_id: Option<DriverId>,
    ) -> Result<(), StoreError> {
        let n = self.writes_seen.fetch_add(1, Ordering::SeqCst) + 1;
        match self.fault {
            WriteFault::AcceptBeforeWrite => {
                if n == self.fault_at_write {
                    let target = self
                        .inner
                        .get_ride(ride_id)
                        .and_then(|row| row.target_driver_id);
                    if let Some(driver) = target {
                        self.inner
                            .accept_ride(ride_id, driver)
                            .expect("accept targeted driver");
                    }
                }
                self.inner.set_target_driver(ride_id, driver_id).await
            }
            WriteFault::RowDeleted => {
                if n >= self.fault_at_write {
                    Err(StoreError::RideNotFound(ride_id))
                } else {
                    self.inner.set_target_driver(ride_id, driver_id).await
                }
            }
        }
    }

    fn subscribe_changes(&self) -> Option<broadcast::Receiver<RideChange>> {
        self.inner.subscribe_changes()
    }
}

/// Delegates reads and writes to an [`InMemoryRideStore`] but hands sessions
/// a feed the test controls: events are only what the test pushes, the
/// capacity is chosen per test, and the sender can be dropped mid-session.
pub struct ScriptedFeedStore {
    inner: Arc<InMemoryRideStore>,
    feed: Mutex<Option<broadcast::Sender<RideChange>>>,
}

impl ScriptedFeedStore {
    pub fn new(inner: Arc<InMemoryRideStore>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner,
            feed: Mutex::new(Some(sender)),
        }
    }

    /// Push a change event into the scripted feed.
    pub fn push(&self, change: RideChange) {
        if let Some(sender) = self.feed.lock().expect("feed lock").as_ref() {
            let _ = sender.send(change);
        }
    }

    /// Drop the feed sender; subscribed sessions observe a closed channel.
    pub fn close_feed(&self) {
        self.feed.lock().expect("feed lock").take();
    }
}

#[async_trait]
impl RideStore for ScriptedFeedStore {
    async fn list_available_drivers(
        &self,
        vehicle_class: VehicleClass,
    ) -> Result<Vec<DriverCandidate>, StoreError> {
        self.inner.list_available_drivers(vehicle_class).await
    }

    async fn get_ride_status(&self, ride_id: RideId) -> Result<RideStatus, StoreError> {
        self.inner.get_ride_status(ride_id).await
    }

    async fn set_target_driver(
        &self,
        ride_id: RideId,
        driver_id: Option<DriverId>,
    ) -> Result<(), StoreError> {
        self.inner.set_target_driver(ride_id, driver_id).await
    }

    fn subscribe_changes(&self) -> Option<broadcast::Receiver<RideChange>> {
        self.feed
            .lock()
            .expect("feed lock")
            .as_ref()
            .map(|sender| sender.subscribe())
    }
}
