//! In-memory reference store.
//!
//! Mirrors the hosted relational backend: ride rows with OTP
//! and fare set at booking, a drivers table with live availability/location,
//! and a best-effort broadcast channel standing in for the realtime feed.
//! Used by the integration tests and the example binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;

use crate::model::{
    generate_otp, DriverCandidate, DriverId, RideId, RideRequest, RideStatus, VehicleClass,
};
use crate::spatial::GeoPoint;
use crate::store::{RideChange, RideStore, StoreError};

const CHANGE_FEED_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct Tables {
    rides: HashMap<RideId, RideRequest>,
    drivers: HashMap<DriverId, DriverCandidate>,
    /// Full history of target-driver writes per ride, for test assertions.
    target_writes: HashMap<RideId, Vec<Option<DriverId>>>,
    next_ride_id: u64,
    next_driver_id: u64,
}

/// Tokio-native store with the same row semantics as the hosted backend.
pub struct InMemoryRideStore {
    tables: Mutex<Tables>,
    rng: Mutex<StdRng>,
    changes: broadcast::Sender<RideChange>,
    /// When non-zero, the next N reads fail transiently. Test hook.
    inject_unavailable: AtomicU32,
}

impl InMemoryRideStore {
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Seeded constructor for reproducible OTPs in tests.
    pub fn with_seed(seed: u64) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            tables: Mutex::new(Tables::default()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            changes,
            inject_unavailable: AtomicU32::new(0),
        }
    }

    /// Book a ride: row starts pending, with OTP and fare fixed at creation.
    pub fn create_ride(
        &self,
        pickup: GeoPoint,
        drop: GeoPoint,
        vehicle_class: VehicleClass,
        price_estimate: f64,
    ) -> RideRequest {
        let otp = {
            let mut rng = self.rng.lock().expect("rng lock");
            generate_otp(&mut *rng)
        };
        let mut tables = self.tables.lock().expect("tables lock");
        tables.next_ride_id += 1;
        let ride = RideRequest {
            id: RideId(tables.next_ride_id),
            pickup,
            drop,
            vehicle_class,
            status: RideStatus::Pending,
            target_driver_id: None,
            assigned_driver_id: None,
            otp,
            price_estimate,
        };
        tables.rides.insert(ride.id, ride.clone());
        ride
    }

    /// Register a driver; starts available at the given position.
    pub fn register_driver(&self, location: GeoPoint, vehicle_class: VehicleClass) -> DriverId {
        let mut tables = self.tables.lock().expect("tables lock");
        tables.next_driver_id += 1;
        let id = DriverId(tables.next_driver_id);
        tables.drivers.insert(
            id,
            DriverCandidate {
                id,
                location,
                vehicle_class,
                is_available: true,
            },
        );
        id
    }

    pub fn set_driver_availability(&self, driver_id: DriverId, is_available: bool) {
        let mut tables = self.tables.lock().expect("tables lock");
        if let Some(driver) = tables.drivers.get_mut(&driver_id) {
            driver.is_available = is_available;
        }
    }

    pub fn set_driver_location(&self, driver_id: DriverId, location: GeoPoint) {
        let mut tables = self.tables.lock().expect("tables lock");
        if let Some(driver) = tables.drivers.get_mut(&driver_id) {
            driver.location = location;
        }
    }

    /// Driver accepts the ride they are currently targeted with.
    ///
    /// Sets `assigned_driver_id` once and flips status to accepted; fails if
    /// the ride already left pending (someone else won the race).
    pub fn accept_ride(&self, ride_id: RideId, driver_id: DriverId) -> Result<(), StoreError> {
        let change = {
            let mut tables = self.tables.lock().expect("tables lock");
            let ride = tables
                .rides
                .get_mut(&ride_id)
                .ok_or(StoreError::RideNotFound(ride_id))?;
            if !ride.status.is_pending() {
                return Err(StoreError::Conflict(ride_id));
            }
            ride.status = RideStatus::Accepted;
            ride.assigned_driver_id = Some(driver_id);
            if let Some(driver) = tables.drivers.get_mut(&driver_id) {
                driver.is_available = false;
            }
            RideChange {
                ride_id,
                status: RideStatus::Accepted,
            }
        };
        let _ = self.changes.send(change);
        Ok(())
    }

    /// Rider-side cancellation. Terminal rides stay terminal.
    pub fn cancel_ride(&self, ride_id: RideId) -> Result<(), StoreError> {
        let change = {
            let mut tables = self.tables.lock().expect("tables lock");
            let ride = tables
                .rides
                .get_mut(&ride_id)
                .ok_or(StoreError::RideNotFound(ride_id))?;
            if matches!(ride.status, RideStatus::Completed | RideStatus::Cancelled) {
                return Err(StoreError::Conflict(ride_id));
            }
            ride.status = RideStatus::Cancelled;
            RideChange {
                ride_id,
                status: RideStatus::Cancelled,
            }
        };
        let _ = self.changes.send(change);
        Ok(())
    }

    /// Snapshot of the full ride row, for assertions and display.
    pub fn get_ride(&self, ride_id: RideId) -> Option<RideRequest> {
        let tables = self.tables.lock().expect("tables lock");
        tables.rides.get(&ride_id).cloned()
    }

    /// Every target-driver write performed on the ride, in order.
    pub fn target_write_history(&self, ride_id: RideId) -> Vec<Option<DriverId>> {
        let tables = self.tables.lock().expect("tables lock");
        tables
            .target_writes
            .get(&ride_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next `n` store calls fail with [`StoreError::Unavailable`].
    pub fn inject_transient_failures(&self, n: u32) {
        self.inject_unavailable.store(n, Ordering::SeqCst);
    }

    fn check_injected_failure(&self) -> Result<(), StoreError> {
        let previous =
            self.inject_unavailable
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    if n > 0 {
                        Some(n - 1)
                    } else {
                        None
                    }
                });
        match previous {
            Ok(_) => Err(StoreError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

impl Default for InMemoryRideStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RideStore for InMemoryRideStore {
    async fn list_available_drivers(
        &self,
        vehicle_class: VehicleClass,
    ) -> Result<Vec<DriverCandidate>, StoreError> {
        self.check_injected_failure()?;
        let tables = self.tables.lock().expect("tables lock");
        Ok(tables
            .drivers
            .values()
            .filter(|d| d.is_available && d.vehicle_class == vehicle_class)
            .cloned()
            .collect())
    }

    async fn get_ride_status(&self, ride_id: RideId) -> Result<RideStatus, StoreError> {
        self.check_injected_failure()?;
        let tables = self.tables.lock().expect("tables lock");
        tables
            .rides
            .get(&ride_id)
            .map(|ride| ride.status)
            .ok_or(StoreError::RideNotFound(ride_id))
    }

    async fn set_target_driver(
        &self,
        ride_id: RideId,
        driver_id: Option<DriverId>,
    ) -> Result<(), StoreError> {
        self.check_injected_failure()?;
        let change = {
            let mut tables = self.tables.lock().expect("tables lock");
            let ride = tables
                .rides
                .get_mut(&ride_id)
                .ok_or(StoreError::RideNotFound(ride_id))?;
            if !ride.status.is_pending() {
                return Err(StoreError::Conflict(ride_id));
            }
            ride.target_driver_id = driver_id;
            let status = ride.status;
            tables
                .target_writes
                .entry(ride_id)
                .or_default()
                .push(driver_id);
            RideChange { ride_id, status }
        };
        let _ = self.changes.send(change);
        Ok(())
    }

    fn subscribe_changes(&self) -> Option<broadcast::Receiver<RideChange>> {
        Some(self.changes.subscribe())
    }
}
