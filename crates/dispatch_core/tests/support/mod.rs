//! Shared scenario builder: a seeded in-memory store plus an engine, with
//! helpers to place drivers at known distances and to simulate acceptance.

#![allow(dead_code)]

pub mod fault;

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::spatial::GeoPoint;
use dispatch_core::store::InMemoryRideStore;
use dispatch_core::{DispatchConfig, DispatchEngine, DriverId, RideId, RideRequest, VehicleClass};
use tokio::task::JoinHandle;

/// Shared pickup point across tests (central Jaisalmer).
pub const PICKUP: GeoPoint = GeoPoint {
    lat: 26.9157,
    lng: 70.9083,
};

/// Approximate km-per-degree of latitude, for placing drivers by distance.
const KM_PER_DEGREE_LAT: f64 = 111.0;

/// Register an available driver roughly `km` north of the pickup point.
pub fn driver_at_km(store: &InMemoryRideStore, km: f64, vehicle_class: VehicleClass) -> DriverId {
    let location = GeoPoint::new(PICKUP.lat + km / KM_PER_DEGREE_LAT, PICKUP.lng);
    store.register_driver(location, vehicle_class)
}

/// Book a pending ride from the shared pickup point.
pub fn book(store: &InMemoryRideStore, vehicle_class: VehicleClass) -> RideRequest {
    let drop = GeoPoint::new(PICKUP.lat - 0.02, PICKUP.lng + 0.015);
    store.create_ride(PICKUP, drop, vehicle_class, 25.0)
}

#[derive(Debug, Clone, Copy)]
pub struct TestScenarioConfig {
    pub seed: u64,
    pub dispatch: DispatchConfig,
}

impl Default for TestScenarioConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            dispatch: DispatchConfig::default(),
        }
    }
}

pub struct TestScenario {
    pub store: Arc<InMemoryRideStore>,
    pub engine: DispatchEngine,
}

#[derive(Debug, Default)]
pub struct TestScenarioBuilder {
    config: TestScenarioConfig,
}

impl TestScenarioBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dispatch_config(mut self, f: impl FnOnce(&mut DispatchConfig)) -> Self {
        f(&mut self.config.dispatch);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn build(self) -> TestScenario {
        let store = Arc::new(InMemoryRideStore::with_seed(self.config.seed));
        let engine = DispatchEngine::new(store.clone(), self.config.dispatch);
        TestScenario { store, engine }
    }
}

impl TestScenario {
    /// Register an available driver roughly `km` north of the pickup point.
    pub fn driver_at_km(&self, km: f64, vehicle_class: VehicleClass) -> DriverId {
        driver_at_km(&self.store, km, vehicle_class)
    }

    /// Book a pending ride from the shared pickup point.
    pub fn book(&self, vehicle_class: VehicleClass) -> RideRequest {
        book(&self.store, vehicle_class)
    }

    /// After `delay`, accept the ride as whichever driver is targeted then.
    /// Resolves to the accepting driver, or `None` when no offer was out.
    pub fn accept_after(&self, ride_id: RideId, delay: Duration) -> JoinHandle<Option<DriverId>> {
        let store = self.store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let target = store.get_ride(ride_id).and_then(|row| row.target_driver_id);
            let driver = target?;
            store.accept_ride(ride_id, driver).ok()?;
            Some(driver)
        })
    }

    /// Poll until an offer is written, then accept as the targeted driver.
    /// Gives up after a bounded number of polls.
    pub fn accept_when_targeted(&self, ride_id: RideId) -> JoinHandle<Option<DriverId>> {
        let store = self.store.clone();
        tokio::spawn(async move {
            for _ in 0..240 {
                if let Some(driver) = store.get_ride(ride_id).and_then(|row| row.target_driver_id)
                {
                    store.accept_ride(ride_id, driver).ok()?;
                    return Some(driver);
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            None
        })
    }
}
