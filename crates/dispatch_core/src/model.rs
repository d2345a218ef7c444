//! Ride and driver data model shared between the engine and the store.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::spatial::GeoPoint;

/// Opaque ride identifier, assigned by the store at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RideId(pub u64);

/// Opaque driver identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DriverId(pub u64);

impl std::fmt::Display for RideId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ride-{}", self.0)
    }
}

impl std::fmt::Display for DriverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "driver-{}", self.0)
    }
}

/// Requested vehicle class. A hard filter: no substitution across classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Bike,
    Auto,
    Car,
}

/// Ride lifecycle status. Monotonic except for external cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    /// True while the dispatch engine is allowed to mutate the request.
    pub fn is_pending(self) -> bool {
        matches!(self, RideStatus::Pending)
    }
}

/// A rider's request to travel from pickup to drop.
///
/// `target_driver_id` is mutated only by the dispatch engine and only while
/// the status is pending. `assigned_driver_id` is written once by the
/// driver-acceptance collaborator and never changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideRequest {
    pub id: RideId,
    pub pickup: GeoPoint,
    pub drop: GeoPoint,
    pub vehicle_class: VehicleClass,
    pub status: RideStatus,
    pub target_driver_id: Option<DriverId>,
    pub assigned_driver_id: Option<DriverId>,
    /// One-time pickup confirmation code, generated at creation.
    pub otp: String,
    /// Quoted fare at booking time.
    pub price_estimate: f64,
}

/// One available driver as reported by the store.
///
/// `location` is refreshed asynchronously and independently of dispatch;
/// `is_available` can flip to false at any time outside the engine's control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverCandidate {
    pub id: DriverId,
    pub location: GeoPoint,
    pub vehicle_class: VehicleClass,
    pub is_available: bool,
}

/// Generate a 4-digit one-time pickup code.
pub fn generate_otp<R: Rng>(rng: &mut R) -> String {
    rng.gen_range(1000..10000).to_string()
}
