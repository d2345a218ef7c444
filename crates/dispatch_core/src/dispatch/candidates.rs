//! Candidate geofencing and deterministic ranking.

use crate::model::{DriverCandidate, DriverId, VehicleClass};
use crate::spatial::{distance_km, GeoPoint};

/// One driver retained by the geofence, with its distance to pickup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedCandidate {
    pub id: DriverId,
    pub distance_km: f64,
}

/// Filter and order candidates for one discovery pass.
///
/// Retains available drivers of exactly the requested class within
/// `radius_km` of the pickup, ordered nearest first with ties broken by
/// ascending driver id so the offer order is deterministic.
pub fn rank_candidates(
    candidates: &[DriverCandidate],
    pickup: GeoPoint,
    vehicle_class: VehicleClass,
    radius_km: f64,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .iter()
        .filter(|d| d.is_available && d.vehicle_class == vehicle_class)
        .map(|d| RankedCandidate {
            id: d.id,
            distance_km: distance_km(d.location, pickup),
        })
        .filter(|c| c.distance_km <= radius_km)
        .collect();
    ranked.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
}
