//! Engine tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the dispatch engine.
///
/// Defaults are demo-scale (2.0 km search radius, 5 s waits); production
/// deployments are expected to override them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Geofence radius around the pickup point, in kilometers.
    pub search_radius_km: f64,
    /// How long a targeted driver has to accept before escalation.
    pub offer_window: Duration,
    /// Pause between candidate-discovery attempts when none are in range.
    pub discovery_backoff: Duration,
    /// Discovery attempts beyond the first before giving up.
    pub max_discovery_retries: u32,
    /// Full passes over the candidate ring before giving up.
    pub max_offer_rounds: u32,
    /// Retries per store call on transient failure.
    pub max_store_retries: u32,
    /// Pause between transient-failure retries.
    pub store_retry_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            search_radius_km: 2.0,
            offer_window: Duration::from_secs(5),
            discovery_backoff: Duration::from_secs(5),
            max_discovery_retries: 3,
            max_offer_rounds: 3,
            max_store_retries: 3,
            store_retry_backoff: Duration::from_millis(500),
        }
    }
}
