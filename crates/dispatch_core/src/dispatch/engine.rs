//! The dispatch engine: per-ride session registry and entry points.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::info;

use crate::dispatch::session::Session;
use crate::dispatch::{DispatchConfig, DispatchError, DispatchOutcome};
use crate::model::{RideId, VehicleClass};
use crate::spatial::GeoPoint;
use crate::store::RideStore;
use crate::telemetry::DispatchTelemetry;

/// Handle to one active session, kept in the registry for cancellation.
struct SessionHandle {
    cancel: watch::Sender<bool>,
}

/// Assigns pending rides to drivers, one session task per ride.
///
/// Sessions share nothing but the store and the registry below; the registry
/// enforces the at-most-one-session-per-ride invariant with a check-and-insert
/// under a single lock acquisition. The lock is never held across `.await`.
#[derive(Clone)]
pub struct DispatchEngine {
    store: Arc<dyn RideStore>,
    config: DispatchConfig,
    telemetry: Arc<DispatchTelemetry>,
    sessions: Arc<Mutex<HashMap<RideId, SessionHandle>>>,
}

/// Removes the registry entry when the session ends, including when the
/// dispatch future is dropped mid-flight.
struct RegistryGuard {
    sessions: Arc<Mutex<HashMap<RideId, SessionHandle>>>,
    ride_id: RideId,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        let mut sessions = match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.remove(&self.ride_id);
    }
}

impl DispatchEngine {
    pub fn new(store: Arc<dyn RideStore>, config: DispatchConfig) -> Self {
        Self {
            store,
            config,
            telemetry: Arc::new(DispatchTelemetry::default()),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &DispatchTelemetry {
        &self.telemetry
    }

    /// Number of rides currently under dispatch.
    pub fn active_sessions(&self) -> usize {
        match self.sessions.lock() {
            Ok(sessions) => sessions.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Run a dispatch session for one pending ride to completion.
    ///
    /// Rejects with [`DispatchError::AlreadyDispatching`] when a session for
    /// this ride is already active. The returned future resolves when the
    /// session reaches a terminal state; run many rides concurrently by
    /// spawning one task per call.
    pub async fn dispatch(
        &self,
        ride_id: RideId,
        pickup: GeoPoint,
        vehicle_class: VehicleClass,
    ) -> Result<DispatchOutcome, DispatchError> {
        let cancel_rx = {
            let mut sessions = self
                .sessions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match sessions.entry(ride_id) {
                Entry::Occupied(_) => return Err(DispatchError::AlreadyDispatching(ride_id)),
                Entry::Vacant(slot) => {
                    let (cancel_tx, cancel_rx) = watch::channel(false);
                    slot.insert(SessionHandle { cancel: cancel_tx });
                    cancel_rx
                }
            }
        };
        let _guard = RegistryGuard {
            sessions: Arc::clone(&self.sessions),
            ride_id,
        };

        DispatchTelemetry::incr(&self.telemetry.sessions_started);
        info!(ride = %ride_id, ?vehicle_class, "dispatch session started");

        let session = Session {
            store: Arc::clone(&self.store),
            config: self.config,
            telemetry: Arc::clone(&self.telemetry),
            ride_id,
            pickup,
            vehicle_class,
        };
        let result = session.run(cancel_rx).await;

        match &result {
            Ok(DispatchOutcome::Accepted { driver }) => {
                DispatchTelemetry::incr(&self.telemetry.sessions_accepted);
                info!(ride = %ride_id, ?driver, "dispatch session ended: accepted");
            }
            Ok(DispatchOutcome::Cancelled) => {
                DispatchTelemetry::incr(&self.telemetry.sessions_cancelled);
                info!(ride = %ride_id, "dispatch session ended: cancelled");
            }
            Ok(DispatchOutcome::NoDriversAvailable) => {
                DispatchTelemetry::incr(&self.telemetry.sessions_exhausted);
                info!(ride = %ride_id, "dispatch session ended: no drivers available");
            }
            Err(err) => {
                info!(ride = %ride_id, %err, "dispatch session failed");
            }
        }
        result
    }

    /// Signal the active session for this ride, if any, to exit promptly via
    /// the cancelled path. Returns whether a session was signalled.
    pub fn cancel_dispatch(&self, ride_id: RideId) -> bool {
        let sessions = match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        };
        match sessions.get(&ride_id) {
            Some(handle) => handle.cancel.send(true).is_ok(),
            None => false,
        }
    }
}
