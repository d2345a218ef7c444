//! Per-ride dispatch session: the DISCOVERING/OFFERING loop.
//!
//! One session runs as one tokio task and is the only writer of the ride's
//! `target_driver_id`. Every wait is interruptible by the engine's cancel
//! signal, and every decision to exit is taken from a fresh status read.
//! The store's change feed, when present, only wakes the session early to
//! re-poll; it is never trusted on its own.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::dispatch::candidates::{rank_candidates, RankedCandidate};
use crate::dispatch::{DispatchConfig, DispatchError, DispatchOutcome};
use crate::model::{DriverId, RideId, RideStatus, VehicleClass};
use crate::spatial::GeoPoint;
use crate::store::{RideChange, RideStore, StoreError};
use crate::telemetry::DispatchTelemetry;

pub(crate) struct Session {
    pub(crate) store: Arc<dyn RideStore>,
    pub(crate) config: DispatchConfig,
    pub(crate) telemetry: Arc<DispatchTelemetry>,
    pub(crate) ride_id: RideId,
    pub(crate) pickup: GeoPoint,
    pub(crate) vehicle_class: VehicleClass,
}

/// How an offer window ended.
enum WindowExit {
    Elapsed,
    Cancelled,
    Status(RideStatus),
}

/// Map a freshly read status to a terminal outcome, if it is one.
fn exit_for_status(status: RideStatus, offered: Option<DriverId>) -> Option<DispatchOutcome> {
    match status {
        RideStatus::Pending => None,
        RideStatus::Cancelled => Some(DispatchOutcome::Cancelled),
        RideStatus::Accepted | RideStatus::InProgress | RideStatus::Completed => {
            Some(DispatchOutcome::Accepted { driver: offered })
        }
    }
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

impl Session {
    pub(crate) async fn run(
        &self,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut changes = self.store.subscribe_changes();
        let mut offered: Option<DriverId> = None;
        let result = self
            .run_inner(&mut cancel, &mut changes, &mut offered)
            .await;

        // Exit hygiene: never leave the row pointing at a driver unless the
        // session ended in acceptance.
        let clear_needed = !matches!(result, Ok(DispatchOutcome::Accepted { .. }));
        if clear_needed && offered.is_some() {
            self.clear_target().await;
        }
        result
    }

    async fn run_inner(
        &self,
        cancel: &mut watch::Receiver<bool>,
        changes: &mut Option<broadcast::Receiver<RideChange>>,
        offered: &mut Option<DriverId>,
    ) -> Result<DispatchOutcome, DispatchError> {
        // DISCOVERING
        let mut discovery_attempts: u32 = 0;
        let candidates = loop {
            if is_cancelled(cancel) {
                return Ok(DispatchOutcome::Cancelled);
            }
            let Some(status) = self.status_with_retry(cancel).await? else {
                return Ok(DispatchOutcome::Cancelled);
            };
            if let Some(outcome) = exit_for_status(status, *offered) {
                return Ok(outcome);
            }
            let Some(drivers) = self.drivers_with_retry(cancel).await? else {
                return Ok(DispatchOutcome::Cancelled);
            };
            let ranked = rank_candidates(
                &drivers,
                self.pickup,
                self.vehicle_class,
                self.config.search_radius_km,
            );
            if !ranked.is_empty() {
                break ranked;
            }
            if discovery_attempts >= self.config.max_discovery_retries {
                warn!(ride = %self.ride_id, "no drivers in range after retry budget");
                return Ok(DispatchOutcome::NoDriversAvailable);
            }
            discovery_attempts += 1;
            DispatchTelemetry::incr(&self.telemetry.discovery_retries);
            debug!(
                ride = %self.ride_id,
                attempt = discovery_attempts,
                "no candidates in range, backing off"
            );
            if !self
                .cancellable_sleep(self.config.discovery_backoff, cancel)
                .await
            {
                return Ok(DispatchOutcome::Cancelled);
            }
        };

        debug!(
            ride = %self.ride_id,
            candidates = candidates.len(),
            "offer ring assembled"
        );

        // OFFERING: ring traversal, one offer outstanding at a time.
        let mut cursor = 0usize;
        let mut rounds = 0u32;
        loop {
            if is_cancelled(cancel) {
                return Ok(DispatchOutcome::Cancelled);
            }
            let candidate = candidates[cursor];
            if let Some(outcome) = self.offer(candidate, offered, cancel).await? {
                return Ok(outcome);
            }
            match self.offer_window_wait(cancel, changes).await? {
                WindowExit::Cancelled => return Ok(DispatchOutcome::Cancelled),
                WindowExit::Status(status) => {
                    return Ok(exit_for_status(status, *offered)
                        .unwrap_or(DispatchOutcome::Cancelled));
                }
                WindowExit::Elapsed => {}
            }
            // Polling re-check at the window boundary; the feed is only an
            // acceleration path and may have dropped the relevant event.
            let Some(status) = self.status_with_retry(cancel).await? else {
                return Ok(DispatchOutcome::Cancelled);
            };
            if let Some(outcome) = exit_for_status(status, *offered) {
                return Ok(outcome);
            }
            cursor += 1;
            if cursor == candidates.len() {
                cursor = 0;
                rounds += 1;
                if rounds >= self.config.max_offer_rounds {
                    warn!(ride = %self.ride_id, rounds, "offer ring exhausted");
                    return Ok(DispatchOutcome::NoDriversAvailable);
                }
            }
        }
    }

    /// Write the target-driver field for one offer, retrying transient
    /// failures. Returns a terminal outcome when the row changed underneath.
    async fn offer(
        &self,
        candidate: RankedCandidate,
        offered: &mut Option<DriverId>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Option<DispatchOutcome>, DispatchError> {
        let mut attempts: u32 = 0;
        loop {
            match self
                .store
                .set_target_driver(self.ride_id, Some(candidate.id))
                .await
            {
                Ok(()) => {
                    *offered = Some(candidate.id);
                    DispatchTelemetry::incr(&self.telemetry.offers_made);
                    debug!(
                        ride = %self.ride_id,
                        driver = %candidate.id,
                        distance_km = candidate.distance_km,
                        "offer written"
                    );
                    return Ok(None);
                }
                Err(err @ StoreError::Unavailable(_)) => {
                    attempts += 1;
                    if attempts > self.config.max_store_retries {
                        return Err(err.into());
                    }
                    DispatchTelemetry::incr(&self.telemetry.store_retries);
                    warn!(ride = %self.ride_id, %err, attempt = attempts, "offer write failed, retrying");
                    if !self
                        .cancellable_sleep(self.config.store_retry_backoff, cancel)
                        .await
                    {
                        return Ok(Some(DispatchOutcome::Cancelled));
                    }
                }
                Err(StoreError::Conflict(_)) | Err(StoreError::RideNotFound(_)) => {
                    // The ride left pending (or vanished) between our status
                    // check and the write. Re-read and exit accordingly.
                    let Some(status) = self.status_with_retry(cancel).await? else {
                        return Ok(Some(DispatchOutcome::Cancelled));
                    };
                    return Ok(Some(
                        exit_for_status(status, *offered).unwrap_or(DispatchOutcome::Cancelled),
                    ));
                }
            }
        }
    }

    /// Wait out one offer window. Wakes early on cancellation or on a change
    /// feed event for this ride; feed events trigger a fresh status read and
    /// the wait resumes until the deadline when the ride is still pending.
    async fn offer_window_wait(
        &self,
        cancel: &mut watch::Receiver<bool>,
        changes: &mut Option<broadcast::Receiver<RideChange>>,
    ) -> Result<WindowExit, DispatchError> {
        enum Wake {
            Elapsed,
            Cancel,
            Feed(Result<RideChange, broadcast::error::RecvError>),
        }

        let deadline = Instant::now() + self.config.offer_window;
        loop {
            if is_cancelled(cancel) {
                return Ok(WindowExit::Cancelled);
            }
            let wake = if let Some(feed) = changes.as_mut() {
                tokio::select! {
                    _ = time::sleep_until(deadline) => Wake::Elapsed,
                    _ = cancel.changed() => Wake::Cancel,
                    event = feed.recv() => Wake::Feed(event),
                }
            } else {
                tokio::select! {
                    _ = time::sleep_until(deadline) => Wake::Elapsed,
                    _ = cancel.changed() => Wake::Cancel,
                }
            };
            match wake {
                Wake::Elapsed => return Ok(WindowExit::Elapsed),
                // The watch channel only ever signals cancellation; a closed
                // channel means the engine is gone and the session must stop
                // mutating the store either way.
                Wake::Cancel => return Ok(WindowExit::Cancelled),
                Wake::Feed(Ok(change)) if change.ride_id == self.ride_id => {
                    let Some(status) = self.status_with_retry(cancel).await? else {
                        return Ok(WindowExit::Cancelled);
                    };
                    if !status.is_pending() {
                        return Ok(WindowExit::Status(status));
                    }
                }
                Wake::Feed(Ok(_)) => {}
                Wake::Feed(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    // The feed dropped events, possibly ours; re-poll now.
                    debug!(ride = %self.ride_id, skipped, "change feed lagged");
                    let Some(status) = self.status_with_retry(cancel).await? else {
                        return Ok(WindowExit::Cancelled);
                    };
                    if !status.is_pending() {
                        return Ok(WindowExit::Status(status));
                    }
                }
                Wake::Feed(Err(broadcast::error::RecvError::Closed)) => {
                    // Feed gone; degrade to pure polling for the rest of the
                    // session.
                    *changes = None;
                }
            }
        }
    }

    /// Read the ride status, retrying transient failures.
    ///
    /// Returns `Ok(None)` when cancelled mid-retry. A missing row is reported
    /// as `Cancelled`: the ride was deleted underneath us and must not be
    /// touched again.
    async fn status_with_retry(
        &self,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Option<RideStatus>, DispatchError> {
        let mut attempts: u32 = 0;
        loop {
            match self.store.get_ride_status(self.ride_id).await {
                Ok(status) => return Ok(Some(status)),
                Err(StoreError::RideNotFound(_)) => return Ok(Some(RideStatus::Cancelled)),
                Err(err) => {
                    attempts += 1;
                    if attempts > self.config.max_store_retries {
                        return Err(err.into());
                    }
                    DispatchTelemetry::incr(&self.telemetry.store_retries);
                    warn!(ride = %self.ride_id, %err, attempt = attempts, "status read failed, retrying");
                    if !self
                        .cancellable_sleep(self.config.store_retry_backoff, cancel)
                        .await
                    {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// List available drivers, retrying transient failures.
    /// Returns `Ok(None)` when cancelled mid-retry.
    async fn drivers_with_retry(
        &self,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Option<Vec<crate::model::DriverCandidate>>, DispatchError> {
        let mut attempts: u32 = 0;
        loop {
            match self.store.list_available_drivers(self.vehicle_class).await {
                Ok(drivers) => return Ok(Some(drivers)),
                Err(err) => {
                    attempts += 1;
                    if attempts > self.config.max_store_retries {
                        return Err(err.into());
                    }
                    DispatchTelemetry::incr(&self.telemetry.store_retries);
                    warn!(ride = %self.ride_id, %err, attempt = attempts, "driver discovery failed, retrying");
                    if !self
                        .cancellable_sleep(self.config.store_retry_backoff, cancel)
                        .await
                    {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Best-effort clear of the target-driver field on a non-accepted exit.
    ///
    /// `Conflict`/`RideNotFound` mean the row left pending while we were
    /// exiting; the engine must not mutate it, so those are not errors here.
    /// A cancelled row may keep a stale target as a result: once the ride
    /// leaves pending, the field belongs to whoever moved it there (the
    /// cancellation or acceptance path), not to the session.
    async fn clear_target(&self) {
        if let Err(err) = self.store.set_target_driver(self.ride_id, None).await {
            debug!(ride = %self.ride_id, %err, "target clear skipped");
        }
    }

    /// Sleep that wakes on cancellation. Returns false when cancelled.
    async fn cancellable_sleep(
        &self,
        duration: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> bool {
        if is_cancelled(cancel) {
            return false;
        }
        tokio::select! {
            _ = time::sleep(duration) => true,
            // Any signal on the channel is a cancel; a closed channel means
            // the engine is gone and the session stops as well.
            _ = cancel.changed() => false,
        }
    }
}
