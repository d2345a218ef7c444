//! Book one ride against the in-memory store and dispatch it.
//!
//! A handful of bike drivers sit around the pickup point; the nearest one
//! accepts shortly after being targeted. Run with:
//! cargo run -p dispatch_core --example dispatch_run

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::spatial::GeoPoint;
use dispatch_core::store::InMemoryRideStore;
use dispatch_core::{DispatchConfig, DispatchEngine, VehicleClass};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dispatch_core=debug".into()),
        )
        .init();

    // Demo city: Jaisalmer.
    let pickup = GeoPoint::new(26.9157, 70.9083);
    let drop = GeoPoint::new(26.8927, 70.9250);

    let store = Arc::new(InMemoryRideStore::with_seed(123));
    store.register_driver(GeoPoint::new(26.9200, 70.9083), VehicleClass::Bike); // ~0.5 km
    store.register_driver(GeoPoint::new(26.9300, 70.9083), VehicleClass::Bike); // ~1.6 km
    store.register_driver(GeoPoint::new(26.9700, 70.9083), VehicleClass::Bike); // ~6 km, out of range
    store.register_driver(GeoPoint::new(26.9160, 70.9085), VehicleClass::Car); // wrong class

    let ride = store.create_ride(pickup, drop, VehicleClass::Bike, 36.0);
    println!("Booked {} (otp {}, fare {:.0})", ride.id, ride.otp, ride.price_estimate);

    let config = DispatchConfig {
        offer_window: Duration::from_secs(2),
        discovery_backoff: Duration::from_secs(2),
        ..DispatchConfig::default()
    };
    let engine = DispatchEngine::new(store.clone(), config);

    // The targeted driver accepts after one offer window elapses.
    let acceptor = {
        let store = store.clone();
        let ride_id = ride.id;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            let target = store
                .get_ride(ride_id)
                .and_then(|row| row.target_driver_id);
            if let Some(driver) = target {
                if store.accept_ride(ride_id, driver).is_ok() {
                    println!("{driver} accepted");
                }
            }
        })
    };

    let outcome = engine
        .dispatch(ride.id, pickup, VehicleClass::Bike)
        .await
        .expect("dispatch");
    let _ = acceptor.await;

    let row = store.get_ride(ride.id).expect("ride row");
    let snapshot = engine.telemetry().snapshot();
    println!("--- Dispatch result ---");
    println!("Outcome: {outcome:?}");
    println!("Ride status: {:?}", row.status);
    println!("Assigned driver: {:?}", row.assigned_driver_id);
    println!(
        "Offers made: {}  discovery retries: {}  sessions accepted: {}",
        snapshot.offers_made, snapshot.discovery_retries, snapshot.sessions_accepted
    );
}
