pub mod dispatch;
pub mod model;
pub mod spatial;
pub mod store;
pub mod telemetry;

pub use dispatch::{DispatchConfig, DispatchEngine, DispatchError, DispatchOutcome};
pub use model::{DriverCandidate, DriverId, RideId, RideRequest, RideStatus, VehicleClass};
pub use store::{RideChange, RideStore, StoreError};
