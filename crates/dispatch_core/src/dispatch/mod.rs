pub mod candidates;
pub mod config;
pub mod engine;
pub mod error;
mod session;

pub use candidates::{rank_candidates, RankedCandidate};
pub use config::DispatchConfig;
pub use engine::DispatchEngine;
pub use error::{DispatchError, DispatchOutcome};
