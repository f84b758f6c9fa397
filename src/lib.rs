pub mod cache;
pub mod config;
pub mod coverage;
pub mod error;
pub mod geo;
pub mod governor;
pub mod grid;
pub mod notify;
pub mod rng;
pub mod scenario;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod territory;
pub mod validation;

pub use config::GameConfig;
pub use error::{Result, TerritoryError};
pub use grid::{CellId, GridIndexer};
pub use service::{RunOutcome, RunSubmission, TerritoryService};
