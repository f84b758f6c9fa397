use std::fmt;

use thiserror::Error;

use crate::grid::CellId;
use crate::territory::RunId;

pub type Result<T> = std::result::Result<T, TerritoryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    Actor,
    Team,
}

impl fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaScope::Actor => write!(f, "DAILY_LIMIT_ACTOR"),
            QuotaScope::Team => write!(f, "DAILY_LIMIT_TEAM"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TerritoryError {
    #[error("invalid coordinate ({lat}, {lng})")]
    InvalidCoordinate { lat: f64, lng: f64 },
    #[error("invalid cell id {0}")]
    InvalidCellId(String),
    #[error("tile {tile} has shield {shield} outside [0, 100]")]
    InvalidTileState { tile: CellId, shield: i32 },
    #[error("actor id must not be empty")]
    UnauthorizedActor,
    #[error("daily action quota exceeded: {0}")]
    QuotaExceeded(QuotaScope),
    #[error("tile {tile} kept changing underneath us after {attempts} attempts")]
    ConcurrentModification { tile: CellId, attempts: u32 },
    #[error("run {run} was already resolved on tile {tile}")]
    DuplicateRun { run: RunId, tile: CellId },
    #[error("track has no points")]
    EmptyTrack,
    #[error("store error: {0}")]
    Store(String),
}

impl TerritoryError {
    /// Failures a client may simply resubmit.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TerritoryError::ConcurrentModification { .. } | TerritoryError::Store(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("config validation error: {0}")]
    Validation(String),
}
