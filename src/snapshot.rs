use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::TerritoryError;
use crate::scenario::RunSummary;
use crate::service::TerritoryService;
use crate::store::TileStore;
use crate::territory::{ActionRecord, Tile};

/// Final territory state after a scenario, as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerritorySnapshot {
    pub scenario: String,
    pub grid_level: u8,
    pub taken_at: DateTime<Utc>,
    pub tiles: Vec<Tile>,
    pub actions: Vec<ActionRecord>,
    pub runs: Vec<RunSummary>,
}

impl TerritorySnapshot {
    pub async fn capture<S: TileStore>(
        scenario: &str,
        service: &TerritoryService<S>,
        runs: Vec<RunSummary>,
        taken_at: DateTime<Utc>,
    ) -> Result<Self, SnapshotError> {
        let store = service.store();
        Ok(Self {
            scenario: scenario.to_string(),
            grid_level: service.grid().level(),
            taken_at,
            tiles: store.tiles().await?,
            actions: store.actions().await?,
            runs,
        })
    }
}

pub struct SnapshotWriter {
    output_dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn write(&self, snapshot: &TerritorySnapshot) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!("{}.json", snapshot.scenario));
        let json = serde_json::to_string_pretty(snapshot)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<TerritorySnapshot, SnapshotError> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not read territory state: {0}")]
    Territory(#[from] TerritoryError),
}
