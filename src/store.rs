//! Persistence seam for tiles, the action log, and daily quota counters.
//!
//! Every tile carries a version. A commit names the version it resolved
//! against and is refused when the stored version has moved on, so a
//! resolution computed from stale state never lands.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::{QuotaScope, Result};
use crate::governor::{QuotaUsage, Reservation};
use crate::grid::CellId;
use crate::territory::{ActionRecord, ActorId, RunId, TeamId, TerritoryAction, Tile};

/// A tile as read, with the version a later commit must match.
/// Version 0 is a cell that has never been written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedTile {
    pub tile: Tile,
    pub version: u64,
}

#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub expected_version: u64,
    pub tile: Tile,
    pub action: TerritoryAction,
    pub reservation: Reservation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub record: ActionRecord,
    pub version: u64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommitError {
    #[error("tile {tile} is at version {current}, expected {expected}")]
    Conflict {
        tile: CellId,
        expected: u64,
        current: u64,
    },
    #[error("quota exhausted at commit: {0}")]
    Quota(QuotaScope),
    #[error("run {run} was already resolved on tile {tile}")]
    DuplicateRun { run: RunId, tile: CellId },
    #[error("backend failure: {0}")]
    Backend(String),
}

pub trait TileStore: Send + Sync {
    fn load(&self, id: CellId) -> impl Future<Output = Result<VersionedTile>> + Send;

    /// Atomically checks the version and the reservation, appends the action,
    /// bumps the quota counters, and writes the tile. A run resolves at most
    /// once per tile.
    fn commit(
        &self,
        request: CommitRequest,
    ) -> impl Future<Output = std::result::Result<Committed, CommitError>> + Send;

    /// Writes a tile without logging an action or touching quotas.
    fn update_tile(
        &self,
        expected_version: u64,
        tile: Tile,
    ) -> impl Future<Output = std::result::Result<u64, CommitError>> + Send;

    fn quota_usage(
        &self,
        actor: &ActorId,
        team: Option<&TeamId>,
        day: NaiveDate,
    ) -> impl Future<Output = Result<QuotaUsage>> + Send;

    fn actions_for_tile_since(
        &self,
        id: CellId,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<ActionRecord>>> + Send;

    /// Every tile that has been written at least once.
    fn tiles(&self) -> impl Future<Output = Result<Vec<Tile>>> + Send;

    fn actions(&self) -> impl Future<Output = Result<Vec<ActionRecord>>> + Send;
}

#[derive(Debug, Default)]
struct StoreState {
    tiles: HashMap<CellId, VersionedTile>,
    actions: Vec<ActionRecord>,
    resolved_runs: HashSet<(RunId, CellId)>,
    actor_counts: HashMap<(NaiveDate, ActorId), u32>,
    team_counts: HashMap<(NaiveDate, TeamId), u32>,
    /// Latest quota day seen. Counters for earlier days are dropped.
    quota_day: Option<NaiveDate>,
}

impl StoreState {
    fn version_of(&self, id: CellId) -> u64 {
        self.tiles.get(&id).map_or(0, |stored| stored.version)
    }

    fn check_version(&self, id: CellId, expected: u64) -> std::result::Result<(), CommitError> {
        let current = self.version_of(id);
        if current == expected {
            Ok(())
        } else {
            Err(CommitError::Conflict {
                tile: id,
                expected,
                current,
            })
        }
    }

    fn roll_quota_day(&mut self, day: NaiveDate) {
        if self.quota_day.is_some_and(|current| current >= day) {
            return;
        }
        self.quota_day = Some(day);
        self.actor_counts.retain(|(counted, _), _| *counted >= day);
        self.team_counts.retain(|(counted, _), _| *counted >= day);
    }

    fn write_tile(&mut self, tile: Tile) -> u64 {
        let version = self.version_of(tile.id) + 1;
        self.tiles.insert(tile.id, VersionedTile { tile, version });
        version
    }
}

/// Process-local store. All writes happen under one write lock with no
/// await points inside, which makes each commit atomic.
#[derive(Debug, Default)]
pub struct InMemoryTileStore {
    state: RwLock<StoreState>,
}

impl InMemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a tile directly, bypassing versions and the action log.
    pub async fn insert_tile(&self, tile: Tile) {
        let mut state = self.state.write().await;
        state.write_tile(tile);
    }
}

impl TileStore for InMemoryTileStore {
    async fn load(&self, id: CellId) -> Result<VersionedTile> {
        let state = self.state.read().await;
        Ok(state.tiles.get(&id).cloned().unwrap_or_else(|| VersionedTile {
            tile: Tile::neutral(id),
            version: 0,
        }))
    }

    async fn commit(&self, request: CommitRequest) -> std::result::Result<Committed, CommitError> {
        let CommitRequest {
            expected_version,
            tile,
            action,
            reservation,
        } = request;

        let mut state = self.state.write().await;
        let run_key = action.run_id.clone().map(|run| (run, tile.id));
        if let Some(key) = run_key.as_ref().filter(|key| state.resolved_runs.contains(*key)) {
            return Err(CommitError::DuplicateRun {
                run: key.0.clone(),
                tile: key.1,
            });
        }
        state.check_version(tile.id, expected_version)?;

        let actor_key = (reservation.day, reservation.actor_id.clone());
        let actor_used = state.actor_counts.get(&actor_key).copied().unwrap_or(0);
        if actor_used >= reservation.actor_limit {
            return Err(CommitError::Quota(QuotaScope::Actor));
        }
        let team_key = reservation
            .team_id
            .clone()
            .map(|team| (reservation.day, team));
        if let Some(key) = &team_key {
            let team_used = state.team_counts.get(key).copied().unwrap_or(0);
            if team_used >= reservation.team_limit {
                return Err(CommitError::Quota(QuotaScope::Team));
            }
        }

        state.roll_quota_day(reservation.day);
        if let Some(key) = run_key {
            state.resolved_runs.insert(key);
        }
        *state.actor_counts.entry(actor_key).or_default() += 1;
        if let Some(key) = team_key {
            *state.team_counts.entry(key).or_default() += 1;
        }
        let record = ActionRecord {
            id: state.actions.len() as u64 + 1,
            action,
        };
        state.actions.push(record.clone());
        let version = state.write_tile(tile);
        trace!(tile = %record.action.tile_id, version, action_id = record.id, "committed");

        Ok(Committed { record, version })
    }

    async fn update_tile(
        &self,
        expected_version: u64,
        tile: Tile,
    ) -> std::result::Result<u64, CommitError> {
        let mut state = self.state.write().await;
        state.check_version(tile.id, expected_version)?;
        Ok(state.write_tile(tile))
    }

    async fn quota_usage(
        &self,
        actor: &ActorId,
        team: Option<&TeamId>,
        day: NaiveDate,
    ) -> Result<QuotaUsage> {
        let state = self.state.read().await;
        let actor_actions = state
            .actor_counts
            .get(&(day, actor.clone()))
            .copied()
            .unwrap_or(0);
        let team_actions = team.map(|team| {
            state
                .team_counts
                .get(&(day, team.clone()))
                .copied()
                .unwrap_or(0)
        });
        Ok(QuotaUsage {
            actor_actions,
            team_actions,
        })
    }

    async fn actions_for_tile_since(
        &self,
        id: CellId,
        since: DateTime<Utc>,
    ) -> Result<Vec<ActionRecord>> {
        let state = self.state.read().await;
        Ok(state
            .actions
            .iter()
            .filter(|record| record.action.tile_id == id && record.action.created_at >= since)
            .cloned()
            .collect())
    }

    async fn tiles(&self) -> Result<Vec<Tile>> {
        let state = self.state.read().await;
        let mut tiles: Vec<Tile> = state
            .tiles
            .values()
            .map(|stored| stored.tile.clone())
            .collect();
        tiles.sort_by_key(|tile| tile.id);
        Ok(tiles)
    }

    async fn actions(&self) -> Result<Vec<ActionRecord>> {
        Ok(self.state.read().await.actions.clone())
    }
}
