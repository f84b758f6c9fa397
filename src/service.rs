//! Turns a finished run into a territory action.
//!
//! Flow: coverage picks the contested cell, the loop validator gates it, the
//! governor reserves a daily slot, the resolver computes the outcome and the
//! store commits it against the version it was computed from. A version
//! conflict re-reads the tile and resolves again, up to `commit_retries`
//! times.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cache::ViewportCache;
use crate::config::{DecayConfig, GameConfig};
use crate::coverage::{CoverageAnalyzer, PrimaryCell};
use crate::error::{Result, TerritoryError};
use crate::geo::{Bounds, Track};
use crate::governor::{
    self, ActionGovernor, CapsRemaining, Contribution, DailyStatus, QuotaUsage,
};
use crate::grid::{CellId, GridIndexer};
use crate::notify::{Notifier, TerritoryEvent};
use crate::store::{CommitError, CommitRequest, TileStore};
use crate::territory::{
    apply_decay, ActionRecord, ActorId, ConquestResolver, Owner, Resolution, RunId, TeamId, Tile,
};
use crate::validation::{LoopReport, LoopValidator, RejectReason};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSubmission {
    pub run_id: Option<RunId>,
    pub actor_id: ActorId,
    pub team_id: Option<TeamId>,
    pub track: Track,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeState {
    Unowned,
    Stable,
    Disputed,
}

impl DisputeState {
    pub fn of(tile: &Tile, threshold: i32) -> Self {
        if tile.is_neutral() {
            DisputeState::Unowned
        } else if tile.in_dispute(threshold) {
            DisputeState::Disputed
        } else {
            DisputeState::Stable
        }
    }
}

/// Everything the runner sees after submitting a run. `action` is `None`
/// when the run was rejected before touching the map.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Option<RunId>,
    pub actor_id: ActorId,
    pub primary: Option<PrimaryCell>,
    pub loop_report: LoopReport,
    pub action: Option<ActionRecord>,
    pub tile: Option<Tile>,
    pub previous_owner: Option<Owner>,
    pub dispute_state: Option<DisputeState>,
    pub caps: CapsRemaining,
    pub reasons: Vec<RejectReason>,
    pub attempts: u32,
}

impl RunOutcome {
    pub fn applied(&self) -> bool {
        self.action.is_some()
    }

    pub fn owner_changed(&self) -> bool {
        self.action
            .as_ref()
            .is_some_and(|record| record.action.owner_changed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecaySweep {
    pub examined: usize,
    pub decayed: usize,
    pub skipped: usize,
}

pub struct TerritoryService<S> {
    coverage: CoverageAnalyzer,
    resolver: ConquestResolver,
    governor: ActionGovernor,
    validator: LoopValidator,
    decay: DecayConfig,
    commit_retries: u32,
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    cache: Mutex<ViewportCache>,
}

impl<S: TileStore> TerritoryService<S> {
    pub fn new(config: &GameConfig, store: Arc<S>, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let grid = GridIndexer::from_config(&config.grid)?;
        info!(
            grid_level = grid.level(),
            edge_m = grid.edge_length_meters(),
            "territory grid ready"
        );
        Ok(Self {
            coverage: CoverageAnalyzer::new(grid),
            resolver: ConquestResolver::new(config.shield.clone(), config.ownership_policy),
            governor: ActionGovernor::new(&config.quota),
            validator: LoopValidator::new(config.validation.clone()),
            decay: config.decay.clone(),
            commit_retries: config.commit_retries.max(1),
            store,
            notifier,
            cache: Mutex::new(ViewportCache::new(&config.cache)),
        })
    }

    pub fn grid(&self) -> &GridIndexer {
        self.coverage.grid()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn governor(&self) -> &ActionGovernor {
        &self.governor
    }

    pub async fn submit_run(&self, submission: &RunSubmission) -> Result<RunOutcome> {
        self.submit_run_at(submission, Utc::now()).await
    }

    #[instrument(skip_all, fields(actor = %submission.actor_id, run = ?submission.run_id))]
    pub async fn submit_run_at(
        &self,
        submission: &RunSubmission,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome> {
        let actor = &submission.actor_id;
        let team = submission.team_id.as_ref();
        if actor.is_blank() {
            return Err(TerritoryError::UnauthorizedActor);
        }
        if submission.track.is_empty() {
            return Err(TerritoryError::EmptyTrack);
        }

        let positions = submission.track.positions();
        let primary = self.coverage.primary_cell(&positions)?;
        let contested = match &primary {
            Some(cell) => Some((cell.coverage, self.grid().cell_center(cell.cell_id)?)),
            None => None,
        };
        let report = self.validator.validate(&submission.track, contested);

        let Some(primary) = primary else {
            return self
                .rejected(submission, None, report, vec![RejectReason::NoPrimaryTile], now)
                .await;
        };
        if self.validator.enforced() && !report.valid {
            debug!(tile = %primary.cell_id, reasons = ?report.reasons, "run rejected");
            let reasons = report.reasons.clone();
            return self
                .rejected(submission, Some(primary), report, reasons, now)
                .await;
        }

        let reservation = self
            .governor
            .check_and_reserve(&*self.store, actor, team, now)
            .await?;
        let cell = primary.cell_id;

        for attempt in 1..=self.commit_retries {
            let snapshot = self.store.load(cell).await?;
            let resolution = self.resolver.apply_action(
                &snapshot.tile,
                actor,
                team,
                submission.run_id.as_ref(),
                now,
            )?;
            let request = CommitRequest {
                expected_version: snapshot.version,
                tile: resolution.tile.clone(),
                action: resolution.action.clone(),
                reservation: reservation.clone(),
            };

            match self.store.commit(request).await {
                Ok(committed) => {
                    self.invalidate_cache();
                    self.publish(&resolution);
                    info!(
                        tile = %cell,
                        action = %resolution.action.action_type,
                        shield_before = resolution.action.shield_before,
                        shield_after = resolution.action.shield_after,
                        owner = %resolution.tile.owner,
                        attempt,
                        "territory action committed"
                    );
                    let usage = match self.store.quota_usage(actor, team, reservation.day).await {
                        Ok(usage) => usage,
                        Err(err) => {
                            warn!(error = %err, "could not read quota usage after commit");
                            QuotaUsage::default()
                        }
                    };
                    return Ok(RunOutcome {
                        run_id: submission.run_id.clone(),
                        actor_id: actor.clone(),
                        primary: Some(primary),
                        loop_report: report,
                        action: Some(committed.record),
                        dispute_state: Some(DisputeState::of(
                            &resolution.tile,
                            self.resolver.shield_config().dispute_threshold,
                        )),
                        previous_owner: Some(resolution.previous_owner),
                        tile: Some(resolution.tile),
                        caps: self.governor.remaining(&usage),
                        reasons: Vec::new(),
                        attempts: attempt,
                    });
                }
                Err(CommitError::Conflict { current, .. }) => {
                    debug!(tile = %cell, attempt, current, "tile moved on, resolving again");
                }
                Err(CommitError::DuplicateRun { run, tile }) => {
                    debug!(tile = %tile, run = %run, "run already resolved");
                    return Err(TerritoryError::DuplicateRun { run, tile });
                }
                Err(CommitError::Quota(scope)) => return Err(TerritoryError::QuotaExceeded(scope)),
                Err(CommitError::Backend(message)) => return Err(TerritoryError::Store(message)),
            }
        }

        warn!(tile = %cell, attempts = self.commit_retries, "giving up on contended tile");
        Err(TerritoryError::ConcurrentModification {
            tile: cell,
            attempts: self.commit_retries,
        })
    }

    async fn rejected(
        &self,
        submission: &RunSubmission,
        primary: Option<PrimaryCell>,
        loop_report: LoopReport,
        reasons: Vec<RejectReason>,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome> {
        let usage = self
            .store
            .quota_usage(
                &submission.actor_id,
                submission.team_id.as_ref(),
                self.governor.day_of(now),
            )
            .await?;
        let tile = match &primary {
            Some(cell) => Some(self.store.load(cell.cell_id).await?.tile),
            None => None,
        };
        let threshold = self.resolver.shield_config().dispute_threshold;
        Ok(RunOutcome {
            run_id: submission.run_id.clone(),
            actor_id: submission.actor_id.clone(),
            primary,
            loop_report,
            action: None,
            dispute_state: tile.as_ref().map(|tile| DisputeState::of(tile, threshold)),
            previous_owner: None,
            tile,
            caps: self.governor.remaining(&usage),
            reasons,
            attempts: 0,
        })
    }

    fn publish(&self, resolution: &Resolution) {
        let tile_id = resolution.tile.id;
        if resolution.owner_changed() {
            self.notifier.notify(&TerritoryEvent::Takeover {
                tile_id,
                previous_owner: resolution.previous_owner.clone(),
                new_owner: resolution.tile.owner.clone(),
            });
        }
        if resolution.entered_dispute {
            self.notifier.notify(&TerritoryEvent::DisputeEntered {
                tile_id,
                owner: resolution.tile.owner.clone(),
                shield: resolution.tile.shield,
            });
        }
    }

    fn invalidate_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .invalidate();
    }

    /// Erodes every idle owned tile once. Meant to run once per day.
    #[instrument(skip(self))]
    pub async fn run_decay_at(&self, now: DateTime<Utc>) -> Result<DecaySweep> {
        let tiles = self.store.tiles().await?;
        let mut sweep = DecaySweep {
            examined: tiles.len(),
            ..DecaySweep::default()
        };
        for tile in tiles {
            match self.decay_tile(tile.id, now).await {
                Ok(true) => sweep.decayed += 1,
                Ok(false) => {}
                Err(err) if err.is_transient() => {
                    warn!(tile = %tile.id, error = %err, "skipping tile during decay");
                    sweep.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }
        if sweep.decayed > 0 {
            self.invalidate_cache();
        }
        info!(
            examined = sweep.examined,
            decayed = sweep.decayed,
            skipped = sweep.skipped,
            "decay sweep finished"
        );
        Ok(sweep)
    }

    async fn decay_tile(&self, id: CellId, now: DateTime<Utc>) -> Result<bool> {
        let threshold = self.resolver.shield_config().dispute_threshold;
        for _ in 0..self.commit_retries {
            let snapshot = self.store.load(id).await?;
            let Some(outcome) = apply_decay(&snapshot.tile, &self.decay, threshold, now) else {
                return Ok(false);
            };
            match self
                .store
                .update_tile(snapshot.version, outcome.tile.clone())
                .await
            {
                Ok(_) => {
                    debug!(
                        tile = %id,
                        from = outcome.shield_before,
                        to = outcome.tile.shield,
                        "shield decayed"
                    );
                    if outcome.entered_dispute {
                        self.notifier.notify(&TerritoryEvent::DisputeEntered {
                            tile_id: id,
                            owner: outcome.tile.owner.clone(),
                            shield: outcome.tile.shield,
                        });
                    }
                    return Ok(true);
                }
                Err(CommitError::Conflict { .. }) => continue,
                Err(CommitError::DuplicateRun { run, tile }) => {
                    return Err(TerritoryError::DuplicateRun { run, tile })
                }
                Err(CommitError::Quota(scope)) => return Err(TerritoryError::QuotaExceeded(scope)),
                Err(CommitError::Backend(message)) => return Err(TerritoryError::Store(message)),
            }
        }
        Err(TerritoryError::ConcurrentModification {
            tile: id,
            attempts: self.commit_retries,
        })
    }

    /// Current state of a cell; cells nobody has claimed come back neutral.
    pub async fn tile(&self, id: CellId) -> Result<Tile> {
        self.grid().cell_center(id)?;
        Ok(self.store.load(id).await?.tile)
    }

    pub async fn tile_at(&self, lat: f64, lng: f64) -> Result<Tile> {
        let id = self.grid().cell_id(lat, lng)?;
        Ok(self.store.load(id).await?.tile)
    }

    /// Claimed tiles whose centre lies inside `bounds`.
    pub async fn tiles_in_bounds(&self, bounds: &Bounds, now: DateTime<Utc>) -> Result<Vec<Tile>> {
        let (cached, generation) = {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            (cache.get(bounds, now), cache.generation())
        };
        if let Some(tiles) = cached {
            return Ok(tiles);
        }

        let mut visible = Vec::new();
        for tile in self.store.tiles().await? {
            if bounds.contains(self.grid().cell_center(tile.id)?) {
                visible.push(tile);
            }
        }
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(bounds, visible.clone(), now, generation);
        Ok(visible)
    }

    pub async fn daily_status(
        &self,
        actor: &ActorId,
        team: Option<&TeamId>,
        now: DateTime<Utc>,
    ) -> Result<DailyStatus> {
        let usage = self
            .store
            .quota_usage(actor, team, self.governor.day_of(now))
            .await?;
        Ok(self.governor.status(&usage))
    }

    pub async fn weekly_contributions(
        &self,
        tile: CellId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Contribution>> {
        let records = self
            .store
            .actions_for_tile_since(tile, now - Duration::days(7))
            .await?;
        Ok(governor::weekly_contributions(&records, now))
    }
}
