use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::info;

use crate::geo::{LatLng, Track, TrackPoint};
use crate::grid::{CellId, GridIndexer};
use crate::rng::{RngManager, StreamRng};
use crate::service::{RunOutcome, RunSubmission, TerritoryService};
use crate::store::TileStore;
use crate::territory::{ActionType, ActorId, Owner, RunId, TeamId};
use crate::validation::RejectReason;

const METERS_PER_DEGREE_LAT: f64 = 111_195.0;

fn default_laps() -> u32 {
    3
}

fn default_radius_meters() -> f64 {
    80.0
}

fn default_pace_seconds_per_km() -> f64 {
    360.0
}

fn default_sample_seconds() -> i64 {
    5
}

fn default_jitter_meters() -> f64 {
    2.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    pub seed: u64,
    pub start: DateTime<Utc>,
    pub actors: Vec<ScenarioActor>,
    pub runs: Vec<ScenarioRun>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioActor {
    pub id: ActorId,
    #[serde(default)]
    pub team: Option<TeamId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioRun {
    pub actor: ActorId,
    /// Any point inside the cell to run around; the loop is centred on the
    /// cell centre.
    pub anchor: LatLng,
    /// Runs sharing an offset are submitted concurrently.
    #[serde(default)]
    pub offset_minutes: i64,
    #[serde(flatten)]
    pub shape: LoopShape,
}

/// Geometry and pacing of a synthetic circular run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopShape {
    #[serde(default = "default_laps")]
    pub laps: u32,
    #[serde(default = "default_radius_meters")]
    pub radius_meters: f64,
    #[serde(default = "default_pace_seconds_per_km")]
    pub pace_seconds_per_km: f64,
    #[serde(default = "default_sample_seconds")]
    pub sample_seconds: i64,
    #[serde(default = "default_jitter_meters")]
    pub jitter_meters: f64,
}

impl Default for LoopShape {
    fn default() -> Self {
        Self {
            laps: default_laps(),
            radius_meters: default_radius_meters(),
            pace_seconds_per_km: default_pace_seconds_per_km(),
            sample_seconds: default_sample_seconds(),
            jitter_meters: default_jitter_meters(),
        }
    }
}

/// A submission ready to hand to the service, plus when to resolve it.
#[derive(Debug, Clone)]
pub struct ScheduledRun {
    pub index: usize,
    pub offset_minutes: i64,
    pub finished_at: DateTime<Utc>,
    pub submission: RunSubmission,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub actor_id: ActorId,
    pub tile_id: Option<CellId>,
    pub action: Option<ActionType>,
    pub owner_changed: bool,
    pub owner_after: Option<Owner>,
    pub shield_after: Option<i32>,
    pub rejected: Vec<RejectReason>,
    pub error: Option<String>,
}

impl RunSummary {
    fn from_outcome(submission: &RunSubmission, outcome: &crate::error::Result<RunOutcome>) -> Self {
        let run_id = submission.run_id.clone().unwrap_or_else(|| RunId::from("unnamed"));
        match outcome {
            Ok(outcome) => Self {
                run_id,
                actor_id: outcome.actor_id.clone(),
                tile_id: outcome.primary.as_ref().map(|primary| primary.cell_id),
                action: outcome
                    .action
                    .as_ref()
                    .map(|record| record.action.action_type),
                owner_changed: outcome.owner_changed(),
                owner_after: outcome.tile.as_ref().map(|tile| tile.owner.clone()),
                shield_after: outcome.tile.as_ref().map(|tile| tile.shield),
                rejected: outcome.reasons.clone(),
                error: None,
            },
            Err(err) => Self {
                run_id,
                actor_id: submission.actor_id.clone(),
                tile_id: None,
                action: None,
                owner_changed: false,
                owner_after: None,
                shield_after: None,
                rejected: Vec::new(),
                error: Some(err.to_string()),
            },
        }
    }
}

pub struct ScenarioLoader {
    base_dir: PathBuf,
}

impl ScenarioLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<Scenario> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        let scenario: Scenario = serde_yaml::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        scenario
            .validate()
            .with_context(|| format!("Invalid scenario {}", path.display()))?;
        Ok(scenario)
    }
}

impl Scenario {
    pub fn validate(&self) -> Result<()> {
        for (index, run) in self.runs.iter().enumerate() {
            if !self.actors.iter().any(|actor| actor.id == run.actor) {
                bail!("run {index} references undeclared actor '{}'", run.actor);
            }
            let shape = &run.shape;
            if shape.laps == 0 || shape.sample_seconds <= 0 || shape.pace_seconds_per_km <= 0.0 {
                bail!("run {index} needs at least one lap, a positive pace and sample interval");
            }
            if !(shape.radius_meters > 0.0 && shape.radius_meters <= 150.0) {
                bail!(
                    "run {index} radius {} m must lie within (0, 150]",
                    shape.radius_meters
                );
            }
            if !run.anchor.is_valid() {
                bail!("run {index} anchor is not a valid coordinate");
            }
        }
        Ok(())
    }

    pub fn team_of(&self, actor: &ActorId) -> Option<&TeamId> {
        self.actors
            .iter()
            .find(|candidate| &candidate.id == actor)
            .and_then(|candidate| candidate.team.as_ref())
    }

    /// Builds every run's track. Jitter is drawn from one stream per actor,
    /// in file order, so the same scenario always yields the same tracks.
    pub fn schedule(&self, grid: &GridIndexer) -> Result<Vec<ScheduledRun>> {
        let mut rng = RngManager::new(self.seed);
        let mut scheduled = Vec::with_capacity(self.runs.len());
        for (index, run) in self.runs.iter().enumerate() {
            let cell = grid.cell_for(run.anchor)?;
            let center = grid.cell_center(cell)?;
            let started_at = self.start + Duration::minutes(run.offset_minutes);
            let mut stream = rng.stream(run.actor.as_str());
            let track = loop_track(center, &run.shape, started_at, &mut stream);
            let finished_at = track
                .points
                .last()
                .map_or(started_at, |point| point.timestamp);
            scheduled.push(ScheduledRun {
                index,
                offset_minutes: run.offset_minutes,
                finished_at,
                submission: RunSubmission {
                    run_id: Some(RunId::from(format!("{}-{index:03}", self.name))),
                    actor_id: run.actor.clone(),
                    team_id: self.team_of(&run.actor).cloned(),
                    track,
                },
            });
        }
        Ok(scheduled)
    }
}

/// A circular run around `center`, ending where it started.
pub fn loop_track(
    center: LatLng,
    shape: &LoopShape,
    started_at: DateTime<Utc>,
    rng: &mut StreamRng<'_>,
) -> Track {
    let meters_per_degree_lng = METERS_PER_DEGREE_LAT * center.lat.to_radians().cos().max(1e-6);
    let distance = 2.0 * std::f64::consts::PI * shape.radius_meters * f64::from(shape.laps);
    let meters_per_sample = 1000.0 / shape.pace_seconds_per_km * shape.sample_seconds as f64;
    let samples = (distance / meters_per_sample).ceil().max(1.0) as usize;
    let sweep = 2.0 * std::f64::consts::PI * f64::from(shape.laps);

    let points = (0..=samples)
        .map(|i| {
            let angle = sweep * i as f64 / samples as f64;
            let north = shape.radius_meters * angle.sin() + rng.jitter(shape.jitter_meters);
            let east = shape.radius_meters * angle.cos() + rng.jitter(shape.jitter_meters);
            TrackPoint {
                position: LatLng::new(
                    center.lat + north / METERS_PER_DEGREE_LAT,
                    center.lng + east / meters_per_degree_lng,
                ),
                timestamp: started_at + Duration::seconds(i as i64 * shape.sample_seconds),
            }
        })
        .collect();
    Track::new(points)
}

/// Plays the scenario against `service`. Runs with the same offset race each
/// other as separate tasks; offsets are played in ascending order.
pub async fn run_scenario<S>(
    scenario: &Scenario,
    service: Arc<TerritoryService<S>>,
) -> Result<Vec<RunSummary>>
where
    S: TileStore + 'static,
{
    let mut waves: BTreeMap<i64, Vec<ScheduledRun>> = BTreeMap::new();
    for run in scenario.schedule(service.grid())? {
        waves.entry(run.offset_minutes).or_default().push(run);
    }

    let mut summaries = Vec::with_capacity(scenario.runs.len());
    for (offset, wave) in waves {
        let mut tasks = JoinSet::new();
        for run in wave {
            let service = Arc::clone(&service);
            tasks.spawn(async move {
                let outcome = service
                    .submit_run_at(&run.submission, run.finished_at)
                    .await;
                (run.index, RunSummary::from_outcome(&run.submission, &outcome))
            });
        }

        let mut finished = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            finished.push(joined.context("scenario run task failed")?);
        }
        finished.sort_by_key(|(index, _)| *index);
        info!(
            offset_minutes = offset,
            runs = finished.len(),
            "scenario wave finished"
        );
        summaries.extend(finished.into_iter().map(|(_, summary)| summary));
    }
    Ok(summaries)
}
