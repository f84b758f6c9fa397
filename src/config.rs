//! Game configuration loaded from YAML.

use std::fs;
use std::path::Path;

use chrono::{Duration, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geo::Bounds;
use crate::grid::MAX_LEVEL;

/// One year.
pub const MAX_COOLDOWN_HOURS: i64 = 24 * 365;
/// Ten years.
pub const MAX_DECAY_START_DAYS: i64 = 3650;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub shield: ShieldConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub ownership_policy: OwnershipPolicy,
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub decay: DecayConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_target_radius")]
    pub target_cell_radius_meters: f64,
    /// Overrides the level derived from the target radius.
    #[serde(default)]
    pub resolution: Option<u8>,
}

fn default_target_radius() -> f64 {
    250.0
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            target_cell_radius_meters: default_target_radius(),
            resolution: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShieldConfig {
    #[serde(default = "default_attack_damage")]
    pub attack_damage: i32,
    #[serde(default = "default_defense_bonus")]
    pub defense_bonus: i32,
    #[serde(default = "default_full_shield")]
    pub full_shield: i32,
    #[serde(default = "default_dispute_threshold")]
    pub dispute_threshold: i32,
    #[serde(default = "default_cooldown_hours")]
    pub ownership_cooldown_hours: i64,
}

fn default_attack_damage() -> i32 {
    35
}

fn default_defense_bonus() -> i32 {
    20
}

fn default_full_shield() -> i32 {
    100
}

fn default_dispute_threshold() -> i32 {
    70
}

fn default_cooldown_hours() -> i64 {
    18
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            attack_damage: default_attack_damage(),
            defense_bonus: default_defense_bonus(),
            full_shield: default_full_shield(),
            dispute_threshold: default_dispute_threshold(),
            ownership_cooldown_hours: default_cooldown_hours(),
        }
    }
}

impl ShieldConfig {
    pub fn ownership_cooldown(&self) -> Duration {
        Duration::try_hours(self.ownership_cooldown_hours).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_actor_limit")]
    pub daily_actor_action_limit: u32,
    #[serde(default = "default_team_limit")]
    pub daily_team_action_limit: u32,
    /// Offset of the local day used for quota windows.
    #[serde(default = "default_day_offset")]
    pub day_utc_offset_hours: i32,
}

fn default_actor_limit() -> u32 {
    3
}

fn default_team_limit() -> u32 {
    60
}

fn default_day_offset() -> i32 {
    -3
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_actor_action_limit: default_actor_limit(),
            daily_team_action_limit: default_team_limit(),
            day_utc_offset_hours: default_day_offset(),
        }
    }
}

impl QuotaConfig {
    pub fn day_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.day_utc_offset_hours * 3600)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipPolicy {
    /// Tiles go to the actor's team when they have one.
    #[default]
    TeamWhenPresent,
    /// Tiles always go to the individual actor.
    Solo,
}

fn default_commit_retries() -> u32 {
    3
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            shield: ShieldConfig::default(),
            quota: QuotaConfig::default(),
            ownership_policy: OwnershipPolicy::default(),
            commit_retries: default_commit_retries(),
            validation: ValidationConfig::default(),
            decay: DecayConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_true")]
    pub enforce_loop: bool,
    #[serde(default = "default_min_distance")]
    pub min_loop_distance_meters: f64,
    #[serde(default = "default_min_duration")]
    pub min_loop_duration_seconds: i64,
    #[serde(default = "default_max_closure")]
    pub max_closing_distance_meters: f64,
    #[serde(default = "default_min_coverage")]
    pub min_tile_coverage: f64,
    #[serde(default = "default_max_speed")]
    pub max_speed_kmh: f64,
    #[serde(default = "default_max_speed_duration")]
    pub max_speed_duration_seconds: i64,
    #[serde(default)]
    pub play_area: Option<Bounds>,
}

fn default_true() -> bool {
    true
}

fn default_min_distance() -> f64 {
    1200.0
}

fn default_min_duration() -> i64 {
    420
}

fn default_max_closure() -> f64 {
    40.0
}

fn default_min_coverage() -> f64 {
    0.6
}

fn default_max_speed() -> f64 {
    25.0
}

fn default_max_speed_duration() -> i64 {
    30
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enforce_loop: true,
            min_loop_distance_meters: default_min_distance(),
            min_loop_duration_seconds: default_min_duration(),
            max_closing_distance_meters: default_max_closure(),
            min_tile_coverage: default_min_coverage(),
            max_speed_kmh: default_max_speed(),
            max_speed_duration_seconds: default_max_speed_duration(),
            play_area: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    #[serde(default = "default_decay_start")]
    pub start_after_days: i64,
    #[serde(default = "default_decay_per_day")]
    pub per_day: i32,
    #[serde(default = "default_decay_minimum")]
    pub minimum: i32,
}

fn default_decay_start() -> i64 {
    10
}

fn default_decay_per_day() -> i32 {
    10
}

fn default_decay_minimum() -> i32 {
    30
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            start_after_days: default_decay_start(),
            per_day: default_decay_per_day(),
            minimum: default_decay_minimum(),
        }
    }
}

impl DecayConfig {
    /// How long an owned tile may go undefended before it starts eroding.
    pub fn idle_after(&self) -> Duration {
        Duration::try_days(self.start_after_days).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: i64,
}

fn default_cache_capacity() -> usize {
    64
}

fn default_cache_ttl() -> i64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::try_seconds(self.ttl_seconds).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl GameConfig {
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: GameConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let grid = &self.grid;
        if let Some(level) = grid.resolution {
            if level > MAX_LEVEL {
                return Err(ConfigError::Validation(format!(
                    "grid resolution {level} exceeds {MAX_LEVEL}"
                )));
            }
        } else if !(grid.target_cell_radius_meters.is_finite()
            && grid.target_cell_radius_meters > 0.0)
        {
            return Err(ConfigError::Validation(
                "target cell radius must be a positive number of metres".into(),
            ));
        }

        let shield = &self.shield;
        if shield.full_shield <= 0 || shield.full_shield > 100 {
            return Err(ConfigError::Validation(format!(
                "full shield {} must be within 1..=100",
                shield.full_shield
            )));
        }
        if shield.attack_damage <= 0 || shield.defense_bonus <= 0 {
            return Err(ConfigError::Validation(
                "attack damage and defense bonus must be positive".into(),
            ));
        }
        if shield.dispute_threshold < 0 || shield.dispute_threshold > shield.full_shield {
            return Err(ConfigError::Validation(format!(
                "dispute threshold {} outside 0..={}",
                shield.dispute_threshold, shield.full_shield
            )));
        }
        if !(0..=MAX_COOLDOWN_HOURS).contains(&shield.ownership_cooldown_hours) {
            return Err(ConfigError::Validation(format!(
                "ownership cooldown {}h outside 0..={MAX_COOLDOWN_HOURS}",
                shield.ownership_cooldown_hours
            )));
        }

        if self.quota.daily_team_action_limit < self.quota.daily_actor_action_limit {
            return Err(ConfigError::Validation(
                "team daily limit must be at least the actor daily limit".into(),
            ));
        }
        if self.quota.day_offset().is_none() {
            return Err(ConfigError::Validation(format!(
                "day offset {}h is not a valid UTC offset",
                self.quota.day_utc_offset_hours
            )));
        }

        if self.commit_retries == 0 {
            return Err(ConfigError::Validation(
                "commit retries must be at least one".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.validation.min_tile_coverage) {
            return Err(ConfigError::Validation(
                "minimum tile coverage must be a fraction".into(),
            ));
        }

        if !(0..=MAX_DECAY_START_DAYS).contains(&self.decay.start_after_days) {
            return Err(ConfigError::Validation(format!(
                "decay start {} days outside 0..={MAX_DECAY_START_DAYS}",
                self.decay.start_after_days
            )));
        }
        if self.decay.per_day < 0 {
            return Err(ConfigError::Validation(
                "decay per day cannot be negative".into(),
            ));
        }
        if self.decay.minimum < 0 || self.decay.minimum > shield.full_shield {
            return Err(ConfigError::Validation(
                "decay minimum must sit inside the shield range".into(),
            ));
        }

        if self.cache.capacity == 0 {
            return Err(ConfigError::Validation(
                "cache capacity must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
