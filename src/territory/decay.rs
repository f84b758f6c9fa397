use chrono::{DateTime, Utc};

use crate::config::DecayConfig;

use super::Tile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecayOutcome {
    pub tile: Tile,
    pub shield_before: i32,
    pub entered_dispute: bool,
}

/// Erodes the shield of an owned tile its holder has not defended for
/// `start_after_days`. Attacks do not reset the clock. Tiles with no defense
/// on record fall back to their last action. Returns `None` when the tile is
/// left alone.
pub fn apply_decay(
    tile: &Tile,
    config: &DecayConfig,
    dispute_threshold: i32,
    now: DateTime<Utc>,
) -> Option<DecayOutcome> {
    if tile.is_neutral() || tile.shield <= config.minimum {
        return None;
    }
    let idle_since = tile.last_defense_at.or(tile.last_action_at)?;
    if now.signed_duration_since(idle_since) < config.idle_after() {
        return None;
    }

    let mut next = tile.clone();
    next.shield = (tile.shield - config.per_day).max(config.minimum);
    Some(DecayOutcome {
        entered_dispute: next.in_dispute(dispute_threshold) && !tile.in_dispute(dispute_threshold),
        shield_before: tile.shield,
        tile: next,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridIndexer;
    use crate::territory::{ActorId, Owner};
    use chrono::Duration;

    fn idle_tile(shield: i32, idle_days: i64, now: DateTime<Utc>) -> Tile {
        let cell = GridIndexer::new(8).unwrap().cell_id(-25.43, -49.27).unwrap();
        let mut tile = Tile::neutral(cell);
        tile.owner = Owner::Solo(ActorId::from("alice"));
        tile.shield = shield;
        tile.last_action_at = Some(now - Duration::days(idle_days));
        tile
    }

    #[test]
    fn recent_tiles_do_not_decay() {
        let now = Utc::now();
        let tile = idle_tile(100, 3, now);
        assert!(apply_decay(&tile, &DecayConfig::default(), 70, now).is_none());
    }

    #[test]
    fn idle_tiles_lose_shield_down_to_minimum() {
        let now = Utc::now();
        let config = DecayConfig::default();
        let outcome = apply_decay(&idle_tile(75, 12, now), &config, 70, now).unwrap();
        assert_eq!(outcome.tile.shield, 65);
        assert!(outcome.entered_dispute);

        let outcome = apply_decay(&idle_tile(35, 12, now), &config, 70, now).unwrap();
        assert_eq!(outcome.tile.shield, 30);
        assert!(!outcome.entered_dispute);

        assert!(apply_decay(&idle_tile(30, 40, now), &config, 70, now).is_none());
    }

    #[test]
    fn recent_attacks_do_not_reset_the_defense_clock() {
        let now = Utc::now();
        let mut tile = idle_tile(90, 1, now);
        tile.last_defense_at = Some(now - Duration::days(12));
        let outcome = apply_decay(&tile, &DecayConfig::default(), 70, now).unwrap();
        assert_eq!(outcome.tile.shield, 80);

        tile.last_defense_at = Some(now - Duration::days(2));
        let mut stale_action = tile.clone();
        stale_action.last_action_at = Some(now - Duration::days(30));
        assert!(apply_decay(&stale_action, &DecayConfig::default(), 70, now).is_none());
    }

    #[test]
    fn neutral_tiles_never_decay() {
        let now = Utc::now();
        let mut tile = idle_tile(80, 30, now);
        tile.owner = Owner::None;
        assert!(apply_decay(&tile, &DecayConfig::default(), 70, now).is_none());
    }
}
