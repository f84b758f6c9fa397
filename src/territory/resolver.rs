use chrono::{DateTime, Utc};

use crate::config::{OwnershipPolicy, ShieldConfig};
use crate::error::{Result, TerritoryError};

use super::{ActionType, ActorId, Owner, RunId, TeamId, TerritoryAction, Tile};

/// Output of a single resolution. Nothing is persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub tile: Tile,
    pub action: TerritoryAction,
    pub previous_owner: Owner,
    pub in_dispute: bool,
    /// The shield crossed below the dispute threshold from a stable state.
    pub entered_dispute: bool,
}

impl Resolution {
    pub fn owner_changed(&self) -> bool {
        self.action.owner_changed
    }
}

#[derive(Debug, Clone)]
pub struct ConquestResolver {
    shield: ShieldConfig,
    policy: OwnershipPolicy,
}

impl ConquestResolver {
    pub fn new(shield: ShieldConfig, policy: OwnershipPolicy) -> Self {
        Self { shield, policy }
    }

    pub fn shield_config(&self) -> &ShieldConfig {
        &self.shield
    }

    pub fn action_type_for(&self, tile: &Tile, actor: &ActorId, team: Option<&TeamId>) -> ActionType {
        if tile.is_neutral() {
            ActionType::Conquest
        } else if tile.is_held_by(actor, team) {
            ActionType::Defense
        } else {
            ActionType::Attack
        }
    }

    pub fn apply_action(
        &self,
        tile: &Tile,
        actor: &ActorId,
        team: Option<&TeamId>,
        run: Option<&RunId>,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        if actor.is_blank() {
            return Err(TerritoryError::UnauthorizedActor);
        }
        let full = self.shield.full_shield;
        if !(0..=full).contains(&tile.shield) {
            return Err(TerritoryError::InvalidTileState {
                tile: tile.id,
                shield: tile.shield,
            });
        }

        let threshold = self.shield.dispute_threshold;
        let shield_before = tile.shield;
        let was_in_dispute = tile.in_dispute(threshold);
        let action_type = self.action_type_for(tile, actor, team);
        let mut next = tile.clone();
        let mut owner_changed = false;

        match action_type {
            ActionType::Conquest => {
                next.owner = self.claimant(actor, team);
                next.shield = full;
                next.cooldown_until = None;
                next.last_defense_at = Some(now);
                owner_changed = true;
            }
            ActionType::Defense => {
                next.shield = (shield_before + self.shield.defense_bonus).min(full);
                next.last_defense_at = Some(now);
            }
            ActionType::Attack => {
                let tentative = shield_before - self.shield.attack_damage;
                if tentative > 0 {
                    next.shield = tentative;
                } else if tile.in_cooldown(now) {
                    // ownership is locked until the cooldown expires
                    next.shield = 1;
                } else {
                    next.owner = self.claimant(actor, team);
                    next.shield = (shield_before + self.shield.attack_damage).min(full);
                    next.cooldown_until = Some(
                        now
                            .checked_add_signed(self.shield.ownership_cooldown())
                            .unwrap_or(DateTime::<Utc>::MAX_UTC),
                    );
                    // a new holder starts with a fresh decay clock
                    next.last_defense_at = Some(now);
                    owner_changed = true;
                }
            }
        }

        next.shield = next.shield.clamp(0, full);
        next.guardian_contribution = match &tile.guardian_id {
            Some(guardian) if guardian == actor && !owner_changed => {
                tile.guardian_contribution.saturating_add(1)
            }
            _ => 1,
        };
        next.guardian_id = Some(actor.clone());
        next.last_action_at = Some(now);

        let in_dispute = next.in_dispute(threshold);
        let action = TerritoryAction {
            run_id: run.cloned(),
            actor_id: actor.clone(),
            team_id: team.cloned(),
            tile_id: tile.id,
            action_type,
            shield_before,
            shield_after: next.shield,
            shield_change: next.shield - shield_before,
            owner_changed,
            created_at: now,
        };

        Ok(Resolution {
            previous_owner: tile.owner.clone(),
            entered_dispute: in_dispute && !was_in_dispute && !owner_changed,
            in_dispute,
            tile: next,
            action,
        })
    }

    fn claimant(&self, actor: &ActorId, team: Option<&TeamId>) -> Owner {
        match (self.policy, team) {
            (OwnershipPolicy::TeamWhenPresent, Some(team)) => Owner::Team(team.clone()),
            _ => Owner::Solo(actor.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CellId, GridIndexer};
    use crate::territory::OwnerType;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn cell() -> CellId {
        GridIndexer::new(8).unwrap().cell_id(-25.43, -49.27).unwrap()
    }

    fn resolver() -> ConquestResolver {
        ConquestResolver::new(ShieldConfig::default(), OwnershipPolicy::TeamWhenPresent)
    }

    fn owned_by(owner: Owner, shield: i32) -> Tile {
        let mut tile = Tile::neutral(cell());
        tile.owner = owner;
        tile.shield = shield;
        tile
    }

    fn alice() -> ActorId {
        ActorId::from("alice")
    }

    fn bob() -> ActorId {
        ActorId::from("bob")
    }

    #[test]
    fn conquering_neutral_tile_grants_full_shield() {
        let tile = Tile::neutral(cell());
        let res = resolver()
            .apply_action(&tile, &alice(), None, None, now())
            .unwrap();
        assert_eq!(res.action.action_type, ActionType::Conquest);
        assert_eq!(res.tile.owner, Owner::Solo(alice()));
        assert_eq!(res.tile.shield, 100);
        assert_eq!(res.action.shield_before, 0);
        assert_eq!(res.action.shield_change, 100);
        assert!(res.action.owner_changed);
        assert_eq!(res.tile.cooldown_until, None);
        assert_eq!(res.tile.last_defense_at, Some(now()));
        assert!(!res.in_dispute);
    }

    #[test]
    fn conquest_goes_to_team_under_default_policy() {
        let red = TeamId::from("red");
        let res = resolver()
            .apply_action(&Tile::neutral(cell()), &alice(), Some(&red), None, now())
            .unwrap();
        assert_eq!(res.tile.owner, Owner::Team(red.clone()));
        assert_eq!(res.action.team_id, Some(red.clone()));

        let solo = ConquestResolver::new(ShieldConfig::default(), OwnershipPolicy::Solo);
        let res = solo
            .apply_action(&Tile::neutral(cell()), &alice(), Some(&red), None, now())
            .unwrap();
        assert_eq!(res.tile.owner.owner_type(), OwnerType::Solo);
    }

    #[test]
    fn defense_from_sixty_reaches_eighty_and_leaves_dispute() {
        let tile = owned_by(Owner::Solo(alice()), 60);
        let res = resolver()
            .apply_action(&tile, &alice(), None, None, now())
            .unwrap();
        assert_eq!(res.action.action_type, ActionType::Defense);
        assert_eq!(res.tile.shield, 80);
        assert_eq!(res.action.shield_change, 20);
        assert!(!res.action.owner_changed);
        assert!(!res.in_dispute);
        assert_eq!(res.tile.last_defense_at, Some(now()));
    }

    #[test]
    fn team_member_defends_team_tile() {
        let red = TeamId::from("red");
        let tile = owned_by(Owner::Team(red.clone()), 50);
        let res = resolver()
            .apply_action(&tile, &bob(), Some(&red), None, now())
            .unwrap();
        assert_eq!(res.action.action_type, ActionType::Defense);
        assert_eq!(res.tile.owner, Owner::Team(red));
        assert_eq!(res.tile.shield, 70);
    }

    #[test]
    fn repeated_defense_clamps_at_full_shield() {
        let r = resolver();
        let tile = owned_by(Owner::Solo(alice()), 90);
        let first = r.apply_action(&tile, &alice(), None, None, now()).unwrap();
        assert_eq!(first.tile.shield, 100);
        assert_eq!(first.action.shield_change, 10);
        let second = r
            .apply_action(&first.tile, &alice(), None, None, now())
            .unwrap();
        assert_eq!(second.tile.shield, 100);
        assert_eq!(second.action.shield_change, 0);
    }

    #[test]
    fn attack_on_strong_tile_only_dents_shield() {
        let tile = owned_by(Owner::Solo(alice()), 80);
        let res = resolver()
            .apply_action(&tile, &bob(), None, None, now())
            .unwrap();
        assert_eq!(res.action.action_type, ActionType::Attack);
        assert_eq!(res.tile.shield, 45);
        assert_eq!(res.action.shield_change, -35);
        assert!(!res.action.owner_changed);
        assert_eq!(res.tile.owner, Owner::Solo(alice()));
        assert!(res.in_dispute);
        assert!(res.entered_dispute);
    }

    #[test]
    fn attack_breaking_shield_transfers_ownership_with_cooldown() {
        let tile = owned_by(Owner::Solo(alice()), 30);
        let res = resolver()
            .apply_action(&tile, &bob(), None, None, now())
            .unwrap();
        assert!(res.action.owner_changed);
        assert_eq!(res.tile.owner, Owner::Solo(bob()));
        assert_eq!(res.previous_owner, Owner::Solo(alice()));
        assert_eq!(res.tile.shield, 65);
        assert_eq!(res.action.shield_change, 35);
        let until = res.tile.cooldown_until.expect("cooldown set");
        assert!(until > now());
        assert!(until <= now() + Duration::hours(18));
        assert_eq!(res.tile.last_defense_at, Some(now()));
        assert!(!res.entered_dispute);
    }

    #[test]
    fn attack_that_only_dents_keeps_the_owners_defense_clock() {
        let mut tile = owned_by(Owner::Solo(alice()), 90);
        let defended = now() - Duration::days(12);
        tile.last_defense_at = Some(defended);
        let res = resolver()
            .apply_action(&tile, &bob(), None, None, now())
            .unwrap();
        assert_eq!(res.tile.last_defense_at, Some(defended));
        assert_eq!(res.tile.last_action_at, Some(now()));
    }

    #[test]
    fn huge_cooldown_saturates_instead_of_overflowing() {
        let shield = ShieldConfig {
            ownership_cooldown_hours: i64::MAX,
            ..ShieldConfig::default()
        };
        let resolver = ConquestResolver::new(shield, OwnershipPolicy::Solo);
        let res = resolver
            .apply_action(&owned_by(Owner::Solo(alice()), 30), &bob(), None, None, now())
            .unwrap();
        assert!(res.action.owner_changed);
        assert!(res.tile.cooldown_until.unwrap() > now());
    }

    #[test]
    fn attack_during_cooldown_cannot_flip_ownership() {
        let mut tile = owned_by(Owner::Solo(alice()), 20);
        tile.cooldown_until = Some(now() + Duration::hours(2));
        let res = resolver()
            .apply_action(&tile, &bob(), None, None, now())
            .unwrap();
        assert!(!res.action.owner_changed);
        assert_eq!(res.tile.owner, Owner::Solo(alice()));
        assert_eq!(res.tile.shield, 1);

        tile.cooldown_until = Some(now() - Duration::minutes(1));
        let res = resolver()
            .apply_action(&tile, &bob(), None, None, now())
            .unwrap();
        assert!(res.action.owner_changed);
    }

    #[test]
    fn guardian_tracks_latest_actor() {
        let r = resolver();
        let tile = owned_by(Owner::Solo(alice()), 60);
        let first = r.apply_action(&tile, &alice(), None, None, now()).unwrap();
        assert_eq!(first.tile.guardian_id, Some(alice()));
        assert_eq!(first.tile.guardian_contribution, 1);
        let second = r
            .apply_action(&first.tile, &alice(), None, None, now())
            .unwrap();
        assert_eq!(second.tile.guardian_contribution, 2);
        let third = r
            .apply_action(&second.tile, &bob(), None, None, now())
            .unwrap();
        assert_eq!(third.tile.guardian_id, Some(bob()));
        assert_eq!(third.tile.guardian_contribution, 1);
    }

    #[test]
    fn rejects_blank_actor_and_corrupt_shield() {
        let r = resolver();
        let tile = Tile::neutral(cell());
        assert_eq!(
            r.apply_action(&tile, &ActorId::from("  "), None, None, now()),
            Err(TerritoryError::UnauthorizedActor)
        );
        let corrupt = owned_by(Owner::Solo(alice()), 130);
        assert!(matches!(
            r.apply_action(&corrupt, &bob(), None, None, now()),
            Err(TerritoryError::InvalidTileState { shield: 130, .. })
        ));
        let negative = owned_by(Owner::Solo(alice()), -1);
        assert!(r.apply_action(&negative, &bob(), None, None, now()).is_err());
    }

    #[test]
    fn shield_stays_in_range_for_every_starting_value() {
        let r = resolver();
        for shield in 0..=100 {
            for actor in [alice(), bob()] {
                let tile = owned_by(Owner::Solo(alice()), shield);
                let res = r.apply_action(&tile, &actor, None, None, now()).unwrap();
                assert!((0..=100).contains(&res.tile.shield));
                assert_eq!(
                    res.action.shield_change,
                    res.action.shield_after - res.action.shield_before
                );
                if res.action.action_type == ActionType::Defense {
                    assert!(res.tile.shield >= shield);
                    assert_eq!(res.tile.owner, tile.owner);
                }
            }
        }
    }
}
