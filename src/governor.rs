//! Daily action quotas for actors and teams.
//!
//! The governor only decides. The reservation it hands out is checked again
//! and consumed by the store inside the same commit as the tile update, so
//! two racing submissions cannot both squeeze under the limit.

use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::QuotaConfig;
use crate::error::{QuotaScope, Result, TerritoryError};
use crate::store::TileStore;
use crate::territory::{ActionRecord, ActionType, ActorId, TeamId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub actor_actions: u32,
    /// `None` when the actor plays without a team.
    pub team_actions: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    Denied(QuotaScope),
}

/// Permission for one action on `day`, consumed at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub actor_id: ActorId,
    pub team_id: Option<TeamId>,
    pub day: NaiveDate,
    pub actor_limit: u32,
    pub team_limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsRemaining {
    pub actor_actions_remaining: u32,
    pub team_actions_remaining: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStatus {
    pub actor_actions_used: u32,
    pub actor_actions_remaining: u32,
    pub team_actions_used: Option<u32>,
    pub team_action_limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub actor_id: ActorId,
    pub actions: u32,
}

#[derive(Debug, Clone)]
pub struct ActionGovernor {
    actor_limit: u32,
    team_limit: u32,
    offset: FixedOffset,
}

impl ActionGovernor {
    pub fn new(config: &QuotaConfig) -> Self {
        Self {
            actor_limit: config.daily_actor_action_limit,
            team_limit: config.daily_team_action_limit,
            offset: config.day_offset().unwrap_or_else(|| Utc.fix()),
        }
    }

    pub fn actor_limit(&self) -> u32 {
        self.actor_limit
    }

    pub fn team_limit(&self) -> u32 {
        self.team_limit
    }

    /// The local calendar day that `now` falls in.
    pub fn day_of(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    pub fn start_of_day(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let Some(midnight) = self.day_of(now).and_hms_opt(0, 0, 0) else {
            return now;
        };
        self.offset
            .from_local_datetime(&midnight)
            .single()
            .map_or(now, |local| local.with_timezone(&Utc))
    }

    pub fn decide(&self, usage: &QuotaUsage) -> QuotaDecision {
        if usage.actor_actions >= self.actor_limit {
            QuotaDecision::Denied(QuotaScope::Actor)
        } else if usage.team_actions.is_some_and(|used| used >= self.team_limit) {
            QuotaDecision::Denied(QuotaScope::Team)
        } else {
            QuotaDecision::Allowed
        }
    }

    pub async fn check_and_reserve<S: TileStore>(
        &self,
        store: &S,
        actor: &ActorId,
        team: Option<&TeamId>,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let day = self.day_of(now);
        let usage = store.quota_usage(actor, team, day).await?;
        match self.decide(&usage) {
            QuotaDecision::Allowed => Ok(Reservation {
                actor_id: actor.clone(),
                team_id: team.cloned(),
                day,
                actor_limit: self.actor_limit,
                team_limit: self.team_limit,
            }),
            QuotaDecision::Denied(scope) => {
                debug!(%actor, %scope, ?usage, "quota denied");
                Err(TerritoryError::QuotaExceeded(scope))
            }
        }
    }

    pub fn remaining(&self, usage: &QuotaUsage) -> CapsRemaining {
        CapsRemaining {
            actor_actions_remaining: self.actor_limit.saturating_sub(usage.actor_actions),
            team_actions_remaining: usage
                .team_actions
                .map(|used| self.team_limit.saturating_sub(used)),
        }
    }

    pub fn status(&self, usage: &QuotaUsage) -> DailyStatus {
        DailyStatus {
            actor_actions_used: usage.actor_actions,
            actor_actions_remaining: self.actor_limit.saturating_sub(usage.actor_actions),
            team_actions_used: usage.team_actions,
            team_action_limit: usage.team_actions.map(|_| self.team_limit),
        }
    }
}

/// Attack and defense counts per actor over the trailing week, highest first.
pub fn weekly_contributions(records: &[ActionRecord], now: DateTime<Utc>) -> Vec<Contribution> {
    let since = now - Duration::days(7);
    let mut counts: HashMap<&ActorId, u32> = HashMap::new();
    for record in records {
        let action = &record.action;
        if action.created_at < since || action.created_at > now {
            continue;
        }
        if matches!(action.action_type, ActionType::Attack | ActionType::Defense) {
            *counts.entry(&action.actor_id).or_default() += 1;
        }
    }
    let mut contributions: Vec<Contribution> = counts
        .into_iter()
        .map(|(actor_id, actions)| Contribution {
            actor_id: actor_id.clone(),
            actions,
        })
        .collect();
    contributions.sort_by(|a, b| b.actions.cmp(&a.actions).then(a.actor_id.cmp(&b.actor_id)));
    contributions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridIndexer;
    use crate::territory::TerritoryAction;

    fn governor() -> ActionGovernor {
        ActionGovernor::new(&QuotaConfig::default())
    }

    #[test]
    fn day_boundary_follows_configured_offset() {
        let g = governor();
        // 02:00 UTC is still the previous day at UTC-3
        let late = Utc.with_ymd_and_hms(2026, 6, 2, 2, 0, 0).unwrap();
        assert_eq!(g.day_of(late), NaiveDate::from_ymd_opt(2026, 6, 1).unwrap());
        assert_eq!(
            g.start_of_day(late),
            Utc.with_ymd_and_hms(2026, 6, 1, 3, 0, 0).unwrap()
        );
        let morning = Utc.with_ymd_and_hms(2026, 6, 2, 4, 0, 0).unwrap();
        assert_eq!(g.day_of(morning), NaiveDate::from_ymd_opt(2026, 6, 2).unwrap());
    }

    #[test]
    fn actor_limit_is_checked_before_team_limit() {
        let g = governor();
        let usage = QuotaUsage {
            actor_actions: 2,
            team_actions: Some(10),
        };
        assert_eq!(g.decide(&usage), QuotaDecision::Allowed);

        let usage = QuotaUsage {
            actor_actions: 3,
            team_actions: Some(60),
        };
        assert_eq!(g.decide(&usage), QuotaDecision::Denied(QuotaScope::Actor));

        let usage = QuotaUsage {
            actor_actions: 0,
            team_actions: Some(60),
        };
        assert_eq!(g.decide(&usage), QuotaDecision::Denied(QuotaScope::Team));

        let usage = QuotaUsage {
            actor_actions: 0,
            team_actions: None,
        };
        assert_eq!(g.decide(&usage), QuotaDecision::Allowed);
    }

    #[test]
    fn remaining_never_goes_negative() {
        let g = governor();
        let caps = g.remaining(&QuotaUsage {
            actor_actions: 5,
            team_actions: Some(12),
        });
        assert_eq!(caps.actor_actions_remaining, 0);
        assert_eq!(caps.team_actions_remaining, Some(48));
    }

    #[test]
    fn weekly_contributions_count_attacks_and_defenses() {
        let now = Utc.with_ymd_and_hms(2026, 6, 10, 12, 0, 0).unwrap();
        let tile = GridIndexer::new(8).unwrap().cell_id(-25.43, -49.27).unwrap();
        let record = |id: u64, actor: &str, action_type: ActionType, days_ago: i64| ActionRecord {
            id,
            action: TerritoryAction {
                run_id: None,
                actor_id: ActorId::from(actor),
                team_id: None,
                tile_id: tile,
                action_type,
                shield_before: 50,
                shield_after: 50,
                shield_change: 0,
                owner_changed: false,
                created_at: now - Duration::days(days_ago),
            },
        };
        let records = vec![
            record(1, "alice", ActionType::Conquest, 1),
            record(2, "alice", ActionType::Defense, 1),
            record(3, "bob", ActionType::Attack, 2),
            record(4, "bob", ActionType::Attack, 3),
            record(5, "carol", ActionType::Attack, 9),
            record(6, "alice", ActionType::Defense, 6),
        ];
        let contributions = weekly_contributions(&records, now);
        assert_eq!(
            contributions,
            vec![
                Contribution {
                    actor_id: ActorId::from("alice"),
                    actions: 2
                },
                Contribution {
                    actor_id: ActorId::from("bob"),
                    actions: 2
                },
            ]
        );
    }
}
