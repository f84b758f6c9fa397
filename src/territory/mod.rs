//! Tile ownership state and the action log.

mod decay;
mod resolver;

pub use decay::{apply_decay, DecayOutcome};
pub use resolver::{ConquestResolver, Resolution};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::grid::CellId;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(ActorId);
string_id!(TeamId);
string_id!(RunId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerType {
    None,
    Solo,
    Team,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(
    tag = "owner_type",
    content = "owner_id",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum Owner {
    #[default]
    None,
    Solo(ActorId),
    Team(TeamId),
}

impl Owner {
    pub fn owner_type(&self) -> OwnerType {
        match self {
            Owner::None => OwnerType::None,
            Owner::Solo(_) => OwnerType::Solo,
            Owner::Team(_) => OwnerType::Team,
        }
    }

    pub fn owner_id(&self) -> Option<&str> {
        match self {
            Owner::None => None,
            Owner::Solo(actor) => Some(actor.as_str()),
            Owner::Team(team) => Some(team.as_str()),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Owner::None)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::None => write!(f, "unowned"),
            Owner::Solo(actor) => write!(f, "solo:{actor}"),
            Owner::Team(team) => write!(f, "team:{team}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub id: CellId,
    #[serde(flatten)]
    pub owner: Owner,
    pub shield: i32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub guardian_id: Option<ActorId>,
    pub guardian_contribution: u32,
    pub last_action_at: Option<DateTime<Utc>>,
    pub last_defense_at: Option<DateTime<Utc>>,
}

impl Tile {
    /// The virtual state of a cell nobody has conquered yet.
    pub fn neutral(id: CellId) -> Self {
        Self {
            id,
            owner: Owner::None,
            shield: 0,
            cooldown_until: None,
            guardian_id: None,
            guardian_contribution: 0,
            last_action_at: None,
            last_defense_at: None,
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.owner.is_none()
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    pub fn in_dispute(&self, threshold: i32) -> bool {
        !self.is_neutral() && self.shield < threshold
    }

    pub fn is_held_by(&self, actor: &ActorId, team: Option<&TeamId>) -> bool {
        match &self.owner {
            Owner::None => false,
            Owner::Solo(owner) => owner == actor,
            Owner::Team(owner) => team == Some(owner),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Conquest,
    Attack,
    Defense,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActionType::Conquest => "CONQUEST",
            ActionType::Attack => "ATTACK",
            ActionType::Defense => "DEFENSE",
        };
        f.write_str(label)
    }
}

/// One resolved action, before the store gives it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerritoryAction {
    pub run_id: Option<RunId>,
    pub actor_id: ActorId,
    pub team_id: Option<TeamId>,
    pub tile_id: CellId,
    pub action_type: ActionType,
    pub shield_before: i32,
    pub shield_after: i32,
    pub shield_change: i32,
    pub owner_changed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: u64,
    #[serde(flatten)]
    pub action: TerritoryAction,
}
