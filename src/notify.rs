//! Fire-and-forget territory events. Delivery failures never reach the
//! caller that produced the event.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::grid::CellId;
use crate::territory::Owner;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TerritoryEvent {
    Takeover {
        tile_id: CellId,
        previous_owner: Owner,
        new_owner: Owner,
    },
    DisputeEntered {
        tile_id: CellId,
        owner: Owner,
        shield: i32,
    },
}

impl TerritoryEvent {
    pub fn tile_id(&self) -> CellId {
        match self {
            TerritoryEvent::Takeover { tile_id, .. } | TerritoryEvent::DisputeEntered { tile_id, .. } => {
                *tile_id
            }
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &TerritoryEvent);
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &TerritoryEvent) {
        match event {
            TerritoryEvent::Takeover {
                tile_id,
                previous_owner,
                new_owner,
            } => info!(tile = %tile_id, from = %previous_owner, to = %new_owner, "tile taken over"),
            TerritoryEvent::DisputeEntered {
                tile_id,
                owner,
                shield,
            } => info!(tile = %tile_id, %owner, shield, "tile entered dispute"),
        }
    }
}

/// Fans events out to any number of subscribers. Events published while
/// nobody listens are dropped.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: broadcast::Sender<TerritoryEvent>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TerritoryEvent> {
        self.sender.subscribe()
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: &TerritoryEvent) {
        let _ = self.sender.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridIndexer;
    use crate::territory::ActorId;

    fn takeover() -> TerritoryEvent {
        TerritoryEvent::Takeover {
            tile_id: GridIndexer::new(8).unwrap().cell_id(-25.43, -49.27).unwrap(),
            previous_owner: Owner::None,
            new_owner: Owner::Solo(ActorId::from("alice")),
        }
    }

    #[tokio::test]
    async fn channel_delivers_to_subscribers() {
        let notifier = ChannelNotifier::new(8);
        let mut rx = notifier.subscribe();
        notifier.notify(&takeover());
        assert_eq!(rx.recv().await.unwrap(), takeover());
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let notifier = ChannelNotifier::new(8);
        notifier.notify(&takeover());
        LogNotifier.notify(&takeover());
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let json = serde_json::to_value(takeover()).unwrap();
        assert_eq!(json["event"], "takeover");
        assert_eq!(json["new_owner"]["owner_type"], "SOLO");
    }
}
