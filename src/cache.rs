//! Short-lived cache for map viewport reads.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::config::CacheConfig;
use crate::geo::Bounds;
use crate::territory::Tile;

/// Bounds snapped to roughly ten metres so nearly identical viewports share
/// an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ViewportKey([i64; 4]);

impl From<&Bounds> for ViewportKey {
    fn from(bounds: &Bounds) -> Self {
        let snap = |degrees: f64| (degrees * 1e4).round() as i64;
        Self([
            snap(bounds.min_lat),
            snap(bounds.min_lng),
            snap(bounds.max_lat),
            snap(bounds.max_lng),
        ])
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    tiles: Vec<Tile>,
    stored_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ViewportCache {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<ViewportKey, CacheEntry>,
    /// Bumped on every invalidation.
    generation: u64,
}

impl ViewportCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            capacity: config.capacity,
            ttl: config.ttl(),
            entries: HashMap::new(),
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, bounds: &Bounds, now: DateTime<Utc>) -> Option<Vec<Tile>> {
        let key = ViewportKey::from(bounds);
        let fresh = self
            .entries
            .get(&key)
            .is_some_and(|entry| now - entry.stored_at < self.ttl);
        if !fresh {
            self.entries.remove(&key);
            return None;
        }
        self.entries.get(&key).map(|entry| entry.tiles.clone())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stores `tiles` read while the cache was at `read_generation`. The read
    /// is dropped when an invalidation has happened since.
    pub fn insert(
        &mut self,
        bounds: &Bounds,
        tiles: Vec<Tile>,
        now: DateTime<Utc>,
        read_generation: u64,
    ) {
        if self.capacity == 0 || read_generation != self.generation {
            return;
        }
        let key = ViewportKey::from(bounds);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| *key);
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                tiles,
                stored_at: now,
            },
        );
    }

    pub fn invalidate(&mut self) {
        self.entries.clear();
        self.generation = self.generation.wrapping_add(1);
    }
}
