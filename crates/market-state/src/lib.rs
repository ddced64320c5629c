#![deny(warnings)]

//! Market state bridge: trigger change detection and save-data snapshots.
//!
//! The host polls the trigger variable every world tick; a change in its value
//! is the only thing that causes a full recompute. Snapshots carry the cached
//! prices and the event modifier, never the trigger value, which is re-read
//! from the live world after a load.

use market_core::{ItemId, MarketCache, SignalId, WorldView};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Current snapshot layout version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Reasons a save blob cannot be used.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed snapshot: {0}")]
    Binary(#[from] bincode::Error),
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
    #[error("snapshot event modifier {0} is not usable")]
    InvalidModifier(f64),
}

/// Persisted form of the market cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub version: u32,
    pub prices: BTreeMap<ItemId, u32>,
    pub event_modifier: f64,
}

impl MarketSnapshot {
    pub fn from_cache(cache: &MarketCache) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            prices: cache.prices.clone(),
            event_modifier: cache.event_modifier,
        }
    }

    pub fn into_cache(self) -> MarketCache {
        MarketCache {
            prices: self.prices,
            event_modifier: self.event_modifier,
        }
    }

    fn validated(self) -> Result<Self, StateError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(StateError::UnsupportedVersion(self.version));
        }
        if !self.event_modifier.is_finite() || self.event_modifier < 0.0 {
            return Err(StateError::InvalidModifier(self.event_modifier));
        }
        Ok(self)
    }

    /// JSON text, suitable for embedding in the host's save data.
    pub fn to_json(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(blob: &str) -> Result<Self, StateError> {
        serde_json::from_str::<Self>(blob)?.validated()
    }

    /// Compact binary form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(blob: &[u8]) -> Result<Self, StateError> {
        bincode::deserialize::<Self>(blob)?.validated()
    }
}

/// Decode a JSON blob; corruption yields an empty cache with modifier 1.0.
pub fn restore_json(blob: &str) -> MarketCache {
    recover(MarketSnapshot::from_json(blob))
}

/// Decode a binary blob; corruption yields an empty cache with modifier 1.0.
pub fn restore_bytes(blob: &[u8]) -> MarketCache {
    recover(MarketSnapshot::from_bytes(blob))
}

fn recover(decoded: Result<MarketSnapshot, StateError>) -> MarketCache {
    match decoded {
        Ok(snapshot) => snapshot.into_cache(),
        Err(e) => {
            warn!(error = %e, "discarding corrupt market snapshot");
            MarketCache::default()
        }
    }
}

/// Watches the trigger variable and moves market state in and out of saves.
#[derive(Clone, Debug, Default)]
pub struct MarketStateStore {
    trigger_signal: Option<SignalId>,
    last_trigger_value: Option<i64>,
}

impl MarketStateStore {
    pub fn new(trigger_signal: Option<SignalId>) -> Self {
        Self {
            trigger_signal,
            last_trigger_value: None,
        }
    }

    pub fn trigger_signal(&self) -> Option<SignalId> {
        self.trigger_signal
    }

    pub fn last_trigger_value(&self) -> Option<i64> {
        self.last_trigger_value
    }

    /// Live trigger value. Unset variables, a missing store, or no configured
    /// trigger all read as 0.
    pub fn read_trigger(&self, world: &WorldView<'_>) -> i64 {
        world.signal(self.trigger_signal).unwrap_or(0)
    }

    /// `true` exactly when `current` differs from the last observed value.
    /// Before anything was observed every value counts as a change.
    pub fn detect_trigger_change(&mut self, current: i64) -> bool {
        if self.last_trigger_value == Some(current) {
            return false;
        }
        debug!(previous = ?self.last_trigger_value, current, "market trigger changed");
        self.last_trigger_value = Some(current);
        true
    }

    /// Adopt the live trigger value without reporting a change.
    pub fn sync(&mut self, world: &WorldView<'_>) {
        self.last_trigger_value = Some(self.read_trigger(world));
    }

    pub fn serialize(&self, cache: &MarketCache) -> Result<String, StateError> {
        MarketSnapshot::from_cache(cache).to_json()
    }

    /// Restore a cache from save data and re-sync the trigger to the live
    /// world, so the next tick does not fire a recompute.
    pub fn deserialize(&mut self, blob: &str, world: &WorldView<'_>) -> MarketCache {
        self.sync(world);
        restore_json(blob)
    }

    pub fn serialize_bytes(&self, cache: &MarketCache) -> Result<Vec<u8>, StateError> {
        MarketSnapshot::from_cache(cache).to_bytes()
    }

    pub fn deserialize_bytes(&mut self, blob: &[u8], world: &WorldView<'_>) -> MarketCache {
        self.sync(world);
        restore_bytes(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::SignalTable;
    use proptest::prelude::*;

    fn cache() -> MarketCache {
        let mut c = MarketCache {
            event_modifier: 1.75,
            ..MarketCache::default()
        };
        c.prices.insert(ItemId(1), 75);
        c.prices.insert(ItemId(2), 0);
        c.prices.insert(ItemId(40), 1_200);
        c
    }

    #[test]
    fn trigger_fires_once_per_change() {
        let mut store = MarketStateStore::new(SignalId::new(9));
        assert!(store.detect_trigger_change(0));
        assert!(!store.detect_trigger_change(0));
        assert!(store.detect_trigger_change(3));
        assert!(!store.detect_trigger_change(3));
        assert!(!store.detect_trigger_change(3));
        assert!(store.detect_trigger_change(0));
        assert_eq!(store.last_trigger_value(), Some(0));
    }

    #[test]
    fn trigger_reads_zero_without_context() {
        let store = MarketStateStore::new(SignalId::new(9));
        assert_eq!(store.read_trigger(&WorldView::detached()), 0);
        let unconfigured = MarketStateStore::new(None);
        let mut table = SignalTable::new();
        table.set(9, 4);
        assert_eq!(unconfigured.read_trigger(&WorldView::new(&table)), 0);
        assert_eq!(store.read_trigger(&WorldView::new(&table)), 4);
    }

    #[test]
    fn json_snapshot_shape() {
        let json = MarketSnapshot::from_cache(&cache()).to_json().unwrap();
        assert_eq!(
            json,
            r#"{"version":1,"prices":{"1":75,"2":0,"40":1200},"event_modifier":1.75}"#
        );
    }

    #[test]
    fn json_and_binary_round_trip() {
        let store = MarketStateStore::new(None);
        let json = store.serialize(&cache()).unwrap();
        assert_eq!(restore_json(&json), cache());
        let bytes = store.serialize_bytes(&cache()).unwrap();
        assert_eq!(restore_bytes(&bytes), cache());
    }

    #[test]
    fn corrupt_blobs_fall_back_to_defaults() {
        assert_eq!(restore_json("{not json"), MarketCache::default());
        assert_eq!(restore_json(""), MarketCache::default());
        assert_eq!(restore_bytes(&[1, 2, 3]), MarketCache::default());
        let future = r#"{"version":7,"prices":{},"event_modifier":1.0}"#;
        assert!(matches!(
            MarketSnapshot::from_json(future),
            Err(StateError::UnsupportedVersion(7))
        ));
        assert_eq!(restore_json(future), MarketCache::default());
        let negative = r#"{"version":1,"prices":{"1":5},"event_modifier":-2.0}"#;
        assert_eq!(restore_json(negative), MarketCache::default());
    }

    #[test]
    fn deserialize_resyncs_trigger_to_live_value() {
        let mut table = SignalTable::new();
        table.set(9, 12);
        let world = WorldView::new(&table);
        let mut saver = MarketStateStore::new(SignalId::new(9));
        assert!(saver.detect_trigger_change(3));
        let blob = saver.serialize(&cache()).unwrap();

        let mut loader = MarketStateStore::new(SignalId::new(9));
        let restored = loader.deserialize(&blob, &world);
        assert_eq!(restored, cache());
        assert_eq!(loader.last_trigger_value(), Some(12));
        assert!(!loader.detect_trigger_change(loader.read_trigger(&world)));
    }

    proptest! {
        #[test]
        fn json_restores_exact_values(prices in proptest::collection::btree_map(0u32..5_000, 0u32..1_000_000, 0..50),
                                      modifier in 0.0f64..100.0) {
            let cache = MarketCache {
                prices: prices.into_iter().map(|(k, v)| (ItemId(k), v)).collect(),
                event_modifier: modifier,
            };
            let blob = MarketSnapshot::from_cache(&cache).to_json().unwrap();
            prop_assert_eq!(restore_json(&blob), cache);
        }
    }
}
