#![deny(warnings)]

//! Host-facing market: ties the pricing engine to trigger polling and saves.
//!
//! The host owns the game loop and composes these calls directly:
//! `initialize` at new game, `on_world_tick` every world update, `get_price`
//! and `get_sell_price` from shop windows, `set_event_modifier` from scripted
//! events, and `export_state`/`import_state` from the save system.

use market_core::{Catalog, ItemId, LocationProfile, MarketCache, MarketConfig, Scene, WorldView};
use market_econ::{
    format_fluctuation, Fluctuation, FluctuationLabel, PricingError, PricingRuleEngine,
};
use market_state::{MarketStateStore, StateError};
use market_tags::LoadedMarket;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub use market_econ::Combiner;

/// Which side of a shop transaction a label is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShopMode {
    Buy,
    Sell,
}

/// Shop prices quoted during the current tick at one location.
///
/// Buy price, sell price and indicator of an item all come from the same
/// quote until the next tick or a move to another location.
#[derive(Debug, Default)]
struct ShopQuotes {
    location: Option<LocationProfile>,
    prices: BTreeMap<ItemId, u32>,
}

impl ShopQuotes {
    fn clear(&mut self) {
        self.location = None;
        self.prices.clear();
    }
}

/// The pricing core as one explicit instance.
pub struct Market {
    engine: PricingRuleEngine,
    state: MarketStateStore,
    config: MarketConfig,
    shop: ShopQuotes,
}

impl Market {
    pub fn new(catalog: Catalog, config: MarketConfig) -> Self {
        let config = normalized(config);
        Self {
            engine: PricingRuleEngine::new(catalog, &config),
            state: MarketStateStore::new(config.trigger_signal),
            config,
            shop: ShopQuotes::default(),
        }
    }

    /// Market whose random draws are reproducible.
    pub fn seeded(catalog: Catalog, config: MarketConfig, seed: u64) -> Self {
        let config = normalized(config);
        Self {
            engine: PricingRuleEngine::seeded(catalog, &config, seed),
            state: MarketStateStore::new(config.trigger_signal),
            config,
            shop: ShopQuotes::default(),
        }
    }

    pub fn from_loaded(market: LoadedMarket) -> Self {
        Self::new(market.catalog, market.config)
    }

    /// Replace the combination rule configured by `formula`.
    pub fn with_combiner(mut self, combiner: Combiner) -> Self {
        self.engine = self.engine.with_combiner(combiner);
        self
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        self.engine.catalog()
    }

    pub fn cache(&self) -> &MarketCache {
        self.engine.cache()
    }

    pub fn event_modifier(&self) -> f64 {
        self.engine.event_modifier()
    }

    /// New game: adopt the current trigger value and price everything.
    pub fn initialize(&mut self, world: &WorldView<'_>) {
        self.state.sync(world);
        self.shop.clear();
        let cache = self.engine.recompute_all(world);
        info!(items = cache.len(), "market initialized");
    }

    /// Poll the trigger; recompute every price if it changed. Returns whether
    /// a recompute happened.
    pub fn on_world_tick(&mut self, world: &WorldView<'_>) -> bool {
        self.shop.clear();
        let current = self.state.read_trigger(world);
        if !self.state.detect_trigger_change(current) {
            return false;
        }
        let cache = self.engine.recompute_all(world);
        info!(trigger = current, items = cache.len(), "market prices refreshed");
        true
    }

    /// Buy price. Outside shops this is the cached price. In a shop it is
    /// recomputed for the shop's location once per tick, so repeated queries
    /// within the tick agree with each other.
    pub fn get_price(&mut self, item: ItemId, world: &WorldView<'_>) -> u32 {
        if world.scene == Scene::Shop {
            return self.shop_quote(item, world);
        }
        self.engine.get_price(item, world)
    }

    fn shop_quote(&mut self, item: ItemId, world: &WorldView<'_>) -> u32 {
        if self.shop.location.as_ref() != world.location {
            self.shop.prices.clear();
            self.shop.location = world.location.cloned();
        }
        if let Some(price) = self.shop.prices.get(&item) {
            return *price;
        }
        let Some(price) = self.engine.quote(item, world) else {
            debug!(%item, "shop price requested for unknown item");
            return 0;
        };
        self.shop.prices.insert(item, price);
        price
    }

    /// Half the buy price, rounded down.
    pub fn get_sell_price(&mut self, item: ItemId, world: &WorldView<'_>) -> u32 {
        self.get_price(item, world) / 2
    }

    pub fn set_event_modifier(
        &mut self,
        value: f64,
        world: &WorldView<'_>,
    ) -> Result<(), PricingError> {
        self.engine.set_event_modifier(value, world)?;
        self.shop.clear();
        Ok(())
    }

    /// Save data as JSON text.
    pub fn export_state(&self) -> Result<String, StateError> {
        self.state.serialize(self.engine.cache())
    }

    /// Load save data. Corrupt data leaves an empty cache with the default
    /// modifier; prices are then filled lazily.
    pub fn import_state(&mut self, blob: &str, world: &WorldView<'_>) {
        let cache = self.state.deserialize(blob, world);
        info!(items = cache.len(), "market state imported");
        self.shop.clear();
        self.engine.restore(cache);
    }

    pub fn export_state_bytes(&self) -> Result<Vec<u8>, StateError> {
        self.state.serialize_bytes(self.engine.cache())
    }

    pub fn import_state_bytes(&mut self, blob: &[u8], world: &WorldView<'_>) {
        let cache = self.state.deserialize_bytes(blob, world);
        info!(items = cache.len(), "market state imported");
        self.shop.clear();
        self.engine.restore(cache);
    }

    /// Change of the current price against the item's base price.
    pub fn fluctuation(&mut self, item: ItemId, world: &WorldView<'_>) -> Option<Fluctuation> {
        let base = self.engine.catalog().get(&item)?.base_price;
        let price = self.get_price(item, world);
        Fluctuation::between(base, price, self.config.display.decimals)
    }

    /// Indicator for a shop window, or `None` when disabled for `mode` or the
    /// item is not tradeable.
    pub fn fluctuation_label(
        &mut self,
        item: ItemId,
        world: &WorldView<'_>,
        mode: ShopMode,
    ) -> Option<FluctuationLabel> {
        let display = &self.config.display;
        let enabled = match mode {
            ShopMode::Buy => display.show_in_buy,
            ShopMode::Sell => display.show_in_sell,
        };
        if !enabled {
            return None;
        }
        let f = self.fluctuation(item, world)?;
        Some(format_fluctuation(&f, &self.config.display))
    }
}

fn normalized(mut config: MarketConfig) -> MarketConfig {
    config.normalize();
    config
}
