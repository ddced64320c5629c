#![deny(warnings)]

//! Pricing rules: supply/demand elasticity, location and event adjustments.
//!
//! This crate provides:
//! - Factor helpers clamped to a floor of 0.1
//! - `compute_price`, a single-item evaluation with a fresh random draw
//! - `PricingRuleEngine`, which owns the catalog and the price cache
//! - `Fluctuation`, the change against base price used for indicators

use market_core::{
    Catalog, FluctuationDisplay, ItemCatalog, ItemEconomicProfile, ItemId, MarketCache,
    MarketConfig, PriceFormula, Scene, WorldView, DEFAULT_FLUCTUATION, MAX_FLUCTUATION,
    NEUTRAL_SIGNAL,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

/// Lowest value a supply or demand factor can take.
pub const FACTOR_FLOOR: f64 = 0.1;

/// Errors produced by the pricing engine. None of them leave the engine in a
/// changed state.
#[derive(Debug, Error, PartialEq)]
pub enum PricingError {
    /// Event modifiers must be finite and non-negative.
    #[error("invalid event modifier: {0}")]
    InvalidEventModifier(f64),
}

/// Supply factor: `1 - ((supply - 100) / 100) * elasticity`, floored at 0.1.
///
/// Example:
/// assert_eq!(supply_factor(150, 0.5), 0.75);
pub fn supply_factor(supply: i64, elasticity: f64) -> f64 {
    let deviation = supply.saturating_sub(NEUTRAL_SIGNAL) as f64 / 100.0;
    (1.0 - deviation * elasticity).max(FACTOR_FLOOR)
}

/// Demand factor: `1 + ((demand - 100) / 100) * elasticity`, floored at 0.1.
pub fn demand_factor(demand: i64, elasticity: f64) -> f64 {
    let deviation = demand.saturating_sub(NEUTRAL_SIGNAL) as f64 / 100.0;
    (1.0 + deviation * elasticity).max(FACTOR_FLOOR)
}

/// Uniform draw from `[1 - amplitude, 1 + amplitude]`.
pub fn random_factor<R: Rng + ?Sized>(rng: &mut R, amplitude: f64) -> f64 {
    let a = if amplitude.is_finite() {
        amplitude.clamp(0.0, MAX_FLUCTUATION)
    } else {
        DEFAULT_FLUCTUATION
    };
    if a == 0.0 {
        return 1.0;
    }
    rng.gen_range(1.0 - a..=1.0 + a)
}

/// Every term that goes into one price.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceFactors {
    pub base: f64,
    pub supply: f64,
    pub demand: f64,
    pub random: f64,
    pub location: f64,
    pub event: f64,
}

impl PriceFactors {
    /// Straight product of all six terms.
    pub fn product(&self) -> f64 {
        self.base * self.supply * self.demand * self.random * self.location * self.event
    }

    /// Base shifted by the sum of each factor's deviation from 1.
    pub fn additive(&self) -> f64 {
        let shift = (self.supply - 1.0)
            + (self.demand - 1.0)
            + (self.random - 1.0)
            + (self.location - 1.0)
            + (self.event - 1.0);
        self.base * (1.0 + shift)
    }
}

/// Combination rule turning factors into an unrounded price.
pub type Combiner = fn(&PriceFactors) -> f64;

pub fn combiner_for(formula: PriceFormula) -> Combiner {
    match formula {
        PriceFormula::Product => PriceFactors::product,
        PriceFormula::Additive => PriceFactors::additive,
    }
}

/// Formula shape and random amplitude used by one engine.
#[derive(Clone, Copy)]
pub struct PricingRules {
    pub amplitude: f64,
    pub combiner: Combiner,
}

impl Default for PricingRules {
    fn default() -> Self {
        Self {
            amplitude: DEFAULT_FLUCTUATION,
            combiner: PriceFactors::product,
        }
    }
}

impl PricingRules {
    pub fn from_config(config: &MarketConfig) -> Self {
        Self {
            amplitude: config.fluctuation,
            combiner: combiner_for(config.formula),
        }
    }

    /// Rules without randomness; useful for previews and tests.
    pub fn deterministic() -> Self {
        Self {
            amplitude: 0.0,
            ..Self::default()
        }
    }
}

/// Resolve every price term for `item` against the given world state.
pub fn price_factors<R: Rng + ?Sized>(
    item: &ItemEconomicProfile,
    world: &WorldView<'_>,
    event_modifier: f64,
    amplitude: f64,
    rng: &mut R,
) -> PriceFactors {
    let mut supply = world.signal(item.supply_signal).unwrap_or(NEUTRAL_SIGNAL);
    let mut demand = world.signal(item.demand_signal).unwrap_or(NEUTRAL_SIGNAL);
    if let Some(loc) = world.location {
        supply = supply.saturating_add(loc.supply_offset(item.item_id));
        demand = demand.saturating_add(loc.demand_offset(item.item_id));
    }
    PriceFactors {
        base: f64::from(item.base_price),
        supply: supply_factor(supply, item.supply_elasticity),
        demand: demand_factor(demand, item.demand_elasticity),
        random: random_factor(rng, amplitude),
        location: world.location.map_or(1.0, |l| l.location_modifier),
        event: event_modifier,
    }
}

/// Round to the nearest integer and floor at 1.
pub fn finalize_price(raw: f64) -> u32 {
    if !raw.is_finite() {
        return 1;
    }
    let rounded = raw.round();
    if rounded < 1.0 {
        1
    } else if rounded >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        rounded as u32
    }
}

/// Current price of one item. Not idempotent: the random factor is drawn
/// fresh on every call.
///
/// Example:
/// let item = ItemEconomicProfile::new(ItemId(1), 0);
/// assert_eq!(compute_price(&item, &WorldView::detached(), 1.0, &rules, &mut rng), 0);
pub fn compute_price<R: Rng + ?Sized>(
    item: &ItemEconomicProfile,
    world: &WorldView<'_>,
    event_modifier: f64,
    rules: &PricingRules,
    rng: &mut R,
) -> u32 {
    if !item.is_tradeable() {
        return 0;
    }
    let factors = price_factors(item, world, event_modifier, rules.amplitude, rng);
    finalize_price((rules.combiner)(&factors))
}

/// Price every item in `catalog` into a fresh cache.
pub fn recompute_all<C, R>(
    catalog: &C,
    world: &WorldView<'_>,
    event_modifier: f64,
    rules: &PricingRules,
    rng: &mut R,
) -> MarketCache
where
    C: ItemCatalog + ?Sized,
    R: Rng + ?Sized,
{
    let prices: BTreeMap<ItemId, u32> = catalog
        .profiles()
        .map(|p| (p.item_id, compute_price(p, world, event_modifier, rules, &mut *rng)))
        .collect();
    MarketCache {
        prices,
        event_modifier,
    }
}

/// Owns the catalog, the price cache and the event modifier.
pub struct PricingRuleEngine<R: Rng = ChaCha8Rng> {
    catalog: Catalog,
    rules: PricingRules,
    cache: MarketCache,
    rng: R,
}

impl PricingRuleEngine<ChaCha8Rng> {
    /// Engine with an entropy-seeded RNG.
    pub fn new(catalog: Catalog, config: &MarketConfig) -> Self {
        Self::with_rng(
            catalog,
            PricingRules::from_config(config),
            ChaCha8Rng::from_entropy(),
        )
    }

    /// Engine whose random draws are reproducible.
    pub fn seeded(catalog: Catalog, config: &MarketConfig, seed: u64) -> Self {
        Self::with_rng(
            catalog,
            PricingRules::from_config(config),
            ChaCha8Rng::seed_from_u64(seed),
        )
    }
}

impl<R: Rng> PricingRuleEngine<R> {
    pub fn with_rng(catalog: Catalog, rules: PricingRules, rng: R) -> Self {
        Self {
            catalog,
            rules,
            cache: MarketCache::default(),
            rng,
        }
    }

    /// Replace the combination rule.
    pub fn with_combiner(mut self, combiner: Combiner) -> Self {
        self.rules.combiner = combiner;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cache(&self) -> &MarketCache {
        &self.cache
    }

    pub fn event_modifier(&self) -> f64 {
        self.cache.event_modifier
    }

    /// Fresh price for one item without touching the cache. `None` for items
    /// outside the catalog.
    pub fn quote(&mut self, item: ItemId, world: &WorldView<'_>) -> Option<u32> {
        let profile = self.catalog.get(&item)?;
        Some(compute_price(
            profile,
            world,
            self.cache.event_modifier,
            &self.rules,
            &mut self.rng,
        ))
    }

    /// Rebuild the whole cache. The new mapping is built fully before it
    /// replaces the old one.
    pub fn recompute_all(&mut self, world: &WorldView<'_>) -> &MarketCache {
        let fresh = recompute_all(
            &self.catalog,
            world,
            self.cache.event_modifier,
            &self.rules,
            &mut self.rng,
        );
        debug!(items = fresh.len(), "market prices recomputed");
        self.cache = fresh;
        &self.cache
    }

    /// Price for display.
    ///
    /// In a shop the price is always recomputed so it reflects the shop's
    /// location, and the cache is left as it was. Elsewhere the cached price
    /// is returned, filling it on first use.
    pub fn get_price(&mut self, item: ItemId, world: &WorldView<'_>) -> u32 {
        let Some(profile) = self.catalog.get(&item) else {
            debug!(%item, "price requested for unknown item");
            return 0;
        };
        if world.scene == Scene::Shop {
            return compute_price(
                profile,
                world,
                self.cache.event_modifier,
                &self.rules,
                &mut self.rng,
            );
        }
        if let Some(price) = self.cache.price(item) {
            return price;
        }
        let price = compute_price(
            profile,
            world,
            self.cache.event_modifier,
            &self.rules,
            &mut self.rng,
        );
        self.cache.prices.insert(item, price);
        price
    }

    /// Set the global modifier and rebuild every price with it.
    pub fn set_event_modifier(
        &mut self,
        value: f64,
        world: &WorldView<'_>,
    ) -> Result<(), PricingError> {
        if !value.is_finite() || value < 0.0 {
            return Err(PricingError::InvalidEventModifier(value));
        }
        info!(value, "event modifier changed");
        self.cache.event_modifier = value;
        self.recompute_all(world);
        Ok(())
    }

    /// Replace the cache with a restored one. Items missing from it are filled
    /// lazily on their next query.
    pub fn restore(&mut self, cache: MarketCache) {
        self.cache = cache;
    }
}

/// Direction of a price relative to its base.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trend {
    Rise,
    Fall,
    Steady,
}

/// Percentage change of a price against its base price.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fluctuation {
    pub percent: Decimal,
    pub trend: Trend,
}

impl Fluctuation {
    /// `None` for non-tradeable items.
    ///
    /// Example:
    /// let f = Fluctuation::between(100, 112, 0).unwrap();
    /// assert_eq!(f.percent, Decimal::new(12, 0));
    pub fn between(base: u32, price: u32, decimals: u32) -> Option<Self> {
        if base == 0 {
            return None;
        }
        let base = Decimal::from(base);
        let change = (Decimal::from(price) - base) * Decimal::ONE_HUNDRED / base;
        let percent =
            change.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
        let trend = if percent > Decimal::ZERO {
            Trend::Rise
        } else if percent < Decimal::ZERO {
            Trend::Fall
        } else {
            Trend::Steady
        };
        Some(Self { percent, trend })
    }
}

/// Text and color index for a fluctuation indicator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FluctuationLabel {
    pub text: String,
    pub color: u8,
}

/// Render a fluctuation with the configured template and colors.
pub fn format_fluctuation(f: &Fluctuation, display: &FluctuationDisplay) -> FluctuationLabel {
    let (sign, color) = match f.trend {
        Trend::Rise => ("+", display.rise_color),
        Trend::Fall => ("-", display.fall_color),
        Trend::Steady => ("", display.neutral_color),
    };
    let value = format!("{:.*}", display.decimals as usize, f.percent.abs());
    FluctuationLabel {
        text: display
            .format
            .replace("{sign}", sign)
            .replace("{value}", &value),
        color,
    }
}
