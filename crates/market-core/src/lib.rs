#![deny(warnings)]

//! Core market data model and host contracts for dynamic pricing.
//!
//! This crate defines the serializable per-item and per-location economic
//! profiles, the configuration surface, and the traits through which the
//! pricing core reads world state it does not own. Malformed configuration is
//! never fatal: normalization substitutes documented defaults and reports each
//! substitution as a [`ConfigDefect`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Signal value assumed when a signal is absent or unset.
pub const NEUTRAL_SIGNAL: i64 = 100;
/// Elasticity used when an item does not configure one.
pub const DEFAULT_ELASTICITY: f64 = 0.5;
/// Default random fluctuation amplitude (±5%).
pub const DEFAULT_FLUCTUATION: f64 = 0.05;
/// Upper bound on the fluctuation amplitude; keeps the random factor positive.
pub const MAX_FLUCTUATION: f64 = 0.95;

/// Unique identifier of an item definition, stable across the game lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u32);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

/// Numbered host variable. Id 0 is the "no signal" sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(pub u32);

impl SignalId {
    /// Returns `None` for the 0 sentinel.
    pub fn new(raw: u32) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }
}

/// Identifier a location may carry to tell places apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub u32);

/// Static per-item economic configuration, loaded once from item definitions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemEconomicProfile {
    /// Item this profile belongs to.
    pub item_id: ItemId,
    /// Base price; 0 marks the item as not tradeable.
    pub base_price: u32,
    /// Variable holding the current supply level (baseline 100).
    #[serde(default)]
    pub supply_signal: Option<SignalId>,
    /// Variable holding the current demand level (baseline 100).
    #[serde(default)]
    pub demand_signal: Option<SignalId>,
    /// How strongly supply deviations move the price (>= 0).
    #[serde(default = "default_elasticity")]
    pub supply_elasticity: f64,
    /// How strongly demand deviations move the price (>= 0).
    #[serde(default = "default_elasticity")]
    pub demand_elasticity: f64,
}

fn default_elasticity() -> f64 {
    DEFAULT_ELASTICITY
}

impl ItemEconomicProfile {
    /// Profile with no signals and default elasticities.
    pub fn new(item_id: ItemId, base_price: u32) -> Self {
        Self {
            item_id,
            base_price,
            supply_signal: None,
            demand_signal: None,
            supply_elasticity: DEFAULT_ELASTICITY,
            demand_elasticity: DEFAULT_ELASTICITY,
        }
    }

    pub fn with_signals(mut self, supply: u32, demand: u32) -> Self {
        self.supply_signal = SignalId::new(supply);
        self.demand_signal = SignalId::new(demand);
        self
    }

    pub fn with_elasticity(mut self, supply: f64, demand: f64) -> Self {
        self.supply_elasticity = supply;
        self.demand_elasticity = demand;
        self
    }

    /// `false` for the `base_price == 0` sentinel.
    pub fn is_tradeable(&self) -> bool {
        self.base_price > 0
    }

    /// Replace malformed fields with defaults, returning what was replaced.
    pub fn normalize(&mut self) -> Vec<ConfigDefect> {
        let mut defects = Vec::new();
        if !valid_elasticity(self.supply_elasticity) {
            defects.push(ConfigDefect::InvalidElasticity {
                item: self.item_id,
                field: "supply",
                value: self.supply_elasticity,
            });
            self.supply_elasticity = DEFAULT_ELASTICITY;
        }
        if !valid_elasticity(self.demand_elasticity) {
            defects.push(ConfigDefect::InvalidElasticity {
                item: self.item_id,
                field: "demand",
                value: self.demand_elasticity,
            });
            self.demand_elasticity = DEFAULT_ELASTICITY;
        }
        // A deserialized id 0 means "no signal".
        if self.supply_signal == Some(SignalId(0)) {
            self.supply_signal = None;
        }
        if self.demand_signal == Some(SignalId(0)) {
            self.demand_signal = None;
        }
        defects
    }
}

fn valid_elasticity(e: f64) -> bool {
    e.is_finite() && e >= 0.0
}

/// Per-location price configuration for the place the party currently is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationProfile {
    #[serde(default)]
    pub location_id: Option<LocationId>,
    /// Multiplicative price factor at this location.
    #[serde(default = "default_modifier")]
    pub location_modifier: f64,
    /// Signed offsets added to an item's supply signal here.
    #[serde(default)]
    pub supply_offsets: BTreeMap<ItemId, i64>,
    /// Signed offsets added to an item's demand signal here.
    #[serde(default)]
    pub demand_offsets: BTreeMap<ItemId, i64>,
}

fn default_modifier() -> f64 {
    1.0
}

impl Default for LocationProfile {
    fn default() -> Self {
        Self {
            location_id: None,
            location_modifier: 1.0,
            supply_offsets: BTreeMap::new(),
            demand_offsets: BTreeMap::new(),
        }
    }
}

impl LocationProfile {
    pub fn supply_offset(&self, item: ItemId) -> i64 {
        self.supply_offsets.get(&item).copied().unwrap_or(0)
    }

    pub fn demand_offset(&self, item: ItemId) -> i64 {
        self.demand_offsets.get(&item).copied().unwrap_or(0)
    }

    /// Reset a non-finite or negative modifier to 1.0.
    pub fn normalize(&mut self) -> Vec<ConfigDefect> {
        if self.location_modifier.is_finite() && self.location_modifier >= 0.0 {
            return Vec::new();
        }
        let defect = ConfigDefect::InvalidLocationModifier {
            location: self.location_id,
            value: self.location_modifier,
        };
        self.location_modifier = 1.0;
        vec![defect]
    }
}

/// Last computed prices plus the global event modifier.
///
/// Entries are replaced wholesale by a full recompute; the only exception is
/// the lazy fill of an item that has no entry yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketCache {
    pub prices: BTreeMap<ItemId, u32>,
    pub event_modifier: f64,
}

impl Default for MarketCache {
    fn default() -> Self {
        Self {
            prices: BTreeMap::new(),
            event_modifier: 1.0,
        }
    }
}

impl MarketCache {
    pub fn price(&self, item: ItemId) -> Option<u32> {
        self.prices.get(&item).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// Malformed or missing metadata. Always recovered locally with a default.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigDefect {
    #[error("{item}: {field} elasticity {value} is invalid, using default")]
    InvalidElasticity {
        item: ItemId,
        field: &'static str,
        value: f64,
    },
    #[error("location {location:?}: modifier {value} is invalid, using 1.0")]
    InvalidLocationModifier {
        location: Option<LocationId>,
        value: f64,
    },
    #[error("tag <{tag}> has malformed value {raw:?}, ignoring")]
    MalformedTag { tag: String, raw: String },
    #[error("{0} defined more than once, keeping the last definition")]
    DuplicateItem(ItemId),
    #[error("fluctuation amplitude {0} is out of range, clamping")]
    FluctuationOutOfRange(f64),
}

/// Normalized catalog keyed by item id.
pub type Catalog = BTreeMap<ItemId, ItemEconomicProfile>;

/// Normalize every profile and key it by id. Later duplicates replace earlier
/// ones. Defects are logged and returned.
pub fn build_catalog<I>(profiles: I) -> (Catalog, Vec<ConfigDefect>)
where
    I: IntoIterator<Item = ItemEconomicProfile>,
{
    let mut catalog = Catalog::new();
    let mut defects = Vec::new();
    for mut profile in profiles {
        defects.extend(profile.normalize());
        let id = profile.item_id;
        if catalog.insert(id, profile).is_some() {
            defects.push(ConfigDefect::DuplicateItem(id));
        }
    }
    for d in &defects {
        warn!(defect = %d, "catalog configuration defect");
    }
    (catalog, defects)
}

/// Read access to the host's numbered variables.
pub trait SignalStore {
    /// Current value, or `None` when unset.
    fn signal(&self, id: SignalId) -> Option<i64>;
}

/// Simple in-memory variable table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalTable {
    values: BTreeMap<SignalId, i64>,
}

impl SignalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes to id 0 are ignored, like the host's variable table.
    pub fn set(&mut self, id: u32, value: i64) {
        if let Some(id) = SignalId::new(id) {
            self.values.insert(id, value);
        }
    }
}

impl SignalStore for SignalTable {
    fn signal(&self, id: SignalId) -> Option<i64> {
        self.values.get(&id).copied()
    }
}

/// Where the party currently is, as far as pricing is concerned.
pub trait LocationSource {
    fn current_location(&self) -> Option<&LocationProfile>;
}

impl LocationSource for Option<LocationProfile> {
    fn current_location(&self) -> Option<&LocationProfile> {
        self.as_ref()
    }
}

impl LocationSource for LocationProfile {
    fn current_location(&self) -> Option<&LocationProfile> {
        Some(self)
    }
}

/// Enumerable item definitions with economic profiles.
pub trait ItemCatalog {
    fn profile(&self, id: ItemId) -> Option<&ItemEconomicProfile>;
    fn profiles(&self) -> Box<dyn Iterator<Item = &ItemEconomicProfile> + '_>;
}

impl ItemCatalog for Catalog {
    fn profile(&self, id: ItemId) -> Option<&ItemEconomicProfile> {
        self.get(&id)
    }

    fn profiles(&self) -> Box<dyn Iterator<Item = &ItemEconomicProfile> + '_> {
        Box::new(self.values())
    }
}

/// Presentation context of a price query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Scene {
    /// Anywhere outside a shop; cached prices are served.
    #[default]
    Field,
    /// A shop at the current location is open; prices are always fresh.
    Shop,
}

/// The world state visible to one pricing call.
///
/// Either source may be missing (e.g. before the host world is ready), in
/// which case neutral defaults apply.
#[derive(Clone, Copy, Default)]
pub struct WorldView<'a> {
    pub signals: Option<&'a dyn SignalStore>,
    pub location: Option<&'a LocationProfile>,
    pub scene: Scene,
}

impl<'a> WorldView<'a> {
    /// No signals, no location, field scene.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn new(signals: &'a dyn SignalStore) -> Self {
        Self {
            signals: Some(signals),
            location: None,
            scene: Scene::Field,
        }
    }

    pub fn from_sources(signals: &'a dyn SignalStore, locations: &'a dyn LocationSource) -> Self {
        Self::new(signals).at(locations.current_location())
    }

    pub fn at(mut self, location: Option<&'a LocationProfile>) -> Self {
        self.location = location;
        self
    }

    pub fn in_shop(mut self) -> Self {
        self.scene = Scene::Shop;
        self
    }

    /// Raw signal value; `None` when the id, store or value is absent.
    pub fn signal(&self, id: Option<SignalId>) -> Option<i64> {
        let id = id?;
        self.signals.and_then(|s| s.signal(id))
    }
}

/// How the price terms are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceFormula {
    /// base × supply × demand × random × location × event
    #[default]
    Product,
    /// base × (1 + Σ(factor − 1)); factors shift the price independently.
    Additive,
}

/// Presentation options for the fluctuation indicator next to a price.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluctuationDisplay {
    pub show_in_buy: bool,
    pub show_in_sell: bool,
    /// Host text color index used when the price is above base.
    pub rise_color: u8,
    /// Host text color index used when the price is below base.
    pub fall_color: u8,
    pub neutral_color: u8,
    /// Template with `{sign}` and `{value}` placeholders.
    pub format: String,
    /// Decimal places of the displayed percentage.
    pub decimals: u32,
}

impl Default for FluctuationDisplay {
    fn default() -> Self {
        Self {
            show_in_buy: true,
            show_in_sell: true,
            rise_color: 2,
            fall_color: 3,
            neutral_color: 0,
            format: "({sign}{value}%)".to_string(),
            decimals: 0,
        }
    }
}

/// Recognized market options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Variable whose change triggers a full recompute.
    pub trigger_signal: Option<SignalId>,
    pub formula: PriceFormula,
    /// Random amplitude; the random factor is drawn from `[1 - a, 1 + a]`.
    pub fluctuation: f64,
    pub display: FluctuationDisplay,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            trigger_signal: None,
            formula: PriceFormula::Product,
            fluctuation: DEFAULT_FLUCTUATION,
            display: FluctuationDisplay::default(),
        }
    }
}

impl MarketConfig {
    pub fn normalize(&mut self) -> Vec<ConfigDefect> {
        let mut defects = Vec::new();
        if self.trigger_signal == Some(SignalId(0)) {
            self.trigger_signal = None;
        }
        if !self.fluctuation.is_finite() {
            defects.push(ConfigDefect::FluctuationOutOfRange(self.fluctuation));
            self.fluctuation = DEFAULT_FLUCTUATION;
        } else if !(0.0..=MAX_FLUCTUATION).contains(&self.fluctuation) {
            defects.push(ConfigDefect::FluctuationOutOfRange(self.fluctuation));
            self.fluctuation = self.fluctuation.clamp(0.0, MAX_FLUCTUATION);
        }
        for d in &defects {
            warn!(defect = %d, "market configuration defect");
        }
        defects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn signal_zero_is_unset() {
        assert_eq!(SignalId::new(0), None);
        let p = ItemEconomicProfile::new(ItemId(1), 10).with_signals(0, 7);
        assert_eq!(p.supply_signal, None);
        assert_eq!(p.demand_signal, Some(SignalId(7)));
    }

    #[test]
    fn malformed_elasticity_falls_back() {
        let mut p = ItemEconomicProfile::new(ItemId(3), 50).with_elasticity(f64::NAN, -2.0);
        let defects = p.normalize();
        assert_eq!(defects.len(), 2);
        assert_eq!(p.supply_elasticity, DEFAULT_ELASTICITY);
        assert_eq!(p.demand_elasticity, DEFAULT_ELASTICITY);
    }

    #[test]
    fn catalog_keeps_last_duplicate() {
        let (catalog, defects) = build_catalog(vec![
            ItemEconomicProfile::new(ItemId(1), 10),
            ItemEconomicProfile::new(ItemId(2), 20),
            ItemEconomicProfile::new(ItemId(1), 30),
        ]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[&ItemId(1)].base_price, 30);
        assert_eq!(defects, vec![ConfigDefect::DuplicateItem(ItemId(1))]);
    }

    #[test]
    fn profile_defaults_from_json() {
        let p: ItemEconomicProfile =
            serde_json::from_str(r#"{"item_id": 4, "base_price": 120, "supply_signal": 9}"#)
                .unwrap();
        assert_eq!(p.supply_signal, Some(SignalId(9)));
        assert_eq!(p.demand_signal, None);
        assert_eq!(p.demand_elasticity, DEFAULT_ELASTICITY);
    }

    #[test]
    fn location_defaults_are_neutral() {
        let loc = LocationProfile::default();
        assert_eq!(loc.location_modifier, 1.0);
        assert_eq!(loc.supply_offset(ItemId(1)), 0);
        assert_eq!(loc.demand_offset(ItemId(1)), 0);
    }

    #[test]
    fn negative_location_modifier_is_reset() {
        let mut loc = LocationProfile {
            location_modifier: -3.0,
            ..LocationProfile::default()
        };
        assert_eq!(loc.normalize().len(), 1);
        assert_eq!(loc.location_modifier, 1.0);
    }

    #[test]
    fn cache_starts_empty_with_neutral_modifier() {
        let cache = MarketCache::default();
        assert!(cache.is_empty());
        assert_eq!(cache.event_modifier, 1.0);
        assert_eq!(cache.price(ItemId(1)), None);
    }

    #[test]
    fn detached_view_reads_nothing() {
        let view = WorldView::detached();
        assert_eq!(view.signal(Some(SignalId(1))), None);
        assert!(view.location.is_none());
        assert_eq!(view.scene, Scene::Field);
    }

    #[test]
    fn view_reads_from_sources() {
        let mut table = SignalTable::new();
        table.set(5, 140);
        table.set(0, 999);
        let here = Some(LocationProfile {
            location_modifier: 1.5,
            ..LocationProfile::default()
        });
        let view = WorldView::from_sources(&table, &here);
        assert_eq!(view.signal(Some(SignalId(5))), Some(140));
        assert_eq!(view.signal(Some(SignalId(6))), None);
        assert_eq!(view.signal(None), None);
        assert_eq!(view.location.map(|l| l.location_modifier), Some(1.5));
    }

    #[test]
    fn config_defaults_and_clamp() {
        let mut cfg: MarketConfig =
            serde_json::from_str(r#"{"trigger_signal": 0, "fluctuation": 3.0}"#).unwrap();
        let defects = cfg.normalize();
        assert_eq!(cfg.trigger_signal, None);
        assert_eq!(cfg.fluctuation, MAX_FLUCTUATION);
        assert_eq!(defects.len(), 1);
        assert_eq!(cfg.formula, PriceFormula::Product);
        assert_eq!(cfg.display.format, "({sign}{value}%)");
    }

    proptest! {
        #[test]
        fn normalized_elasticity_is_usable(s in proptest::num::f64::ANY, d in proptest::num::f64::ANY) {
            let mut p = ItemEconomicProfile::new(ItemId(1), 10).with_elasticity(s, d);
            p.normalize();
            prop_assert!(p.supply_elasticity.is_finite() && p.supply_elasticity >= 0.0);
            prop_assert!(p.demand_elasticity.is_finite() && p.demand_elasticity >= 0.0);
        }
    }
}
