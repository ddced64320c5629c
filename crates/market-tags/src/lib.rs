#![deny(warnings)]

//! Load-phase adapter from host content definitions to economic profiles.
//!
//! Item and location definitions carry free-text notes with `<Key: value>`
//! tags. They are parsed once, here, into structured profiles; the pricing
//! core never sees a tag. Malformed values are reported as defects and the
//! documented defaults are used instead.

use market_core::{
    build_catalog, Catalog, ConfigDefect, ItemEconomicProfile, ItemId, LocationId,
    LocationProfile, MarketConfig, SignalId,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TagError {
    #[error("invalid market definition: {0}")]
    InvalidDefinition(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TagError {
    fn from(e: std::io::Error) -> Self {
        TagError::Io(e.to_string())
    }
}

impl From<serde_yaml::Error> for TagError {
    fn from(e: serde_yaml::Error) -> Self {
        TagError::InvalidDefinition(e.to_string())
    }
}

/// Tags found in one note, keyed by lowercased, space-normalized name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteTags {
    tags: Vec<(String, String)>,
}

impl NoteTags {
    /// Last value given for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = normalize_key(key);
        self.tags
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Parse `key`'s value; a malformed value is recorded and skipped.
    fn parse<T: FromStr>(&self, key: &str, defects: &mut Vec<ConfigDefect>) -> Option<T> {
        let raw = self.get(key)?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                defects.push(ConfigDefect::MalformedTag {
                    tag: key.to_string(),
                    raw: raw.to_string(),
                });
                None
            }
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Collect every `<Key: value>` tag in `note`. Tags without a colon are
/// ignored.
///
/// Example:
/// let tags = parse_note("<Supply Variable: 5>");
/// assert_eq!(tags.get("supply variable"), Some("5"));
pub fn parse_note(note: &str) -> NoteTags {
    let mut tags = Vec::new();
    let mut rest = note;
    while let Some(open) = rest.find('<') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            break;
        };
        let body = &after[..close];
        if let Some((key, value)) = body.split_once(':') {
            let key = normalize_key(key);
            if !key.is_empty() {
                tags.push((key, value.trim().to_string()));
            }
        }
        rest = &after[close + 1..];
    }
    NoteTags { tags }
}

/// Build an item's profile from its base price and note tags.
pub fn item_profile(id: u32, price: u32, note: &str) -> (ItemEconomicProfile, Vec<ConfigDefect>) {
    let tags = parse_note(note);
    let mut defects = Vec::new();
    let mut profile = ItemEconomicProfile::new(ItemId(id), price);
    profile.supply_signal = tags
        .parse::<u32>("Supply Variable", &mut defects)
        .and_then(SignalId::new);
    profile.demand_signal = tags
        .parse::<u32>("Demand Variable", &mut defects)
        .and_then(SignalId::new);
    if let Some(e) = tags.parse::<f64>("Supply Elasticity", &mut defects) {
        profile.supply_elasticity = e;
    }
    if let Some(e) = tags.parse::<f64>("Demand Elasticity", &mut defects) {
        profile.demand_elasticity = e;
    }
    defects.extend(profile.normalize());
    (profile, defects)
}

/// Build a location's profile from its note tags. A note without tags yields
/// the neutral profile.
pub fn location_profile(note: &str) -> (LocationProfile, Vec<ConfigDefect>) {
    let tags = parse_note(note);
    let mut defects = Vec::new();
    let mut profile = LocationProfile {
        location_id: tags.parse::<u32>("Location ID", &mut defects).map(LocationId),
        ..LocationProfile::default()
    };
    if let Some(m) = tags.parse::<f64>("Location Modifier", &mut defects) {
        profile.location_modifier = m;
    }
    for (key, raw) in tags.iter() {
        let Some((item, kind)) = item_offset_key(key) else {
            continue;
        };
        let Ok(offset) = raw.parse::<i64>() else {
            defects.push(ConfigDefect::MalformedTag {
                tag: key.to_string(),
                raw: raw.to_string(),
            });
            continue;
        };
        let target = match kind {
            OffsetKind::Supply => &mut profile.supply_offsets,
            OffsetKind::Demand => &mut profile.demand_offsets,
        };
        target.insert(item, offset);
    }
    defects.extend(profile.normalize());
    (profile, defects)
}

enum OffsetKind {
    Supply,
    Demand,
}

/// Recognize a normalized `item <id> supply|demand` key.
fn item_offset_key(key: &str) -> Option<(ItemId, OffsetKind)> {
    let mut words = key.split(' ');
    if words.next()? != "item" {
        return None;
    }
    let id = words.next()?.parse::<u32>().ok()?;
    let kind = match words.next()? {
        "supply" => OffsetKind::Supply,
        "demand" => OffsetKind::Demand,
        _ => return None,
    };
    if words.next().is_some() {
        return None;
    }
    Some((ItemId(id), kind))
}

/// An item as the host defines it.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemDefinition {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: u32,
    #[serde(default)]
    pub note: String,
}

/// A place as the host defines it.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationDefinition {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub note: String,
}

/// A whole market as written in a definition file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketDefinition {
    #[serde(default)]
    pub config: MarketConfig,
    #[serde(default)]
    pub items: Vec<ItemDefinition>,
    #[serde(default)]
    pub locations: Vec<LocationDefinition>,
}

/// Structured result of loading a market definition.
#[derive(Debug, Clone)]
pub struct LoadedMarket {
    pub config: MarketConfig,
    pub catalog: Catalog,
    pub names: BTreeMap<ItemId, String>,
    pub locations: BTreeMap<String, LocationProfile>,
    pub defects: Vec<ConfigDefect>,
}

impl MarketDefinition {
    pub fn from_yaml_str(text: &str) -> Result<Self, TagError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, TagError> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Parse every note into profiles. Never fails; defects are collected and
    /// logged.
    pub fn load(self) -> LoadedMarket {
        let mut config = self.config;
        let mut defects = config.normalize();
        let mut names = BTreeMap::new();
        let mut profiles = Vec::with_capacity(self.items.len());
        for item in self.items {
            let (profile, item_defects) = item_profile(item.id, item.price, &item.note);
            defects.extend(item_defects);
            names.insert(profile.item_id, item.name);
            profiles.push(profile);
        }
        let (catalog, catalog_defects) = build_catalog(profiles);
        defects.extend(catalog_defects);
        let mut locations = BTreeMap::new();
        for loc in self.locations {
            let (profile, loc_defects) = location_profile(&loc.note);
            defects.extend(loc_defects);
            locations.insert(loc.key, profile);
        }
        for d in &defects {
            warn!(defect = %d, "market definition defect");
        }
        info!(
            items = catalog.len(),
            locations = locations.len(),
            defects = defects.len(),
            "market definition loaded"
        );
        LoadedMarket {
            config,
            catalog,
            names,
            locations,
            defects,
        }
    }
}

/// Read and load a definition file in one step.
pub fn load_market<P: AsRef<Path>>(path: P) -> Result<LoadedMarket, TagError> {
    Ok(MarketDefinition::from_path(path)?.load())
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::{PriceFormula, DEFAULT_ELASTICITY};
    use std::path::PathBuf;

    #[test]
    fn parses_tags_case_and_space_insensitive() {
        let tags = parse_note("Old stock.\n<supply   VARIABLE : 5 >\n<Broken>\n<Demand Variable:7>");
        assert_eq!(tags.get("Supply Variable"), Some("5"));
        assert_eq!(tags.get("demand variable"), Some("7"));
        assert_eq!(tags.iter().count(), 2);
    }

    #[test]
    fn unterminated_tag_is_ignored() {
        let tags = parse_note("<Supply Variable: 5");
        assert!(tags.is_empty());
    }

    #[test]
    fn item_tags_become_profile() {
        let (p, defects) = item_profile(
            8,
            250,
            "<Supply Variable: 3>\n<Demand Variable: 4>\n<Supply Elasticity: 0.8>",
        );
        assert!(defects.is_empty());
        assert_eq!(p.item_id, ItemId(8));
        assert_eq!(p.base_price, 250);
        assert_eq!(p.supply_signal, Some(SignalId(3)));
        assert_eq!(p.demand_signal, Some(SignalId(4)));
        assert_eq!(p.supply_elasticity, 0.8);
        assert_eq!(p.demand_elasticity, DEFAULT_ELASTICITY);
    }

    #[test]
    fn malformed_item_tags_use_defaults() {
        let (p, defects) = item_profile(
            2,
            10,
            "<Supply Variable: lots>\n<Demand Variable: 0>\n<Demand Elasticity: -1>",
        );
        assert_eq!(p.supply_signal, None);
        assert_eq!(p.demand_signal, None);
        assert_eq!(p.demand_elasticity, DEFAULT_ELASTICITY);
        assert_eq!(defects.len(), 2);
        assert!(matches!(&defects[0], ConfigDefect::MalformedTag { raw, .. } if raw == "lots"));
    }

    #[test]
    fn location_tags_become_profile() {
        let (loc, defects) = location_profile(
            "<Location ID: 4>\n<Location Modifier: 1.2>\n<Item 7 Supply: -15>\n<item 7 demand: 30>\n<Item x Supply: 3>\n<Item 9 Demand: high>",
        );
        assert_eq!(loc.location_id, Some(LocationId(4)));
        assert_eq!(loc.location_modifier, 1.2);
        assert_eq!(loc.supply_offset(ItemId(7)), -15);
        assert_eq!(loc.demand_offset(ItemId(7)), 30);
        assert_eq!(loc.demand_offset(ItemId(9)), 0);
        assert_eq!(defects.len(), 1);
    }

    #[test]
    fn untagged_location_is_neutral() {
        let (loc, defects) = location_profile("A quiet village.");
        assert_eq!(loc, LocationProfile::default());
        assert!(defects.is_empty());
    }

    #[test]
    fn yaml_definition_loads_with_defaults() {
        let def = MarketDefinition::from_yaml_str(
            "items:\n  - id: 1\n    price: 10\n  - id: 2\n    price: 20\n    note: '<Supply Elasticity: abc>'\n",
        )
        .unwrap();
        let market = def.load();
        assert_eq!(market.config, MarketConfig::default());
        assert_eq!(market.catalog.len(), 2);
        assert_eq!(market.catalog[&ItemId(2)].supply_elasticity, DEFAULT_ELASTICITY);
        assert_eq!(market.defects.len(), 1);
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        assert!(matches!(
            MarketDefinition::from_yaml_str("items: 5"),
            Err(TagError::InvalidDefinition(_))
        ));
        assert!(matches!(
            load_market("/nonexistent/market.yaml"),
            Err(TagError::Io(_))
        ));
    }

    #[test]
    fn bundled_harbor_market_loads() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../assets/markets/harbor.yaml");
        let market = load_market(path).unwrap();
        assert!(market.defects.is_empty(), "{:?}", market.defects);
        assert_eq!(market.config.trigger_signal, Some(SignalId(20)));
        assert_eq!(market.config.formula, PriceFormula::Product);
        assert_eq!(market.catalog.len(), 4);
        assert!(!market.catalog[&ItemId(4)].is_tradeable());
        assert_eq!(market.names[&ItemId(2)], "Iron Ore");
        let harbor = &market.locations["harbor"];
        assert_eq!(harbor.location_modifier, 0.9);
        assert_eq!(harbor.supply_offset(ItemId(2)), 40);
        assert_eq!(harbor.demand_offset(ItemId(3)), -20);
    }
}
