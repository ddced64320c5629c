#![deny(warnings)]

//! Headless CLI: load a market definition, apply world signals, print prices.

use anyhow::{bail, Context, Result};
use market_core::{ItemId, SignalTable, WorldView};
use market_runtime::{Market, ShopMode};
use market_tags::load_market;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_MARKET: &str = "assets/markets/harbor.yaml";

#[derive(Debug, Default)]
struct Args {
    market: Option<PathBuf>,
    location: Option<String>,
    signals: Vec<(u32, i64)>,
    event: Option<f64>,
    seed: Option<u64>,
    load: Option<PathBuf>,
    save: Option<PathBuf>,
    shop: bool,
    version: bool,
}

fn parse_signal(raw: &str) -> Option<(u32, i64)> {
    let (id, value) = raw.split_once('=')?;
    Some((id.trim().parse().ok()?, value.trim().parse().ok()?))
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--market" => args.market = it.next().map(PathBuf::from),
            "--location" => args.location = it.next(),
            "--set" => {
                let raw = it.next().context("--set expects <variable>=<value>")?;
                let pair = parse_signal(&raw)
                    .with_context(|| format!("invalid --set argument: {raw}"))?;
                args.signals.push(pair);
            }
            "--event" => {
                let raw = it.next().context("--event expects a modifier")?;
                args.event = Some(raw.parse().with_context(|| format!("invalid modifier: {raw}"))?);
            }
            "--seed" => args.seed = it.next().and_then(|s| s.parse().ok()),
            "--load" => args.load = it.next().map(PathBuf::from),
            "--save" => args.save = it.next().map(PathBuf::from),
            "--shop" => args.shop = true,
            "--version" => args.version = true,
            other => warn!(arg = other, "ignoring unknown argument"),
        }
    }
    Ok(args)
}

/// `RUST_LOG` directives when present and valid, `info` otherwise.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn main() -> Result<()> {
    // Logging setup
    let filter = log_filter(std::env::var("RUST_LOG").ok().as_deref());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = parse_args()?;
    if args.version {
        println!("market {} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_SHA"));
        return Ok(());
    }
    info!(?args, "starting CLI");

    let path = args
        .market
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MARKET));
    let loaded = load_market(&path).with_context(|| format!("loading {}", path.display()))?;
    let location = match &args.location {
        Some(key) => match loaded.locations.get(key) {
            Some(profile) => Some(profile.clone()),
            None => bail!("unknown location: {key}"),
        },
        None => None,
    };
    let names = loaded.names.clone();
    let mut market = match args.seed {
        Some(seed) => Market::seeded(loaded.catalog, loaded.config, seed),
        None => Market::new(loaded.catalog, loaded.config),
    };

    let mut signals = SignalTable::new();
    for (id, value) in &args.signals {
        signals.set(*id, *value);
    }
    let mut world = WorldView::new(&signals).at(location.as_ref());
    if args.shop {
        world = world.in_shop();
    }

    match &args.load {
        Some(save) => {
            let blob = std::fs::read_to_string(save)
                .with_context(|| format!("reading {}", save.display()))?;
            market.import_state(&blob, &world);
        }
        None => market.initialize(&world),
    }
    if let Some(modifier) = args.event {
        market.set_event_modifier(modifier, &world)?;
    }
    let refreshed = market.on_world_tick(&world);

    let ids: Vec<ItemId> = market.catalog().keys().copied().collect();
    println!(
        "Market OK | items: {} | event x{} | refreshed: {}",
        ids.len(),
        market.event_modifier(),
        refreshed
    );
    for id in ids {
        let base = market.catalog()[&id].base_price;
        let buy = market.get_price(id, &world);
        let sell = market.get_sell_price(id, &world);
        let label = market
            .fluctuation_label(id, &world, ShopMode::Buy)
            .map(|l| l.text)
            .unwrap_or_default();
        let name = names.get(&id).map(String::as_str).unwrap_or("?");
        println!(
            "{:>4} {:<16} base {:>6} | buy {:>6} | sell {:>6} {}",
            id.0, name, base, buy, sell, label
        );
    }

    if let Some(save) = &args.save {
        let blob = market.export_state()?;
        std::fs::write(save, blob).with_context(|| format!("writing {}", save.display()))?;
        info!(path = %save.display(), "market state saved");
    }
    Ok(())
}
