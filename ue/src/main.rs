//! Mode 4 Sidelink UE Main Application
//!
//! Loads the sidelink configuration, builds the MAC and drives it through a
//! scripted run, reporting the emitted observations at the end.

mod config;
mod sim;

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use config::UeConfigFile;
use layers::mac::{Binder, Mode4Mac, SidelinkRng};
use sim::Simulation;

/// LTE Release-14 Mode 4 sidelink UE
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/sidelink.yml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run length in milliseconds
    #[arg(long, default_value = "10000")]
    horizon_ms: u64,

    /// Seed for the random streams; drawn from entropy when omitted
    #[arg(long)]
    seed: Option<u64>,

    /// Write the emitted signals as JSON lines to this file
    #[arg(long)]
    signal_trace: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!("Starting Mode 4 sidelink UE");
    info!("Configuration file: {}", args.config);

    let file = UeConfigFile::from_yaml_file(&args.config)?;
    let mac_config = file.to_mac_config()?;

    info!("Sidelink configuration:");
    info!("  Node id: {}", mac_config.node_id);
    info!("  Subchannels: {} x {} blocks", mac_config.num_subchannels, mac_config.subchannel_size);
    info!("  PSSCH MCS range: [{}, {}]", mac_config.min_mcs, mac_config.max_mcs);
    info!("  probResourceKeep: {}", mac_config.prob_resource_keep);
    info!("  CBR adaptation: {}", if mac_config.use_cbr { "on" } else { "off" });

    let rng = match args.seed {
        Some(seed) => SidelinkRng::seeded(seed),
        None => SidelinkRng::from_entropy(),
    };
    let seed = rng.seed();
    info!("  Seed: {}", seed);

    let binder = Binder::shared();
    let num_subchannels = mac_config.num_subchannels;
    let mac = Mode4Mac::new(mac_config, binder, rng)?;

    let mut simulation = Simulation::new(
        mac,
        seed.wrapping_add(1),
        num_subchannels,
        file.traffic.clone(),
        args.horizon_ms,
    );
    let report = simulation.run()?;

    info!("Run complete:");
    info!("  TTIs: {}", report.ttis);
    info!("  PDUs sent: {}", report.pdus_sent);
    info!("  Grants sent down: {}", report.grants_sent);
    info!("  SDUs delivered up: {}", report.sdus_delivered);

    let mut mac = simulation.into_mac();

    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for record in mac.signals().records() {
        *counts.entry(record.signal.name()).or_default() += 1;
    }
    info!("Observations:");
    for (name, count) in &counts {
        info!("  {}: {}", name, count);
    }

    if let Some(path) = &args.signal_trace {
        let mut out = std::fs::File::create(path)
            .with_context(|| format!("creating signal trace file {path}"))?;
        for record in mac.signals().records() {
            let line = serde_json::to_string(record).context("serializing signal record")?;
            writeln!(out, "{line}")?;
        }
        info!("Signal trace written to {}", path);
    }

    mac.shutdown();
    Ok(())
}
