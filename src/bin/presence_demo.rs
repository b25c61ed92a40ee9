//! presence_demo - Run the bridge against a synthetic room.
//!
//! No camera or broker needed: a `stub://` scene alternates between empty and
//! occupied, and messages are collected in memory. Presence changes are
//! printed when the run ends.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use depth_presence::ingest::SyntheticDepthSource;
use depth_presence::ui::{Ui, UiMode};
use depth_presence::{BridgeConfig, BridgeLoop, BridgeOptions, MemoryPublisher, SourceConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the presence bridge on a synthetic depth scene")]
struct Args {
    /// How long to run.
    #[arg(long, default_value_t = 10)]
    seconds: u64,

    /// Cycle interval in milliseconds.
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Seed for the scene noise; random when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::detect(args.ui);

    let interval = Duration::from_millis(args.interval_ms.max(1));
    let cycles = (args.seconds.saturating_mul(1000) / interval.as_millis() as u64).max(1);

    let cfg = BridgeConfig::default();
    let source_config = SourceConfig {
        uri: "stub://demo_room".to_string(),
        ..cfg.source.clone()
    };
    let source = match args.seed {
        Some(seed) => SyntheticDepthSource::with_seed(source_config, seed),
        None => SyntheticDepthSource::new(source_config),
    };

    let mut options = BridgeOptions::from_config(&cfg);
    options.cycle_interval = interval;
    options.max_cycles = Some(cycles);
    options.health_interval = Duration::from_secs(2);

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let mut bridge = BridgeLoop::new(source, MemoryPublisher::new(), options);
    let stats = {
        let stage = ui.stage(&format!("Run {} cycles every {:?}", cycles, interval));
        match bridge.run(&stop) {
            Ok(stats) => {
                stage.finish_with(&format!("{} presence changes", stats.transitions));
                stats
            }
            Err(err) => {
                stage.fail(&err);
                return Err(err.into());
            }
        }
    };

    let (_, publisher) = bridge.into_parts();
    let presence: Vec<&str> = publisher.payloads(&cfg.topics.presence);
    println!("presence messages: {}", presence.join(" -> "));
    println!(
        "cycles={} frames={} distance/count messages={}",
        stats.cycles,
        stats.frames_processed,
        publisher.payloads(&cfg.topics.distance).len()
            + publisher.payloads(&cfg.topics.count).len()
    );
    let discovery = publisher
        .messages()
        .iter()
        .filter(|m| m.topic.ends_with("/config"))
        .count();
    println!("discovery configs: {}", discovery);
    Ok(())
}
