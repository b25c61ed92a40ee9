//! depth_presence_bridge - Publish depth camera presence to MQTT.
//!
//! This daemon:
//! 1. Samples one depth frame per cycle from the configured source
//! 2. Publishes minimum distance and person count every cycle
//! 3. Publishes retained presence (ON/OFF) whenever it changes
//! 4. Announces Home Assistant discovery and online/offline availability
//!
//! Thresholds, topics and the source come from `DEPTH_PRESENCE_CONFIG` and the
//! environment; broker settings from the flags below.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use depth_presence::transport::{parse_mqtt_endpoint, LogPublisher, MqttPublisher, MqttSettings};
use depth_presence::ui::{Ui, UiMode};
use depth_presence::{open_source, BridgeConfig, BridgeLoop, BridgeOptions, Publisher, TlsMaterials};

const BRIDGE_NAME: &str = "depth_presence_bridge";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Publish depth camera presence, distance and count to MQTT"
)]
struct Args {
    /// MQTT broker address (host:port, mqtt://, mqtts://).
    #[arg(long, env = "MQTT_BROKER_ADDR", default_value = "127.0.0.1:1883")]
    mqtt_broker_addr: String,

    /// MQTT username for authentication.
    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    /// MQTT password for authentication.
    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    mqtt_password: Option<String>,

    /// Enable TLS for MQTT (implied by mqtts://).
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    /// Path to a PEM-encoded CA certificate to trust for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CA_PATH")]
    mqtt_tls_ca_path: Option<PathBuf>,

    /// Path to a PEM-encoded client certificate for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_CERT_PATH")]
    mqtt_tls_client_cert_path: Option<PathBuf>,

    /// Path to a PEM-encoded client private key for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_KEY_PATH")]
    mqtt_tls_client_key_path: Option<PathBuf>,

    /// MQTT client identifier.
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = BRIDGE_NAME)]
    mqtt_client_id: String,

    /// Seconds to wait for the broker to accept the session.
    #[arg(long, env = "MQTT_CONNECT_TIMEOUT", default_value_t = 10)]
    mqtt_connect_timeout: u64,

    /// Home Assistant MQTT discovery prefix (overrides the config file).
    #[arg(long, env = "HA_DISCOVERY_PREFIX")]
    ha_discovery_prefix: Option<String>,

    /// Disable Home Assistant discovery.
    #[arg(long, env = "NO_DISCOVERY")]
    no_discovery: bool,

    /// Disable the online/offline availability topic.
    #[arg(long, env = "NO_AVAILABILITY")]
    no_availability: bool,

    /// Depth source URI (overrides DEPTH_SOURCE and the config file).
    #[arg(long)]
    source: Option<String>,

    /// Log messages instead of sending them to a broker.
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    /// Seconds between health summaries.
    #[arg(long, env = "HEALTH_INTERVAL", default_value_t = 30)]
    health_interval: u64,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::detect(args.ui);

    let cfg = ui.step("Load configuration", || load_config(&args))?;
    log::info!(
        "topics: presence={} distance={} count={}",
        cfg.topics.presence,
        cfg.topics.distance,
        cfg.topics.count
    );

    let source = {
        let stage = ui.stage("Open depth source");
        match open_source(cfg.source.clone()) {
            Ok(source) => {
                stage.finish_with(&cfg.source.uri);
                source
            }
            Err(err) => {
                stage.fail(&err);
                return Err(err);
            }
        }
    };

    let publisher: Box<dyn Publisher + Send> = if args.dry_run {
        log::warn!("dry run: nothing is sent to {}", args.mqtt_broker_addr);
        Box::new(LogPublisher::new())
    } else {
        let mut mqtt = ui.step("Prepare MQTT client", || {
            mqtt_settings(&args, &cfg).map(MqttPublisher::new)
        })?;
        // The bridge's own connect is then a no-op.
        ui.step(&format!("Connect MQTT broker {}", args.mqtt_broker_addr), || {
            mqtt.connect()
        })?;
        Box::new(mqtt)
    };

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let mut options = BridgeOptions::from_config(&cfg);
    options.health_interval = Duration::from_secs(args.health_interval.max(1));

    log::info!("{} starting (Ctrl-C to stop)", BRIDGE_NAME);
    let mut bridge = BridgeLoop::new(source, publisher, options);
    let stats = bridge.run(&stop)?;
    log::info!(
        "{} exited cleanly after {} cycles ({} presence changes)",
        BRIDGE_NAME,
        stats.cycles,
        stats.transitions
    );
    Ok(())
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut cfg = BridgeConfig::load()?;
    if let Some(source) = &args.source {
        cfg.source.uri = source.clone();
    }
    if let Some(prefix) = &args.ha_discovery_prefix {
        cfg.homeassistant.discovery_prefix = prefix.clone();
    }
    if args.no_discovery {
        cfg.homeassistant.discovery = false;
    }
    if args.no_availability {
        cfg.homeassistant.availability = false;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn mqtt_settings(args: &Args, cfg: &BridgeConfig) -> Result<MqttSettings> {
    let endpoint = parse_mqtt_endpoint(&args.mqtt_broker_addr, args.mqtt_use_tls)?;
    let tls = TlsMaterials::load(
        args.mqtt_tls_ca_path.as_ref(),
        args.mqtt_tls_client_cert_path.as_ref(),
        args.mqtt_tls_client_key_path.as_ref(),
    )?;

    let mut settings = MqttSettings::new(endpoint, &args.mqtt_client_id);
    settings.tls = tls;
    settings.username = args.mqtt_username.clone();
    settings.password = args.mqtt_password.clone();
    settings.connect_timeout = Duration::from_secs(args.mqtt_connect_timeout.max(1));
    settings.availability_topic = cfg
        .homeassistant
        .availability
        .then(|| cfg.topics.availability());
    Ok(settings)
}
