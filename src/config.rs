use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::frame::{
    DepthThresholds, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH, DEFAULT_MAX_VALID_DEPTH_MM,
    DEFAULT_PRESENCE_PIXEL_THRESHOLD, MIN_VALID_DEPTH_MM,
};
use crate::ingest::SourceConfig;
use crate::transport::DEFAULT_DISCOVERY_PREFIX;

const DEFAULT_PRESENCE_TOPIC: &str = "kinect/room/presence";
const DEFAULT_DISTANCE_TOPIC: &str = "kinect/room/min_distance";
const DEFAULT_COUNT_TOPIC: &str = "kinect/room/person_count";
const DEFAULT_CYCLE_INTERVAL_MS: u64 = 500;
const DEFAULT_MAX_CONSECUTIVE_ACQUIRE_FAILURES: u32 = 10;
const DEFAULT_SOURCE_URI: &str = "stub://room";
const DEFAULT_SOURCE_FPS: u32 = 30;
const DEFAULT_DEVICE_NAME: &str = "Kinect Room";

const ENV_KEYS: [&str; 9] = [
    "PRESENCE_TOPIC",
    "DISTANCE_TOPIC",
    "COUNT_TOPIC",
    "MAX_DEPTH_MM",
    "PRESENCE_PIXEL_THRESHOLD",
    "CYCLE_INTERVAL_MS",
    "ACQUIRE_TIMEOUT_MS",
    "MAX_CONSECUTIVE_ACQUIRE_FAILURES",
    "DEPTH_SOURCE",
];

#[derive(Debug, Deserialize, Default)]
struct BridgeConfigFile {
    topics: Option<TopicsConfigFile>,
    thresholds: Option<ThresholdsConfigFile>,
    cycle: Option<CycleConfigFile>,
    source: Option<SourceConfigFile>,
    homeassistant: Option<HomeAssistantConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct TopicsConfigFile {
    presence: Option<String>,
    distance: Option<String>,
    count: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ThresholdsConfigFile {
    max_depth_mm: Option<f32>,
    presence_pixel_threshold: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CycleConfigFile {
    interval_ms: Option<u64>,
    acquire_timeout_ms: Option<u64>,
    max_consecutive_acquire_failures: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    depth_scale_mm: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct HomeAssistantConfigFile {
    availability: Option<bool>,
    discovery: Option<bool>,
    discovery_prefix: Option<String>,
    device_name: Option<String>,
}

/// The three output topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub presence: String,
    pub distance: String,
    pub count: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            presence: DEFAULT_PRESENCE_TOPIC.to_string(),
            distance: DEFAULT_DISTANCE_TOPIC.to_string(),
            count: DEFAULT_COUNT_TOPIC.to_string(),
        }
    }
}

impl Topics {
    /// `<parent of presence topic>/status`, e.g. `kinect/room/status`.
    pub fn availability(&self) -> String {
        match self.presence.rsplit_once('/') {
            Some((parent, _)) if !parent.is_empty() => format!("{}/status", parent),
            _ => format!("{}/status", self.presence),
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, topic) in [
            ("presence", &self.presence),
            ("distance", &self.distance),
            ("count", &self.count),
        ] {
            validate_topic(name, topic)?;
        }
        if self.presence == self.distance
            || self.presence == self.count
            || self.distance == self.count
        {
            return Err(anyhow!(
                "presence, distance and count topics must be distinct"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HomeAssistantSettings {
    pub availability: bool,
    pub discovery: bool,
    pub discovery_prefix: String,
    pub device_name: String,
}

impl Default for HomeAssistantSettings {
    fn default() -> Self {
        Self {
            availability: true,
            discovery: true,
            discovery_prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub topics: Topics,
    pub thresholds: DepthThresholds,
    pub cycle_interval: Duration,
    pub max_consecutive_acquire_failures: u32,
    pub source: SourceConfig,
    pub homeassistant: HomeAssistantSettings,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        // An empty file yields exactly the built-in defaults.
        Self::from_file(BridgeConfigFile::default())
    }
}

impl BridgeConfig {
    /// Defaults, then the file named by `DEPTH_PRESENCE_CONFIG`, then the
    /// environment, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DEPTH_PRESENCE_CONFIG").ok();
        let file_cfg = match config_path.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Names of the environment variables `load` consults besides
    /// `DEPTH_PRESENCE_CONFIG`.
    pub fn env_keys() -> &'static [&'static str] {
        &ENV_KEYS
    }

    fn from_file(file: BridgeConfigFile) -> Self {
        let topics_file = file.topics.unwrap_or_default();
        let topics = Topics {
            presence: topics_file
                .presence
                .unwrap_or_else(|| DEFAULT_PRESENCE_TOPIC.to_string()),
            distance: topics_file
                .distance
                .unwrap_or_else(|| DEFAULT_DISTANCE_TOPIC.to_string()),
            count: topics_file
                .count
                .unwrap_or_else(|| DEFAULT_COUNT_TOPIC.to_string()),
        };

        let thresholds_file = file.thresholds.unwrap_or_default();
        let thresholds = DepthThresholds::new(
            thresholds_file
                .max_depth_mm
                .unwrap_or(DEFAULT_MAX_VALID_DEPTH_MM),
            thresholds_file
                .presence_pixel_threshold
                .unwrap_or(DEFAULT_PRESENCE_PIXEL_THRESHOLD),
        );

        let cycle = file.cycle.unwrap_or_default();
        let source_file = file.source.unwrap_or_default();
        let source = SourceConfig {
            uri: source_file
                .uri
                .unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
            width: source_file.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
            depth_scale_mm: source_file.depth_scale_mm.unwrap_or(1.0),
            // 0 disables the timeout.
            acquire_timeout: cycle
                .acquire_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        };

        let ha_file = file.homeassistant.unwrap_or_default();
        let ha_default = HomeAssistantSettings::default();
        let homeassistant = HomeAssistantSettings {
            availability: ha_file.availability.unwrap_or(ha_default.availability),
            discovery: ha_file.discovery.unwrap_or(ha_default.discovery),
            discovery_prefix: ha_file
                .discovery_prefix
                .unwrap_or(ha_default.discovery_prefix),
            device_name: ha_file.device_name.unwrap_or(ha_default.device_name),
        };

        Self {
            topics,
            thresholds,
            cycle_interval: Duration::from_millis(
                cycle.interval_ms.unwrap_or(DEFAULT_CYCLE_INTERVAL_MS),
            ),
            max_consecutive_acquire_failures: cycle
                .max_consecutive_acquire_failures
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_ACQUIRE_FAILURES),
            source,
            homeassistant,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(topic) = env_string("PRESENCE_TOPIC") {
            self.topics.presence = topic;
        }
        if let Some(topic) = env_string("DISTANCE_TOPIC") {
            self.topics.distance = topic;
        }
        if let Some(topic) = env_string("COUNT_TOPIC") {
            self.topics.count = topic;
        }
        if let Some(max) = env_parse::<f32>("MAX_DEPTH_MM", "a number of millimetres")? {
            self.thresholds.max_valid_depth_mm = max;
        }
        if let Some(threshold) =
            env_parse::<u64>("PRESENCE_PIXEL_THRESHOLD", "a non-negative pixel count")?
        {
            self.thresholds.presence_pixel_threshold = threshold;
        }
        if let Some(ms) = env_parse::<u64>("CYCLE_INTERVAL_MS", "an integer number of milliseconds")? {
            self.cycle_interval = Duration::from_millis(ms);
        }
        if let Some(ms) =
            env_parse::<u64>("ACQUIRE_TIMEOUT_MS", "an integer number of milliseconds")?
        {
            // 0 disables the timeout.
            self.source.acquire_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(limit) =
            env_parse::<u32>("MAX_CONSECUTIVE_ACQUIRE_FAILURES", "a positive integer")?
        {
            self.max_consecutive_acquire_failures = limit;
        }
        if let Some(uri) = env_string("DEPTH_SOURCE") {
            self.source.uri = uri;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let max = self.thresholds.max_valid_depth_mm;
        if !max.is_finite() || max <= MIN_VALID_DEPTH_MM {
            return Err(anyhow!(
                "max depth must be a finite value above {} mm (got {})",
                MIN_VALID_DEPTH_MM,
                max
            ));
        }
        if self.cycle_interval.is_zero() {
            return Err(anyhow!("cycle interval must be greater than zero"));
        }
        if self.max_consecutive_acquire_failures == 0 {
            return Err(anyhow!(
                "max consecutive acquire failures must be greater than zero"
            ));
        }
        self.topics.validate()?;

        if self.source.uri.trim().is_empty() {
            return Err(anyhow!("depth source must not be empty"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!(
                "frame geometry must be non-zero (got {}x{})",
                self.source.width,
                self.source.height
            ));
        }
        if !self.source.depth_scale_mm.is_finite() || self.source.depth_scale_mm <= 0.0 {
            return Err(anyhow!("depth scale must be a positive number of mm per unit"));
        }
        if self.homeassistant.discovery && self.homeassistant.discovery_prefix.trim().is_empty() {
            return Err(anyhow!("discovery prefix must not be empty"));
        }
        Ok(())
    }
}

fn validate_topic(name: &str, topic: &str) -> Result<()> {
    if topic.trim().is_empty() {
        return Err(anyhow!("{} topic must not be empty", name));
    }
    if topic.contains(['+', '#']) {
        return Err(anyhow!(
            "{} topic '{}' must not contain MQTT wildcards",
            name,
            topic
        ));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<BridgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str, expected: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {} (got '{}')", key, expected, value)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_room_deployment() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.thresholds.max_valid_depth_mm, 3800.0);
        assert_eq!(cfg.thresholds.presence_pixel_threshold, 5000);
        assert_eq!(cfg.cycle_interval, Duration::from_millis(500));
        assert_eq!(cfg.topics.presence, "kinect/room/presence");
        assert_eq!(cfg.max_consecutive_acquire_failures, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn availability_topic_sits_next_to_presence() {
        let topics = Topics::default();
        assert_eq!(topics.availability(), "kinect/room/status");
        let flat = Topics {
            presence: "presence".to_string(),
            ..Topics::default()
        };
        assert_eq!(flat.availability(), "presence/status");
    }

    #[test]
    fn rejects_wildcards_and_duplicate_topics() {
        let mut cfg = BridgeConfig::default();
        cfg.topics.count = "kinect/+/count".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = BridgeConfig::default();
        cfg.topics.count = cfg.topics.distance.clone();
        assert!(cfg.validate().unwrap_err().to_string().contains("distinct"));
    }

    #[test]
    fn rejects_degenerate_thresholds_and_cadence() {
        let mut cfg = BridgeConfig::default();
        cfg.thresholds.max_valid_depth_mm = 1.0;
        assert!(cfg.validate().is_err());

        cfg.thresholds.max_valid_depth_mm = f32::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = BridgeConfig::default();
        cfg.cycle_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_nested_toml() {
        let raw = r#"
            [topics]
            presence = "office/presence"

            [cycle]
            interval_ms = 250
            acquire_timeout_ms = 2000
        "#;
        let file: BridgeConfigFile = toml::from_str(raw).unwrap();
        let cfg = BridgeConfig::from_file(file);
        assert_eq!(cfg.topics.presence, "office/presence");
        assert_eq!(cfg.topics.distance, "kinect/room/min_distance");
        assert_eq!(cfg.cycle_interval, Duration::from_millis(250));
        assert_eq!(cfg.source.acquire_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn zero_acquire_timeout_in_file_disables_timeout() {
        let file: BridgeConfigFile = toml::from_str("[cycle]\nacquire_timeout_ms = 0\n").unwrap();
        let cfg = BridgeConfig::from_file(file);
        assert_eq!(cfg.source.acquire_timeout, None);
        assert!(cfg.validate().is_ok());
    }
}
