//! Home Assistant MQTT discovery.
//!
//! Three entities are announced under one device: an occupancy binary sensor
//! on the presence topic, a distance sensor in millimetres, and the person
//! count sensor. Configs are retained so Home Assistant picks them up after
//! its own restarts.

use serde::Serialize;

use super::mqtt::{PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
use super::publisher::Publisher;
use crate::config::Topics;
use crate::error::PublishError;
use crate::presence::{PAYLOAD_OFF, PAYLOAD_ON};

pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

/// Home Assistant MQTT Discovery config for a sensor.
#[derive(Serialize)]
struct HaSensorConfig {
    name: String,
    unique_id: String,
    state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<String>,
    state_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
    #[serde(flatten)]
    availability: Option<HaAvailability>,
    device: HaDeviceInfo,
}

/// Home Assistant MQTT Discovery config for a binary sensor.
#[derive(Serialize)]
struct HaBinarySensorConfig {
    name: String,
    unique_id: String,
    state_topic: String,
    device_class: String,
    payload_on: String,
    payload_off: String,
    #[serde(flatten)]
    availability: Option<HaAvailability>,
    device: HaDeviceInfo,
}

#[derive(Clone, Serialize)]
struct HaAvailability {
    availability_topic: String,
    payload_available: String,
    payload_not_available: String,
}

/// Home Assistant device info for entity grouping.
#[derive(Clone, Serialize)]
struct HaDeviceInfo {
    identifiers: Vec<String>,
    name: String,
    manufacturer: String,
    model: String,
    sw_version: String,
}

/// Where and as what the bridge announces itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub prefix: String,
    pub device_id: String,
    pub device_name: String,
}

impl DiscoverySettings {
    pub fn new(prefix: &str, device_name: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            device_id: sanitize_for_id(device_name),
            device_name: device_name.to_string(),
        }
    }
}

/// Publish the discovery configs for the three bridge entities.
///
/// Returns the number of configs published.
pub fn publish_discovery<P: Publisher + ?Sized>(
    publisher: &mut P,
    settings: &DiscoverySettings,
    topics: &Topics,
    availability_topic: Option<&str>,
) -> Result<usize, PublishError> {
    let device = HaDeviceInfo {
        identifiers: vec![settings.device_id.clone()],
        name: settings.device_name.clone(),
        manufacturer: "depth-presence".to_string(),
        model: "Depth camera presence bridge".to_string(),
        sw_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let availability = availability_topic.map(|topic| HaAvailability {
        availability_topic: topic.to_string(),
        payload_available: PAYLOAD_ONLINE.to_string(),
        payload_not_available: PAYLOAD_OFFLINE.to_string(),
    });
    let id = &settings.device_id;

    let presence = HaBinarySensorConfig {
        name: format!("{} Presence", settings.device_name),
        unique_id: format!("{}_presence", id),
        state_topic: topics.presence.clone(),
        device_class: "occupancy".to_string(),
        payload_on: PAYLOAD_ON.to_string(),
        payload_off: PAYLOAD_OFF.to_string(),
        availability: availability.clone(),
        device: device.clone(),
    };
    let distance = HaSensorConfig {
        name: format!("{} Minimum Distance", settings.device_name),
        unique_id: format!("{}_min_distance", id),
        state_topic: topics.distance.clone(),
        unit_of_measurement: Some("mm".to_string()),
        device_class: Some("distance".to_string()),
        state_class: "measurement".to_string(),
        icon: None,
        availability: availability.clone(),
        device: device.clone(),
    };
    let count = HaSensorConfig {
        name: format!("{} Person Count", settings.device_name),
        unique_id: format!("{}_person_count", id),
        state_topic: topics.count.clone(),
        unit_of_measurement: None,
        device_class: None,
        state_class: "measurement".to_string(),
        icon: Some("mdi:account".to_string()),
        availability,
        device,
    };

    let configs = [
        ("binary_sensor", "presence", to_json(&presence)?),
        ("sensor", "min_distance", to_json(&distance)?),
        ("sensor", "person_count", to_json(&count)?),
    ];
    for (component, object, payload) in &configs {
        let topic = format!("{}/{}/{}/{}/config", settings.prefix, component, id, object);
        publisher.publish(&topic, payload, true)?;
    }
    log::info!(
        "Published HA discovery for {} under {}/+/{}",
        settings.device_name,
        settings.prefix,
        id
    );
    Ok(configs.len())
}

fn to_json<T: Serialize>(config: &T) -> Result<String, PublishError> {
    serde_json::to_string(config)
        .map_err(|err| PublishError::transport("discovery", format!("encode config: {}", err)))
}

fn sanitize_for_id(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::publisher::MemoryPublisher;

    fn topics() -> Topics {
        Topics::default()
    }

    #[test]
    fn sanitize_for_id_replaces_special_chars() {
        assert_eq!(sanitize_for_id("Living Room"), "living_room");
        assert_eq!(sanitize_for_id("kinect-2"), "kinect_2");
    }

    #[test]
    fn publishes_three_retained_configs() {
        let mut publisher = MemoryPublisher::new();
        publisher.connect().unwrap();
        let settings = DiscoverySettings::new("homeassistant/", "Kinect Room");

        let published =
            publish_discovery(&mut publisher, &settings, &topics(), Some("kinect/room/status"))
                .unwrap();
        assert_eq!(published, 3);

        let messages = publisher.messages();
        assert_eq!(
            messages[0].topic,
            "homeassistant/binary_sensor/kinect_room/presence/config"
        );
        assert!(messages.iter().all(|m| m.retained));

        let presence: serde_json::Value = serde_json::from_str(&messages[0].payload).unwrap();
        assert_eq!(presence["device_class"], "occupancy");
        assert_eq!(presence["state_topic"], "kinect/room/presence");
        assert_eq!(presence["availability_topic"], "kinect/room/status");

        let distance: serde_json::Value = serde_json::from_str(&messages[1].payload).unwrap();
        assert_eq!(distance["unit_of_measurement"], "mm");
        assert_eq!(distance["device_class"], "distance");
    }

    #[test]
    fn availability_is_omitted_when_disabled() {
        let mut publisher = MemoryPublisher::new();
        publisher.connect().unwrap();
        let settings = DiscoverySettings::new(DEFAULT_DISCOVERY_PREFIX, "kinect");
        publish_discovery(&mut publisher, &settings, &topics(), None).unwrap();

        let count: serde_json::Value =
            serde_json::from_str(&publisher.messages()[2].payload).unwrap();
        assert!(count.get("availability_topic").is_none());
        assert_eq!(count["state_topic"], "kinect/room/person_count");
    }
}
