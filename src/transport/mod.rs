//! Publishing side of the bridge.
//!
//! `Publisher` is the seam the bridge loop talks to. `MqttPublisher` is the
//! production implementation on rumqttc; `MemoryPublisher` and `LogPublisher`
//! serve tests and dry runs. Endpoint parsing, TLS selection and Home
//! Assistant discovery live alongside.

pub mod discovery;
pub mod mqtt;
pub mod publisher;
mod tls;

pub use discovery::{publish_discovery, DiscoverySettings, DEFAULT_DISCOVERY_PREFIX};
pub use mqtt::{MqttPublisher, MqttSettings, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
pub use publisher::{LogPublisher, MemoryPublisher, PublishedMessage, Publisher};
pub use tls::{parse_mqtt_endpoint, MqttEndpoint, TlsMaterials, DEFAULT_MQTTS_PORT, DEFAULT_MQTT_PORT};
