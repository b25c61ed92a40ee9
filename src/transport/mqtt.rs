//! MQTT publisher built on rumqttc's v5 blocking client.
//!
//! The rumqttc event loop runs on its own thread and owns reconnects. The
//! publisher reports the link state it observes: while the broker is away,
//! publishes fail fast with `PublishError::NotConnected` instead of queueing,
//! so the bridge loop re-offers presence changes once the link is back.
//!
//! Availability follows the Home Assistant convention: a retained `online` on
//! every session start, a retained `offline` last will, and an explicit
//! `offline` on clean shutdown.
//!
//! Retained messages the publisher has handed to the client are replayed
//! whenever a session is re-established, so a broker that lost its retained
//! store still ends up with the current presence.

use anyhow::{anyhow, Result};
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, LastWill};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, Incoming, MqttOptions};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::publisher::Publisher;
use super::tls::{MqttEndpoint, TlsMaterials};
use crate::error::PublishError;

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

/// Outgoing request slots between the client and its event loop.
const REQUEST_CAPACITY: usize = 16;
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub endpoint: MqttEndpoint,
    pub tls: TlsMaterials,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Retained online/offline topic; `None` disables availability.
    pub availability_topic: Option<String>,
    pub keep_alive: Duration,
    /// How long `connect` waits for the broker's CONNACK.
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl MqttSettings {
    pub fn new(endpoint: MqttEndpoint, client_id: &str) -> Self {
        Self {
            endpoint,
            tls: TlsMaterials::default(),
            client_id: client_id.to_string(),
            username: None,
            password: None,
            availability_topic: None,
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
        }
    }

    fn options(&self) -> Result<MqttOptions> {
        let mut options = MqttOptions::new(&self.client_id, &self.endpoint.host, self.endpoint.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_start(true);
        if let Some(user) = self.username.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(user, self.password.as_deref().unwrap_or_default());
        }
        if let Some(topic) = &self.availability_topic {
            options.set_last_will(LastWill::new(
                topic.clone(),
                PAYLOAD_OFFLINE.as_bytes().to_vec(),
                QoS::AtLeastOnce,
                true,
                None,
            ));
        }
        options.set_transport(self.tls.build_transport(&self.endpoint)?);
        Ok(options)
    }
}

/// Last retained payload per topic, shared with the connection thread.
#[derive(Clone, Debug, Default)]
struct RetainedReplay {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl RetainedReplay {
    fn record(&self, topic: &str, payload: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(topic.to_string(), payload.to_string());
        }
    }

    fn snapshot(&self) -> Vec<(String, String)> {
        match self.entries.lock() {
            Ok(entries) => entries
                .iter()
                .map(|(topic, payload)| (topic.clone(), payload.clone()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

struct MqttRuntime {
    client: Client,
    retained: RetainedReplay,
    link_up: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    finished: mpsc::Receiver<()>,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

pub struct MqttPublisher {
    settings: MqttSettings,
    runtime: Option<MqttRuntime>,
}

impl MqttPublisher {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            runtime: None,
        }
    }

    /// Whether the broker session is currently up.
    pub fn is_link_up(&self) -> bool {
        self.runtime
            .as_ref()
            .map(|rt| rt.link_up.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

impl Publisher for MqttPublisher {
    fn connect(&mut self) -> Result<()> {
        if self.runtime.is_some() {
            return Ok(());
        }
        let options = self.settings.options()?;
        let (client, connection) = Client::new(options, REQUEST_CAPACITY);

        let link_up = Arc::new(AtomicBool::new(false));
        let retained = RetainedReplay::default();
        let closing = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();
        let (finished_tx, finished_rx) = mpsc::channel();
        let driver = ConnectionDriver {
            availability: self
                .settings
                .availability_topic
                .clone()
                .map(|topic| (client.clone(), topic)),
            replay: (client.clone(), retained.clone()),
            link_up: link_up.clone(),
            closing: closing.clone(),
            reconnect_delay: self.settings.reconnect_delay,
        };
        let handle = std::thread::spawn(move || {
            driver.run(connection, ready_tx);
            let _ = finished_tx.send(());
        });

        let outcome = match ready_rx.recv_timeout(self.settings.connect_timeout) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(anyhow!(
                "MQTT broker {} refused the session: {}",
                self.settings.endpoint,
                reason
            )),
            Err(_) => Err(anyhow!(
                "no CONNACK from MQTT broker {} within {:?}",
                self.settings.endpoint,
                self.settings.connect_timeout
            )),
        };
        if let Err(err) = outcome {
            // The driver thread exits on its next connection error.
            closing.store(true, Ordering::SeqCst);
            let _ = client.try_disconnect();
            return Err(err);
        }

        log::info!(
            "Connected to MQTT broker {} (TLS: {}, auth: {})",
            self.settings.endpoint,
            self.settings.endpoint.use_tls,
            self.settings.username.is_some()
        );
        self.runtime = Some(MqttRuntime {
            client,
            retained,
            link_up,
            closing,
            finished: finished_rx,
            connection_handle: Some(handle),
        });
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &str, retained: bool) -> Result<(), PublishError> {
        let runtime = self.runtime.as_ref().ok_or(PublishError::NotConnected)?;
        if !runtime.link_up.load(Ordering::SeqCst) {
            return Err(PublishError::NotConnected);
        }
        runtime
            .client
            .try_publish(topic, QoS::AtLeastOnce, retained, payload.as_bytes().to_vec())
            .map_err(|err| PublishError::transport(topic, err))?;
        if retained {
            runtime.retained.record(topic, payload);
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        let Some(mut runtime) = self.runtime.take() else {
            return Ok(());
        };
        if let Some(topic) = &self.settings.availability_topic {
            if runtime.link_up.load(Ordering::SeqCst) {
                if let Err(err) = runtime.client.try_publish(
                    topic.as_str(),
                    QoS::AtLeastOnce,
                    true,
                    PAYLOAD_OFFLINE.as_bytes().to_vec(),
                ) {
                    log::warn!("failed to publish offline status: {}", err);
                }
            }
        }
        runtime.closing.store(true, Ordering::SeqCst);
        if let Err(err) = runtime.client.try_disconnect() {
            log::warn!("MQTT disconnect request failed: {}", err);
        }
        drop(runtime.client);

        match runtime.finished.recv_timeout(DISCONNECT_GRACE) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(handle) = runtime.connection_handle.take() {
                    let _ = handle.join();
                }
                log::info!("Disconnected from MQTT broker {}", self.settings.endpoint);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!(
                    "MQTT connection thread still busy after {:?}; detaching",
                    DISCONNECT_GRACE
                );
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Connection driver thread
// ----------------------------------------------------------------------------

struct ConnectionDriver {
    availability: Option<(Client, String)>,
    replay: (Client, RetainedReplay),
    link_up: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    reconnect_delay: Duration,
}

impl ConnectionDriver {
    fn run(self, mut connection: Connection, ready: mpsc::Sender<Result<(), String>>) {
        let mut ready = Some(ready);
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        let reason = format!("{:?}", ack.code);
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(Err(reason));
                            break;
                        }
                        log::warn!("MQTT broker refused reconnect: {}", reason);
                        continue;
                    }
                    self.link_up.store(true, Ordering::SeqCst);
                    self.announce_online();
                    match ready.take() {
                        Some(tx) => {
                            let _ = tx.send(Ok(()));
                        }
                        None => {
                            let replayed = self.replay_retained();
                            log::info!(
                                "MQTT session re-established; replayed {} retained messages",
                                replayed
                            );
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    self.link_up.store(false, Ordering::SeqCst);
                    if self.closing.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(err.to_string()));
                        break;
                    }
                    log::warn!(
                        "MQTT connection error: {}. Reconnecting in {:?}",
                        err,
                        self.reconnect_delay
                    );
                    std::thread::sleep(self.reconnect_delay);
                }
            }
        }
        self.link_up.store(false, Ordering::SeqCst);
    }

    fn announce_online(&self) {
        let Some((client, topic)) = &self.availability else {
            return;
        };
        if let Err(err) = client.try_publish(
            topic.as_str(),
            QoS::AtLeastOnce,
            true,
            PAYLOAD_ONLINE.as_bytes().to_vec(),
        ) {
            log::warn!("failed to publish online status to {}: {}", topic, err);
        }
    }

    fn replay_retained(&self) -> usize {
        let (client, retained) = &self.replay;
        let mut replayed = 0;
        for (topic, payload) in retained.snapshot() {
            match client.try_publish(topic.as_str(), QoS::AtLeastOnce, true, payload.into_bytes()) {
                Ok(()) => replayed += 1,
                Err(err) => log::warn!("failed to replay retained {}: {}", topic, err),
            }
        }
        replayed
    }
}
