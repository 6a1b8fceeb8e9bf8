//! MQTT transport backed by rumqttc.
//!
//! [`connect`] splits the client in two: an [`MqttTransport`] that the poll
//! loop publishes through, and an [`MqttConnection`] that owns the event
//! loop and is driven by the connection-maintenance task.

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{BusConnection, BusError, DeviceInfo, SessionEnd, Transport};

/// Default broker port.
const DEFAULT_PORT: u16 = 1883;

/// Requests buffered between the client and the event loop.
const REQUEST_CAPACITY: usize = 64;

/// Longest a publish may wait for room in the request buffer.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    /// Broker address, `host[:port]`, optionally prefixed by `tcp://` or `mqtt://`
    pub address: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Prefix under which device metadata is announced
    pub announce_topic: String,
    /// Topic on which consumers ask devices to re-announce
    pub discover_topic: String,
    /// Last-will topic, receives the client id when we drop off
    pub leave_topic: String,
    pub keep_alive: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            address: "localhost:1883".to_string(),
            client_id: default_client_id(),
            username: None,
            password: None,
            announce_topic: "announce".to_string(),
            discover_topic: "discover".to_string(),
            leave_topic: "leave".to_string(),
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// `trafikvader-<hostname>`, or plain `trafikvader` when the hostname is unavailable.
pub fn default_client_id() -> String {
    hostname::get()
        .map(|h| format!("trafikvader-{}", h.to_string_lossy()))
        .unwrap_or_else(|_| "trafikvader".to_string())
}

impl MqttConfig {
    /// Split the address into host and port.
    pub fn host_port(&self) -> Result<(String, u16), BusError> {
        let address = self
            .address
            .strip_prefix("tcp://")
            .or_else(|| self.address.strip_prefix("mqtt://"))
            .unwrap_or(&self.address);

        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| BusError::Address(self.address.clone()))?;
                (host, port)
            }
            None => (address, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(BusError::Address(self.address.clone()));
        }
        Ok((host.to_string(), port))
    }
}

/// Client options: broker, keep-alive, credentials and the last will.
pub fn options(config: &MqttConfig) -> Result<MqttOptions, BusError> {
    let (host, port) = config.host_port()?;

    let mut options = MqttOptions::new(config.client_id.clone(), host, port);
    options.set_keep_alive(config.keep_alive);
    options.set_last_will(LastWill::new(
        config.leave_topic.clone(),
        config.client_id.clone(),
        QoS::AtLeastOnce,
        false,
    ));
    if let Some(username) = &config.username {
        options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
    }
    Ok(options)
}

/// Create the client pair. No network I/O happens until the connection is driven.
pub fn connect(config: &MqttConfig) -> Result<(Arc<MqttTransport>, MqttConnection), BusError> {
    let (client, event_loop) = AsyncClient::new(options(config)?, REQUEST_CAPACITY);
    let transport = Arc::new(MqttTransport {
        client,
        client_id: config.client_id.clone(),
        announce_topic: config.announce_topic.clone(),
        announced: Mutex::new(BTreeMap::new()),
    });
    let connection = MqttConnection {
        event_loop,
        transport: transport.clone(),
        tracker: SessionTracker::new(&config.discover_topic),
    };

    Ok((transport, connection))
}

/// Publishing half of the MQTT client.
pub struct MqttTransport {
    client: AsyncClient,
    client_id: String,
    announce_topic: String,
    /// Announce topic → metadata payload, replayed on discover and reconnect
    announced: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MqttTransport {
    /// Queue every known announcement again.
    ///
    /// Runs on the event-loop task, so it must not wait for buffer space.
    fn reannounce(&self) {
        let announced = match self.announced.lock() {
            Ok(a) => a.clone(),
            Err(e) => {
                log::error!("MQTT: announcement table poisoned: {}", e);
                return;
            }
        };
        for (topic, payload) in announced {
            if let Err(e) = self.client.try_publish(topic.clone(), QoS::AtLeastOnce, true, payload) {
                log::warn!("MQTT: failed to re-announce {}: {}", topic, e);
            }
        }
    }

    async fn send(&self, topic: String, payload: Vec<u8>) -> Result<(), BusError> {
        tokio::time::timeout(
            PUBLISH_TIMEOUT,
            self.client.publish(topic, QoS::AtLeastOnce, true, payload),
        )
        .await
        .map_err(|_| BusError::Client("publish buffer full".to_string()))??;
        Ok(())
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn announce(&self, device: &DeviceInfo) -> Result<(), BusError> {
        let mut info = device.clone();
        info.last_will_id = Some(self.client_id.clone());
        let payload = serde_json::to_vec(&info)?;
        let topic = format!("{}/{}", self.announce_topic, info.topic);

        self.announced
            .lock()
            .map_err(|e| BusError::Client(format!("announcement table poisoned: {}", e)))?
            .insert(topic.clone(), payload.clone());

        self.send(topic, payload).await
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        self.send(topic.to_string(), payload.into_bytes()).await
    }
}

/// What an incoming event asks of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reaction {
    Ignore,
    /// Broker accepted the connection; subscribe to discover and, on a
    /// reconnect, announce every device again.
    Connected { reannounce: bool },
    /// A consumer asked devices to announce themselves.
    Discover,
}

/// Per-connection bookkeeping, independent of the network.
#[derive(Debug)]
struct SessionTracker {
    discover_topic: String,
    connects: u64,
}

impl SessionTracker {
    fn new(discover_topic: &str) -> Self {
        Self {
            discover_topic: discover_topic.to_string(),
            connects: 0,
        }
    }

    fn react(&mut self, event: &Event) -> Reaction {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => {
                // Announcements queued before the first connection are still in flight.
                let reannounce = self.connects > 0;
                self.connects += 1;
                Reaction::Connected { reannounce }
            }
            Event::Incoming(Packet::Publish(publish)) if publish.topic == self.discover_topic => {
                Reaction::Discover
            }
            _ => Reaction::Ignore,
        }
    }
}

/// Event-loop half of the MQTT client.
pub struct MqttConnection {
    event_loop: EventLoop,
    transport: Arc<MqttTransport>,
    tracker: SessionTracker,
}

#[async_trait]
impl BusConnection for MqttConnection {
    async fn run_session(&mut self) -> SessionEnd {
        let mut connected = false;
        loop {
            let event = match self.event_loop.poll().await {
                Ok(event) => event,
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return SessionEnd {
                        connected,
                        error: BusError::Refused(format!("{:?}", code)),
                    };
                }
                Err(e) => {
                    return SessionEnd {
                        connected,
                        error: BusError::Connection(e.to_string()),
                    };
                }
            };

            match self.tracker.react(&event) {
                Reaction::Connected { reannounce } => {
                    log::info!("MQTT: connected");
                    connected = true;
                    let discover = &self.tracker.discover_topic;
                    if let Err(e) = self
                        .transport
                        .client
                        .try_subscribe(discover.clone(), QoS::AtLeastOnce)
                    {
                        log::warn!("MQTT: failed to subscribe to {}: {}", discover, e);
                    }
                    if reannounce {
                        self.transport.reannounce();
                    }
                }
                Reaction::Discover => {
                    log::debug!("MQTT: discover request, re-announcing devices");
                    self.transport.reannounce();
                }
                Reaction::Ignore => {}
            }
        }
    }
}
