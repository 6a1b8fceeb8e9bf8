//! Messaging bus.
//!
//! Devices follow the hemtjanst convention: metadata is announced retained
//! on `announce/<topic>` and every feature publishes its current value on
//! `<topic>/<feature>/get`. The [`Transport`] trait is the seam between the
//! updater and MQTT; [`BusConnection`] is the seam between the lifecycle
//! and the connection event loop.

pub mod device;
pub mod mqtt;

use async_trait::async_trait;

pub use device::{Device, DeviceInfo, Feature, FeatureInfo};
pub use mqtt::{MqttConfig, MqttConnection, MqttTransport};

/// Errors from the messaging bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("MQTT client error: {0}")]
    Client(String),

    #[error("MQTT connection error: {0}")]
    Connection(String),

    #[error("MQTT broker refused connection: {0}")]
    Refused(String),

    #[error("invalid MQTT address '{0}'")]
    Address(String),

    #[error("failed to encode device metadata: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<rumqttc::ClientError> for BusError {
    fn from(err: rumqttc::ClientError) -> Self {
        BusError::Client(err.to_string())
    }
}

/// Publishing side of the bus.
///
/// Implementations must be safe to call from the poll loop while the
/// connection task drives the underlying client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Announce device metadata so consumers can discover it.
    async fn announce(&self, device: &DeviceInfo) -> Result<(), BusError>;

    /// Publish a feature value.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError>;
}

/// How one connection session ended.
#[derive(Debug)]
pub struct SessionEnd {
    /// Whether the broker accepted the connection during the session.
    pub connected: bool,
    /// What ended it.
    pub error: BusError,
}

impl SessionEnd {
    /// Retrying will not help: the broker refused us, or the session never
    /// got as far as a connection.
    pub fn is_fatal(&self) -> bool {
        !self.connected || matches!(self.error, BusError::Refused(_))
    }
}

/// Connection side of the bus.
#[async_trait]
pub trait BusConnection: Send {
    /// Drive the connection until it drops.
    async fn run_session(&mut self) -> SessionEnd;
}
