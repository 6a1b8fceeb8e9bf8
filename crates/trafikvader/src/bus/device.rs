//! hemtjanst device and feature handles.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{BusError, Transport};

/// Constraints and topics of one feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    pub get_topic: String,
    pub set_topic: String,
}

impl FeatureInfo {
    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }
}

/// Device metadata as announced on the bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub topic: String,
    pub name: String,
    pub manufacturer: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(rename = "lastWillID", skip_serializing_if = "Option::is_none")]
    pub last_will_id: Option<String>,
    #[serde(rename = "feature")]
    pub features: BTreeMap<String, FeatureInfo>,
}

impl DeviceInfo {
    pub fn new(topic: &str, name: &str, device_type: &str) -> Self {
        Self {
            topic: topic.to_string(),
            name: name.to_string(),
            manufacturer: crate::MANUFACTURER.to_string(),
            device_type: device_type.to_string(),
            last_will_id: None,
            features: BTreeMap::new(),
        }
    }

    /// Add a feature; its get/set topics are derived from the device topic.
    pub fn feature(mut self, name: &str, info: FeatureInfo) -> Self {
        let info = FeatureInfo {
            get_topic: format!("{}/{}/get", self.topic, name),
            set_topic: format!("{}/{}/set", self.topic, name),
            ..info
        };
        self.features.insert(name.to_string(), info);
        self
    }
}

/// A registered device.
#[derive(Clone)]
pub struct Device {
    info: Arc<DeviceInfo>,
    transport: Arc<dyn Transport>,
}

impl Device {
    /// Announce `info` and return a handle to it.
    pub async fn register(info: DeviceInfo, transport: Arc<dyn Transport>) -> Result<Self, BusError> {
        transport.announce(&info).await?;
        log::debug!("Registered device {} ({})", info.topic, info.device_type);
        Ok(Self {
            info: Arc::new(info),
            transport,
        })
    }

    /// Handle for one of the device's features.
    pub fn feature(&self, name: &str) -> Option<Feature> {
        self.info.features.get(name).map(|f| Feature {
            name: name.to_string(),
            get_topic: f.get_topic.clone(),
            transport: self.transport.clone(),
        })
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").field("info", &self.info).finish()
    }
}

/// A single published quantity channel of a device.
#[derive(Clone)]
pub struct Feature {
    name: String,
    get_topic: String,
    transport: Arc<dyn Transport>,
}

impl Feature {
    pub fn topic(&self) -> &str {
        &self.get_topic
    }

    /// Publish the current value.
    pub async fn update(&self, value: &str) -> Result<(), BusError> {
        self.transport.publish(&self.get_topic, value.to_string()).await
    }
}

impl std::fmt::Debug for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feature")
            .field("name", &self.name)
            .field("get_topic", &self.get_topic)
            .finish()
    }
}
