//! Station registry.
//!
//! Built once from the first successful fetch: every distinct station id
//! gets its devices registered on the bus. The registry is never grown
//! afterwards, so stations first seen in a later poll are not published.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::bus::{Device, DeviceInfo, Feature, FeatureInfo, Transport};
use crate::config::ConfigError;
use crate::reading::{Quantity, StationReading};
use crate::selector::StationSelector;

/// Which devices represent a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLayout {
    /// A temperature sensor plus a humidity sensor.
    SensorPair,
    /// One weather station with temperature, humidity and precipitation.
    WeatherStation,
}

impl FromStr for DeviceLayout {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pair" => Ok(DeviceLayout::SensorPair),
            "station" => Ok(DeviceLayout::WeatherStation),
            other => Err(ConfigError::UnknownLayout(other.to_string())),
        }
    }
}

impl DeviceLayout {
    /// Device metadata for a station under this layout.
    pub fn describe(self, reading: &StationReading, segment: &str) -> Vec<DeviceInfo> {
        let temperature = FeatureInfo::default().with_min(-50.0);
        match self {
            DeviceLayout::SensorPair => vec![
                DeviceInfo::new(
                    &format!("sensor/temperature/{}", segment),
                    &format!("Temperature ({})", reading.name),
                    "temperatureSensor",
                )
                .feature(Quantity::Temperature.feature_name(), temperature),
                DeviceInfo::new(
                    &format!("sensor/humidity/{}", segment),
                    &format!("Relative Humidity ({})", reading.name),
                    "humiditySensor",
                )
                .feature(Quantity::RelativeHumidity.feature_name(), FeatureInfo::default()),
            ],
            DeviceLayout::WeatherStation => {
                let name = match reading.road_number {
                    Some(road) => format!("Weather station {} (road {})", reading.name, road),
                    None => format!("Weather station {}", reading.name),
                };
                vec![DeviceInfo::new(
                    &format!("sensor/weather/{}", segment),
                    &name,
                    "weatherStation",
                )
                .feature(Quantity::Temperature.feature_name(), temperature)
                .feature(
                    Quantity::RelativeHumidity.feature_name(),
                    FeatureInfo::default().with_min(0.0).with_max(100.0),
                )
                .feature(
                    Quantity::Precipitation.feature_name(),
                    FeatureInfo::default().with_min(0.0),
                )]
            }
        }
    }
}

/// Feature channels of one registered station.
#[derive(Debug, Default)]
pub struct StationHandle {
    features: HashMap<Quantity, Feature>,
}

impl StationHandle {
    fn from_devices(devices: &[Device]) -> Self {
        let features = [
            Quantity::Temperature,
            Quantity::RelativeHumidity,
            Quantity::Precipitation,
        ]
        .into_iter()
        .filter_map(|q| {
            devices
                .iter()
                .find_map(|d| d.feature(q.feature_name()))
                .map(|f| (q, f))
        })
        .collect();
        Self { features }
    }

    /// Channel for `quantity`, if the layout has one.
    pub fn feature(&self, quantity: Quantity) -> Option<&Feature> {
        self.features.get(&quantity)
    }
}

/// Station id → device handles.
#[derive(Debug, Default)]
pub struct Registry {
    stations: HashMap<String, StationHandle>,
}

impl Registry {
    /// Register devices for every distinct station in `readings`.
    ///
    /// A station whose registration fails is left out and logged; the
    /// others are still registered.
    pub async fn build(
        readings: &[StationReading],
        selector: &StationSelector,
        layout: DeviceLayout,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let mut stations = HashMap::new();

        for reading in readings {
            if stations.contains_key(&reading.id) {
                continue;
            }
            let segment = selector.topic_segment(reading);

            let mut devices = Vec::new();
            for info in layout.describe(reading, &segment) {
                let topic = info.topic.clone();
                match Device::register(info, transport.clone()).await {
                    Ok(device) => devices.push(device),
                    Err(e) => log::warn!("MQTT: failed to register device {}: {}", topic, e),
                }
            }
            if devices.is_empty() {
                continue;
            }

            log::info!("Registered station {} ({})", reading.id, reading.name);
            stations.insert(reading.id.clone(), StationHandle::from_devices(&devices));
        }

        Self { stations }
    }

    pub fn get(&self, id: &str) -> Option<&StationHandle> {
        self.stations.get(id)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}
