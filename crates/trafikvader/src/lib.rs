//! Trafikväder
//!
//! Polls the Trafikinfo API for road weather stations and publishes their
//! temperature, relative humidity and precipitation as hemtjanst sensor
//! devices over MQTT.
//!
//! # Modules
//!
//! - [`fetcher`]: builds the XML query, POSTs it and maps HTTP failures
//! - [`schema`]: decodes `WeatherStation` 1.0 and `WeatherMeasurepoint` 2.0 results
//! - [`registry`]: one set of bus devices per station, built once
//! - [`updater`]: pushes fresh values to the registered features
//! - [`lifecycle`]: poll timer, reconnect loop and shutdown

pub mod bus;
pub mod cli;
pub mod config;
pub mod fetcher;
pub mod lifecycle;
pub mod query;
pub mod reading;
pub mod registry;
pub mod schema;
pub mod selector;
pub mod updater;

#[cfg(test)]
mod testing;

/// Manufacturer reported in every device announcement.
pub const MANUFACTURER: &str = "trafikväder";

pub use cli::Args;
pub use config::{Config, ConfigError, Settings};
pub use fetcher::{FetchError, Fetcher, ReadingSource};
pub use lifecycle::{LifecycleError, LifecycleState};
pub use reading::StationReading;
pub use registry::{DeviceLayout, Registry};
pub use schema::SchemaVersion;
pub use selector::StationSelector;
