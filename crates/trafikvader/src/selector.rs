//! Station selection: which stations to query and how they are keyed.

use crate::config::ConfigError;
use crate::query::Filter;
use crate::reading::StationReading;
use crate::registry::DeviceLayout;

/// Stations to poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationSelector {
    /// Exactly one station id.
    Single(String),
    /// A set of station ids.
    Ids(Vec<String>),
    /// A set of station names.
    Names(Vec<String>),
}

impl StationSelector {
    /// Build a selector from repeated `--id` / `--name` flags.
    ///
    /// Exactly one of the two lists must be non-empty.
    pub fn from_flags(ids: Vec<String>, names: Vec<String>) -> Result<Self, ConfigError> {
        match (ids.is_empty(), names.is_empty()) {
            (true, true) => Err(ConfigError::NoStations),
            (false, false) => Err(ConfigError::MixedSelectors),
            (false, true) if ids.len() == 1 => Ok(StationSelector::Single(ids[0].clone())),
            (false, true) => Ok(StationSelector::Ids(ids)),
            (true, false) => Ok(StationSelector::Names(names)),
        }
    }

    /// Upstream field the selector filters on.
    pub fn field(&self) -> &'static str {
        match self {
            StationSelector::Single(_) | StationSelector::Ids(_) => "Id",
            StationSelector::Names(_) => "Name",
        }
    }

    /// Selector values, in flag order.
    pub fn values(&self) -> &[String] {
        match self {
            StationSelector::Single(id) => std::slice::from_ref(id),
            StationSelector::Ids(ids) => ids,
            StationSelector::Names(names) => names,
        }
    }

    /// Query filter matching every selected station.
    pub fn filter(&self) -> Filter {
        Filter::any_of(self.field(), self.values())
    }

    /// The reading field a selector value is compared against.
    pub fn key_of<'a>(&self, reading: &'a StationReading) -> &'a str {
        match self {
            StationSelector::Single(_) | StationSelector::Ids(_) => &reading.id,
            StationSelector::Names(_) => &reading.name,
        }
    }

    /// Bus topic segment for a station.
    pub fn topic_segment(&self, reading: &StationReading) -> String {
        match self {
            StationSelector::Single(_) | StationSelector::Ids(_) => reading.id.clone(),
            StationSelector::Names(_) => topic_name(&reading.name),
        }
    }

    /// Device layout used when none is configured.
    pub fn default_layout(&self) -> DeviceLayout {
        match self {
            StationSelector::Ids(_) => DeviceLayout::WeatherStation,
            StationSelector::Single(_) | StationSelector::Names(_) => DeviceLayout::SensorPair,
        }
    }

    /// Selector values that matched none of `readings`.
    pub fn unmatched<'a>(&'a self, readings: &[StationReading]) -> Vec<&'a str> {
        self.values()
            .iter()
            .filter(|value| !readings.iter().any(|r| self.key_of(r) == value.as_str()))
            .map(String::as_str)
            .collect()
    }
}

/// Turn a station name into a bus topic segment.
///
/// Lowercases and spells out å, ä and ö as `ao`, `ae` and `oe`.
pub fn topic_name(name: &str) -> String {
    name.to_lowercase()
        .replace('å', "ao")
        .replace('ä', "ae")
        .replace('ö', "oe")
}
