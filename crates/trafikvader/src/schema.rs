//! Response schema adapters.
//!
//! Each Trafikinfo object type/schema version decodes into the same
//! normalized [`StationReading`] list. Adapters own the per-record policy:
//! stale samples and inactive stations are dropped, precipitation is
//! defaulted to zero, temperature and humidity stay optional.

use chrono::{DateTime, FixedOffset, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::config::ConfigError;
use crate::fetcher::FetchError;
use crate::reading::StationReading;

/// Decodes one upstream schema into normalized readings.
pub trait StationSchema: Send + Sync {
    /// Trafikinfo object type queried.
    fn object_type(&self) -> &'static str;

    /// Trafikinfo schema version queried.
    fn schema_version(&self) -> &'static str;

    /// Fields requested from the API.
    fn include_fields(&self) -> &'static [&'static str];

    /// Decode a successful response body.
    ///
    /// Samples older than `max_age` relative to `now` are dropped.
    fn decode(
        &self,
        body: &[u8],
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<Vec<StationReading>, FetchError>;
}

/// Selectable schema adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaVersion {
    /// `WeatherStation` 1.0
    #[default]
    WeatherStation1,
    /// `WeatherMeasurepoint` 2.0
    WeatherMeasurepoint2,
}

impl SchemaVersion {
    pub fn adapter(self) -> Box<dyn StationSchema> {
        match self {
            SchemaVersion::WeatherStation1 => Box::new(WeatherStationV1),
            SchemaVersion::WeatherMeasurepoint2 => Box::new(WeatherMeasurepointV2),
        }
    }
}

impl FromStr for SchemaVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" | "1.0" | "weatherstation" => Ok(SchemaVersion::WeatherStation1),
            "2" | "2.0" | "weathermeasurepoint" => Ok(SchemaVersion::WeatherMeasurepoint2),
            other => Err(ConfigError::UnknownSchema(other.to_string())),
        }
    }
}

// ── Envelope ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "RESPONSE")]
    response: ResponseBody<T>,
}

#[derive(Debug, Deserialize)]
struct ResponseBody<T> {
    #[serde(rename = "RESULT", default = "Vec::new")]
    result: Vec<T>,
}

/// Parse the envelope and require exactly one result set.
fn single_result<T: DeserializeOwned>(body: &[u8]) -> Result<T, FetchError> {
    let envelope: Envelope<T> = serde_json::from_slice(body).map_err(FetchError::Decode)?;
    let mut results = envelope.response.result;
    if results.len() != 1 {
        return Err(FetchError::ResultCount(results.len()));
    }
    results.pop().ok_or(FetchError::ResultCount(0))
}

/// Whether a sample taken at `sample` is still current at `now`.
///
/// Samples stamped in the future count as fresh; a missing timestamp does
/// not.
pub fn is_fresh(
    sample: Option<DateTime<FixedOffset>>,
    now: DateTime<Utc>,
    max_age: Duration,
) -> bool {
    let Some(sample) = sample else {
        return false;
    };
    match now.signed_duration_since(sample).to_std() {
        Ok(age) => age <= max_age,
        Err(_) => true,
    }
}

// ── WeatherStation 1.0 ───────────────────────────────────────────────

/// `WeatherStation` schema 1.0 adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeatherStationV1;

#[derive(Debug, Deserialize)]
struct WeatherStationResult {
    #[serde(rename = "WeatherStation", default)]
    stations: Vec<WeatherStationRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WeatherStationRecord {
    active: Option<bool>,
    id: Option<String>,
    name: Option<String>,
    road_number_numeric: Option<i64>,
    measurement: Option<Measurement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Measurement {
    measure_time: Option<DateTime<FixedOffset>>,
    air: Option<MeasuredAir>,
    precipitation: Option<MeasuredPrecipitation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MeasuredAir {
    temp: Option<f64>,
    relative_humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MeasuredPrecipitation {
    amount: Option<f64>,
}

impl StationSchema for WeatherStationV1 {
    fn object_type(&self) -> &'static str {
        "WeatherStation"
    }

    fn schema_version(&self) -> &'static str {
        "1.0"
    }

    fn include_fields(&self) -> &'static [&'static str] {
        &["Active", "Id", "Name", "Measurement", "RoadNumberNumeric"]
    }

    fn decode(
        &self,
        body: &[u8],
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<Vec<StationReading>, FetchError> {
        let result: WeatherStationResult = single_result(body)?;

        let readings = result
            .stations
            .into_iter()
            .filter_map(|station| {
                if station.active == Some(false) {
                    log::trace!("dropping inactive station {:?}", station.id);
                    return None;
                }
                let (Some(id), Some(name)) = (station.id, station.name) else {
                    return None;
                };
                let measurement = station.measurement?;
                if !is_fresh(measurement.measure_time, now, max_age) {
                    log::debug!("dropping stale sample for station {}", id);
                    return None;
                }
                let (temperature_c, relative_humidity_pct) = measurement
                    .air
                    .map(|air| (air.temp, air.relative_humidity))
                    .unwrap_or_default();
                let precipitation = measurement
                    .precipitation
                    .and_then(|p| p.amount)
                    .unwrap_or(0.0);

                Some(StationReading {
                    id,
                    name,
                    temperature_c,
                    relative_humidity_pct,
                    precipitation,
                    road_number: station.road_number_numeric,
                })
            })
            .collect();

        Ok(readings)
    }
}

// ── WeatherMeasurepoint 2.0 ──────────────────────────────────────────

/// `WeatherMeasurepoint` schema 2.0 adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeatherMeasurepointV2;

#[derive(Debug, Deserialize)]
struct MeasurepointResult {
    #[serde(rename = "WeatherMeasurepoint", default)]
    measurepoints: Vec<MeasurepointRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MeasurepointRecord {
    id: Option<String>,
    name: Option<String>,
    observation: Option<Observation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Observation {
    sample: Option<DateTime<FixedOffset>>,
    air: Option<ObservedAir>,
    #[serde(rename = "Aggregated30minutes")]
    aggregated_30_minutes: Option<Aggregated>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObservedAir {
    temperature: Option<Measured>,
    relative_humidity: Option<Measured>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Aggregated {
    precipitation: Option<AggregatedPrecipitation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AggregatedPrecipitation {
    total_water_equivalent: Option<Measured>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Measured {
    value: Option<f64>,
}

impl StationSchema for WeatherMeasurepointV2 {
    fn object_type(&self) -> &'static str {
        "WeatherMeasurepoint"
    }

    fn schema_version(&self) -> &'static str {
        "2.0"
    }

    fn include_fields(&self) -> &'static [&'static str] {
        &[
            "Id",
            "Name",
            "Observation.Sample",
            "Observation.Air.Temperature.Value",
            "Observation.Air.RelativeHumidity.Value",
            "Observation.Aggregated30minutes.Precipitation.TotalWaterEquivalent.Value",
        ]
    }

    fn decode(
        &self,
        body: &[u8],
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<Vec<StationReading>, FetchError> {
        let result: MeasurepointResult = single_result(body)?;

        let readings = result
            .measurepoints
            .into_iter()
            .filter_map(|point| {
                let (Some(id), Some(name)) = (point.id, point.name) else {
                    return None;
                };
                let observation = point.observation?;
                if !is_fresh(observation.sample, now, max_age) {
                    log::debug!("dropping stale sample for measurepoint {}", id);
                    return None;
                }
                let (temperature_c, relative_humidity_pct) = observation
                    .air
                    .map(|air| {
                        (
                            air.temperature.and_then(|m| m.value),
                            air.relative_humidity.and_then(|m| m.value),
                        )
                    })
                    .unwrap_or_default();
                let precipitation = observation
                    .aggregated_30_minutes
                    .and_then(|a| a.precipitation)
                    .and_then(|p| p.total_water_equivalent)
                    .and_then(|m| m.value)
                    .unwrap_or(0.0);

                Some(StationReading {
                    id,
                    name,
                    temperature_c,
                    relative_humidity_pct,
                    precipitation,
                    road_number: None,
                })
            })
            .collect();

        Ok(readings)
    }
}
