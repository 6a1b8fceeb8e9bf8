//! Normalized station readings shared by the fetcher and the updater.

use std::fmt;

/// One polled sample for one station.
///
/// Readings only exist for fresh samples; stale and inactive records are
/// dropped while decoding and never reach this type.
#[derive(Debug, Clone, PartialEq)]
pub struct StationReading {
    /// Upstream station identifier, the join key into the registry.
    pub id: String,
    /// Human-readable name, only used when the device is created.
    pub name: String,
    /// Air temperature in °C, `None` when not reported this cycle.
    pub temperature_c: Option<f64>,
    /// Relative humidity in %, `None` when not reported this cycle.
    pub relative_humidity_pct: Option<f64>,
    /// Precipitation, already defaulted to 0 when absent upstream.
    pub precipitation: f64,
    /// Road number, used for device naming only.
    pub road_number: Option<i64>,
}

impl StationReading {
    /// Values to publish for this reading, in publish order.
    ///
    /// Absent temperature and humidity yield nothing, precipitation is
    /// always present.
    pub fn values(&self) -> Vec<(Quantity, f64)> {
        let mut values = Vec::with_capacity(3);
        if let Some(t) = self.temperature_c {
            values.push((Quantity::Temperature, t));
        }
        if let Some(rh) = self.relative_humidity_pct {
            values.push((Quantity::RelativeHumidity, rh));
        }
        values.push((Quantity::Precipitation, self.precipitation));
        values
    }
}

/// A published quantity channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    Temperature,
    RelativeHumidity,
    Precipitation,
}

impl Quantity {
    /// Feature name used on the bus.
    pub fn feature_name(self) -> &'static str {
        match self {
            Quantity::Temperature => "currentTemperature",
            Quantity::RelativeHumidity => "currentRelativeHumidity",
            Quantity::Precipitation => "precipitation",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Quantity::Temperature => "temperature",
            Quantity::RelativeHumidity => "relative humidity",
            Quantity::Precipitation => "precipitation",
        };
        f.write_str(label)
    }
}

/// Format a value as published: decimal with exactly one fractional digit.
///
/// Rounding happens at single precision, so `12.35` publishes as `12.4`.
pub fn format_value(value: f64) -> String {
    format!("{:.1}", value as f32)
}
