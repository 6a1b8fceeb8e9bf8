//! Push readings to their stations' feature channels.

use crate::reading::{format_value, StationReading};
use crate::registry::Registry;

/// Publish every present value of `readings`.
///
/// Readings for unregistered stations are skipped. A failed publish is
/// logged and does not stop the remaining features or readings.
pub async fn apply(readings: &[StationReading], registry: &Registry) {
    for reading in readings {
        let Some(station) = registry.get(&reading.id) else {
            continue;
        };

        for (quantity, value) in reading.values() {
            let Some(feature) = station.feature(quantity) else {
                continue;
            };
            if let Err(e) = feature.update(&format_value(value)).await {
                log::warn!(
                    "MQTT: failed to publish {} for station {} to {}: {}",
                    quantity,
                    reading.id,
                    feature.topic(),
                    e
                );
            }
        }
    }
}
