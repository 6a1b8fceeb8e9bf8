//! Command-line arguments.

use argh::FromArgs;
use std::path::PathBuf;

use crate::registry::DeviceLayout;
use crate::schema::SchemaVersion;

/// Sentinel left in `--token` when none was given.
pub const TOKEN_SENTINEL: &str = "REQUIRED";

fn default_token() -> String {
    TOKEN_SENTINEL.to_string()
}

/// Publish Trafikinfo weather station readings as hemtjanst sensors over MQTT
#[derive(FromArgs, Debug)]
pub struct Args {
    /// station ID to query for, repeat for several stations
    #[argh(option)]
    pub id: Vec<String>,

    /// station name to query for, repeat for several stations
    #[argh(option)]
    pub name: Vec<String>,

    /// trafikinfo API token (or TRAFIKVADER_TOKEN)
    #[argh(option, default = "default_token()")]
    pub token: String,

    /// upstream schema: 1 (WeatherStation 1.0) or 2 (WeatherMeasurepoint 2.0)
    #[argh(option)]
    pub schema: Option<SchemaVersion>,

    /// device layout: pair (temperature + humidity sensors) or station
    #[argh(option)]
    pub device: Option<DeviceLayout>,

    /// path to a YAML settings file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    /// broker address, host[:port] (default: localhost:1883)
    #[argh(option)]
    pub mqtt_address: Option<String>,

    /// client ID for the broker (default: trafikvader-<hostname>)
    #[argh(option)]
    pub mqtt_client_id: Option<String>,

    /// username for the broker
    #[argh(option)]
    pub mqtt_username: Option<String>,

    /// password for the broker
    #[argh(option)]
    pub mqtt_password: Option<String>,

    /// topic prefix for device announcements (default: announce)
    #[argh(option)]
    pub mqtt_announce: Option<String>,

    /// topic on which devices are asked to re-announce (default: discover)
    #[argh(option)]
    pub mqtt_discover: Option<String>,

    /// last-will topic (default: leave)
    #[argh(option)]
    pub mqtt_leave: Option<String>,

    /// show version information
    #[argh(switch, short = 'V')]
    pub version: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            id: Vec::new(),
            name: Vec::new(),
            token: default_token(),
            schema: None,
            device: None,
            config: None,
            mqtt_address: None,
            mqtt_client_id: None,
            mqtt_username: None,
            mqtt_password: None,
            mqtt_announce: None,
            mqtt_discover: None,
            mqtt_leave: None,
            version: false,
        }
    }
}
