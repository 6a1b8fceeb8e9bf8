//! Daemon configuration.
//!
//! CLI flags and the optional YAML settings file are resolved once at
//! startup into an immutable [`Config`] that is passed by reference to the
//! fetcher and the lifecycle.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::bus::MqttConfig;
use crate::cli::{Args, TOKEN_SENTINEL};
use crate::fetcher::DEFAULT_ENDPOINT;
use crate::registry::DeviceLayout;
use crate::schema::SchemaVersion;
use crate::selector::StationSelector;

/// Environment variable consulted when `--token` is not given.
pub const TOKEN_ENV: &str = "TRAFIKVADER_TOKEN";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("A token is required to be able to query the Trafikinfo API")]
    MissingToken,
    #[error("At least one station ID or name is required")]
    NoStations,
    #[error("Station IDs and station names cannot be combined")]
    MixedSelectors,
    #[error("Unknown schema '{0}', expected 1 (WeatherStation) or 2 (WeatherMeasurepoint)")]
    UnknownSchema(String),
    #[error("Unknown device layout '{0}', expected 'pair' or 'station'")]
    UnknownLayout(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Settings read from the optional YAML file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub poll_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    pub max_sample_age_secs: u64,
    pub request_timeout_secs: u64,
    pub endpoint: String,
    pub mqtt: MqttSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 600,
            reconnect_delay_secs: 5,
            max_sample_age_secs: 3600,
            request_timeout_secs: 30,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            mqtt: MqttSettings::default(),
        }
    }
}

/// MQTT section of the settings file; CLI flags take precedence.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MqttSettings {
    pub address: Option<String>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub announce_topic: Option<String>,
    pub discover_topic: Option<String>,
    pub leave_topic: Option<String>,
    pub keep_alive_secs: Option<u64>,
}

impl Settings {
    /// Load settings from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Parse settings from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub selector: StationSelector,
    pub schema: SchemaVersion,
    pub layout: DeviceLayout,
    pub endpoint: String,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_sample_age: Duration,
    pub request_timeout: Duration,
    pub mqtt: MqttConfig,
}

impl Config {
    /// Resolve the configuration from parsed arguments, reading the
    /// settings file and the token environment variable as needed.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let settings = match &args.config {
            Some(path) => Settings::from_file(path)?,
            None => Settings::default(),
        };
        Self::resolve(args, settings, std::env::var(TOKEN_ENV).ok())
    }

    /// Combine arguments, file settings and an optional environment token.
    pub fn resolve(
        args: &Args,
        settings: Settings,
        env_token: Option<String>,
    ) -> Result<Self, ConfigError> {
        let token = if args.token != TOKEN_SENTINEL {
            args.token.clone()
        } else {
            env_token
                .filter(|t| !t.is_empty())
                .ok_or(ConfigError::MissingToken)?
        };
        if token.is_empty() {
            return Err(ConfigError::MissingToken);
        }

        let selector = StationSelector::from_flags(args.id.clone(), args.name.clone())?;
        let layout = args.device.unwrap_or_else(|| selector.default_layout());

        let poll_interval = non_zero("poll_interval_secs", settings.poll_interval_secs)?;
        let reconnect_delay = non_zero("reconnect_delay_secs", settings.reconnect_delay_secs)?;
        let max_sample_age = non_zero("max_sample_age_secs", settings.max_sample_age_secs)?;
        let request_timeout =
            non_zero("request_timeout_secs", settings.request_timeout_secs)?.min(poll_interval);

        let mqtt = resolve_mqtt(args, settings.mqtt)?;

        Ok(Self {
            token,
            selector,
            schema: args.schema.unwrap_or_default(),
            layout,
            endpoint: settings.endpoint,
            poll_interval,
            reconnect_delay,
            max_sample_age,
            request_timeout,
            mqtt,
        })
    }
}

fn non_zero(name: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Invalid(format!("{} must be greater than 0", name)));
    }
    Ok(Duration::from_secs(secs))
}

fn resolve_mqtt(args: &Args, file: MqttSettings) -> Result<MqttConfig, ConfigError> {
    let defaults = MqttConfig::default();
    let keep_alive = match file.keep_alive_secs {
        Some(secs) if secs < 5 => {
            return Err(ConfigError::Invalid(
                "mqtt.keep_alive_secs must be at least 5".to_string(),
            ))
        }
        Some(secs) => Duration::from_secs(secs),
        None => defaults.keep_alive,
    };

    Ok(MqttConfig {
        address: args.mqtt_address.clone().or(file.address).unwrap_or(defaults.address),
        client_id: args
            .mqtt_client_id
            .clone()
            .or(file.client_id)
            .unwrap_or(defaults.client_id),
        username: args.mqtt_username.clone().or(file.username),
        password: args.mqtt_password.clone().or(file.password),
        announce_topic: args
            .mqtt_announce
            .clone()
            .or(file.announce_topic)
            .unwrap_or(defaults.announce_topic),
        discover_topic: args
            .mqtt_discover
            .clone()
            .or(file.discover_topic)
            .unwrap_or(defaults.discover_topic),
        leave_topic: args
            .mqtt_leave
            .clone()
            .or(file.leave_topic)
            .unwrap_or(defaults.leave_topic),
        keep_alive,
    })
}
