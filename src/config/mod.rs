use log::{debug, info};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::models::LineFormat;

/// Places we look at when no config path was given on the command line
pub const CONFIG_SEARCH_PATHS: [&str; 3] = [
    "config/rtlamr2mqtt.yaml",
    "rtlamr2mqtt.yaml",
    "/etc/rtlamr2mqtt.yaml",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No config file found, tried {0:?}")]
    NotFound(Vec<PathBuf>),
    #[error("Unable to read config file {path:?}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("Unable to parse config file: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("No meters configured")]
    NoMeters,
    #[error("Meter id {0} is configured more than once")]
    DuplicateMeterId(String),
    #[error("Meter {0} has no protocol")]
    MissingProtocol(String),
    #[error("Format {format:?} of meter {id} has no digit placeholder")]
    InvalidFormat { id: String, format: String },
}

/* rtlamr prints the ids as numbers, people write them both ways in yaml */
fn deserialize_meter_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    return match RawId::deserialize(deserializer)? {
        RawId::Number(n) => Ok(n.to_string()),
        RawId::Text(s) => Ok(s.trim().to_string()),
    };
}

#[derive(Deserialize, Serialize, Clone, PartialEq, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadStyle {
    /// Formatted value as plain text on `<base>/<name>/state`
    #[default]
    State,
    /// `{"meter_value": .., "meter_time": ..}` on `<base>/<id>/meter_reading`
    Json,
}

#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublishFailurePolicy {
    /// Log the failure and keep reading
    #[default]
    Continue,
    /// Treat the failure like any other fault and restart both processes
    Restart,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MeterConfig {
    #[serde(deserialize_with = "deserialize_meter_id")]
    pub id: String,
    pub protocol: String,
    pub name: Option<String>,
    pub unit_of_measurement: Option<String>,
    pub icon: Option<String>,
    pub format: Option<String>,
}

impl MeterConfig {
    pub fn display_name(&self) -> String {
        return match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!("meter_{}", self.id),
        };
    }
}

fn general_sleep_for_default() -> u64 { return 0 }
fn general_read_timeout_default() -> u64 { return 180 }
fn general_tuner_settle_default() -> u64 { return 5 }
fn general_grace_period_default() -> u64 { return 1 }
fn general_recovery_backoff_default() -> u64 { return 5 }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct GeneralConfig {
    #[serde(default="general_sleep_for_default")]
    pub sleep_for: u64,
    pub usb_device: Option<String>,
    #[serde(default)]
    pub format: LineFormat,
    #[serde(default)]
    pub payload: PayloadStyle,
    #[serde(default="general_read_timeout_default")]
    pub read_timeout: u64,
    #[serde(default="general_tuner_settle_default")]
    pub tuner_settle: u64,
    #[serde(default="general_grace_period_default")]
    pub grace_period: u64,
    #[serde(default="general_recovery_backoff_default")]
    pub recovery_backoff: u64,
    #[serde(default)]
    pub publish_failure: PublishFailurePolicy,
}

impl GeneralConfig {
    pub fn cycle_duration(&self) -> Duration {
        return Duration::from_secs(self.sleep_for);
    }

    /// `None` means reads are never bounded
    pub fn read_timeout(&self) -> Option<Duration> {
        if self.read_timeout == 0 {
            return None;
        }
        return Some(Duration::from_secs(self.read_timeout));
    }

    pub fn tuner_settle(&self) -> Duration {
        return Duration::from_secs(self.tuner_settle);
    }

    pub fn grace_period(&self) -> Duration {
        return Duration::from_secs(self.grace_period);
    }

    pub fn recovery_backoff(&self) -> Duration {
        return Duration::from_secs(self.recovery_backoff);
    }

    pub fn usb_device(&self) -> Option<&Path> {
        return self.usb_device.as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(Path::new);
    }
}

fn general_default() -> GeneralConfig {
    return GeneralConfig {
        sleep_for: general_sleep_for_default(),
        usb_device: None,
        format: LineFormat::default(),
        payload: PayloadStyle::default(),
        read_timeout: general_read_timeout_default(),
        tuner_settle: general_tuner_settle_default(),
        grace_period: general_grace_period_default(),
        recovery_backoff: general_recovery_backoff_default(),
        publish_failure: PublishFailurePolicy::default(),
    }
}

fn mqtt_port_default() -> u16 { return 1883 }
fn mqtt_client_name_default() -> String { return "rtlamr2mqtt".to_string() }
fn mqtt_base_topic_default() -> String { return "/rtlamr".to_string() }
fn mqtt_ha_enabled_default() -> bool { return true }
fn mqtt_ha_prefix_default() -> String { return "homeassistant".to_string() }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default="mqtt_port_default")]
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
    #[serde(default="mqtt_base_topic_default")]
    pub base_topic: String,
    #[serde(default="mqtt_ha_enabled_default")]
    pub ha_enabled: bool,
    #[serde(default="mqtt_ha_prefix_default")]
    pub ha_prefix: String,
}

impl MqttConfig {
    pub fn availability_topic(&self) -> String {
        return format!("{}/status", self.base_topic.trim_end_matches('/'));
    }
}

fn programs_rtltcp_default() -> String { return "/usr/bin/rtl_tcp".to_string() }
fn programs_rtlamr_default() -> String { return "/usr/bin/rtlamr".to_string() }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ProgramsConfig {
    #[serde(default="programs_rtltcp_default")]
    pub rtltcp: String,
    #[serde(default="programs_rtlamr_default")]
    pub rtlamr: String,
}

fn programs_default() -> ProgramsConfig {
    return ProgramsConfig { rtltcp: programs_rtltcp_default(), rtlamr: programs_rtlamr_default() }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct CustomParameters {
    pub rtltcp: Option<String>,
    pub rtlamr: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    #[serde(default="general_default")]
    pub general: GeneralConfig,
    pub mqtt: MqttConfig,
    #[serde(default="programs_default")]
    pub programs: ProgramsConfig,
    #[serde(default)]
    pub custom_parameters: CustomParameters,
    pub meters: Vec<MeterConfig>,
}

impl Config {
    /// Loads the config from `path` or, if none was given, from the first
    /// file of [`CONFIG_SEARCH_PATHS`] that exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let candidates: Vec<PathBuf> = CONFIG_SEARCH_PATHS.iter().map(PathBuf::from).collect();
                match candidates.iter().find(|p| p.is_file()) {
                    Some(p) => p.clone(),
                    None => return Err(ConfigError::NotFound(candidates)),
                }
            }
        };

        info!("Reading config from {path:?}");
        let contents = fs::read_to_string(&path)
            .map_err(|source| ConfigError::Io { path: path.clone(), source })?;

        return Self::from_yaml(&contents);
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let c: Config = serde_yml::from_str(contents)?;
        c.validate()?;
        debug!("Config contains {} meters", c.meters.len());
        return Ok(c);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.meters.is_empty() {
            return Err(ConfigError::NoMeters);
        }

        let mut seen = HashSet::new();
        for meter in self.meters.iter() {
            if !seen.insert(meter.id.as_str()) {
                return Err(ConfigError::DuplicateMeterId(meter.id.clone()));
            }

            if meter.protocol.trim().is_empty() {
                return Err(ConfigError::MissingProtocol(meter.id.clone()));
            }

            if let Some(format) = &meter.format {
                if !format.contains('#') {
                    return Err(ConfigError::InvalidFormat { id: meter.id.clone(), format: format.clone() });
                }
            }
        }

        return Ok(());
    }

    pub fn meter_ids(&self) -> Vec<String> {
        return self.meters.iter().map(|m| m.id.clone()).collect();
    }
}
