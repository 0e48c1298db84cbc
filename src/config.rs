//! Settings profile
//!
//! A profile is a TOML file with defaults for the device, the line
//! settings and Modbus timing. Flags on the command line take precedence:
//!
//! ```toml
//! device = "cp210x"
//!
//! [line]
//! baud = 19200
//! parity = "even"
//!
//! [modbus]
//! slave = 3
//! timeout_ms = 500
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use uartlink_core::{FlowControl, LineConfig, Parity, StopBits};
use uartlink_modbus::MasterConfig;
use uartlink_serial::DeviceSelector;

use crate::cli::{DeviceArgs, ModbusArgs};

/// Slave addressed when neither flag nor profile names one
pub const DEFAULT_SLAVE: u8 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse profile: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),

    #[error("No device selected (use --device or set `device` in the profile)")]
    NoDevice,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub device: Option<String>,
    #[serde(default)]
    pub line: LineProfile,
    #[serde(default)]
    pub modbus: ModbusProfile,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineProfile {
    pub baud: Option<u32>,
    pub data_bits: Option<u8>,
    pub parity: Option<String>,
    pub stop_bits: Option<String>,
    pub flow: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModbusProfile {
    pub slave: Option<u8>,
    pub timeout_ms: Option<u64>,
    pub post_write_delay_ms: Option<u64>,
    pub idle_delay_ms: Option<u64>,
    pub drain_before_write: Option<bool>,
}

impl Profile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Device selector from the flag, falling back to the profile
    pub fn selector(&self, args: &DeviceArgs) -> Result<DeviceSelector, ConfigError> {
        let device = args
            .device
            .as_deref()
            .or(self.device.as_deref())
            .ok_or(ConfigError::NoDevice)?;
        device
            .parse()
            .map_err(|e: uartlink_serial::Error| ConfigError::Invalid(e.to_string()))
    }

    pub fn line_config(&self, args: &DeviceArgs) -> Result<LineConfig, ConfigError> {
        let mut config = LineConfig::default();
        if let Some(baud) = args.baud.or(self.line.baud) {
            config.baud_rate = baud;
        }
        if let Some(data_bits) = args.data_bits.or(self.line.data_bits) {
            config.data_bits = data_bits;
        }
        if let Some(parity) = args.parity.as_deref().or(self.line.parity.as_deref()) {
            config.parity = parse_setting::<Parity>(parity)?;
        }
        if let Some(stop_bits) = args.stop_bits.as_deref().or(self.line.stop_bits.as_deref()) {
            config.stop_bits = parse_setting::<StopBits>(stop_bits)?;
        }
        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }

    pub fn flow_control(&self, args: &DeviceArgs) -> Result<Option<FlowControl>, ConfigError> {
        args.flow
            .as_deref()
            .or(self.line.flow.as_deref())
            .map(parse_setting::<FlowControl>)
            .transpose()
    }

    pub fn slave(&self, args: &ModbusArgs) -> u8 {
        args.slave.or(self.modbus.slave).unwrap_or(DEFAULT_SLAVE)
    }

    pub fn master_config(&self, args: &ModbusArgs) -> MasterConfig {
        let mut config = MasterConfig::default();
        if let Some(ms) = args.timeout_ms.or(self.modbus.timeout_ms) {
            config.response_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.modbus.post_write_delay_ms {
            config.post_write_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.modbus.idle_delay_ms {
            config.idle_delay = Duration::from_millis(ms);
        }
        if let Some(drain) = self.modbus.drain_before_write {
            config.drain_before_write = drain;
        }
        config
    }
}

fn parse_setting<T>(s: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = uartlink_core::Error>,
{
    s.parse().map_err(|e: uartlink_core::Error| ConfigError::Invalid(e.to_string()))
}
