//! TOML configuration files
//!
//! ```toml
//! [session]
//! interface = "coldfire"
//! speed = 4
//! sense_cable = true
//! debug_level = 1
//!
//! [cfm]
//! ipsbar = "0x40000000"
//! flash_base = 0
//! sys_clock_hz = 64000000
//!
//! [poll]
//! erase_interval_us = 1000
//!
//! [[flash]]
//! base = 0x0
//! family = "29"
//! ```

use std::format;
use std::fs;
use std::path::Path;
use std::string::{String, ToString};
use std::vec::Vec;

use crate::bdm::SessionConfig;
use crate::flash::{AlgorithmOptions, CfmOptions};

/// Errors from loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range
    #[error("invalid value for {field}: {message}")]
    Value {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        message: String,
    },
}

/// One flash device to register at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashEntry {
    /// Base address to probe
    pub base: u32,
    /// Family hint; `None` probes every family
    pub family: Option<String>,
}

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    /// Session settings
    pub session: SessionConfig,
    /// Algorithm runtime variables
    pub algorithms: AlgorithmOptions,
    /// Devices to register
    pub flash: Vec<FlashEntry>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    #[serde(default)]
    session: SessionConfig,
    cfm: Option<TomlCfm>,
    poll: Option<TomlPoll>,
    #[serde(default)]
    flash: Vec<TomlFlash>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlCfm {
    #[serde(default, deserialize_with = "deserialize_hex_u32_opt")]
    ipsbar: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_hex_u32_opt")]
    flash_base: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_hex_u32_opt")]
    sys_clock_hz: Option<u32>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlPoll {
    program_limit: Option<u32>,
    erase_interval_us: Option<u32>,
    erase_limit: Option<u32>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlFlash {
    #[serde(deserialize_with = "deserialize_hex_u32")]
    base: u32,
    family: Option<String>,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u32),
    Str(String),
}

fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

fn deserialize_hex_u32_opt<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_hex_u32(deserializer).map(Some)
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: TomlConfig = toml::from_str(content)?;

        if file.session.debug_level > 3 {
            return Err(ConfigError::Value {
                field: "session.debug_level",
                message: format!("{} is above 3", file.session.debug_level),
            });
        }

        let mut algorithms = AlgorithmOptions::default();
        if let Some(cfm) = file.cfm {
            let defaults = CfmOptions::default();
            algorithms.cfm = CfmOptions {
                ipsbar: cfm.ipsbar.unwrap_or(defaults.ipsbar),
                flash_base: cfm.flash_base.unwrap_or(defaults.flash_base),
                sys_clock_hz: cfm.sys_clock_hz.unwrap_or(defaults.sys_clock_hz),
            };
        }
        if let Some(poll) = file.poll {
            if let Some(limit) = poll.program_limit {
                algorithms.program_poll_limit = limit;
            }
            if let Some(interval) = poll.erase_interval_us {
                algorithms.erase_poll_interval_us = interval;
            }
            if let Some(limit) = poll.erase_limit {
                algorithms.erase_poll_limit = limit;
            }
        }

        let flash = file
            .flash
            .into_iter()
            .map(|f| FlashEntry {
                base: f.base,
                family: f.family,
            })
            .collect();

        Ok(Self {
            session: file.session,
            algorithms,
            flash,
        })
    }
}

/// Load a configuration file
pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Config::from_toml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bdm::InterfaceKind;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x1000"), Ok(0x1000));
        assert_eq!(parse_number("0X1f"), Ok(0x1F));
        assert_eq!(parse_number(" 4096 "), Ok(4096));
        assert!(parse_number("0xZZ").is_err());
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml_str(
            r#"
            [session]
            interface = "icd"
            speed = 2
            sense_cable = false
            debug_level = 2

            [cfm]
            ipsbar = "0x80000000"
            flash_base = "0x10000000"
            sys_clock_hz = 80000000

            [poll]
            erase_limit = 500

            [[flash]]
            base = "0x00100000"
            family = "29"

            [[flash]]
            base = 0x200000
            "#,
        )
        .unwrap();

        assert_eq!(config.session.interface, InterfaceKind::Icd);
        assert_eq!(config.session.speed, 2);
        assert!(!config.session.sense_cable);
        assert!(config.session.force_berr_on_stop);
        assert_eq!(config.algorithms.cfm.ipsbar, 0x8000_0000);
        assert_eq!(config.algorithms.cfm.flash_base, 0x1000_0000);
        assert_eq!(config.algorithms.cfm.sys_clock_hz, 80_000_000);
        assert_eq!(config.algorithms.erase_poll_limit, 500);
        assert_eq!(config.algorithms.program_poll_limit, 0x10000);
        assert_eq!(
            config.flash,
            [
                FlashEntry {
                    base: 0x10_0000,
                    family: Some("29".into())
                },
                FlashEntry {
                    base: 0x20_0000,
                    family: None
                },
            ]
        );
    }

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            Config::from_toml_str("[session]\ninterface = \"usb\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[session]\ndebug_level = 7"),
            Err(ConfigError::Value { .. })
        ));
        assert!(matches!(
            load("/nonexistent/bdmflash.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
