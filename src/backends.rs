//! Port backend registration and dispatch
//!
//! A backend string is `name` or `name:key=value,...`. Hardware transports
//! live outside this tree; the `sim` backend builds a simulated target
//! with RAM and, optionally, one flash part on its bus.

use bdmflash_core::bdm::{BdmPort, InterfaceKind};
use bdmflash_core::config::{parse_number, Config};
use bdmflash_core::flash::default_algorithms;
use bdmflash_core::memory::Width;
use std::collections::HashMap;

/// Default simulated RAM
#[cfg(feature = "sim")]
const SIM_RAM_BASE: u32 = 0x2000_0000;
#[cfg(feature = "sim")]
const SIM_RAM_SIZE: u32 = 0x1_0000;

/// Errors from opening a backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Malformed parameter list
    #[error("invalid parameter '{0}' (expected key=value)")]
    Syntax(String),

    /// No backend of that name is compiled in
    #[error("unknown backend: {0} (available: {avail})", avail = backend_names_short())]
    Unknown(String),

    /// A parameter the backend does not know
    #[error("{backend}: unknown parameter '{key}'")]
    UnknownParameter {
        /// Backend name
        backend: String,
        /// Offending key
        key: String,
    },

    /// A parameter value that does not parse
    #[error("{key}: {message}")]
    Value {
        /// Parameter name
        key: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// The named flash part is not in any family's table
    #[error("unknown flash part: {0}")]
    UnknownChip(String),
}

/// Information about a backend
pub struct BackendInfo {
    /// Name used on the command line
    pub name: &'static str,
    /// Short description including parameters
    pub description: &'static str,
}

/// Backends compiled into this binary
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_backends() -> Vec<BackendInfo> {
    let mut backends = Vec::new();

    #[cfg(feature = "sim")]
    backends.push(BackendInfo {
        name: "sim",
        description: "Simulated target (chip=<part>,base=<addr>,bus=<8|16|32>,ram=<addr>,ramsize=<len>)",
    });

    backends
}

/// Short list of backend names for CLI help
pub fn backend_names_short() -> String {
    let names: Vec<&str> = available_backends().iter().map(|b| b.name).collect();
    if names.is_empty() {
        return "none".to_string();
    }
    names.join(", ")
}

/// Parsed backend string
#[derive(Debug)]
pub struct BackendParams {
    /// Backend name
    pub name: String,
    /// Key-value parameters
    pub params: HashMap<String, String>,
}

impl BackendParams {
    fn number(&self, key: &'static str) -> Result<Option<u32>, BackendError> {
        self.params
            .get(key)
            .map(|v| parse_number(v).map_err(|message| BackendError::Value { key, message }))
            .transpose()
    }

    fn check_keys(&self, known: &[&str]) -> Result<(), BackendError> {
        match self.params.keys().find(|k| !known.contains(&k.as_str())) {
            Some(key) => Err(BackendError::UnknownParameter {
                backend: self.name.clone(),
                key: key.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Split a backend string into name and parameters
pub fn parse_backend_params(s: &str) -> Result<BackendParams, BackendError> {
    let (name, opts) = s.split_once(':').unwrap_or((s, ""));

    let mut params = HashMap::new();
    for opt in opts.split(',').filter(|o| !o.is_empty()) {
        match opt.split_once('=') {
            Some((key, value)) => {
                params.insert(key.to_string(), value.to_string());
            }
            None => return Err(BackendError::Syntax(opt.to_string())),
        }
    }

    Ok(BackendParams {
        name: name.to_string(),
        params,
    })
}

/// Data bus width from a bit count
fn parse_bus_width(s: &str) -> Result<Width, BackendError> {
    match s {
        "8" => Ok(Width::Byte),
        "16" => Ok(Width::Word),
        "32" => Ok(Width::Long),
        other => Err(BackendError::Value {
            key: "bus",
            message: format!("'{}' is not 8, 16 or 32", other),
        }),
    }
}

/// Native data width of a flash part, looked up across every family
fn chip_width(name: &str) -> Option<Width> {
    default_algorithms()
        .iter()
        .flat_map(|a| a.chips().iter())
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .map(|c| c.width)
}

/// Open the port named by `spec` for a `kind` cable
pub fn open_port(spec: &str, kind: InterfaceKind, config: &Config) -> Result<Box<dyn BdmPort>, BackendError> {
    let params = parse_backend_params(spec)?;

    match params.name.as_str() {
        #[cfg(feature = "sim")]
        "sim" => open_sim(&params, kind, config),

        _ => {
            let _ = (kind, config);
            Err(BackendError::Unknown(params.name))
        }
    }
}

#[cfg(feature = "sim")]
fn open_sim(params: &BackendParams, kind: InterfaceKind, config: &Config) -> Result<Box<dyn BdmPort>, BackendError> {
    use bdmflash_sim::{flash_by_name, Ram, SimBus, SimTarget};

    params.check_keys(&["chip", "base", "bus", "ram", "ramsize"])?;

    let mut bus = SimBus::new();
    if let Some(chip) = params.params.get("chip") {
        let width = match params.params.get("bus") {
            Some(bits) => parse_bus_width(bits)?,
            None => chip_width(chip).ok_or_else(|| BackendError::UnknownChip(chip.clone()))?,
        };
        let base = params.number("base")?.unwrap_or(0);
        let flash = flash_by_name(chip, width, base, config.algorithms.cfm.ipsbar)
            .ok_or_else(|| BackendError::UnknownChip(chip.clone()))?;
        log::info!("sim: {} at 0x{:08X}", chip, base);
        bus.attach_boxed(flash);
    }

    let ram = params.number("ram")?.unwrap_or(SIM_RAM_BASE);
    let ram_size = params.number("ramsize")?.unwrap_or(SIM_RAM_SIZE);
    bus.attach(Ram::new(ram, ram_size as usize));
    log::debug!("sim: {} bytes of RAM at 0x{:08X}", ram_size, ram);

    Ok(Box::new(SimTarget::new(kind, bus)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_params() {
        let params = parse_backend_params("sim:chip=am29f040,base=0x80000").unwrap();
        assert_eq!(params.name, "sim");
        assert_eq!(params.params.get("chip").map(String::as_str), Some("am29f040"));
        assert_eq!(params.number("base").unwrap(), Some(0x80000));

        let params = parse_backend_params("sim").unwrap();
        assert!(params.params.is_empty());

        assert!(matches!(parse_backend_params("sim:chip"), Err(BackendError::Syntax(_))));
    }

    #[test]
    fn test_bus_width() {
        assert_eq!(parse_bus_width("16").unwrap(), Width::Word);
        assert!(parse_bus_width("64").is_err());
        assert_eq!(chip_width("am29f040"), Some(Width::Byte));
        assert_eq!(chip_width("nope"), None);
    }

    #[test]
    fn test_unknown_backend() {
        let err = open_port("ch341a", InterfaceKind::ColdFire, &Config::default()).err().unwrap();
        assert!(matches!(err, BackendError::Unknown(_)));
    }

    #[cfg(feature = "sim")]
    #[test]
    fn test_open_sim() {
        let config = Config::default();
        assert!(open_port("sim:chip=am29f040,base=0", InterfaceKind::ColdFire, &config).is_ok());
        assert!(matches!(
            open_port("sim:chip=am29f999", InterfaceKind::ColdFire, &config).err().unwrap(),
            BackendError::UnknownChip(_)
        ));
        assert!(matches!(
            open_port("sim:speed=4", InterfaceKind::ColdFire, &config).err().unwrap(),
            BackendError::UnknownParameter { .. }
        ));
    }
}
