//! CLI argument parsing

use crate::backends;
use bdmflash_core::bdm::InterfaceKind;
use bdmflash_core::config::parse_number;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    parse_number(s)
}

/// Parse `BASE` or `BASE:FAMILY`
fn parse_flash_arg(s: &str) -> Result<FlashArg, String> {
    let (base, family) = match s.split_once(':') {
        Some((base, family)) if !family.is_empty() => (base, Some(family.to_string())),
        Some((base, _)) => (base, None),
        None => (s, None),
    };
    Ok(FlashArg {
        base: parse_number(base)?,
        family,
    })
}

/// Generate dynamic help text for the backend argument
fn backend_help() -> String {
    format!("Port backend [available: {}]", backends::backend_names_short())
}

/// A flash device to register before the command runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashArg {
    /// Base address of the device
    pub base: u32,
    /// Family to probe instead of trying all
    pub family: Option<String>,
}

#[derive(Parser)]
#[command(name = "bdmflash")]
#[command(author, version, about = "BDM target control and flash programmer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Cable family: pd, icd or coldfire
    #[arg(short, long, global = true)]
    pub interface: Option<InterfaceKind>,

    /// Speed setting (0 = no per-bit delay)
    #[arg(long, global = true)]
    pub speed: Option<u32>,

    /// Port backend, e.g. sim:chip=am29f040,base=0x0
    #[arg(short = 'p', long, global = true, default_value = "sim", help = backend_help())]
    pub backend: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the decoded target status
    Status,

    /// Enter background mode
    Stop,

    /// Execute one instruction
    Step,

    /// Reset into background mode
    Reset,

    /// Reset and let the target run
    Restart,

    /// Release every control line
    Release,

    /// Probe for a flash device and show what was found
    Probe {
        /// Base address to probe
        #[arg(short, long, value_parser = parse_hex_u32)]
        addr: u32,

        /// Only try this family (see list-algorithms)
        #[arg(short, long)]
        family: Option<String>,
    },

    /// Read target memory to a file
    Read {
        /// Start address
        #[arg(short, long, value_parser = parse_hex_u32)]
        addr: u32,

        /// Number of bytes
        #[arg(short, long, value_parser = parse_hex_u32)]
        len: u32,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write a file to target memory, programming flash where registered
    Load {
        /// Start address
        #[arg(short, long, value_parser = parse_hex_u32)]
        addr: u32,

        /// Input file path
        #[arg(short = 'f', long)]
        input: PathBuf,

        /// Register a flash device first (BASE or BASE:FAMILY, repeatable)
        #[arg(long, value_parser = parse_flash_arg)]
        flash: Vec<FlashArg>,

        /// Erase the flash sectors the file covers first
        #[arg(long)]
        erase: bool,

        /// Read back and compare after writing
        #[arg(long)]
        verify: bool,
    },

    /// Erase a flash device
    Erase {
        /// Any address inside the device
        #[arg(short, long, value_parser = parse_hex_u32, required_unless_present = "all")]
        addr: Option<u32>,

        /// Erase every registered flash device
        #[arg(long)]
        all: bool,

        /// Only erase the sector containing the address
        #[arg(long, conflicts_with = "all")]
        sector: bool,
    },

    /// Check whether a flash device (or one sector of it) is erased
    BlankCheck {
        /// Any address inside the device
        #[arg(short, long, value_parser = parse_hex_u32)]
        addr: u32,

        /// Only check the sector containing the address
        #[arg(long)]
        sector: bool,
    },

    /// List flash algorithm families and their parts
    ListAlgorithms,

    /// List port backends
    ListBackends,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flash_arg() {
        assert_eq!(
            parse_flash_arg("0x80000:29").unwrap(),
            FlashArg {
                base: 0x80000,
                family: Some("29".to_string())
            }
        );
        assert_eq!(parse_flash_arg("4096").unwrap().family, None);
        assert!(parse_flash_arg("0xZZ").is_err());
    }

    #[test]
    fn test_global_options() {
        let cli = Cli::try_parse_from([
            "bdmflash", "-i", "icd", "--speed", "0", "-p", "sim:chip=am29f040", "probe", "--addr", "0x0",
        ])
        .unwrap();
        assert_eq!(cli.interface, Some(InterfaceKind::Icd));
        assert_eq!(cli.speed, Some(0));
        assert_eq!(cli.backend, "sim:chip=am29f040");
        assert!(matches!(cli.command, Commands::Probe { addr: 0, family: None }));
    }

    #[test]
    fn test_erase_needs_address_or_all() {
        assert!(Cli::try_parse_from(["bdmflash", "erase"]).is_err());
        assert!(Cli::try_parse_from(["bdmflash", "erase", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["bdmflash", "erase", "--all", "--sector"]).is_err());
    }

    #[test]
    fn test_load_flash_list() {
        let cli = Cli::try_parse_from([
            "bdmflash", "load", "-a", "0", "-f", "image.bin", "--flash", "0", "--flash", "0x400000:intelp30",
        ])
        .unwrap();
        let Commands::Load { flash, .. } = cli.command else {
            panic!("not a load command");
        };
        assert_eq!(flash.len(), 2);
        assert_eq!(flash[1].family.as_deref(), Some("intelp30"));
    }
}
