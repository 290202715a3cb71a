//! bdmflash - BDM target control and flash programmer
//!
//! Drives a 68k/ColdFire target through a Background Debug Mode cable and
//! programs the flash devices on its bus.
//!
//! # Architecture
//!
//! The command line opens a port backend, wraps it in a BDM session and
//! runs one command:
//! - **Target commands** (status, stop, step, reset, restart, release) map
//!   onto the session's lifecycle operations
//! - **Memory commands** (probe, read, load, erase, blank-check) go through
//!   an area registry, so that writes landing in flash are programmed by
//!   the algorithm that recognised the device

mod backends;
mod cli;
mod commands;

use bdmflash_core::area::AreaRegistry;
use bdmflash_core::bdm::Session;
use bdmflash_core::config::{self, Config, FlashEntry};
use clap::Parser;
use cli::{Cli, Commands};
use commands::target::Lifecycle;
use commands::{BdmSession, CmdResult};

fn main() -> CmdResult {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {}
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    match cli.command {
        Commands::ListAlgorithms => {
            commands::list_algorithms();
            return Ok(());
        }
        Commands::ListBackends => {
            commands::list_backends();
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli)?;
    let port = backends::open_port(&cli.backend, config.session.interface, &config)?;
    let mut session = Session::open(port, config.session)?;
    log::debug!("Session open on {} ({})", cli.backend, config.session.interface);

    let result = run(&mut session, &config, cli.command);

    // The lines are released even when the command failed
    if let Err(e) = session.close() {
        log::warn!("Closing session failed: {}", e);
    }
    result
}

/// Configuration file (if any) with command-line overrides applied
fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = config::load(path)?;
            log::info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::default(),
    };

    if let Some(kind) = cli.interface {
        config.session.interface = kind;
    }
    if let Some(speed) = cli.speed {
        config.session.speed = speed;
    }
    if config.session.debug_level == 0 {
        config.session.debug_level = cli.verbose.min(3);
    }
    Ok(config)
}

/// Registry with the configured flash devices, then `extra`, registered
fn build_registry(
    session: &mut BdmSession,
    config: &Config,
    extra: &[FlashEntry],
) -> Result<AreaRegistry, Box<dyn std::error::Error>> {
    let mut registry = AreaRegistry::new(config.algorithms);
    commands::memory::register_flash(session, &mut registry, &config.flash)?;
    commands::memory::register_flash(session, &mut registry, extra)?;
    Ok(registry)
}

fn run(session: &mut BdmSession, config: &Config, command: Commands) -> CmdResult {
    use commands::memory;
    use commands::target::{run_lifecycle, run_status};

    match command {
        Commands::Status => run_status(session),
        Commands::Stop => run_lifecycle(session, Lifecycle::Stop),
        Commands::Step => run_lifecycle(session, Lifecycle::Step),
        Commands::Reset => run_lifecycle(session, Lifecycle::Reset),
        Commands::Restart => run_lifecycle(session, Lifecycle::Restart),
        Commands::Release => run_lifecycle(session, Lifecycle::Release),
        Commands::Probe { addr, family } => {
            let mut registry = AreaRegistry::new(config.algorithms);
            memory::run_probe(session, &mut registry, addr, family.as_deref())
        }
        Commands::Read { addr, len, output } => {
            let registry = build_registry(session, config, &[])?;
            memory::run_read(session, &registry, addr, len, &output)
        }
        Commands::Load {
            addr,
            input,
            flash,
            erase,
            verify,
        } => {
            let extra: Vec<FlashEntry> = flash
                .into_iter()
                .map(|f| FlashEntry {
                    base: f.base,
                    family: f.family,
                })
                .collect();
            let mut registry = build_registry(session, config, &extra)?;
            memory::run_load(session, &mut registry, addr, &input, erase, verify)
        }
        Commands::Erase { addr, all, sector } => {
            let mut registry = build_registry(session, config, &[])?;
            memory::run_erase(session, &mut registry, addr, all, sector)
        }
        Commands::BlankCheck { addr, sector } => {
            let mut registry = build_registry(session, config, &[])?;
            memory::run_blank_check(session, &mut registry, addr, sector)
        }
        Commands::ListAlgorithms | Commands::ListBackends => Ok(()),
    }
}
