//! Open BDM session
//!
//! A [`Session`] owns its port for as long as it is open, which makes the
//! one-session-per-channel rule a property of ownership: the port cannot be
//! handed to a second session until [`Session::close`] gives it back.

use super::channel::Channel;
use super::frame::{cmd, Response};
use super::interface::{BdmInterface, InterfaceKind};
use super::memory::BdmMemory;
use super::port::BdmPort;
use super::timing::{Timing, REFERENCE_SPEED};
use crate::error::{Error, Result};
use crate::poll::{poll_bounded, WaitOutcome};
use crate::status::TargetStatus;
use alloc::boxed::Box;

/// Session settings, fixed at open and adjustable through [`Command`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
pub struct SessionConfig {
    /// Cable family
    pub interface: InterfaceKind,
    /// Speed setting (0 = no per-bit delay)
    pub speed: u32,
    /// Check power/cable before trusting freeze/reset readings
    pub sense_cable: bool,
    /// Trace verbosity 0..=3
    pub debug_level: u8,
    /// Force a bus error when a stop does not take
    pub force_berr_on_stop: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interface: InterfaceKind::default(),
            speed: REFERENCE_SPEED,
            sense_cable: true,
            debug_level: 0,
            force_berr_on_stop: true,
        }
    }
}

/// Command-style call surface, one variant per lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Initialise the lines (reopens a deinitialised session)
    Init,
    /// Release the lines; further operations fail with `NotOpen`
    Deinit,
    /// Reset into background mode
    ResetChip,
    /// Reset and run
    RestartChip,
    /// Enter background mode
    StopChip,
    /// Execute one instruction
    StepChip,
    /// Query status; returns the status bits
    GetStatus,
    /// Release the target
    ReleaseChip,
    /// Change the speed setting
    Speed(u32),
    /// Enable or disable power/cable sensing
    SenseCable(bool),
    /// Change trace verbosity
    DebugLevel(u8),
    /// Switch the cable LED
    SetLed(bool),
}

/// An open BDM session on one channel
pub struct Session<P: BdmPort> {
    channel: Channel<P>,
    interface: Box<dyn BdmInterface<P>>,
    open: bool,
}

impl<P: BdmPort> Session<P> {
    /// Take ownership of `port` and initialise the cable
    pub fn open(port: P, config: SessionConfig) -> Result<Self> {
        let kind = config.interface;
        let mut channel = Channel::new(port, kind.pins(), Timing::from_speed(config.speed));
        channel.set_sense_cable(config.sense_cable);
        channel.set_debug_level(config.debug_level);
        channel.set_force_berr_on_stop(config.force_berr_on_stop);

        let interface = kind.interface::<P>();
        interface.init(&mut channel).map_err(|e| {
            log::debug!("{}: init failed: {}", kind, e);
            Error::OpenFail
        })?;
        log::debug!("Opened {} session at speed {}", kind, config.speed);

        Ok(Self {
            channel,
            interface,
            open: true,
        })
    }

    /// Release the lines and give the port back
    pub fn close(mut self) -> Result<P> {
        if self.open {
            self.interface.deinit(&mut self.channel)?;
        }
        Ok(self.channel.into_port())
    }

    /// Whether the session accepts operations
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Cable family of this session
    pub fn kind(&self) -> InterfaceKind {
        self.interface.kind()
    }

    /// Line-level state
    pub fn channel(&self) -> &Channel<P> {
        &self.channel
    }

    /// Line-level state, mutably
    pub fn channel_mut(&mut self) -> &mut Channel<P> {
        &mut self.channel
    }

    /// Borrow the port
    pub fn port(&self) -> &P {
        self.channel.port()
    }

    /// Borrow the port mutably
    pub fn port_mut(&mut self) -> &mut P {
        self.channel.port_mut()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::NotOpen)
        }
    }

    fn trace_op(&self, op: &str) {
        if self.channel.debug_level() >= 1 {
            log::debug!("{}: {}", self.interface.kind(), op);
        }
    }

    /// Decode the target status
    pub fn get_status(&mut self) -> Result<TargetStatus> {
        self.ensure_open()?;
        self.interface.get_status(&mut self.channel)
    }

    /// Enter background mode
    pub fn stop_chip(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.trace_op("stop_chip");
        self.interface.stop_chip(&mut self.channel)
    }

    /// Execute one instruction
    pub fn step_chip(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.trace_op("step_chip");
        self.interface.step_chip(&mut self.channel)
    }

    /// Reset into background mode
    pub fn reset_chip(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.trace_op("reset_chip");
        self.interface.reset_chip(&mut self.channel)
    }

    /// Reset and run from the reset vector
    pub fn restart_chip(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.trace_op("restart_chip");
        self.interface.restart_chip(&mut self.channel)
    }

    /// Release every control line
    pub fn release_chip(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.trace_op("release_chip");
        self.interface.release_chip(&mut self.channel)
    }

    /// Switch the cable LED
    pub fn set_led(&mut self, on: bool) -> Result<()> {
        self.ensure_open()?;
        self.interface.set_led(&mut self.channel, on)
    }

    /// Recover frame alignment
    pub fn resynchronize(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.trace_op("resynchronize");
        self.interface.resynchronize(&mut self.channel)
    }

    /// Exchange one raw 17-bit frame
    pub fn serial_clock(&mut self, command: u16, delay_bits: u32) -> Result<u32> {
        self.ensure_open()?;
        self.interface
            .serial_clock(&mut self.channel, command, delay_bits)
    }

    /// Exchange one frame and decode the response
    pub fn exchange(&mut self, command: u16) -> Result<Response> {
        self.serial_clock(command, 0).map(Response::decode)
    }

    /// Send a command or operand word, failing on error responses
    pub fn send_word(&mut self, word: u16) -> Result<()> {
        self.exchange(word)?.check()?;
        Ok(())
    }

    /// Clock NOPs until a result arrives, bounded by the wait count
    pub fn collect_word(&mut self) -> Result<u16> {
        let bound = self.channel.timing().wait_count;
        let mut data = 0;
        let outcome = poll_bounded(bound, || match self.exchange(cmd::NOP)?.check()? {
            Response::Data(word) => {
                data = word;
                Ok(true)
            }
            _ => Ok(false),
        })?;
        match outcome {
            WaitOutcome::Done(_) => Ok(data),
            WaitOutcome::Timeout => Err(Error::Response),
        }
    }

    /// Change the speed setting, rederiving all timing
    pub fn set_speed(&mut self, speed: u32) {
        let reset_extra = self.channel.timing().reset_extra_ns;
        self.channel
            .set_timing(Timing::from_speed(speed).with_reset_extra_ns(reset_extra));
    }

    /// Run one command from the command-style surface
    ///
    /// Returns the status bits for `GetStatus` and zero otherwise.
    pub fn command(&mut self, command: Command) -> Result<u32> {
        match command {
            Command::Init => {
                self.interface.init(&mut self.channel)?;
                self.open = true;
                return Ok(0);
            }
            Command::Deinit => {
                self.ensure_open()?;
                self.interface.deinit(&mut self.channel)?;
                self.open = false;
                return Ok(0);
            }
            _ => self.ensure_open()?,
        }

        match command {
            Command::ResetChip => self.reset_chip()?,
            Command::RestartChip => self.restart_chip()?,
            Command::StopChip => self.stop_chip()?,
            Command::StepChip => self.step_chip()?,
            Command::GetStatus => return Ok(self.get_status()?.bits()),
            Command::ReleaseChip => self.release_chip()?,
            Command::Speed(speed) => self.set_speed(speed),
            Command::SenseCable(sense) => self.channel.set_sense_cable(sense),
            Command::DebugLevel(level) => self.channel.set_debug_level(level),
            Command::SetLed(on) => self.set_led(on)?,
            Command::Init | Command::Deinit => {}
        }
        Ok(0)
    }

    /// Byte-stream write: every big-endian word is one exchange
    ///
    /// Returns the number of bytes consumed.
    pub fn write_stream(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if data.len() % 2 != 0 {
            return Err(Error::IllegalSize);
        }
        for pair in data.chunks_exact(2) {
            self.send_word(u16::from_be_bytes([pair[0], pair[1]]))?;
        }
        Ok(data.len())
    }

    /// Byte-stream read: every big-endian word is the result of a NOP
    pub fn read_stream(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        if buf.len() % 2 != 0 {
            return Err(Error::IllegalSize);
        }
        for pair in buf.chunks_exact_mut(2) {
            pair.copy_from_slice(&self.collect_word()?.to_be_bytes());
        }
        Ok(buf.len())
    }

    /// Read a data (0..=7) or address (8..=15) register
    pub fn read_register(&mut self, reg: u8) -> Result<u32> {
        if reg > 15 {
            return Err(Error::IllegalOperation);
        }
        self.send_word(cmd::RDREG | reg as u16)?;
        let high = self.collect_word()?;
        let low = self.collect_word()?;
        Ok(((high as u32) << 16) | low as u32)
    }

    /// Write a data (0..=7) or address (8..=15) register
    pub fn write_register(&mut self, reg: u8, value: u32) -> Result<()> {
        if reg > 15 {
            return Err(Error::IllegalOperation);
        }
        self.send_word(cmd::WRREG | reg as u16)?;
        self.send_word((value >> 16) as u16)?;
        self.send_word(value as u16)?;
        self.collect_word()?;
        Ok(())
    }

    /// Memory access through this session
    pub fn memory(&mut self) -> BdmMemory<'_, P> {
        BdmMemory::new(self)
    }
}
