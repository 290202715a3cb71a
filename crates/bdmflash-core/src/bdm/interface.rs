//! Interface capability table
//!
//! Each cable family gets one [`BdmInterface`] implementation, chosen once
//! when a session is opened. The serial exchange, the stop sequence and
//! resynchronization are shared and driven by the cable's [`PinMap`]; the
//! reset, restart, step and release sequences are cable specific.

use super::channel::Channel;
use super::frame::{cmd, FRAME_BITS};
use super::port::{BdmPort, PinMap};
use super::{coldfire, icd, pd};
use crate::error::{Error, Result};
use crate::poll::WaitOutcome;
use crate::status::TargetStatus;
use alloc::boxed::Box;
use core::fmt;
use core::str::FromStr;

/// NOP frames sent before the resynchronization bit search
const RESYNC_NOPS: usize = 3;

/// Physical interface family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "lowercase"))]
pub enum InterfaceKind {
    /// Public-domain CPU32 cable (direct BKPT*/DSCLK drive)
    Pd,
    /// CPU32 ICD cable (dedicated serial pins, OE/LED/BERR lines)
    Icd,
    /// ColdFire cable
    #[default]
    ColdFire,
}

impl InterfaceKind {
    /// All supported kinds
    pub const ALL: [InterfaceKind; 3] = [Self::Pd, Self::Icd, Self::ColdFire];

    /// Short name used on command lines and in config files
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pd => "pd",
            Self::Icd => "icd",
            Self::ColdFire => "coldfire",
        }
    }

    /// Line layout of this cable
    pub fn pins(&self) -> &'static PinMap {
        match self {
            Self::Pd => &pd::PINS,
            Self::Icd => &icd::PINS,
            Self::ColdFire => &coldfire::PINS,
        }
    }

    /// Build the capability table for this cable
    pub fn interface<P: BdmPort>(&self) -> Box<dyn BdmInterface<P>> {
        match self {
            Self::Pd => Box::new(pd::Pd),
            Self::Icd => Box::new(icd::Icd),
            Self::ColdFire => Box::new(coldfire::ColdFire),
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InterfaceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let matches = |names: &[&str]| names.iter().any(|n| n.eq_ignore_ascii_case(s));
        if matches(&["pd", "cpu32-pd"]) {
            Ok(Self::Pd)
        } else if matches(&["icd", "cpu32-icd"]) {
            Ok(Self::Icd)
        } else if matches(&["coldfire", "cf"]) {
            Ok(Self::ColdFire)
        } else {
            Err(Error::IllegalOperation)
        }
    }
}

/// Operations every cable family provides
pub trait BdmInterface<P: BdmPort> {
    /// Which family this is
    fn kind(&self) -> InterfaceKind;

    /// Bring the lines into a known, non-intrusive state
    fn init(&self, ch: &mut Channel<P>) -> Result<()> {
        ch.write_lines(ch.pins().control.stopped_idle)
    }

    /// Let go of the lines before the channel is closed
    fn deinit(&self, ch: &mut Channel<P>) -> Result<()> {
        ch.write_lines(ch.pins().control.released)
    }

    /// Decode the status lines
    fn get_status(&self, ch: &mut Channel<P>) -> Result<TargetStatus> {
        ch.status()
    }

    /// Reset the target so it comes out of reset in background mode
    fn reset_chip(&self, ch: &mut Channel<P>) -> Result<()>;

    /// Reset the target and let it run from its reset vector
    fn restart_chip(&self, ch: &mut Channel<P>) -> Result<()>;

    /// Bring the target into background mode
    fn stop_chip(&self, ch: &mut Channel<P>) -> Result<()> {
        stop_chip(ch)
    }

    /// Execute exactly one instruction
    fn step_chip(&self, ch: &mut Channel<P>) -> Result<()>;

    /// Release every control line; the target runs free
    fn release_chip(&self, ch: &mut Channel<P>) -> Result<()> {
        ch.write_lines(ch.pins().control.released)
    }

    /// Exchange one 17-bit frame with the target
    fn serial_clock(&self, ch: &mut Channel<P>, command: u16, delay_bits: u32) -> Result<u32> {
        let status = self.get_status(ch)?;
        if let Some(fault) = status.unavailable() {
            return Err(fault);
        }
        if !status.contains(TargetStatus::STOPPED) {
            self.stop_chip(ch)?;
        }

        let frame = ch.shift(command, delay_bits, ch.pins().control.shift_idle, true)?;
        if ch.debug_level() >= 2 {
            log::trace!("serial_clock: 0x{:04X} -> 0x{:05X}", command, frame);
        }
        Ok(frame)
    }

    /// Switch the cable LED
    fn set_led(&self, ch: &mut Channel<P>, on: bool) -> Result<()> {
        ch.set_led_state(on);
        if ch.pins().control.led == 0 {
            log::debug!("{}: cable has no LED", self.kind());
            return Ok(());
        }
        let shadow = ch.shadow();
        ch.write_lines(shadow)
    }

    /// Recover 17-bit frame alignment after a corrupted shift
    fn resynchronize(&self, ch: &mut Channel<P>) -> Result<()> {
        resynchronize(ch)
    }
}

/// Stop sequence shared by all cables
///
/// The freeze line is polled with the channel's wait bound. If the target
/// does not freeze and the cable can force a bus error, one is forced to
/// knock a hung bus cycle loose and the line is polled once more.
pub fn stop_chip<P: BdmPort>(ch: &mut Channel<P>) -> Result<()> {
    let control = ch.pins().control;

    if ch.status()?.contains(TargetStatus::STOPPED) {
        return ch.settle_lines(control.stopped_idle);
    }

    ch.write_lines(control.stopped_idle | control.bkpt)?;
    let mut outcome = ch.wait_freeze()?;

    if outcome == WaitOutcome::Timeout && control.force_berr != 0 && ch.force_berr_on_stop() {
        log::debug!("stop_chip: target not frozen, forcing bus error");
        ch.write_lines(control.stopped_idle | control.bkpt | control.force_berr)?;
        ch.delay(ch.timing().long_ns);
        ch.write_lines(control.stopped_idle | control.bkpt)?;
        outcome = ch.wait_freeze()?;
    }

    match outcome {
        WaitOutcome::Done(polls) => {
            if ch.debug_level() >= 1 {
                log::debug!("stop_chip: frozen after {} polls", polls);
            }
            ch.write_lines(control.stopped_idle)
        }
        WaitOutcome::Timeout => {
            ch.write_lines(control.stopped_idle)?;
            Err(Error::Response)
        }
    }
}

/// Resynchronization shared by all cables
pub fn resynchronize<P: BdmPort>(ch: &mut Channel<P>) -> Result<()> {
    let idle = ch.pins().control.shift_idle;

    for _ in 0..RESYNC_NOPS {
        ch.shift(cmd::NOP, 0, idle, false)?;
    }

    for pulses in 0..FRAME_BITS {
        if !ch.dso()? {
            if ch.debug_level() >= 1 {
                log::debug!("resynchronize: aligned after {} pulses", pulses);
            }
            return Ok(());
        }
        ch.pulse_clock(idle)?;
    }

    if !ch.dso()? {
        return Ok(());
    }
    Err(Error::Unknown)
}

/// Shared pre-check for step: refuse when the target is unreachable
pub(crate) fn check_available<P: BdmPort>(
    iface: &dyn BdmInterface<P>,
    ch: &mut Channel<P>,
) -> Result<TargetStatus> {
    let status = iface.get_status(ch)?;
    match status.unavailable() {
        Some(fault) => Err(fault),
        None => Ok(status),
    }
}

/// Pulse reset with the breakpoint line in the requested state
pub(crate) fn pulse_reset<P: BdmPort>(ch: &mut Channel<P>, base: u8, hold_bkpt: bool) -> Result<()> {
    let control = ch.pins().control;
    let bkpt = if hold_bkpt { control.bkpt } else { 0 };

    ch.write_lines(base | bkpt | control.reset)?;
    ch.delay(ch.timing().long_ns);
    ch.delay(ch.timing().reset_extra_ns);
    ch.write_lines(base | bkpt)?;
    ch.delay(ch.timing().long_ns);
    Ok(())
}

/// Single step shared by the cables: GO with BKPT held re-freezes the
/// target after one instruction
pub(crate) fn step_with_bkpt<P: BdmPort>(
    iface: &dyn BdmInterface<P>,
    ch: &mut Channel<P>,
) -> Result<()> {
    let status = check_available(iface, ch)?;
    if !status.contains(TargetStatus::STOPPED) {
        iface.stop_chip(ch)?;
    }

    let control = ch.pins().control;
    ch.shift(cmd::GO, 0, control.shift_idle | control.bkpt, false)?;
    ch.write_lines(control.stopped_idle | control.bkpt)?;
    iface.stop_chip(ch)
}
