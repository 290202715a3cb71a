//! Line-level engine shared by every interface variant
//!
//! A [`Channel`] owns the port of one open session together with the state
//! the protocol needs between calls: the shadow of the control register,
//! the timing, and the runtime switches (sense mode, LED, verbosity).

use super::frame::{FRAME_BITS, HEADER_OFFSET};
use super::port::{BdmPort, PinMap};
use super::timing::Timing;
use crate::error::Result;
use crate::poll::{poll_bounded, WaitOutcome};
use crate::status::{self, TargetStatus};

/// Polls of DSO before a frame in fast mode
pub const SETTLE_POLLS: u32 = 100;

/// Exclusive line-level state of one physical channel
pub struct Channel<P> {
    port: P,
    pins: &'static PinMap,
    shadow: u8,
    timing: Timing,
    sense_cable: bool,
    led: bool,
    force_berr_on_stop: bool,
    debug_level: u8,
}

impl<P: BdmPort> Channel<P> {
    /// Wrap a port using the given line layout
    pub fn new(port: P, pins: &'static PinMap, timing: Timing) -> Self {
        Self {
            port,
            pins,
            shadow: pins.control.released,
            timing,
            sense_cable: true,
            led: false,
            force_berr_on_stop: true,
            debug_level: 0,
        }
    }

    /// Line layout of the attached cable
    pub fn pins(&self) -> &'static PinMap {
        self.pins
    }

    /// Last value written to the control register
    pub fn shadow(&self) -> u8 {
        self.shadow
    }

    /// Current timing
    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Replace the timing
    pub fn set_timing(&mut self, timing: Timing) {
        self.timing = timing;
    }

    /// Whether power/cable sensing short-circuits status decoding
    pub fn sense_cable(&self) -> bool {
        self.sense_cable
    }

    /// Enable or disable power/cable sensing
    pub fn set_sense_cable(&mut self, sense: bool) {
        self.sense_cable = sense;
    }

    /// Whether the LED line is held on
    pub fn led(&self) -> bool {
        self.led
    }

    /// Record the LED state; takes effect with the next line write
    pub fn set_led_state(&mut self, on: bool) {
        self.led = on;
    }

    /// Whether a stuck stop may force a bus error
    pub fn force_berr_on_stop(&self) -> bool {
        self.force_berr_on_stop
    }

    /// Allow or forbid forcing a bus error on a stuck stop
    pub fn set_force_berr_on_stop(&mut self, allow: bool) {
        self.force_berr_on_stop = allow;
    }

    /// Trace verbosity
    pub fn debug_level(&self) -> u8 {
        self.debug_level
    }

    /// Set trace verbosity
    pub fn set_debug_level(&mut self, level: u8) {
        self.debug_level = level;
    }

    /// Borrow the port
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Borrow the port mutably
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Give the port back
    pub fn into_port(self) -> P {
        self.port
    }

    /// Drive the control lines, keeping the shadow in step
    ///
    /// The LED bit follows the recorded LED state on every write.
    pub fn write_lines(&mut self, value: u8) -> Result<()> {
        let led = self.pins.control.led;
        let value = if self.led { value | led } else { value & !led };
        self.port.write_control(value)?;
        self.shadow = value;
        Ok(())
    }

    /// Write `value` only if it differs from what the lines already carry
    pub fn settle_lines(&mut self, value: u8) -> Result<()> {
        let led = self.pins.control.led;
        let wanted = if self.led { value | led } else { value & !led };
        if self.shadow != wanted {
            self.write_lines(value)?;
        }
        Ok(())
    }

    /// Sample the raw status register
    pub fn read_raw(&mut self) -> Result<u8> {
        self.port.read_status()
    }

    /// Decode the current target status
    pub fn status(&mut self) -> Result<TargetStatus> {
        let raw = self.read_raw()?;
        Ok(status::decode(raw, &self.pins.status, self.sense_cable))
    }

    /// Logical level of the target's serial output
    pub fn dso(&mut self) -> Result<bool> {
        let raw = self.read_raw()?;
        Ok(self.pins.dso_bit(raw))
    }

    /// Wait for `ns`; zero skips the port call entirely
    pub fn delay(&mut self, ns: u32) {
        if ns > 0 {
            self.port.delay_ns(ns);
        }
    }

    /// Poll the freeze line up to the timing's wait bound
    pub fn wait_freeze(&mut self) -> Result<WaitOutcome> {
        let bound = self.timing.wait_count;
        let freeze = self.pins.status.freeze;
        poll_bounded(bound, || {
            let raw = self.port.read_status()?;
            if self.pins.status.asserted(raw, freeze) {
                return Ok(true);
            }
            let min = self.timing.min_ns;
            if min > 0 {
                self.port.delay_ns(min);
            }
            Ok(false)
        })
    }

    /// Poll DSO for a ready (low) level before the first bit of a frame
    fn settle_dso(&mut self) -> Result<WaitOutcome> {
        poll_bounded(SETTLE_POLLS, || Ok(!self.dso()?))
    }

    /// Shift one frame through the serial lines
    ///
    /// Issues `FRAME_BITS - delay_bits` clock pulses. Bits go out MSB first
    /// from `cmd` placed at the header offset; sampled bits are shifted in
    /// at the bottom. `idle` is held on all other lines throughout.
    pub fn shift(&mut self, cmd: u16, delay_bits: u32, idle: u8, settle: bool) -> Result<u32> {
        let dsi = self.pins.control.dsi;
        let dsclk = self.pins.control.dsclk;
        let clocks = FRAME_BITS.saturating_sub(delay_bits);
        let mut frame = (cmd as u32) << HEADER_OFFSET;

        if settle && self.timing.fast && self.settle_dso()? == WaitOutcome::Timeout {
            log::trace!("DSO did not settle before frame 0x{:04X}", cmd);
        }

        for _ in 0..clocks {
            let out = if frame & 0x8000_0000 != 0 { dsi } else { 0 };
            self.write_lines(idle | out)?;
            self.write_lines(idle | out | dsclk)?;
            self.delay(self.timing.half_ns);
            let bit = self.dso()?;
            frame = (frame << 1) | bit as u32;
            self.write_lines(idle | out)?;
            self.delay(self.timing.norm_ns);
        }

        let mask = if clocks >= 32 {
            u32::MAX
        } else {
            (1u32 << clocks) - 1
        };
        Ok(frame & mask)
    }

    /// One bare clock pulse with DSI low, returning the sampled DSO bit
    pub fn pulse_clock(&mut self, idle: u8) -> Result<bool> {
        let dsclk = self.pins.control.dsclk;
        self.write_lines(idle | dsclk)?;
        self.delay(self.timing.half_ns);
        let bit = self.dso()?;
        self.write_lines(idle)?;
        self.delay(self.timing.norm_ns);
        Ok(bit)
    }
}
