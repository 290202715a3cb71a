//! Public-domain CPU32 cable
//!
//! On CPU32 the BKPT* and DSCLK functions share one target pin, and this
//! cable drives that pin directly from the port: there is no output enable
//! and no LED, and nothing else is held while shifting. The cable senses
//! power but cannot tell whether it is plugged into a target.

use super::channel::Channel;
use super::interface::{self, BdmInterface, InterfaceKind};
use super::port::{BdmPort, ControlMap, PinMap};
use crate::error::Result;
use crate::status::StatusMap;

/// Line layout of the PD cable
pub const PINS: PinMap = PinMap {
    control: ControlMap {
        dsclk: 0x01,
        bkpt: 0x02,
        dsi: 0x04,
        reset: 0x08,
        oe: 0,
        led: 0,
        force_berr: 0,
        shift_idle: 0,
        stopped_idle: 0,
        released: 0,
    },
    status: StatusMap {
        freeze: 0x40,
        reset: 0x10,
        power: 0x08,
        cable: 0,
        active_low: 0x10,
    },
    dso: 0x80,
    dso_inverted: true,
};

/// PD cable capability table
#[derive(Debug, Clone, Copy, Default)]
pub struct Pd;

impl<P: BdmPort> BdmInterface<P> for Pd {
    fn kind(&self) -> InterfaceKind {
        InterfaceKind::Pd
    }

    fn reset_chip(&self, ch: &mut Channel<P>) -> Result<()> {
        interface::pulse_reset(ch, 0, true)?;
        self.stop_chip(ch)?;
        self.resynchronize(ch)
    }

    fn restart_chip(&self, ch: &mut Channel<P>) -> Result<()> {
        interface::pulse_reset(ch, 0, false)?;
        ch.write_lines(PINS.control.released)
    }

    fn step_chip(&self, ch: &mut Channel<P>) -> Result<()> {
        interface::step_with_bkpt(self, ch)
    }
}
