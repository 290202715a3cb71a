//! CPU32 ICD cable
//!
//! Dedicated DSI/DSCLK pins behind a buffer with an output enable. OE stays
//! asserted and RESET deasserted while shifting. The cable can force BERR*,
//! which is used to free a target stuck in a bus cycle that never ends.

use super::channel::Channel;
use super::interface::{self, BdmInterface, InterfaceKind};
use super::port::{BdmPort, ControlMap, PinMap};
use crate::error::Result;
use crate::status::StatusMap;

/// Line layout of the ICD cable
pub const PINS: PinMap = PinMap {
    control: ControlMap {
        dsi: 0x01,
        dsclk: 0x02,
        bkpt: 0x04,
        reset: 0x08,
        oe: 0x10,
        led: 0x20,
        force_berr: 0x40,
        shift_idle: 0x10,
        stopped_idle: 0x10,
        released: 0x00,
    },
    status: StatusMap {
        freeze: 0x40,
        reset: 0x08,
        power: 0x10,
        cable: 0x20,
        active_low: 0x08,
    },
    dso: 0x80,
    dso_inverted: true,
};

/// ICD cable capability table
#[derive(Debug, Clone, Copy, Default)]
pub struct Icd;

impl<P: BdmPort> BdmInterface<P> for Icd {
    fn kind(&self) -> InterfaceKind {
        InterfaceKind::Icd
    }

    fn reset_chip(&self, ch: &mut Channel<P>) -> Result<()> {
        interface::pulse_reset(ch, PINS.control.oe, true)?;
        self.stop_chip(ch)?;
        self.resynchronize(ch)
    }

    fn restart_chip(&self, ch: &mut Channel<P>) -> Result<()> {
        interface::pulse_reset(ch, PINS.control.oe, false)?;
        ch.write_lines(PINS.control.oe)
    }

    fn step_chip(&self, ch: &mut Channel<P>) -> Result<()> {
        interface::step_with_bkpt(self, ch)
    }
}
