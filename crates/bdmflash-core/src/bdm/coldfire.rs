//! ColdFire cable
//!
//! Same dedicated-pin arrangement as the ICD cable, but the freeze status
//! comes from the processor status lines (PST all ones while halted) and
//! the bus error is forced through TEA*. A ColdFire samples BKPT* while
//! reset is released, so holding it through reset halts the core before
//! the first instruction.

use super::channel::Channel;
use super::interface::{self, BdmInterface, InterfaceKind};
use super::port::{BdmPort, ControlMap, PinMap};
use crate::error::Result;
use crate::status::StatusMap;

/// Line layout of the ColdFire cable
pub const PINS: PinMap = PinMap {
    control: ControlMap {
        dsclk: 0x01,
        bkpt: 0x02,
        reset: 0x04,
        force_berr: 0x08,
        oe: 0x10,
        led: 0x20,
        dsi: 0x40,
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

/// ColdFire cable capability table
#[derive(Debug, Clone, Copy, Default)]
pub struct ColdFire;

impl<P: BdmPort> BdmInterface<P> for ColdFire {
    fn kind(&self) -> InterfaceKind {
        InterfaceKind::ColdFire
    }

    fn init(&self, ch: &mut Channel<P>) -> Result<()> {
        // TEA* must never be left asserted from a previous session
        ch.write_lines(PINS.control.released)?;
        ch.delay(ch.timing().short_ns);
        ch.write_lines(PINS.control.stopped_idle)
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
