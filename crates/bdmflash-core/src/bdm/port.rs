//! Host port abstraction
//!
//! The protocol engine only needs an output register driving the control
//! lines, an input register sampling the status lines, and a way to wait.
//! That is exactly what a PC parallel port offers, and it maps just as well
//! onto GPIO pins or a USB bridge. Transports implement [`BdmPort`].

use crate::error::Result;
use crate::status::StatusMap;

/// Low-level line access for one physical channel
pub trait BdmPort {
    /// Drive the control lines
    ///
    /// Many transports cannot read this register back, so the engine keeps
    /// a shadow copy of the last value written.
    fn write_control(&mut self, value: u8) -> Result<()>;

    /// Sample the status lines
    fn read_status(&mut self) -> Result<u8>;

    /// Wait for at least `ns` nanoseconds
    fn delay_ns(&mut self, ns: u32);
}

impl<P: BdmPort + ?Sized> BdmPort for alloc::boxed::Box<P> {
    fn write_control(&mut self, value: u8) -> Result<()> {
        (**self).write_control(value)
    }

    fn read_status(&mut self) -> Result<u8> {
        (**self).read_status()
    }

    fn delay_ns(&mut self, ns: u32) {
        (**self).delay_ns(ns)
    }
}

/// Control register layout for one cable
///
/// Every mask asserts its signal when set; inverting drivers are the
/// cable's business. A mask of zero means the cable lacks that line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlMap {
    /// Serial data into the target (DSI)
    pub dsi: u8,
    /// Serial clock (DSCLK)
    pub dsclk: u8,
    /// Breakpoint request (BKPT*)
    pub bkpt: u8,
    /// Target reset
    pub reset: u8,
    /// Cable output enable
    pub oe: u8,
    /// Status LED
    pub led: u8,
    /// Forces a bus error (BERR* on CPU32, TEA* on ColdFire)
    pub force_berr: u8,
    /// Pattern held on the other lines while shifting
    pub shift_idle: u8,
    /// Pattern left on the lines once the target is stopped
    pub stopped_idle: u8,
    /// Pattern that lets go of the target entirely
    pub released: u8,
}

/// Complete line layout of one cable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinMap {
    /// Control (output) register
    pub control: ControlMap,
    /// Status (input) register
    pub status: StatusMap,
    /// Serial data out of the target (DSO) in the status register
    pub dso: u8,
    /// The cable inverts DSO: a low level reads as a one bit
    pub dso_inverted: bool,
}

impl PinMap {
    /// Logical DSO bit from a raw status sample
    pub fn dso_bit(&self, raw: u8) -> bool {
        let high = raw & self.dso != 0;
        high != self.dso_inverted
    }
}
