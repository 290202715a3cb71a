//! Target memory over the BDM wire protocol

use super::frame::{cmd, RESP_COMPLETE};
use super::port::BdmPort;
use super::session::Session;
use crate::error::{Error, Result};
use crate::memory::{TargetMemory, Width};

/// [`TargetMemory`] backed by READ/WRITE commands on an open session
pub struct BdmMemory<'a, P: BdmPort> {
    session: &'a mut Session<P>,
}

impl<'a, P: BdmPort> BdmMemory<'a, P> {
    /// Borrow `session` for memory access
    pub fn new(session: &'a mut Session<P>) -> Self {
        Self { session }
    }

    /// The underlying session
    pub fn session(&mut self) -> &mut Session<P> {
        self.session
    }

    fn send_address(&mut self, command: u16, addr: u32) -> Result<()> {
        self.session.send_word(command)?;
        self.session.send_word((addr >> 16) as u16)?;
        self.session.send_word(addr as u16)
    }

    fn read_width(&mut self, width: Width, addr: u32) -> Result<u32> {
        let command = match width {
            Width::Byte => cmd::READ_BYTE,
            Width::Word => cmd::READ_WORD,
            Width::Long => cmd::READ_LONG,
        };
        self.send_address(command, addr)?;
        let first = self.session.collect_word()? as u32;
        let value = match width {
            Width::Long => (first << 16) | self.session.collect_word()? as u32,
            _ => first & width.mask(),
        };
        if self.session.channel().debug_level() >= 3 {
            log::trace!("read {:?} @0x{:08X} = 0x{:X}", width, addr, value);
        }
        Ok(value)
    }

    fn write_width(&mut self, width: Width, addr: u32, value: u32) -> Result<()> {
        let command = match width {
            Width::Byte => cmd::WRITE_BYTE,
            Width::Word => cmd::WRITE_WORD,
            Width::Long => cmd::WRITE_LONG,
        };
        if self.session.channel().debug_level() >= 3 {
            log::trace!("write {:?} @0x{:08X} = 0x{:X}", width, addr, value);
        }
        self.send_address(command, addr)?;
        if width == Width::Long {
            self.session.send_word((value >> 16) as u16)?;
        }
        self.session.send_word((value & width.mask()) as u16)?;

        if self.session.collect_word()? as u32 != RESP_COMPLETE {
            return Err(Error::Response);
        }
        Ok(())
    }
}

impl<P: BdmPort> TargetMemory for BdmMemory<'_, P> {
    fn read_u8(&mut self, addr: u32) -> Result<u8> {
        self.read_width(Width::Byte, addr).map(|v| v as u8)
    }

    fn read_u16(&mut self, addr: u32) -> Result<u16> {
        self.read_width(Width::Word, addr).map(|v| v as u16)
    }

    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        self.read_width(Width::Long, addr)
    }

    fn write_u8(&mut self, addr: u32, value: u8) -> Result<()> {
        self.write_width(Width::Byte, addr, value as u32)
    }

    fn write_u16(&mut self, addr: u32, value: u16) -> Result<()> {
        self.write_width(Width::Word, addr, value as u32)
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.write_width(Width::Long, addr, value)
    }

    fn delay_us(&mut self, us: u32) {
        self.session.channel_mut().delay(us.saturating_mul(1000));
    }
}
