//! Serial frame layout and response decoding
//!
//! A BDM exchange is 17 bits: one status (header) bit followed by 16 data
//! bits, most significant first. The response to a frame is shifted out by
//! the target during the *next* frame.

use crate::error::{Error, Result};

/// Bit offset the command word is placed at in the shift accumulator
pub const HEADER_OFFSET: u32 = 15;

/// Clocks in a complete frame
pub const FRAME_BITS: u32 = 32 - HEADER_OFFSET;

/// Mask of a complete 17-bit frame
pub const FRAME_MASK: u32 = (1 << FRAME_BITS) - 1;

/// Response: command not valid
pub const RESP_NVC: u32 = 0x1FFFF;
/// Response: bus error during the last command
pub const RESP_BERR: u32 = 0x10001;
/// Response: command still in progress
pub const RESP_NOT_READY: u32 = 0x10000;
/// Response: command complete, nothing to return
pub const RESP_COMPLETE: u32 = 0x0FFFF;

/// BDM command words shared by CPU32 and ColdFire
pub mod cmd {
    /// No operation; also clocks out pending results
    pub const NOP: u16 = 0x0000;
    /// Resume execution
    pub const GO: u16 = 0x0C00;
    /// Read memory, byte operand
    pub const READ_BYTE: u16 = 0x1900;
    /// Read memory, word operand
    pub const READ_WORD: u16 = 0x1940;
    /// Read memory, long operand
    pub const READ_LONG: u16 = 0x1980;
    /// Write memory, byte operand
    pub const WRITE_BYTE: u16 = 0x1800;
    /// Write memory, word operand
    pub const WRITE_WORD: u16 = 0x1840;
    /// Write memory, long operand
    pub const WRITE_LONG: u16 = 0x1880;
    /// Read address/data register (OR in register number 0..=15)
    pub const RDREG: u16 = 0x2180;
    /// Write address/data register (OR in register number 0..=15)
    pub const WRREG: u16 = 0x2080;
}

/// Decoded 17-bit response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Valid payload
    Data(u16),
    /// Target still busy; ask again
    NotReady,
    /// Last command ended in a bus error
    BusError,
    /// Last command was not valid
    IllegalCommand,
}

impl Response {
    /// Decode a raw frame
    pub fn decode(frame: u32) -> Self {
        match frame & FRAME_MASK {
            RESP_NVC => Self::IllegalCommand,
            RESP_BERR => Self::BusError,
            RESP_NOT_READY => Self::NotReady,
            other => Self::Data(other as u16),
        }
    }

    /// Map error sentinels to faults; `NotReady` is passed through
    pub fn check(self) -> Result<Self> {
        match self {
            Self::BusError => Err(Error::Berr),
            Self::IllegalCommand => Err(Error::Nvc),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants() {
        assert_eq!(FRAME_BITS, 17);
        assert_eq!(FRAME_MASK, 0x1FFFF);
    }

    #[test]
    fn test_decode_sentinels() {
        assert_eq!(Response::decode(0x1FFFF), Response::IllegalCommand);
        assert_eq!(Response::decode(0x10001), Response::BusError);
        assert_eq!(Response::decode(0x10000), Response::NotReady);
        assert_eq!(Response::decode(0x0FFFF), Response::Data(0xFFFF));
        assert_eq!(Response::decode(0x01234), Response::Data(0x1234));
    }

    #[test]
    fn test_check() {
        assert_eq!(Response::BusError.check(), Err(Error::Berr));
        assert_eq!(Response::IllegalCommand.check(), Err(Error::Nvc));
        assert_eq!(Response::NotReady.check(), Ok(Response::NotReady));
    }
}
