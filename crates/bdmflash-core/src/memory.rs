//! Generic target memory primitive
//!
//! Flash algorithms and the area registry only ever talk to the target
//! through [`TargetMemory`]. It is implemented over the wire protocol by
//! [`crate::bdm::BdmMemory`] and over a host buffer by [`RamMemory`].
//! Target byte order is big-endian.

use crate::error::{Error, Result};
use alloc::vec;
use alloc::vec::Vec;

/// Access width of a single bus cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Width {
    /// 8-bit
    Byte,
    /// 16-bit
    Word,
    /// 32-bit
    Long,
}

impl Width {
    /// Width in bytes
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Long => 4,
        }
    }

    /// Width in bits
    pub const fn bits(self) -> u32 {
        self.bytes() * 8
    }

    /// Width for a bus of `bits` data lines
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Self::Byte),
            16 => Some(Self::Word),
            32 => Some(Self::Long),
            _ => None,
        }
    }

    /// Mask covering one value of this width
    pub const fn mask(self) -> u32 {
        match self {
            Self::Byte => 0xFF,
            Self::Word => 0xFFFF,
            Self::Long => 0xFFFF_FFFF,
        }
    }

    /// Read one value of this width, zero-extended
    pub fn read<M: TargetMemory + ?Sized>(self, mem: &mut M, addr: u32) -> Result<u32> {
        match self {
            Self::Byte => mem.read_u8(addr).map(u32::from),
            Self::Word => mem.read_u16(addr).map(u32::from),
            Self::Long => mem.read_u32(addr),
        }
    }

    /// Write one value of this width; upper bits are ignored
    pub fn write<M: TargetMemory + ?Sized>(self, mem: &mut M, addr: u32, value: u32) -> Result<()> {
        match self {
            Self::Byte => mem.write_u8(addr, value as u8),
            Self::Word => mem.write_u16(addr, value as u16),
            Self::Long => mem.write_u32(addr, value),
        }
    }
}

/// Byte/word/long access to target memory
pub trait TargetMemory {
    /// Read one byte
    fn read_u8(&mut self, addr: u32) -> Result<u8>;
    /// Read one big-endian word
    fn read_u16(&mut self, addr: u32) -> Result<u16>;
    /// Read one big-endian long
    fn read_u32(&mut self, addr: u32) -> Result<u32>;
    /// Write one byte
    fn write_u8(&mut self, addr: u32, value: u8) -> Result<()>;
    /// Write one big-endian word
    fn write_u16(&mut self, addr: u32, value: u16) -> Result<()>;
    /// Write one big-endian long
    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()>;

    /// Wait at least `us` microseconds between accesses
    fn delay_us(&mut self, us: u32);

    /// Read a block, using the widest aligned accesses available
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < buf.len() {
            let at = addr.wrapping_add(offset as u32);
            let left = buf.len() - offset;
            if at % 4 == 0 && left >= 4 {
                buf[offset..offset + 4].copy_from_slice(&self.read_u32(at)?.to_be_bytes());
                offset += 4;
            } else if at % 2 == 0 && left >= 2 {
                buf[offset..offset + 2].copy_from_slice(&self.read_u16(at)?.to_be_bytes());
                offset += 2;
            } else {
                buf[offset] = self.read_u8(at)?;
                offset += 1;
            }
        }
        Ok(())
    }

    /// Write a block, using the widest aligned accesses available
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < data.len() {
            let at = addr.wrapping_add(offset as u32);
            let rest = &data[offset..];
            if at % 4 == 0 && rest.len() >= 4 {
                self.write_u32(at, u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]))?;
                offset += 4;
            } else if at % 2 == 0 && rest.len() >= 2 {
                self.write_u16(at, u16::from_be_bytes([rest[0], rest[1]]))?;
                offset += 2;
            } else {
                self.write_u8(at, rest[0])?;
                offset += 1;
            }
        }
        Ok(())
    }
}

impl<M: TargetMemory + ?Sized> TargetMemory for &mut M {
    fn read_u8(&mut self, addr: u32) -> Result<u8> {
        (**self).read_u8(addr)
    }

    fn read_u16(&mut self, addr: u32) -> Result<u16> {
        (**self).read_u16(addr)
    }

    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        (**self).read_u32(addr)
    }

    fn write_u8(&mut self, addr: u32, value: u8) -> Result<()> {
        (**self).write_u8(addr, value)
    }

    fn write_u16(&mut self, addr: u32, value: u16) -> Result<()> {
        (**self).write_u16(addr, value)
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        (**self).write_u32(addr, value)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        (**self).read(addr, buf)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        (**self).write(addr, data)
    }
}

/// Plain memory backed by a host buffer
///
/// Accesses outside `base..base + len` end in a bus error, like an
/// unmapped address on a real target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamMemory {
    base: u32,
    data: Vec<u8>,
}

impl RamMemory {
    /// Zero-filled memory of `size` bytes at `base`
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            data: vec![0; size],
        }
    }

    /// Memory at `base` holding `data`
    pub fn from_bytes(base: u32, data: Vec<u8>) -> Self {
        Self { base, data }
    }

    /// First mapped address
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Contents
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Contents, mutably
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn range(&self, addr: u32, len: usize) -> Result<core::ops::Range<usize>> {
        let start = addr.checked_sub(self.base).ok_or(Error::Berr)? as usize;
        let end = start.checked_add(len).ok_or(Error::Berr)?;
        if end > self.data.len() {
            return Err(Error::Berr);
        }
        Ok(start..end)
    }

    fn load<const N: usize>(&self, addr: u32) -> Result<[u8; N]> {
        let range = self.range(addr, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[range]);
        Ok(out)
    }

    fn store(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        let range = self.range(addr, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }
}

impl TargetMemory for RamMemory {
    fn read_u8(&mut self, addr: u32) -> Result<u8> {
        self.load::<1>(addr).map(|b| b[0])
    }

    fn read_u16(&mut self, addr: u32) -> Result<u16> {
        self.load(addr).map(u16::from_be_bytes)
    }

    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        self.load(addr).map(u32::from_be_bytes)
    }

    fn write_u8(&mut self, addr: u32, value: u8) -> Result<()> {
        self.store(addr, &[value])
    }

    fn write_u16(&mut self, addr: u32, value: u16) -> Result<()> {
        self.store(addr, &value.to_be_bytes())
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.store(addr, &value.to_be_bytes())
    }

    fn delay_us(&mut self, _us: u32) {}

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let range = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.store(addr, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_access() {
        let mut ram = RamMemory::new(0x1000, 16);
        ram.write_u32(0x1000, 0x1234_5678).unwrap();
        assert_eq!(ram.read_u8(0x1000).unwrap(), 0x12);
        assert_eq!(ram.read_u16(0x1002).unwrap(), 0x5678);
        ram.write_u16(0x1004, 0xABCD).unwrap();
        assert_eq!(&ram.as_slice()[4..6], &[0xAB, 0xCD]);
    }

    #[test]
    fn test_out_of_range_is_bus_error() {
        let mut ram = RamMemory::new(0x1000, 4);
        assert_eq!(ram.read_u8(0x0FFF), Err(Error::Berr));
        assert_eq!(ram.read_u32(0x1002), Err(Error::Berr));
        assert_eq!(ram.write_u8(0x1004, 0), Err(Error::Berr));
        assert_eq!(ram.read_u32(0x1000), Ok(0));
    }

    #[test]
    fn test_block_default_methods_mix_widths() {
        // Exercise the trait defaults through a wrapper that only forwards
        // the scalar accessors.
        struct Scalar(RamMemory, usize);
        impl TargetMemory for Scalar {
            fn read_u8(&mut self, a: u32) -> Result<u8> {
                self.1 += 1;
                self.0.read_u8(a)
            }
            fn read_u16(&mut self, a: u32) -> Result<u16> {
                self.1 += 1;
                self.0.read_u16(a)
            }
            fn read_u32(&mut self, a: u32) -> Result<u32> {
                self.1 += 1;
                self.0.read_u32(a)
            }
            fn write_u8(&mut self, a: u32, v: u8) -> Result<()> {
                self.1 += 1;
                self.0.write_u8(a, v)
            }
            fn write_u16(&mut self, a: u32, v: u16) -> Result<()> {
                self.1 += 1;
                self.0.write_u16(a, v)
            }
            fn write_u32(&mut self, a: u32, v: u32) -> Result<()> {
                self.1 += 1;
                self.0.write_u32(a, v)
            }
            fn delay_us(&mut self, _us: u32) {}
        }

        let mut mem = Scalar(RamMemory::new(0, 16), 0);
        let data = [1, 2, 3, 4, 5, 6, 7];
        mem.write(1, &data).unwrap();
        // byte @1, word @2, long @4, none left for @8
        assert_eq!(mem.1, 3);
        assert_eq!(&mem.0.as_slice()[1..8], &data);

        let mut back = [0u8; 7];
        mem.read(1, &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_width_helpers() {
        let mut ram = RamMemory::new(0, 8);
        Width::Word.write(&mut ram, 2, 0x1_BEEF).unwrap();
        assert_eq!(Width::Word.read(&mut ram, 2).unwrap(), 0xBEEF);
        assert_eq!(Width::from_bits(16), Some(Width::Word));
        assert_eq!(Width::from_bits(12), None);
        assert_eq!(Width::Long.mask(), u32::MAX);
    }
}
