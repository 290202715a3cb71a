//! Simulated target address space
//!
//! A [`SimBus`] is a list of [`BusDevice`]s, each claiming part of the
//! 32-bit address space. Unclaimed addresses end in a bus error. Every
//! write is recorded so tests can check which cycles an algorithm issued.

use bdmflash_core::error::{Error, Result};
use bdmflash_core::memory::{TargetMemory, Width};

/// Something that answers bus cycles
pub trait BusDevice {
    /// Short description for logs
    fn name(&self) -> &str;

    /// Whether this device decodes `addr`
    fn claims(&self, addr: u32) -> bool;

    /// One read cycle at absolute address `addr`
    fn read(&mut self, addr: u32, width: Width) -> Result<u32>;

    /// One write cycle at absolute address `addr`
    fn write(&mut self, addr: u32, width: Width, value: u32) -> Result<()>;
}

/// Plain read/write memory
#[derive(Debug, Clone)]
pub struct Ram {
    base: u32,
    data: Vec<u8>,
}

impl Ram {
    /// `len` bytes of zeroed memory at `base`
    pub fn new(base: u32, len: usize) -> Self {
        Self {
            base,
            data: vec![0; len],
        }
    }

    /// Memory at `base` holding `data`
    pub fn with_data(base: u32, data: &[u8]) -> Self {
        Self {
            base,
            data: data.to_vec(),
        }
    }

    /// Contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn range(&self, addr: u32, width: Width) -> Result<std::ops::Range<usize>> {
        let start = addr.checked_sub(self.base).ok_or(Error::Berr)? as usize;
        let end = start + width.bytes() as usize;
        if end > self.data.len() {
            return Err(Error::Berr);
        }
        Ok(start..end)
    }
}

impl BusDevice for Ram {
    fn name(&self) -> &str {
        "ram"
    }

    fn claims(&self, addr: u32) -> bool {
        addr >= self.base && ((addr - self.base) as usize) < self.data.len()
    }

    fn read(&mut self, addr: u32, width: Width) -> Result<u32> {
        let range = self.range(addr, width)?;
        Ok(read_be(&self.data[range]))
    }

    fn write(&mut self, addr: u32, width: Width, value: u32) -> Result<()> {
        let range = self.range(addr, width)?;
        write_be(&mut self.data[range], value);
        Ok(())
    }
}

/// Big-endian value of up to four bytes
pub(crate) fn read_be(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0, |acc, &b| (acc << 8) | b as u32)
}

/// Store `value` big-endian into `bytes`
pub(crate) fn write_be(bytes: &mut [u8], value: u32) {
    let len = bytes.len();
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = (value >> ((len - 1 - i) * 8)) as u8;
    }
}

/// One recorded write cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCycle {
    /// Address written
    pub addr: u32,
    /// Cycle width
    pub width: Width,
    /// Value written
    pub value: u32,
}

/// The address space of a simulated target
#[derive(Default)]
pub struct SimBus {
    devices: Vec<Box<dyn BusDevice>>,
    writes: Vec<WriteCycle>,
    delay_us: u64,
}

impl SimBus {
    /// Empty address space
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a device; earlier devices win where claims overlap
    pub fn attach(&mut self, device: impl BusDevice + 'static) -> &mut Self {
        log::debug!("sim: attached {}", device.name());
        self.devices.push(Box::new(device));
        self
    }

    /// Map an already boxed device
    pub fn attach_boxed(&mut self, device: Box<dyn BusDevice>) -> &mut Self {
        log::debug!("sim: attached {}", device.name());
        self.devices.push(device);
        self
    }

    /// Builder form of [`SimBus::attach`]
    pub fn with(mut self, device: impl BusDevice + 'static) -> Self {
        self.attach(device);
        self
    }

    /// Write cycles since the log was last cleared
    pub fn writes(&self) -> &[WriteCycle] {
        &self.writes
    }

    /// Forget recorded writes
    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Total time algorithms asked to wait, in microseconds
    pub fn waited_us(&self) -> u64 {
        self.delay_us
    }

    fn device(&mut self, addr: u32) -> Result<&mut Box<dyn BusDevice>> {
        self.devices
            .iter_mut()
            .find(|d| d.claims(addr))
            .ok_or(Error::Berr)
    }

    /// One read cycle
    pub fn read_cycle(&mut self, addr: u32, width: Width) -> Result<u32> {
        if addr % width.bytes() != 0 {
            return Err(Error::Berr);
        }
        self.device(addr)?.read(addr, width)
    }

    /// One write cycle
    pub fn write_cycle(&mut self, addr: u32, width: Width, value: u32) -> Result<()> {
        if addr % width.bytes() != 0 {
            return Err(Error::Berr);
        }
        let value = value & width.mask();
        self.writes.push(WriteCycle { addr, width, value });
        self.device(addr)?.write(addr, width, value)
    }
}

impl TargetMemory for SimBus {
    fn read_u8(&mut self, addr: u32) -> Result<u8> {
        self.read_cycle(addr, Width::Byte).map(|v| v as u8)
    }

    fn read_u16(&mut self, addr: u32) -> Result<u16> {
        self.read_cycle(addr, Width::Word).map(|v| v as u16)
    }

    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        self.read_cycle(addr, Width::Long)
    }

    fn write_u8(&mut self, addr: u32, value: u8) -> Result<()> {
        self.write_cycle(addr, Width::Byte, value as u32)
    }

    fn write_u16(&mut self, addr: u32, value: u16) -> Result<()> {
        self.write_cycle(addr, Width::Word, value as u32)
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.write_cycle(addr, Width::Long, value)
    }

    fn delay_us(&mut self, us: u32) {
        self.delay_us += us as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmapped_is_bus_error() {
        let mut bus = SimBus::new().with(Ram::new(0x1000, 16));
        assert_eq!(bus.read_u8(0x0FFF), Err(Error::Berr));
        assert_eq!(bus.read_u8(0x1010), Err(Error::Berr));
        assert_eq!(bus.read_u32(0x100E), Err(Error::Berr));
    }

    #[test]
    fn test_ram_is_big_endian() {
        let mut bus = SimBus::new().with(Ram::new(0, 16));
        bus.write_u32(4, 0x1234_5678).unwrap();
        assert_eq!(bus.read_u8(4).unwrap(), 0x12);
        assert_eq!(bus.read_u16(6).unwrap(), 0x5678);
        assert_eq!(bus.writes().len(), 1);
        bus.clear_writes();
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn test_misaligned_cycle() {
        let mut bus = SimBus::new().with(Ram::new(0, 16));
        assert_eq!(bus.read_u16(1), Err(Error::Berr));
    }
}
