//! Storage of interleaved parallel flash chips
//!
//! The array is kept the way the host sees it on the bus: big-endian bus
//! words, each holding one chip word per lane. Lane 0 is the least
//! significant chip, matching [`BusGeometry::lane`].

use crate::bus::{read_be, write_be};
use bdmflash_core::error::{Error, Result};
use bdmflash_core::flash::{BusGeometry, FlashChip};
use bdmflash_core::memory::Width;
use std::ops::Range;

#[derive(Debug, Clone)]
pub(crate) struct Bank {
    pub(crate) chip: &'static FlashChip,
    pub(crate) geometry: BusGeometry,
    pub(crate) base: u32,
    pub(crate) data: Vec<u8>,
}

impl Bank {
    pub(crate) fn new(chip: &'static FlashChip, geometry: BusGeometry, base: u32) -> Self {
        let size = (chip.total_size * geometry.lanes()) as usize;
        Self {
            chip,
            geometry,
            base,
            data: vec![0xFF; size],
        }
    }

    pub(crate) fn lanes(&self) -> u32 {
        self.geometry.lanes()
    }

    pub(crate) fn claims(&self, addr: u32) -> bool {
        addr >= self.base && ((addr - self.base) as usize) < self.data.len()
    }

    /// Chip address (in chip words) addressed by a bus-width cycle
    pub(crate) fn chip_addr(&self, addr: u32) -> u32 {
        (addr - self.base) / self.geometry.bus.bytes()
    }

    /// Whether a cycle reaches the chips as a command or status cycle
    pub(crate) fn is_bus_cycle(&self, width: Width) -> bool {
        width == self.geometry.bus
    }

    fn lane_range(&self, lane: u32, chip_addr: u32) -> Range<usize> {
        let bus = self.geometry.bus.bytes();
        let chip = self.geometry.chip.bytes();
        let start = (chip_addr * bus + bus - (lane + 1) * chip) as usize;
        start..start + chip as usize
    }

    pub(crate) fn get(&self, lane: u32, chip_addr: u32) -> u32 {
        read_be(&self.data[self.lane_range(lane, chip_addr)])
    }

    /// Program a chip word: bits only go from one to zero
    pub(crate) fn program(&mut self, lane: u32, chip_addr: u32, value: u32) {
        let range = self.lane_range(lane, chip_addr);
        let current = read_be(&self.data[range.clone()]);
        write_be(&mut self.data[range], current & value);
    }

    /// Erase the block of one chip containing `chip_addr`
    pub(crate) fn erase_block(&mut self, lane: u32, chip_addr: u32) {
        let chip_bytes = self.geometry.chip.bytes();
        let Some((start, size)) = self.chip.sector_at(chip_addr * chip_bytes) else {
            return;
        };
        let mask = self.geometry.chip.mask();
        for a in (start / chip_bytes)..((start + size) / chip_bytes) {
            let range = self.lane_range(lane, a);
            write_be(&mut self.data[range], mask);
        }
    }

    pub(crate) fn erase_lane(&mut self, lane: u32) {
        let words = self.chip.total_size / self.geometry.chip.bytes();
        let mask = self.geometry.chip.mask();
        for a in 0..words {
            let range = self.lane_range(lane, a);
            write_be(&mut self.data[range], mask);
        }
    }

    /// Start of the block containing `chip_addr`, in chip words
    pub(crate) fn block_of(&self, chip_addr: u32) -> Option<u32> {
        let chip_bytes = self.geometry.chip.bytes();
        self.chip
            .sector_at(chip_addr * chip_bytes)
            .map(|(start, _)| start / chip_bytes)
    }

    /// Array contents for a cycle that is not bus width
    pub(crate) fn read_array(&self, addr: u32, width: Width) -> Result<u32> {
        let start = (addr - self.base) as usize;
        let end = start + width.bytes() as usize;
        if end > self.data.len() {
            return Err(Error::Berr);
        }
        Ok(read_be(&self.data[start..end]))
    }

    /// Assemble a bus word from per-lane values
    pub(crate) fn join(&self, lane_value: impl Fn(u32) -> u32) -> u32 {
        (0..self.lanes()).fold(0, |acc, lane| {
            acc | ((lane_value(lane) & self.geometry.chip.mask()) << (lane * self.geometry.chip.bits()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdmflash_core::flash::amd29;

    #[test]
    fn test_lane_layout() {
        let chip = amd29::CHIPS.iter().find(|c| c.name == "Am29F040").unwrap();
        let mut bank = Bank::new(chip, BusGeometry::new(Width::Word, Width::Byte), 0);
        bank.program(0, 3, 0x12);
        bank.program(1, 3, 0x34);
        assert_eq!(bank.read_array(6, Width::Word).unwrap(), 0x3412);
        assert_eq!(bank.join(|lane| bank.get(lane, 3)), 0x3412);

        bank.erase_block(1, 3);
        assert_eq!(bank.read_array(6, Width::Word).unwrap(), 0xFF12);
    }
}
