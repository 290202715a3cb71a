//! AMD/SST 29F-style parallel NOR
//!
//! JEDEC command set: two unlock cycles, then a command. Program and erase
//! completion is detected with the DQ6 toggle bit; DQ5 going high while a
//! lane still toggles means that chip exceeded its internal time limit.
//!
//! These parts come in 8- and 16-bit flavours and are often interleaved on
//! a wider bus, so probing walks the bus/chip width combinations until an
//! ID reads back identically in every lane.

use super::{
    bus_words, covered_bytes, looks_like_ram, merge_word, AlgorithmOptions, BusGeometry,
    EraseRegion, EraseTarget, FlashAlgorithm, FlashChip, FlashDevice, WriteOutcome,
};
use crate::error::{Error, Result};
use crate::memory::{TargetMemory, Width};
use crate::poll::{poll_bounded, WaitOutcome};
use alloc::boxed::Box;

/// Command values
pub mod cmd {
    /// First unlock cycle
    pub const UNLOCK1: u32 = 0xAA;
    /// Second unlock cycle
    pub const UNLOCK2: u32 = 0x55;
    /// Enter autoselect (ID) mode
    pub const AUTOSELECT: u32 = 0x90;
    /// Return to read-array mode
    pub const RESET: u32 = 0xF0;
    /// Program one word
    pub const PROGRAM: u32 = 0xA0;
    /// Erase setup
    pub const ERASE_SETUP: u32 = 0x80;
    /// Erase the addressed sector
    pub const ERASE_SECTOR: u32 = 0x30;
    /// Erase the whole chip
    pub const ERASE_CHIP: u32 = 0x10;
}

/// Toggle bit
pub const DQ6: u32 = 0x40;
/// Exceeded-timing-limits bit
pub const DQ5: u32 = 0x20;

/// Unlock addresses used while the part is still unknown
///
/// AMD parts decode only the low address bits of the unlock cycles, so the
/// SST addresses reach both.
const PROBE_UNLOCK: [u32; 2] = [0x5555, 0x2AAA];

/// Bus/chip width combinations tried by probe, narrowest first
const GEOMETRIES: [BusGeometry; 5] = [
    BusGeometry::new(Width::Byte, Width::Byte),
    BusGeometry::new(Width::Word, Width::Byte),
    BusGeometry::new(Width::Word, Width::Word),
    BusGeometry::new(Width::Long, Width::Byte),
    BusGeometry::new(Width::Long, Width::Word),
];

const AMD_UNLOCK: [u32; 2] = [0x555, 0x2AA];
const SST_UNLOCK: [u32; 2] = [0x5555, 0x2AAA];

const K: u32 = 1024;

const UNIFORM_16K_8: &[EraseRegion] = &[EraseRegion::new(16 * K, 8)];
const UNIFORM_64K_8: &[EraseRegion] = &[EraseRegion::new(64 * K, 8)];
const UNIFORM_64K_16: &[EraseRegion] = &[EraseRegion::new(64 * K, 16)];
const UNIFORM_64K_32: &[EraseRegion] = &[EraseRegion::new(64 * K, 32)];
const UNIFORM_4K_32: &[EraseRegion] = &[EraseRegion::new(4 * K, 32)];
const UNIFORM_4K_64: &[EraseRegion] = &[EraseRegion::new(4 * K, 64)];
const UNIFORM_4K_128: &[EraseRegion] = &[EraseRegion::new(4 * K, 128)];
const UNIFORM_4K_256: &[EraseRegion] = &[EraseRegion::new(4 * K, 256)];
const UNIFORM_4K_512: &[EraseRegion] = &[EraseRegion::new(4 * K, 512)];

const BOOT_BOTTOM_512K: &[EraseRegion] = &[
    EraseRegion::new(16 * K, 1),
    EraseRegion::new(8 * K, 2),
    EraseRegion::new(32 * K, 1),
    EraseRegion::new(64 * K, 7),
];
const BOOT_TOP_512K: &[EraseRegion] = &[
    EraseRegion::new(64 * K, 7),
    EraseRegion::new(32 * K, 1),
    EraseRegion::new(8 * K, 2),
    EraseRegion::new(16 * K, 1),
];
const BOOT_BOTTOM_1M: &[EraseRegion] = &[
    EraseRegion::new(16 * K, 1),
    EraseRegion::new(8 * K, 2),
    EraseRegion::new(32 * K, 1),
    EraseRegion::new(64 * K, 15),
];
const BOOT_TOP_1M: &[EraseRegion] = &[
    EraseRegion::new(64 * K, 15),
    EraseRegion::new(32 * K, 1),
    EraseRegion::new(8 * K, 2),
    EraseRegion::new(16 * K, 1),
];
const BOOT_BOTTOM_2M: &[EraseRegion] = &[
    EraseRegion::new(16 * K, 1),
    EraseRegion::new(8 * K, 2),
    EraseRegion::new(32 * K, 1),
    EraseRegion::new(64 * K, 31),
];
const BOOT_TOP_2M: &[EraseRegion] = &[
    EraseRegion::new(64 * K, 31),
    EraseRegion::new(32 * K, 1),
    EraseRegion::new(8 * K, 2),
    EraseRegion::new(16 * K, 1),
];

const fn chip(
    vendor: &'static str,
    name: &'static str,
    manufacturer: u16,
    device: u16,
    total_size: u32,
    width: Width,
    regions: &'static [EraseRegion],
    unlock: [u32; 2],
) -> FlashChip {
    FlashChip {
        vendor,
        name,
        manufacturer,
        device,
        total_size,
        width,
        regions,
        unlock,
    }
}

/// Parts recognised by this family
pub static CHIPS: &[FlashChip] = &[
    chip("AMD", "Am29F010", 0x01, 0x20, 128 * K, Width::Byte, UNIFORM_16K_8, AMD_UNLOCK),
    chip("AMD", "Am29F040", 0x01, 0xA4, 512 * K, Width::Byte, UNIFORM_64K_8, AMD_UNLOCK),
    chip("AMD", "Am29F080", 0x01, 0xD5, 1024 * K, Width::Byte, UNIFORM_64K_16, AMD_UNLOCK),
    chip("AMD", "Am29F016", 0x01, 0xAD, 2048 * K, Width::Byte, UNIFORM_64K_32, AMD_UNLOCK),
    chip("AMD", "Am29F400BT", 0x01, 0x2223, 512 * K, Width::Word, BOOT_TOP_512K, AMD_UNLOCK),
    chip("AMD", "Am29F400BB", 0x01, 0x22AB, 512 * K, Width::Word, BOOT_BOTTOM_512K, AMD_UNLOCK),
    chip("AMD", "Am29F800BT", 0x01, 0x22D6, 1024 * K, Width::Word, BOOT_TOP_1M, AMD_UNLOCK),
    chip("AMD", "Am29F800BB", 0x01, 0x2258, 1024 * K, Width::Word, BOOT_BOTTOM_1M, AMD_UNLOCK),
    chip("AMD", "Am29LV400BT", 0x01, 0x22B9, 512 * K, Width::Word, BOOT_TOP_512K, AMD_UNLOCK),
    chip("AMD", "Am29LV400BB", 0x01, 0x22BA, 512 * K, Width::Word, BOOT_BOTTOM_512K, AMD_UNLOCK),
    chip("AMD", "Am29LV800BT", 0x01, 0x22DA, 1024 * K, Width::Word, BOOT_TOP_1M, AMD_UNLOCK),
    chip("AMD", "Am29LV800BB", 0x01, 0x225B, 1024 * K, Width::Word, BOOT_BOTTOM_1M, AMD_UNLOCK),
    chip("AMD", "Am29LV160DT", 0x01, 0x22C4, 2048 * K, Width::Word, BOOT_TOP_2M, AMD_UNLOCK),
    chip("AMD", "Am29LV160DB", 0x01, 0x2249, 2048 * K, Width::Word, BOOT_BOTTOM_2M, AMD_UNLOCK),
    chip("Fujitsu", "MBM29F040C", 0x04, 0xA4, 512 * K, Width::Byte, UNIFORM_64K_8, AMD_UNLOCK),
    chip("Fujitsu", "MBM29F800TA", 0x04, 0x22D6, 1024 * K, Width::Word, BOOT_TOP_1M, AMD_UNLOCK),
    chip("Fujitsu", "MBM29F800BA", 0x04, 0x2258, 1024 * K, Width::Word, BOOT_BOTTOM_1M, AMD_UNLOCK),
    chip("SST", "SST39SF010", 0xBF, 0xB5, 128 * K, Width::Byte, UNIFORM_4K_32, SST_UNLOCK),
    chip("SST", "SST39SF020", 0xBF, 0xB6, 256 * K, Width::Byte, UNIFORM_4K_64, SST_UNLOCK),
    chip("SST", "SST39SF040", 0xBF, 0xB7, 512 * K, Width::Byte, UNIFORM_4K_128, SST_UNLOCK),
    chip("SST", "SST39VF800", 0xBF, 0x2781, 1024 * K, Width::Word, UNIFORM_4K_256, SST_UNLOCK),
    chip("SST", "SST39VF160", 0xBF, 0x2782, 2048 * K, Width::Word, UNIFORM_4K_512, SST_UNLOCK),
];

/// AMD/SST 29F algorithm
#[derive(Debug, Clone, Copy, Default)]
pub struct Amd29;

impl Amd29 {
    /// Read manufacturer and device ID through autoselect mode
    fn read_ids(mem: &mut dyn TargetMemory, base: u32, bus: BusGeometry) -> Result<(u32, u32)> {
        let [u1, u2] = PROBE_UNLOCK;
        bus.command(mem, base, u1, cmd::RESET)?;
        bus.command(mem, base, u1, cmd::UNLOCK1)?;
        bus.command(mem, base, u2, cmd::UNLOCK2)?;
        bus.command(mem, base, u1, cmd::AUTOSELECT)?;
        let manufacturer = bus.read(mem, base, 0)?;
        let device = bus.read(mem, base, 1)?;
        bus.command(mem, base, u1, cmd::RESET)?;
        Ok((manufacturer, device))
    }
}

impl FlashAlgorithm for Amd29 {
    fn family(&self) -> &'static str {
        "29"
    }

    fn description(&self) -> &'static str {
        "AMD/SST 29F-style parallel NOR"
    }

    fn min_chip_width(&self) -> u32 {
        8
    }

    fn chips(&self) -> &'static [FlashChip] {
        CHIPS
    }

    fn probe(
        &self,
        mem: &mut dyn TargetMemory,
        base: u32,
        options: &AlgorithmOptions,
    ) -> Result<Option<Box<dyn FlashDevice>>> {
        for bus in GEOMETRIES {
            let (manufacturer, device) = Self::read_ids(mem, base, bus)?;
            let (m, d) = (bus.lane(manufacturer, 0), bus.lane(device, 0));
            if !bus.all_lanes(manufacturer, m) || !bus.all_lanes(device, d) {
                continue;
            }
            let Some(chip) = CHIPS.iter().find(|c| c.width == bus.chip && c.matches(m, d)) else {
                continue;
            };
            if looks_like_ram(mem, base, bus.bus)? {
                log::debug!("29: IDs {:02X}/{:04X} at 0x{:08X} are RAM", m, d, base);
                continue;
            }

            log::debug!("29: found {} as {} at 0x{:08X}", chip, bus, base);
            return Ok(Some(Box::new(Amd29Device {
                chip,
                bus,
                base,
                options: *options,
            })));
        }
        Ok(None)
    }
}

/// A bound 29F part (or set of interleaved parts)
#[derive(Debug, Clone)]
pub struct Amd29Device {
    chip: &'static FlashChip,
    bus: BusGeometry,
    base: u32,
    options: AlgorithmOptions,
}

impl Amd29Device {
    /// Bus layout the part was found with
    pub fn bus(&self) -> BusGeometry {
        self.bus
    }

    fn unlock(&self, mem: &mut dyn TargetMemory) -> Result<()> {
        let [u1, u2] = self.chip.unlock;
        self.bus.command(mem, self.base, u1, cmd::UNLOCK1)?;
        self.bus.command(mem, self.base, u2, cmd::UNLOCK2)
    }

    fn reset(&self, mem: &mut dyn TargetMemory) -> Result<()> {
        self.bus.command(mem, self.base, 0, cmd::RESET)
    }

    /// Wait for every lane in `pending` to stop toggling DQ6 at `addr`
    fn wait_toggle(
        &self,
        mem: &mut dyn TargetMemory,
        addr: u32,
        pending: u32,
        limit: u32,
        interval_us: u32,
    ) -> Result<()> {
        let width = self.bus.bus;
        let dq6 = self.bus.replicate(DQ6);
        let mut pending = pending;

        let outcome = poll_bounded(limit, || {
            let first = width.read(mem, addr)?;
            let second = width.read(mem, addr)?;
            pending &= self.bus.differing_lanes(first & dq6, second & dq6);
            if pending == 0 {
                return Ok(true);
            }

            // DQ5 only counts in lanes that are still busy
            let timed_out = pending & self.bus.lanes_with(second, DQ5);
            if timed_out != 0 {
                let first = width.read(mem, addr)?;
                let second = width.read(mem, addr)?;
                if self.bus.differing_lanes(first & dq6, second & dq6) & timed_out != 0 {
                    return Err(Error::DeviceFault { addr });
                }
            }

            if interval_us > 0 {
                mem.delay_us(interval_us);
            }
            Ok(false)
        })?;

        match outcome {
            WaitOutcome::Done(_) => Ok(()),
            WaitOutcome::Timeout => Err(Error::FlashTimeout { addr }),
        }
    }

    fn program_word(&self, mem: &mut dyn TargetMemory, word_addr: u32, addr: u32, data: &[u8]) -> Result<()> {
        let width = self.bus.bus;
        let current = width.read(mem, word_addr)?;
        let desired = merge_word(width, word_addr, current, addr, data);
        if current == desired {
            return Ok(());
        }

        let pending = self.bus.differing_lanes(current, desired);
        self.unlock(mem)?;
        self.bus.command(mem, self.base, self.chip.unlock[0], cmd::PROGRAM)?;
        width.write(mem, word_addr, desired)?;
        self.wait_toggle(mem, word_addr, pending, self.options.program_poll_limit, 0)?;

        if width.read(mem, word_addr)? != desired {
            return Err(Error::Verify { addr: word_addr });
        }
        Ok(())
    }

    fn wait_address(&self, target: EraseTarget) -> Result<u32> {
        match target {
            EraseTarget::All => Ok(self.base),
            EraseTarget::Sector(addr) => self.sector_at(addr).map(|(start, _)| start).ok_or(Error::Range),
        }
    }
}

impl FlashDevice for Amd29Device {
    fn family(&self) -> &'static str {
        "29"
    }

    fn chip(&self) -> &'static FlashChip {
        self.chip
    }

    fn base(&self) -> u32 {
        self.base
    }

    fn size(&self) -> u32 {
        self.chip.total_size * self.bus.lanes()
    }

    fn program(&mut self, mem: &mut dyn TargetMemory, addr: u32, data: &[u8]) -> WriteOutcome {
        let end = addr as u64 + data.len() as u64;
        if addr < self.base || end > self.base as u64 + self.size() as u64 {
            return WriteOutcome::partial(0, Error::Range);
        }

        let width = self.bus.bus;
        let mut written = 0;
        for word_addr in bus_words(width, addr, data.len()) {
            if let Err(fault) = self.program_word(mem, word_addr, addr, data) {
                log::debug!("29: program at 0x{:08X} failed: {}", word_addr, fault);
                // A faulted chip stays in status mode until reset
                if let Err(e) = self.reset(mem) {
                    log::warn!("29: reset after failed program: {}", e);
                }
                return WriteOutcome::partial(written, fault);
            }
            written += covered_bytes(width, word_addr, addr, data.len());
        }
        WriteOutcome::complete(written)
    }

    fn erase(&mut self, mem: &mut dyn TargetMemory, target: EraseTarget) -> Result<()> {
        let u1 = self.chip.unlock[0];
        let addr = self.wait_address(target)?;

        self.unlock(mem)?;
        self.bus.command(mem, self.base, u1, cmd::ERASE_SETUP)?;
        self.unlock(mem)?;
        match target {
            EraseTarget::All => {
                log::trace!("29: chip erase at 0x{:08X}", self.base);
                self.bus.command(mem, self.base, u1, cmd::ERASE_CHIP)
            }
            EraseTarget::Sector(_) => {
                log::trace!("29: sector erase at 0x{:08X}", addr);
                self.bus
                    .bus
                    .write(mem, addr, self.bus.replicate(cmd::ERASE_SECTOR))
            }
        }
    }

    fn erase_wait(&mut self, mem: &mut dyn TargetMemory, target: EraseTarget) -> Result<()> {
        let addr = self.wait_address(target)?;
        let all_lanes = self.bus.bus.mask();
        let result = self.wait_toggle(
            mem,
            addr,
            all_lanes,
            self.options.erase_poll_limit,
            self.options.erase_poll_interval_us,
        );
        if result.is_err() {
            if let Err(e) = self.reset(mem) {
                log::warn!("29: reset after failed erase: {}", e);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_sizes_match_regions() {
        for chip in CHIPS {
            let total: u32 = chip.regions.iter().map(|r| r.total_size()).sum();
            assert_eq!(total, chip.total_size, "{}", chip.name);
        }
    }

    #[test]
    fn test_am29f040_entry() {
        let chip = CHIPS.iter().find(|c| c.matches(0x01, 0xA4)).unwrap();
        assert_eq!(chip.name, "Am29F040");
        assert_eq!(chip.total_size, 0x80000);
    }
}
