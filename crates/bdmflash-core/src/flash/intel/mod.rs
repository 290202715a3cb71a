//! Intel command-set parallel NOR (C3 and P30)
//!
//! Both families use the same status register and block locking: every
//! block comes up locked and must be unlocked before program or erase.
//! Program and erase block internally on SR7. P30 adds a write buffer.

pub mod c3;
pub mod p30;

use super::{
    looks_like_ram, merge_word, AlgorithmOptions, BusGeometry, EraseTarget, FlashChip,
    FlashDevice, WriteOutcome,
};
use crate::error::{Error, Result};
use crate::memory::{TargetMemory, Width};
use crate::poll::{poll_bounded, WaitOutcome};
use alloc::vec::Vec;

/// Intel manufacturer ID
pub const MANUFACTURER_INTEL: u16 = 0x89;

/// Command values
pub mod cmd {
    /// Read array
    pub const READ_ARRAY: u32 = 0xFF;
    /// Read identifier codes
    pub const READ_ID: u32 = 0x90;
    /// Read status register
    pub const READ_STATUS: u32 = 0x70;
    /// Clear status register
    pub const CLEAR_STATUS: u32 = 0x50;
    /// Word program (C3)
    pub const PROGRAM: u32 = 0x40;
    /// Word program (P30)
    pub const WORD_PROGRAM: u32 = 0x41;
    /// Block erase setup
    pub const ERASE_SETUP: u32 = 0x20;
    /// Confirm erase, buffer program or unlock
    pub const CONFIRM: u32 = 0xD0;
    /// Lock setup
    pub const LOCK_SETUP: u32 = 0x60;
    /// Lock block (after lock setup)
    pub const LOCK: u32 = 0x01;
    /// Buffered program
    pub const BUFFER_PROGRAM: u32 = 0xE8;
    /// CFI query
    pub const CFI_QUERY: u32 = 0x98;
}

/// Status register bits
pub mod sr {
    /// Device ready
    pub const READY: u32 = 0x80;
    /// Erase error
    pub const ERASE_ERROR: u32 = 0x20;
    /// Program error
    pub const PROGRAM_ERROR: u32 = 0x10;
    /// Program/erase voltage low
    pub const VPP_LOW: u32 = 0x08;
    /// Block was locked
    pub const LOCKED: u32 = 0x02;
}

/// Bus arrangements tried by probe
const GEOMETRIES: [BusGeometry; 2] = [
    BusGeometry::new(Width::Word, Width::Word),
    BusGeometry::new(Width::Long, Width::Word),
];

/// Read identifier codes and match them against `chips`
pub(crate) fn probe_ids(
    mem: &mut dyn TargetMemory,
    base: u32,
    chips: &'static [FlashChip],
) -> Result<Option<(&'static FlashChip, BusGeometry)>> {
    for bus in GEOMETRIES {
        bus.command(mem, base, 0, cmd::READ_ID)?;
        let manufacturer = bus.read(mem, base, 0)?;
        let device = bus.read(mem, base, 1)?;
        bus.command(mem, base, 0, cmd::READ_ARRAY)?;

        let (m, d) = (bus.lane(manufacturer, 0), bus.lane(device, 0));
        if !bus.all_lanes(manufacturer, m) || !bus.all_lanes(device, d) {
            continue;
        }
        let Some(chip) = chips.iter().find(|c| c.matches(m, d)) else {
            continue;
        };
        if looks_like_ram(mem, base, bus.bus)? {
            log::debug!("intel: IDs {:04X}/{:04X} at 0x{:08X} are RAM", m, d, base);
            continue;
        }
        return Ok(Some((chip, bus)));
    }
    Ok(None)
}

/// A bound Intel C3 or P30 part
#[derive(Debug, Clone)]
pub struct IntelDevice {
    family: &'static str,
    chip: &'static FlashChip,
    bus: BusGeometry,
    base: u32,
    options: AlgorithmOptions,
    program_cmd: u32,
    buffer_bytes: u32,
}

impl IntelDevice {
    pub(crate) fn new(
        family: &'static str,
        chip: &'static FlashChip,
        bus: BusGeometry,
        base: u32,
        options: &AlgorithmOptions,
        program_cmd: u32,
        buffer_bytes: u32,
    ) -> Self {
        Self {
            family,
            chip,
            bus,
            base,
            options: *options,
            program_cmd,
            buffer_bytes,
        }
    }

    /// Bus layout the part was found with
    pub fn bus(&self) -> BusGeometry {
        self.bus
    }

    /// Write buffer size on the bus in bytes (0 = word program only)
    pub fn buffer_bytes(&self) -> u32 {
        self.buffer_bytes
    }

    fn write_cmd(&self, mem: &mut dyn TargetMemory, addr: u32, value: u32) -> Result<()> {
        self.bus.bus.write(mem, addr, self.bus.replicate(value))
    }

    fn read_array(&self, mem: &mut dyn TargetMemory) -> Result<()> {
        self.write_cmd(mem, self.base, cmd::READ_ARRAY)
    }

    /// Unlock the block containing `addr`
    pub fn unlock_block(&self, mem: &mut dyn TargetMemory, addr: u32) -> Result<()> {
        let (block, _) = self.sector_at(addr).ok_or(Error::Range)?;
        log::trace!("{}: unlock block 0x{:08X}", self.family, block);
        self.write_cmd(mem, block, cmd::LOCK_SETUP)?;
        self.write_cmd(mem, block, cmd::CONFIRM)?;
        self.read_array(mem)
    }

    /// Lock the block containing `addr`
    pub fn lock_block(&self, mem: &mut dyn TargetMemory, addr: u32) -> Result<()> {
        let (block, _) = self.sector_at(addr).ok_or(Error::Range)?;
        log::trace!("{}: lock block 0x{:08X}", self.family, block);
        self.write_cmd(mem, block, cmd::LOCK_SETUP)?;
        self.write_cmd(mem, block, cmd::LOCK)?;
        self.read_array(mem)
    }

    /// Poll status at `addr` until every lane reports ready
    pub(crate) fn wait_ready(
        &self,
        mem: &mut dyn TargetMemory,
        addr: u32,
        limit: u32,
        interval_us: u32,
    ) -> Result<u32> {
        let width = self.bus.bus;
        let ready = self.bus.replicate(sr::READY);
        let mut status = 0;
        let outcome = poll_bounded(limit, || {
            status = width.read(mem, addr)?;
            if status & ready == ready {
                return Ok(true);
            }
            if interval_us > 0 {
                mem.delay_us(interval_us);
            }
            Ok(false)
        })?;
        match outcome {
            WaitOutcome::Done(_) => Ok(status),
            WaitOutcome::Timeout => Err(Error::FlashTimeout { addr }),
        }
    }

    /// Fail if any lane of `status` has one of `errors` set
    pub(crate) fn check_status(&self, mem: &mut dyn TargetMemory, status: u32, errors: u32, addr: u32) -> Result<()> {
        if self.bus.lanes_with(status, errors) == 0 {
            return Ok(());
        }
        log::debug!("{}: status 0x{:08X} at 0x{:08X}", self.family, status, addr);
        self.write_cmd(mem, addr, cmd::CLEAR_STATUS)?;
        self.read_array(mem)?;
        Err(Error::DeviceFault { addr })
    }

    fn word_program(&self, mem: &mut dyn TargetMemory, addr: u32, value: u32) -> Result<()> {
        self.write_cmd(mem, addr, self.program_cmd)?;
        self.bus.bus.write(mem, addr, value)?;
        let status = self.wait_ready(mem, addr, self.options.program_poll_limit, 0)?;
        self.check_status(mem, status, sr::PROGRAM_ERROR | sr::VPP_LOW | sr::LOCKED, addr)
    }

    /// Program one buffer window (or one bus word without a buffer)
    fn program_segment(
        &self,
        mem: &mut dyn TargetMemory,
        words: &[(u32, u32, u32)],
        unlocked: &mut Option<u32>,
    ) -> Result<()> {
        let Some(&(first, _, _)) = words.first() else {
            return Ok(());
        };
        if words.iter().all(|&(_, current, desired)| current == desired) {
            return Ok(());
        }

        let block = self.sector_at(first).map(|(start, _)| start);
        if *unlocked != block {
            self.unlock_block(mem, first)?;
            *unlocked = block;
        }

        if self.buffer_bytes > 0 && words.len() > 1 {
            p30::program_buffered(self, mem, words)?;
        } else {
            for &(addr, current, desired) in words {
                if current != desired {
                    self.word_program(mem, addr, desired)?;
                }
            }
        }
        self.read_array(mem)?;

        for &(addr, _, desired) in words {
            if self.bus.bus.read(mem, addr)? != desired {
                return Err(Error::Verify { addr });
            }
        }
        Ok(())
    }

    /// Merge the transfer into the bus words of `start..stop` and program them
    fn program_window(
        &self,
        mem: &mut dyn TargetMemory,
        start: u32,
        stop: u64,
        addr: u32,
        data: &[u8],
        unlocked: &mut Option<u32>,
    ) -> Result<()> {
        let width = self.bus.bus;
        let mut words = Vec::new();
        for at in (start as u64..stop).step_by(width.bytes() as usize) {
            let at = at as u32;
            let current = width.read(mem, at)?;
            words.push((at, current, merge_word(width, at, current, addr, data)));
        }
        self.program_segment(mem, &words, unlocked)
    }

    fn erase_block(&self, mem: &mut dyn TargetMemory, block: u32) -> Result<()> {
        self.unlock_block(mem, block)?;
        log::trace!("{}: erase block 0x{:08X}", self.family, block);
        self.write_cmd(mem, block, cmd::ERASE_SETUP)?;
        self.write_cmd(mem, block, cmd::CONFIRM)?;
        let status = self.wait_ready(
            mem,
            block,
            self.options.erase_poll_limit,
            self.options.erase_poll_interval_us,
        )?;
        self.check_status(mem, status, sr::ERASE_ERROR | sr::VPP_LOW | sr::LOCKED, block)?;
        self.read_array(mem)
    }
}

impl FlashDevice for IntelDevice {
    fn family(&self) -> &'static str {
        self.family
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
        let len = data.len() as u64;
        let end = addr as u64 + len;
        if addr < self.base || end > self.base as u64 + self.size() as u64 {
            return WriteOutcome::partial(0, Error::Range);
        }

        let width = self.bus.bus;
        let word = width.bytes() as u64;
        let window = if self.buffer_bytes > 0 {
            self.buffer_bytes as u64
        } else {
            word
        };
        let first_word = addr as u64 & !(word - 1);
        let last_word = end.div_ceil(word) * word;

        let mut written = 0usize;
        let mut unlocked = None;
        let mut segment = first_word & !(window - 1);
        while segment < last_word {
            let start = segment.max(first_word);
            let stop = (segment + window).min(last_word);

            if let Err(fault) = self.program_window(mem, start as u32, stop, addr, data, &mut unlocked) {
                log::debug!("{}: program at 0x{:08X} failed: {}", self.family, start, fault);
                if let Err(e) = self.read_array(mem) {
                    log::warn!("{}: back to read array failed: {}", self.family, e);
                }
                return WriteOutcome::partial(written, fault);
            }

            let covered_start = start.max(addr as u64);
            let covered_end = stop.min(end);
            written += covered_end.saturating_sub(covered_start) as usize;
            segment += window;
        }
        WriteOutcome::complete(written)
    }

    fn erase(&mut self, mem: &mut dyn TargetMemory, target: EraseTarget) -> Result<()> {
        match target {
            EraseTarget::Sector(addr) => {
                let (block, _) = self.sector_at(addr).ok_or(Error::Range)?;
                self.erase_block(mem, block)
            }
            EraseTarget::All => {
                let lanes = self.bus.lanes();
                for (start, _) in self.chip.sectors() {
                    self.erase_block(mem, self.base + start * lanes)?;
                }
                Ok(())
            }
        }
    }
}
