//! Intel command-set flash emulator (C3 and P30)
//!
//! Every block powers up locked. Commands a lane does not know put it
//! back into read-array mode, the way the real parts treat stray JEDEC
//! cycles from other probes.

use crate::bank::Bank;
use crate::bus::BusDevice;
use bdmflash_core::error::Result;
use bdmflash_core::flash::intel::{c3, cmd, p30, sr, MANUFACTURER_INTEL};
use bdmflash_core::flash::{BusGeometry, FlashChip};
use bdmflash_core::memory::Width;
use std::collections::HashSet;

/// Byte program command accepted by both families
const ALT_PROGRAM: u32 = 0x10;

/// log2 of the P30 write buffer size in bytes
const P30_BUFFER_LOG2: u32 = 6;

/// Command sequence error reported in the status register
const SEQUENCE_ERROR: u32 = sr::PROGRAM_ERROR | sr::ERASE_ERROR;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Array,
    Id,
    Status,
    Query,
    ProgramSetup,
    EraseSetup,
    LockSetup,
    BufferCount,
    BufferData(u32),
    BufferConfirm,
}

#[derive(Debug, Clone)]
struct Lane {
    mode: Mode,
    status: u32,
    busy: u32,
    buffer: Vec<(u32, u32)>,
}

impl Lane {
    fn new() -> Self {
        Self {
            mode: Mode::Array,
            status: 0,
            busy: 0,
            buffer: Vec::new(),
        }
    }
}

/// One or more interleaved Intel C3/P30 parts
#[derive(Debug, Clone)]
pub struct IntelFlash {
    bank: Bank,
    lanes: Vec<Lane>,
    unlocked: HashSet<(u32, u32)>,
    buffer_log2: u32,
    program_reads: u32,
    erase_reads: u32,
}

impl IntelFlash {
    /// `chip` on a `bus`-wide data bus at `base`
    ///
    /// `buffer_log2` is the write buffer size per chip reported through
    /// CFI; zero means the part has no buffer.
    pub fn new(chip: &'static FlashChip, bus: Width, base: u32, buffer_log2: u32) -> Self {
        let bank = Bank::new(chip, BusGeometry::new(bus, chip.width), base);
        let lanes = (0..bank.lanes()).map(|_| Lane::new()).collect();
        Self {
            bank,
            lanes,
            unlocked: HashSet::new(),
            buffer_log2,
            program_reads: 2,
            erase_reads: 10,
        }
    }

    /// Look the part up by name in the C3 and P30 tables
    pub fn by_name(name: &str, bus: Width, base: u32) -> Option<Self> {
        let find = |chips: &'static [FlashChip]| chips.iter().find(|c| c.name.eq_ignore_ascii_case(name));
        if let Some(chip) = find(c3::CHIPS) {
            return Some(Self::new(chip, bus, base, 0));
        }
        find(p30::CHIPS).map(|chip| Self::new(chip, bus, base, P30_BUFFER_LOG2))
    }

    /// Status reads a program or erase stays busy for
    pub fn with_busy_reads(mut self, program: u32, erase: u32) -> Self {
        self.program_reads = program;
        self.erase_reads = erase;
        self
    }

    /// Preload array contents at bus offset `offset`
    pub fn with_data(mut self, offset: usize, data: &[u8]) -> Self {
        self.bank.data[offset..offset + data.len()].copy_from_slice(data);
        self
    }

    /// Array contents in bus order
    pub fn data(&self) -> &[u8] {
        &self.bank.data
    }

    /// Whether the block holding chip address `chip_addr` is locked in `lane`
    fn is_locked(&self, lane: u32, chip_addr: u32) -> bool {
        match self.bank.block_of(chip_addr) {
            Some(block) => !self.unlocked.contains(&(lane, block)),
            None => true,
        }
    }

    fn buffer_words(&self) -> u32 {
        if self.buffer_log2 == 0 {
            return 0;
        }
        (1 << self.buffer_log2) / self.bank.geometry.chip.bytes()
    }

    fn cfi(&self, chip_addr: u32) -> u32 {
        match chip_addr {
            0x10 => b'Q' as u32,
            0x11 => b'R' as u32,
            0x12 => b'Y' as u32,
            0x2A => self.buffer_log2,
            _ => 0,
        }
    }

    fn lane_read(&mut self, lane: u32, chip_addr: u32) -> u32 {
        let locked = self.is_locked(lane, chip_addr);
        let cfi = self.cfi(chip_addr);
        let block_offset = self
            .bank
            .block_of(chip_addr)
            .map_or(chip_addr, |block| chip_addr - block);
        let chip = self.bank.chip;

        let state = &mut self.lanes[lane as usize];
        if state.busy > 0 {
            state.busy -= 1;
            return state.status & !sr::READY;
        }
        match state.mode {
            Mode::Array => self.bank.get(lane, chip_addr),
            Mode::Id => match block_offset {
                0 => MANUFACTURER_INTEL as u32,
                1 => chip.device as u32,
                2 => locked as u32,
                _ => 0,
            },
            Mode::Query => cfi,
            _ => state.status | sr::READY,
        }
    }

    fn lane_write(&mut self, lane: u32, chip_addr: u32, value: u32) {
        if self.lanes[lane as usize].busy > 0 {
            return;
        }
        let mode = self.lanes[lane as usize].mode.clone();
        let next = match mode {
            Mode::ProgramSetup => {
                self.program(lane, &[(chip_addr, value)]);
                Mode::Status
            }
            Mode::EraseSetup => {
                if value == cmd::CONFIRM {
                    self.erase(lane, chip_addr);
                } else {
                    self.lanes[lane as usize].status |= SEQUENCE_ERROR;
                }
                Mode::Status
            }
            Mode::LockSetup => {
                match (value, self.bank.block_of(chip_addr)) {
                    (cmd::CONFIRM, Some(block)) => {
                        self.unlocked.insert((lane, block));
                    }
                    (cmd::LOCK, Some(block)) => {
                        self.unlocked.remove(&(lane, block));
                    }
                    _ => self.lanes[lane as usize].status |= SEQUENCE_ERROR,
                }
                Mode::Status
            }
            Mode::BufferCount => {
                let count = value + 1;
                if count > self.buffer_words() {
                    self.lanes[lane as usize].status |= SEQUENCE_ERROR;
                    Mode::Status
                } else {
                    self.lanes[lane as usize].buffer.clear();
                    Mode::BufferData(count)
                }
            }
            Mode::BufferData(remaining) => {
                self.lanes[lane as usize].buffer.push((chip_addr, value));
                if remaining > 1 {
                    Mode::BufferData(remaining - 1)
                } else {
                    Mode::BufferConfirm
                }
            }
            Mode::BufferConfirm => {
                if value == cmd::CONFIRM {
                    let words = std::mem::take(&mut self.lanes[lane as usize].buffer);
                    self.program(lane, &words);
                } else {
                    self.lanes[lane as usize].status |= SEQUENCE_ERROR;
                }
                Mode::Status
            }
            Mode::Array | Mode::Id | Mode::Status | Mode::Query => self.command(lane, value, mode),
        };
        self.lanes[lane as usize].mode = next;
    }

    fn command(&mut self, lane: u32, value: u32, mode: Mode) -> Mode {
        match value {
            cmd::READ_ID => Mode::Id,
            cmd::READ_STATUS => Mode::Status,
            cmd::CLEAR_STATUS => {
                self.lanes[lane as usize].status = 0;
                mode
            }
            cmd::PROGRAM | cmd::WORD_PROGRAM | ALT_PROGRAM => Mode::ProgramSetup,
            cmd::ERASE_SETUP => Mode::EraseSetup,
            cmd::LOCK_SETUP => Mode::LockSetup,
            cmd::BUFFER_PROGRAM if self.buffer_log2 > 0 => Mode::BufferCount,
            cmd::CFI_QUERY => Mode::Query,
            _ => Mode::Array,
        }
    }

    fn program(&mut self, lane: u32, words: &[(u32, u32)]) {
        if words.iter().any(|&(addr, _)| self.is_locked(lane, addr)) {
            self.lanes[lane as usize].status |= sr::PROGRAM_ERROR | sr::LOCKED;
            return;
        }
        for &(addr, value) in words {
            self.bank.program(lane, addr, value);
        }
        self.lanes[lane as usize].busy = self.program_reads;
    }

    fn erase(&mut self, lane: u32, chip_addr: u32) {
        if self.is_locked(lane, chip_addr) {
            self.lanes[lane as usize].status |= sr::ERASE_ERROR | sr::LOCKED;
            return;
        }
        self.bank.erase_block(lane, chip_addr);
        self.lanes[lane as usize].busy = self.erase_reads;
    }
}

impl BusDevice for IntelFlash {
    fn name(&self) -> &str {
        self.bank.chip.name
    }

    fn claims(&self, addr: u32) -> bool {
        self.bank.claims(addr)
    }

    fn read(&mut self, addr: u32, width: Width) -> Result<u32> {
        if !self.bank.is_bus_cycle(width) {
            return self.bank.read_array(addr, width);
        }
        let chip_addr = self.bank.chip_addr(addr);
        let lanes: Vec<u32> = (0..self.bank.lanes())
            .map(|lane| self.lane_read(lane, chip_addr))
            .collect();
        Ok(self.bank.join(|lane| lanes[lane as usize]))
    }

    fn write(&mut self, addr: u32, width: Width, value: u32) -> Result<()> {
        if !self.bank.is_bus_cycle(width) {
            return Ok(());
        }
        let chip_addr = self.bank.chip_addr(addr);
        for lane in 0..self.bank.lanes() {
            let lane_value = self.bank.geometry.lane(value, lane);
            self.lane_write(lane, chip_addr, lane_value);
        }
        Ok(())
    }
}
