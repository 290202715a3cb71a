//! Flash algorithm families
//!
//! A [`FlashAlgorithm`] knows how to recognise one family of parts. A
//! successful probe binds a [`FlashDevice`] to a base address; the device
//! carries all per-chip state (geometry, bus layout, buffer size) and runs
//! program/erase/wait/blank-check through whatever [`TargetMemory`] it is
//! handed.
//!
//! Parallel NOR parts are often wired side by side to form a wider bus.
//! [`BusGeometry`] describes such an arrangement: command cycles are
//! replicated into every chip lane and status is evaluated lane by lane.

pub mod amd29;
pub mod cfm;
pub mod intel;

use crate::error::{Error, Result};
use crate::memory::{TargetMemory, Width};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

/// Contiguous run of equally sized erase blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseRegion {
    /// Size of each block in this region, in bytes
    pub size: u32,
    /// Number of blocks in this region
    pub count: u32,
}

impl EraseRegion {
    /// Create a new erase region
    pub const fn new(size: u32, count: u32) -> Self {
        Self { size, count }
    }

    /// Total size of this region in bytes
    pub const fn total_size(&self) -> u32 {
        self.size * self.count
    }
}

/// Static description of one flash part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashChip {
    /// Vendor name
    pub vendor: &'static str,
    /// Part name
    pub name: &'static str,
    /// Manufacturer ID (unused by families identified otherwise)
    pub manufacturer: u16,
    /// Device ID, or part identification number
    pub device: u16,
    /// Size of one chip in bytes
    pub total_size: u32,
    /// Data width of one chip
    pub width: Width,
    /// Erase block layout from the lowest address up
    pub regions: &'static [EraseRegion],
    /// Chip-relative addresses of the two unlock cycles (JEDEC-style parts)
    pub unlock: [u32; 2],
}

impl FlashChip {
    /// Whether the IDs read from a part select this entry
    pub fn matches(&self, manufacturer: u32, device: u32) -> bool {
        let mask = self.width.mask();
        (self.manufacturer as u32 & mask) == (manufacturer & mask)
            && (self.device as u32 & mask) == (device & mask)
    }

    /// Erase block containing `offset`, as `(start, size)`
    pub fn sector_at(&self, offset: u32) -> Option<(u32, u32)> {
        let mut start = 0u32;
        for region in self.regions {
            let end = start + region.total_size();
            if offset < end {
                let index = (offset - start) / region.size;
                return Some((start + index * region.size, region.size));
            }
            start = end;
        }
        None
    }

    /// Iterate over every erase block as `(start, size)`
    pub fn sectors(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let mut start = 0u32;
        self.regions.iter().flat_map(move |region| {
            let base = start;
            start += region.total_size();
            (0..region.count).map(move |i| (base + i * region.size, region.size))
        })
    }
}

impl fmt::Display for FlashChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.vendor, self.name)
    }
}

/// Which part of a device an erase or blank check addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseTarget {
    /// The erase block containing this absolute address
    Sector(u32),
    /// The whole device
    All,
}

/// Result of a program operation that may stop part way
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Bytes transferred before the fault (or all of them)
    pub written: usize,
    /// The fault that ended the transfer early
    pub fault: Option<Error>,
}

impl WriteOutcome {
    /// Everything was written
    pub fn complete(written: usize) -> Self {
        Self {
            written,
            fault: None,
        }
    }

    /// Only `written` bytes made it before `fault`
    pub fn partial(written: usize, fault: Error) -> Self {
        Self {
            written,
            fault: Some(fault),
        }
    }

    /// Whether the transfer finished without a fault
    pub fn is_complete(&self) -> bool {
        self.fault.is_none()
    }

    /// The byte count, or the fault if there was one
    pub fn into_result(self) -> Result<usize> {
        match self.fault {
            Some(fault) => Err(fault),
            None => Ok(self.written),
        }
    }
}

/// ColdFire flash module settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
pub struct CfmOptions {
    /// Internal peripheral base address
    pub ipsbar: u32,
    /// Address the flash array is mapped at (the FLASHBAR base)
    pub flash_base: u32,
    /// System clock of the target in Hz
    pub sys_clock_hz: u32,
}

impl Default for CfmOptions {
    fn default() -> Self {
        Self {
            ipsbar: 0x4000_0000,
            flash_base: 0,
            sys_clock_hz: 64_000_000,
        }
    }
}

/// Runtime variables shared by all algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmOptions {
    /// Status polls allowed for one program cycle
    pub program_poll_limit: u32,
    /// Delay between status polls while erasing, in microseconds
    pub erase_poll_interval_us: u32,
    /// Status polls allowed for one erase
    pub erase_poll_limit: u32,
    /// ColdFire flash module settings
    pub cfm: CfmOptions,
}

impl Default for AlgorithmOptions {
    fn default() -> Self {
        Self {
            program_poll_limit: 0x10000,
            erase_poll_interval_us: 1000,
            erase_poll_limit: 120_000,
            cfm: CfmOptions::default(),
        }
    }
}

/// One flash family: identification and binding
pub trait FlashAlgorithm {
    /// Short family tag used as a registration hint
    fn family(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// Narrowest chip data width in bits; narrower families probe first
    fn min_chip_width(&self) -> u32;

    /// Parts this family recognises
    fn chips(&self) -> &'static [FlashChip];

    /// Look for a known part at `base`
    ///
    /// `Ok(None)` means nothing of this family answers there. Errors are
    /// faults of the access path itself.
    fn probe(
        &self,
        mem: &mut dyn TargetMemory,
        base: u32,
        options: &AlgorithmOptions,
    ) -> Result<Option<Box<dyn FlashDevice>>>;
}

/// A flash part bound to an address range
pub trait FlashDevice {
    /// Family tag of the algorithm that bound this device
    fn family(&self) -> &'static str;

    /// The recognised part
    fn chip(&self) -> &'static FlashChip;

    /// First address of the device
    fn base(&self) -> u32;

    /// Bytes occupied on the bus (all interleaved chips together)
    fn size(&self) -> u32;

    /// Program `data` at absolute address `addr`
    ///
    /// Cells that already hold the requested value are skipped without any
    /// command cycles.
    fn program(&mut self, mem: &mut dyn TargetMemory, addr: u32, data: &[u8]) -> WriteOutcome;

    /// Start erasing; families that erase asynchronously return at once
    fn erase(&mut self, mem: &mut dyn TargetMemory, target: EraseTarget) -> Result<()>;

    /// Wait for an erase started by [`FlashDevice::erase`]
    fn erase_wait(&mut self, _mem: &mut dyn TargetMemory, _target: EraseTarget) -> Result<()> {
        Ok(())
    }

    /// Ask the device whether the range is erased
    fn blank_check(&mut self, _mem: &mut dyn TargetMemory, _target: EraseTarget) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Bus range of the erase block containing absolute address `addr`
    fn sector_at(&self, addr: u32) -> Option<(u32, u32)> {
        let offset = addr.checked_sub(self.base())?;
        if offset >= self.size() {
            return None;
        }
        let lanes = self.size() / self.chip().total_size.max(1);
        let lanes = lanes.max(1);
        let (start, size) = self.chip().sector_at(offset / lanes)?;
        Some((self.base() + start * lanes, size * lanes))
    }
}

/// Every algorithm this crate provides
pub fn default_algorithms() -> Vec<Box<dyn FlashAlgorithm>> {
    alloc::vec![
        Box::new(amd29::Amd29),
        Box::new(intel::c3::IntelC3),
        Box::new(intel::p30::IntelP30),
        Box::new(cfm::Cfm),
    ]
}

/// Chip lanes on a data bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusGeometry {
    /// Data bus width
    pub bus: Width,
    /// Data width of each chip
    pub chip: Width,
}

impl BusGeometry {
    /// Bus/chip combination
    pub const fn new(bus: Width, chip: Width) -> Self {
        Self { bus, chip }
    }

    /// Number of chips side by side
    pub const fn lanes(&self) -> u32 {
        self.bus.bytes() / self.chip.bytes()
    }

    /// Bus bytes per chip address
    pub const fn stride(&self) -> u32 {
        self.bus.bytes()
    }

    /// Bus address of chip address `offset` relative to `base`
    pub fn addr(&self, base: u32, offset: u32) -> u32 {
        base.wrapping_add(offset.wrapping_mul(self.stride()))
    }

    /// `value` copied into every lane
    pub fn replicate(&self, value: u32) -> u32 {
        let value = value & self.chip.mask();
        (0..self.lanes()).fold(0, |acc, lane| acc | (value << (lane * self.chip.bits())))
    }

    /// Bits of lane `lane` (0 = least significant)
    pub fn lane_mask(&self, lane: u32) -> u32 {
        self.chip.mask() << (lane * self.chip.bits())
    }

    /// Value of lane `lane`
    pub fn lane(&self, value: u32, lane: u32) -> u32 {
        (value >> (lane * self.chip.bits())) & self.chip.mask()
    }

    /// Mask of lanes whose value differs between `a` and `b`
    pub fn differing_lanes(&self, a: u32, b: u32) -> u32 {
        (0..self.lanes())
            .filter(|&lane| self.lane(a ^ b, lane) != 0)
            .fold(0, |acc, lane| acc | self.lane_mask(lane))
    }

    /// Write a command value into every lane at chip address `offset`
    pub fn command(&self, mem: &mut dyn TargetMemory, base: u32, offset: u32, cmd: u32) -> Result<()> {
        self.bus.write(mem, self.addr(base, offset), self.replicate(cmd))
    }

    /// Read the value at chip address `offset`
    pub fn read(&self, mem: &mut dyn TargetMemory, base: u32, offset: u32) -> Result<u32> {
        self.bus.read(mem, self.addr(base, offset))
    }

    /// Mask of lanes in which any of `bits` is set
    pub fn lanes_with(&self, value: u32, bits: u32) -> u32 {
        (0..self.lanes())
            .filter(|&lane| self.lane(value, lane) & bits != 0)
            .fold(0, |acc, lane| acc | self.lane_mask(lane))
    }

    /// Whether every lane of `value` carries `expected`
    pub fn all_lanes(&self, value: u32, expected: u32) -> bool {
        value == self.replicate(expected)
    }
}

impl fmt::Display for BusGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}-bit", self.lanes(), self.chip.bits())
    }
}

/// Whether `addr` behaves like plain RAM at `width`
///
/// Writes two complementary patterns and reads them back. Flash in
/// read-array mode ignores stray writes, so a faithful read-back of both
/// means the probe hit memory that merely happened to hold matching IDs.
/// The original contents are restored if it was RAM.
pub fn looks_like_ram(mem: &mut dyn TargetMemory, addr: u32, width: Width) -> Result<bool> {
    let saved = width.read(mem, addr)?;
    let mut is_ram = true;
    for pattern in [0x5A5A_5A5Au32, 0xA5A5_A5A5] {
        let pattern = pattern & width.mask();
        width.write(mem, addr, pattern)?;
        if width.read(mem, addr)? != pattern {
            is_ram = false;
            break;
        }
    }
    if is_ram {
        width.write(mem, addr, saved)?;
    }
    Ok(is_ram)
}

/// Merge `data` over the bus word at `word_addr`
///
/// `addr`/`data` is the whole transfer; only the bytes falling inside the
/// word are taken from it, the rest keep `current`.
pub(crate) fn merge_word(width: Width, word_addr: u32, current: u32, addr: u32, data: &[u8]) -> u32 {
    let bytes = width.bytes();
    let mut value = current;
    for i in 0..bytes {
        let at = word_addr.wrapping_add(i);
        let Some(index) = at.checked_sub(addr) else {
            continue;
        };
        if let Some(&byte) = data.get(index as usize) {
            let shift = (bytes - 1 - i) * 8;
            value = (value & !(0xFF << shift)) | ((byte as u32) << shift);
        }
    }
    value
}

/// Aligned bus word addresses touched by a transfer
pub(crate) fn bus_words(width: Width, addr: u32, len: usize) -> impl Iterator<Item = u32> {
    let bytes = width.bytes() as u64;
    let first = addr as u64 & !(bytes - 1);
    let end = addr as u64 + len as u64;
    (first..end).step_by(bytes as usize).map(|a| a as u32)
}

/// Number of transfer bytes covered by the bus word at `word_addr`
pub(crate) fn covered_bytes(width: Width, word_addr: u32, addr: u32, len: usize) -> usize {
    let start = word_addr.max(addr) as u64;
    let end = (word_addr as u64 + width.bytes() as u64).min(addr as u64 + len as u64);
    end.saturating_sub(start) as usize
}
