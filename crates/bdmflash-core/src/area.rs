//! Memory area registry
//!
//! The registry partitions the whole 32-bit address space into areas. At
//! first a single RAM area spans everything; registering a flash device
//! carves its range out of the RAM area around it. Every address is owned
//! by exactly one area at all times, and flash areas never overlap.
//!
//! Transfers are routed per area: RAM goes straight to target memory,
//! flash goes to the bound device.

use crate::error::{Error, Result};
use crate::flash::{
    default_algorithms, AlgorithmOptions, EraseTarget, FlashAlgorithm, FlashDevice, WriteOutcome,
};
use crate::memory::TargetMemory;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;

bitflags! {
    /// Area state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AreaFlags: u8 {
        /// Owned by a flash device
        const FLASH = 1 << 0;
        /// Registered by probing every family rather than a hint
        const AUTO = 1 << 1;
        /// Known erased since the last whole-device erase
        const ERASED = 1 << 2;
        /// The last operation on the area faulted
        const ERROR = 1 << 3;
    }
}

/// How much of a flash area an erase addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseScope {
    /// The erase block containing the address
    Sector,
    /// The whole device owning the address
    Chip,
}

/// Owner of an area
pub enum AreaKind {
    /// Plain memory
    Ram,
    /// A bound flash device
    Flash(Box<dyn FlashDevice>),
}

/// One contiguous, inclusive address range and its owner
pub struct MemoryArea {
    begin: u32,
    end: u32,
    kind: AreaKind,
    flags: AreaFlags,
}

impl MemoryArea {
    fn ram(begin: u32, end: u32) -> Self {
        Self {
            begin,
            end,
            kind: AreaKind::Ram,
            flags: AreaFlags::empty(),
        }
    }

    /// First address
    pub fn begin(&self) -> u32 {
        self.begin
    }

    /// Last address (inclusive)
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Size in bytes
    pub fn len(&self) -> u64 {
        self.end as u64 - self.begin as u64 + 1
    }

    /// Areas always hold at least one byte
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `addr` falls in this area
    pub fn contains(&self, addr: u32) -> bool {
        (self.begin..=self.end).contains(&addr)
    }

    /// Current flags
    pub fn flags(&self) -> AreaFlags {
        self.flags
    }

    /// Whether a flash device owns the area
    pub fn is_flash(&self) -> bool {
        matches!(self.kind, AreaKind::Flash(_))
    }

    /// The bound flash device
    pub fn device(&self) -> Option<&dyn FlashDevice> {
        match &self.kind {
            AreaKind::Flash(device) => Some(device.as_ref()),
            AreaKind::Ram => None,
        }
    }

    /// Family tag of the owner ("ram" for plain memory)
    pub fn family(&self) -> &'static str {
        self.device().map_or("ram", |d| d.family())
    }

    fn fault(&mut self, fault: Error) -> Error {
        self.flags.insert(AreaFlags::ERROR);
        fault
    }
}

impl fmt::Display for MemoryArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}-0x{:08X} ", self.begin, self.end)?;
        match self.device() {
            Some(device) => write!(f, "{} ({})", device.chip(), device.family()),
            None => f.write_str("RAM"),
        }
    }
}

/// Ownership map from address ranges to RAM or flash devices
pub struct AreaRegistry {
    areas: BTreeMap<u32, MemoryArea>,
    algorithms: Vec<Box<dyn FlashAlgorithm>>,
    options: AlgorithmOptions,
}

impl AreaRegistry {
    /// Registry with every built-in algorithm
    pub fn new(options: AlgorithmOptions) -> Self {
        Self::with_algorithms(default_algorithms(), options)
    }

    /// Registry with a custom algorithm list
    pub fn with_algorithms(algorithms: Vec<Box<dyn FlashAlgorithm>>, options: AlgorithmOptions) -> Self {
        let mut areas = BTreeMap::new();
        areas.insert(0, MemoryArea::ram(0, u32::MAX));
        Self {
            areas,
            algorithms,
            options,
        }
    }

    /// Algorithm options handed to every probe
    pub fn options(&self) -> &AlgorithmOptions {
        &self.options
    }

    /// Known algorithms
    pub fn algorithms(&self) -> impl Iterator<Item = &dyn FlashAlgorithm> {
        self.algorithms.iter().map(|a| a.as_ref())
    }

    /// All areas in address order
    pub fn areas(&self) -> impl Iterator<Item = &MemoryArea> {
        self.areas.values()
    }

    /// Area owning `addr`
    pub fn find(&self, addr: u32) -> Option<&MemoryArea> {
        self.areas.range(..=addr).next_back().map(|(_, area)| area)
    }

    fn find_mut(&mut self, addr: u32) -> Option<&mut MemoryArea> {
        self.areas.range_mut(..=addr).next_back().map(|(_, area)| area)
    }

    /// Algorithm indices in probe order
    fn candidates(&self, hint: Option<&str>) -> Result<Vec<usize>> {
        let mut order: Vec<usize> = match hint {
            Some(family) => self
                .algorithms
                .iter()
                .enumerate()
                .filter(|(_, a)| a.family().eq_ignore_ascii_case(family))
                .map(|(i, _)| i)
                .collect(),
            None => (0..self.algorithms.len()).collect(),
        };
        if order.is_empty() {
            return Err(Error::NotFound);
        }
        order.sort_by_key(|&i| self.algorithms[i].min_chip_width());
        Ok(order)
    }

    /// Probe for a flash device at `base` and give it its own area
    ///
    /// With a hint only that family is probed; otherwise families are
    /// tried narrowest chip first. The device range must lie inside one
    /// RAM area.
    pub fn register_area(
        &mut self,
        mem: &mut dyn TargetMemory,
        hint: Option<&str>,
        base: u32,
    ) -> Result<&MemoryArea> {
        if self.find(base).is_some_and(MemoryArea::is_flash) {
            return Err(Error::Range);
        }

        let mut found = None;
        for index in self.candidates(hint)? {
            let algorithm = &self.algorithms[index];
            match algorithm.probe(mem, base, &self.options) {
                Ok(Some(device)) => {
                    found = Some(device);
                    break;
                }
                Ok(None) => {}
                Err(e) if e.is_target_unavailable() => return Err(e),
                Err(e) => {
                    log::debug!("{}: probe at 0x{:08X} failed: {}", algorithm.family(), base, e);
                }
            }
        }
        let device = found.ok_or(Error::NotFound)?;

        let size = device.size();
        let end = size
            .checked_sub(1)
            .and_then(|last| base.checked_add(last))
            .ok_or(Error::Range)?;

        let (ram_begin, ram_end) = match self.find(base) {
            Some(area) if !area.is_flash() && area.end >= end => (area.begin, area.end),
            _ => return Err(Error::Range),
        };

        log::debug!(
            "Registered {} ({}) at 0x{:08X}-0x{:08X}",
            device.chip(),
            device.family(),
            base,
            end
        );

        self.areas.remove(&ram_begin);
        if ram_begin < base {
            self.areas.insert(ram_begin, MemoryArea::ram(ram_begin, base - 1));
        }
        if ram_end > end {
            self.areas.insert(end + 1, MemoryArea::ram(end + 1, ram_end));
        }
        let mut flags = AreaFlags::FLASH;
        if hint.is_none() {
            flags |= AreaFlags::AUTO;
        }
        let area = self.areas.entry(base).or_insert(MemoryArea {
            begin: base,
            end,
            kind: AreaKind::Flash(device),
            flags,
        });
        Ok(area)
    }

    /// Write `data` at `addr`, splitting the transfer at area boundaries
    ///
    /// Stops at the first short write; the bytes already written stay.
    pub fn write_memory(&mut self, mem: &mut dyn TargetMemory, addr: u32, data: &[u8]) -> WriteOutcome {
        let mut done = 0usize;
        while done < data.len() {
            let Some(at) = u32::try_from(done).ok().and_then(|d| addr.checked_add(d)) else {
                return WriteOutcome::partial(done, Error::Range);
            };
            let Some(area) = self.find_mut(at) else {
                return WriteOutcome::partial(done, Error::Range);
            };
            let room = (area.end as u64 - at as u64 + 1).min((data.len() - done) as u64) as usize;
            let chunk = &data[done..done + room];

            match &mut area.kind {
                AreaKind::Ram => {
                    if let Err(fault) = mem.write(at, chunk) {
                        return WriteOutcome::partial(done, fault);
                    }
                    done += room;
                }
                AreaKind::Flash(device) => {
                    let outcome = device.program(mem, at, chunk);
                    done += outcome.written.min(room);
                    area.flags.remove(AreaFlags::ERASED);
                    if let Some(fault) = outcome.fault {
                        return WriteOutcome::partial(done, area.fault(fault));
                    }
                    if outcome.written < room {
                        return WriteOutcome::partial(done, area.fault(Error::WriteFail));
                    }
                }
            }
        }
        WriteOutcome::complete(done)
    }

    /// Read target memory; flash in read-array mode reads like RAM
    pub fn read_memory(&self, mem: &mut dyn TargetMemory, addr: u32, buf: &mut [u8]) -> Result<()> {
        mem.read(addr, buf)
    }

    fn flash_op<F>(&mut self, addr: u32, op: F) -> Result<bool>
    where
        F: FnOnce(&mut dyn FlashDevice, &mut AreaFlags) -> Result<()>,
    {
        let area = self.find_mut(addr).ok_or(Error::Range)?;
        let AreaKind::Flash(device) = &mut area.kind else {
            return Ok(false);
        };
        match op(device.as_mut(), &mut area.flags) {
            Ok(()) => Ok(true),
            Err(fault) => Err(area.fault(fault)),
        }
    }

    fn erase_target(scope: EraseScope, addr: u32) -> EraseTarget {
        match scope {
            EraseScope::Sector => EraseTarget::Sector(addr),
            EraseScope::Chip => EraseTarget::All,
        }
    }

    /// Start erasing the sector or device at `addr`
    ///
    /// Returns `false` when `addr` is RAM.
    pub fn erase_area(&mut self, mem: &mut dyn TargetMemory, addr: u32, scope: EraseScope) -> Result<bool> {
        self.flash_op(addr, |device, flags| {
            flags.remove(AreaFlags::ERASED);
            device.erase(mem, Self::erase_target(scope, addr))
        })
    }

    /// Wait for an erase started with [`AreaRegistry::erase_area`]
    ///
    /// A completed whole-device erase marks the area [`AreaFlags::ERASED`].
    pub fn erase_wait(&mut self, mem: &mut dyn TargetMemory, addr: u32, scope: EraseScope) -> Result<bool> {
        self.flash_op(addr, |device, flags| {
            device.erase_wait(mem, Self::erase_target(scope, addr))?;
            if scope == EraseScope::Chip {
                flags.insert(AreaFlags::ERASED);
            }
            Ok(())
        })
    }

    /// Ask the device at `addr` whether the sector or device is blank
    pub fn blank_check(&mut self, mem: &mut dyn TargetMemory, addr: u32, scope: EraseScope) -> Result<bool> {
        self.flash_op(addr, |device, _| device.blank_check(mem, Self::erase_target(scope, addr)))
    }

    /// Erase and wait for every flash area, one after the other
    ///
    /// Returns the number of areas erased.
    pub fn erase_all_flash(&mut self, mem: &mut dyn TargetMemory) -> Result<usize> {
        let bases: Vec<u32> = self.areas().filter(|a| a.is_flash()).map(|a| a.begin).collect();
        for &base in &bases {
            self.erase_area(mem, base, EraseScope::Chip)?;
            self.erase_wait(mem, base, EraseScope::Chip)?;
        }
        Ok(bases.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::{EraseRegion, FlashChip};
    use crate::memory::{RamMemory, Width};
    use alloc::vec;

    static FAKE_CHIPS: &[FlashChip] = &[FlashChip {
        vendor: "Test",
        name: "FAKE4K",
        manufacturer: 0,
        device: 0,
        total_size: 0x1000,
        width: Width::Byte,
        regions: &[EraseRegion::new(0x400, 4)],
        unlock: [0, 0],
    }];

    /// Finds a device wherever the memory holds the byte 0xF1
    struct FakeAlgorithm {
        family: &'static str,
        width: u32,
        fail_from: u32,
    }

    impl FlashAlgorithm for FakeAlgorithm {
        fn family(&self) -> &'static str {
            self.family
        }
        fn description(&self) -> &'static str {
            "fake"
        }
        fn min_chip_width(&self) -> u32 {
            self.width
        }
        fn chips(&self) -> &'static [FlashChip] {
            FAKE_CHIPS
        }
        fn probe(
            &self,
            mem: &mut dyn TargetMemory,
            base: u32,
            _options: &AlgorithmOptions,
        ) -> Result<Option<Box<dyn FlashDevice>>> {
            if mem.read_u8(base)? != 0xF1 {
                return Ok(None);
            }
            Ok(Some(Box::new(FakeDevice {
                family: self.family,
                base,
                fail_from: self.fail_from,
            })))
        }
    }

    struct FakeDevice {
        family: &'static str,
        base: u32,
        fail_from: u32,
    }

    impl FlashDevice for FakeDevice {
        fn family(&self) -> &'static str {
            self.family
        }
        fn chip(&self) -> &'static FlashChip {
            &FAKE_CHIPS[0]
        }
        fn base(&self) -> u32 {
            self.base
        }
        fn size(&self) -> u32 {
            0x1000
        }
        fn program(&mut self, mem: &mut dyn TargetMemory, addr: u32, data: &[u8]) -> WriteOutcome {
            for (i, &byte) in data.iter().enumerate() {
                let at = addr + i as u32;
                if at >= self.fail_from {
                    return WriteOutcome::partial(i, Error::DeviceFault { addr: at });
                }
                if let Err(e) = mem.write_u8(at, byte) {
                    return WriteOutcome::partial(i, e);
                }
            }
            WriteOutcome::complete(data.len())
        }
        fn erase(&mut self, mem: &mut dyn TargetMemory, target: EraseTarget) -> Result<()> {
            let (start, len) = match target {
                EraseTarget::All => (self.base, 0x1000),
                EraseTarget::Sector(addr) => self.sector_at(addr).ok_or(Error::Range)?,
            };
            mem.write(start, &vec![0xFF; len as usize])
        }
    }

    fn registry(fail_from: u32) -> AreaRegistry {
        let algorithms: Vec<Box<dyn FlashAlgorithm>> = vec![
            Box::new(FakeAlgorithm { family: "wide", width: 32, fail_from }),
            Box::new(FakeAlgorithm { family: "narrow", width: 8, fail_from }),
        ];
        AreaRegistry::with_algorithms(algorithms, AlgorithmOptions::default())
    }

    fn assert_partition(reg: &AreaRegistry) {
        let mut next = 0u64;
        for area in reg.areas() {
            assert_eq!(area.begin() as u64, next, "gap or overlap at {}", area);
            assert!(area.end() >= area.begin());
            next = area.end() as u64 + 1;
        }
        assert_eq!(next, 1u64 << 32);
    }

    fn memory_with_marks(marks: &[u32]) -> RamMemory {
        let mut ram = RamMemory::new(0, 0x20000);
        for &at in marks {
            ram.as_mut_slice()[at as usize] = 0xF1;
        }
        ram
    }

    #[test]
    fn test_starts_as_single_ram_area() {
        let reg = registry(u32::MAX);
        assert_partition(&reg);
        assert_eq!(reg.areas().count(), 1);
        assert_eq!(reg.find(0x1234).unwrap().family(), "ram");
    }

    #[test]
    fn test_partition_after_registrations() {
        let mut mem = memory_with_marks(&[0x0, 0x8000, 0x3000]);
        let mut reg = registry(u32::MAX);

        for base in [0x8000, 0x0, 0x3000] {
            reg.register_area(&mut mem, None, base).unwrap();
            assert_partition(&reg);
        }
        // flash at 0, ram, flash at 0x3000, ram, flash at 0x8000, ram
        assert_eq!(reg.areas().count(), 6);
        assert!(reg.find(0x0FFF).unwrap().is_flash());
        assert!(!reg.find(0x1000).unwrap().is_flash());
        assert_eq!(reg.find(0x8FFF).unwrap().begin(), 0x8000);
        assert_eq!(reg.find(u32::MAX).unwrap().begin(), 0x9000);
    }

    #[test]
    fn test_probe_order_and_hint() {
        let mut mem = memory_with_marks(&[0x0, 0x4000]);
        let mut reg = registry(u32::MAX);

        let area = reg.register_area(&mut mem, None, 0).unwrap();
        assert_eq!(area.family(), "narrow");
        assert!(area.flags().contains(AreaFlags::FLASH | AreaFlags::AUTO));

        let area = reg.register_area(&mut mem, Some("WIDE"), 0x4000).unwrap();
        assert_eq!(area.family(), "wide");
        assert!(!area.flags().contains(AreaFlags::AUTO));

        assert_eq!(reg.register_area(&mut mem, Some("nope"), 0x8000).err(), Some(Error::NotFound));
    }

    #[test]
    fn test_overlap_rejected() {
        let mut mem = memory_with_marks(&[0x1000, 0x1800, 0x0C00]);
        let mut reg = registry(u32::MAX);
        reg.register_area(&mut mem, None, 0x1000).unwrap();

        // Inside an existing flash area
        assert_eq!(reg.register_area(&mut mem, None, 0x1800).err(), Some(Error::Range));
        // Starts in RAM but runs into the flash area
        assert_eq!(reg.register_area(&mut mem, None, 0x0C00).err(), Some(Error::Range));
        assert_partition(&reg);
    }

    #[test]
    fn test_nothing_found() {
        let mut mem = memory_with_marks(&[]);
        let mut reg = registry(u32::MAX);
        assert_eq!(reg.register_area(&mut mem, None, 0x100).err(), Some(Error::NotFound));
        assert_eq!(reg.areas().count(), 1);
    }

    #[test]
    fn test_write_spans_ram_and_flash() {
        let mut mem = memory_with_marks(&[0x1000]);
        let mut reg = registry(u32::MAX);
        reg.register_area(&mut mem, None, 0x1000).unwrap();

        let data: Vec<u8> = (0..0x20).collect();
        let outcome = reg.write_memory(&mut mem, 0x0FF0, &data);
        assert_eq!(outcome, WriteOutcome::complete(0x20));
        assert_eq!(&mem.as_slice()[0x0FF0..0x1010], &data[..]);
    }

    #[test]
    fn test_failure_in_second_area_keeps_first() {
        let mut mem = memory_with_marks(&[0x1000]);
        let mut reg = registry(0x1008);
        reg.register_area(&mut mem, None, 0x1000).unwrap();

        let data = [0xAB; 0x20];
        let outcome = reg.write_memory(&mut mem, 0x0FF0, &data);
        assert_eq!(outcome.written, 0x18);
        assert_eq!(outcome.fault, Some(Error::DeviceFault { addr: 0x1008 }));
        assert!(mem.as_slice()[0x0FF0..0x1008].iter().all(|&b| b == 0xAB));
        assert_eq!(mem.as_slice()[0x1008], 0);
        assert!(reg.find(0x1000).unwrap().flags().contains(AreaFlags::ERROR));
    }

    #[test]
    fn test_erase_dispatch() {
        let mut mem = memory_with_marks(&[0x1000]);
        let mut reg = registry(u32::MAX);
        reg.register_area(&mut mem, None, 0x1000).unwrap();

        assert_eq!(reg.erase_area(&mut mem, 0x10, EraseScope::Chip), Ok(false));
        assert_eq!(reg.erase_area(&mut mem, 0x1500, EraseScope::Sector), Ok(true));
        assert!(mem.as_slice()[0x1400..0x1800].iter().all(|&b| b == 0xFF));
        assert_eq!(mem.as_slice()[0x1000], 0xF1);

        assert_eq!(reg.erase_all_flash(&mut mem), Ok(1));
        assert!(reg.find(0x1000).unwrap().flags().contains(AreaFlags::ERASED));
        assert!(mem.as_slice()[0x1000..0x2000].iter().all(|&b| b == 0xFF));

        assert_eq!(reg.blank_check(&mut mem, 0x10, EraseScope::Chip), Ok(false));
        assert_eq!(reg.blank_check(&mut mem, 0x1000, EraseScope::Chip), Err(Error::Unsupported));
    }
}
