//! ColdFire flash module emulator
//!
//! Decodes four windows: the array itself (read only), the CFM register
//! block, the backdoor the data latch is written through, and the chip
//! identification register. Commands keep CCIF low for a configurable
//! number of status reads. Programming a long that is not erased is an
//! access error, as on the real module.

use crate::bus::{read_be, write_be, BusDevice};
use bdmflash_core::error::{Error, Result};
use bdmflash_core::flash::cfm::{self, clkd, cmd, reg, ustat, BACKDOOR, CFM_REGS, CIR, PAGE_SIZE};
use bdmflash_core::flash::FlashChip;
use bdmflash_core::memory::Width;

/// Size of the decoded register block
const REG_BLOCK: u32 = 0x28;

/// Protection register granularity: one bit per 1/32 of the array
const PROT_SECTORS: u32 = 32;

/// The flash module of one MCF52xx part
#[derive(Debug, Clone)]
pub struct CfmModule {
    chip: &'static FlashChip,
    base: u32,
    ipsbar: u32,
    revision: u16,
    data: Vec<u8>,
    regs: [u8; REG_BLOCK as usize],
    latch: Option<(u32, u32)>,
    busy: u32,
    command_reads: u32,
    pending: Option<(u8, u32, u32)>,
    launched: Vec<(u8, u32)>,
}

impl CfmModule {
    /// `chip` with its array at `base` and peripherals at `ipsbar`
    pub fn new(chip: &'static FlashChip, base: u32, ipsbar: u32) -> Self {
        let mut regs = [0u8; REG_BLOCK as usize];
        regs[reg::USTAT as usize] = ustat::CBEIF | ustat::CCIF;
        Self {
            chip,
            base,
            ipsbar,
            revision: 0,
            data: vec![0xFF; chip.total_size as usize],
            regs,
            latch: None,
            busy: 0,
            command_reads: 4,
            pending: None,
            launched: Vec::new(),
        }
    }

    /// Look the part up by name in the CFM table
    pub fn by_name(name: &str, base: u32, ipsbar: u32) -> Option<Self> {
        cfm::CHIPS
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|chip| Self::new(chip, base, ipsbar))
    }

    /// Status reads a command stays busy for
    pub fn with_command_reads(mut self, reads: u32) -> Self {
        self.command_reads = reads;
        self
    }

    /// Preload array contents at `offset`
    pub fn with_data(mut self, offset: usize, data: &[u8]) -> Self {
        self.data[offset..offset + data.len()].copy_from_slice(data);
        self
    }

    /// Protect the array sectors whose bits are set
    pub fn with_protection(mut self, prot: u32) -> Self {
        write_be(&mut self.regs[reg::PROT as usize..reg::PROT as usize + 4], prot);
        self
    }

    /// Array contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Commands accepted so far, with their array offsets
    pub fn launched(&self) -> &[(u8, u32)] {
        &self.launched
    }

    fn regs_base(&self) -> u32 {
        self.ipsbar.wrapping_add(CFM_REGS)
    }

    fn backdoor_base(&self) -> u32 {
        self.ipsbar.wrapping_add(BACKDOOR)
    }

    fn cir_addr(&self) -> u32 {
        self.ipsbar.wrapping_add(CIR)
    }

    fn in_window(addr: u32, base: u32, len: u32) -> bool {
        addr.wrapping_sub(base) < len
    }

    fn ustat(&self) -> u8 {
        self.regs[reg::USTAT as usize]
    }

    fn set_ustat(&mut self, value: u8) {
        self.regs[reg::USTAT as usize] = value;
    }

    fn is_protected(&self, offset: u32) -> bool {
        let prot = read_be(&self.regs[reg::PROT as usize..reg::PROT as usize + 4]);
        let sector = offset / (self.chip.total_size / PROT_SECTORS);
        prot & (1 << (PROT_SECTORS - 1 - sector)) != 0
    }

    fn launch(&mut self) {
        let mut status = self.ustat();
        let divider_set = self.regs[reg::CLKD as usize] & clkd::DIVLD != 0;
        let command = self.regs[reg::CMD as usize];
        let Some((offset, value)) = self.latch.take() else {
            self.set_ustat(status | ustat::ACCERR);
            return;
        };
        let known = matches!(
            command,
            cmd::BLANK_CHECK | cmd::PAGE_ERASE_VERIFY | cmd::PROGRAM | cmd::PAGE_ERASE | cmd::MASS_ERASE
        );
        if !divider_set || !known {
            self.set_ustat(status | ustat::ACCERR);
            return;
        }
        let writes_array = matches!(command, cmd::PROGRAM | cmd::PAGE_ERASE | cmd::MASS_ERASE);
        let protected = match command {
            cmd::MASS_ERASE => (0..self.chip.total_size)
                .step_by((self.chip.total_size / PROT_SECTORS) as usize)
                .any(|o| self.is_protected(o)),
            _ => self.is_protected(offset),
        };
        if writes_array && protected {
            self.set_ustat(status | ustat::PVIOL);
            return;
        }
        if command == cmd::PROGRAM {
            let at = offset as usize & !3;
            if read_be(&self.data[at..at + 4]) != 0xFFFF_FFFF {
                self.set_ustat(status | ustat::ACCERR);
                return;
            }
        }
        self.launched.push((command, offset));

        status &= !(ustat::CBEIF | ustat::CCIF | ustat::BLANK);
        self.set_ustat(status);
        self.busy = self.command_reads.max(1);
        self.pending = Some((command, offset, value));
    }

    fn complete(&mut self) {
        let Some((command, offset, value)) = self.pending.take() else {
            return;
        };
        let mut status = self.ustat() | ustat::CCIF;
        let page = (offset & !(PAGE_SIZE - 1)) as usize..((offset & !(PAGE_SIZE - 1)) + PAGE_SIZE) as usize;
        match command {
            cmd::PROGRAM => {
                let at = offset as usize & !3;
                let current = read_be(&self.data[at..at + 4]);
                write_be(&mut self.data[at..at + 4], current & value);
            }
            cmd::PAGE_ERASE => self.data[page].fill(0xFF),
            cmd::MASS_ERASE => self.data.fill(0xFF),
            cmd::PAGE_ERASE_VERIFY => {
                if self.data[page].iter().all(|&b| b == 0xFF) {
                    status |= ustat::BLANK;
                }
            }
            cmd::BLANK_CHECK => {
                if self.data.iter().all(|&b| b == 0xFF) {
                    status |= ustat::BLANK;
                }
            }
            _ => {}
        }
        self.set_ustat(status);
    }

    fn read_status(&mut self) -> u8 {
        if self.busy > 0 {
            self.busy -= 1;
            // The buffer frees up after the first poll, the command finishes later
            let status = self.ustat() | ustat::CBEIF;
            self.set_ustat(status);
            if self.busy == 0 {
                self.complete();
            }
        }
        self.ustat()
    }

    fn read_reg(&mut self, offset: u32, width: Width) -> Result<u32> {
        if offset == reg::USTAT && width == Width::Byte {
            return Ok(self.read_status() as u32);
        }
        let range = offset as usize..(offset + width.bytes()) as usize;
        if range.end > self.regs.len() {
            return Err(Error::Berr);
        }
        Ok(read_be(&self.regs[range]))
    }

    fn write_reg(&mut self, offset: u32, width: Width, value: u32) -> Result<()> {
        match (offset, width) {
            (reg::USTAT, Width::Byte) => {
                let value = value as u8;
                let mut status = self.ustat();
                // Error flags clear when written with one
                status &= !(value & (ustat::PVIOL | ustat::ACCERR));
                self.set_ustat(status);
                if value & ustat::CBEIF != 0 && status & ustat::CBEIF != 0 {
                    self.launch();
                }
                Ok(())
            }
            (reg::CLKD, Width::Byte) => {
                // Write-once until reset
                if self.regs[reg::CLKD as usize] & clkd::DIVLD == 0 {
                    self.regs[reg::CLKD as usize] = value as u8 | clkd::DIVLD;
                }
                Ok(())
            }
            _ => {
                let range = offset as usize..(offset + width.bytes()) as usize;
                if range.end > self.regs.len() {
                    return Err(Error::Berr);
                }
                write_be(&mut self.regs[range], value);
                Ok(())
            }
        }
    }
}

impl BusDevice for CfmModule {
    fn name(&self) -> &str {
        self.chip.name
    }

    fn claims(&self, addr: u32) -> bool {
        let size = self.chip.total_size;
        Self::in_window(addr, self.base, size)
            || Self::in_window(addr, self.regs_base(), REG_BLOCK)
            || Self::in_window(addr, self.backdoor_base(), size)
            || Self::in_window(addr, self.cir_addr(), 2)
    }

    fn read(&mut self, addr: u32, width: Width) -> Result<u32> {
        let size = self.chip.total_size;
        if Self::in_window(addr, self.base, size) {
            let at = (addr - self.base) as usize;
            return Ok(read_be(&self.data[at..at + width.bytes() as usize]));
        }
        if Self::in_window(addr, self.regs_base(), REG_BLOCK) {
            return self.read_reg(addr - self.regs_base(), width);
        }
        if addr == self.cir_addr() && width == Width::Word {
            return Ok(((self.chip.device << 6) | self.revision) as u32);
        }
        Err(Error::Berr)
    }

    fn write(&mut self, addr: u32, width: Width, value: u32) -> Result<()> {
        if Self::in_window(addr, self.regs_base(), REG_BLOCK) {
            return self.write_reg(addr - self.regs_base(), width, value);
        }
        if Self::in_window(addr, self.backdoor_base(), self.chip.total_size) {
            if width != Width::Long {
                return Err(Error::Berr);
            }
            self.latch = Some((addr - self.backdoor_base(), value));
            return Ok(());
        }
        if Self::in_window(addr, self.base, self.chip.total_size) {
            // Writes to the array through the normal window are an access error
            let status = self.ustat() | ustat::ACCERR;
            self.set_ustat(status);
            return Ok(());
        }
        Err(Error::Berr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Ram, SimBus};
    use bdmflash_core::area::{AreaRegistry, EraseScope};
    use bdmflash_core::flash::{AlgorithmOptions, CfmOptions, EraseTarget, FlashAlgorithm, FlashDevice};
    use bdmflash_core::memory::TargetMemory;

    const IPSBAR: u32 = 0x4000_0000;

    fn mcf5213() -> CfmModule {
        CfmModule::by_name("MCF5213", 0, IPSBAR).unwrap()
    }

    fn probe(bus: &mut SimBus) -> Box<dyn FlashDevice> {
        cfm::Cfm
            .probe(bus, 0, &AlgorithmOptions::default())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_probe_reads_part_number() {
        let mut bus = SimBus::new().with(mcf5213());
        let device = probe(&mut bus);
        assert_eq!(device.chip().name, "MCF5213");
        assert_eq!(device.size(), 256 * 1024);
        assert_eq!(device.sector_at(0x1234), Some((0x1000, PAGE_SIZE)));
    }

    #[test]
    fn test_probe_without_peripherals() {
        let mut bus = SimBus::new().with(Ram::new(0, 0x1000));
        assert_eq!(
            cfm::Cfm
                .probe(&mut bus, 0, &AlgorithmOptions::default())
                .err(),
            Some(Error::Berr)
        );
    }

    #[test]
    fn test_probe_unusable_clock() {
        let mut bus = SimBus::new().with(mcf5213());
        let options = AlgorithmOptions {
            cfm: CfmOptions {
                ipsbar: IPSBAR,
                sys_clock_hz: 100_000,
                ..CfmOptions::default()
            },
            ..AlgorithmOptions::default()
        };
        assert_eq!(cfm::Cfm.probe(&mut bus, 0, &options).err(), Some(Error::Unsupported));
    }

    fn command_writes(bus: &SimBus) -> usize {
        let cmd_reg = IPSBAR + CFM_REGS + reg::CMD;
        bus.writes().iter().filter(|w| w.addr == cmd_reg).count()
    }

    #[test]
    fn test_program_sets_divider_once() {
        let mut bus = SimBus::new().with(mcf5213());
        let mut device = probe(&mut bus);

        let data = [0xA5u8; 12];
        assert_eq!(device.program(&mut bus, 0x100, &data).into_result(), Ok(12));
        let mut back = [0u8; 16];
        bus.read(0x100, &mut back).unwrap();
        assert_eq!(back[..12], data);
        assert_eq!(back[12..], [0xFF; 4]);
        assert_eq!(command_writes(&bus), 3);

        let divider = bus.read_u8(IPSBAR + CFM_REGS + reg::CLKD).unwrap();
        assert_eq!(divider, clkd::DIVLD | clkd::PRDIV8 | 19);
    }

    #[test]
    fn test_program_needs_whole_longs() {
        let mut bus = SimBus::new().with(mcf5213());
        let mut device = probe(&mut bus);

        let outcome = device.program(&mut bus, 0x102, &[0x12, 0x34]);
        assert_eq!((outcome.written, outcome.fault), (0, Some(Error::Alignment)));
        let outcome = device.program(&mut bus, 0x100, &[0x12, 0x34, 0x56]);
        assert_eq!((outcome.written, outcome.fault), (0, Some(Error::Alignment)));
        assert_eq!(command_writes(&bus), 0);
        assert_eq!(bus.read_u32(0x100).unwrap(), 0xFFFF_FFFF);
    }

    #[test]
    fn test_programmed_long_is_not_programmed_again() {
        let mut bus = SimBus::new().with(mcf5213().with_data(0x200, &[0x00, 0xFF, 0xFF, 0xFF]));
        let mut device = probe(&mut bus);

        let outcome = device.program(&mut bus, 0x1FC, &[0x11; 8]);
        assert_eq!(outcome.written, 4);
        assert_eq!(outcome.fault, Some(Error::Verify { addr: 0x200 }));
        assert_eq!(command_writes(&bus), 1);
        assert_eq!(bus.read_u32(0x200).unwrap(), 0x00FF_FFFF);
    }

    #[test]
    fn test_matching_contents_issue_no_commands() {
        let data = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x11, 0x22, 0x33];
        let mut bus = SimBus::new().with(mcf5213().with_data(0x800, &data));
        let mut device = probe(&mut bus);

        assert_eq!(device.program(&mut bus, 0x800, &data).into_result(), Ok(8));
        assert_eq!(command_writes(&bus), 0);
        let backdoor = IPSBAR + BACKDOOR;
        assert!(bus.writes().iter().all(|w| w.addr < backdoor));
    }

    #[test]
    fn test_module_rejects_second_program() {
        let mut module = mcf5213();
        let regs = IPSBAR + CFM_REGS;
        let launch = |module: &mut CfmModule, value: u32| {
            module.write(IPSBAR + BACKDOOR + 0x40, Width::Long, value).unwrap();
            module.write(regs + reg::CMD, Width::Byte, cmd::PROGRAM as u32).unwrap();
            module.write(regs + reg::USTAT, Width::Byte, ustat::CBEIF as u32).unwrap();
            (0..10)
                .map(|_| module.read(regs + reg::USTAT, Width::Byte).unwrap() as u8)
                .last()
                .unwrap()
        };

        module.write(regs + reg::CLKD, Width::Byte, 19).unwrap();
        let status = launch(&mut module, 0x1234_5678);
        assert_eq!(status & (ustat::CCIF | ustat::ACCERR), ustat::CCIF);
        assert_eq!(module.read(0x40, Width::Long).unwrap(), 0x1234_5678);

        let status = launch(&mut module, 0x0000_0000);
        assert_ne!(status & ustat::ACCERR, 0);
        assert_eq!(module.read(0x40, Width::Long).unwrap(), 0x1234_5678);
        assert_eq!(module.launched(), [(cmd::PROGRAM, 0x40)]);
    }

    #[test]
    fn test_sram_registers_as_ram() {
        let mut bus = SimBus::new()
            .with(mcf5213().with_data(0, &[0xAA; 4]))
            .with(Ram::with_data(0x2000_0000, &[0x00, 0xFF, 0x00, 0xFF]));
        let mut registry = AreaRegistry::new(AlgorithmOptions::default());

        assert_eq!(registry.register_area(&mut bus, None, 0x2000_0000).err(), Some(Error::NotFound));
        assert!(!registry.find(0x2000_0000).unwrap().is_flash());

        let data = [0x11, 0x22, 0x33, 0x44];
        assert_eq!(registry.write_memory(&mut bus, 0x2000_0000, &data).into_result(), Ok(4));
        assert_eq!(bus.read_u32(0x2000_0000).unwrap(), 0x1122_3344);
        assert_eq!(bus.read_u32(0).unwrap(), 0xAAAA_AAAA);
        assert_eq!(command_writes(&bus), 0);
    }

    #[test]
    fn test_probe_at_configured_flash_base() {
        let mut bus = SimBus::new().with(CfmModule::by_name("MCF5213", 0x1000_0000, IPSBAR).unwrap());
        let options = AlgorithmOptions {
            cfm: CfmOptions {
                flash_base: 0x1000_0000,
                ..CfmOptions::default()
            },
            ..AlgorithmOptions::default()
        };
        assert!(cfm::Cfm.probe(&mut bus, 0, &options).unwrap().is_none());
        let device = cfm::Cfm.probe(&mut bus, 0x1000_0000, &options).unwrap().unwrap();
        assert_eq!(device.base(), 0x1000_0000);
    }

    #[test]
    fn test_blank_check() {
        let mut bus = SimBus::new().with(mcf5213().with_data(0x800, &[0x00]));
        let mut device = probe(&mut bus);

        assert_eq!(device.blank_check(&mut bus, EraseTarget::Sector(0)), Ok(()));
        assert_eq!(
            device.blank_check(&mut bus, EraseTarget::Sector(0x900)),
            Err(Error::Verify { addr: 0x800 })
        );
        assert_eq!(
            device.blank_check(&mut bus, EraseTarget::All),
            Err(Error::Verify { addr: 0 })
        );

        device.erase(&mut bus, EraseTarget::Sector(0x800)).unwrap();
        assert_eq!(device.blank_check(&mut bus, EraseTarget::All), Ok(()));
    }

    #[test]
    fn test_program_clears_protection() {
        let mut bus = SimBus::new().with(mcf5213().with_protection(0x8000_0000));
        let mut device = probe(&mut bus);
        // The driver clears protection before every command
        assert_eq!(device.program(&mut bus, 0, &[0; 4]).into_result(), Ok(4));
    }

    #[test]
    fn test_registry_blank_check_and_mass_erase() {
        let mut bus = SimBus::new().with(mcf5213().with_data(0x3FFFC, &[1, 2, 3, 4]));
        let mut registry = AreaRegistry::new(AlgorithmOptions::default());
        let area = registry.register_area(&mut bus, Some("cfm"), 0).unwrap();
        assert_eq!(area.end(), 0x3FFFF);

        assert_eq!(registry.blank_check(&mut bus, 0, EraseScope::Chip), Err(Error::Verify { addr: 0 }));
        registry.erase_area(&mut bus, 0, EraseScope::Chip).unwrap();
        assert!(registry.blank_check(&mut bus, 0, EraseScope::Chip).unwrap());
        assert_eq!(bus.read_u32(0x3FFFC).unwrap(), 0xFFFF_FFFF);
    }
}
