//! ColdFire flash module (CFM)
//!
//! On-chip flash of the MCF521x/5223x/528x parts. All commands go through
//! one register block: the data word is written to the flash backdoor,
//! the command to `CFMCMD`, and the command is launched by writing CBEIF
//! to `CFMUSTAT`. Completion is CBEIF (buffer free) followed by CCIF.
//!
//! The array only answers at its FLASHBAR base, so probing anywhere else
//! finds nothing. Programming works on whole, erased longs.

use super::{
    AlgorithmOptions, CfmOptions, EraseRegion, EraseTarget, FlashAlgorithm, FlashChip, FlashDevice,
    WriteOutcome,
};
use crate::error::{Error, Result};
use crate::memory::{TargetMemory, Width};
use crate::poll::{poll_bounded, WaitOutcome};
use alloc::boxed::Box;

/// Offset of the CFM register block from IPSBAR
pub const CFM_REGS: u32 = 0x1D_0000;
/// Offset of the flash backdoor from IPSBAR
pub const BACKDOOR: u32 = 0x0400_0000;
/// Offset of the chip identification register from IPSBAR
pub const CIR: u32 = 0x11_000A;

/// Register offsets inside the CFM block
pub mod reg {
    /// Module configuration
    pub const MCR: u32 = 0x00;
    /// Clock divider
    pub const CLKD: u32 = 0x02;
    /// Security
    pub const SEC: u32 = 0x08;
    /// Protection
    pub const PROT: u32 = 0x10;
    /// Supervisor access
    pub const SACC: u32 = 0x14;
    /// Data access
    pub const DACC: u32 = 0x18;
    /// User status
    pub const USTAT: u32 = 0x20;
    /// Command
    pub const CMD: u32 = 0x24;
}

/// `CFMUSTAT` bits
pub mod ustat {
    /// Command buffer empty
    pub const CBEIF: u8 = 0x80;
    /// Command complete
    pub const CCIF: u8 = 0x40;
    /// Protection violation
    pub const PVIOL: u8 = 0x20;
    /// Access error
    pub const ACCERR: u8 = 0x10;
    /// Verified blank
    pub const BLANK: u8 = 0x04;
}

/// `CFMCLKD` bits
pub mod clkd {
    /// Divider has been written since reset
    pub const DIVLD: u8 = 0x80;
    /// Prescale the input clock by 8
    pub const PRDIV8: u8 = 0x40;
}

/// Command codes
pub mod cmd {
    /// Blank check the whole array
    pub const BLANK_CHECK: u8 = 0x05;
    /// Verify one page is erased
    pub const PAGE_ERASE_VERIFY: u8 = 0x06;
    /// Program one long
    pub const PROGRAM: u8 = 0x20;
    /// Erase one page
    pub const PAGE_ERASE: u8 = 0x40;
    /// Erase the whole array
    pub const MASS_ERASE: u8 = 0x41;
}

/// Erase page size
pub const PAGE_SIZE: u32 = 2048;

/// Value of an erased long
const ERASED: u32 = 0xFFFF_FFFF;

/// Lowest permitted flash module clock
const FCLK_MIN_HZ: u32 = 150_000;
/// Highest permitted flash module clock
const FCLK_MAX_HZ: u32 = 200_000;
/// Input clocks above this need the divide-by-8 prescaler
const PRDIV8_THRESHOLD_HZ: u32 = 12_800_000;

const K: u32 = 1024;

const PAGES_128K: &[EraseRegion] = &[EraseRegion::new(PAGE_SIZE, 64)];
const PAGES_256K: &[EraseRegion] = &[EraseRegion::new(PAGE_SIZE, 128)];
const PAGES_512K: &[EraseRegion] = &[EraseRegion::new(PAGE_SIZE, 256)];

const fn part(name: &'static str, pin: u16, total_size: u32, regions: &'static [EraseRegion]) -> FlashChip {
    FlashChip {
        vendor: "Freescale",
        name,
        manufacturer: 0,
        device: pin,
        total_size,
        width: Width::Long,
        regions,
        unlock: [0, 0],
    }
}

/// Parts recognised by this family, keyed by the CIR part number
pub static CHIPS: &[FlashChip] = &[
    part("MCF5211", 0x46, 128 * K, PAGES_128K),
    part("MCF5212", 0x47, 256 * K, PAGES_256K),
    part("MCF5213", 0x48, 256 * K, PAGES_256K),
    part("MCF52233", 0x4A, 256 * K, PAGES_256K),
    part("MCF52235", 0x4B, 256 * K, PAGES_256K),
    part("MCF5282", 0x80, 512 * K, PAGES_512K),
];

/// `CFMCLKD` value putting the flash clock in 150..=200 kHz
///
/// The module runs from half the system clock.
pub fn clock_divider(sys_clock_hz: u32) -> Option<u8> {
    let input = sys_clock_hz / 2;
    let (prescale, input) = if input > PRDIV8_THRESHOLD_HZ {
        (clkd::PRDIV8, input / 8)
    } else {
        (0, input)
    };
    let div = input.div_ceil(FCLK_MAX_HZ).checked_sub(1)?;
    if div > 0x3F {
        return None;
    }
    let fclk = input / (div + 1);
    if !(FCLK_MIN_HZ..=FCLK_MAX_HZ).contains(&fclk) {
        return None;
    }
    Some(prescale | div as u8)
}

/// ColdFire flash module algorithm
#[derive(Debug, Clone, Copy, Default)]
pub struct Cfm;

impl FlashAlgorithm for Cfm {
    fn family(&self) -> &'static str {
        "cfm"
    }

    fn description(&self) -> &'static str {
        "Freescale ColdFire flash module"
    }

    fn min_chip_width(&self) -> u32 {
        32
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
        if base != options.cfm.flash_base {
            log::trace!(
                "cfm: 0x{:08X} is not the flash base 0x{:08X}",
                base,
                options.cfm.flash_base
            );
            return Ok(None);
        }
        let cir = mem.read_u16(options.cfm.ipsbar.wrapping_add(CIR))?;
        let pin = cir >> 6;
        let Some(chip) = CHIPS.iter().find(|c| c.device == pin) else {
            log::trace!("cfm: part number 0x{:03X} not known", pin);
            return Ok(None);
        };
        let Some(divider) = clock_divider(options.cfm.sys_clock_hz) else {
            log::warn!(
                "cfm: no clock divider for {} Hz system clock",
                options.cfm.sys_clock_hz
            );
            return Err(Error::Unsupported);
        };

        log::debug!("cfm: found {} at 0x{:08X}", chip, base);
        Ok(Some(Box::new(CfmDevice {
            chip,
            base,
            cfm: options.cfm,
            divider,
            poll_limit: options.program_poll_limit,
            erase_poll_limit: options.erase_poll_limit,
            erase_poll_interval_us: options.erase_poll_interval_us,
        })))
    }
}

/// A bound CFM array
#[derive(Debug, Clone)]
pub struct CfmDevice {
    chip: &'static FlashChip,
    base: u32,
    cfm: CfmOptions,
    divider: u8,
    poll_limit: u32,
    erase_poll_limit: u32,
    erase_poll_interval_us: u32,
}

impl CfmDevice {
    fn reg(&self, offset: u32) -> u32 {
        self.cfm.ipsbar.wrapping_add(CFM_REGS).wrapping_add(offset)
    }

    fn backdoor(&self, addr: u32) -> u32 {
        self.cfm
            .ipsbar
            .wrapping_add(BACKDOOR)
            .wrapping_add(addr.wrapping_sub(self.base))
    }

    /// Clock divider, protection and stale error flags
    fn prepare(&self, mem: &mut dyn TargetMemory) -> Result<()> {
        if mem.read_u8(self.reg(reg::CLKD))? & clkd::DIVLD == 0 {
            mem.write_u8(self.reg(reg::CLKD), self.divider)?;
        }
        mem.write_u32(self.reg(reg::PROT), 0)?;
        mem.write_u32(self.reg(reg::SACC), 0)?;
        mem.write_u32(self.reg(reg::DACC), 0)?;
        mem.write_u8(self.reg(reg::USTAT), ustat::PVIOL | ustat::ACCERR)
    }

    /// Poll `CFMUSTAT` until `bit` is set
    fn wait_flag(&self, mem: &mut dyn TargetMemory, bit: u8, limit: u32, interval_us: u32) -> Result<WaitOutcome> {
        let status = self.reg(reg::USTAT);
        poll_bounded(limit, || {
            if mem.read_u8(status)? & bit != 0 {
                return Ok(true);
            }
            if interval_us > 0 {
                mem.delay_us(interval_us);
            }
            Ok(false)
        })
    }

    /// Launch `command` with `data` latched at `addr`, wait for completion
    ///
    /// Returns the final status.
    fn run(
        &self,
        mem: &mut dyn TargetMemory,
        command: u8,
        addr: u32,
        data: u32,
        limit: u32,
        interval_us: u32,
    ) -> Result<u8> {
        let status = self.reg(reg::USTAT);
        let errors = ustat::PVIOL | ustat::ACCERR;

        if !self.wait_flag(mem, ustat::CBEIF, limit, 0)?.is_done() {
            return Err(Error::FlashTimeout { addr });
        }
        mem.write_u32(self.backdoor(addr & !3), data)?;
        mem.write_u8(self.reg(reg::CMD), command)?;
        mem.write_u8(status, ustat::CBEIF)?;

        if mem.read_u8(status)? & errors != 0 {
            return Err(Error::DeviceFault { addr });
        }
        if !self.wait_flag(mem, ustat::CBEIF, limit, 0)?.is_done()
            || !self.wait_flag(mem, ustat::CCIF, limit, interval_us)?.is_done()
        {
            return Err(Error::FlashTimeout { addr });
        }

        let flags = mem.read_u8(status)?;
        if flags & errors != 0 {
            return Err(Error::DeviceFault { addr });
        }
        Ok(flags)
    }

    /// Program one aligned long; a long holding other data needs an erase first
    fn program_long(&self, mem: &mut dyn TargetMemory, addr: u32, desired: u32) -> Result<()> {
        let current = mem.read_u32(addr)?;
        if current == desired {
            return Ok(());
        }
        if current != ERASED {
            log::debug!("cfm: 0x{:08X} holds 0x{:08X}, not erased", addr, current);
            return Err(Error::Verify { addr });
        }

        self.run(mem, cmd::PROGRAM, addr, desired, self.poll_limit, 0)?;
        if mem.read_u32(addr)? != desired {
            return Err(Error::Verify { addr });
        }
        Ok(())
    }

    fn target_addr(&self, target: EraseTarget) -> Result<u32> {
        match target {
            EraseTarget::All => Ok(self.base),
            EraseTarget::Sector(addr) => self.sector_at(addr).map(|(start, _)| start).ok_or(Error::Range),
        }
    }
}

impl FlashDevice for CfmDevice {
    fn family(&self) -> &'static str {
        "cfm"
    }

    fn chip(&self) -> &'static FlashChip {
        self.chip
    }

    fn base(&self) -> u32 {
        self.base
    }

    fn size(&self) -> u32 {
        self.chip.total_size
    }

    fn program(&mut self, mem: &mut dyn TargetMemory, addr: u32, data: &[u8]) -> WriteOutcome {
        let end = addr as u64 + data.len() as u64;
        if addr < self.base || end > self.base as u64 + self.size() as u64 {
            return WriteOutcome::partial(0, Error::Range);
        }
        if addr % 4 != 0 || data.len() % 4 != 0 {
            return WriteOutcome::partial(0, Error::Alignment);
        }
        if let Err(fault) = self.prepare(mem) {
            return WriteOutcome::partial(0, fault);
        }

        let mut written = 0;
        for (long, at) in data.chunks_exact(4).zip((addr..).step_by(4)) {
            let desired = u32::from_be_bytes([long[0], long[1], long[2], long[3]]);
            if let Err(fault) = self.program_long(mem, at, desired) {
                log::debug!("cfm: program at 0x{:08X} failed: {}", at, fault);
                return WriteOutcome::partial(written, fault);
            }
            written += 4;
        }
        WriteOutcome::complete(written)
    }

    fn erase(&mut self, mem: &mut dyn TargetMemory, target: EraseTarget) -> Result<()> {
        let addr = self.target_addr(target)?;
        let command = match target {
            EraseTarget::All => cmd::MASS_ERASE,
            EraseTarget::Sector(_) => cmd::PAGE_ERASE,
        };
        self.prepare(mem)?;
        log::trace!("cfm: erase command 0x{:02X} at 0x{:08X}", command, addr);
        self.run(mem, command, addr, 0, self.erase_poll_limit, self.erase_poll_interval_us)?;
        Ok(())
    }

    fn blank_check(&mut self, mem: &mut dyn TargetMemory, target: EraseTarget) -> Result<()> {
        let addr = self.target_addr(target)?;
        let command = match target {
            EraseTarget::All => cmd::BLANK_CHECK,
            EraseTarget::Sector(_) => cmd::PAGE_ERASE_VERIFY,
        };
        self.prepare(mem)?;
        let flags = self.run(mem, command, addr, 0, self.erase_poll_limit, self.erase_poll_interval_us)?;
        if flags & ustat::BLANK == 0 {
            return Err(Error::Verify { addr });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_divider_range() {
        // 64 MHz: 32 MHz input, prescaled to 4 MHz, /20 = 200 kHz
        assert_eq!(clock_divider(64_000_000), Some(clkd::PRDIV8 | 19));
        // 8 MHz: 4 MHz input, no prescaler, /20 = 200 kHz
        assert_eq!(clock_divider(8_000_000), Some(19));
        assert_eq!(clock_divider(200_000), None);
        for hz in (10..=166).map(|mhz| mhz * 1_000_000) {
            let value = clock_divider(hz).unwrap();
            let mut input = hz / 2;
            if value & clkd::PRDIV8 != 0 {
                input /= 8;
            }
            let fclk = input / ((value & 0x3F) as u32 + 1);
            assert!((150_000..=200_000).contains(&fclk), "{} Hz -> {}", hz, fclk);
        }
    }

    #[test]
    fn test_table_sizes_match_regions() {
        for chip in CHIPS {
            let total: u32 = chip.regions.iter().map(|r| r.total_size()).sum();
            assert_eq!(total, chip.total_size, "{}", chip.name);
        }
    }
}
