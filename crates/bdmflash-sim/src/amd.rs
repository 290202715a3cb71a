//! JEDEC 29F-style flash emulator
//!
//! Each lane runs its own command state machine. Program and erase take
//! effect at once but the lane keeps answering with toggling status for a
//! configurable number of reads. Programming a one over a zero is what a
//! real part cannot do; the lane then raises DQ5 and keeps toggling until
//! reset, the way a part that ran out of time does. Busy time and failures
//! can also be set per lane, so interleaved chips finish apart.

use crate::bank::Bank;
use crate::bus::BusDevice;
use bdmflash_core::error::Result;
use bdmflash_core::flash::amd29::{self, cmd, DQ5, DQ6};
use bdmflash_core::flash::{BusGeometry, FlashChip};
use bdmflash_core::memory::Width;

/// Address bits decoded for the unlock cycles
const UNLOCK_DECODE: u32 = 0x7FF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Unlock1,
    Unlock2,
    Autoselect,
    Program,
    EraseSetup,
    EraseUnlock1,
    EraseUnlock2,
}

#[derive(Debug, Clone, Copy)]
struct Lane {
    mode: Mode,
    busy: u32,
    toggle: bool,
    failed: bool,
    program_reads: u32,
    erase_reads: u32,
    fail_next: bool,
}

impl Lane {
    fn new(program_reads: u32, erase_reads: u32) -> Self {
        Self {
            mode: Mode::Read,
            busy: 0,
            toggle: false,
            failed: false,
            program_reads,
            erase_reads,
            fail_next: false,
        }
    }

    fn is_busy(&self) -> bool {
        self.busy > 0 || self.failed
    }

    /// Back to array mode, keeping the lane's timing
    fn reset(&mut self) {
        *self = Self::new(self.program_reads, self.erase_reads);
    }
}

/// One or more interleaved 29F parts
#[derive(Debug, Clone)]
pub struct AmdFlash {
    bank: Bank,
    lanes: Vec<Lane>,
}

impl AmdFlash {
    /// `chip` wired to a `bus`-wide data bus at `base`
    ///
    /// Narrower chips are interleaved to fill the bus.
    pub fn new(chip: &'static FlashChip, bus: Width, base: u32) -> Self {
        let bank = Bank::new(chip, BusGeometry::new(bus, chip.width), base);
        let lanes = vec![Lane::new(3, 20); bank.lanes() as usize];
        Self { bank, lanes }
    }

    /// Look the part up by name in the 29F table
    pub fn by_name(name: &str, bus: Width, base: u32) -> Option<Self> {
        amd29::CHIPS
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|chip| Self::new(chip, bus, base))
    }

    /// Status reads a program or erase stays busy for, in every lane
    pub fn with_busy_reads(mut self, program: u32, erase: u32) -> Self {
        for lane in &mut self.lanes {
            lane.program_reads = program;
            lane.erase_reads = erase;
        }
        self
    }

    /// Status reads a program or erase stays busy for in one lane
    pub fn with_lane_busy_reads(mut self, lane: usize, program: u32, erase: u32) -> Self {
        self.lanes[lane].program_reads = program;
        self.lanes[lane].erase_reads = erase;
        self
    }

    /// Make the next program or erase in `lane` time out with DQ5
    pub fn with_lane_failure(mut self, lane: usize) -> Self {
        self.lanes[lane].fail_next = true;
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

    /// Bytes occupied on the bus
    pub fn size(&self) -> u32 {
        self.bank.data.len() as u32
    }

    fn lane_read(&mut self, lane: u32, chip_addr: u32) -> u32 {
        let chip = self.bank.chip;
        let state = &mut self.lanes[lane as usize];
        if state.is_busy() {
            state.toggle = !state.toggle;
            if state.busy > 0 {
                state.busy -= 1;
            }
            let mut status = if state.toggle { DQ6 } else { 0 };
            if state.failed {
                status |= DQ5;
            }
            return status;
        }
        match state.mode {
            Mode::Autoselect => match chip_addr & 0xFF {
                0 => chip.manufacturer as u32,
                1 => chip.device as u32,
                _ => 0,
            },
            _ => self.bank.get(lane, chip_addr),
        }
    }

    fn lane_write(&mut self, lane: u32, chip_addr: u32, value: u32) {
        let unlock1 = chip_addr & UNLOCK_DECODE == 0x555;
        let unlock2 = chip_addr & UNLOCK_DECODE == 0x2AA;
        let state = self.lanes[lane as usize];

        if state.is_busy() {
            // Only a reset gets a timed-out lane back to array mode
            if state.failed && value == cmd::RESET {
                self.lanes[lane as usize].reset();
            }
            return;
        }

        let next = match (state.mode, value) {
            (Mode::Program, data) => {
                let current = self.bank.get(lane, chip_addr);
                self.bank.program(lane, chip_addr, data);
                let reads = state.program_reads;
                self.start(lane, reads, current & data != data);
                return;
            }
            (_, cmd::RESET) => Mode::Read,
            (Mode::Read | Mode::Autoselect, cmd::UNLOCK1) if unlock1 => Mode::Unlock1,
            (Mode::Unlock1, cmd::UNLOCK2) if unlock2 => Mode::Unlock2,
            (Mode::Unlock2, cmd::AUTOSELECT) if unlock1 => Mode::Autoselect,
            (Mode::Unlock2, cmd::PROGRAM) if unlock1 => Mode::Program,
            (Mode::Unlock2, cmd::ERASE_SETUP) if unlock1 => Mode::EraseSetup,
            (Mode::EraseSetup, cmd::UNLOCK1) if unlock1 => Mode::EraseUnlock1,
            (Mode::EraseUnlock1, cmd::UNLOCK2) if unlock2 => Mode::EraseUnlock2,
            (Mode::EraseUnlock2, cmd::ERASE_CHIP) if unlock1 => {
                self.bank.erase_lane(lane);
                self.start(lane, state.erase_reads, false);
                return;
            }
            (Mode::EraseUnlock2, cmd::ERASE_SECTOR) => {
                self.bank.erase_block(lane, chip_addr);
                self.start(lane, state.erase_reads, false);
                return;
            }
            (Mode::Autoselect, _) => Mode::Autoselect,
            _ => Mode::Read,
        };
        self.lanes[lane as usize].mode = next;
    }

    fn start(&mut self, lane: u32, reads: u32, failed: bool) {
        let state = &mut self.lanes[lane as usize];
        state.mode = Mode::Read;
        state.busy = reads.max(1);
        state.failed = failed || state.fail_next;
        state.fail_next = false;
    }
}

impl BusDevice for AmdFlash {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Ram, SimBus};
    use bdmflash_core::area::{AreaRegistry, EraseScope};
    use bdmflash_core::error::Error;
    use bdmflash_core::flash::{AlgorithmOptions, EraseTarget, FlashAlgorithm};
    use bdmflash_core::memory::TargetMemory;

    fn am29f040(base: u32) -> AmdFlash {
        AmdFlash::by_name("Am29F040", Width::Byte, base).unwrap()
    }

    /// Two byte-wide parts side by side on a 16-bit bus
    fn am29f040_pair() -> AmdFlash {
        AmdFlash::by_name("Am29F040", Width::Word, 0).unwrap()
    }

    fn probe(bus: &mut SimBus, base: u32) -> Option<Box<dyn bdmflash_core::flash::FlashDevice>> {
        amd29::Amd29
            .probe(bus, base, &AlgorithmOptions::default())
            .unwrap()
    }

    #[test]
    fn test_probe_am29f040() {
        let mut bus = SimBus::new().with(am29f040(0));
        let device = probe(&mut bus, 0).unwrap();
        assert_eq!(device.family(), "29");
        assert_eq!(device.chip().name, "Am29F040");
        assert_eq!(device.size(), 0x80000);
        // Left in array mode
        assert_eq!(bus.read_u8(0).unwrap(), 0xFF);
    }

    #[test]
    fn test_probe_interleaved_pair() {
        let chip = amd29::CHIPS.iter().find(|c| c.name == "Am29F400BB").unwrap();
        let mut bus = SimBus::new().with(AmdFlash::new(chip, Width::Long, 0x100000));
        let device = probe(&mut bus, 0x100000).unwrap();
        assert_eq!(device.chip().name, "Am29F400BB");
        assert_eq!(device.size(), 2 * 512 * 1024);
        // Boot block: 16K per chip, 32K across the pair
        assert_eq!(device.sector_at(0x100000), Some((0x100000, 0x8000)));
    }

    #[test]
    fn test_probe_other_ids() {
        let mut bus = SimBus::new().with(Ram::new(0, 0x20000));
        assert!(probe(&mut bus, 0).is_none());
    }

    #[test]
    fn test_probe_rejects_ram_alias() {
        let mut image = vec![0u8; 0x20000];
        image[0] = 0x01;
        image[1] = 0xA4;
        let mut bus = SimBus::new().with(Ram::with_data(0, &image));
        assert!(probe(&mut bus, 0).is_none());
        // The read-back test restored what it overwrote
        assert_eq!(bus.read_u8(0).unwrap(), 0x01);
    }

    #[test]
    fn test_program_is_idempotent() {
        let mut bus = SimBus::new().with(am29f040(0));
        let mut device = probe(&mut bus, 0).unwrap();

        let data = [0x12, 0x34, 0x56, 0x78, 0x9A];
        assert_eq!(device.program(&mut bus, 0x1001, &data).into_result(), Ok(5));
        let mut back = [0u8; 5];
        bus.read(0x1001, &mut back).unwrap();
        assert_eq!(back, data);

        bus.clear_writes();
        assert_eq!(device.program(&mut bus, 0x1001, &data).into_result(), Ok(5));
        assert!(bus.writes().is_empty(), "{:?}", bus.writes());
    }

    #[test]
    fn test_program_zero_to_one_faults() {
        let mut bus = SimBus::new().with(am29f040(0).with_data(0x10, &[0x00, 0x00]));
        let mut device = probe(&mut bus, 0).unwrap();

        let outcome = device.program(&mut bus, 0x0F, &[0x00, 0xFF, 0x00]);
        assert_eq!(outcome.written, 1);
        assert_eq!(outcome.fault, Some(Error::DeviceFault { addr: 0x10 }));
        // The failed lane was reset back to array mode
        assert_eq!(bus.read_u8(0x11).unwrap(), 0x00);
    }

    #[test]
    fn test_interleaved_lanes_finish_apart() {
        // High byte lane stays busy long after the low one is done
        let flash = am29f040_pair().with_lane_busy_reads(1, 40, 200);
        let mut bus = SimBus::new().with(flash);
        let mut device = probe(&mut bus, 0).unwrap();

        // 0x3F leaves DQ5 set in the finished lane
        assert_eq!(device.program(&mut bus, 0, &[0x12, 0x3F]).into_result(), Ok(2));
        assert_eq!(bus.read_u16(0).unwrap(), 0x123F);

        let target = EraseTarget::Sector(0);
        device.erase(&mut bus, target).unwrap();
        device.erase_wait(&mut bus, target).unwrap();
        assert_eq!(bus.read_u16(0).unwrap(), 0xFFFF);
    }

    #[test]
    fn test_dq5_in_busy_lane_faults() {
        let flash = am29f040_pair().with_lane_failure(1);
        let mut bus = SimBus::new().with(flash);
        let mut device = probe(&mut bus, 0).unwrap();

        let outcome = device.program(&mut bus, 0, &[0x12, 0x34]);
        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.fault, Some(Error::DeviceFault { addr: 0 }));
        // Both lanes are back in array mode
        assert_eq!(bus.read_u16(0).unwrap(), 0x1234);
    }

    #[test]
    fn test_sector_erase_and_wait() {
        let mut bus = SimBus::new().with(am29f040(0).with_data(0x10000, &[0u8; 64]));
        let mut device = probe(&mut bus, 0).unwrap();

        let target = EraseTarget::Sector(0x10020);
        device.erase(&mut bus, target).unwrap();
        device.erase_wait(&mut bus, target).unwrap();

        let mut back = [0u8; 64];
        bus.read(0x10000, &mut back).unwrap();
        assert!(back.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_erase_timeout() {
        let options = AlgorithmOptions {
            erase_poll_limit: 5,
            ..AlgorithmOptions::default()
        };
        let mut bus = SimBus::new().with(am29f040(0).with_busy_reads(3, 1000));
        let mut device = amd29::Amd29.probe(&mut bus, 0, &options).unwrap().unwrap();

        device.erase(&mut bus, EraseTarget::All).unwrap();
        assert_eq!(
            device.erase_wait(&mut bus, EraseTarget::All),
            Err(Error::FlashTimeout { addr: 0 })
        );
    }

    #[test]
    fn test_registry_over_flash_and_ram() {
        let mut bus = SimBus::new()
            .with(am29f040(0))
            .with(Ram::new(0x80000, 0x80000));
        let mut registry = AreaRegistry::new(AlgorithmOptions::default());
        let area = registry.register_area(&mut bus, Some("29"), 0).unwrap();
        assert_eq!((area.begin(), area.end()), (0, 0x7FFFF));

        // One transfer crossing from flash into RAM
        let data: Vec<u8> = (0..32).collect();
        assert_eq!(registry.write_memory(&mut bus, 0x7FFF0, &data).into_result(), Ok(32));
        let mut back = [0u8; 32];
        bus.read(0x7FFF0, &mut back).unwrap();
        assert_eq!(&back[..], &data[..]);

        registry.erase_area(&mut bus, 0, EraseScope::Chip).unwrap();
        assert!(registry.erase_wait(&mut bus, 0, EraseScope::Chip).unwrap());
        assert_eq!(bus.read_u8(0x7FFF0).unwrap(), 0xFF);
        assert_eq!(bus.read_u8(0x80000).unwrap(), 16);
    }
}
