//! Intel Advanced+ Boot Block (28FxxxC3)

use super::{cmd, probe_ids, IntelDevice, MANUFACTURER_INTEL};
use crate::error::Result;
use crate::flash::{AlgorithmOptions, EraseRegion, FlashAlgorithm, FlashChip, FlashDevice};
use crate::memory::{TargetMemory, Width};
use alloc::boxed::Box;

const K: u32 = 1024;

const PARAMETER: EraseRegion = EraseRegion::new(8 * K, 8);

const BOTTOM_8M: &[EraseRegion] = &[PARAMETER, EraseRegion::new(64 * K, 15)];
const TOP_8M: &[EraseRegion] = &[EraseRegion::new(64 * K, 15), PARAMETER];
const BOTTOM_16M: &[EraseRegion] = &[PARAMETER, EraseRegion::new(64 * K, 31)];
const TOP_16M: &[EraseRegion] = &[EraseRegion::new(64 * K, 31), PARAMETER];
const BOTTOM_32M: &[EraseRegion] = &[PARAMETER, EraseRegion::new(64 * K, 63)];
const TOP_32M: &[EraseRegion] = &[EraseRegion::new(64 * K, 63), PARAMETER];
const BOTTOM_64M: &[EraseRegion] = &[PARAMETER, EraseRegion::new(64 * K, 127)];
const TOP_64M: &[EraseRegion] = &[EraseRegion::new(64 * K, 127), PARAMETER];

const fn c3(name: &'static str, device: u16, total_size: u32, regions: &'static [EraseRegion]) -> FlashChip {
    FlashChip {
        vendor: "Intel",
        name,
        manufacturer: MANUFACTURER_INTEL,
        device,
        total_size,
        width: Width::Word,
        regions,
        unlock: [0, 0],
    }
}

/// Parts recognised by this family
pub static CHIPS: &[FlashChip] = &[
    c3("28F800C3-T", 0x88C0, 1024 * K, TOP_8M),
    c3("28F800C3-B", 0x88C1, 1024 * K, BOTTOM_8M),
    c3("28F160C3-T", 0x88C2, 2048 * K, TOP_16M),
    c3("28F160C3-B", 0x88C3, 2048 * K, BOTTOM_16M),
    c3("28F320C3-T", 0x88C4, 4096 * K, TOP_32M),
    c3("28F320C3-B", 0x88C5, 4096 * K, BOTTOM_32M),
    c3("28F640C3-T", 0x88CC, 8192 * K, TOP_64M),
    c3("28F640C3-B", 0x88CD, 8192 * K, BOTTOM_64M),
];

/// Intel C3 algorithm
#[derive(Debug, Clone, Copy, Default)]
pub struct IntelC3;

impl FlashAlgorithm for IntelC3 {
    fn family(&self) -> &'static str {
        "intelc3"
    }

    fn description(&self) -> &'static str {
        "Intel C3 boot block flash"
    }

    fn min_chip_width(&self) -> u32 {
        16
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
        let Some((chip, bus)) = probe_ids(mem, base, CHIPS)? else {
            return Ok(None);
        };
        log::debug!("intelc3: found {} as {} at 0x{:08X}", chip, bus, base);
        Ok(Some(Box::new(IntelDevice::new(
            "intelc3",
            chip,
            bus,
            base,
            options,
            cmd::PROGRAM,
            0,
        ))))
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
    fn test_parameter_blocks_at_boot_end() {
        let bottom = &CHIPS[1];
        assert_eq!(bottom.sector_at(0), Some((0, 8 * K)));
        assert_eq!(bottom.sector_at(64 * K), Some((64 * K, 64 * K)));

        let top = &CHIPS[0];
        assert_eq!(top.sector_at(0), Some((0, 64 * K)));
        assert_eq!(top.sector_at(1024 * K - 1), Some((1024 * K - 8 * K, 8 * K)));
    }
}
