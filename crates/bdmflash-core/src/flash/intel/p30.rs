//! Intel/Numonyx StrataFlash Embedded (P30)
//!
//! Programs through the write buffer when the CFI table reports one; the
//! buffer size is read once at probe time.

use super::{cmd, probe_ids, sr, IntelDevice, MANUFACTURER_INTEL};
use crate::error::{Error, Result};
use crate::flash::{AlgorithmOptions, BusGeometry, EraseRegion, FlashAlgorithm, FlashChip, FlashDevice};
use crate::memory::{TargetMemory, Width};
use alloc::boxed::Box;

/// CFI offset of the "QRY" signature
const CFI_SIGNATURE: u32 = 0x10;
/// CFI offset of log2 of the write buffer size in bytes
const CFI_BUFFER_SIZE: u32 = 0x2A;
/// Largest buffer exponent accepted from the query table
const MAX_BUFFER_LOG2: u32 = 12;

const K: u32 = 1024;

const PARAMETER: EraseRegion = EraseRegion::new(32 * K, 4);

const BOTTOM_64M: &[EraseRegion] = &[PARAMETER, EraseRegion::new(128 * K, 63)];
const TOP_64M: &[EraseRegion] = &[EraseRegion::new(128 * K, 63), PARAMETER];
const BOTTOM_128M: &[EraseRegion] = &[PARAMETER, EraseRegion::new(128 * K, 127)];
const TOP_128M: &[EraseRegion] = &[EraseRegion::new(128 * K, 127), PARAMETER];
const BOTTOM_256M: &[EraseRegion] = &[PARAMETER, EraseRegion::new(128 * K, 255)];
const TOP_256M: &[EraseRegion] = &[EraseRegion::new(128 * K, 255), PARAMETER];

const fn p30(name: &'static str, device: u16, total_size: u32, regions: &'static [EraseRegion]) -> FlashChip {
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
    p30("28F640P30T", 0x8817, 8192 * K, TOP_64M),
    p30("28F640P30B", 0x881A, 8192 * K, BOTTOM_64M),
    p30("28F128P30T", 0x8818, 16384 * K, TOP_128M),
    p30("28F128P30B", 0x881B, 16384 * K, BOTTOM_128M),
    p30("28F256P30T", 0x8919, 32768 * K, TOP_256M),
    p30("28F256P30B", 0x891C, 32768 * K, BOTTOM_256M),
];

/// Write buffer size on the bus in bytes, 0 when the part reports none
fn query_buffer_bytes(mem: &mut dyn TargetMemory, base: u32, bus: BusGeometry) -> Result<u32> {
    bus.command(mem, base, 0x55, cmd::CFI_QUERY)?;
    let signature = bus.lane(bus.read(mem, base, CFI_SIGNATURE)?, 0) & 0xFF;
    let exponent = bus.lane(bus.read(mem, base, CFI_BUFFER_SIZE)?, 0) & 0xFF;
    bus.command(mem, base, 0, cmd::READ_ARRAY)?;

    if signature != u32::from(b'Q') || exponent == 0 || exponent > MAX_BUFFER_LOG2 {
        return Ok(0);
    }
    // A one-word buffer gains nothing over word program
    let chip_bytes = 1u32 << exponent;
    if chip_bytes <= bus.chip.bytes() {
        return Ok(0);
    }
    Ok(chip_bytes * bus.lanes())
}

/// Program one buffer window with a single buffered program command
///
/// `words` holds `(address, current, desired)` for consecutive bus words
/// inside one buffer window.
pub(super) fn program_buffered(
    dev: &IntelDevice,
    mem: &mut dyn TargetMemory,
    words: &[(u32, u32, u32)],
) -> Result<()> {
    let Some(&(start, _, _)) = words.first() else {
        return Ok(());
    };
    let (block, _) = dev.sector_at(start).ok_or(Error::Range)?;
    let limit = dev.options.program_poll_limit;

    log::trace!("{}: buffer program {} words at 0x{:08X}", dev.family, words.len(), start);
    dev.write_cmd(mem, block, cmd::BUFFER_PROGRAM)?;
    dev.wait_ready(mem, block, limit, 0)?;
    dev.write_cmd(mem, block, words.len() as u32 - 1)?;
    for &(addr, _, desired) in words {
        dev.bus.bus.write(mem, addr, desired)?;
    }
    dev.write_cmd(mem, block, cmd::CONFIRM)?;

    let status = dev.wait_ready(mem, block, limit, 0)?;
    dev.check_status(mem, status, sr::PROGRAM_ERROR | sr::VPP_LOW | sr::LOCKED, start)
}

/// Intel P30 algorithm
#[derive(Debug, Clone, Copy, Default)]
pub struct IntelP30;

impl FlashAlgorithm for IntelP30 {
    fn family(&self) -> &'static str {
        "intelp30"
    }

    fn description(&self) -> &'static str {
        "Intel P30 flash with write buffer"
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
        let buffer_bytes = query_buffer_bytes(mem, base, bus)?;
        log::debug!(
            "intelp30: found {} as {} at 0x{:08X}, write buffer {} bytes",
            chip,
            bus,
            base,
            buffer_bytes
        );
        Ok(Some(Box::new(IntelDevice::new(
            "intelp30",
            chip,
            bus,
            base,
            options,
            cmd::WORD_PROGRAM,
            buffer_bytes,
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
}
