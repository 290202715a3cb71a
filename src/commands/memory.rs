//! Memory and flash commands

use super::progress::{bar, format_size, spinner};
use super::{BdmSession, CmdResult};
use bdmflash_core::area::{AreaRegistry, EraseScope, MemoryArea};
use bdmflash_core::config::FlashEntry;
use bdmflash_core::flash::FlashDevice;
use bdmflash_core::{Error, TargetMemory};
use std::fs;
use std::path::Path;

/// Bytes moved per registry call; sets the progress granularity
const CHUNK: usize = 1024;

/// Probe and register every entry, in order
pub fn register_flash(session: &mut BdmSession, registry: &mut AreaRegistry, entries: &[FlashEntry]) -> CmdResult {
    let mut mem = session.memory();
    for entry in entries {
        let area = registry
            .register_area(&mut mem, entry.family.as_deref(), entry.base)
            .map_err(|e| format!("no flash at 0x{:08X}: {}", entry.base, e))?;
        log::info!("Found {}", area);
    }
    Ok(())
}

/// Register the device at `addr` unless a registered one already covers it
fn ensure_flash(registry: &mut AreaRegistry, mem: &mut dyn TargetMemory, addr: u32) -> Result<(), Error> {
    if registry.find(addr).is_some_and(MemoryArea::is_flash) {
        return Ok(());
    }
    let area = registry.register_area(mem, None, addr)?;
    log::info!("Found {}", area);
    Ok(())
}

/// Probe for a device and show what was found
pub fn run_probe(session: &mut BdmSession, registry: &mut AreaRegistry, addr: u32, family: Option<&str>) -> CmdResult {
    let mut mem = session.memory();
    let area = registry.register_area(&mut mem, family, addr)?;
    if let Some(device) = area.device() {
        print_device_info(area, device);
    }
    Ok(())
}

fn print_device_info(area: &MemoryArea, device: &dyn FlashDevice) {
    let chip = device.chip();
    let chips = area.len() / chip.total_size.max(1) as u64;

    println!("Flash Device Information");
    println!("========================");
    println!();
    println!("Vendor:          {}", chip.vendor);
    println!("Name:            {}", chip.name);
    println!("Family:          {}", device.family());
    println!("ID:              {:04X} {:04X}", chip.manufacturer, chip.device);
    println!("Range:           0x{:08X} - 0x{:08X}", area.begin(), area.end());
    println!(
        "Size:            {} ({} x {}, {}-bit)",
        format_size(area.len()),
        chips,
        format_size(chip.total_size as u64),
        chip.width.bits()
    );
    let regions: Vec<String> = chip
        .regions
        .iter()
        .map(|r| format!("{}x{}", r.count, format_size(r.size as u64)))
        .collect();
    println!("Erase blocks:    {}", regions.join(" + "));
}

/// Last address of `len` bytes at `addr`
fn last_addr(addr: u32, len: usize) -> Result<u32, Error> {
    u32::try_from(len.saturating_sub(1))
        .ok()
        .and_then(|n| addr.checked_add(n))
        .ok_or(Error::Range)
}

fn read_range(
    registry: &AreaRegistry,
    mem: &mut dyn TargetMemory,
    addr: u32,
    buf: &mut [u8],
    phase: &str,
) -> Result<(), Error> {
    last_addr(addr, buf.len())?;
    let pb = bar(buf.len() as u64, phase);
    for (i, chunk) in buf.chunks_mut(CHUNK).enumerate() {
        let at = addr + (i * CHUNK) as u32;
        if let Err(e) = registry.read_memory(mem, at, chunk) {
            pb.abandon();
            return Err(e);
        }
        pb.inc(chunk.len() as u64);
    }
    pb.finish();
    Ok(())
}

/// Read `len` bytes at `addr` into a file
pub fn run_read(session: &mut BdmSession, registry: &AreaRegistry, addr: u32, len: u32, output: &Path) -> CmdResult {
    let mut data = vec![0u8; len as usize];
    read_range(registry, &mut session.memory(), addr, &mut data, "Reading")?;
    fs::write(output, &data)?;
    println!("Read {} bytes from 0x{:08X} to {:?}", data.len(), addr, output);
    Ok(())
}

/// Erase every flash sector overlapping `start..=end`
fn erase_range(registry: &mut AreaRegistry, mem: &mut dyn TargetMemory, start: u32, end: u32) -> Result<usize, Error> {
    let mut erased = 0;
    let mut at = start;
    loop {
        let Some(area) = registry.find(at) else {
            break;
        };
        let area_end = area.end();
        let next = match area.device().and_then(|d| d.sector_at(at)) {
            Some((sector, size)) => {
                registry.erase_area(mem, sector, EraseScope::Sector)?;
                registry.erase_wait(mem, sector, EraseScope::Sector)?;
                erased += 1;
                sector.checked_add(size)
            }
            None => area_end.checked_add(1),
        };
        match next {
            Some(next) if next <= end => at = next,
            _ => break,
        }
    }
    Ok(erased)
}

/// Write a file to memory, programming registered flash on the way
pub fn run_load(
    session: &mut BdmSession,
    registry: &mut AreaRegistry,
    addr: u32,
    input: &Path,
    erase: bool,
    verify: bool,
) -> CmdResult {
    let data = fs::read(input)?;
    println!("Read {} bytes from {:?}", data.len(), input);
    if data.is_empty() {
        return Ok(());
    }
    let end = last_addr(addr, data.len())?;

    for area in registry.areas().filter(|a| a.is_flash()) {
        if area.begin() <= end && addr <= area.end() {
            println!("  {}", area);
        }
    }

    let mut mem = session.memory();
    if erase {
        let pb = spinner("Erasing...".to_string());
        let sectors = erase_range(registry, &mut mem, addr, end)?;
        pb.finish_with_message(format!("Erased {} sector(s)", sectors));
    }

    let pb = bar(data.len() as u64, "Writing");
    for (i, chunk) in data.chunks(CHUNK).enumerate() {
        let at = addr + (i * CHUNK) as u32;
        let outcome = registry.write_memory(&mut mem, at, chunk);
        pb.inc(outcome.written as u64);
        if let Some(fault) = outcome.fault {
            pb.abandon();
            let stopped = at + outcome.written as u32;
            return Err(format!("write stopped at 0x{:08X}: {}", stopped, fault).into());
        }
    }
    pb.finish();

    if verify {
        let mut back = vec![0u8; data.len()];
        read_range(registry, &mut mem, addr, &mut back, "Verifying")?;
        if let Some(i) = data.iter().zip(&back).position(|(a, b)| a != b) {
            return Err(format!(
                "verify failed at 0x{:08X}: expected 0x{:02X}, read 0x{:02X}",
                addr + i as u32,
                data[i],
                back[i]
            )
            .into());
        }
        println!("Verified {} bytes", data.len());
    }

    println!("Wrote {} bytes at 0x{:08X}", data.len(), addr);
    Ok(())
}

/// Erase one device, one sector, or every registered device
pub fn run_erase(
    session: &mut BdmSession,
    registry: &mut AreaRegistry,
    addr: Option<u32>,
    all: bool,
    sector: bool,
) -> CmdResult {
    let mut mem = session.memory();
    if let Some(addr) = addr {
        ensure_flash(registry, &mut mem, addr)?;
    }

    if all {
        let pb = spinner("Erasing all flash...".to_string());
        let count = registry.erase_all_flash(&mut mem)?;
        if count == 0 {
            pb.abandon();
            return Err("no flash devices registered (give --addr or a [[flash]] entry)".into());
        }
        pb.finish_with_message(format!("Erased {} device(s)", count));
        return Ok(());
    }

    let addr = addr.ok_or("an address or --all is required")?;
    let scope = if sector { EraseScope::Sector } else { EraseScope::Chip };
    let pb = spinner(format!("Erasing at 0x{:08X}...", addr));
    registry.erase_area(&mut mem, addr, scope)?;
    registry.erase_wait(&mut mem, addr, scope)?;
    pb.finish_with_message("Erase complete");
    Ok(())
}

/// Bytes a blank check at `addr` covers
fn blank_range(registry: &AreaRegistry, addr: u32, scope: EraseScope) -> Result<(u32, u32), Error> {
    let area = registry.find(addr).ok_or(Error::Range)?;
    match scope {
        EraseScope::Sector => area.device().and_then(|d| d.sector_at(addr)).ok_or(Error::Range),
        EraseScope::Chip => Ok((area.begin(), u32::try_from(area.len()).map_err(|_| Error::Range)?)),
    }
}

/// Check whether a device or sector is erased
///
/// Families without a device-side check are read back instead.
pub fn run_blank_check(session: &mut BdmSession, registry: &mut AreaRegistry, addr: u32, sector: bool) -> CmdResult {
    let mut mem = session.memory();
    ensure_flash(registry, &mut mem, addr)?;
    let scope = if sector { EraseScope::Sector } else { EraseScope::Chip };
    let (start, len) = blank_range(registry, addr, scope)?;

    let first_programmed = match registry.blank_check(&mut mem, addr, scope) {
        Ok(_) => None,
        Err(Error::Verify { addr: at }) => Some(at),
        Err(Error::Unsupported) => {
            log::debug!("device has no blank check; reading back");
            let mut buf = vec![0u8; len as usize];
            read_range(registry, &mut mem, start, &mut buf, "Checking")?;
            buf.iter().position(|&b| b != 0xFF).map(|i| start + i as u32)
        }
        Err(e) => return Err(e.into()),
    };

    match first_programmed {
        None => println!("0x{:08X} - 0x{:08X}: blank", start, last_addr(start, len as usize)?),
        Some(at) => println!("0x{:08X} - 0x{:08X}: not blank (0x{:08X})", start, last_addr(start, len as usize)?, at),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdmflash_core::bdm::{BdmPort, Session, SessionConfig};
    use bdmflash_core::flash::AlgorithmOptions;
    use bdmflash_core::memory::Width;
    use bdmflash_sim::{AmdFlash, Ram, SimBus, SimTarget};

    fn amd_session() -> BdmSession {
        let bus = SimBus::new()
            .with(AmdFlash::by_name("Am29F040", Width::Byte, 0).unwrap())
            .with(Ram::new(0x2000_0000, 0x1000));
        let port: Box<dyn BdmPort> = Box::new(SimTarget::new(Default::default(), bus));
        Session::open(port, SessionConfig::default()).unwrap()
    }

    #[test]
    fn test_last_addr() {
        assert_eq!(last_addr(0x100, 0x10), Ok(0x10F));
        assert_eq!(last_addr(0xFFFF_FFFF, 1), Ok(0xFFFF_FFFF));
        assert_eq!(last_addr(0xFFFF_FFFF, 2), Err(Error::Range));
    }

    #[test]
    fn test_erase_range_covers_overlapping_sectors() {
        let mut session = amd_session();
        let mut registry = AreaRegistry::new(AlgorithmOptions::default());
        register_flash(
            &mut session,
            &mut registry,
            &[FlashEntry {
                base: 0,
                family: Some("29".to_string()),
            }],
        )
        .unwrap();

        let mut mem = session.memory();
        // 64 KiB uniform sectors: 0xFFF0..0x10010 touches two of them
        assert_eq!(erase_range(&mut registry, &mut mem, 0xFFF0, 0x1000F), Ok(2));
        // RAM above the device is skipped
        assert_eq!(erase_range(&mut registry, &mut mem, 0x7FFFF, 0x2000_0010), Ok(1));
    }

    #[test]
    fn test_blank_range() {
        let mut session = amd_session();
        let mut registry = AreaRegistry::new(AlgorithmOptions::default());
        ensure_flash(&mut registry, &mut session.memory(), 0).unwrap();
        assert_eq!(blank_range(&registry, 0x12345, EraseScope::Sector), Ok((0x10000, 0x10000)));
        assert_eq!(blank_range(&registry, 0x12345, EraseScope::Chip), Ok((0, 0x80000)));
        // Already registered: no second probe
        assert!(ensure_flash(&mut registry, &mut session.memory(), 0x40000).is_ok());
    }
}
