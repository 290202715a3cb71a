//! bdmflash-sim - Simulated BDM target for testing
//!
//! This crate stands in for real hardware: [`SimTarget`] answers the BDM
//! cable lines bit by bit, and behind it a [`SimBus`] maps RAM and flash
//! emulators ([`AmdFlash`], [`IntelFlash`], [`CfmModule`]) that follow the
//! command sets of the parts the flash algorithms program.

mod bank;

pub mod amd;
pub mod bus;
pub mod cfm;
pub mod intel;
pub mod target;

pub use amd::AmdFlash;
pub use bus::{BusDevice, Ram, SimBus, WriteCycle};
pub use cfm::CfmModule;
pub use intel::IntelFlash;
pub use target::SimTarget;

use bdmflash_core::memory::Width;

/// Build the emulator for a flash part by name
///
/// Parallel parts are wired to a `bus`-wide data bus at `base`; a CFM
/// module keeps its registers at `ipsbar`.
pub fn flash_by_name(name: &str, bus: Width, base: u32, ipsbar: u32) -> Option<Box<dyn BusDevice>> {
    if let Some(flash) = AmdFlash::by_name(name, bus, base) {
        return Some(Box::new(flash));
    }
    if let Some(flash) = IntelFlash::by_name(name, bus, base) {
        return Some(Box::new(flash));
    }
    CfmModule::by_name(name, base, ipsbar).map(|cfm| Box::new(cfm) as Box<dyn BusDevice>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flash_by_name() {
        let amd = flash_by_name("am29f040", Width::Byte, 0, 0x4000_0000).unwrap();
        assert!(amd.claims(0x7FFFF));
        assert!(!amd.claims(0x80000));

        assert!(flash_by_name("MCF5282", Width::Long, 0, 0x4000_0000).is_some());
        assert!(flash_by_name("no-such-part", Width::Word, 0, 0).is_none());
    }
}
