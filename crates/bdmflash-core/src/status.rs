//! Target status decoding
//!
//! The cable exposes a handful of raw status lines. Which bit carries which
//! signal, and with what polarity, depends on the cable; [`StatusMap`]
//! captures that and [`decode`] turns a raw sample into a [`TargetStatus`].

use crate::error::Error;
use bitflags::bitflags;

bitflags! {
    /// Semantic target state, recomputed on every query
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TargetStatus: u32 {
        /// Target reset line is asserted
        const RESET         = 1 << 0;
        /// Target is frozen in background debug mode
        const STOPPED       = 1 << 1;
        /// Target power is missing
        const POWER_FAIL    = 1 << 2;
        /// Cable is not connected to a target
        const NOT_CONNECTED = 1 << 3;
    }
}

impl TargetStatus {
    /// The fault to report if the target cannot be talked to at all
    ///
    /// Cable and power are checked before reset: a disconnected target also
    /// looks like one held in reset.
    pub fn unavailable(self) -> Option<Error> {
        if self.contains(Self::NOT_CONNECTED) {
            Some(Error::Cable)
        } else if self.contains(Self::POWER_FAIL) {
            Some(Error::Power)
        } else if self.contains(Self::RESET) {
            Some(Error::Reset)
        } else {
            None
        }
    }
}

/// Raw status register layout for one cable
///
/// A mask of zero means the cable does not sense that signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMap {
    /// Freeze (background mode) indication
    pub freeze: u8,
    /// Reset line sense
    pub reset: u8,
    /// Target power present
    pub power: u8,
    /// Cable/target present
    pub cable: u8,
    /// Bits that read low when their signal is asserted
    pub active_low: u8,
}

impl StatusMap {
    /// Whether the signal behind `mask` is asserted in `raw`
    pub fn asserted(&self, raw: u8, mask: u8) -> bool {
        mask != 0 && ((raw ^ self.active_low) & mask) == mask
    }
}

/// Decode a raw status sample
///
/// With `sense` enabled, a missing cable or missing power short-circuits the
/// decode: the freeze and reset lines float in that case and would give a
/// misleading reading.
pub fn decode(raw: u8, map: &StatusMap, sense: bool) -> TargetStatus {
    if sense {
        if map.cable != 0 && !map.asserted(raw, map.cable) {
            return TargetStatus::NOT_CONNECTED;
        }
        if map.power != 0 && !map.asserted(raw, map.power) {
            return TargetStatus::POWER_FAIL;
        }
    }

    let mut status = TargetStatus::empty();
    if map.asserted(raw, map.freeze) {
        status |= TargetStatus::STOPPED;
    }
    if map.asserted(raw, map.reset) {
        status |= TargetStatus::RESET;
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: StatusMap = StatusMap {
        freeze: 0x40,
        reset: 0x08,
        power: 0x10,
        cable: 0x20,
        active_low: 0x08,
    };

    #[test]
    fn test_stopped_target() {
        // freeze high, reset line high (not asserted), power and cable present
        let status = decode(0x40 | 0x08 | 0x10 | 0x20, &MAP, true);
        assert_eq!(status, TargetStatus::STOPPED);
        assert_eq!(status.unavailable(), None);
    }

    #[test]
    fn test_reset_is_active_low() {
        let status = decode(0x10 | 0x20, &MAP, true);
        assert_eq!(status, TargetStatus::RESET);
        assert_eq!(status.unavailable(), Some(Error::Reset));
    }

    #[test]
    fn test_sense_short_circuits() {
        // Freeze reads high on a floating cable; sense must hide it
        let status = decode(0x40 | 0x10, &MAP, true);
        assert_eq!(status, TargetStatus::NOT_CONNECTED);
        assert_eq!(status.unavailable(), Some(Error::Cable));

        let status = decode(0x40 | 0x20, &MAP, true);
        assert_eq!(status, TargetStatus::POWER_FAIL);
        assert_eq!(status.unavailable(), Some(Error::Power));
    }

    #[test]
    fn test_without_sense() {
        let status = decode(0x40 | 0x08, &MAP, false);
        assert_eq!(status, TargetStatus::STOPPED);
    }
}
