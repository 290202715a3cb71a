//! Error types for bdmflash-core
//!
//! Every fault that crosses the library boundary is one variant of [`Error`].
//! Each variant has a fixed small negative code (see [`Error::code`]) so that
//! session front ends can pass faults through integer-only channels.

use core::fmt;

/// Broad class of a fault, deciding how callers should react to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// The target is in reset, unpowered or not cabled. Never retried.
    TargetUnavailable,
    /// A bounded protocol exchange failed. Callers may resynchronize and retry.
    Protocol,
    /// A flash device reported or exhibited a failure.
    Flash,
    /// Misuse of the session or malformed request.
    Session,
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Protocol faults
    /// Unclassified fault, also reported when resynchronization fails
    Unknown,
    /// Target power is missing
    Power,
    /// Cable is not connected to the target
    Cable,
    /// Target did not respond within the bounded wait
    Response,
    /// Target is held in reset
    Reset,
    /// The host port failed to perform a line operation
    Port,
    /// Target reported a bus error for the last command
    Berr,
    /// Target reported "not a valid command"
    Nvc,

    // Session faults
    /// Operation on a session that is not open
    NotOpen,
    /// Operation not permitted in the current state
    IllegalOperation,
    /// Write transfer failed
    WriteFail,
    /// Read transfer failed
    ReadFail,
    /// Transfer size is not valid for the operation
    IllegalSize,
    /// Session could not be opened
    OpenFail,
    /// Loading an image failed
    LoadFail,
    /// Macro file could not be found
    MacroFileMissing,
    /// Object file section is missing
    SectionMissing,
    /// Driver and library versions disagree
    VersionMismatch,

    // Flash faults
    /// The flash device latched its fault status bits
    DeviceFault {
        /// Address of the operation that faulted
        addr: u32,
    },
    /// Final read-back did not match the requested contents
    Verify {
        /// First address that read back wrong
        addr: u32,
    },
    /// The flash device did not complete within the poll bound
    FlashTimeout {
        /// Address of the operation that timed out
        addr: u32,
    },
    /// The flash family does not provide this capability
    Unsupported,
    /// No flash algorithm recognised the device
    NotFound,
    /// Address or length violates an alignment requirement
    Alignment,
    /// Address range is outside an area or collides with one
    Range,
}

impl Error {
    /// Every error in code order, used for code lookups
    const ALL: [Error; 25] = [
        Error::Unknown,
        Error::Power,
        Error::Cable,
        Error::Response,
        Error::Reset,
        Error::Port,
        Error::Berr,
        Error::Nvc,
        Error::NotOpen,
        Error::IllegalOperation,
        Error::WriteFail,
        Error::ReadFail,
        Error::IllegalSize,
        Error::OpenFail,
        Error::LoadFail,
        Error::MacroFileMissing,
        Error::SectionMissing,
        Error::VersionMismatch,
        Error::DeviceFault { addr: 0 },
        Error::Verify { addr: 0 },
        Error::FlashTimeout { addr: 0 },
        Error::Unsupported,
        Error::NotFound,
        Error::Alignment,
        Error::Range,
    ];

    /// The fixed negative integer code for this fault
    pub fn code(&self) -> i32 {
        let index = match self {
            Self::Unknown => 0,
            Self::Power => 1,
            Self::Cable => 2,
            Self::Response => 3,
            Self::Reset => 4,
            Self::Port => 5,
            Self::Berr => 6,
            Self::Nvc => 7,
            Self::NotOpen => 8,
            Self::IllegalOperation => 9,
            Self::WriteFail => 10,
            Self::ReadFail => 11,
            Self::IllegalSize => 12,
            Self::OpenFail => 13,
            Self::LoadFail => 14,
            Self::MacroFileMissing => 15,
            Self::SectionMissing => 16,
            Self::VersionMismatch => 17,
            Self::DeviceFault { .. } => 18,
            Self::Verify { .. } => 19,
            Self::FlashTimeout { .. } => 20,
            Self::Unsupported => 21,
            Self::NotFound => 22,
            Self::Alignment => 23,
            Self::Range => 24,
        };
        -(index + 1)
    }

    /// Map a negative code back to its fault
    ///
    /// Flash faults come back with address 0 since codes do not carry one.
    pub fn from_code(code: i32) -> Option<Self> {
        if code >= 0 {
            return None;
        }
        let index = usize::try_from(-(code + 1)).ok()?;
        Self::ALL.get(index).copied()
    }

    /// Classify this fault
    pub fn class(&self) -> FaultClass {
        match self {
            Self::Power | Self::Cable | Self::Reset => FaultClass::TargetUnavailable,
            Self::Unknown | Self::Response | Self::Port | Self::Berr | Self::Nvc => {
                FaultClass::Protocol
            }
            Self::DeviceFault { .. }
            | Self::Verify { .. }
            | Self::FlashTimeout { .. }
            | Self::Unsupported
            | Self::NotFound => FaultClass::Flash,
            _ => FaultClass::Session,
        }
    }

    /// Whether the target itself is unreachable
    pub fn is_target_unavailable(&self) -> bool {
        self.class() == FaultClass::TargetUnavailable
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown fault (resynchronization failed)"),
            Self::Power => write!(f, "target power failed"),
            Self::Cable => write!(f, "cable not connected"),
            Self::Response => write!(f, "target not responding"),
            Self::Reset => write!(f, "target is in reset"),
            Self::Port => write!(f, "host port failure"),
            Self::Berr => write!(f, "target bus error"),
            Self::Nvc => write!(f, "target rejected command (not valid)"),
            Self::NotOpen => write!(f, "session not open"),
            Self::IllegalOperation => write!(f, "illegal operation"),
            Self::WriteFail => write!(f, "write failed"),
            Self::ReadFail => write!(f, "read failed"),
            Self::IllegalSize => write!(f, "illegal transfer size"),
            Self::OpenFail => write!(f, "open failed"),
            Self::LoadFail => write!(f, "load failed"),
            Self::MacroFileMissing => write!(f, "macro file missing"),
            Self::SectionMissing => write!(f, "section missing"),
            Self::VersionMismatch => write!(f, "driver version mismatch"),
            Self::DeviceFault { addr } => {
                write!(f, "flash device signalled a fault at 0x{:08X}", addr)
            }
            Self::Verify { addr } => write!(f, "flash verify failed at 0x{:08X}", addr),
            Self::FlashTimeout { addr } => {
                write!(f, "flash operation timed out at 0x{:08X}", addr)
            }
            Self::Unsupported => write!(f, "operation not supported by this flash family"),
            Self::NotFound => write!(f, "no flash device recognised"),
            Self::Alignment => write!(f, "invalid alignment"),
            Self::Range => write!(f, "address range not valid"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_fixed() {
        assert_eq!(Error::Unknown.code(), -1);
        assert_eq!(Error::Response.code(), -4);
        assert_eq!(Error::Nvc.code(), -8);
        assert_eq!(Error::NotOpen.code(), -9);
        assert_eq!(Error::VersionMismatch.code(), -18);
    }

    #[test]
    fn test_code_lookup() {
        for error in Error::ALL {
            assert_eq!(Error::from_code(error.code()), Some(error));
        }
        assert_eq!(Error::from_code(0), None);
        assert_eq!(Error::from_code(-100), None);
    }

    #[test]
    fn test_classes() {
        assert!(Error::Cable.is_target_unavailable());
        assert!(Error::Reset.is_target_unavailable());
        assert_eq!(Error::Berr.class(), FaultClass::Protocol);
        assert_eq!(Error::Verify { addr: 4 }.class(), FaultClass::Flash);
        assert_eq!(Error::IllegalSize.class(), FaultClass::Session);
    }
}
