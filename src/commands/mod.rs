//! CLI command implementations
//!
//! Target commands map onto the session's lifecycle operations. Memory
//! commands go through an [`AreaRegistry`](bdmflash_core::AreaRegistry),
//! so that writes landing in a registered flash device are programmed
//! rather than stored.

mod list;
pub mod memory;
mod progress;
pub mod target;

pub use list::{list_algorithms, list_backends};

use bdmflash_core::bdm::{BdmPort, Session};

/// Session over whichever backend was opened
pub type BdmSession = Session<Box<dyn BdmPort>>;

/// Result of one command
pub type CmdResult = Result<(), Box<dyn std::error::Error>>;
