//! Background debug mode protocol engine
//!
//! Layers, bottom up: [`BdmPort`] line access, [`Channel`] bit shifting and
//! bounded waits, one [`BdmInterface`] per cable family, and [`Session`]
//! with its command surface and [`BdmMemory`].

pub mod channel;
pub mod coldfire;
pub mod frame;
pub mod icd;
pub mod interface;
pub mod memory;
pub mod pd;
pub mod port;
pub mod session;
pub mod timing;

pub use channel::Channel;
pub use frame::{cmd, Response};
pub use interface::{BdmInterface, InterfaceKind};
pub use memory::BdmMemory;
pub use port::{BdmPort, ControlMap, PinMap};
pub use session::{Command, Session, SessionConfig};
pub use timing::Timing;
