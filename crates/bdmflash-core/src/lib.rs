//! bdmflash-core - BDM target control and flash programming
//!
//! This crate drives a 68k/ColdFire target through a bit-banged Background
//! Debug Mode cable and programs the flash devices found on its bus. The
//! protocol, status decoding and flash algorithms are `no_std` + `alloc`;
//! configuration files need the `std` feature.
//!
//! # Features
//!
//! - `std` - Enable standard library support, error trait and TOML config
//!
//! # Example
//!
//! ```ignore
//! use bdmflash_core::area::AreaRegistry;
//! use bdmflash_core::bdm::{Session, SessionConfig};
//!
//! let mut session = Session::open(port, SessionConfig::default())?;
//! session.reset_chip()?;
//! let mut registry = AreaRegistry::new(Default::default());
//! let area = registry.register_area(&mut session.memory(), None, 0)?;
//! println!("{}", area);
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod area;
pub mod bdm;
#[cfg(feature = "std")]
pub mod config;
pub mod error;
pub mod flash;
pub mod memory;
pub mod poll;
pub mod status;

pub use area::{AreaRegistry, MemoryArea};
pub use error::{Error, FaultClass, Result};
pub use memory::{TargetMemory, Width};
pub use status::TargetStatus;
