//! Stage 2 side of the boot parameter handoff.
//!
//! Stage 2 runs without firmware services. It finds the list stage 1 left
//! in the IAC, decodes it, and reaches the recorded PCI devices again
//! through configuration mechanism #1 and its own page tables.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod handoff;
pub mod mmio;
pub mod pci;

pub use handoff::{HandoffError, Stage2Params};
pub use pci::{config_address, Function};

#[cfg(target_arch = "x86_64")]
pub use mmio::PageMapper;
#[cfg(target_arch = "x86_64")]
pub use pci::PortConfigSpace;
