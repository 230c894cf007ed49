//! Stage 1 → stage 2 handoff contract.
//!
//! Stage 1 runs under UEFI boot services and discovers the machine; stage 2
//! has no firmware services at all and only sees what stage 1 wrote down.
//! Everything that both sides have to agree on lives here:
//!
//! - [`param`]: the boot parameter list (tagged, length-prefixed, linked
//!   nodes) and its flat little-endian encoding
//! - [`pci`]: PCI identities, class codes, BAR decoding and the
//!   configuration-space access layer both stages drive
//! - [`memory`]: physical memory region descriptors
//! - [`handoff`]: where stage 2 finds the list
//!
//! The handoff assumes flat, identity-mapped physical addressing between the
//! two stages: every address in the list is a physical address.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod handoff;
pub mod memory;
pub mod param;
pub mod pci;

pub use handoff::{HandoffPointer, IAC_ADDRESS};
pub use memory::{MemoryRegion, MemoryRegionType};
pub use param::{
    AcpiRoot, BaseMemAvail, BootParam, BootParams, EncodeError, ParamWalker, PciDevice,
    RawNode, RomPlacement, Tag, WalkError,
};
pub use pci::{ClassCode, PciError, PciId, PciLocation, PciResult};

/// Size of a real mode paragraph; segments are physical addresses in these units.
pub const PARAGRAPH: u64 = 16;

/// Real mode segment for a physical address, if the address is paragraph
/// aligned and inside the first MiB.
#[inline]
pub const fn real_mode_segment(addr: u64) -> Option<u16> {
    if addr % PARAGRAPH != 0 || addr >= 0x10_0000 {
        return None;
    }
    Some((addr / PARAGRAPH) as u16)
}

/// Physical address of a real mode segment.
#[inline]
pub const fn segment_address(seg: u16) -> u64 {
    seg as u64 * PARAGRAPH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_conversion() {
        assert_eq!(real_mode_segment(0x9_f000), Some(0x9f00));
        assert_eq!(real_mode_segment(0x9_f008), None);
        assert_eq!(real_mode_segment(0x10_0000), None);
        assert_eq!(segment_address(0xc000), 0xc_0000);
    }
}
