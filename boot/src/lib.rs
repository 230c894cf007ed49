//! Stage 1: PCI option ROM discovery and boot parameter handoff.
//!
//! Runs as a UEFI application. Walks every PCI controller the firmware
//! knows about, turns on legacy VGA decoding for the first display
//! controller that allows it, gathers option ROM images into base memory
//! and writes one "PCID" record per device. The machine description and a
//! "bMEM" record follow, and the encoded list is published in the IAC for
//! stage 2.
//!
//! Everything except the [`efi`] glue is firmware agnostic and runs on the
//! host under `cargo test`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod acquire;
pub mod bmem;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod handoff;
pub mod optrom;

#[cfg(target_os = "uefi")]
pub mod efi;

use bootparm::{AcpiRoot, BootParams, HandoffPointer, MemoryRegion};
use log::info;

pub use acquire::{RomAcquirer, RomOrigin, RomSource, ROM_QUIRKS};
pub use bmem::{AllocError, BaseMemory, MemoryPool};
pub use config::Stage1Config;
pub use enumerate::{PciAttributes, PciController, PciSummary};
pub use error::{BootError, BootResult};

/// The whole stage 1 pass short of touching the IAC.
///
/// `regions` is read only after the PCI pass, so it may reflect the
/// firmware memory map as it stands once every ROM has been placed.
pub fn prepare_handoff<C, I, R>(
    controllers: I,
    acquirer: &mut RomAcquirer<'_>,
    regions: impl FnOnce() -> BootResult<R>,
    acpi: Option<AcpiRoot>,
    mem: &BaseMemory,
) -> BootResult<(BootParams, HandoffPointer)>
where
    C: PciController,
    I: IntoIterator<Item = BootResult<C>>,
    R: IntoIterator<Item = MemoryRegion>,
{
    let mut params = BootParams::new();
    let summary = enumerate::process_pci(controllers, acquirer, &mut params)?;
    info!(
        target: "pci",
        "{} controllers, {} recorded, {} with option ROM; VGA at {}",
        summary.controllers,
        summary.recorded,
        summary.with_rom,
        summary.vga
    );

    handoff::describe_machine(&mut params, regions()?, acpi);
    let ptr = handoff::assemble(&mut params, mem)?;
    Ok((params, ptr))
}
