//! Option ROM acquisition and relocation.
//!
//! For one PCI device, sources are tried in a fixed order and the first one
//! that yields a usable image wins:
//!
//! 1. a pre-supplied file, taken as-is
//! 2. the image firmware read from the device (`EFI_PCI_IO_PROTOCOL.RomImage`),
//!    PC-AT code type only
//! 3. a matching image in a firmware volume
//! 4. a per-device quirk from [`ROM_QUIRKS`]
//!
//! The winning image is then relocated into base memory where stage 2 can
//! reach it with a real mode segment.

use core::fmt;
use core::num::NonZeroU16;

use log::{info, warn};

use bootparm::pci::{DEVICE_ID_VBOX_VESA, VENDOR_ID_VBOX};
use bootparm::{ClassCode, PciId, RomPlacement};

use crate::bmem::{segment_of, AllocError, Block, MemoryPool};
use crate::config::{Stage1Config, HKIBYTE};
use crate::optrom::{find_descriptor, find_legacy_image, RomDescriptor};

/// Image bytes together with the physical address they live at.
#[derive(Debug, Clone, Copy)]
pub struct RomSource<'a> {
    pub addr: u64,
    pub bytes: &'a [u8],
}

impl<'a> RomSource<'a> {
    pub fn new(addr: u64, bytes: &'a [u8]) -> Self {
        Self { addr, bytes }
    }
}

/// Pre-supplied images, e.g. files on the boot volume.
pub trait RomOverride {
    fn rom_for(&mut self, id: PciId) -> Option<RomSource<'_>>;
}

/// Firmware-volume image lookup.
pub trait RomLookup {
    fn find_rom(&mut self, id: PciId, class: ClassCode) -> Option<RomSource<'_>>;
}

/// Read access to legacy (below 1 MiB) physical memory.
pub trait LegacyMemory {
    fn read(&self, addr: u64, len: usize) -> Option<&[u8]>;
}

/// Source that never has anything.
pub struct NoRoms;

impl RomOverride for NoRoms {
    fn rom_for(&mut self, _id: PciId) -> Option<RomSource<'_>> {
        None
    }
}

impl RomLookup for NoRoms {
    fn find_rom(&mut self, _id: PciId, _class: ClassCode) -> Option<RomSource<'_>> {
        None
    }
}

impl LegacyMemory for NoRoms {
    fn read(&self, _addr: u64, _len: usize) -> Option<&[u8]> {
        None
    }
}

// ============================================================================
// Quirks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Look for a legacy image in the shadowed option ROM area. A PCI Data
    /// Structure is optional for images found this way.
    LegacyShadow { addr: u64, window: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomQuirk {
    pub id: PciId,
    pub name: &'static str,
    pub probe: Probe,
}

pub const ROM_QUIRKS: &[RomQuirk] = &[RomQuirk {
    // Has a PCI id, but its option ROM has no PCI Data Structure.
    id: PciId::new(VENDOR_ID_VBOX, DEVICE_ID_VBOX_VESA),
    name: "VirtualBox graphics",
    probe: Probe::LegacyShadow { addr: 0xc_0000, window: 0x1_0000 },
}];

// ============================================================================
// Acquisition
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomOrigin {
    File,
    PciIo,
    FirmwareVolume,
    Quirk(&'static str),
}

impl fmt::Display for RomOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RomOrigin::File => f.write_str("file"),
            RomOrigin::PciIo => f.write_str("EFI_PCI_IO_PROTOCOL"),
            RomOrigin::FirmwareVolume => f.write_str("firmware volume"),
            RomOrigin::Quirk(name) => write!(f, "quirk: {}", name),
        }
    }
}

/// Everything acquisition needs: the image sources and the two base memory
/// pools relocated copies are carved from.
pub struct RomAcquirer<'a> {
    pub files: &'a mut dyn RomOverride,
    pub volumes: &'a mut dyn RomLookup,
    pub legacy: &'a dyn LegacyMemory,
    pub boot_time: &'a dyn MemoryPool,
    pub run_time: &'a dyn MemoryPool,
    pub quirks: &'a [RomQuirk],
    pub config: Stage1Config,
}

/// Result of the source search before relocation.
enum Found<'s> {
    Nothing,
    Image(RomSource<'s>, Option<RomDescriptor>),
}

impl<'a> RomAcquirer<'a> {
    /// Find, validate and relocate an option ROM for one device.
    ///
    /// `pci_rom` is the image firmware read from the device itself, if any.
    /// Returns `None` when no source produced a usable image or relocation
    /// ran out of base memory; the latter does not try further sources.
    pub fn acquire(
        &mut self,
        id: PciId,
        class: ClassCode,
        pci_rom: Option<RomSource<'_>>,
    ) -> Option<(RomPlacement, RomOrigin)> {
        let placer = Placer {
            boot_time: self.boot_time,
            run_time: self.run_time,
            config: self.config,
        };

        if let Some(src) = self.files.rom_for(id).filter(|s| !s.bytes.is_empty()) {
            return placer.place(src, None, RomOrigin::File);
        }

        if let Found::Image(src, desc) = from_pci_io(pci_rom) {
            return placer.place(src, desc, RomOrigin::PciIo);
        }

        if let Some(src) = self.volumes.find_rom(id, class) {
            if let Some(desc) = find_descriptor(src.bytes) {
                return placer.place(src, Some(desc), RomOrigin::FirmwareVolume);
            }
        }

        for quirk in self.quirks.iter().filter(|q| q.id == id) {
            if let Found::Image(src, desc) = probe(self.legacy, quirk) {
                return placer.place(src, desc, RomOrigin::Quirk(quirk.name));
            }
        }
        None
    }
}

/// Relocation half of [`RomAcquirer`]; holds no borrow of the sources.
struct Placer<'a> {
    boot_time: &'a dyn MemoryPool,
    run_time: &'a dyn MemoryPool,
    config: Stage1Config,
}

impl Placer<'_> {
    fn place(
        &self,
        src: RomSource<'_>,
        desc: Option<RomDescriptor>,
        origin: RomOrigin,
    ) -> Option<(RomPlacement, RomOrigin)> {
        match relocate(&src, desc.as_ref(), self.boot_time, self.run_time, &self.config) {
            Ok(placement) => Some((placement, origin)),
            Err(e) => {
                warn!(target: "optrom", "    cannot relocate ROM img. from {}: {}", origin, e);
                None
            }
        }
    }
}

fn from_pci_io(rom: Option<RomSource<'_>>) -> Found<'_> {
    let Some(src) = rom.filter(|s| !s.bytes.is_empty()) else {
        return Found::Nothing;
    };
    let Some(desc) = find_descriptor(src.bytes) else {
        return Found::Nothing;
    };
    if !desc.is_pc_at() {
        info!(target: "optrom", "    ROM img. via EFI_PCI_IO_PROTOCOL not PC-AT compatible ({:?})", desc.code_type);
        return Found::Nothing;
    }
    Found::Image(src, Some(desc))
}

fn probe<'m>(legacy: &'m dyn LegacyMemory, quirk: &RomQuirk) -> Found<'m> {
    match quirk.probe {
        Probe::LegacyShadow { addr, window } => {
            let Some(bytes) = legacy.read(addr, window) else {
                return Found::Nothing;
            };
            let Some(len) = find_legacy_image(bytes) else {
                return Found::Nothing;
            };
            let bytes = &bytes[..len];
            // May legitimately be absent for these devices.
            let desc = find_descriptor(bytes);
            Found::Image(RomSource::new(addr, bytes), desc)
        }
    }
}

// ============================================================================
// Relocation
// ============================================================================

/// Copy (or adopt) an image into base memory.
///
/// - No descriptor: one run-time copy at the default alignment.
/// - Revision 3+ descriptor whose non-zero runtime size differs from the
///   image size:
///   the boot-time image (adopted in place when it already sits suitably
///   aligned below the ceiling, copied otherwise) plus a separate, untouched
///   run-time block of the runtime size.
/// - Anything else: one run-time copy at the default alignment.
pub fn relocate(
    src: &RomSource<'_>,
    desc: Option<&RomDescriptor>,
    boot_time: &dyn MemoryPool,
    run_time: &dyn MemoryPool,
    config: &Stage1Config,
) -> Result<RomPlacement, AllocError> {
    let size = desc.map_or(src.bytes.len(), |d| d.image_len).min(src.bytes.len());
    let image = &src.bytes[..size];
    let size32 = u32::try_from(size).map_err(|_| AllocError::Exhausted { size, align: 0 })?;

    if desc.is_none() {
        info!(target: "optrom", "    ROM img.: @0x{:x}~@0x{:x} (no PCIR!)", src.addr, end_of(src.addr, size));
    }

    let split = desc
        .filter(|d| d.revision >= 3)
        .and_then(RomDescriptor::runtime_len)
        .filter(|&rt| rt != 0 && rt != size);

    if let Some(rt_size) = split {
        let align = config.rom_split_align;
        let in_place = src.addr % HKIBYTE as u64 == 0
            && src.addr.checked_add(size as u64).map_or(false, |end| end <= config.base_memory_ceiling);

        let boot_seg = match segment_of(src.addr) {
            Ok(seg) if in_place => {
                info!(target: "optrom", "    ROM img.: @0x{:x}~@0x{:x}", src.addr, end_of(src.addr, size));
                seg
            }
            _ => {
                let copy = copy_into(boot_time.alloc(size, align)?, image);
                info!(
                    target: "optrom",
                    "    ROM img.: @0x{:x}~@0x{:x} (copied from @0x{:x})",
                    copy.addr,
                    end_of(copy.addr, size),
                    src.addr
                );
                copy.segment()?
            }
        };
        let footprint = run_time.alloc(rt_size, align)?;
        info!(target: "optrom", "  run time: @0x{:x} (0x{:x} bytes)", footprint.addr, rt_size);
        return Ok(RomPlacement { boot_seg, runtime_seg: footprint.segment()?, size: size32 });
    }

    let copy = copy_into(run_time.alloc(size, config.rom_copy_align)?, image);
    info!(
        target: "optrom",
        "    ROM img.: @0x{:x}~@0x{:x} (copied from @0x{:x})",
        copy.addr,
        end_of(copy.addr, size),
        src.addr
    );
    let seg: NonZeroU16 = copy.segment()?;
    Ok(RomPlacement { boot_seg: seg, runtime_seg: seg, size: size32 })
}

fn copy_into(block: Block, image: &[u8]) -> Block {
    block.data.copy_from_slice(image);
    block
}

#[inline]
fn end_of(addr: u64, size: usize) -> u64 {
    (addr + size as u64).saturating_sub(1)
}

#[cfg(test)]
pub(crate) mod fakes {
    use alloc::vec::Vec;

    use super::*;

    /// Pre-supplied image table keyed by PCI id.
    #[derive(Default)]
    pub struct FileTable(pub Vec<(PciId, u64, Vec<u8>)>);

    impl RomOverride for FileTable {
        fn rom_for(&mut self, id: PciId) -> Option<RomSource<'_>> {
            self.0
                .iter()
                .find(|(i, _, _)| *i == id)
                .map(|(_, addr, bytes)| RomSource::new(*addr, bytes))
        }
    }

    impl RomLookup for FileTable {
        fn find_rom(&mut self, id: PciId, _class: ClassCode) -> Option<RomSource<'_>> {
            self.rom_for(id)
        }
    }

    /// A slice of legacy memory starting at physical `base`.
    pub struct Shadow {
        pub base: u64,
        pub bytes: Vec<u8>,
    }

    impl LegacyMemory for Shadow {
        fn read(&self, addr: u64, len: usize) -> Option<&[u8]> {
            let start = usize::try_from(addr.checked_sub(self.base)?).ok()?;
            let end = start.checked_add(len)?.min(self.bytes.len());
            self.bytes.get(start..end)
        }
    }
}
