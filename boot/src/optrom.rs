//! optrom.rs: expansion ROM image validation
//!
//! ROM bytes come from firmware, from the device itself or from legacy
//! memory, and are treated as hostile. Nothing here allocates or performs I/O:
//! every check is a bounds-checked view over a byte slice, and every offset
//! read from the image is compared against a length that has already been
//! validated before it is used to derive the next one.
//
// Layout (little-endian):
//   +----------------------+ 0x00  image header
//   | sig = 0x55 0xaa      | 2
//   | legacy size (512 B)  | 1
//   | reserved             | 0x15
//   | PCIR offset          | 2     (0x18)
//   +----------------------+
//   ...
//   +----------------------+ PCIR offset  PCI Data Structure
//   | sig = "PCIR"         | 4
//   | vendor, device       | 2 + 2
//   | device list offset   | 2     (rev >= 3, relative to PCIR)
//   | structure length     | 2
//   | revision             | 1
//   | class code           | 3
//   | image size (512 B)   | 2
//   | vendor revision      | 2
//   | code type            | 1     0 = PC-AT, 3 = EFI
//   | flags                | 1     0x80 = last image
//   | max runtime (512 B)  | 2     (rev >= 3)
//   +----------------------+

use core::fmt;
use core::mem;

use log::warn;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{FromBytes, LayoutVerified, Unaligned};

use bootparm::{ClassCode, PciId};

use crate::config::HKIBYTE;

type Le16 = U16<LittleEndian>;
type Le32 = U32<LittleEndian>;

pub const ROM_SIGNATURE: u16 = 0xaa55;
pub const PCIR_SIGNATURE: [u8; 4] = *b"PCIR";
/// Shortest PCI Data Structure: everything up to the runtime size field.
pub const PCIR_MIN_SZ: usize = 0x16;
/// Legacy size byte limit; larger images need a PCI Data Structure.
pub const LEGACY_MAX_UNITS: u8 = 0x7f;
pub const PCIR_FLAG_LAST_IMAGE: u8 = 0x80;

const PCIR_MAX_RUNTIME_OFF: usize = 0x16;

#[derive(FromBytes, Unaligned)]
#[repr(C)]
struct ImageHeader {
    sig: Le16,
    legacy_units: u8,
    _reserved: [u8; 0x15],
    pcir_off: Le16,
}

#[derive(FromBytes, Unaligned)]
#[repr(C)]
struct PcirHeader {
    sig: [u8; 4],
    pci_id: Le32,
    dev_ids_off: Le16,
    pcir_sz: Le16,
    revision: u8,
    class_code: [u8; 3],
    image_units: Le16,
    vendor_revision: Le16,
    code_type: u8,
    flags: u8,
}

const _: () = assert!(mem::size_of::<PcirHeader>() == PCIR_MIN_SZ);

/// Byte-wise sum modulo 256. A valid image sums to zero.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Code type byte of a PCI Data Structure.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CodeType(pub u8);

impl CodeType {
    pub const PC_AT: CodeType = CodeType(0x00);
    pub const OPEN_FIRMWARE: CodeType = CodeType(0x01);
    pub const HP_PA_RISC: CodeType = CodeType(0x02);
    pub const EFI: CodeType = CodeType(0x03);

    pub const fn name(self) -> &'static str {
        match self.0 {
            0x00 => "PC-AT",
            0x01 => "Open Firmware",
            0x02 => "PA-RISC",
            0x03 => "EFI",
            _ => "unknown",
        }
    }
}

impl fmt::Debug for CodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02x})", self.name(), self.0)
    }
}

/// A validated PCI Data Structure, detached from the bytes it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomDescriptor {
    /// Offset of the structure from the start of the image.
    pub offset: usize,
    /// Declared length of the structure.
    pub struct_len: usize,
    /// Image length in bytes; the checksum covers exactly this much.
    pub image_len: usize,
    pub id: PciId,
    pub class: ClassCode,
    pub revision: u8,
    pub code_type: CodeType,
    pub vendor_revision: u16,
    pub flags: u8,
    dev_ids_off: u16,
    max_runtime_units: Option<u16>,
}

impl RomDescriptor {
    #[inline]
    pub fn is_pc_at(&self) -> bool {
        self.code_type == CodeType::PC_AT
    }

    #[inline]
    pub fn is_last_image(&self) -> bool {
        self.flags & PCIR_FLAG_LAST_IMAGE != 0
    }

    /// Post-initialisation footprint in bytes. Only revision 3 and later
    /// structures long enough to carry the field have one.
    #[inline]
    pub fn runtime_len(&self) -> Option<usize> {
        self.max_runtime_units.map(|units| usize::from(units) * HKIBYTE)
    }

    /// Extended device id list (revision 3+), scanned up to the end of the
    /// validated image. A list that runs past it is ignored with a warning.
    pub fn find_device_id_list<'a>(&self, image: &'a [u8]) -> Option<DeviceIdList<'a>> {
        if self.revision < 3 || self.dev_ids_off == 0 {
            return None;
        }
        let image = &image[..image.len().min(self.image_len)];
        let start = self.offset.checked_add(usize::from(self.dev_ids_off))?;
        let mut p = start;
        loop {
            if p >= image.len() || p + 1 >= image.len() {
                warn!(target: "optrom", "device list pointer overshoots ROM end, ignoring");
                return None;
            }
            let id = u16::from_le_bytes([image[p], image[p + 1]]);
            p += 2;
            if id == 0 {
                break;
            }
        }
        Some(DeviceIdList { raw: &image[start..p - 2] })
    }

    /// True when this image claims to drive `id`: by its own vendor and
    /// device id, or by the same vendor and an entry of the device id list.
    pub fn supports_device(&self, image: &[u8], id: PciId) -> bool {
        if self.id == id {
            return true;
        }
        if self.id.vendor() != id.vendor() {
            return false;
        }
        self.find_device_id_list(image)
            .map_or(false, |list| list.iter().any(|dev| dev == id.device()))
    }
}

/// Zero-terminated list of extra device ids, terminator excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdList<'a> {
    raw: &'a [u8],
}

impl<'a> DeviceIdList<'a> {
    pub fn len(&self) -> usize {
        self.raw.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + 'a {
        self.raw.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]))
    }
}

/// Validate a legacy image that may lack a PCI Data Structure.
///
/// Returns the image length given by the legacy size byte when the header
/// signature matches and the checksum over exactly that many bytes is zero.
pub fn find_legacy_image(rom: &[u8]) -> Option<usize> {
    if rom.len() < HKIBYTE {
        return None;
    }
    let (hdr, _) = LayoutVerified::<_, ImageHeader>::new_unaligned_from_prefix(rom)?;
    if hdr.sig.get() != ROM_SIGNATURE {
        return None;
    }
    let units = hdr.legacy_units;
    if units == 0 || units > LEGACY_MAX_UNITS {
        return None;
    }
    let len = usize::from(units) * HKIBYTE;
    if len > rom.len() || checksum(&rom[..len]) != 0 {
        return None;
    }
    Some(len)
}

/// Locate and validate the PCI Data Structure of the first image in `rom`.
pub fn find_descriptor(rom: &[u8]) -> Option<RomDescriptor> {
    let rom_len = rom.len();
    if rom_len < HKIBYTE {
        return None;
    }
    let (hdr, _) = LayoutVerified::<_, ImageHeader>::new_unaligned_from_prefix(rom)?;
    if hdr.sig.get() != ROM_SIGNATURE {
        return None;
    }

    let pcir_off = usize::from(hdr.pcir_off.get());
    if pcir_off == 0 || pcir_off > rom_len - PCIR_MIN_SZ {
        return None;
    }
    let (pcir, _) = LayoutVerified::<_, PcirHeader>::new_unaligned_from_prefix(&rom[pcir_off..])?;
    if pcir.sig != PCIR_SIGNATURE {
        return None;
    }

    let pcir_sz = usize::from(pcir.pcir_sz.get());
    if pcir_sz < PCIR_MIN_SZ || pcir_sz > rom_len - pcir_off {
        return None;
    }
    let units = usize::from(pcir.image_units.get());
    if units == 0 || units > rom_len / HKIBYTE {
        return None;
    }

    // From here on the image length is the bound, not the buffer length.
    let image_len = units * HKIBYTE;
    if pcir_off > image_len - PCIR_MIN_SZ || pcir_sz > image_len - pcir_off {
        return None;
    }
    if checksum(&rom[..image_len]) != 0 {
        return None;
    }

    let revision = pcir.revision;
    let (dev_ids_off, max_runtime_units) = if revision >= 3 {
        let runtime = (pcir_sz >= PCIR_MAX_RUNTIME_OFF + 2).then(|| {
            let at = pcir_off + PCIR_MAX_RUNTIME_OFF;
            u16::from_le_bytes([rom[at], rom[at + 1]])
        });
        (pcir.dev_ids_off.get(), runtime)
    } else {
        (0, None)
    };

    Some(RomDescriptor {
        offset: pcir_off,
        struct_len: pcir_sz,
        image_len,
        id: PciId::from_raw(pcir.pci_id.get()),
        class: ClassCode::from_pcir(pcir.class_code),
        revision,
        code_type: CodeType(pcir.code_type),
        vendor_revision: pcir.vendor_revision.get(),
        flags: pcir.flags,
        dev_ids_off,
        max_runtime_units,
    })
}

#[cfg(test)]
pub(crate) mod testrom {
    //! Builders for well-formed and deliberately broken ROM images.

    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;

    pub struct RomBuilder {
        pub len: usize,
        pub legacy_units: u8,
        pub pcir: Option<PcirSpec>,
        pub fix_checksum: bool,
    }

    #[derive(Clone, Copy)]
    pub struct PcirSpec {
        pub offset: u16,
        pub vendor: u16,
        pub device: u16,
        pub class: [u8; 3],
        pub revision: u8,
        pub struct_len: u16,
        pub image_units: u16,
        pub code_type: u8,
        pub max_runtime_units: u16,
        pub dev_ids_off: u16,
    }

    impl PcirSpec {
        pub fn vga(vendor: u16, device: u16, image_units: u16) -> Self {
            PcirSpec {
                offset: 0x40,
                vendor,
                device,
                class: [0x00, 0x00, 0x03],
                revision: 0,
                struct_len: 0x18,
                image_units,
                code_type: 0,
                max_runtime_units: 0,
                dev_ids_off: 0,
            }
        }
    }

    impl RomBuilder {
        pub fn legacy(units: u8) -> Self {
            RomBuilder {
                len: usize::from(units) * HKIBYTE,
                legacy_units: units,
                pcir: None,
                fix_checksum: true,
            }
        }

        pub fn with_pcir(units: u8, pcir: PcirSpec) -> Self {
            RomBuilder { pcir: Some(pcir), ..Self::legacy(units) }
        }

        pub fn build(&self) -> Vec<u8> {
            let mut rom = vec![0u8; self.len];
            rom[0] = 0x55;
            rom[1] = 0xaa;
            rom[2] = self.legacy_units;
            // Some filler so the checksum has something to cancel.
            for (i, b) in rom.iter_mut().enumerate().skip(0x80) {
                *b = (i * 7) as u8;
            }
            if let Some(p) = self.pcir {
                rom[0x18..0x1a].copy_from_slice(&p.offset.to_le_bytes());
                let o = usize::from(p.offset);
                rom[o..o + 4].copy_from_slice(b"PCIR");
                rom[o + 4..o + 6].copy_from_slice(&p.vendor.to_le_bytes());
                rom[o + 6..o + 8].copy_from_slice(&p.device.to_le_bytes());
                rom[o + 8..o + 10].copy_from_slice(&p.dev_ids_off.to_le_bytes());
                rom[o + 10..o + 12].copy_from_slice(&p.struct_len.to_le_bytes());
                rom[o + 12] = p.revision;
                rom[o + 13..o + 16].copy_from_slice(&p.class);
                rom[o + 16..o + 18].copy_from_slice(&p.image_units.to_le_bytes());
                rom[o + 20] = p.code_type;
                rom[o + 21] = PCIR_FLAG_LAST_IMAGE;
                rom[o + 22..o + 24].copy_from_slice(&p.max_runtime_units.to_le_bytes());
            }
            if self.fix_checksum {
                let covered = match self.pcir {
                    Some(p) => (usize::from(p.image_units) * HKIBYTE).min(self.len),
                    None => (usize::from(self.legacy_units) * HKIBYTE).min(self.len),
                };
                seal(&mut rom[..covered]);
            }
            rom
        }
    }

    /// Adjust the last byte so `bytes` checksums to zero.
    pub fn seal(bytes: &mut [u8]) {
        let last = bytes.len() - 1;
        bytes[last] = 0;
        bytes[last] = checksum(bytes).wrapping_neg();
    }
}

#[cfg(test)]
mod tests {
    use super::testrom::*;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn short_buffers_are_rejected() {
        let rom = RomBuilder::with_pcir(1, PcirSpec::vga(0x1234, 0x1111, 1)).build();
        for len in [0, 1, 0x1a, 0x100, HKIBYTE - 1] {
            assert_eq!(find_legacy_image(&rom[..len]), None);
            assert_eq!(find_descriptor(&rom[..len]), None);
        }
        assert_eq!(find_legacy_image(&rom), Some(HKIBYTE));
        assert!(find_descriptor(&rom).is_some());
    }

    #[test]
    fn legacy_image_needs_signature_size_and_checksum() {
        let good = RomBuilder::legacy(4).build();
        assert_eq!(find_legacy_image(&good), Some(4 * HKIBYTE));
        assert_eq!(checksum(&good[..4 * HKIBYTE]), 0);

        let mut bad_sig = good.clone();
        bad_sig[1] = 0xab;
        assert_eq!(find_legacy_image(&bad_sig), None);

        let mut zero = good.clone();
        zero[2] = 0;
        assert_eq!(find_legacy_image(&zero), None);

        let largest = RomBuilder::legacy(0x7f).build();
        assert_eq!(find_legacy_image(&largest), Some(0x7f * HKIBYTE));

        let mut huge = RomBuilder::legacy(4).build();
        huge.resize(0x80 * HKIBYTE, 0);
        huge[2] = 0x80;
        assert_eq!(find_legacy_image(&huge), None);

        let mut dirty = good.clone();
        dirty[100] ^= 1;
        assert_eq!(find_legacy_image(&dirty), None);

        // Claims more than the buffer holds.
        assert_eq!(find_legacy_image(&good[..3 * HKIBYTE]), None);
    }

    #[test]
    fn checksum_covers_exactly_the_image() {
        let mut rom = RomBuilder::legacy(2).build();
        // Bytes past the image do not matter.
        rom.extend_from_slice(&[0x5a; HKIBYTE]);
        assert_eq!(find_legacy_image(&rom), Some(2 * HKIBYTE));
    }

    #[test]
    fn descriptor_fields() {
        let mut pcir = PcirSpec::vga(0x1234, 0x1111, 8);
        pcir.revision = 3;
        pcir.max_runtime_units = 6;
        let rom = RomBuilder::with_pcir(8, pcir).build();
        let d = find_descriptor(&rom).unwrap();
        assert_eq!(d.offset, 0x40);
        assert_eq!(d.struct_len, 0x18);
        assert_eq!(d.image_len, 8 * HKIBYTE);
        assert_eq!(d.id, PciId::new(0x1234, 0x1111));
        assert_eq!(d.class.class_if(), bootparm::pci::class_if::VID_VGA);
        assert!(d.is_pc_at());
        assert!(d.is_last_image());
        assert_eq!(d.runtime_len(), Some(6 * HKIBYTE));
        assert!(d.offset + d.struct_len <= d.image_len && d.image_len <= rom.len());
        assert_eq!(checksum(&rom[..d.image_len]), 0);
    }

    #[test]
    fn old_revision_has_no_runtime_size() {
        let mut pcir = PcirSpec::vga(0x1234, 0x1111, 2);
        pcir.revision = 2;
        pcir.max_runtime_units = 1;
        pcir.dev_ids_off = 0x20;
        let rom = RomBuilder::with_pcir(2, pcir).build();
        let d = find_descriptor(&rom).unwrap();
        assert_eq!(d.runtime_len(), None);
        assert_eq!(d.find_device_id_list(&rom), None);
    }

    #[test]
    fn short_revision3_structure_has_no_runtime_size() {
        let mut pcir = PcirSpec::vga(0x1234, 0x1111, 2);
        pcir.revision = 3;
        pcir.struct_len = PCIR_MIN_SZ as u16;
        pcir.max_runtime_units = 1;
        let rom = RomBuilder::with_pcir(2, pcir).build();
        assert_eq!(find_descriptor(&rom).unwrap().runtime_len(), None);
    }

    #[test]
    fn descriptor_bounds_are_checked_against_image_length() {
        // Structure fits the buffer but not the (smaller) image it declares.
        let mut pcir = PcirSpec::vga(0x1234, 0x1111, 1);
        pcir.offset = 0x210;
        let rom = RomBuilder { len: 2 * HKIBYTE, ..RomBuilder::with_pcir(2, pcir) }.build();
        assert_eq!(find_descriptor(&rom), None);

        // Same structure inside a two-unit image is fine.
        pcir.image_units = 2;
        let rom = RomBuilder::with_pcir(2, pcir).build();
        assert!(find_descriptor(&rom).is_some());
    }

    #[test]
    fn descriptor_rejects_corrupt_fields() {
        let base = PcirSpec::vga(0x1234, 0x1111, 2);
        let cases: [fn(&mut PcirSpec); 5] = [
            |p| p.offset = 0,
            |p| p.struct_len = (PCIR_MIN_SZ - 1) as u16,
            |p| p.struct_len = 0x4000,
            |p| p.image_units = 0,
            |p| p.image_units = 3,
        ];
        // An image filling the buffer exactly is fine.
        let whole = RomBuilder::with_pcir(2, base).build();
        assert_eq!(whole.len(), 2 * HKIBYTE);
        assert_eq!(find_descriptor(&whole).map(|d| d.image_len), Some(2 * HKIBYTE));

        for (i, corrupt) in cases.iter().enumerate() {
            let mut pcir = base;
            corrupt(&mut pcir);
            let mut builder = RomBuilder::with_pcir(2, pcir);
            builder.fix_checksum = false;
            let mut rom = builder.build();
            seal(&mut rom[..2 * HKIBYTE]);
            assert_eq!(find_descriptor(&rom), None, "case {}", i);
        }

        // Structure offset leaves no room for the minimum structure.
        let mut rom = RomBuilder::with_pcir(2, base).build();
        let tail = (2 * HKIBYTE - PCIR_MIN_SZ + 2) as u16;
        rom[0x18..0x1a].copy_from_slice(&tail.to_le_bytes());
        seal(&mut rom[..2 * HKIBYTE]);
        assert_eq!(find_descriptor(&rom), None);

        let mut rom = RomBuilder::with_pcir(2, base).build();
        rom[0x40] = b'X';
        assert_eq!(find_descriptor(&rom), None);

        let mut rom = RomBuilder::with_pcir(2, base).build();
        rom[0x300] ^= 0xff;
        assert_eq!(find_descriptor(&rom), None);
    }

    #[test]
    fn device_id_list_terminates() {
        let mut pcir = PcirSpec::vga(0x1234, 0x1111, 2);
        pcir.revision = 3;
        pcir.dev_ids_off = 0x20;
        let mut builder = RomBuilder::with_pcir(2, pcir);
        builder.fix_checksum = false;
        let mut rom = builder.build();
        rom[0x60..0x66].copy_from_slice(&[0x22, 0x22, 0x33, 0x33, 0x00, 0x00]);
        seal(&mut rom[..2 * HKIBYTE]);

        let d = find_descriptor(&rom).unwrap();
        let list = d.find_device_id_list(&rom).unwrap();
        assert_eq!(list.iter().collect::<alloc::vec::Vec<_>>(), [0x2222, 0x3333]);
        assert!(d.supports_device(&rom, PciId::new(0x1234, 0x3333)));
        assert!(d.supports_device(&rom, PciId::new(0x1234, 0x1111)));
        assert!(!d.supports_device(&rom, PciId::new(0x1234, 0x4444)));
        assert!(!d.supports_device(&rom, PciId::new(0x8086, 0x2222)));
    }

    #[test]
    fn unterminated_device_id_list_is_ignored() {
        let mut pcir = PcirSpec::vga(0x1234, 0x1111, 1);
        pcir.revision = 3;
        pcir.dev_ids_off = 0x20;
        let mut builder = RomBuilder::with_pcir(1, pcir);
        builder.fix_checksum = false;
        let mut rom = builder.build();
        for b in rom[0x60..].iter_mut() {
            *b = 0xff;
        }
        seal(&mut rom[..HKIBYTE]);

        let d = find_descriptor(&rom).unwrap();
        assert_eq!(d.find_device_id_list(&rom), None);
        // A pointer past the end is handled the same way.
        assert_eq!(d.find_device_id_list(&rom[..0x61]), None);
    }

    #[test]
    fn device_id_list_stops_at_image_end() {
        let mut pcir = PcirSpec::vga(0x1234, 0x1111, 1);
        pcir.revision = 3;
        pcir.dev_ids_off = 0x1b0;
        // One unit of image in a two unit buffer.
        let mut builder = RomBuilder { len: 2 * HKIBYTE, ..RomBuilder::with_pcir(1, pcir) };
        builder.fix_checksum = false;
        let mut rom = builder.build();
        for id in rom[0x1f0..0x280].chunks_exact_mut(2) {
            id.copy_from_slice(&0x7777u16.to_le_bytes());
        }
        rom[0x280..0x282].fill(0);
        seal(&mut rom[..HKIBYTE]);

        let d = find_descriptor(&rom).unwrap();
        assert_eq!(d.image_len, HKIBYTE);
        assert_eq!(d.find_device_id_list(&rom), None);
        assert!(!d.supports_device(&rom, PciId::new(0x1234, 0x7777)));
        assert!(d.supports_device(&rom, PciId::new(0x1234, 0x1111)));
    }
}
