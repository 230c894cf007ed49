//! Boot parameter list.
//!
//! Stage 1 appends one record per discovered fact (PCI device, base memory
//! split, physical memory range, ACPI root pointer) and, at handoff, encodes
//! the list into a flat block of physical memory. Stage 2 walks that block.
//!
//! # Wire format (little-endian, every node 8-byte aligned)
//!
//! ```text
//!   +0   next   u64   physical address of the next node, 0 at the end
//!   +8   type   u32   4-character tag, e.g. "PCID"
//!   +12  size   u32   payload length in bytes
//!   +16  payload[size]
//!        padding to the next 8-byte boundary
//! ```
//!
//! `next` always equals `align8(node + 16 + size)`, so a reader that does not
//! know a tag skips the node using `size` alone and lands on the same node the
//! link points to.

use alloc::vec::Vec;
use core::fmt;
use core::num::NonZeroU16;

use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

use crate::memory::{MemoryRegion, MemoryRegionType};
use crate::pci::{ClassCode, PciId, PciLocation};

type Le16 = U16<LittleEndian>;
type Le32 = U32<LittleEndian>;
type Le64 = U64<LittleEndian>;

pub const NODE_HEADER_LEN: usize = 16;
pub const NODE_ALIGN: usize = 8;

#[inline]
const fn align_node(off: usize) -> usize {
    (off + NODE_ALIGN - 1) & !(NODE_ALIGN - 1)
}

// ============================================================================
// Tags
// ============================================================================

/// 4-character node type, stored as the little-endian dword of its bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(u32);

impl Tag {
    pub const PCI_DEVICE: Tag = Tag::from_bytes(*b"PCID");
    pub const BASE_MEMORY: Tag = Tag::from_bytes(*b"bMEM");
    pub const MEMORY_REGION: Tag = Tag::from_bytes(*b"MEMR");
    pub const ACPI_ROOT: Tag = Tag::from_bytes(*b"RSDP");

    #[inline]
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Tag(u32::from_le_bytes(bytes))
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Tag(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.to_le_bytes() {
            let c = if b.is_ascii_graphic() { b as char } else { '?' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

// ============================================================================
// Wire layouts
// ============================================================================

#[derive(FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct NodeHeader {
    next: Le64,
    tag: Le32,
    size: Le32,
}

#[derive(FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct PciDeviceWire {
    pci_locn: Le32,
    pci_id: Le32,
    class_if: Le32,
    rimg_seg: Le16,
    rimg_rt_seg: Le16,
    rimg_sz: Le32,
}

#[derive(FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct BaseMemWire {
    boottime_bmem_bot_seg: Le16,
    runtime_bmem_top_seg: Le16,
}

#[derive(FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct MemoryRegionWire {
    base: Le64,
    length: Le64,
    kind: Le32,
}

#[derive(FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct AcpiRootWire {
    address: Le64,
    revision: Le32,
}

// ============================================================================
// Records
// ============================================================================

/// Where a device's option ROM image ended up.
///
/// Only exists for devices that have one: "no ROM" is encoded as a zero
/// boot-time segment and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomPlacement {
    /// Segment of the boot-time image copy.
    pub boot_seg: NonZeroU16,
    /// Segment of the post-initialisation runtime footprint; equal to
    /// `boot_seg` when the image does not need a separate one.
    pub runtime_seg: NonZeroU16,
    /// Validated image size in bytes.
    pub size: u32,
}

impl RomPlacement {
    #[inline]
    pub fn has_runtime_split(&self) -> bool {
        self.boot_seg != self.runtime_seg
    }
}

/// "PCID" record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDevice {
    pub location: PciLocation,
    pub id: PciId,
    pub class: ClassCode,
    pub rom: Option<RomPlacement>,
}

/// "bMEM" record: how stage 2 may use conventional memory below 640 KiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseMemAvail {
    /// First paragraph not used by boot-time data. Stage 2 may reclaim
    /// `[0, boottime_bot_seg * 16)` once it has consumed the boot parameters.
    pub boottime_bot_seg: u16,
    /// End of base memory available at run time.
    pub runtime_top_seg: u16,
}

/// "RSDP" record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcpiRoot {
    pub address: u64,
    /// 0 for an ACPI 1.0 RSDP, 2 for an ACPI 2.0+ XSDP.
    pub revision: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootParam {
    PciDevice(PciDevice),
    BaseMemory(BaseMemAvail),
    MemoryRegion(MemoryRegion),
    AcpiRoot(AcpiRoot),
}

impl BootParam {
    pub const fn tag(&self) -> Tag {
        match self {
            BootParam::PciDevice(_) => Tag::PCI_DEVICE,
            BootParam::BaseMemory(_) => Tag::BASE_MEMORY,
            BootParam::MemoryRegion(_) => Tag::MEMORY_REGION,
            BootParam::AcpiRoot(_) => Tag::ACPI_ROOT,
        }
    }

    pub const fn payload_len(&self) -> usize {
        match self {
            BootParam::PciDevice(_) => core::mem::size_of::<PciDeviceWire>(),
            BootParam::BaseMemory(_) => core::mem::size_of::<BaseMemWire>(),
            BootParam::MemoryRegion(_) => core::mem::size_of::<MemoryRegionWire>(),
            BootParam::AcpiRoot(_) => core::mem::size_of::<AcpiRootWire>(),
        }
    }

    /// Bytes this record occupies in the encoded list, padding included.
    #[inline]
    pub const fn encoded_len(&self) -> usize {
        align_node(NODE_HEADER_LEN + self.payload_len())
    }

    fn write_payload(&self, out: &mut [u8]) {
        match *self {
            BootParam::PciDevice(dev) => {
                let (boot, runtime, size) = match dev.rom {
                    Some(rom) => (rom.boot_seg.get(), rom.runtime_seg.get(), rom.size),
                    None => (0, 0, 0),
                };
                let wire = PciDeviceWire {
                    pci_locn: Le32::new(dev.location.raw()),
                    pci_id: Le32::new(dev.id.raw()),
                    class_if: Le32::new(dev.class.raw()),
                    rimg_seg: Le16::new(boot),
                    rimg_rt_seg: Le16::new(runtime),
                    rimg_sz: Le32::new(size),
                };
                out.copy_from_slice(wire.as_bytes());
            }
            BootParam::BaseMemory(bmem) => {
                let wire = BaseMemWire {
                    boottime_bmem_bot_seg: Le16::new(bmem.boottime_bot_seg),
                    runtime_bmem_top_seg: Le16::new(bmem.runtime_top_seg),
                };
                out.copy_from_slice(wire.as_bytes());
            }
            BootParam::MemoryRegion(region) => {
                let wire = MemoryRegionWire {
                    base: Le64::new(region.start),
                    length: Le64::new(region.len),
                    kind: Le32::new(region.ty.raw()),
                };
                out.copy_from_slice(wire.as_bytes());
            }
            BootParam::AcpiRoot(root) => {
                let wire = AcpiRootWire {
                    address: Le64::new(root.address),
                    revision: Le32::new(root.revision),
                };
                out.copy_from_slice(wire.as_bytes());
            }
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// Output block smaller than [`BootParams::encoded_len`]
    BufferTooSmall { needed: usize, available: usize },
    /// Block does not start on a node boundary
    MisalignedBase { base: u64 },
}

impl EncodeError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BufferTooSmall { .. } => "boot parameter block too small",
            Self::MisalignedBase { .. } => "boot parameter block misaligned",
        }
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::BufferTooSmall { needed, available } => {
                write!(f, "{} (need {} bytes, have {})", self.as_str(), needed, available)
            }
            Self::MisalignedBase { base } => write!(f, "{} (@0x{:x})", self.as_str(), base),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkError {
    /// Node header or payload runs past the end of the block
    Truncated { offset: usize },
    /// Link disagrees with the size-skip rule
    LinkMismatch { offset: usize, next: u64 },
    /// Link points outside the block
    LinkOutOfBounds { offset: usize, next: u64 },
    /// Known tag with a payload shorter than its layout
    ShortPayload { tag: Tag, size: usize },
}

impl WalkError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Truncated { .. } => "boot parameter node truncated",
            Self::LinkMismatch { .. } => "boot parameter link disagrees with node size",
            Self::LinkOutOfBounds { .. } => "boot parameter link out of bounds",
            Self::ShortPayload { .. } => "boot parameter payload too short",
        }
    }
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Truncated { offset } => write!(f, "{} (+0x{:x})", self.as_str(), offset),
            Self::LinkMismatch { offset, next } | Self::LinkOutOfBounds { offset, next } => {
                write!(f, "{} (+0x{:x} -> @0x{:x})", self.as_str(), offset, next)
            }
            Self::ShortPayload { tag, size } => {
                write!(f, "{} ({} with {} bytes)", self.as_str(), tag, size)
            }
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Append-only list of boot parameters, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootParams {
    nodes: Vec<BootParam>,
}

impl BootParams {
    pub const fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Append a record. Records are never removed or changed afterwards.
    pub fn push(&mut self, param: BootParam) {
        self.nodes.push(param);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, BootParam> {
        self.nodes.iter()
    }

    pub fn pci_devices(&self) -> impl Iterator<Item = &PciDevice> + '_ {
        self.nodes.iter().filter_map(|p| match p {
            BootParam::PciDevice(dev) => Some(dev),
            _ => None,
        })
    }

    /// Size of the encoded list in bytes.
    pub fn encoded_len(&self) -> usize {
        self.nodes.iter().map(BootParam::encoded_len).sum()
    }

    /// Encode the list into `out`, which will live at physical address `base`.
    ///
    /// Returns the number of bytes written. The head pointer handed to stage 2
    /// is `base` (or 0 for an empty list).
    pub fn encode(&self, base: u64, out: &mut [u8]) -> Result<usize, EncodeError> {
        if base % NODE_ALIGN as u64 != 0 {
            return Err(EncodeError::MisalignedBase { base });
        }
        let needed = self.encoded_len();
        if out.len() < needed {
            return Err(EncodeError::BufferTooSmall { needed, available: out.len() });
        }

        let mut off = 0;
        for (i, param) in self.nodes.iter().enumerate() {
            let size = param.payload_len();
            let end = off + param.encoded_len();
            let next = if i + 1 == self.nodes.len() { 0 } else { base + end as u64 };

            let header = NodeHeader {
                next: Le64::new(next),
                tag: Le32::new(param.tag().raw()),
                size: Le32::new(size as u32),
            };
            let payload_at = off + NODE_HEADER_LEN;
            out[off..payload_at].copy_from_slice(header.as_bytes());
            param.write_payload(&mut out[payload_at..payload_at + size]);
            out[payload_at + size..end].fill(0);
            off = end;
        }
        Ok(off)
    }

    /// Decode an encoded list, skipping nodes with tags this build does not know.
    pub fn decode(bytes: &[u8], base: u64) -> Result<Self, WalkError> {
        let mut params = Self::new();
        for node in ParamWalker::new(bytes, base) {
            if let Some(param) = node?.decode()? {
                params.push(param);
            }
        }
        Ok(params)
    }
}

impl<'a> IntoIterator for &'a BootParams {
    type Item = &'a BootParam;
    type IntoIter = core::slice::Iter<'a, BootParam>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

// ============================================================================
// Walker
// ============================================================================

/// One node of an encoded list, payload not yet interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawNode<'a> {
    pub tag: Tag,
    pub payload: &'a [u8],
}

impl<'a> RawNode<'a> {
    /// Interpret the payload. `Ok(None)` for tags this build does not know.
    ///
    /// Payloads longer than the known layout are accepted (the extra bytes
    /// belong to newer producers); shorter ones are an error.
    pub fn decode(&self) -> Result<Option<BootParam>, WalkError> {
        let param = match self.tag {
            Tag::PCI_DEVICE => {
                let w = self.layout::<PciDeviceWire>()?;
                let rom = NonZeroU16::new(w.rimg_seg.get()).map(|boot_seg| RomPlacement {
                    boot_seg,
                    runtime_seg: NonZeroU16::new(w.rimg_rt_seg.get()).unwrap_or(boot_seg),
                    size: w.rimg_sz.get(),
                });
                BootParam::PciDevice(PciDevice {
                    location: PciLocation::from_raw(w.pci_locn.get()),
                    id: PciId::from_raw(w.pci_id.get()),
                    class: ClassCode::from_raw(w.class_if.get()),
                    rom,
                })
            }
            Tag::BASE_MEMORY => {
                let w = self.layout::<BaseMemWire>()?;
                BootParam::BaseMemory(BaseMemAvail {
                    boottime_bot_seg: w.boottime_bmem_bot_seg.get(),
                    runtime_top_seg: w.runtime_bmem_top_seg.get(),
                })
            }
            Tag::MEMORY_REGION => {
                let w = self.layout::<MemoryRegionWire>()?;
                BootParam::MemoryRegion(MemoryRegion {
                    start: w.base.get(),
                    len: w.length.get(),
                    ty: MemoryRegionType::from_raw(w.kind.get()),
                })
            }
            Tag::ACPI_ROOT => {
                let w = self.layout::<AcpiRootWire>()?;
                BootParam::AcpiRoot(AcpiRoot {
                    address: w.address.get(),
                    revision: w.revision.get(),
                })
            }
            _ => return Ok(None),
        };
        Ok(Some(param))
    }

    fn layout<T: FromBytes + Unaligned>(&self) -> Result<LayoutVerified<&'a [u8], T>, WalkError> {
        LayoutVerified::<&'a [u8], T>::new_unaligned_from_prefix(self.payload)
            .map(|(layout, _rest)| layout)
            .ok_or(WalkError::ShortPayload { tag: self.tag, size: self.payload.len() })
    }
}

/// Iterates the nodes of an encoded list that lives at physical `base`.
///
/// Every header, payload and link is checked against the block bounds before
/// use; the walk stops at the first inconsistency.
pub struct ParamWalker<'a> {
    bytes: &'a [u8],
    base: u64,
    cursor: Option<usize>,
}

impl<'a> ParamWalker<'a> {
    pub fn new(bytes: &'a [u8], base: u64) -> Self {
        let cursor = if bytes.is_empty() { None } else { Some(0) };
        Self { bytes, base, cursor }
    }
}

impl<'a> Iterator for ParamWalker<'a> {
    type Item = Result<RawNode<'a>, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.cursor.take()?;
        let bytes: &'a [u8] = self.bytes;

        let Some((header, rest)) =
            LayoutVerified::<&'a [u8], NodeHeader>::new_unaligned_from_prefix(&bytes[offset..])
        else {
            return Some(Err(WalkError::Truncated { offset }));
        };
        let size = header.size.get() as usize;
        if size > rest.len() {
            return Some(Err(WalkError::Truncated { offset }));
        }
        let node = RawNode { tag: Tag::from_raw(header.tag.get()), payload: &rest[..size] };

        let next = header.next.get();
        if next != 0 {
            let skip = align_node(offset + NODE_HEADER_LEN + size);
            if next.checked_sub(self.base) != Some(skip as u64) {
                return Some(Err(WalkError::LinkMismatch { offset, next }));
            }
            if skip >= bytes.len() {
                return Some(Err(WalkError::LinkOutOfBounds { offset, next }));
            }
            self.cursor = Some(skip);
        }
        Some(Ok(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use pretty_assertions::assert_eq;

    const BASE: u64 = 0x7_0000;

    fn vga() -> PciDevice {
        PciDevice {
            location: PciLocation::new(0, 0, 2, 0),
            id: PciId::new(0x1234, 0x1111),
            class: ClassCode::from_raw(0x0300_0002),
            rom: Some(RomPlacement {
                boot_seg: NonZeroU16::new(0x8000).unwrap(),
                runtime_seg: NonZeroU16::new(0x9c00).unwrap(),
                size: 0x9000,
            }),
        }
    }

    fn sample() -> BootParams {
        let mut params = BootParams::new();
        params.push(BootParam::PciDevice(vga()));
        params.push(BootParam::PciDevice(PciDevice {
            location: PciLocation::new(0, 0, 3, 0),
            id: PciId::new(0x8086, 0x100e),
            class: ClassCode::from_raw(0x0200_0003),
            rom: None,
        }));
        params.push(BootParam::MemoryRegion(MemoryRegion {
            start: 0x10_0000,
            len: 0x7ff0_0000,
            ty: MemoryRegionType::Usable,
        }));
        params.push(BootParam::AcpiRoot(AcpiRoot { address: 0xf_5a40, revision: 2 }));
        params.push(BootParam::BaseMemory(BaseMemAvail {
            boottime_bot_seg: 0x0800,
            runtime_top_seg: 0x9c00,
        }));
        params
    }

    #[test]
    fn tags_match_their_characters() {
        assert_eq!(Tag::PCI_DEVICE.raw(), 0x4449_4350);
        assert_eq!(Tag::BASE_MEMORY.raw(), 0x4d45_4d62);
        assert_eq!(format!("{}", Tag::ACPI_ROOT), "RSDP");
    }

    #[test]
    fn pci_record_layout_is_bit_exact() {
        let mut params = BootParams::new();
        params.push(BootParam::PciDevice(vga()));
        let mut out = vec![0xffu8; params.encoded_len()];
        assert_eq!(params.encode(BASE, &mut out), Ok(40));

        assert_eq!(&out[0..8], &[0; 8]);
        assert_eq!(&out[8..12], b"PCID");
        assert_eq!(&out[12..16], &20u32.to_le_bytes());
        assert_eq!(&out[16..20], &0x0000_0010u32.to_le_bytes());
        assert_eq!(&out[20..24], &0x1111_1234u32.to_le_bytes());
        assert_eq!(&out[24..28], &0x0300_0002u32.to_le_bytes());
        assert_eq!(&out[28..30], &0x8000u16.to_le_bytes());
        assert_eq!(&out[30..32], &0x9c00u16.to_le_bytes());
        assert_eq!(&out[32..36], &0x9000u32.to_le_bytes());
        assert_eq!(&out[36..40], &[0; 4]);
    }

    #[test]
    fn links_follow_the_size_rule() {
        let params = sample();
        let mut out = vec![0u8; params.encoded_len()];
        params.encode(BASE, &mut out).unwrap();

        let mut off = 0usize;
        for i in 0..params.len() {
            let next = u64::from_le_bytes(out[off..off + 8].try_into().unwrap());
            let size = u32::from_le_bytes(out[off + 12..off + 16].try_into().unwrap()) as usize;
            let skip = align_node(off + NODE_HEADER_LEN + size);
            if i + 1 == params.len() {
                assert_eq!(next, 0);
            } else {
                assert_eq!(next, BASE + skip as u64);
            }
            off = skip;
        }
        assert_eq!(off, out.len());
    }

    #[test]
    fn decode_recovers_every_record() {
        let params = sample();
        let mut out = vec![0u8; params.encoded_len()];
        params.encode(BASE, &mut out).unwrap();
        assert_eq!(BootParams::decode(&out, BASE), Ok(params));
    }

    #[test]
    fn zero_boot_segment_means_no_rom() {
        let mut params = BootParams::new();
        params.push(BootParam::PciDevice(PciDevice { rom: None, ..vga() }));
        let mut out = vec![0u8; params.encoded_len()];
        params.encode(BASE, &mut out).unwrap();
        // Stale runtime segment and size must not resurrect a ROM.
        out[30..32].copy_from_slice(&0x9c00u16.to_le_bytes());
        out[32..36].copy_from_slice(&0x8000u32.to_le_bytes());

        let decoded = BootParams::decode(&out, BASE).unwrap();
        assert_eq!(decoded.pci_devices().next().unwrap().rom, None);
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let mut out = vec![0u8; 64];
        // Unknown "XTRA" node with a 12-byte payload, then a bMEM node.
        out[0..8].copy_from_slice(&(BASE + 32).to_le_bytes());
        out[8..12].copy_from_slice(b"XTRA");
        out[12..16].copy_from_slice(&12u32.to_le_bytes());
        out[16..28].copy_from_slice(&[0xee; 12]);
        out[32..40].copy_from_slice(&0u64.to_le_bytes());
        out[40..44].copy_from_slice(b"bMEM");
        out[44..48].copy_from_slice(&4u32.to_le_bytes());
        out[48..50].copy_from_slice(&0x0800u16.to_le_bytes());
        out[50..52].copy_from_slice(&0x9f00u16.to_le_bytes());

        let tags: Vec<Tag> = ParamWalker::new(&out, BASE).map(|n| n.unwrap().tag).collect();
        assert_eq!(tags, [Tag::from_bytes(*b"XTRA"), Tag::BASE_MEMORY]);

        let decoded = BootParams::decode(&out, BASE).unwrap();
        assert_eq!(
            decoded.iter().copied().collect::<Vec<_>>(),
            [BootParam::BaseMemory(BaseMemAvail { boottime_bot_seg: 0x0800, runtime_top_seg: 0x9f00 })]
        );
    }

    #[test]
    fn walker_rejects_inconsistent_blocks() {
        let params = sample();
        let mut out = vec![0u8; params.encoded_len()];
        params.encode(BASE, &mut out).unwrap();

        let mut bad_link = out.clone();
        bad_link[0..8].copy_from_slice(&(BASE + 0x1000).to_le_bytes());
        assert_eq!(
            ParamWalker::new(&bad_link, BASE).next(),
            Some(Err(WalkError::LinkMismatch { offset: 0, next: BASE + 0x1000 }))
        );

        let mut oversized = out.clone();
        oversized[12..16].copy_from_slice(&0x1000u32.to_le_bytes());
        assert_eq!(
            ParamWalker::new(&oversized, BASE).next(),
            Some(Err(WalkError::Truncated { offset: 0 }))
        );

        let cut = &out[..out.len() - 8];
        assert!(BootParams::decode(cut, BASE).is_err());
    }

    #[test]
    fn encode_checks_block() {
        let params = sample();
        let mut small = vec![0u8; params.encoded_len() - 1];
        assert_eq!(
            params.encode(BASE, &mut small),
            Err(EncodeError::BufferTooSmall {
                needed: params.encoded_len(),
                available: params.encoded_len() - 1
            })
        );
        let mut out = vec![0u8; params.encoded_len()];
        assert_eq!(params.encode(BASE + 4, &mut out), Err(EncodeError::MisalignedBase { base: BASE + 4 }));
    }

    #[test]
    fn empty_list_encodes_to_nothing() {
        let params = BootParams::new();
        assert_eq!(params.encode(BASE, &mut []), Ok(0));
        assert_eq!(ParamWalker::new(&[], BASE).count(), 0);
    }
}
