//! PCI configuration access, identities and BAR decoding.
//!
//! Configuration space is only addressable one aligned dword at a time.
//! [`ConfigSpace`] backends supply exactly that (firmware `EFI_PCI_IO_PROTOCOL`
//! in stage 1, configuration mechanism #1 ports in stage 2) and get checked,
//! unaligned and BAR-mapping accessors on top.

use core::fmt;

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PciError {
    /// Aligned accessor called with an offset that is not a multiple of 4
    MisalignedOffset { offset: u16 },
    /// Access would run past the end of configuration space
    OffsetOutOfRange { offset: u16 },
    /// Backend cannot reach this PCI segment
    UnreachableSegment { segment: u16 },
    /// BAR index outside 0-5
    InvalidBarIndex { index: u8 },
    /// 64-bit memory BAR in the last slot, no register left for the high half
    Bar64AtLastSlot { index: u8 },
    /// BAR type bits 01 (below 1 MiB) or 11 (reserved)
    UnsupportedBarType { index: u8, raw: u32 },
    /// Backend could not access configuration space
    Access { status: usize },
    /// Physical range could not be mapped
    MapFailed { phys: u64, size: usize },
}

impl PciError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MisalignedOffset { .. } => "misaligned PCI configuration offset",
            Self::OffsetOutOfRange { .. } => "PCI configuration offset out of range",
            Self::UnreachableSegment { .. } => "PCI segment not reachable",
            Self::InvalidBarIndex { .. } => "invalid BAR index (must be 0-5)",
            Self::Bar64AtLastSlot { .. } => "bogus 64-bit PCI BAR in last slot",
            Self::UnsupportedBarType { .. } => "unhandled 16-bit or reserved PCI BAR",
            Self::Access { .. } => "cannot access PCI configuration space",
            Self::MapFailed { .. } => "cannot map PCI BAR",
        }
    }
}

impl fmt::Display for PciError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MisalignedOffset { offset } | Self::OffsetOutOfRange { offset } => {
                write!(f, "{} (0x{:x})", self.as_str(), offset)
            }
            Self::UnreachableSegment { segment } => write!(f, "{} ({:04x})", self.as_str(), segment),
            Self::InvalidBarIndex { index } | Self::Bar64AtLastSlot { index } => {
                write!(f, "{} (BAR{})", self.as_str(), index)
            }
            Self::UnsupportedBarType { index, raw } => {
                write!(f, "{} (BAR{} = 0x{:08x})", self.as_str(), index, raw)
            }
            Self::Access { status } => write!(f, "{} (status 0x{:x})", self.as_str(), status),
            Self::MapFailed { phys, size } => {
                write!(f, "{} (@0x{:x}, 0x{:x} bytes)", self.as_str(), phys, size)
            }
        }
    }
}

pub type PciResult<T> = Result<T, PciError>;

// ============================================================================
// Configuration Space Layout
// ============================================================================

pub mod config {
    pub const VENDOR_ID: u16 = 0x00;
    pub const CLASS_REVISION: u16 = 0x08;
    pub const HEADER_TYPE: u16 = 0x0E;
    pub const BAR0: u16 = 0x10;
    /// General (type 0) header: six BARs at 0x10-0x27
    pub const BAR_COUNT: usize = 6;
    /// Highest addressable byte offset plus one (PCIe extended space)
    pub const SPACE_LEN: u32 = 0x1000;
}

/// Class + subclass + programming interface values, revision byte cleared.
pub mod class_if {
    pub const VID_VGA: u32 = 0x0300_0000;
    pub const VID_8514: u32 = 0x0300_0100;
    pub const VID_XGA: u32 = 0x0301_0000;
    pub const BUS_USB_UHCI: u32 = 0x0c03_0000;
    pub const BUS_USB_OHCI: u32 = 0x0c03_1000;
    pub const BUS_USB_EHCI: u32 = 0x0c03_2000;
    pub const BUS_USB_XHCI: u32 = 0x0c03_3000;
}

/// Innotek GmbH (VirtualBox)
pub const VENDOR_ID_VBOX: u16 = 0x80ee;
/// VirtualBox graphics adapter
pub const DEVICE_ID_VBOX_VESA: u16 = 0xbeef;

// ============================================================================
// Identities
// ============================================================================

/// Segment, bus, device and function packed as `seg << 16 | bus << 8 | dev << 3 | fn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PciLocation(u32);

impl PciLocation {
    pub const fn new(segment: u16, bus: u8, device: u8, function: u8) -> Self {
        Self(
            (segment as u32) << 16
                | (bus as u32) << 8
                | ((device as u32) & 0x1f) << 3
                | ((function as u32) & 0x07),
        )
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn segment(self) -> u16 {
        (self.0 >> 16) as u16
    }

    #[inline]
    pub const fn bus(self) -> u8 {
        (self.0 >> 8) as u8
    }

    #[inline]
    pub const fn device(self) -> u8 {
        ((self.0 >> 3) & 0x1f) as u8
    }

    #[inline]
    pub const fn function(self) -> u8 {
        (self.0 & 0x07) as u8
    }
}

impl fmt::Display for PciLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.segment(),
            self.bus(),
            self.device(),
            self.function()
        )
    }
}

/// Vendor id in the low half, device id in the high half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PciId(u32);

impl PciId {
    #[inline]
    pub const fn new(vendor: u16, device: u16) -> Self {
        Self((device as u32) << 16 | vendor as u32)
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn vendor(self) -> u16 {
        self.0 as u16
    }

    #[inline]
    pub const fn device(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl fmt::Display for PciId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor(), self.device())
    }
}

/// `class << 24 | subclass << 16 | prog_if << 8 | revision`, i.e. the
/// dword at configuration offset 0x08.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassCode(u32);

impl ClassCode {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Build from the 3-byte class code of a PCI Data Structure
    /// (`[prog_if, subclass, class]`, revision unknown).
    #[inline]
    pub const fn from_pcir(bytes: [u8; 3]) -> Self {
        Self((bytes[2] as u32) << 24 | (bytes[1] as u32) << 16 | (bytes[0] as u32) << 8)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Class, subclass and programming interface with the revision cleared;
    /// this is what the [`class_if`] constants compare against.
    #[inline]
    pub const fn class_if(self) -> u32 {
        self.0 & 0xffff_ff00
    }

    #[inline]
    pub const fn class(self) -> u8 {
        (self.0 >> 24) as u8
    }

    #[inline]
    pub const fn subclass(self) -> u8 {
        (self.0 >> 16) as u8
    }

    #[inline]
    pub const fn prog_if(self) -> u8 {
        (self.0 >> 8) as u8
    }

    #[inline]
    pub const fn revision(self) -> u8 {
        self.0 as u8
    }

    /// VGA, 8514 or XGA display controller.
    pub const fn is_legacy_video(self) -> bool {
        matches!(
            self.class_if(),
            class_if::VID_VGA | class_if::VID_8514 | class_if::VID_XGA
        )
    }

    pub const fn name(self) -> Option<&'static str> {
        match self.class_if() {
            class_if::VID_VGA => Some("VGA"),
            class_if::VID_8514 => Some("8514"),
            class_if::VID_XGA => Some("XGA"),
            class_if::BUS_USB_UHCI => Some("USB UHCI"),
            class_if::BUS_USB_OHCI => Some("USB OHCI"),
            class_if::BUS_USB_EHCI => Some("USB EHCI"),
            class_if::BUS_USB_XHCI => Some("USB XHCI"),
            _ => None,
        }
    }
}

// ============================================================================
// Base Address Registers
// ============================================================================

/// I/O space BAR (bit 0 set).
#[inline]
pub const fn bar_is_io(bar: u32) -> bool {
    bar & 1 != 0
}

/// Low half of a 64-bit memory BAR (bits 0-2 = 100).
#[inline]
pub const fn bar_is_mem64(bar: u32) -> bool {
    bar & 7 == 4
}

/// 32-bit memory BAR (bits 0-2 = 000).
#[inline]
pub const fn bar_is_mem32(bar: u32) -> bool {
    bar & 7 == 0
}

/// Prefetchable memory BAR.
#[inline]
pub const fn bar_is_prefetchable(bar: u32) -> bool {
    bar & 9 == 8
}

/// Address portion of a BAR: low 2 bits masked for I/O, low 4 for memory.
#[inline]
pub const fn bar_address(bar: u32) -> u32 {
    if bar_is_io(bar) {
        bar & !0x3
    } else {
        bar & !0xf
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bar {
    Io { port: u32 },
    Mem32 { base: u32, prefetchable: bool },
    Mem64 { base: u64, prefetchable: bool },
}

impl Bar {
    pub const fn base(&self) -> u64 {
        match *self {
            Bar::Io { port } => port as u64,
            Bar::Mem32 { base, .. } => base as u64,
            Bar::Mem64 { base, .. } => base,
        }
    }

    pub const fn is_prefetchable(&self) -> bool {
        match *self {
            Bar::Io { .. } => false,
            Bar::Mem32 { prefetchable, .. } | Bar::Mem64 { prefetchable, .. } => prefetchable,
        }
    }
}

impl fmt::Display for Bar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pf = if self.is_prefetchable() { " pf" } else { "" };
        match *self {
            Bar::Io { port } => write!(f, "{{io 0x{:x}}}", port),
            Bar::Mem32 { base, .. } => write!(f, "{{@0x{:x}{}}}", base, pf),
            Bar::Mem64 { base, .. } => write!(f, "{{@0x{:x}{}}}", base, pf),
        }
    }
}

/// Walk a window of raw BAR registers, skipping unimplemented (zero) ones.
///
/// A 64-bit BAR consumes the following register as its high half; finding one
/// in the last slot of the window is an error, never a 32-bit read.
pub fn bars(regs: &[u32]) -> Bars<'_> {
    Bars { regs, next: 0 }
}

pub struct Bars<'a> {
    regs: &'a [u32],
    next: usize,
}

impl<'a> Iterator for Bars<'a> {
    type Item = PciResult<(u8, Bar)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.regs.len() {
            let index = self.next;
            let raw = self.regs[index];
            self.next += 1;
            if raw == 0 {
                continue;
            }

            let slot = index as u8;
            if bar_is_io(raw) {
                return Some(Ok((slot, Bar::Io { port: bar_address(raw) })));
            }

            let prefetchable = bar_is_prefetchable(raw);
            if bar_is_mem32(raw) {
                let bar = Bar::Mem32 { base: bar_address(raw), prefetchable };
                return Some(Ok((slot, bar)));
            }

            // Stop after a malformed register: nothing after it can be trusted.
            if bar_is_mem64(raw) {
                let Some(&high) = self.regs.get(self.next) else {
                    self.next = self.regs.len();
                    return Some(Err(PciError::Bar64AtLastSlot { index: slot }));
                };
                self.next += 1;
                let base = (high as u64) << 32 | bar_address(raw) as u64;
                return Some(Ok((slot, Bar::Mem64 { base, prefetchable })));
            }

            self.next = self.regs.len();
            return Some(Err(PciError::UnsupportedBarType { index: slot, raw }));
        }
        None
    }
}

// ============================================================================
// Configuration Space Access
// ============================================================================

/// Aligned dword access to one PCI function's configuration space.
///
/// Implementors provide the raw `read_aligned`/`write_aligned` pair; callers
/// use the checked and unaligned accessors.
pub trait ConfigSpace {
    /// Read the dword at `offset`, which the caller guarantees is a multiple of 4.
    fn read_aligned(&self, location: PciLocation, offset: u16) -> PciResult<u32>;

    /// Write the dword at `offset`, which the caller guarantees is a multiple of 4.
    fn write_aligned(&mut self, location: PciLocation, offset: u16, value: u32) -> PciResult<()>;

    fn read32(&self, location: PciLocation, offset: u16) -> PciResult<u32> {
        check_aligned(offset)?;
        self.read_aligned(location, offset)
    }

    fn write32(&mut self, location: PciLocation, offset: u16, value: u32) -> PciResult<()> {
        check_aligned(offset)?;
        self.write_aligned(location, offset, value)
    }

    /// Read 32 bits starting at any byte offset, splicing the two aligned
    /// windows that the value straddles.
    fn read_unaligned(&self, location: PciLocation, offset: u16) -> PciResult<u32> {
        let aligned = offset & !3;
        let shift = u32::from(offset & 3) * 8;
        check_in_space(aligned)?;
        if shift == 0 {
            return self.read_aligned(location, aligned);
        }
        let next = next_window(aligned)?;
        let lo = self.read_aligned(location, aligned)?;
        let hi = self.read_aligned(location, next)?;
        Ok(lo >> shift | hi << (32 - shift))
    }

    /// Write 32 bits starting at any byte offset. Both touched windows are
    /// read, modified and written back so bytes outside the target span keep
    /// their values.
    fn write_unaligned(&mut self, location: PciLocation, offset: u16, value: u32) -> PciResult<()> {
        let aligned = offset & !3;
        let shift = u32::from(offset & 3) * 8;
        check_in_space(aligned)?;
        if shift == 0 {
            return self.write_aligned(location, aligned, value);
        }
        let next = next_window(aligned)?;

        // Bytes of the low window below `offset` survive.
        let keep = u32::MAX >> (32 - shift);
        let lo = self.read_aligned(location, aligned)?;
        self.write_aligned(location, aligned, (lo & keep) | value << shift)?;
        let hi = self.read_aligned(location, next)?;
        self.write_aligned(location, next, (hi & !keep) | value >> (32 - shift))
    }
}

#[inline]
fn check_aligned(offset: u16) -> PciResult<()> {
    if offset & 3 != 0 {
        return Err(PciError::MisalignedOffset { offset });
    }
    check_in_space(offset)
}

#[inline]
fn check_in_space(offset: u16) -> PciResult<()> {
    if u32::from(offset) + 4 > config::SPACE_LEN {
        return Err(PciError::OffsetOutOfRange { offset });
    }
    Ok(())
}

#[inline]
fn next_window(aligned: u16) -> PciResult<u16> {
    let next = aligned + 4;
    check_in_space(next)?;
    Ok(next)
}

// ============================================================================
// BAR Mapping
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Caching disabled; the default for register windows.
    Uncached,
    /// Normal caching, only for prefetchable memory.
    Cached,
}

/// Maps physical ranges into the caller's address space.
pub trait MmioMapper {
    fn map(&mut self, phys: u64, size: usize, cache: CacheMode) -> PciResult<*mut u8>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedBar {
    pub virt: *mut u8,
    pub phys: u64,
}

/// Map `size` bytes of the memory window described by BAR `index` (and the
/// following register when the BAR is 64-bit).
///
/// Caching is disabled unless the BAR is prefetchable. Mapping failures are
/// propagated from `mapper`.
pub fn map_bar<C, M>(
    config: &C,
    mapper: &mut M,
    location: PciLocation,
    index: u8,
    size: usize,
) -> PciResult<MappedBar>
where
    C: ConfigSpace + ?Sized,
    M: MmioMapper + ?Sized,
{
    if usize::from(index) >= config::BAR_COUNT {
        return Err(PciError::InvalidBarIndex { index });
    }
    let offset = config::BAR0 + 4 * u16::from(index);
    let lo = config.read32(location, offset)?;
    let hi = if bar_is_mem64(lo) {
        if usize::from(index) + 1 >= config::BAR_COUNT {
            return Err(PciError::Bar64AtLastSlot { index });
        }
        config.read32(location, offset + 4)?
    } else {
        0
    };

    let phys = (hi as u64) << 32 | bar_address(lo) as u64;
    let cache = if bar_is_prefetchable(lo) {
        CacheMode::Cached
    } else {
        CacheMode::Uncached
    };
    let virt = mapper.map(phys, size, cache)?;
    Ok(MappedBar { virt, phys })
}
