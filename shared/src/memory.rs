/// Physical memory range as reported to stage 2.
///
/// Mirrors a UEFI memory descriptor but stays firmware agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u64,
    pub len: u64,
    pub ty: MemoryRegionType,
}

impl MemoryRegion {
    #[inline]
    pub const fn end(&self) -> u64 {
        self.start.saturating_add(self.len)
    }

    /// True when `next` starts exactly where `self` ends and has the same type.
    #[inline]
    pub fn abuts(&self, next: &MemoryRegion) -> bool {
        self.ty == next.ty && self.end() == next.start
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionType {
    Usable = 1,
    Reserved = 2,
    AcpiReclaimable = 3,
    AcpiNvs = 4,
    Mmio = 5,
    BadMemory = 0xFFFF_FFFF,
}

impl MemoryRegionType {
    /// Decode a wire value. Kinds this build does not know are reported as
    /// reserved so stage 2 never hands them out.
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Usable,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::Mmio,
            0xFFFF_FFFF => Self::BadMemory,
            _ => Self::Reserved,
        }
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self as u32
    }
}
