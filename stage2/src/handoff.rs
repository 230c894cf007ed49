//! Reading back what stage 1 left behind.
//!
//! The IAC holds the list head and length; the list itself is walked with
//! the size-skip rule so records from a newer stage 1 are stepped over.

use core::fmt;
use core::ops::Range;
use core::slice;

use log::{debug, info};
use spin::Once;

use bootparm::handoff::IAC_LEN;
use bootparm::{
    segment_address, AcpiRoot, BaseMemAvail, BootParam, BootParams, HandoffPointer,
    MemoryRegion, PciDevice, WalkError, IAC_ADDRESS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffError {
    /// The IAC holds no list
    Missing,
    /// The list is inconsistent
    Walk(WalkError),
    /// A required record is absent
    NoBaseMemory,
}

impl HandoffError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "no boot parameters from stage 1",
            Self::Walk(_) => "corrupt boot parameter list",
            Self::NoBaseMemory => "no base memory record",
        }
    }
}

impl fmt::Display for HandoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Walk(e) => write!(f, "{}: {}", self.as_str(), e),
            _ => f.write_str(self.as_str()),
        }
    }
}

impl From<WalkError> for HandoffError {
    fn from(e: WalkError) -> Self {
        HandoffError::Walk(e)
    }
}

/// Everything stage 2 learned from stage 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage2Params {
    pointer: HandoffPointer,
    params: BootParams,
    base_memory: BaseMemAvail,
}

impl Stage2Params {
    /// Decode the list `bytes`, which live at physical `pointer.head`.
    pub fn parse(pointer: HandoffPointer, bytes: &[u8]) -> Result<Self, HandoffError> {
        if pointer.is_empty() {
            return Err(HandoffError::Missing);
        }
        let params = BootParams::decode(bytes, u64::from(pointer.head))?;
        let base_memory = params
            .iter()
            .find_map(|p| match p {
                BootParam::BaseMemory(b) => Some(*b),
                _ => None,
            })
            .ok_or(HandoffError::NoBaseMemory)?;
        debug!(target: "handoff", "{} boot parameters @0x{:x}", params.len(), pointer.head);
        Ok(Self { pointer, params, base_memory })
    }

    pub fn params(&self) -> &BootParams {
        &self.params
    }

    pub fn pci_devices(&self) -> impl Iterator<Item = &PciDevice> + '_ {
        self.params.pci_devices()
    }

    /// The display controller stage 1 prepared: the first legacy video
    /// device that came with an option ROM.
    pub fn vga(&self) -> Option<&PciDevice> {
        self.pci_devices().find(|d| d.class.is_legacy_video() && d.rom.is_some())
    }

    pub fn memory_regions(&self) -> impl Iterator<Item = &MemoryRegion> + '_ {
        self.params.iter().filter_map(|p| match p {
            BootParam::MemoryRegion(r) => Some(r),
            _ => None,
        })
    }

    pub fn acpi_root(&self) -> Option<AcpiRoot> {
        self.params.iter().find_map(|p| match p {
            BootParam::AcpiRoot(r) => Some(*r),
            _ => None,
        })
    }

    pub fn base_memory(&self) -> BaseMemAvail {
        self.base_memory
    }

    /// Low memory stage 2 may reuse once it no longer needs the list.
    /// It covers the list itself.
    pub fn reclaimable(&self) -> Range<u64> {
        0..segment_address(self.base_memory.boottime_bot_seg)
    }

    /// Base memory that stays free at run time.
    pub fn run_time_free(&self) -> Range<u64> {
        let start = segment_address(self.base_memory.boottime_bot_seg);
        start..segment_address(self.base_memory.runtime_top_seg).max(start)
    }

    /// Physical range of the encoded list.
    pub fn list_range(&self) -> Range<u64> {
        let head = u64::from(self.pointer.head);
        head..head + u64::from(self.pointer.len)
    }
}

static PARAMS: Once<Stage2Params> = Once::new();

/// Read the IAC and decode the list it points to, once.
///
/// # Safety
/// Physical memory below 1 MiB must be identity mapped and still hold what
/// stage 1 wrote.
pub unsafe fn init_from_iac() -> Result<&'static Stage2Params, HandoffError> {
    if let Some(params) = PARAMS.get() {
        return Ok(params);
    }
    let iac = *(IAC_ADDRESS as usize as *const [u8; IAC_LEN]);
    let pointer = HandoffPointer::from_bytes(iac);
    if pointer.is_empty() {
        return Err(HandoffError::Missing);
    }
    let bytes = slice::from_raw_parts(pointer.head as usize as *const u8, pointer.len as usize);
    let parsed = Stage2Params::parse(pointer, bytes)?;
    let params = PARAMS.call_once(|| parsed);
    info!(
        target: "handoff",
        "{} PCI devices, VGA {}",
        params.pci_devices().count(),
        if params.vga().is_some() { "present" } else { "absent" }
    );
    Ok(params)
}

/// Parameters decoded by [`init_from_iac`], if it has run.
pub fn get() -> Option<&'static Stage2Params> {
    PARAMS.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootparm::{ClassCode, MemoryRegionType, PciId, PciLocation, RomPlacement};
    use core::num::NonZeroU16;
    use pretty_assertions::assert_eq;

    const HEAD: u64 = 0x500;

    fn seg(v: u16) -> NonZeroU16 {
        NonZeroU16::new(v).unwrap()
    }

    fn sample() -> BootParams {
        let mut params = BootParams::new();
        params.push(BootParam::PciDevice(PciDevice {
            location: PciLocation::new(0, 0, 1, 0),
            id: PciId::new(0x8086, 0x100e),
            class: ClassCode::from_raw(0x0200_0003),
            rom: None,
        }));
        params.push(BootParam::PciDevice(PciDevice {
            location: PciLocation::new(0, 0, 2, 0),
            id: PciId::new(0x1234, 0x1111),
            class: ClassCode::from_raw(0x0300_0002),
            rom: Some(RomPlacement { boot_seg: seg(0x9700), runtime_seg: seg(0x9700), size: 0x9000 }),
        }));
        params.push(BootParam::MemoryRegion(MemoryRegion {
            start: 0x10_0000,
            len: 0x7ff0_0000,
            ty: MemoryRegionType::Usable,
        }));
        params.push(BootParam::AcpiRoot(AcpiRoot { address: 0x7fbf_e014, revision: 2 }));
        params.push(BootParam::BaseMemory(BaseMemAvail { boottime_bot_seg: 0x60, runtime_top_seg: 0x9700 }));
        params
    }

    fn encoded(params: &BootParams) -> (HandoffPointer, alloc::vec::Vec<u8>) {
        let mut bytes = vec![0u8; params.encoded_len()];
        let len = params.encode(HEAD, &mut bytes).unwrap();
        (HandoffPointer { head: HEAD as u32, len: len as u32 }, bytes)
    }

    #[test]
    fn stage1_list_is_understood() {
        let (ptr, bytes) = encoded(&sample());
        let p = Stage2Params::parse(ptr, &bytes).unwrap();

        assert_eq!(p.pci_devices().count(), 2);
        assert_eq!(p.vga().unwrap().location, PciLocation::new(0, 0, 2, 0));
        assert_eq!(p.memory_regions().count(), 1);
        assert_eq!(p.acpi_root(), Some(AcpiRoot { address: 0x7fbf_e014, revision: 2 }));
        assert_eq!(p.reclaimable(), 0..0x600);
        assert_eq!(p.run_time_free(), 0x600..0x9_7000);
        assert_eq!(p.list_range(), 0x500..0x500 + bytes.len() as u64);
    }

    #[test]
    fn missing_or_incomplete_lists() {
        assert_eq!(Stage2Params::parse(HandoffPointer::default(), &[]), Err(HandoffError::Missing));

        let mut params = sample();
        let without_bmem = BootParams::decode(&encoded(&params).1, HEAD).unwrap();
        let mut trimmed = BootParams::new();
        for p in without_bmem.iter().filter(|p| !matches!(p, BootParam::BaseMemory(_))) {
            trimmed.push(*p);
        }
        let (ptr, bytes) = encoded(&trimmed);
        assert_eq!(Stage2Params::parse(ptr, &bytes), Err(HandoffError::NoBaseMemory));

        params.push(BootParam::AcpiRoot(AcpiRoot { address: 0, revision: 0 }));
        let (ptr, mut bytes) = encoded(&params);
        bytes.truncate(bytes.len() - 8);
        assert!(matches!(Stage2Params::parse(ptr, &bytes), Err(HandoffError::Walk(_))));
    }
}
