//! Boot parameter list assembly and publication.
//!
//! After the PCI pass, stage 1 appends what stage 2 needs to know about the
//! machine (memory map, ACPI root), lays the whole list out in a boot-time
//! base memory block and leaves its head pointer in the IAC.
//!
//! The "bMEM" record is appended last, after the list's own block has been
//! carved, so the boot-time bottom it reports covers the list too.

use alloc::vec::Vec;

use log::{debug, info};

use bootparm::handoff::IAC_LEN;
use bootparm::param::NODE_ALIGN;
use bootparm::{
    AcpiRoot, BaseMemAvail, BootParam, BootParams, HandoffPointer, MemoryRegion,
    MemoryRegionType,
};

use crate::bmem::{AllocError, BaseMemory, MemoryPool};
use crate::error::BootResult;

/// Raw `EFI_MEMORY_TYPE` values.
pub mod efi_memory_type {
    pub const RESERVED: u32 = 0;
    pub const LOADER_CODE: u32 = 1;
    pub const LOADER_DATA: u32 = 2;
    pub const BOOT_SERVICES_CODE: u32 = 3;
    pub const BOOT_SERVICES_DATA: u32 = 4;
    pub const RUNTIME_SERVICES_CODE: u32 = 5;
    pub const RUNTIME_SERVICES_DATA: u32 = 6;
    pub const CONVENTIONAL: u32 = 7;
    pub const UNUSABLE: u32 = 8;
    pub const ACPI_RECLAIM: u32 = 9;
    pub const ACPI_NON_VOLATILE: u32 = 10;
    pub const MMIO: u32 = 11;
    pub const MMIO_PORT_SPACE: u32 = 12;
    pub const PAL_CODE: u32 = 13;
    pub const PERSISTENT_MEMORY: u32 = 14;
}

/// How stage 2 may treat memory of a given firmware type.
///
/// Loader allocations stay reserved: they hold stage 1's own pages, the base
/// memory arena (described separately by "bMEM") and this list.
pub const fn region_type(efi_type: u32) -> MemoryRegionType {
    use efi_memory_type::*;
    match efi_type {
        CONVENTIONAL | BOOT_SERVICES_CODE | BOOT_SERVICES_DATA => MemoryRegionType::Usable,
        ACPI_RECLAIM => MemoryRegionType::AcpiReclaimable,
        ACPI_NON_VOLATILE => MemoryRegionType::AcpiNvs,
        MMIO | MMIO_PORT_SPACE => MemoryRegionType::Mmio,
        UNUSABLE => MemoryRegionType::BadMemory,
        _ => MemoryRegionType::Reserved,
    }
}

/// Sort regions by address and merge neighbours of the same type.
pub fn coalesce<I>(regions: I) -> Vec<MemoryRegion>
where
    I: IntoIterator<Item = MemoryRegion>,
{
    let mut sorted: Vec<MemoryRegion> = regions.into_iter().filter(|r| r.len != 0).collect();
    sorted.sort_unstable_by_key(|r| r.start);

    let mut out: Vec<MemoryRegion> = Vec::with_capacity(sorted.len());
    for region in sorted {
        match out.last_mut() {
            Some(last) if last.abuts(&region) => last.len += region.len,
            _ => out.push(region),
        }
    }
    out
}

/// Prefer the ACPI 2.0 XSDP over an ACPI 1.0 RSDP.
pub fn acpi_root(acpi2: Option<u64>, acpi1: Option<u64>) -> Option<AcpiRoot> {
    match (acpi2, acpi1) {
        (Some(address), _) => Some(AcpiRoot { address, revision: 2 }),
        (None, Some(address)) => Some(AcpiRoot { address, revision: 0 }),
        (None, None) => None,
    }
}

/// Append the machine description that follows the PCI records.
pub fn describe_machine<I>(params: &mut BootParams, regions: I, acpi: Option<AcpiRoot>)
where
    I: IntoIterator<Item = MemoryRegion>,
{
    let regions = coalesce(regions);
    debug!(target: "handoff", "{} memory regions after coalescing", regions.len());
    for region in regions {
        params.push(BootParam::MemoryRegion(region));
    }
    match acpi {
        Some(root) => {
            debug!(target: "handoff", "ACPI {} root @0x{:x}", root.revision, root.address);
            params.push(BootParam::AcpiRoot(root));
        }
        None => debug!(target: "handoff", "no ACPI root table"),
    }
}

/// Lay the list out in boot-time base memory, appending "bMEM" last.
pub fn assemble(params: &mut BootParams, mem: &BaseMemory) -> BootResult<HandoffPointer> {
    let bmem_len = BootParam::BaseMemory(BaseMemAvail { boottime_bot_seg: 0, runtime_top_seg: 0 })
        .encoded_len();
    let needed = params.encoded_len() + bmem_len;
    let block = mem.boot_time().alloc(needed, NODE_ALIGN)?;

    let avail = mem.availability();
    params.push(BootParam::BaseMemory(avail));

    let len = params.encode(block.addr, block.data)?;
    let head = u32::try_from(block.addr).map_err(|_| AllocError::NotAddressable { addr: block.addr })?;

    info!(
        target: "handoff",
        "{} boot parameters, 0x{:x} bytes @0x{:x}; boot time below seg 0x{:04x}, run time below seg 0x{:04x}",
        params.len(),
        len,
        head,
        avail.boottime_bot_seg,
        avail.runtime_top_seg
    );
    Ok(HandoffPointer { head, len: len as u32 })
}

/// Store the head pointer in the IAC.
pub fn publish(iac: &mut [u8; IAC_LEN], ptr: HandoffPointer) {
    *iac = ptr.to_bytes();
}
