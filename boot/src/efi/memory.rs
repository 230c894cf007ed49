//! Physical memory as the firmware reports it.

use alloc::vec::Vec;
use core::slice;

use log::{debug, info};
use uefi::table::boot::{AllocateType, BootServices, MemoryDescriptor, MemoryType};
use uefi::table::cfg::{ACPI2_GUID, ACPI_GUID};
use uefi::table::{Boot, SystemTable};

use bootparm::{AcpiRoot, MemoryRegion};

use super::firmware;
use crate::acquire::LegacyMemory;
use crate::bmem::BaseMemory;
use crate::config::Stage1Config;
use crate::error::{BootError, BootResult};
use crate::handoff;

const PAGE_SIZE: u64 = 4096;
const LEGACY_LIMIT: u64 = 0x10_0000;

/// Copy of the current memory map.
fn descriptors(bt: &BootServices) -> BootResult<Vec<MemoryDescriptor>> {
    let sizes = bt.memory_map_size();
    // Room for the descriptors our own pool allocation may add.
    let len = sizes.map_size + 8 * sizes.entry_size;
    let buf = bt
        .allocate_pool(MemoryType::LOADER_DATA, len)
        .map_err(firmware("allocate memory map buffer"))?;
    // SAFETY: freshly allocated pool memory of `len` bytes, 8-byte aligned.
    let bytes = unsafe { slice::from_raw_parts_mut(buf, len) };
    let result = bt
        .memory_map(bytes)
        .map(|map| map.entries().copied().collect())
        .map_err(firmware("get memory map"));
    // SAFETY: `buf` came from `allocate_pool` and nothing borrows it any more.
    let _ = unsafe { bt.free_pool(buf) };
    result
}

/// Claim the largest free conventional range below the base memory ceiling
/// and wrap it in an arena.
pub fn reserve_base_memory(bt: &BootServices, config: &Stage1Config) -> BootResult<BaseMemory> {
    let floor = config.base_memory_floor;
    let ceiling = config.base_memory_ceiling;

    let best = descriptors(bt)?
        .iter()
        .filter(|d| d.ty == MemoryType::CONVENTIONAL)
        .filter_map(|d| {
            let start = d.phys_start.max(floor & !(PAGE_SIZE - 1));
            let end = (d.phys_start + d.page_count * PAGE_SIZE).min(ceiling);
            (end > start).then_some((start, end))
        })
        .max_by_key(|&(start, end)| end - start);

    let Some((start, end)) = best else {
        return Err(BootError::firmware("find free base memory", uefi::Status::OUT_OF_RESOURCES.0));
    };
    let pages = ((end - start) / PAGE_SIZE) as usize;
    bt.allocate_pages(AllocateType::Address(start), MemoryType::LOADER_DATA, pages)
        .map_err(firmware("reserve base memory"))?;
    info!(target: "bmem", "reserved base memory @0x{:x}~@0x{:x}", start, end - 1);

    // SAFETY: the pages are ours now and identity mapped under boot services.
    Ok(unsafe { BaseMemory::identity(start.max(floor), end) })
}

/// The memory map in the firmware-neutral form stage 2 consumes.
pub fn regions(bt: &BootServices) -> BootResult<Vec<MemoryRegion>> {
    let map = descriptors(bt)?;
    debug!(target: "handoff", "{} firmware memory descriptors", map.len());
    Ok(map
        .iter()
        .map(|d| MemoryRegion {
            start: d.phys_start,
            len: d.page_count * PAGE_SIZE,
            ty: handoff::region_type(d.ty.0),
        })
        .collect())
}

pub fn acpi_root(st: &SystemTable<Boot>) -> Option<AcpiRoot> {
    let find = |guid| {
        st.config_table()
            .iter()
            .find(|entry| entry.guid == guid)
            .map(|entry| entry.address as u64)
    };
    handoff::acpi_root(find(ACPI2_GUID), find(ACPI_GUID))
}

/// Direct reads of identity-mapped memory below 1 MiB.
pub struct LowMemory;

impl LegacyMemory for LowMemory {
    fn read(&self, addr: u64, len: usize) -> Option<&[u8]> {
        let end = addr.checked_add(len as u64)?;
        if addr == 0 || end > LEGACY_LIMIT {
            return None;
        }
        // SAFETY: the legacy area is always mapped and readable under boot
        // services; its content is only inspected.
        Some(unsafe { slice::from_raw_parts(addr as usize as *const u8, len) })
    }
}
