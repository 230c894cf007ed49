//! Page-table backed [`MmioMapper`] for PCI memory windows.
//!
//! BAR windows are mapped into a dedicated virtual range, bumping upward.
//! Non-prefetchable windows get `NO_CACHE | WRITE_THROUGH`; nothing mapped
//! here is executable.

use bootparm::pci::{CacheMode, MmioMapper, PciError, PciResult};

pub const PAGE_SIZE: u64 = 4096;

/// Where a physical window lands in the virtual range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Page-aligned physical start.
    pub phys_page: u64,
    /// Page-aligned virtual start.
    pub virt_page: u64,
    pub pages: u64,
    /// Virtual address of the first requested byte.
    pub virt: u64,
}

/// Place `[phys, phys + size)` at `next_virt`, which must be page aligned.
/// Returns `None` when the window would pass `limit`.
pub fn place(phys: u64, size: usize, next_virt: u64, limit: u64) -> Option<Placement> {
    if size == 0 {
        return None;
    }
    let phys_page = phys & !(PAGE_SIZE - 1);
    let end = phys.checked_add(size as u64)?;
    let pages = (end - phys_page + PAGE_SIZE - 1) / PAGE_SIZE;
    let virt_end = next_virt.checked_add(pages * PAGE_SIZE)?;
    if virt_end > limit {
        return None;
    }
    Some(Placement {
        phys_page,
        virt_page: next_virt,
        pages,
        virt: next_virt + (phys - phys_page),
    })
}

#[cfg(target_arch = "x86_64")]
pub use self::paging::PageMapper;

#[cfg(target_arch = "x86_64")]
mod paging {
    use log::debug;
    use x86_64::structures::paging::{
        FrameAllocator, Mapper, Page, PageTableFlags, PhysFrame, Size4KiB,
    };
    use x86_64::{PhysAddr, VirtAddr};

    use super::*;

    pub struct PageMapper<M, A> {
        mapper: M,
        frames: A,
        next_virt: u64,
        limit: u64,
    }

    impl<M, A> PageMapper<M, A>
    where
        M: Mapper<Size4KiB>,
        A: FrameAllocator<Size4KiB>,
    {
        /// Map windows into `[base, limit)`; `frames` feeds new page tables.
        pub fn new(mapper: M, frames: A, base: VirtAddr, limit: VirtAddr) -> Self {
            Self {
                mapper,
                frames,
                next_virt: base.align_up(PAGE_SIZE).as_u64(),
                limit: limit.as_u64(),
            }
        }
    }

    impl<M, A> MmioMapper for PageMapper<M, A>
    where
        M: Mapper<Size4KiB>,
        A: FrameAllocator<Size4KiB>,
    {
        fn map(&mut self, phys: u64, size: usize, cache: CacheMode) -> PciResult<*mut u8> {
            let failed = PciError::MapFailed { phys, size };
            let at = place(phys, size, self.next_virt, self.limit).ok_or(failed)?;

            let mut flags =
                PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::NO_EXECUTE;
            if cache == CacheMode::Uncached {
                flags |= PageTableFlags::NO_CACHE | PageTableFlags::WRITE_THROUGH;
            }

            for i in 0..at.pages {
                let page = Page::<Size4KiB>::containing_address(VirtAddr::new(at.virt_page + i * PAGE_SIZE));
                let frame = PhysFrame::containing_address(PhysAddr::new(at.phys_page + i * PAGE_SIZE));
                // SAFETY: the virtual range is reserved for this mapper and the
                // frame is device memory, not RAM anyone else owns.
                unsafe {
                    self.mapper
                        .map_to(page, frame, flags, &mut self.frames)
                        .map_err(|_| failed)?
                        .flush();
                }
            }
            self.next_virt = at.virt_page + at.pages * PAGE_SIZE;
            debug!(target: "pci", "mapped @0x{:x} (0x{:x} bytes) at 0x{:x}", phys, size, at.virt);
            Ok(at.virt as *mut u8)
        }
    }
}
