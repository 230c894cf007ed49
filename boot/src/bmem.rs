//! Base memory (below 640 KiB) pools.
//!
//! One arena covers the conventional memory stage 1 reserved for stage 2.
//! Boot-time blocks grow upward from the floor and may be reclaimed by
//! stage 2 once it has consumed the boot parameters; run-time blocks grow
//! downward from the ceiling and stay resident. The two pools fail when they
//! would meet. Nothing is ever freed.
//!
//! ```text
//!   floor                                                    ceiling
//!   | boot-time ->              free               <- run-time |
//!              ^ boot_next                      ^ runtime_bottom
//! ```

use core::cell::Cell;
use core::fmt;
use core::num::NonZeroU16;
use core::slice;

use log::debug;

use bootparm::{real_mode_segment, BaseMemAvail, PARAGRAPH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Not enough room left between the two pools
    Exhausted { size: usize, align: usize },
    /// Alignment is not a power of two
    BadAlignment { align: usize },
    /// Address has no real mode segment
    NotAddressable { addr: u64 },
}

impl AllocError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exhausted { .. } => "base memory exhausted",
            Self::BadAlignment { .. } => "bad base memory alignment",
            Self::NotAddressable { .. } => "not addressable from real mode",
        }
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Exhausted { size, align } => {
                write!(f, "{} (0x{:x} bytes, align 0x{:x})", self.as_str(), size, align)
            }
            Self::BadAlignment { align } => write!(f, "{} (0x{:x})", self.as_str(), align),
            Self::NotAddressable { addr } => write!(f, "{} (@0x{:x})", self.as_str(), addr),
        }
    }
}

/// A block of base memory, addressable by stage 1 through `data` and by
/// stage 2 at physical `addr`.
#[derive(Debug)]
pub struct Block {
    pub addr: u64,
    pub data: &'static mut [u8],
}

impl Block {
    /// Real mode segment of the block.
    #[inline]
    pub fn segment(&self) -> Result<NonZeroU16, AllocError> {
        segment_of(self.addr)
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.addr + self.data.len() as u64
    }
}

/// Allocator handle passed to code that needs base memory.
pub trait MemoryPool {
    fn alloc(&self, size: usize, align: usize) -> Result<Block, AllocError>;
}

pub struct BaseMemory {
    /// `virtual = physical + offset`, wrapping.
    offset: usize,
    floor: u64,
    ceiling: u64,
    boot_next: Cell<u64>,
    runtime_bottom: Cell<u64>,
}

impl BaseMemory {
    /// Arena over physical `[floor, ceiling)`, reachable through `window`,
    /// which is where physical `window_phys` is mapped.
    ///
    /// # Safety
    /// The whole range must be mapped, writable and owned by the caller for
    /// the rest of the program.
    pub unsafe fn new(window: *mut u8, window_phys: u64, floor: u64, ceiling: u64) -> Self {
        let floor = align_up(floor, PARAGRAPH);
        let ceiling = ceiling & !(PARAGRAPH - 1);
        debug!(target: "bmem", "base memory @0x{:x}~@0x{:x}", floor, ceiling.saturating_sub(1));
        Self {
            offset: (window as usize).wrapping_sub(window_phys as usize),
            floor,
            ceiling: ceiling.max(floor),
            boot_next: Cell::new(floor),
            runtime_bottom: Cell::new(ceiling.max(floor)),
        }
    }

    /// Arena over identity-mapped physical memory.
    ///
    /// # Safety
    /// As for [`BaseMemory::new`].
    pub unsafe fn identity(floor: u64, ceiling: u64) -> Self {
        Self::new(floor as usize as *mut u8, floor, floor, ceiling)
    }

    pub fn boot_time(&self) -> BootTimePool<'_> {
        BootTimePool(self)
    }

    pub fn run_time(&self) -> RunTimePool<'_> {
        RunTimePool(self)
    }

    #[inline]
    pub fn floor(&self) -> u64 {
        self.floor
    }

    #[inline]
    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Bytes still available to either pool.
    pub fn free(&self) -> u64 {
        self.runtime_bottom.get() - self.boot_next.get()
    }

    /// True when physical `[addr, addr + len)` lies in conventional memory
    /// stage 2 can address, whether or not this arena manages it.
    pub fn is_below_ceiling(&self, addr: u64, len: usize) -> bool {
        addr.checked_add(len as u64).map_or(false, |end| end <= self.ceiling)
    }

    /// The "bMEM" record describing the arena as it stands.
    pub fn availability(&self) -> BaseMemAvail {
        let bot = align_up(self.boot_next.get(), PARAGRAPH);
        BaseMemAvail {
            boottime_bot_seg: (bot / PARAGRAPH) as u16,
            runtime_top_seg: (self.runtime_bottom.get() / PARAGRAPH) as u16,
        }
    }

    /// Read back bytes already handed out.
    #[cfg(test)]
    pub(crate) fn peek(&self, addr: u64, len: usize) -> &[u8] {
        let ptr = self.offset.wrapping_add(addr as usize) as *const u8;
        // SAFETY: test arenas are leaked host buffers covering [0, ceiling).
        unsafe { slice::from_raw_parts(ptr, len) }
    }

    fn carve(&self, addr: u64, size: usize) -> Block {
        let ptr = self.offset.wrapping_add(addr as usize) as *mut u8;
        // SAFETY: [addr, addr + size) lies inside the arena and is handed out
        // exactly once; the arena's owner guaranteed it is mapped.
        let data = unsafe { slice::from_raw_parts_mut(ptr, size) };
        Block { addr, data }
    }

    fn alloc_boot_time(&self, size: usize, align: usize) -> Result<Block, AllocError> {
        let align = check_align(align)?;
        let exhausted = AllocError::Exhausted { size, align: align as usize };
        let addr = align_up(self.boot_next.get(), align);
        let end = addr.checked_add(size as u64).ok_or(exhausted)?;
        if end > self.runtime_bottom.get() {
            return Err(exhausted);
        }
        self.boot_next.set(end);
        debug!(target: "bmem", "boot time: 0x{:x} bytes @0x{:x}", size, addr);
        Ok(self.carve(addr, size))
    }

    fn alloc_run_time(&self, size: usize, align: usize) -> Result<Block, AllocError> {
        let align = check_align(align)?;
        let exhausted = AllocError::Exhausted { size, align: align as usize };
        let top = self.runtime_bottom.get();
        let addr = top.checked_sub(size as u64).ok_or(exhausted)? & !(align - 1);
        if addr < self.boot_next.get() {
            return Err(exhausted);
        }
        self.runtime_bottom.set(addr);
        debug!(target: "bmem", "run time: 0x{:x} bytes @0x{:x}", size, addr);
        Ok(self.carve(addr, size))
    }
}

/// Blocks stage 2 may reclaim after reading the boot parameters.
#[derive(Clone, Copy)]
pub struct BootTimePool<'a>(&'a BaseMemory);

/// Blocks that stay resident for stage 2's lifetime.
#[derive(Clone, Copy)]
pub struct RunTimePool<'a>(&'a BaseMemory);

impl MemoryPool for BootTimePool<'_> {
    fn alloc(&self, size: usize, align: usize) -> Result<Block, AllocError> {
        self.0.alloc_boot_time(size, align)
    }
}

impl MemoryPool for RunTimePool<'_> {
    fn alloc(&self, size: usize, align: usize) -> Result<Block, AllocError> {
        self.0.alloc_run_time(size, align)
    }
}

/// Nonzero real mode segment for a paragraph-aligned address below 1 MiB.
pub fn segment_of(addr: u64) -> Result<NonZeroU16, AllocError> {
    real_mode_segment(addr)
        .and_then(NonZeroU16::new)
        .ok_or(AllocError::NotAddressable { addr })
}

/// Every block must start on a paragraph so it has a real mode segment.
fn check_align(align: usize) -> Result<u64, AllocError> {
    if !align.is_power_of_two() {
        return Err(AllocError::BadAlignment { align });
    }
    Ok((align as u64).max(PARAGRAPH))
}

#[inline]
const fn align_up(addr: u64, align: u64) -> u64 {
    (addr + align - 1) & !(align - 1)
}

#[cfg(test)]
pub(crate) mod testmem {
    use alloc::vec;

    use super::BaseMemory;

    /// A leaked host buffer standing in for physical `[0, ceiling)`.
    pub fn arena(floor: u64, ceiling: u64) -> BaseMemory {
        let window = vec![0u8; ceiling as usize].leak();
        // SAFETY: the buffer is leaked and covers physical [0, ceiling).
        unsafe { BaseMemory::new(window.as_mut_ptr(), 0, floor, ceiling) }
    }
}
