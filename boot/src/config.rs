//! Compile-time stage 1 settings.
//!
//! Stage 1 reads no configuration files; everything tunable lives here and in
//! the crate's Cargo features (`logging`, `rom-files`).

/// 512-byte unit used by option ROM size fields.
pub const HKIBYTE: usize = 512;
pub const KIBYTE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage1Config {
    /// Lowest base-memory address stage 1 may hand out. Everything below it
    /// belongs to the interrupt vector table, the BIOS data area and the IAC.
    pub base_memory_floor: u64,
    /// End of conventional memory; option ROM images must live below this.
    pub base_memory_ceiling: u64,
    /// Directory on the boot volume holding pre-supplied ROM images.
    pub rom_dir: &'static str,
    /// Alignment for relocated images that need no runtime split.
    pub rom_copy_align: usize,
    /// Alignment for boot-time images that do have a separate runtime
    /// footprint, and for that footprint.
    pub rom_split_align: usize,
}

impl Stage1Config {
    pub const DEFAULT: Stage1Config = Stage1Config {
        base_memory_floor: 0x500,
        base_memory_ceiling: 0xa_0000,
        rom_dir: "\\EFI\\ROMS",
        rom_copy_align: 2 * KIBYTE,
        rom_split_align: HKIBYTE,
    };
}

impl Default for Stage1Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}
