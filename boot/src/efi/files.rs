//! Pre-supplied option ROM images on the boot volume.
//!
//! `\EFI\ROMS\VVVVDDDD.ROM` (vendor and device id in upper-case hex) is
//! handed to stage 2 exactly as read, without validation.

use alloc::format;
use alloc::vec;
use alloc::vec::Vec;

use log::{debug, warn};
use uefi::proto::media::file::{Directory, File, FileAttribute, FileInfo, FileMode};
use uefi::table::boot::BootServices;
use uefi::{CStr16, Handle};

use bootparm::PciId;

use super::firmware;
use crate::acquire::{RomOverride, RomSource};
use crate::error::BootResult;

/// Largest image a device could ever map: 16 MiB of expansion ROM BAR.
const MAX_ROM_FILE: u64 = 16 * 1024 * 1024;

pub struct RomFiles {
    root: Directory,
    dir: &'static str,
    current: Option<Vec<u8>>,
}

impl RomFiles {
    /// Open the file system stage 1 itself was loaded from.
    pub fn open(bt: &BootServices, image: Handle, dir: &'static str) -> BootResult<Self> {
        let mut fs = bt
            .get_image_file_system(image)
            .map_err(firmware("open boot file system"))?;
        let root = fs.open_volume().map_err(firmware("open boot volume"))?;
        Ok(Self { root, dir, current: None })
    }

    fn read(&mut self, id: PciId) -> Option<Vec<u8>> {
        let path = format!("{}\\{:04X}{:04X}.ROM", self.dir, id.vendor(), id.device());
        let mut buf = [0u16; 64];
        let name = CStr16::from_str_with_buf(&path, &mut buf).ok()?;

        let handle = self.root.open(name, FileMode::Read, FileAttribute::empty()).ok()?;
        let mut file = handle.into_regular_file()?;
        let size = match file.get_boxed_info::<FileInfo>() {
            Ok(info) => info.file_size(),
            Err(e) => {
                warn!(target: "optrom", "    {}: cannot stat ({:?})", path, e.status());
                return None;
            }
        };
        if size == 0 || size > MAX_ROM_FILE {
            warn!(target: "optrom", "    {}: unusable size 0x{:x}", path, size);
            return None;
        }

        let mut data = vec![0u8; size as usize];
        match file.read(&mut data) {
            Ok(n) if n == data.len() => {
                debug!(target: "optrom", "    {}: 0x{:x} bytes", path, n);
                Some(data)
            }
            Ok(n) => {
                warn!(target: "optrom", "    {}: short read (0x{:x} of 0x{:x})", path, n, size);
                None
            }
            Err(e) => {
                warn!(target: "optrom", "    {}: read failed ({:?})", path, e.status());
                None
            }
        }
    }
}

impl RomOverride for RomFiles {
    fn rom_for(&mut self, id: PciId) -> Option<RomSource<'_>> {
        self.current = self.read(id);
        let data = self.current.as_deref()?;
        Some(RomSource::new(data.as_ptr() as u64, data))
    }
}
