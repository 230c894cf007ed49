//! Option ROM images embedded in firmware volumes.
//!
//! Platform firmware often carries the ROM of on-board video as a raw
//! section of some firmware file. Every raw section of every file is read
//! once, the ones that validate as PC-AT option ROMs are kept, and lookups
//! match against that index.

use alloc::vec::Vec;
use core::ffi::c_void;
use core::ptr;
use core::slice;

use log::debug;
use uefi::proto::unsafe_protocol;
use uefi::table::boot::{BootServices, OpenProtocolAttributes, OpenProtocolParams, SearchType};
use uefi::{Guid, Handle, Identify, Status};

use bootparm::{ClassCode, PciId};

use crate::acquire::{RomLookup, RomSource};
use crate::optrom::{find_descriptor, RomDescriptor};

const FV_FILETYPE_ALL: u8 = 0x00;
const SECTION_RAW: u8 = 0x19;
const MAX_KEY_SIZE: usize = 64;

type Unused = *const c_void;

/// `EFI_FIRMWARE_VOLUME2_PROTOCOL`
#[repr(C)]
#[unsafe_protocol("220e73b6-6bdb-4413-8405-b974b108619a")]
pub struct FirmwareVolume2 {
    get_volume_attributes: Unused,
    set_volume_attributes: Unused,
    read_file: Unused,
    read_section: unsafe extern "efiapi" fn(
        this: *const FirmwareVolume2,
        name: *const Guid,
        section_type: u8,
        instance: usize,
        buffer: *mut *mut c_void,
        buffer_size: *mut usize,
        auth_status: *mut u32,
    ) -> Status,
    write_file: Unused,
    get_next_file: unsafe extern "efiapi" fn(
        this: *const FirmwareVolume2,
        key: *mut c_void,
        file_type: *mut u8,
        name: *mut Guid,
        attributes: *mut u32,
        size: *mut usize,
    ) -> Status,
    key_size: u32,
    parent_handle: Unused,
    get_info: Unused,
    set_info: Unused,
}

impl FirmwareVolume2 {
    /// Names of all files in the volume.
    fn file_names(&self) -> Vec<Guid> {
        let mut names = Vec::new();
        let key_size = self.key_size as usize;
        if key_size > MAX_KEY_SIZE {
            debug!(target: "optrom", "firmware volume key too large (0x{:x})", key_size);
            return names;
        }
        let mut key = [0u8; MAX_KEY_SIZE];
        loop {
            let mut file_type = FV_FILETYPE_ALL;
            let mut name = Guid::from_bytes([0; 16]);
            let (mut attrs, mut size) = (0u32, 0usize);
            // SAFETY: all out pointers are valid locals; the key buffer is at
            // least `key_size` bytes and starts zeroed.
            let status = unsafe {
                (self.get_next_file)(
                    self,
                    key.as_mut_ptr().cast(),
                    &mut file_type,
                    &mut name,
                    &mut attrs,
                    &mut size,
                )
            };
            if status.is_error() {
                return names;
            }
            names.push(name);
        }
    }

    /// First raw section of a file, in pool memory owned by the caller.
    fn raw_section(&self, name: &Guid) -> Option<(*mut u8, usize)> {
        let mut buffer: *mut c_void = ptr::null_mut();
        let mut size = 0usize;
        let mut auth = 0u32;
        // SAFETY: a null buffer asks the volume to allocate one.
        let status = unsafe {
            (self.read_section)(self, name, SECTION_RAW, 0, &mut buffer, &mut size, &mut auth)
        };
        if status.is_error() || buffer.is_null() {
            return None;
        }
        Some((buffer.cast(), size))
    }
}

struct IndexedRom {
    bytes: &'static [u8],
    desc: RomDescriptor,
}

pub struct FirmwareVolumes<'a> {
    bt: &'a BootServices,
    image: Handle,
    index: Option<Vec<IndexedRom>>,
}

impl<'a> FirmwareVolumes<'a> {
    pub fn new(bt: &'a BootServices, image: Handle) -> Self {
        Self { bt, image, index: None }
    }

    fn build_index(&self) -> Vec<IndexedRom> {
        let mut roms = Vec::new();
        let Ok(handles) = self.bt.locate_handle_buffer(SearchType::ByProtocol(&FirmwareVolume2::GUID)) else {
            debug!(target: "optrom", "no firmware volumes");
            return roms;
        };

        for &handle in handles.iter() {
            // SAFETY: read-only use of the volume.
            let fv = unsafe {
                self.bt.open_protocol::<FirmwareVolume2>(
                    OpenProtocolParams { handle, agent: self.image, controller: None },
                    OpenProtocolAttributes::GetProtocol,
                )
            };
            let Ok(fv) = fv else { continue };

            for name in fv.file_names() {
                let Some((buf, size)) = fv.raw_section(&name) else { continue };
                // SAFETY: the volume returned `size` bytes at `buf`.
                let bytes: &'static [u8] = unsafe { slice::from_raw_parts(buf, size) };
                match find_descriptor(bytes).filter(RomDescriptor::is_pc_at) {
                    Some(desc) => {
                        debug!(target: "optrom", "firmware volume ROM {} class 0x{:08x} in file {}", desc.id, desc.class.raw(), name);
                        roms.push(IndexedRom { bytes, desc });
                    }
                    None => {
                        // SAFETY: pool buffer from ReadSection, not kept.
                        let _ = unsafe { self.bt.free_pool(buf) };
                    }
                }
            }
        }
        roms
    }
}

impl RomLookup for FirmwareVolumes<'_> {
    fn find_rom(&mut self, id: PciId, class: ClassCode) -> Option<RomSource<'_>> {
        if self.index.is_none() {
            self.index = Some(self.build_index());
        }
        let index = self.index.as_ref()?;
        index
            .iter()
            .find(|rom| {
                rom.desc.class.class_if() == class.class_if()
                    && rom.desc.supports_device(&rom.bytes[..rom.desc.image_len], id)
            })
            .map(|rom| RomSource::new(rom.bytes.as_ptr() as u64, rom.bytes))
    }
}
