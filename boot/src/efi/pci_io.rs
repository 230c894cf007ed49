//! `EFI_PCI_IO_PROTOCOL` as a [`PciController`].

use alloc::vec::Vec;
use core::ffi::c_void;
use core::ptr;
use core::slice;

use r_efi::base::Status as RawStatus;
use r_efi::protocols::pci_io;
use uefi::proto::unsafe_protocol;
use uefi::table::boot::{
    BootServices, OpenProtocolAttributes, OpenProtocolParams, ScopedProtocol, SearchType,
};
use uefi::{Handle, Identify};

use bootparm::PciLocation;

use super::firmware;
use crate::acquire::RomSource;
use crate::enumerate::{PciAttributes, PciController};
use crate::error::{BootError, BootResult};

#[repr(transparent)]
#[unsafe_protocol("4cf5b200-68b8-4ca5-9eec-b23e3f50029a")]
pub struct PciIo(pci_io::Protocol);

impl PciIo {
    fn protocol_mut(&self) -> *mut pci_io::Protocol {
        self as *const _ as *mut pci_io::Protocol
    }

    fn attributes_op(&self, op: pci_io::AttributeOperation, attrs: u64) -> Result<u64, RawStatus> {
        let mut result: pci_io::Attribute = 0;
        let out = if op == pci_io::ATTRIBUTE_OPERATION_GET || op == pci_io::ATTRIBUTE_OPERATION_SUPPORTED {
            &mut result as *mut pci_io::Attribute
        } else {
            ptr::null_mut()
        };
        let status = unsafe { (self.0.attributes)(self.protocol_mut(), op, attrs, out) };
        if status.is_error() {
            Err(status)
        } else {
            Ok(result)
        }
    }
}

/// Every PCI controller the firmware has bound, in handle order.
pub fn controllers<'a>(
    bt: &'a BootServices,
    image: Handle,
) -> BootResult<Vec<EfiPciController<'a>>> {
    let handles = bt
        .locate_handle_buffer(SearchType::ByProtocol(&PciIo::GUID))
        .map_err(firmware("locate PCI I/O handles"))?;

    let mut out = Vec::with_capacity(handles.len());
    for &handle in handles.iter() {
        // SAFETY: the protocol is only read and its attributes changed; no
        // driver is displaced.
        let proto = unsafe {
            bt.open_protocol::<PciIo>(
                OpenProtocolParams { handle, agent: image, controller: None },
                OpenProtocolAttributes::GetProtocol,
            )
        }
        .map_err(firmware("open PCI I/O protocol"))?;
        out.push(EfiPciController { proto });
    }
    Ok(out)
}

pub struct EfiPciController<'a> {
    proto: ScopedProtocol<'a, PciIo>,
}

impl PciController for EfiPciController<'_> {
    fn location(&self) -> BootResult<PciLocation> {
        let io: &PciIo = &self.proto;
        let (mut seg, mut bus, mut dev, mut func) = (0usize, 0usize, 0usize, 0usize);
        let status = unsafe {
            (io.0.get_location)(io.protocol_mut(), &mut seg, &mut bus, &mut dev, &mut func)
        };
        if status.is_error() {
            return Err(BootError::firmware("get PCI location", status.as_usize()));
        }
        Ok(PciLocation::new(seg as u16, bus as u8, dev as u8, func as u8))
    }

    fn attributes(&self) -> BootResult<PciAttributes> {
        self.proto
            .attributes_op(pci_io::ATTRIBUTE_OPERATION_GET, 0)
            .map(PciAttributes::from_bits_retain)
            .map_err(|s| BootError::firmware("get PCI attributes", s.as_usize()))
    }

    fn supported_attributes(&self) -> BootResult<PciAttributes> {
        self.proto
            .attributes_op(pci_io::ATTRIBUTE_OPERATION_SUPPORTED, 0)
            .map(PciAttributes::from_bits_retain)
            .map_err(|s| BootError::firmware("get supported PCI attributes", s.as_usize()))
    }

    fn enable_attributes(&mut self, attrs: PciAttributes) -> BootResult<()> {
        self.proto
            .attributes_op(pci_io::ATTRIBUTE_OPERATION_ENABLE, attrs.bits())
            .map(drop)
            .map_err(|s| BootError::firmware("enable PCI attributes", s.as_usize()))
    }

    fn read_config(&self, offset: u16, out: &mut [u32]) -> BootResult<()> {
        let io: &PciIo = &self.proto;
        let status = unsafe {
            (io.0.pci.read)(
                io.protocol_mut(),
                pci_io::WIDTH_UINT32,
                u32::from(offset),
                out.len(),
                out.as_mut_ptr().cast::<c_void>(),
            )
        };
        if status.is_error() {
            return Err(BootError::firmware("read PCI configuration", status.as_usize()));
        }
        Ok(())
    }

    fn rom_image(&self) -> Option<RomSource<'_>> {
        let io: &PciIo = &self.proto;
        if io.0.rom_image.is_null() || io.0.rom_size == 0 {
            return None;
        }
        // SAFETY: the PCI bus driver keeps the ROM copy alive while the
        // controller handle exists.
        let bytes = unsafe {
            slice::from_raw_parts(io.0.rom_image.cast::<u8>(), io.0.rom_size as usize)
        };
        Some(RomSource::new(io.0.rom_image as u64, bytes))
    }
}
