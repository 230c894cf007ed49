//! UEFI implementations of the stage 1 collaborators, and the pass that
//! wires them together.

#[cfg(feature = "rom-files")]
pub mod files;
pub mod fv;
pub mod memory;
pub mod pci_io;

use log::{info, warn};
use uefi::table::{Boot, SystemTable};
use uefi::Handle;

use bootparm::handoff::IAC_LEN;
use bootparm::{HandoffPointer, IAC_ADDRESS};

use crate::acquire::{NoRoms, RomAcquirer, RomOverride, ROM_QUIRKS};
use crate::config::Stage1Config;
use crate::error::{BootError, BootResult};
use crate::{handoff, prepare_handoff};

/// Map a failed firmware call to [`BootError::Firmware`].
pub(crate) fn firmware<T>(op: &'static str) -> impl FnOnce(uefi::Error<T>) -> BootError
where
    T: core::fmt::Debug,
{
    move |e| BootError::firmware(op, e.status().0)
}

/// Discover PCI devices and their option ROMs, then publish the boot
/// parameter list in the IAC.
pub fn run(image: Handle, st: &SystemTable<Boot>, config: Stage1Config) -> BootResult<HandoffPointer> {
    let bt = st.boot_services();

    let mem = memory::reserve_base_memory(bt, &config)?;
    let (boot_time, run_time) = (mem.boot_time(), mem.run_time());

    #[cfg(feature = "rom-files")]
    let mut files = match files::RomFiles::open(bt, image, config.rom_dir) {
        Ok(files) => Some(files),
        Err(e) => {
            warn!(target: "optrom", "no ROM files: {}", e);
            None
        }
    };
    #[cfg(not(feature = "rom-files"))]
    let mut files: Option<NoRoms> = None;

    let mut no_files = NoRoms;
    let files: &mut dyn RomOverride = match files.as_mut() {
        Some(files) => files,
        None => &mut no_files,
    };
    let mut volumes = fv::FirmwareVolumes::new(bt, image);

    let mut acquirer = RomAcquirer {
        files,
        volumes: &mut volumes,
        legacy: &memory::LowMemory,
        boot_time: &boot_time,
        run_time: &run_time,
        quirks: ROM_QUIRKS,
        config,
    };

    let controllers = pci_io::controllers(bt, image)?;
    let (params, ptr) = prepare_handoff(
        controllers.into_iter().map(Ok),
        &mut acquirer,
        || memory::regions(bt),
        memory::acpi_root(st),
        &mem,
    )?;

    // SAFETY: the IAC is reserved for exactly this kind of handoff and is
    // identity mapped under boot services.
    let iac = unsafe { &mut *(IAC_ADDRESS as usize as *mut [u8; IAC_LEN]) };
    handoff::publish(iac, ptr);
    info!(target: "handoff", "{} records published via IAC @0x{:x}", params.len(), IAC_ADDRESS);
    Ok(ptr)
}
