#![cfg_attr(target_os = "uefi", no_std)]
#![cfg_attr(target_os = "uefi", no_main)]

#[cfg(not(target_os = "uefi"))]
fn main() {}

#[cfg(target_os = "uefi")]
use log::{error, info};
#[cfg(target_os = "uefi")]
use stage1::{efi, BootError, Stage1Config};
#[cfg(target_os = "uefi")]
use uefi::prelude::*;

/// Entry point for UEFI firmware
#[cfg(target_os = "uefi")]
#[entry]
fn efi_main(image: Handle, mut st: SystemTable<Boot>) -> Status {
    if uefi_services::init(&mut st).is_err() {
        return Status::LOAD_ERROR;
    }
    info!(target: "boot", "stage 1 v{}", env!("CARGO_PKG_VERSION"));

    match efi::run(image, &st, Stage1Config::DEFAULT) {
        Ok(ptr) => {
            info!(target: "boot", "boot parameters @0x{:x} (0x{:x} bytes), handing over", ptr.head, ptr.len);
            Status::SUCCESS
        }
        Err(e) => fatal(e),
    }
}

/// Stage 2 must not run on a half-described machine.
#[cfg(target_os = "uefi")]
fn fatal(e: BootError) -> Status {
    if e.is_policy() {
        error!(target: "boot", "{}", e);
    } else {
        error!(target: "boot", "fatal: {}", e);
    }
    match e {
        BootError::Firmware { status, .. } => Status(status),
        _ => Status::LOAD_ERROR,
    }
}
