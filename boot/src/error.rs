//! Stage 1 failure classes.
//!
//! Malformed ROM bytes never show up here: the validator absorbs them as
//! "no image" and acquisition moves on to the next source. Allocation
//! failures are absorbed per device. What remains is fatal to the boot.

use core::fmt;

use bootparm::{EncodeError, PciError};

use crate::bmem::AllocError;

/// Raw firmware status word (`EFI_STATUS`).
pub type FirmwareStatus = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// A firmware service call failed; nothing discovered after it can be trusted.
    Firmware { op: &'static str, status: FirmwareStatus },
    /// No display controller of a video class came up with an option ROM.
    NoVgaController,
    /// A display controller was found but none of them yielded an option ROM.
    VgaLacksOptionRom,
    /// Configuration space reported something that cannot be a valid device.
    Pci(PciError),
    /// The parameter list could not be laid out in its handoff block.
    Handoff(EncodeError),
    /// Base memory could not hold the parameter list itself.
    BaseMemory(AllocError),
}

impl BootError {
    pub const fn firmware(op: &'static str, status: FirmwareStatus) -> Self {
        BootError::Firmware { op, status }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Firmware { .. } => "firmware call failed",
            Self::NoVgaController => "no usable VGA/XGA controller",
            Self::VgaLacksOptionRom => "VGA/XGA device lacks option ROM",
            Self::Pci(_) => "bad PCI configuration",
            Self::Handoff(_) => "cannot encode boot parameters",
            Self::BaseMemory(_) => "out of base memory for boot parameters",
        }
    }

    /// Policy violations are reported apart from firmware failures.
    pub const fn is_policy(&self) -> bool {
        matches!(self, Self::NoVgaController | Self::VgaLacksOptionRom)
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Firmware { op, status } => {
                write!(f, "{}: {} (status 0x{:x})", self.as_str(), op, status)
            }
            Self::Pci(e) => write!(f, "{}: {}", self.as_str(), e),
            Self::Handoff(e) => write!(f, "{}: {}", self.as_str(), e),
            Self::BaseMemory(e) => write!(f, "{}: {}", self.as_str(), e),
            _ => f.write_str(self.as_str()),
        }
    }
}

impl From<PciError> for BootError {
    fn from(e: PciError) -> Self {
        BootError::Pci(e)
    }
}

impl From<EncodeError> for BootError {
    fn from(e: EncodeError) -> Self {
        BootError::Handoff(e)
    }
}

impl From<AllocError> for BootError {
    fn from(e: AllocError) -> Self {
        BootError::BaseMemory(e)
    }
}

pub type BootResult<T> = Result<T, BootError>;
