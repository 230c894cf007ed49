//! PCI configuration mechanism #1 (ports 0xCF8/0xCFC).
//!
//! Only segment 0 and the first 256 bytes of each function are reachable
//! this way, which is all stage 2 needs to re-derive BARs for the devices
//! stage 1 recorded.

use bootparm::pci::{ConfigSpace, PciError, PciResult};
use bootparm::{PciDevice, PciLocation};

#[cfg(target_arch = "x86_64")]
use spin::Mutex;
#[cfg(target_arch = "x86_64")]
use x86_64::instructions::port::{Port, PortWriteOnly};

pub const CONFIG_ADDRESS: u16 = 0xcf8;
pub const CONFIG_DATA: u16 = 0xcfc;
/// Bytes of configuration space per function reachable through the ports.
pub const LEGACY_SPACE_LEN: u16 = 0x100;

const ENABLE: u32 = 1 << 31;

/// Value for CONFIG_ADDRESS selecting the dword at `offset`.
pub fn config_address(location: PciLocation, offset: u16) -> PciResult<u32> {
    if location.segment() != 0 {
        return Err(PciError::UnreachableSegment { segment: location.segment() });
    }
    if offset >= LEGACY_SPACE_LEN {
        return Err(PciError::OffsetOutOfRange { offset });
    }
    Ok(ENABLE
        | u32::from(location.bus()) << 16
        | u32::from(location.device()) << 11
        | u32::from(location.function()) << 8
        | u32::from(offset & 0xfc))
}

#[cfg(target_arch = "x86_64")]
struct Ports {
    address: PortWriteOnly<u32>,
    data: Port<u32>,
}

/// The address/data port pair, serialized so an address write is always
/// followed by its own data access.
#[cfg(target_arch = "x86_64")]
pub struct PortConfigSpace {
    ports: Mutex<Ports>,
}

#[cfg(target_arch = "x86_64")]
impl PortConfigSpace {
    /// # Safety
    /// The caller must own the configuration ports; no other code may use
    /// them while this value exists.
    pub const unsafe fn new() -> Self {
        Self {
            ports: Mutex::new(Ports {
                address: PortWriteOnly::new(CONFIG_ADDRESS),
                data: Port::new(CONFIG_DATA),
            }),
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl ConfigSpace for PortConfigSpace {
    fn read_aligned(&self, location: PciLocation, offset: u16) -> PciResult<u32> {
        let address = config_address(location, offset)?;
        let mut ports = self.ports.lock();
        // SAFETY: the ports are owned by this value (see `new`).
        unsafe {
            ports.address.write(address);
            Ok(ports.data.read())
        }
    }

    fn write_aligned(&mut self, location: PciLocation, offset: u16, value: u32) -> PciResult<()> {
        let address = config_address(location, offset)?;
        let ports = self.ports.get_mut();
        // SAFETY: as above.
        unsafe {
            ports.address.write(address);
            ports.data.write(value);
        }
        Ok(())
    }
}

/// A recorded device whose configuration space stage 2 can reach again.
pub struct Function<'a, C: ConfigSpace + ?Sized> {
    pub config: &'a C,
    pub record: PciDevice,
}

impl<'a, C: ConfigSpace + ?Sized> Function<'a, C> {
    pub fn new(config: &'a C, record: PciDevice) -> Self {
        Self { config, record }
    }

    /// True when the function still answers with the id stage 1 saw.
    pub fn is_present(&self) -> PciResult<bool> {
        let raw = self.config.read32(self.record.location, bootparm::pci::config::VENDOR_ID)?;
        Ok(raw == self.record.id.raw())
    }

    /// Raw BAR registers 0-5.
    pub fn bar_registers(&self) -> PciResult<[u32; bootparm::pci::config::BAR_COUNT]> {
        let mut regs = [0u32; bootparm::pci::config::BAR_COUNT];
        for (i, reg) in regs.iter_mut().enumerate() {
            let offset = bootparm::pci::config::BAR0 + 4 * i as u16;
            *reg = self.config.read32(self.record.location, offset)?;
        }
        Ok(regs)
    }
}
