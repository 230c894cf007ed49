//! PCI device enumeration.
//!
//! Walks every PCI controller firmware reports, records each general device
//! in the boot parameter list together with its relocated option ROM, turns
//! on legacy VGA decoding for the first display controller that can use it,
//! and checks every device's BARs.

use alloc::string::String;
use core::fmt::Write;

use bitflags::bitflags;
use log::{info, warn};

use bootparm::pci::{bars, config};
use bootparm::{BootParam, BootParams, ClassCode, PciDevice, PciId, PciLocation};

use crate::acquire::{RomAcquirer, RomSource};
use crate::error::{BootError, BootResult};

bitflags! {
    /// `EFI_PCI_IO_PROTOCOL` attribute bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PciAttributes: u64 {
        const ISA_MOTHERBOARD_IO   = 0x0000_0001;
        const ISA_IO               = 0x0000_0002;
        const VGA_PALETTE_IO       = 0x0000_0004;
        const VGA_MEMORY           = 0x0000_0008;
        const VGA_IO               = 0x0000_0010;
        const IDE_PRIMARY_IO       = 0x0000_0020;
        const IDE_SECONDARY_IO     = 0x0000_0040;
        const MEMORY_WRITE_COMBINE = 0x0000_0080;
        const IO                   = 0x0000_0100;
        const MEMORY               = 0x0000_0200;
        const BUS_MASTER           = 0x0000_0400;
        const MEMORY_CACHED        = 0x0000_0800;
        const MEMORY_DISABLE       = 0x0000_1000;
        const EMBEDDED_DEVICE      = 0x0000_2000;
        const EMBEDDED_ROM         = 0x0000_4000;
        const DUAL_ADDRESS_CYCLE   = 0x0000_8000;
        const ISA_IO_16            = 0x0001_0000;
        const VGA_PALETTE_IO_16    = 0x0002_0000;
        const VGA_IO_16            = 0x0004_0000;
    }
}

/// One PCI function as firmware exposes it.
pub trait PciController {
    fn location(&self) -> BootResult<PciLocation>;
    fn attributes(&self) -> BootResult<PciAttributes>;
    fn supported_attributes(&self) -> BootResult<PciAttributes>;
    fn enable_attributes(&mut self, attrs: PciAttributes) -> BootResult<()>;
    /// Read `out.len()` dwords of configuration space starting at `offset`.
    fn read_config(&self, offset: u16, out: &mut [u32]) -> BootResult<()>;
    /// The device's own option ROM as firmware read it, if any.
    fn rom_image(&self) -> Option<RomSource<'_>>;
}

impl<T: PciController + ?Sized> PciController for &mut T {
    fn location(&self) -> BootResult<PciLocation> {
        (**self).location()
    }

    fn attributes(&self) -> BootResult<PciAttributes> {
        (**self).attributes()
    }

    fn supported_attributes(&self) -> BootResult<PciAttributes> {
        (**self).supported_attributes()
    }

    fn enable_attributes(&mut self, attrs: PciAttributes) -> BootResult<()> {
        (**self).enable_attributes(attrs)
    }

    fn read_config(&self, offset: u16, out: &mut [u32]) -> BootResult<()> {
        (**self).read_config(offset, out)
    }

    fn rom_image(&self) -> Option<RomSource<'_>> {
        (**self).rom_image()
    }
}

/// Outcome of a successful enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciSummary {
    /// The display controller stage 2 will drive through its option ROM.
    pub vga: PciLocation,
    pub controllers: usize,
    pub recorded: usize,
    pub with_rom: usize,
}

/// Per-controller result, before the policy check.
struct Processed {
    recorded: bool,
    has_rom: bool,
    video: bool,
    vga_enabled: bool,
}

/// Enumerate `controllers`, appending one "PCID" record per general device.
///
/// Firmware failures abort immediately. After the walk it is an error for no
/// display controller to have come up with an option ROM and legacy decoding.
pub fn process_pci<C, I>(
    controllers: I,
    acquirer: &mut RomAcquirer<'_>,
    params: &mut BootParams,
) -> BootResult<PciSummary>
where
    C: PciController,
    I: IntoIterator<Item = BootResult<C>>,
{
    info!(target: "pci", "PCI devices:");
    info!(target: "pci", "  locn.        PCI id.   class+IF ROM sz.   supports  attrs.");

    let mut vga = None;
    let mut summary = PciSummary { vga: PciLocation::default(), controllers: 0, recorded: 0, with_rom: 0 };
    let mut video_seen = false;
    let mut video_with_rom = false;

    for controller in controllers {
        let mut controller = controller?;
        let location = controller.location()?;
        let done = process_one(&mut controller, location, vga.is_none(), acquirer, params)?;

        summary.controllers += 1;
        summary.recorded += usize::from(done.recorded);
        summary.with_rom += usize::from(done.has_rom);
        video_seen |= done.video;
        video_with_rom |= done.video && done.has_rom;
        if done.vga_enabled {
            vga = Some(location);
        }
    }

    match vga {
        Some(location) => {
            summary.vga = location;
            info!(target: "pci", "VGA controller: {}", location);
            Ok(summary)
        }
        None if video_seen && !video_with_rom => Err(BootError::VgaLacksOptionRom),
        None => Err(BootError::NoVgaController),
    }
}

fn process_one<C: PciController>(
    controller: &mut C,
    location: PciLocation,
    try_enable_vga: bool,
    acquirer: &mut RomAcquirer<'_>,
    params: &mut BootParams,
) -> BootResult<Processed> {
    let attrs = controller.attributes()?;
    let supports = controller.supported_attributes()?;

    let mut head = [0u32; 4];
    controller.read_config(config::VENDOR_ID, &mut head)?;
    let id = PciId::from_raw(head[0]);
    let class = ClassCode::from_raw(head[2]);
    let header_type = (head[3] >> 16) as u8;

    let rom_len = controller.rom_image().map_or(0, |r| r.bytes.len() as u64);
    info!(
        target: "pci",
        "  {} {} {:02x} {:02x} {:02x} {} {} {}{}",
        location,
        id,
        class.class(),
        class.subclass(),
        class.prog_if(),
        clipped(rom_len),
        clipped(supports.bits()),
        clipped(attrs.bits()),
        class.name().map_or(String::new(), |n| alloc::format!(" {}", n)),
    );

    let mut done = Processed {
        recorded: false,
        has_rom: false,
        video: class.is_legacy_video(),
        vga_enabled: false,
    };

    // Only general devices are recorded. Bit 7 is the multi-function flag.
    if header_type & 0x7f != 0 {
        return Ok(done);
    }

    let rom = acquirer.acquire(id, class, controller.rom_image()).map(|(placement, origin)| {
        info!(target: "pci", "    ROM img. from {}, 0x{:x} bytes", origin, placement.size);
        placement
    });
    params.push(BootParam::PciDevice(PciDevice { location, id, class, rom }));
    done.recorded = true;
    done.has_rom = rom.is_some();

    if done.has_rom && try_enable_vga {
        if let Some(enabled) = enable_legacy_vga(controller, class, attrs, supports) {
            done.vga_enabled = true;
            info!(target: "pci", "    attrs. now 0x{:x}", (attrs | enabled).bits());
        }
    }

    let mut regs = [0u32; config::BAR_COUNT];
    controller.read_config(config::BAR0, &mut regs)?;
    report_bars(&regs)?;

    Ok(done)
}

/// Turn on legacy VGA memory and I/O decoding.
///
/// Only two combinations are accepted: memory + I/O, or memory + 16-bit I/O
/// (with or without the plain I/O bit). Returns the bits that were newly
/// enabled (possibly none) or `None` when the device cannot be made a legacy
/// VGA device.
pub fn enable_legacy_vga<C: PciController + ?Sized>(
    controller: &mut C,
    class: ClassCode,
    attrs: PciAttributes,
    supports: PciAttributes,
) -> Option<PciAttributes> {
    use PciAttributes as A;

    if !class.is_legacy_video() {
        return None;
    }
    let vga_bits = A::VGA_MEMORY | A::VGA_IO | A::VGA_IO_16;
    let mem_io = A::VGA_MEMORY | A::VGA_IO;
    let mem_io16 = A::VGA_MEMORY | A::VGA_IO_16;

    let offered = supports & vga_bits;
    let enables = if offered == mem_io {
        mem_io
    } else if offered == mem_io16 || offered == vga_bits {
        mem_io16
    } else {
        return None;
    };

    if attrs.contains(enables) {
        return Some(A::empty());
    }
    match controller.enable_attributes(enables) {
        Ok(()) => Some(enables),
        Err(e) => {
            warn!(target: "pci", "    cannot enable legacy VGA decoding: {}", e);
            None
        }
    }
}

/// Validate the BAR window, and report it when the `logging` feature is on.
fn report_bars(regs: &[u32]) -> BootResult<()> {
    let mut line = String::new();
    for entry in bars(regs) {
        let (_index, bar) = entry?;
        // Formatting into a String cannot fail.
        let _ = write!(line, " {}", bar);
    }
    if cfg!(feature = "logging") && !line.is_empty() {
        info!(target: "pci", "    BAR:{}", line);
    }
    Ok(())
}

/// Hex value clipped to 24 bits, `+` marking that higher bits were set.
fn clipped(v: u64) -> String {
    let mark = if v > 0xff_ffff { '+' } else { ' ' };
    alloc::format!("0x{:06x}{}", v & 0xff_ffff, mark)
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::acquire::fakes::FileTable;
    use crate::acquire::{NoRoms, ROM_QUIRKS};
    use crate::bmem::testmem::arena;
    use crate::config::Stage1Config;
    use crate::optrom::testrom::{PcirSpec, RomBuilder};
    use bootparm::PciError;
    use pretty_assertions::assert_eq;

    const STATUS_DEVICE_ERROR: usize = 0x8000_0000_0000_0007;

    struct FakeController {
        location: PciLocation,
        config: [u32; 16],
        attrs: PciAttributes,
        supports: PciAttributes,
        enable_fails: bool,
        enable_calls: Vec<PciAttributes>,
        rom: Option<Vec<u8>>,
        config_fails: bool,
    }

    impl FakeController {
        fn new(dev: u8, id: PciId, class: u32) -> Self {
            let mut config = [0u32; 16];
            config[0] = id.raw();
            config[2] = class;
            Self {
                location: PciLocation::new(0, 0, dev, 0),
                config,
                attrs: PciAttributes::IO | PciAttributes::MEMORY,
                supports: PciAttributes::all(),
                enable_fails: false,
                enable_calls: Vec::new(),
                rom: None,
                config_fails: false,
            }
        }

        fn vga(dev: u8) -> Self {
            let mut c = Self::new(dev, PciId::new(0x1234, 0x1111), 0x0300_0002);
            c.supports = PciAttributes::VGA_MEMORY | PciAttributes::VGA_IO | PciAttributes::IO;
            c.rom = Some(RomBuilder::with_pcir(8, PcirSpec::vga(0x1234, 0x1111, 8)).build());
            c.config[4] = 0xfd00_0008;
            c.config[6] = 0xfebf_0000;
            c
        }
    }

    impl PciController for FakeController {
        fn location(&self) -> BootResult<PciLocation> {
            Ok(self.location)
        }

        fn attributes(&self) -> BootResult<PciAttributes> {
            Ok(self.attrs)
        }

        fn supported_attributes(&self) -> BootResult<PciAttributes> {
            Ok(self.supports)
        }

        fn enable_attributes(&mut self, attrs: PciAttributes) -> BootResult<()> {
            self.enable_calls.push(attrs);
            if self.enable_fails {
                return Err(BootError::firmware("enable attributes", STATUS_DEVICE_ERROR));
            }
            self.attrs |= attrs;
            Ok(())
        }

        fn read_config(&self, offset: u16, out: &mut [u32]) -> BootResult<()> {
            if self.config_fails {
                return Err(BootError::firmware("read config", STATUS_DEVICE_ERROR));
            }
            let start = usize::from(offset / 4);
            out.copy_from_slice(&self.config[start..start + out.len()]);
            Ok(())
        }

        fn rom_image(&self) -> Option<RomSource<'_>> {
            self.rom.as_deref().map(|bytes| RomSource::new(0xfd10_0000, bytes))
        }
    }

    fn run(controllers: &mut [FakeController]) -> (BootResult<PciSummary>, BootParams) {
        let mem = arena(0x500, 0xa_0000);
        let (boot, rt) = (mem.boot_time(), mem.run_time());
        let (mut files, mut volumes) = (FileTable::default(), FileTable::default());
        let mut acquirer = RomAcquirer {
            files: &mut files,
            volumes: &mut volumes,
            legacy: &NoRoms,
            boot_time: &boot,
            run_time: &rt,
            quirks: ROM_QUIRKS,
            config: Stage1Config::DEFAULT,
        };
        let mut params = BootParams::new();
        let result = process_pci(controllers.iter_mut().map(Ok), &mut acquirer, &mut params);
        (result, params)
    }

    #[test]
    fn vga_with_rom_is_recorded_and_enabled() {
        let nic = FakeController::new(3, PciId::new(0x8086, 0x100e), 0x0200_0003);
        let mut controllers = [FakeController::vga(2), nic];
        let (result, params) = run(&mut controllers);

        let summary = result.unwrap();
        assert_eq!(summary.vga, PciLocation::new(0, 0, 2, 0));
        assert_eq!((summary.controllers, summary.recorded, summary.with_rom), (2, 2, 1));
        assert_eq!(
            controllers[0].enable_calls,
            [PciAttributes::VGA_MEMORY | PciAttributes::VGA_IO]
        );

        let devices: Vec<_> = params.pci_devices().copied().collect();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].class.raw(), 0x0300_0002);
        assert!(devices[0].rom.is_some());
        // Scenario A: no source at all leaves the zero-segment state.
        assert_eq!(devices[1].rom, None);
    }

    #[test]
    fn vga_io16_combination_is_chosen() {
        let mut vga = FakeController::vga(2);
        vga.supports = PciAttributes::VGA_MEMORY | PciAttributes::VGA_IO | PciAttributes::VGA_IO_16;
        let mut controllers = [vga];
        let (result, _) = run(&mut controllers);
        assert!(result.is_ok());
        assert_eq!(
            controllers[0].enable_calls,
            [PciAttributes::VGA_MEMORY | PciAttributes::VGA_IO_16]
        );
    }

    #[test]
    fn already_enabled_vga_needs_no_call() {
        let mut vga = FakeController::vga(2);
        vga.attrs |= PciAttributes::VGA_MEMORY | PciAttributes::VGA_IO;
        let mut controllers = [vga];
        let (result, _) = run(&mut controllers);
        assert!(result.is_ok());
        assert!(controllers[0].enable_calls.is_empty());
    }

    #[test]
    fn vga_enabling_moves_on_after_failure() {
        let mut first = FakeController::vga(2);
        first.enable_fails = true;
        let second = FakeController::vga(5);
        let mut controllers = [first, second];
        let (result, _) = run(&mut controllers);
        assert_eq!(result.unwrap().vga, PciLocation::new(0, 0, 5, 0));
        assert_eq!(controllers[1].enable_calls.len(), 1);
    }

    #[test]
    fn only_the_first_capable_vga_is_enabled() {
        let mut controllers = [FakeController::vga(2), FakeController::vga(5)];
        let (result, _) = run(&mut controllers);
        assert_eq!(result.unwrap().vga, PciLocation::new(0, 0, 2, 0));
        assert!(controllers[1].enable_calls.is_empty());
    }

    #[test]
    fn unsupported_vga_combination_is_not_enabled() {
        let mut vga = FakeController::vga(2);
        vga.supports = PciAttributes::VGA_IO | PciAttributes::VGA_IO_16;
        let mut controllers = [vga];
        let (result, _) = run(&mut controllers);
        assert_eq!(result.unwrap_err(), BootError::NoVgaController);
        assert!(controllers[0].enable_calls.is_empty());
    }

    #[test]
    fn no_video_device_is_fatal() {
        let mut controllers = [FakeController::new(3, PciId::new(0x8086, 0x100e), 0x0200_0003)];
        let (result, params) = run(&mut controllers);
        let err = result.unwrap_err();
        assert_eq!(err, BootError::NoVgaController);
        assert!(err.is_policy());
        // The record itself was still built.
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn video_without_rom_is_fatal() {
        let mut vga = FakeController::vga(2);
        vga.rom = None;
        let mut controllers = [vga];
        let (result, params) = run(&mut controllers);
        assert_eq!(result.unwrap_err(), BootError::VgaLacksOptionRom);
        assert_eq!(params.pci_devices().next().unwrap().rom, None);
    }

    #[test]
    fn non_general_headers_are_skipped() {
        let mut bridge = FakeController::new(1, PciId::new(0x8086, 0x2448), 0x0604_0000);
        bridge.config[3] = 0x0001_0000;
        let mut controllers = [bridge, FakeController::vga(2)];
        let (result, params) = run(&mut controllers);
        let summary = result.unwrap();
        assert_eq!((summary.controllers, summary.recorded), (2, 1));
        assert_eq!(params.pci_devices().next().unwrap().location, PciLocation::new(0, 0, 2, 0));
    }

    #[test]
    fn multi_function_display_is_recorded() {
        let mut gpu = FakeController::vga(2);
        gpu.config[3] = 0x0080_0000;
        let mut controllers = [gpu];
        let (result, params) = run(&mut controllers);
        let summary = result.unwrap();
        assert_eq!((summary.recorded, summary.with_rom), (1, 1));
        assert!(params.pci_devices().next().unwrap().rom.is_some());
    }

    #[test]
    fn bogus_64bit_bar_is_fatal() {
        let mut vga = FakeController::vga(2);
        vga.config[4 + 5] = 0xfe00_000c;
        let mut controllers = [vga];
        let (result, _) = run(&mut controllers);
        assert_eq!(result.unwrap_err(), BootError::Pci(PciError::Bar64AtLastSlot { index: 5 }));
    }

    #[test]
    fn firmware_failure_aborts() {
        let mut vga = FakeController::vga(2);
        vga.config_fails = true;
        let mut controllers = [vga];
        let (result, params) = run(&mut controllers);
        let err = result.unwrap_err();
        assert!(matches!(err, BootError::Firmware { .. }));
        assert!(!err.is_policy());
        assert!(params.is_empty());
    }

    #[test]
    fn attribute_clipping() {
        assert_eq!(clipped(0x8000), "0x008000 ");
        assert_eq!(clipped(0x1_0000_0000_0010), "0x000010+");
    }
}
