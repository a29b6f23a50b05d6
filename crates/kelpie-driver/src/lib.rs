//! Userspace access library for Kelpie KLP36xx storage-fabric switches.
//!
//! Three layers, peers at the bottom:
//!
//! ```text
//! DeviceRegistry::scan ── config-space walk, classification, dedup
//!        │
//!        ├── BAR probe/size/map (restore-after-probe, BAR0 load-bearing)
//!        │
//!        ├── RegisterBridge ── indirect chip-register access via BAR0 FSM,
//!        │                     with the documented BAR0-aperture fallback
//!        │
//!        └── SmpChannel ────── expander firmware over a caller-supplied
//!                              SCSI passthrough (independent of the bridge)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use kelpie_driver::{DeviceRegistry, DevMem, SysfsConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SysfsConfig::new();
//! let mapper = DevMem::new();
//! let mut registry = DeviceRegistry::scan(&config, &mapper)?;
//!
//! for dev in registry.devices() {
//!     println!("{} — {:?} rev {}", dev.address(), dev.variant(), dev.revision());
//! }
//!
//! let dev = registry.device_mut(0)?;
//! let id = dev.chime_read_register(0x0000_0000)?;
//! println!("chip id register: {id:#010x}");
//! # Ok(())
//! # }
//! ```
//!
//! All components are synchronous and blocking; the register bridge's two
//! bounded poll loops are the only wait points. Serialize bridge and SMP
//! traffic per device (the `&mut` APIs enforce this in-process); a scan may
//! run concurrently with operations on already-admitted devices.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod bar;
pub mod bridge;
mod device;
mod error;
pub mod platform;
pub mod smp;
pub mod topology;

/// Silicon constants (re-exported from kelpie-chip).
pub mod chip {
    pub use kelpie_chip::pcie::{
        device_id, SwitchVariant, KELPIE_VENDOR_ID, MAX_SCAN_BUS, SWITCH_DEVICE_IDS,
    };
    pub use kelpie_chip::regs::{Bar0Window, BAR0_WINDOWS, IGNORED_REGISTERS};
    pub use kelpie_chip::smp::{AttachedDeviceType, LinkRate, PhyOperation};
}

pub use bar::{probe_bars, BarRegion, MappedBar};
pub use bridge::RegisterBridge;
pub use device::SwitchDevice;
pub use error::{FabricError, Result};
pub use platform::{ConfigSpace, DevMem, MapPhysical, RegisterWindow, SysfsConfig};
pub use smp::{
    swap_dwords, Discover, PhyErrorLog, ReportGeneral, SelfConfigDescriptor, SelfConfigStatus,
    SmpChannel, SmpTransport,
};
pub use topology::{is_parent_found, qualify, ConfigDwords, DeviceRegistry, PciAddress};

/// Commonly used types.
pub mod prelude {
    pub use crate::chip::{LinkRate, PhyOperation, SwitchVariant};
    pub use crate::{
        ConfigSpace, DeviceRegistry, FabricError, MapPhysical, PciAddress, RegisterWindow, Result,
        SmpChannel, SmpTransport, SwitchDevice,
    };
}
