//! PCI topology discovery for the switch family.
//!
//! Walks config space through the [`ConfigSpace`] seam, classifies functions
//! that belong to the Kelpie silicon, deduplicates chained appearances via
//! the secondary-bus ancestor walk, and admits surviving candidates into the
//! [`DeviceRegistry`].
//!
//! Scanning is read-only with respect to chip state; the only config-space
//! writes anywhere in discovery are the restore-after-probe BAR sizing
//! writes in [`crate::bar`].

use crate::bar;
use crate::device::SwitchDevice;
use crate::error::{FabricError, Result};
use crate::platform::{ConfigSpace, MapPhysical};
use kelpie_chip::pcie::{
    BRIDGE_HEADER_TYPE, KELPIE_VENDOR_ID, MAX_SCAN_BUS, SLOTS_PER_BUS, SWITCH_DEVICE_IDS,
};
use std::fmt;
use std::str::FromStr;

/// Config-space register byte offsets used by discovery.
pub(crate) mod offset {
    /// Vendor ID (low half) and device ID (high half).
    pub const VENDOR_DEVICE: u16 = 0x00;
    /// Primary/secondary/subordinate bus numbers (header type 1).
    pub const BUS_NUMBERS: u16 = 0x18;
}

/// Unique key for a PCI function; immutable once discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PciAddress {
    /// PCI segment (domain).
    pub segment: u16,
    /// Bus number.
    pub bus: u8,
    /// Device slot.
    pub device: u8,
    /// Function number.
    pub function: u8,
}

impl PciAddress {
    /// Construct an address.
    #[must_use]
    pub const fn new(segment: u16, bus: u8, device: u8, function: u8) -> Self {
        Self {
            segment,
            bus,
            device,
            function,
        }
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.segment, self.bus, self.device, self.function
        )
    }
}

impl FromStr for PciAddress {
    type Err = FabricError;

    /// Parse the `lspci` form `ssss:bb:dd.f` (segment optional).
    fn from_str(s: &str) -> Result<Self> {
        let bad = || FabricError::invalid_parameter(format!("malformed PCI address `{s}`"));

        let (rest, function) = s.rsplit_once('.').ok_or_else(bad)?;
        let mut parts = rest.rsplitn(3, ':');
        let device = parts.next().ok_or_else(bad)?;
        let bus = parts.next().ok_or_else(bad)?;
        let segment = parts.next().unwrap_or("0");

        Ok(Self {
            segment: u16::from_str_radix(segment, 16).map_err(|_| bad())?,
            bus: u8::from_str_radix(bus, 16).map_err(|_| bad())?,
            device: u8::from_str_radix(device, 16).map_err(|_| bad())?,
            function: u8::from_str_radix(function, 16).map_err(|_| bad())?,
        })
    }
}

/// A 256-byte config-space snapshot with typed views.
///
/// Read fresh on demand and never cached past a single operation — live
/// topology can change between operations.
#[derive(Debug, Clone)]
pub struct ConfigDwords {
    dwords: [u32; 64],
}

impl ConfigDwords {
    /// Fetch the full header from config space. Any failed read aborts the
    /// snapshot with `Failed`.
    pub fn fetch<C: ConfigSpace + ?Sized>(config: &C, address: PciAddress) -> Result<Self> {
        let mut dwords = [0u32; 64];
        for (i, slot) in dwords.iter_mut().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let off = (i * 4) as u16;
            *slot = config.read_dword(address, off).map_err(|e| {
                FabricError::failed(format!("config read {address} offset {off:#x}: {e}"))
            })?;
        }
        Ok(Self { dwords })
    }

    /// Raw dword view.
    #[must_use]
    pub fn dword(&self, index: usize) -> u32 {
        self.dwords[index]
    }

    /// Vendor ID.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn vendor_id(&self) -> u16 {
        (self.dwords[0] & 0xFFFF) as u16
    }

    /// Device ID.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn device_id(&self) -> u16 {
        (self.dwords[0] >> 16) as u16
    }

    /// Revision ID.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn revision(&self) -> u8 {
        (self.dwords[2] & 0xFF) as u8
    }

    /// Header type with the multifunction bit masked off.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn header_type(&self) -> u8 {
        ((self.dwords[3] >> 16) & 0x7F) as u8
    }

    /// Secondary bus number (meaningful for header type 1 only).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn secondary_bus(&self) -> u8 {
        ((self.dwords[6] >> 8) & 0xFF) as u8
    }
}

/// Probe dword 0 of a function, mapping the all-ones "not present" signal.
pub fn probe_ids<C: ConfigSpace + ?Sized>(
    config: &C,
    address: PciAddress,
) -> Result<(u16, u16)> {
    let id = config.read_dword(address, offset::VENDOR_DEVICE)?;
    #[allow(clippy::cast_possible_truncation)]
    let vendor = (id & 0xFFFF) as u16;
    if vendor == 0xFFFF {
        return Err(FabricError::NotPresent { address });
    }
    #[allow(clippy::cast_possible_truncation)]
    let device = (id >> 16) as u16;
    Ok((vendor, device))
}

/// Explicitly qualify a candidate function as a supported switch.
///
/// Returns the fresh snapshot on success. An unknown device ID is an
/// `Ignore` (skip); a non-bridge header type is a hard `Unsupported`.
pub fn qualify<C: ConfigSpace + ?Sized>(
    config: &C,
    address: PciAddress,
) -> Result<ConfigDwords> {
    let (vendor, device) = probe_ids(config, address)?;
    if vendor != KELPIE_VENDOR_ID {
        return Err(FabricError::ignore(format!(
            "foreign vendor {vendor:#06x} at {address}"
        )));
    }
    if !SWITCH_DEVICE_IDS.contains(&device) {
        return Err(FabricError::ignore(format!(
            "unknown Kelpie device {device:#06x} at {address}"
        )));
    }

    let snapshot = ConfigDwords::fetch(config, address)?;
    if snapshot.header_type() != BRIDGE_HEADER_TYPE {
        return Err(FabricError::unsupported(
            address,
            format!("header type {:#04x} is not a bridge", snapshot.header_type()),
        ));
    }
    Ok(snapshot)
}

/// Whether `candidate` is already reachable as a descendant of `admitted`.
///
/// Pure bounded walk over freshly-fetched secondary-bus numbers: from the
/// admitted device, follow secondary-bus links downward. A secondary equal
/// to the candidate's bus means the candidate is the same silicon seen again
/// (duplicate); a secondary of 0 means the root was reached without a
/// match. Descent must be bus-number monotonic, and the recursion depth is
/// capped at the bus count, so malformed or cyclic topologies terminate.
pub fn is_parent_found<C: ConfigSpace + ?Sized>(
    config: &C,
    admitted: PciAddress,
    candidate: PciAddress,
) -> bool {
    walk_secondary(config, admitted, candidate.bus, MAX_SCAN_BUS)
}

fn walk_secondary<C: ConfigSpace + ?Sized>(
    config: &C,
    current: PciAddress,
    candidate_bus: u8,
    depth: u8,
) -> bool {
    if depth == 0 {
        return false;
    }
    let Ok(dword) = config.read_dword(current, offset::BUS_NUMBERS) else {
        return false;
    };
    #[allow(clippy::cast_possible_truncation)]
    let secondary = ((dword >> 8) & 0xFF) as u8;

    if secondary == candidate_bus {
        return true;
    }
    if secondary == 0 || secondary <= current.bus {
        return false;
    }
    // The fabric's downstream function enumerates at slot 0 of its
    // secondary bus; continue the descent from there.
    walk_secondary(
        config,
        PciAddress::new(current.segment, secondary, 0, 0),
        candidate_bus,
        depth - 1,
    )
}

/// The explicitly-owned device table produced by a scan.
///
/// No process-wide singleton: callers hold the registry and hand out device
/// access themselves. One exclusive-owner lock per device is the required
/// discipline for bridge/SMP traffic; a scan may run concurrently with
/// operations on already-admitted devices since it only reads config space.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<SwitchDevice>,
}

impl DeviceRegistry {
    /// Discover every supported switch reachable through `config`.
    ///
    /// Per-device faults are logged and skipped so one bad device cannot
    /// abort a multi-device scan; the scan itself only fails if the platform
    /// seam is fundamentally broken (it currently never does).
    pub fn scan<C, M>(config: &C, mapper: &M) -> Result<Self>
    where
        C: ConfigSpace + ?Sized,
        M: MapPhysical + ?Sized,
    {
        let mut devices: Vec<SwitchDevice> = Vec::new();

        for bus in 0..MAX_SCAN_BUS {
            for slot in 0..SLOTS_PER_BUS {
                let address = PciAddress::new(0, bus, slot, 0);

                let (vendor, _device) = match probe_ids(config, address) {
                    Ok(ids) => ids,
                    Err(FabricError::NotPresent { .. }) => continue,
                    Err(e) => {
                        tracing::warn!(%address, error = %e, "config probe fault, skipping slot");
                        continue;
                    }
                };
                if vendor != KELPIE_VENDOR_ID {
                    continue;
                }

                let snapshot = match qualify(config, address) {
                    Ok(s) => s,
                    Err(e) if e.is_skippable() => {
                        tracing::debug!(%address, reason = %e, "candidate rejected");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(%address, error = %e, "qualify fault, skipping");
                        continue;
                    }
                };

                if devices
                    .iter()
                    .any(|d| is_parent_found(config, d.address(), address))
                {
                    tracing::debug!(%address, "already admitted via an ancestor, skipping");
                    continue;
                }

                let bars = match bar::probe_bars(config, mapper, address) {
                    Ok(bars) => bars,
                    Err(e) => {
                        tracing::warn!(%address, error = %e, "BAR probe failed, discarding");
                        continue;
                    }
                };
                if !bars.iter().any(|b| b.index() == 0 && b.is_mapped()) {
                    tracing::warn!(%address, "BAR0 not mapped, discarding candidate");
                    continue;
                }

                let device = SwitchDevice::new(address, &snapshot, bars);
                tracing::info!(
                    %address,
                    device_id = %format_args!("{:#06x}", device.device_id()),
                    variant = ?device.variant(),
                    "admitted switch"
                );
                devices.push(device);
            }
        }

        tracing::info!("discovered {} switch device(s)", devices.len());
        Ok(Self { devices })
    }

    /// Number of admitted devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Slice of all admitted devices, in scan order.
    #[must_use]
    pub fn devices(&self) -> &[SwitchDevice] {
        &self.devices
    }

    /// Device by table index.
    pub fn device(&self, index: usize) -> Result<&SwitchDevice> {
        self.devices.get(index).ok_or_else(|| {
            FabricError::invalid_parameter(format!(
                "device index {index} out of range (have {})",
                self.devices.len()
            ))
        })
    }

    /// Mutable device by table index (bridge operations need `&mut`).
    pub fn device_mut(&mut self, index: usize) -> Result<&mut SwitchDevice> {
        let count = self.devices.len();
        self.devices.get_mut(index).ok_or_else(|| {
            FabricError::invalid_parameter(format!(
                "device index {index} out of range (have {count})"
            ))
        })
    }
}
