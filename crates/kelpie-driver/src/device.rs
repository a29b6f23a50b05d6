//! Switch device handle.

use crate::bar::BarRegion;
use crate::bridge::RegisterBridge;
use crate::error::{FabricError, Result};
use crate::topology::{ConfigDwords, PciAddress};
use kelpie_chip::pcie::SwitchVariant;

/// An admitted switch: its address, identity, and owned BAR regions.
///
/// Register-bridge traffic goes through `&mut self`, which is the required
/// serialization discipline — the bridge's address/data/control registers
/// are chip-global shared state with no per-caller isolation. Callers
/// needing cross-thread access wrap the handle in their own exclusive-owner
/// lock held for a whole transaction.
#[derive(Debug)]
pub struct SwitchDevice {
    address: PciAddress,
    vendor_id: u16,
    device_id: u16,
    revision: u8,
    variant: SwitchVariant,
    bars: Vec<BarRegion>,
}

impl SwitchDevice {
    pub(crate) fn new(address: PciAddress, snapshot: &ConfigDwords, bars: Vec<BarRegion>) -> Self {
        Self {
            address,
            vendor_id: snapshot.vendor_id(),
            device_id: snapshot.device_id(),
            revision: snapshot.revision(),
            variant: SwitchVariant::from_device_id(snapshot.device_id()),
            bars,
        }
    }

    /// Config-space address this device was admitted at.
    #[must_use]
    pub fn address(&self) -> PciAddress {
        self.address
    }

    /// PCI vendor ID.
    #[must_use]
    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    /// PCI device ID.
    #[must_use]
    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    /// Silicon revision.
    #[must_use]
    pub fn revision(&self) -> u8 {
        self.revision
    }

    /// Identified switch variant.
    #[must_use]
    pub fn variant(&self) -> SwitchVariant {
        self.variant
    }

    /// The device's BAR regions, in slot order.
    #[must_use]
    pub fn bars(&self) -> &[BarRegion] {
        &self.bars
    }

    /// BAR region by slot index.
    #[must_use]
    pub fn bar(&self, index: usize) -> Option<&BarRegion> {
        self.bars.iter().find(|b| b.index() == index)
    }

    /// Read a chip-space register through the Chime-to-AXI bridge.
    pub fn chime_read_register(&mut self, address: u32) -> Result<u32> {
        let window = self.bar0_window()?;
        RegisterBridge::new(window).read(address)
    }

    /// Write a chip-space register through the Chime-to-AXI bridge.
    pub fn chime_write_register(&mut self, address: u32, value: u32) -> Result<()> {
        let window = self.bar0_window()?;
        RegisterBridge::new(window).write(address, value)
    }

    fn bar0_window(&mut self) -> Result<&mut (dyn crate::platform::RegisterWindow + 'static)> {
        let pci = self.address;
        self.bars
            .iter_mut()
            .find(|b| b.index() == 0)
            .and_then(BarRegion::window_mut)
            .ok_or_else(|| FabricError::failed(format!("{pci}: BAR0 is not mapped")))
    }
}
