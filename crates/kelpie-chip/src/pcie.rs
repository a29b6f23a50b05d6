//! PCI identifiers and enumeration bounds.
//!
//! Source: KLP3636 / KLP3668 datasheet register summaries plus config-space
//! probing of both boards.

/// Kelpie Systems vendor ID.
pub const KELPIE_VENDOR_ID: u16 = 0x1E9A;

/// Device IDs for the KLP36xx switch family.
pub mod device_id {
    /// KLP3636 — 36-phy SAS expander / PCIe fabric switch (`lspci: 1e9a:0c36`).
    pub const KLP3636: u16 = 0x0C36;
    /// KLP3668 — 68-phy variant (`lspci: 1e9a:0c68`).
    pub const KLP3668: u16 = 0x0C68;
}

/// All known switch device IDs.
pub const SWITCH_DEVICE_IDS: &[u16] = &[device_id::KLP3636, device_id::KLP3668];

/// Highest bus number the discovery scan walks.
///
/// A chained fabric never enumerates deeper than this; the same constant
/// bounds the recursive secondary-bus ancestor walk so a malformed topology
/// cannot loop forever.
pub const MAX_SCAN_BUS: u8 = 64;

/// Device slots probed per bus.
pub const SLOTS_PER_BUS: u8 = 32;

/// Config-space header type for the switch functions. The KLP36xx always
/// presents itself as a PCI-to-PCI bridge (header type 1).
pub const BRIDGE_HEADER_TYPE: u8 = 0x01;

/// Switch variant discovered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchVariant {
    /// KLP3636 — 36 phys, single fabric domain.
    Klp3636,
    /// KLP3668 — 68 phys, dual fabric domain.
    Klp3668,
    /// Unknown / future variant.
    Unknown(u16),
}

impl SwitchVariant {
    /// Identify variant from the PCI device ID.
    #[must_use]
    pub const fn from_device_id(id: u16) -> Self {
        match id {
            device_id::KLP3636 => Self::Klp3636,
            device_id::KLP3668 => Self::Klp3668,
            other => Self::Unknown(other),
        }
    }

    /// Nominal phy count for this variant.
    ///
    /// The authoritative count comes from SMP Report General; this is the
    /// datasheet value used for display before firmware is reachable.
    #[must_use]
    pub const fn nominal_phy_count(&self) -> u8 {
        match self {
            Self::Klp3636 => 36,
            Self::Klp3668 => 68,
            Self::Unknown(_) => 0,
        }
    }
}

/// Format a `vendor:device` string for use with `lspci -d`.
#[must_use]
pub fn lspci_filter() -> String {
    format!("{:04x}:{:04x}", KELPIE_VENDOR_ID, device_id::KLP3636)
}
