//! BAR layout for the KLP36xx switch functions.
//!
//! The switch enumerates as a PCI-to-PCI bridge (header type 1), so only the
//! first two config-space BAR slots exist — there is no BAR2/BAR3.
//!
//! ```text
//! BAR  Address          Size    Type                  Purpose
//! ──── ──────────────── ─────── ─────────────────────────────────────────────
//!  0   0x9000_0000      32 MB   32-bit non-prefetch   Chime bridge + apertures
//!  1   0x9200_0000      1 MB    32-bit non-prefetch   Message scratch (optional)
//! ```
//!
//! BAR0 is load-bearing: the Chime-to-AXI bridge registers and every
//! fallback aperture live in it.  BAR1 is absent on some board straps and
//! the driver tolerates it being unimplemented.

/// BAR0 — register space (32 MB, MMIO).
pub mod bar0 {
    /// Typical physical address (varies per system).
    pub const TYPICAL_ADDR: u64 = 0x9000_0000;
    /// Size in bytes.
    pub const SIZE: u64 = 32 * 1024 * 1024;
    pub const IS_64BIT: bool = false;
    pub const IS_PREFETCHABLE: bool = false;
}

/// BAR1 — message scratch window (1 MB, optional).
pub mod bar1 {
    /// Typical physical address.
    pub const TYPICAL_ADDR: u64 = 0x9200_0000;
    /// Size in bytes.
    pub const SIZE: u64 = 1024 * 1024;
    pub const IS_64BIT: bool = false;
    pub const IS_PREFETCHABLE: bool = false;
}

/// BAR index enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Bar {
    /// BAR0 — bridge registers and fallback apertures.
    Control = 0,
    /// BAR1 — message scratch.
    Scratch = 1,
}

impl Bar {
    /// Typical size of this BAR in bytes.
    #[must_use]
    pub const fn typical_size(&self) -> u64 {
        match self {
            Self::Control => bar0::SIZE,
            Self::Scratch => bar1::SIZE,
        }
    }
}
