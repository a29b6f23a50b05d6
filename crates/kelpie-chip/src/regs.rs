//! Chime-to-AXI bridge register map and BAR0 fallback windows.
//!
//! The bridge is a small FSM in BAR0 that turns host-visible
//! address/data/control writes into internal chip-bus transactions.  Three
//! 32-bit registers drive it:
//!
//! ```text
//! 0x0040: CHIME_CTRL_STATUS  — command on write, FSM status on read
//! 0x0044: CHIME_ADDRESS      — target chip-space address
//! 0x0048: CHIME_DATA         — write data in, read data out
//! ```
//!
//! When the FSM is wedged (busy bit never clears) a subset of chip-space
//! addresses remains reachable through fixed BAR0 apertures; see
//! [`BAR0_WINDOWS`].

// ── Bridge registers ─────────────────────────────────────────────────────────

/// Control/status register. Write a command code, read back FSM status bits.
pub const CHIME_CTRL_STATUS: usize = 0x0040;

/// Target chip-space address for the next cycle.
pub const CHIME_ADDRESS: usize = 0x0044;

/// Data register — staged write data, or captured read data.
pub const CHIME_DATA: usize = 0x0048;

/// Bridge command codes, written to [`CHIME_CTRL_STATUS`].
pub mod cmd {
    /// Clear the FSM before staging a new cycle.
    pub const CLEAR: u32 = 0x00;
    /// Launch a write cycle. The command dword itself is the completion
    /// handshake; there is no post-write poll.
    pub const WRITE_CYCLE: u32 = 0x01;
    /// Launch a read cycle; completion is signalled by the data-ready bit.
    pub const READ_CYCLE: u32 = 0x02;
}

/// FSM status bits, read from [`CHIME_CTRL_STATUS`].
pub mod status {
    /// A cycle is in flight.
    pub const BUSY: u32 = 1 << 2;
    /// Read data has been captured into [`super::CHIME_DATA`].
    pub const DATA_READY: u32 = 1 << 3;
}

// ── Polling budgets ──────────────────────────────────────────────────────────

/// Idle-check iterations before the bridge is treated as wedged.
pub const IDLE_RETRIES: u32 = 10;

/// Data-ready poll iterations for a read cycle.
pub const DATA_RETRIES: u32 = 100;

/// Sleep between poll iterations, in microseconds. The FSM has no
/// interrupt-driven completion signal at this layer.
pub const POLL_INTERVAL_US: u64 = 100;

// ── BAR0 fallback windows ────────────────────────────────────────────────────

/// A chip-space address range directly aliased into BAR0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bar0Window {
    /// First chip-space address covered by the window.
    pub chip_base: u32,
    /// Window length in bytes.
    pub len: u32,
    /// Byte offset of the aperture within BAR0.
    pub bar0_offset: usize,
}

impl Bar0Window {
    /// Whether `address` falls inside this window.
    #[must_use]
    pub const fn contains(&self, address: u32) -> bool {
        address >= self.chip_base && (address - self.chip_base) < self.len
    }

    /// Translate a chip-space address to its BAR0 byte offset.
    ///
    /// Only meaningful when [`contains`](Self::contains) holds.
    #[must_use]
    pub const fn translate(&self, address: u32) -> usize {
        self.bar0_offset + (address - self.chip_base) as usize
    }
}

/// Core AXI register block, aliased at the bottom of BAR0.
pub const AXI_WINDOW: Bar0Window = Bar0Window {
    chip_base: 0x0000_0000,
    len: 0x0010_0000,
    bar0_offset: 0x0000_0000,
};

/// Per-port configuration space.
pub const PORT_CFG_WINDOW: Bar0Window = Bar0Window {
    chip_base: 0x0880_0000,
    len: 0x0008_0000,
    bar0_offset: 0x0060_0000,
};

/// Boot flash aperture.
pub const FLASH_WINDOW: Bar0Window = Bar0Window {
    chip_base: 0xF000_0000,
    len: 0x0100_0000,
    bar0_offset: 0x0100_0000,
};

/// Every chip-space range reachable through BAR0 when the bridge is wedged.
pub const BAR0_WINDOWS: [Bar0Window; 3] = [AXI_WINDOW, PORT_CFG_WINDOW, FLASH_WINDOW];

/// Chip-control registers that fallback accesses must not touch.
///
/// Both sit outside every aperture; firmware owns them exclusively, and a
/// fallback access resolves to "pretend success" instead of a fault so that
/// shutdown paths keep working while the bridge is wedged.
pub const IGNORED_REGISTERS: [u32; 2] = [
    // Global soft-reset strobe.
    0xFFF0_0000,
    // Watchdog kick.
    0xFFF0_0004,
];
