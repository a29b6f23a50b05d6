//! Chime-to-AXI register bridge driver.
//!
//! Both entry points follow the same protocol: wait for the FSM to go idle,
//! stage an address, launch a cycle. When the FSM never goes idle the
//! operation does not fail outright — a static table of BAR0 apertures
//! covers the address ranges that remain directly reachable, and only an
//! address outside every aperture reports [`FabricError::Bar0AddressNotMapped`].
//!
//! Every call returns a definite value or a definite, distinguishable
//! failure; both poll loops are bounded, so no call blocks indefinitely.
//! There is no cancellation: a caller that abandons a call mid-poll leaves
//! the FSM mid-transaction, and the next call's idle check detects and
//! tolerates that.

use crate::error::{FabricError, Result};
use crate::platform::RegisterWindow;
use kelpie_chip::regs::{
    cmd, status, BAR0_WINDOWS, CHIME_ADDRESS, CHIME_CTRL_STATUS, CHIME_DATA, DATA_RETRIES,
    IDLE_RETRIES, IGNORED_REGISTERS, POLL_INTERVAL_US,
};
use std::time::Duration;

/// How a chip-space address resolves when the bridge is wedged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback {
    /// Directly reachable through a BAR0 aperture at this byte offset.
    Aperture(usize),
    /// Firmware-owned control register: pretend success, touch nothing.
    Ignored,
    /// Not reachable without the FSM.
    Unreachable,
}

fn resolve_fallback(address: u32) -> Fallback {
    if IGNORED_REGISTERS.contains(&address) {
        return Fallback::Ignored;
    }
    BAR0_WINDOWS
        .iter()
        .find(|w| w.contains(address))
        .map_or(Fallback::Unreachable, |w| {
            Fallback::Aperture(w.translate(address))
        })
}

/// Indirect 32-bit register access into chip address space.
///
/// Borrows the device's BAR0 window exclusively for the duration of a
/// transaction — the FSM's address/data/control registers are chip-global
/// shared state, so interleaved transactions from concurrent callers would
/// corrupt each other. The `&mut` borrow enforces the one-owner discipline
/// at compile time.
#[derive(Debug)]
pub struct RegisterBridge<'w, W: RegisterWindow + ?Sized> {
    window: &'w mut W,
}

impl<'w, W: RegisterWindow + ?Sized> RegisterBridge<'w, W> {
    /// Drive the bridge through the given BAR0 window.
    pub fn new(window: &'w mut W) -> Self {
        Self { window }
    }

    /// Read a 32-bit value from chip address space.
    pub fn read(&mut self, address: u32) -> Result<u32> {
        if !self.wait_idle()? {
            tracing::debug!(
                address = %format_args!("{address:#010x}"),
                "bridge busy, taking BAR0 fallback read"
            );
            return self.fallback_read(address);
        }

        self.window.write32(CHIME_CTRL_STATUS, cmd::CLEAR)?;
        self.window.write32(CHIME_ADDRESS, address)?;
        self.window.write32(CHIME_CTRL_STATUS, cmd::READ_CYCLE)?;

        for _ in 0..DATA_RETRIES {
            let s = self.window.read32(CHIME_CTRL_STATUS)?;
            if s & status::DATA_READY != 0 {
                return self.window.read32(CHIME_DATA);
            }
            std::thread::sleep(Duration::from_micros(POLL_INTERVAL_US));
        }

        Err(FabricError::failed(format!(
            "bridge read of {address:#010x}: data-ready never asserted"
        )))
    }

    /// Write a 32-bit value into chip address space.
    ///
    /// The command dword itself is the write handshake; there is no
    /// completion poll.
    pub fn write(&mut self, address: u32, value: u32) -> Result<()> {
        if !self.wait_idle()? {
            tracing::debug!(
                address = %format_args!("{address:#010x}"),
                "bridge busy, taking BAR0 fallback write"
            );
            return self.fallback_write(address, value);
        }

        self.window.write32(CHIME_CTRL_STATUS, cmd::CLEAR)?;
        self.window.write32(CHIME_ADDRESS, address)?;
        self.window.write32(CHIME_DATA, value)?;
        self.window.write32(CHIME_CTRL_STATUS, cmd::WRITE_CYCLE)?;
        Ok(())
    }

    /// Poll for the busy bit to clear. `Ok(false)` means the FSM is wedged
    /// for this operation (not an error — the caller falls back).
    fn wait_idle(&mut self) -> Result<bool> {
        for _ in 0..IDLE_RETRIES {
            let s = self.window.read32(CHIME_CTRL_STATUS)?;
            if s & status::BUSY == 0 {
                return Ok(true);
            }
            std::thread::sleep(Duration::from_micros(POLL_INTERVAL_US));
        }
        Ok(false)
    }

    fn fallback_read(&mut self, address: u32) -> Result<u32> {
        match resolve_fallback(address) {
            Fallback::Aperture(offset) => self.window.read32(offset),
            Fallback::Ignored => Ok(0),
            Fallback::Unreachable => Err(FabricError::Bar0AddressNotMapped { address }),
        }
    }

    fn fallback_write(&mut self, address: u32, value: u32) -> Result<()> {
        match resolve_fallback(address) {
            Fallback::Aperture(offset) => self.window.write32(offset, value),
            Fallback::Ignored => Ok(()),
            Fallback::Unreachable => Err(FabricError::Bar0AddressNotMapped { address }),
        }
    }
}
