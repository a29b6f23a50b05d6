//! SMP request/response channel.
//!
//! The channel builds frames, fixes byte order, hands them to a
//! caller-supplied SCSI-passthrough transport, and validates what comes
//! back. It rides on the transport alone — not on the register bridge; the
//! two are peers that only share a device handle upstream.
//!
//! The passthrough front-end consumes and produces frames as little-endian
//! dword images, while the SMP wire format is MSB-first. Every outgoing
//! frame body is therefore byte-swapped word-by-word before transmission and
//! every incoming frame swapped back before field access; [`swap_dwords`] is
//! its own inverse, so the codec itself only ever sees wire order.

mod frames;

pub use frames::{
    Discover, PhyErrorLog, ReportGeneral, SelfConfigDescriptor, SelfConfigStatus,
};

use crate::error::{FabricError, Result};
use kelpie_chip::smp::{function, LinkRate, PhyOperation, HEADER_LEN};

/// Largest response frame the channel will accept.
const MAX_RESPONSE_LEN: usize = 1024;

/// Caller-supplied SCSI passthrough.
///
/// Takes a raw request image and a response buffer, returns the number of
/// response bytes produced. The channel treats it as opaque; CDB framing,
/// CRC, and retries on the SCSI side all live behind this seam.
pub trait SmpTransport {
    /// Execute one SMP round trip.
    fn execute(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize>;
}

/// Swap each 32-bit word of `buf` between wire (MSB-first) and passthrough
/// (LSB-first) byte order. Involutive: applying it twice restores the input.
pub fn swap_dwords(buf: &mut [u8]) -> Result<()> {
    if buf.len() % 4 != 0 {
        return Err(FabricError::invalid_parameter(format!(
            "SMP frame length {} is not word-aligned",
            buf.len()
        )));
    }
    for word in buf.chunks_exact_mut(4) {
        word.reverse();
    }
    Ok(())
}

/// SMP channel over one expander's passthrough transport.
///
/// Phy Control operations change chip-visible link and power state; the
/// channel never retries them — retrying a hard reset is not idempotent in
/// effect on the attached topology, so retry policy belongs to the caller.
#[derive(Debug)]
pub struct SmpChannel<T: SmpTransport> {
    transport: T,
}

impl<T: SmpTransport> SmpChannel<T> {
    /// Wrap a passthrough transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Recover the transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// One framed round trip: swap out, execute, swap back, validate, trim.
    fn roundtrip(&mut self, mut request: Vec<u8>, func: u8) -> Result<Vec<u8>> {
        swap_dwords(&mut request)?;

        let mut response = vec![0u8; MAX_RESPONSE_LEN];
        let n = self.transport.execute(&request, &mut response)?;
        if n < HEADER_LEN || n % 4 != 0 {
            return Err(FabricError::failed(format!(
                "passthrough returned {n} bytes, not a whole SMP frame"
            )));
        }
        response.truncate(n);
        swap_dwords(&mut response)?;

        let declared = frames::validate_response(&response, func)?;
        response.truncate(declared);
        Ok(response)
    }

    /// Report General — expander identity, change count, phy count.
    pub fn report_general(&mut self) -> Result<ReportGeneral> {
        let frame = self.roundtrip(frames::report_general_request(), function::REPORT_GENERAL)?;
        ReportGeneral::decode(&frame)
    }

    /// Total number of phys on the expander.
    pub fn total_phys(&mut self) -> Result<u8> {
        Ok(self.report_general()?.number_of_phys)
    }

    /// Discover — full link and attachment state for one phy.
    pub fn discover(&mut self, phy: u8) -> Result<Discover> {
        let frame = self.roundtrip(frames::discover_request(phy), function::DISCOVER)?;
        Discover::decode(&frame)
    }

    /// Negotiated link rate for one phy.
    pub fn phy_link_status(&mut self, phy: u8) -> Result<LinkRate> {
        Ok(self.discover(phy)?.negotiated_link_rate)
    }

    /// Error counters for one phy.
    pub fn phy_error_counters(&mut self, phy: u8) -> Result<PhyErrorLog> {
        let frame = self.roundtrip(
            frames::phy_error_log_request(phy),
            function::REPORT_PHY_ERROR_LOG,
        )?;
        PhyErrorLog::decode(&frame)
    }

    /// Phy Control — destructive link/power operations. Not retried.
    pub fn phy_control(&mut self, phy: u8, op: PhyOperation) -> Result<()> {
        tracing::debug!(phy, ?op, "phy control");
        self.roundtrip(frames::phy_control_request(phy, op), function::PHY_CONTROL)?;
        Ok(())
    }

    /// Apply a phy operation to one phy, or to every phy on the expander.
    ///
    /// In the all-phys sweep a firmware decline (`Ignore`) on an individual
    /// phy is logged and skipped; a genuine fault still aborts the sweep.
    pub fn reset_phy(&mut self, phy: u8, op: PhyOperation, all_phys: bool) -> Result<()> {
        if !all_phys {
            return self.phy_control(phy, op);
        }

        let total = self.total_phys()?;
        for p in 0..total {
            match self.phy_control(p, op) {
                Ok(()) => {}
                Err(e @ FabricError::Ignore { .. }) => {
                    tracing::warn!(phy = p, reason = %e, "phy declined operation, continuing sweep");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Report Self-Configuration Status from a starting descriptor index.
    pub fn self_configuration_status(&mut self, starting_index: u16) -> Result<SelfConfigStatus> {
        let frame = self.roundtrip(
            frames::self_config_status_request(starting_index),
            function::REPORT_SELF_CONFIG_STATUS,
        )?;
        SelfConfigStatus::decode(&frame)
    }
}
