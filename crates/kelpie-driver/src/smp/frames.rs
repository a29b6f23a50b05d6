//! SMP frame codec: explicit big-endian encode/decode on byte buffers.
//!
//! Field layouts are expressed as byte offsets and masks rather than struct
//! overlays — bit-field layout in memory is not portable, the wire is. All
//! offsets below are absolute (from frame byte 0, header included), matching
//! the convention the silicon's SMP reference uses.

use crate::error::{FabricError, Result};
use kelpie_chip::smp::{
    function, result, AttachedDeviceType, LinkRate, PhyOperation, FRAME_TYPE_REQUEST,
    FRAME_TYPE_RESPONSE, HEADER_LEN, SELF_CONFIG_DESCRIPTOR_LEN,
};

// Request body lengths, in 32-bit words.
const DISCOVER_REQUEST_WORDS: u8 = 2;
const PHY_ERROR_LOG_REQUEST_WORDS: u8 = 2;
const PHY_CONTROL_REQUEST_WORDS: u8 = 9;
const SELF_CONFIG_REQUEST_WORDS: u8 = 2;

// Expected response body lengths, in 32-bit words.
const REPORT_GENERAL_RESPONSE_WORDS: u8 = 5;
const DISCOVER_RESPONSE_WORDS: u8 = 13;
const PHY_ERROR_LOG_RESPONSE_WORDS: u8 = 7;

/// Largest allocation hint expressible in the header's one-byte field.
const MAX_ALLOC_WORDS: u8 = 0xFF;

fn be16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn be32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn be64(buf: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..off + 8]);
    u64::from_be_bytes(bytes)
}

fn put_be16(buf: &mut [u8], off: usize, value: u16) {
    buf[off..off + 2].copy_from_slice(&value.to_be_bytes());
}

/// Frame a request: header plus word-aligned body.
fn build_request(func: u8, alloc_words: u8, body_words: u8) -> Vec<u8> {
    let mut frame = vec![0u8; HEADER_LEN + usize::from(body_words) * 4];
    frame[0] = FRAME_TYPE_REQUEST;
    frame[1] = func;
    frame[2] = alloc_words;
    frame[3] = body_words;
    frame
}

/// Report General request (empty body).
#[must_use]
pub(crate) fn report_general_request() -> Vec<u8> {
    build_request(function::REPORT_GENERAL, REPORT_GENERAL_RESPONSE_WORDS, 0)
}

/// Discover request for one phy.
#[must_use]
pub(crate) fn discover_request(phy: u8) -> Vec<u8> {
    let mut frame = build_request(
        function::DISCOVER,
        DISCOVER_RESPONSE_WORDS,
        DISCOVER_REQUEST_WORDS,
    );
    frame[9] = phy;
    frame
}

/// Report Phy Error Log request for one phy.
#[must_use]
pub(crate) fn phy_error_log_request(phy: u8) -> Vec<u8> {
    let mut frame = build_request(
        function::REPORT_PHY_ERROR_LOG,
        PHY_ERROR_LOG_RESPONSE_WORDS,
        PHY_ERROR_LOG_REQUEST_WORDS,
    );
    frame[9] = phy;
    frame
}

/// Phy Control request. Programmed link rates are left at 0 ("no change").
#[must_use]
pub(crate) fn phy_control_request(phy: u8, op: PhyOperation) -> Vec<u8> {
    let mut frame = build_request(function::PHY_CONTROL, 0, PHY_CONTROL_REQUEST_WORDS);
    frame[9] = phy;
    frame[10] = op.code();
    frame
}

/// Report Self-Configuration Status request from a starting descriptor index.
#[must_use]
pub(crate) fn self_config_status_request(starting_index: u16) -> Vec<u8> {
    let mut frame = build_request(
        function::REPORT_SELF_CONFIG_STATUS,
        MAX_ALLOC_WORDS,
        SELF_CONFIG_REQUEST_WORDS,
    );
    put_be16(&mut frame, 6, starting_index);
    frame
}

/// Validate a response header against the function that was requested.
///
/// Returns the declared frame length (header plus `response length` words).
/// A frame-type or function-code mismatch is transport corruption —
/// `Failed`, uniformly for every function. A non-`ACCEPTED` result is the
/// firmware declining the request — `Ignore`, so callers skip rather than
/// abort.
pub(crate) fn validate_response(frame: &[u8], func: u8) -> Result<usize> {
    if frame.len() < HEADER_LEN {
        return Err(FabricError::failed(format!(
            "SMP response runt: {} bytes",
            frame.len()
        )));
    }
    if frame[0] != FRAME_TYPE_RESPONSE {
        return Err(FabricError::failed(format!(
            "SMP frame type {:#04x} is not a response",
            frame[0]
        )));
    }
    if frame[1] != func {
        return Err(FabricError::failed(format!(
            "SMP function mismatch: requested {func:#04x}, response carries {:#04x}",
            frame[1]
        )));
    }
    if frame[2] != result::ACCEPTED {
        return Err(FabricError::ignore(format!(
            "SMP function {func:#04x} declined, result {:#04x}",
            frame[2]
        )));
    }
    let declared = HEADER_LEN + usize::from(frame[3]) * 4;
    if frame.len() < declared {
        return Err(FabricError::failed(format!(
            "SMP response truncated: header declares {declared} bytes, got {}",
            frame.len()
        )));
    }
    Ok(declared)
}

fn ensure_len(frame: &[u8], needed: usize, what: &str) -> Result<()> {
    if frame.len() < needed {
        return Err(FabricError::failed(format!(
            "{what} response too short: {} bytes, need {needed}",
            frame.len()
        )));
    }
    Ok(())
}

/// Report General response fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportGeneral {
    /// Incremented by firmware on every topology change.
    pub expander_change_count: u16,
    /// Route table index count.
    pub expander_route_indexes: u16,
    /// Firmware supports long-format responses.
    pub long_response: bool,
    /// Number of phys on the expander.
    pub number_of_phys: u8,
    /// Route table may be written by the host.
    pub configurable_route_table: bool,
    /// Self-configuration currently in progress.
    pub configuring: bool,
    /// Expander accepts external configuration.
    pub externally_configurable: bool,
    /// Enclosure logical identifier.
    pub enclosure_logical_identifier: u64,
}

impl ReportGeneral {
    pub(crate) fn decode(frame: &[u8]) -> Result<Self> {
        ensure_len(frame, 24, "Report General")?;
        Ok(Self {
            expander_change_count: be16(frame, 4),
            expander_route_indexes: be16(frame, 6),
            long_response: frame[8] & 0x80 != 0,
            number_of_phys: frame[9],
            configurable_route_table: frame[10] & 0x04 != 0,
            configuring: frame[10] & 0x02 != 0,
            externally_configurable: frame[10] & 0x01 != 0,
            enclosure_logical_identifier: be64(frame, 12),
        })
    }
}

/// Discover response fields for one phy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discover {
    /// Phy the response describes.
    pub phy_identifier: u8,
    /// What is attached on the far side.
    pub attached_device_type: AttachedDeviceType,
    /// Negotiated logical link rate.
    pub negotiated_link_rate: LinkRate,
    /// Attached initiator support bits (bit 3 SSP, bit 2 STP, bit 1 SMP).
    pub attached_initiator_support: u8,
    /// Attached target support bits (bit 3 SSP, bit 2 STP, bit 1 SMP).
    pub attached_target_support: u8,
    /// SAS address of this expander port.
    pub sas_address: u64,
    /// SAS address of the attached device.
    pub attached_sas_address: u64,
    /// Phy identifier on the attached device.
    pub attached_phy_identifier: u8,
    /// Programmed minimum link rate.
    pub programmed_min_rate: LinkRate,
    /// Hardware minimum link rate.
    pub hardware_min_rate: LinkRate,
    /// Programmed maximum link rate.
    pub programmed_max_rate: LinkRate,
    /// Hardware maximum link rate.
    pub hardware_max_rate: LinkRate,
    /// Incremented on every link state change of this phy.
    pub phy_change_count: u8,
    /// Phy is internal to the expander.
    pub virtual_phy: bool,
    /// Routing attribute (0 direct, 1 subtractive, 2 table).
    pub routing_attribute: u8,
}

impl Discover {
    pub(crate) fn decode(frame: &[u8]) -> Result<Self> {
        ensure_len(frame, 56, "Discover")?;
        Ok(Self {
            phy_identifier: frame[9],
            attached_device_type: AttachedDeviceType::from_bits(frame[12] >> 4),
            negotiated_link_rate: LinkRate::from_nibble(frame[13]),
            attached_initiator_support: frame[14],
            attached_target_support: frame[15],
            sas_address: be64(frame, 16),
            attached_sas_address: be64(frame, 24),
            attached_phy_identifier: frame[32],
            programmed_min_rate: LinkRate::from_nibble(frame[40] >> 4),
            hardware_min_rate: LinkRate::from_nibble(frame[40]),
            programmed_max_rate: LinkRate::from_nibble(frame[41] >> 4),
            hardware_max_rate: LinkRate::from_nibble(frame[41]),
            phy_change_count: frame[42],
            virtual_phy: frame[43] & 0x80 != 0,
            routing_attribute: frame[44] & 0x0F,
        })
    }
}

/// Report Phy Error Log counters for one phy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyErrorLog {
    /// Phy the counters belong to.
    pub phy_identifier: u8,
    /// Dwords failing 8b10b decode.
    pub invalid_dword_count: u32,
    /// Running disparity errors.
    pub running_disparity_error_count: u32,
    /// Dword synchronization losses.
    pub loss_of_dword_sync_count: u32,
    /// Failed phy reset sequences.
    pub phy_reset_problem_count: u32,
}

impl PhyErrorLog {
    pub(crate) fn decode(frame: &[u8]) -> Result<Self> {
        ensure_len(frame, 32, "Report Phy Error Log")?;
        Ok(Self {
            phy_identifier: frame[9],
            invalid_dword_count: be32(frame, 12),
            running_disparity_error_count: be32(frame, 16),
            loss_of_dword_sync_count: be32(frame, 20),
            phy_reset_problem_count: be32(frame, 24),
        })
    }
}

/// One self-configuration status descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfConfigDescriptor {
    /// Firmware-defined status/event type.
    pub status_type: u8,
    /// Last descriptor of the configuration sequence.
    pub final_descriptor: bool,
    /// Phy the event applies to.
    pub phy_identifier: u8,
    /// SAS address the event applies to.
    pub sas_address: u64,
}

/// Report Self-Configuration Status response: a variable-length descriptor
/// list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfConfigStatus {
    /// Index of the first descriptor in this response.
    pub starting_index: u16,
    /// Total descriptors the firmware holds.
    pub total_descriptors: u16,
    /// Wire stride between descriptors, in bytes.
    pub descriptor_stride: usize,
    /// Decoded descriptors.
    pub descriptors: Vec<SelfConfigDescriptor>,
}

impl SelfConfigStatus {
    /// Decode the descriptor list.
    ///
    /// The cursor advances by the wire-reported stride, never by the host's
    /// descriptor size — newer firmware appends fields the host does not yet
    /// understand, and walking by `SELF_CONFIG_DESCRIPTOR_LEN` would shear
    /// every descriptor after the first.
    pub(crate) fn decode(frame: &[u8]) -> Result<Self> {
        ensure_len(frame, 16, "Report Self-Configuration Status")?;
        let starting_index = be16(frame, 4);
        let total_descriptors = be16(frame, 6);
        let returned = usize::from(frame[10]);
        let descriptor_stride = usize::from(frame[11]) * 4;

        let mut descriptors = Vec::with_capacity(returned);
        if returned > 0 {
            if descriptor_stride < SELF_CONFIG_DESCRIPTOR_LEN {
                return Err(FabricError::failed(format!(
                    "self-configuration descriptor stride {descriptor_stride} \
                     smaller than the descriptor itself"
                )));
            }
            let mut cursor = 16usize;
            for _ in 0..returned {
                if cursor + SELF_CONFIG_DESCRIPTOR_LEN > frame.len() {
                    return Err(FabricError::failed(
                        "self-configuration descriptor list truncated",
                    ));
                }
                descriptors.push(SelfConfigDescriptor {
                    status_type: frame[cursor],
                    final_descriptor: frame[cursor + 1] & 0x01 != 0,
                    phy_identifier: frame[cursor + 3],
                    sas_address: be64(frame, cursor + 8),
                });
                cursor += descriptor_stride;
            }
        }

        Ok(Self {
            starting_index,
            total_descriptors,
            descriptor_stride,
            descriptors,
        })
    }
}
