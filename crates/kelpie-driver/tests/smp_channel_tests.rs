//! SMP channel validation over a scripted passthrough transport.
//!
//! Responses are scripted as the passthrough delivers them: little-endian
//! dword images of the MSB-first wire frames. The channel must swap both
//! directions, so scripts are built big-endian and swapped once here.

use kelpie_driver::chip::{LinkRate, PhyOperation};
use kelpie_driver::{swap_dwords, FabricError, Result, SmpChannel, SmpTransport};
use std::collections::VecDeque;

const FRAME_TYPE_RESPONSE: u8 = 0x41;
const FN_REPORT_GENERAL: u8 = 0x00;
const FN_SELF_CONFIG: u8 = 0x03;
const FN_DISCOVER: u8 = 0x10;
const FN_PHY_ERROR_LOG: u8 = 0x11;
const FN_PHY_CONTROL: u8 = 0x91;

/// Scripted transport: pops one canned response per request, recording the
/// requests it saw (in wire order, swapped back for inspection).
#[derive(Default)]
struct ScriptedTransport {
    responses: VecDeque<Vec<u8>>,
    requests: Vec<Vec<u8>>,
}

impl ScriptedTransport {
    /// Queue a response given in MSB-first wire order.
    fn push_wire_response(&mut self, mut frame: Vec<u8>) {
        swap_dwords(&mut frame).unwrap();
        self.responses.push_back(frame);
    }
}

impl SmpTransport for ScriptedTransport {
    fn execute(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize> {
        let mut seen = request.to_vec();
        swap_dwords(&mut seen)?;
        self.requests.push(seen);

        let canned = self
            .responses
            .pop_front()
            .ok_or_else(|| FabricError::failed("script exhausted"))?;
        response[..canned.len()].copy_from_slice(&canned);
        Ok(canned.len())
    }
}

fn response_frame(function: u8, result: u8, body_words: u8) -> Vec<u8> {
    let mut frame = vec![0u8; 4 + usize::from(body_words) * 4];
    frame[0] = FRAME_TYPE_RESPONSE;
    frame[1] = function;
    frame[2] = result;
    frame[3] = body_words;
    frame
}

fn report_general_frame(num_phys: u8) -> Vec<u8> {
    let mut frame = response_frame(FN_REPORT_GENERAL, 0, 5);
    frame[4..6].copy_from_slice(&7u16.to_be_bytes()); // change count
    frame[9] = num_phys;
    frame
}

#[test]
fn report_general_round_trip() {
    let mut transport = ScriptedTransport::default();
    transport.push_wire_response(report_general_frame(36));

    let mut channel = SmpChannel::new(transport);
    let rg = channel.report_general().unwrap();
    assert_eq!(rg.number_of_phys, 36);
    assert_eq!(rg.expander_change_count, 7);

    // The request that went out: a Report General header with empty body.
    let transport = channel.into_inner();
    assert_eq!(transport.requests.len(), 1);
    let req = &transport.requests[0];
    assert_eq!(req[0], 0x40);
    assert_eq!(req[1], FN_REPORT_GENERAL);
    assert_eq!(req[3], 0);
}

#[test]
fn discover_addresses_the_requested_phy() {
    let mut transport = ScriptedTransport::default();
    let mut frame = response_frame(FN_DISCOVER, 0, 13);
    frame[9] = 11;
    frame[12] = 0x20; // edge expander attached
    frame[13] = 0x09; // Gen2
    transport.push_wire_response(frame);

    let mut channel = SmpChannel::new(transport);
    let d = channel.discover(11).unwrap();
    assert_eq!(d.phy_identifier, 11);
    assert_eq!(d.negotiated_link_rate, LinkRate::Gen2);

    let transport = channel.into_inner();
    assert_eq!(transport.requests[0][1], FN_DISCOVER);
    assert_eq!(transport.requests[0][9], 11);
}

#[test]
fn phy_link_status_projects_the_negotiated_rate() {
    let mut transport = ScriptedTransport::default();
    let mut frame = response_frame(FN_DISCOVER, 0, 13);
    frame[13] = 0x0B;
    transport.push_wire_response(frame);

    let mut channel = SmpChannel::new(transport);
    assert_eq!(channel.phy_link_status(0).unwrap(), LinkRate::Gen4);
}

#[test]
fn phy_error_counters_decode() {
    let mut transport = ScriptedTransport::default();
    let mut frame = response_frame(FN_PHY_ERROR_LOG, 0, 7);
    frame[9] = 2;
    frame[12..16].copy_from_slice(&100u32.to_be_bytes());
    frame[16..20].copy_from_slice(&200u32.to_be_bytes());
    frame[20..24].copy_from_slice(&300u32.to_be_bytes());
    frame[24..28].copy_from_slice(&400u32.to_be_bytes());
    transport.push_wire_response(frame);

    let mut channel = SmpChannel::new(transport);
    let log = channel.phy_error_counters(2).unwrap();
    assert_eq!(log.phy_identifier, 2);
    assert_eq!(log.invalid_dword_count, 100);
    assert_eq!(log.running_disparity_error_count, 200);
    assert_eq!(log.loss_of_dword_sync_count, 300);
    assert_eq!(log.phy_reset_problem_count, 400);
}

#[test]
fn function_mismatch_reports_transport_corruption() {
    let mut transport = ScriptedTransport::default();
    transport.push_wire_response(response_frame(FN_DISCOVER, 0, 13));

    let mut channel = SmpChannel::new(transport);
    let err = channel.report_general().unwrap_err();
    assert!(matches!(err, FabricError::Failed { .. }));
}

#[test]
fn firmware_decline_reports_ignore() {
    let mut transport = ScriptedTransport::default();
    transport.push_wire_response(response_frame(FN_PHY_CONTROL, 0x10, 0));

    let mut channel = SmpChannel::new(transport);
    let err = channel
        .phy_control(40, PhyOperation::LinkReset)
        .unwrap_err();
    assert!(matches!(err, FabricError::Ignore { .. }));
}

#[test]
fn runt_response_is_failed() {
    struct Runt;
    impl SmpTransport for Runt {
        fn execute(&mut self, _request: &[u8], response: &mut [u8]) -> Result<usize> {
            response[0] = FRAME_TYPE_RESPONSE;
            Ok(2)
        }
    }

    let mut channel = SmpChannel::new(Runt);
    let err = channel.report_general().unwrap_err();
    assert!(matches!(err, FabricError::Failed { .. }));
}

#[test]
fn reset_all_phys_sweeps_and_tolerates_declines() {
    let mut transport = ScriptedTransport::default();
    transport.push_wire_response(report_general_frame(3));
    transport.push_wire_response(response_frame(FN_PHY_CONTROL, 0, 0));
    // Phy 1 declines; the sweep continues.
    transport.push_wire_response(response_frame(FN_PHY_CONTROL, 0x10, 0));
    transport.push_wire_response(response_frame(FN_PHY_CONTROL, 0, 0));

    let mut channel = SmpChannel::new(transport);
    channel
        .reset_phy(0, PhyOperation::LinkReset, true)
        .unwrap();

    let transport = channel.into_inner();
    // One Report General plus one Phy Control per phy.
    assert_eq!(transport.requests.len(), 4);
    for (i, req) in transport.requests[1..].iter().enumerate() {
        assert_eq!(req[1], FN_PHY_CONTROL);
        assert_eq!(usize::from(req[9]), i);
        assert_eq!(req[10], PhyOperation::LinkReset.code());
    }
}

#[test]
fn reset_single_phy_does_not_sweep() {
    let mut transport = ScriptedTransport::default();
    transport.push_wire_response(response_frame(FN_PHY_CONTROL, 0, 0));

    let mut channel = SmpChannel::new(transport);
    channel
        .reset_phy(5, PhyOperation::HardReset, false)
        .unwrap();

    let transport = channel.into_inner();
    assert_eq!(transport.requests.len(), 1);
    assert_eq!(transport.requests[0][9], 5);
    assert_eq!(transport.requests[0][10], PhyOperation::HardReset.code());
}

#[test]
fn self_configuration_status_walks_wire_stride() {
    let stride = 20usize;
    let body_words = (12 + 2 * stride) / 4;
    #[allow(clippy::cast_possible_truncation)]
    let mut frame = response_frame(FN_SELF_CONFIG, 0, body_words as u8);
    frame[6..8].copy_from_slice(&2u16.to_be_bytes()); // total
    frame[10] = 2; // returned
    #[allow(clippy::cast_possible_truncation)]
    {
        frame[11] = (stride / 4) as u8;
    }
    for (i, phy) in [3u8, 8u8].iter().enumerate() {
        let base = 16 + i * stride;
        frame[base] = 0x01;
        frame[base + 3] = *phy;
        frame[base + 8..base + 16]
            .copy_from_slice(&(0x5000_0000_0000_0C00u64 + u64::from(*phy)).to_be_bytes());
    }

    let mut transport = ScriptedTransport::default();
    transport.push_wire_response(frame);

    let mut channel = SmpChannel::new(transport);
    let status = channel.self_configuration_status(0).unwrap();
    assert_eq!(status.descriptor_stride, 20);
    assert_eq!(status.descriptors.len(), 2);
    assert_eq!(status.descriptors[0].phy_identifier, 3);
    assert_eq!(status.descriptors[1].phy_identifier, 8);
    assert_eq!(
        status.descriptors[1].sas_address,
        0x5000_0000_0000_0C08
    );
}
