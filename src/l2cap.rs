//! HCI ACL reassembly and just enough L2CAP to find RFCOMM channels.

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use nom_derive::{Nom, Parse};
use thiserror::Error;

/// H4 packet type of ACL data.
pub const HCI_PACKET_TYPE_ACL_DATA: u8 = 0x02;

const SIGNALING_CID: u16 = 0x0001;
const PSM_RFCOMM: u16 = 0x0003;
const CONNECTION_REQUEST: u8 = 0x02;
const CONNECTION_RESPONSE: u8 = 0x03;
const RESULT_SUCCESS: u16 = 0x0000;

/// Packet boundary flag of a continuing fragment of an L2CAP PDU.
const PB_CONTINUATION: u8 = 0b01;

/// A frame that is too short or otherwise inconsistent. The frame is skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("{0} is truncated")]
    Truncated(&'static str),
    #[error("continuation fragment on handle 0x{0:04x} without a start fragment")]
    OrphanContinuation(u16),
}

#[derive(Nom, Debug, Clone, Copy, PartialEq, Eq)]
#[nom(LittleEndian)]
pub struct AclHeader {
    pub handle_and_flags: u16,
    pub data_length: u16,
}

impl AclHeader {
    pub fn handle(&self) -> u16 {
        self.handle_and_flags & 0x0fff
    }

    pub fn packet_boundary(&self) -> u8 {
        ((self.handle_and_flags >> 12) & 0b11) as u8
    }
}

#[derive(Nom, Debug)]
#[nom(LittleEndian)]
pub struct AclPacket<'a> {
    pub header: AclHeader,
    #[nom(Take = "header.data_length")]
    pub data: &'a [u8],
}

#[derive(Nom, Debug, Clone, Copy, PartialEq, Eq)]
#[nom(LittleEndian)]
pub struct L2capHeader {
    pub length: u16,
    pub cid: u16,
}

impl L2capHeader {
    pub const LENGTH: usize = 4;
}

#[derive(Nom, Debug)]
#[nom(LittleEndian)]
pub struct SignalingCommand<'a> {
    pub code: u8,
    pub identifier: u8,
    pub length: u16,
    #[nom(Take = "length")]
    pub data: &'a [u8],
}

#[derive(Nom, Debug, Clone, Copy, PartialEq, Eq)]
#[nom(LittleEndian)]
pub struct ConnectionRequest {
    pub psm: u16,
    pub source_cid: u16,
}

#[derive(Nom, Debug, Clone, Copy, PartialEq, Eq)]
#[nom(LittleEndian)]
pub struct ConnectionResponse {
    pub destination_cid: u16,
    pub source_cid: u16,
    pub result: u16,
    pub status: u16,
}

/// A complete L2CAP PDU on a dynamically allocated channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L2capPdu {
    pub handle: u16,
    pub cid: u16,
    pub payload: Vec<u8>,
}

/// Reassembles ACL fragments into L2CAP PDUs and follows the signaling
/// channel to learn which channels carry RFCOMM.
#[derive(Debug, Default)]
pub struct L2capTracker {
    /// Partial PDUs per connection handle.
    pending: HashMap<u16, Vec<u8>>,
    /// RFCOMM connection requests awaiting a response, by handle and
    /// requesting CID.
    requests: HashSet<(u16, u16)>,
    rfcomm: HashSet<(u16, u16)>,
}

impl L2capTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `cid` on `handle` is a known RFCOMM channel.
    pub fn is_rfcomm(&self, handle: u16, cid: u16) -> bool {
        self.rfcomm.contains(&(handle, cid))
    }

    /// Takes the body of an HCI ACL data packet (after the H4 type byte).
    /// Returns the PDU it completes, unless that PDU went to the signaling
    /// channel.
    pub fn push_acl(&mut self, acl: &[u8]) -> Result<Option<L2capPdu>, FrameError> {
        let (_, packet) = AclPacket::parse(acl).map_err(|_| FrameError::Truncated("ACL packet"))?;
        let handle = packet.header.handle();
        let buffer = if packet.header.packet_boundary() == PB_CONTINUATION {
            let buffer = self
                .pending
                .get_mut(&handle)
                .ok_or(FrameError::OrphanContinuation(handle))?;
            buffer.extend_from_slice(packet.data);
            buffer
        } else {
            let buffer = self.pending.entry(handle).or_default();
            if !buffer.is_empty() {
                debug!("Handle 0x{handle:04x}: dropping incomplete L2CAP PDU");
            }
            buffer.clear();
            buffer.extend_from_slice(packet.data);
            buffer
        };

        let Ok((_, header)) = L2capHeader::parse(buffer.as_slice()) else {
            return Ok(None);
        };
        let total = L2capHeader::LENGTH + usize::from(header.length);
        if buffer.len() < total {
            debug!("Handle 0x{handle:04x}: {} of {total} L2CAP bytes", buffer.len());
            return Ok(None);
        }
        let Some(mut pdu) = self.pending.remove(&handle) else {
            return Ok(None);
        };
        pdu.truncate(total);
        let payload = pdu.split_off(L2capHeader::LENGTH);
        if header.cid == SIGNALING_CID {
            self.signaling(handle, &payload)?;
            return Ok(None);
        }
        Ok(Some(L2capPdu {
            handle,
            cid: header.cid,
            payload,
        }))
    }

    fn signaling(&mut self, handle: u16, mut payload: &[u8]) -> Result<(), FrameError> {
        while !payload.is_empty() {
            let (rest, command) = SignalingCommand::parse(payload)
                .map_err(|_| FrameError::Truncated("L2CAP signaling command"))?;
            payload = rest;
            debug!(
                "Handle 0x{handle:04x}: signaling command 0x{:02x} (id {})",
                command.code, command.identifier
            );
            match command.code {
                CONNECTION_REQUEST => {
                    let (_, request) = ConnectionRequest::parse(command.data)
                        .map_err(|_| FrameError::Truncated("L2CAP connection request"))?;
                    if request.psm == PSM_RFCOMM {
                        self.requests.insert((handle, request.source_cid));
                    }
                }
                CONNECTION_RESPONSE => {
                    let (_, response) = ConnectionResponse::parse(command.data)
                        .map_err(|_| FrameError::Truncated("L2CAP connection response"))?;
                    if response.result != RESULT_SUCCESS {
                        debug!(
                            "Connection refused: result 0x{:04x} status 0x{:04x}",
                            response.result, response.status
                        );
                    } else if self.requests.remove(&(handle, response.source_cid)) {
                        info!(
                            "RFCOMM channel on handle 0x{handle:04x}: CIDs 0x{:04x} and 0x{:04x}",
                            response.source_cid, response.destination_cid
                        );
                        self.rfcomm.insert((handle, response.source_cid));
                        self.rfcomm.insert((handle, response.destination_cid));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn acl(handle: u16, boundary: u16, data: &[u8]) -> Vec<u8> {
        let mut packet = (handle | boundary << 12).to_le_bytes().to_vec();
        packet.extend((data.len() as u16).to_le_bytes());
        packet.extend(data);
        packet
    }

    fn l2cap(cid: u16, payload: &[u8]) -> Vec<u8> {
        let mut pdu = (payload.len() as u16).to_le_bytes().to_vec();
        pdu.extend(cid.to_le_bytes());
        pdu.extend(payload);
        pdu
    }

    fn open_rfcomm(tracker: &mut L2capTracker) {
        let request = l2cap(1, &[0x02, 0x01, 0x04, 0x00, 0x03, 0x00, 0x40, 0x00]);
        assert_eq!(tracker.push_acl(&acl(0x0b, 0b10, &request)), Ok(None));
        let response = l2cap(
            1,
            &[0x03, 0x01, 0x08, 0x00, 0x41, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00],
        );
        assert_eq!(tracker.push_acl(&acl(0x0b, 0b00, &response)), Ok(None));
    }

    #[test]
    fn signaling_registers_rfcomm_channels() {
        let mut tracker = L2capTracker::new();
        open_rfcomm(&mut tracker);
        assert!(tracker.is_rfcomm(0x0b, 0x40));
        assert!(tracker.is_rfcomm(0x0b, 0x41));
        assert!(!tracker.is_rfcomm(0x0c, 0x40));
    }

    #[test]
    fn other_psms_are_ignored() {
        let mut tracker = L2capTracker::new();
        let request = l2cap(1, &[0x02, 0x01, 0x04, 0x00, 0x01, 0x00, 0x40, 0x00]);
        tracker.push_acl(&acl(0x0b, 0b10, &request)).unwrap();
        let response = l2cap(
            1,
            &[0x03, 0x01, 0x08, 0x00, 0x41, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00],
        );
        tracker.push_acl(&acl(0x0b, 0b10, &response)).unwrap();
        assert!(!tracker.is_rfcomm(0x0b, 0x40));
    }

    #[test]
    fn continuation_fragments_are_joined() {
        let mut tracker = L2capTracker::new();
        let pdu = l2cap(0x40, b"0123456789");
        assert_eq!(tracker.push_acl(&acl(0x0b, 0b10, &pdu[..6])), Ok(None));
        assert_eq!(
            tracker.push_acl(&acl(0x0b, 0b01, &pdu[6..])),
            Ok(Some(L2capPdu {
                handle: 0x0b,
                cid: 0x40,
                payload: b"0123456789".to_vec(),
            }))
        );
    }

    #[test]
    fn orphan_continuation_is_an_error() {
        let mut tracker = L2capTracker::new();
        assert_eq!(
            tracker.push_acl(&acl(0x0b, 0b01, b"xx")),
            Err(FrameError::OrphanContinuation(0x0b))
        );
    }

    #[test]
    fn truncated_acl_is_an_error() {
        let mut tracker = L2capTracker::new();
        assert_eq!(
            tracker.push_acl(&[0x0b, 0x20, 0x09]),
            Err(FrameError::Truncated("ACL packet"))
        );
    }
}
