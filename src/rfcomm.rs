//! RFCOMM frame parsing, limited to the UIH frames that carry user data.

use nom::{bytes::complete::take, number::complete::u8 as byte, IResult};
use nom_derive::{Nom, Parse};

use crate::l2cap::FrameError;

/// Control field of a UIH frame, ignoring the poll/final bit.
const CONTROL_UIH: u8 = 0xef;
const POLL_FINAL: u8 = 0x10;

#[derive(Nom, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfcommHeader {
    pub address: u8,
    pub control: u8,
}

impl RfcommHeader {
    pub fn dlci(&self) -> u8 {
        self.address >> 2
    }

    pub fn is_uih(&self) -> bool {
        self.control & !POLL_FINAL == CONTROL_UIH
    }

    /// With credit based flow control, a UIH frame with the poll/final bit
    /// set carries a credit byte before its payload.
    pub fn has_credits(&self) -> bool {
        self.control & POLL_FINAL != 0
    }
}

/// A UIH frame on a data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UihFrame<'a> {
    pub dlci: u8,
    pub credits: Option<u8>,
    pub payload: &'a [u8],
}

/// The length field is one byte, or two when the EA bit of the first is
/// clear.
fn length(input: &[u8]) -> IResult<&[u8], usize> {
    let (input, first) = byte(input)?;
    if first & 1 == 1 {
        return Ok((input, usize::from(first >> 1)));
    }
    let (input, second) = byte(input)?;
    Ok((input, usize::from(first >> 1) | usize::from(second) << 7))
}

fn uih_body(header: RfcommHeader, input: &[u8]) -> IResult<&[u8], UihFrame<'_>> {
    let (input, len) = length(input)?;
    let (input, credits) = if header.has_credits() {
        let (input, credits) = byte(input)?;
        (input, Some(credits))
    } else {
        (input, None)
    };
    let (input, payload) = take(len)(input)?;
    // The FCS follows; it is not checked.
    let (input, _fcs) = byte(input)?;
    Ok((
        input,
        UihFrame {
            dlci: header.dlci(),
            credits,
            payload,
        },
    ))
}

/// Parses an RFCOMM frame. Returns `None` for control frames and for frames
/// on the multiplexer control channel (DLCI 0).
pub fn parse_uih(frame: &[u8]) -> Result<Option<UihFrame<'_>>, FrameError> {
    let (body, header) =
        RfcommHeader::parse(frame).map_err(|_| FrameError::Truncated("RFCOMM header"))?;
    if !header.is_uih() || header.dlci() == 0 {
        return Ok(None);
    }
    let (_, uih) = uih_body(header, body).map_err(|_| FrameError::Truncated("RFCOMM UIH frame"))?;
    Ok(Some(uih))
}
