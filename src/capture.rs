//! Reading HCI packets out of btsnoop and pcap capture files.
//!
//! btsnoop is the format Android writes its Bluetooth HCI logs in, documented at
//! <https://fte.com/webhelpii/bpa600/Content/Technical_Information/BT_Snoop_File_Format.htm>.
//! pcap files are accepted when they use the `BLUETOOTH_HCI_H4_WITH_PHDR`
//! link type, whose 4 byte pseudo-header carries the direction.

use log::{debug, warn};
use nom_derive::{Nom, Parse};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use pcap_file::{pcap::PcapReader, DataLink, PcapError};
use thiserror::Error;

/// The type of datalink header used in the btsnoop packet records.
#[derive(Nom, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DatalinkType {
    UnencapsulatedHci = 1001,
    HciUart = 1002,
    HciBscp = 1003,
    HciSerial = 1004,
}

/// The btsnoop file header.
#[derive(Nom, Debug)]
pub struct BtsnoopHeader<'a> {
    #[nom(Tag(b"btsnoop\0"))]
    pub identification_pattern: &'a [u8],
    #[nom(Verify = "*version == 1")]
    pub version: u32,
    pub datalink_type: DatalinkType,
}

/// Direction of an HCI packet relative to the host that captured it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum Direction {
    /// From the capturing host to its controller, i.e. towards the remote device.
    Sent = 0,
    /// From the controller to the capturing host.
    Received = 1,
    Unknown = 0xff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum CommandFlag {
    Data = 0,
    CommandOrEvent = 1,
}

/// Takes one bit and converts it to `Enum`.
fn parse_single_bit_enum<Enum: FromPrimitive>(
    input: (&[u8], usize),
) -> nom::IResult<(&[u8], usize), Enum> {
    nom::combinator::map_opt(nom::bits::complete::take(1_usize), Enum::from_u8)(input)
}

/// The 32 bit flags field of a btsnoop record. Bit 0 is the direction and bit
/// 1 tells data from commands and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFlags {
    pub direction: Direction,
    pub command: CommandFlag,
}

// nom_derive has no bit-level parsers, so this one is written out.
impl<'a> Parse<&'a [u8]> for PacketFlags {
    fn parse(input: &'a [u8]) -> nom::IResult<&'a [u8], Self> {
        nom::combinator::map(
            nom::bits::bits(nom::sequence::tuple((
                nom::bits::complete::take::<_, u32, _, _>(30_usize),
                parse_single_bit_enum::<CommandFlag>,
                parse_single_bit_enum::<Direction>,
            ))),
            |(_reserved, command, direction)| PacketFlags { direction, command },
        )(input)
    }
}

/// One packet record of a btsnoop file.
#[derive(Nom, Debug)]
pub struct BtsnoopRecord<'a> {
    pub original_length: u32,
    pub included_length: u32,
    pub packet_flags: PacketFlags,
    pub cumulative_drops: u32,
    /// Microseconds since midnight, January 1, 0 AD.
    pub timestamp_microseconds: i64,
    #[nom(Take(included_length))]
    pub packet_data: &'a [u8],
}

/// A whole btsnoop file.
#[derive(Nom, Debug)]
pub struct BtsnoopFile<'a> {
    pub header: BtsnoopHeader<'a>,
    pub records: Vec<BtsnoopRecord<'a>>,
}

/// An HCI packet in H4 framing, i.e. starting with its packet type byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciPacket {
    /// 1-based position of the packet in the capture.
    pub number: u32,
    pub direction: Direction,
    pub data: Vec<u8>,
}

/// Error returned when a capture file cannot be read at all.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("malformed btsnoop file ({0:?})")]
    Btsnoop(nom::error::ErrorKind),
    #[error("btsnoop file is truncated")]
    Truncated,
    #[error("unsupported btsnoop datalink {0:?}, only HCI UART (1002) is supported")]
    UnsupportedDatalink(DatalinkType),
    #[error("unsupported pcap datalink {0:?}, only BLUETOOTH_HCI_H4_WITH_PHDR is supported")]
    UnsupportedPcapDatalink(DataLink),
    #[error(transparent)]
    Pcap(#[from] PcapError),
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for CaptureError {
    fn from(nom_error: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        match nom_error {
            nom::Err::Incomplete(_) => CaptureError::Truncated,
            nom::Err::Error(error) | nom::Err::Failure(error) => CaptureError::Btsnoop(error.code),
        }
    }
}

/// Reads every HCI packet out of a btsnoop or pcap capture.
pub fn read_packets(input: &[u8]) -> Result<Vec<HciPacket>, CaptureError> {
    if input.starts_with(b"btsnoop\0") {
        read_btsnoop(input)
    } else {
        read_pcap(input)
    }
}

fn read_btsnoop(input: &[u8]) -> Result<Vec<HciPacket>, CaptureError> {
    let (rem, file) = BtsnoopFile::parse(input)?;
    if file.header.datalink_type != DatalinkType::HciUart {
        return Err(CaptureError::UnsupportedDatalink(file.header.datalink_type));
    }
    if !rem.is_empty() {
        warn!("Ignoring {} bytes after the last complete btsnoop record", rem.len());
    }
    let commands_and_events = file
        .records
        .iter()
        .filter(|record| record.packet_flags.command == CommandFlag::CommandOrEvent)
        .count();
    debug!(
        "{} btsnoop records, {commands_and_events} of them HCI commands or events",
        file.records.len()
    );
    Ok((1..)
        .zip(file.records)
        .map(|(number, record)| {
            if record.included_length < record.original_length {
                debug!(
                    "Packet {number} truncated to {} of {} bytes",
                    record.included_length, record.original_length
                );
            }
            HciPacket {
                number,
                direction: record.packet_flags.direction,
                data: record.packet_data.to_vec(),
            }
        })
        .collect())
}

fn read_pcap(input: &[u8]) -> Result<Vec<HciPacket>, CaptureError> {
    let mut reader = PcapReader::new(input)?;
    let datalink = reader.header().datalink;
    if datalink != DataLink::BLUETOOTH_HCI_H4_WITH_PHDR {
        return Err(CaptureError::UnsupportedPcapDatalink(datalink));
    }
    let mut packets = Vec::new();
    let mut number = 0_u32;
    while let Some(packet) = reader.next_packet() {
        let packet = packet?;
        number += 1;
        let Some((pseudo_header, data)) = packet.data.split_first_chunk::<4>() else {
            warn!("Packet {number} is too short for the HCI pseudo-header");
            continue;
        };
        let direction =
            Direction::from_u32(u32::from_be_bytes(*pseudo_header)).unwrap_or(Direction::Unknown);
        packets.push(HciPacket {
            number,
            direction,
            data: data.to_vec(),
        });
    }
    Ok(packets)
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(flags: u32, data: &[u8]) -> Vec<u8> {
        let mut record = Vec::new();
        record.extend((data.len() as u32).to_be_bytes());
        record.extend((data.len() as u32).to_be_bytes());
        record.extend(flags.to_be_bytes());
        record.extend(0_u32.to_be_bytes());
        record.extend(0x00dc_ddb3_0000_0000_i64.to_be_bytes());
        record.extend(data);
        record
    }

    fn btsnoop(datalink: u32, records: &[Vec<u8>]) -> Vec<u8> {
        let mut file = b"btsnoop\0".to_vec();
        file.extend(1_u32.to_be_bytes());
        file.extend(datalink.to_be_bytes());
        for record in records {
            file.extend(record);
        }
        file
    }

    #[test]
    fn packet_flags_bit_order() {
        let (_, flags) = PacketFlags::parse(&[0, 0, 0, 0b01]).unwrap();
        assert_eq!(flags.direction, Direction::Received);
        assert_eq!(flags.command, CommandFlag::Data);
        let (_, flags) = PacketFlags::parse(&[0, 0, 0, 0b10]).unwrap();
        assert_eq!(flags.direction, Direction::Sent);
        assert_eq!(flags.command, CommandFlag::CommandOrEvent);
    }

    #[test]
    fn reads_btsnoop_records() {
        let file = btsnoop(
            1002,
            &[record(2, &[0x01, 0x03, 0x0c, 0x00]), record(1, &[0x02, 0x0b, 0x20])],
        );
        let packets = read_packets(&file).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].number, 1);
        assert_eq!(packets[0].direction, Direction::Sent);
        assert_eq!(packets[0].data, vec![0x01, 0x03, 0x0c, 0x00]);
        assert_eq!(packets[1].number, 2);
        assert_eq!(packets[1].direction, Direction::Received);
    }

    #[test]
    fn truncated_btsnoop_keeps_complete_records() {
        let mut file = btsnoop(1002, &[record(0, &[0x04, 0x0e]), record(1, &[0x02; 8])]);
        file.truncate(file.len() - 3);
        let packets = read_packets(&file).unwrap();
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn rejects_other_datalinks() {
        let file = btsnoop(1001, &[]);
        assert!(matches!(
            read_packets(&file),
            Err(CaptureError::UnsupportedDatalink(DatalinkType::UnencapsulatedHci))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(read_packets(b"definitely not a capture file").is_err());
    }
}
