#![deny(unused_must_use)]

use std::path::PathBuf;

use anyhow::Context as _;
use at_stream::{AtDissector, Dissection, Profile, Role, StreamKey};
use capture::{Direction, HciPacket};
use clap::{Parser, ValueEnum};
use l2cap::{L2capTracker, HCI_PACKET_TYPE_ACL_DATA};
use log::{debug, info, warn};
use render::TreePrinter;

mod capture;
mod l2cap;
mod render;
mod rfcomm;

/// Reassembles and decodes the Hands-Free / Headset profile AT commands in a
/// Bluetooth HCI capture (btsnoop or pcap).
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Path to the capture file.
    pub capture: PathBuf,

    /// Treat every frame as sent by this role, regardless of its direction.
    #[arg(long, value_enum)]
    pub role: Option<RoleArg>,

    /// Role of the device the capture was taken on. Frames it sent get this
    /// role and frames it received get the other one.
    #[arg(long, value_enum, default_value_t = RoleArg::Ag)]
    pub local_role: RoleArg,

    /// Profile whose command set is used to decode the commands.
    #[arg(long, value_enum, default_value_t = ProfileArg::Hfp)]
    pub profile: ProfileArg,

    /// Run a silent first pass over the capture and print from a second one,
    /// the way capture analysers revisit frames.
    #[arg(long)]
    pub two_pass: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    /// Headset or hands-free unit.
    Hs,
    /// Audio gateway, usually the phone.
    Ag,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Hs => Role::HeadsetSide,
            RoleArg::Ag => Role::GatewaySide,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProfileArg {
    Hfp,
    Hsp,
}

impl From<ProfileArg> for Profile {
    fn from(profile: ProfileArg) -> Self {
        match profile {
            ProfileArg::Hfp => Profile::Hfp,
            ProfileArg::Hsp => Profile::Hsp,
        }
    }
}

/// Decides the role of each frame, either from a forced preference or from
/// the frame's direction relative to the capturing device.
#[derive(Debug, Clone, Copy)]
pub struct RoleResolver {
    forced: Option<Role>,
    local: Role,
}

impl RoleResolver {
    pub fn new(forced: Option<Role>, local: Role) -> Self {
        RoleResolver { forced, local }
    }

    pub fn resolve(&self, direction: Direction) -> Role {
        if let Some(role) = self.forced {
            return role;
        }
        match direction {
            Direction::Sent => self.local,
            Direction::Received => self.local.peer(),
            Direction::Unknown => Role::Unknown,
        }
    }
}

/// The AT payload of one RFCOMM UIH frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtFrame {
    pub number: u32,
    pub key: StreamKey,
    pub payload: Vec<u8>,
}

/// Walks HCI ACL, L2CAP and RFCOMM down to the AT payloads. Frames that fail
/// to parse are logged and skipped.
fn extract_at_frames(packets: &[HciPacket], roles: &RoleResolver) -> Vec<AtFrame> {
    let mut tracker = L2capTracker::new();
    let mut frames = Vec::new();
    for packet in packets {
        let Some((&HCI_PACKET_TYPE_ACL_DATA, acl)) = packet.data.split_first() else {
            continue;
        };
        let pdu = match tracker.push_acl(acl) {
            Ok(Some(pdu)) => pdu,
            Ok(None) => continue,
            Err(e) => {
                warn!("Frame {}: {e}", packet.number);
                continue;
            }
        };
        if !tracker.is_rfcomm(pdu.handle, pdu.cid) {
            continue;
        }
        let uih = match rfcomm::parse_uih(&pdu.payload) {
            Ok(Some(uih)) => uih,
            Ok(None) => continue,
            Err(e) => {
                warn!("Frame {}: {e}", packet.number);
                continue;
            }
        };
        if let Some(credits) = uih.credits {
            debug!("Frame {}: {credits} credits on DLCI {}", packet.number, uih.dlci);
        }
        frames.push(AtFrame {
            number: packet.number,
            key: StreamKey {
                interface_id: 0,
                adapter_id: 0,
                connection_handle: pdu.handle,
                dlci: uih.dlci,
                role: roles.resolve(packet.direction),
            },
            payload: uih.payload.to_vec(),
        });
    }
    frames
}

/// Dissects one frame and renders the result below a header line.
fn render_frame(
    dissector: &mut AtDissector,
    frame: &AtFrame,
    is_first_pass: bool,
) -> Vec<String> {
    let mut printer = TreePrinter::new();
    let result = dissector.dissect(frame.number, frame.key, &frame.payload, is_first_pass, &mut printer);
    let mut lines = match result {
        Ok(Dissection::Skipped) => return Vec::new(),
        Ok(Dissection::Pending { .. }) => vec!["Fragment: waiting for the rest of the message".to_owned()],
        Ok(Dissection::Complete { .. }) => printer.take_lines(),
        Err(e) => {
            warn!("Frame {}: {e}", frame.number);
            printer.take_lines()
        }
    };
    lines.insert(
        0,
        format!(
            "Frame {}: {} handle 0x{:04x} dlci {}",
            frame.number, frame.key.role, frame.key.connection_handle, frame.key.dlci
        ),
    );
    for line in &mut lines[1..] {
        line.insert_str(0, "  ");
    }
    lines
}

fn dissect_silently(dissector: &mut AtDissector, frame: &AtFrame) {
    if let Err(e) = dissector.dissect(frame.number, frame.key, &frame.payload, true, &mut ()) {
        debug!("Frame {}: {e}", frame.number);
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    debug!("Running with args: {args:#?}");

    let bytes = std::fs::read(&args.capture)
        .with_context(|| format!("Unable to read capture file {}", args.capture.display()))?;
    let packets = capture::read_packets(&bytes)
        .with_context(|| format!("Unable to parse capture file {}", args.capture.display()))?;
    info!("Read {} HCI packets", packets.len());

    let roles = RoleResolver::new(args.role.map(Role::from), args.local_role.into());
    let frames = extract_at_frames(&packets, &roles);
    info!("Found {} RFCOMM frames", frames.len());

    let mut dissector = AtDissector::new(args.profile.into());
    if args.two_pass {
        for frame in &frames {
            dissect_silently(&mut dissector, frame);
        }
    }
    let is_first_pass = !args.two_pass;
    for frame in &frames {
        for line in render_frame(&mut dissector, frame, is_first_pass) {
            println!("{line}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn local_role_follows_direction() {
        let roles = RoleResolver::new(None, Role::GatewaySide);
        assert_eq!(roles.resolve(Direction::Sent), Role::GatewaySide);
        assert_eq!(roles.resolve(Direction::Received), Role::HeadsetSide);
        assert_eq!(roles.resolve(Direction::Unknown), Role::Unknown);
    }

    #[test]
    fn forced_role_wins() {
        let roles = RoleResolver::new(Some(Role::HeadsetSide), Role::GatewaySide);
        assert_eq!(roles.resolve(Direction::Sent), Role::HeadsetSide);
        assert_eq!(roles.resolve(Direction::Unknown), Role::HeadsetSide);
    }

    #[test]
    fn args_parse() {
        let args = Args::try_parse_from(["bt-at-dissect", "x.log", "--local-role", "hs", "--two-pass"])
            .unwrap();
        assert_eq!(args.local_role, RoleArg::Hs);
        assert_eq!(args.profile, ProfileArg::Hfp);
        assert!(args.two_pass);
        assert!(args.role.is_none());
    }
}
