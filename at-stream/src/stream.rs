//! Identity of one logical AT command channel.

use std::fmt;

use crate::commands::{CommandEntry, HFP_COMMANDS, HSP_COMMANDS};

/// Which end of the AT command channel produced a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// The headset or hands-free unit. It sends `AT` prefixed command lines terminated by `\r`.
    HeadsetSide,
    /// The audio gateway (usually the phone). It sends `\r\n` framed result codes.
    GatewaySide,
    /// Role inference has not completed yet. Frames with this role are never reassembled.
    Unknown,
}

impl Role {
    /// Framing rules used by this role, or `None` for [`Role::Unknown`].
    pub fn framing(self) -> Option<Framing> {
        match self {
            Role::HeadsetSide => Some(Framing::HEADSET),
            Role::GatewaySide => Some(Framing::GATEWAY),
            Role::Unknown => None,
        }
    }

    /// The role on the other end of the channel.
    pub fn peer(self) -> Role {
        match self {
            Role::HeadsetSide => Role::GatewaySide,
            Role::GatewaySide => Role::HeadsetSide,
            Role::Unknown => Role::Unknown,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::HeadsetSide => "HS",
            Role::GatewaySide => "AG",
            Role::Unknown => "unknown",
        })
    }
}

/// Role specific framing of the AT stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Framing {
    /// The byte that ends a line.
    pub terminator: u8,
    /// Whether each command line starts with `AT`.
    pub requires_at_prefix: bool,
}

impl Framing {
    pub const HEADSET: Framing = Framing {
        terminator: b'\r',
        requires_at_prefix: true,
    };
    pub const GATEWAY: Framing = Framing {
        terminator: b'\n',
        requires_at_prefix: false,
    };
}

/// Identifies one direction of one AT command channel.
///
/// Fragments are only ever chained with fragments of the same key, so the role
/// is part of the key: the two directions of a DLCI reassemble independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    pub interface_id: u32,
    pub adapter_id: u32,
    pub connection_handle: u16,
    pub dlci: u8,
    pub role: Role,
}

/// The Bluetooth profile spoken on the channel. Selects the command table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Hands-Free Profile.
    Hfp,
    /// Headset Profile.
    Hsp,
}

impl Profile {
    pub fn commands(self) -> &'static [CommandEntry] {
        match self {
            Profile::Hfp => HFP_COMMANDS,
            Profile::Hsp => HSP_COMMANDS,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Profile::Hfp => "HFP",
            Profile::Hsp => "HSP",
        })
    }
}
