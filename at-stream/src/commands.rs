//! Command tables for the Hands-Free and Headset profiles.
//!
//! Tables are scanned in order and the first entry whose name prefixes the
//! mnemonic wins, so an entry must come before any shorter entry that is a
//! prefix of it (`DELAYED` before `D`).

use std::fmt;

use crate::{error::ParameterError, stream::Role, tokenizer::CommandType};

/// Decides whether a role may send a command with the given type.
pub type UsageCheck = fn(Role, CommandType) -> bool;

/// The shape a command declares for one of its parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterKind {
    /// A decimal number in `min..=max`.
    Integer { min: i64, max: i64 },
    /// A string enclosed in double quotes.
    QuotedString,
    /// Free-form text, including parenthesised lists.
    Text,
}

/// A decoded parameter value. Borrowed from the message being tokenized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterValue<'a> {
    /// The parameter was left blank, e.g. the middle of `1,,0`.
    Empty,
    Integer(i64),
    /// Contents of a quoted string, without the quotes.
    String(&'a [u8]),
    Text(&'a [u8]),
}

impl ParameterKind {
    /// Decodes `bytes` as this kind. Blank parameters are always accepted.
    pub fn check(self, bytes: &[u8]) -> Result<ParameterValue<'_>, ParameterError> {
        if bytes.is_empty() {
            return Ok(ParameterValue::Empty);
        }
        match self {
            ParameterKind::Integer { min, max } => {
                let value: i64 = std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|text| text.trim().parse().ok())
                    .ok_or(ParameterError::NotANumber)?;
                if (min..=max).contains(&value) {
                    Ok(ParameterValue::Integer(value))
                } else {
                    Err(ParameterError::OutOfRange { value, min, max })
                }
            }
            ParameterKind::QuotedString => bytes
                .strip_prefix(b"\"")
                .and_then(|inner| inner.strip_suffix(b"\""))
                .map(ParameterValue::String)
                .ok_or(ParameterError::Unquoted),
            ParameterKind::Text => Ok(ParameterValue::Text(bytes)),
        }
    }
}

/// The parameter list a command declares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parameters {
    /// Positional parameters; anything past the end is unknown.
    Fixed(&'static [ParameterKind]),
    /// Any number of parameters of the same kind.
    Repeated(ParameterKind),
}

/// One row of a command table.
#[derive(Clone, Copy)]
pub struct CommandEntry {
    /// The mnemonic as it appears after `AT`, upper-cased.
    pub name: &'static str,
    pub long_name: &'static str,
    pub check: UsageCheck,
    pub parameters: Parameters,
}

impl CommandEntry {
    /// Whether `role` may send this command with `command_type`.
    pub fn allows(&self, role: Role, command_type: CommandType) -> bool {
        (self.check)(role, command_type)
    }

    /// Basic commands are single letters (or words) without a `+` prefix.
    pub fn is_basic(&self) -> bool {
        !self.name.is_empty() && !self.name.starts_with('+')
    }

    /// A basic command with parameters takes its argument right after the
    /// name, as in `ATD5551234;`.
    pub fn takes_inline_argument(&self) -> bool {
        self.is_basic() && self.parameters != NONE
    }

    /// The declared kind of the parameter at `index`, if any.
    pub fn parameter_kind(&self, index: usize) -> Option<ParameterKind> {
        match self.parameters {
            Parameters::Fixed(kinds) => kinds.get(index).copied(),
            Parameters::Repeated(kind) => Some(kind),
        }
    }
}

impl fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEntry")
            .field("name", &self.name)
            .field("long_name", &self.long_name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

// Entries are identified by their mnemonic; the checker is not comparable.
impl PartialEq for CommandEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.long_name == other.long_name
    }
}

impl Eq for CommandEntry {}

/// Returns the first entry of `table` matching `mnemonic`.
///
/// Extended (`+`) commands and result codes must match exactly. Basic
/// commands with parameters, such as `D`, only need to prefix the mnemonic,
/// since their argument follows the name without a separator.
pub fn lookup(table: &'static [CommandEntry], mnemonic: &[u8]) -> Option<&'static CommandEntry> {
    table.iter().find(|entry| {
        let name = entry.name.as_bytes();
        mnemonic == name || (entry.takes_inline_argument() && mnemonic.starts_with(name))
    })
}

fn is_response(command_type: CommandType) -> bool {
    matches!(command_type, CommandType::Response | CommandType::ResponseAck)
}

/// Sent by the headset as a command, answered by the gateway with a response
/// of the same name.
fn headset_command_gateway_response(role: Role, command_type: CommandType) -> bool {
    match role {
        Role::HeadsetSide => command_type != CommandType::Unknown && !is_response(command_type),
        Role::GatewaySide => command_type == CommandType::Response,
        Role::Unknown => false,
    }
}

fn headset_action(role: Role, command_type: CommandType) -> bool {
    role == Role::HeadsetSide && command_type == CommandType::Action
}

fn headset_simple_action(role: Role, command_type: CommandType) -> bool {
    role == Role::HeadsetSide && command_type == CommandType::ActionSimply
}

/// `ATD` carries its dial string inline, so it has no type marker.
fn headset_dial(role: Role, command_type: CommandType) -> bool {
    role == Role::HeadsetSide
        && matches!(
            command_type,
            CommandType::Action | CommandType::ActionSimply | CommandType::Unknown
        )
}

fn gateway_unsolicited(role: Role, command_type: CommandType) -> bool {
    role == Role::GatewaySide && command_type == CommandType::Response
}

fn gateway_result_code(role: Role, command_type: CommandType) -> bool {
    role == Role::GatewaySide && command_type == CommandType::ResponseAck
}

/// HSP reports gain changes with `=` in both directions.
fn either_side_gain(role: Role, command_type: CommandType) -> bool {
    role != Role::Unknown && matches!(command_type, CommandType::Action | CommandType::Response)
}

const fn command(
    name: &'static str,
    long_name: &'static str,
    check: UsageCheck,
    parameters: Parameters,
) -> CommandEntry {
    CommandEntry {
        name,
        long_name,
        check,
        parameters,
    }
}

const NONE: Parameters = Parameters::Fixed(&[]);
const FLAG: ParameterKind = ParameterKind::Integer { min: 0, max: 1 };
const GAIN: ParameterKind = ParameterKind::Integer { min: 0, max: 15 };
const NUMBER_TYPE: ParameterKind = ParameterKind::Integer { min: 0, max: 255 };
const CODEC: ParameterKind = ParameterKind::Integer { min: 1, max: 255 };

/// Commands and result codes of the Hands-Free Profile.
pub static HFP_COMMANDS: &[CommandEntry] = &[
    command(
        "+BRSF",
        "Bluetooth Retrieve Supported Features",
        headset_command_gateway_response,
        Parameters::Fixed(&[ParameterKind::Integer { min: 0, max: 0xFFFF }]),
    ),
    command(
        "+BAC",
        "Bluetooth Available Codecs",
        headset_action,
        Parameters::Repeated(CODEC),
    ),
    command(
        "+BCS",
        "Bluetooth Codec Selection",
        headset_command_gateway_response,
        Parameters::Fixed(&[CODEC]),
    ),
    command(
        "+BCC",
        "Bluetooth Codec Connection",
        headset_simple_action,
        NONE,
    ),
    command(
        "+CIND",
        "Call Indicators",
        headset_command_gateway_response,
        Parameters::Repeated(ParameterKind::Text),
    ),
    command(
        "+CIEV",
        "Indicator Events Reporting",
        gateway_unsolicited,
        Parameters::Fixed(&[
            ParameterKind::Integer { min: 1, max: 20 },
            ParameterKind::Integer { min: 0, max: 5 },
        ]),
    ),
    command(
        "+CMER",
        "Event Reporting Activation/Deactivation",
        headset_action,
        Parameters::Fixed(&[
            ParameterKind::Integer { min: 3, max: 3 },
            ParameterKind::Integer { min: 0, max: 0 },
            ParameterKind::Integer { min: 0, max: 0 },
            FLAG,
        ]),
    ),
    command(
        "+CHLD",
        "Call Hold and Multiparty Handling",
        headset_command_gateway_response,
        Parameters::Repeated(ParameterKind::Text),
    ),
    command(
        "+CME ERROR",
        "Extended Audio Gateway Error Result Code",
        gateway_unsolicited,
        Parameters::Fixed(&[ParameterKind::Integer { min: 0, max: 32 }]),
    ),
    command(
        "+CMEE",
        "Mobile Equipment Error",
        headset_action,
        Parameters::Fixed(&[FLAG]),
    ),
    command(
        "+CLIP",
        "Calling Line Identification Notification",
        headset_command_gateway_response,
        Parameters::Fixed(&[ParameterKind::Text, NUMBER_TYPE]),
    ),
    command(
        "+CCWA",
        "Call Waiting Notification",
        headset_command_gateway_response,
        Parameters::Fixed(&[ParameterKind::Text, NUMBER_TYPE]),
    ),
    command(
        "+COPS",
        "Reading of Network Operator",
        headset_command_gateway_response,
        Parameters::Fixed(&[
            ParameterKind::Integer { min: 0, max: 3 },
            ParameterKind::Integer { min: 0, max: 0 },
            ParameterKind::QuotedString,
        ]),
    ),
    command(
        "+CLCC",
        "Current Calls",
        headset_command_gateway_response,
        Parameters::Fixed(&[
            ParameterKind::Integer { min: 1, max: 7 },
            FLAG,
            ParameterKind::Integer { min: 0, max: 5 },
            ParameterKind::Integer { min: 0, max: 2 },
            FLAG,
            ParameterKind::QuotedString,
            NUMBER_TYPE,
        ]),
    ),
    command(
        "+CNUM",
        "Subscriber Number Information",
        headset_command_gateway_response,
        Parameters::Fixed(&[
            ParameterKind::Text,
            ParameterKind::QuotedString,
            NUMBER_TYPE,
            ParameterKind::Text,
            ParameterKind::Integer { min: 0, max: 5 },
        ]),
    ),
    command(
        "+CHUP",
        "Call Hang-up",
        headset_simple_action,
        NONE,
    ),
    command(
        "+CKPD",
        "Control Keypad",
        headset_action,
        Parameters::Fixed(&[ParameterKind::Integer { min: 200, max: 200 }]),
    ),
    command(
        "+BIA",
        "Bluetooth Indicators Activation",
        headset_action,
        Parameters::Repeated(FLAG),
    ),
    command(
        "+BIND",
        "Bluetooth HF Indicators Feature",
        headset_command_gateway_response,
        Parameters::Repeated(ParameterKind::Text),
    ),
    command(
        "+BIEV",
        "Bluetooth HF Indicator Value",
        headset_action,
        Parameters::Fixed(&[
            ParameterKind::Integer { min: 1, max: 2 },
            ParameterKind::Integer { min: 0, max: 100 },
        ]),
    ),
    command(
        "+BVRA",
        "Bluetooth Voice Recognition Activation",
        headset_command_gateway_response,
        Parameters::Fixed(&[FLAG]),
    ),
    command(
        "+BINP",
        "Bluetooth Input",
        headset_command_gateway_response,
        Parameters::Fixed(&[ParameterKind::Text]),
    ),
    command(
        "+BLDN",
        "Bluetooth Last Dialed Number",
        headset_simple_action,
        NONE,
    ),
    command(
        "+BTRH",
        "Bluetooth Response and Hold Feature",
        headset_command_gateway_response,
        Parameters::Fixed(&[ParameterKind::Integer { min: 0, max: 2 }]),
    ),
    command(
        "+BSIR",
        "Bluetooth Setting of In-band Ring Tone",
        gateway_unsolicited,
        Parameters::Fixed(&[FLAG]),
    ),
    command(
        "+NREC",
        "Noise Reduction and Echo Canceling",
        headset_action,
        Parameters::Fixed(&[ParameterKind::Integer { min: 0, max: 0 }]),
    ),
    command(
        "+VGS",
        "Gain of Speaker",
        headset_command_gateway_response,
        Parameters::Fixed(&[GAIN]),
    ),
    command(
        "+VGM",
        "Gain of Microphone",
        headset_command_gateway_response,
        Parameters::Fixed(&[GAIN]),
    ),
    command(
        "+VTS",
        "DTMF and Tone Generation",
        headset_action,
        Parameters::Fixed(&[ParameterKind::Text]),
    ),
    command("A", "Call Answer", headset_simple_action, NONE),
    command("DELAYED", "Delayed", gateway_result_code, NONE),
    command("D", "Dial", headset_dial, Parameters::Fixed(&[ParameterKind::Text])),
    command("RING", "Incoming Call Indication", gateway_result_code, NONE),
    command("OK", "OK", gateway_result_code, NONE),
    command("ERROR", "Error", gateway_result_code, NONE),
    command("NO CARRIER", "No Carrier", gateway_result_code, NONE),
    command("NO ANSWER", "No Answer", gateway_result_code, NONE),
    command("BUSY", "Busy", gateway_result_code, NONE),
    command("BLACKLISTED", "Blacklisted", gateway_result_code, NONE),
];

/// Commands and result codes of the Headset Profile.
pub static HSP_COMMANDS: &[CommandEntry] = &[
    command(
        "+CKPD",
        "Control Keypad",
        headset_action,
        Parameters::Fixed(&[ParameterKind::Integer { min: 200, max: 200 }]),
    ),
    command(
        "+VGS",
        "Gain of Speaker",
        either_side_gain,
        Parameters::Fixed(&[GAIN]),
    ),
    command(
        "+VGM",
        "Gain of Microphone",
        either_side_gain,
        Parameters::Fixed(&[GAIN]),
    ),
    command("RING", "Incoming Call Indication", gateway_result_code, NONE),
    command("OK", "OK", gateway_result_code, NONE),
    command("ERROR", "Error", gateway_result_code, NONE),
];

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_is_first_match() {
        assert_eq!(lookup(HFP_COMMANDS, b"DELAYED").unwrap().name, "DELAYED");
        assert_eq!(lookup(HFP_COMMANDS, b"D5551234").unwrap().name, "D");
        assert_eq!(lookup(HFP_COMMANDS, b"+CME ERROR").unwrap().name, "+CME ERROR");
        assert_eq!(lookup(HFP_COMMANDS, b"+CMEE").unwrap().name, "+CMEE");
        assert!(lookup(HFP_COMMANDS, b"+XAPL").is_none());
        assert!(lookup(HFP_COMMANDS, b"+VGSX").is_none());
        assert!(lookup(HSP_COMMANDS, b"+BRSF").is_none());
        assert_eq!(lookup(HFP_COMMANDS, b"OK").unwrap().name, "OK");
        assert_eq!(lookup(HFP_COMMANDS, b"A").unwrap().name, "A");
        assert!(lookup(HFP_COMMANDS, b"OKAY").is_none());
        assert!(lookup(HFP_COMMANDS, b"RINGING").is_none());
        assert!(lookup(HFP_COMMANDS, b"ALERT").is_none());
        assert!(lookup(HSP_COMMANDS, b"ERRORS").is_none());
    }

    #[test]
    fn longer_names_precede_their_prefixes() {
        for table in [HFP_COMMANDS, HSP_COMMANDS] {
            for (i, earlier) in table.iter().enumerate() {
                for later in &table[i + 1..] {
                    assert!(
                        !later.name.starts_with(earlier.name),
                        "{} shadows {}",
                        earlier.name,
                        later.name
                    );
                }
            }
        }
    }

    #[test]
    fn usage_checks_follow_direction() {
        let brsf = lookup(HFP_COMMANDS, b"+BRSF").unwrap();
        assert!(brsf.allows(Role::HeadsetSide, CommandType::Action));
        assert!(brsf.allows(Role::GatewaySide, CommandType::Response));
        assert!(!brsf.allows(Role::GatewaySide, CommandType::Action));
        let ok = lookup(HFP_COMMANDS, b"OK").unwrap();
        assert!(ok.allows(Role::GatewaySide, CommandType::ResponseAck));
        assert!(!ok.allows(Role::HeadsetSide, CommandType::ResponseAck));
        let vgs = lookup(HSP_COMMANDS, b"+VGS").unwrap();
        assert!(vgs.allows(Role::GatewaySide, CommandType::Action));
    }

    #[test]
    fn integer_range_is_checked() {
        let kind = ParameterKind::Integer { min: 0, max: 15 };
        assert_eq!(kind.check(b"12"), Ok(ParameterValue::Integer(12)));
        assert_eq!(kind.check(b" 7"), Ok(ParameterValue::Integer(7)));
        assert_eq!(
            kind.check(b"16"),
            Err(ParameterError::OutOfRange {
                value: 16,
                min: 0,
                max: 15
            })
        );
        assert_eq!(kind.check(b"x"), Err(ParameterError::NotANumber));
        assert_eq!(kind.check(b""), Ok(ParameterValue::Empty));
    }

    #[test]
    fn quoted_strings_lose_their_quotes() {
        assert_eq!(
            ParameterKind::QuotedString.check(b"\"+15551234\""),
            Ok(ParameterValue::String(b"+15551234"))
        );
        assert_eq!(
            ParameterKind::QuotedString.check(b"15551234"),
            Err(ParameterError::Unquoted)
        );
    }

    #[test]
    fn repeated_parameters_have_a_kind_at_any_index() {
        let bac = lookup(HFP_COMMANDS, b"+BAC").unwrap();
        assert_eq!(bac.parameter_kind(5), Some(CODEC));
        let chup = lookup(HFP_COMMANDS, b"+CHUP").unwrap();
        assert_eq!(chup.parameter_kind(0), None);
    }
}
