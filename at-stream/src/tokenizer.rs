//! Splits a reassembled message into command and parameter tokens.

use std::{fmt, ops::Range};

use log::trace;

use crate::{
    commands::{self, CommandEntry, ParameterKind, ParameterValue},
    emitter::FieldEmitter,
    error::ParameterError,
    stream::{Framing, Role},
};

/// A byte range within a reassembled message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn new(offset: usize, len: usize) -> Self {
        Span { offset, len }
    }

    fn between(start: usize, end: usize) -> Self {
        Span::new(start, end.saturating_sub(start))
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The bytes of `buffer` covered by this span.
    pub fn slice<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        buffer.get(self.range()).unwrap_or_default()
    }
}

/// The kind of a command, taken from the bytes right after its mnemonic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandType {
    Unknown,
    /// `AT+X=...`
    Action,
    /// `AT+X\r`
    ActionSimply,
    /// `AT+X?`
    Read,
    /// `AT+X=?`
    Test,
    /// `+X: ...`
    Response,
    /// A result code on its own line, `OK\r\n`.
    ResponseAck,
}

impl CommandType {
    /// The marker bytes packed big endian, as shown by analysers.
    pub fn code(self) -> u16 {
        match self {
            CommandType::Unknown => 0x0000,
            CommandType::Action => 0x003d,
            CommandType::ActionSimply => 0x000d,
            CommandType::Read => 0x003f,
            CommandType::Test => 0x3d3f,
            CommandType::Response => 0x003a,
            CommandType::ResponseAck => 0x0d0a,
        }
    }

    /// Only actions and responses carry a parameter list.
    pub fn takes_parameters(self) -> bool {
        matches!(self, CommandType::Action | CommandType::Response)
    }

    pub fn description(self) -> &'static str {
        match self {
            CommandType::Unknown => "Unknown",
            CommandType::Action => "Action Command",
            CommandType::ActionSimply => "Action Command (simple)",
            CommandType::Read => "Read Command",
            CommandType::Test => "Test Command",
            CommandType::Response => "Response",
            CommandType::ResponseAck => "Response (result code)",
        }
    }

    /// Whether the marker doubles as the line terminator and is left for the
    /// end of the command to consume.
    fn marker_is_terminator(self) -> bool {
        matches!(self, CommandType::ActionSimply | CommandType::ResponseAck)
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:04x})", self.description(), self.code())
    }
}

/// What a command's mnemonic resolved to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mnemonic {
    Known(&'static CommandEntry),
    /// A bare `AT` with nothing after it.
    Attention,
    /// Not in the command table.
    Unknown,
}

impl Mnemonic {
    pub fn entry(self) -> Option<&'static CommandEntry> {
        match self {
            Mnemonic::Known(entry) => Some(entry),
            Mnemonic::Attention | Mnemonic::Unknown => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Mnemonic::Known(entry) => entry.name,
            Mnemonic::Attention => "AT",
            Mnemonic::Unknown => "Unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterToken {
    pub span: Span,
    pub index: usize,
}

/// One command of a message, with the parameters it was given.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandToken {
    /// Position of the command within its message, starting at 0.
    pub number: usize,
    /// The whole command, from its `AT` prefix (if any) through the
    /// separator or terminator that ends it.
    pub span: Span,
    pub mnemonic: Span,
    pub command: Mnemonic,
    pub command_type: CommandType,
    pub parameters: Vec<ParameterToken>,
}

/// A parameter as handed to [`FieldEmitter::emit_parameter`].
#[derive(Clone, Copy, Debug)]
pub struct Parameter<'a> {
    pub span: Span,
    /// The parameter's bytes, in their original case.
    pub bytes: &'a [u8],
    pub command: Option<&'static CommandEntry>,
    pub index: usize,
    pub role: Role,
    pub command_type: CommandType,
}

impl<'a> Parameter<'a> {
    /// What the command table declares for this parameter.
    pub fn kind(&self) -> Option<ParameterKind> {
        self.command?.parameter_kind(self.index)
    }

    /// Decodes the parameter according to its declared kind.
    pub fn check(&self) -> Option<Result<ParameterValue<'a>, ParameterError>> {
        Some(self.kind()?.check(self.bytes))
    }
}

/// Tokenizes messages of one role against one command table.
#[derive(Clone, Copy, Debug)]
pub struct Tokenizer {
    role: Role,
    framing: Framing,
    commands: &'static [CommandEntry],
}

impl Tokenizer {
    /// Returns `None` for [`Role::Unknown`], which has no framing.
    pub fn new(role: Role, commands: &'static [CommandEntry]) -> Option<Self> {
        Some(Tokenizer {
            role,
            framing: role.framing()?,
            commands,
        })
    }

    /// Tokenizes one complete message, reporting every token to `emitter` as
    /// it is found.
    pub fn tokenize<E: FieldEmitter + ?Sized>(&self, message: &[u8], emitter: &mut E) -> Vec<CommandToken> {
        let upper = message.to_ascii_uppercase();
        emitter.begin_message(message);

        let mut tokens = Vec::new();
        let mut pos = 0;
        let mut chained = false;
        while pos < message.len() {
            let mut ignored = None;
            let mut prefix = None;
            if chained {
                pos = skip_blanks(message, pos);
            } else if self.framing.requires_at_prefix {
                let Some(found) = find_at(&upper[pos..]) else {
                    if !is_blank(&message[pos..]) {
                        emitter.emit_ignored(Span::between(pos, message.len()));
                    }
                    break;
                };
                if found > 0 {
                    ignored = Some(Span::new(pos, found));
                }
                prefix = Some(Span::new(pos + found, 2));
                pos += found + 2;
            } else {
                pos = skip_line_breaks(message, pos);
                if pos == message.len() {
                    break;
                }
            }

            let number = tokens.len();
            let command_start = prefix.map_or(pos, |span| span.offset);
            emitter.begin_command(number, command_start);
            if let Some(span) = ignored {
                emitter.emit_ignored(span);
            }
            if let Some(span) = prefix {
                emitter.emit_prefix(span);
            }

            let (token, chains) = self.command(message, &upper, number, command_start, pos, emitter);
            pos = token.span.end();
            chained = chains;
            emitter.end_command(&token);
            trace!("Tokenized {:?} {}", token.command.name(), token.command_type);
            tokens.push(token);
        }
        tokens
    }

    /// Tokenizes one command whose mnemonic starts at `pos`. Also returns
    /// whether another command is chained onto it with `;`.
    fn command<E: FieldEmitter + ?Sized>(
        &self,
        message: &[u8],
        upper: &[u8],
        number: usize,
        command_start: usize,
        mut pos: usize,
        emitter: &mut E,
    ) -> (CommandToken, bool) {
        let region_end = upper[pos..]
            .iter()
            .position(|byte| matches!(byte, b'\r' | b'=' | b';' | b'?' | b':'))
            .map_or(upper.len(), |i| pos + i);
        let region = &upper[pos..region_end];

        let (mut command_type, marker_len) = match &upper[region_end..] {
            [b'=', b'?', ..] => (CommandType::Test, 2),
            [b'\r', b'\n', ..] if !self.framing.requires_at_prefix => (CommandType::ResponseAck, 2),
            [b'=', ..] => (CommandType::Action, 1),
            [b'\r', ..] => (CommandType::ActionSimply, 1),
            [b':', ..] => (CommandType::Response, 1),
            [b'?', ..] => (CommandType::Read, 1),
            _ => (CommandType::Unknown, 0),
        };

        let (command, mnemonic, inline) = match commands::lookup(self.commands, region) {
            Some(entry) => {
                let name = Span::new(pos, entry.name.len());
                let inline = (name.end() < region_end).then(|| Span::between(name.end(), region_end));
                (Mnemonic::Known(entry), name, inline)
            }
            None if region.is_empty() && command_type == CommandType::ActionSimply => {
                (Mnemonic::Attention, Span::new(pos, 0), None)
            }
            None => (Mnemonic::Unknown, Span::between(pos, region_end), None),
        };
        emitter.emit_command(mnemonic, command);
        if command == Mnemonic::Unknown {
            emitter.flag_non_standard(mnemonic);
        }

        let type_span = if inline.is_some() {
            // `ATD5551234;` carries its argument in place of a type marker.
            command_type = CommandType::Action;
            Span::new(mnemonic.end(), 0)
        } else {
            Span::new(region_end, marker_len)
        };
        emitter.emit_type(type_span, command_type);
        if !self.allows(command, command_type) {
            emitter.flag_invalid_usage(mnemonic);
        }

        pos = region_end;
        if !command_type.marker_is_terminator() && inline.is_none() {
            pos += marker_len;
        }

        let mut parameters = Vec::new();
        if let Some(span) = inline {
            parameters.push(self.parameter(message, command, command_type, span, 0, emitter));
        } else if command_type.takes_parameters() {
            pos = self.parameters(message, command, command_type, pos, emitter, &mut parameters);
        }
        let (end, chains) = self.consume_end(message, scan(message, pos, b";"));

        let token = CommandToken {
            number,
            span: Span::between(command_start, end),
            mnemonic,
            command,
            command_type,
            parameters,
        };
        (token, chains)
    }

    /// Splits the parameter list starting at `pos` on top level commas.
    /// Returns the offset just past the list.
    fn parameters<E: FieldEmitter + ?Sized>(
        &self,
        message: &[u8],
        command: Mnemonic,
        command_type: CommandType,
        mut pos: usize,
        emitter: &mut E,
        parameters: &mut Vec<ParameterToken>,
    ) -> usize {
        for index in 0.. {
            let begin = skip_blanks(message, pos);
            let stop = scan(message, begin, b",;");
            let end = begin + trim_blanks_end(&message[begin..stop]).len();
            let span = Span::between(begin, end);
            let followed_by_comma = message.get(stop) == Some(&b',');
            pos = stop;
            if index == 0 && span.is_empty() && !followed_by_comma {
                emitter.emit_no_parameters(span);
                break;
            }
            parameters.push(self.parameter(message, command, command_type, span, index, emitter));
            if !followed_by_comma {
                break;
            }
            pos += 1;
        }
        pos
    }

    fn parameter<E: FieldEmitter + ?Sized>(
        &self,
        message: &[u8],
        command: Mnemonic,
        command_type: CommandType,
        span: Span,
        index: usize,
        emitter: &mut E,
    ) -> ParameterToken {
        let parameter = Parameter {
            span,
            bytes: span.slice(message),
            command: command.entry(),
            index,
            role: self.role,
            command_type,
        };
        if !emitter.emit_parameter(&parameter) {
            emitter.emit_unknown_parameter(span);
        }
        ParameterToken { span, index }
    }

    /// Consumes the `;` or line terminator ending a command. A `;` followed
    /// by nothing but the terminator does not chain.
    fn consume_end(&self, message: &[u8], mut pos: usize) -> (usize, bool) {
        if message.get(pos) == Some(&b';') {
            pos += 1;
            let next = skip_blanks(message, pos);
            if next < message.len() && message[next] != b'\r' {
                return (pos, true);
            }
            pos = next;
        }
        if message.get(pos) == Some(&b'\r') {
            pos += 1;
            if !self.framing.requires_at_prefix && message.get(pos) == Some(&b'\n') {
                pos += 1;
            }
        }
        (pos, false)
    }

    fn allows(&self, command: Mnemonic, command_type: CommandType) -> bool {
        match command {
            Mnemonic::Known(entry) => entry.allows(self.role, command_type),
            Mnemonic::Attention => self.role == Role::HeadsetSide,
            Mnemonic::Unknown => true,
        }
    }
}

/// Offset of the first `\r`, or of the first of `separators` outside quotes
/// and parentheses, at or after `from`. An unclosed quote or parenthesis runs
/// to the end of the line.
fn scan(message: &[u8], from: usize, separators: &[u8]) -> usize {
    let mut quoted = false;
    let mut depth = 0_usize;
    for (i, byte) in message.iter().enumerate().skip(from) {
        match byte {
            b'\r' => return i,
            b'"' => quoted = !quoted,
            b'(' if !quoted => depth += 1,
            b')' if !quoted => depth = depth.saturating_sub(1),
            byte if !quoted && depth == 0 && separators.contains(byte) => return i,
            _ => {}
        }
    }
    message.len()
}

fn find_at(upper: &[u8]) -> Option<usize> {
    upper.windows(2).position(|window| window == b"AT")
}

fn is_blank_byte(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t')
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

fn skip_blanks(message: &[u8], from: usize) -> usize {
    from + message[from.min(message.len())..]
        .iter()
        .take_while(|byte| is_blank_byte(**byte))
        .count()
}

fn skip_line_breaks(message: &[u8], from: usize) -> usize {
    from + message[from..]
        .iter()
        .take_while(|byte| matches!(byte, b'\r' | b'\n' | b' ' | b'\t'))
        .count()
}

fn trim_blanks_end(bytes: &[u8]) -> &[u8] {
    let len = bytes.len() - bytes.iter().rev().take_while(|byte| is_blank_byte(**byte)).count();
    &bytes[..len]
}
