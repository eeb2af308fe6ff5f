//! The sink that tokens are reported to while a message is tokenized.

use crate::{
    error::ReassemblyError,
    tokenizer::{CommandToken, CommandType, Mnemonic, Parameter, Span},
};

/// Receives tokens as the tokenizer finds them.
///
/// Every method has an empty default, so a sink only overrides what it
/// renders. Spans are relative to the message passed to
/// [`begin_message`][FieldEmitter::begin_message].
pub trait FieldEmitter {
    /// Called once per complete message, before any of its tokens.
    fn begin_message(&mut self, _message: &[u8]) {}

    fn begin_command(&mut self, _number: usize, _offset: usize) {}

    /// Bytes skipped while looking for the next `AT` prefix.
    fn emit_ignored(&mut self, _span: Span) {}

    /// The `AT` prefix of a headset command line.
    fn emit_prefix(&mut self, _span: Span) {}

    fn emit_command(&mut self, _span: Span, _command: Mnemonic) {}

    fn emit_type(&mut self, _span: Span, _command_type: CommandType) {}

    /// Dissects one parameter. Returns whether the parameter was understood;
    /// if not, it is reported again through
    /// [`emit_unknown_parameter`][FieldEmitter::emit_unknown_parameter].
    ///
    /// By default a parameter is understood when its command declares it.
    fn emit_parameter(&mut self, parameter: &Parameter<'_>) -> bool {
        parameter.kind().is_some()
    }

    fn emit_unknown_parameter(&mut self, _span: Span) {}

    /// The command takes parameters but was given none.
    fn emit_no_parameters(&mut self, _span: Span) {}

    /// The mnemonic is not in the command table.
    fn flag_non_standard(&mut self, _span: Span) {}

    /// The command is not allowed for the sending role with this type.
    fn flag_invalid_usage(&mut self, _span: Span) {}

    /// The message for this frame could not be reassembled.
    fn flag_internal_error(&mut self, _error: &ReassemblyError) {}

    fn end_command(&mut self, _token: &CommandToken) {}
}

/// Discards everything.
impl FieldEmitter for () {}
