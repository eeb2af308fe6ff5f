//! Text rendering of dissected AT commands.

use std::ascii;

use at_stream::{
    CommandToken, CommandType, FieldEmitter, Mnemonic, Parameter, ParameterValue,
    ReassemblyError, Span,
};

/// Escapes `bytes` so that line terminators and other control bytes show.
pub fn escape(bytes: &[u8]) -> String {
    bytes
        .iter()
        .flat_map(|byte| ascii::escape_default(*byte))
        .map(char::from)
        .collect()
}

/// Renders tokens as an indented tree, one line per field.
#[derive(Debug, Default)]
pub struct TreePrinter {
    message: Vec<u8>,
    lines: Vec<String>,
}

impl TreePrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lines rendered so far and starts over.
    pub fn take_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }

    fn text(&self, span: Span) -> String {
        escape(span.slice(&self.message))
    }

    fn field(&mut self, line: String) {
        self.lines.push(format!("    {line}"));
    }
}

impl FieldEmitter for TreePrinter {
    fn begin_message(&mut self, message: &[u8]) {
        self.message = message.to_vec();
        self.lines.push(format!("Message: \"{}\"", escape(message)));
    }

    fn begin_command(&mut self, number: usize, _offset: usize) {
        self.lines.push(format!("  Command {number}"));
    }

    fn emit_ignored(&mut self, span: Span) {
        let line = format!("Ignored: \"{}\"", self.text(span));
        self.field(line);
    }

    fn emit_prefix(&mut self, span: Span) {
        let line = format!("Prefix: {}", self.text(span));
        self.field(line);
    }

    fn emit_command(&mut self, span: Span, command: Mnemonic) {
        let line = match command {
            Mnemonic::Known(entry) => format!("Mnemonic: {} ({})", entry.name, entry.long_name),
            Mnemonic::Attention => "Mnemonic: AT (Attention)".to_owned(),
            Mnemonic::Unknown => format!("Mnemonic: {} (Unknown)", self.text(span)),
        };
        self.field(line);
    }

    fn emit_type(&mut self, _span: Span, command_type: CommandType) {
        self.field(format!("Type: {command_type}"));
    }

    fn emit_parameter(&mut self, parameter: &Parameter<'_>) -> bool {
        let Some(checked) = parameter.check() else {
            return false;
        };
        let index = parameter.index;
        let line = match checked {
            Ok(ParameterValue::Empty) => format!("Parameter {index}: (empty)"),
            Ok(ParameterValue::Integer(value)) => format!("Parameter {index}: {value}"),
            Ok(ParameterValue::String(value)) => format!("Parameter {index}: \"{}\"", escape(value)),
            Ok(ParameterValue::Text(value)) => format!("Parameter {index}: {}", escape(value)),
            Err(error) => format!(
                "Parameter {index}: {} [warning: {error}]",
                escape(parameter.bytes)
            ),
        };
        self.field(line);
        true
    }

    fn emit_unknown_parameter(&mut self, span: Span) {
        let line = format!("Unknown parameter: {}", self.text(span));
        self.field(line);
    }

    fn emit_no_parameters(&mut self, _span: Span) {
        self.field("No parameters".to_owned());
    }

    fn flag_non_standard(&mut self, _span: Span) {
        self.field("[non-standard command]".to_owned());
    }

    fn flag_invalid_usage(&mut self, _span: Span) {
        self.field("[warning: command not allowed in this direction]".to_owned());
    }

    fn flag_internal_error(&mut self, error: &ReassemblyError) {
        self.lines.push(format!("[internal error: {error}]"));
    }

    fn end_command(&mut self, token: &CommandToken) {
        if token.command_type == CommandType::Unknown && token.command == Mnemonic::Unknown {
            self.field("[malformed command]".to_owned());
        }
    }
}
