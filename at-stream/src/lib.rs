//! Reassembly and tokenizing of the AT command streams that Bluetooth
//! Hands-Free and Headset profile devices exchange over RFCOMM.
//!
//! A single AT command line often arrives split across several RFCOMM
//! frames, and one frame may carry the end of one line and the start of the
//! next. [`AtDissector`] keeps a log of every frame's payload per
//! [`StreamKey`], joins the fragments into complete messages once a line
//! terminator shows up, and splits each message into command and parameter
//! tokens that are reported to a [`FieldEmitter`].
//!
//! ## Example
//!
//! ```rust
//! use at_stream::{AtDissector, Dissection, Profile, Role, StreamKey};
//!
//! let key = StreamKey {
//!     interface_id: 0,
//!     adapter_id: 0,
//!     connection_handle: 0x0b,
//!     dlci: 2,
//!     role: Role::HeadsetSide,
//! };
//! let mut dissector = AtDissector::new(Profile::Hfp);
//! let frames: [(u32, &[u8]); 3] = [(1, b"AT+BR"), (2, b"SF=3"), (3, b"\r")];
//! for (frame, payload) in frames {
//!     if let Dissection::Complete { messages, .. } =
//!         dissector.dissect(frame, key, payload, true, &mut ()).unwrap()
//!     {
//!         assert_eq!(messages[0].bytes, b"AT+BRSF=3\r");
//!         assert_eq!(messages[0].commands[0].command.name(), "+BRSF");
//!     }
//! }
//! ```

pub mod boundary;
pub mod commands;
mod dissector;
mod emitter;
mod error;
mod fragment;
pub mod reassemble;
mod stream;
pub mod tokenizer;

pub use commands::{CommandEntry, ParameterKind, ParameterValue, Parameters, HFP_COMMANDS, HSP_COMMANDS};
pub use dissector::{AtDissector, Dissection, Message};
pub use emitter::FieldEmitter;
pub use error::{DissectError, ParameterError, ReassemblyError, StoreError};
pub use fragment::{Fragment, FragmentId, FragmentStore, ReassemblyState};
pub use reassemble::Reassembled;
pub use stream::{Framing, Profile, Role, StreamKey};
pub use tokenizer::{CommandToken, CommandType, Mnemonic, Parameter, ParameterToken, Span, Tokenizer};
