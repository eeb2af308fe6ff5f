//! Errors surfaced by the reassembly engine.
//!
//! None of these abort a capture session. A failed frame is reported next to
//! whatever was decoded for it and the next frame is processed as usual.

use thiserror::Error;

/// Misuse of the [`FragmentStore`][crate::FragmentStore].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Frames may only be appended once, during their first pass.
    #[error("frame {frame_number} was already appended to this stream")]
    DuplicateFrame { frame_number: u32 },
}

/// The fragment chain backing a message violates its own invariants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    /// Walking back from the tail did not land on offset 0 of the message.
    #[error("fragment chain ending at frame {frame_number} does not start at offset 0")]
    BrokenChain { frame_number: u32 },
    /// A fragment refers to a predecessor that is not in the store.
    #[error("predecessor of fragment at frame {frame_number} (offset {idx}) is missing")]
    MissingPredecessor { frame_number: u32, idx: usize },
}

/// Error returned by [`AtDissector::dissect`][crate::AtDissector::dissect].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DissectError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),
}

/// A parameter that does not match what its command declares. These are
/// warnings: sibling parameters are still decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    #[error("value {value} is outside of {min}..={max}")]
    OutOfRange { value: i64, min: i64, max: i64 },
    #[error("expected a number")]
    NotANumber,
    #[error("expected a double-quoted string")]
    Unquoted,
}
