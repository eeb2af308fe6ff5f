//! Materializes complete messages out of fragment chains.
//!
//! Nothing here mutates the store, so the same frame can be materialized on
//! every pass and always yields the same bytes.

use std::ops::Range;

use crate::{
    error::ReassemblyError,
    fragment::{Fragment, FragmentStore, ReassemblyState},
    stream::StreamKey,
};

/// Every complete message that became available with one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reassembled {
    /// The messages in wire order. The first one is the message closed by the
    /// frame; a partially terminated frame may add the complete lines that
    /// follow it.
    pub messages: Vec<Vec<u8>>,
    /// Bytes of the frame that open the next, still incomplete, message.
    pub carried: Option<Range<usize>>,
}

/// Returns the message ending at the fragment of `key` at or before
/// `frame_number`, or `None` when that fragment does not complete a message.
pub fn materialize(
    store: &FragmentStore,
    key: &StreamKey,
    frame_number: u32,
) -> Result<Option<Vec<u8>>, ReassemblyError> {
    let Some(tail) = store.lookup_at_or_before(key, frame_number) else {
        return Ok(None);
    };
    if tail.state() == ReassemblyState::Fragment {
        return Ok(None);
    }

    let tail_range = tail.closing_range();
    let mut message = vec![0_u8; tail.idx() + tail_range.len()];
    let mut remaining = message.len();
    let mut segment = Segment {
        fragment: tail,
        range: tail_range,
        is_head: tail.idx() == 0,
    };
    loop {
        let bytes = &segment.fragment.data()[segment.range.clone()];
        let start = remaining
            .checked_sub(bytes.len())
            .ok_or(ReassemblyError::BrokenChain {
                frame_number: tail.frame_number(),
            })?;
        message[start..remaining].copy_from_slice(bytes);
        remaining = start;
        if segment.is_head || remaining == 0 {
            break;
        }
        match Segment::previous(store, key, segment.fragment)? {
            Some(previous) => segment = previous,
            None => break,
        }
    }
    if remaining != 0 || !segment.is_head {
        return Err(ReassemblyError::BrokenChain {
            frame_number: tail.frame_number(),
        });
    }
    Ok(Some(message))
}

/// Like [`materialize`], but also returns the complete lines that a partially
/// terminated fragment holds past the message it closes.
pub fn materialize_all(
    store: &FragmentStore,
    key: &StreamKey,
    frame_number: u32,
) -> Result<Option<Reassembled>, ReassemblyError> {
    let Some(first) = materialize(store, key, frame_number)? else {
        return Ok(None);
    };
    let mut reassembled = Reassembled {
        messages: vec![first],
        carried: None,
    };
    if let Some(tail) = store
        .lookup_at_or_before(key, frame_number)
        .filter(|tail| tail.state() == ReassemblyState::Partially)
    {
        let interior = tail.interior_range();
        if !interior.is_empty() {
            reassembled.messages.push(tail.data()[interior].to_vec());
        }
        reassembled.carried = Some(tail.carried_range());
    }
    Ok(Some(reassembled))
}

/// The bytes one fragment contributes while walking a chain backward.
struct Segment<'s> {
    fragment: &'s Fragment,
    range: Range<usize>,
    is_head: bool,
}

impl<'s> Segment<'s> {
    fn previous(
        store: &'s FragmentStore,
        key: &StreamKey,
        fragment: &Fragment,
    ) -> Result<Option<Self>, ReassemblyError> {
        let Some(id) = fragment.previous() else {
            return Ok(None);
        };
        let previous = store
            .get(key, id)
            .ok_or(ReassemblyError::MissingPredecessor {
                frame_number: fragment.frame_number(),
                idx: fragment.idx(),
            })?;
        Ok(Some(if previous.state() == ReassemblyState::Partially {
            // A partially terminated predecessor only lends the head it carries.
            Segment {
                fragment: previous,
                range: previous.carried_range(),
                is_head: true,
            }
        } else {
            Segment {
                fragment: previous,
                range: 0..previous.len(),
                is_head: previous.idx() == 0,
            }
        }))
    }
}
