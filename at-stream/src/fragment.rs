//! Per-stream log of received chunks and the chains that link them into
//! messages.

use std::{
    collections::{BTreeMap, HashMap},
    ops::Range,
};

use log::debug;

use crate::{error::StoreError, stream::StreamKey};

/// How far reassembly of the message ending at a fragment has progressed.
///
/// The variants are ordered; a fragment's state only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReassemblyState {
    /// The message is not known to be complete yet.
    Fragment,
    /// The fragment closes one message part way through and opens the next one.
    Partially,
    /// The message ends with this fragment.
    Done,
}

impl ReassemblyState {
    /// Moves to `to` if it is further along. Backward transitions are ignored.
    pub fn advance(&mut self, to: ReassemblyState) {
        if to > *self {
            *self = to;
        }
    }
}

/// Index of a fragment in its stream's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentId(usize);

/// One chunk of bytes as received on a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    frame_number: u32,
    idx: usize,
    data: Vec<u8>,
    previous: Option<FragmentId>,
    state: ReassemblyState,
    reassemble_start_offset: usize,
    reassemble_end_offset: usize,
}

impl Fragment {
    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }

    /// Offset of this fragment's first contributed byte within its message.
    pub fn idx(&self) -> usize {
        self.idx
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The prior fragment of the same message, if any.
    pub fn previous(&self) -> Option<FragmentId> {
        self.previous
    }

    pub fn state(&self) -> ReassemblyState {
        self.state
    }

    /// Offset just past the last terminator in this fragment.
    pub fn reassemble_start_offset(&self) -> usize {
        self.reassemble_start_offset
    }

    /// Offset just past the first terminator in this fragment.
    pub fn reassemble_end_offset(&self) -> usize {
        self.reassemble_end_offset
    }

    /// Bytes this fragment contributes to the message it closes or continues.
    pub(crate) fn closing_range(&self) -> Range<usize> {
        match self.state {
            ReassemblyState::Partially => 0..self.reassemble_end_offset,
            _ => 0..self.data.len(),
        }
    }

    /// Complete lines between the first and the last terminator of a
    /// partially terminated fragment.
    pub(crate) fn interior_range(&self) -> Range<usize> {
        match self.state {
            ReassemblyState::Partially => self.reassemble_end_offset..self.reassemble_start_offset,
            _ => 0..0,
        }
    }

    /// Bytes this fragment hands over as the head of the following message.
    pub(crate) fn carried_range(&self) -> Range<usize> {
        match self.state {
            ReassemblyState::Partially => self.reassemble_start_offset..self.data.len(),
            _ => self.data.len()..self.data.len(),
        }
    }

    pub(crate) fn mark(&mut self, state: ReassemblyState, start: usize, end: usize) {
        self.state.advance(state);
        self.reassemble_start_offset = start;
        self.reassemble_end_offset = end;
    }
}

#[derive(Debug, Default)]
struct StreamLog {
    fragments: Vec<Fragment>,
    by_frame: BTreeMap<u32, FragmentId>,
}

impl StreamLog {
    fn at_or_before(&self, frame_number: u32) -> Option<FragmentId> {
        self.by_frame
            .range(..=frame_number)
            .next_back()
            .map(|(_, id)| *id)
    }

    fn get(&self, id: FragmentId) -> Option<&Fragment> {
        self.fragments.get(id.0)
    }
}

/// All fragments seen during one capture session, grouped by stream.
///
/// Fragments are appended during the first pass over each frame, in frame
/// order, and are never removed; the store is dropped with the session.
#[derive(Debug, Default)]
pub struct FragmentStore {
    streams: HashMap<StreamKey, StreamLog>,
}

impl FragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` as the fragment of `key` received in `frame_number`.
    ///
    /// The fragment is chained to the latest earlier fragment of the stream
    /// unless that one already completed its message.
    pub fn append(
        &mut self,
        key: StreamKey,
        frame_number: u32,
        data: &[u8],
    ) -> Result<FragmentId, StoreError> {
        let log = self.streams.entry(key).or_default();
        if log.by_frame.contains_key(&frame_number) {
            return Err(StoreError::DuplicateFrame { frame_number });
        }
        let previous = log
            .at_or_before(frame_number)
            .filter(|id| log.fragments[id.0].state != ReassemblyState::Done);
        let idx = match previous.map(|id| &log.fragments[id.0]) {
            None => 0,
            Some(prev) if prev.state == ReassemblyState::Partially => prev.carried_range().len(),
            Some(prev) => prev.idx + prev.len(),
        };
        let id = FragmentId(log.fragments.len());
        log.fragments.push(Fragment {
            frame_number,
            idx,
            data: data.to_vec(),
            previous,
            state: ReassemblyState::Fragment,
            reassemble_start_offset: 0,
            reassemble_end_offset: 0,
        });
        log.by_frame.insert(frame_number, id);
        debug!(
            "Appended frame {frame_number} to {key:?} at idx {idx} ({} bytes, chained: {})",
            data.len(),
            previous.is_some()
        );
        Ok(id)
    }

    /// The most recent fragment of `key` received at or before `frame_number`.
    pub fn lookup_at_or_before(&self, key: &StreamKey, frame_number: u32) -> Option<&Fragment> {
        let log = self.streams.get(key)?;
        log.get(log.at_or_before(frame_number)?)
    }

    pub(crate) fn lookup_id(&self, key: &StreamKey, frame_number: u32) -> Option<FragmentId> {
        self.streams.get(key)?.at_or_before(frame_number)
    }

    /// Whether a fragment was appended for exactly this frame.
    pub fn contains(&self, key: &StreamKey, frame_number: u32) -> bool {
        self.streams
            .get(key)
            .is_some_and(|log| log.by_frame.contains_key(&frame_number))
    }

    pub fn get(&self, key: &StreamKey, id: FragmentId) -> Option<&Fragment> {
        self.streams.get(key)?.get(id)
    }

    pub(crate) fn get_mut(&mut self, key: &StreamKey, id: FragmentId) -> Option<&mut Fragment> {
        self.streams.get_mut(key)?.fragments.get_mut(id.0)
    }

    /// Iterates the chain ending at `id`, tail first, following every
    /// back-reference.
    pub fn chain<'s>(&'s self, key: &StreamKey, id: FragmentId) -> impl Iterator<Item = &'s Fragment> {
        let log = self.streams.get(key);
        let mut next = log.and_then(|log| log.get(id));
        std::iter::from_fn(move || {
            let current = next?;
            next = current.previous.and_then(|prev| log?.get(prev));
            Some(current)
        })
    }

    /// Number of fragments stored for `key`.
    pub fn fragment_count(&self, key: &StreamKey) -> usize {
        self.streams.get(key).map_or(0, |log| log.fragments.len())
    }

    /// Every stream seen so far.
    pub fn streams(&self) -> impl Iterator<Item = &StreamKey> {
        self.streams.keys()
    }

    #[cfg(test)]
    pub(crate) fn set_idx(&mut self, key: &StreamKey, id: FragmentId, idx: usize) {
        if let Some(fragment) = self.get_mut(key, id) {
            fragment.idx = idx;
        }
    }
}
