//! Detection of line terminators in freshly appended fragments.

use log::debug;

use crate::{
    fragment::{FragmentId, FragmentStore, ReassemblyState},
    stream::{Role, StreamKey},
};

/// Scans the fragment of `key` received in `frame_number` for the role's line
/// terminator and records what it finds on that fragment.
///
/// Returns the fragment's state after the scan, or `None` if the role has no
/// framing or nothing was stored for the frame. Scanning the same fragment
/// again is wasted work but never moves its state backward.
pub fn scan(store: &mut FragmentStore, key: &StreamKey, frame_number: u32) -> Option<ReassemblyState> {
    let framing = key.role.framing()?;
    let id = store.lookup_id(key, frame_number)?;
    let fragment = store.get(key, id)?;
    let data = fragment.data();

    // The first terminator closes the message in progress, the last one opens
    // the next message.
    let mut terminators = data
        .iter()
        .enumerate()
        .filter(|(_, byte)| **byte == framing.terminator)
        .map(|(i, _)| i + 1);
    let Some(end) = terminators.next() else {
        return Some(fragment.state());
    };
    let start = terminators.last().unwrap_or(end);
    let terminated = start == data.len();

    let state = match key.role {
        Role::HeadsetSide if terminated => ReassemblyState::Done,
        Role::HeadsetSide => ReassemblyState::Partially,
        Role::GatewaySide if terminated && byte_before_last(store, key, id) == Some(b'\r') => {
            if data.len() >= 4 && data.starts_with(b"\r\n") {
                ReassemblyState::Done
            } else if earlier_head_opens_response(store, key, frame_number) {
                ReassemblyState::Done
            } else {
                ReassemblyState::Fragment
            }
        }
        Role::GatewaySide => ReassemblyState::Fragment,
        Role::Unknown => return None,
    };

    let fragment = store.get_mut(key, id)?;
    fragment.mark(state, start, end);
    debug!(
        "Frame {frame_number} of {key:?}: terminators end={end} start={start}, now {:?}",
        fragment.state()
    );
    Some(fragment.state())
}

/// The byte before the last one of the fragment `id`. For a one byte
/// fragment that is the last byte of its predecessor in the chain.
fn byte_before_last(store: &FragmentStore, key: &StreamKey, id: FragmentId) -> Option<u8> {
    let fragment = store.get(key, id)?;
    match fragment.data() {
        [.., before, _] => Some(*before),
        [_] => {
            let previous = store.get(key, fragment.previous()?)?;
            previous.data().last().copied()
        }
        [] => None,
    }
}

/// Whether the message the fragment at `frame_number` belongs to was opened by
/// an earlier, still incomplete fragment starting with `\r\n`.
fn earlier_head_opens_response(store: &FragmentStore, key: &StreamKey, frame_number: u32) -> bool {
    let Some(id) = store.lookup_id(key, frame_number) else {
        return false;
    };
    let head = store
        .chain(key, id)
        .find(|fragment| fragment.idx() == 0 || fragment.state() == ReassemblyState::Partially);
    head.is_some_and(|head| {
        head.frame_number() != frame_number
            && head.state() == ReassemblyState::Fragment
            && head.data().starts_with(b"\r\n")
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn key(role: Role) -> StreamKey {
        StreamKey {
            interface_id: 0,
            adapter_id: 0,
            connection_handle: 0x0b,
            dlci: 2,
            role,
        }
    }

    fn feed(store: &mut FragmentStore, key: &StreamKey, frame: u32, data: &[u8]) -> ReassemblyState {
        store.append(*key, frame, data).unwrap();
        scan(store, key, frame).unwrap()
    }

    #[test]
    fn headset_terminator_at_end_is_done() {
        let hs = key(Role::HeadsetSide);
        let mut store = FragmentStore::new();
        assert_eq!(feed(&mut store, &hs, 1, b"AT+BR"), ReassemblyState::Fragment);
        assert_eq!(feed(&mut store, &hs, 2, b"SF=3"), ReassemblyState::Fragment);
        assert_eq!(feed(&mut store, &hs, 3, b"\r"), ReassemblyState::Done);
    }

    #[test]
    fn headset_terminator_midway_is_partial() {
        let hs = key(Role::HeadsetSide);
        let mut store = FragmentStore::new();
        assert_eq!(
            feed(&mut store, &hs, 1, b"=1\rAT+B\rAT+C"),
            ReassemblyState::Partially
        );
        let fragment = store.lookup_at_or_before(&hs, 1).unwrap();
        assert_eq!(fragment.reassemble_end_offset(), 3);
        assert_eq!(fragment.reassemble_start_offset(), 8);
    }

    #[test]
    fn headset_several_lines_ending_in_terminator_are_done() {
        let hs = key(Role::HeadsetSide);
        let mut store = FragmentStore::new();
        assert_eq!(
            feed(&mut store, &hs, 1, b"ATA\rAT+CHUP\r"),
            ReassemblyState::Done
        );
    }

    #[test]
    fn gateway_self_contained_unit_is_done() {
        let ag = key(Role::GatewaySide);
        let mut store = FragmentStore::new();
        assert_eq!(feed(&mut store, &ag, 1, b"\r\nOK\r\n"), ReassemblyState::Done);
    }

    #[test]
    fn gateway_closes_message_opened_earlier() {
        let ag = key(Role::GatewaySide);
        let mut store = FragmentStore::new();
        assert_eq!(feed(&mut store, &ag, 1, b"\r\n+CIND: "), ReassemblyState::Fragment);
        assert_eq!(feed(&mut store, &ag, 2, b"1,0,0"), ReassemblyState::Fragment);
        assert_eq!(feed(&mut store, &ag, 3, b",3\r\n"), ReassemblyState::Done);
    }

    #[test]
    fn gateway_bare_crlf_waits_for_the_rest() {
        let ag = key(Role::GatewaySide);
        let mut store = FragmentStore::new();
        assert_eq!(feed(&mut store, &ag, 1, b"\r\n"), ReassemblyState::Fragment);
        assert_eq!(feed(&mut store, &ag, 2, b"OK\r\n"), ReassemblyState::Done);
    }

    #[test]
    fn gateway_without_leading_crlf_stays_open() {
        let ag = key(Role::GatewaySide);
        let mut store = FragmentStore::new();
        assert_eq!(feed(&mut store, &ag, 1, b"OK\r\n"), ReassemblyState::Fragment);
        assert_eq!(feed(&mut store, &ag, 2, b"\r\nRING\r\n"), ReassemblyState::Done);
    }

    #[test]
    fn gateway_final_lf_alone_closes_message() {
        let ag = key(Role::GatewaySide);
        let mut store = FragmentStore::new();
        assert_eq!(
            feed(&mut store, &ag, 1, b"\r\n+CIND: 1,2\r\n\r\nOK\r"),
            ReassemblyState::Fragment
        );
        assert_eq!(feed(&mut store, &ag, 2, b"\n"), ReassemblyState::Done);
    }

    #[test]
    fn gateway_lone_lf_after_other_byte_stays_open() {
        let ag = key(Role::GatewaySide);
        let mut store = FragmentStore::new();
        assert_eq!(feed(&mut store, &ag, 1, b"\r\nOK"), ReassemblyState::Fragment);
        assert_eq!(feed(&mut store, &ag, 2, b"\n"), ReassemblyState::Fragment);
    }

    #[test]
    fn gateway_lf_without_cr_stays_open() {
        let ag = key(Role::GatewaySide);
        let mut store = FragmentStore::new();
        assert_eq!(feed(&mut store, &ag, 1, b"\r\nOK\n"), ReassemblyState::Fragment);
    }

    #[test]
    fn rescan_keeps_state() {
        let hs = key(Role::HeadsetSide);
        let mut store = FragmentStore::new();
        feed(&mut store, &hs, 1, b"ATA\r");
        assert_eq!(scan(&mut store, &hs, 1), Some(ReassemblyState::Done));
        assert_eq!(scan(&mut store, &hs, 1), Some(ReassemblyState::Done));
    }

    #[test]
    fn unknown_role_is_not_scanned() {
        let unknown = key(Role::Unknown);
        let mut store = FragmentStore::new();
        store.append(unknown, 1, b"ATA\r").unwrap();
        assert_eq!(scan(&mut store, &unknown, 1), None);
    }
}
