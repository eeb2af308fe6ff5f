//! Entry point tying the fragment store, boundary detection, reassembly and
//! tokenization together for one capture session.

use std::ops::Range;

use log::{debug, warn};

use crate::{
    boundary,
    emitter::FieldEmitter,
    error::DissectError,
    fragment::{FragmentStore, ReassemblyState},
    reassemble,
    stream::{Profile, StreamKey},
    tokenizer::{CommandToken, Tokenizer},
};

/// A complete message and the commands found in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub bytes: Vec<u8>,
    pub commands: Vec<CommandToken>,
}

/// The outcome of dissecting one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dissection {
    /// Nothing to reassemble: the role is unknown, the payload is empty, or a
    /// replayed frame was never stored.
    Skipped,
    /// The frame is part of a message that is not complete yet.
    Pending { state: ReassemblyState },
    /// The frame completed one or more messages.
    Complete {
        messages: Vec<Message>,
        /// Bytes of the frame that open the next message.
        carried: Option<Range<usize>>,
    },
}

/// Reassembles and tokenizes the AT command streams of one capture session.
///
/// Frames must be dissected for the first time in frame order. They may be
/// dissected again later, any number of times, with `is_first_pass` unset.
#[derive(Debug)]
pub struct AtDissector {
    profile: Profile,
    store: FragmentStore,
}

impl AtDissector {
    pub fn new(profile: Profile) -> Self {
        AtDissector {
            profile,
            store: FragmentStore::new(),
        }
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn store(&self) -> &FragmentStore {
        &self.store
    }

    /// Dissects the AT payload carried by frame `frame_number` on `key`.
    ///
    /// Only the first pass stores the payload and looks for terminators;
    /// every pass reassembles and tokenizes from what is stored, so replays
    /// report exactly what the first pass did. A broken fragment chain is
    /// reported to `emitter` before the error is returned, and does not
    /// affect later frames.
    pub fn dissect<E: FieldEmitter + ?Sized>(
        &mut self,
        frame_number: u32,
        key: StreamKey,
        payload: &[u8],
        is_first_pass: bool,
        emitter: &mut E,
    ) -> Result<Dissection, DissectError> {
        let Some(tokenizer) = Tokenizer::new(key.role, self.profile.commands()) else {
            debug!("Frame {frame_number}: role of {key:?} unknown, not reassembling");
            return Ok(Dissection::Skipped);
        };
        if payload.is_empty() {
            return Ok(Dissection::Skipped);
        }

        if is_first_pass {
            self.store.append(key, frame_number, payload)?;
            boundary::scan(&mut self.store, &key, frame_number);
        } else if !self.store.contains(&key, frame_number) {
            return Ok(Dissection::Skipped);
        }

        let reassembled = match reassemble::materialize_all(&self.store, &key, frame_number) {
            Ok(Some(reassembled)) => reassembled,
            Ok(None) => {
                let state = self
                    .store
                    .lookup_at_or_before(&key, frame_number)
                    .map_or(ReassemblyState::Fragment, |fragment| fragment.state());
                return Ok(Dissection::Pending { state });
            }
            Err(error) => {
                warn!("Frame {frame_number}: {error}");
                emitter.flag_internal_error(&error);
                return Err(error.into());
            }
        };

        let messages = reassembled
            .messages
            .into_iter()
            .map(|bytes| {
                let commands = tokenizer.tokenize(&bytes, emitter);
                Message { bytes, commands }
            })
            .collect();
        Ok(Dissection::Complete {
            messages,
            carried: reassembled.carried,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        error::{ReassemblyError, StoreError},
        stream::Role,
        tokenizer::Mnemonic,
    };

    fn key(role: Role) -> StreamKey {
        StreamKey {
            interface_id: 0,
            adapter_id: 0,
            connection_handle: 0x0b,
            dlci: 2,
            role,
        }
    }

    fn names(dissection: &Dissection) -> Vec<&'static str> {
        match dissection {
            Dissection::Complete { messages, .. } => messages
                .iter()
                .flat_map(|message| message.commands.iter().map(|c| c.command.name()))
                .collect(),
            _ => Vec::new(),
        }
    }

    #[derive(Default)]
    struct Errors(Vec<ReassemblyError>);

    impl FieldEmitter for Errors {
        fn flag_internal_error(&mut self, error: &ReassemblyError) {
            self.0.push(error.clone());
        }
    }

    #[test]
    fn reassembles_then_tokenizes() {
        let hs = key(Role::HeadsetSide);
        let mut dissector = AtDissector::new(Profile::Hfp);
        assert_eq!(
            dissector.dissect(1, hs, b"AT+BR", true, &mut ()),
            Ok(Dissection::Pending {
                state: ReassemblyState::Fragment
            })
        );
        dissector.dissect(2, hs, b"SF=3", true, &mut ()).unwrap();
        let done = dissector.dissect(3, hs, b"\r", true, &mut ()).unwrap();
        let Dissection::Complete { messages, carried } = &done else {
            panic!("expected a complete message, got {done:?}");
        };
        assert_eq!(messages[0].bytes, b"AT+BRSF=3\r");
        assert_eq!(names(&done), vec!["+BRSF"]);
        assert_eq!(messages[0].commands[0].parameters.len(), 1);
        assert_eq!(*carried, None);
    }

    #[test]
    fn partial_frame_completes_two_messages() {
        let hs = key(Role::HeadsetSide);
        let mut dissector = AtDissector::new(Profile::Hfp);
        dissector.dissect(1, hs, b"AT+VGS=1", true, &mut ()).unwrap();
        let second = dissector.dissect(2, hs, b"0\rAT+VG", true, &mut ()).unwrap();
        assert_eq!(names(&second), vec!["+VGS"]);
        let third = dissector.dissect(3, hs, b"M=4\r", true, &mut ()).unwrap();
        assert_eq!(names(&third), vec!["+VGM"]);
    }

    #[test]
    fn replay_is_pure() {
        let hs = key(Role::HeadsetSide);
        let ag = key(Role::GatewaySide);
        let frames: [(u32, StreamKey, &[u8]); 5] = [
            (1, hs, b"AT+BRSF=1"),
            (2, hs, b"91\r"),
            (3, ag, b"\r\n+BRSF: 871\r\n"),
            (4, ag, b"\r\nOK"),
            (5, ag, b"\r\n"),
        ];
        let mut dissector = AtDissector::new(Profile::Hfp);
        let first: Vec<_> = frames
            .iter()
            .map(|(frame, key, payload)| dissector.dissect(*frame, *key, payload, true, &mut ()))
            .collect();
        let counts = (
            dissector.store().fragment_count(&hs),
            dissector.store().fragment_count(&ag),
        );
        for _ in 0..2 {
            let replay: Vec<_> = frames
                .iter()
                .map(|(frame, key, payload)| {
                    dissector.dissect(*frame, *key, payload, false, &mut ())
                })
                .collect();
            assert_eq!(replay, first);
        }
        assert_eq!(
            counts,
            (
                dissector.store().fragment_count(&hs),
                dissector.store().fragment_count(&ag)
            )
        );
        assert_eq!(names(first[4].as_ref().unwrap()), vec!["OK"]);
    }

    #[test]
    fn replay_of_unseen_frame_is_skipped() {
        let mut dissector = AtDissector::new(Profile::Hfp);
        assert_eq!(
            dissector.dissect(4, key(Role::HeadsetSide), b"ATA\r", false, &mut ()),
            Ok(Dissection::Skipped)
        );
    }

    #[test]
    fn unknown_role_is_never_stored() {
        let unknown = key(Role::Unknown);
        let mut dissector = AtDissector::new(Profile::Hfp);
        assert_eq!(
            dissector.dissect(1, unknown, b"ATA\r", true, &mut ()),
            Ok(Dissection::Skipped)
        );
        assert_eq!(dissector.store().streams().count(), 0);
    }

    #[test]
    fn empty_payload_is_skipped() {
        let mut dissector = AtDissector::new(Profile::Hfp);
        assert_eq!(
            dissector.dissect(1, key(Role::GatewaySide), b"", true, &mut ()),
            Ok(Dissection::Skipped)
        );
    }

    #[test]
    fn duplicate_first_pass_is_an_error() {
        let hs = key(Role::HeadsetSide);
        let mut dissector = AtDissector::new(Profile::Hfp);
        dissector.dissect(1, hs, b"AT", true, &mut ()).unwrap();
        assert_eq!(
            dissector.dissect(1, hs, b"AT", true, &mut ()),
            Err(DissectError::Store(StoreError::DuplicateFrame {
                frame_number: 1
            }))
        );
    }

    #[test]
    fn broken_chain_does_not_poison_later_frames() {
        let hs = key(Role::HeadsetSide);
        let mut dissector = AtDissector::new(Profile::Hfp);
        dissector.dissect(1, hs, b"AT+BL", true, &mut ()).unwrap();
        let head = dissector.store.lookup_id(&hs, 1).unwrap();
        dissector.store.set_idx(&hs, head, 3);

        let mut errors = Errors::default();
        assert_eq!(
            dissector.dissect(2, hs, b"DN\r", true, &mut errors),
            Err(DissectError::Reassembly(ReassemblyError::BrokenChain {
                frame_number: 2
            }))
        );
        assert_eq!(errors.0, vec![ReassemblyError::BrokenChain { frame_number: 2 }]);

        let next = dissector.dissect(3, hs, b"ATA\r", true, &mut errors).unwrap();
        assert_eq!(names(&next), vec!["A"]);
        assert_eq!(errors.0.len(), 1);
    }

    #[test]
    fn profile_selects_command_table() {
        let hs = key(Role::HeadsetSide);
        let mut dissector = AtDissector::new(Profile::Hsp);
        let Dissection::Complete { messages, .. } =
            dissector.dissect(1, hs, b"AT+BRSF=1\r", true, &mut ()).unwrap()
        else {
            panic!("expected a complete message");
        };
        assert_eq!(messages[0].commands[0].command, Mnemonic::Unknown);
        assert_eq!(dissector.profile(), Profile::Hsp);
    }
}
