//! Receiver (one per sending peer)
//!
//! Accepts exactly the next expected sequence number with a valid digest.
//! Everything else is NAKed and leaves the state untouched: nothing is
//! buffered or reordered.

use bytes::Bytes;
use tracing::debug;

use crate::frame::Frame;
use crate::message::ControlMessage;
use crate::Error;

/// Outcome of validating one frame
#[derive(Debug)]
pub enum Validation {
    /// In order and intact: reply `ack` and deliver `payload`
    Accepted { ack: ControlMessage, payload: Bytes },

    /// Reply `nak`; `reason` is `ChecksumMismatch` or `SequenceMismatch`
    Rejected { nak: ControlMessage, reason: Error },
}

impl Validation {
    pub fn reply(&self) -> ControlMessage {
        match self {
            Validation::Accepted { ack, .. } => *ack,
            Validation::Rejected { nak, .. } => *nak,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Validation::Accepted { .. })
    }
}

/// Per-peer receive state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverSession {
    /// Only this sequence number is accepted next
    expected_seq: u32,

    /// Last accepted sequence number, `None` before the first frame
    last_confirmed_seq: Option<u32>,
}

impl ReceiverSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&mut self, frame: Frame) -> Validation {
        let computed = crate::checksum::digest(&frame.payload);
        if computed != frame.digest {
            debug!(
                "seq {}: digest {:04X} does not match payload ({:04X})",
                frame.seq, frame.digest, computed
            );
            return Validation::Rejected {
                nak: ControlMessage::Nak {
                    seq: frame.seq,
                    digest: Some(frame.digest),
                },
                reason: Error::ChecksumMismatch {
                    seq: frame.seq,
                    expected: computed,
                    got: frame.digest,
                },
            };
        }

        if frame.seq != self.expected_seq {
            debug!("seq {}: expected {}", frame.seq, self.expected_seq);
            return Validation::Rejected {
                nak: ControlMessage::Nak {
                    seq: frame.seq,
                    digest: None,
                },
                reason: Error::SequenceMismatch {
                    expected: self.expected_seq,
                    got: frame.seq,
                },
            };
        }

        self.last_confirmed_seq = Some(frame.seq);
        self.expected_seq = self.expected_seq.wrapping_add(1);

        Validation::Accepted {
            ack: ControlMessage::Ack(self.expected_seq),
            payload: frame.payload,
        }
    }

    /// Next sequence number that will be accepted
    pub fn expected_seq(&self) -> u32 {
        self.expected_seq
    }

    /// Most recently accepted sequence number
    pub fn last_confirmed_seq(&self) -> Option<u32> {
        self.last_confirmed_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u32, payload: &'static [u8]) -> Frame {
        Frame::new(seq, Bytes::from_static(payload))
    }

    #[test]
    fn test_accept_in_order() {
        let mut rx = ReceiverSession::new();

        match rx.validate(frame(0, b"hello")) {
            Validation::Accepted { ack, payload } => {
                assert_eq!(ack, ControlMessage::Ack(1));
                assert_eq!(&payload[..], b"hello");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rx.expected_seq(), 1);
        assert_eq!(rx.last_confirmed_seq(), Some(0));
    }

    #[test]
    fn test_flipped_digest_bit_rejected() {
        let mut rx = ReceiverSession::new();
        let mut bad = frame(0, b"hello");
        bad.digest ^= 0x0001;
        let sent_digest = bad.digest;

        let result = rx.validate(bad);
        assert!(matches!(
            result,
            Validation::Rejected {
                nak: ControlMessage::Nak { seq: 0, digest: Some(d) },
                reason: Error::ChecksumMismatch { .. },
            } if d == sent_digest
        ));
        assert_eq!(rx.expected_seq(), 0);
        assert_eq!(rx.last_confirmed_seq(), None);
    }

    #[test]
    fn test_corrupted_payload_rejected_even_in_order() {
        let mut rx = ReceiverSession::new();
        let mut bad = frame(0, b"hello");
        bad.payload = Bytes::from_static(b"hellp");

        assert!(!rx.validate(bad).is_accepted());
        assert_eq!(rx.expected_seq(), 0);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut rx = ReceiverSession::new();
        assert!(rx.validate(frame(0, b"hello")).is_accepted());

        let result = rx.validate(frame(0, b"hello"));
        assert_eq!(result.reply(), ControlMessage::Nak { seq: 0, digest: None });
        assert!(matches!(
            result,
            Validation::Rejected {
                reason: Error::SequenceMismatch { expected: 1, got: 0 },
                ..
            }
        ));
        assert_eq!(rx.expected_seq(), 1);
        assert_eq!(rx.last_confirmed_seq(), Some(0));
    }

    #[test]
    fn test_gap_rejected_not_buffered() {
        let mut rx = ReceiverSession::new();
        assert!(!rx.validate(frame(1, b"early")).is_accepted());
        assert!(rx.validate(frame(0, b"first")).is_accepted());

        // the early frame was not kept and has to arrive again
        assert_eq!(rx.expected_seq(), 1);
        assert!(rx.validate(frame(1, b"early")).is_accepted());
        assert_eq!(rx.expected_seq(), 2);
    }

    #[test]
    fn test_exactly_next_acceptance() {
        let mut rx = ReceiverSession::new();
        let mut expected = 0u32;

        for seq in [0u32, 0, 2, 1, 1, 3, 5, 2, 3, 4] {
            let before = rx.clone();
            let accepted = rx.validate(frame(seq, b"x")).is_accepted();

            assert_eq!(accepted, seq == expected, "seq {}", seq);
            if accepted {
                expected += 1;
            } else {
                assert_eq!(rx, before);
            }
            assert_eq!(rx.expected_seq(), expected);
        }
        assert_eq!(expected, 5);
    }
}
