//! Error types

use std::net::SocketAddr;

use thiserror::Error;

use crate::checksum::Digest;

/// RRP protocol error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {len} bytes, header needs {min}")]
    MalformedFrame { len: usize, min: usize },

    #[error("malformed control message: {0:?}")]
    MalformedControl(String),

    #[error("checksum mismatch on seq {seq}: expected {expected:04X}, got {got:04X}")]
    ChecksumMismatch {
        seq: u32,
        expected: Digest,
        got: Digest,
    },

    #[error("sequence mismatch: expected {expected}, got {got}")]
    SequenceMismatch { expected: u32, got: u32 },

    #[error("retransmission exhausted: seq={seq} after {retries} retries")]
    RetransmissionExhausted { seq: u32, retries: u32 },

    /// Every slot of the window holds an abandoned frame; nothing more can
    /// be sent until the peer acknowledges `base`.
    #[error("window stalled at seq {base} (seq {seq} abandoned)")]
    WindowStalled { seq: u32, base: u32 },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("transport unavailable")]
    TransportUnavailable,

    #[error("unknown peer: {0}")]
    UnknownPeer(SocketAddr),

    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Integrity and sequencing failures are answered with a NAK and never
    /// leave the peer session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ChecksumMismatch { .. }
                | Error::SequenceMismatch { .. }
                | Error::RetransmissionExhausted { .. }
                | Error::MalformedFrame { .. }
                | Error::MalformedControl(_)
        )
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, Error>;
