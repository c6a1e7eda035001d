//! Control messages and datagram classification
//!
//! Control messages travel as plain text datagrams on the same socket as
//! frames:
//!
//! - `ACK <n>`: cumulative, every sequence number below `n` was accepted
//! - `NAK <seq>` / `NAK <seq> <digest>`: frame `seq` failed validation
//! - `BYE`: the peer is leaving

use std::fmt;

use bytes::Bytes;

use crate::checksum::Digest;
use crate::frame::{self, Frame};
use crate::{Error, Result};

/// Message type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Ack,
    Nak,
    Bye,
}

impl MessageType {
    fn keyword(self) -> &'static str {
        match self {
            MessageType::Ack => "ACK",
            MessageType::Nak => "NAK",
            MessageType::Bye => "BYE",
        }
    }
}

/// Receiver to sender feedback, plus the disconnect signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Next expected sequence number
    Ack(u32),

    /// Rejected frame; `digest` is present when the payload failed its checksum
    Nak { seq: u32, digest: Option<Digest> },

    Bye,
}

impl ControlMessage {
    pub fn msg_type(&self) -> MessageType {
        match self {
            ControlMessage::Ack(_) => MessageType::Ack,
            ControlMessage::Nak { .. } => MessageType::Nak,
            ControlMessage::Bye => MessageType::Bye,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_string())
    }

    /// Parse a control datagram; anything unrecognised is `MalformedControl`
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let malformed = || Error::MalformedControl(String::from_utf8_lossy(bytes).into_owned());

        let text = std::str::from_utf8(bytes).map_err(|_| malformed())?;
        let mut parts = text.trim().split_ascii_whitespace();

        let msg = match parts.next() {
            Some("ACK") => {
                let n = parts.next().and_then(|s| s.parse().ok()).ok_or_else(malformed)?;
                ControlMessage::Ack(n)
            }
            Some("NAK") => {
                let seq = parts.next().and_then(|s| s.parse().ok()).ok_or_else(malformed)?;
                let digest = match parts.next() {
                    Some(s) => Some(s.parse().map_err(|_| malformed())?),
                    None => None,
                };
                ControlMessage::Nak { seq, digest }
            }
            Some("BYE") => ControlMessage::Bye,
            _ => return Err(malformed()),
        };

        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(msg)
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = self.msg_type().keyword();
        match self {
            ControlMessage::Ack(n) => write!(f, "{} {}", keyword, n),
            ControlMessage::Nak { seq, digest: None } => write!(f, "{} {}", keyword, seq),
            ControlMessage::Nak {
                seq,
                digest: Some(d),
            } => write!(f, "{} {} {}", keyword, seq, d),
            ControlMessage::Bye => f.write_str(keyword),
        }
    }
}

/// An inbound datagram after classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Control(ControlMessage),
    Frame(Frame),
}

impl Datagram {
    /// Well-formed control text wins; everything else must decode as a frame.
    pub fn classify(bytes: &[u8]) -> Result<Self> {
        if let Ok(msg) = ControlMessage::parse(bytes) {
            return Ok(Datagram::Control(msg));
        }
        frame::decode(bytes).map(Datagram::Frame)
    }
}
