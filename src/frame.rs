//! Wire frame codec
//!
//! ```text
//! +----------------+-------------+------------------------+
//! | seq (u32, BE)  | digest (BE) | payload (rest of dgram) |
//! +----------------+-------------+------------------------+
//! ```
//!
//! There is no length field: the datagram boundary is the message boundary.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::checksum::{self, Digest, DIGEST_LEN};
use crate::{Error, Result};

/// Sequence number width (bytes)
pub const SEQ_LEN: usize = 4;

/// Fixed header size
pub const HEADER_LEN: usize = SEQ_LEN + DIGEST_LEN;

/// One datagram worth of sequenced payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sequence number, big-endian on the wire
    pub seq: u32,

    /// CRC-16 of the payload as carried in the header
    pub digest: Digest,

    /// Everything after the header
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame whose digest matches its payload
    pub fn new(seq: u32, payload: Bytes) -> Self {
        Self {
            seq,
            digest: checksum::digest(&payload),
            payload,
        }
    }

    /// Whether the carried digest matches the payload
    pub fn verify(&self) -> bool {
        checksum::verify(&self.payload, self.digest)
    }

    pub fn to_bytes(&self) -> Bytes {
        encode(self.seq, self.digest, &self.payload)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

/// Concatenate header and payload
pub fn encode(seq: u32, digest: Digest, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(seq);
    buf.put_u16(digest);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split a datagram into its fixed-width header and the payload
pub fn decode(mut bytes: &[u8]) -> Result<Frame> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::MalformedFrame {
            len: bytes.len(),
            min: HEADER_LEN,
        });
    }

    let seq = bytes.get_u32();
    let digest = bytes.get_u16();
    let payload = Bytes::copy_from_slice(bytes);

    Ok(Frame {
        seq,
        digest,
        payload,
    })
}
