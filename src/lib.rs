//! # RRP (Reliable Relay Protocol)
//!
//! Reliable, in-order delivery over UDP, plus a hub that relays every
//! message to all other connected peers.
//!
//! ## Core features
//! - **Integrity**: every frame carries a CRC-16-CCITT digest of its payload
//! - **Sliding window**: bounded in-flight frames per destination, cumulative ACK
//! - **Retransmission**: per-frame timer, NAK fast retransmit, bounded retries
//! - **Strict ordering**: the receiver accepts only the next expected sequence
//! - **Relay hub**: peers register on first contact, payloads fan out reliably

pub mod checksum;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod hub;
pub mod message;
pub mod receiver;
pub mod registry;
pub mod relay;
pub mod sender;
pub mod stats;
pub mod timer;
pub mod transport;

pub use checksum::Digest;
pub use client::{Client, ClientEvent, EventReceiver};
pub use config::Config;
pub use error::{Error, Result};
pub use frame::Frame;
pub use hub::Hub;
pub use message::{ControlMessage, Datagram};
pub use receiver::{ReceiverSession, Validation};
pub use registry::{Peer, PeerRegistry};
pub use sender::{PacketState, SenderSession, SenderWindow};
pub use stats::TransferStats;
pub use transport::Transport;

/// Default sender window size
pub const DEFAULT_WINDOW_SIZE: u32 = 5;

/// Default retransmissions per frame
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default hub port
pub const DEFAULT_PORT: u16 = 9876;
