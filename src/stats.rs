//! Transfer statistics

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Stats shared between a session's tasks
pub type SharedStats = Arc<RwLock<TransferStats>>;

/// Protocol counters for one hub or client
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// Start time
    pub start_time: Instant,

    /// First transmissions of frames
    pub frames_sent: u64,

    /// Retransmissions (timeout or NAK triggered)
    pub retransmissions: u64,

    /// Frames dropped after exhausting their retries
    pub abandoned: u64,

    /// ACKs sent for accepted frames
    pub acks_sent: u64,

    /// ACKs received from the remote end
    pub acks_received: u64,

    /// NAKs sent for rejected frames
    pub naks_sent: u64,

    /// NAKs received from the remote end
    pub naks_received: u64,

    /// Frames rejected for a bad digest
    pub checksum_failures: u64,

    /// Frames rejected as duplicate or out of order
    pub sequence_rejections: u64,

    /// Frames accepted in order
    pub delivered: u64,

    /// Payloads queued for other peers
    pub relayed: u64,

    /// Datagrams that were neither a frame nor a control message
    pub malformed: u64,

    /// Peers registered on their first datagram
    pub peers_joined: u64,

    /// Peers removed by BYE or a failed session
    pub peers_left: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames_sent: 0,
            retransmissions: 0,
            abandoned: 0,
            acks_sent: 0,
            acks_received: 0,
            naks_sent: 0,
            naks_received: 0,
            checksum_failures: 0,
            sequence_rejections: 0,
            delivered: 0,
            relayed: 0,
            malformed: 0,
            peers_joined: 0,
            peers_left: 0,
        }
    }

    pub fn shared() -> SharedStats {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Share of transmissions that were retransmissions
    pub fn retransmission_rate(&self) -> f64 {
        let total = self.frames_sent + self.retransmissions;
        if total == 0 {
            return 0.0;
        }
        self.retransmissions as f64 / total as f64
    }

    /// Share of inbound frames that were rejected
    pub fn rejection_rate(&self) -> f64 {
        let rejected = self.checksum_failures + self.sequence_rejections;
        let total = rejected + self.delivered;
        if total == 0 {
            return 0.0;
        }
        rejected as f64 / total as f64
    }

    /// One-line summary
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Sent: {} (+{} retx, {} abandoned) | Delivered: {} | Relayed: {} | Rejected: {} crc / {} seq | ACK {}/{} NAK {}/{} (sent/recv) | Peers: +{} -{}",
            self.elapsed().as_secs_f64(),
            self.frames_sent,
            self.retransmissions,
            self.abandoned,
            self.delivered,
            self.relayed,
            self.checksum_failures,
            self.sequence_rejections,
            self.acks_sent,
            self.acks_received,
            self.naks_sent,
            self.naks_received,
            self.peers_joined,
            self.peers_left,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
