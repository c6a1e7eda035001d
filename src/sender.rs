//! Sender (one per destination)
//!
//! - Sliding window: at most `window_size` unacknowledged frames in flight
//! - Cumulative ACK slides the window and admits queued messages
//! - Per-frame retransmission timer with a bounded retry budget
//!
//! [`SenderSession`] is the pure state machine; it never does I/O and hands
//! the datagrams it wants sent back to the caller. [`SenderWindow`] wraps it
//! with a lock and a transport.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::checksum::Digest;
use crate::frame::Frame;
use crate::stats::SharedStats;
use crate::timer::{RetransmitTimer, TimerEvent, TimerHandle};
use crate::transport::Transport;
use crate::{Config, Error, Result};

/// `a` precedes `b` in wrap-around sequence space
#[inline]
fn seq_lt(a: u32, b: u32) -> bool {
    a != b && b.wrapping_sub(a) <= u32::MAX / 2
}

/// Lifecycle of one outgoing packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketState {
    Unsent,
    InFlight,
    Acknowledged,
    Abandoned,
}

/// A transmitted frame awaiting acknowledgement
#[derive(Debug)]
struct InFlight {
    frame: Frame,
    retry_count: u32,
    timer: TimerHandle,
}

/// Per-destination send state
#[derive(Debug)]
pub struct SenderSession {
    peer: SocketAddr,

    /// Tags timer events so those of an earlier session are ignored
    id: u64,

    /// Maximum frames in flight
    window_size: u32,

    /// Retransmissions allowed per frame before it is abandoned
    max_retries: u32,

    /// Oldest unacknowledged sequence number
    base_seq: u32,

    /// Sequence number for the next new frame
    next_seq: u32,

    /// Frames sent and not yet acknowledged, by sequence number
    window: BTreeMap<u32, InFlight>,

    /// Payloads waiting for window space
    outbox: VecDeque<Bytes>,

    /// Sequence numbers given up on that the peer has not acknowledged
    abandoned: BTreeSet<u32>,

    timer: RetransmitTimer,

    /// Set by shutdown or a failed send; nothing is sent afterwards
    closed: bool,
}

impl SenderSession {
    /// A zero `window_size` is treated as 1; [`Config::validate`] rejects it
    /// before a hub or client is built.
    pub fn new(peer: SocketAddr, config: &Config, timer: RetransmitTimer) -> Self {
        Self {
            peer,
            id: timer.next_session_id(),
            window_size: config.window_size.max(1),
            max_retries: config.max_retries,
            base_seq: 0,
            next_seq: 0,
            window: BTreeMap::new(),
            outbox: VecDeque::new(),
            abandoned: BTreeSet::new(),
            timer,
            closed: false,
        }
    }

    /// Queue a message and send as much as the window allows.
    /// Never waits for window space.
    pub fn enqueue(&mut self, payload: Bytes) -> Result<Vec<Bytes>> {
        self.ensure_open()?;
        self.outbox.push_back(payload);
        self.drain()
    }

    /// Move queued messages into the window while there is room
    pub fn drain(&mut self) -> Result<Vec<Bytes>> {
        self.ensure_open()?;

        let mut datagrams = Vec::new();
        while self.has_room() {
            let Some(payload) = self.outbox.pop_front() else {
                break;
            };

            let seq = self.next_seq;
            let frame = Frame::new(seq, payload);
            datagrams.push(frame.to_bytes());

            let timer = self.timer.arm(self.peer, self.id, seq, 0);
            self.window.insert(
                seq,
                InFlight {
                    frame,
                    retry_count: 0,
                    timer,
                },
            );
            self.next_seq = seq.wrapping_add(1);
        }

        if !datagrams.is_empty() {
            debug!(
                "{}: {} frame(s) out, window [{}, {}), {} queued",
                self.peer,
                datagrams.len(),
                self.base_seq,
                self.next_seq,
                self.outbox.len()
            );
        }
        Ok(datagrams)
    }

    /// Cumulative ACK: `ack` is the peer's next expected sequence number.
    ///
    /// Old, duplicate, or not-yet-sent ACK values are ignored, so `base_seq`
    /// never moves backwards.
    pub fn on_ack(&mut self, ack: u32) -> Result<Vec<Bytes>> {
        if self.closed {
            return Ok(Vec::new());
        }

        let advance = ack.wrapping_sub(self.base_seq);
        let outstanding = self.next_seq.wrapping_sub(self.base_seq);
        if advance == 0 || advance > outstanding {
            debug!(
                "{}: ignoring ACK {} (window [{}, {}))",
                self.peer, ack, self.base_seq, self.next_seq
            );
            return Ok(Vec::new());
        }

        while self.base_seq != ack {
            if let Some(entry) = self.window.remove(&self.base_seq) {
                entry.timer.cancel();
            }
            self.abandoned.remove(&self.base_seq);
            self.base_seq = self.base_seq.wrapping_add(1);
        }

        self.drain()
    }

    /// Retransmission timer expiry for `seq`.
    ///
    /// Returns the frame to resend, `None` if the event is stale, or
    /// `RetransmissionExhausted` once the retry budget is spent, or
    /// `WindowStalled` if that leaves the window with only abandoned frames.
    pub fn on_timeout(&mut self, seq: u32, attempt: u32) -> Result<Option<Bytes>> {
        if self.closed {
            return Ok(None);
        }

        let max_retries = self.max_retries;
        let Some(entry) = self.window.get_mut(&seq) else {
            return Ok(None);
        };
        if entry.retry_count != attempt {
            return Ok(None);
        }

        entry.retry_count += 1;
        if entry.retry_count > max_retries {
            if let Some(entry) = self.window.remove(&seq) {
                entry.timer.cancel();
            }
            self.abandoned.insert(seq);
            warn!(
                "{}: seq {} abandoned after {} retries",
                self.peer, seq, max_retries
            );
            if self.is_stalled() {
                warn!(
                    "{}: window [{}, {}) holds only abandoned frames",
                    self.peer, self.base_seq, self.next_seq
                );
                return Err(Error::WindowStalled {
                    seq,
                    base: self.base_seq,
                });
            }
            return Err(Error::RetransmissionExhausted {
                seq,
                retries: max_retries,
            });
        }

        entry.timer.cancel();
        entry.timer = self.timer.arm(self.peer, self.id, seq, entry.retry_count);
        debug!(
            "{}: retransmitting seq {} (retry {}/{})",
            self.peer, seq, entry.retry_count, max_retries
        );
        Ok(Some(entry.frame.to_bytes()))
    }

    /// Timer expiry as delivered by [`RetransmitTimer`]. Events armed by
    /// another session are ignored.
    pub fn on_timer(&mut self, event: TimerEvent) -> Result<Option<Bytes>> {
        if event.session != self.id {
            debug!(
                "{}: ignoring timer of session {} (current {})",
                self.peer, event.session, self.id
            );
            return Ok(None);
        }
        self.on_timeout(event.seq, event.attempt)
    }

    /// NAK for `seq`: retransmit now instead of waiting for the timer.
    /// Counts against the same retry budget.
    pub fn on_nak(&mut self, seq: u32, digest: Option<Digest>) -> Result<Option<Bytes>> {
        let Some(attempt) = self.window.get(&seq).map(|entry| entry.retry_count) else {
            debug!("{}: NAK for seq {} not in flight", self.peer, seq);
            return Ok(None);
        };

        if let Some(digest) = digest {
            debug!("{}: NAK seq {} (peer saw digest {:04X})", self.peer, seq, digest);
        }
        self.on_timeout(seq, attempt)
    }

    /// Cancel all timers and drop in-flight and queued messages.
    /// Returns how many messages were dropped.
    pub fn shutdown(&mut self) -> usize {
        let dropped = self.window.len() + self.outbox.len();
        for entry in self.window.values() {
            entry.timer.cancel();
        }
        self.window.clear();
        self.outbox.clear();
        self.closed = true;
        dropped
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::TransportUnavailable);
        }
        if self.is_stalled() {
            return Err(Error::WindowStalled {
                seq: self.next_seq.wrapping_sub(1),
                base: self.base_seq,
            });
        }
        Ok(())
    }

    fn has_room(&self) -> bool {
        self.next_seq.wrapping_sub(self.base_seq) < self.window_size
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn base_seq(&self) -> u32 {
        self.base_seq
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Frames awaiting acknowledgement
    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    /// Messages waiting for window space
    pub fn queued(&self) -> usize {
        self.outbox.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The window is full and nothing in it is still being retried. Only a
    /// late ACK from the peer can move it again.
    pub fn is_stalled(&self) -> bool {
        !self.closed && self.window.is_empty() && !self.has_room()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn retry_count(&self, seq: u32) -> Option<u32> {
        self.window.get(&seq).map(|entry| entry.retry_count)
    }

    pub fn packet_state(&self, seq: u32) -> PacketState {
        if self.window.contains_key(&seq) {
            PacketState::InFlight
        } else if self.abandoned.contains(&seq) {
            PacketState::Abandoned
        } else if seq_lt(seq, self.base_seq) {
            PacketState::Acknowledged
        } else {
            PacketState::Unsent
        }
    }
}

/// A [`SenderSession`] bound to a transport.
///
/// The session lock is held until the datagrams an operation produced are on
/// the wire, so frames leave in sequence order.
pub struct SenderWindow<T> {
    peer: SocketAddr,
    transport: Arc<T>,
    session: Mutex<SenderSession>,
    stats: SharedStats,
}

impl<T: Transport> SenderWindow<T> {
    pub fn new(
        peer: SocketAddr,
        config: &Config,
        timer: RetransmitTimer,
        transport: Arc<T>,
        stats: SharedStats,
    ) -> Self {
        Self {
            peer,
            transport,
            session: Mutex::new(SenderSession::new(peer, config, timer)),
            stats,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn enqueue(&self, payload: Bytes) -> Result<()> {
        let mut session = self.session.lock().await;
        let datagrams = session.enqueue(payload)?;
        self.transmit(&mut session, datagrams, false).await
    }

    pub async fn on_ack(&self, ack: u32) -> Result<()> {
        let mut session = self.session.lock().await;
        self.stats.write().acks_received += 1;
        let datagrams = session.on_ack(ack)?;
        self.transmit(&mut session, datagrams, false).await
    }

    pub async fn on_nak(&self, seq: u32, digest: Option<Digest>) -> Result<()> {
        let mut session = self.session.lock().await;
        self.stats.write().naks_received += 1;
        let datagrams = self.retransmission(session.on_nak(seq, digest))?;
        self.transmit(&mut session, datagrams, true).await
    }

    pub async fn on_timeout(&self, event: TimerEvent) -> Result<()> {
        let mut session = self.session.lock().await;
        let datagrams = self.retransmission(session.on_timer(event))?;
        self.transmit(&mut session, datagrams, true).await
    }

    /// Abandon everything in flight; later sends fail fast
    pub async fn shutdown(&self) -> usize {
        self.session.lock().await.shutdown()
    }

    /// Inspect the session under its lock
    pub async fn with_session<R>(&self, f: impl FnOnce(&SenderSession) -> R) -> R {
        let session = self.session.lock().await;
        f(&session)
    }

    fn retransmission(&self, result: Result<Option<Bytes>>) -> Result<Vec<Bytes>> {
        match result {
            Ok(datagram) => Ok(datagram.into_iter().collect()),
            Err(e @ (Error::RetransmissionExhausted { .. } | Error::WindowStalled { .. })) => {
                self.stats.write().abandoned += 1;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn transmit(
        &self,
        session: &mut SenderSession,
        datagrams: Vec<Bytes>,
        retransmit: bool,
    ) -> Result<()> {
        for datagram in datagrams {
            if let Err(e) = self.transport.send_to(&datagram, self.peer).await {
                let dropped = session.shutdown();
                warn!(
                    "send to {} failed: {}; session closed, {} message(s) dropped",
                    self.peer, e, dropped
                );
                return Err(Error::TransportUnavailable);
            }

            {
                let mut stats = self.stats.write();
                if retransmit {
                    stats.retransmissions += 1;
                } else {
                    stats.frames_sent += 1;
                }
            }
        }
        Ok(())
    }
}
