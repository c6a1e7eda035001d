//! Retransmission timers
//!
//! A timer never touches session state. When it fires it posts a
//! [`TimerEvent`] onto a channel, and the owner of the session feeds that
//! event to `on_timeout` under the session lock like any other input.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// "Frame `seq` to `peer` was not acknowledged in time"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    /// Destination of the unacknowledged frame
    pub peer: SocketAddr,

    /// Sender session that armed the timer. A peer that leaves and comes
    /// back gets a new session, and events of the old one are ignored.
    pub session: u64,

    /// Sequence number of the frame
    pub seq: u32,

    /// Retry count of the frame when the timer was armed. A timer belonging
    /// to an earlier transmission is stale and is ignored.
    pub attempt: u32,
}

/// Receiving side of the timer event channel
pub type TimerEvents = mpsc::UnboundedReceiver<TimerEvent>;

/// Arms per-frame retransmission timers
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    timeout: Duration,
    events_tx: mpsc::UnboundedSender<TimerEvent>,
    next_session: Arc<AtomicU64>,
}

impl RetransmitTimer {
    pub fn new(timeout: Duration) -> (Self, TimerEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let timer = Self {
            timeout,
            events_tx,
            next_session: Arc::new(AtomicU64::new(0)),
        };
        (timer, events_rx)
    }

    /// Id for a new sender session, unique across clones of this timer
    pub fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawn a one-shot timer. Must be called inside a tokio runtime.
    pub fn arm(&self, peer: SocketAddr, session: u64, seq: u32, attempt: u32) -> TimerHandle {
        let events_tx = self.events_tx.clone();
        let timeout = self.timeout;

        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events_tx.send(TimerEvent {
                peer,
                session,
                seq,
                attempt,
            });
        });

        TimerHandle {
            abort: task.abort_handle(),
        }
    }
}

/// Pending timer; cancelled on drop
#[derive(Debug)]
pub struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.abort.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.abort.abort();
    }
}
