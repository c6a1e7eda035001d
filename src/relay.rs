//! Broadcast relay
//!
//! Fans a validated payload out to every registered peer except its origin.
//! Best effort: a failure toward one peer is logged and does not affect the
//! others or the ACK already sent to the origin.

use std::net::SocketAddr;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::registry::PeerRegistry;
use crate::transport::Transport;

/// Per-call fan-out result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Peers whose sender session accepted the payload
    pub queued: usize,

    /// Peers whose session was unavailable
    pub failed: usize,
}

/// Longest name taken from a message prefix
pub const MAX_NAME_LEN: usize = 32;

/// Notice relayed to existing peers when `name` appears
pub fn join_notice(name: &str) -> Bytes {
    Bytes::from(format!("SERVER: {} joined the chat", name))
}

/// Notice relayed to remaining peers when `name` leaves
pub fn departure_notice(name: &str) -> Bytes {
    Bytes::from(format!("SERVER: {} left the chat", name))
}

/// Sender name from a `name: message` payload, if it has one
pub fn nickname(payload: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(payload).ok()?;
    let (name, _) = text.split_once(": ")?;
    let name = name.trim();

    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.chars().any(char::is_control);
    valid.then_some(name)
}

/// Queue `payload` on the sender session of every peer except `origin`
pub async fn relay<T: Transport>(
    registry: &PeerRegistry<T>,
    payload: Bytes,
    origin: SocketAddr,
) -> RelayReport {
    let mut report = RelayReport::default();

    for peer in registry.others(&origin) {
        match peer.sender.enqueue(payload.clone()).await {
            Ok(()) => report.queued += 1,
            Err(e) => {
                warn!("relay to {} failed: {}", peer.endpoint, e);
                report.failed += 1;
            }
        }
    }

    debug!(
        "relayed {} bytes from {}: {} queued, {} failed",
        payload.len(),
        origin,
        report.queued,
        report.failed
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use crate::frame::Frame;
    use crate::stats::TransferStats;
    use crate::timer::RetransmitTimer;
    use crate::transport::memory::MemoryTransport;
    use crate::Config;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn setup() -> (PeerRegistry<MemoryTransport>, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new(addr(9000)));
        let (timer, _events) = RetransmitTimer::new(Duration::from_millis(100));
        let registry = PeerRegistry::new(
            Config::default(),
            timer,
            transport.clone(),
            TransferStats::shared(),
        );
        (registry, transport)
    }

    #[tokio::test]
    async fn test_relay_skips_origin() {
        let (registry, transport) = setup();
        for port in 1..=3 {
            registry.register_on_first_contact(addr(port));
        }

        let report = relay(&registry, Bytes::from_static(b"hello"), addr(1)).await;
        assert_eq!(report, RelayReport { queued: 2, failed: 0 });

        assert!(transport.sent_to(addr(1)).is_empty());
        for port in [2, 3] {
            let sent = transport.sent_to(addr(port));
            assert_eq!(sent.len(), 1);
            let frame = Frame::from_bytes(&sent[0]).unwrap();
            assert_eq!(frame.seq, 0);
            assert_eq!(&frame.payload[..], b"hello");
        }
    }

    #[tokio::test]
    async fn test_relay_uses_per_peer_sequence() {
        let (registry, transport) = setup();
        registry.register_on_first_contact(addr(1));
        registry.register_on_first_contact(addr(2));

        relay(&registry, Bytes::from_static(b"a"), addr(1)).await;
        relay(&registry, Bytes::from_static(b"b"), addr(1)).await;
        relay(&registry, Bytes::from_static(b"c"), addr(2)).await;

        let to_two: Vec<u32> = transport
            .sent_to(addr(2))
            .iter()
            .map(|b| Frame::from_bytes(b).unwrap().seq)
            .collect();
        let to_one: Vec<u32> = transport
            .sent_to(addr(1))
            .iter()
            .map(|b| Frame::from_bytes(b).unwrap().seq)
            .collect();
        assert_eq!(to_two, vec![0, 1]);
        assert_eq!(to_one, vec![0]);
    }

    #[tokio::test]
    async fn test_failed_peer_does_not_stop_fan_out() {
        let (registry, transport) = setup();
        for port in 1..=3 {
            registry.register_on_first_contact(addr(port));
        }
        registry.get(&addr(2)).unwrap().sender.shutdown().await;

        let report = relay(&registry, Bytes::from_static(b"hello"), addr(1)).await;
        assert_eq!(report, RelayReport { queued: 1, failed: 1 });
        assert_eq!(transport.sent_to(addr(3)).len(), 1);
    }

    #[tokio::test]
    async fn test_relay_with_no_other_peers() {
        let (registry, transport) = setup();
        registry.register_on_first_contact(addr(1));

        let report = relay(&registry, Bytes::from_static(b"alone"), addr(1)).await;
        assert_eq!(report, RelayReport::default());
        assert!(transport.take_sent().is_empty());
    }

    #[test]
    fn test_notices() {
        assert_eq!(&join_notice("alice")[..], b"SERVER: alice joined the chat");
        assert_eq!(
            &departure_notice("127.0.0.1:4000")[..],
            b"SERVER: 127.0.0.1:4000 left the chat"
        );
    }

    #[test]
    fn test_nickname() {
        assert_eq!(nickname(b"alice: hi there"), Some("alice"));
        assert_eq!(nickname(b"  bob : a: b"), Some("bob"));
        assert_eq!(nickname(b"no prefix"), None);
        assert_eq!(nickname(b": empty name"), None);
        assert_eq!(nickname(&[0xFF, b':', b' ', b'x']), None);

        let long = format!("{}: hi", "x".repeat(MAX_NAME_LEN + 1));
        assert_eq!(nickname(long.as_bytes()), None);
    }
}
