//! Peer registry
//!
//! Owns every per-peer session on the hub. Peers are added on first contact
//! and removed on an explicit `BYE`.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

use crate::receiver::ReceiverSession;
use crate::sender::SenderWindow;
use crate::stats::SharedStats;
use crate::timer::RetransmitTimer;
use crate::transport::Transport;
use crate::{Config, Error, Result};

/// One registered peer
pub struct Peer<T> {
    /// Address the peer sends from; also its identity
    pub endpoint: SocketAddr,

    /// Validation of frames this peer sends to us
    pub receiver: Mutex<ReceiverSession>,

    /// Relay traffic we send to this peer
    pub sender: SenderWindow<T>,

    /// Name used in join and departure notices, set on the first accepted frame
    pub name: OnceLock<String>,

    /// Registration time
    pub joined_at: Instant,
}

/// Endpoint -> peer sessions
pub struct PeerRegistry<T> {
    peers: DashMap<SocketAddr, Arc<Peer<T>>>,
    config: Config,
    timer: RetransmitTimer,
    transport: Arc<T>,
    stats: SharedStats,
}

impl<T: Transport> PeerRegistry<T> {
    pub fn new(
        config: Config,
        timer: RetransmitTimer,
        transport: Arc<T>,
        stats: SharedStats,
    ) -> Self {
        Self {
            peers: DashMap::new(),
            config,
            timer,
            transport,
            stats,
        }
    }

    /// Idempotent. Returns the peer and whether it was just created.
    pub fn register_on_first_contact(&self, endpoint: SocketAddr) -> (Arc<Peer<T>>, bool) {
        match self.peers.entry(endpoint) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let peer = Arc::new(Peer {
                    endpoint,
                    receiver: Mutex::new(ReceiverSession::new()),
                    sender: SenderWindow::new(
                        endpoint,
                        &self.config,
                        self.timer.clone(),
                        self.transport.clone(),
                        self.stats.clone(),
                    ),
                    name: OnceLock::new(),
                    joined_at: Instant::now(),
                });
                entry.insert(peer.clone());

                self.stats.write().peers_joined += 1;
                info!("peer joined: {} ({} connected)", endpoint, self.peers.len());
                (peer, true)
            }
        }
    }

    pub fn get(&self, endpoint: &SocketAddr) -> Option<Arc<Peer<T>>> {
        self.peers.get(endpoint).map(|entry| entry.value().clone())
    }

    /// Like [`PeerRegistry::get`], for callers that treat a miss as an error
    pub fn require(&self, endpoint: &SocketAddr) -> Result<Arc<Peer<T>>> {
        self.get(endpoint).ok_or(Error::UnknownPeer(*endpoint))
    }

    pub fn contains(&self, endpoint: &SocketAddr) -> bool {
        self.peers.contains_key(endpoint)
    }

    /// Drop both sessions of `endpoint`; its in-flight relay traffic is abandoned
    pub async fn remove(&self, endpoint: &SocketAddr) -> Option<Arc<Peer<T>>> {
        let (_, peer) = self.peers.remove(endpoint)?;
        let dropped = peer.sender.shutdown().await;

        self.stats.write().peers_left += 1;
        info!(
            "peer left: {} after {:.1}s ({} undelivered, {} connected)",
            endpoint,
            peer.joined_at.elapsed().as_secs_f64(),
            dropped,
            self.peers.len()
        );
        Some(peer)
    }

    /// Every peer except `origin`, collected so no map guard outlives the call
    pub fn others(&self, origin: &SocketAddr) -> Vec<Arc<Peer<T>>> {
        self.peers
            .iter()
            .filter(|entry| entry.key() != origin)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Shut every sender session down and forget all peers
    pub async fn clear(&self) {
        let peers: Vec<Arc<Peer<T>>> = self.peers.iter().map(|e| e.value().clone()).collect();
        self.peers.clear();
        for peer in peers {
            peer.sender.shutdown().await;
        }
    }
}
