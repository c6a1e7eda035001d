//! Hub (rendezvous relay)
//!
//! - One receive loop; frames from a given peer are handled in arrival order
//! - Validated payloads are ACKed to the origin and relayed to everyone else
//! - Relay traffic is sent reliably through each peer's own sender session

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::frame::Frame;
use crate::message::{ControlMessage, Datagram};
use crate::receiver::Validation;
use crate::registry::PeerRegistry;
use crate::relay::{self, RelayReport};
use crate::stats::{SharedStats, TransferStats};
use crate::timer::{RetransmitTimer, TimerEvent, TimerEvents};
use crate::transport::Transport;
use crate::{Config, Error, Result};

/// Relay hub
pub struct Hub<T = UdpSocket> {
    config: Config,
    transport: Arc<T>,
    registry: PeerRegistry<T>,
    timer_events: Mutex<Option<TimerEvents>>,
    stats: SharedStats,
    running: AtomicBool,
    stop: Notify,
}

impl Hub<UdpSocket> {
    /// Bind a UDP socket and build a hub on it
    pub async fn bind(config: Config, bind_addr: SocketAddr) -> Result<Self> {
        config.validate()?;
        let socket = UdpSocket::bind(bind_addr).await?;
        info!("RRP hub bound to {}", socket.local_addr()?);
        Self::new(config, Arc::new(socket))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }
}

impl<T: Transport> Hub<T> {
    pub fn new(config: Config, transport: Arc<T>) -> Result<Self> {
        config.validate()?;
        let stats = TransferStats::shared();
        let (timer, timer_events) = RetransmitTimer::new(config.retransmit_timeout());
        let registry = PeerRegistry::new(config.clone(), timer, transport.clone(), stats.clone());

        Ok(Self {
            config,
            transport,
            registry,
            timer_events: Mutex::new(Some(timer_events)),
            stats,
            running: AtomicBool::new(false),
            stop: Notify::new(),
        })
    }

    /// Receive loop. Returns when [`Hub::stop`] is called, or with
    /// `TransportUnavailable` if the socket fails.
    pub async fn run(&self) -> Result<()> {
        let mut timer_events = self
            .timer_events
            .lock()
            .take()
            .ok_or(Error::ConnectionClosed)?;

        self.running.store(true, Ordering::SeqCst);
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let mut outcome = Ok(());

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                result = self.transport.recv_from(&mut buf) => {
                    match result {
                        Ok((len, from)) => self.handle_datagram(&buf[..len], from).await,
                        Err(e) => {
                            warn!("receive failed: {}", e);
                            outcome = Err(Error::TransportUnavailable);
                            break;
                        }
                    }
                }
                Some(event) = timer_events.recv() => {
                    self.handle_timer(event).await;
                }
                _ = self.stop.notified() => break,
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.registry.clear().await;
        info!("hub stopped: {}", self.stats.read().summary());
        outcome
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &PeerRegistry<T> {
        &self.registry
    }

    pub fn stats(&self) -> TransferStats {
        self.stats.read().clone()
    }

    /// Process one inbound datagram from `from`
    pub async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) {
        match Datagram::classify(bytes) {
            Ok(Datagram::Frame(frame)) => self.handle_frame(frame, from).await,
            Ok(Datagram::Control(msg)) => self.handle_control(msg, from).await,
            Err(e) => {
                self.stats.write().malformed += 1;
                warn!("dropping datagram from {}: {}", from, e);
            }
        }
    }

    async fn handle_frame(&self, frame: Frame, from: SocketAddr) {
        let (peer, _) = self.registry.register_on_first_contact(from);
        let validation = peer.receiver.lock().validate(frame);
        let reply = validation.reply();

        match validation {
            Validation::Accepted { payload, .. } => {
                {
                    let mut stats = self.stats.write();
                    stats.delivered += 1;
                    stats.acks_sent += 1;
                }
                self.send_control(reply, from).await;

                if peer.name.get().is_none() {
                    let name = relay::nickname(&payload)
                        .map(str::to_owned)
                        .unwrap_or_else(|| from.to_string());
                    info!("{} is {}", from, name);
                    self.broadcast(relay::join_notice(&name), from).await;
                    let _ = peer.name.set(name);
                }
                self.broadcast(payload, from).await;
            }
            Validation::Rejected { reason, .. } => {
                {
                    let mut stats = self.stats.write();
                    match reason {
                        Error::ChecksumMismatch { .. } => stats.checksum_failures += 1,
                        _ => stats.sequence_rejections += 1,
                    }
                    stats.naks_sent += 1;
                }
                debug!("rejected frame from {}: {}", from, reason);
                self.send_control(reply, from).await;
            }
        }
    }

    async fn handle_control(&self, msg: ControlMessage, from: SocketAddr) {
        if msg == ControlMessage::Bye {
            self.drop_peer(from).await;
            return;
        }

        let peer = match self.registry.require(&from) {
            Ok(peer) => peer,
            Err(e) => {
                debug!("ignoring {}: {}", msg, e);
                return;
            }
        };

        let result = match msg {
            ControlMessage::Ack(ack) => peer.sender.on_ack(ack).await,
            ControlMessage::Nak { seq, digest } => peer.sender.on_nak(seq, digest).await,
            ControlMessage::Bye => Ok(()),
        };
        self.session_result(from, result).await;
    }

    async fn handle_timer(&self, event: TimerEvent) {
        let Some(peer) = self.registry.get(&event.peer) else {
            return;
        };
        let result = peer.sender.on_timeout(event).await;
        self.session_result(event.peer, result).await;
    }

    /// A peer whose sender session closed or stalled is dropped, so its next
    /// frame registers it afresh.
    async fn session_result(&self, endpoint: SocketAddr, result: Result<()>) {
        match result {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => warn!("relay session {}: {}", endpoint, e),
            Err(e) => {
                warn!("relay session {} failed: {}", endpoint, e);
                self.drop_peer(endpoint).await;
            }
        }
    }

    /// Forget `endpoint` and tell the others, if it was ever announced
    async fn drop_peer(&self, endpoint: SocketAddr) {
        let Some(peer) = self.registry.remove(&endpoint).await else {
            return;
        };
        if let Some(name) = peer.name.get() {
            self.broadcast(relay::departure_notice(name), endpoint).await;
        }
    }

    async fn broadcast(&self, payload: Bytes, origin: SocketAddr) -> RelayReport {
        let report = relay::relay(&self.registry, payload, origin).await;
        self.stats.write().relayed += report.queued as u64;
        report
    }

    async fn send_control(&self, msg: ControlMessage, to: SocketAddr) {
        if let Err(e) = self.transport.send_to(&msg.to_bytes(), to).await {
            warn!("sending {} to {} failed: {}", msg, to, e);
        }
    }
}
