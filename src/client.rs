//! Client (one hub connection)
//!
//! - Outgoing messages go through a [`SenderWindow`] toward the hub
//! - A single background task receives datagrams and drives the window
//! - Relayed frames from the hub are validated and ACKed/NAKed like any peer

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::message::{ControlMessage, Datagram};
use crate::receiver::{ReceiverSession, Validation};
use crate::sender::SenderWindow;
use crate::stats::{SharedStats, TransferStats};
use crate::timer::{RetransmitTimer, TimerEvents};
use crate::transport::Transport;
use crate::{Config, Error, Result};

/// Events delivered to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Payload relayed by the hub, in order
    Message(Bytes),

    /// One of our messages was given up on
    DeliveryFailed { seq: u32 },

    /// The receive loop has stopped
    Closed,
}

/// Event channel receiver type
pub type EventReceiver = mpsc::Receiver<ClientEvent>;

/// Internal commands
enum ClientCmd {
    Stop,
}

/// State owned by the receive task only
struct ClientInner<T> {
    server: SocketAddr,
    transport: Arc<T>,
    window: Arc<SenderWindow<T>>,
    receiver: ReceiverSession,
    stats: SharedStats,
    events_tx: mpsc::Sender<ClientEvent>,
}

impl<T: Transport> ClientInner<T> {
    async fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) {
        if from != self.server {
            debug!("ignoring datagram from {}", from);
            return;
        }

        match Datagram::classify(bytes) {
            Ok(Datagram::Control(msg)) => self.handle_control(msg).await,
            Ok(Datagram::Frame(frame)) => {
                let validation = self.receiver.validate(frame);
                let reply = validation.reply();

                match validation {
                    Validation::Accepted { payload, .. } => {
                        {
                            let mut stats = self.stats.write();
                            stats.delivered += 1;
                            stats.acks_sent += 1;
                        }
                        self.reply(reply).await;
                        let _ = self.events_tx.send(ClientEvent::Message(payload)).await;
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
                        debug!("rejected frame from hub: {}", reason);
                        self.reply(reply).await;
                    }
                }
            }
            Err(e) => {
                self.stats.write().malformed += 1;
                warn!("dropping datagram from hub: {}", e);
            }
        }
    }

    async fn handle_control(&mut self, msg: ControlMessage) {
        let result = match msg {
            ControlMessage::Ack(ack) => self.window.on_ack(ack).await,
            ControlMessage::Nak { seq, digest } => self.window.on_nak(seq, digest).await,
            ControlMessage::Bye => {
                debug!("unexpected BYE from hub");
                Ok(())
            }
        };
        self.report(result).await;
    }

    async fn report(&self, result: Result<()>) {
        match result {
            Ok(()) => {}
            Err(Error::RetransmissionExhausted { seq, .. }) => {
                let _ = self
                    .events_tx
                    .send(ClientEvent::DeliveryFailed { seq })
                    .await;
            }
            Err(e @ Error::WindowStalled { seq, .. }) => {
                warn!("session to {}: {}", self.server, e);
                let _ = self
                    .events_tx
                    .send(ClientEvent::DeliveryFailed { seq })
                    .await;
            }
            Err(e) => warn!("session to {}: {}", self.server, e),
        }
    }

    async fn reply(&self, msg: ControlMessage) {
        if let Err(e) = self.transport.send_to(&msg.to_bytes(), self.server).await {
            warn!("sending {} to {} failed: {}", msg, self.server, e);
        }
    }
}

/// RRP client
pub struct Client<T = UdpSocket> {
    server: SocketAddr,
    transport: Arc<T>,
    window: Arc<SenderWindow<T>>,
    stats: SharedStats,
    running: Arc<AtomicBool>,
    cmd_tx: mpsc::Sender<ClientCmd>,
}

impl Client<UdpSocket> {
    /// Bind a local UDP socket and start talking to `server`
    pub async fn connect(
        config: Config,
        bind_addr: SocketAddr,
        server: SocketAddr,
    ) -> Result<(Self, EventReceiver)> {
        config.validate()?;
        let socket = UdpSocket::bind(bind_addr).await?;
        info!("RRP client bound to {}, hub {}", socket.local_addr()?, server);
        Self::start(config, Arc::new(socket), server)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }
}

impl<T: Transport> Client<T> {
    /// Spawn the receive task. Must be called inside a tokio runtime.
    pub fn start(
        config: Config,
        transport: Arc<T>,
        server: SocketAddr,
    ) -> Result<(Self, EventReceiver)> {
        config.validate()?;
        let stats = TransferStats::shared();
        let (timer, timer_events) = RetransmitTimer::new(config.retransmit_timeout());
        let window = Arc::new(SenderWindow::new(
            server,
            &config,
            timer,
            transport.clone(),
            stats.clone(),
        ));

        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let running = Arc::new(AtomicBool::new(true));

        let inner = ClientInner {
            server,
            transport: transport.clone(),
            window: window.clone(),
            receiver: ReceiverSession::new(),
            stats: stats.clone(),
            events_tx,
        };
        tokio::spawn(Self::run(
            inner,
            config.recv_buffer_size,
            timer_events,
            cmd_rx,
            running.clone(),
        ));

        let client = Self {
            server,
            transport,
            window,
            stats,
            running,
            cmd_tx,
        };
        Ok((client, events_rx))
    }

    async fn run(
        mut inner: ClientInner<T>,
        recv_buffer_size: usize,
        mut timer_events: TimerEvents,
        mut cmd_rx: mpsc::Receiver<ClientCmd>,
        running: Arc<AtomicBool>,
    ) {
        let mut buf = vec![0u8; recv_buffer_size];

        loop {
            tokio::select! {
                result = inner.transport.recv_from(&mut buf) => {
                    match result {
                        Ok((len, from)) => inner.handle_datagram(&buf[..len], from).await,
                        Err(e) => {
                            warn!("receive failed: {}", e);
                            break;
                        }
                    }
                }
                Some(event) = timer_events.recv() => {
                    let result = inner.window.on_timeout(event).await;
                    inner.report(result).await;
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(ClientCmd::Stop) | None => break,
                },
            }
        }

        running.store(false, Ordering::SeqCst);
        let dropped = inner.window.shutdown().await;
        if dropped > 0 {
            info!("{} undelivered message(s) abandoned", dropped);
        }
        info!("client stopped: {}", inner.stats.read().summary());
        let _ = inner.events_tx.send(ClientEvent::Closed).await;
    }

    /// Queue a message for the hub. Returns immediately even if the window
    /// is full.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        if !self.is_running() {
            return Err(Error::ConnectionClosed);
        }
        self.window.enqueue(payload.into()).await
    }

    /// Tell the hub we are leaving, then stop
    pub async fn disconnect(&self) -> Result<()> {
        let bye = ControlMessage::Bye.to_bytes();
        let sent = self.transport.send_to(&bye, self.server).await;
        self.stop().await;
        sent.map(|_| ()).map_err(|_| Error::TransportUnavailable)
    }

    /// Stop the receive task; in-flight messages are abandoned
    pub async fn stop(&self) {
        self.window.shutdown().await;
        let _ = self.cmd_tx.send(ClientCmd::Stop).await;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Messages in flight or waiting for window space
    pub async fn pending(&self) -> usize {
        self.window.with_session(|s| s.in_flight() + s.queued()).await
    }

    pub fn stats(&self) -> TransferStats {
        self.stats.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::frame::{self, Frame};
    use crate::transport::memory::MemoryTransport;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    const HUB: u16 = 9000;

    fn config() -> Config {
        Config {
            window_size: 2,
            max_retries: 1,
            retransmit_timeout_ms: 100,
            ..Config::default()
        }
    }

    fn start() -> (Client<MemoryTransport>, EventReceiver, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new(addr(5000)));
        let (client, events) = Client::start(config(), transport.clone(), addr(HUB)).unwrap();
        (client, events, transport)
    }

    fn controls(transport: &MemoryTransport) -> Vec<ControlMessage> {
        transport
            .sent_to(addr(HUB))
            .iter()
            .filter_map(|b| ControlMessage::parse(b).ok())
            .collect()
    }

    fn frames(transport: &MemoryTransport) -> Vec<Frame> {
        transport
            .sent_to(addr(HUB))
            .iter()
            .filter(|b| ControlMessage::parse(b).is_err())
            .map(|b| Frame::from_bytes(b).unwrap())
            .collect()
    }

    /// Let the receive task drain what was injected
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_and_ack() {
        let (client, _events, transport) = start();
        client.send("a").await.unwrap();
        client.send("b").await.unwrap();
        client.send("c").await.unwrap();

        // window of 2: the third message waits
        let seqs: Vec<u32> = frames(&transport).iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
        assert_eq!(client.pending().await, 3);

        transport.inject("ACK 2", addr(HUB));
        settle().await;

        let seqs: Vec<u32> = frames(&transport).iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(client.pending().await, 1);
        assert_eq!(client.stats().acks_received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relayed_frame_is_acked_and_delivered() {
        let (_client, mut events, transport) = start();
        transport.inject(Frame::new(0, "bob: hi".into()).to_bytes(), addr(HUB));

        let event = events.recv().await.unwrap();
        assert_eq!(event, ClientEvent::Message(Bytes::from_static(b"bob: hi")));
        settle().await;
        assert_eq!(controls(&transport), vec![ControlMessage::Ack(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupted_relay_is_nacked() {
        let (client, mut events, transport) = start();
        let bad = frame::encode(0, crate::checksum::digest(b"hi") ^ 1, b"hi");
        transport.inject(bad, addr(HUB));
        settle().await;

        assert!(matches!(
            controls(&transport).as_slice(),
            [ControlMessage::Nak { seq: 0, digest: Some(_) }]
        ));
        assert!(events.try_recv().is_err());
        assert_eq!(client.stats().checksum_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_datagrams_from_strangers_ignored() {
        let (client, mut events, transport) = start();
        transport.inject(Frame::new(0, "spoof".into()).to_bytes(), addr(6666));
        settle().await;

        assert!(transport.take_sent().is_empty());
        assert!(events.try_recv().is_err());
        assert_eq!(client.stats().delivered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_message_reports_delivery_failure() {
        let (client, mut events, transport) = start();
        client.send("lost").await.unwrap();

        // first send plus one retry, then abandoned
        let event = events.recv().await.unwrap();
        assert_eq!(event, ClientEvent::DeliveryFailed { seq: 0 });
        assert_eq!(frames(&transport).len(), 2);
        assert_eq!(client.stats().abandoned, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_window_fails_further_sends() {
        let (client, mut events, transport) = start();
        client.send("one").await.unwrap();
        client.send("two").await.unwrap();

        // window of 2, neither frame is ever acknowledged
        let mut failed = vec![
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
        ];
        failed.sort_by_key(|e| match e {
            ClientEvent::DeliveryFailed { seq } => *seq,
            other => panic!("unexpected {:?}", other),
        });
        assert_eq!(
            failed,
            vec![
                ClientEvent::DeliveryFailed { seq: 0 },
                ClientEvent::DeliveryFailed { seq: 1 }
            ]
        );

        assert!(matches!(
            client.send("three").await,
            Err(Error::WindowStalled { base: 0, .. })
        ));
        assert_eq!(client.pending().await, 0);
        assert_eq!(frames(&transport).len(), 4);

        // the hub confirming late unblocks the window
        transport.inject("ACK 2", addr(HUB));
        settle().await;
        client.send("three").await.unwrap();
        assert_eq!(frames(&transport).last().unwrap().seq, 2);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let transport = Arc::new(MemoryTransport::new(addr(5000)));
        let config = Config {
            event_channel_capacity: 0,
            ..config()
        };
        assert!(matches!(
            Client::start(config, transport, addr(HUB)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_sends_bye_and_closes() {
        let (client, mut events, transport) = start();
        client.send("pending").await.unwrap();
        client.disconnect().await.unwrap();

        assert_eq!(events.recv().await.unwrap(), ClientEvent::Closed);
        assert!(!client.is_running());
        assert_eq!(controls(&transport), vec![ControlMessage::Bye]);
        assert!(matches!(client.send("late").await, Err(Error::ConnectionClosed)));
    }
}
