//! Datagram transport
//!
//! The protocol only needs `send_to` / `recv_from` on an unreliable,
//! unordered datagram socket. `tokio::net::UdpSocket` is the production
//! implementation.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// Unreliable datagram send/receive primitive
pub trait Transport: Send + Sync + 'static {
    fn send_to(
        &self,
        buf: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;
}

impl Transport for UdpSocket {
    fn send_to(
        &self,
        buf: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send {
        UdpSocket::send_to(self, buf, target)
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send {
        UdpSocket::recv_from(self, buf)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-process transport that records every datagram it is asked to send.

    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};

    use bytes::Bytes;
    use tokio::sync::{mpsc, Mutex};

    pub struct MemoryTransport {
        pub local_addr: SocketAddr,
        sent: parking_lot::Mutex<Vec<(SocketAddr, Bytes)>>,
        inbound_tx: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
        inbound_rx: Mutex<mpsc::UnboundedReceiver<(Bytes, SocketAddr)>>,
        fail_sends: AtomicBool,
    }

    impl MemoryTransport {
        pub fn new(local_addr: SocketAddr) -> Self {
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            Self {
                local_addr,
                sent: parking_lot::Mutex::new(Vec::new()),
                inbound_tx,
                inbound_rx: Mutex::new(inbound_rx),
                fail_sends: AtomicBool::new(false),
            }
        }

        /// Queue a datagram for the next `recv_from`
        pub fn inject(&self, bytes: impl Into<Bytes>, from: SocketAddr) {
            let _ = self.inbound_tx.send((bytes.into(), from));
        }

        /// Drain everything sent so far
        pub fn take_sent(&self) -> Vec<(SocketAddr, Bytes)> {
            std::mem::take(&mut *self.sent.lock())
        }

        pub fn sent_to(&self, target: SocketAddr) -> Vec<Bytes> {
            self.sent
                .lock()
                .iter()
                .filter(|(addr, _)| *addr == target)
                .map(|(_, bytes)| bytes.clone())
                .collect()
        }

        pub fn set_fail_sends(&self, fail: bool) {
            self.fail_sends.store(fail, Ordering::SeqCst);
        }
    }

    impl Transport for MemoryTransport {
        fn send_to(
            &self,
            buf: &[u8],
            target: SocketAddr,
        ) -> impl Future<Output = io::Result<usize>> + Send {
            let result = if self.fail_sends.load(Ordering::SeqCst) {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "transport closed"))
            } else {
                self.sent.lock().push((target, Bytes::copy_from_slice(buf)));
                Ok(buf.len())
            };
            std::future::ready(result)
        }

        fn recv_from(
            &self,
            buf: &mut [u8],
        ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send {
            async move {
                let next = self.inbound_rx.lock().await.recv().await;
                match next {
                    Some((bytes, from)) => {
                        let len = bytes.len().min(buf.len());
                        buf[..len].copy_from_slice(&bytes[..len]);
                        Ok((len, from))
                    }
                    None => Err(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "transport closed",
                    )),
                }
            }
        }
    }
}
