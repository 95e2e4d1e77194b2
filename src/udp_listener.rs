//! UDP listener
//!
//! Each datagram carries exactly one frame. A self-report or ping is tagged with
//! the uid it names, so a client that also holds a TCP session is not sent its
//! own broadcast. Anything else is tagged with the sender's address.

use anyhow::{Context, Result};
use flume::Sender;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use takrelay_cot::{decode_frame, Event};
use takrelay_router::InboundMessage;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Largest datagram we read
const MAX_DATAGRAM_SIZE: usize = 65_535;

#[derive(Debug, Default)]
pub struct UdpStats {
    datagrams: AtomicU64,
    bad_datagrams: AtomicU64,
}

impl UdpStats {
    pub fn datagrams(&self) -> u64 {
        self.datagrams.load(Ordering::Relaxed)
    }

    pub fn bad_datagrams(&self) -> u64 {
        self.bad_datagrams.load(Ordering::Relaxed)
    }
}

pub struct UdpListener {
    bind_addr: String,
    inbound: Sender<InboundMessage>,
    stats: Arc<UdpStats>,
}

impl UdpListener {
    pub fn new(bind_addr: impl Into<String>, inbound: Sender<InboundMessage>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            inbound,
            stats: Arc::new(UdpStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<UdpStats> {
        Arc::clone(&self.stats)
    }

    /// Bind and spawn the receive loop
    pub async fn start(self, mut shutdown: broadcast::Receiver<()>) -> Result<JoinHandle<()>> {
        let bind_addr: SocketAddr = self
            .bind_addr
            .parse()
            .with_context(|| format!("Invalid UDP bind address: {}", self.bind_addr))?;
        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind UDP socket on {}", bind_addr))?;

        info!(bind_addr = %bind_addr, "UDP listener started");

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let (len, peer) = tokio::select! {
                    _ = shutdown.recv() => break,
                    received = socket.recv_from(&mut buf) => match received {
                        Ok(received) => received,
                        Err(e) => {
                            error!(error = %e, "UDP receive error");
                            continue;
                        }
                    }
                };

                if !self.handle_datagram(&buf[..len], peer).await {
                    break;
                }
            }
            info!("UDP listener stopped");
        });

        Ok(task)
    }

    /// Returns false once the router is gone
    async fn handle_datagram(&self, data: &[u8], peer: SocketAddr) -> bool {
        self.stats.datagrams.fetch_add(1, Ordering::Relaxed);

        let message = match decode_frame(data) {
            Ok((message, consumed)) => {
                if consumed != data.len() {
                    debug!(peer = %peer, trailing = data.len() - consumed, "Ignoring bytes after frame");
                }
                message
            }
            Err(e) => {
                self.stats.bad_datagrams.fetch_add(1, Ordering::Relaxed);
                warn!(peer = %peer, error = %e, "Discarding datagram");
                return true;
            }
        };

        let inbound = match message.event {
            Some(event) => {
                let source = source_of(&event, peer);
                InboundMessage::new(event, source)
            }
            None => InboundMessage::empty(format!("udp-{}", peer)),
        };

        self.inbound.send_async(inbound).await.is_ok()
    }
}

fn source_of(event: &Event, peer: SocketAddr) -> String {
    if event.is_contact() {
        event.uid.clone()
    } else if event.is_ping() {
        event.ping_contact_uid().to_string()
    } else {
        format!("udp-{}", peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use takrelay_cot::{encode_frame, Contact, Detail, PING_TYPE};
    use takrelay_router::{
        ClientHandle, EntityRegistry, HandlerRegistry, MessageRouter, RelayMetrics, RouterConfig,
    };

    #[tokio::test]
    async fn test_datagrams_forwarded() {
        let (tx, rx) = flume::bounded(4);
        let listener = UdpListener::new("127.0.0.1:0", tx);
        let stats = listener.stats();

        let event = Event::new("marker-1", "b-m-p-s-m", chrono::Duration::minutes(5));
        let peer: SocketAddr = "127.0.0.1:4242".parse().unwrap();

        assert!(listener.handle_datagram(&encode_frame(&event), peer).await);
        assert!(listener.handle_datagram(&[0xBF, 0x05, 0x01], peer).await);

        let forwarded = rx.try_recv().unwrap();
        assert_eq!(forwarded.source, "udp-127.0.0.1:4242");
        assert_eq!(forwarded.event.unwrap().uid, "marker-1");
        assert!(rx.try_recv().is_err());
        assert_eq!(stats.datagrams(), 2);
        assert_eq!(stats.bad_datagrams(), 1);
    }

    #[tokio::test]
    async fn test_self_report_tagged_with_its_uid() {
        let (tx, rx) = flume::bounded(4);
        let listener = UdpListener::new("127.0.0.1:0", tx);
        let peer: SocketAddr = "127.0.0.1:4242".parse().unwrap();

        let mut report = Event::new("ANDROID-A", "a-f-G-U-C", chrono::Duration::minutes(5));
        report.detail = Some(Detail {
            contact: Some(Contact {
                endpoint: Some("*:-1:stcp".to_string()),
                callsign: "Alpha".to_string(),
            }),
            ..Detail::default()
        });
        let ping = Event::new("ANDROID-A-ping", PING_TYPE, chrono::Duration::seconds(10));

        assert!(listener.handle_datagram(&encode_frame(&report), peer).await);
        assert!(listener.handle_datagram(&encode_frame(&ping), peer).await);
        assert_eq!(rx.try_recv().unwrap().source, "ANDROID-A");
        assert_eq!(rx.try_recv().unwrap().source, "ANDROID-A");
    }

    #[tokio::test]
    async fn test_udp_report_not_echoed_to_own_session() {
        let handlers = Arc::new(HandlerRegistry::new());
        let router = MessageRouter::new(
            Arc::new(EntityRegistry::new()),
            Arc::clone(&handlers),
            Arc::new(RelayMetrics::new()),
            RouterConfig::default(),
        );
        let (alpha, rx_alpha) = ClientHandle::new("ANDROID-A", 4);
        handlers.register("ANDROID-A", alpha);
        let (bravo, rx_bravo) = ClientHandle::new("ANDROID-B", 4);
        handlers.register("ANDROID-B", bravo);

        let (tx, rx) = flume::bounded(4);
        let listener = UdpListener::new("127.0.0.1:0", tx);
        let mut report = Event::new("ANDROID-A", "a-f-G-U-C", chrono::Duration::minutes(5));
        report.detail = Some(Detail {
            contact: Some(Contact {
                endpoint: Some("192.168.1.10:4242:udp".to_string()),
                callsign: "Alpha".to_string(),
            }),
            ..Detail::default()
        });
        let peer: SocketAddr = "192.168.1.10:4242".parse().unwrap();
        assert!(listener.handle_datagram(&encode_frame(&report), peer).await);

        router.process(rx.try_recv().unwrap()).await;

        assert_eq!(rx_bravo.len(), 1);
        assert!(rx_alpha.is_empty());
    }
}
