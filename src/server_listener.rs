//! TCP listener for TAK clients
//!
//! ```text
//!                    TAK Clients
//!                         │
//!                   ┌─────▼─────┐
//!                   │ TCP:8999  │  accept loop
//!                   └─────┬─────┘
//!          ┌──────────────┼──────────────┐
//!    ┌─────▼────┐   ┌─────▼────┐   ┌─────▼────┐
//!    │ Session  │   │ Session  │   │ Session  │  read task: 0xBF frames → router
//!    └────┬─────┘   └────┬─────┘   └────┬─────┘  write task: ClientHandle queue → socket
//!         └──────────────┼──────────────┘
//!                        ▼
//!                  MessageRouter
//! ```
//!
//! Each session registers a [`ClientHandle`] under a connection id when it is
//! accepted, then rebinds it to the client's own uid and learns its callsign
//! from the first self-report the client sends.

use anyhow::{Context, Result};
use bytes::BytesMut;
use flume::{Receiver, Sender};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use takrelay_cot::{Event, FrameCodec, TakMessage};
use takrelay_router::{ClientHandle, HandlerRegistry, InboundMessage, Outbound};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, info, warn};

/// Initial buffer capacity for reading
const INITIAL_BUFFER_CAPACITY: usize = 8192;

/// Settings for one TCP listener
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_addr: String,
    /// Largest frame payload accepted from a client
    pub max_frame_size: usize,
    /// Capacity of each client's outbound queue
    pub outbound_capacity: usize,
}

/// Listener statistics
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ListenerStats {
    pub total_accepted: u64,
    pub active_connections: u64,
    pub total_bytes_received: u64,
    pub total_bytes_sent: u64,
    pub total_messages_received: u64,
    pub total_messages_sent: u64,
    pub total_bad_frames: u64,
}

#[derive(Debug, Default)]
pub struct ListenerState {
    accepted: AtomicU64,
    active: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    bad_frames: AtomicU64,
}

impl ListenerState {
    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            total_accepted: self.accepted.load(Ordering::Relaxed),
            active_connections: self.active.load(Ordering::Relaxed),
            total_bytes_received: self.bytes_received.load(Ordering::Relaxed),
            total_bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            total_messages_received: self.messages_received.load(Ordering::Relaxed),
            total_messages_sent: self.messages_sent.load(Ordering::Relaxed),
            total_bad_frames: self.bad_frames.load(Ordering::Relaxed),
        }
    }
}

/// TCP listener feeding the router
pub struct TcpListener {
    config: ListenerConfig,
    handlers: Arc<HandlerRegistry>,
    inbound: Sender<InboundMessage>,
    state: Arc<ListenerState>,
}

impl TcpListener {
    pub fn new(
        config: ListenerConfig,
        handlers: Arc<HandlerRegistry>,
        inbound: Sender<InboundMessage>,
    ) -> Self {
        Self {
            config,
            handlers,
            inbound,
            state: Arc::new(ListenerState::default()),
        }
    }

    pub fn state(&self) -> Arc<ListenerState> {
        Arc::clone(&self.state)
    }

    /// Bind and spawn the accept loop
    pub async fn start(self, mut shutdown: broadcast::Receiver<()>) -> Result<JoinHandle<()>> {
        let bind_addr: SocketAddr = self
            .config
            .bind_addr
            .parse()
            .with_context(|| format!("Invalid TCP bind address: {}", self.config.bind_addr))?;

        let listener = TokioTcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind TCP listener on {}", bind_addr))?;

        info!(bind_addr = %bind_addr, "TCP listener started");

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("TCP listener shutting down");
                        break;
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote_addr)) => self.spawn_session(stream, remote_addr),
                        Err(e) => {
                            error!(error = %e, "Accept error");
                            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        });

        Ok(task)
    }

    fn spawn_session(&self, stream: TcpStream, remote_addr: SocketAddr) {
        let active = self.state.active.fetch_add(1, Ordering::Relaxed) + 1;
        self.state.accepted.fetch_add(1, Ordering::Relaxed);
        info!(remote_addr = %remote_addr, active, "Accepted TCP connection");

        let session = Session {
            connection_id: format!("conn-{}", uuid::Uuid::new_v4()),
            remote_addr,
            handlers: Arc::clone(&self.handlers),
            inbound: self.inbound.clone(),
            state: Arc::clone(&self.state),
            max_frame_size: self.config.max_frame_size,
            outbound_capacity: self.config.outbound_capacity,
        };

        tokio::spawn(session.run(stream));
    }
}

/// One connected client
struct Session {
    connection_id: String,
    remote_addr: SocketAddr,
    handlers: Arc<HandlerRegistry>,
    inbound: Sender<InboundMessage>,
    state: Arc<ListenerState>,
    max_frame_size: usize,
    outbound_capacity: usize,
}

impl Session {
    async fn run(self, stream: TcpStream) {
        let (handle, outbound_rx) = ClientHandle::new(&self.connection_id, self.outbound_capacity);
        self.handlers
            .register(self.connection_id.clone(), Arc::clone(&handle));

        let (read_half, write_half) = stream.into_split();

        let write_task = tokio::spawn(write_loop(
            write_half,
            outbound_rx,
            Arc::clone(&self.state),
            self.connection_id.clone(),
        ));

        if let Err(e) = self.read_loop(read_half, &handle).await {
            warn!(
                connection_id = %self.connection_id,
                uid = %handle.uid(),
                error = %e,
                "Closing connection"
            );
        }

        let uid = handle.uid();
        self.handlers.deregister_handle(&uid, &handle);
        drop(handle);
        write_task.abort();
        let _ = write_task.await;

        self.state.active.fetch_sub(1, Ordering::Relaxed);
        info!(
            connection_id = %self.connection_id,
            uid = %uid,
            remote_addr = %self.remote_addr,
            "Connection closed"
        );
    }

    /// Decode frames until EOF or a fatal frame error
    async fn read_loop<R>(&self, mut reader: R, handle: &Arc<ClientHandle>) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut codec = FrameCodec::with_max_frame_size(self.max_frame_size);
        let mut buffer = BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY);

        loop {
            match codec.decode(&mut buffer) {
                Ok(Some(message)) => {
                    self.state.messages_received.fetch_add(1, Ordering::Relaxed);
                    self.forward(message, handle).await?;
                    continue;
                }
                Ok(None) => {}
                Err(e) if !e.is_fatal() => {
                    self.state.bad_frames.fetch_add(1, Ordering::Relaxed);
                    warn!(connection_id = %self.connection_id, error = %e, "Discarding undecodable frame");
                    continue;
                }
                Err(e) => {
                    self.state.bad_frames.fetch_add(1, Ordering::Relaxed);
                    return Err(e.into());
                }
            }

            let n = reader.read_buf(&mut buffer).await?;
            if n == 0 {
                if !buffer.is_empty() {
                    debug!(
                        connection_id = %self.connection_id,
                        leftover = buffer.len(),
                        "Client closed mid-frame"
                    );
                }
                return Ok(());
            }
            self.state
                .bytes_received
                .fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    async fn forward(&self, message: TakMessage, handle: &Arc<ClientHandle>) -> Result<()> {
        let source = handle.uid();

        let inbound = match message.event {
            Some(event) => {
                self.learn_identity(&event, handle);
                InboundMessage::new(event, handle.uid())
            }
            None => InboundMessage::empty(source),
        };

        self.inbound
            .send_async(inbound)
            .await
            .context("Router inbound queue closed")
    }

    /// Bind the handle to the client's own uid and callsign once it reports itself.
    ///
    /// The first contact report on a session names its client. After that only
    /// reports under the bound uid update the callsign; contacts the client relays
    /// for others leave its identity alone.
    fn learn_identity(&self, event: &Event, handle: &Arc<ClientHandle>) {
        if !event.is_contact() {
            return;
        }

        let current = handle.uid();
        if current == self.connection_id {
            if !self.handlers.rebind(&current, &event.uid) {
                debug!(
                    connection_id = %self.connection_id,
                    uid = %event.uid,
                    "Uid already connected, identity not learned"
                );
                return;
            }
            info!(
                connection_id = %self.connection_id,
                uid = %event.uid,
                "Client identified"
            );
        } else if current != event.uid {
            return;
        }

        if let Some(callsign) = event.callsign() {
            if handle.callsign().as_deref() != Some(callsign) {
                debug!(uid = %event.uid, callsign, "Learned callsign");
                handle.set_callsign(callsign);
            }
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    outbound: Receiver<Outbound>,
    state: Arc<ListenerState>,
    connection_id: String,
) where
    W: AsyncWrite + Unpin,
{
    let mut codec = FrameCodec::new();
    let mut buffer = BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY);

    while let Ok(event) = outbound.recv_async().await {
        buffer.clear();
        if let Err(e) = codec.encode(event.as_ref(), &mut buffer) {
            error!(connection_id = %connection_id, error = %e, "Encode error");
            continue;
        }

        if let Err(e) = writer.write_all(&buffer).await {
            debug!(connection_id = %connection_id, error = %e, "Write error");
            break;
        }
        state
            .bytes_sent
            .fetch_add(buffer.len() as u64, Ordering::Relaxed);
        state.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    debug!(connection_id = %connection_id, "Write task ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use takrelay_cot::{decode_frame, encode_frame, Contact, Detail};
    use takrelay_router::{EntityRegistry, MessageRouter, RelayMetrics, RouterConfig};
    use tokio::net::TcpStream;

    fn self_report(uid: &str, callsign: &str) -> Event {
        let mut event = Event::new(uid, "a-f-G-U-C", chrono::Duration::minutes(5));
        event.detail = Some(Detail {
            contact: Some(Contact {
                endpoint: Some("*:-1:stcp".to_string()),
                callsign: callsign.to_string(),
            }),
            ..Detail::default()
        });
        event
    }

    async fn read_one(stream: &mut TcpStream) -> Event {
        let mut buffer = BytesMut::new();
        loop {
            if let Ok((message, _)) = decode_frame(&buffer) {
                return message.event.unwrap();
            }
            let n = stream.read_buf(&mut buffer).await.unwrap();
            assert!(n > 0, "connection closed");
        }
    }

    fn session(handlers: &Arc<HandlerRegistry>, inbound: Sender<InboundMessage>) -> Session {
        Session {
            connection_id: format!("conn-{}", uuid::Uuid::new_v4()),
            remote_addr: "127.0.0.1:4242".parse().unwrap(),
            handlers: Arc::clone(handlers),
            inbound,
            state: Arc::new(ListenerState::default()),
            max_frame_size: 1024 * 1024,
            outbound_capacity: 16,
        }
    }

    fn accept(session: &Session) -> (Arc<ClientHandle>, Receiver<Outbound>) {
        let (handle, rx) = ClientHandle::new(&session.connection_id, session.outbound_capacity);
        session
            .handlers
            .register(session.connection_id.clone(), Arc::clone(&handle));
        (handle, rx)
    }

    #[test]
    fn test_relayed_contact_does_not_steal_identity() {
        let handlers = Arc::new(HandlerRegistry::new());
        let (inbound, _inbound_rx) = flume::unbounded();

        let session_a = session(&handlers, inbound.clone());
        let (alpha, _rx_alpha) = accept(&session_a);
        let session_b = session(&handlers, inbound);
        let (bravo, rx_bravo) = accept(&session_b);

        session_a.learn_identity(&self_report("ANDROID-A", "Alpha"), &alpha);
        session_b.learn_identity(&self_report("ANDROID-B", "Bravo"), &bravo);

        // alpha relays bravo's report, e.g. from a mesh or federation link
        session_a.learn_identity(&self_report("ANDROID-B", "Bravo"), &alpha);

        assert_eq!(alpha.uid(), "ANDROID-A");
        assert_eq!(alpha.callsign().as_deref(), Some("Alpha"));
        assert!(Arc::ptr_eq(&handlers.find_by_uid("ANDROID-A").unwrap(), &alpha));
        assert!(Arc::ptr_eq(&handlers.find_by_uid("ANDROID-B").unwrap(), &bravo));
        assert!(Arc::ptr_eq(&handlers.find_by_callsign("Bravo").unwrap(), &bravo));
        assert_eq!(handlers.len(), 2);

        for handle in handlers.collect_except("ANDROID-A") {
            handle.try_enqueue(Arc::new(self_report("ANDROID-A", "Alpha")));
        }
        assert_eq!(rx_bravo.len(), 1);
    }

    #[test]
    fn test_first_report_under_live_uid_is_not_bound() {
        let handlers = Arc::new(HandlerRegistry::new());
        let (inbound, _inbound_rx) = flume::unbounded();

        let session_b = session(&handlers, inbound.clone());
        let (bravo, _rx_bravo) = accept(&session_b);
        session_b.learn_identity(&self_report("ANDROID-B", "Bravo"), &bravo);

        let session_x = session(&handlers, inbound);
        let (other, _rx_other) = accept(&session_x);
        session_x.learn_identity(&self_report("ANDROID-B", "Bravo"), &other);

        assert_eq!(other.uid(), session_x.connection_id);
        assert!(other.callsign().is_none());
        assert!(Arc::ptr_eq(&handlers.find_by_uid("ANDROID-B").unwrap(), &bravo));

        // its own report still binds it
        session_x.learn_identity(&self_report("ANDROID-X", "Xray"), &other);
        assert_eq!(other.uid(), "ANDROID-X");
        assert_eq!(other.callsign().as_deref(), Some("Xray"));
    }

    #[tokio::test]
    async fn test_sessions_relay_through_router() {
        let handlers = Arc::new(HandlerRegistry::new());
        let entities = Arc::new(EntityRegistry::new());
        let router = MessageRouter::new(
            Arc::clone(&entities),
            Arc::clone(&handlers),
            Arc::new(RelayMetrics::new()),
            RouterConfig::default(),
        );
        let (shutdown_tx, _) = broadcast::channel(1);
        let inbound = router.sender();
        router.start(shutdown_tx.subscribe());

        // port 0 picks a free port; bind it ourselves to learn the address
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);

        let listener = TcpListener::new(
            ListenerConfig {
                bind_addr: addr.to_string(),
                max_frame_size: 1024 * 1024,
                outbound_capacity: 16,
            },
            Arc::clone(&handlers),
            inbound,
        );
        let state = listener.state();
        listener.start(shutdown_tx.subscribe()).await.unwrap();

        let mut alpha = TcpStream::connect(addr).await.unwrap();
        let mut bravo = TcpStream::connect(addr).await.unwrap();
        while handlers.len() < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        alpha
            .write_all(&encode_frame(&self_report("ANDROID-A", "Alpha")))
            .await
            .unwrap();
        let relayed = read_one(&mut bravo).await;
        assert_eq!(relayed.uid, "ANDROID-A");

        let ping = Event::new(
            "ANDROID-A-ping",
            takrelay_cot::PING_TYPE,
            chrono::Duration::seconds(10),
        );
        alpha.write_all(&encode_frame(&ping)).await.unwrap();

        let pong = read_one(&mut alpha).await;
        assert_eq!(pong.event_type, takrelay_cot::PONG_TYPE);
        assert!(handlers.find_by_callsign("Alpha").is_some());
        assert!(entities.contains("ANDROID-A"));
        assert_eq!(state.stats().total_accepted, 2);

        // a bad marker is a framing error and ends the session
        alpha.write_all(&[0x00, 0x11]).await.unwrap();
        while handlers.find_by_uid("ANDROID-A").is_some() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(state.stats().total_bad_frames, 1);

        shutdown_tx.send(()).unwrap();
    }
}
