//! Message Router
//!
//! The single consumer of the inbound queue. For every decoded message it
//! classifies the event by type, updates the entity registry, and hands copies
//! to the addressed or broadcast set of client handles.
//!
//! ```text
//!   TCP session ─┐
//!   TCP session ─┼──► bounded inbound queue ──► MessageRouter ──► ClientHandle queues
//!   UDP socket  ─┘                                   │
//!                                                    ▼
//!                                              EntityRegistry ◄── PresenceReaper
//! ```

use chrono::{DateTime, Utc};
use flume::{Receiver, Sender};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use takrelay_cot::Event;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event_log::EventLog;
use crate::handlers::{ClientHandle, Delivery, DeliveryStrategy, HandlerRegistry, Outbound};
use crate::metrics::RelayMetrics;
use crate::model::{Item, ItemKind};
use crate::registry::EntityRegistry;

/// A decoded message waiting for the router
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// None for control-only messages, which the router discards
    pub event: Option<Event>,
    /// Explicit recipients; empty means broadcast
    pub dest_callsigns: Vec<String>,
    /// Uid of the client handle the message arrived on
    pub source: String,
}

impl InboundMessage {
    /// Wrap an event, reading its destination list from the detail
    pub fn new(event: Event, source: impl Into<String>) -> Self {
        Self {
            dest_callsigns: event.dest_callsigns(),
            event: Some(event),
            source: source.into(),
        }
    }

    pub fn empty(source: impl Into<String>) -> Self {
        Self {
            event: None,
            dest_callsigns: Vec::new(),
            source: source.into(),
        }
    }
}

/// Configuration for the message router
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Inbound queue capacity; producers wait when it is full
    pub inbound_capacity: usize,
    pub delivery: DeliveryStrategy,
    /// Directory for per-type event logs, if enabled
    pub event_log_dir: Option<PathBuf>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 20,
            delivery: DeliveryStrategy::DropOnFull,
            event_log_dir: None,
        }
    }
}

/// Events queued for the log writer before new ones are dropped
const EVENT_LOG_CAPACITY: usize = 1024;

pub struct MessageRouter {
    dispatcher: Dispatcher,
    rx: Receiver<InboundMessage>,
    tx: Sender<InboundMessage>,
    log_writer: Option<JoinHandle<()>>,
}

impl MessageRouter {
    /// Build a router. With event logging enabled this must run inside a tokio
    /// runtime, otherwise logging is disabled.
    pub fn new(
        entities: Arc<EntityRegistry>,
        handlers: Arc<HandlerRegistry>,
        metrics: Arc<RelayMetrics>,
        config: RouterConfig,
    ) -> Self {
        let (tx, rx) = flume::bounded(config.inbound_capacity);

        let (event_log, log_writer) = match config.event_log_dir {
            Some(dir) if tokio::runtime::Handle::try_current().is_ok() => {
                info!(dir = %dir.display(), "Event logging enabled");
                let (log_tx, writer) = EventLog::new(dir).spawn(EVENT_LOG_CAPACITY);
                (Some(log_tx), Some(writer))
            }
            Some(dir) => {
                warn!(dir = %dir.display(), "No runtime for event log writer, logging disabled");
                (None, None)
            }
            None => (None, None),
        };

        Self {
            dispatcher: Dispatcher {
                entities,
                handlers,
                delivery: config.delivery,
                event_log,
                metrics,
            },
            rx,
            tx,
            log_writer,
        }
    }

    /// Sender for transports to push decoded messages on
    pub fn sender(&self) -> Sender<InboundMessage> {
        self.tx.clone()
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        Arc::clone(&self.dispatcher.metrics)
    }

    /// Messages waiting in the inbound queue
    pub fn pending_count(&self) -> usize {
        self.rx.len()
    }

    /// Spawn the processing loop
    pub fn start(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Drain the inbound queue one message at a time until shutdown, or until
    /// every sender handed out by [`MessageRouter::sender`] is dropped.
    ///
    /// Messages still queued at shutdown are dropped.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let Self {
            dispatcher,
            rx,
            tx,
            log_writer,
        } = self;
        // only transports keep the queue open
        drop(tx);

        info!("Message router started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!(pending = rx.len(), "Shutdown signal received");
                    break;
                }
                msg = rx.recv_async() => match msg {
                    Ok(msg) => dispatcher.process(msg).await,
                    Err(_) => {
                        warn!("All inbound senders dropped");
                        break;
                    }
                }
            }
        }

        drop(dispatcher);
        if let Some(writer) = log_writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "Event log writer ended abnormally");
            }
        }

        info!("Message router stopped");
    }

    /// Handle one inbound message
    pub async fn process(&self, msg: InboundMessage) {
        self.dispatcher.process(msg).await;
    }

    /// Unicast to the handle registered as `uid`
    pub async fn send_to(&self, uid: &str, msg: Outbound) {
        self.dispatcher.send_to(uid, msg).await;
    }

    /// Broadcast to every handle except `excluded_uid`
    pub async fn send_to_all_except(&self, msg: Outbound, excluded_uid: &str) {
        self.dispatcher.send_to_all_except(msg, excluded_uid).await;
    }
}

/// Classification and delivery, split from the queue so the run loop can
/// release its own sender
struct Dispatcher {
    entities: Arc<EntityRegistry>,
    handlers: Arc<HandlerRegistry>,
    delivery: DeliveryStrategy,
    event_log: Option<Sender<Event>>,
    metrics: Arc<RelayMetrics>,
}

impl Dispatcher {
    /// Handle one inbound message
    async fn process(&self, msg: InboundMessage) {
        let InboundMessage {
            event,
            dest_callsigns,
            source,
        } = msg;

        let Some(event) = event else {
            debug!(source = %source, "Discarding message without event");
            self.metrics.record_discarded();
            return;
        };

        self.metrics.record_received();
        if let Some(log) = &self.event_log {
            if let Err(e) = log.try_send(event.clone()) {
                warn!(uid = %event.uid, error = %e, "Event log queue unavailable, not logged");
            }
        }

        let now = Utc::now();

        if event.is_ping() {
            self.handle_ping(event, now).await;
            return;
        }

        if event.event_type.starts_with("a-") {
            debug!(
                uid = %event.uid,
                callsign = event.callsign().unwrap_or_default(),
                stale_in = (event.stale - now).num_seconds(),
                "Position"
            );
            let kind = if event.is_contact() {
                ItemKind::Contact
            } else {
                ItemKind::Unit
            };
            self.upsert(kind, &event, now);
        } else if event.event_type.starts_with("b-") {
            debug!(
                uid = %event.uid,
                callsign = event.callsign().unwrap_or_default(),
                stale_in = (event.stale - now).num_seconds(),
                "Point"
            );
            self.upsert(ItemKind::Unit, &event, now);
        } else {
            debug!(uid = %event.uid, event_type = %event.event_type, "Message");
        }

        self.route(Arc::new(event), &dest_callsigns, &source).await;
    }

    /// Keepalive: refresh the sender, answer it, and relay the ping to everyone else
    async fn handle_ping(&self, event: Event, now: DateTime<Utc>) {
        self.metrics.record_ping();
        let contact_uid = event.ping_contact_uid().to_string();
        debug!(uid = %event.uid, contact_uid = %contact_uid, "Ping");

        self.entities.update(&contact_uid, |item| {
            if let Item::Contact(contact) = item {
                contact.touch(now);
            }
        });

        self.send_to(&contact_uid, Arc::new(Event::pong())).await;
        self.send_to_all_except(Arc::new(event), &contact_uid).await;
    }

    /// Create or refresh the entity for this event. An existing uid keeps its variant.
    fn upsert(&self, kind: ItemKind, event: &Event, now: DateTime<Utc>) {
        let created = self.entities.upsert_with(
            &event.uid,
            || Item::new(kind, event, now),
            |item| {
                if item.kind() != kind {
                    debug!(
                        uid = %event.uid,
                        held_as = ?item.kind(),
                        classified_as = ?kind,
                        "Variant mismatch, updating existing entity"
                    );
                }
                item.update(event, now);
            },
        );

        if created && kind == ItemKind::Contact {
            info!(uid = %event.uid, callsign = event.callsign().unwrap_or_default(), "Contact added");
        }
    }

    async fn route(&self, msg: Outbound, dest_callsigns: &[String], source: &str) {
        if dest_callsigns.is_empty() {
            self.send_to_all_except(msg, source).await;
            return;
        }

        let mut sent_to = HashSet::new();
        for callsign in dest_callsigns {
            match self.handlers.find_by_callsign(callsign) {
                Some(handle) => {
                    if sent_to.insert(handle.uid()) {
                        self.deliver(&handle, Arc::clone(&msg)).await;
                    }
                }
                None => {
                    debug!(callsign = %callsign, uid = %msg.uid, "No client for destination");
                    self.metrics.record_unknown_destination();
                }
            }
        }
    }

    async fn send_to(&self, uid: &str, msg: Outbound) {
        if let Some(handle) = self.handlers.find_by_uid(uid) {
            self.deliver(&handle, msg).await;
        }
    }

    async fn send_to_all_except(&self, msg: Outbound, excluded_uid: &str) {
        for handle in self.handlers.collect_except(excluded_uid) {
            self.deliver(&handle, Arc::clone(&msg)).await;
        }
    }

    async fn deliver(&self, handle: &ClientHandle, msg: Outbound) {
        match handle.enqueue(msg, self.delivery).await {
            Delivery::Queued => self.metrics.record_delivered(),
            Delivery::Dropped(reason) => {
                self.metrics.record_dropped();
                debug!(uid = %handle.uid(), ?reason, "Dropped outbound message");
            }
        }
    }
}
