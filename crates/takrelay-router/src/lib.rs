//! TAKRelay Router
//!
//! Shared state and the single-consumer routing loop behind the relay.
//!
//! # Architecture
//!
//! ```text
//!                  ┌────────────────────────────┐
//!   transports ───►│  inbound queue (bounded)   │
//!                  └─────────────┬──────────────┘
//!                                │
//!                  ┌─────────────▼──────────────┐
//!                  │  MessageRouter (router.rs) │
//!                  │  - ping / pong             │
//!                  │  - a- / b- classification  │
//!                  │  - addressed or broadcast  │
//!                  └──────┬──────────────┬──────┘
//!                         │              │
//!        ┌────────────────▼───┐   ┌──────▼────────────────┐
//!        │  EntityRegistry    │   │  HandlerRegistry      │
//!        │  (registry.rs)     │   │  (handlers.rs)        │
//!        │  units + contacts  │   │  per-client queues    │
//!        └────────▲───────────┘   └───────────────────────┘
//!                 │
//!        ┌────────┴───────────┐
//!        │  PresenceReaper    │
//!        │  (reaper.rs)       │
//!        └────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use takrelay_router::{
//!     EntityRegistry, HandlerRegistry, MessageRouter, RelayMetrics, RouterConfig,
//! };
//!
//! # async fn example() {
//! let entities = Arc::new(EntityRegistry::new());
//! let handlers = Arc::new(HandlerRegistry::new());
//! let metrics = Arc::new(RelayMetrics::new());
//! let router = MessageRouter::new(entities, handlers, metrics, RouterConfig::default());
//!
//! let inbound = router.sender();
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! router.start(shutdown_rx);
//! # drop(inbound);
//! # }
//! ```

pub mod event_log;
pub mod handlers;
pub mod metrics;
pub mod model;
pub mod reaper;
pub mod registry;
pub mod router;

pub use event_log::EventLog;
pub use handlers::{
    ClientHandle, Delivery, DeliveryStrategy, DropReason, HandlerRegistry, Outbound,
};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use model::{Contact, EntityInfo, Item, ItemKind, Presence, Unit};
pub use reaper::{PresenceReaper, ReaperConfig, SweepReport};
pub use registry::EntityRegistry;
pub use router::{InboundMessage, MessageRouter, RouterConfig};
