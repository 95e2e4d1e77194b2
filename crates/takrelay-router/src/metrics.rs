//! Relay counters
//!
//! Counts are kept in atomics for the `/stats` endpoint and mirrored into the
//! `metrics` facade so an exporter can be installed by the embedding binary.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Router and reaper metrics collector
#[derive(Debug)]
pub struct RelayMetrics {
    messages_received: AtomicU64,
    messages_discarded: AtomicU64,
    messages_delivered: AtomicU64,
    messages_dropped: AtomicU64,
    unknown_destinations: AtomicU64,
    pings: AtomicU64,
    entities_evicted: AtomicU64,
    contacts_demoted: AtomicU64,
    start_time: Instant,
}

impl RelayMetrics {
    pub fn new() -> Self {
        describe_counter!(
            "relay_messages_received_total",
            "Events taken off the inbound queue"
        );
        describe_counter!(
            "relay_messages_discarded_total",
            "Inbound messages without an event payload"
        );
        describe_counter!(
            "relay_messages_delivered_total",
            "Copies queued to client outbound queues"
        );
        describe_counter!(
            "relay_messages_dropped_total",
            "Copies dropped because a client queue was full or closed"
        );
        describe_counter!(
            "relay_unknown_destinations_total",
            "Addressed callsigns with no connected client"
        );
        describe_counter!("relay_pings_total", "Keepalives answered");
        describe_counter!(
            "relay_entities_evicted_total",
            "Units and contacts removed after their stale time"
        );
        describe_counter!(
            "relay_contacts_demoted_total",
            "Contacts marked offline after going silent"
        );
        describe_gauge!("relay_entities", "Entities currently held");

        Self {
            messages_received: AtomicU64::new(0),
            messages_discarded: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            unknown_destinations: AtomicU64::new(0),
            pings: AtomicU64::new(0),
            entities_evicted: AtomicU64::new(0),
            contacts_demoted: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        counter!("relay_messages_received_total").increment(1);
    }

    pub fn record_discarded(&self) {
        self.messages_discarded.fetch_add(1, Ordering::Relaxed);
        counter!("relay_messages_discarded_total").increment(1);
    }

    pub fn record_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
        counter!("relay_messages_delivered_total").increment(1);
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
        counter!("relay_messages_dropped_total").increment(1);
    }

    pub fn record_unknown_destination(&self) {
        self.unknown_destinations.fetch_add(1, Ordering::Relaxed);
        counter!("relay_unknown_destinations_total").increment(1);
    }

    pub fn record_ping(&self) {
        self.pings.fetch_add(1, Ordering::Relaxed);
        counter!("relay_pings_total").increment(1);
    }

    pub fn record_sweep(&self, evicted: usize, demoted: usize, remaining: usize) {
        self.entities_evicted
            .fetch_add(evicted as u64, Ordering::Relaxed);
        self.contacts_demoted
            .fetch_add(demoted as u64, Ordering::Relaxed);
        counter!("relay_entities_evicted_total").increment(evicted as u64);
        counter!("relay_contacts_demoted_total").increment(demoted as u64);
        gauge!("relay_entities").set(remaining as f64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_discarded: self.messages_discarded.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            unknown_destinations: self.unknown_destinations.load(Ordering::Relaxed),
            pings: self.pings.load(Ordering::Relaxed),
            entities_evicted: self.entities_evicted.load(Ordering::Relaxed),
            contacts_demoted: self.contacts_demoted.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub messages_discarded: u64,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
    pub unknown_destinations: u64,
    pub pings: u64,
    pub entities_evicted: u64,
    pub contacts_demoted: u64,
    pub uptime_secs: u64,
}
