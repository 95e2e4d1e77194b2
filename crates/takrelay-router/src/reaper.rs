//! Presence Reaper
//!
//! Periodic sweep over the entity registry. Entities past their stale time are
//! evicted; contacts that have gone quiet for longer than the offline timeout
//! are marked offline but kept until they go stale.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::metrics::RelayMetrics;
use crate::model::Item;
use crate::registry::EntityRegistry;

/// Reaper configuration
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Silence after which an online contact is marked offline
    pub offline_timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            offline_timeout: Duration::from_secs(120),
        }
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub demoted: usize,
}

pub struct PresenceReaper {
    entities: Arc<EntityRegistry>,
    config: ReaperConfig,
    metrics: Arc<RelayMetrics>,
}

impl PresenceReaper {
    pub fn new(
        entities: Arc<EntityRegistry>,
        metrics: Arc<RelayMetrics>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            entities,
            config,
            metrics,
        }
    }

    /// Evict stale entities and demote silent contacts as of `now`
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let offline_timeout = match chrono::Duration::from_std(self.config.offline_timeout) {
            Ok(timeout) => timeout,
            Err(_) => chrono::Duration::MAX,
        };
        let mut report = SweepReport::default();

        self.entities.retain(|item| {
            if item.is_stale(now) {
                debug!(uid = %item.uid(), kind = ?item.kind(), "Removing stale entity");
                report.removed += 1;
                return false;
            }

            if let Item::Contact(contact) = item {
                if contact.is_silent(now, offline_timeout) {
                    info!(
                        uid = %contact.info.uid,
                        callsign = contact.info.callsign.as_deref().unwrap_or_default(),
                        "Contact offline"
                    );
                    contact.set_offline();
                    report.demoted += 1;
                }
            }
            true
        });

        self.metrics
            .record_sweep(report.removed, report.demoted, self.entities.len());
        report
    }

    /// Spawn the periodic sweep. The first sweep runs one interval after start.
    pub fn start(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.tick().await;

            info!(
                interval_secs = self.config.interval.as_secs(),
                offline_timeout_secs = self.config.offline_timeout.as_secs(),
                "Presence reaper started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        let report = self.sweep(Utc::now());
                        if report.removed > 0 || report.demoted > 0 {
                            debug!(
                                removed = report.removed,
                                demoted = report.demoted,
                                remaining = self.entities.len(),
                                "Sweep complete"
                            );
                        }
                    }
                }
            }

            info!("Presence reaper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Contact, ItemKind, Unit};
    use takrelay_cot::Event;

    fn reaper(entities: &Arc<EntityRegistry>, interval: Duration) -> PresenceReaper {
        PresenceReaper::new(
            Arc::clone(entities),
            Arc::new(RelayMetrics::new()),
            ReaperConfig {
                interval,
                offline_timeout: Duration::from_secs(120),
            },
        )
    }

    fn event(uid: &str, stale_in: chrono::Duration) -> Event {
        Event::new(uid, "a-f-G-U-C", stale_in)
    }

    #[test]
    fn test_stale_entities_removed() {
        let entities = Arc::new(EntityRegistry::new());
        let now = Utc::now();
        entities.upsert(
            "old",
            Item::Unit(Unit::from_event(&event("old", chrono::Duration::seconds(-1)), now)),
        );
        entities.upsert(
            "fresh",
            Item::new(ItemKind::Contact, &event("fresh", chrono::Duration::minutes(5)), now),
        );

        let report = reaper(&entities, Duration::from_secs(60)).sweep(now);
        assert_eq!(report, SweepReport { removed: 1, demoted: 0 });
        assert!(!entities.contains("old"));
        assert!(entities.contains("fresh"));
    }

    #[test]
    fn test_silent_contact_demoted_then_evicted() {
        let entities = Arc::new(EntityRegistry::new());
        let heard = Utc::now() - chrono::Duration::minutes(3);
        let report_event = event("ANDROID-1", chrono::Duration::minutes(10));
        entities.upsert(
            "ANDROID-1",
            Item::Contact(Contact::from_event(&report_event, heard)),
        );

        let reaper = reaper(&entities, Duration::from_secs(60));
        let report = reaper.sweep(Utc::now());
        assert_eq!(report.demoted, 1);
        match entities.get("ANDROID-1") {
            Some(Item::Contact(c)) => assert!(!c.is_online()),
            other => panic!("expected offline contact, got {:?}", other),
        }

        // offline contacts are not demoted twice
        assert_eq!(reaper.sweep(Utc::now()).demoted, 0);
        assert!(entities.contains("ANDROID-1"));

        let report = reaper.sweep(Utc::now() + chrono::Duration::minutes(11));
        assert_eq!(report.removed, 1);
        assert!(entities.is_empty());
    }

    #[test]
    fn test_units_never_demoted() {
        let entities = Arc::new(EntityRegistry::new());
        let heard = Utc::now() - chrono::Duration::hours(1);
        let marker = Event::new("marker-1", "b-m-p-s-m", chrono::Duration::hours(2));
        entities.upsert("marker-1", Item::Unit(Unit::from_event(&marker, heard)));

        let report = reaper(&entities, Duration::from_secs(60)).sweep(Utc::now());
        assert_eq!(report, SweepReport::default());
        assert!(entities.contains("marker-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep_evicts() {
        let entities = Arc::new(EntityRegistry::new());
        entities.upsert(
            "old",
            Item::Unit(Unit::from_event(
                &event("old", chrono::Duration::seconds(-1)),
                Utc::now(),
            )),
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = reaper(&entities, Duration::from_millis(100)).start(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!entities.contains("old"));

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
