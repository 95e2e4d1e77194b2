//! Optional per-type event dump
//!
//! When enabled, every event the router accepts is appended to `<type>.log` in
//! the configured directory. Writes happen on a blocking thread fed by a bounded
//! queue, so file IO never holds up routing. Write failures are logged and
//! otherwise ignored.

use flume::Sender;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use takrelay_cot::Event;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct EventLog {
    dir: PathBuf,
}

impl EventLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File an event of the given type is written to
    pub fn path_for(&self, event_type: &str) -> PathBuf {
        let name: String = event_type
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.log", name))
    }

    /// Move the log onto a blocking writer thread.
    ///
    /// Must be called from within a tokio runtime. The writer drains what is
    /// queued and stops once every sender is dropped.
    pub fn spawn(self, capacity: usize) -> (Sender<Event>, JoinHandle<()>) {
        let (tx, rx) = flume::bounded::<Event>(capacity);
        let writer = tokio::task::spawn_blocking(move || {
            for event in rx.iter() {
                self.append(&event);
            }
            debug!(dir = %self.dir.display(), "Event log writer stopped");
        });
        (tx, writer)
    }

    pub fn append(&self, event: &Event) {
        let path = self.path_for(&event.event_type);
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| writeln!(file, "{:?}", event));

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to write event log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_path_sanitized() {
        let log = EventLog::new("/tmp/events");
        assert_eq!(log.path_for("a-f-G"), PathBuf::from("/tmp/events/a-f-G.log"));
        assert_eq!(
            log.path_for("../etc/passwd"),
            PathBuf::from("/tmp/events/___etc_passwd.log")
        );
    }

    #[test]
    fn test_append_creates_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path());
        let event = Event::new("ANDROID-1", "a-f-G-U-C", Duration::minutes(1));

        log.append(&event);
        log.append(&event);

        let contents = std::fs::read_to_string(log.path_for("a-f-G-U-C")).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("ANDROID-1"));
    }

    #[tokio::test]
    async fn test_spawned_writer_drains_queue() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path());
        let path = log.path_for("b-m-p-s-m");

        let (tx, writer) = log.spawn(8);
        for i in 0..3 {
            let event = Event::new(format!("marker-{}", i), "b-m-p-s-m", Duration::minutes(1));
            tx.send_async(event).await.unwrap();
        }
        drop(tx);
        writer.await.unwrap();

        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert!(contents.contains("marker-2"));
    }
}
