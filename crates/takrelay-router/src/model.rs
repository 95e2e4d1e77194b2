//! Live entity model
//!
//! Every uid the relay has heard about is either a [`Unit`] (a point or track that
//! something else placed on the map) or a [`Contact`] (a TAK endpoint reporting its
//! own position). The variant is fixed by the first event seen for the uid.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use takrelay_cot::{Event, Point};

/// Fields shared by units and contacts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityInfo {
    pub uid: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub callsign: Option<String>,
    pub point: Point,
    /// Supplied by the sender and trusted as-is
    pub stale_time: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Most recent event for this uid
    #[serde(skip)]
    pub raw: Event,
}

impl EntityInfo {
    fn from_event(event: &Event, now: DateTime<Utc>) -> Self {
        Self {
            uid: event.uid.clone(),
            event_type: event.event_type.clone(),
            callsign: event.callsign().map(str::to_string),
            point: event.point,
            stale_time: event.stale,
            last_seen: now,
            raw: event.clone(),
        }
    }

    fn update(&mut self, event: &Event, now: DateTime<Utc>) {
        self.event_type.clone_from(&event.event_type);
        if let Some(callsign) = event.callsign() {
            self.callsign = Some(callsign.to_string());
        }
        self.point = event.point;
        self.stale_time = event.stale;
        self.last_seen = now;
        self.raw = event.clone();
    }

    /// True once `now` has passed the stale time
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now > self.stale_time
    }
}

/// A non-self-reporting point or track
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Unit {
    #[serde(flatten)]
    pub info: EntityInfo,
}

impl Unit {
    pub fn from_event(event: &Event, now: DateTime<Utc>) -> Self {
        Self {
            info: EntityInfo::from_event(event, now),
        }
    }
}

/// Presence of a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

/// A self-reporting TAK endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contact {
    #[serde(flatten)]
    pub info: EntityInfo,
    pub presence: Presence,
}

impl Contact {
    pub fn from_event(event: &Event, now: DateTime<Utc>) -> Self {
        Self {
            info: EntityInfo::from_event(event, now),
            presence: Presence::Online,
        }
    }

    /// Heartbeat: refresh last seen and mark online without touching other fields
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.info.last_seen = now;
        self.presence = Presence::Online;
    }

    pub fn is_online(&self) -> bool {
        self.presence == Presence::Online
    }

    pub fn set_offline(&mut self) {
        self.presence = Presence::Offline;
    }

    /// Online, but silent for longer than `timeout`
    pub fn is_silent(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.is_online() && now - self.info.last_seen > timeout
    }
}

/// Which variant a uid is held as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Unit,
    Contact,
}

/// Registry entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Item {
    Unit(Unit),
    Contact(Contact),
}

impl Item {
    pub fn new(kind: ItemKind, event: &Event, now: DateTime<Utc>) -> Self {
        match kind {
            ItemKind::Unit => Item::Unit(Unit::from_event(event, now)),
            ItemKind::Contact => Item::Contact(Contact::from_event(event, now)),
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            Item::Unit(_) => ItemKind::Unit,
            Item::Contact(_) => ItemKind::Contact,
        }
    }

    pub fn info(&self) -> &EntityInfo {
        match self {
            Item::Unit(u) => &u.info,
            Item::Contact(c) => &c.info,
        }
    }

    pub fn uid(&self) -> &str {
        &self.info().uid
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.info().is_stale(now)
    }

    /// Refresh from a newer event, keeping the variant. Contacts come back online.
    pub fn update(&mut self, event: &Event, now: DateTime<Utc>) {
        match self {
            Item::Unit(u) => u.info.update(event, now),
            Item::Contact(c) => {
                c.info.update(event, now);
                c.presence = Presence::Online;
            }
        }
    }
}
