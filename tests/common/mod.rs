//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use chrono::Duration;
use std::sync::Arc;
use takrelay_cot::{Contact, Detail, Event, Group, PING_TYPE};
use takrelay_router::{
    ClientHandle, EntityRegistry, HandlerRegistry, MessageRouter, Outbound, RelayMetrics,
    RouterConfig,
};

/// Router wired to fresh registries
pub struct Relay {
    pub router: MessageRouter,
    pub entities: Arc<EntityRegistry>,
    pub handlers: Arc<HandlerRegistry>,
    pub metrics: Arc<RelayMetrics>,
}

pub fn relay() -> Relay {
    let entities = Arc::new(EntityRegistry::new());
    let handlers = Arc::new(HandlerRegistry::new());
    let metrics = Arc::new(RelayMetrics::new());
    let router = MessageRouter::new(
        Arc::clone(&entities),
        Arc::clone(&handlers),
        Arc::clone(&metrics),
        RouterConfig::default(),
    );
    Relay {
        router,
        entities,
        handlers,
        metrics,
    }
}

/// Register a client the way a TCP session does once it has identified itself
pub fn connect(handlers: &HandlerRegistry, uid: &str, callsign: &str) -> flume::Receiver<Outbound> {
    let (handle, rx) = ClientHandle::new(uid, 32);
    handle.set_callsign(callsign);
    handlers.register(uid, handle);
    rx
}

/// Self-reported position from an ATAK endpoint
pub fn position_report(uid: &str, callsign: &str, lat: f64, lon: f64) -> Event {
    let mut event = Event::new(uid, "a-f-G-U-C", Duration::minutes(5));
    event.point.lat = lat;
    event.point.lon = lon;
    event.detail = Some(Detail {
        contact: Some(Contact {
            endpoint: Some("*:-1:stcp".to_string()),
            callsign: callsign.to_string(),
        }),
        group: Some(Group {
            name: "Cyan".to_string(),
            role: "Team Member".to_string(),
        }),
        ..Detail::default()
    });
    event
}

/// Keepalive in the `<uid>-ping` form clients send
pub fn ping(uid: &str) -> Event {
    Event::new(format!("{}-ping", uid), PING_TYPE, Duration::seconds(10))
}

/// GeoChat addressed to the given callsigns through a marti block
pub fn chat_to(sender: &str, callsigns: &[&str]) -> Event {
    let dests: String = callsigns
        .iter()
        .map(|cs| format!(r#"<dest callsign="{}"/>"#, cs))
        .collect();
    let mut event = Event::new(
        format!("GeoChat.{}.{}", sender, callsigns.join(",")),
        "b-t-f",
        Duration::minutes(1),
    );
    event.detail = Some(Detail {
        xml_detail: Some(format!("<marti>{}</marti>", dests)),
        ..Detail::default()
    });
    event
}

pub fn drain(rx: &flume::Receiver<Outbound>) -> Vec<Outbound> {
    rx.drain().collect()
}
