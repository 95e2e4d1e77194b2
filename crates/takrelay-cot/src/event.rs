//! CoT event structures and routing-relevant detail accessors

use chrono::{DateTime, Duration, SubsecRound, Utc};
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Keepalive type sent periodically by TAK clients
pub const PING_TYPE: &str = "t-x-c-t";

/// Reply type for a keepalive
pub const PONG_TYPE: &str = "t-x-c-t-r";

/// Suffix TAK clients append to their own uid when sending a ping
pub const PING_UID_SUFFIX: &str = "-ping";

/// Error radius used when a position has no meaningful accuracy
pub const UNKNOWN_ERROR: f64 = 9999999.0;

/// CoT Event represents a Cursor on Target message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub uid: String,
    /// CoT type (e.g., "a-f-G" for atom-friendly-ground)
    #[serde(rename = "type")]
    pub event_type: String,
    pub access: String,
    pub qos: String,
    pub opex: String,
    /// Event timestamp
    pub time: DateTime<Utc>,
    /// Event start time
    pub start: DateTime<Utc>,
    /// Event stale time (when the event becomes invalid)
    pub stale: DateTime<Utc>,
    /// How the event was generated (e.g., "h-e" for human-entered)
    pub how: String,
    /// Geographic location and accuracy
    pub point: Point,
    /// Optional structured detail section
    pub detail: Option<Detail>,
}

/// Geographic point with accuracy metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Latitude in decimal degrees (-90 to 90)
    pub lat: f64,
    /// Longitude in decimal degrees (-180 to 180)
    pub lon: f64,
    /// Height above ellipsoid in meters
    pub hae: f64,
    /// Circular error in meters (95% confidence)
    pub ce: f64,
    /// Linear error in meters (95% confidence)
    pub le: f64,
}

/// Detail section with structured fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Detail {
    /// Remaining detail elements as an XML fragment (marti, remarks, links...)
    pub xml_detail: Option<String>,
    pub contact: Option<Contact>,
    /// Team membership; only TAK endpoints attach this to their self-reports
    pub group: Option<Group>,
    pub precision_location: Option<PrecisionLocation>,
    pub status: Option<Status>,
    pub takv: Option<Takv>,
    pub track: Option<Track>,
}

/// Contact information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Endpoint the client can be reached at (e.g. "*:-1:stcp")
    pub endpoint: Option<String>,
    /// Callsign for display
    pub callsign: String,
}

/// Group information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub role: String,
}

/// Track information for moving entities
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Speed in meters per second
    pub speed: f64,
    /// Course/heading in degrees (0-360)
    pub course: f64,
}

/// Status information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Battery level (0-100)
    pub battery: u32,
}

/// TAK version and device information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Takv {
    pub device: String,
    /// Platform (e.g., "ATAK", "WinTAK", "iTAK")
    pub platform: String,
    pub os: String,
    pub version: String,
}

/// Precision location source information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionLocation {
    /// Geopoint source (e.g., "GPS", "USER")
    pub geopointsrc: String,
    /// Altitude source (e.g., "GPS", "DTED")
    pub altsrc: String,
}

impl Detail {
    /// Create a new empty Detail
    pub fn new() -> Self {
        Self::default()
    }

    /// Callsigns listed in `<marti><dest callsign=".."/></marti>`.
    ///
    /// A malformed fragment yields whatever destinations were read before the
    /// error, so a broken detail degrades to broadcast rather than failing.
    pub fn dest_callsigns(&self) -> Vec<String> {
        let Some(xml) = self.xml_detail.as_deref() else {
            return Vec::new();
        };

        let mut reader = Reader::from_str(xml);
        let mut in_marti = false;
        let mut callsigns = Vec::new();

        loop {
            match reader.read_event() {
                Ok(XmlEvent::Start(e)) if e.name().as_ref() == b"marti" => in_marti = true,
                Ok(XmlEvent::End(e)) if e.name().as_ref() == b"marti" => in_marti = false,
                Ok(XmlEvent::Start(e)) | Ok(XmlEvent::Empty(e))
                    if in_marti && e.name().as_ref() == b"dest" =>
                {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() != b"callsign" {
                            continue;
                        }
                        if let Ok(value) = attr.unescape_value() {
                            if !value.is_empty() {
                                callsigns.push(value.into_owned());
                            }
                        }
                    }
                }
                Ok(XmlEvent::Eof) => break,
                Err(e) => {
                    debug!(error = %e, "Malformed xml detail, stopping destination scan");
                    break;
                }
                _ => {}
            }
        }

        callsigns
    }
}

impl Event {
    /// Create an event stamped with the current time that goes stale after `stale_after`.
    ///
    /// Timestamps are truncated to whole milliseconds, the precision of the wire format.
    pub fn new(uid: impl Into<String>, event_type: impl Into<String>, stale_after: Duration) -> Self {
        let now = Utc::now().trunc_subsecs(3);
        Self {
            uid: uid.into(),
            event_type: event_type.into(),
            access: String::new(),
            qos: String::new(),
            opex: String::new(),
            time: now,
            start: now,
            stale: now + stale_after,
            how: "h-g-i-g-o".to_string(),
            point: Point::new(0.0, 0.0, 0.0),
            detail: None,
        }
    }

    /// Reply to a client keepalive
    pub fn pong() -> Self {
        Self::new("takPong", PONG_TYPE, Duration::seconds(20))
    }

    pub fn is_ping(&self) -> bool {
        self.event_type == PING_TYPE
    }

    /// Get the callsign from the contact detail, if present
    pub fn callsign(&self) -> Option<&str> {
        self.detail
            .as_ref()
            .and_then(|d| d.contact.as_ref())
            .map(|c| c.callsign.as_str())
            .filter(|c| !c.is_empty())
    }

    /// Get the contact endpoint, if present
    pub fn endpoint(&self) -> Option<&str> {
        self.detail
            .as_ref()
            .and_then(|d| d.contact.as_ref())
            .and_then(|c| c.endpoint.as_deref())
            .filter(|e| !e.is_empty())
    }

    /// True when the event is a self-report from a TAK endpoint rather than a
    /// point it placed on the map.
    pub fn is_contact(&self) -> bool {
        self.event_type.starts_with("a-")
            && (self.endpoint().is_some()
                || self.detail.as_ref().is_some_and(|d| d.group.is_some()))
    }

    /// Explicit recipients, empty when the event is meant for everyone
    pub fn dest_callsigns(&self) -> Vec<String> {
        self.detail
            .as_ref()
            .map(Detail::dest_callsigns)
            .unwrap_or_default()
    }

    /// Uid of the contact that sent this ping.
    ///
    /// Clients send keepalives as `<uid>-ping`; anything else is returned as is.
    pub fn ping_contact_uid(&self) -> &str {
        self.uid
            .strip_suffix(PING_UID_SUFFIX)
            .unwrap_or(self.uid.as_str())
    }

    /// Convert stale time to milliseconds since epoch (TAK Protocol Version 1 format)
    pub fn stale_millis(&self) -> u64 {
        datetime_to_millis(&self.stale)
    }
}

/// Convert DateTime to milliseconds since epoch.
///
/// The wire carries unsigned milliseconds, so pre-epoch times are sent as the
/// epoch itself and sub-millisecond precision is dropped.
pub(crate) fn datetime_to_millis(dt: &DateTime<Utc>) -> u64 {
    u64::try_from(dt.timestamp_millis()).unwrap_or(0)
}

/// Convert milliseconds since epoch to DateTime<Utc>
pub(crate) fn millis_to_datetime(millis: u64) -> Option<DateTime<Utc>> {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

impl Point {
    /// Create a new Point with unknown accuracy
    pub fn new(lat: f64, lon: f64, hae: f64) -> Self {
        Self {
            lat,
            lon,
            hae,
            ce: UNKNOWN_ERROR,
            le: UNKNOWN_ERROR,
        }
    }

    /// Create a new Point with specified accuracy
    pub fn with_accuracy(lat: f64, lon: f64, hae: f64, ce: f64, le: f64) -> Self {
        Self {
            lat,
            lon,
            hae,
            ce,
            le,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact_detail(endpoint: Option<&str>) -> Detail {
        Detail {
            contact: Some(Contact {
                endpoint: endpoint.map(str::to_string),
                callsign: "Alpha".to_string(),
            }),
            ..Detail::default()
        }
    }

    #[test]
    fn test_point_creation() {
        let point = Point::new(37.7749, -122.4194, 100.0);
        assert_eq!(point.lat, 37.7749);
        assert_eq!(point.ce, UNKNOWN_ERROR);
        assert_eq!(point.le, UNKNOWN_ERROR);
    }

    #[test]
    fn test_pong() {
        let pong = Event::pong();
        assert_eq!(pong.uid, "takPong");
        assert_eq!(pong.event_type, PONG_TYPE);
        assert_eq!(pong.how, "h-g-i-g-o");
        assert_eq!((pong.stale - pong.time).num_seconds(), 20);
        assert!(!pong.is_ping());
    }

    #[test]
    fn test_ping_contact_uid() {
        let mut ping = Event::new("ANDROID-1234-ping", PING_TYPE, Duration::seconds(10));
        assert!(ping.is_ping());
        assert_eq!(ping.ping_contact_uid(), "ANDROID-1234");

        ping.uid = "ANDROID-1234".to_string();
        assert_eq!(ping.ping_contact_uid(), "ANDROID-1234");
    }

    #[test]
    fn test_is_contact() {
        let mut event = Event::new("ANDROID-1", "a-f-G-U-C", Duration::minutes(5));
        assert!(!event.is_contact());

        event.detail = Some(contact_detail(Some("*:-1:stcp")));
        assert!(event.is_contact());
        assert_eq!(event.callsign(), Some("Alpha"));

        // a callsign alone marks a map point, not an endpoint
        event.detail = Some(contact_detail(None));
        assert!(!event.is_contact());

        event.detail = Some(Detail {
            group: Some(Group {
                name: "Cyan".to_string(),
                role: "Team Member".to_string(),
            }),
            ..contact_detail(None)
        });
        assert!(event.is_contact());

        event.event_type = "b-m-p-s-m".to_string();
        assert!(!event.is_contact());
    }

    #[test]
    fn test_dest_callsigns() {
        let detail = Detail {
            xml_detail: Some(
                r#"<remarks>meet here</remarks><marti><dest callsign="Alpha"/><dest callsign="Bravo"></dest></marti>"#
                    .to_string(),
            ),
            ..Detail::default()
        };
        assert_eq!(detail.dest_callsigns(), vec!["Alpha", "Bravo"]);
    }

    #[test]
    fn test_dest_outside_marti_ignored() {
        let detail = Detail {
            xml_detail: Some(r#"<dest callsign="Alpha"/><marti/>"#.to_string()),
            ..Detail::default()
        };
        assert!(detail.dest_callsigns().is_empty());
    }

    #[test]
    fn test_dest_callsigns_malformed() {
        let detail = Detail {
            xml_detail: Some(r#"<marti><dest callsign="Alpha"/><dest callsign="#.to_string()),
            ..Detail::default()
        };
        assert_eq!(detail.dest_callsigns(), vec!["Alpha"]);
    }

    #[test]
    fn test_millis_conversion() {
        let dt = millis_to_datetime(1_705_314_600_123).unwrap();
        assert_eq!(datetime_to_millis(&dt), 1_705_314_600_123);
        assert!(millis_to_datetime(u64::MAX).is_none());
    }

    #[test]
    fn test_pre_epoch_sent_as_epoch() {
        let before = DateTime::from_timestamp(-5, 0).unwrap();
        assert_eq!(datetime_to_millis(&before), 0);
    }

    #[test]
    fn test_new_uses_wire_precision() {
        let event = Event::new("ANDROID-1", "a-f-G-U-C", Duration::seconds(30));
        for dt in [event.time, event.start, event.stale] {
            assert_eq!(dt.timestamp_subsec_nanos() % 1_000_000, 0);
            assert_eq!(millis_to_datetime(datetime_to_millis(&dt)), Some(dt));
        }
        assert_eq!(Event::pong().time.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
