//! Protobuf support for CoT messages with TAK Protocol Version 1

use crate::event::{
    datetime_to_millis, millis_to_datetime, Contact, Detail, Event, Group, Point,
    PrecisionLocation, Status, Takv, Track,
};
use prost::Message;
use thiserror::Error;

/// TAK Protocol Version 1 schema (takmessage.proto, cotevent.proto, detail.proto and
/// the detail sub-messages).
pub mod pb {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct TakMessage {
        #[prost(message, optional, tag = "1")]
        pub tak_control: Option<TakControl>,
        #[prost(message, optional, tag = "2")]
        pub cot_event: Option<CotEvent>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct TakControl {
        #[prost(uint32, tag = "1")]
        pub min_proto_version: u32,
        #[prost(uint32, tag = "2")]
        pub max_proto_version: u32,
        #[prost(string, tag = "3")]
        pub contact_uid: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CotEvent {
        #[prost(string, tag = "1")]
        pub r#type: String,
        #[prost(string, tag = "2")]
        pub access: String,
        #[prost(string, tag = "3")]
        pub qos: String,
        #[prost(string, tag = "4")]
        pub opex: String,
        #[prost(string, tag = "5")]
        pub uid: String,
        #[prost(uint64, tag = "6")]
        pub send_time: u64,
        #[prost(uint64, tag = "7")]
        pub start_time: u64,
        #[prost(uint64, tag = "8")]
        pub stale_time: u64,
        #[prost(string, tag = "9")]
        pub how: String,
        #[prost(double, tag = "10")]
        pub lat: f64,
        #[prost(double, tag = "11")]
        pub lon: f64,
        #[prost(double, tag = "12")]
        pub hae: f64,
        #[prost(double, tag = "13")]
        pub ce: f64,
        #[prost(double, tag = "14")]
        pub le: f64,
        #[prost(message, optional, tag = "15")]
        pub detail: Option<Detail>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Detail {
        #[prost(string, tag = "1")]
        pub xml_detail: String,
        #[prost(message, optional, tag = "2")]
        pub contact: Option<Contact>,
        #[prost(message, optional, tag = "3")]
        pub group: Option<Group>,
        #[prost(message, optional, tag = "4")]
        pub precision_location: Option<PrecisionLocation>,
        #[prost(message, optional, tag = "5")]
        pub status: Option<Status>,
        #[prost(message, optional, tag = "6")]
        pub takv: Option<Takv>,
        #[prost(message, optional, tag = "7")]
        pub track: Option<Track>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Contact {
        #[prost(string, tag = "1")]
        pub endpoint: String,
        #[prost(string, tag = "2")]
        pub callsign: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Group {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(string, tag = "2")]
        pub role: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PrecisionLocation {
        #[prost(string, tag = "1")]
        pub geopointsrc: String,
        #[prost(string, tag = "2")]
        pub altsrc: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Status {
        #[prost(uint32, tag = "1")]
        pub battery: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Takv {
        #[prost(string, tag = "1")]
        pub device: String,
        #[prost(string, tag = "2")]
        pub platform: String,
        #[prost(string, tag = "3")]
        pub os: String,
        #[prost(string, tag = "4")]
        pub version: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Track {
        #[prost(double, tag = "1")]
        pub speed: f64,
        #[prost(double, tag = "2")]
        pub course: f64,
    }
}

/// Payload bytes that do not form a well-formed event.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Protobuf decoding error: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Timestamp out of range: {0}ms")]
    InvalidTimestamp(u64),
}

/// A decoded TAK message: an optional event plus the sender's control header.
#[derive(Debug, Clone, PartialEq)]
pub struct TakMessage {
    /// Uid from the takControl header, if the sender supplied one
    pub contact_uid: Option<String>,
    /// None for control-only messages
    pub event: Option<Event>,
}

impl From<&Event> for pb::CotEvent {
    fn from(event: &Event) -> Self {
        pb::CotEvent {
            r#type: event.event_type.clone(),
            access: event.access.clone(),
            qos: event.qos.clone(),
            opex: event.opex.clone(),
            uid: event.uid.clone(),
            send_time: datetime_to_millis(&event.time),
            start_time: datetime_to_millis(&event.start),
            stale_time: datetime_to_millis(&event.stale),
            how: event.how.clone(),
            lat: event.point.lat,
            lon: event.point.lon,
            hae: event.point.hae,
            ce: event.point.ce,
            le: event.point.le,
            detail: event.detail.as_ref().map(|d| pb::Detail {
                xml_detail: d.xml_detail.clone().unwrap_or_default(),
                contact: d.contact.as_ref().map(|c| pb::Contact {
                    endpoint: c.endpoint.clone().unwrap_or_default(),
                    callsign: c.callsign.clone(),
                }),
                group: d.group.as_ref().map(|g| pb::Group {
                    name: g.name.clone(),
                    role: g.role.clone(),
                }),
                precision_location: d.precision_location.as_ref().map(|pl| {
                    pb::PrecisionLocation {
                        geopointsrc: pl.geopointsrc.clone(),
                        altsrc: pl.altsrc.clone(),
                    }
                }),
                status: d.status.map(|s| pb::Status { battery: s.battery }),
                takv: d.takv.as_ref().map(|t| pb::Takv {
                    device: t.device.clone(),
                    platform: t.platform.clone(),
                    os: t.os.clone(),
                    version: t.version.clone(),
                }),
                track: d.track.map(|t| pb::Track {
                    speed: t.speed,
                    course: t.course,
                }),
            }),
        }
    }
}

impl From<&Event> for pb::TakMessage {
    fn from(event: &Event) -> Self {
        pb::TakMessage {
            tak_control: Some(pb::TakControl {
                min_proto_version: 1,
                max_proto_version: 1,
                contact_uid: String::new(),
            }),
            cot_event: Some(pb::CotEvent::from(event)),
        }
    }
}

impl TryFrom<pb::CotEvent> for Event {
    type Error = DecodeError;

    fn try_from(proto: pb::CotEvent) -> Result<Self, Self::Error> {
        if proto.uid.is_empty() {
            return Err(DecodeError::MissingField("uid"));
        }
        if proto.r#type.is_empty() {
            return Err(DecodeError::MissingField("type"));
        }

        let timestamp = |millis: u64| {
            millis_to_datetime(millis).ok_or(DecodeError::InvalidTimestamp(millis))
        };

        Ok(Event {
            time: timestamp(proto.send_time)?,
            start: timestamp(proto.start_time)?,
            stale: timestamp(proto.stale_time)?,
            uid: proto.uid,
            event_type: proto.r#type,
            access: proto.access,
            qos: proto.qos,
            opex: proto.opex,
            how: proto.how,
            point: Point::with_accuracy(proto.lat, proto.lon, proto.hae, proto.ce, proto.le),
            detail: proto.detail.map(|d| Detail {
                xml_detail: if d.xml_detail.is_empty() {
                    None
                } else {
                    Some(d.xml_detail)
                },
                contact: d.contact.map(|c| Contact {
                    endpoint: if c.endpoint.is_empty() {
                        None
                    } else {
                        Some(c.endpoint)
                    },
                    callsign: c.callsign,
                }),
                group: d.group.map(|g| Group {
                    name: g.name,
                    role: g.role,
                }),
                precision_location: d.precision_location.map(|pl| PrecisionLocation {
                    geopointsrc: pl.geopointsrc,
                    altsrc: pl.altsrc,
                }),
                status: d.status.map(|s| Status { battery: s.battery }),
                takv: d.takv.map(|t| Takv {
                    device: t.device,
                    platform: t.platform,
                    os: t.os,
                    version: t.version,
                }),
                track: d.track.map(|t| Track {
                    speed: t.speed,
                    course: t.course,
                }),
            }),
        })
    }
}

impl TryFrom<pb::TakMessage> for TakMessage {
    type Error = DecodeError;

    fn try_from(proto: pb::TakMessage) -> Result<Self, Self::Error> {
        Ok(TakMessage {
            contact_uid: proto
                .tak_control
                .map(|c| c.contact_uid)
                .filter(|uid| !uid.is_empty()),
            event: proto.cot_event.map(Event::try_from).transpose()?,
        })
    }
}

/// Serialize an event as a TakMessage payload (no framing)
pub fn encode_payload(event: &Event) -> Vec<u8> {
    pb::TakMessage::from(event).encode_to_vec()
}

/// Deserialize a TakMessage payload (no framing)
pub fn decode_payload(data: &[u8]) -> Result<TakMessage, DecodeError> {
    let proto = pb::TakMessage::decode(data)?;
    TakMessage::try_from(proto)
}
