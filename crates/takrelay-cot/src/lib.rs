//! CoT (Cursor on Target) message model and TAK Protocol framing for the relay
//!
//! # Features
//!
//! - Event model with routing helpers (callsign, contact detection, marti destinations)
//! - TAK Protocol Version 1 protobuf schema via prost
//! - Stream framing (`0xBF` marker + varint length) as a tokio-util codec
//! - Haversine distance and bearing
//!
//! # Example
//!
//! ```rust
//! use takrelay_cot::{decode_frame, encode_frame, Event, Point};
//!
//! let mut event = Event::new("ANDROID-1", "a-f-G-U-C", chrono::Duration::minutes(5));
//! event.point = Point::new(37.7749, -122.4194, 100.0);
//!
//! let frame = encode_frame(&event);
//! let (message, consumed) = decode_frame(&frame).expect("Failed to decode frame");
//! assert_eq!(consumed, frame.len());
//! assert_eq!(message.event.unwrap().uid, "ANDROID-1");
//! ```

pub mod event;
pub mod frame;
pub mod geo;
pub mod proto;

pub use event::{
    Contact, Detail, Event, Group, Point, PrecisionLocation, Status, Takv, Track, PING_TYPE,
    PONG_TYPE,
};
pub use frame::{decode_frame, encode_frame, FrameCodec, FrameError, PROTOBUF_MARKER};
pub use geo::distance_and_bearing;
pub use proto::{decode_payload, encode_payload, DecodeError, TakMessage};
