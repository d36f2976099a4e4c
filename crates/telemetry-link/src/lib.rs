//! Telemetry publication over a lossy wireless link.
//!
//! Off-road events are packaged into sequenced JSON messages and handed to
//! a transport without ever blocking the perception loop: dispatch places a
//! job on a bounded queue drained by a fixed worker pool, and a full queue
//! drops the message rather than stalling the caller.

pub use message::{BoundingBox, PeopleDetection, RoadSegmentation, TelemetryMessage};
pub use publisher::{PublisherConfig, TelemetryPublisher};
pub use transport::{MqttConfig, MqttTransport, OperatingMode, Transport, TransportError};

mod message;
mod publisher;
mod transport;
