use serde::Serialize;

/// Wire schema of one telemetry message.
///
/// Coordinates stay strings so a missing GPS fix serialises as the empty
/// string instead of a fabricated zero position. `sequence` is dense and
/// monotonically increasing per publisher instance; downstream consumers
/// use it to detect loss and reordering on the wireless link.
#[derive(Clone, Debug, Serialize)]
pub struct TelemetryMessage {
    pub device_id: String,
    pub timestamp: f64,
    pub latitude: String,
    pub longitude: String,
    pub road_segmentation: RoadSegmentation,
    pub people_detection: PeopleDetection,
    pub message: String,
    pub sequence: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct RoadSegmentation {
    pub road_detected: bool,
    pub confidence: f32,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PeopleDetection {
    pub people_count: u32,
    pub bounding_box: Vec<BoundingBox>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BoundingBox {
    pub confidence: f32,
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}
