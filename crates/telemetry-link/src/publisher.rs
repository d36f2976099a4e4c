use std::{
    sync::{Arc, atomic::{AtomicU64, Ordering}},
    thread,
};

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use segmentation_core::Verdict;
use tracing::{debug, error, warn};

use crate::{
    message::{PeopleDetection, RoadSegmentation, TelemetryMessage},
    transport::Transport,
};

#[derive(Clone, Debug)]
pub struct PublisherConfig {
    pub device_id: String,
    pub topic: String,
    pub qos: u8,
    pub message_text: String,
    pub workers: usize,
    pub queue_depth: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            topic: "road/telemetry".into(),
            qos: 1,
            message_text: String::new(),
            workers: 2,
            queue_depth: 16,
        }
    }
}

/// Fire-and-forget telemetry publisher.
///
/// Owns the per-instance sequence counter for its lifetime. Dispatch never
/// blocks: jobs go onto a bounded queue drained by a fixed worker pool, and
/// when the queue is full the message is dropped with a warning. Sequence
/// numbers are dense in dispatch order even under concurrent dispatch.
pub struct TelemetryPublisher {
    job_tx: Sender<TelemetryMessage>,
    sequence: AtomicU64,
    workers: Vec<thread::JoinHandle<()>>,
    config: PublisherConfig,
}

impl TelemetryPublisher {
    pub fn new(transport: Arc<dyn Transport>, config: PublisherConfig) -> Self {
        let (job_tx, job_rx) = bounded::<TelemetryMessage>(config.queue_depth.max(1));
        let mut workers = Vec::with_capacity(config.workers.max(1));
        for index in 0..config.workers.max(1) {
            workers.push(spawn_publish_worker(
                index,
                transport.clone(),
                job_rx.clone(),
                config.topic.clone(),
                config.qos,
            ));
        }
        Self {
            job_tx,
            sequence: AtomicU64::new(0),
            workers,
            config,
        }
    }

    /// Queue one telemetry message and return its sequence number.
    ///
    /// The position is the raw coordinate strings from the GPS collaborator;
    /// both empty when acquisition failed, so the off-road event is still
    /// recorded without coordinates.
    pub fn dispatch(
        &self,
        verdict: &Verdict,
        position: (String, String),
        people: PeopleDetection,
    ) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let message = TelemetryMessage {
            device_id: self.config.device_id.clone(),
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
            latitude: position.0,
            longitude: position.1,
            road_segmentation: RoadSegmentation {
                road_detected: verdict.is_road,
                confidence: verdict.confidence_threshold,
            },
            people_detection: people,
            message: self.config.message_text.clone(),
            sequence,
        };

        match self.job_tx.try_send(message) {
            Ok(()) => {
                metrics::gauge!("telemetry_queue_depth").set(self.job_tx.len() as f64);
            }
            Err(TrySendError::Full(_)) => {
                metrics::counter!("telemetry_dropped_total").increment(1);
                warn!("telemetry queue full, dropping message #{sequence}");
            }
            Err(TrySendError::Disconnected(_)) => {
                error!("telemetry workers terminated, dropping message #{sequence}");
            }
        }
        sequence
    }

    /// Number of messages dispatched so far.
    pub fn dispatched(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Close the queue and join the workers, flushing queued messages.
    pub fn shutdown(self) {
        drop(self.job_tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

fn spawn_publish_worker(
    index: usize,
    transport: Arc<dyn Transport>,
    job_rx: Receiver<TelemetryMessage>,
    topic: String,
    qos: u8,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name(format!("telemetry-worker-{index}"))
        .spawn(move || {
            for message in job_rx.iter() {
                let sequence = message.sequence;
                let payload = match serde_json::to_vec(&message) {
                    Ok(payload) => payload,
                    Err(err) => {
                        error!("failed to serialise message #{sequence}: {err}");
                        continue;
                    }
                };
                match transport.publish(&topic, &payload, qos) {
                    Ok(()) => {
                        metrics::counter!("telemetry_published_total").increment(1);
                        debug!("published message #{sequence} to {topic}");
                    }
                    Err(err) => {
                        metrics::counter!("telemetry_publish_failures_total").increment(1);
                        error!("publish of message #{sequence} failed: {err}");
                    }
                }
            }
        })
        .expect("failed to spawn telemetry worker")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        published: Mutex<Vec<TelemetryMessage>>,
    }

    impl Transport for RecordingTransport {
        fn publish(&self, _topic: &str, payload: &[u8], _qos: u8) -> Result<(), TransportError> {
            let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
            let mut published = self.published.lock().unwrap();
            published.push(TelemetryMessage {
                device_id: value["device_id"].as_str().unwrap().into(),
                timestamp: value["timestamp"].as_f64().unwrap(),
                latitude: value["latitude"].as_str().unwrap().into(),
                longitude: value["longitude"].as_str().unwrap().into(),
                road_segmentation: RoadSegmentation {
                    road_detected: value["road_segmentation"]["road_detected"].as_bool().unwrap(),
                    confidence: 0.0,
                },
                people_detection: PeopleDetection::default(),
                message: String::new(),
                sequence: value["sequence"].as_u64().unwrap(),
            });
            Ok(())
        }
    }

    fn off_road_verdict() -> Verdict {
        Verdict {
            is_road: false,
            road_pixel_count: 10,
            non_road_pixel_count: 90,
            confidence_threshold: 0.95,
        }
    }

    #[test]
    fn sequences_are_dense_in_dispatch_order() {
        let transport = Arc::new(RecordingTransport::default());
        let publisher = TelemetryPublisher::new(transport.clone(), PublisherConfig::default());
        let verdict = off_road_verdict();
        for expected in 0..5u64 {
            let seq = publisher.dispatch(
                &verdict,
                (String::new(), String::new()),
                PeopleDetection::default(),
            );
            assert_eq!(seq, expected);
        }
        publisher.shutdown();

        let mut sequences: Vec<u64> = transport
            .published
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.sequence)
            .collect();
        sequences.sort_unstable();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn concurrent_dispatch_has_no_gaps_or_repeats() {
        let transport = Arc::new(RecordingTransport::default());
        let publisher = TelemetryPublisher::new(
            transport.clone(),
            PublisherConfig {
                queue_depth: 128,
                workers: 4,
                ..PublisherConfig::default()
            },
        );
        let verdict = off_road_verdict();

        let sequences = Mutex::new(Vec::new());
        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        let seq = publisher.dispatch(
                            &verdict,
                            ("53.42".into(), "-6.14".into()),
                            PeopleDetection::default(),
                        );
                        sequences.lock().unwrap().push(seq);
                    }
                });
            }
        });
        assert_eq!(publisher.dispatched(), 100);
        publisher.shutdown();

        let mut sequences = sequences.into_inner().unwrap();
        sequences.sort_unstable();
        assert_eq!(sequences, (0..100).collect::<Vec<u64>>());

        let published = transport.published.lock().unwrap();
        assert_eq!(published.len(), 100);
    }

    #[test]
    fn shutdown_drains_queued_messages() {
        let transport = Arc::new(RecordingTransport::default());
        let publisher = TelemetryPublisher::new(transport.clone(), PublisherConfig::default());
        let verdict = off_road_verdict();
        for _ in 0..3 {
            publisher.dispatch(
                &verdict,
                (String::new(), String::new()),
                PeopleDetection::default(),
            );
        }
        publisher.shutdown();
        assert_eq!(transport.published.lock().unwrap().len(), 3);
    }

    #[test]
    fn degraded_position_serialises_as_empty_strings() {
        let transport = Arc::new(RecordingTransport::default());
        let publisher = TelemetryPublisher::new(transport.clone(), PublisherConfig::default());
        publisher.dispatch(
            &off_road_verdict(),
            (String::new(), String::new()),
            PeopleDetection::default(),
        );
        publisher.shutdown();
        let published = transport.published.lock().unwrap();
        assert_eq!(published[0].latitude, "");
        assert_eq!(published[0].longitude, "");
        assert!(!published[0].road_segmentation.road_detected);
    }
}
