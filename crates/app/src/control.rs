//! Control loop fusing frame arrival, verdict computation, conditional GPS
//! acquisition, and non-blocking telemetry dispatch.
//!
//! One long-lived loop polls the frame and tensor channels without blocking;
//! an empty channel means "no data this tick" and only skips frame-dependent
//! work. Off-road verdicts trigger a blocking GPS acquisition followed by a
//! fire-and-forget publish, so transport latency never stalls the loop. The
//! stop signal takes effect between iterations.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use crossbeam_channel::TryRecvError;
use segmentation_core::{ClassTensor, ColorMap, RegionOfInterest, decide, overlay_classes};
use sensor_ingest::{Frame, FrameReceiver, TensorReceiver, gps::PositionSource};
use telemetry_link::{PeopleDetection, TelemetryPublisher};
use tracing::{debug, error, warn};

use crate::{
    display::{RoadStatus, StatusDisplay},
    recorder::FrameRecorder,
};

const IDLE_POLL: Duration = Duration::from_millis(2);

pub struct ControlLoop {
    pub frames: FrameReceiver,
    pub tensors: TensorReceiver,
    pub roi: RegionOfInterest,
    pub color_map: ColorMap,
    pub confidence: f32,
    pub publisher: TelemetryPublisher,
    pub publish_enabled: bool,
    pub gps: Box<dyn PositionSource>,
    pub display: Box<dyn StatusDisplay>,
    pub recorder: Option<Box<dyn FrameRecorder>>,
}

impl ControlLoop {
    /// Run until the stop signal flips or a device fault terminates the
    /// loop. On either exit path the recorder is flushed and the publisher
    /// drained.
    pub fn run(mut self, running: &AtomicBool) -> Result<()> {
        let outcome = self.run_inner(running);

        if let Some(mut recorder) = self.recorder.take() {
            if let Err(err) = recorder.finish() {
                warn!("failed to flush recording: {err:?}");
            }
        }
        self.publisher.shutdown();
        outcome
    }

    fn run_inner(&mut self, running: &AtomicBool) -> Result<()> {
        let mut pending_frame: Option<Frame> = None;
        let mut pending_tensor: Option<ClassTensor> = None;
        let mut window_start = Instant::now();
        let mut frames_in_window = 0u32;
        let mut fps = 0.0f32;

        while running.load(Ordering::Relaxed) {
            match self.frames.try_recv() {
                Ok(Ok(frame)) => pending_frame = Some(frame),
                Ok(Err(err)) => {
                    error!("capture fault: {err}");
                    return Err(err).context("frame acquisition failed");
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => bail!("frame source disconnected"),
            }
            match self.tensors.try_recv() {
                Ok(Ok(tensor)) => pending_tensor = Some(tensor),
                Ok(Err(err)) => {
                    error!("inference fault: {err}");
                    return Err(err).context("tensor acquisition failed");
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => bail!("inference source disconnected"),
            }

            if pending_frame.is_some() && pending_tensor.is_some() {
                let frame = pending_frame.take().unwrap();
                let tensor = pending_tensor.take().unwrap();
                self.process_pair(&frame, &tensor, fps);
                frames_in_window += 1;
            } else {
                thread::sleep(IDLE_POLL);
            }

            // Presentation-only rolling fps, refreshed once per second.
            let elapsed = window_start.elapsed().as_secs_f32();
            if elapsed > 1.0 {
                fps = frames_in_window as f32 / elapsed;
                metrics::gauge!("control_loop_fps").set(fps as f64);
                debug!("fps: {fps:.2}");
                frames_in_window = 0;
                window_start = Instant::now();
            }
        }

        Ok(())
    }

    fn process_pair(&mut self, frame: &Frame, tensor: &ClassTensor, _fps: f32) {
        let (verdict, class_map) =
            match decide(tensor, self.roi, &self.color_map, self.confidence) {
                Ok(result) => result,
                Err(err) => {
                    // One garbled tensor is a transient gap, not a fault.
                    metrics::counter!("control_loop_skipped_ticks_total").increment(1);
                    warn!("skipping tick, undecidable tensor: {err}");
                    return;
                }
            };

        if verdict.is_road {
            self.display.show(RoadStatus::Road);
        } else {
            self.display.show(RoadStatus::Sidewalk);
            if self.publish_enabled {
                let position = match self.gps.acquire_position() {
                    Ok(position) => position,
                    Err(err) => {
                        // Degraded publish: the off-road event is still
                        // recorded without coordinates.
                        warn!("gps acquisition failed: {err}; publishing without position");
                        (String::new(), String::new())
                    }
                };
                let sequence =
                    self.publisher
                        .dispatch(&verdict, position, PeopleDetection::default());
                debug!(
                    "dispatched off-road telemetry #{sequence} ({} road / {} non-road px)",
                    verdict.road_pixel_count, verdict.non_road_pixel_count
                );
            }
        }

        if let Some(recorder) = &mut self.recorder {
            let annotated = overlay_classes(&frame.data, &class_map, &self.color_map);
            if let Err(err) = recorder.record(&annotated) {
                warn!("recording failed, disabling recorder: {err:?}");
                self.recorder = None;
            }
        }
    }
}

/// Install the Ctrl+C handler flipping the shared stop flag.
pub fn install_stop_handler(running: Arc<AtomicBool>) {
    if let Err(err) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        warn!("failed to install Ctrl+C handler: {err}");
    }
}
