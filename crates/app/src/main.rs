//! Onboard road-awareness appliance.
//!
//! Wires the replay acquisition source, the verdict engine, the optional
//! battery monitor, the GPS collaborator, and the MQTT telemetry link into
//! one perception loop, then runs it until Ctrl+C or a device fault.

mod battery;
mod config;
mod control;
mod display;
mod hardware;
mod recorder;

use std::{
    env,
    fs::File,
    sync::{Arc, atomic::AtomicBool},
    thread,
};

use anyhow::{Context, Result, bail};
use segmentation_core::ColorMap;
use sensor_ingest::gps::{AtGps, NoGps, PositionSource};
use telemetry_link::{MqttTransport, PublisherConfig, TelemetryPublisher};
use tracing::{info, warn};

use crate::{
    battery::BatteryMonitor,
    config::{AppConfig, SourceUri},
    control::{ControlLoop, install_stop_handler},
    display::LogDisplay,
    hardware::{SysfsAdc, SysfsLeds, SystemPower},
    recorder::{FrameRecorder, RawFrameRecorder},
};

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let args: Vec<String> = env::args().collect();
    let config = AppConfig::from_args(&args)?;

    let running = Arc::new(AtomicBool::new(true));
    install_stop_handler(running.clone());

    if let Some(io) = &config.battery {
        let mut monitor = BatteryMonitor::new(
            SysfsAdc::new(io.adc.clone()),
            SysfsLeds::new(io.red_led.clone(), io.green_led.clone()),
            SystemPower,
        );
        let monitor_running = running.clone();
        thread::Builder::new()
            .name("battery-monitor".into())
            .spawn(move || match monitor.run(&monitor_running) {
                Ok(outcome) => info!("battery monitor finished: {outcome:?}"),
                Err(err) => warn!("battery monitor failed: {err:?}"),
            })
            .context("failed to spawn battery monitor")?;
    }

    let (frames, tensors) = match &config.source {
        SourceUri::Replay(dir) => sensor_ingest::spawn_replay_reader(dir, config.geometry())
            .with_context(|| format!("failed to open replay source {}", dir.display()))?,
        SourceUri::Camera(name) => {
            // Live cameras are served by a separate acquisition process.
            bail!("camera source {name:?} is not wired on this build; use a replay directory")
        }
    };

    let transport = Arc::new(
        MqttTransport::connect(&config.mqtt)
            .with_context(|| format!("failed to connect to {}", config.mqtt.host))?,
    );
    info!(
        "connected to {}:{} as {} ({:?})",
        config.mqtt.host, config.mqtt.port, config.mqtt.client_id, config.mqtt.mode
    );
    let publisher = TelemetryPublisher::new(
        transport,
        PublisherConfig {
            device_id: config.device_id.clone(),
            topic: config.mqtt.topic.clone(),
            message_text: config.message.clone(),
            workers: config.publish_workers,
            ..PublisherConfig::default()
        },
    );

    let gps: Box<dyn PositionSource> = match &config.gps_port {
        Some(path) => {
            let port = File::options()
                .read(true)
                .write(true)
                .open(path)
                .with_context(|| format!("failed to open gps port {}", path.display()))?;
            Box::new(AtGps::new(port))
        }
        None => {
            info!("no gps port configured, publishing without coordinates");
            Box::new(NoGps)
        }
    };

    let recorder: Option<Box<dyn FrameRecorder>> = match &config.video_output {
        Some(path) => Some(Box::new(RawFrameRecorder::create(path)?)),
        None => None,
    };

    let control = ControlLoop {
        frames,
        tensors,
        roi: config.roi(),
        color_map: ColorMap::default(),
        confidence: config.confidence,
        publisher,
        publish_enabled: config.mqtt.mode.publishes(),
        gps,
        display: Box::new(LogDisplay::default()),
        recorder,
    };

    info!(
        "starting perception loop (confidence {}, roi {:?})",
        config.confidence,
        config.roi()
    );
    control.run(&running)
}
