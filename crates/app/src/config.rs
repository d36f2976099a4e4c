//! Startup configuration and its validation.
//!
//! All configuration errors are fatal and surface before anything connects:
//! an invalid operating mode, mutually exclusive auth options, missing
//! credentials, or a zero-area vote region prevent the appliance from
//! starting.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use segmentation_core::{NN_HEIGHT, NN_WIDTH, RegionOfInterest};
use telemetry_link::{MqttConfig, OperatingMode};

const USAGE: &str = "Usage: road-sentry --host <endpoint> --source <uri> \
[--port <n>] [--client-id <id>] [--topic <topic>] [--mode publish|subscribe|both] \
[--websocket] [--root-ca <path>] [--cert <path>] [--key <path>] \
[--device-id <id>] [--message <text>] [--confidence <0..1>] [--cropped] \
[--video-output <path>] [--publish-workers <n>] [--gps-port <path>] \
[--battery-adc <path> --battery-red-led <path> --battery-green-led <path>]\n\n\
The source is a replay directory of recorded frame/tensor pairs, or one of \
rgb|left|right for an external camera adapter.";

/// Where frames and tensors come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceUri {
    /// Directory of recorded `.rgb`/`.cls` pairs.
    Replay(PathBuf),
    /// Named camera socket served by the external acquisition adapter.
    Camera(String),
}

impl SourceUri {
    fn parse(uri: &str) -> Self {
        match uri {
            "rgb" | "left" | "right" => SourceUri::Camera(uri.to_string()),
            path => SourceUri::Replay(PathBuf::from(path)),
        }
    }
}

/// Battery monitor wiring; present only when all three paths are given.
#[derive(Clone, Debug)]
pub struct BatteryIo {
    pub adc: PathBuf,
    pub red_led: PathBuf,
    pub green_led: PathBuf,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub source: SourceUri,
    pub confidence: f32,
    pub full_segmentation: bool,
    pub video_output: Option<PathBuf>,
    pub gps_port: Option<PathBuf>,
    pub publish_workers: usize,
    pub mqtt: MqttConfig,
    pub device_id: String,
    pub message: String,
    pub battery: Option<BatteryIo>,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut source: Option<String> = None;
        let mut host: Option<String> = None;
        let mut port: Option<u16> = None;
        let mut client_id = "road-sentry".to_string();
        let mut topic = "road/telemetry".to_string();
        let mut mode = "publish".to_string();
        let mut use_websocket = false;
        let mut root_ca: Option<PathBuf> = None;
        let mut cert: Option<PathBuf> = None;
        let mut key: Option<PathBuf> = None;
        let mut device_id = String::new();
        let mut message = String::new();
        let mut confidence = 0.8f32;
        let mut full_segmentation = true;
        let mut video_output: Option<PathBuf> = None;
        let mut gps_port: Option<PathBuf> = None;
        let mut publish_workers = 2usize;
        let mut battery_adc: Option<PathBuf> = None;
        let mut battery_red: Option<PathBuf> = None;
        let mut battery_green: Option<PathBuf> = None;

        let mut idx = 1;
        let mut take_value = |idx: &mut usize, flag: &str| -> Result<String> {
            *idx += 1;
            args.get(*idx)
                .cloned()
                .ok_or_else(|| anyhow!("{flag} requires a value\n\n{USAGE}"))
        };

        while idx < args.len() {
            match args[idx].as_str() {
                "--source" => source = Some(take_value(&mut idx, "--source")?),
                "--host" => host = Some(take_value(&mut idx, "--host")?),
                "--port" => {
                    let value = take_value(&mut idx, "--port")?;
                    port = Some(
                        value
                            .parse::<u16>()
                            .with_context(|| "--port must be an integer".to_string())?,
                    );
                }
                "--client-id" => client_id = take_value(&mut idx, "--client-id")?,
                "--topic" => topic = take_value(&mut idx, "--topic")?,
                "--mode" => mode = take_value(&mut idx, "--mode")?,
                "--websocket" => use_websocket = true,
                "--root-ca" => root_ca = Some(take_value(&mut idx, "--root-ca")?.into()),
                "--cert" => cert = Some(take_value(&mut idx, "--cert")?.into()),
                "--key" => key = Some(take_value(&mut idx, "--key")?.into()),
                "--device-id" => device_id = take_value(&mut idx, "--device-id")?,
                "--message" => message = take_value(&mut idx, "--message")?,
                "--confidence" => {
                    let value = take_value(&mut idx, "--confidence")?;
                    confidence = value
                        .parse::<f32>()
                        .with_context(|| "--confidence must be a number".to_string())?;
                }
                "--cropped" => full_segmentation = false,
                "--video-output" => {
                    video_output = Some(take_value(&mut idx, "--video-output")?.into())
                }
                "--gps-port" => gps_port = Some(take_value(&mut idx, "--gps-port")?.into()),
                "--publish-workers" => {
                    let value = take_value(&mut idx, "--publish-workers")?;
                    publish_workers = value
                        .parse::<usize>()
                        .with_context(|| "--publish-workers must be a positive integer")?;
                    if publish_workers == 0 {
                        bail!("--publish-workers must be at least 1");
                    }
                }
                "--battery-adc" => battery_adc = Some(take_value(&mut idx, "--battery-adc")?.into()),
                "--battery-red-led" => {
                    battery_red = Some(take_value(&mut idx, "--battery-red-led")?.into())
                }
                "--battery-green-led" => {
                    battery_green = Some(take_value(&mut idx, "--battery-green-led")?.into())
                }
                arg => bail!("Unrecognised flag: {arg}\n\n{USAGE}"),
            }
            idx += 1;
        }

        let source = SourceUri::parse(
            &source.ok_or_else(|| anyhow!("Missing --source <uri>\n\n{USAGE}"))?,
        );
        let host = host.ok_or_else(|| anyhow!("Missing --host <endpoint>\n\n{USAGE}"))?;

        let mode: OperatingMode = mode.parse().map_err(|err: String| anyhow!(err))?;

        if use_websocket && (cert.is_some() || key.is_some()) {
            bail!("X.509 cert authentication and WebSocket are mutually exclusive; pick one");
        }
        if use_websocket && root_ca.is_none() {
            bail!("missing credentials: the WebSocket endpoint needs --root-ca");
        }
        if !use_websocket && (root_ca.is_none() || cert.is_none() || key.is_none()) {
            bail!("missing credentials: X.509 auth needs --root-ca, --cert and --key");
        }
        if !(0.0..=1.0).contains(&confidence) {
            bail!("--confidence must be within 0..=1, got {confidence}");
        }

        let battery = match (battery_adc, battery_red, battery_green) {
            (Some(adc), Some(red_led), Some(green_led)) => Some(BatteryIo {
                adc,
                red_led,
                green_led,
            }),
            (None, None, None) => None,
            _ => bail!(
                "battery monitoring needs --battery-adc, --battery-red-led and \
                 --battery-green-led together"
            ),
        };

        let config = Self {
            source,
            confidence,
            full_segmentation,
            video_output,
            gps_port,
            publish_workers,
            mqtt: MqttConfig {
                host,
                port: port.unwrap_or(if use_websocket { 443 } else { 8883 }),
                client_id,
                topic,
                mode,
                use_websocket,
                root_ca,
                client_cert: cert,
                client_key: key,
            },
            device_id,
            message,
            battery,
        };

        if config.roi().pixel_count() == 0 {
            bail!("region of interest covers zero pixels");
        }
        Ok(config)
    }

    pub fn geometry(&self) -> (usize, usize) {
        (NN_WIDTH, NN_HEIGHT)
    }

    /// Vote region derived from the segmentation mode.
    pub fn roi(&self) -> RegionOfInterest {
        if self.full_segmentation {
            RegionOfInterest::full(NN_WIDTH, NN_HEIGHT)
        } else {
            RegionOfInterest::cropped(NN_HEIGHT)
        }
    }
}
