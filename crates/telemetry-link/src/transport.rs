use std::{fs, path::PathBuf, str::FromStr, thread, time::Duration};

use rumqttc::{Client, Event, MqttOptions, Packet, QoS, TlsConfiguration};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("failed to read credential {path}: {source}")]
    Credential {
        path: String,
        source: std::io::Error,
    },
    #[error("unsupported qos level {0}")]
    Qos(u8),
    #[error("websocket transport requires a root ca")]
    MissingRootCa,
}

/// Boundary contract of the wireless link. Implementations must be safe to
/// call from multiple publisher workers at once.
pub trait Transport: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8], qos: u8) -> Result<(), TransportError>;
}

/// Whether this node publishes telemetry, listens for it, or both.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatingMode {
    Publish,
    Subscribe,
    Both,
}

impl OperatingMode {
    pub fn publishes(self) -> bool {
        matches!(self, OperatingMode::Publish | OperatingMode::Both)
    }

    pub fn subscribes(self) -> bool {
        matches!(self, OperatingMode::Subscribe | OperatingMode::Both)
    }
}

impl FromStr for OperatingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publish" => Ok(OperatingMode::Publish),
            "subscribe" => Ok(OperatingMode::Subscribe),
            "both" => Ok(OperatingMode::Both),
            other => Err(format!(
                "unknown mode {other:?}, must be one of publish, subscribe, both"
            )),
        }
    }
}

/// Endpoint settings for the MQTT link. Credential validation (mutually
/// exclusive auth options, missing files) happens at configuration time.
#[derive(Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub mode: OperatingMode,
    pub use_websocket: bool,
    pub root_ca: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

/// rumqttc-backed transport. The connection event loop runs on its own
/// thread for the lifetime of the process and handles reconnects itself.
pub struct MqttTransport {
    client: Client,
}

impl MqttTransport {
    pub fn connect(config: &MqttConfig) -> Result<Self, TransportError> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));

        if config.use_websocket {
            let url = format!("wss://{}:{}/mqtt", config.host, config.port);
            options = MqttOptions::new(&config.client_id, url, config.port);
            options.set_keep_alive(Duration::from_secs(30));
            // The websocket endpoint is always TLS; there is no plaintext
            // fallback.
            let ca = config.root_ca.as_ref().ok_or(TransportError::MissingRootCa)?;
            options.set_transport(rumqttc::Transport::Wss(TlsConfiguration::Simple {
                ca: read_credential(ca)?,
                alpn: None,
                client_auth: None,
            }));
        } else if let Some(ca) = &config.root_ca {
            let client_auth = match (&config.client_cert, &config.client_key) {
                (Some(cert), Some(key)) => {
                    Some((read_credential(cert)?, read_credential(key)?))
                }
                _ => None,
            };
            options.set_transport(rumqttc::Transport::Tls(TlsConfiguration::Simple {
                ca: read_credential(ca)?,
                alpn: None,
                client_auth,
            }));
        }

        let (client, mut connection) = Client::new(options, 16);

        if config.mode.subscribes() {
            client.subscribe(&config.topic, QoS::AtLeastOnce)?;
        }

        let endpoint = format!("{}:{}", config.host, config.port);
        thread::spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        info!(
                            "received message on {}: {}",
                            publish.topic,
                            String::from_utf8_lossy(&publish.payload)
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("mqtt connection to {endpoint} failed: {err}; retrying");
                        thread::sleep(Duration::from_secs(1));
                    }
                }
            }
        });

        Ok(Self { client })
    }
}

impl Transport for MqttTransport {
    fn publish(&self, topic: &str, payload: &[u8], qos: u8) -> Result<(), TransportError> {
        let qos = match qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            other => return Err(TransportError::Qos(other)),
        };
        self.client.publish(topic, qos, false, payload)?;
        Ok(())
    }
}

fn read_credential(path: &PathBuf) -> Result<Vec<u8>, TransportError> {
    fs::read(path).map_err(|source| TransportError::Credential {
        path: path.display().to_string(),
        source,
    })
}
