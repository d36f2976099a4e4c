//! GPS position collaborator speaking the SIM7600X AT-command protocol.
//!
//! The modem is reached through any serial-like transport implementing
//! `Read + Write`, which keeps the session logic testable without hardware.
//! Coordinates are passed through as the modem's decimal strings; parsing
//! NMEA grammar is out of scope.

use std::{
    io::{Read, Write},
    thread,
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Mean Earth radius used by the great-circle diagnostic.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Error)]
pub enum GpsError {
    #[error("gps serial port error: {0}")]
    Port(#[from] std::io::Error),
    #[error("no gps fix after {attempts} attempts")]
    NoFix { attempts: usize },
}

/// Blocking position acquisition with collaborator-internal retry. The
/// consuming loop runs on its own thread, so implementations move with it.
pub trait PositionSource: Send {
    fn acquire_position(&mut self) -> Result<(String, String), GpsError>;
}

/// AT-command GPS session over a serial-like port.
pub struct AtGps<P> {
    port: P,
    poll_delay: Duration,
    max_attempts: usize,
}

impl<P: Read + Write> AtGps<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            poll_delay: Duration::from_millis(1500),
            max_attempts: 120,
        }
    }

    /// Override the retry cadence (used by tests to avoid real sleeps).
    pub fn with_poll(mut self, poll_delay: Duration, max_attempts: usize) -> Self {
        self.poll_delay = poll_delay;
        self.max_attempts = max_attempts;
        self
    }

    /// Send one AT command and return the response when it contains the
    /// expected marker.
    fn send_at(&mut self, command: &str, expect: &str) -> Result<Option<String>, GpsError> {
        self.port.write_all(format!("{command}\r\n").as_bytes())?;
        let mut buf = [0u8; 512];
        let n = self.port.read(&mut buf)?;
        if n == 0 {
            debug!("{command}: modem not ready");
            return Ok(None);
        }
        let response = String::from_utf8_lossy(&buf[..n]).into_owned();
        if response.contains(expect) {
            Ok(Some(response))
        } else {
            warn!("{command}: unexpected response {response:?}");
            Ok(None)
        }
    }
}

impl<P: Read + Write + Send> PositionSource for AtGps<P> {
    fn acquire_position(&mut self) -> Result<(String, String), GpsError> {
        info!("starting gps session");
        let _ = self.send_at("AT+CGPS=1,1", "OK")?;

        for attempt in 1..=self.max_attempts {
            if let Some(response) = self.send_at("AT+CGPSINFO", "+CGPSINFO:")? {
                if let Some((lat, lon)) = parse_cgpsinfo(&response) {
                    info!("gps fix after {attempt} attempt(s): {lat},{lon}");
                    return Ok((lat, lon));
                }
                debug!("gps fix not ready (attempt {attempt})");
            }
            thread::sleep(self.poll_delay);
        }
        Err(GpsError::NoFix {
            attempts: self.max_attempts,
        })
    }
}

/// Stand-in used when no GPS port is configured; every acquisition fails,
/// so off-road events are published with empty coordinates.
pub struct NoGps;

impl PositionSource for NoGps {
    fn acquire_position(&mut self) -> Result<(String, String), GpsError> {
        Err(GpsError::NoFix { attempts: 0 })
    }
}

/// Extract latitude/longitude from a `+CGPSINFO:` response line. Empty
/// coordinate fields mean the modem has no fix yet.
pub fn parse_cgpsinfo(response: &str) -> Option<(String, String)> {
    let rest = &response[response.find(':')? + 1..];
    let mut fields = rest.split(',');
    let lat = fields.next()?.trim();
    let _ns = fields.next()?;
    let lon = fields.next()?.trim();
    if lat.is_empty() || lon.is_empty() {
        return None;
    }
    Some((lat.to_string(), lon.to_string()))
}

/// Great-circle distance in kilometres between two decimal-degree points.
pub fn haversine(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (lon1, lat1, lon2, lat2) = (
        lon1.to_radians(),
        lat1.to_radians(),
        lon2.to_radians(),
        lat2.to_radians(),
    );
    let d_lon = lon2 - lon1;
    let d_lat = lat2 - lat1;
    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * a.sqrt().asin() * EARTH_RADIUS_KM
}

/// Distance covered between two consecutive fixes, a diagnostic speed proxy.
pub fn fix_distance_km(first: (f64, f64), second: (f64, f64)) -> f64 {
    haversine(first.1, first.0, second.1, second.0)
}
