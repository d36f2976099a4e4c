//! Status display seam for the on-road/off-road indicator.

use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoadStatus {
    Road,
    Sidewalk,
}

/// Write-only display collaborator; called once per processed frame with
/// the most recently computed verdict. Owned by the perception thread.
pub trait StatusDisplay: Send {
    fn show(&mut self, status: RoadStatus);
}

/// Fallback display that logs status transitions instead of driving a panel.
#[derive(Default)]
pub struct LogDisplay {
    last: Option<RoadStatus>,
}

impl StatusDisplay for LogDisplay {
    fn show(&mut self, status: RoadStatus) {
        if self.last != Some(status) {
            info!("platform status: {status:?}");
            self.last = Some(status);
        }
    }
}

/// 8x8 RGB frame buffer for an LED-matrix display: solid green on road,
/// solid red off it.
pub fn status_pixels(status: RoadStatus) -> [[u8; 3]; 64] {
    match status {
        RoadStatus::Road => [[0, 255, 0]; 64],
        RoadStatus::Sidewalk => [[255, 0, 0]; 64],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_colors() {
        assert!(status_pixels(RoadStatus::Road)
            .iter()
            .all(|px| *px == [0, 255, 0]));
        assert!(status_pixels(RoadStatus::Sidewalk)
            .iter()
            .all(|px| *px == [255, 0, 0]));
    }
}
