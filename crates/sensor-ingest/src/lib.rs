//! Acquisition plumbing for the perception loop.
//!
//! The control loop consumes two channels, one of RGB frames and one of
//! class tensors, and treats an empty channel as "no data this tick". This
//! crate provides the channel types, the replay source that feeds them from
//! recorded captures, and the GPS position collaborator.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    thread,
};

use anyhow::anyhow;
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use segmentation_core::ClassTensor;
use thiserror::Error;
use tracing::debug;

pub mod gps;

/// Raw RGB frame captured alongside an inference output.
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy)]
pub enum FrameFormat {
    Rgb8,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open capture source {uri:?}")]
    Open { uri: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type FrameReceiver = Receiver<Result<Frame, CaptureError>>;
pub type TensorReceiver = Receiver<Result<ClassTensor, CaptureError>>;

/// Spawns a background thread replaying recorded frame/tensor pairs.
///
/// The directory holds `<stem>.rgb` (width*height*3 bytes) and `<stem>.cls`
/// (little-endian f32 scores, one or more channel planes) files; pairs are
/// replayed in name order. Buffers are intentionally small to backpressure
/// the reader when the consumer falls behind. The channels disconnect once
/// the recording is exhausted, which the consumer treats as a device fault.
pub fn spawn_replay_reader(
    dir: &Path,
    target_size: (usize, usize),
) -> Result<(FrameReceiver, TensorReceiver), CaptureError> {
    let stems = collect_replay_stems(dir)?;
    if stems.is_empty() {
        return Err(CaptureError::Open {
            uri: dir.display().to_string(),
        });
    }

    let (frame_tx, frame_rx) = bounded(4);
    let (tensor_tx, tensor_rx) = bounded(4);

    thread::spawn(move || {
        if let Err(err) = replay_loop(&stems, target_size, &frame_tx, &tensor_tx) {
            let _ = frame_tx.send(Err(err));
        }
    });

    Ok((frame_rx, tensor_rx))
}

fn collect_replay_stems(dir: &Path) -> Result<Vec<PathBuf>, CaptureError> {
    let entries = std::fs::read_dir(dir).map_err(|_| CaptureError::Open {
        uri: dir.display().to_string(),
    })?;
    let mut stems: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|ext| ext == "rgb").unwrap_or(false))
        .map(|path| path.with_extension(""))
        .filter(|stem| stem.with_extension("cls").exists())
        .collect();
    stems.sort();
    Ok(stems)
}

fn replay_loop(
    stems: &[PathBuf],
    (width, height): (usize, usize),
    frame_tx: &Sender<Result<Frame, CaptureError>>,
    tensor_tx: &Sender<Result<ClassTensor, CaptureError>>,
) -> Result<(), CaptureError> {
    let frame_bytes = width * height * 3;
    let plane = width * height;

    for stem in stems {
        let rgb = read_file(&stem.with_extension("rgb"))?;
        if rgb.len() != frame_bytes {
            return Err(CaptureError::Other(anyhow!(
                "{}: got {} bytes, expected {frame_bytes}",
                stem.display(),
                rgb.len()
            )));
        }

        let raw = read_file(&stem.with_extension("cls"))?;
        if raw.len() % 4 != 0 || (raw.len() / 4) % plane != 0 {
            return Err(CaptureError::Other(anyhow!(
                "{}: class file size {} does not cover {width}x{height} planes",
                stem.display(),
                raw.len()
            )));
        }
        let scores: Vec<f32> = raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let channels = scores.len() / plane;
        let tensor = ClassTensor::from_raw(scores, channels, height, width)
            .map_err(|err| CaptureError::Other(err.into()))?;

        let timestamp_ms = Utc::now().timestamp_millis();
        debug!("replaying {} ({channels} channel(s))", stem.display());

        if frame_tx
            .send(Ok(Frame {
                data: rgb,
                width,
                height,
                timestamp_ms,
                format: FrameFormat::Rgb8,
            }))
            .is_err()
        {
            break;
        }
        if tensor_tx.send(Ok(tensor)).is_err() {
            break;
        }
    }

    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>, CaptureError> {
    let mut data = Vec::new();
    File::open(path)
        .and_then(|mut file| file.read_to_end(&mut data))
        .map_err(|err| CaptureError::Other(anyhow!("{}: {err}", path.display())))?;
    Ok(data)
}
