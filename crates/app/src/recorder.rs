//! Optional recording of annotated frames, flushed when the loop stops.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use tracing::info;

pub trait FrameRecorder: Send {
    fn record(&mut self, rgb: &[u8]) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

/// Appends raw RGB frames to a single file; fixed geometry, no container.
pub struct RawFrameRecorder {
    writer: BufWriter<File>,
    path: String,
    frames: u64,
}

impl RawFrameRecorder {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create recording at {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.display().to_string(),
            frames: 0,
        })
    }
}

impl FrameRecorder for RawFrameRecorder {
    fn record(&mut self, rgb: &[u8]) -> Result<()> {
        self.writer.write_all(rgb).context("recording write failed")?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush().context("recording flush failed")?;
        info!("recorded {} frame(s) to {}", self.frames, self.path);
        Ok(())
    }
}
