use crate::decision::DecisionError;

/// Class-score tensor produced by the inference collaborator.
///
/// Logical layout is `[batch = 1, channels, height, width]`, row-major, with
/// the batch dimension already collapsed. A single channel carries class ids
/// directly; multiple channels carry per-class scores resolved by argmax.
pub struct ClassTensor {
    data: Vec<f32>,
    channels: usize,
    height: usize,
    width: usize,
}

impl ClassTensor {
    /// Wrap a raw score buffer, validating it against the declared geometry.
    pub fn from_raw(
        data: Vec<f32>,
        channels: usize,
        height: usize,
        width: usize,
    ) -> Result<Self, DecisionError> {
        let expected = channels * height * width;
        if channels == 0 || data.len() != expected {
            return Err(DecisionError::GeometryMismatch {
                got: data.len(),
                expected,
            });
        }
        Ok(Self {
            data,
            channels,
            height,
            width,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Resolve the class id at `(y, x)`: the raw value for single-channel
    /// tensors, otherwise the argmax over channel scores.
    pub(crate) fn class_at(&self, y: usize, x: usize) -> usize {
        let plane = self.height * self.width;
        let offset = y * self.width + x;
        if self.channels == 1 {
            return self.data[offset].max(0.0) as usize;
        }
        let mut best_class = 0;
        let mut best_score = self.data[offset];
        for c in 1..self.channels {
            let score = self.data[c * plane + offset];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }
        best_class
    }
}

/// Per-pixel class ids derived from a [`ClassTensor`], full-frame geometry.
///
/// Pixels outside the voted region keep class 0, matching the blank
/// background of the rendered overlay. Ids are already clamped to the color
/// map, so lookups can index without bounds checks.
pub struct PixelClassMap {
    classes: Vec<u8>,
    height: usize,
    width: usize,
}

impl PixelClassMap {
    pub(crate) fn zeroed(height: usize, width: usize) -> Self {
        Self {
            classes: vec![0; height * width],
            height,
            width,
        }
    }

    pub(crate) fn set(&mut self, y: usize, x: usize, class_id: u8) {
        self.classes[y * self.width + x] = class_id;
    }

    pub fn class_at(&self, y: usize, x: usize) -> u8 {
        self.classes[y * self.width + x]
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.classes
    }
}
