//! Pure road/non-road decision engine operating on per-pixel class tensors.
//!
//! The decision is deterministic and side-effect free: a class tensor plus a
//! region of interest and a confidence policy map to a [`Verdict`] and a
//! per-pixel class map. Rendering the class map over an RGB frame is a
//! presentation helper and never feeds back into the decision.

pub use color::{ColorMap, overlay_classes};
pub use decision::{DecisionError, RegionOfInterest, Verdict, decide};
pub use tensor::{ClassTensor, PixelClassMap};

mod color;
mod decision;
mod tensor;

/// Class id the upstream model assigns to road pixels (0 is sky/background).
pub const ROAD_CLASS_ID: u8 = 1;

/// Default inference geometry of the road-segmentation model.
pub const NN_WIDTH: usize = 896;
/// Default inference geometry of the road-segmentation model.
pub const NN_HEIGHT: usize = 512;
