use thiserror::Error;

use crate::{ColorMap, ROAD_CLASS_ID, tensor::{ClassTensor, PixelClassMap}};

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("region of interest covers zero pixels")]
    EmptyRegion,
    #[error("tensor geometry mismatch: got {got} values, expected {expected}")]
    GeometryMismatch { got: usize, expected: usize },
    #[error("region of interest (x {x1}..{x2}, y {y1}..{y2}) exceeds tensor {width}x{height}")]
    RegionOutOfBounds {
        x1: usize,
        x2: usize,
        y1: usize,
        y2: usize,
        width: usize,
        height: usize,
    },
}

/// Pixel rectangle participating in the road/non-road vote.
///
/// Half-open on both axes: rows `y1..y2`, columns `x1..x2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionOfInterest {
    pub y1: usize,
    pub y2: usize,
    pub x1: usize,
    pub x2: usize,
}

impl RegionOfInterest {
    /// Vote over the full frame.
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            y1: 0,
            y2: height,
            x1: 0,
            x2: width,
        }
    }

    /// The fixed sub-window used when full segmentation is disabled:
    /// the lower-middle patch directly ahead of the platform.
    pub fn cropped(height: usize) -> Self {
        Self {
            y1: 300,
            y2: height,
            x1: 300,
            x2: 596,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.y2.saturating_sub(self.y1) * self.x2.saturating_sub(self.x1)
    }
}

/// Road/non-road decision for one inference cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Verdict {
    pub is_road: bool,
    pub road_pixel_count: usize,
    pub non_road_pixel_count: usize,
    pub confidence_threshold: f32,
}

/// Classify every pixel inside `roi` and vote on whether the platform is on
/// a road surface.
///
/// A pixel is road iff its (clamped) class id equals [`ROAD_CLASS_ID`]. The
/// verdict flips to non-road once the non-road share of the region exceeds
/// `1 - confidence`. Identical inputs always yield identical verdicts.
pub fn decide(
    tensor: &ClassTensor,
    roi: RegionOfInterest,
    color_map: &ColorMap,
    confidence: f32,
) -> Result<(Verdict, PixelClassMap), DecisionError> {
    if roi.y2 > tensor.height() || roi.x2 > tensor.width() || roi.y1 > roi.y2 || roi.x1 > roi.x2 {
        return Err(DecisionError::RegionOutOfBounds {
            x1: roi.x1,
            x2: roi.x2,
            y1: roi.y1,
            y2: roi.y2,
            width: tensor.width(),
            height: tensor.height(),
        });
    }
    let box_pixels = roi.pixel_count();
    if box_pixels == 0 {
        return Err(DecisionError::EmptyRegion);
    }

    let max_class = color_map.len() - 1;
    let roi_width = roi.x2 - roi.x1;
    let mut class_map = PixelClassMap::zeroed(tensor.height(), tensor.width());
    let mut road_pixels = 0usize;

    // Flat single pass: each pixel's classification is independent.
    for idx in 0..box_pixels {
        let y = roi.y1 + idx / roi_width;
        let x = roi.x1 + idx % roi_width;
        let class_id = tensor.class_at(y, x).min(max_class) as u8;
        class_map.set(y, x, class_id);
        if class_id == ROAD_CLASS_ID {
            road_pixels += 1;
        }
    }
    let non_road_pixels = box_pixels - road_pixels;

    let non_road_fraction = non_road_pixels as f32 / box_pixels as f32;
    let verdict = Verdict {
        is_road: non_road_fraction <= 1.0 - confidence,
        road_pixel_count: road_pixels,
        non_road_pixel_count: non_road_pixels,
        confidence_threshold: confidence,
    };
    Ok((verdict, class_map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NN_HEIGHT, NN_WIDTH};

    fn uniform_tensor(class_id: f32, height: usize, width: usize) -> ClassTensor {
        ClassTensor::from_raw(vec![class_id; height * width], 1, height, width).unwrap()
    }

    /// Multi-channel tensor where `road_share` of pixels score highest on the
    /// road channel and the rest on the background channel.
    fn scored_tensor(road_share: f32, height: usize, width: usize) -> ClassTensor {
        let plane = height * width;
        let road_pixels = (road_share * plane as f32).round() as usize;
        let mut data = vec![0.0f32; 2 * plane];
        for idx in 0..plane {
            if idx < road_pixels {
                data[plane + idx] = 0.9;
                data[idx] = 0.1;
            } else {
                data[idx] = 0.9;
                data[plane + idx] = 0.1;
            }
        }
        ClassTensor::from_raw(data, 2, height, width).unwrap()
    }

    #[test]
    fn all_road_pixels_is_road_at_any_confidence() {
        let tensor = uniform_tensor(1.0, 8, 8);
        let roi = RegionOfInterest::full(8, 8);
        for confidence in [0.0, 0.5, 0.99, 1.0] {
            let (verdict, _) = decide(&tensor, roi, &ColorMap::default(), confidence).unwrap();
            assert!(verdict.is_road, "confidence {confidence}");
        }
    }

    #[test]
    fn no_road_pixels_is_never_road() {
        let tensor = uniform_tensor(0.0, 8, 8);
        let roi = RegionOfInterest::full(8, 8);
        for confidence in [0.01, 0.5, 1.0] {
            let (verdict, _) = decide(&tensor, roi, &ColorMap::default(), confidence).unwrap();
            assert!(!verdict.is_road, "confidence {confidence}");
        }
    }

    #[test]
    fn pixel_counts_partition_the_region() {
        let tensor = scored_tensor(0.35, 16, 16);
        let roi = RegionOfInterest::full(16, 16);
        let (verdict, _) = decide(&tensor, roi, &ColorMap::default(), 0.8).unwrap();
        assert_eq!(
            verdict.road_pixel_count + verdict.non_road_pixel_count,
            roi.pixel_count()
        );
    }

    #[test]
    fn out_of_range_class_ids_are_clamped_to_the_color_map() {
        let tensor = uniform_tensor(200.0, 4, 4);
        let color_map = ColorMap::default();
        let (_, class_map) =
            decide(&tensor, RegionOfInterest::full(4, 4), &color_map, 0.5).unwrap();
        for &class_id in class_map.as_slice() {
            assert!((class_id as usize) < color_map.len());
        }
    }

    #[test]
    fn decide_is_deterministic() {
        let tensor = scored_tensor(0.6, 12, 12);
        let roi = RegionOfInterest::full(12, 12);
        let (first, _) = decide(&tensor, roi, &ColorMap::default(), 0.7).unwrap();
        let (second, _) = decide(&tensor, roi, &ColorMap::default(), 0.7).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn zero_area_region_is_rejected() {
        let tensor = uniform_tensor(1.0, 8, 8);
        let roi = RegionOfInterest {
            y1: 4,
            y2: 4,
            x1: 0,
            x2: 8,
        };
        assert!(matches!(
            decide(&tensor, roi, &ColorMap::default(), 0.5),
            Err(DecisionError::EmptyRegion)
        ));
    }

    #[test]
    fn oversized_region_is_rejected() {
        let tensor = uniform_tensor(1.0, 8, 8);
        let roi = RegionOfInterest::full(16, 8);
        assert!(matches!(
            decide(&tensor, roi, &ColorMap::default(), 0.5),
            Err(DecisionError::RegionOutOfBounds { .. })
        ));
    }

    #[test]
    fn ninety_percent_road_full_frame_scenarios() {
        let tensor = scored_tensor(0.9, NN_HEIGHT, NN_WIDTH);
        let roi = RegionOfInterest::full(NN_WIDTH, NN_HEIGHT);

        // non_road_fraction = 0.10 <= 0.20
        let (verdict, _) = decide(&tensor, roi, &ColorMap::default(), 0.8).unwrap();
        assert!(verdict.is_road);

        // non_road_fraction = 0.10 > 0.05
        let (verdict, _) = decide(&tensor, roi, &ColorMap::default(), 0.95).unwrap();
        assert!(!verdict.is_road);
    }

    #[test]
    fn cropped_region_only_votes_inside_the_window() {
        // Road everywhere except the crop window, which is all background.
        let height = NN_HEIGHT;
        let width = NN_WIDTH;
        let mut data = vec![1.0f32; height * width];
        let roi = RegionOfInterest::cropped(height);
        for y in roi.y1..roi.y2 {
            for x in roi.x1..roi.x2 {
                data[y * width + x] = 0.0;
            }
        }
        let tensor = ClassTensor::from_raw(data, 1, height, width).unwrap();
        let (verdict, class_map) = decide(&tensor, roi, &ColorMap::default(), 0.5).unwrap();
        assert!(!verdict.is_road);
        assert_eq!(verdict.non_road_pixel_count, roi.pixel_count());
        // Pixels outside the window were never classified.
        assert_eq!(class_map.class_at(0, 0), 0);
    }
}
