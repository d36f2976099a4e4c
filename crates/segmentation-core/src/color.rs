use crate::tensor::PixelClassMap;

/// Ordered class-id → RGB lookup used for overlay rendering and for clamping
/// model outputs to a known class range.
#[derive(Clone, Debug)]
pub struct ColorMap {
    colors: Vec<[u8; 3]>,
}

impl ColorMap {
    /// Class maps store ids as `u8`, so a map is capped at 256 entries.
    pub fn new(colors: Vec<[u8; 3]>) -> Self {
        assert!(!colors.is_empty(), "color map requires at least one entry");
        assert!(
            colors.len() <= 256,
            "color map is indexed by u8 class ids, got {} entries",
            colors.len()
        );
        Self { colors }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn color(&self, class_id: u8) -> [u8; 3] {
        self.colors[(class_id as usize).min(self.colors.len() - 1)]
    }
}

impl Default for ColorMap {
    /// Palette of the road-segmentation-adas-0001 classes.
    fn default() -> Self {
        Self::new(vec![
            [0, 0, 0],      // sky / background
            [58, 169, 55],  // road
            [211, 51, 17],  // curb
            [157, 80, 44],  // mark
        ])
    }
}

/// Blend the class colors over an RGB frame at half weight, saturating.
///
/// Presentation-only: the verdict never depends on this output.
pub fn overlay_classes(frame_rgb: &[u8], class_map: &PixelClassMap, colors: &ColorMap) -> Vec<u8> {
    let mut out = frame_rgb.to_vec();
    let pixels = class_map.height() * class_map.width();
    for idx in 0..pixels.min(out.len() / 3) {
        let color = colors.color(class_map.as_slice()[idx]);
        for ch in 0..3 {
            let blended = out[idx * 3 + ch] as u16 + (color[ch] / 2) as u16;
            out[idx * 3 + ch] = blended.min(255) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic]
    fn rejects_maps_wider_than_the_class_id_range() {
        ColorMap::new(vec![[0, 0, 0]; 257]);
    }

    #[test]
    fn lookup_clamps_to_last_entry() {
        let map = ColorMap::default();
        assert_eq!(map.color(255), map.color((map.len() - 1) as u8));
    }

    #[test]
    fn overlay_saturates_instead_of_wrapping() {
        let mut class_map = PixelClassMap::zeroed(1, 1);
        class_map.set(0, 0, 1);
        let frame = vec![250u8, 250, 250];
        let out = overlay_classes(&frame, &class_map, &ColorMap::default());
        assert_eq!(out, vec![255, 255, 255]);
    }
}
