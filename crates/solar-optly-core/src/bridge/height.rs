use serde::{Deserialize, Serialize};

/// Handle of a requested animation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(pub u64);

/// Raw measurements of the embedded app's own content, in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContentMeasurements {
    pub root_rect_height: f64,
    pub root_scroll_height: f64,
    pub app_root_offset_height: Option<f64>,
    pub container_offset_height: Option<f64>,
}

impl ContentMeasurements {
    /// Largest finite measurement, rounded up. Zero when nothing is positive.
    pub fn height(&self) -> u32 {
        let largest = [
            Some(self.root_rect_height),
            Some(self.root_scroll_height),
            self.app_root_offset_height,
            self.container_offset_height,
        ]
        .into_iter()
        .flatten()
        .filter(|value| value.is_finite())
        .fold(0.0_f64, f64::max);

        largest.ceil().min(f64::from(u32::MAX)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_is_the_rounded_up_maximum() {
        let measurements = ContentMeasurements {
            root_rect_height: 640.2,
            root_scroll_height: 700.0,
            app_root_offset_height: Some(712.4),
            container_offset_height: None,
        };
        assert_eq!(measurements.height(), 713);
    }

    #[test]
    fn empty_content_measures_zero() {
        let measurements = ContentMeasurements {
            root_rect_height: f64::NAN,
            ..ContentMeasurements::default()
        };
        assert_eq!(measurements.height(), 0);
    }
}
