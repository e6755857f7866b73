// Per-region measurements and pass/fail flags.

use ndarray::ArrayView3;

use super::classify::PixelCalls;
use crate::codebook::Codebook;
use crate::errors::DecodeError;
use crate::stack::ImageStack;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub y_min: usize,
    pub y_max: usize,
    pub x_min: usize,
    pub x_max: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegionFlags {
    pub passes_area: bool,
    pub passes_distance: bool,
    pub passes_thresholds: bool,
}

// Cutoffs applied to whole regions. Area bounds are inclusive.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RegionFilter {
    pub min_area: usize,
    pub max_area: usize,
    pub max_distance: f32,
    pub min_magnitude: f32,
}

impl Default for RegionFilter {
    fn default() -> Self {
        return Self {
            min_area: 0,
            max_area: usize::MAX,
            max_distance: f32::INFINITY,
            min_magnitude: 0.0,
        };
    }
}

impl RegionFilter {
    // An infinite `max_distance` means no distance cutoff.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.min_area > self.max_area {
            return Err(DecodeError::InvalidThreshold(format!(
                "min area {} exceeds max area {}",
                self.min_area, self.max_area
            )));
        }
        if !(self.max_distance >= 0.0) {
            return Err(DecodeError::InvalidThreshold(format!(
                "max distance must be non-negative, got {}",
                self.max_distance
            )));
        }
        if !(self.min_magnitude >= 0.0) || self.min_magnitude.is_infinite() {
            return Err(DecodeError::InvalidThreshold(format!(
                "min magnitude must be non-negative and finite, got {}",
                self.min_magnitude
            )));
        }
        return Ok(());
    }

    pub fn flags(&self, area: usize, mean_distance: f32, mean_magnitude: f32) -> RegionFlags {
        let passes_area = self.min_area <= area && area <= self.max_area;
        let passes_distance = mean_distance <= self.max_distance;
        let passes_magnitude = mean_magnitude >= self.min_magnitude;
        return RegionFlags {
            passes_area,
            passes_distance,
            passes_thresholds: passes_area && passes_distance && passes_magnitude,
        };
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RegionRecord {
    // same value as the region's pixels in the label image
    pub id: u32,
    pub z: usize,
    pub area: usize,
    // (z, y, x)
    pub centroid: (f32, f32, f32),
    pub bbox: BoundingBox,
    pub target: usize,
    pub target_name: String,
    pub is_blank: bool,
    pub mean_distance: f32,
    pub mean_magnitude: f32,
    // mean raw trace, round-major
    pub mean_intensity: Vec<f32>,
    pub flags: RegionFlags,
}

impl RegionRecord {
    pub fn passes_thresholds(&self) -> bool {
        self.flags.passes_thresholds
    }

    pub fn apply_filter(&mut self, filter: &RegionFilter) {
        self.flags = filter.flags(self.area, self.mean_distance, self.mean_magnitude);
    }
}

struct RegionAccum {
    z: usize,
    target: u32,
    area: usize,
    sum_y: f64,
    sum_x: f64,
    sum_distance: f64,
    sum_magnitude: f64,
    sum_intensity: Vec<f64>,
    bbox: BoundingBox,
}

impl RegionAccum {
    fn new(z: usize, y: usize, x: usize, target: u32, trace_len: usize) -> Self {
        return Self {
            z,
            target,
            area: 0,
            sum_y: 0.0,
            sum_x: 0.0,
            sum_distance: 0.0,
            sum_magnitude: 0.0,
            sum_intensity: vec![0.0; trace_len],
            bbox: BoundingBox {
                y_min: y,
                y_max: y,
                x_min: x,
                x_max: x,
            },
        };
    }
}

// Summarize every labeled region. Labels must run from 1 to `nlabels`, and
// the returned records are ordered by label.
pub(super) fn measure_regions(
    labels: ArrayView3<u32>,
    nlabels: u32,
    calls: &PixelCalls,
    stack: &ImageStack,
    codebook: &Codebook,
    filter: &RegionFilter,
) -> Vec<RegionRecord> {
    let trace_len = stack.trace_len();
    let mut accums: Vec<Option<RegionAccum>> = (0..nlabels).map(|_| None).collect();
    let mut trace = vec![0.0; trace_len];

    for ((z, y, x), &label) in labels.indexed_iter() {
        if label == 0 {
            continue;
        }

        let accum = accums[(label - 1) as usize].get_or_insert_with(|| {
            RegionAccum::new(z, y, x, calls.target[[z, y, x]], trace_len)
        });
        debug_assert_eq!(accum.target, calls.target[[z, y, x]]);

        accum.area += 1;
        accum.sum_y += y as f64;
        accum.sum_x += x as f64;
        accum.sum_distance += calls.distance[[z, y, x]] as f64;
        accum.sum_magnitude += calls.magnitude[[z, y, x]] as f64;
        accum.bbox.y_min = accum.bbox.y_min.min(y);
        accum.bbox.y_max = accum.bbox.y_max.max(y);
        accum.bbox.x_min = accum.bbox.x_min.min(x);
        accum.bbox.x_max = accum.bbox.x_max.max(x);

        stack.trace_into(z, y, x, &mut trace);
        for (s, &v) in accum.sum_intensity.iter_mut().zip(&trace) {
            *s += v as f64;
        }
    }

    return accums
        .into_iter()
        .enumerate()
        .filter_map(|(i, accum)| accum.map(|accum| (i, accum)))
        .map(|(i, accum)| {
            let n = accum.area as f64;
            let target = accum.target as usize;
            let mean_distance = (accum.sum_distance / n) as f32;
            let mean_magnitude = (accum.sum_magnitude / n) as f32;
            RegionRecord {
                id: i as u32 + 1,
                z: accum.z,
                area: accum.area,
                centroid: (
                    accum.z as f32,
                    (accum.sum_y / n) as f32,
                    (accum.sum_x / n) as f32,
                ),
                bbox: accum.bbox,
                target,
                target_name: codebook.target_name(target).to_string(),
                is_blank: codebook.is_blank(target),
                mean_distance,
                mean_magnitude,
                mean_intensity: accum.sum_intensity.iter().map(|&s| (s / n) as f32).collect(),
                flags: filter.flags(accum.area, mean_distance, mean_magnitude),
            }
        })
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_bounds_are_inclusive() {
        let filter = RegionFilter {
            min_area: 3,
            max_area: 5,
            ..RegionFilter::default()
        };
        assert!(!filter.flags(2, 0.0, 1.0).passes_area);
        assert!(filter.flags(3, 0.0, 1.0).passes_area);
        assert!(filter.flags(5, 0.0, 1.0).passes_area);
        assert!(!filter.flags(6, 0.0, 1.0).passes_area);
    }

    #[test]
    fn test_validate_filter() {
        assert!(RegionFilter::default().validate().is_ok());
        assert!(RegionFilter {
            min_area: 3,
            max_area: 3,
            max_distance: 0.0,
            min_magnitude: 0.0,
        }
        .validate()
        .is_ok());

        for filter in [
            RegionFilter {
                min_area: 5,
                max_area: 1,
                ..RegionFilter::default()
            },
            RegionFilter {
                max_distance: f32::NAN,
                ..RegionFilter::default()
            },
            RegionFilter {
                max_distance: -0.5,
                ..RegionFilter::default()
            },
            RegionFilter {
                min_magnitude: -3.0,
                ..RegionFilter::default()
            },
            RegionFilter {
                min_magnitude: f32::NAN,
                ..RegionFilter::default()
            },
            RegionFilter {
                min_magnitude: f32::INFINITY,
                ..RegionFilter::default()
            },
        ] {
            assert!(
                matches!(filter.validate(), Err(DecodeError::InvalidThreshold(_))),
                "{:?}",
                filter
            );
        }
    }

    #[test]
    fn test_thresholds_combine_all_cutoffs() {
        let filter = RegionFilter {
            min_area: 1,
            max_area: 10,
            max_distance: 0.5,
            min_magnitude: 0.2,
        };
        let flags = filter.flags(4, 0.5, 0.2);
        assert!(flags.passes_area && flags.passes_distance && flags.passes_thresholds);

        let flags = filter.flags(4, 0.6, 1.0);
        assert!(flags.passes_area);
        assert!(!flags.passes_distance);
        assert!(!flags.passes_thresholds);

        let flags = filter.flags(4, 0.1, 0.1);
        assert!(flags.passes_distance);
        assert!(!flags.passes_thresholds);
    }
}
