// Pixel spot decoding: assign every pixel to its nearest codeword, group
// adjacent pixels with the same target into regions, and summarize regions.

mod classify;
mod labeling;
mod metric;
mod regions;

pub use classify::{PixelCalls, UNASSIGNED};
pub use labeling::{label_plane, label_volume, Connectivity};
pub use metric::{nearest_codeword, DistanceMetric, NormOrder};
pub use regions::{BoundingBox, RegionFilter, RegionFlags, RegionRecord};

use ndarray::{Array3, ArrayView3};
use tracing::{debug, info};

use crate::codebook::Codebook;
use crate::errors::DecodeError;
use crate::stack::ImageStack;

#[derive(Clone, Debug, PartialEq)]
pub struct DecoderParams {
    pub metric: DistanceMetric,
    // norm used for trace magnitudes, and for normalization when enabled
    pub norm_order: NormOrder,
    // scale traces and non-zero codewords to unit norm before comparing them
    pub normalize: bool,
    pub distance_threshold: f32,
    pub magnitude_threshold: f32,
    pub min_area: usize,
    pub max_area: usize,
    pub connectivity: Connectivity,
}

impl Default for DecoderParams {
    fn default() -> Self {
        return Self {
            metric: DistanceMetric::Euclidean,
            norm_order: NormOrder::L2,
            normalize: false,
            distance_threshold: 0.5176,
            magnitude_threshold: 1.77e-5,
            min_area: 1,
            max_area: usize::MAX,
            connectivity: Connectivity::Eight,
        };
    }
}

impl DecoderParams {
    pub fn validate(&self) -> Result<(), DecodeError> {
        if !(self.distance_threshold >= 0.0) || self.distance_threshold.is_infinite() {
            return Err(DecodeError::InvalidThreshold(format!(
                "distance threshold must be non-negative and finite, got {}",
                self.distance_threshold
            )));
        }
        if !(self.magnitude_threshold >= 0.0) || self.magnitude_threshold.is_infinite() {
            return Err(DecodeError::InvalidThreshold(format!(
                "magnitude threshold must be non-negative and finite, got {}",
                self.magnitude_threshold
            )));
        }
        if self.min_area > self.max_area {
            return Err(DecodeError::InvalidThreshold(format!(
                "min area {} exceeds max area {}",
                self.min_area, self.max_area
            )));
        }
        return Ok(());
    }

    // Region cutoffs implied by the decoding thresholds.
    pub fn region_filter(&self) -> RegionFilter {
        return RegionFilter {
            min_area: self.min_area,
            max_area: self.max_area,
            max_distance: self.distance_threshold,
            min_magnitude: self.magnitude_threshold,
        };
    }
}

pub struct PixelSpotDecoder<'a> {
    codebook: &'a Codebook,
    params: DecoderParams,
    // codewords as compared against traces, normalized if requested
    codewords: Vec<Vec<f32>>,
}

impl<'a> PixelSpotDecoder<'a> {
    pub fn new(codebook: &'a Codebook, params: DecoderParams) -> Result<Self, DecodeError> {
        params.validate()?;
        if codebook.ntargets() == 0 {
            return Err(DecodeError::EmptyCodebook);
        }

        let codewords = codebook
            .codewords()
            .outer_iter()
            .map(|row| {
                let mut codeword = row.to_vec();
                if params.normalize {
                    params.norm_order.normalize(&mut codeword);
                }
                codeword
            })
            .collect();

        return Ok(Self {
            codebook,
            params,
            codewords,
        });
    }

    pub fn params(&self) -> &DecoderParams {
        &self.params
    }

    pub fn codebook(&self) -> &Codebook {
        self.codebook
    }

    fn check_shape(&self, stack: &ImageStack) -> Result<(), DecodeError> {
        let checks = [
            ("codeword length", stack.trace_len(), self.codebook.code_length()),
            ("codebook rounds", stack.nrounds(), self.codebook.nrounds()),
            ("codebook channels", stack.nchannels(), self.codebook.nchannels()),
        ];
        for (what, expected, found) in checks {
            if expected != found {
                return Err(DecodeError::ShapeMismatch {
                    what,
                    expected,
                    found,
                });
            }
        }
        return Ok(());
    }

    pub fn decode(&self, stack: &ImageStack) -> Result<DecodedSpots, DecodeError> {
        self.check_shape(stack)?;

        let calls = classify::classify_pixels(stack, &self.codewords, &self.params);
        debug!(assigned = calls.num_assigned(), "classified pixels");

        let (labels, nlabels) = labeling::label_volume(calls.target.view(), self.params.connectivity);
        debug!(regions = nlabels, "labeled connected regions");

        let regions = regions::measure_regions(
            labels.view(),
            nlabels,
            &calls,
            stack,
            self.codebook,
            &self.params.region_filter(),
        );

        let spots = DecodedSpots {
            labels,
            regions,
            calls,
            target_names: self.codebook.target_names().to_vec(),
            blank: (0..self.codebook.ntargets())
                .map(|i| self.codebook.is_blank(i))
                .collect(),
            nrounds: stack.nrounds(),
            nchannels: stack.nchannels(),
        };

        info!(
            regions = spots.regions.len(),
            passing = spots.passing().count(),
            "decoded pixel spots"
        );

        return Ok(spots);
    }
}

// Output of one decode pass. Labels and per-pixel calls are fixed once
// decoded; refiltering only changes region flags.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedSpots {
    labels: Array3<u32>,
    regions: Vec<RegionRecord>,
    calls: PixelCalls,
    target_names: Vec<String>,
    blank: Vec<bool>,
    nrounds: usize,
    nchannels: usize,
}

impl DecodedSpots {
    pub fn labels(&self) -> ArrayView3<u32> {
        self.labels.view()
    }

    pub fn regions(&self) -> &[RegionRecord] {
        &self.regions
    }

    pub fn pixel_calls(&self) -> &PixelCalls {
        &self.calls
    }

    pub fn target_names(&self) -> &[String] {
        &self.target_names
    }

    pub fn nrounds(&self) -> usize {
        self.nrounds
    }

    pub fn nchannels(&self) -> usize {
        self.nchannels
    }

    pub fn region(&self, label: u32) -> Option<&RegionRecord> {
        if label == 0 {
            return None;
        }
        self.regions.get((label - 1) as usize)
    }

    // Pixels of the volume carrying `label`.
    pub fn region_mask(&self, label: u32) -> Array3<bool> {
        self.labels.mapv(|l| label != 0 && l == label)
    }

    pub fn refilter(&mut self, filter: &RegionFilter) -> Result<(), DecodeError> {
        filter.validate()?;
        for region in &mut self.regions {
            region.apply_filter(filter);
        }
        return Ok(());
    }

    pub fn passing(&self) -> impl Iterator<Item = &RegionRecord> + '_ {
        self.regions.iter().filter(|r| r.passes_thresholds())
    }

    // Number of regions decoded to each target, in codebook order, as
    // (target, is_blank, count).
    pub fn target_counts(&self, passing_only: bool) -> Vec<(String, bool, usize)> {
        let mut counts = vec![0; self.target_names.len()];
        for region in &self.regions {
            if !passing_only || region.passes_thresholds() {
                counts[region.target] += 1;
            }
        }

        return self
            .target_names
            .iter()
            .zip(&self.blank)
            .zip(counts)
            .map(|((name, &blank), count)| (name.clone(), blank, count))
            .collect();
    }
}
