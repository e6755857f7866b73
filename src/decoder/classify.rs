// Per-pixel nearest codeword assignment.

use ndarray::{Array3, Zip};
use std::cell::RefCell;
use thread_local::ThreadLocal;

use super::metric::nearest_codeword;
use super::DecoderParams;
use crate::stack::ImageStack;

// Target value of pixels that were not assigned to any codeword.
pub const UNASSIGNED: u32 = u32::MAX;

// Decode outcome for every pixel of the volume, indexed (z, y, x).
//
// `magnitude` is the norm of the raw trace and is set for every pixel.
// `distance` is the distance to the nearest codeword, or infinity for pixels
// that were skipped for being below the magnitude threshold. Pixels rejected
// by the distance threshold keep their distance but have target UNASSIGNED.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelCalls {
    pub target: Array3<u32>,
    pub distance: Array3<f32>,
    pub magnitude: Array3<f32>,
}

impl PixelCalls {
    pub fn is_assigned(&self, z: usize, y: usize, x: usize) -> bool {
        self.target[[z, y, x]] != UNASSIGNED
    }

    pub fn num_assigned(&self) -> usize {
        self.target.iter().filter(|&&t| t != UNASSIGNED).count()
    }
}

// Every pixel is independent, so this is a parallel map over the volume
// where each worker writes only the output slots of the pixel it visits.
pub(super) fn classify_pixels(
    stack: &ImageStack,
    codewords: &[Vec<f32>],
    params: &DecoderParams,
) -> PixelCalls {
    let shape = stack.spatial_shape();
    let mut target = Array3::<u32>::from_elem(shape, UNASSIGNED);
    let mut distance = Array3::<f32>::from_elem(shape, f32::INFINITY);
    let mut magnitude = Array3::<f32>::zeros(shape);

    let trace_len = stack.trace_len();
    let scratch: ThreadLocal<RefCell<Vec<f32>>> = ThreadLocal::new();

    Zip::indexed(&mut target)
        .and(&mut distance)
        .and(&mut magnitude)
        .par_for_each(|(z, y, x), t, d, m| {
            let mut buffer = scratch
                .get_or(|| RefCell::new(vec![0.0; trace_len]))
                .borrow_mut();
            let trace = buffer.as_mut_slice();
            stack.trace_into(z, y, x, trace);

            *m = params.norm_order.norm(trace);
            if *m < params.magnitude_threshold {
                return;
            }

            if params.normalize {
                params.norm_order.normalize(trace);
            }

            let (nearest, nearest_distance) = nearest_codeword(params.metric, trace, codewords);
            *d = nearest_distance;
            if nearest_distance <= params.distance_threshold {
                *t = nearest as u32;
            }
        });

    return PixelCalls {
        target,
        distance,
        magnitude,
    };
}
