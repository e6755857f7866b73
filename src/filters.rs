// Pre-processing filters applied to a stack before pixel decoding.

use ndarray::{ArrayView2, Axis, Zip};
use rayon::prelude::*;
use tracing::info;

use crate::errors::DecodeError;
use crate::stack::ImageStack;

// Percentile with linear interpolation between closest ranks.
fn percentile(tile: ArrayView2<f32>, p: f32) -> f32 {
    let mut values: Vec<f32> = tile.iter().cloned().collect();
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));

    let rank = (p / 100.0) * (values.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f32;
    return values[lo] + frac * (values[hi] - values[lo]);
}

// Divide every (round, channel, z) tile by its p-th percentile, clipping the
// result to [0, 1]. Tiles whose percentile is zero are left as they are.
pub fn scale_by_percentile(stack: &ImageStack, p: f32) -> Result<ImageStack, DecodeError> {
    if !(0.0..=100.0).contains(&p) {
        return Err(DecodeError::InvalidPercentile(p));
    }

    let mut data = stack.view().to_owned();
    data.axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut round| {
            for mut channel in round.outer_iter_mut() {
                for mut tile in channel.outer_iter_mut() {
                    let scale = percentile(tile.view(), p);
                    if scale > 0.0 {
                        tile.mapv_inplace(|v| (v / scale).min(1.0));
                    }
                }
            }
        });

    info!(percentile = p, "scaled stack by percentile");
    return Ok(ImageStack::from_filtered(data));
}

// For every round, zero all channels of pixels whose L2 norm across channels
// is below `thresh`. With `normalize`, surviving pixels are divided by that
// norm so their channel vector has unit length.
pub fn zero_by_channel_magnitude(
    stack: &ImageStack,
    thresh: f32,
    normalize: bool,
) -> Result<ImageStack, DecodeError> {
    if !thresh.is_finite() || thresh < 0.0 {
        return Err(DecodeError::InvalidThreshold(format!(
            "channel magnitude threshold must be non-negative, got {}",
            thresh
        )));
    }

    let mut data = stack.view().to_owned();
    let zeroed: usize = data
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .map(|mut round| {
            let mut zeroed = 0;
            // lanes along the channel axis are per-pixel channel vectors
            Zip::from(round.lanes_mut(Axis(0))).for_each(|mut pixel| {
                let magnitude = pixel.iter().map(|v| v * v).sum::<f32>().sqrt();
                if magnitude < thresh {
                    pixel.fill(0.0);
                    zeroed += 1;
                } else if normalize && magnitude > 0.0 {
                    pixel.mapv_inplace(|v| v / magnitude);
                }
            });
            zeroed
        })
        .sum();

    info!(
        threshold = thresh,
        normalize, zeroed, "zeroed low magnitude pixels by round"
    );
    return Ok(ImageStack::from_filtered(data));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array5};

    #[test]
    fn test_percentile() {
        let tile = array![[0.0, 1.0], [2.0, 3.0]];
        assert_eq!(percentile(tile.view(), 100.0), 3.0);
        assert_eq!(percentile(tile.view(), 0.0), 0.0);
        assert!((percentile(tile.view(), 50.0) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_scale_by_percentile_max() {
        let mut data = Array5::<f32>::zeros((1, 2, 1, 1, 2));
        data[[0, 0, 0, 0, 0]] = 2.0;
        data[[0, 0, 0, 0, 1]] = 4.0;
        let stack = ImageStack::new(data).unwrap();

        let scaled = scale_by_percentile(&stack, 100.0).unwrap();
        let view = scaled.view();
        assert_eq!(view[[0, 0, 0, 0, 0]], 0.5);
        assert_eq!(view[[0, 0, 0, 0, 1]], 1.0);
        // all-zero tile is untouched
        assert_eq!(view[[0, 1, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_scale_by_percentile_clips() {
        let mut data = Array5::<f32>::zeros((1, 1, 1, 1, 3));
        data[[0, 0, 0, 0, 0]] = 1.0;
        data[[0, 0, 0, 0, 1]] = 2.0;
        data[[0, 0, 0, 0, 2]] = 10.0;
        let stack = ImageStack::new(data).unwrap();

        let scaled = scale_by_percentile(&stack, 50.0).unwrap();
        assert_eq!(scaled.view()[[0, 0, 0, 0, 0]], 0.5);
        assert_eq!(scaled.view()[[0, 0, 0, 0, 2]], 1.0);
    }

    #[test]
    fn test_scale_rejects_bad_percentile() {
        let stack = ImageStack::zeros(1, 1, 1, 1, 1);
        assert_eq!(
            scale_by_percentile(&stack, 101.0),
            Err(DecodeError::InvalidPercentile(101.0))
        );
        assert_eq!(
            scale_by_percentile(&stack, -1.0),
            Err(DecodeError::InvalidPercentile(-1.0))
        );
        assert!(scale_by_percentile(&stack, f32::NAN).is_err());
    }

    #[test]
    fn test_zero_by_channel_magnitude() {
        let mut data = Array5::<f32>::zeros((2, 2, 1, 1, 2));
        // round 0, pixel 0: norm 5
        data[[0, 0, 0, 0, 0]] = 3.0;
        data[[0, 1, 0, 0, 0]] = 4.0;
        // round 0, pixel 1: norm 0.1
        data[[0, 0, 0, 0, 1]] = 0.1;
        // round 1, pixel 1: norm 2
        data[[1, 1, 0, 0, 1]] = 2.0;
        let stack = ImageStack::new(data).unwrap();

        let zeroed = zero_by_channel_magnitude(&stack, 0.5, false).unwrap();
        let view = zeroed.view();
        assert_eq!(view[[0, 0, 0, 0, 0]], 3.0);
        assert_eq!(view[[0, 1, 0, 0, 0]], 4.0);
        assert_eq!(view[[0, 0, 0, 0, 1]], 0.0);
        assert_eq!(view[[1, 1, 0, 0, 1]], 2.0);

        let normalized = zero_by_channel_magnitude(&stack, 0.5, true).unwrap();
        let view = normalized.view();
        assert!((view[[0, 0, 0, 0, 0]] - 0.6).abs() < 1e-6);
        assert!((view[[0, 1, 0, 0, 0]] - 0.8).abs() < 1e-6);
        assert_eq!(view[[1, 1, 0, 0, 1]], 1.0);
    }
}
