use clap::ValueEnum;
use num_traits::Float;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum DistanceMetric {
    Euclidean,
    Manhattan,
    Chebyshev,
}

impl DistanceMetric {
    pub fn distance<T: Float>(&self, a: &[T], b: &[T]) -> T {
        debug_assert_eq!(a.len(), b.len());
        let diffs = a.iter().zip(b).map(|(&u, &v)| (u - v).abs());
        match self {
            DistanceMetric::Euclidean => diffs.fold(T::zero(), |accum, d| accum + d * d).sqrt(),
            DistanceMetric::Manhattan => diffs.fold(T::zero(), |accum, d| accum + d),
            DistanceMetric::Chebyshev => diffs.fold(T::zero(), |accum, d| accum.max(d)),
        }
    }
}

// Norm used for trace magnitudes (and for unit normalization).
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum NormOrder {
    L1,
    L2,
    Inf,
}

impl NormOrder {
    pub fn norm<T: Float>(&self, a: &[T]) -> T {
        let abs = a.iter().map(|&u| u.abs());
        match self {
            NormOrder::L1 => abs.fold(T::zero(), |accum, u| accum + u),
            NormOrder::L2 => abs.fold(T::zero(), |accum, u| accum + u * u).sqrt(),
            NormOrder::Inf => abs.fold(T::zero(), |accum, u| accum.max(u)),
        }
    }

    // Scale `a` to unit norm. Zero vectors are left alone.
    pub fn normalize<T: Float>(&self, a: &mut [T]) -> T {
        let n = self.norm(a);
        if n > T::zero() {
            for u in a.iter_mut() {
                *u = *u / n;
            }
        }
        return n;
    }
}

// Index of and distance to the closest codeword. Ties go to the lowest
// index, so results only depend on codebook order.
pub fn nearest_codeword(metric: DistanceMetric, trace: &[f32], codewords: &[Vec<f32>]) -> (usize, f32) {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (i, codeword) in codewords.iter().enumerate() {
        let d = metric.distance(trace, codeword);
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    return (best, best_distance);
}
