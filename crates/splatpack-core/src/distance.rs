//! Squared Euclidean distance kernels used by the clusterer
//!
//! The wide kernel accumulates 8 independent lanes and sums them at the end,
//! which the compiler turns into packed SIMD on any target. The scalar kernel
//! is the reference; the two differ only by float reassociation.

const LANES: usize = 8;

/// Squared L2 distance between two equal-length slices
#[inline]
pub fn distance_sq(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = [0.0f32; LANES];

    let chunks_a = a.chunks_exact(LANES);
    let chunks_b = b.chunks_exact(LANES);
    let tail_a = chunks_a.remainder();
    let tail_b = chunks_b.remainder();

    for (ca, cb) in chunks_a.zip(chunks_b) {
        for lane in 0..LANES {
            let d = ca[lane] - cb[lane];
            acc[lane] += d * d;
        }
    }

    // horizontal sum, then tail
    let mut sum = (acc[0] + acc[4]) + (acc[1] + acc[5]) + (acc[2] + acc[6]) + (acc[3] + acc[7]);
    for (x, y) in tail_a.iter().zip(tail_b) {
        let d = x - y;
        sum += d * d;
    }
    sum
}

/// Reference implementation, one element at a time
pub fn distance_sq_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Which distance implementation the clusterer runs on
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DistanceKernel {
    /// [`distance_sq`]
    #[default]
    Wide,
    /// [`distance_sq_scalar`]
    Scalar,
}

impl DistanceKernel {
    #[inline]
    pub fn distance_sq(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceKernel::Wide => distance_sq(a, b),
            DistanceKernel::Scalar => distance_sq_scalar(a, b),
        }
    }
}

/// Index and squared distance of the row in `means` (rows of `dim` floats)
/// closest to `point`. Ties keep the lowest index.
pub fn nearest(point: &[f32], means: &[f32], dim: usize, kernel: DistanceKernel) -> (usize, f32) {
    match kernel {
        DistanceKernel::Wide => nearest_with(point, means, dim, distance_sq),
        DistanceKernel::Scalar => nearest_with(point, means, dim, distance_sq_scalar),
    }
}

#[inline]
fn nearest_with(
    point: &[f32],
    means: &[f32],
    dim: usize,
    distance: impl Fn(&[f32], &[f32]) -> f32,
) -> (usize, f32) {
    let mut min_index = 0;
    let mut min_dist = f32::MAX;
    for (i, mean) in means.chunks_exact(dim).enumerate() {
        let dist = distance(point, mean);
        if dist < min_dist {
            min_index = i;
            min_dist = dist;
        }
    }
    (min_index, min_dist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_distance_simple() {
        let a = [0.0, 0.0, 0.0];
        let b = [1.0, 2.0, 2.0];
        assert_eq!(distance_sq(&a, &b), 9.0);
        assert_eq!(distance_sq_scalar(&a, &b), 9.0);
        assert_eq!(DistanceKernel::Scalar.distance_sq(&a, &b), 9.0);
        assert_eq!(DistanceKernel::default(), DistanceKernel::Wide);
    }

    #[test]
    fn test_wide_matches_scalar() {
        let mut rng = StdRng::seed_from_u64(3);
        for dim in [1, 7, 8, 9, 16, 45, 100] {
            let a: Vec<f32> = (0..dim).map(|_| rng.gen_range(-4.0..4.0)).collect();
            let b: Vec<f32> = (0..dim).map(|_| rng.gen_range(-4.0..4.0)).collect();
            let wide = distance_sq(&a, &b);
            let scalar = distance_sq_scalar(&a, &b);
            assert!(
                (wide - scalar).abs() <= 1e-4 * scalar.max(1.0),
                "dim {}: {} vs {}",
                dim,
                wide,
                scalar
            );
        }
    }

    #[test]
    fn test_nearest_picks_closest_row() {
        let means = [0.0, 0.0, 10.0, 10.0, 5.0, 5.0];
        for kernel in [DistanceKernel::Wide, DistanceKernel::Scalar] {
            let (index, dist) = nearest(&[9.0, 9.0], &means, 2, kernel);
            assert_eq!(index, 1);
            assert_eq!(dist, 2.0);
        }
    }

    #[test]
    fn test_nearest_tie_keeps_first() {
        let means = [1.0, -1.0];
        for kernel in [DistanceKernel::Wide, DistanceKernel::Scalar] {
            let (index, _) = nearest(&[0.0], &means, 1, kernel);
            assert_eq!(index, 0);
        }
    }
}
