//! Mini-batch k-means clustering
//!
//! Implements "Web-Scale K-Means Clustering" (Sculley 2010) with k-means++
//! seeding. Input points and output centroids are flat `f32` slices with
//! `dim` floats per row. All randomness comes from the caller's RNG so a
//! fixed seed gives identical centroids and labels.
//!
//! Assignment of points to centroids runs in parallel (centroids are read
//! only). The centroid update is a running mean and is applied strictly in
//! batch order on one thread.

use crate::distance::{nearest, DistanceKernel};
use crate::{Outcome, Result, SplatsError};
use log::debug;
use rand::Rng;
use rayon::prelude::*;
use std::collections::HashSet;
use std::time::Instant;

/// Number of independent k-means++ attempts; the best one seeds the run
pub const INIT_ATTEMPTS: usize = 3;

/// k-means++ candidate pool (and validation batch) size, per cluster
const INIT_POOL_PER_CLUSTER: usize = 10;

/// Points per partial sum in the k-means++ weighted pick
const SUM_BATCH: usize = 1024;

/// Points labeled between two progress polls in the final pass
const ASSIGN_BATCH: usize = 256 * 1024;

/// Minimum points per rayon task when assigning clusters
const ASSIGN_GRAIN: usize = 64;

/// Clustering parameters
#[derive(Clone, Debug, PartialEq)]
pub struct KMeansParams {
    /// Floats per point
    pub dim: usize,
    /// Points per mini-batch (clamped to the dataset size)
    pub batch_size: usize,
    /// How many times the dataset is sampled in total, in dataset lengths
    pub passes_over_data: f32,
    pub kernel: DistanceKernel,
}

/// Cluster `data` into `means.len() / dim` centroids.
///
/// On completion `means` holds the centroids and `labels[i]` the centroid
/// index closest to point `i`. `progress` receives a fraction in [0, 1] at
/// every attempt and batch boundary; returning `false` cancels the run, in
/// which case the contents of `means` and `labels` are unspecified.
pub fn calculate<R: Rng>(
    params: &KMeansParams,
    data: &[f32],
    means: &mut [f32],
    labels: &mut [u32],
    rng: &mut R,
    progress: &mut dyn FnMut(f32) -> bool,
) -> Result<Outcome<()>> {
    let dim = params.dim;
    let kernel = params.kernel;
    validate(params, data, means, labels)?;

    let start = Instant::now();
    let data_size = data.len() / dim;
    let k = means.len() / dim;
    let batch_size = params.batch_size.min(data_size);

    // initial cluster placement
    if !initialize_centroids(dim, kernel, data, INIT_POOL_PER_CLUSTER * k, rng, INIT_ATTEMPTS, means, progress) {
        return Ok(Outcome::Cancelled);
    }
    debug!("kmeans: seeded {} centroids in {:.2?}", k, start.elapsed());

    let mut counts = vec![0u32; k];
    let mut batch_points = vec![0.0f32; batch_size * dim];
    let mut batch_labels = vec![0u32; batch_size];

    let calc_limit = data_size as f64 * params.passes_over_data as f64;
    let mut calc_done = 0.0f64;
    while calc_done < calc_limit {
        if !progress(0.3 + (calc_done / calc_limit) as f32 * 0.4) {
            return Ok(Outcome::Cancelled);
        }

        make_random_batch(dim, data, rng, &mut batch_points);
        assign_clusters(dim, kernel, &batch_points, means, &mut batch_labels, None);
        update_centroids(dim, &batch_points, &batch_labels, means, &mut counts);

        calc_done += batch_size as f64;
    }
    debug!("kmeans: mini-batch refinement done at {:.2?}", start.elapsed());

    // final labels for every input point
    for first in (0..data_size).step_by(ASSIGN_BATCH) {
        if !progress(0.7 + first as f32 / data_size as f32 * 0.3) {
            return Ok(Outcome::Cancelled);
        }
        let last = (first + ASSIGN_BATCH).min(data_size);
        assign_clusters(
            dim,
            kernel,
            &data[first * dim..last * dim],
            means,
            &mut labels[first..last],
            None,
        );
    }

    Ok(Outcome::Completed(()))
}

fn validate(params: &KMeansParams, data: &[f32], means: &[f32], labels: &[u32]) -> Result<()> {
    let dim = params.dim;
    let fail = |msg: String| Err(SplatsError::KMeans(msg));

    if dim < 1 {
        return fail(format!("dimensionality has to be >= 1, was {}", dim));
    }
    if params.batch_size < 1 {
        return fail(format!("batch size has to be >= 1, was {}", params.batch_size));
    }
    if !(params.passes_over_data > 0.0) {
        return fail(format!(
            "passes over data must be positive, was {}",
            params.passes_over_data
        ));
    }
    if data.len() % dim != 0 {
        return fail(format!(
            "input length must be multiple of dim={}, was {}",
            dim,
            data.len()
        ));
    }
    if means.len() % dim != 0 {
        return fail(format!(
            "output means length must be multiple of dim={}, was {}",
            dim,
            means.len()
        ));
    }
    let data_size = data.len() / dim;
    let k = means.len() / dim;
    if k < 1 {
        return fail(format!("cluster count must be at least 1, was {}", k));
    }
    if data_size < k {
        return fail(format!(
            "input point count ({}) must be at least the cluster count ({})",
            data_size, k
        ));
    }
    if labels.len() != data_size {
        return fail(format!(
            "output labels length must be {}, was {}",
            data_size,
            labels.len()
        ));
    }
    Ok(())
}

#[inline]
fn row(data: &[f32], dim: usize, index: usize) -> &[f32] {
    &data[index * dim..(index + 1) * dim]
}

/// Fill `out` with distinct random rows of `data` (rejection sampling)
fn make_random_batch<R: Rng>(dim: usize, data: &[f32], rng: &mut R, out: &mut [f32]) {
    let data_size = data.len() / dim;
    let batch_size = out.len() / dim;
    let mut picked = HashSet::with_capacity(batch_size);
    let mut filled = 0;
    while filled < batch_size {
        let index = rng.gen_range(0..data_size);
        if picked.insert(index) {
            out[filled * dim..(filled + 1) * dim].copy_from_slice(row(data, dim, index));
            filled += 1;
        }
    }
}

/// For each point find the closest mean; optionally record the squared distance
fn assign_clusters(
    dim: usize,
    kernel: DistanceKernel,
    points: &[f32],
    means: &[f32],
    labels: &mut [u32],
    distances: Option<&mut [f32]>,
) {
    match distances {
        Some(distances) => labels
            .par_iter_mut()
            .zip(distances.par_iter_mut())
            .zip(points.par_chunks_exact(dim))
            .with_min_len(ASSIGN_GRAIN)
            .for_each(|((label, dist), point)| {
                let (index, d) = nearest(point, means, dim, kernel);
                *label = index as u32;
                *dist = d;
            }),
        None => labels
            .par_iter_mut()
            .zip(points.par_chunks_exact(dim))
            .with_min_len(ASSIGN_GRAIN)
            .for_each(|(label, point)| {
                *label = nearest(point, means, dim, kernel).0 as u32;
            }),
    }
}

/// Running-mean update. Order dependent, must stay sequential.
fn update_centroids(
    dim: usize,
    batch_points: &[f32],
    batch_labels: &[u32],
    means: &mut [f32],
    counts: &mut [u32],
) {
    for (point, &label) in batch_points.chunks_exact(dim).zip(batch_labels) {
        let cluster = label as usize;
        counts[cluster] += 1;
        let alpha = 1.0 / counts[cluster] as f32;
        let mean = &mut means[cluster * dim..(cluster + 1) * dim];
        for (m, &p) in mean.iter_mut().zip(point) {
            *m += (p - *m) * alpha;
        }
    }
}

/// Run several k-means++ attempts on a random candidate pool and keep the
/// one with the lowest total distance over a separate validation batch.
/// Returns `false` if cancelled.
#[allow(clippy::too_many_arguments)]
fn initialize_centroids<R: Rng>(
    dim: usize,
    kernel: DistanceKernel,
    data: &[f32],
    init_batch_size: usize,
    rng: &mut R,
    attempts: usize,
    out_means: &mut [f32],
    progress: &mut dyn FnMut(f32) -> bool,
) -> bool {
    let k = out_means.len() / dim;
    let data_size = data.len() / dim;
    let init_batch_size = init_batch_size.min(data_size);

    let mut centroid_batch = vec![0.0f32; init_batch_size * dim];
    let mut validation_batch = vec![0.0f32; init_batch_size * dim];
    make_random_batch(dim, data, rng, &mut centroid_batch);
    make_random_batch(dim, data, rng, &mut validation_batch);

    let mut tmp_labels = vec![0u32; init_batch_size];
    let mut tmp_distances = vec![0.0f32; init_batch_size];
    let mut cur_means = vec![0.0f32; k * dim];

    let mut min_dist_sum = f64::MAX;
    for attempt in 0..attempts {
        if !progress(attempt as f32 / attempts as f32 * 0.3) {
            return false;
        }

        kmeans_plus_plus(dim, kernel, k, &centroid_batch, &mut cur_means, &mut tmp_distances, rng);
        assign_clusters(
            dim,
            kernel,
            &validation_batch,
            &cur_means,
            &mut tmp_labels,
            Some(&mut tmp_distances),
        );

        let dist_sum: f64 = tmp_distances.iter().map(|&d| d as f64).sum();
        if dist_sum < min_dist_sum {
            min_dist_sum = dist_sum;
            out_means.copy_from_slice(&cur_means);
        }
    }
    true
}

/// Classic k-means++ over `data`, writing `k` rows into `means`.
/// `min_dist_sq` is scratch space, one float per point of `data`.
fn kmeans_plus_plus<R: Rng>(
    dim: usize,
    kernel: DistanceKernel,
    k: usize,
    data: &[f32],
    means: &mut [f32],
    min_dist_sq: &mut [f32],
    rng: &mut R,
) {
    let data_size = data.len() / dim;
    let mut taken = vec![false; data_size];

    // first mean uniformly at random
    let first = rng.gen_range(0..data_size);
    taken[first] = true;
    means[..dim].copy_from_slice(row(data, dim, first));

    {
        let mean = &means[..dim];
        min_dist_sq
            .par_iter_mut()
            .zip(data.par_chunks_exact(dim))
            .with_min_len(SUM_BATCH)
            .for_each(|(d, point)| *d = kernel.distance_sq(point, mean));
    }

    let mut partial_sums = Vec::with_capacity(data_size.div_ceil(SUM_BATCH));
    for result_count in 1..k {
        // prefix sums over batches of not yet taken points
        min_dist_sq
            .par_chunks(SUM_BATCH)
            .zip(taken.par_chunks(SUM_BATCH))
            .map(|(dists, taken)| {
                dists
                    .iter()
                    .zip(taken)
                    .filter(|(_, &t)| !t)
                    .map(|(&d, _)| d)
                    .sum::<f32>()
            })
            .collect_into_vec(&mut partial_sums);
        let mut dist_sq_total = 0.0f32;
        for sum in partial_sums.iter_mut() {
            dist_sq_total += *sum;
            *sum = dist_sq_total;
        }

        // points far from every chosen mean are more likely to be picked
        let rval = rng.gen::<f32>() * dist_sq_total;
        let index = pick_point_index(&partial_sums, &taken, min_dist_sq, rval);

        taken[index] = true;
        means[result_count * dim..(result_count + 1) * dim].copy_from_slice(row(data, dim, index));

        if result_count + 1 < k {
            let mean = &means[result_count * dim..(result_count + 1) * dim];
            min_dist_sq
                .par_iter_mut()
                .zip(taken.par_iter())
                .zip(data.par_chunks_exact(dim))
                .with_min_len(256)
                .for_each(|((d, &t), point)| {
                    if !t {
                        *d = d.min(kernel.distance_sq(point, mean));
                    }
                });
        }
    }
}

/// Locate the untaken point where the running distance sum reaches `rval`.
/// Binary search over batch prefix sums, then a scan inside the batch.
fn pick_point_index(partial_sums: &[f32], taken: &[bool], min_dist_sq: &[f32], rval: f32) -> usize {
    let batch = partial_sums.partition_point(|&s| s < rval);
    let mut acc = if batch > 0 { partial_sums[batch - 1] } else { 0.0 };

    for i in (batch * SUM_BATCH)..taken.len() {
        if taken[i] {
            continue;
        }
        acc += min_dist_sq[i];
        if acc >= rval {
            return i;
        }
    }

    // rounding can leave rval just past the total: use the last available point
    taken.iter().rposition(|&t| !t).unwrap_or(0)
}
