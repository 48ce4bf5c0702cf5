//! Spherical harmonics storage and codebook compression
//!
//! Each splat carries 15 RGB SH vectors (bands 1 to 3). They are stored
//! either as one fixed-stride row per splat, or, for the clustered formats,
//! as a codebook of half-precision rows plus a `u16` index per splat that
//! lives in the "other" buffer.

use crate::encode::{
    decode_norm11_to_float3, decode_norm565_to_float3, encode_float3_to_norm11,
    encode_float3_to_norm565,
};
use crate::distance::DistanceKernel;
use crate::kmeans::{self, KMeansParams};
use crate::{Outcome, Result};
use glam::Vec3;
use half::f16;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// SH vectors per splat
pub const SH_VECTORS: usize = 15;

/// Floats per splat clustered by k-means
pub const SH_DIM: usize = SH_VECTORS * 3;

/// Mini-batch size used when clustering SH
pub const CLUSTER_BATCH_SIZE: usize = 2048;

/// Storage format of the SH table
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SHFormat {
    Float32,
    Float16,
    Norm11,
    #[default]
    Norm6,
    Cluster64k,
    Cluster32k,
    Cluster16k,
    Cluster8k,
    Cluster4k,
}

impl SHFormat {
    pub const fn id(self) -> u32 {
        self as u32
    }

    pub const fn is_clustered(self) -> bool {
        self.cluster_count().is_some()
    }

    /// Codebook size of a clustered format
    pub const fn cluster_count(self) -> Option<usize> {
        match self {
            SHFormat::Cluster64k => Some(64 * 1024),
            SHFormat::Cluster32k => Some(32 * 1024),
            SHFormat::Cluster16k => Some(16 * 1024),
            SHFormat::Cluster8k => Some(8 * 1024),
            SHFormat::Cluster4k => Some(4 * 1024),
            _ => None,
        }
    }

    /// Dataset passes for the k-means refinement. Smaller codebooks get more.
    pub const fn passes_over_data(self) -> f32 {
        match self {
            SHFormat::Cluster64k => 0.3,
            SHFormat::Cluster32k => 0.4,
            SHFormat::Cluster16k => 0.5,
            SHFormat::Cluster8k => 0.8,
            SHFormat::Cluster4k => 1.2,
            _ => 0.0,
        }
    }

    /// Format of one stored row; codebook rows are half precision
    pub const fn row_format(self) -> SHFormat {
        if self.is_clustered() {
            SHFormat::Float16
        } else {
            self
        }
    }

    /// Bytes per stored row
    pub const fn row_size(self) -> usize {
        match self.row_format() {
            SHFormat::Float32 => 16 * 12,
            SHFormat::Float16 => 16 * 6,
            SHFormat::Norm11 => 15 * 4,
            _ => 16 * 2,
        }
    }

    /// Size of the SH buffer for `splat_count` splats
    pub fn buffer_size(self, splat_count: usize) -> usize {
        let rows = self.cluster_count().unwrap_or(splat_count);
        rows * self.row_size()
    }
}

/// Encode one row of SH vectors into `out` (`format.row_size()` bytes).
/// Padding slots are zeroed.
pub fn write_sh_row(sh: &[Vec3; SH_VECTORS], out: &mut [u8], format: SHFormat) {
    debug_assert_eq!(out.len(), format.row_size());
    out.fill(0);
    match format.row_format() {
        SHFormat::Float32 => {
            for (v, bytes) in sh.iter().zip(out.chunks_exact_mut(12)) {
                for (c, dst) in v.to_array().iter().zip(bytes.chunks_exact_mut(4)) {
                    dst.copy_from_slice(&c.to_le_bytes());
                }
            }
        }
        SHFormat::Float16 => {
            for (v, bytes) in sh.iter().zip(out.chunks_exact_mut(6)) {
                for (c, dst) in v.to_array().iter().zip(bytes.chunks_exact_mut(2)) {
                    dst.copy_from_slice(&f16::from_f32(*c).to_le_bytes());
                }
            }
        }
        SHFormat::Norm11 => {
            for (v, bytes) in sh.iter().zip(out.chunks_exact_mut(4)) {
                bytes.copy_from_slice(&encode_float3_to_norm11(*v).to_le_bytes());
            }
        }
        _ => {
            for (v, bytes) in sh.iter().zip(out.chunks_exact_mut(2)) {
                bytes.copy_from_slice(&encode_float3_to_norm565(*v).to_le_bytes());
            }
        }
    }
}

/// Decode a row written by [`write_sh_row`]
pub fn read_sh_row(bytes: &[u8], format: SHFormat) -> [Vec3; SH_VECTORS] {
    let f32_at = |o: usize| f32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
    let f16_at = |o: usize| f16::from_le_bytes([bytes[o], bytes[o + 1]]).to_f32();
    std::array::from_fn(|i| match format.row_format() {
        SHFormat::Float32 => Vec3::new(f32_at(i * 12), f32_at(i * 12 + 4), f32_at(i * 12 + 8)),
        SHFormat::Float16 => Vec3::new(f16_at(i * 6), f16_at(i * 6 + 2), f16_at(i * 6 + 4)),
        SHFormat::Norm11 => decode_norm11_to_float3(u32::from_le_bytes([
            bytes[i * 4],
            bytes[i * 4 + 1],
            bytes[i * 4 + 2],
            bytes[i * 4 + 3],
        ])),
        _ => decode_norm565_to_float3(u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]])),
    })
}

/// Encode one row per entry of `rows`
pub fn encode_sh_rows(rows: &[[Vec3; SH_VECTORS]], format: SHFormat) -> Vec<u8> {
    let row_size = format.row_size();
    let mut out = vec![0u8; rows.len() * row_size];
    out.par_chunks_mut(row_size)
        .zip(rows.par_iter())
        .with_min_len(1024)
        .for_each(|(bytes, sh)| write_sh_row(sh, bytes, format));
    out
}

/// Result of SH clustering
#[derive(Clone, Debug, PartialEq)]
pub struct ShCodebook {
    /// Representative SH sets
    pub centroids: Vec<[Vec3; SH_VECTORS]>,
    /// Codebook index per splat
    pub labels: Vec<u16>,
}

impl ShCodebook {
    /// Codebook rows in half precision
    pub fn encode(&self) -> Vec<u8> {
        encode_sh_rows(&self.centroids, SHFormat::Float16)
    }
}

/// Cluster per-splat SH sets into a codebook of `k` entries.
///
/// `k` must not exceed 65536 (labels are `u16`) nor the number of splats.
/// All randomness derives from `seed`.
pub fn cluster_shs(
    sh_rest: &[[Vec3; SH_VECTORS]],
    k: usize,
    passes_over_data: f32,
    seed: u64,
    progress: &mut dyn FnMut(f32) -> bool,
) -> Result<Outcome<ShCodebook>> {
    debug_assert!(k <= u16::MAX as usize + 1);
    let start = Instant::now();

    let data: &[f32] = bytemuck::cast_slice(sh_rest);
    let mut means = vec![0.0f32; k * SH_DIM];
    let mut labels = vec![0u32; sh_rest.len()];
    let mut rng = StdRng::seed_from_u64(seed);

    let params = KMeansParams {
        dim: SH_DIM,
        batch_size: CLUSTER_BATCH_SIZE,
        passes_over_data,
        kernel: DistanceKernel::default(),
    };
    if kmeans::calculate(&params, data, &mut means, &mut labels, &mut rng, progress)?.is_cancelled() {
        return Ok(Outcome::Cancelled);
    }

    info!(
        "SH clustering: {} splats into {} clusters, {} passes, {} batch, {:.1}s",
        sh_rest.len(),
        k,
        passes_over_data,
        CLUSTER_BATCH_SIZE,
        start.elapsed().as_secs_f32()
    );

    let centroids = bytemuck::cast_slice::<f32, [Vec3; SH_VECTORS]>(&means).to_vec();
    let labels = labels.into_iter().map(|l| l as u16).collect();
    Ok(Outcome::Completed(ShCodebook { centroids, labels }))
}
