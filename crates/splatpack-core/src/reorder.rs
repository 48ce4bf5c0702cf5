//! Global bounds and Morton-order spatial reordering
//!
//! Positions are quantized to 21 bits per axis inside the bounding box and
//! interleaved into a 63-bit Morton code. Sorting by `(code, index)` groups
//! nearby splats so fixed-size chunks end up with small bounding volumes.

use crate::GaussianCloud;
use glam::{UVec3, Vec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Largest quantized coordinate per axis (21 bits)
pub const MORTON_MAX: u32 = (1 << 21) - 1;

const GRAIN: usize = 4096;

/// Axis-aligned bounding box of splat centers
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}

/// Compute the bounding box of `positions` in one parallel pass.
///
/// An empty slice yields an inverted box (min = +inf, max = -inf).
pub fn calc_bounds(positions: &[Vec3]) -> Bounds {
    let empty = || (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY));
    let (min, max) = positions
        .par_iter()
        .with_min_len(GRAIN)
        .fold(empty, |(lo, hi), &p| (lo.min(p), hi.max(p)))
        .reduce(empty, |(lo_a, hi_a), (lo_b, hi_b)| (lo_a.min(lo_b), hi_a.max(hi_b)));
    Bounds { min, max }
}

/// Spread the low 21 bits of `x` so there are two zero bits between each
#[inline]
pub fn morton_part1by2(x: u64) -> u64 {
    let mut x = x & 0x1fffff;
    x = (x | (x << 32)) & 0x001f_0000_0000_ffff;
    x = (x | (x << 16)) & 0x001f_0000_ff00_00ff;
    x = (x | (x << 8)) & 0x100f_00f0_0f00_f00f;
    x = (x | (x << 4)) & 0x10c3_0c30_c30c_30c3;
    x = (x | (x << 2)) & 0x1249_2492_4924_9249;
    x
}

/// Interleave three 21-bit coordinates, x in the lowest bit
#[inline]
pub fn morton_encode3(v: UVec3) -> u64 {
    (morton_part1by2(v.z as u64) << 2) | (morton_part1by2(v.y as u64) << 1) | morton_part1by2(v.x as u64)
}

/// Map a position into the box and truncate to 21-bit integer coordinates.
/// Flat axes (zero extent) quantize to 0.
#[inline]
pub fn quantize_position(p: Vec3, bounds: &Bounds) -> UVec3 {
    let extent = bounds.extent();
    let inv = Vec3::select(extent.cmpgt(Vec3::ZERO), extent.recip(), Vec3::ZERO);
    let scaled = ((p - bounds.min) * inv * MORTON_MAX as f32).clamp(Vec3::ZERO, Vec3::splat(MORTON_MAX as f32));
    scaled.as_uvec3()
}

/// `(morton code, original index)` for every position, in input order
pub fn morton_codes(positions: &[Vec3], bounds: &Bounds) -> Vec<(u64, u32)> {
    positions
        .par_iter()
        .with_min_len(GRAIN)
        .enumerate()
        .map(|(i, &p)| (morton_encode3(quantize_position(p, bounds)), i as u32))
        .collect()
}

/// Original indices sorted by `(code, index)`.
///
/// Keys are unique, so the unstable parallel sort is still deterministic and
/// equal codes keep their input order.
pub fn morton_order(positions: &[Vec3], bounds: &Bounds) -> Vec<u32> {
    let mut codes = morton_codes(positions, bounds);
    codes.par_sort_unstable();
    codes.into_iter().map(|(_, index)| index).collect()
}

/// Gather `values` in `order` and write the result back
fn permute<T: Copy + Send + Sync>(values: &mut Vec<T>, order: &[u32]) {
    let sorted: Vec<T> = order
        .par_iter()
        .with_min_len(GRAIN)
        .map(|&i| values[i as usize])
        .collect();
    *values = sorted;
}

/// Sort every attribute array of `cloud` into Morton order.
///
/// Returns the permutation: element `j` of the result is the original index
/// of the splat now stored at `j`.
pub fn reorder_morton(cloud: &mut GaussianCloud, bounds: &Bounds) -> Vec<u32> {
    let order = morton_order(&cloud.positions, bounds);

    permute(&mut cloud.positions, &order);
    permute(&mut cloud.scales, &order);
    permute(&mut cloud.rotations, &order);
    permute(&mut cloud.opacities, &order);
    permute(&mut cloud.colors, &order);
    permute(&mut cloud.sh_rest, &order);

    order
}
