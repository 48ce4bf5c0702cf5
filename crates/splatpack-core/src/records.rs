//! Canonical splat record body
//!
//! The file readers (PLY, SPZ) hand over a headerless body of fixed-size
//! little-endian records, 62 floats = 248 bytes each, in stored domain:
//! - bytes 0-11: x, y, z (position)
//! - bytes 12-23: nx, ny, nz (normals, unused)
//! - bytes 24-35: f_dc_0..2 (SH band 0)
//! - bytes 36-215: f_rest_0..44 (SH bands 1-3, planar: 15 R, then 15 G, then 15 B)
//! - bytes 216-219: opacity (logit)
//! - bytes 220-231: scale_0..2 (log scale)
//! - bytes 232-247: rot_0..3 (quaternion, w first)

use crate::{GaussianCloud, Result, Splat, SplatsError};
use glam::{Vec3, Vec4};
use rayon::prelude::*;

/// Bytes per record
pub const RECORD_STRIDE: usize = 248;

const POSITION: usize = 0;
const DC0: usize = 24;
const SH_REST: usize = 36;
const OPACITY: usize = 216;
const SCALE: usize = 220;
const ROTATION: usize = 232;

/// Decode one record
pub fn decode_record(record: &[u8]) -> Splat {
    let read_f32 = |o: usize| -> f32 {
        f32::from_le_bytes([record[o], record[o + 1], record[o + 2], record[o + 3]])
    };
    let read_vec3 = |o: usize| Vec3::new(read_f32(o), read_f32(o + 4), read_f32(o + 8));

    // planar f_rest to 15 RGB vectors
    let sh_rest = std::array::from_fn(|j| {
        Vec3::new(
            read_f32(SH_REST + j * 4),
            read_f32(SH_REST + (15 + j) * 4),
            read_f32(SH_REST + (30 + j) * 4),
        )
    });

    Splat {
        position: read_vec3(POSITION),
        scale: read_vec3(SCALE),
        rotation: Vec4::new(
            read_f32(ROTATION),
            read_f32(ROTATION + 4),
            read_f32(ROTATION + 8),
            read_f32(ROTATION + 12),
        ),
        opacity: read_f32(OPACITY),
        color: read_vec3(DC0),
        sh_rest,
    }
}

/// Encode one record into `out` (`RECORD_STRIDE` bytes). Normals are zero.
pub fn encode_record(splat: &Splat, out: &mut [u8]) {
    debug_assert_eq!(out.len(), RECORD_STRIDE);
    let mut write_f32 = |o: usize, v: f32| out[o..o + 4].copy_from_slice(&v.to_le_bytes());

    for (i, v) in splat.position.to_array().into_iter().enumerate() {
        write_f32(POSITION + i * 4, v);
    }
    for o in (12..24).step_by(4) {
        write_f32(o, 0.0);
    }
    for (i, v) in splat.color.to_array().into_iter().enumerate() {
        write_f32(DC0 + i * 4, v);
    }
    for (j, v) in splat.sh_rest.iter().enumerate() {
        write_f32(SH_REST + j * 4, v.x);
        write_f32(SH_REST + (15 + j) * 4, v.y);
        write_f32(SH_REST + (30 + j) * 4, v.z);
    }
    write_f32(OPACITY, splat.opacity);
    for (i, v) in splat.scale.to_array().into_iter().enumerate() {
        write_f32(SCALE + i * 4, v);
    }
    for (i, v) in splat.rotation.to_array().into_iter().enumerate() {
        write_f32(ROTATION + i * 4, v);
    }
}

/// Decode `count` records of `stride` bytes from `body`.
///
/// Fails if the stride is not the canonical one or the body length does not
/// match `count * stride` exactly.
pub fn decode_records(body: &[u8], count: usize, stride: usize) -> Result<GaussianCloud> {
    if stride != RECORD_STRIDE {
        return Err(SplatsError::RecordStride {
            expected: RECORD_STRIDE,
            found: stride,
        });
    }
    // a count too large to address reports a saturated byte size
    if count.checked_mul(stride) != Some(body.len()) {
        return Err(SplatsError::RecordCount {
            declared: count,
            expected_bytes: count.saturating_mul(stride),
            found_bytes: body.len(),
        });
    }

    let splats: Vec<Splat> = body
        .par_chunks_exact(RECORD_STRIDE)
        .with_min_len(1024)
        .map(decode_record)
        .collect();
    Ok(splats.into_iter().collect())
}

/// Number of whole records in a body of `len` bytes, if it divides evenly
pub fn infer_record_count(len: usize) -> Option<usize> {
    (len % RECORD_STRIDE == 0).then_some(len / RECORD_STRIDE)
}

/// Encode every splat of `cloud` as a canonical record body
pub fn encode_records(cloud: &GaussianCloud) -> Vec<u8> {
    let mut out = vec![0u8; cloud.count * RECORD_STRIDE];
    out.par_chunks_exact_mut(RECORD_STRIDE)
        .enumerate()
        .with_min_len(1024)
        .for_each(|(i, record)| encode_record(&cloud.splat(i), record));
    out
}
