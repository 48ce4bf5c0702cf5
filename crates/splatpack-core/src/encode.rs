//! Fixed-width encodings for normalized vectors and rotations
//!
//! Every encoder expects values already normalized into [0, 1] (positions,
//! scales and SH after chunk quantization). An n-bit channel is stored as
//! `floor(v * (2^n - 1) + 0.5)` and decoded as `encoded / (2^n - 1)`.
//!
//! Rotations use the "smallest three" packing: the largest quaternion
//! component is dropped, its index kept in 2 bits and the other three are
//! stored with 10 bits each.

use glam::{Vec3, Vec4, Vec4Swizzles};
use serde::{Deserialize, Serialize};
use std::f32::consts::SQRT_2;

/// Storage format for 3-component vectors (positions, scales)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorFormat {
    /// 12 bytes: 32F.32F.32F, lossless
    Float32,
    /// 6 bytes: 16.16.16
    Norm16,
    /// 4 bytes: 11.10.11
    #[default]
    Norm11,
    /// 2 bytes: 6.5.5
    Norm6,
}

impl VectorFormat {
    /// Encoded size of one vector in bytes
    pub const fn size(self) -> usize {
        match self {
            VectorFormat::Float32 => 12,
            VectorFormat::Norm16 => 6,
            VectorFormat::Norm11 => 4,
            VectorFormat::Norm6 => 2,
        }
    }

    /// Bits per channel (x, y, z). Float32 reports 32 but is not fixed-point.
    pub const fn channel_bits(self) -> [u32; 3] {
        match self {
            VectorFormat::Float32 => [32, 32, 32],
            VectorFormat::Norm16 => [16, 16, 16],
            VectorFormat::Norm11 => [11, 10, 11],
            VectorFormat::Norm6 => [6, 5, 5],
        }
    }

    /// Value stored in the asset header and folded into the content hash
    pub const fn id(self) -> u32 {
        self as u32
    }
}

/// Size of a packed rotation in bytes
pub const ROTATION_SIZE: usize = 4;

#[inline]
const fn channel_max(bits: u32) -> f32 {
    ((1u32 << bits) - 1) as f32
}

/// Quantize a [0, 1] value to an n-bit unsigned integer (round to nearest)
#[inline]
pub fn encode_norm(v: f32, bits: u32) -> u32 {
    let scale = channel_max(bits);
    (v.clamp(0.0, 1.0) * scale + 0.5).floor() as u32
}

/// Inverse of [`encode_norm`]
#[inline]
pub fn decode_norm(enc: u32, bits: u32) -> f32 {
    let mask = (1u32 << bits) - 1;
    (enc & mask) as f32 / channel_max(bits)
}

/// 48 bits: 16.16.16
pub fn encode_float3_to_norm16(v: Vec3) -> u64 {
    encode_norm(v.x, 16) as u64
        | (encode_norm(v.y, 16) as u64) << 16
        | (encode_norm(v.z, 16) as u64) << 32
}

/// 32 bits: 11.10.11
pub fn encode_float3_to_norm11(v: Vec3) -> u32 {
    encode_norm(v.x, 11) | encode_norm(v.y, 10) << 11 | encode_norm(v.z, 11) << 21
}

/// 16 bits: 6.5.5
pub fn encode_float3_to_norm655(v: Vec3) -> u16 {
    (encode_norm(v.x, 6) | encode_norm(v.y, 5) << 6 | encode_norm(v.z, 5) << 11) as u16
}

/// 16 bits: 5.6.5 (used by SH table rows)
pub fn encode_float3_to_norm565(v: Vec3) -> u16 {
    (encode_norm(v.x, 5) | encode_norm(v.y, 6) << 5 | encode_norm(v.z, 5) << 11) as u16
}

pub fn decode_norm16_to_float3(enc: u64) -> Vec3 {
    Vec3::new(
        decode_norm(enc as u32, 16),
        decode_norm((enc >> 16) as u32, 16),
        decode_norm((enc >> 32) as u32, 16),
    )
}

pub fn decode_norm11_to_float3(enc: u32) -> Vec3 {
    Vec3::new(
        decode_norm(enc, 11),
        decode_norm(enc >> 11, 10),
        decode_norm(enc >> 21, 11),
    )
}

pub fn decode_norm655_to_float3(enc: u16) -> Vec3 {
    let enc = enc as u32;
    Vec3::new(
        decode_norm(enc, 6),
        decode_norm(enc >> 6, 5),
        decode_norm(enc >> 11, 5),
    )
}

pub fn decode_norm565_to_float3(enc: u16) -> Vec3 {
    let enc = enc as u32;
    Vec3::new(
        decode_norm(enc, 5),
        decode_norm(enc >> 5, 6),
        decode_norm(enc >> 11, 5),
    )
}

/// Write `v` into `out` using `format`. `out` must be exactly `format.size()` bytes.
pub fn emit_encoded_vector(v: Vec3, out: &mut [u8], format: VectorFormat) {
    debug_assert_eq!(out.len(), format.size());
    match format {
        VectorFormat::Float32 => {
            out[0..4].copy_from_slice(&v.x.to_le_bytes());
            out[4..8].copy_from_slice(&v.y.to_le_bytes());
            out[8..12].copy_from_slice(&v.z.to_le_bytes());
        }
        VectorFormat::Norm16 => {
            let enc = encode_float3_to_norm16(v);
            out.copy_from_slice(&enc.to_le_bytes()[..6]);
        }
        VectorFormat::Norm11 => {
            out.copy_from_slice(&encode_float3_to_norm11(v).to_le_bytes());
        }
        VectorFormat::Norm6 => {
            out.copy_from_slice(&encode_float3_to_norm655(v).to_le_bytes());
        }
    }
}

/// Read back a vector written by [`emit_encoded_vector`]
pub fn decode_vector(bytes: &[u8], format: VectorFormat) -> Vec3 {
    let word = |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
    match format {
        VectorFormat::Float32 => Vec3::new(
            f32::from_bits(word(0)),
            f32::from_bits(word(4)),
            f32::from_bits(word(8)),
        ),
        VectorFormat::Norm16 => {
            let mut raw = [0u8; 8];
            raw[..6].copy_from_slice(&bytes[..6]);
            decode_norm16_to_float3(u64::from_le_bytes(raw))
        }
        VectorFormat::Norm11 => decode_norm11_to_float3(word(0)),
        VectorFormat::Norm6 => decode_norm655_to_float3(u16::from_le_bytes([bytes[0], bytes[1]])),
    }
}

/// Pack a normalized (x, y, z, w) quaternion into smallest-three form.
///
/// Returns the three kept components remapped into [0, 1] and the index
/// (0..=3) of the dropped largest component.
pub fn pack_smallest3_rotation(q: Vec4) -> (Vec3, u32) {
    let abs_q = q.abs();
    let mut index = 0;
    let mut max_v = abs_q.x;
    if abs_q.y > max_v {
        index = 1;
        max_v = abs_q.y;
    }
    if abs_q.z > max_v {
        index = 2;
        max_v = abs_q.z;
    }
    if abs_q.w > max_v {
        index = 3;
    }

    // move the dropped component last
    let q = match index {
        0 => q.yzwx(),
        1 => q.xzwy(),
        2 => q.xywz(),
        _ => q,
    };

    let sign = if q.w >= 0.0 { 1.0 } else { -1.0 };
    let three = q.xyz() * sign; // -1/sqrt2..+1/sqrt2
    let three = three * SQRT_2 * 0.5 + Vec3::splat(0.5);
    (three, index)
}

/// 32 bits: 10.10.10.2
pub fn encode_quat_to_norm10(q: Vec4) -> u32 {
    let (three, index) = pack_smallest3_rotation(q);
    encode_norm(three.x, 10)
        | encode_norm(three.y, 10) << 10
        | encode_norm(three.z, 10) << 20
        | (index & 3) << 30
}

/// Reconstruct the (x, y, z, w) quaternion from its 10.10.10.2 encoding
pub fn decode_quat_from_norm10(enc: u32) -> Vec4 {
    let three = Vec3::new(
        decode_norm(enc, 10),
        decode_norm(enc >> 10, 10),
        decode_norm(enc >> 20, 10),
    );
    let three = (three - Vec3::splat(0.5)) * 2.0 / SQRT_2;
    let dropped = (1.0 - three.length_squared()).max(0.0).sqrt();
    match enc >> 30 {
        0 => Vec4::new(dropped, three.x, three.y, three.z),
        1 => Vec4::new(three.x, dropped, three.y, three.z),
        2 => Vec4::new(three.x, three.y, dropped, three.z),
        _ => Vec4::new(three.x, three.y, three.z, dropped),
    }
}

/// Byte layout of one record in the "other" buffer:
/// packed rotation, encoded scale, optional u16 SH codebook index
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtherLayout {
    pub scale_format: VectorFormat,
    pub has_sh_index: bool,
}

impl OtherLayout {
    pub const ROTATION_OFFSET: usize = 0;
    pub const SCALE_OFFSET: usize = ROTATION_SIZE;

    pub fn sh_index_offset(&self) -> Option<usize> {
        self.has_sh_index
            .then(|| Self::SCALE_OFFSET + self.scale_format.size())
    }

    pub fn stride(&self) -> usize {
        ROTATION_SIZE + self.scale_format.size() + if self.has_sh_index { 2 } else { 0 }
    }

    /// Encode one splat's record into `out` (`self.stride()` bytes)
    pub fn write(&self, out: &mut [u8], rotation: Vec4, scale: Vec3, sh_index: Option<u16>) {
        let scale_end = Self::SCALE_OFFSET + self.scale_format.size();
        out[..ROTATION_SIZE].copy_from_slice(&encode_quat_to_norm10(rotation).to_le_bytes());
        emit_encoded_vector(scale, &mut out[Self::SCALE_OFFSET..scale_end], self.scale_format);
        if let (Some(offset), Some(index)) = (self.sh_index_offset(), sh_index) {
            out[offset..offset + 2].copy_from_slice(&index.to_le_bytes());
        }
    }
}

/// Round `size` up to the next multiple of `multiple_of`
#[inline]
pub fn next_multiple_of(size: usize, multiple_of: usize) -> usize {
    size.div_ceil(multiple_of) * multiple_of
}
