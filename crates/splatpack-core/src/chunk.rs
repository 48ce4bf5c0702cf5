//! Per-chunk bounds quantization
//!
//! Splats are grouped into chunks of [`CHUNK_SIZE`] consecutive entries
//! (after Morton reordering). Each chunk records min/max bounds for its
//! attributes and every attribute is rewritten as `(v - min) / (max - min)`.
//! Positions keep full-precision bounds; scale, color+opacity and SH bounds
//! are stored as half-float pairs packed into one `u32` each. A single SH
//! range is shared by all 15 AC vectors of a chunk.
//!
//! Chunk header layout (64 bytes, little-endian):
//!
//! | field | offset | width |
//! |---|---|---|
//! | col_r, col_g, col_b, col_a | 0 | 4 each |
//! | pos_x, pos_y, pos_z (f32 min, f32 max) | 16 | 8 each |
//! | scl_x, scl_y, scl_z | 40 | 4 each |
//! | sh_r, sh_g, sh_b | 52 | 4 each |

use crate::GaussianCloud;
use glam::Vec3;
use half::f16;
use rayon::prelude::*;

/// Splats per chunk
pub const CHUNK_SIZE: usize = 256;

/// Encoded size of one [`ChunkHeader`]
pub const CHUNK_HEADER_SIZE: usize = 64;

/// Minimum width of a chunk range
pub const BOUNDS_EPSILON: f32 = 1e-5;

/// One field of the encoded chunk header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub width: usize,
}

const fn field(name: &'static str, offset: usize, width: usize) -> Field {
    Field { name, offset, width }
}

/// Byte layout of [`ChunkHeader`]
pub const CHUNK_LAYOUT: [Field; 13] = [
    field("col_r", 0, 4),
    field("col_g", 4, 4),
    field("col_b", 8, 4),
    field("col_a", 12, 4),
    field("pos_x", 16, 8),
    field("pos_y", 24, 8),
    field("pos_z", 32, 8),
    field("scl_x", 40, 4),
    field("scl_y", 44, 4),
    field("scl_z", 48, 4),
    field("sh_r", 52, 4),
    field("sh_g", 56, 4),
    field("sh_b", 60, 4),
];

const COLOR_FIELDS: usize = 0;
const POSITION_FIELDS: usize = 4;
const SCALE_FIELDS: usize = 7;
const SH_FIELDS: usize = 10;

/// Half-precision min/max pair
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HalfRange {
    pub min: f16,
    pub max: f16,
}

impl HalfRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self {
            min: f16::from_f32(min),
            max: f16::from_f32(max),
        }
    }

    /// `min` in the low 16 bits, `max` in the high 16 bits
    pub fn pack(&self) -> u32 {
        self.min.to_bits() as u32 | (self.max.to_bits() as u32) << 16
    }

    pub fn unpack(word: u32) -> Self {
        Self {
            min: f16::from_bits(word as u16),
            max: f16::from_bits((word >> 16) as u16),
        }
    }
}

/// Full-precision min/max pair
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FloatRange {
    pub min: f32,
    pub max: f32,
}

/// Quantization bounds of one chunk
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ChunkHeader {
    /// r, g, b, opacity
    pub color: [HalfRange; 4],
    pub position: [FloatRange; 3],
    pub scale: [HalfRange; 3],
    /// Shared by all 15 SH vectors
    pub sh: [HalfRange; 3],
}

impl ChunkHeader {
    /// Write the header into `out` (exactly [`CHUNK_HEADER_SIZE`] bytes)
    pub fn write(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), CHUNK_HEADER_SIZE);
        let mut put = |index: usize, bytes: &[u8]| {
            let f = &CHUNK_LAYOUT[index];
            debug_assert_eq!(bytes.len(), f.width, "{}", f.name);
            out[f.offset..f.offset + f.width].copy_from_slice(bytes);
        };

        for (i, range) in self.color.iter().enumerate() {
            put(COLOR_FIELDS + i, &range.pack().to_le_bytes());
        }
        for (i, range) in self.position.iter().enumerate() {
            let mut bytes = [0u8; 8];
            bytes[..4].copy_from_slice(&range.min.to_le_bytes());
            bytes[4..].copy_from_slice(&range.max.to_le_bytes());
            put(POSITION_FIELDS + i, &bytes);
        }
        for (i, range) in self.scale.iter().enumerate() {
            put(SCALE_FIELDS + i, &range.pack().to_le_bytes());
        }
        for (i, range) in self.sh.iter().enumerate() {
            put(SH_FIELDS + i, &range.pack().to_le_bytes());
        }
    }

    /// Decode a header written by [`ChunkHeader::write`]
    pub fn read(bytes: &[u8]) -> Self {
        let word = |index: usize, at: usize| {
            let o = CHUNK_LAYOUT[index].offset + at;
            u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]])
        };
        let halves = |first: usize| -> [HalfRange; 3] {
            std::array::from_fn(|i| HalfRange::unpack(word(first + i, 0)))
        };

        Self {
            color: std::array::from_fn(|i| HalfRange::unpack(word(COLOR_FIELDS + i, 0))),
            position: std::array::from_fn(|i| FloatRange {
                min: f32::from_bits(word(POSITION_FIELDS + i, 0)),
                max: f32::from_bits(word(POSITION_FIELDS + i, 4)),
            }),
            scale: halves(SCALE_FIELDS),
            sh: halves(SH_FIELDS),
        }
    }
}

/// Number of chunks needed for `splat_count` splats
pub fn chunk_count(splat_count: usize) -> usize {
    splat_count.div_ceil(CHUNK_SIZE)
}

/// Widen a degenerate range so `max - min` is never zero.
///
/// The minimum width scales with `|min|` so it survives float rounding for
/// large coordinates.
#[inline]
pub fn widen_max(min: f32, max: f32) -> f32 {
    max.max(min + BOUNDS_EPSILON.max(min.abs() * f32::EPSILON * 4.0))
}

fn widen3(min: Vec3, max: Vec3) -> Vec3 {
    Vec3::new(
        widen_max(min.x, max.x),
        widen_max(min.y, max.y),
        widen_max(min.z, max.z),
    )
}

fn range3(values: impl Iterator<Item = Vec3>) -> (Vec3, Vec3) {
    let (min, max) = values.fold(
        (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
        |(lo, hi), v| (lo.min(v), hi.max(v)),
    );
    (min, widen3(min, max))
}

#[inline]
fn normalize3(v: Vec3, min: Vec3, max: Vec3) -> Vec3 {
    ((v - min) / (max - min)).clamp(Vec3::ZERO, Vec3::ONE)
}

/// Compute bounds for one chunk and normalize its values in place
fn quantize_chunk(
    positions: &mut [Vec3],
    scales: &mut [Vec3],
    colors: &mut [Vec3],
    opacities: &mut [f32],
    sh_rest: &mut [[Vec3; 15]],
) -> ChunkHeader {
    let (pos_min, pos_max) = range3(positions.iter().copied());
    let (scl_min, scl_max) = range3(scales.iter().copied());
    let (col_min, col_max) = range3(colors.iter().copied());
    let (sh_min, sh_max) = range3(sh_rest.iter().flatten().copied());

    let opa_min = opacities.iter().copied().fold(f32::INFINITY, f32::min);
    let opa_max = widen_max(opa_min, opacities.iter().copied().fold(f32::NEG_INFINITY, f32::max));

    for p in positions.iter_mut() {
        *p = normalize3(*p, pos_min, pos_max);
    }
    for s in scales.iter_mut() {
        *s = normalize3(*s, scl_min, scl_max);
    }
    for c in colors.iter_mut() {
        *c = normalize3(*c, col_min, col_max);
    }
    for o in opacities.iter_mut() {
        *o = ((*o - opa_min) / (opa_max - opa_min)).clamp(0.0, 1.0);
    }
    for sh in sh_rest.iter_mut().flatten() {
        *sh = normalize3(*sh, sh_min, sh_max);
    }

    let halves = |min: Vec3, max: Vec3| -> [HalfRange; 3] {
        std::array::from_fn(|i| HalfRange::new(min[i], max[i]))
    };
    let [r, g, b] = halves(col_min, col_max);
    ChunkHeader {
        color: [r, g, b, HalfRange::new(opa_min, opa_max)],
        position: std::array::from_fn(|i| FloatRange {
            min: pos_min[i],
            max: pos_max[i],
        }),
        scale: halves(scl_min, scl_max),
        sh: halves(sh_min, sh_max),
    }
}

/// Chunk-normalize every attribute of `cloud` in place and return one
/// header per chunk. Chunks are processed in parallel.
pub fn quantize_chunks(cloud: &mut GaussianCloud) -> Vec<ChunkHeader> {
    (
        cloud.positions.par_chunks_mut(CHUNK_SIZE),
        cloud.scales.par_chunks_mut(CHUNK_SIZE),
        cloud.colors.par_chunks_mut(CHUNK_SIZE),
        cloud.opacities.par_chunks_mut(CHUNK_SIZE),
        cloud.sh_rest.par_chunks_mut(CHUNK_SIZE),
    )
        .into_par_iter()
        .map(|(pos, scl, col, opa, sh)| quantize_chunk(pos, scl, col, opa, sh))
        .collect()
}

/// Serialize chunk headers back to back
pub fn encode_chunk_table(headers: &[ChunkHeader]) -> Vec<u8> {
    let mut out = vec![0u8; headers.len() * CHUNK_HEADER_SIZE];
    out.par_chunks_mut(CHUNK_HEADER_SIZE)
        .zip(headers.par_iter())
        .for_each(|(bytes, header)| header.write(bytes));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Splat;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_cloud(count: usize, seed: u64) -> GaussianCloud {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut v3 = |lo: f32, hi: f32| {
            Vec3::new(rng.gen_range(lo..hi), rng.gen_range(lo..hi), rng.gen_range(lo..hi))
        };
        let mut cloud = GaussianCloud::with_capacity(count);
        for i in 0..count {
            let mut sh_rest = [Vec3::ZERO; 15];
            for (k, v) in sh_rest.iter_mut().enumerate() {
                *v = Vec3::splat(((i + k) % 9) as f32 * 0.1 - 0.4);
            }
            cloud.push(Splat {
                position: v3(-100.0, 100.0),
                scale: v3(0.0, 2.0),
                color: v3(0.0, 1.0),
                opacity: (i % 10) as f32 / 10.0,
                sh_rest,
                ..Splat::default()
            });
        }
        cloud
    }

    fn all_normalized(cloud: &GaussianCloud) -> bool {
        let in01 = |v: f32| (0.0..=1.0).contains(&v);
        let in01_3 = |v: &Vec3| in01(v.x) && in01(v.y) && in01(v.z);
        cloud.positions.iter().all(in01_3)
            && cloud.scales.iter().all(in01_3)
            && cloud.colors.iter().all(in01_3)
            && cloud.opacities.iter().all(|&o| in01(o))
            && cloud.sh_rest.iter().flatten().all(in01_3)
    }

    // ==================== Layout ====================

    #[test]
    fn test_layout_is_contiguous() {
        let mut offset = 0;
        for f in CHUNK_LAYOUT.iter() {
            assert_eq!(f.offset, offset, "{}", f.name);
            offset += f.width;
        }
        assert_eq!(offset, CHUNK_HEADER_SIZE);
    }

    #[test]
    fn test_half_range_pack() {
        let r = HalfRange::new(1.0, -2.0);
        assert_eq!(r.pack(), 0x3c00 | 0xc000 << 16);
        assert_eq!(HalfRange::unpack(r.pack()), r);
    }

    #[test]
    fn test_header_write_read() {
        let header = ChunkHeader {
            color: [
                HalfRange::new(0.0, 1.0),
                HalfRange::new(0.25, 0.5),
                HalfRange::new(-1.0, 2.0),
                HalfRange::new(0.1, 0.9),
            ],
            position: [
                FloatRange { min: -3.5, max: 7.25 },
                FloatRange { min: 0.0, max: 1e-5 },
                FloatRange { min: 100.0, max: 200.0 },
            ],
            scale: [HalfRange::new(0.5, 1.5); 3],
            sh: [HalfRange::new(-0.25, 0.75); 3],
        };
        let mut bytes = [0u8; CHUNK_HEADER_SIZE];
        header.write(&mut bytes);
        assert_eq!(ChunkHeader::read(&bytes), header);
        // pos_x min sits at byte 16
        assert_eq!(&bytes[16..20], &(-3.5f32).to_le_bytes());
    }

    // ==================== Quantization ====================

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0), 0);
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(256), 1);
        assert_eq!(chunk_count(257), 2);
        assert_eq!(chunk_count(10_000), 40);
    }

    #[test]
    fn test_quantize_produces_one_header_per_chunk() {
        let mut cloud = random_cloud(1000, 1);
        let headers = quantize_chunks(&mut cloud);
        assert_eq!(headers.len(), chunk_count(1000));
        assert!(all_normalized(&cloud));
    }

    #[test]
    fn test_quantize_bounds_match_chunk_contents() {
        let mut cloud = random_cloud(300, 2);
        let original = cloud.clone();
        let headers = quantize_chunks(&mut cloud);

        let tail = &original.positions[256..];
        let min_x = tail.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
        let max_x = tail.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(headers[1].position[0].min, min_x);
        assert_eq!(headers[1].position[0].max, max_x);

        // dequantizing with the stored full precision bounds restores positions
        for (i, p) in cloud.positions.iter().enumerate() {
            let h = &headers[i / CHUNK_SIZE];
            let x = h.position[0].min + p.x * (h.position[0].max - h.position[0].min);
            assert!((x - original.positions[i].x).abs() < 1e-3);
        }
    }

    #[test]
    fn test_single_splat_chunk_is_widened() {
        let mut cloud = random_cloud(257, 3);
        let headers = quantize_chunks(&mut cloud);
        let last = &headers[1];
        for i in 0..3 {
            assert!(last.position[i].max > last.position[i].min);
        }
        assert!(all_normalized(&cloud));
        assert!(cloud.positions[256].is_finite());
        assert_eq!(cloud.positions[256], Vec3::ZERO);
    }

    #[test]
    fn test_identical_values_do_not_divide_by_zero() {
        let mut cloud = GaussianCloud::with_capacity(4);
        for _ in 0..4 {
            cloud.push(Splat {
                position: Vec3::splat(12345.0),
                opacity: 0.5,
                ..Splat::default()
            });
        }
        let headers = quantize_chunks(&mut cloud);
        assert_eq!(headers.len(), 1);
        assert!(all_normalized(&cloud));
        assert!(headers[0].position[0].max > 12345.0);
    }

    #[test]
    fn test_widen_max() {
        assert_eq!(widen_max(0.0, 1.0), 1.0);
        assert_eq!(widen_max(0.0, 0.0), BOUNDS_EPSILON);
        assert!(widen_max(1e6, 1e6) > 1e6);
    }

    #[test]
    fn test_encode_chunk_table() {
        let mut cloud = random_cloud(600, 4);
        let headers = quantize_chunks(&mut cloud);
        let table = encode_chunk_table(&headers);
        assert_eq!(table.len(), 3 * CHUNK_HEADER_SIZE);
        assert_eq!(ChunkHeader::read(&table[64..128]), headers[1]);
    }
}
