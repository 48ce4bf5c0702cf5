//! Color + opacity texture
//!
//! Colors are not stored as a linear buffer but in a texel grid
//! [`TEXTURE_WIDTH`] wide. Splat indices map to texels through 16x16 tiles:
//! the low 8 bits of the index are Morton-decoded into a position inside the
//! tile and the remaining bits select the tile, row by row. Splats that are
//! close in Morton order therefore share texture tiles.

use crate::encode::encode_norm;
use crate::{Result, SplatsError};
use glam::{Vec3, Vec4};
use half::f16;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Width of the color texture in texels
pub const TEXTURE_WIDTH: usize = 2048;

/// Side of a Morton tile in texels
pub const TILE_SIZE: usize = 16;

const TILES_PER_ROW: usize = TEXTURE_WIDTH / TILE_SIZE;

/// Texel format of the color texture
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormat {
    Float32x4,
    Float16x4,
    #[default]
    Norm8x4,
    /// Block compressed by an external [`TextureCompressor`]
    BC7,
}

impl ColorFormat {
    /// Bytes per texel (BC7: 16-byte blocks of 4x4 texels)
    pub const fn texel_size(self) -> usize {
        match self {
            ColorFormat::Float32x4 => 16,
            ColorFormat::Float16x4 => 8,
            ColorFormat::Norm8x4 => 4,
            ColorFormat::BC7 => 1,
        }
    }

    pub const fn id(self) -> u32 {
        self as u32
    }
}

/// Block compressor for [`ColorFormat::BC7`].
///
/// Receives the full-precision RGBA grid in row-major order and must return
/// exactly `width * height` bytes.
pub trait TextureCompressor: Sync {
    fn compress_bc7(&self, texels: &[Vec4], width: usize, height: usize) -> Vec<u8>;
}

/// Texture dimensions for `splat_count` splats. Height is a multiple of 16.
pub fn texture_size(splat_count: usize) -> (usize, usize) {
    let height = splat_count.div_ceil(TEXTURE_WIDTH).max(1);
    (TEXTURE_WIDTH, height.div_ceil(TILE_SIZE) * TILE_SIZE)
}

/// Size in bytes of the encoded color texture
pub fn color_buffer_size(splat_count: usize, format: ColorFormat) -> usize {
    let (width, height) = texture_size(splat_count);
    width * height * format.texel_size()
}

/// Keep the even bits of `v` and pack them together
#[inline]
fn compact1by1(v: u32) -> u32 {
    let mut v = v & 0x5555;
    v = (v ^ (v >> 1)) & 0x3333;
    v = (v ^ (v >> 2)) & 0x0f0f;
    v = (v ^ (v >> 4)) & 0x00ff;
    v
}

#[inline]
fn part1by1(v: u32) -> u32 {
    let mut v = v & 0x00ff;
    v = (v | (v << 4)) & 0x0f0f;
    v = (v | (v << 2)) & 0x3333;
    v = (v | (v << 1)) & 0x5555;
    v
}

/// Position inside a 16x16 tile for the low 8 bits of `t`.
/// x comes from the even bits, y from the odd bits.
#[inline]
pub fn decode_morton2d_16x16(t: u32) -> (u32, u32) {
    let t = t & 0xff;
    (compact1by1(t), compact1by1(t >> 1))
}

/// Inverse of [`decode_morton2d_16x16`]
#[inline]
pub fn encode_morton2d_16x16(x: u32, y: u32) -> u32 {
    part1by1(x & 0xf) | (part1by1(y & 0xf) << 1)
}

/// Texel coordinate of splat `index`
#[inline]
pub fn splat_index_to_texel(index: u32) -> (u32, u32) {
    let (lx, ly) = decode_morton2d_16x16(index);
    let tile = (index >> 8) as usize;
    let x = (tile % TILES_PER_ROW) * TILE_SIZE + lx as usize;
    let y = (tile / TILES_PER_ROW) * TILE_SIZE + ly as usize;
    (x as u32, y as u32)
}

/// Splat index stored at texel `(x, y)`
#[inline]
pub fn texel_to_splat_index(x: u32, y: u32) -> u32 {
    let tile = (y as usize / TILE_SIZE) * TILES_PER_ROW + x as usize / TILE_SIZE;
    ((tile as u32) << 8) | encode_morton2d_16x16(x, y)
}

/// Lay out `(color, opacity)` pairs as a row-major RGBA grid.
/// Texels past the last splat are zero.
pub fn build_texel_grid(colors: &[Vec3], opacities: &[f32]) -> (Vec<Vec4>, usize, usize) {
    let count = colors.len();
    let (width, height) = texture_size(count);
    let mut grid = vec![Vec4::ZERO; width * height];

    grid.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        for (x, texel) in row.iter_mut().enumerate() {
            let index = texel_to_splat_index(x as u32, y as u32) as usize;
            if index < count {
                *texel = colors[index].extend(opacities[index]);
            }
        }
    });

    (grid, width, height)
}

fn write_texel(texel: Vec4, out: &mut [u8], format: ColorFormat) {
    match format {
        ColorFormat::Float32x4 => {
            for (i, c) in texel.to_array().iter().enumerate() {
                out[i * 4..i * 4 + 4].copy_from_slice(&c.to_le_bytes());
            }
        }
        ColorFormat::Float16x4 => {
            for (i, c) in texel.to_array().iter().enumerate() {
                out[i * 2..i * 2 + 2].copy_from_slice(&f16::from_f32(*c).to_le_bytes());
            }
        }
        ColorFormat::Norm8x4 => {
            for (i, c) in texel.to_array().iter().enumerate() {
                out[i] = encode_norm(*c, 8) as u8;
            }
        }
        ColorFormat::BC7 => unreachable!("block formats are encoded by the compressor"),
    }
}

/// Encode the color texture of a cloud.
///
/// `colors` and `opacities` must be the same length. [`ColorFormat::BC7`]
/// requires `compressor`.
pub fn encode_color_texture(
    colors: &[Vec3],
    opacities: &[f32],
    format: ColorFormat,
    compressor: Option<&dyn TextureCompressor>,
) -> Result<Vec<u8>> {
    let (grid, width, height) = build_texel_grid(colors, opacities);

    if format == ColorFormat::BC7 {
        let compressor = compressor.ok_or(SplatsError::MissingTextureCompressor)?;
        let data = compressor.compress_bc7(&grid, width, height);
        let expected = width * height * format.texel_size();
        if data.len() != expected {
            return Err(SplatsError::CompressedSize {
                expected,
                found: data.len(),
            });
        }
        return Ok(data);
    }

    let texel_size = format.texel_size();
    let mut out = vec![0u8; grid.len() * texel_size];
    out.par_chunks_mut(texel_size)
        .zip(grid.par_iter())
        .with_min_len(TEXTURE_WIDTH)
        .for_each(|(bytes, &texel)| write_texel(texel, bytes, format));
    Ok(out)
}

/// Read one texel back from an uncompressed texture
pub fn read_texel(data: &[u8], format: ColorFormat, x: u32, y: u32) -> Option<Vec4> {
    let texel_size = format.texel_size();
    let offset = (y as usize * TEXTURE_WIDTH + x as usize) * texel_size;
    let bytes = data.get(offset..offset + texel_size)?;
    match format {
        ColorFormat::Float32x4 => Some(Vec4::from_array(std::array::from_fn(|i| {
            f32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        }))),
        ColorFormat::Float16x4 => Some(Vec4::from_array(std::array::from_fn(|i| {
            f16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]).to_f32()
        }))),
        ColorFormat::Norm8x4 => Some(Vec4::from_array(std::array::from_fn(|i| bytes[i] as f32 / 255.0))),
        ColorFormat::BC7 => None,
    }
}
