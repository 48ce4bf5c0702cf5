//! Asset assembly, content hashing and file emission
//!
//! Buffers are emitted in a fixed order (chunk table, positions, other,
//! color, SH) and folded into a 128-bit FNV-1a hash in that same order,
//! together with the format of each buffer. The hash is the renderer's
//! cache key: identical input and settings always give the same value.

use crate::chunk::{chunk_count, CHUNK_HEADER_SIZE};
use crate::color::{texture_size, ColorFormat};
use crate::encode::{emit_encoded_vector, next_multiple_of, OtherLayout, VectorFormat};
use crate::records::RECORD_STRIDE;
use crate::reorder::Bounds;
use crate::sh::SHFormat;
use crate::{Result, SplatsError};
use glam::{Vec3, Vec4};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Asset layout version, bumped on any change to the emitted bytes
pub const FORMAT_VERSION: u32 = 2023_10_20;

/// Largest supported splat count
pub const MAX_SPLATS: usize = 8_600_000;

/// Position and other buffers are padded to this many bytes
pub const BUFFER_ALIGNMENT: usize = 8;

const FNV128_OFFSET: u128 = 0x6c62272e07bb014262b821756295c58d;
const FNV128_PRIME: u128 = 0x0000000001000000000000000000013b;

/// Incremental 128-bit FNV-1a hash
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentHash(u128);

impl Default for ContentHash {
    fn default() -> Self {
        Self(FNV128_OFFSET)
    }
}

impl ContentHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u128;
            self.0 = self.0.wrapping_mul(FNV128_PRIME);
        }
    }

    pub fn update_u32(&mut self, v: u32) {
        self.update(&v.to_le_bytes());
    }

    pub fn finish(&self) -> u128 {
        self.0
    }
}

/// Formats actually used by an asset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFormats {
    pub pos_format: VectorFormat,
    pub scale_format: VectorFormat,
    pub color_format: ColorFormat,
    pub sh_format: SHFormat,
}

/// Encoded byte buffers of an asset
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssetBuffers {
    /// Absent when nothing is quantized
    pub chunk_data: Option<Vec<u8>>,
    pub pos_data: Vec<u8>,
    pub other_data: Vec<u8>,
    pub color_data: Vec<u8>,
    pub sh_data: Vec<u8>,
}

/// Final compressed asset
#[derive(Clone, Debug, PartialEq)]
pub struct SplatAsset {
    pub splat_count: usize,
    pub format_version: u32,
    pub bounds: Bounds,
    pub formats: AssetFormats,
    pub buffers: AssetBuffers,
    pub data_hash: u128,
}

impl SplatAsset {
    /// Build the asset and compute its content hash
    pub fn assemble(
        splat_count: usize,
        bounds: Bounds,
        formats: AssetFormats,
        buffers: AssetBuffers,
    ) -> Self {
        let mut hash = ContentHash::new();
        hash.update(&(splat_count as u64).to_le_bytes());
        hash.update_u32(FORMAT_VERSION);
        hash.update_u32(formats.pos_format.id());
        hash.update_u32(formats.scale_format.id());

        if let Some(chunks) = &buffers.chunk_data {
            hash.update(chunks);
        }
        hash.update(&buffers.pos_data);
        hash.update(&buffers.other_data);
        hash.update(&buffers.color_data);
        hash.update_u32(formats.color_format.id());
        hash.update(&buffers.sh_data);
        hash.update_u32(formats.sh_format.id());

        Self {
            splat_count,
            format_version: FORMAT_VERSION,
            bounds,
            formats,
            buffers,
            data_hash: hash.finish(),
        }
    }

    /// Hash as 32 lowercase hex digits
    pub fn hash_hex(&self) -> String {
        format!("{:032x}", self.data_hash)
    }

    /// Color texture dimensions
    pub fn color_size(&self) -> (usize, usize) {
        texture_size(self.splat_count)
    }

    pub fn size_report(&self) -> SizeReport {
        let b = &self.buffers;
        SizeReport {
            splat_count: self.splat_count,
            input_bytes: self.splat_count * RECORD_STRIDE,
            chunk_bytes: b.chunk_data.as_ref().map_or(0, Vec::len),
            pos_bytes: b.pos_data.len(),
            other_bytes: b.other_data.len(),
            color_bytes: b.color_data.len(),
            sh_bytes: b.sh_data.len(),
        }
    }

    /// Write the buffers as `{name}_chk.bytes` (chunked assets only),
    /// `{name}_pos.bytes`, `{name}_oth.bytes`, `{name}_col.bytes`,
    /// `{name}_shs.bytes` plus a `{name}.json` manifest. Returns the
    /// written paths, manifest last.
    pub fn write_to_dir(&self, dir: &Path, name: &str) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;

        let b = &self.buffers;
        let mut parts: Vec<(&str, &[u8])> = Vec::with_capacity(5);
        if let Some(chunks) = &b.chunk_data {
            parts.push(("chk", chunks.as_slice()));
        }
        parts.push(("pos", b.pos_data.as_slice()));
        parts.push(("oth", b.other_data.as_slice()));
        parts.push(("col", b.color_data.as_slice()));
        parts.push(("shs", b.sh_data.as_slice()));

        let mut written = Vec::with_capacity(parts.len() + 1);
        let mut files = Vec::with_capacity(parts.len());
        for (suffix, data) in parts {
            let file_name = format!("{}_{}.bytes", name, suffix);
            let path = dir.join(&file_name);
            std::fs::write(&path, data)?;
            files.push(file_name);
            written.push(path);
        }

        let (color_width, color_height) = self.color_size();
        let manifest = AssetManifest {
            name: name.to_string(),
            splat_count: self.splat_count,
            format_version: self.format_version,
            bounds: self.bounds,
            formats: self.formats,
            color_width,
            color_height,
            data_hash: self.hash_hex(),
            files,
        };
        let path = dir.join(format!("{}.json", name));
        std::fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
        written.push(path);

        Ok(written)
    }
}

/// JSON description of an emitted asset
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetManifest {
    pub name: String,
    pub splat_count: usize,
    pub format_version: u32,
    pub bounds: Bounds,
    pub formats: AssetFormats,
    pub color_width: usize,
    pub color_height: usize,
    pub data_hash: String,
    pub files: Vec<String>,
}

/// Byte sizes of an asset compared to its input records
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SizeReport {
    pub splat_count: usize,
    pub input_bytes: usize,
    pub chunk_bytes: usize,
    pub pos_bytes: usize,
    pub other_bytes: usize,
    pub color_bytes: usize,
    pub sh_bytes: usize,
}

impl SizeReport {
    pub fn total_bytes(&self) -> usize {
        self.chunk_bytes + self.pos_bytes + self.other_bytes + self.color_bytes + self.sh_bytes
    }

    /// Input size divided by output size
    pub fn ratio(&self) -> f64 {
        match self.total_bytes() {
            0 => 0.0,
            total => self.input_bytes as f64 / total as f64,
        }
    }
}

impl fmt::Display for SizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "splats: {}", self.splat_count)?;
        writeln!(f, "chunks: {} B", self.chunk_bytes)?;
        writeln!(f, "pos:    {} B", self.pos_bytes)?;
        writeln!(f, "other:  {} B", self.other_bytes)?;
        writeln!(f, "color:  {} B", self.color_bytes)?;
        writeln!(f, "sh:     {} B", self.sh_bytes)?;
        write!(
            f,
            "total:  {} B from {} B input ({:.2}x)",
            self.total_bytes(),
            self.input_bytes,
            self.ratio()
        )
    }
}

/// Expected size of the position buffer
pub fn pos_buffer_size(splat_count: usize, format: VectorFormat) -> usize {
    next_multiple_of(splat_count * format.size(), BUFFER_ALIGNMENT)
}

/// Expected size of the other buffer
pub fn other_buffer_size(splat_count: usize, layout: OtherLayout) -> usize {
    next_multiple_of(splat_count * layout.stride(), BUFFER_ALIGNMENT)
}

/// Expected size of the chunk table
pub fn chunk_buffer_size(splat_count: usize) -> usize {
    chunk_count(splat_count) * CHUNK_HEADER_SIZE
}

/// Encode one vector per splat, zero padded to [`BUFFER_ALIGNMENT`]
pub fn encode_vector_buffer(values: &[Vec3], format: VectorFormat) -> Vec<u8> {
    let stride = format.size();
    let mut out = vec![0u8; pos_buffer_size(values.len(), format)];
    out[..values.len() * stride]
        .par_chunks_exact_mut(stride)
        .zip(values.par_iter())
        .with_min_len(4096)
        .for_each(|(bytes, &v)| emit_encoded_vector(v, bytes, format));
    out
}

/// Encode rotation, scale and optional SH index per splat.
///
/// `scales` and `sh_labels` must hold one entry per rotation, and labels are
/// required when the layout has an SH index slot.
pub fn encode_other_buffer(
    rotations: &[Vec4],
    scales: &[Vec3],
    sh_labels: Option<&[u16]>,
    layout: OtherLayout,
) -> Result<Vec<u8>> {
    let stride = layout.stride();
    let count = rotations.len();
    if scales.len() != count {
        return Err(SplatsError::MissingAttribute {
            attribute: "scales",
            expected: count,
            found: scales.len(),
        });
    }
    let found_labels = sh_labels.map_or(0, <[u16]>::len);
    if (layout.has_sh_index || sh_labels.is_some()) && found_labels != count {
        return Err(SplatsError::MissingAttribute {
            attribute: "sh_labels",
            expected: count,
            found: found_labels,
        });
    }

    let mut out = vec![0u8; other_buffer_size(count, layout)];
    out[..count * stride]
        .par_chunks_exact_mut(stride)
        .enumerate()
        .with_min_len(4096)
        .for_each(|(i, bytes)| {
            let label = sh_labels.map(|labels| labels[i]);
            layout.write(bytes, rotations[i], scales[i], label);
        });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::decode_vector;

    fn test_bounds() -> Bounds {
        Bounds {
            min: Vec3::splat(-1.0),
            max: Vec3::ONE,
        }
    }

    fn medium_formats() -> AssetFormats {
        AssetFormats {
            pos_format: VectorFormat::Norm11,
            scale_format: VectorFormat::Norm11,
            color_format: ColorFormat::Norm8x4,
            sh_format: SHFormat::Norm6,
        }
    }

    fn test_buffers() -> AssetBuffers {
        AssetBuffers {
            chunk_data: Some(vec![1; 64]),
            pos_data: vec![2; 8],
            other_data: vec![3; 8],
            color_data: vec![4; 16],
            sh_data: vec![5; 32],
        }
    }

    // ==================== Hash ====================

    #[test]
    fn test_fnv128_known_values() {
        assert_eq!(ContentHash::new().finish(), FNV128_OFFSET);
        let mut h = ContentHash::new();
        h.update(b"a");
        assert_eq!(h.finish(), 0xd228cb696f1a8caf78912b704e4a8964);
    }

    #[test]
    fn test_hash_depends_on_every_buffer_and_format() {
        let base = SplatAsset::assemble(1, test_bounds(), medium_formats(), test_buffers());
        assert_ne!(base.data_hash, 0);

        let again = SplatAsset::assemble(1, test_bounds(), medium_formats(), test_buffers());
        assert_eq!(base.data_hash, again.data_hash);

        let mut buffers = test_buffers();
        buffers.sh_data[31] = 6;
        let changed = SplatAsset::assemble(1, test_bounds(), medium_formats(), buffers);
        assert_ne!(base.data_hash, changed.data_hash);

        let mut buffers = test_buffers();
        buffers.chunk_data = None;
        let unchunked = SplatAsset::assemble(1, test_bounds(), medium_formats(), buffers);
        assert_ne!(base.data_hash, unchunked.data_hash);

        let formats = AssetFormats {
            color_format: ColorFormat::Float16x4,
            ..medium_formats()
        };
        let other_color = SplatAsset::assemble(1, test_bounds(), formats, test_buffers());
        assert_ne!(base.data_hash, other_color.data_hash);

        let more = SplatAsset::assemble(2, test_bounds(), medium_formats(), test_buffers());
        assert_ne!(base.data_hash, more.data_hash);
    }

    #[test]
    fn test_hash_hex() {
        let asset = SplatAsset::assemble(1, test_bounds(), medium_formats(), test_buffers());
        let hex = asset.hash_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(u128::from_str_radix(&hex, 16).unwrap(), asset.data_hash);
    }

    // ==================== Buffers ====================

    #[test]
    fn test_buffer_sizes() {
        assert_eq!(pos_buffer_size(10_000, VectorFormat::Norm11), 40_000);
        assert_eq!(pos_buffer_size(3, VectorFormat::Norm16), 24);
        assert_eq!(pos_buffer_size(1, VectorFormat::Norm6), 8);
        let layout = OtherLayout {
            scale_format: VectorFormat::Norm6,
            has_sh_index: true,
        };
        assert_eq!(other_buffer_size(3, layout), 24);
        assert_eq!(chunk_buffer_size(257), 128);
    }

    #[test]
    fn test_encode_vector_buffer() {
        let values = vec![Vec3::ZERO, Vec3::ONE, Vec3::splat(0.5)];
        let data = encode_vector_buffer(&values, VectorFormat::Norm16);
        assert_eq!(data.len(), 24);
        let v = decode_vector(&data[6..12], VectorFormat::Norm16);
        assert_eq!(v, Vec3::ONE);
        assert!(data[18..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_other_buffer_with_labels() {
        let layout = OtherLayout {
            scale_format: VectorFormat::Norm11,
            has_sh_index: true,
        };
        let rotations = vec![Vec4::W; 2];
        let scales = vec![Vec3::ZERO; 2];
        let data =
            encode_other_buffer(&rotations, &scales, Some(&[7u16, 65535][..]), layout).unwrap();
        assert_eq!(data.len(), 24);
        assert_eq!(&data[8..10], &7u16.to_le_bytes());
        assert_eq!(&data[18..20], &65535u16.to_le_bytes());
    }

    #[test]
    fn test_encode_other_buffer_rejects_short_inputs() {
        let layout = OtherLayout {
            scale_format: VectorFormat::Norm11,
            has_sh_index: true,
        };
        let rotations = vec![Vec4::W; 3];
        let scales = vec![Vec3::ZERO; 3];

        let res = encode_other_buffer(&rotations, &scales, Some(&[1u16, 2][..]), layout);
        assert!(matches!(
            res,
            Err(SplatsError::MissingAttribute {
                attribute: "sh_labels",
                expected: 3,
                found: 2
            })
        ));

        let res = encode_other_buffer(&rotations, &scales, None, layout);
        assert!(matches!(
            res,
            Err(SplatsError::MissingAttribute { attribute: "sh_labels", found: 0, .. })
        ));

        let plain = OtherLayout {
            has_sh_index: false,
            ..layout
        };
        let res = encode_other_buffer(&rotations, &scales[..1], None, plain);
        assert!(matches!(
            res,
            Err(SplatsError::MissingAttribute { attribute: "scales", .. })
        ));
    }

    // ==================== Reports ====================

    #[test]
    fn test_size_report() {
        let asset = SplatAsset::assemble(1, test_bounds(), medium_formats(), test_buffers());
        let report = asset.size_report();
        assert_eq!(report.total_bytes(), 64 + 8 + 8 + 16 + 32);
        assert_eq!(report.input_bytes, 248);
        assert!((report.ratio() - 248.0 / 128.0).abs() < 1e-9);
        assert!(report.to_string().contains("total:  128 B"));
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let asset = SplatAsset::assemble(1, test_bounds(), medium_formats(), test_buffers());
        let written = asset.write_to_dir(dir.path(), "cloud").unwrap();

        assert_eq!(written.len(), 6);
        assert_eq!(std::fs::read(dir.path().join("cloud_chk.bytes")).unwrap(), vec![1; 64]);
        assert_eq!(std::fs::read(dir.path().join("cloud_shs.bytes")).unwrap(), vec![5; 32]);

        let text = std::fs::read_to_string(dir.path().join("cloud.json")).unwrap();
        let manifest: AssetManifest = serde_json::from_str(&text).unwrap();
        assert_eq!(manifest.splat_count, 1);
        assert_eq!(manifest.data_hash, asset.hash_hex());
        assert_eq!(manifest.formats, medium_formats());
        assert_eq!(manifest.files[0], "cloud_chk.bytes");
        assert_eq!((manifest.color_width, manifest.color_height), (2048, 16));
    }

    #[test]
    fn test_write_unchunked_skips_chunk_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffers = test_buffers();
        buffers.chunk_data = None;
        let asset = SplatAsset::assemble(1, test_bounds(), medium_formats(), buffers);
        let written = asset.write_to_dir(dir.path(), "plain").unwrap();
        assert_eq!(written.len(), 5);
        assert!(!dir.path().join("plain_chk.bytes").exists());
    }
}
