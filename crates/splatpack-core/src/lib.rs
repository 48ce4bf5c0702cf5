//! splatpack core - offline Gaussian splat compression
//!
//! This library turns a decoded splat cloud into a compact render asset:
//! - Morton-order spatial reordering
//! - Linearization of stored quantities (log scale, logit opacity, SH0)
//! - Per-chunk bounds quantization and fixed-width vector encoding
//! - Color texture with 16x16 Morton tiling
//! - Optional SH codebook compression with mini-batch k-means
//! - Asset assembly with a 128-bit content hash

pub mod asset;
pub mod chunk;
pub mod color;
pub mod config;
pub mod distance;
pub mod encode;
pub mod kmeans;
pub mod linearize;
pub mod records;
pub mod reorder;
pub mod sh;
pub mod synthetic;

pub use asset::{AssetBuffers, AssetFormats, AssetManifest, SizeReport, SplatAsset};
pub use color::{ColorFormat, TextureCompressor};
pub use config::{CompressionConfig, Quality};
pub use encode::VectorFormat;
pub use reorder::Bounds;
pub use sh::SHFormat;
pub use synthetic::{SyntheticKind, SyntheticParams};

use glam::{Vec3, Vec4};
use log::{debug, info, warn};
use std::time::Instant;
use thiserror::Error;

/// Errors that can occur during splat processing
#[derive(Error, Debug)]
pub enum SplatsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record stride is {found} bytes, expected {expected}")]
    RecordStride { expected: usize, found: usize },

    #[error("{declared} records need {expected_bytes} bytes, body has {found_bytes}")]
    RecordCount {
        declared: usize,
        expected_bytes: usize,
        found_bytes: usize,
    },

    #[error("Attribute {attribute} has {found} entries, expected {expected}")]
    MissingAttribute {
        attribute: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Nothing to compress: cloud has no splats")]
    EmptyCloud,

    #[error("Too many splats: {count} exceeds limit of {limit}")]
    TooManySplats { count: usize, limit: usize },

    #[error("K-means error: {0}")]
    KMeans(String),

    #[error("Block compressed color requested without a texture compressor")]
    MissingTextureCompressor,

    #[error("Texture compressor returned {found} bytes, expected {expected}")]
    CompressedSize { expected: usize, found: usize },

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("Operation was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SplatsError>;

/// Result of an operation that can be cancelled through its progress callback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// The value, or `None` if cancelled
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            Outcome::Cancelled => None,
        }
    }

    /// The value, or [`SplatsError::Cancelled`] for callers that never cancel
    pub fn into_result(self) -> Result<T> {
        match self {
            Outcome::Completed(v) => Ok(v),
            Outcome::Cancelled => Err(SplatsError::Cancelled),
        }
    }
}

/// One splat in stored domain
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Splat {
    pub position: Vec3,
    /// Log scale
    pub scale: Vec3,
    /// Quaternion, w first
    pub rotation: Vec4,
    /// Logit opacity
    pub opacity: f32,
    /// SH band 0 (base color)
    pub color: Vec3,
    /// SH bands 1-3
    pub sh_rest: [Vec3; 15],
}

/// A collection of 3D Gaussian splats
///
/// Attributes are parallel arrays; index `i` refers to the same splat in
/// every array. Values start in stored domain and are rewritten in place by
/// the pipeline stages.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GaussianCloud {
    /// Number of Gaussians
    pub count: usize,
    /// Gaussian centers (x, y, z)
    pub positions: Vec<Vec3>,
    /// Anisotropic scales
    pub scales: Vec<Vec3>,
    /// Rotation quaternions, (w, x, y, z) until linearized, then (x, y, z, w)
    pub rotations: Vec<Vec4>,
    /// Opacity values
    pub opacities: Vec<f32>,
    /// Base color: SH band 0 until linearized, then RGB
    pub colors: Vec<Vec3>,
    /// Higher-order SH, 15 RGB vectors per Gaussian
    pub sh_rest: Vec<[Vec3; 15]>,
}

impl GaussianCloud {
    /// Create a new empty GaussianCloud with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            count: 0,
            positions: Vec::with_capacity(capacity),
            scales: Vec::with_capacity(capacity),
            rotations: Vec::with_capacity(capacity),
            opacities: Vec::with_capacity(capacity),
            colors: Vec::with_capacity(capacity),
            sh_rest: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, splat: Splat) {
        self.positions.push(splat.position);
        self.scales.push(splat.scale);
        self.rotations.push(splat.rotation);
        self.opacities.push(splat.opacity);
        self.colors.push(splat.color);
        self.sh_rest.push(splat.sh_rest);
        self.count += 1;
    }

    /// Copy out splat `index`
    pub fn splat(&self, index: usize) -> Splat {
        Splat {
            position: self.positions[index],
            scale: self.scales[index],
            rotation: self.rotations[index],
            opacity: self.opacities[index],
            color: self.colors[index],
            sh_rest: self.sh_rest[index],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Check every attribute array holds exactly `count` entries
    pub fn validate(&self) -> Result<()> {
        let lengths = [
            ("positions", self.positions.len()),
            ("scales", self.scales.len()),
            ("rotations", self.rotations.len()),
            ("opacities", self.opacities.len()),
            ("colors", self.colors.len()),
            ("sh_rest", self.sh_rest.len()),
        ];
        for (attribute, found) in lengths {
            if found != self.count {
                return Err(SplatsError::MissingAttribute {
                    attribute,
                    expected: self.count,
                    found,
                });
            }
        }
        Ok(())
    }
}

impl FromIterator<Splat> for GaussianCloud {
    fn from_iter<I: IntoIterator<Item = Splat>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut cloud = GaussianCloud::with_capacity(iter.size_hint().0);
        for splat in iter {
            cloud.push(splat);
        }
        cloud
    }
}

/// Progress callback: receives a fraction in [0, 1], returns `false` to cancel
pub type Progress<'a> = &'a mut (dyn FnMut(f32) -> bool + Send);

/// Main compression function
///
/// Runs the full pipeline without progress reporting. Block compressed
/// color needs [`compress_with_progress`] and a [`TextureCompressor`].
///
/// # Arguments
/// * `cloud` - Decoded splats in stored domain
/// * `config` - Formats, seed and thread count
///
/// # Returns
/// The assembled asset
pub fn compress(cloud: GaussianCloud, config: &CompressionConfig) -> Result<SplatAsset> {
    compress_with_progress(cloud, config, None, &mut |_| true)?.into_result()
}

/// Compression with progress reporting and cancellation
///
/// Every stage runs inside a thread pool built for this call. `progress` is
/// polled between stages and between clustering batches; when it returns
/// `false` the run stops and no asset is produced.
pub fn compress_with_progress(
    cloud: GaussianCloud,
    config: &CompressionConfig,
    compressor: Option<&dyn TextureCompressor>,
    progress: Progress<'_>,
) -> Result<Outcome<SplatAsset>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads.unwrap_or(0))
        .build()
        .map_err(|e| SplatsError::ThreadPool(e.to_string()))?;

    pool.install(|| run_pipeline(cloud, config, compressor, progress))
}

fn run_pipeline(
    mut cloud: GaussianCloud,
    config: &CompressionConfig,
    compressor: Option<&dyn TextureCompressor>,
    progress: Progress<'_>,
) -> Result<Outcome<SplatAsset>> {
    cloud.validate()?;
    if cloud.is_empty() {
        return Err(SplatsError::EmptyCloud);
    }
    if cloud.count > asset::MAX_SPLATS {
        return Err(SplatsError::TooManySplats {
            count: cloud.count,
            limit: asset::MAX_SPLATS,
        });
    }

    let start = Instant::now();
    info!(
        "Compressing {} splats: pos {:?}, scale {:?}, color {:?}, sh {:?}",
        cloud.count, config.pos_format, config.scale_format, config.color_format, config.sh_format
    );

    if !progress(0.0) {
        return Ok(Outcome::Cancelled);
    }
    let bounds = reorder::calc_bounds(&cloud.positions);
    debug!("Bounds {} .. {}", bounds.min, bounds.max);

    if !progress(0.05) {
        return Ok(Outcome::Cancelled);
    }
    reorder::reorder_morton(&mut cloud, &bounds);
    debug!("Morton reorder done at {:.2?}", start.elapsed());

    // clustering works on the raw SH, before chunk normalization
    let mut sh_format = config.sh_format;
    let mut codebook = None;
    if let Some(k) = config.sh_format.cluster_count() {
        if k < cloud.count {
            if !progress(0.2) {
                return Ok(Outcome::Cancelled);
            }
            let mut cluster_progress = |v: f32| progress(0.2 + v * 0.5);
            match sh::cluster_shs(
                &cloud.sh_rest,
                k,
                sh_format.passes_over_data(),
                config.seed,
                &mut cluster_progress,
            )? {
                Outcome::Completed(book) => codebook = Some(book),
                Outcome::Cancelled => return Ok(Outcome::Cancelled),
            }
        } else {
            warn!(
                "SH codebook of {} entries is not smaller than {} splats, storing SH per splat as {:?}",
                k,
                cloud.count,
                SHFormat::Float16
            );
            sh_format = SHFormat::Float16;
        }
    }

    if !progress(0.7) {
        return Ok(Outcome::Cancelled);
    }
    let uses_chunks = config.uses_chunks();
    let options = if uses_chunks {
        linearize::LinearizeOptions::for_chunks()
    } else {
        linearize::LinearizeOptions::default()
    };
    linearize::linearize(&mut cloud, options);
    let chunks = uses_chunks.then(|| chunk::quantize_chunks(&mut cloud));
    debug!("Linearize and chunking done at {:.2?}", start.elapsed());

    if !progress(0.8) {
        return Ok(Outcome::Cancelled);
    }
    let other_layout = encode::OtherLayout {
        scale_format: config.scale_format,
        has_sh_index: codebook.is_some(),
    };
    let sh_labels = codebook.as_ref().map(|book| book.labels.as_slice());
    let buffers = AssetBuffers {
        chunk_data: chunks.as_deref().map(chunk::encode_chunk_table),
        pos_data: asset::encode_vector_buffer(&cloud.positions, config.pos_format),
        other_data: asset::encode_other_buffer(
            &cloud.rotations,
            &cloud.scales,
            sh_labels,
            other_layout,
        )?,
        color_data: color::encode_color_texture(
            &cloud.colors,
            &cloud.opacities,
            config.color_format,
            compressor,
        )?,
        sh_data: match &codebook {
            Some(book) => book.encode(),
            None => sh::encode_sh_rows(&cloud.sh_rest, sh_format),
        },
    };
    debug!("Encoding done at {:.2?}", start.elapsed());

    let formats = AssetFormats {
        pos_format: config.pos_format,
        scale_format: config.scale_format,
        color_format: config.color_format,
        sh_format,
    };
    let asset = SplatAsset::assemble(cloud.count, bounds, formats, buffers);
    info!(
        "Compressed {} splats into {} bytes in {:.2?}, hash {}",
        asset.splat_count,
        asset.size_report().total_bytes(),
        start.elapsed(),
        asset.hash_hex()
    );

    Ok(Outcome::Completed(asset))
}
