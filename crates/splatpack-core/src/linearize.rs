//! Conversion from stored (training) domains to linear, renderer-ready values
//!
//! - rotation: normalized, w-first storage swizzled to (x, y, z, w)
//! - scale: exponentiated out of log space
//! - opacity: logistic sigmoid
//! - base color: SH band 0 mapped to RGB
//!
//! When the data will be chunk-quantized, scale gets an extra `x^(1/8)` and
//! opacity the square-centered remap, both to spread values more evenly over
//! the quantization range. Undoing those is the renderer's job.

use crate::GaussianCloud;
use glam::{Vec3, Vec4, Vec4Swizzles};
use rayon::prelude::*;

/// Normalization constant of SH band 0
pub const SH_C0: f32 = 0.2820948;

const GRAIN: usize = 4096;

#[inline]
pub fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Inverse of [`sigmoid`]
#[inline]
pub fn inverse_sigmoid(v: f32) -> f32 {
    (v / (1.0 - v)).ln()
}

#[inline]
pub fn sh0_to_color(dc0: Vec3) -> Vec3 {
    dc0 * SH_C0 + Vec3::splat(0.5)
}

#[inline]
pub fn color_to_sh0(rgb: Vec3) -> Vec3 {
    (rgb - Vec3::splat(0.5)) / SH_C0
}

#[inline]
pub fn linear_scale(log_scale: Vec3) -> Vec3 {
    Vec3::new(log_scale.x.exp(), log_scale.y.exp(), log_scale.z.exp()).abs()
}

/// Pre-whitening applied to linear scales before chunk quantization
#[inline]
pub fn whiten_scale(scale: Vec3) -> Vec3 {
    Vec3::new(scale.x.powf(0.125), scale.y.powf(0.125), scale.z.powf(0.125))
}

/// Remap [0, 1] around 0.5, expanding the ends and compressing the middle
#[inline]
pub fn square_centered01(x: f32) -> f32 {
    let x = x - 0.5;
    let x = x * x.abs();
    x * 2.0 + 0.5
}

/// Inverse of [`square_centered01`]
#[inline]
pub fn inv_square_centered01(x: f32) -> f32 {
    let x = (x - 0.5) * 0.5;
    let x = x.abs().sqrt().copysign(x);
    x + 0.5
}

/// Normalize a (w, x, y, z) quaternion and return it as (x, y, z, w).
/// A zero quaternion becomes the identity.
#[inline]
pub fn normalize_swizzle_rotation(wxyz: Vec4) -> Vec4 {
    wxyz.try_normalize().unwrap_or(Vec4::X).yzwx()
}

/// Which quantization-friendly remaps to apply on top of linearization
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinearizeOptions {
    /// Apply `x^(1/8)` to linear scales
    pub whiten_scale: bool,
    /// Apply [`square_centered01`] to opacities
    pub square_centered_opacity: bool,
}

impl LinearizeOptions {
    /// Both remaps on, as used for chunk-quantized output
    pub fn for_chunks() -> Self {
        Self {
            whiten_scale: true,
            square_centered_opacity: true,
        }
    }
}

/// Linearize every splat of `cloud` in place.
///
/// SH rest coefficients are left untouched.
pub fn linearize(cloud: &mut GaussianCloud, options: LinearizeOptions) {
    cloud
        .rotations
        .par_iter_mut()
        .with_min_len(GRAIN)
        .for_each(|r| *r = normalize_swizzle_rotation(*r));

    cloud.scales.par_iter_mut().with_min_len(GRAIN).for_each(|s| {
        let linear = linear_scale(*s);
        *s = if options.whiten_scale { whiten_scale(linear) } else { linear };
    });

    cloud.opacities.par_iter_mut().with_min_len(GRAIN).for_each(|o| {
        let linear = sigmoid(*o);
        *o = if options.square_centered_opacity {
            square_centered01(linear)
        } else {
            linear
        };
    });

    cloud
        .colors
        .par_iter_mut()
        .with_min_len(GRAIN)
        .for_each(|c| *c = sh0_to_color(*c));
}
