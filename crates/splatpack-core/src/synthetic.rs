//! Deterministic synthetic splat clouds for testing and benchmarking
//!
//! Output is in stored domain (log scale, logit opacity, w-first rotation),
//! exactly like a decoded record body, so it can go through the full
//! pipeline.

use crate::linearize::inverse_sigmoid;
use crate::{GaussianCloud, Splat};
use glam::{Vec2, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use std::str::FromStr;

/// Spatial layout of generated splats
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyntheticKind {
    #[default]
    RandomInsideSphere,
    RandomInsideBox,
    /// Regular grid, filled x first, then y, then z
    OrderedInsideBox,
}

impl FromStr for SyntheticKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random-inside-sphere" => Ok(Self::RandomInsideSphere),
            "random-inside-box" => Ok(Self::RandomInsideBox),
            "ordered-inside-box" => Ok(Self::OrderedInsideBox),
            other => Err(format!("unknown synthetic kind: {}", other)),
        }
    }
}

/// Generator parameters
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticParams {
    pub count: usize,
    pub kind: SyntheticKind,
    /// Half extent of the generated volume per axis
    pub pos_range: Vec3,
    /// Linear scale range
    pub scale_range: Vec2,
    /// Linear opacity range
    pub opacity_range: Vec2,
    /// 0 gives independent per-axis scales, 1 gives spheres
    pub scale_uniformness: f32,
    pub seed: u64,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            count: 10_000,
            kind: SyntheticKind::RandomInsideSphere,
            pos_range: Vec3::new(100.0, 50.0, 100.0),
            scale_range: Vec2::new(0.01, 3.0),
            opacity_range: Vec2::new(0.1, 1.0),
            scale_uniformness: 0.7,
            seed: 1,
        }
    }
}

/// Base color of every generated splat (SH band 0)
pub const SYNTHETIC_DC0: Vec3 = Vec3::new(2.0, 1.0, 0.5);

fn random_inside_unit_sphere(rng: &mut StdRng) -> Vec3 {
    loop {
        let p = Vec3::new(
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
        );
        if p.length_squared() <= 1.0 {
            return p;
        }
    }
}

/// Uniformly distributed unit quaternion (Shoemake), as (x, y, z, w)
fn random_rotation(rng: &mut StdRng) -> Vec4 {
    let u1: f32 = rng.gen();
    let u2: f32 = rng.gen();
    let u3: f32 = rng.gen();
    let a = (1.0 - u1).sqrt();
    let b = u1.sqrt();
    Vec4::new(
        a * (TAU * u2).sin(),
        a * (TAU * u2).cos(),
        b * (TAU * u3).sin(),
        b * (TAU * u3).cos(),
    )
}

/// Grid side length for `count` ordered splats
fn grid_side(count: usize) -> usize {
    ((count as f64).cbrt().ceil() as usize).max(2)
}

fn ordered_position(index: usize, side: usize) -> Vec3 {
    let coord = |i: usize| (i % side) as f32 * 2.0 / (side - 1) as f32 - 1.0;
    Vec3::new(
        coord(index),
        coord(index / side),
        coord(index / side / side),
    )
}

/// Generate a cloud. Same parameters always give the same cloud.
pub fn generate(params: &SyntheticParams) -> GaussianCloud {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let side = grid_side(params.count);
    let (scale_lo, scale_hi) = (params.scale_range.x, params.scale_range.y);
    let (opacity_lo, opacity_hi) = (params.opacity_range.x, params.opacity_range.y);

    let mut cloud = GaussianCloud::with_capacity(params.count);
    for i in 0..params.count {
        let unit = match params.kind {
            SyntheticKind::RandomInsideSphere => random_inside_unit_sphere(&mut rng),
            SyntheticKind::RandomInsideBox => Vec3::new(
                rng.gen_range(-1.0..=1.0),
                rng.gen_range(-1.0..=1.0),
                rng.gen_range(-1.0..=1.0),
            ),
            SyntheticKind::OrderedInsideBox => ordered_position(i, side),
        };
        let mut position = unit * params.pos_range;
        position.z = -position.z;

        // mirrored around z, then stored w first
        let q = random_rotation(&mut rng);
        let rotation = Vec4::new(q.w, -q.x, -q.y, q.z);

        let uniform = rng.gen_range(scale_lo..=scale_hi);
        let per_axis = Vec3::new(
            rng.gen_range(scale_lo..=scale_hi),
            rng.gen_range(scale_lo..=scale_hi),
            rng.gen_range(scale_lo..=scale_hi),
        );
        let scale = per_axis.lerp(Vec3::splat(uniform), params.scale_uniformness);
        let log_scale = Vec3::new(scale.x.ln(), scale.y.ln(), scale.z.ln());

        let opacity = rng.gen_range(opacity_lo..=opacity_hi).min(0.9999);

        cloud.push(Splat {
            position,
            scale: log_scale,
            rotation,
            opacity: inverse_sigmoid(opacity),
            color: SYNTHETIC_DC0,
            ..Splat::default()
        });
    }
    cloud
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linearize::{linear_scale, sigmoid};

    fn params(kind: SyntheticKind, count: usize) -> SyntheticParams {
        SyntheticParams {
            count,
            kind,
            ..SyntheticParams::default()
        }
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("ordered-inside-box".parse::<SyntheticKind>(), Ok(SyntheticKind::OrderedInsideBox));
        assert_eq!("random-inside-sphere".parse::<SyntheticKind>(), Ok(SyntheticKind::RandomInsideSphere));
        assert!("cube".parse::<SyntheticKind>().is_err());
    }

    #[test]
    fn test_generate_count_and_validity() {
        for kind in [
            SyntheticKind::RandomInsideSphere,
            SyntheticKind::RandomInsideBox,
            SyntheticKind::OrderedInsideBox,
        ] {
            let cloud = generate(&params(kind, 500));
            assert_eq!(cloud.count, 500);
            assert!(cloud.validate().is_ok());
            for i in 0..cloud.count {
                let p = cloud.positions[i];
                assert!(p.x.abs() <= 100.0 && p.y.abs() <= 50.0 && p.z.abs() <= 100.0);
                assert!((cloud.rotations[i].length() - 1.0).abs() < 1e-4);

                let o = sigmoid(cloud.opacities[i]);
                assert!((0.099..=1.0).contains(&o));

                let s = linear_scale(cloud.scales[i]);
                assert!(s.min_element() >= 0.0099 && s.max_element() <= 3.001);
                assert_eq!(cloud.colors[i], SYNTHETIC_DC0);
            }
        }
    }

    #[test]
    fn test_sphere_points_inside_ellipsoid() {
        let cloud = generate(&params(SyntheticKind::RandomInsideSphere, 300));
        let range = SyntheticParams::default().pos_range;
        assert!(cloud
            .positions
            .iter()
            .all(|p| (*p / range).length_squared() <= 1.0 + 1e-5));
    }

    #[test]
    fn test_ordered_grid() {
        assert_eq!(grid_side(10_000), 22);
        assert_eq!(grid_side(1), 2);
        assert_eq!(grid_side(8), 2);

        let cloud = generate(&params(SyntheticKind::OrderedInsideBox, 8));
        // corners of the box, x varies fastest, z is flipped
        assert_eq!(cloud.positions[0], Vec3::new(-100.0, -50.0, 100.0));
        assert_eq!(cloud.positions[1], Vec3::new(100.0, -50.0, 100.0));
        assert_eq!(cloud.positions[7], Vec3::new(100.0, 50.0, -100.0));
    }

    #[test]
    fn test_generate_is_deterministic() {
        let a = generate(&params(SyntheticKind::RandomInsideBox, 200));
        let b = generate(&params(SyntheticKind::RandomInsideBox, 200));
        assert_eq!(a.positions, b.positions);
        assert_eq!(a.rotations, b.rotations);
        assert_eq!(a.scales, b.scales);

        let c = generate(&SyntheticParams {
            seed: 2,
            ..params(SyntheticKind::RandomInsideBox, 200)
        });
        assert_ne!(a.positions, c.positions);
    }
}
