//! 3DGS scene initialization.

pub use super::*;

use super::neighbor::mean_distances_to_nearest;
use crate::spherical_harmonics::rgb_to_sh;
use burn::config::Config;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f64::consts::PI;

/// The neighbor count for initial scalings.
pub const NEIGHBOR_COUNT: usize = 3;

#[derive(Config, Debug)]
pub struct Gaussian3dSceneConfig {
    /// It should be no more than [`SH_DEGREE_MAX`].
    #[config(default = "SH_DEGREE_MAX")]
    pub colors_sh_degree: u32,

    /// Initial opacity in the range of `(0.0, 1.0)`.
    #[config(default = "0.1")]
    pub opacity: f64,

    /// Sampling positions in the bounds even if seed points exist.
    #[config(default = "false")]
    pub random_init: bool,

    /// The point count of random sampling.
    #[config(default = "10000")]
    pub random_point_count: usize,

    #[config(default = "42")]
    pub seed: u64,
}

impl Gaussian3dSceneConfig {
    /// Initializing the scene.
    ///
    /// The positions are `seeds` unless it is empty or [`Self::random_init`] is set,
    /// otherwise they are sampled uniformly in `bounds`.
    /// If `bounds` is not given, the bounds of `seeds` are used.
    pub fn init<B: Backend>(
        &self,
        seeds: Option<&SeedPoints>,
        bounds: Option<&Bounds>,
        device: &B::Device,
    ) -> Result<Gaussian3dScene<B>, Error> {
        self.validate()?;
        if let Some(seeds) = seeds {
            seeds.validate()?;
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let seeds_given = seeds;
        let seeds = seeds.filter(|seeds| !seeds.is_empty() && !self.random_init);

        // [P, 3]
        let positions = match seeds {
            Some(seeds) => seeds.positions.to_owned(),
            None => {
                let bounds = bounds
                    .copied()
                    .or_else(|| Bounds::from_positions(&seeds_given?.positions))
                    .ok_or(Error::MissingInitialPoints)?;
                let center = bounds.center();
                let size = bounds.size();
                (0..self.random_point_count)
                    .map(|_| {
                        [0, 1, 2].map(|i| {
                            (rng.gen::<f64>() - 0.5) * size[i] + center[i]
                        })
                    })
                    .collect()
            },
        };

        // P
        let point_count = positions.len();
        let rest_count = sh_count(self.colors_sh_degree) - 1;

        // [P, 3]
        let colors_sh_dc = match seeds.filter(|seeds| seeds.has_colors()) {
            Some(seeds) if self.colors_sh_degree > 0 => seeds
                .colors_rgb
                .iter()
                .flatten()
                .map(|&c| rgb_to_sh(c) as f32)
                .collect::<Vec<_>>(),
            Some(seeds) => seeds
                .colors_rgb
                .iter()
                .flatten()
                .map(|&c| {
                    let c = c.clamp(1e-10, 1.0 - 1e-10);
                    (c / (1.0 - c)).ln() as f32
                })
                .collect::<Vec<_>>(),
            None => (0..point_count * 3).map(|_| rng.gen::<f32>()).collect(),
        };

        // [P, 1]
        let opacities = vec![(self.opacity / (1.0 - self.opacity)).ln() as f32; point_count];

        // [P, 4]
        let rotations = (0..point_count)
            .flat_map(|_| {
                let (u, v, w) = (rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>());
                [
                    (1.0 - u).sqrt() * (2.0 * PI * v).sin(),
                    (1.0 - u).sqrt() * (2.0 * PI * v).cos(),
                    u.sqrt() * (2.0 * PI * w).sin(),
                    u.sqrt() * (2.0 * PI * w).cos(),
                ]
                .map(|r| r as f32)
            })
            .collect::<Vec<_>>();

        // [P, 3]
        let scalings = mean_distances_to_nearest(&positions, NEIGHBOR_COUNT)
            .into_iter()
            .flat_map(|distance| [distance.ln() as f32; 3])
            .collect::<Vec<_>>();

        let positions = positions
            .into_iter()
            .flatten()
            .map(|p| p as f32)
            .collect::<Vec<_>>();

        let points = Gaussian3dPoints {
            colors_sh_dc: Tensor::from_data(
                TensorData::new(colors_sh_dc, [point_count, 3]),
                device,
            ),
            colors_sh_rest: Tensor::zeros([point_count, rest_count, 3], device),
            opacities: Tensor::from_data(
                TensorData::new(opacities, [point_count, 1]),
                device,
            ),
            positions: Tensor::from_data(
                TensorData::new(positions, [point_count, 3]),
                device,
            ),
            rotations: Tensor::from_data(
                TensorData::new(rotations, [point_count, 4]),
                device,
            ),
            scalings: Tensor::from_data(
                TensorData::new(scalings, [point_count, 3]),
                device,
            ),
        };

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "gausplat::trainer::gaussian_3d::scene",
            "init > point_count ({point_count}) from {}",
            if seeds.is_some() { "seeds" } else { "bounds" },
        );

        Gaussian3dScene::from_inner_points(points)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.colors_sh_degree > SH_DEGREE_MAX {
            return Err(Error::Validation(
                format!("colors_sh_degree ({})", self.colors_sh_degree),
                format!("no more than {SH_DEGREE_MAX}"),
            ));
        }
        if !(self.opacity > 0.0 && self.opacity < 1.0) {
            return Err(Error::Validation(
                format!("opacity ({})", self.opacity),
                "in the range of (0.0, 1.0)".into(),
            ));
        }
        Ok(())
    }
}
