//! Differentiable tile rasterization of 3D Gaussians.

pub use super::*;

use super::project::{project, Projection, DEPTH_NEAR};
use crate::function::TensorFloatExtension;
use burn::tensor::ElementConversion;
use rayon::slice::ParallelSliceMut;
use std::ops::Range;

/// The maximum alpha of a point at a pixel.
pub const ALPHA_MAX: f64 = 0.99;

/// The minimum alpha of a point at a pixel to contribute.
pub const ALPHA_MIN: f64 = 1.0 / 255.0;

/// The depth of pixels when no point is visible.
pub const DEPTH_EMPTY: f64 = 10.0;

/// `T_x` and `T_y`
pub const TILE_SIZE: u32 = 16;

/// The default renderer in tensor operations.
///
/// The points are binned into tiles on the host, sorted by depth,
/// and composited front to back per tile.
#[derive(Clone, Copy, Debug, Default)]
pub struct Gaussian3dRasterizer;

/// The points overlapping each tile, sorted by depth.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TileBins {
    /// `[N]`, the point indices sorted by tile and depth.
    pub point_indices: Vec<i32>,
    /// `[P]`
    pub radii: Vec<i32>,
    /// `[T_c]`, the ranges of [`Self::point_indices`] for each tile.
    pub tile_point_ranges: Vec<Range<usize>>,
    /// `(I_x / T_x, I_y / T_y)`
    pub tile_count: (u32, u32),
    pub visible_count: usize,
}

impl<B: Backend> Gaussian3dRenderer<B> for Gaussian3dRasterizer {
    fn render(
        &self,
        scene: &Gaussian3dScene<B>,
        view: &View,
        options: &Gaussian3dRenderOptions,
    ) -> Result<Gaussian3dRenderOutput<B>, Error> {
        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(target: "gausplat::trainer::gaussian_3d::render", "start");

        view.validate()?;
        options.validate()?;

        let device = scene.device();
        // P
        let point_count = scene.point_count();
        // I_x
        let image_size_x = view.image_width as usize;
        // I_y
        let image_size_y = view.image_height as usize;

        // [3]
        let background_rgb = Tensor::<B, 1>::from_floats(
            options.background_rgb.map(|c| c as f32),
            &device,
        );
        // [P, 2]
        let positions_2d_grad_ref =
            Tensor::<B, 2>::zeros([point_count, 2], &device).require_grad();

        let projection =
            project(scene, view, options, positions_2d_grad_ref.to_owned());
        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(target: "gausplat::trainer::gaussian_3d::render", "project");

        // [P, 6] <- (u, v, z, a, b, c)
        let values = into_host(Tensor::cat(
            vec![
                projection.positions_2d.to_owned(),
                projection.depths.to_owned(),
                projection.covariances_2d.to_owned(),
            ],
            1,
        ))?;
        let bins = TileBins::new(&values, view.image_width, view.image_height);
        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(target: "gausplat::trainer::gaussian_3d::render", "bin");

        // [P]
        let radii = Tensor::<B, 1, Int>::from_data(
            TensorData::new(bins.radii.to_owned(), [point_count]),
            &device,
        );
        // [P]
        let depths = projection.depths.to_owned().reshape([point_count]);

        if bins.point_indices.is_empty() {
            return Ok(Gaussian3dRenderOutput {
                alphas_2d: Tensor::zeros([image_size_y, image_size_x, 1], &device),
                colors_rgb_2d: background_rgb
                    .reshape([1, 1, 3])
                    .repeat_dim(0, image_size_y)
                    .repeat_dim(1, image_size_x),
                depths,
                depths_2d: options.is_depth_required.then(|| {
                    Tensor::full([image_size_y, image_size_x, 1], DEPTH_EMPTY, &device)
                }),
                positions_2d: projection.positions_2d,
                positions_2d_grad_ref,
                radii,
                visible_count: bins.visible_count,
            });
        }

        // [1, 3]
        let background_rgb = background_rgb.reshape([1, 3]);
        let (tile_count_x, tile_count_y) = bins.tile_count;
        let tile_size = TILE_SIZE as usize;

        // [I_y, I_x, 3 + 1 + 1]
        let tiles_2d = Tensor::cat(
            (0..tile_count_y as usize)
                .map(|tile_y| {
                    Tensor::cat(
                        (0..tile_count_x as usize)
                            .map(|tile_x| {
                                let pixels_x = tile_x * tile_size
                                    ..((tile_x + 1) * tile_size).min(image_size_x);
                                let pixels_y = tile_y * tile_size
                                    ..((tile_y + 1) * tile_size).min(image_size_y);
                                let range = bins.tile_point_ranges
                                    [tile_y * tile_count_x as usize + tile_x]
                                    .to_owned();

                                composite_tile(
                                    &projection,
                                    &bins.point_indices[range],
                                    background_rgb.to_owned(),
                                    pixels_x,
                                    pixels_y,
                                )
                            })
                            .collect(),
                        1,
                    )
                })
                .collect(),
            0,
        );
        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(target: "gausplat::trainer::gaussian_3d::render", "rasterize");

        let tile_slice = |range: Range<usize>| {
            tiles_2d
                .to_owned()
                .slice([0..image_size_y, 0..image_size_x, range])
        };

        // [I_y, I_x, 3]
        let colors_rgb_2d = tile_slice(0..3).clamp_max(1.0);
        // [I_y, I_x, 1]
        let alphas_2d = tile_slice(3..4);
        // [I_y, I_x, 1]
        let depths_2d = match options.is_depth_required {
            true => {
                let depths_2d =
                    tile_slice(4..5) / alphas_2d.to_owned().clamp_min(f32::EPSILON as f64);
                let depth_max = depths_2d
                    .to_owned()
                    .detach()
                    .max()
                    .into_scalar()
                    .elem::<f64>();
                Some(depths_2d.mask_fill(alphas_2d.to_owned().lower_equal_elem(0.0), depth_max))
            },
            false => None,
        };

        Ok(Gaussian3dRenderOutput {
            alphas_2d,
            colors_rgb_2d,
            depths,
            depths_2d,
            positions_2d: projection.positions_2d,
            positions_2d_grad_ref,
            radii,
            visible_count: bins.visible_count,
        })
    }
}

impl TileBins {
    /// Binning the points into the tiles they overlap.
    ///
    /// ## Arguments
    ///
    /// * `values` - `[P, 6]`, `(u, v, z, a, b, c)` of each point,
    ///   where `(a, b, c)` is the blurred 2D covariance.
    pub fn new(
        values: &[f32],
        image_size_x: u32,
        image_size_y: u32,
    ) -> Self {
        let tile_count_x = image_size_x.div_ceil(TILE_SIZE);
        let tile_count_y = image_size_y.div_ceil(TILE_SIZE);
        let tile_size = TILE_SIZE as f32;

        // [P, 4] <- (x_min, x_max, y_min, y_max) of the touched tiles
        let mut radii = Vec::with_capacity(values.len() / 6);
        let mut tiles_touched = Vec::with_capacity(values.len() / 6);
        values.chunks_exact(6).for_each(|value| {
            let (u, v, z) = (value[0], value[1], value[2]);
            let (a, b, c) = (value[3], value[4], value[5]);
            let determinant = a * c - b * b;
            let is_valid = z > DEPTH_NEAR as f32
                && determinant > 0.0
                && u.is_finite()
                && v.is_finite();
            if !is_valid {
                radii.push(0);
                tiles_touched.push([0; 4]);
                return;
            }

            // λ_max of the covariance
            let middle = 0.5 * (a + c);
            let eigenvalue_max =
                middle + (middle * middle - determinant).max(0.1).sqrt();
            let radius = (3.0 * eigenvalue_max.sqrt()).ceil();

            let bound = |value: f32, count: u32| value.clamp(0.0, count as f32) as u32;
            let touched = [
                bound(((u - radius) / tile_size).floor(), tile_count_x),
                bound(((u + radius + tile_size - 1.0) / tile_size).floor(), tile_count_x),
                bound(((v - radius) / tile_size).floor(), tile_count_y),
                bound(((v + radius + tile_size - 1.0) / tile_size).floor(), tile_count_y),
            ];
            if touched[0] >= touched[1] || touched[2] >= touched[3] {
                radii.push(0);
                tiles_touched.push([0; 4]);
                return;
            }

            radii.push(radius as i32);
            tiles_touched.push(touched);
        });

        // [N] <- ((tile << 32) | depth, point)
        let mut orders = tiles_touched
            .iter()
            .zip(values.chunks_exact(6))
            .enumerate()
            .flat_map(|(point, (&[x_min, x_max, y_min, y_max], value))| {
                let depth = bytemuck::cast::<f32, u32>(value[2]) as u64;
                (y_min..y_max).flat_map(move |tile_y| {
                    (x_min..x_max).map(move |tile_x| {
                        let tile = (tile_y * tile_count_x + tile_x) as u64;
                        ((tile << 32) | depth, point as i32)
                    })
                })
            })
            .collect::<Vec<_>>();
        orders.par_sort_unstable();

        let tile_count = (tile_count_x * tile_count_y) as usize;
        let mut tile_point_ranges = vec![0..0; tile_count];
        let mut start = 0;
        while start < orders.len() {
            let tile = orders[start].0 >> 32;
            let end = start
                + orders[start..]
                    .iter()
                    .take_while(|(key, _)| key >> 32 == tile)
                    .count();
            tile_point_ranges[tile as usize] = start..end;
            start = end;
        }

        Self {
            point_indices: orders.into_iter().map(|(_, point)| point).collect(),
            visible_count: radii.iter().filter(|&&radius| radius > 0).count(),
            radii,
            tile_point_ranges,
            tile_count: (tile_count_x, tile_count_y),
        }
    }
}

/// Compositing the points in a tile front to back.
///
/// It returns `[T_y, T_x, 3 + 1 + 1]` of colors, alphas and weighted depths.
fn composite_tile<B: Backend>(
    projection: &Projection<B>,
    point_indices: &[i32],
    background_rgb: Tensor<B, 2>,
    pixels_x: Range<usize>,
    pixels_y: Range<usize>,
) -> Tensor<B, 3> {
    let device = background_rgb.device();
    let tile_size_x = pixels_x.len();
    let tile_size_y = pixels_y.len();
    // Q
    let pixel_count = tile_size_x * tile_size_y;
    // R
    let count = point_indices.len();

    if count == 0 {
        return Tensor::cat(
            vec![
                background_rgb.reshape([1, 1, 3]),
                Tensor::zeros([1, 1, 2], &device),
            ],
            2,
        )
        .repeat_dim(0, tile_size_y)
        .repeat_dim(1, tile_size_x);
    }

    // [R]
    let indices = Tensor::<B, 1, Int>::from_data(
        TensorData::new(point_indices.to_vec(), [count]),
        &device,
    );
    // [R, C] -> [1, R] -> [Q, R]
    let row = |tensor: &Tensor<B, 2>, column: usize| {
        tensor
            .to_owned()
            .select(0, indices.to_owned())
            .slice([0..count, column..column + 1])
            .reshape([1, count])
            .repeat_dim(0, pixel_count)
    };

    // [Q, 1] -> [Q, R]
    let (pixel_positions_x, pixel_positions_y): (Vec<f32>, Vec<f32>) = pixels_y
        .flat_map(|y| pixels_x.to_owned().map(move |x| (x as f32 + 0.5, y as f32 + 0.5)))
        .unzip();
    let pixel_positions = |positions: Vec<f32>| {
        Tensor::<B, 2>::from_data(TensorData::new(positions, [pixel_count, 1]), &device)
            .repeat_dim(1, count)
    };

    // [Q, R]
    let offsets_x = row(&projection.positions_2d, 0) - pixel_positions(pixel_positions_x);
    let offsets_y = row(&projection.positions_2d, 1) - pixel_positions(pixel_positions_y);

    // -(d^T * Σ'^-1 * d) / 2
    let powers = (row(&projection.conics, 0) * offsets_x.to_owned().powf_scalar(2.0)
        + row(&projection.conics, 2) * offsets_y.to_owned().powf_scalar(2.0))
        * -0.5
        - row(&projection.conics, 1) * offsets_x * offsets_y;

    // [Q, R]
    let alphas = (row(&projection.opacities_2d, 0) * powers.to_owned().clamp_max(0.0).exp())
        .clamp_max(ALPHA_MAX)
        .mask_fill(powers.greater_elem(0.0), 0.0);
    let alphas = alphas.to_owned().mask_fill(alphas.lower_elem(ALPHA_MIN), 0.0);

    // [Q, R]
    let transmittances = (-alphas.to_owned() + 1.0)
        .log()
        .sum_cumulative_exclusive()
        .exp();
    let weights = alphas * transmittances;

    // [Q, 1]
    let alphas_2d = weights.to_owned().sum_dim(1);
    // [Q, 3]
    let colors_rgb_2d = weights.to_owned().matmul(
        projection.colors_rgb_3d.to_owned().select(0, indices.to_owned()),
    ) + (-alphas_2d.to_owned() + 1.0).matmul(background_rgb);
    // [Q, 1]
    let depths_2d = weights.matmul(projection.depths.to_owned().select(0, indices));

    Tensor::cat(vec![colors_rgb_2d, alphas_2d, depths_2d], 1).reshape([
        tile_size_y,
        tile_size_x,
        3 + 1 + 1,
    ])
}

/// The values of `tensor` in `f32` on the host.
pub fn into_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, Error> {
    tensor
        .detach()
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| Error::TensorData(format!("{err:?}")))
}
