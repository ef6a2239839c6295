//! Projecting 3D Gaussians onto the image plane.

pub use super::*;

use crate::{
    function::{TensorFloatExtension, TensorQuaternionExtension},
    spherical_harmonics::SH_COEF,
};
use burn::tensor::activation::sigmoid;

/// The depth of the near plane.
pub const DEPTH_NEAR: f64 = 0.01;

/// The variance of the low-pass filter in pixels.
pub const FILTER_LOW_PASS: f64 = 0.3;

/// The factor of view bounds for clamping the Jacobian.
pub const VIEW_BOUND_FACTOR: f64 = 1.3;

/// The differentiable projection of every point.
#[derive(Clone, Debug)]
pub struct Projection<B: Backend> {
    /// `[P, 3]`
    pub colors_rgb_3d: Tensor<B, 2>,
    /// Inverse of the blurred 2D covariance, `(a, b, c)`.
    ///
    /// `[P, 3]`
    pub conics: Tensor<B, 2>,
    /// Blurred 2D covariance, `(a, b, c)`.
    ///
    /// `[P, 3]`
    pub covariances_2d: Tensor<B, 2>,
    /// `[P, 1]`
    pub depths: Tensor<B, 2>,
    /// `[P, 1]`
    pub opacities_2d: Tensor<B, 2>,
    /// `[P, 2]`
    pub positions_2d: Tensor<B, 2>,
}

/// Projecting the points of `scene` to `view`.
///
/// `positions_2d_grad_ref` is added to the projected positions.
pub fn project<B: Backend>(
    scene: &Gaussian3dScene<B>,
    view: &View,
    options: &Gaussian3dRenderOptions,
    positions_2d_grad_ref: Tensor<B, 2>,
) -> Projection<B> {
    let device = scene.device();
    // P
    let point_count = scene.point_count();
    // (F_x, F_y)
    let (focal_length_x, focal_length_y) = view.focal();
    // (C_x, C_y)
    let (principal_x, principal_y) = view.principal();
    // (tan(Fov_x / 2), tan(Fov_y / 2))
    let (field_of_view_x_half_tan, field_of_view_y_half_tan) =
        view.tan_half_field_of_view();
    let view_bound_x = field_of_view_x_half_tan * VIEW_BOUND_FACTOR;
    let view_bound_y = field_of_view_y_half_tan * VIEW_BOUND_FACTOR;

    // [3, 3]
    let view_rotation = view.view_rotation();
    // [1, 3]
    let view_translation = Tensor::<B, 1>::from_floats(
        view.view_translation().map(|t| t as f32),
        &device,
    )
    .unsqueeze::<2>();

    // [P, 3]
    let positions_3d = scene.get_positions();
    let positions_3d_in_view = positions_3d
        .to_owned()
        .matmul(matrix_3x3(view_rotation, &device).transpose())
        + view_translation;

    let column = |tensor: &Tensor<B, 2>, index: usize| {
        tensor.to_owned().slice([0..point_count, index..index + 1])
    };

    // [P, 1] * 3
    let x = column(&positions_3d_in_view, 0);
    let y = column(&positions_3d_in_view, 1);
    let depths = column(&positions_3d_in_view, 2);
    let z = depths.to_owned().clamp_min(DEPTH_NEAR);

    // [P, 1]
    let x_over_z = x / z.to_owned();
    let y_over_z = y / z.to_owned();

    // [P, 2]
    let positions_2d = Tensor::cat(
        vec![
            x_over_z.to_owned() * focal_length_x + principal_x,
            y_over_z.to_owned() * focal_length_y + principal_y,
        ],
        1,
    ) + positions_2d_grad_ref;

    // Jacobian of the perspective projection
    //
    // [F_x / z, 0, -F_x * x / z^2]
    // [0, F_y / z, -F_y * y / z^2]

    let z_recip = z.recip();
    let jacobian_00 = z_recip.to_owned() * focal_length_x;
    let jacobian_02 = x_over_z.clamp(-view_bound_x, view_bound_x)
        * z_recip.to_owned()
        * -focal_length_x;
    let jacobian_11 = z_recip.to_owned() * focal_length_y;
    let jacobian_12 =
        y_over_z.clamp(-view_bound_y, view_bound_y) * z_recip * -focal_length_y;

    // T = J * R_v
    //
    // [P, 2, 3] <- [P, 6]
    let transforms_2d = Tensor::cat(
        (0..3)
            .map(|k| {
                jacobian_00.to_owned() * view_rotation[0][k]
                    + jacobian_02.to_owned() * view_rotation[2][k]
            })
            .chain((0..3).map(|k| {
                jacobian_11.to_owned() * view_rotation[1][k]
                    + jacobian_12.to_owned() * view_rotation[2][k]
            }))
            .collect(),
        1,
    )
    .reshape([point_count, 2, 3]);

    // M = R * S
    //
    // [P, 3, 3]
    let transforms_3d = scene.get_rotations().quaternions_to_matrices()
        * scene.get_scalings().reshape([point_count, 1, 3]);

    // Σ = M * M^T
    //
    // [P, 3, 3]
    let covariances_3d = transforms_3d
        .to_owned()
        .matmul_batched(transforms_3d.swap_dims(1, 2));

    // Σ' = T * Σ * T^T
    //
    // [P, 4] <- [P, 2, 2]
    let covariances_2d = transforms_2d
        .to_owned()
        .matmul_batched(covariances_3d)
        .matmul_batched(transforms_2d.swap_dims(1, 2))
        .reshape([point_count, 4]);

    // [P, 1] * 3
    let covariance_a = column(&covariances_2d, 0);
    let covariance_b = column(&covariances_2d, 1);
    let covariance_c = column(&covariances_2d, 3);
    let covariance_a_blurred = covariance_a.to_owned() + FILTER_LOW_PASS;
    let covariance_c_blurred = covariance_c.to_owned() + FILTER_LOW_PASS;

    // [P, 1]
    let determinants = covariance_a * covariance_c
        - covariance_b.to_owned().powf_scalar(2.0);
    let determinants_blurred = (covariance_a_blurred.to_owned()
        * covariance_c_blurred.to_owned()
        - covariance_b.to_owned().powf_scalar(2.0))
    .clamp_min(f32::EPSILON as f64);

    // [P, 3]
    let conics = Tensor::cat(
        vec![
            covariance_c_blurred.to_owned() / determinants_blurred.to_owned(),
            -covariance_b.to_owned() / determinants_blurred.to_owned(),
            covariance_a_blurred.to_owned() / determinants_blurred.to_owned(),
        ],
        1,
    );
    let covariances_2d = Tensor::cat(
        vec![covariance_a_blurred, covariance_b, covariance_c_blurred],
        1,
    );

    // [P, 1]
    let opacities_2d = match options.rasterize_mode {
        RasterizeMode::Classic => scene.get_opacities(),
        RasterizeMode::Antialiased => {
            scene.get_opacities()
                * (determinants.clamp_min(0.0) / determinants_blurred).sqrt()
        },
    };

    // [P, 3]
    let colors_rgb_3d = match scene.colors_sh_degree() {
        0 => sigmoid(scene.get_colors_sh_dc()),
        degree => {
            let view_position = Tensor::<B, 1>::from_floats(
                view.view_position().map(|p| p as f32),
                &device,
            )
            .unsqueeze::<2>();
            let view_directions = positions_3d.detach() - view_position;
            let view_directions = view_directions.to_owned()
                / view_directions
                    .powf_scalar(2.0)
                    .sum_dim(1)
                    .sqrt()
                    .clamp_min(f32::EPSILON as f64);

            colors_sh_to_rgb(
                scene.get_colors_sh_dc(),
                scene.get_colors_sh_rest(),
                view_directions,
                degree.min(options.colors_sh_degree_max),
            )
        },
    };

    Projection {
        colors_rgb_3d,
        conics,
        covariances_2d,
        depths,
        opacities_2d,
        positions_2d,
    }
}

/// Evaluating the spherical harmonics up to `degree` along `view_directions`.
///
/// ## Arguments
///
/// * `colors_sh_dc` - `[P, 3]`
/// * `colors_sh_rest` - `[P, M - 1, 3]`
/// * `view_directions` - `[P, 3]`, normalized
///
/// ## Returns
///
/// * `colors_rgb_3d` - `[P, 3]`, no less than `0.0`
pub fn colors_sh_to_rgb<B: Backend>(
    colors_sh_dc: Tensor<B, 2>,
    colors_sh_rest: Tensor<B, 3>,
    view_directions: Tensor<B, 2>,
    degree: u32,
) -> Tensor<B, 2> {
    let point_count = view_directions.dims()[0];
    let rest_count = colors_sh_rest.dims()[1];
    let rest = |index: usize| {
        colors_sh_rest
            .to_owned()
            .slice([0..point_count, index..index + 1, 0..3])
            .reshape([point_count, 3])
    };
    let direction = |index: usize| {
        view_directions
            .to_owned()
            .slice([0..point_count, index..index + 1])
    };
    let (c0, c1, c2, c3) = &*SH_COEF;

    let mut colors_rgb_3d = colors_sh_dc * c0[0];

    if degree >= 1 && rest_count >= 3 {
        let (x, y, z) = (direction(0), direction(1), direction(2));
        colors_rgb_3d = colors_rgb_3d
            + rest(0) * (y.to_owned() * c1[0])
            + rest(1) * (z.to_owned() * c1[1])
            + rest(2) * (x.to_owned() * c1[2]);

        if degree >= 2 && rest_count >= 8 {
            let xx = x.to_owned().powf_scalar(2.0);
            let yy = y.to_owned().powf_scalar(2.0);
            let zz = z.to_owned().powf_scalar(2.0);
            let xy = x.to_owned() * y.to_owned();
            let yz = y.to_owned() * z.to_owned();
            let xz = x.to_owned() * z.to_owned();

            colors_rgb_3d = colors_rgb_3d
                + rest(3) * (xy.to_owned() * c2[0])
                + rest(4) * (yz * c2[1])
                + rest(5)
                    * ((zz.to_owned() * 2.0 - xx.to_owned() - yy.to_owned()) * c2[2])
                + rest(6) * (xz * c2[3])
                + rest(7) * ((xx.to_owned() - yy.to_owned()) * c2[4]);

            if degree >= 3 && rest_count >= 15 {
                colors_rgb_3d = colors_rgb_3d
                    + rest(8)
                        * (y.to_owned() * (xx.to_owned() * 3.0 - yy.to_owned()) * c3[0])
                    + rest(9) * (xy * z.to_owned() * c3[1])
                    + rest(10)
                        * (y * (zz.to_owned() * 4.0 - xx.to_owned() - yy.to_owned())
                            * c3[2])
                    + rest(11)
                        * (z.to_owned()
                            * (zz.to_owned() * 2.0
                                - xx.to_owned() * 3.0
                                - yy.to_owned() * 3.0)
                            * c3[3])
                    + rest(12)
                        * (x.to_owned() * (zz * 4.0 - xx.to_owned() - yy.to_owned())
                            * c3[4])
                    + rest(13) * (z * (xx.to_owned() - yy.to_owned()) * c3[5])
                    + rest(14) * (x * (xx - yy * 3.0) * c3[6]);
            }
        }
    }

    (colors_rgb_3d + 0.5).clamp_min(0.0)
}

/// `[3, 3]` <- row-major matrix
fn matrix_3x3<B: Backend>(
    matrix: [[f64; 3]; 3],
    device: &B::Device,
) -> Tensor<B, 2> {
    Tensor::from_data(
        TensorData::new(
            matrix.iter().flatten().map(|&v| v as f32).collect(),
            [3, 3],
        ),
        device,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn make_view() -> View {
        View {
            image_height: 32,
            image_width: 48,
            intrinsics: [[40.0, 0.0, 24.0], [0.0, 40.0, 16.0], [0.0, 0.0, 1.0]],
            ..Default::default()
        }
    }

    fn make_scene(positions: &[[f32; 3]]) -> Gaussian3dScene<B> {
        use crate::scene::gaussian_3d::Gaussian3dPoints;

        let device = Default::default();
        let point_count = positions.len();
        let mut points = Gaussian3dPoints::<B>::zeros(point_count, 0, &device);
        points.positions = Tensor::from_data(
            TensorData::new(positions.concat(), [point_count, 3]),
            &device,
        );
        points.rotations = Tensor::<B, 2>::from_floats([[0.0, 0.0, 0.0, 1.0]], &device)
            .repeat_dim(0, point_count);
        points.scalings = Tensor::full([point_count, 3], 0.1_f32.ln(), &device);
        Gaussian3dScene::from_inner_points(points).unwrap()
    }

    #[test]
    fn project_isotropic() {
        let scene = make_scene(&[[0.0, 0.0, 2.0], [0.5, -0.25, 4.0]]);
        let grad_ref = Tensor::zeros([2, 2], &Default::default());
        let output = project(
            &scene,
            &make_view(),
            &Gaussian3dRenderOptions::default(),
            grad_ref,
        );

        output
            .positions_2d
            .into_data()
            .assert_approx_eq(&TensorData::from([[24.0, 16.0], [29.0, 13.5]]), 5);
        output
            .depths
            .into_data()
            .assert_approx_eq(&TensorData::from([[2.0], [4.0]]), 6);

        // (F / z * s)^2 + 0.3
        let variance_0 = (40.0 / 2.0 * 0.1_f32).powi(2) + 0.3;
        output.covariances_2d.slice([0..1, 0..3]).into_data().assert_approx_eq(
            &TensorData::from([[variance_0, 0.0, variance_0]]),
            4,
        );
        output.conics.slice([0..1, 0..3]).into_data().assert_approx_eq(
            &TensorData::from([[1.0 / variance_0, 0.0, 1.0 / variance_0]]),
            4,
        );
    }

    #[test]
    fn project_antialiased_opacities() {
        let scene = make_scene(&[[0.0, 0.0, 2.0]]);
        let options = Gaussian3dRenderOptions::new()
            .with_rasterize_mode(RasterizeMode::Antialiased);
        let output = project(
            &scene,
            &make_view(),
            &options,
            Tensor::zeros([1, 2], &Default::default()),
        );

        let variance = (40.0 / 2.0 * 0.1_f32).powi(2);
        let target = 0.5 * variance / (variance + 0.3);
        output
            .opacities_2d
            .into_data()
            .assert_approx_eq(&TensorData::from([[target]]), 5);
    }

    #[test]
    fn colors_sh_to_rgb_degree_zero_and_one() {
        let device = Default::default();
        let colors_sh_dc = Tensor::<B, 2>::from_floats([[1.0, 0.0, -1.0]], &device);
        let colors_sh_rest = Tensor::<B, 3>::from_floats(
            [[[0.0, 0.0, 0.0], [1.0, 2.0, 3.0], [0.0, 0.0, 0.0]]],
            &device,
        );
        let view_directions = Tensor::<B, 2>::from_floats([[0.0, 0.0, 1.0]], &device);

        let c0 = SH_COEF.0[0] as f32;
        let c1 = SH_COEF.1[1] as f32;

        let output = colors_sh_to_rgb(
            colors_sh_dc.to_owned(),
            colors_sh_rest.to_owned(),
            view_directions.to_owned(),
            0,
        );
        output.into_data().assert_approx_eq(
            &TensorData::from([[c0 + 0.5, 0.5, (0.5 - c0).max(0.0)]]),
            5,
        );

        let output = colors_sh_to_rgb(colors_sh_dc, colors_sh_rest, view_directions, 1);
        output.into_data().assert_approx_eq(
            &TensorData::from([[
                c0 + c1 + 0.5,
                2.0 * c1 + 0.5,
                (0.5 - c0 + 3.0 * c1).max(0.0),
            ]]),
            5,
        );
    }
}
