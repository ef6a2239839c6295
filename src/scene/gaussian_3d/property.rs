//! Field values of the 3DGS scene.

pub use super::*;

use burn::tensor::activation;
use humansize::{format_size, BINARY};

/// Activated values
impl<B: Backend> Gaussian3dScene<B> {
    /// `[P, 3]`, the 0th-order SH coefficients.
    #[inline]
    pub fn get_colors_sh_dc(&self) -> Tensor<B, 2> {
        self.colors_sh_dc.val()
    }

    /// `[P, M - 1, 3]`, the higher-order SH coefficients,
    /// where `M` is [`sh_count`] of [`Self::colors_sh_degree`].
    #[inline]
    pub fn get_colors_sh_rest(&self) -> Tensor<B, 3> {
        self.colors_sh_rest.val()
    }

    /// `[P, 1]`, in the range of `(0.0, 1.0)`.
    #[inline]
    pub fn get_opacities(&self) -> Tensor<B, 2> {
        Self::make_opacities(self.opacities.val())
    }

    /// `[P, 3]`
    #[inline]
    pub fn get_positions(&self) -> Tensor<B, 2> {
        self.positions.val()
    }

    /// `[P, 4]`, normalized quaternions in scalar-last order `[x, y, z, w]`.
    #[inline]
    pub fn get_rotations(&self) -> Tensor<B, 2> {
        Self::make_rotations(self.rotations.val())
    }

    /// `[P, 3]`, the scalings in world units.
    #[inline]
    pub fn get_scalings(&self) -> Tensor<B, 2> {
        Self::make_scalings(self.scalings.val())
    }

    /// `sigmoid(opacities)`
    #[inline]
    pub fn make_opacities(opacities: Tensor<B, 2>) -> Tensor<B, 2> {
        activation::sigmoid(opacities)
    }

    /// The norm is clamped away from zero, so degenerate quaternions stay finite.
    #[inline]
    pub fn make_rotations(rotations: Tensor<B, 2>) -> Tensor<B, 2> {
        rotations.to_owned().div(
            rotations
                .powf_scalar(2.0)
                .sum_dim(1)
                .sqrt()
                .clamp_min(f32::EPSILON),
        )
    }

    /// `exp(scalings)`
    #[inline]
    pub fn make_scalings(scalings: Tensor<B, 2>) -> Tensor<B, 2> {
        scalings.exp()
    }

    /// Setting the opacities in the range of `(0.0, 1.0)` as their logits.
    pub fn set_opacities(
        &mut self,
        opacities: Tensor<B, 2>,
    ) -> &mut Self {
        let logits = opacities.to_owned().div(-opacities + 1.0).log();
        self.set_inner_opacities(logits)
    }

    /// Setting the positive scalings as their logarithms.
    pub fn set_scalings(
        &mut self,
        scalings: Tensor<B, 2>,
    ) -> &mut Self {
        self.set_inner_scalings(scalings.log())
    }
}

/// Raw value setters
///
/// The values become leaf parameters, and their parameter ids are kept
/// so the optimizer records remain addressable.
impl<B: Backend> Gaussian3dScene<B> {
    /// Replacing the raw values of [`Gaussian3dScene::colors_sh_dc`].
    #[inline]
    pub fn set_inner_colors_sh_dc(
        &mut self,
        colors_sh_dc: Tensor<B, 2>,
    ) -> &mut Self {
        self.colors_sh_dc = Param::initialized(
            self.colors_sh_dc.id.to_owned(),
            colors_sh_dc.detach().require_grad(),
        );
        self
    }

    /// Replacing the raw values of [`Gaussian3dScene::colors_sh_rest`].
    #[inline]
    pub fn set_inner_colors_sh_rest(
        &mut self,
        colors_sh_rest: Tensor<B, 3>,
    ) -> &mut Self {
        self.colors_sh_rest = Param::initialized(
            self.colors_sh_rest.id.to_owned(),
            colors_sh_rest.detach().require_grad(),
        );
        self
    }

    /// Replacing the raw values of [`Gaussian3dScene::opacities`].
    #[inline]
    pub fn set_inner_opacities(
        &mut self,
        opacities: Tensor<B, 2>,
    ) -> &mut Self {
        self.opacities = Param::initialized(
            self.opacities.id.to_owned(),
            opacities.detach().require_grad(),
        );
        self
    }

    /// Replacing the raw values of [`Gaussian3dScene::positions`].
    #[inline]
    pub fn set_inner_positions(
        &mut self,
        positions: Tensor<B, 2>,
    ) -> &mut Self {
        self.positions = Param::initialized(
            self.positions.id.to_owned(),
            positions.detach().require_grad(),
        );
        self
    }

    /// Replacing the raw values of [`Gaussian3dScene::rotations`].
    #[inline]
    pub fn set_inner_rotations(
        &mut self,
        rotations: Tensor<B, 2>,
    ) -> &mut Self {
        self.rotations = Param::initialized(
            self.rotations.id.to_owned(),
            rotations.detach().require_grad(),
        );
        self
    }

    /// Replacing the raw values of [`Gaussian3dScene::scalings`].
    #[inline]
    pub fn set_inner_scalings(
        &mut self,
        scalings: Tensor<B, 2>,
    ) -> &mut Self {
        self.scalings = Param::initialized(
            self.scalings.id.to_owned(),
            scalings.detach().require_grad(),
        );
        self
    }
}

/// Attribute getters
impl<B: Backend> Gaussian3dScene<B> {
    /// The degree of spherical harmonics.
    #[inline]
    pub fn colors_sh_degree(&self) -> u32 {
        sh_degree(self.colors_sh_rest.dims()[1] + 1).unwrap_or_default()
    }

    /// The device.
    #[inline]
    pub fn device(&self) -> B::Device {
        self.positions.device()
    }

    /// Number of points.
    #[inline]
    pub fn point_count(&self) -> usize {
        let point_count = self.positions.dims()[0];
        debug_assert_eq!(self.colors_sh_dc.dims()[0], point_count);
        debug_assert_eq!(self.colors_sh_rest.dims()[0], point_count);
        debug_assert_eq!(self.opacities.dims()[0], point_count);
        debug_assert_eq!(self.rotations.dims()[0], point_count);
        debug_assert_eq!(self.scalings.dims()[0], point_count);

        point_count
    }

    /// Size of the parameters in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.num_params() * size_of::<B::FloatElem>()
    }

    /// Readable size of the parameters.
    #[inline]
    pub fn size_readable(&self) -> String {
        format_size(self.size(), BINARY.decimal_places(1))
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn set_activated_values() {
        use super::*;
        use burn::{backend::NdArray, tensor::Distribution};

        let device = Default::default();

        let input_colors_sh_dc =
            Tensor::<NdArray<f32>, 2>::random([10, 3], Distribution::Default, &device);
        let input_colors_sh_rest = Tensor::<NdArray<f32>, 3>::random(
            [10, 15, 3],
            Distribution::Default,
            &device,
        );
        let input_opacities = Tensor::<NdArray<f32>, 2>::random(
            [10, 1],
            Distribution::Uniform(0.05, 0.95),
            &device,
        );
        let input_positions =
            Tensor::<NdArray<f32>, 2>::random([10, 3], Distribution::Default, &device);
        let input_rotations = Tensor::<NdArray<f32>, 2>::ones([10, 4], &device);
        let input_scalings =
            Tensor::<NdArray<f32>, 2>::random([10, 3], Distribution::Default, &device)
                .add_scalar(1.0);

        let mut scene = Gaussian3dScene::<NdArray<f32>>::default();

        scene
            .set_inner_colors_sh_dc(input_colors_sh_dc.to_owned())
            .set_inner_colors_sh_rest(input_colors_sh_rest.to_owned())
            .set_opacities(input_opacities.to_owned())
            .set_inner_positions(input_positions.to_owned())
            .set_inner_rotations(input_rotations.to_owned())
            .set_scalings(input_scalings.to_owned());

        assert_eq!(scene.point_count(), 10);
        assert_eq!(scene.colors_sh_degree(), 3);

        input_colors_sh_dc
            .into_data()
            .assert_approx_eq(&scene.get_colors_sh_dc().into_data(), 6);
        input_colors_sh_rest
            .into_data()
            .assert_approx_eq(&scene.get_colors_sh_rest().into_data(), 6);
        input_opacities
            .into_data()
            .assert_approx_eq(&scene.get_opacities().into_data(), 5);
        input_positions
            .into_data()
            .assert_approx_eq(&scene.get_positions().into_data(), 6);
        Tensor::<NdArray<f32>, 2>::full([10, 4], 0.5, &device)
            .into_data()
            .assert_approx_eq(&scene.get_rotations().into_data(), 6);
        input_scalings
            .into_data()
            .assert_approx_eq(&scene.get_scalings().into_data(), 6);
    }

    #[test]
    fn get_rotations_degenerate() {
        use super::*;
        use burn::backend::NdArray;

        let device = Default::default();
        let mut scene = Gaussian3dScene::<NdArray<f32>>::default();
        scene.set_inner_rotations(Tensor::zeros([1, 4], &device));

        let rotations = scene.get_rotations().into_data().to_vec::<f32>().unwrap();
        assert!(rotations.iter().all(|r| r.is_finite()), "{rotations:?}");
    }

    #[test]
    fn size_readable() {
        use super::*;
        use burn::backend::NdArray;

        let scene = Gaussian3dScene::<NdArray<f32>>::default();

        // (3 + 45 + 1 + 3 + 4 + 3) * 4 bytes
        assert_eq!(scene.size(), 236);
        assert_eq!(scene.size_readable(), "236 B");
    }
}
