pub mod project;
pub mod rasterize;

pub use crate::{
    error::Error,
    render::view::View,
    scene::gaussian_3d::{Gaussian3dScene, SH_DEGREE_MAX},
};
pub use burn::{
    config::Config,
    tensor::{backend::Backend, Int, Tensor, TensorData},
};
pub use rasterize::Gaussian3dRasterizer;

use std::{fmt, str::FromStr};

/// The renderer adapter of 3D Gaussian splatting.
///
/// It is the only seam between training and rasterization.
pub trait Gaussian3dRenderer<B: Backend>: fmt::Debug {
    /// Rendering `scene` from `view`.
    ///
    /// The outputs are differentiable with respect to the scene parameters
    /// and [`Gaussian3dRenderOutput::positions_2d_grad_ref`].
    fn render(
        &self,
        scene: &Gaussian3dScene<B>,
        view: &View,
        options: &Gaussian3dRenderOptions,
    ) -> Result<Gaussian3dRenderOutput<B>, Error>;
}

#[derive(Config, Debug)]
pub struct Gaussian3dRenderOptions {
    /// Background color in the range of `[0.0, 1.0]`.
    #[config(default = "[0.0, 0.0, 0.0]")]
    pub background_rgb: [f64; 3],

    /// It should be no more than [`SH_DEGREE_MAX`].
    #[config(default = "SH_DEGREE_MAX")]
    pub colors_sh_degree_max: u32,

    #[config(default = "false")]
    pub is_depth_required: bool,

    #[config(default = "RasterizeMode::Classic")]
    pub rasterize_mode: RasterizeMode,
}

#[derive(Config, Copy, Debug, PartialEq, Eq)]
pub enum RasterizeMode {
    Classic,
    /// Compensating the opacities for the low-pass filter.
    Antialiased,
}

#[derive(Clone)]
pub struct Gaussian3dRenderOutput<B: Backend> {
    /// `[I_y, I_x, 1]`
    pub alphas_2d: Tensor<B, 3>,
    /// `[I_y, I_x, 3]`
    pub colors_rgb_2d: Tensor<B, 3>,
    /// `[P]`
    pub depths: Tensor<B, 1>,
    /// `[I_y, I_x, 1]`
    pub depths_2d: Option<Tensor<B, 3>>,
    /// `[P, 2]`
    pub positions_2d: Tensor<B, 2>,
    /// A zero leaf added to [`Self::positions_2d`].
    ///
    /// The shape of gradient is `[P, 2]`
    ///
    /// ## Usage
    ///
    /// ```ignore
    /// let positions_2d_grad =
    ///     output.positions_2d_grad_ref.grad_remove(&mut grads);
    /// ```
    pub positions_2d_grad_ref: Tensor<B, 2>,
    /// `[P]`
    pub radii: Tensor<B, 1, Int>,
    /// The count of points with positive radii.
    pub visible_count: usize,
}

impl Gaussian3dRenderOptions {
    /// Setting the background color from a slice of length 3.
    pub fn set_background_rgb(
        &mut self,
        background_rgb: &[f64],
    ) -> Result<&mut Self, Error> {
        self.background_rgb = background_rgb.try_into().map_err(|_| {
            Error::Validation(
                format!("background_rgb length ({})", background_rgb.len()),
                "3".into(),
            )
        })?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.colors_sh_degree_max > SH_DEGREE_MAX {
            return Err(Error::Validation(
                format!("colors_sh_degree_max ({})", self.colors_sh_degree_max),
                format!("no more than {SH_DEGREE_MAX}"),
            ));
        }
        if self.background_rgb.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(Error::Validation(
                format!("background_rgb ({:?})", self.background_rgb),
                "in the range of [0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Gaussian3dRenderOptions {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Default for RasterizeMode {
    #[inline]
    fn default() -> Self {
        Self::Classic
    }
}

impl FromStr for RasterizeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "classic" => Ok(Self::Classic),
            "antialiased" => Ok(Self::Antialiased),
            _ => Err(Error::UnknownRasterizeMode(s.into())),
        }
    }
}

impl<B: Backend> fmt::Debug for Gaussian3dRenderOutput<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct(&format!("Gaussian3dRenderOutput<{}>", B::name()))
            .field("alphas_2d.dims()", &self.alphas_2d.dims())
            .field("colors_rgb_2d.dims()", &self.colors_rgb_2d.dims())
            .field("depths.dims()", &self.depths.dims())
            .field(
                "depths_2d.dims()",
                &self.depths_2d.as_ref().map(|depths_2d| depths_2d.dims()),
            )
            .field("positions_2d.dims()", &self.positions_2d.dims())
            .field("radii.dims()", &self.radii.dims())
            .field("visible_count", &self.visible_count)
            .finish()
    }
}
