pub mod checkpoint;
pub mod config;
pub mod edit;
pub mod neighbor;
pub mod property;

pub use crate::{
    backend,
    error::Error,
    scene::point::{Bounds, Point, Points, SeedPoints},
    spherical_harmonics::{sh_count, sh_degree, SH_COUNT_MAX, SH_DEGREE_MAX},
};
pub use burn::{
    module::{Module, Param},
    tensor::{backend::Backend, Bool, Int, Tensor, TensorData},
};
pub use checkpoint::*;
pub use config::*;

use std::fmt;

/// The primitive store of 3D Gaussian splatting.
///
/// All fields are aligned along the first dimension `P`,
/// and the `i`-th row of each field describes the same primitive.
#[derive(Module)]
pub struct Gaussian3dScene<B: Backend> {
    /// `[P, 3]`
    pub colors_sh_dc: Param<Tensor<B, 2>>,
    /// `[P, M - 1, 3]`
    pub colors_sh_rest: Param<Tensor<B, 3>>,
    /// `[P, 1]`
    pub opacities: Param<Tensor<B, 2>>,
    /// `[P, 3]`
    pub positions: Param<Tensor<B, 2>>,
    /// `[P, 4]`
    pub rotations: Param<Tensor<B, 2>>,
    /// `[P, 3]`
    pub scalings: Param<Tensor<B, 2>>,
}

/// Inner values of every field in [`Gaussian3dScene`].
///
/// It is the unit of structural changes to the scene.
#[derive(Clone)]
pub struct Gaussian3dPoints<B: Backend> {
    /// `[P, 3]`
    pub colors_sh_dc: Tensor<B, 2>,
    /// `[P, M - 1, 3]`
    pub colors_sh_rest: Tensor<B, 3>,
    /// `[P, 1]`
    pub opacities: Tensor<B, 2>,
    /// `[P, 3]`
    pub positions: Tensor<B, 2>,
    /// `[P, 4]`
    pub rotations: Tensor<B, 2>,
    /// `[P, 3]`
    pub scalings: Tensor<B, 2>,
}

impl<B: Backend> fmt::Debug for Gaussian3dScene<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct("Gaussian3dScene")
            .field("devices", &self.devices())
            .field("colors_sh_dc.dims()", &self.colors_sh_dc.dims())
            .field("colors_sh_rest.dims()", &self.colors_sh_rest.dims())
            .field("opacities.dims()", &self.opacities.dims())
            .field("positions.dims()", &self.positions.dims())
            .field("rotations.dims()", &self.rotations.dims())
            .field("scalings.dims()", &self.scalings.dims())
            .finish()
    }
}

impl<B: Backend> fmt::Debug for Gaussian3dPoints<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct(&format!("Gaussian3dPoints<{}>", B::name()))
            .field("colors_sh_dc.dims()", &self.colors_sh_dc.dims())
            .field("colors_sh_rest.dims()", &self.colors_sh_rest.dims())
            .field("opacities.dims()", &self.opacities.dims())
            .field("positions.dims()", &self.positions.dims())
            .field("rotations.dims()", &self.rotations.dims())
            .field("scalings.dims()", &self.scalings.dims())
            .finish()
    }
}

impl<B: Backend> Default for Gaussian3dScene<B> {
    fn default() -> Self {
        let device = Default::default();
        let mut points = Gaussian3dPoints::zeros(1, SH_COUNT_MAX - 1, &device);
        points.rotations = Tensor::from_floats([[0.0, 0.0, 0.0, 1.0]], &device);
        Self::new_unchecked(points)
    }
}

impl<B: Backend> Gaussian3dPoints<B> {
    /// Zero-filled points.
    ///
    /// `rest_count` is `M - 1`.
    pub fn zeros(
        point_count: usize,
        rest_count: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            colors_sh_dc: Tensor::zeros([point_count, 3], device),
            colors_sh_rest: Tensor::zeros([point_count, rest_count, 3], device),
            opacities: Tensor::zeros([point_count, 1], device),
            positions: Tensor::zeros([point_count, 3], device),
            rotations: Tensor::zeros([point_count, 4], device),
            scalings: Tensor::zeros([point_count, 3], device),
        }
    }

    /// Validating the shapes of all fields and returning the point count.
    pub fn point_count(&self) -> Result<usize, Error> {
        let point_count = self.positions.dims()[0];

        let leading_dims = [
            ("colors_sh_dc", self.colors_sh_dc.dims()[0]),
            ("colors_sh_rest", self.colors_sh_rest.dims()[0]),
            ("opacities", self.opacities.dims()[0]),
            ("rotations", self.rotations.dims()[0]),
            ("scalings", self.scalings.dims()[0]),
        ];
        if let Some((name, count)) = leading_dims
            .into_iter()
            .find(|(_, count)| *count != point_count)
        {
            return Err(Error::MismatchedPointCount(
                name.into(),
                count,
                point_count,
            ));
        }

        let trailing_dims = [
            ("colors_sh_dc.dims()[1]", self.colors_sh_dc.dims()[1], 3),
            ("colors_sh_rest.dims()[2]", self.colors_sh_rest.dims()[2], 3),
            ("opacities.dims()[1]", self.opacities.dims()[1], 1),
            ("positions.dims()[1]", self.positions.dims()[1], 3),
            ("rotations.dims()[1]", self.rotations.dims()[1], 4),
            ("scalings.dims()[1]", self.scalings.dims()[1], 3),
        ];
        if let Some((name, dim, target)) = trailing_dims
            .into_iter()
            .find(|(_, dim, target)| dim != target)
        {
            return Err(Error::Validation(
                format!("{name} ({dim})"),
                target.to_string(),
            ));
        }

        let rest_count = self.colors_sh_rest.dims()[1];
        if sh_degree(rest_count + 1).is_none() {
            return Err(Error::Validation(
                format!("colors_sh_rest.dims()[1] ({rest_count})"),
                "one less than a square number up to 16".into(),
            ));
        }

        Ok(point_count)
    }

    /// Selecting the points at `indices` along the first dimension.
    pub fn select(
        self,
        indices: Tensor<B, 1, Int>,
    ) -> Self {
        Self {
            colors_sh_dc: self.colors_sh_dc.select(0, indices.to_owned()),
            colors_sh_rest: self.colors_sh_rest.select(0, indices.to_owned()),
            opacities: self.opacities.select(0, indices.to_owned()),
            positions: self.positions.select(0, indices.to_owned()),
            rotations: self.rotations.select(0, indices.to_owned()),
            scalings: self.scalings.select(0, indices),
        }
    }

    /// Tiling the points `times` times along the first dimension.
    pub fn repeat(
        self,
        times: usize,
    ) -> Self {
        Self {
            colors_sh_dc: self.colors_sh_dc.repeat_dim(0, times),
            colors_sh_rest: self.colors_sh_rest.repeat_dim(0, times),
            opacities: self.opacities.repeat_dim(0, times),
            positions: self.positions.repeat_dim(0, times),
            rotations: self.rotations.repeat_dim(0, times),
            scalings: self.scalings.repeat_dim(0, times),
        }
    }

    /// Concatenating the points along the first dimension.
    pub fn cat(
        self,
        other: Self,
    ) -> Result<Self, Error> {
        self.point_count()?;
        other.point_count()?;

        let rest_count = self.colors_sh_rest.dims()[1];
        let rest_count_other = other.colors_sh_rest.dims()[1];
        if rest_count != rest_count_other {
            return Err(Error::Validation(
                format!("colors_sh_rest.dims()[1] of other ({rest_count_other})"),
                rest_count.to_string(),
            ));
        }

        Ok(Self {
            colors_sh_dc: Tensor::cat(vec![self.colors_sh_dc, other.colors_sh_dc], 0),
            colors_sh_rest: Tensor::cat(
                vec![self.colors_sh_rest, other.colors_sh_rest],
                0,
            ),
            opacities: Tensor::cat(vec![self.opacities, other.opacities], 0),
            positions: Tensor::cat(vec![self.positions, other.positions], 0),
            rotations: Tensor::cat(vec![self.rotations, other.rotations], 0),
            scalings: Tensor::cat(vec![self.scalings, other.scalings], 0),
        })
    }
}
