//! 3DGS scene structural edits.
//!
//! Every edit replaces all fields at once, so the fields stay aligned.

pub use super::*;

use crate::function::{TensorBoolExtension, TensorQuaternionExtension};
use burn::tensor::Distribution;

/// The divisor of scalings for split points.
pub const SPLIT_SCALING_DIVISOR: f64 = 1.6;

/// Construction
impl<B: Backend> Gaussian3dScene<B> {
    /// Creating a scene with new parameters from the inner values.
    pub fn from_inner_points(points: Gaussian3dPoints<B>) -> Result<Self, Error> {
        points.point_count()?;
        Ok(Self::new_unchecked(points))
    }

    pub(super) fn new_unchecked(points: Gaussian3dPoints<B>) -> Self {
        Self {
            colors_sh_dc: Param::from_tensor(points.colors_sh_dc.require_grad()),
            colors_sh_rest: Param::from_tensor(points.colors_sh_rest.require_grad()),
            opacities: Param::from_tensor(points.opacities.require_grad()),
            positions: Param::from_tensor(points.positions.require_grad()),
            rotations: Param::from_tensor(points.rotations.require_grad()),
            scalings: Param::from_tensor(points.scalings.require_grad()),
        }
    }
}

/// Structural edits
impl<B: Backend> Gaussian3dScene<B> {
    /// The detached inner values of all fields.
    pub fn inner_points(&self) -> Gaussian3dPoints<B> {
        Gaussian3dPoints {
            colors_sh_dc: self.colors_sh_dc.val().detach(),
            colors_sh_rest: self.colors_sh_rest.val().detach(),
            opacities: self.opacities.val().detach(),
            positions: self.positions.val().detach(),
            rotations: self.rotations.val().detach(),
            scalings: self.scalings.val().detach(),
        }
    }

    /// Replacing the inner values of all fields.
    ///
    /// The parameter ids are kept.
    pub fn set_inner_points(
        &mut self,
        points: Gaussian3dPoints<B>,
    ) -> Result<&mut Self, Error> {
        points.point_count()?;

        let rest_count = self.colors_sh_rest.dims()[1];
        let rest_count_points = points.colors_sh_rest.dims()[1];
        if rest_count != rest_count_points {
            return Err(Error::Validation(
                format!("colors_sh_rest.dims()[1] of points ({rest_count_points})"),
                rest_count.to_string(),
            ));
        }

        Ok(self
            .set_inner_colors_sh_dc(points.colors_sh_dc)
            .set_inner_colors_sh_rest(points.colors_sh_rest)
            .set_inner_opacities(points.opacities)
            .set_inner_positions(points.positions)
            .set_inner_rotations(points.rotations)
            .set_inner_scalings(points.scalings))
    }

    /// Appending `points` after the existing points.
    ///
    /// It returns the new point count.
    pub fn append_inner_points(
        &mut self,
        points: Gaussian3dPoints<B>,
    ) -> Result<usize, Error> {
        let points = self.inner_points().cat(points)?;
        self.set_inner_points(points)?;
        Ok(self.point_count())
    }

    /// Retaining the points at `indices` in the given order.
    ///
    /// It returns the new point count.
    pub fn retain(
        &mut self,
        indices: Tensor<B, 1, Int>,
    ) -> Result<usize, Error> {
        let points = self.inner_points().select(indices);
        self.set_inner_points(points)?;
        Ok(self.point_count())
    }

    /// Retaining the points where `keep_mask` is `true`.
    ///
    /// The relative order of the retained points is preserved.
    /// It returns the new point count.
    pub fn compact(
        &mut self,
        keep_mask: Tensor<B, 1, Bool>,
    ) -> Result<usize, Error> {
        let mask_count = keep_mask.dims()[0];
        let point_count = self.point_count();
        if mask_count != point_count {
            return Err(Error::MismatchedPointCount(
                "keep_mask".into(),
                mask_count,
                point_count,
            ));
        }

        self.retain(keep_mask.indices())
    }

    /// Resizing every field to `point_count` points filled with zeros.
    pub fn resize_zeroed(
        &mut self,
        point_count: usize,
    ) -> Result<&mut Self, Error> {
        let points = Gaussian3dPoints::zeros(
            point_count,
            self.colors_sh_rest.dims()[1],
            &self.device(),
        );
        self.set_inner_points(points)
    }
}

/// Density edits
impl<B: Backend> Gaussian3dScene<B> {
    /// Copies of the points where `mask` is `true`.
    pub fn make_duplicated_points(
        &self,
        mask: Tensor<B, 1, Bool>,
    ) -> Gaussian3dPoints<B> {
        self.inner_points().select(mask.indices())
    }

    /// Children of the points where `mask` is `true`.
    ///
    /// Each selected point yields `sample_count` children.
    /// The offsets of the children are sampled from the normal distribution
    /// scaled and rotated as their parent, and the scalings of the children are
    /// divided by [`SPLIT_SCALING_DIVISOR`].
    ///
    /// The children of all parents are tiled `sample_count` times.
    pub fn make_split_points(
        &self,
        mask: Tensor<B, 1, Bool>,
        sample_count: usize,
    ) -> Gaussian3dPoints<B> {
        let device = self.device();
        let parents = self.inner_points().select(mask.indices());

        // K * S
        let child_count = parents.positions.dims()[0] * sample_count;
        let mut children = parents.repeat(sample_count);
        if child_count == 0 {
            return children;
        }

        // [K * S, 3, 1]
        let offsets = Tensor::<B, 2>::random(
            [child_count, 3],
            Distribution::Normal(0.0, 1.0),
            &device,
        )
        .mul(Self::make_scalings(children.scalings.to_owned()))
        .reshape([child_count, 3, 1]);

        // [K * S, 3, 3]
        let rotations = Self::make_rotations(children.rotations.to_owned())
            .quaternions_to_matrices();

        // [K * S, 3]
        children.positions = children.positions
            + rotations.matmul(offsets).reshape([child_count, 3]);
        children.scalings = children.scalings - SPLIT_SCALING_DIVISOR.ln();

        children
    }

    /// Dividing the scalings where `mask` is `true` by [`SPLIT_SCALING_DIVISOR`].
    pub fn shrink_scalings(
        &mut self,
        mask: Tensor<B, 1, Bool>,
    ) -> &mut Self {
        // [P, 1]
        let shrinkage = mask
            .float()
            .unsqueeze_dim::<2>(1)
            .mul_scalar(SPLIT_SCALING_DIVISOR.ln());
        let scalings = self.scalings.val().detach() - shrinkage;
        self.set_inner_scalings(scalings)
    }
}
