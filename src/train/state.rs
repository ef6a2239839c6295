//! Training state and the statistics tracker.

pub use super::*;

use crate::function::TensorBoolExtension;

/// The mutable state of training.
///
/// The statistics are `None` outside of an accumulation window,
/// and they are aligned with the points of the scene otherwise.
#[derive(Clone, Debug, Default)]
pub struct TrainingState<B: Backend> {
    /// The step counter.
    pub step: u64,
    /// The running sums of 2D positional gradient norms.
    ///
    /// `[P]`
    pub positions_2d_grad_norm_sum: Option<Tensor<B, 1>>,
    /// The counts of visibility.
    ///
    /// `[P]`
    pub visible_counts: Option<Tensor<B, 1>>,
    /// The maximums of radii normalized by the larger image dimension.
    ///
    /// `[P]`
    pub radii_2d_max_normalized: Option<Tensor<B, 1>>,
    /// `(I_y, I_x)` of the last rendered image.
    pub last_image_size: Option<(usize, usize)>,
}

impl<B: Backend> TrainingState<B> {
    /// Accumulating the statistics of a rendered image.
    ///
    /// ## Arguments
    ///
    /// * `positions_2d_grad` - `[P, 2]`
    /// * `radii` - `[P]`, where positive radii mark the visible points.
    /// * `image_size` - `(I_y, I_x)`
    pub fn update(
        &mut self,
        positions_2d_grad: Tensor<B, 2>,
        radii: Tensor<B, 1, Int>,
        image_size: (usize, usize),
    ) -> Result<&mut Self, Error> {
        let point_count = radii.dims()[0];
        let grad_count = positions_2d_grad.dims()[0];
        if grad_count != point_count {
            return Err(Error::MismatchedPointCount(
                "positions_2d_grad".into(),
                grad_count,
                point_count,
            ));
        }
        self.check_point_count(point_count)?;

        let device = radii.device();
        let visibles = radii.to_owned().greater_elem(0);

        // [P]
        let norms: Tensor<B, 1> =
            positions_2d_grad.powf_scalar(2.0).sum_dim(1).sqrt().squeeze(1);

        let (norm_sum, visible_counts) =
            match (self.positions_2d_grad_norm_sum.take(), self.visible_counts.take()) {
                (Some(norm_sum), Some(visible_counts)) => {
                    let visibles = visibles.to_owned().float();
                    (norm_sum + norms * visibles.to_owned(), visible_counts + visibles)
                },
                _ => (norms, Tensor::ones([point_count], &device)),
            };
        self.positions_2d_grad_norm_sum = Some(norm_sum);
        self.visible_counts = Some(visible_counts);

        let image_size_max = image_size.0.max(image_size.1).max(1) as f64;
        let radii_normalized = radii.float().div_scalar(image_size_max);
        let radii_max = self
            .radii_2d_max_normalized
            .take()
            .unwrap_or_else(|| Tensor::zeros([point_count], &device));
        self.radii_2d_max_normalized = Some(radii_max.to_owned().mask_where(
            visibles,
            radii_max.max_pair(radii_normalized),
        ));

        self.last_image_size = Some(image_size);

        Ok(self)
    }

    /// The mean 2D positional gradient norms in pixels.
    ///
    /// It is `sum / count * 0.5 * max(I_y, I_x)`.
    pub fn positions_2d_grad_norm_mean(&self) -> Result<Tensor<B, 1>, Error> {
        let (Some(norm_sum), Some(visible_counts), Some(image_size)) = (
            self.positions_2d_grad_norm_sum.as_ref(),
            self.visible_counts.as_ref(),
            self.last_image_size,
        ) else {
            return Err(Error::MissingStatistics(
                "positions_2d_grad_norm_sum and visible_counts".into(),
            ));
        };

        let scale = 0.5 * image_size.0.max(image_size.1) as f64;
        Ok(norm_sum
            .to_owned()
            .div(visible_counts.to_owned().clamp_min(1.0))
            .mul_scalar(scale))
    }

    /// Appending `count` zero-filled entries to the statistics.
    pub fn append_zeros(
        &mut self,
        count: usize,
    ) -> &mut Self {
        if count == 0 {
            return self;
        }

        let append = |values: Tensor<B, 1>| {
            let zeros = Tensor::zeros([count], &values.device());
            Tensor::cat(vec![values, zeros], 0)
        };
        self.positions_2d_grad_norm_sum = self.positions_2d_grad_norm_sum.take().map(append);
        self.visible_counts = self.visible_counts.take().map(append);
        self.radii_2d_max_normalized = self.radii_2d_max_normalized.take().map(append);
        self
    }

    /// Retaining the entries at `indices` of the statistics in the given order.
    pub fn retain(
        &mut self,
        indices: Tensor<B, 1, Int>,
    ) -> &mut Self {
        let select = |values: Tensor<B, 1>| values.select(0, indices.to_owned());
        self.positions_2d_grad_norm_sum = self.positions_2d_grad_norm_sum.take().map(select);
        self.visible_counts = self.visible_counts.take().map(select);
        self.radii_2d_max_normalized = self.radii_2d_max_normalized.take().map(select);
        self
    }

    /// Retaining the entries where `keep_mask` is `true`.
    pub fn compact(
        &mut self,
        keep_mask: Tensor<B, 1, Bool>,
    ) -> &mut Self {
        self.retain(keep_mask.indices())
    }

    /// Starting a new accumulation window.
    pub fn clear(&mut self) -> &mut Self {
        self.positions_2d_grad_norm_sum = None;
        self.visible_counts = None;
        self.radii_2d_max_normalized = None;
        self
    }

    /// Whether any statistics are being accumulated.
    #[inline]
    pub fn is_accumulating(&self) -> bool {
        self.positions_2d_grad_norm_sum.is_some() || self.radii_2d_max_normalized.is_some()
    }

    /// Returning [`Error::MismatchedPointCount`] if any statistics
    /// is not aligned with `point_count` points.
    pub fn check_point_count(
        &self,
        point_count: usize,
    ) -> Result<(), Error> {
        let statistics = [
            ("positions_2d_grad_norm_sum", &self.positions_2d_grad_norm_sum),
            ("visible_counts", &self.visible_counts),
            ("radii_2d_max_normalized", &self.radii_2d_max_normalized),
        ];
        for (name, values) in statistics {
            if let Some(values) = values {
                let count = values.dims()[0];
                if count != point_count {
                    return Err(Error::MismatchedPointCount(
                        name.into(),
                        count,
                        point_count,
                    ));
                }
            }
        }
        Ok(())
    }
}
