//! Image quality metrics for evaluation.

pub use super::*;

use burn::tensor::ElementConversion;
use std::fmt;

/// A learned perceptual distance, e.g., LPIPS.
pub trait PerceptualMetric<B: Backend>: fmt::Debug {
    /// The distance of two `[I_y, I_x, 3]` images in `[0.0, 1.0]`.
    fn distance(
        &self,
        render: Tensor<B, 3>,
        truth: Tensor<B, 3>,
    ) -> Result<f64, Error>;
}

/// The quality of rendered images.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImageMetrics {
    /// The perceptual distance if a [`PerceptualMetric`] is given.
    pub lpips: Option<f64>,
    /// Peak signal-to-noise ratio in decibels.
    pub psnr: f64,
    pub ssim: f64,
}

impl ImageMetrics {
    /// Measuring `render` against `truth`.
    pub fn new<B: Backend>(
        render: Tensor<B, 3>,
        truth: Tensor<B, 3>,
        perceptual_metric: Option<&dyn PerceptualMetric<B>>,
    ) -> Result<Self, Error> {
        check_image_size(&render, &truth)?;

        let lpips = perceptual_metric
            .map(|metric| metric.distance(render.to_owned(), truth.to_owned()))
            .transpose()?;
        let psnr = peak_signal_to_noise_ratio(render.to_owned(), truth.to_owned())?;
        let ssim = structural_similarity(render, truth).into_scalar().elem::<f64>();

        Ok(Self { lpips, psnr, ssim })
    }

    /// The averages of `metrics`.
    ///
    /// The perceptual distance is averaged only if every item has one.
    pub fn mean(metrics: &[Self]) -> Self {
        if metrics.is_empty() {
            return Self::default();
        }

        let count = metrics.len() as f64;
        let lpips = metrics
            .iter()
            .map(|metrics| metrics.lpips)
            .sum::<Option<f64>>()
            .map(|sum| sum / count);
        let psnr = metrics.iter().map(|metrics| metrics.psnr).sum::<f64>() / count;
        let ssim = metrics.iter().map(|metrics| metrics.ssim).sum::<f64>() / count;

        Self { lpips, psnr, ssim }
    }
}

impl fmt::Display for ImageMetrics {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "PSNR {:.4}, SSIM {:.4}", self.psnr, self.ssim)?;
        if let Some(lpips) = self.lpips {
            write!(f, ", LPIPS {lpips:.4}")?;
        }
        Ok(())
    }
}

/// `-10 * log10(MSE)` of two images in `[0.0, 1.0]`.
///
/// It is infinite if the images are identical.
pub fn peak_signal_to_noise_ratio<B: Backend, const D: usize>(
    render: Tensor<B, D>,
    truth: Tensor<B, D>,
) -> Result<f64, Error> {
    let (render_dims, truth_dims) = (render.dims(), truth.dims());
    if render_dims != truth_dims {
        return Err(Error::MismatchedImageSize(
            truth_dims.to_vec(),
            render_dims.to_vec(),
        ));
    }

    let mse = (render - truth).powf_scalar(2.0).mean().into_scalar().elem::<f64>();
    Ok(-10.0 * mse.log10())
}
