//! Photometric loss and the preparation of ground truth.

pub use super::*;

use burn::tensor::{module::conv2d, ops::ConvOptions};

/// `C_1 = (0.01 * L)^2` where `L = 1`.
pub const SSIM_C1: f64 = 0.01 * 0.01;

/// `C_2 = (0.03 * L)^2` where `L = 1`.
pub const SSIM_C2: f64 = 0.03 * 0.03;

pub const SSIM_WINDOW_SIGMA: f64 = 1.5;

pub const SSIM_WINDOW_SIZE: usize = 11;

/// The weight of scale regularization.
pub const SCALE_REGULARIZATION_WEIGHT: f64 = 0.1;

/// The ground truth of a view.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroundTruth {
    /// 8-bit RGB or RGBA values in `[I_y, I_x, C]`.
    pub image: Vec<u8>,
    /// 8-bit mask values in `[I_y, I_x]`, where `0` excludes the pixel.
    pub mask: Option<Vec<u8>>,
}

impl GroundTruth {
    /// Preparing the ground truth for a render.
    ///
    /// The image is downscaled by `factor` and composited over `background_rgb`.
    /// It returns the `[I_y, I_x, 3]` image and the optional `[I_y, I_x, 1]` mask.
    pub fn to_tensors<B: Backend>(
        &self,
        image_size: (usize, usize),
        factor: u32,
        background_rgb: [f64; 3],
        device: &B::Device,
    ) -> Result<(Tensor<B, 3>, Option<Tensor<B, 3>>), Error> {
        let image = image_from_bytes::<B>(&self.image, image_size, device)?;
        let image = downscale_image(image, factor)?;
        let image = composite_background(image, background_rgb)?;

        let mask = self
            .mask
            .as_ref()
            .map(|mask| -> Result<_, Error> {
                let mask = image_from_bytes::<B>(mask, image_size, device)?;
                downscale_image(mask, factor)
            })
            .transpose()?;

        Ok((image, mask))
    }
}

/// Normalizing 8-bit values of `[I_y, I_x, C]` to `[0.0, 1.0]`.
///
/// The channel count `C` is inferred from the length of `bytes`.
pub fn image_from_bytes<B: Backend>(
    bytes: &[u8],
    image_size: (usize, usize),
    device: &B::Device,
) -> Result<Tensor<B, 3>, Error> {
    let pixel_count = image_size.0 * image_size.1;
    if pixel_count == 0 || bytes.len() % pixel_count != 0 {
        return Err(Error::MismatchedImageSize(
            vec![bytes.len()],
            vec![image_size.0, image_size.1],
        ));
    }
    let channel_count = bytes.len() / pixel_count;
    if !(1..=4).contains(&channel_count) {
        return Err(Error::Validation(
            format!("channel count ({channel_count})"),
            "in the range of [1, 4]".into(),
        ));
    }

    let values = bytes.iter().map(|v| *v as f32 / 255.0).collect::<Vec<_>>();
    Ok(Tensor::from_data(
        TensorData::new(values, [image_size.0, image_size.1, channel_count]),
        device,
    ))
}

/// Area-averaging `[I_y, I_x, C]` by `factor`.
///
/// The trailing rows and columns not divisible by `factor` are cropped.
pub fn downscale_image<B: Backend>(
    image: Tensor<B, 3>,
    factor: u32,
) -> Result<Tensor<B, 3>, Error> {
    let factor = factor as usize;
    if factor <= 1 {
        return Ok(image);
    }

    let [height, width, channel_count] = image.dims();
    let (height_out, width_out) = (height / factor, width / factor);
    if height_out == 0 || width_out == 0 {
        return Err(Error::Validation(
            format!("image size ({height}, {width})"),
            format!("no less than the downscale factor ({factor})"),
        ));
    }

    Ok(image
        .slice([0..height_out * factor, 0..width_out * factor, 0..channel_count])
        .reshape([height_out, factor, width_out, factor, channel_count])
        .mean_dim(3)
        .mean_dim(1)
        .reshape([height_out, width_out, channel_count]))
}

/// Compositing RGBA `[I_y, I_x, 4]` over `background_rgb`.
///
/// RGB images are returned as is.
pub fn composite_background<B: Backend>(
    image: Tensor<B, 3>,
    background_rgb: [f64; 3],
) -> Result<Tensor<B, 3>, Error> {
    let [height, width, channel_count] = image.dims();
    match channel_count {
        3 => Ok(image),
        4 => {
            let colors = image.to_owned().slice([0..height, 0..width, 0..3]);
            let alphas = image.slice([0..height, 0..width, 3..4]);
            let background = Tensor::<B, 1>::from_data(
                TensorData::new(background_rgb.map(|c| c as f32).to_vec(), [3]),
                &colors.device(),
            )
            .reshape([1, 1, 3]);
            Ok(colors * alphas.to_owned() + (alphas.neg() + 1.0) * background)
        },
        _ => Err(Error::Validation(
            format!("channel count of image ({channel_count})"),
            "3 or 4".into(),
        )),
    }
}

/// Zeroing the pixels excluded by `mask` in both images.
pub fn apply_mask<B: Backend>(
    render: Tensor<B, 3>,
    truth: Tensor<B, 3>,
    mask: Option<Tensor<B, 3>>,
) -> Result<(Tensor<B, 3>, Tensor<B, 3>), Error> {
    check_image_size(&render, &truth)?;

    let Some(mask) = mask else {
        return Ok((render, truth));
    };
    let [height, width, _] = render.dims();
    let mask_dims = mask.dims();
    if mask_dims != [height, width, 1] {
        return Err(Error::MismatchedImageSize(
            mask_dims.to_vec(),
            vec![height, width, 1],
        ));
    }

    Ok((render * mask.to_owned(), truth * mask))
}

/// `(1 - λ) * L1 + λ * (1 - SSIM)`
pub fn photometric_loss<B: Backend>(
    render: Tensor<B, 3>,
    truth: Tensor<B, 3>,
    ssim_lambda: f64,
) -> Result<Tensor<B, 1>, Error> {
    check_image_size(&render, &truth)?;

    let l1 = mean_absolute_error(render.to_owned(), truth.to_owned());
    let ssim = structural_similarity(render, truth);

    Ok(l1 * (1.0 - ssim_lambda) + (ssim.neg() + 1.0) * ssim_lambda)
}

/// The mean absolute error of two images.
#[inline]
pub fn mean_absolute_error<B: Backend, const D: usize>(
    lhs: Tensor<B, D>,
    rhs: Tensor<B, D>,
) -> Tensor<B, 1> {
    (lhs - rhs).abs().mean()
}

/// The mean structural similarity index of two `[I_y, I_x, C]` images.
///
/// The statistics are filtered by a Gaussian window without padding.
/// The window size is reduced to fit small images.
pub fn structural_similarity<B: Backend>(
    lhs: Tensor<B, 3>,
    rhs: Tensor<B, 3>,
) -> Tensor<B, 1> {
    let [height, width, channel_count] = lhs.dims();
    let device = lhs.device();

    let mut window_size = SSIM_WINDOW_SIZE.min(height).min(width).max(1);
    if window_size % 2 == 0 {
        window_size -= 1;
    }

    // [K]
    let center = (window_size - 1) as f64 / 2.0;
    let weights = (0..window_size)
        .map(|i| (-(i as f64 - center).powi(2) / (2.0 * SSIM_WINDOW_SIGMA.powi(2))).exp())
        .collect::<Vec<_>>();
    let weight_sum = weights.iter().sum::<f64>();
    let weights = weights
        .iter()
        .map(|w| (w / weight_sum) as f32)
        .collect::<Vec<_>>();

    // [5 * C, 1, K, K]
    let group_count = 5 * channel_count;
    let window = Tensor::<B, 2>::from_data(
        TensorData::new(weights.to_owned(), [window_size, 1]),
        &device,
    )
    .matmul(Tensor::from_data(TensorData::new(weights, [1, window_size]), &device))
    .reshape([1, 1, window_size, window_size])
    .repeat_dim(0, group_count);

    // [1, C, I_y, I_x]
    let lhs = lhs.permute([2, 0, 1]).unsqueeze::<4>();
    let rhs = rhs.permute([2, 0, 1]).unsqueeze::<4>();

    // [1, 5 * C, I_y, I_x]
    let inputs = Tensor::cat(
        vec![
            lhs.to_owned(),
            rhs.to_owned(),
            lhs.to_owned().powf_scalar(2.0),
            rhs.to_owned().powf_scalar(2.0),
            lhs * rhs,
        ],
        1,
    );
    let outputs = conv2d(
        inputs,
        window,
        None,
        ConvOptions::new([1, 1], [0, 0], [1, 1], group_count),
    );

    let moment = |index: usize| outputs.to_owned().narrow(1, index * channel_count, channel_count);
    let (mean_lhs, mean_rhs) = (moment(0), moment(1));
    let mean_lhs_2 = mean_lhs.to_owned().powf_scalar(2.0);
    let mean_rhs_2 = mean_rhs.to_owned().powf_scalar(2.0);
    let mean_lhs_rhs = mean_lhs * mean_rhs;
    let variance_lhs = moment(2) - mean_lhs_2.to_owned();
    let variance_rhs = moment(3) - mean_rhs_2.to_owned();
    let covariance = moment(4) - mean_lhs_rhs.to_owned();

    let numerator = (mean_lhs_rhs * 2.0 + SSIM_C1) * (covariance * 2.0 + SSIM_C2);
    let denominator =
        (mean_lhs_2 + mean_rhs_2 + SSIM_C1) * (variance_lhs + variance_rhs + SSIM_C2);

    (numerator / denominator).mean()
}

/// Penalizing the points with the ratio of maximum to minimum scaling
/// above `ratio_max`.
///
/// It is `0.1 * mean(max(max / min, r) - r)`.
pub fn scale_regularization<B: Backend>(
    scalings: Tensor<B, 2>,
    ratio_max: f64,
) -> Tensor<B, 1> {
    if scalings.dims()[0] == 0 {
        return Tensor::zeros([1], &scalings.device());
    }

    let ratios = scalings.to_owned().max_dim(1) / scalings.min_dim(1);
    (ratios.clamp_min(ratio_max) - ratio_max)
        .mean()
        .mul_scalar(SCALE_REGULARIZATION_WEIGHT)
}

/// Returning [`Error::MismatchedImageSize`] if the images differ in shape.
pub fn check_image_size<B: Backend>(
    render: &Tensor<B, 3>,
    truth: &Tensor<B, 3>,
) -> Result<(), Error> {
    let (render_dims, truth_dims) = (render.dims(), truth.dims());
    if render_dims != truth_dims {
        return Err(Error::MismatchedImageSize(
            truth_dims.to_vec(),
            render_dims.to_vec(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::NdArray,
        tensor::{Distribution, ElementConversion},
    };

    type B = NdArray<f32>;

    fn scalar(tensor: Tensor<B, 1>) -> f64 {
        tensor.into_scalar().elem::<f64>()
    }

    #[test]
    fn structural_similarity_identical_and_inverted() {
        let device = Default::default();
        let image = Tensor::<B, 3>::random([24, 20, 3], Distribution::Default, &device);

        let ssim = scalar(structural_similarity(image.to_owned(), image.to_owned()));
        assert!((ssim - 1.0).abs() < 1e-4, "ssim: {ssim}");

        let ssim = scalar(structural_similarity(image.to_owned(), image.neg() + 1.0));
        assert!(ssim < 0.0, "ssim: {ssim}");
    }

    #[test]
    fn structural_similarity_small_image() {
        let device = Default::default();
        let lhs = Tensor::<B, 3>::random([4, 6, 3], Distribution::Default, &device);
        let ssim = scalar(structural_similarity(lhs.to_owned(), lhs));
        assert!((ssim - 1.0).abs() < 1e-4, "ssim: {ssim}");
    }

    #[test]
    fn photometric_loss_constant_images() {
        let device = Default::default();
        let render = Tensor::<B, 3>::full([16, 16, 3], 0.25, &device);
        let truth = Tensor::<B, 3>::full([16, 16, 3], 0.75, &device);

        // SSIM of constant images is (2 * 0.25 * 0.75 + C1) / (0.25^2 + 0.75^2 + C1)
        let ssim = (2.0 * 0.25 * 0.75 + SSIM_C1) / (0.0625 + 0.5625 + SSIM_C1);
        let target = 0.8 * 0.5 + 0.2 * (1.0 - ssim);
        let loss = scalar(photometric_loss(render.to_owned(), truth, 0.2).unwrap());
        assert!((loss - target).abs() < 1e-5, "loss: {loss}, target: {target}");

        let output = photometric_loss(render, Tensor::zeros([16, 8, 3], &device), 0.2);
        assert!(matches!(output, Err(Error::MismatchedImageSize(..))));
    }

    #[test]
    fn ground_truth_rgba_and_mask() {
        let device = Default::default();
        // 2 x 2 RGBA, downscaled to 1 x 1
        let truth = GroundTruth {
            image: [[255, 0, 0, 255], [255, 0, 0, 255], [0, 0, 255, 0], [0, 0, 255, 0]]
                .concat(),
            mask: Some(vec![255, 255, 0, 0]),
        };

        let (image, mask) = truth.to_tensors::<B>((2, 2), 2, [0.0, 1.0, 0.0], &device).unwrap();
        image
            .into_data()
            .assert_approx_eq(&TensorData::new(vec![0.25_f32, 0.5, 0.25], [1, 1, 3]), 5);
        mask.unwrap()
            .into_data()
            .assert_approx_eq(&TensorData::new(vec![0.5_f32], [1, 1, 1]), 5);

        let (image, _) = truth.to_tensors::<B>((2, 2), 1, [0.0, 1.0, 0.0], &device).unwrap();
        image.into_data().assert_approx_eq(
            &TensorData::new(
                vec![1.0_f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0],
                [2, 2, 3],
            ),
            5,
        );

        let output = truth.to_tensors::<B>((3, 2), 1, [0.0; 3], &device);
        assert!(matches!(output, Err(Error::MismatchedImageSize(..))));
    }

    #[test]
    fn apply_mask() {
        let device = Default::default();
        let render = Tensor::<B, 3>::ones([2, 2, 3], &device);
        let truth = Tensor::<B, 3>::full([2, 2, 3], 0.5, &device);
        let mask = Tensor::<B, 3>::from_data(
            TensorData::new(vec![1.0_f32, 0.0, 0.0, 1.0], [2, 2, 1]),
            &device,
        );

        let (render, truth) = super::apply_mask(render, truth, Some(mask)).unwrap();
        assert_eq!(
            render.into_data().to_vec::<f32>().unwrap(),
            [1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0]
        );
        assert_eq!(scalar(truth.sum()), 3.0);

        let output = super::apply_mask(
            Tensor::<B, 3>::ones([2, 2, 3], &device),
            Tensor::ones([2, 2, 3], &device),
            Some(Tensor::ones([2, 3, 1], &device)),
        );
        assert!(matches!(output, Err(Error::MismatchedImageSize(..))));
    }

    #[test]
    fn scale_regularization() {
        let device = Default::default();
        let scalings = Tensor::<B, 2>::from_data(
            TensorData::new(vec![1.0_f32, 1.0, 1.0, 20.0, 1.0, 1.0], [2, 3]),
            &device,
        );

        let loss = scalar(super::scale_regularization(scalings, 10.0));
        assert!((loss - 0.1 * 5.0).abs() < 1e-6, "loss: {loss}");

        let loss = scalar(super::scale_regularization(Tensor::zeros([0, 3], &device), 10.0));
        assert_eq!(loss, 0.0);
    }
}
