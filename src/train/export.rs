//! Side-by-side image export during training.

pub use super::*;

use image::RgbImage;
use std::path::{Path, PathBuf};

/// The path of the exported image at `step` in `directory`.
#[inline]
pub fn image_path(
    directory: impl AsRef<Path>,
    step: u64,
) -> PathBuf {
    directory.as_ref().join(format!("image_{step}.png"))
}

/// Encoding `[I_y, I_x, 3]` values in `[0.0, 1.0]` to 8-bit RGB.
pub fn image_to_rgb8<B: Backend>(image: Tensor<B, 3>) -> Result<RgbImage, Error> {
    let [height, width, channel_count] = image.dims();
    if channel_count != 3 {
        return Err(Error::Validation(
            format!("channel count of image ({channel_count})"),
            "3".into(),
        ));
    }

    let values = into_host(image)?
        .into_iter()
        .map(|value| (value.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect::<Vec<_>>();

    RgbImage::from_raw(width as u32, height as u32, values).ok_or_else(|| {
        Error::MismatchedImageSize(vec![height, width, channel_count], vec![height, width, 3])
    })
}

/// Writing `truth` stacked above `render` to `path` as PNG.
///
/// The parent directories are created if missing.
pub fn export_image<B: Backend>(
    truth: Tensor<B, 3>,
    render: Tensor<B, 3>,
    path: impl AsRef<Path>,
) -> Result<(), Error> {
    check_image_size(&render, &truth)?;

    let path = path.as_ref();
    if let Some(directory) = path.parent() {
        std::fs::create_dir_all(directory)?;
    }

    let image = image_to_rgb8(Tensor::cat(vec![truth, render], 0))?;
    image.save(path)?;

    log::debug!(
        target: "gausplat::trainer::export",
        "Exported image to {}",
        path.display(),
    );

    Ok(())
}
