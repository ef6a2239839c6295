//! 3DGS scene checkpoint implementation.

pub use super::*;

use burn::record::{
    BinBytesRecorder, BinFileRecorder, FullPrecisionSettings, Record, Recorder,
};
use std::path::Path;

/// The persisted state of a scene.
#[derive(Clone, Debug, Record)]
pub struct Gaussian3dCheckpoint<B: Backend> {
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
    /// The training step.
    pub step: u64,
}

impl<B: Backend> Gaussian3dCheckpoint<B> {
    pub fn new(
        points: Gaussian3dPoints<B>,
        step: u64,
    ) -> Self {
        Self {
            colors_sh_dc: points.colors_sh_dc,
            colors_sh_rest: points.colors_sh_rest,
            opacities: points.opacities,
            positions: points.positions,
            rotations: points.rotations,
            scalings: points.scalings,
            step,
        }
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.positions.dims()[0]
    }

    pub fn into_points(self) -> Gaussian3dPoints<B> {
        Gaussian3dPoints {
            colors_sh_dc: self.colors_sh_dc,
            colors_sh_rest: self.colors_sh_rest,
            opacities: self.opacities,
            positions: self.positions,
            rotations: self.rotations,
            scalings: self.scalings,
        }
    }

    pub fn to_bytes(self) -> Result<Vec<u8>, Error> {
        BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(self, ())
            .map_err(|err| Error::Record(format!("{err:?}")))
    }

    pub fn from_bytes(
        bytes: Vec<u8>,
        device: &B::Device,
    ) -> Result<Self, Error> {
        BinBytesRecorder::<FullPrecisionSettings>::default()
            .load(bytes, device)
            .map_err(|err| Error::Record(format!("{err:?}")))
    }

    /// Saving to `path`. The file extension is replaced by the recorder.
    pub fn save_file(
        self,
        path: impl AsRef<Path>,
    ) -> Result<(), Error> {
        BinFileRecorder::<FullPrecisionSettings>::default()
            .record(self, path.as_ref().to_path_buf())
            .map_err(|err| Error::Record(format!("{err:?}")))
    }

    pub fn load_file(
        path: impl AsRef<Path>,
        device: &B::Device,
    ) -> Result<Self, Error> {
        BinFileRecorder::<FullPrecisionSettings>::default()
            .load(path.as_ref().to_path_buf(), device)
            .map_err(|err| Error::Record(format!("{err:?}")))
    }
}

/// Checkpoint conversions
impl<B: Backend> Gaussian3dScene<B> {
    pub fn to_checkpoint(
        &self,
        step: u64,
    ) -> Gaussian3dCheckpoint<B> {
        Gaussian3dCheckpoint::new(self.inner_points(), step)
    }

    /// Loading the field values from `checkpoint`.
    ///
    /// The fields are first resized to the point count of `checkpoint`,
    /// then its values are assigned with strict shapes.
    /// It returns the training step of `checkpoint`.
    pub fn load_checkpoint(
        &mut self,
        checkpoint: Gaussian3dCheckpoint<B>,
    ) -> Result<u64, Error> {
        let step = checkpoint.step;
        let points = checkpoint.into_points();
        let point_count = points.point_count()?;

        let rest_count = self.colors_sh_rest.dims()[1];
        let rest_count_checkpoint = points.colors_sh_rest.dims()[1];
        if rest_count_checkpoint != rest_count {
            return Err(Error::Validation(
                format!("colors_sh_rest.dims()[1] of checkpoint ({rest_count_checkpoint})"),
                rest_count.to_string(),
            ));
        }

        self.resize_zeroed(point_count)?;
        self.set_inner_points(points)?;

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "gausplat::trainer::gaussian_3d::scene",
            "load_checkpoint > point_count ({point_count}) at step ({step})",
        );

        Ok(step)
    }
}
