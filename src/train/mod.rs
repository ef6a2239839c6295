//! 3DGS training.

pub mod config;
pub mod export;
pub mod loss;
pub mod metric;
pub mod optimize;
pub mod refine;
pub mod state;

pub use crate::{
    backend::{self, Autodiff, AutodiffBackend},
    error::Error,
    render::{
        gaussian_3d::{
            rasterize::into_host, Gaussian3dRasterizer, Gaussian3dRenderOptions,
            Gaussian3dRenderOutput, Gaussian3dRenderer, RasterizeMode,
        },
        View,
    },
    scene::gaussian_3d::{
        edit::SPLIT_SCALING_DIVISOR, Gaussian3dCheckpoint, Gaussian3dPoints, Gaussian3dScene,
        Gaussian3dSceneConfig, SeedPoints, SH_DEGREE_MAX,
    },
};
pub use burn::{
    module::AutodiffModule,
    tensor::{backend::Backend, Bool, Int, Tensor, TensorData},
};
pub use config::*;
pub use export::*;
pub use loss::*;
pub use metric::*;
pub use optimize::*;
pub use refine::*;
pub use state::*;

use burn::tensor::ElementConversion;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// A training view and its ground truth.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingView {
    pub truth: GroundTruth,
    pub view: View,
}

/// The outcome of a training step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainStepReport {
    pub loss: f64,
    /// The point count after the step.
    pub point_count: usize,
    pub refinement: Option<RefinementReport>,
    pub step: u64,
    pub visible_count: usize,
}

/// The trainer of 3DGS.
///
/// Each step renders a view, optimizes the scene against the ground truth,
/// accumulates the statistics and refines the scene on schedule.
#[derive(Debug)]
pub struct Gaussian3dTrainer<AB: AutodiffBackend, R = Gaussian3dRasterizer> {
    pub config: Gaussian3dTrainerConfig,
    pub controller: DensityController,
    pub optimizer: Gaussian3dOptimizer<AB>,
    pub renderer: R,
    pub scene: Gaussian3dScene<AB>,
    pub state: TrainingState<AB>,
    rng: StdRng,
}

impl<AB: AutodiffBackend, R: Gaussian3dRenderer<AB>> Gaussian3dTrainer<AB, R> {
    /// Creating a trainer of `scene` with `view_count` training views.
    pub fn new(
        config: Gaussian3dTrainerConfig,
        scene: Gaussian3dScene<AB>,
        renderer: R,
        view_count: usize,
    ) -> Result<Self, Error> {
        config.validate()?;

        let controller = DensityController::new(config.refinement.to_owned(), view_count)?;
        let optimizer = config.optimizer.init(config.iteration_count);
        let rng = StdRng::seed_from_u64(config.seed);

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(target: "gausplat::trainer::train", "Gaussian3dTrainer::new > {scene:?}");

        Ok(Self {
            config,
            controller,
            optimizer,
            renderer,
            scene,
            state: Default::default(),
            rng,
        })
    }

    /// Training on randomly chosen `views` until the iteration count is reached.
    pub fn train(
        &mut self,
        views: &[TrainingView],
    ) -> Result<&mut Self, Error> {
        if views.is_empty() {
            return Err(Error::Validation("view count (0)".into(), "positive".into()));
        }

        while self.state.step < self.config.iteration_count {
            let view = &views[self.rng.gen_range(0..views.len())];
            let report = self.train_step(view)?;

            if report.step % 100 == 0 {
                log::info!(
                    target: "gausplat::trainer::train",
                    "Step {} > loss {:.6}, {} gaussians",
                    report.step,
                    report.loss,
                    report.point_count,
                );
            }
        }

        Ok(self)
    }

    /// Running a training step on `view`.
    pub fn train_step(
        &mut self,
        view: &TrainingView,
    ) -> Result<TrainStepReport, Error> {
        let step = self.state.step;
        let factor = self.config.downscale_factor(step);
        let background_rgb = self.config.background_mode.background_rgb(true, &mut self.rng);
        let options = self.render_options(background_rgb, self.config.output_depth_during_training);

        // Rendering

        let output = self
            .renderer
            .render(&self.scene, &view.view.downscaled(factor), &options)?;

        // Computing the loss

        let (truth, mask) = view.truth.to_tensors::<AB>(
            (view.view.image_height as usize, view.view.image_width as usize),
            factor,
            background_rgb,
            &self.scene.device(),
        )?;
        let (render, truth) = apply_mask(output.colors_rgb_2d.to_owned(), truth, mask)?;
        let [image_size_y, image_size_x, _] = render.dims();

        let mut loss = photometric_loss(render.to_owned(), truth.to_owned(), self.config.ssim_lambda)?;
        let is_regularized = self.config.use_scale_regularization && step % 10 == 0;
        if is_regularized {
            loss = loss
                + scale_regularization(self.scene.get_scalings(), self.config.max_gauss_ratio);
        }
        let loss_value = loss.to_owned().into_scalar().elem::<f64>();

        // Optimizing the scene and accumulating the statistics

        // The loss depends on the scene only through visible points or the regularizer
        let is_visible = output.visible_count > 0;
        if is_visible || is_regularized {
            let mut grads = loss.backward();
            let positions_2d_grad = output.positions_2d_grad_ref.grad_remove(&mut grads);
            let grads = GradientsParams::from_grads(grads, &self.scene);
            self.scene = self.optimizer.step(self.scene.to_owned(), grads);

            if is_visible && step < self.config.refinement.stop_split_at {
                if let Some(positions_2d_grad) = positions_2d_grad {
                    self.state.update(
                        Tensor::from_inner(positions_2d_grad),
                        output.radii.to_owned(),
                        (image_size_y, image_size_x),
                    )?;
                }
            }
        }

        // Exporting the images

        if let Some(directory) = self.config.export_directory.as_ref() {
            if step % self.config.export_every.max(1) == 0 {
                let psnr = peak_signal_to_noise_ratio(render.to_owned(), truth.to_owned())?;
                log::info!(
                    target: "gausplat::trainer::train",
                    "Step {step} > PSNR {psnr:.4}",
                );
                export_image(truth, render, image_path(directory, step))?;
            }
        }

        // Refining the scene

        let refinement =
            match self.controller.refine(&mut self.scene, &mut self.optimizer, &mut self.state) {
                Err(Error::MissingStatistics(name)) => {
                    log::warn!(
                        target: "gausplat::trainer::train",
                        "Skipped refinement at step {step} > missing statistics: {name}",
                    );
                    self.state.clear();
                    None
                },
                result => result?,
            };

        self.state.step += 1;

        Ok(TrainStepReport {
            loss: loss_value,
            point_count: self.scene.point_count(),
            refinement,
            step,
            visible_count: output.visible_count,
        })
    }

    /// Loading the scene from `checkpoint`.
    ///
    /// The step is restored, the statistics are cleared,
    /// and the optimizer states are reset.
    pub fn load_checkpoint(
        &mut self,
        checkpoint: Gaussian3dCheckpoint<AB>,
    ) -> Result<&mut Self, Error> {
        let step = self.scene.load_checkpoint(checkpoint)?;

        self.state = TrainingState {
            step,
            ..Default::default()
        };
        self.optimizer = self.config.optimizer.init(self.config.iteration_count);
        self.optimizer.decay_positions_learning_rate(step);

        log::info!(
            target: "gausplat::trainer::train",
            "Loaded checkpoint at step {step} > {} gaussians",
            self.scene.point_count(),
        );

        Ok(self)
    }

    #[inline]
    pub fn to_checkpoint(&self) -> Gaussian3dCheckpoint<AB> {
        self.scene.to_checkpoint(self.state.step)
    }

    fn render_options(
        &self,
        background_rgb: [f64; 3],
        is_depth_required: bool,
    ) -> Gaussian3dRenderOptions {
        Gaussian3dRenderOptions::new()
            .with_background_rgb(background_rgb)
            .with_colors_sh_degree_max(self.config.colors_sh_degree(self.state.step))
            .with_is_depth_required(is_depth_required)
            .with_rasterize_mode(self.config.rasterize_mode)
    }
}

impl<AB: AutodiffBackend, R> Gaussian3dTrainer<AB, R>
where
    R: Gaussian3dRenderer<AB> + Gaussian3dRenderer<AB::InnerBackend>,
{
    /// Evaluating the scene on `views` at full resolution.
    ///
    /// It returns the mean metrics of all views.
    pub fn evaluate(
        &self,
        views: &[TrainingView],
        perceptual_metric: Option<&dyn PerceptualMetric<AB::InnerBackend>>,
    ) -> Result<ImageMetrics, Error> {
        let scene = self.scene.valid();
        let device = scene.device();
        let background_rgb = self.config.background_mode.background_rgb_evaluation();
        let options = self.render_options(background_rgb, false);

        let metrics = views
            .iter()
            .map(|view| {
                let output = Gaussian3dRenderer::<AB::InnerBackend>::render(
                    &self.renderer,
                    &scene,
                    &view.view,
                    &options,
                )?;
                let (truth, mask) = view.truth.to_tensors::<AB::InnerBackend>(
                    (view.view.image_height as usize, view.view.image_width as usize),
                    1,
                    background_rgb,
                    &device,
                )?;
                let (render, truth) = apply_mask(output.colors_rgb_2d, truth, mask)?;
                ImageMetrics::new(render, truth, perceptual_metric)
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let metrics = ImageMetrics::mean(&metrics);

        log::info!(
            target: "gausplat::trainer::train",
            "Evaluated at step {} > {metrics}",
            self.state.step,
        );

        Ok(metrics)
    }
}
