pub use super::*;
pub use burn::{config::Config, LearningRate};

use burn::optim::AdamConfig;
use rand::Rng;
use std::str::FromStr;

/// The background color of evaluation in [`BackgroundMode::Random`].
pub const BACKGROUND_RGB_EVALUATION: [f64; 3] = [0.1490, 0.1647, 0.2157];

#[derive(Config, Debug)]
pub struct Gaussian3dTrainerConfig {
    #[config(default = "7000")]
    pub iteration_count: u64,

    #[config(default = "BackgroundMode::Random")]
    pub background_mode: BackgroundMode,

    /// It should be no more than [`SH_DEGREE_MAX`].
    #[config(default = "SH_DEGREE_MAX")]
    pub colors_sh_degree_max: u32,

    /// Increasing the SH degree by one every interval.
    #[config(default = "1000")]
    pub colors_sh_degree_interval: u64,

    /// Exporting an image every interval if [`Self::export_directory`] is set.
    #[config(default = "500")]
    pub export_every: u64,

    pub export_directory: Option<String>,

    /// The maximum ratio of the largest to the smallest scaling.
    #[config(default = "10.0")]
    pub max_gauss_ratio: f64,

    /// Training starts at `1 / 2^num_downscales` resolution.
    #[config(default = "2")]
    pub num_downscales: u32,

    #[config(default = "Gaussian3dOptimizerConfig::new()")]
    pub optimizer: Gaussian3dOptimizerConfig,

    #[config(default = "false")]
    pub output_depth_during_training: bool,

    #[config(default = "RasterizeMode::Classic")]
    pub rasterize_mode: RasterizeMode,

    #[config(default = "RefinementConfig::new()")]
    pub refinement: RefinementConfig,

    /// Doubling the resolution every interval.
    #[config(default = "3000")]
    pub resolution_schedule: u64,

    #[config(default = "42")]
    pub seed: u64,

    /// The weight of structural dissimilarity in the main loss.
    #[config(default = "0.2")]
    pub ssim_lambda: f64,

    #[config(default = "false")]
    pub use_scale_regularization: bool,
}

#[derive(Config, Debug)]
pub struct RefinementConfig {
    /// Culling the points with opacity below the threshold.
    #[config(default = "0.1")]
    pub cull_alpha_threshold: f64,

    /// Culling the points with maximum scaling above the threshold.
    #[config(default = "0.5")]
    pub cull_scale_threshold: f64,

    /// Culling the points with screen-space footprint above the threshold.
    #[config(default = "0.15")]
    pub cull_screen_size: f64,

    #[config(default = "true")]
    pub continue_cull_post_densification: bool,

    /// Densifying the points with mean 2D positional gradient norms above the threshold.
    #[config(default = "2e-4")]
    pub densify_grad_threshold: f64,

    /// Splitting the points with maximum scaling above the threshold,
    /// otherwise duplicating them.
    #[config(default = "0.01")]
    pub densify_size_threshold: f64,

    /// The children count of every split point.
    #[config(default = "2")]
    pub n_split_samples: usize,

    #[config(default = "100")]
    pub refine_every: u64,

    /// Resetting the opacities every `reset_alpha_every * refine_every` steps.
    #[config(default = "30")]
    pub reset_alpha_every: u64,

    /// Splitting the points with screen-space footprint above the threshold.
    #[config(default = "0.05")]
    pub split_screen_size: f64,

    /// Stopping the screen-space criteria at the step.
    #[config(default = "4000")]
    pub stop_screen_size_at: u64,

    /// Stopping densification at the step.
    #[config(default = "15000")]
    pub stop_split_at: u64,

    #[config(default = "500")]
    pub warmup_length: u64,
}

#[derive(Config, Debug)]
pub struct Gaussian3dOptimizerConfig {
    #[config(default = "2.5e-3")]
    pub colors_sh_dc_learning_rate: LearningRate,

    #[config(default = "2.5e-3 / 20.0")]
    pub colors_sh_rest_learning_rate: LearningRate,

    #[config(default = "1e-15")]
    pub epsilon: f32,

    #[config(default = "5e-2")]
    pub opacities_learning_rate: LearningRate,

    /// The initial and final learning rates, decaying exponentially.
    #[config(default = "(1.6e-4, 1.6e-6)")]
    pub positions_learning_rates: (LearningRate, LearningRate),

    #[config(default = "1e-3")]
    pub rotations_learning_rate: LearningRate,

    #[config(default = "5e-3")]
    pub scalings_learning_rate: LearningRate,
}

#[derive(Config, Copy, Debug, PartialEq, Eq)]
pub enum BackgroundMode {
    /// Uniformly random color in training.
    Random,
    Black,
    White,
}

impl Gaussian3dTrainerConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.colors_sh_degree_max > SH_DEGREE_MAX {
            return Err(Error::Validation(
                format!("colors_sh_degree_max ({})", self.colors_sh_degree_max),
                format!("no more than {SH_DEGREE_MAX}"),
            ));
        }
        if self.colors_sh_degree_interval == 0 {
            return Err(Error::Validation(
                "colors_sh_degree_interval (0)".into(),
                "positive".into(),
            ));
        }
        if self.resolution_schedule == 0 {
            return Err(Error::Validation(
                "resolution_schedule (0)".into(),
                "positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ssim_lambda) {
            return Err(Error::Validation(
                format!("ssim_lambda ({})", self.ssim_lambda),
                "in the range of [0.0, 1.0]".into(),
            ));
        }
        self.refinement.validate()
    }

    /// The downscale factor of images at `step` in training.
    ///
    /// It is `2^max(num_downscales - step / resolution_schedule, 0)`.
    pub fn downscale_factor(
        &self,
        step: u64,
    ) -> u32 {
        let exponent = (self.num_downscales as u64)
            .saturating_sub(step / self.resolution_schedule.max(1));
        1 << exponent.min(31)
    }

    /// The active SH degree at `step`.
    pub fn colors_sh_degree(
        &self,
        step: u64,
    ) -> u32 {
        (step / self.colors_sh_degree_interval.max(1))
            .min(self.colors_sh_degree_max as u64) as u32
    }
}

impl RefinementConfig {
    /// The preset for large scenes.
    pub fn big_model() -> Self {
        Self::new()
            .with_cull_alpha_threshold(0.005)
            .with_continue_cull_post_densification(false)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(self.cull_alpha_threshold > 0.0 && self.cull_alpha_threshold < 0.5) {
            return Err(Error::Validation(
                format!("cull_alpha_threshold ({})", self.cull_alpha_threshold),
                "in the range of (0.0, 0.5)".into(),
            ));
        }
        if self.refine_every == 0 || self.reset_alpha_every == 0 {
            return Err(Error::Validation(
                format!(
                    "refine_every ({}) and reset_alpha_every ({})",
                    self.refine_every, self.reset_alpha_every
                ),
                "positive".into(),
            ));
        }
        if self.n_split_samples == 0 {
            return Err(Error::Validation(
                "n_split_samples (0)".into(),
                "positive".into(),
            ));
        }
        Ok(())
    }

    /// The interval of opacity resets.
    #[inline]
    pub fn reset_interval(&self) -> u64 {
        self.reset_alpha_every * self.refine_every
    }

    /// Refinement runs at multiples of [`Self::refine_every`] after warm-up.
    #[inline]
    pub fn is_refinement_step(
        &self,
        step: u64,
    ) -> bool {
        step > self.warmup_length && step % self.refine_every.max(1) == 0
    }

    /// Densification waits for every view to be seen after an opacity reset.
    #[inline]
    pub fn is_densification_step(
        &self,
        step: u64,
        view_count: usize,
    ) -> bool {
        step < self.stop_split_at
            && step % self.reset_interval().max(1) > view_count as u64 + self.refine_every
    }

    /// Opacity resets one refinement period after every reset interval.
    #[inline]
    pub fn is_opacity_reset_step(
        &self,
        step: u64,
    ) -> bool {
        step < self.stop_split_at
            && step % self.reset_interval().max(1) == self.refine_every
    }
}

impl Gaussian3dOptimizerConfig {
    pub fn init<AB: AutodiffBackend>(
        &self,
        iteration_count: u64,
    ) -> Gaussian3dOptimizer<AB> {
        let param_updater = AdamConfig::new().with_epsilon(self.epsilon);

        Gaussian3dOptimizer {
            colors_sh_dc_learning_rate: self.colors_sh_dc_learning_rate,
            colors_sh_dc_param_updater: param_updater.init(),
            colors_sh_rest_learning_rate: self.colors_sh_rest_learning_rate,
            colors_sh_rest_param_updater: param_updater.init(),
            opacities_learning_rate: self.opacities_learning_rate,
            opacities_param_updater: param_updater.init(),
            positions_learning_rate: self.positions_learning_rates.0,
            positions_learning_rate_decay: Self::learning_rate_decay(
                self.positions_learning_rates,
                iteration_count,
            ),
            positions_param_updater: param_updater.init(),
            rotations_learning_rate: self.rotations_learning_rate,
            rotations_param_updater: param_updater.init(),
            scalings_learning_rate: self.scalings_learning_rate,
            scalings_param_updater: param_updater.init(),
        }
    }

    /// `(end / start)^(1 / iteration_count)`
    #[inline]
    pub fn learning_rate_decay(
        learning_rates: (LearningRate, LearningRate),
        iteration_count: u64,
    ) -> LearningRate {
        (learning_rates.1 / learning_rates.0)
            .powf((iteration_count.max(1) as LearningRate).recip())
    }
}

impl BackgroundMode {
    /// The background color in training or evaluation.
    pub fn background_rgb(
        &self,
        is_training: bool,
        rng: &mut impl Rng,
    ) -> [f64; 3] {
        match (self, is_training) {
            (Self::Random, true) => [rng.gen(), rng.gen(), rng.gen()],
            _ => self.background_rgb_evaluation(),
        }
    }

    /// The background color in evaluation.
    pub fn background_rgb_evaluation(&self) -> [f64; 3] {
        match self {
            Self::Random => BACKGROUND_RGB_EVALUATION,
            Self::Black => [0.0; 3],
            Self::White => [1.0; 3],
        }
    }
}

impl Default for Gaussian3dTrainerConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Default for RefinementConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Default for Gaussian3dOptimizerConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Default for BackgroundMode {
    #[inline]
    fn default() -> Self {
        Self::Random
    }
}

impl FromStr for BackgroundMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "black" => Ok(Self::Black),
            "white" => Ok(Self::White),
            _ => Err(Error::UnknownBackgroundMode(s.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learning_rate_decay() {
        let config = Gaussian3dOptimizerConfig::default();
        let decay = Gaussian3dOptimizerConfig::learning_rate_decay(
            config.positions_learning_rates,
            7000,
        );
        assert_eq!(decay, 0.9993423349014151);

        let decay = Gaussian3dOptimizerConfig::learning_rate_decay(
            config.positions_learning_rates,
            30000,
        );
        assert_eq!(decay, 0.9998465061085267);
    }

    #[test]
    fn downscale_factor() {
        let config = Gaussian3dTrainerConfig::default();
        assert_eq!(config.downscale_factor(0), 4);
        assert_eq!(config.downscale_factor(2999), 4);
        assert_eq!(config.downscale_factor(3000), 2);
        assert_eq!(config.downscale_factor(6000), 1);
        assert_eq!(config.downscale_factor(100000), 1);
    }

    #[test]
    fn colors_sh_degree() {
        let config = Gaussian3dTrainerConfig::default();
        assert_eq!(config.colors_sh_degree(0), 0);
        assert_eq!(config.colors_sh_degree(1999), 1);
        assert_eq!(config.colors_sh_degree(3000), 3);
        assert_eq!(config.colors_sh_degree(9000), 3);

        let config = config.with_colors_sh_degree_max(1);
        assert_eq!(config.colors_sh_degree(9000), 1);
    }

    #[test]
    fn refinement_schedule() {
        let config = RefinementConfig::default();
        let view_count = 50;

        assert!(!config.is_refinement_step(500));
        assert!(!config.is_refinement_step(550));
        assert!(config.is_refinement_step(600));

        // 3000 * k + [0, 100, ..., 100 + 50] are guarded
        assert!(!config.is_densification_step(3000, view_count));
        assert!(!config.is_densification_step(3100, view_count));
        assert!(config.is_densification_step(3200, view_count));
        assert!(config.is_densification_step(2900, view_count));
        assert!(!config.is_densification_step(15200, view_count));

        assert!(config.is_opacity_reset_step(100));
        assert!(config.is_opacity_reset_step(3100));
        assert!(!config.is_opacity_reset_step(3000));
        assert!(!config.is_opacity_reset_step(15100));
    }

    #[test]
    fn background_mode() {
        use rand::{rngs::StdRng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0);

        assert_eq!("Black".parse::<BackgroundMode>().unwrap(), BackgroundMode::Black);
        assert_eq!("white".parse::<BackgroundMode>().unwrap(), BackgroundMode::White);
        assert!(matches!(
            "gray".parse::<BackgroundMode>(),
            Err(Error::UnknownBackgroundMode(_))
        ));

        let background = BackgroundMode::Random.background_rgb(true, &mut rng);
        assert!(background.iter().all(|c| (0.0..1.0).contains(c)));
        assert_eq!(
            BackgroundMode::Random.background_rgb(false, &mut rng),
            BACKGROUND_RGB_EVALUATION
        );
        assert_eq!(BackgroundMode::White.background_rgb(true, &mut rng), [1.0; 3]);
    }

    #[test]
    fn big_model_and_validate() {
        let config = RefinementConfig::big_model();
        assert_eq!(config.cull_alpha_threshold, 0.005);
        assert!(!config.continue_cull_post_densification);
        config.validate().unwrap();

        let config = RefinementConfig::new().with_cull_alpha_threshold(0.5);
        assert!(matches!(config.validate(), Err(Error::Validation(..))));

        let config = Gaussian3dTrainerConfig::new().with_colors_sh_degree_max(4);
        assert!(matches!(config.validate(), Err(Error::Validation(..))));
    }
}
