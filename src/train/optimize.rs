//! Per-group Adam updaters and the synchronization of their states.

pub use super::*;
pub use burn::optim::{GradientsParams, Optimizer};

use burn::{
    module::Param,
    optim::{adaptor::OptimizerAdaptor, record::AdaptorRecord, Adam, AdamState},
};
use std::fmt;

pub type AdamParamUpdater<AB, const D: usize> = OptimizerAdaptor<
    Adam,
    Param<Tensor<AB, D>>,
    AB,
>;

/// The parameter groups of [`Gaussian3dScene`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ParamGroup {
    ColorsShDc,
    ColorsShRest,
    Opacities,
    Positions,
    Rotations,
    Scalings,
}

/// Keeping the optimizer states aligned with the points of the scene.
///
/// The `i`-th entry of every state describes the `i`-th point.
/// A state that does not exist yet is not an error, so every operation
/// is a no-op before the first optimizer step.
pub trait OptimizerStateSynchronizer<B: Backend> {
    /// Appending `count` zero-filled entries to every state.
    fn append_zero_states(
        &mut self,
        count: usize,
    ) -> Result<(), Error>;

    /// Retaining the entries at `indices` of every state in the given order.
    fn retain_states(
        &mut self,
        indices: Tensor<B, 1, Int>,
    ) -> Result<(), Error>;

    /// Zeroing the moments of the states of `group`.
    fn reset_states(
        &mut self,
        group: ParamGroup,
    ) -> Result<(), Error>;

    /// Returning [`Error::MismatchedPointCount`] if any state
    /// is not aligned with `point_count` points.
    fn check_point_count(
        &self,
        point_count: usize,
    ) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct Gaussian3dOptimizer<AB: AutodiffBackend> {
    pub colors_sh_dc_learning_rate: LearningRate,
    pub colors_sh_rest_learning_rate: LearningRate,
    pub opacities_learning_rate: LearningRate,
    pub positions_learning_rate: LearningRate,
    pub positions_learning_rate_decay: LearningRate,
    pub rotations_learning_rate: LearningRate,
    pub scalings_learning_rate: LearningRate,
    pub(super) colors_sh_dc_param_updater: AdamParamUpdater<AB, 2>,
    pub(super) colors_sh_rest_param_updater: AdamParamUpdater<AB, 3>,
    pub(super) opacities_param_updater: AdamParamUpdater<AB, 2>,
    pub(super) positions_param_updater: AdamParamUpdater<AB, 2>,
    pub(super) rotations_param_updater: AdamParamUpdater<AB, 2>,
    pub(super) scalings_param_updater: AdamParamUpdater<AB, 2>,
}

impl ParamGroup {
    pub const ALL: [Self; 6] = [
        Self::ColorsShDc,
        Self::ColorsShRest,
        Self::Opacities,
        Self::Positions,
        Self::Rotations,
        Self::Scalings,
    ];
}

impl fmt::Display for ParamGroup {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        let name = match self {
            Self::ColorsShDc => "colors_sh_dc",
            Self::ColorsShRest => "colors_sh_rest",
            Self::Opacities => "opacities",
            Self::Positions => "positions",
            Self::Rotations => "rotations",
            Self::Scalings => "scalings",
        };
        f.write_str(name)
    }
}

impl<AB: AutodiffBackend> Gaussian3dOptimizer<AB> {
    /// Applying one gradient step to every parameter group of `scene`.
    ///
    /// The learning rate of positions decays after the step.
    pub fn step(
        &mut self,
        mut scene: Gaussian3dScene<AB>,
        mut grads: GradientsParams,
    ) -> Gaussian3dScene<AB> {
        scene.colors_sh_dc = Self::step_param(
            &mut self.colors_sh_dc_param_updater,
            self.colors_sh_dc_learning_rate,
            scene.colors_sh_dc,
            &mut grads,
        );
        scene.colors_sh_rest = Self::step_param(
            &mut self.colors_sh_rest_param_updater,
            self.colors_sh_rest_learning_rate,
            scene.colors_sh_rest,
            &mut grads,
        );
        scene.opacities = Self::step_param(
            &mut self.opacities_param_updater,
            self.opacities_learning_rate,
            scene.opacities,
            &mut grads,
        );
        scene.positions = Self::step_param(
            &mut self.positions_param_updater,
            self.positions_learning_rate,
            scene.positions,
            &mut grads,
        );
        scene.rotations = Self::step_param(
            &mut self.rotations_param_updater,
            self.rotations_learning_rate,
            scene.rotations,
            &mut grads,
        );
        scene.scalings = Self::step_param(
            &mut self.scalings_param_updater,
            self.scalings_learning_rate,
            scene.scalings,
            &mut grads,
        );

        self.positions_learning_rate *= self.positions_learning_rate_decay;

        scene
    }

    /// Decaying the learning rate of positions as if `steps` steps were taken.
    pub fn decay_positions_learning_rate(
        &mut self,
        steps: u64,
    ) -> &mut Self {
        self.positions_learning_rate *= self
            .positions_learning_rate_decay
            .powf(steps.min(i32::MAX as u64) as LearningRate);
        self
    }

    /// The entry count of the states of `group`, or `None` before the first step.
    pub fn state_point_count(
        &self,
        group: ParamGroup,
    ) -> Option<usize> {
        match group {
            ParamGroup::ColorsShDc => Self::point_count_of(&self.colors_sh_dc_param_updater),
            ParamGroup::ColorsShRest => {
                Self::point_count_of(&self.colors_sh_rest_param_updater)
            },
            ParamGroup::Opacities => Self::point_count_of(&self.opacities_param_updater),
            ParamGroup::Positions => Self::point_count_of(&self.positions_param_updater),
            ParamGroup::Rotations => Self::point_count_of(&self.rotations_param_updater),
            ParamGroup::Scalings => Self::point_count_of(&self.scalings_param_updater),
        }
    }

    fn step_param<const D: usize>(
        updater: &mut AdamParamUpdater<AB, D>,
        learning_rate: LearningRate,
        mut param: Param<Tensor<AB, D>>,
        grads: &mut GradientsParams,
    ) -> Param<Tensor<AB, D>> {
        let id = param.id.to_owned();
        if let Some(grad) = grads.remove::<AB::InnerBackend, D>(id) {
            let mut grads = GradientsParams::new();
            grads.register(id, grad);
            param = updater.step(learning_rate, param, grads);
        }
        param
    }

    fn point_count_of<const D: usize>(updater: &AdamParamUpdater<AB, D>) -> Option<usize> {
        updater.to_record().into_values().next().map(|record| {
            let state: AdamState<AB::InnerBackend, D> = record.into_state();
            state.momentum.moment_1.dims()[0]
        })
    }

    /// Mapping both moments of every state in `updater`.
    fn map_states<const D: usize>(
        updater: &mut AdamParamUpdater<AB, D>,
        map: impl Fn(Tensor<AB::InnerBackend, D>) -> Tensor<AB::InnerBackend, D>,
    ) {
        let record = updater.to_record();
        if record.is_empty() {
            return;
        }

        let record = record
            .into_iter()
            .map(|(id, record)| {
                let mut state: AdamState<AB::InnerBackend, D> = record.into_state();
                state.momentum.moment_1 = map(state.momentum.moment_1);
                state.momentum.moment_2 = map(state.momentum.moment_2);
                (id, AdaptorRecord::from_state(state))
            })
            .collect();

        *updater = updater.to_owned().load_record(record);
    }

    fn append_zeros<const D: usize>(
        updater: &mut AdamParamUpdater<AB, D>,
        count: usize,
    ) {
        Self::map_states(updater, |moment| {
            let mut shape = moment.dims();
            shape[0] = count;
            let zeros = Tensor::zeros(shape, &moment.device());
            Tensor::cat(vec![moment, zeros], 0)
        });
    }

    fn select<const D: usize>(
        updater: &mut AdamParamUpdater<AB, D>,
        indices: &Tensor<AB::InnerBackend, 1, Int>,
    ) {
        Self::map_states(updater, |moment| moment.select(0, indices.to_owned()));
    }

    fn zeros<const D: usize>(updater: &mut AdamParamUpdater<AB, D>) {
        Self::map_states(updater, |moment| moment.zeros_like());
    }
}

impl<AB: AutodiffBackend> OptimizerStateSynchronizer<AB> for Gaussian3dOptimizer<AB> {
    fn append_zero_states(
        &mut self,
        count: usize,
    ) -> Result<(), Error> {
        if count == 0 {
            return Ok(());
        }

        Self::append_zeros(&mut self.colors_sh_dc_param_updater, count);
        Self::append_zeros(&mut self.colors_sh_rest_param_updater, count);
        Self::append_zeros(&mut self.opacities_param_updater, count);
        Self::append_zeros(&mut self.positions_param_updater, count);
        Self::append_zeros(&mut self.rotations_param_updater, count);
        Self::append_zeros(&mut self.scalings_param_updater, count);

        Ok(())
    }

    fn retain_states(
        &mut self,
        indices: Tensor<AB, 1, Int>,
    ) -> Result<(), Error> {
        let indices = indices.inner();

        Self::select(&mut self.colors_sh_dc_param_updater, &indices);
        Self::select(&mut self.colors_sh_rest_param_updater, &indices);
        Self::select(&mut self.opacities_param_updater, &indices);
        Self::select(&mut self.positions_param_updater, &indices);
        Self::select(&mut self.rotations_param_updater, &indices);
        Self::select(&mut self.scalings_param_updater, &indices);

        Ok(())
    }

    fn reset_states(
        &mut self,
        group: ParamGroup,
    ) -> Result<(), Error> {
        match group {
            ParamGroup::ColorsShDc => Self::zeros(&mut self.colors_sh_dc_param_updater),
            ParamGroup::ColorsShRest => Self::zeros(&mut self.colors_sh_rest_param_updater),
            ParamGroup::Opacities => Self::zeros(&mut self.opacities_param_updater),
            ParamGroup::Positions => Self::zeros(&mut self.positions_param_updater),
            ParamGroup::Rotations => Self::zeros(&mut self.rotations_param_updater),
            ParamGroup::Scalings => Self::zeros(&mut self.scalings_param_updater),
        }

        Ok(())
    }

    fn check_point_count(
        &self,
        point_count: usize,
    ) -> Result<(), Error> {
        for group in ParamGroup::ALL {
            match self.state_point_count(group) {
                Some(count) if count != point_count => {
                    return Err(Error::MismatchedPointCount(
                        format!("Optimizer state of {group}"),
                        count,
                        point_count,
                    ));
                },
                _ => {},
            }
        }

        Ok(())
    }
}

impl<AB: AutodiffBackend> fmt::Debug for Gaussian3dOptimizer<AB> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Gaussian3dOptimizer")
            .field("optimizer", &format!("Adam<{}>", AB::name()))
            .field("colors_sh_dc_learning_rate", &self.colors_sh_dc_learning_rate)
            .field("colors_sh_rest_learning_rate", &self.colors_sh_rest_learning_rate)
            .field("opacities_learning_rate", &self.opacities_learning_rate)
            .field("positions_learning_rate", &self.positions_learning_rate)
            .field(
                "positions_learning_rate_decay",
                &self.positions_learning_rate_decay,
            )
            .field("rotations_learning_rate", &self.rotations_learning_rate)
            .field("scalings_learning_rate", &self.scalings_learning_rate)
            .finish()
    }
}

impl<AB: AutodiffBackend> Default for Gaussian3dOptimizer<AB> {
    #[inline]
    fn default() -> Self {
        Gaussian3dOptimizerConfig::default().init(Gaussian3dTrainerConfig::default().iteration_count)
    }
}
