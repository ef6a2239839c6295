//! Adaptive density control of 3DGS.

pub use super::*;

use crate::function::TensorBoolExtension;

/// The density controller.
///
/// It edits the scene, the optimizer states and the statistics together,
/// so that they stay aligned after every refinement.
#[derive(Clone, Debug)]
pub struct DensityController {
    pub config: RefinementConfig,
    /// The count of training views.
    pub view_count: usize,
}

/// The outcome of a refinement.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RefinementReport {
    pub culled_count: usize,
    pub duplicated_count: usize,
    pub is_opacity_reset: bool,
    /// The point count after the refinement.
    pub point_count: usize,
    pub split_count: usize,
}

/// The outcome of a culling.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CullReport {
    pub below_alpha_count: usize,
    pub culled_count: usize,
    pub remaining_count: usize,
    pub too_big_count: usize,
}

impl DensityController {
    pub fn new(
        config: RefinementConfig,
        view_count: usize,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self { config, view_count })
    }

    /// Refining the scene at the step of `state`.
    ///
    /// It returns `None` if the step is not a refinement step,
    /// in which case nothing is changed.
    /// Otherwise, the statistics are cleared afterward.
    pub fn refine<B: Backend>(
        &self,
        scene: &mut Gaussian3dScene<B>,
        optimizer: &mut impl OptimizerStateSynchronizer<B>,
        state: &mut TrainingState<B>,
    ) -> Result<Option<RefinementReport>, Error> {
        let step = state.step;
        if !self.config.is_refinement_step(step) {
            return Ok(None);
        }

        Self::check_point_count(scene, optimizer, state)?;

        let mut report = RefinementReport::default();

        if self.config.is_densification_step(step, self.view_count) {
            let (split_count, duplicated_count, cull) =
                self.densify(scene, optimizer, state)?;
            report.split_count = split_count;
            report.duplicated_count = duplicated_count;
            report.culled_count = cull.culled_count;
        } else if step >= self.config.stop_split_at
            && self.config.continue_cull_post_densification
        {
            report.culled_count = self.cull(scene, optimizer, state, None)?.culled_count;
        }

        if self.config.is_opacity_reset_step(step) {
            self.reset_opacities(scene, optimizer)?;
            report.is_opacity_reset = true;
        }

        state.clear();
        backend::reclaim::<B>(&scene.device());

        report.point_count = scene.point_count();

        log::info!(
            target: "gausplat::trainer::refine",
            "Refined at step {step} > {report:?}, scene size {}",
            scene.size_readable(),
        );

        Ok(Some(report))
    }

    /// Splitting and duplicating the points with large mean gradients.
    ///
    /// The split parents are culled afterward.
    /// It returns the split count, the duplicated count and the cull report.
    pub fn densify<B: Backend>(
        &self,
        scene: &mut Gaussian3dScene<B>,
        optimizer: &mut impl OptimizerStateSynchronizer<B>,
        state: &mut TrainingState<B>,
    ) -> Result<(usize, usize, CullReport), Error> {
        Self::check_point_count(scene, optimizer, state)?;

        let config = &self.config;
        let step = state.step;
        let point_count = scene.point_count();
        let device = scene.device();

        // [P]
        let is_out = state
            .positions_2d_grad_norm_mean()?
            .greater_elem(config.densify_grad_threshold);
        let scalings_max: Tensor<B, 1> =
            Gaussian3dScene::make_scalings(scene.inner_points().scalings)
                .max_dim(1)
                .squeeze(1);
        let is_large = scalings_max.greater_elem(config.densify_size_threshold);

        let mut is_split = is_large.to_owned();
        if step < config.stop_screen_size_at {
            let radii_max = state.radii_2d_max_normalized.to_owned().ok_or_else(|| {
                Error::MissingStatistics("radii_2d_max_normalized".into())
            })?;
            is_split = is_split.logical_or(radii_max.greater_elem(config.split_screen_size));
        }
        let is_split = is_split.logical_and(is_out.to_owned());
        let is_duplicated = is_large
            .bool_not()
            .logical_and(is_out)
            .logical_and(is_split.to_owned().bool_not());

        let split_count = is_split.to_owned().count_true();
        let duplicated_count = is_duplicated.to_owned().count_true();

        let points = scene
            .make_split_points(is_split.to_owned(), config.n_split_samples)
            .cat(scene.make_duplicated_points(is_duplicated))?;
        let new_point_count = Self::append_points(scene, optimizer, state, points)?;

        // The split parents are marked for culling
        let is_split = Tensor::cat(
            vec![
                is_split,
                Tensor::<B, 1, Int>::zeros([new_point_count - point_count], &device).bool(),
            ],
            0,
        );
        scene.shrink_scalings(is_split.to_owned());

        log::info!(
            target: "gausplat::trainer::refine",
            "Split {split_count} gaussians, duplicated {duplicated_count} gaussians, \
            {new_point_count} gaussians now",
        );

        let cull = self.cull(scene, optimizer, state, Some(is_split))?;

        Ok((split_count, duplicated_count, cull))
    }

    /// Culling the transparent or oversized points,
    /// and the points where `extra_mask` is `true`.
    ///
    /// The relative order of the remaining points is preserved.
    pub fn cull<B: Backend>(
        &self,
        scene: &mut Gaussian3dScene<B>,
        optimizer: &mut impl OptimizerStateSynchronizer<B>,
        state: &mut TrainingState<B>,
        extra_mask: Option<Tensor<B, 1, Bool>>,
    ) -> Result<CullReport, Error> {
        Self::check_point_count(scene, optimizer, state)?;

        let config = &self.config;
        let step = state.step;
        let point_count = scene.point_count();
        let points = scene.inner_points();

        // [P]
        let opacities: Tensor<B, 1> =
            Gaussian3dScene::make_opacities(points.opacities).squeeze(1);
        let is_below_alpha = opacities.lower_elem(config.cull_alpha_threshold);
        let below_alpha_count = is_below_alpha.to_owned().count_true();
        let mut is_culled = is_below_alpha;

        let mut too_big_count = 0;
        if step > config.reset_interval() {
            let scalings_max: Tensor<B, 1> =
                Gaussian3dScene::make_scalings(points.scalings).max_dim(1).squeeze(1);
            let mut is_too_big = scalings_max.greater_elem(config.cull_scale_threshold);
            if step < config.stop_screen_size_at {
                if let Some(radii_max) = state.radii_2d_max_normalized.to_owned() {
                    is_too_big = is_too_big
                        .logical_or(radii_max.greater_elem(config.cull_screen_size));
                }
            }
            too_big_count = is_too_big.to_owned().count_true();
            is_culled = is_culled.logical_or(is_too_big);
        }

        if let Some(extra_mask) = extra_mask {
            let mask_count = extra_mask.dims()[0];
            if mask_count != point_count {
                return Err(Error::MismatchedPointCount(
                    "extra_mask".into(),
                    mask_count,
                    point_count,
                ));
            }
            is_culled = is_culled.logical_or(extra_mask);
        }

        let culled_count = is_culled.to_owned().count_true();
        let remaining_count =
            Self::retain_points(scene, optimizer, state, is_culled.bool_not().indices())?;

        log::info!(
            target: "gausplat::trainer::refine",
            "Culled {culled_count} gaussians \
            ({below_alpha_count} below alpha thresh, {too_big_count} too bigs, \
            {remaining_count} remaining)",
        );

        Ok(CullReport {
            below_alpha_count,
            culled_count,
            remaining_count,
            too_big_count,
        })
    }

    /// Clamping the opacities to at most twice the cull threshold,
    /// and zeroing the optimizer states of opacities.
    pub fn reset_opacities<B: Backend>(
        &self,
        scene: &mut Gaussian3dScene<B>,
        optimizer: &mut impl OptimizerStateSynchronizer<B>,
    ) -> Result<(), Error> {
        let opacity_max = 2.0 * self.config.cull_alpha_threshold;
        let opacity_logit_max = (opacity_max / (1.0 - opacity_max)).ln();

        let opacities = scene.inner_points().opacities.clamp_max(opacity_logit_max);
        scene.set_inner_opacities(opacities);
        optimizer.reset_states(ParamGroup::Opacities)
    }

    /// Appending `points` to the scene, the optimizer states and the statistics.
    ///
    /// It returns the new point count.
    fn append_points<B: Backend>(
        scene: &mut Gaussian3dScene<B>,
        optimizer: &mut impl OptimizerStateSynchronizer<B>,
        state: &mut TrainingState<B>,
        points: Gaussian3dPoints<B>,
    ) -> Result<usize, Error> {
        let count = points.point_count()?;
        let point_count = scene.append_inner_points(points)?;
        optimizer.append_zero_states(count)?;
        state.append_zeros(count);

        Self::check_point_count(scene, optimizer, state)?;
        Ok(point_count)
    }

    /// Retaining the points at `indices` in the scene, the optimizer states
    /// and the statistics.
    ///
    /// It returns the new point count.
    fn retain_points<B: Backend>(
        scene: &mut Gaussian3dScene<B>,
        optimizer: &mut impl OptimizerStateSynchronizer<B>,
        state: &mut TrainingState<B>,
        indices: Tensor<B, 1, Int>,
    ) -> Result<usize, Error> {
        let point_count = scene.retain(indices.to_owned())?;
        optimizer.retain_states(indices.to_owned())?;
        state.retain(indices);

        Self::check_point_count(scene, optimizer, state)?;
        Ok(point_count)
    }

    fn check_point_count<B: Backend>(
        scene: &Gaussian3dScene<B>,
        optimizer: &impl OptimizerStateSynchronizer<B>,
        state: &TrainingState<B>,
    ) -> Result<(), Error> {
        let point_count = scene.point_count();
        optimizer.check_point_count(point_count)?;
        state.check_point_count(point_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    /// Optimizer states with only the entry count.
    #[derive(Debug, Default)]
    struct StateCounter {
        point_count: Option<usize>,
        opacities_reset_count: usize,
    }

    impl OptimizerStateSynchronizer<B> for StateCounter {
        fn append_zero_states(
            &mut self,
            count: usize,
        ) -> Result<(), Error> {
            if let Some(point_count) = self.point_count.as_mut() {
                *point_count += count;
            }
            Ok(())
        }

        fn retain_states(
            &mut self,
            indices: Tensor<B, 1, Int>,
        ) -> Result<(), Error> {
            if let Some(point_count) = self.point_count.as_mut() {
                *point_count = indices.dims()[0];
            }
            Ok(())
        }

        fn reset_states(
            &mut self,
            group: ParamGroup,
        ) -> Result<(), Error> {
            if group == ParamGroup::Opacities {
                self.opacities_reset_count += 1;
            }
            Ok(())
        }

        fn check_point_count(
            &self,
            point_count: usize,
        ) -> Result<(), Error> {
            match self.point_count {
                Some(count) if count != point_count => Err(Error::MismatchedPointCount(
                    "StateCounter".into(),
                    count,
                    point_count,
                )),
                _ => Ok(()),
            }
        }
    }

    fn make_scene(
        opacities: &[f32],
        scalings: &[f32],
    ) -> Gaussian3dScene<B> {
        let device = Default::default();
        let point_count = opacities.len();
        let mut points = Gaussian3dPoints::<B>::zeros(point_count, 3, &device);

        points.opacities = Tensor::from_data(
            TensorData::new(
                opacities.iter().map(|o| (o / (1.0 - o)).ln()).collect::<Vec<_>>(),
                [point_count, 1],
            ),
            &device,
        );
        points.positions = Tensor::from_data(
            TensorData::new(
                (0..point_count)
                    .flat_map(|i| [i as f32, 0.0, 0.0])
                    .collect::<Vec<_>>(),
                [point_count, 3],
            ),
            &device,
        );
        points.rotations = Tensor::from_data(
            TensorData::new([0.0_f32, 0.0, 0.0, 1.0].repeat(point_count), [point_count, 4]),
            &device,
        );
        points.scalings = Tensor::from_data(
            TensorData::new(
                scalings.iter().flat_map(|s| [s.ln(); 3]).collect::<Vec<_>>(),
                [point_count, 3],
            ),
            &device,
        );

        Gaussian3dScene::from_inner_points(points).unwrap()
    }

    fn make_state(
        step: u64,
        grad_norm_sums: &[f32],
    ) -> TrainingState<B> {
        let device = Default::default();
        let point_count = grad_norm_sums.len();
        TrainingState {
            step,
            positions_2d_grad_norm_sum: Some(Tensor::from_data(
                TensorData::new(grad_norm_sums.to_vec(), [point_count]),
                &device,
            )),
            visible_counts: Some(Tensor::ones([point_count], &device)),
            radii_2d_max_normalized: Some(Tensor::zeros([point_count], &device)),
            last_image_size: Some((100, 100)),
        }
    }

    fn first_coordinates(scene: &Gaussian3dScene<B>) -> Vec<f32> {
        scene
            .get_positions()
            .slice([0..scene.point_count(), 0..1])
            .into_data()
            .to_vec::<f32>()
            .unwrap()
    }

    #[test]
    fn warmup_keeps_point_count() {
        let controller = DensityController::new(RefinementConfig::default(), 10).unwrap();
        let mut scene = make_scene(&[0.01; 8], &[10.0; 8]);
        let mut optimizer = StateCounter::default();

        for step in 0..=controller.config.warmup_length {
            let mut state = make_state(step, &[1.0; 8]);
            let output = controller.refine(&mut scene, &mut optimizer, &mut state).unwrap();
            assert_eq!(output, None);
            assert!(state.is_accumulating());
            assert_eq!(scene.point_count(), 8);
        }
    }

    #[test]
    fn post_densification() {
        let opacities = [0.01, 0.9, 0.9, 0.01];
        let scalings = [0.001, 0.001, 0.1, 0.001];

        let controller = DensityController::new(RefinementConfig::default(), 10).unwrap();
        let mut scene = make_scene(&opacities, &scalings);
        let mut optimizer = StateCounter {
            point_count: Some(4),
            ..Default::default()
        };
        let mut state = make_state(15000, &[1.0; 4]);

        let report = controller
            .refine(&mut scene, &mut optimizer, &mut state)
            .unwrap()
            .unwrap();
        assert_eq!(report.split_count, 0);
        assert_eq!(report.duplicated_count, 0);
        assert_eq!(report.culled_count, 2);
        assert!(!report.is_opacity_reset);
        assert_eq!(report.point_count, 2);
        assert_eq!(first_coordinates(&scene), [1.0, 2.0]);
        assert_eq!(optimizer.point_count, Some(2));
        assert!(!state.is_accumulating());

        let controller = DensityController::new(RefinementConfig::big_model(), 10).unwrap();
        let mut scene = make_scene(&[0.001, 0.9, 0.9, 0.001], &scalings);
        let mut state = make_state(20000, &[1.0; 4]);
        let report = controller
            .refine(&mut scene, &mut StateCounter::default(), &mut state)
            .unwrap()
            .unwrap();
        assert_eq!(report.culled_count, 0);
        assert_eq!(report.point_count, 4);
    }

    #[test]
    fn cull_by_alpha_or_scale() {
        let controller = DensityController::new(RefinementConfig::default(), 10).unwrap();
        // Only below alpha, only too big, neither, both, neither
        let mut scene = make_scene(&[0.05, 0.9, 0.9, 0.05, 0.5], &[0.01, 1.0, 0.01, 1.0, 0.2]);
        let mut optimizer = StateCounter {
            point_count: Some(5),
            ..Default::default()
        };
        let mut state = make_state(3500, &[0.0; 5]);

        let report = controller.cull(&mut scene, &mut optimizer, &mut state, None).unwrap();
        assert_eq!(
            report,
            CullReport {
                below_alpha_count: 2,
                culled_count: 3,
                remaining_count: 2,
                too_big_count: 2,
            }
        );
        assert_eq!(first_coordinates(&scene), [2.0, 4.0]);
        assert_eq!(optimizer.point_count, Some(2));
        state.check_point_count(2).unwrap();

        // The scale criterion waits for the first opacity reset
        let mut scene = make_scene(&[0.9, 0.9], &[1.0, 0.01]);
        let mut state = make_state(2000, &[0.0; 2]);
        let report = controller
            .cull(&mut scene, &mut StateCounter::default(), &mut state, None)
            .unwrap();
        assert_eq!(report.culled_count, 0);
    }

    #[test]
    fn cull_by_screen_size() {
        let controller = DensityController::new(RefinementConfig::default(), 10).unwrap();
        let mut scene = make_scene(&[0.9, 0.9], &[0.01, 0.01]);
        let mut state = make_state(3500, &[0.0; 2]);
        state.radii_2d_max_normalized =
            Some(Tensor::from_data(TensorData::from([0.5_f32, 0.1]), &Default::default()));

        let report = controller
            .cull(&mut scene, &mut StateCounter::default(), &mut state, None)
            .unwrap();
        assert_eq!(report.too_big_count, 1);
        assert_eq!(first_coordinates(&scene), [1.0]);
    }

    #[test]
    fn densify_conservation() {
        let controller = DensityController::new(RefinementConfig::default(), 10).unwrap();
        // Split, split, duplicate, duplicate, steady, steady
        let mut scene = make_scene(&[0.9; 6], &[0.1, 0.1, 0.001, 0.001, 0.1, 0.001]);
        let mut optimizer = StateCounter {
            point_count: Some(6),
            ..Default::default()
        };
        let mut state = make_state(3200, &[1.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
        let scalings = scene.inner_points().scalings;

        let report = controller
            .refine(&mut scene, &mut optimizer, &mut state)
            .unwrap()
            .unwrap();
        assert_eq!(report.split_count, 2);
        assert_eq!(report.duplicated_count, 2);
        assert_eq!(report.culled_count, 2);
        assert_eq!(report.point_count, 6 + 2 * 2 + 2 - 2);
        assert_eq!(optimizer.point_count, Some(10));
        assert!(!state.is_accumulating());

        let coordinates = first_coordinates(&scene);
        assert_eq!(coordinates[..4], [2.0, 3.0, 4.0, 5.0]);
        assert_eq!(coordinates[8..], [2.0, 3.0]);

        // Unchanged scalings of the kept points and shrunk scalings of the children
        let scalings_target = Tensor::cat(
            vec![
                scalings.to_owned().slice([2..6, 0..3]),
                (scalings.to_owned().slice([0..2, 0..3]) - SPLIT_SCALING_DIVISOR.ln())
                    .repeat_dim(0, 2),
                scalings.slice([2..4, 0..3]),
            ],
            0,
        );
        scene
            .scalings
            .val()
            .into_data()
            .assert_approx_eq(&scalings_target.into_data(), 5);
    }

    #[test]
    fn densify_by_screen_size() {
        let controller = DensityController::new(RefinementConfig::default(), 10).unwrap();
        let mut scene = make_scene(&[0.9; 2], &[0.001; 2]);
        let mut state = make_state(3200, &[1.0, 1.0]);
        state.radii_2d_max_normalized =
            Some(Tensor::from_data(TensorData::from([0.1_f32, 0.0]), &Default::default()));

        let (split_count, duplicated_count, _) = controller
            .densify(&mut scene, &mut StateCounter::default(), &mut state)
            .unwrap();
        assert_eq!(split_count, 1);
        assert_eq!(duplicated_count, 1);
        assert_eq!(scene.point_count(), 2 + 2 + 1 - 1);
    }

    #[test]
    fn densify_without_statistics() {
        let controller = DensityController::new(RefinementConfig::default(), 10).unwrap();
        let mut scene = make_scene(&[0.9; 3], &[0.1; 3]);
        let mut state = TrainingState {
            step: 3200,
            ..Default::default()
        };

        let output = controller.refine(&mut scene, &mut StateCounter::default(), &mut state);
        assert!(matches!(output, Err(Error::MissingStatistics(_))));
        assert_eq!(scene.point_count(), 3);
    }

    #[test]
    fn mismatched_optimizer_states() {
        let controller = DensityController::new(RefinementConfig::default(), 10).unwrap();
        let mut scene = make_scene(&[0.9; 3], &[0.1; 3]);
        let mut optimizer = StateCounter {
            point_count: Some(2),
            ..Default::default()
        };
        let mut state = make_state(3200, &[1.0; 3]);

        let output = controller.refine(&mut scene, &mut optimizer, &mut state);
        assert!(matches!(output, Err(Error::MismatchedPointCount(_, 2, 3))));
        assert_eq!(scene.point_count(), 3);
    }

    #[test]
    fn reset_opacities() {
        let controller = DensityController::new(RefinementConfig::default(), 10).unwrap();
        let mut scene = make_scene(&[0.9, 0.1, 0.5], &[0.001; 3]);
        let mut optimizer = StateCounter::default();
        let mut state = make_state(3100, &[0.0; 3]);

        let report = controller
            .refine(&mut scene, &mut optimizer, &mut state)
            .unwrap()
            .unwrap();
        assert!(report.is_opacity_reset);
        assert_eq!(report.point_count, 3);
        assert_eq!(optimizer.opacities_reset_count, 1);

        let target = TensorData::new(vec![0.2_f32, 0.1, 0.2], [3, 1]);
        let opacities = scene.get_opacities().into_data();
        opacities.assert_approx_eq(&target, 5);

        controller.reset_opacities(&mut scene, &mut optimizer).unwrap();
        assert_eq!(scene.get_opacities().into_data(), opacities);

        let mut state = make_state(3300, &[0.0; 3]);
        let report = controller
            .refine(&mut scene, &mut optimizer, &mut state)
            .unwrap()
            .unwrap();
        assert!(!report.is_opacity_reset);
        assert_eq!(optimizer.opacities_reset_count, 2);
    }
}
