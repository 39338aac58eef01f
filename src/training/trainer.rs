//! Training loop
//!
//! One [`Trainer`] drives a model through its epochs:
//! - learning rate policy applied at the start of every epoch
//! - forward pass, loss, backward pass with gradient accumulation
//! - optimizer step once per accumulation window
//! - scalar and image records to the metrics sink

use std::marker::PhantomData;

use burn::{
    module::AutodiffModule,
    optim::{GradientsAccumulator, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use tracing::{debug, info};

use super::evaluator::{EvalKind, EvalOutcome, Evaluator};
use super::loss::Criterion;
use super::scheduler::{LrPolicy, StepLr};
use super::state::{plot_interval, TrainingState};
use crate::dataset::SegmentationLoader;
use crate::model::Segmenter;
use crate::utils::error::Result;
use crate::utils::logging::batch_progress;
use crate::utils::summary::{tags, MetricsSink};
use crate::utils::visualization::{make_grid, sample_triplets, GridOptions};

/// Samples shown in each training grid
const TRAIN_GRID_SAMPLES: usize = 3;

/// Run-wide numbers the loop needs
#[derive(Debug, Clone, Copy)]
pub struct TrainerSettings {
    pub n_epochs: usize,
    pub n_ave_grad: usize,
    pub train_batch_size: usize,
}

/// Trainer for any segmentation model on an autodiff backend
pub struct Trainer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Segmenter<B>,
    O: Optimizer<M, B>,
{
    pub model: M,
    optimizer: O,
    /// Fresh optimizer, used when the poly policy restarts it
    make_optimizer: Box<dyn Fn() -> O>,
    accumulator: GradientsAccumulator<M>,
    criterion: Criterion,
    policy: LrPolicy,
    step_lr: Option<StepLr>,
    settings: TrainerSettings,
    pub state: TrainingState,
    backend: PhantomData<B>,
}

impl<B, M, O> Trainer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Segmenter<B>,
    M::InnerModule: Segmenter<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    pub fn new(
        model: M,
        make_optimizer: Box<dyn Fn() -> O>,
        criterion: Criterion,
        policy: LrPolicy,
        settings: TrainerSettings,
        start_epoch: usize,
    ) -> Self {
        let step_lr = match policy {
            LrPolicy::Step {
                base_lr,
                step_size,
                gamma,
            } => Some(StepLr::new(base_lr, step_size, gamma)),
            LrPolicy::Poly { .. } => None,
        };

        Self {
            model,
            optimizer: make_optimizer(),
            make_optimizer,
            accumulator: GradientsAccumulator::new(),
            criterion,
            policy,
            step_lr,
            settings,
            state: TrainingState::new(policy.base_lr(), start_epoch),
            backend: PhantomData,
        }
    }

    pub fn current_lr(&self) -> f64 {
        self.state.current_lr
    }

    /// Apply the learning rate policy for `epoch`
    pub fn begin_epoch(&mut self, epoch: usize) {
        self.state.epoch = epoch;

        if let Some(scheduler) = self.step_lr.as_mut() {
            self.state.current_lr = scheduler.step();
            debug!("(step lr policy) learning rate: {}", self.state.current_lr);
            return;
        }

        if let Some(lr) = self.policy.poly_update(epoch, self.settings.n_epochs) {
            info!("(poly lr policy) learning rate: {}", lr);
            self.optimizer = (self.make_optimizer)();
            self.state.current_lr = lr;
        }
    }

    /// One pass over the training loader
    ///
    /// Returns the mean batch loss, or `None` when the loader yields no batch.
    pub fn train_epoch(
        &mut self,
        epoch: usize,
        loader: &mut SegmentationLoader<B>,
        sink: &mut dyn MetricsSink,
    ) -> Result<Option<f64>> {
        self.begin_epoch(epoch);

        let num_batches = loader.num_batches();
        let interval = plot_interval(num_batches);
        let n_ave_grad = self.settings.n_ave_grad.max(1);
        let progress = batch_progress(num_batches, "train");
        let start = std::time::Instant::now();
        let mut epoch_loss = None;

        for (ii, batch) in loader.epoch().enumerate() {
            let batch = batch?;
            let n = batch.len();
            self.state.global_step += 1;
            let step = self.state.global_step;

            sink.add_scalar(tags::EPOCH_NUM, epoch as f64, step)?;

            let labels = batch.labels.squeeze::<3>(1);
            let outputs = self.model.segment(batch.images.clone());
            let loss = self.criterion.train_loss(outputs.clone(), labels.clone());
            let loss_value: f64 = loss.clone().into_scalar().elem();

            if let Some(mean) = self.state.add_train_loss(loss_value, ii, num_batches) {
                sink.add_scalar(tags::TOTAL_LOSS_EPOCH, mean, step)?;
                info!(
                    "[Epoch: {}, numImages: {:5}]",
                    epoch,
                    ii * self.settings.train_batch_size + n
                );
                info!("Loss: {:.6}", mean);
                info!("Execution time: {:.3}s", start.elapsed().as_secs_f64());
                epoch_loss = Some(mean);
            }

            // Backward the averaged gradient
            let loss = loss.div_scalar(n_ave_grad as f64);
            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.accumulator.accumulate(&self.model, grads);

            if self.state.register_backward(n_ave_grad) {
                sink.add_scalar(tags::TOTAL_LOSS_ITER, loss_value / n_ave_grad as f64, step)?;
                let grads = self.accumulator.grads();
                self.model = self
                    .optimizer
                    .step(self.state.current_lr, self.model.clone(), grads);
            }

            if ii % interval == 0 {
                let predictions = outputs.argmax(1).squeeze::<3>(1);
                let images = sample_triplets(
                    batch.images,
                    predictions,
                    labels,
                    TRAIN_GRID_SAMPLES,
                    self.model.num_classes(),
                )?;
                let grid = make_grid(&images, GridOptions::default())?;
                sink.add_image(tags::TRAIN_GRID, &grid, step)?;
            }

            progress.inc(1);
        }
        progress.finish_and_clear();

        Ok(epoch_loss)
    }

    /// Validation then test on the inference copy of the model
    pub fn evaluate(
        &mut self,
        epoch: usize,
        evaluator: &Evaluator,
        validation: &mut SegmentationLoader<B::InnerBackend>,
        test: &mut SegmentationLoader<B::InnerBackend>,
        sink: &mut dyn MetricsSink,
    ) -> Result<(Option<EvalOutcome>, Option<EvalOutcome>)> {
        let model = self.model.valid();
        let mut images_list = Vec::new();

        info!("Validation Running");
        let val = evaluator.run(
            EvalKind::Validation,
            &model,
            validation,
            epoch,
            &mut self.state,
            &mut images_list,
            sink,
        )?;

        info!("Testing Running");
        let ts = evaluator.run(
            EvalKind::Test,
            &model,
            test,
            epoch,
            &mut self.state,
            &mut images_list,
            sink,
        )?;

        Ok((val, ts))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;

    use burn::backend::Autodiff;
    use burn::data::dataset::Dataset;
    use burn::optim::AdamConfig;
    use burn_ndarray::NdArray;

    use super::*;
    use crate::dataset::{LoaderOptions, SegmentationItem};
    use crate::model::blocks::Upsample;
    use crate::model::{UNet, UNetConfig};
    use crate::training::scheduler::lr_poly;
    use crate::utils::summary::MemorySink;

    type TestBackend = Autodiff<NdArray<f32>>;

    const SIDE: usize = 16;

    /// Left half dark class 0, right half bright class 1
    struct Halves(usize);

    impl Dataset<SegmentationItem> for Halves {
        fn get(&self, index: usize) -> Option<SegmentationItem> {
            if index >= self.0 {
                return None;
            }
            let pixel = |i: usize| (i % SIDE >= SIDE / 2) as usize;
            let plane: Vec<f32> = (0..SIDE * SIDE).map(|i| pixel(i) as f32).collect();
            Some(SegmentationItem {
                image: plane.repeat(3),
                label: (0..SIDE * SIDE).map(|i| pixel(i) as i64).collect(),
                channels: 3,
                height: SIDE,
                width: SIDE,
                filename: format!("{index}.png"),
            })
        }

        fn len(&self) -> usize {
            self.0
        }
    }

    /// Trainer over a tiny UNet whose optimizer factory counts its calls
    fn trainer(
        policy: LrPolicy,
        n_ave_grad: usize,
        builds: Rc<Cell<usize>>,
    ) -> Trainer<TestBackend, UNet<TestBackend>, impl Optimizer<UNet<TestBackend>, TestBackend>> {
        let device = Default::default();
        let model = UNetConfig::new()
            .with_base_filters(2)
            .with_upsample(Upsample::Nearest)
            .init::<TestBackend>(&device);
        let make_optimizer = move || {
            builds.set(builds.get() + 1);
            AdamConfig::new().init::<TestBackend, UNet<TestBackend>>()
        };

        Trainer::new(
            model,
            Box::new(make_optimizer),
            Criterion::summed(),
            policy,
            TrainerSettings {
                n_epochs: 10,
                n_ave_grad,
                train_batch_size: 1,
            },
            0,
        )
    }

    fn loader(len: usize) -> SegmentationLoader<TestBackend> {
        SegmentationLoader::new(
            Arc::new(Halves(len)),
            LoaderOptions::training(1, 1, 0),
            Default::default(),
        )
        .unwrap()
    }

    #[test]
    fn accumulation_window_steps_once_per_window() {
        let step_policy = LrPolicy::Step {
            base_lr: 1e-3,
            step_size: 7,
            gamma: 0.1,
        };
        let mut trainer = trainer(step_policy, 2, Rc::new(Cell::new(0)));
        let mut sink = MemorySink::new();

        let loss = trainer.train_epoch(0, &mut loader(4), &mut sink).unwrap();
        assert!(loss.unwrap().is_finite());

        // One record per optimizer step, at the last batch of each window
        let steps: Vec<usize> = sink.series(tags::TOTAL_LOSS_ITER).iter().map(|&(s, _)| s).collect();
        assert_eq!(steps, vec![2, 4]);
        assert_eq!(trainer.state.ave_grad, 0);
        assert_eq!(sink.series(tags::EPOCH_NUM).len(), 4);
        assert_eq!(sink.series(tags::TOTAL_LOSS_EPOCH).len(), 1);

        // An incomplete window carries into the next epoch
        let mut trainer = self::trainer(step_policy, 3, Rc::new(Cell::new(0)));
        let mut sink = MemorySink::new();
        trainer.train_epoch(0, &mut loader(4), &mut sink).unwrap();
        assert_eq!(sink.series(tags::TOTAL_LOSS_ITER).len(), 1);
        assert_eq!(trainer.state.ave_grad, 1);
    }

    #[test]
    fn poly_policy_rebuilds_optimizer() {
        let builds = Rc::new(Cell::new(0));
        let policy = LrPolicy::Poly {
            base_lr: 1.0,
            epoch_size: 2,
            power: 1.0,
        };
        let mut trainer = trainer(policy, 1, builds.clone());
        assert_eq!(builds.get(), 1);

        trainer.begin_epoch(0);
        assert_eq!(builds.get(), 1);
        assert_eq!(trainer.current_lr(), 1.0);

        trainer.begin_epoch(1);
        assert_eq!(builds.get(), 2);
        assert_eq!(trainer.current_lr(), lr_poly(1.0, 1, 10, 1.0));

        trainer.begin_epoch(2);
        assert_eq!(builds.get(), 2);

        trainer.begin_epoch(3);
        assert_eq!(builds.get(), 3);
        assert_eq!(trainer.current_lr(), lr_poly(1.0, 3, 10, 1.0));
    }

    #[test]
    fn step_policy_decays_without_rebuilding() {
        let builds = Rc::new(Cell::new(0));
        let policy = LrPolicy::Step {
            base_lr: 1.0,
            step_size: 2,
            gamma: 0.5,
        };
        let mut trainer = trainer(policy, 1, builds.clone());

        trainer.begin_epoch(0);
        assert_eq!(trainer.current_lr(), 1.0);
        trainer.begin_epoch(1);
        assert_eq!(trainer.current_lr(), 0.5);
        assert_eq!(builds.get(), 1);
    }
}
