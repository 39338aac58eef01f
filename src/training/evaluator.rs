//! Validation and test passes
//!
//! Both run without an autodiff graph. The validation pass ends with a grid
//! of up to two samples; the test pass appends one sample of its own to that
//! grid and also writes a side-by-side PNG for every batch.

use std::path::PathBuf;

use burn::tensor::{backend::Backend, ElementConversion, Int, Tensor};
use tracing::info;

use super::loss::Criterion;
use super::state::{is_last_batch, TrainingState};
use crate::dataset::SegmentationLoader;
use crate::model::Segmenter;
use crate::utils::error::{Result, SegError};
use crate::utils::logging::batch_progress;
use crate::utils::metrics::batch_iou;
use crate::utils::summary::{tags, MetricsSink};
use crate::utils::visualization::{
    batch_to_images, decode_segmap_batch, make_grid, sample_triplets, save_test_image, ChwImage,
    GridOptions,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalKind {
    Validation,
    Test,
}

impl EvalKind {
    fn loss_tag(&self) -> &'static str {
        match self {
            Self::Validation => tags::VAL_LOSS_EPOCH,
            Self::Test => tags::TEST_LOSS_EPOCH,
        }
    }

    fn miou_tag(&self) -> &'static str {
        match self {
            Self::Validation => tags::VAL_MIOU,
            Self::Test => tags::TEST_MIOU,
        }
    }

    fn grid_tag(&self) -> &'static str {
        match self {
            Self::Validation => tags::VALIDATION_GRID,
            Self::Test => tags::TEST_GRID,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::Validation => "Validation",
            Self::Test => "Test",
        }
    }
}

/// Summary of one evaluation pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalOutcome {
    pub loss: f64,
    pub miou: f64,
    pub num_images: usize,
}

pub struct Evaluator {
    pub criterion: Criterion,
    /// Divides the summed IoU and numbers the images of both passes
    pub train_batch_size: usize,
    /// Numbers the images in the test summary line
    pub test_batch_size: usize,
    pub results_dir: PathBuf,
}

impl Evaluator {
    /// One pass over `loader`
    ///
    /// Returns `None` when the loader yields no batch.
    #[allow(clippy::too_many_arguments)]
    pub fn run<B: Backend, M: Segmenter<B>>(
        &self,
        kind: EvalKind,
        model: &M,
        loader: &mut SegmentationLoader<B>,
        epoch: usize,
        state: &mut TrainingState,
        images_list: &mut Vec<ChwImage>,
        sink: &mut dyn MetricsSink,
    ) -> Result<Option<EvalOutcome>> {
        let num_batches = loader.num_batches();
        let num_classes = model.num_classes();
        let step = state.global_step;
        let progress = batch_progress(num_batches, kind.title());
        let mut total_iou = 0.0;
        let mut outcome = None;

        for (ii, batch) in loader.epoch().enumerate() {
            let batch = batch?;
            let n = batch.len();

            let outputs = model.segment(batch.images.clone());
            let predictions = outputs.clone().argmax(1).squeeze::<3>(1);
            let labels = batch.labels.squeeze::<3>(1);

            let loss: f64 = self
                .criterion
                .eval_loss(outputs, labels.clone())
                .into_scalar()
                .elem();
            let running = match kind {
                EvalKind::Validation => &mut state.running_loss_val,
                EvalKind::Test => &mut state.running_loss_ts,
            };
            *running += loss;

            total_iou += batch_iou(predictions.clone(), labels.clone(), num_classes)?.total_iou;

            if kind == EvalKind::Test {
                self.save_first(batch.images.clone(), predictions.clone(), num_classes, ii)?;
            }

            if is_last_batch(ii, num_batches) {
                let miou = total_iou / (ii * self.train_batch_size + n) as f64;
                let mean_loss = *running / num_batches as f64;
                *running = 0.0;

                let numbered = match kind {
                    EvalKind::Validation => ii * self.train_batch_size + n,
                    EvalKind::Test => ii * self.test_batch_size + n,
                };
                info!("{}:", kind.title());
                info!("[Epoch: {}, numImages: {:5}]", epoch, numbered);
                info!("Loss: {:.6}", mean_loss);
                info!("MIoU: {:.6}", miou);

                sink.add_scalar(kind.loss_tag(), mean_loss, step)?;
                sink.add_scalar(kind.miou_tag(), miou, step)?;

                match kind {
                    EvalKind::Validation => {
                        *images_list = sample_triplets(batch.images, predictions, labels, 2, num_classes)?;
                    }
                    EvalKind::Test => {
                        images_list.extend(sample_triplets(batch.images, predictions, labels, 1, num_classes)?);
                    }
                }
                let grid = make_grid(images_list, GridOptions::default())?;
                sink.add_image(kind.grid_tag(), &grid, step)?;

                outcome = Some(EvalOutcome {
                    loss: mean_loss,
                    miou,
                    num_images: ii * self.train_batch_size + n,
                });
            }

            progress.inc(1);
        }
        progress.finish_and_clear();

        Ok(outcome)
    }

    /// Write the first sample of a test batch next to its prediction
    fn save_first<B: Backend>(
        &self,
        images: Tensor<B, 4>,
        predictions: Tensor<B, 3, Int>,
        num_classes: usize,
        index: usize,
    ) -> Result<()> {
        let input = batch_to_images(images.slice([0..1]))?;
        let prediction = decode_segmap_batch(predictions.slice([0..1]), num_classes)?;
        match (input.first(), prediction.first()) {
            (Some(input), Some(prediction)) => {
                save_test_image(input, prediction, index, &self.results_dir)?;
                Ok(())
            }
            _ => Err(SegError::Training("empty test batch".to_string())),
        }
    }
}
