//! End-to-end training run
//!
//! Configuration → run directory → model and optimizer for the resolved
//! family → optional resume → data → parameter report → epochs.

use std::path::PathBuf;
use std::sync::Arc;

use burn::{
    module::AutodiffModule,
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, AdamConfig, Optimizer, SgdConfig,
    },
    tensor::backend::AutodiffBackend,
};
use tracing::info;

use super::checkpoint::{checkpoint_path, load_checkpoint, resume_checkpoint_path, save_checkpoint};
use super::evaluator::{EvalOutcome, Evaluator};
use super::state::is_period_end;
use super::trainer::{Trainer, TrainerSettings};
use crate::backend::{supports_bilinear_backward, ComputeContext, TrainingBackend};
use crate::config::RunConfig;
use crate::dataset::{assemble, LoaderOptions, SegmentationLoader};
use crate::model::blocks::Upsample;
use crate::model::{build_deeplab, build_unet, DeepLabV3Plus, ModelFamily, Segmenter, UNet};
use crate::utils::error::{Result, SegError};
use crate::utils::logging::TrainingLogger;
use crate::utils::report::ParamReport;
use crate::utils::run_dir::{select_run_dir, RunDir};
use crate::utils::summary::{log_dir_name, FileSummaryWriter, MetricsSink};

/// What a finished run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_dir: RunDir,
    pub model_name: String,
    pub epochs_run: usize,
    pub final_train_loss: Option<f64>,
    pub checkpoints: Vec<PathBuf>,
    pub last_validation: Option<EvalOutcome>,
    pub last_test: Option<EvalOutcome>,
}

/// Train on the compiled-in backend, logging to a file sink in the run directory
pub fn run_training(config: &RunConfig) -> Result<RunSummary> {
    let ctx = ComputeContext::<TrainingBackend>::detect();
    info!("Using backend: {}", ctx.name);
    run_training_with::<TrainingBackend>(config, ctx.device, None)
}

/// Train on backend `B`
///
/// The configuration is validated first, and a resize mode `B` cannot
/// differentiate is rejected before anything is read or written.
///
/// Records go to `sink` when given, otherwise to a [`FileSummaryWriter`]
/// under `<run_dir>/models/<timestamp>_<hostname>`.
pub fn run_training_with<B: AutodiffBackend>(
    config: &RunConfig,
    device: B::Device,
    sink: Option<&mut dyn MetricsSink>,
) -> Result<RunSummary> {
    config.validate()?;
    let family = ModelFamily::from_config(&config.model)?;
    if config.model.upsample == Upsample::Bilinear && !supports_bilinear_backward::<B>() {
        return Err(SegError::NotImplemented(format!(
            "bilinear upsampling on the {} backend; set model.upsample = \"nearest\"",
            std::any::type_name::<B::InnerBackend>()
        )));
    }
    let hyper = config.hyper.clone();
    let run_dir = select_run_dir(&config.output.save_root, hyper.resume_epoch != 0)?;
    info!("run id: {}", run_dir.id);

    match family {
        ModelFamily::DeepLab(backbone) => {
            let model: DeepLabV3Plus<B> = build_deeplab(&config.model, backbone, &device)?;
            let sgd = SgdConfig::new()
                .with_momentum(Some(
                    MomentumConfig::new()
                        .with_momentum(hyper.momentum)
                        .with_dampening(0.0),
                ))
                .with_weight_decay(Some(WeightDecayConfig::new(hyper.weight_decay as f32)));
            let make_optimizer = move || sgd.init::<B, DeepLabV3Plus<B>>();
            run_family(config, family, run_dir, model, Box::new(make_optimizer), device, sink)
        }
        ModelFamily::UNet => {
            let model: UNet<B> = build_unet(&config.model, &device);
            let adam = AdamConfig::new()
                .with_weight_decay(Some(WeightDecayConfig::new(hyper.fixed_weight_decay as f32)));
            let make_optimizer = move || adam.init::<B, UNet<B>>();
            run_family(config, family, run_dir, model, Box::new(make_optimizer), device, sink)
        }
    }
}

fn run_family<B, M, O>(
    config: &RunConfig,
    family: ModelFamily,
    run_dir: RunDir,
    model: M,
    make_optimizer: Box<dyn Fn() -> O>,
    device: B::Device,
    sink: Option<&mut dyn MetricsSink>,
) -> Result<RunSummary>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Segmenter<B>,
    M::InnerModule: Segmenter<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    let hyper = &config.hyper;
    let model_name = family.model_name();
    let models_dir = run_dir.models_dir();

    let model = match resume_checkpoint_path(&models_dir, &model_name, hyper.resume_epoch) {
        Some(path) => load_checkpoint::<B, M>(model, &path, &device)?,
        None => {
            info!("Training {} from scratch...", model_name);
            model
        }
    };

    let mut summary = RunSummary {
        run_dir: run_dir.clone(),
        model_name: model_name.clone(),
        epochs_run: 0,
        final_train_loss: None,
        checkpoints: Vec::new(),
        last_validation: None,
        last_test: None,
    };

    if hyper.resume_epoch >= hyper.n_epochs {
        info!("Nothing to train: resume epoch {} reaches n_epochs", hyper.resume_epoch);
        return Ok(summary);
    }

    let mut file_sink: FileSummaryWriter;
    let sink: &mut dyn MetricsSink = match sink {
        Some(sink) => sink,
        None => {
            file_sink = FileSummaryWriter::new(models_dir.join(log_dir_name()))?;
            info!("Logging to {}", file_sink.log_dir().display());
            &mut file_sink
        }
    };

    let data = assemble(config)?;
    let batch_size = config.train.batch_size;
    let workers = hyper.num_workers;

    let mut train_loader = SegmentationLoader::<B>::new(
        Arc::new(data.train),
        LoaderOptions::training(batch_size, workers, hyper.seed),
        device.clone(),
    )?;
    let mut validation_loader = SegmentationLoader::<B::InnerBackend>::new(
        Arc::new(data.validation),
        LoaderOptions::evaluation(batch_size, workers),
        device.clone(),
    )?;
    let mut test_loader = SegmentationLoader::<B::InnerBackend>::new(
        Arc::new(data.test),
        LoaderOptions::evaluation(batch_size, workers),
        device,
    )?;

    param_report(config, family).write(&run_dir.path.join(format!("{}.txt", config.exp_name())))?;

    let mut trainer = Trainer::new(
        model,
        make_optimizer,
        family.criterion(),
        family.lr_policy(hyper),
        TrainerSettings {
            n_epochs: hyper.n_epochs,
            n_ave_grad: hyper.n_ave_grad,
            train_batch_size: batch_size,
        },
        hyper.resume_epoch,
    );
    let evaluator = Evaluator {
        criterion: family.criterion(),
        train_batch_size: batch_size,
        test_batch_size: hyper.test_batch_size,
        results_dir: config.output.results_dir.clone(),
    };

    info!("Training Network");
    let mut logger = TrainingLogger::new(hyper.n_epochs);

    for epoch in hyper.resume_epoch..hyper.n_epochs {
        logger.start_epoch(epoch);

        let loss = trainer.train_epoch(epoch, &mut train_loader, sink)?;
        summary.final_train_loss = loss.or(summary.final_train_loss);
        summary.epochs_run += 1;

        if is_period_end(epoch, hyper.snapshot) {
            let path = checkpoint_path(&models_dir, &model_name, epoch);
            save_checkpoint::<B, M>(&trainer.model, &path)?;
            summary.checkpoints.push(path);
        }

        if hyper.use_test && is_period_end(epoch, hyper.test_interval) {
            let (val, ts) = trainer.evaluate(
                epoch,
                &evaluator,
                &mut validation_loader,
                &mut test_loader,
                sink,
            )?;
            summary.last_validation = val.or(summary.last_validation);
            summary.last_test = ts.or(summary.last_test);
        }

        logger.end_epoch(loss.unwrap_or(0.0), trainer.current_lr());
    }

    sink.flush()?;
    logger.log_complete();
    Ok(summary)
}

/// The run's hyperparameters, in report order
pub fn param_report(config: &RunConfig, family: ModelFamily) -> ParamReport {
    let hyper = &config.hyper;
    ParamReport::new()
        .add("trainBatchSize", config.train.batch_size)
        .add("nAveGrad", hyper.n_ave_grad)
        .add("lr", hyper.lr)
        .add("wd", hyper.weight_decay)
        .add("momentum", hyper.momentum)
        .add("epoch_size", hyper.epoch_size)
        .add("Model", family.short_name())
        .add("optimizer", family.optimizer_description(hyper))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Backbone;

    const CONFIG: &str = r#"
[train]
batch_size = 4
training_fraction = 1.0
datasets = [{ images = "t/images", labels = "t/labels" }]

[eval]
datasets_synthetic = [{ images = "v/images", labels = "v/labels" }]
datasets_real = [{ images = "r/images" }]
"#;

    #[test]
    fn test_param_report_order() {
        let config = RunConfig::from_toml_str(CONFIG).unwrap();
        let report = param_report(&config, ModelFamily::DeepLab(Backbone::Xception));
        let keys: Vec<&str> = report.entries().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["trainBatchSize", "nAveGrad", "lr", "wd", "momentum", "epoch_size", "Model", "optimizer"]
        );
        assert!(report.render().starts_with("trainBatchSize:4\n"));
        assert!(report.render().contains("Model:deeplab\n"));
    }
}
