//! End-to-end checks on small on-disk datasets

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::backend::Autodiff;
use burn::data::dataset::Dataset;
use burn::module::Module;
use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use image::{GrayImage, Luma, Rgb, RgbImage};

use segtrain::config::RunConfig;
use segtrain::dataset::{assemble, LoaderOptions, SegmentationLoader};
use segtrain::model::blocks::Upsample;
use segtrain::model::{Segmenter, UNetConfig};
use segtrain::training::checkpoint::{load_checkpoint, save_checkpoint};
use segtrain::training::run_training_with;
use segtrain::utils::summary::{tags, MemorySink, MetricsSink};
use segtrain::SegError;

type Inner = NdArray<f32>;
type Train = Autodiff<Inner>;

/// Write `count` 16x16 samples: left half class 0, right half class 1
fn write_source(root: &Path, name: &str, count: usize, labelled: bool) -> (PathBuf, Option<PathBuf>) {
    let images = root.join(name).join("images");
    let labels = root.join(name).join("labels");
    std::fs::create_dir_all(&images).unwrap();
    if labelled {
        std::fs::create_dir_all(&labels).unwrap();
    }

    for i in 0..count {
        let file = format!("{:03}.png", i);
        RgbImage::from_fn(16, 16, |x, _| {
            if x < 8 {
                Rgb([20, 20, (i * 10) as u8])
            } else {
                Rgb([230, 230, 230])
            }
        })
        .save(images.join(&file))
        .unwrap();

        if labelled {
            GrayImage::from_fn(16, 16, |x, _| Luma([(x >= 8) as u8]))
                .save(labels.join(&file))
                .unwrap();
        }
    }

    (images, labelled.then_some(labels))
}

fn source_toml((images, labels): &(PathBuf, Option<PathBuf>)) -> String {
    match labels {
        Some(labels) => format!(
            "{{ images = {:?}, labels = {:?} }}",
            images.display().to_string(),
            labels.display().to_string()
        ),
        None => format!("{{ images = {:?} }}", images.display().to_string()),
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    config: RunConfig,
}

fn fixture(train_count: usize, validation_counts: &[usize]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    let train = write_source(&root, "train", train_count, true);
    let validation: Vec<String> = validation_counts
        .iter()
        .enumerate()
        .map(|(i, &count)| source_toml(&write_source(&root, &format!("val{}", i), count, true)))
        .collect();
    let real = write_source(&root, "real", 2, false);

    let toml = format!(
        r#"
[train]
batch_size = 2
training_fraction = 0.5
datasets = [{train}]

[eval]
datasets_synthetic = [{validation}]
datasets_real = [{real}]

[hyper]
n_epochs = 1
snapshot = 1
num_workers = 1

[model]
family = "unet"
num_classes = 2
image_size = 16
base_filters = 2
upsample = "nearest"

[output]
save_root = {save_root:?}
results_dir = {results:?}
"#,
        train = source_toml(&train),
        validation = validation.join(", "),
        real = source_toml(&real),
        save_root = root.display().to_string(),
        results = root.join("results").display().to_string(),
    );

    let config = RunConfig::from_toml_str(&toml).unwrap();
    config.validate().unwrap();
    Fixture {
        _dir: dir,
        root,
        config,
    }
}

#[test]
fn ten_samples_at_half_fraction_give_two_batches() {
    let fx = fixture(10, &[4]);
    let data = assemble(&fx.config).unwrap();

    let loader = SegmentationLoader::<Inner>::new(
        Arc::new(data.train),
        LoaderOptions::training(2, 1, 0),
        Default::default(),
    )
    .unwrap();
    assert_eq!(loader.dataset_len(), 5);
    assert_eq!(loader.num_batches(), 2);
}

#[test]
fn last_validation_source_wins() {
    let fx = fixture(4, &[3, 5]);
    let data = assemble(&fx.config).unwrap();
    assert_eq!(data.validation.len(), 5);
    assert!(data.validation.folder().images_dir.ends_with("val1/images"));
    assert_eq!(data.test.len(), 2);
}

#[test]
fn checkpoint_round_trip_is_bit_exact() {
    let dir = tempfile::tempdir().unwrap();
    let device = Default::default();
    let config = UNetConfig::new().with_base_filters(2);

    let model = config.init::<Inner>(&device);
    let path = dir.path().join("models").join("unet_epoch-0.pth");
    save_checkpoint::<Inner, _>(&model, &path).unwrap();

    let restored = load_checkpoint::<Inner, _>(config.init::<Inner>(&device), &path, &device).unwrap();

    let again = dir.path().join("again.pth");
    save_checkpoint::<Inner, _>(&restored, &again).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), std::fs::read(&again).unwrap());

    let input = Tensor::<Inner, 4>::ones([1, 3, 16, 16], &device);
    let a = model.segment(input.clone()).into_data().to_vec::<f32>().unwrap();
    let b = restored.segment(input).into_data().to_vec::<f32>().unwrap();
    assert_eq!(a, b);
    assert_eq!(model.num_params(), restored.num_params());
}

#[test]
fn one_epoch_records_metrics_and_artifacts() {
    let fx = fixture(8, &[4]);
    let mut sink = MemorySink::new();

    let summary = run_training_with::<Train>(
        &fx.config,
        Default::default(),
        Some(&mut sink as &mut dyn MetricsSink),
    )
    .unwrap();

    // 8 samples at fraction 0.5 and batch 2
    assert_eq!(summary.epochs_run, 1);
    assert_eq!(sink.series(tags::EPOCH_NUM), vec![(1, 0.0), (2, 0.0)]);
    assert_eq!(sink.series(tags::TOTAL_LOSS_EPOCH).len(), 1);
    assert_eq!(sink.series(tags::TOTAL_LOSS_ITER).len(), 2);
    assert!(summary.final_train_loss.unwrap().is_finite());

    let val_miou = sink.series(tags::VAL_MIOU);
    assert_eq!(val_miou.len(), 1);
    assert!((0.0..=1.0).contains(&val_miou[0].1));
    assert_eq!(sink.series(tags::TEST_MIOU).len(), 1);

    assert_eq!(sink.images_for(tags::TRAIN_GRID).len(), 2);
    assert_eq!(sink.images_for(tags::VALIDATION_GRID).len(), 1);
    assert_eq!(sink.images_for(tags::TEST_GRID).len(), 1);

    let run = fx.root.join("run").join("run_00");
    assert_eq!(summary.run_dir.path, run);
    assert!(run.join("models").join("unet_epoch-0.pth").is_file());
    assert!(run.join(format!("{}.txt", fx.config.exp_name())).is_file());
    assert!(fx.root.join("results").join("0000-results.png").is_file());
}

#[test]
fn resume_continues_from_previous_checkpoint() {
    let fx = fixture(4, &[2]);
    let mut sink = MemorySink::new();
    run_training_with::<Train>(&fx.config, Default::default(), Some(&mut sink as &mut dyn MetricsSink)).unwrap();

    let mut resumed = fx.config.clone();
    resumed.hyper.resume_epoch = 1;
    resumed.hyper.n_epochs = 2;
    let mut sink = MemorySink::new();
    let summary =
        run_training_with::<Train>(&resumed, Default::default(), Some(&mut sink as &mut dyn MetricsSink)).unwrap();

    assert_eq!(summary.run_dir.id, 0);
    assert_eq!(summary.epochs_run, 1);
    assert!(sink.series(tags::EPOCH_NUM).iter().all(|&(_, epoch)| epoch == 1.0));
    assert!(summary.run_dir.models_dir().join("unet_epoch-1.pth").is_file());
}

#[test]
fn resume_without_checkpoint_fails_early() {
    let fx = fixture(4, &[2]);
    std::fs::create_dir_all(fx.root.join("run").join("run_00")).unwrap();

    let mut config = fx.config.clone();
    config.hyper.resume_epoch = 1;
    config.hyper.n_epochs = 3;

    let mut sink = MemorySink::new();
    let err = run_training_with::<Train>(&config, Default::default(), Some(&mut sink as &mut dyn MetricsSink))
        .unwrap_err();
    assert!(matches!(err, SegError::PathNotFound(_)));
    assert!(sink.scalars.is_empty());
}

#[test]
fn unknown_family_is_rejected() {
    let fx = fixture(2, &[2]);
    let mut config = fx.config.clone();
    config.model.family = "pspnet".to_string();

    let err = run_training_with::<Train>(&config, Default::default(), None).unwrap_err();
    assert!(matches!(err, SegError::NotImplemented(_)));
}

#[test]
fn deeplab_trains_one_epoch_with_sgd() {
    let fx = fixture(4, &[2]);
    let mut config = fx.config.clone();
    config.model.family = "deeplab".to_string();
    config.model.backbone = "xception".to_string();
    config.model.output_stride = 16;
    config.model.image_size = 32;

    let mut sink = MemorySink::new();
    let summary =
        run_training_with::<Train>(&config, Default::default(), Some(&mut sink as &mut dyn MetricsSink)).unwrap();

    assert_eq!(summary.model_name, "deeplabv3plus-xception");
    assert!(summary.final_train_loss.unwrap().is_finite());
    assert_eq!(sink.series(tags::TOTAL_LOSS_ITER).len(), 1);
    assert!(summary
        .run_dir
        .models_dir()
        .join("deeplabv3plus-xception_epoch-0.pth")
        .is_file());
}

#[test]
fn bilinear_on_ndarray_is_rejected_before_any_output() {
    let fx = fixture(2, &[2]);
    let mut config = fx.config.clone();
    config.model.upsample = Upsample::Bilinear;

    let err = run_training_with::<Train>(&config, Default::default(), None).unwrap_err();
    assert!(matches!(err, SegError::NotImplemented(_)));
    assert!(!fx.root.join("run").exists());
}

#[test]
fn invalid_config_is_rejected_by_the_library() {
    let fx = fixture(2, &[2]);
    let mut config = fx.config.clone();
    config.hyper.epoch_size = 0;

    let err = run_training_with::<Train>(&config, Default::default(), None).unwrap_err();
    assert!(matches!(err, SegError::Config(_)));
    assert!(!fx.root.join("run").exists());
}
