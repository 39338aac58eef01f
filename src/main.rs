//! segtrain CLI
//!
//! Entry point for training DeepLabV3+ or UNet segmentation models from a
//! TOML run configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::module::Module;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use segtrain::backend::{backend_name, default_device, DefaultBackend};
use segtrain::config::RunConfig;
use segtrain::model::{build_deeplab, build_unet, ModelFamily};
use segtrain::training::run_training;
use segtrain::utils::format_number;
use segtrain::utils::logging::{init_logging, LogConfig};

/// Semantic segmentation training with Burn
#[derive(Parser, Debug)]
#[command(name = "segtrain")]
#[command(version)]
#[command(about = "Train DeepLabV3+ / UNet segmentation models with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a full training session
    Train {
        /// Path to the run configuration
        #[arg(short, long, default_value = "config/config.toml")]
        config: PathBuf,

        /// Override the number of epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Resume from the checkpoint written at the end of this epoch minus one
        #[arg(long)]
        resume_epoch: Option<usize>,
    },

    /// Validate a configuration and build its model without training
    Check {
        /// Path to the run configuration
        #[arg(short, long, default_value = "config/config.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train {
            config,
            epochs,
            resume_epoch,
        } => cmd_train(&config, epochs, resume_epoch),
        Commands::Check { config } => cmd_check(&config),
    }
}

fn print_banner() {
    println!(
        "{}",
        format!("segtrain v{} ({})", segtrain::VERSION, backend_name())
            .cyan()
            .bold()
    );
    println!();
}

fn load_config(path: &Path) -> Result<RunConfig> {
    let config = RunConfig::load(path)?;
    config
        .validate()
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

fn cmd_train(path: &Path, epochs: Option<usize>, resume_epoch: Option<usize>) -> Result<()> {
    let mut config = load_config(path)?;
    if let Some(epochs) = epochs {
        config.hyper.n_epochs = epochs;
    }
    if let Some(resume_epoch) = resume_epoch {
        config.hyper.resume_epoch = resume_epoch;
    }
    config
        .validate()
        .context("Invalid overrides")?;

    println!(
        "{}",
        format!("Config being used for training:\n{}\n", config.to_toml_string()?).green()
    );

    let summary = run_training(&config).context("training failed")?;

    println!();
    println!("{}", "Training finished".green().bold());
    println!("  Run directory: {}", summary.run_dir.path.display());
    println!("  Epochs run:    {}", summary.epochs_run);
    if let Some(loss) = summary.final_train_loss {
        println!("  Final loss:    {:.6}", loss);
    }
    if let Some(val) = summary.last_validation {
        println!("  Val mIoU:      {:.4}", val.miou);
    }
    if let Some(test) = summary.last_test {
        println!("  Test mIoU:     {:.4}", test.miou);
    }
    for path in &summary.checkpoints {
        println!("  Checkpoint:    {}", path.display());
    }

    Ok(())
}

fn cmd_check(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let family = ModelFamily::from_config(&config.model)?;
    let device = default_device();

    let num_params = match family {
        ModelFamily::DeepLab(backbone) => {
            build_deeplab::<DefaultBackend>(&config.model, backbone, &device)?.num_params()
        }
        ModelFamily::UNet => build_unet::<DefaultBackend>(&config.model, &device).num_params(),
    };

    info!("Config {} is valid", path.display());
    println!("{}", "Configuration OK".green().bold());
    println!("  Model:      {}", family.model_name());
    println!("  Parameters: {}", format_number(num_params));
    println!("  Classes:    {}", config.model.num_classes);
    println!("  Image size: {}", config.model.image_size);
    println!("  Experiment: {}", config.exp_name());

    Ok(())
}
