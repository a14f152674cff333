use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ferrite_cls::data::folder::load_image_folder;
use ferrite_cls::data::idx::parse_idx_pair;
use ferrite_cls::data::{write_image_db, DataStream, EvalStream, ImageDb, PrefetchStream, TrainStream};
use ferrite_cls::persistence::atomic_write_json;
use ferrite_cls::train::{ConsoleSink, RunOutcome, TrainingOrchestrator};
use ferrite_cls::config::defaults;
use ferrite_cls::{ArchitectureRegistry, TrainingConfiguration};

#[derive(Parser, Debug)]
#[command(name = "ferrite-cls", about = "Train an image classifier from a packed image db")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train (or resume training) a classifier.
    Train(TrainArgs),
    /// Pack an IDX image/label pair or a class-per-directory image folder
    /// into an image db.
    Pack(PackArgs),
}

// ── Train ──────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
struct TrainArgs {
    /// Training image db.
    #[arg(long)]
    db: PathBuf,
    /// Validation image db.
    #[arg(long)]
    val_db: Option<PathBuf>,
    /// Mix-in image db (not supported, ignored with a warning).
    #[arg(long)]
    mixin: Option<PathBuf>,
    #[arg(long, default_value_t = defaults::CLASSES)]
    classes: usize,
    #[arg(long, default_value_t = defaults::CHANNELS)]
    channels: usize,
    /// Side of the square crop fed to the network.
    #[arg(long, default_value_t = defaults::SIZE)]
    size: usize,
    #[arg(long, default_value_t = defaults::BATCH)]
    batch: usize,
    /// Maximum random crop offset during training.
    #[arg(long, default_value_t = defaults::SHIFT)]
    shift: usize,
    /// Architecture name.
    #[arg(long, default_value = defaults::NET)]
    net: String,
    /// Checkpoint directory.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Checkpoint file or directory to resume from.
    #[arg(long)]
    resume: Option<PathBuf>,
    #[arg(long, default_value_t = defaults::MAX_TO_KEEP)]
    max_to_keep: usize,
    /// Initial learning rate.
    #[arg(long, default_value_t = defaults::LR)]
    lr: f64,
    #[arg(long, default_value_t = defaults::DECAY_RATE)]
    decay_rate: f64,
    /// Steps between learning rate decays.
    #[arg(long, default_value_t = defaults::DECAY_STEPS)]
    decay_steps: u64,
    /// Steps per epoch; defaults to one pass over the training db.
    #[arg(long)]
    epoch_steps: Option<usize>,
    #[arg(long, default_value_t = defaults::MAX_EPOCHS)]
    max_epochs: usize,
    #[arg(long, default_value_t = defaults::CKPT_EPOCHS)]
    ckpt_epochs: usize,
    #[arg(long, default_value_t = defaults::VAL_EPOCHS)]
    val_epochs: usize,
    #[arg(long, default_value_t = defaults::MOMENTUM)]
    momentum: f64,
    #[arg(long, default_value_t = defaults::WEIGHT_DECAY)]
    weight_decay: f64,
    /// Draw training batches in plain shuffled order instead of class round-robin.
    #[arg(long)]
    no_stratify: bool,
    /// Batches decoded ahead on a worker thread (0 = off).
    #[arg(long, default_value_t = defaults::PREFETCH)]
    prefetch: usize,
    #[arg(long, default_value_t = defaults::SEED)]
    seed: u64,
}

impl From<TrainArgs> for TrainingConfiguration {
    fn from(args: TrainArgs) -> Self {
        TrainingConfiguration {
            db: args.db,
            val_db: args.val_db,
            mixin: args.mixin,
            classes: args.classes,
            channels: args.channels,
            size: args.size,
            batch: args.batch,
            shift: args.shift,
            net: args.net,
            model_dir: args.model,
            resume: args.resume,
            max_to_keep: args.max_to_keep,
            lr: args.lr,
            decay_rate: args.decay_rate,
            decay_steps: args.decay_steps,
            momentum: args.momentum,
            weight_decay: args.weight_decay,
            epoch_steps: args.epoch_steps,
            max_epochs: args.max_epochs,
            ckpt_epochs: args.ckpt_epochs,
            val_epochs: args.val_epochs,
            stratify: !args.no_stratify,
            prefetch: args.prefetch,
            seed: args.seed,
        }
    }
}

// ── Pack ───────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
struct PackArgs {
    /// IDX image file (with --labels).
    #[arg(long, requires = "labels", conflicts_with = "folder")]
    images: Option<PathBuf>,
    /// IDX label file.
    #[arg(long, requires = "images")]
    labels: Option<PathBuf>,
    /// Folder with one sub-directory of images per class.
    #[arg(long)]
    folder: Option<PathBuf>,
    /// Side images from a folder are resized to.
    #[arg(long, default_value_t = 32)]
    size: usize,
    /// Channels stored for images from a folder (1 or 3).
    #[arg(long, default_value_t = 3)]
    channels: usize,
    /// Output image db.
    #[arg(long)]
    out: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Train(args) => cmd_train(args.into()),
        Command::Pack(args) => cmd_pack(args),
    }
}

fn cmd_train(config: TrainingConfiguration) -> Result<()> {
    let registry = ArchitectureRegistry::with_defaults();
    config.validate(&registry)?;
    if let Some(mixin) = &config.mixin {
        warn!(path = %mixin.display(), "mix-in corpora are not supported, ignoring");
    }
    if let Some(dir) = &config.model_dir {
        let path = dir.join("config.json");
        atomic_write_json(&path, &config).with_context(|| format!("writing {}", path.display()))?;
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            if stop.swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
            eprintln!("\nstopping after the current step (Ctrl-C again to abort)");
        })
        .context("installing Ctrl-C handler")?;
    }

    let train_db = ImageDb::open(&config.db)?;
    info!(path = %config.db.display(), records = train_db.len(), header = ?train_db.header(), "training db opened");
    let train = TrainStream::new(train_db, config.stream_options(true))?;
    let mut train: Box<dyn DataStream> = if config.prefetch > 0 {
        Box::new(PrefetchStream::spawn(train, config.prefetch))
    } else {
        Box::new(train)
    };

    let mut val = match &config.val_db {
        Some(path) => {
            let db = ImageDb::open(path)?;
            info!(path = %path.display(), records = db.len(), "validation db opened");
            Some(EvalStream::new(db, config.stream_options(false))?)
        }
        None => None,
    };

    let model_dir = config.model_dir.clone();
    let mut orchestrator = TrainingOrchestrator::from_registry(config, &registry)?.with_stop_flag(stop);
    let mut sink = ConsoleSink::new(std::io::stdout().is_terminal());
    let outcome = orchestrator.run(
        &mut *train,
        val.as_mut().map(|v| v as &mut dyn DataStream),
        &mut sink,
    )?;

    match outcome {
        RunOutcome::Completed { epochs, global_step, best } => {
            info!(epochs, global_step, best, "done");
            if let Some(dir) = model_dir {
                let path = dir.join("model.json");
                orchestrator.network().save_json(&path)?;
                info!(path = %path.display(), "final model exported");
            }
        }
        RunOutcome::Interrupted { epoch, global_step } => {
            info!(epoch, global_step, "stopped by user");
        }
    }
    Ok(())
}

fn cmd_pack(args: PackArgs) -> Result<()> {
    let written = match (&args.images, &args.labels, &args.folder) {
        (Some(images), Some(labels), None) => {
            let image_bytes = std::fs::read(images).with_context(|| format!("reading {}", images.display()))?;
            let label_bytes = std::fs::read(labels).with_context(|| format!("reading {}", labels.display()))?;
            let pair = parse_idx_pair(&image_bytes, &label_bytes)?;
            write_image_db(&args.out, pair.header, pair.records())?
        }
        (None, None, Some(folder)) => {
            let (header, records) = load_image_folder(folder, args.size, args.channels)?;
            write_image_db(&args.out, header, records)?
        }
        _ => bail!("pass either --images and --labels, or --folder"),
    };
    info!(path = %args.out.display(), records = written, "image db written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn command_line_defaults_match_configuration_defaults() {
        let cli = Cli::try_parse_from(["ferrite-cls", "train", "--db", "train.db"]).unwrap();
        let Command::Train(args) = cli.command else {
            panic!("expected the train subcommand");
        };
        assert_eq!(TrainingConfiguration::from(args), TrainingConfiguration::new("train.db"));
    }
}
