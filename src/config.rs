//! Run configuration: one validated, serializable record.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::data::StreamOptions;
use crate::error::{Result, TrainError};
use crate::network::{ArchitectureRegistry, ModelShape};
use crate::optim::ExponentialDecay;

/// Default option values, shared with the command line.
pub mod defaults {
    pub const CLASSES: usize = 2;
    pub const CHANNELS: usize = 3;
    pub const SIZE: usize = 224;
    pub const BATCH: usize = 128;
    pub const SHIFT: usize = 0;
    pub const NET: &str = "mlp";
    pub const MAX_TO_KEEP: usize = 100;
    pub const LR: f64 = 0.02;
    pub const DECAY_RATE: f64 = 0.95;
    pub const DECAY_STEPS: u64 = 500;
    pub const MOMENTUM: f64 = 0.9;
    pub const WEIGHT_DECAY: f64 = 2.5e-4;
    pub const MAX_EPOCHS: usize = 200;
    pub const CKPT_EPOCHS: usize = 10;
    pub const VAL_EPOCHS: usize = 10;
    pub const PREFETCH: usize = 4;
    pub const SEED: u64 = 0;
}

/// Everything a training run is parameterised by.
///
/// Built once at startup, validated with [`validate`](Self::validate), then
/// handed by reference to every component; nothing reads ambient state after
/// that. Written to `<model_dir>/config.json` for provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfiguration {
    /// Training corpus (image db file).
    pub db: PathBuf,
    /// Optional held-out corpus for periodic validation.
    pub val_db: Option<PathBuf>,
    /// Mix-in corpus. Accepted for compatibility, not used.
    pub mixin: Option<PathBuf>,
    pub classes: usize,
    pub channels: usize,
    /// Side of the square crop fed to the network.
    pub size: usize,
    pub batch: usize,
    /// Maximum random crop offset applied during training.
    pub shift: usize,
    /// Architecture identifier looked up in the registry.
    pub net: String,
    /// Checkpoint directory; checkpointing is off when absent.
    pub model_dir: Option<PathBuf>,
    /// Checkpoint file (or checkpoint directory) to resume from.
    pub resume: Option<PathBuf>,
    pub max_to_keep: usize,
    pub lr: f64,
    pub decay_rate: f64,
    pub decay_steps: u64,
    pub momentum: f64,
    pub weight_decay: f64,
    /// Explicit steps per epoch; derived from the training set size when absent.
    pub epoch_steps: Option<usize>,
    pub max_epochs: usize,
    pub ckpt_epochs: usize,
    pub val_epochs: usize,
    pub stratify: bool,
    /// Minibatches decoded ahead on a worker thread; 0 disables prefetching.
    pub prefetch: usize,
    pub seed: u64,
}

impl TrainingConfiguration {
    /// Configuration with every option at its default.
    pub fn new(db: impl Into<PathBuf>) -> Self {
        Self {
            db: db.into(),
            val_db: None,
            mixin: None,
            classes: defaults::CLASSES,
            channels: defaults::CHANNELS,
            size: defaults::SIZE,
            batch: defaults::BATCH,
            shift: defaults::SHIFT,
            net: defaults::NET.to_owned(),
            model_dir: None,
            resume: None,
            max_to_keep: defaults::MAX_TO_KEEP,
            lr: defaults::LR,
            decay_rate: defaults::DECAY_RATE,
            decay_steps: defaults::DECAY_STEPS,
            momentum: defaults::MOMENTUM,
            weight_decay: defaults::WEIGHT_DECAY,
            epoch_steps: None,
            max_epochs: defaults::MAX_EPOCHS,
            ckpt_epochs: defaults::CKPT_EPOCHS,
            val_epochs: defaults::VAL_EPOCHS,
            stratify: true,
            prefetch: defaults::PREFETCH,
            seed: defaults::SEED,
        }
    }

    /// Fails fast on anything that would only surface mid-run.
    pub fn validate(&self, registry: &ArchitectureRegistry) -> Result<()> {
        if !self.db.is_file() {
            return Err(TrainError::config(format!("training db {} does not exist", self.db.display())));
        }
        if let Some(val) = &self.val_db {
            if !val.is_file() {
                return Err(TrainError::config(format!("validation db {} does not exist", val.display())));
            }
        }
        if self.classes < 2 {
            return Err(TrainError::config(format!("classes must be at least 2, got {}", self.classes)));
        }
        if self.channels != 1 && self.channels != 3 {
            return Err(TrainError::config(format!("channels must be 1 or 3, got {}", self.channels)));
        }
        if self.size == 0 || self.batch == 0 {
            return Err(TrainError::config("size and batch must be positive"));
        }
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            return Err(TrainError::config(format!("learning rate must be positive, got {}", self.lr)));
        }
        if !(self.decay_rate > 0.0 && self.decay_rate <= 1.0) {
            return Err(TrainError::config(format!("decay rate must be in (0, 1], got {}", self.decay_rate)));
        }
        if self.decay_steps == 0 {
            return Err(TrainError::config("decay steps must be positive"));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(TrainError::config(format!("momentum must be in [0, 1), got {}", self.momentum)));
        }
        if self.weight_decay < 0.0 {
            return Err(TrainError::config("weight decay must not be negative"));
        }
        if self.epoch_steps == Some(0) {
            return Err(TrainError::config("epoch steps must be positive when given"));
        }
        if self.max_epochs == 0 || self.ckpt_epochs == 0 || self.val_epochs == 0 {
            return Err(TrainError::config("max, checkpoint and validation epoch counts must be positive"));
        }
        if self.max_to_keep == 0 {
            return Err(TrainError::config("max_to_keep must be positive"));
        }
        if !registry.contains(&self.net) {
            return Err(TrainError::config(format!(
                "unknown architecture '{}', available: {}", self.net, registry.names().join(", ")
            )));
        }
        Ok(())
    }

    pub fn schedule(&self) -> ExponentialDecay {
        ExponentialDecay::new(self.lr, self.decay_rate, self.decay_steps)
    }

    pub fn model_shape(&self) -> ModelShape {
        ModelShape {
            height: self.size,
            width: self.size,
            channels: self.channels,
            classes: self.classes,
            weight_decay: self.weight_decay,
        }
    }

    /// Options for the training (`training = true`) or evaluation stream.
    pub fn stream_options(&self, training: bool) -> StreamOptions {
        StreamOptions {
            batch: self.batch,
            crop: self.size,
            channels: self.channels,
            shift: if training { self.shift } else { 0 },
            stratify: training && self.stratify,
            seed: self.seed,
        }
    }

    /// Explicit `epoch_steps`, else `ceil(train_size / batch)`.
    pub fn steps_per_epoch(&self, train_size: usize) -> Result<usize> {
        let steps = match self.epoch_steps {
            Some(steps) => steps,
            None => train_size.div_ceil(self.batch.max(1)),
        };
        if steps == 0 {
            return Err(TrainError::config("steps per epoch resolved to zero"));
        }
        Ok(steps)
    }
}
