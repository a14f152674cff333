//! What a training run reports, and where it goes.
//!
//! The orchestrator never prints. It hands step progress and per-epoch
//! summaries to an [`EventSink`]; the binary plugs in a console sink, tests
//! plug in a [`RecordingSink`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

/// Which pass a progress update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    Training,
    Validation,
}

/// Emitted after every step of a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepProgress {
    pub pass: Pass,
    /// 1-based step within the pass.
    pub step: usize,
    /// Steps in the pass, when known up front.
    pub total: Option<usize>,
    /// Running averages so far, formatted `acc=0.500 xe=0.693 ...`.
    pub message: String,
}

/// Emitted once per completed training epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// 0-based index of the epoch just trained.
    pub epoch: usize,
    pub metrics: Vec<(String, f64)>,
    /// Seconds since the run started.
    pub elapsed_secs: f64,
    /// Seconds spent in this epoch.
    pub epoch_secs: f64,
}

/// Emitted after each validation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// 0-based index of the epoch whose weights were evaluated.
    pub epoch: usize,
    pub metrics: Vec<(String, f64)>,
    /// Thresholded accuracy, binary problems only.
    pub sk_acc: Option<f64>,
    /// ROC AUC, binary problems with both classes present only.
    pub auc: Option<f64>,
    pub learning_rate: f64,
    /// Best score after this pass.
    pub best: f64,
}

/// Anything a sink can be told, in the order it was told.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrainingEvent {
    Epoch(EpochSummary),
    Validation(ValidationSummary),
    Checkpoint { epoch: usize, path: PathBuf },
}

/// Receiver of training progress.
pub trait EventSink {
    fn on_step(&mut self, _progress: &StepProgress) {}

    /// A training or validation pass finished (or was cut short).
    fn on_pass_end(&mut self, _pass: Pass) {}

    fn on_epoch(&mut self, summary: &EpochSummary);

    fn on_validation(&mut self, summary: &ValidationSummary);

    fn on_checkpoint(&mut self, epoch: usize, path: &Path);
}

/// Keeps every summary in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub events: Vec<TrainingEvent>,
    /// Step updates seen per pass: (training, validation).
    pub steps: (usize, usize),
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epochs(&self) -> Vec<&EpochSummary> {
        self.events.iter()
            .filter_map(|e| match e {
                TrainingEvent::Epoch(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn validations(&self) -> Vec<&ValidationSummary> {
        self.events.iter()
            .filter_map(|e| match e {
                TrainingEvent::Validation(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn checkpoints(&self) -> Vec<(usize, &Path)> {
        self.events.iter()
            .filter_map(|e| match e {
                TrainingEvent::Checkpoint { epoch, path } => Some((*epoch, path.as_path())),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn on_step(&mut self, progress: &StepProgress) {
        match progress.pass {
            Pass::Training => self.steps.0 += 1,
            Pass::Validation => self.steps.1 += 1,
        }
    }

    fn on_epoch(&mut self, summary: &EpochSummary) {
        self.events.push(TrainingEvent::Epoch(summary.clone()));
    }

    fn on_validation(&mut self, summary: &ValidationSummary) {
        self.events.push(TrainingEvent::Validation(summary.clone()));
    }

    fn on_checkpoint(&mut self, epoch: usize, path: &Path) {
        self.events.push(TrainingEvent::Checkpoint { epoch, path: path.to_path_buf() });
    }
}

/// Forwards summaries to `tracing` as structured events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

fn render(metrics: &[(String, f64)]) -> String {
    metrics.iter().map(|(n, v)| format!("{}={:.3}", n, v)).collect::<Vec<_>>().join(" ")
}

impl EventSink for TracingSink {
    fn on_epoch(&mut self, summary: &EpochSummary) {
        info!(
            target: "ferrite_cls::events",
            epoch = summary.epoch,
            elapsed_secs = summary.elapsed_secs,
            epoch_secs = summary.epoch_secs,
            metrics = %render(&summary.metrics),
            "epoch"
        );
    }

    fn on_validation(&mut self, summary: &ValidationSummary) {
        info!(
            target: "ferrite_cls::events",
            epoch = summary.epoch,
            sk_acc = ?summary.sk_acc,
            auc = ?summary.auc,
            learning_rate = summary.learning_rate,
            best = summary.best,
            metrics = %render(&summary.metrics),
            "validation"
        );
    }

    fn on_checkpoint(&mut self, epoch: usize, path: &Path) {
        info!(target: "ferrite_cls::events", epoch, path = %path.display(), "checkpoint");
    }
}
