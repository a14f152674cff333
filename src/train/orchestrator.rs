//! The epoch loop: train, periodically validate, periodically checkpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::TrainingConfiguration;
use crate::data::DataStream;
use crate::error::{Result, TrainError};
use crate::eval::{accuracy_score, roc_auc};
use crate::network::{ArchitectureRegistry, Network};
use crate::optim::{ExponentialDecay, MomentumOptimizer};
use crate::train::best::BestScoreTracker;
use crate::train::checkpoint::{CheckpointManager, CheckpointState};
use crate::train::events::{EpochSummary, EventSink, Pass, StepProgress, ValidationSummary};
use crate::train::metrics::MetricAccumulator;
use crate::train::trainer::{eval_step, train_step};

/// Metric the best score follows.
pub const BEST_METRIC: &str = "acc";

/// Where the orchestrator is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    TrainingEpoch,
    ValidationPass,
    CheckpointSave,
    Done,
}

/// How [`TrainingOrchestrator::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunOutcome {
    /// `max_epochs` reached.
    Completed { epochs: usize, global_step: u64, best: f64 },
    /// The stop flag was raised. No checkpoint was written for the
    /// unfinished epoch.
    Interrupted { epoch: usize, global_step: u64 },
}

/// Drives training from a configuration, a network and its optimizer.
///
/// Owns the epoch counter; the global step lives in the optimizer and the
/// learning rate is always derived from it, never stored.
pub struct TrainingOrchestrator {
    config: TrainingConfiguration,
    network: Network,
    optimizer: MomentumOptimizer,
    schedule: ExponentialDecay,
    checkpoints: Option<CheckpointManager>,
    best: BestScoreTracker,
    /// Shared by every pass and reset when one starts.
    metrics: MetricAccumulator,
    epoch: usize,
    state: OrchestratorState,
    stop_flag: Option<Arc<AtomicBool>>,
}

impl TrainingOrchestrator {
    pub fn new(config: TrainingConfiguration, network: Network) -> Self {
        let optimizer = MomentumOptimizer::new(config.momentum, &network);
        let checkpoints = config.model_dir.as_ref().map(|dir| CheckpointManager::new(dir, config.max_to_keep));
        Self {
            schedule: config.schedule(),
            network,
            optimizer,
            checkpoints,
            best: BestScoreTracker::new(BEST_METRIC),
            metrics: MetricAccumulator::standard(),
            epoch: 0,
            state: OrchestratorState::Idle,
            stop_flag: None,
            config,
        }
    }

    /// Builds the configured architecture and, when `config.resume` is set,
    /// restores the checkpoint it points at.
    pub fn from_registry(config: TrainingConfiguration, registry: &ArchitectureRegistry) -> Result<Self> {
        let network = registry.build(&config.net, &config.model_shape(), config.seed)?;
        info!(net = %config.net, parameters = network.parameter_count(), "network built");
        let resume = config.resume.clone();
        let mut orchestrator = Self::new(config, network);
        if let Some(path) = resume {
            orchestrator.resume_from(CheckpointManager::restore(&path)?)?;
        }
        Ok(orchestrator)
    }

    /// Stops the run between steps once `flag` becomes true.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = Some(flag);
        self
    }

    /// Replaces network, optimizer, epoch and best score with a checkpoint's.
    pub fn resume_from(&mut self, state: CheckpointState) -> Result<()> {
        let ours = &self.network.metadata;
        let theirs = &state.network.metadata;
        let same_geometry = ours.architecture == theirs.architecture
            && ours.shape.height == theirs.shape.height
            && ours.shape.width == theirs.shape.width
            && ours.shape.channels == theirs.shape.channels
            && ours.shape.classes == theirs.shape.classes;
        if !same_geometry {
            return Err(TrainError::config(format!(
                "checkpoint holds a '{}' network for {}x{}x{} inputs and {} classes, configuration asks for '{}' with {}x{}x{} and {}",
                theirs.architecture, theirs.shape.height, theirs.shape.width, theirs.shape.channels, theirs.shape.classes,
                ours.architecture, ours.shape.height, ours.shape.width, ours.shape.channels, ours.shape.classes,
            )));
        }
        state.optimizer.check_compatible(&state.network)?;

        let CheckpointState { epoch, best_score, mut network, optimizer } = state;
        network.reseed(self.config.seed.wrapping_add(epoch as u64).wrapping_add(1));
        self.network = network;
        self.optimizer = optimizer;
        self.epoch = epoch;
        self.best = BestScoreTracker::with_best(BEST_METRIC, best_score);
        info!(epoch, global_step = self.optimizer.global_step(), "resumed");
        Ok(())
    }

    pub fn snapshot(&self) -> CheckpointState {
        CheckpointState {
            epoch: self.epoch,
            best_score: self.best.best(),
            network: self.network.clone(),
            optimizer: self.optimizer.clone(),
        }
    }

    pub fn config(&self) -> &TrainingConfiguration {
        &self.config
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Completed epochs.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn global_step(&self) -> u64 {
        self.optimizer.global_step()
    }

    pub fn learning_rate(&self) -> f64 {
        self.schedule.rate(self.optimizer.global_step())
    }

    pub fn best(&self) -> f64 {
        self.best.best()
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    fn stop_requested(&self) -> bool {
        self.stop_flag.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn interrupted(&mut self) -> RunOutcome {
        info!(epoch = self.epoch, global_step = self.global_step(), "interrupted");
        self.state = OrchestratorState::Idle;
        RunOutcome::Interrupted { epoch: self.epoch, global_step: self.global_step() }
    }

    /// Runs epochs until `max_epochs` or the stop flag.
    ///
    /// After each epoch, validation runs when `val` is given and the epoch
    /// count is a multiple of `val_epochs`; a checkpoint is written when a
    /// model directory is configured and the count is a multiple of
    /// `ckpt_epochs`.
    pub fn run(
        &mut self,
        train: &mut dyn DataStream,
        mut val: Option<&mut dyn DataStream>,
        sink: &mut dyn EventSink,
    ) -> Result<RunOutcome> {
        let steps = self.config.steps_per_epoch(train.size())?;
        info!(
            train_size = train.size(),
            val_size = val.as_ref().map(|v| v.size()),
            steps_per_epoch = steps,
            start_epoch = self.epoch,
            max_epochs = self.config.max_epochs,
            "training started"
        );
        let run_start = Instant::now();

        while self.epoch < self.config.max_epochs {
            self.state = OrchestratorState::TrainingEpoch;
            let summary = match self.train_epoch(train, steps, run_start, sink)? {
                Some(summary) => summary,
                None => return Ok(self.interrupted()),
            };
            sink.on_epoch(&summary);
            self.epoch += 1;

            if self.epoch % self.config.val_epochs == 0 {
                if let Some(stream) = val.as_deref_mut() {
                    self.state = OrchestratorState::ValidationPass;
                    match self.validate(stream, sink)? {
                        Some(summary) => sink.on_validation(&summary),
                        None => return Ok(self.interrupted()),
                    }
                }
            }

            if self.epoch % self.config.ckpt_epochs == 0 {
                if let Some(manager) = &self.checkpoints {
                    self.state = OrchestratorState::CheckpointSave;
                    let path = manager.save(&self.snapshot())?;
                    sink.on_checkpoint(self.epoch, &path);
                }
            }
        }

        self.state = OrchestratorState::Done;
        info!(epochs = self.epoch, global_step = self.global_step(), best = self.best.best(), "training finished");
        Ok(RunOutcome::Completed { epochs: self.epoch, global_step: self.global_step(), best: self.best.best() })
    }

    /// `None` when stopped part way.
    fn train_epoch(
        &mut self,
        train: &mut dyn DataStream,
        steps: usize,
        run_start: Instant,
        sink: &mut dyn EventSink,
    ) -> Result<Option<EpochSummary>> {
        let epoch_start = Instant::now();
        self.metrics.reset();
        let mut consumed = 0usize;

        for step in 0..steps {
            if self.stop_requested() {
                sink.on_pass_end(Pass::Training);
                return Ok(None);
            }
            let batch = match train.next_batch()? {
                Some(batch) if !batch.is_empty() => batch,
                _ => {
                    return Err(TrainError::StreamInvariantViolation {
                        pass: "training",
                        consumed,
                        expected: steps * self.config.batch,
                    });
                }
            };
            let learning_rate = self.schedule.rate(self.optimizer.global_step());
            let values = train_step(&mut self.network, &mut self.optimizer, &batch, learning_rate)?;
            self.metrics.update(&values, batch.len() as f64)?;
            consumed += batch.len();

            sink.on_step(&StepProgress {
                pass: Pass::Training,
                step: step + 1,
                total: Some(steps),
                message: self.metrics.format(&self.metrics.average()?),
            });
        }
        sink.on_pass_end(Pass::Training);

        let avg = self.metrics.average()?;
        debug!(epoch = self.epoch, samples = consumed, "training pass done");
        Ok(Some(EpochSummary {
            epoch: self.epoch,
            metrics: self.metrics.named(&avg),
            elapsed_secs: run_start.elapsed().as_secs_f64(),
            epoch_secs: epoch_start.elapsed().as_secs_f64(),
        }))
    }

    /// One full pass over `val`. `None` when stopped part way.
    fn validate(&mut self, val: &mut dyn DataStream, sink: &mut dyn EventSink) -> Result<Option<ValidationSummary>> {
        val.reset();
        let expected = val.size();
        let total = Some(expected.div_ceil(self.config.batch.max(1)));
        self.metrics.reset();
        let mut consumed = 0usize;
        let mut labels = Vec::with_capacity(expected);
        let mut positive = Vec::with_capacity(expected);

        let mut step = 0;
        while let Some(batch) = val.next_batch()? {
            if self.stop_requested() {
                sink.on_pass_end(Pass::Validation);
                return Ok(None);
            }
            let (values, probs) = eval_step(&mut self.network, &batch)?;
            self.metrics.update(&values, batch.len() as f64)?;
            consumed += batch.len();
            labels.extend_from_slice(&batch.labels);
            positive.extend(probs);

            step += 1;
            sink.on_step(&StepProgress {
                pass: Pass::Validation,
                step,
                total,
                message: self.metrics.format(&self.metrics.average()?),
            });
        }
        sink.on_pass_end(Pass::Validation);

        if consumed == 0 || consumed != expected {
            return Err(TrainError::StreamInvariantViolation { pass: "validation", consumed, expected });
        }

        let avg = self.metrics.average()?;
        self.best.update_from(self.metrics.names(), &avg)?;

        let (sk_acc, auc) = if self.config.classes == 2 {
            (Some(accuracy_score(&labels, &positive, 0.5)), roc_auc(&labels, &positive))
        } else {
            (None, None)
        };

        Ok(Some(ValidationSummary {
            epoch: self.epoch - 1,
            metrics: self.metrics.named(&avg),
            sk_acc,
            auc,
            learning_rate: self.learning_rate(),
            best: self.best.best(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ImageBatch, Minibatch};
    use crate::train::events::RecordingSink;

    /// Cycles through `samples` labels in batches of `batch`; never ends.
    struct Cycle {
        batch: usize,
        size: usize,
        next: usize,
    }

    impl DataStream for Cycle {
        fn next_batch(&mut self) -> Result<Option<Minibatch>> {
            let labels: Vec<usize> = (0..self.batch).map(|i| (self.next + i) % 2).collect();
            self.next += self.batch;
            let data = labels.iter().flat_map(|&l| if l == 1 { [250.0, 240.0] } else { [5.0, 10.0] }).collect();
            Ok(Some(Minibatch { labels, images: ImageBatch::new(self.batch, 1, 2, 1, data) }))
        }

        fn size(&self) -> usize {
            self.size
        }

        fn reset(&mut self) {
            self.next = 0;
        }
    }

    fn config() -> TrainingConfiguration {
        TrainingConfiguration {
            size: 1,
            channels: 1,
            batch: 4,
            net: "linear".into(),
            max_epochs: 2,
            val_epochs: 1,
            ckpt_epochs: 1,
            ..TrainingConfiguration::new("unused.db")
        }
    }

    fn orchestrator(config: TrainingConfiguration) -> TrainingOrchestrator {
        let shape = crate::network::ModelShape { height: 1, width: 2, channels: 1, classes: 2, weight_decay: 0.0 };
        let network = ArchitectureRegistry::with_defaults().build("linear", &shape, 11).unwrap();
        TrainingOrchestrator::new(config, network)
    }

    #[test]
    fn state_moves_from_idle_to_done() {
        let mut orch = orchestrator(config());
        assert_eq!(orch.state(), OrchestratorState::Idle);
        let mut train = Cycle { batch: 4, size: 8, next: 0 };
        let mut sink = RecordingSink::new();
        let outcome = orch.run(&mut train, None, &mut sink).unwrap();
        assert_eq!(orch.state(), OrchestratorState::Done);
        assert_eq!(outcome, RunOutcome::Completed { epochs: 2, global_step: 4, best: 0.0 });
        assert_eq!(sink.steps, (4, 0));
    }

    #[test]
    fn raised_flag_stops_before_any_step() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut orch = orchestrator(config()).with_stop_flag(flag);
        let mut train = Cycle { batch: 4, size: 8, next: 0 };
        let mut sink = RecordingSink::new();
        let outcome = orch.run(&mut train, None, &mut sink).unwrap();
        assert_eq!(outcome, RunOutcome::Interrupted { epoch: 0, global_step: 0 });
        assert!(sink.events.is_empty());
    }

    #[test]
    fn validation_reports_previous_epoch_and_binary_scores() {
        let mut orch = orchestrator(TrainingConfiguration { max_epochs: 1, ..config() });
        let mut train = Cycle { batch: 4, size: 8, next: 0 };
        let mut val = Finite::new(6, 4);
        let mut sink = RecordingSink::new();
        orch.run(&mut train, Some(&mut val), &mut sink).unwrap();

        let validations = sink.validations();
        assert_eq!(validations.len(), 1);
        let v = validations[0];
        assert_eq!(v.epoch, 0);
        assert!(v.sk_acc.is_some());
        assert!(v.auc.is_some());
        assert_eq!(v.learning_rate, orch.learning_rate());
        assert!(v.best >= 0.0);
        assert_eq!(sink.steps.1, 2);
    }

    #[test]
    fn each_validation_pass_averages_only_its_own_batches() {
        let mut orch = orchestrator(config());
        let mut train = Cycle { batch: 4, size: 8, next: 0 };
        let mut val = Finite::new(6, 4);
        let mut sink = RecordingSink::new();
        orch.run(&mut train, Some(&mut val), &mut sink).unwrap();

        let mut network = orch.network().clone();
        let mut expected = MetricAccumulator::standard();
        let mut fresh = Finite::new(6, 4);
        while let Some(batch) = fresh.next_batch().unwrap() {
            let (values, _) = eval_step(&mut network, &batch).unwrap();
            expected.update(&values, batch.len() as f64).unwrap();
        }
        let expected = expected.named(&expected.average().unwrap());

        let validations = sink.validations();
        assert_eq!(validations.len(), 2);
        assert_ne!(validations[0].metrics[1].1, validations[1].metrics[1].1);
        for ((name, got), (want_name, want)) in validations[1].metrics.iter().zip(&expected) {
            assert_eq!(name, want_name);
            assert!((got - want).abs() < 1e-12, "{name}: {got} vs {want}");
        }
    }

    /// `size` alternating samples in batches of `batch`, then exhausted.
    pub(super) struct Finite {
        size: usize,
        batch: usize,
        next: usize,
    }

    impl Finite {
        pub(super) fn new(size: usize, batch: usize) -> Self {
            Self { size, batch, next: 0 }
        }
    }

    impl DataStream for Finite {
        fn next_batch(&mut self) -> Result<Option<Minibatch>> {
            if self.next >= self.size {
                return Ok(None);
            }
            let n = self.batch.min(self.size - self.next);
            let labels: Vec<usize> = (self.next..self.next + n).map(|i| i % 2).collect();
            self.next += n;
            let data = labels.iter().flat_map(|&l| if l == 1 { [250.0, 240.0] } else { [5.0, 10.0] }).collect();
            Ok(Some(Minibatch { labels, images: ImageBatch::new(n, 1, 2, 1, data) }))
        }

        fn size(&self) -> usize {
            self.size
        }

        fn reset(&mut self) {
            self.next = 0;
        }
    }
}
