use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use ferrite_cls::data::{
    write_image_db, DataStream, EvalStream, ImageBatch, ImageDb, ImageDbHeader, Minibatch, TrainStream,
};
use ferrite_cls::train::{
    CheckpointManager, EventSink, OrchestratorState, RecordingSink, RunOutcome, TrainingEvent,
    TrainingOrchestrator,
};
use ferrite_cls::{ArchitectureRegistry, ModelShape, Network, Result, TrainError, TrainingConfiguration};

/// Two-pixel grayscale samples: class 1 bright, class 0 dark.
fn sample(label: usize) -> [f32; 2] {
    if label == 1 { [230.0, 250.0] } else { [20.0, 5.0] }
}

fn minibatch(labels: Vec<usize>) -> Minibatch {
    let data = labels.iter().flat_map(|&l| sample(l)).collect();
    Minibatch { images: ImageBatch::new(labels.len(), 1, 2, 1, data), labels }
}

/// Endless stream repeating the same alternating batch.
struct Repeat {
    batch: usize,
    size: usize,
    pulls: usize,
}

impl Repeat {
    fn new(batch: usize, size: usize) -> Self {
        Self { batch, size, pulls: 0 }
    }
}

impl DataStream for Repeat {
    fn next_batch(&mut self) -> Result<Option<Minibatch>> {
        self.pulls += 1;
        Ok(Some(minibatch((0..self.batch).map(|i| i % 2).collect())))
    }

    fn size(&self) -> usize {
        self.size
    }

    fn reset(&mut self) {}
}

/// Finite stream yielding `yields` samples while claiming `claims`.
struct Finite {
    batch: usize,
    yields: usize,
    claims: usize,
    next: usize,
}

impl Finite {
    fn honest(size: usize, batch: usize) -> Self {
        Self { batch, yields: size, claims: size, next: 0 }
    }
}

impl DataStream for Finite {
    fn next_batch(&mut self) -> Result<Option<Minibatch>> {
        if self.next >= self.yields {
            return Ok(None);
        }
        let n = self.batch.min(self.yields - self.next);
        let labels = (self.next..self.next + n).map(|i| i % 2).collect();
        self.next += n;
        Ok(Some(minibatch(labels)))
    }

    fn size(&self) -> usize {
        self.claims
    }

    fn reset(&mut self) {
        self.next = 0;
    }
}

fn shape() -> ModelShape {
    ModelShape { height: 1, width: 2, channels: 1, classes: 2, weight_decay: 1e-4 }
}

fn config() -> TrainingConfiguration {
    TrainingConfiguration {
        size: 1,
        channels: 1,
        batch: 4,
        net: "linear".into(),
        lr: 0.1,
        decay_rate: 0.5,
        decay_steps: 2,
        max_epochs: 1,
        epoch_steps: Some(3),
        ..TrainingConfiguration::new("unused.db")
    }
}

fn network() -> Network {
    ArchitectureRegistry::with_defaults().build("linear", &shape(), 42).unwrap()
}

#[test]
fn single_epoch_without_validation_or_checkpoint() {
    let mut orch = TrainingOrchestrator::new(config(), network());
    let mut train = Repeat::new(4, 100);
    let mut val = Finite::honest(4, 4);
    let mut sink = RecordingSink::new();

    let outcome = orch.run(&mut train, Some(&mut val), &mut sink).unwrap();

    assert_eq!(outcome, RunOutcome::Completed { epochs: 1, global_step: 3, best: 0.0 });
    assert_eq!(train.pulls, 3);
    assert_eq!(sink.epochs().len(), 1);
    assert_eq!(sink.epochs()[0].epoch, 0);
    assert!(sink.validations().is_empty());
    assert!(sink.checkpoints().is_empty());
    assert_eq!(sink.steps, (3, 0));
}

#[test]
fn retention_of_one_keeps_only_latest_checkpoint() {
    let dir = TempDir::new().unwrap();
    let config = TrainingConfiguration {
        model_dir: Some(dir.path().to_path_buf()),
        max_to_keep: 1,
        ckpt_epochs: 1,
        max_epochs: 2,
        ..config()
    };
    let mut orch = TrainingOrchestrator::new(config, network());
    let mut sink = RecordingSink::new();
    orch.run(&mut Repeat::new(4, 12), None, &mut sink).unwrap();

    let written: Vec<usize> = sink.checkpoints().into_iter().map(|(epoch, _)| epoch).collect();
    assert_eq!(written, vec![1, 2]);
    assert!(!dir.path().join("1.ckpt").exists());
    assert!(dir.path().join("2.ckpt").exists());
    assert_eq!(orch.state(), OrchestratorState::Done);
}

#[test]
fn short_validation_stream_aborts_before_reporting() {
    let config = TrainingConfiguration { val_epochs: 1, ..config() };
    let mut orch = TrainingOrchestrator::new(config, network());
    let mut val = Finite { batch: 4, yields: 6, claims: 10, next: 0 };
    let mut sink = RecordingSink::new();

    let err = orch.run(&mut Repeat::new(4, 12), Some(&mut val), &mut sink).unwrap_err();

    assert!(matches!(
        err,
        TrainError::StreamInvariantViolation { pass: "validation", consumed: 6, expected: 10 }
    ));
    assert!(sink.validations().is_empty());
    assert_eq!(sink.epochs().len(), 1);
}

#[test]
fn empty_validation_stream_is_a_violation() {
    let config = TrainingConfiguration { val_epochs: 1, ..config() };
    let mut orch = TrainingOrchestrator::new(config, network());
    let mut val = Finite::honest(0, 4);
    let err = orch.run(&mut Repeat::new(4, 12), Some(&mut val), &mut RecordingSink::new()).unwrap_err();
    assert!(matches!(err, TrainError::StreamInvariantViolation { consumed: 0, expected: 0, .. }));
}

#[test]
fn validation_runs_on_cadence_and_tracks_best() {
    let config = TrainingConfiguration { val_epochs: 2, max_epochs: 4, ..config() };
    let mut orch = TrainingOrchestrator::new(config, network());
    let mut val = Finite::honest(6, 4);
    let mut sink = RecordingSink::new();
    orch.run(&mut Repeat::new(4, 12), Some(&mut val), &mut sink).unwrap();

    let validations = sink.validations();
    let epochs: Vec<usize> = validations.iter().map(|v| v.epoch).collect();
    assert_eq!(epochs, vec![1, 3]);
    assert!(validations[1].best >= validations[0].best);
    for v in &validations {
        let acc = v.metrics.iter().find(|(name, _)| name == "acc").unwrap().1;
        assert!(v.best >= acc);
        assert!(v.auc.is_some());
    }
    // 12 steps with the rate halving every 2.
    assert_eq!(validations[1].learning_rate, 0.1 * 0.5f64.powi(6));
    assert_eq!(sink.steps.1, 4);

    // Summaries arrive in epoch order, validation after its training epoch.
    let kinds: Vec<&str> = sink.events.iter().map(|e| match e {
        TrainingEvent::Epoch(_) => "epoch",
        TrainingEvent::Validation(_) => "validation",
        TrainingEvent::Checkpoint { .. } => "checkpoint",
    }).collect();
    assert_eq!(kinds, vec!["epoch", "epoch", "validation", "epoch", "epoch", "validation"]);
}

#[test]
fn multiclass_runs_skip_binary_scores() {
    let config = TrainingConfiguration { classes: 3, val_epochs: 1, ..config() };
    let shape = ModelShape { classes: 3, ..shape() };
    let network = ArchitectureRegistry::with_defaults().build("linear", &shape, 1).unwrap();
    let mut orch = TrainingOrchestrator::new(config, network);
    let mut sink = RecordingSink::new();
    orch.run(&mut Repeat::new(4, 12), Some(&mut Finite::honest(4, 4)), &mut sink).unwrap();

    let v = sink.validations()[0];
    assert_eq!(v.sk_acc, None);
    assert_eq!(v.auc, None);
}

#[test]
fn resumed_run_matches_uninterrupted_run() {
    let dir = TempDir::new().unwrap();
    let config = TrainingConfiguration {
        model_dir: Some(dir.path().to_path_buf()),
        ckpt_epochs: 1,
        max_epochs: 2,
        ..config()
    };

    let mut straight = TrainingOrchestrator::new(config.clone(), network());
    straight.run(&mut Repeat::new(4, 12), None, &mut RecordingSink::new()).unwrap();

    let state = CheckpointManager::restore(&dir.path().join("1.ckpt")).unwrap();
    assert_eq!(state.epoch, 1);
    assert_eq!(state.global_step(), 3);

    let mut resumed = TrainingOrchestrator::new(config, network());
    resumed.resume_from(state).unwrap();
    assert_eq!(resumed.epoch(), 1);
    assert_eq!(resumed.learning_rate(), 0.1 * 0.5);

    let mut sink = RecordingSink::new();
    resumed.run(&mut Repeat::new(4, 12), None, &mut sink).unwrap();

    assert_eq!(sink.epochs().len(), 1);
    assert_eq!(sink.epochs()[0].epoch, 1);
    assert_eq!(resumed.global_step(), straight.global_step());
    assert_eq!(resumed.learning_rate(), straight.learning_rate());
    assert_eq!(
        serde_json::to_value(resumed.network()).unwrap(),
        serde_json::to_value(straight.network()).unwrap()
    );
}

#[test]
fn resume_refuses_a_different_architecture() {
    let dir = TempDir::new().unwrap();
    let manager = CheckpointManager::new(dir.path(), 5);
    let mut orch = TrainingOrchestrator::new(TrainingConfiguration { max_epochs: 1, ..config() }, network());
    orch.run(&mut Repeat::new(4, 12), None, &mut RecordingSink::new()).unwrap();
    manager.save(&orch.snapshot()).unwrap();

    let other = ArchitectureRegistry::with_defaults().build("mlp", &shape(), 1).unwrap();
    let mut mismatched = TrainingOrchestrator::new(config(), other);
    let state = CheckpointManager::restore(dir.path()).unwrap();
    assert!(matches!(mismatched.resume_from(state), Err(TrainError::Configuration(_))));
}

/// Raises the stop flag after the second training step.
struct StopAfter {
    flag: Arc<AtomicBool>,
    steps: usize,
    inner: RecordingSink,
}

impl EventSink for StopAfter {
    fn on_step(&mut self, progress: &ferrite_cls::train::StepProgress) {
        self.inner.on_step(progress);
        if self.inner.steps.0 == self.steps {
            self.flag.store(true, Ordering::Relaxed);
        }
    }

    fn on_epoch(&mut self, summary: &ferrite_cls::train::EpochSummary) {
        self.inner.on_epoch(summary);
    }

    fn on_validation(&mut self, summary: &ferrite_cls::train::ValidationSummary) {
        self.inner.on_validation(summary);
    }

    fn on_checkpoint(&mut self, epoch: usize, path: &std::path::Path) {
        self.inner.on_checkpoint(epoch, path);
    }
}

#[test]
fn interrupt_stops_between_steps_without_checkpoint() {
    let dir = TempDir::new().unwrap();
    let flag = Arc::new(AtomicBool::new(false));
    let config = TrainingConfiguration { model_dir: Some(dir.path().to_path_buf()), ckpt_epochs: 1, ..config() };
    let mut orch = TrainingOrchestrator::new(config, network()).with_stop_flag(Arc::clone(&flag));
    let mut sink = StopAfter { flag, steps: 2, inner: RecordingSink::new() };

    let outcome = orch.run(&mut Repeat::new(4, 12), None, &mut sink).unwrap();

    assert_eq!(outcome, RunOutcome::Interrupted { epoch: 0, global_step: 2 });
    assert!(sink.inner.events.is_empty());
    assert!(CheckpointManager::new(dir.path(), 5).list().unwrap().is_empty());
}

#[test]
fn trains_from_image_db_files() {
    let dir = TempDir::new().unwrap();
    let header = ImageDbHeader { count: 0, height: 4, width: 4, channels: 1 };
    let records = |n: usize| {
        (0..n).map(|i| {
            let label = (i % 2) as u32;
            (label, vec![if label == 1 { 220u8 } else { 30u8 }; 16])
        })
    };
    let train_path = dir.path().join("train.db");
    let val_path = dir.path().join("val.db");
    write_image_db(&train_path, header, records(10)).unwrap();
    write_image_db(&val_path, header, records(5)).unwrap();

    let config = TrainingConfiguration {
        db: train_path.clone(),
        val_db: Some(val_path.clone()),
        model_dir: Some(dir.path().join("model")),
        size: 2,
        channels: 1,
        batch: 4,
        shift: 1,
        net: "mlp".into(),
        max_epochs: 2,
        val_epochs: 1,
        ckpt_epochs: 2,
        prefetch: 0,
        ..TrainingConfiguration::new(&train_path)
    };
    let registry = ArchitectureRegistry::with_defaults();
    config.validate(&registry).unwrap();

    let mut train = TrainStream::new(ImageDb::open(&train_path).unwrap(), config.stream_options(true)).unwrap();
    let mut val = EvalStream::new(ImageDb::open(&val_path).unwrap(), config.stream_options(false)).unwrap();
    let mut orch = TrainingOrchestrator::from_registry(config.clone(), &registry).unwrap();
    let mut sink = RecordingSink::new();
    let outcome = orch.run(&mut train, Some(&mut val), &mut sink).unwrap();

    // ceil(10 / 4) = 3 steps per epoch.
    assert_eq!(outcome, RunOutcome::Completed { epochs: 2, global_step: 6, best: orch.best() });
    assert_eq!(sink.validations().len(), 2);
    assert_eq!(sink.steps.1, 4);
    assert!(dir.path().join("model").join("2.ckpt").exists());

    // Resuming from the model directory picks up where the run ended.
    let resumed = TrainingOrchestrator::from_registry(
        TrainingConfiguration { resume: Some(dir.path().join("model")), max_epochs: 3, ..config },
        &registry,
    )
    .unwrap();
    assert_eq!(resumed.epoch(), 2);
    assert_eq!(resumed.global_step(), 6);
    assert_eq!(resumed.best(), orch.best());
}
