pub mod best;
pub mod checkpoint;
pub mod console;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod trainer;

pub use best::BestScoreTracker;
pub use checkpoint::{CheckpointManager, CheckpointState};
pub use console::ConsoleSink;
pub use events::{EpochSummary, EventSink, Pass, RecordingSink, StepProgress, TracingSink, TrainingEvent, ValidationSummary};
pub use metrics::{MetricAccumulator, METRIC_NAMES};
pub use orchestrator::{OrchestratorState, RunOutcome, TrainingOrchestrator, BEST_METRIC};
pub use trainer::{eval_step, train_step};
