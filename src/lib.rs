pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod loss;
pub mod optim;
pub mod data;
pub mod eval;
pub mod train;
pub mod config;
pub mod error;
pub mod persistence;

// Convenience re-exports
pub use math::matrix::Matrix;
pub use activation::activation::ActivationFunction;
pub use network::{ArchitectureRegistry, ModelShape, Network};
pub use optim::{ExponentialDecay, MomentumOptimizer};
pub use data::{DataStream, EvalStream, ImageDb, Minibatch, PrefetchStream, TrainStream};
pub use config::TrainingConfiguration;
pub use error::{Result, TrainError};
pub use train::{CheckpointManager, EventSink, RunOutcome, TrainingOrchestrator};
