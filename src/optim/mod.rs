pub mod momentum;
pub mod schedule;

pub use momentum::MomentumOptimizer;
pub use schedule::ExponentialDecay;
