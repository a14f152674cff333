use serde::{Serialize, Deserialize};

use crate::error::{Result, TrainError};
use crate::math::matrix::Matrix;
use crate::network::network::{Gradients, Network};

/// SGD with classical momentum.
///
/// Owns the global step counter: every applied update advances it by one,
/// and it is saved and restored together with the velocity buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumOptimizer {
    pub momentum: f64,
    velocities: Vec<Matrix>,
    global_step: u64,
}

impl MomentumOptimizer {
    /// Velocities start at zero, shaped like `network`'s parameters.
    pub fn new(momentum: f64, network: &Network) -> MomentumOptimizer {
        let velocities = network.parameter_shapes()
            .into_iter()
            .map(|(r, c)| Matrix::zeros(r, c))
            .collect();
        MomentumOptimizer { momentum, velocities, global_step: 0 }
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Applies one update at `learning_rate`:
    ///   v ← momentum·v + g
    ///   p ← p − lr·v
    pub fn step(&mut self, network: &mut Network, grads: &Gradients, learning_rate: f64) -> Result<()> {
        let mut params = network.parameters_mut();
        if params.len() != grads.tensors.len() || params.len() != self.velocities.len() {
            return Err(TrainError::ShapeMismatch {
                expected: params.len(),
                actual: grads.tensors.len(),
            });
        }
        for ((param, grad), velocity) in params.iter_mut().zip(&grads.tensors).zip(&mut self.velocities) {
            velocity.scale(self.momentum);
            velocity.axpy(1.0, grad);
            param.axpy(-learning_rate, velocity);
        }
        self.global_step += 1;
        Ok(())
    }

    /// Verifies a restored optimizer still matches the network it will drive.
    pub fn check_compatible(&self, network: &Network) -> Result<()> {
        let shapes = network.parameter_shapes();
        let compatible = shapes.len() == self.velocities.len()
            && shapes.iter().zip(&self.velocities).all(|(&(r, c), v)| v.rows == r && v.cols == c);
        if compatible {
            Ok(())
        } else {
            Err(TrainError::ShapeMismatch { expected: shapes.len(), actual: self.velocities.len() })
        }
    }
}
