use serde::{Serialize, Deserialize};

use crate::math::matrix::Matrix;

/// Element-wise activations available to dense layers.
///
/// There is no softmax variant: networks emit raw logits and the softmax is
/// fused into the cross-entropy loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationFunction {
    Identity,
    ReLU,
}

impl ActivationFunction {
    pub fn function(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::Identity => x,
            ActivationFunction::ReLU => if x > 0.0 { x } else { 0.0 },
        }
    }

    /// Derivative with respect to the pre-activation `x`.
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::Identity => 1.0,
            ActivationFunction::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
        }
    }

    pub fn apply(&self, z: &Matrix) -> Matrix {
        z.map(|x| self.function(x))
    }

    pub fn gradient(&self, z: &Matrix) -> Matrix {
        z.map(|x| self.derivative(x))
    }
}
