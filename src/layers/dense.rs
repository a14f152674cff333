use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::{math::matrix::Matrix, activation::activation::ActivationFunction};

/// Fully-connected layer operating on a whole minibatch (one row per sample).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    /// Shape (input_size, size).
    pub weights: Matrix,
    /// Shape (1, size).
    pub biases: Matrix,
    pub activator: ActivationFunction,
    /// L2 penalty scale applied to the weights (not the biases).
    pub l2: f64,
    // Forward caches needed by `backward`; never persisted.
    #[serde(skip)]
    input: Matrix,
    #[serde(skip)]
    pre_activation: Matrix,
}

/// Gradients of one dense layer, same shapes as its parameters.
#[derive(Debug, Clone)]
pub struct DenseGrads {
    pub weights: Matrix,
    pub biases: Matrix,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        size: usize,
        activation: ActivationFunction,
        l2: f64,
        rng: &mut R,
    ) -> Dense {
        let weights = match activation {
            ActivationFunction::ReLU => Matrix::he(input_size, size, rng),
            ActivationFunction::Identity => Matrix::xavier(input_size, size, rng),
        };
        Dense {
            weights,
            biases: Matrix::zeros(1, size),
            activator: activation,
            l2,
            input: Matrix::default(),
            pre_activation: Matrix::default(),
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.rows
    }

    pub fn size(&self) -> usize {
        self.weights.cols
    }

    pub fn forward(&mut self, input: &Matrix) -> Matrix {
        let mut z = input * &self.weights;
        z.add_row_broadcast(&self.biases);
        let a = self.activator.apply(&z);
        self.input = input.clone();
        self.pre_activation = z;
        a
    }

    /// Back-propagates `grad_output` (∂L/∂a for this layer's activations).
    /// Returns the parameter gradients and ∂L/∂input for the previous layer.
    pub fn backward(&self, grad_output: &Matrix) -> (DenseGrads, Matrix) {
        let delta = grad_output.hadamard(&self.activator.gradient(&self.pre_activation));

        let mut weights = &self.input.transpose() * &delta;
        if self.l2 > 0.0 {
            weights.axpy(self.l2, &self.weights);
        }
        let biases = delta.sum_rows();
        let grad_input = &delta * &self.weights.transpose();

        (DenseGrads { weights, biases }, grad_input)
    }

    /// `0.5 * l2 * ||W||²`
    pub fn regularization_loss(&self) -> f64 {
        0.5 * self.l2 * self.weights.squared_norm()
    }
}
