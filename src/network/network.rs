use rand::{rngs::StdRng, SeedableRng};
use serde::{Serialize, Deserialize};

use crate::layers::Layer;
use crate::math::matrix::Matrix;
use crate::network::metadata::ModelMetadata;

/// Parameter gradients, ordered exactly like [`Network::parameters_mut`].
#[derive(Debug, Clone, Default)]
pub struct Gradients {
    pub tensors: Vec<Matrix>,
}

/// Sequential classifier producing raw class scores (logits).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub metadata: ModelMetadata,
    pub layers: Vec<Layer>,
    // Drives dropout masks only; reseeded after construction or restore.
    #[serde(skip, default = "unseeded_rng")]
    rng: StdRng,
}

fn unseeded_rng() -> StdRng {
    StdRng::seed_from_u64(0)
}

impl Network {
    pub fn new(metadata: ModelMetadata, layers: Vec<Layer>) -> Network {
        Network { metadata, layers, rng: unseeded_rng() }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Forward pass over a (batch, input_size) matrix. `training` enables
    /// dropout; caches needed by [`backward`](Self::backward) are kept.
    pub fn forward(&mut self, input: &Matrix, training: bool) -> Matrix {
        let mut current = input.clone();
        for layer in &mut self.layers {
            current = match layer {
                Layer::Dense(d) => d.forward(&current),
                Layer::Dropout(d) => d.forward(&current, training, &mut self.rng),
            };
        }
        current
    }

    /// Back-propagates ∂L/∂logits through the layers touched by the last
    /// forward pass.
    pub fn backward(&self, grad_logits: &Matrix) -> Gradients {
        let mut grad = grad_logits.clone();
        let mut reversed = Vec::new();
        for layer in self.layers.iter().rev() {
            grad = match layer {
                Layer::Dense(d) => {
                    let (g, grad_input) = d.backward(&grad);
                    // Pushed in reverse, so biases before weights.
                    reversed.push(g.biases);
                    reversed.push(g.weights);
                    grad_input
                }
                Layer::Dropout(d) => d.backward(&grad),
            };
        }
        reversed.reverse();
        Gradients { tensors: reversed }
    }

    pub fn regularization_loss(&self) -> f64 {
        self.layers.iter()
            .map(|layer| match layer {
                Layer::Dense(d) => d.regularization_loss(),
                Layer::Dropout(_) => 0.0,
            })
            .sum()
    }

    /// Trainable tensors in a fixed order: for each dense layer, weights then biases.
    pub fn parameters_mut(&mut self) -> Vec<&mut Matrix> {
        let mut params = Vec::new();
        for layer in &mut self.layers {
            if let Layer::Dense(d) = layer {
                params.push(&mut d.weights);
                params.push(&mut d.biases);
            }
        }
        params
    }

    pub fn parameter_shapes(&self) -> Vec<(usize, usize)> {
        let mut shapes = Vec::new();
        for layer in &self.layers {
            if let Layer::Dense(d) = layer {
                shapes.push((d.weights.rows, d.weights.cols));
                shapes.push((d.biases.rows, d.biases.cols));
            }
        }
        shapes
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_shapes().iter().map(|(r, c)| r * c).sum()
    }

    /// Serializes the network weights to a pretty-printed JSON file.
    pub fn save_json(&self, path: &std::path::Path) -> crate::error::Result<()> {
        crate::persistence::atomic_write_json(path, self)?;
        Ok(())
    }
}
