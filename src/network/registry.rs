use std::collections::HashMap;

use rand::{rngs::StdRng, SeedableRng};

use crate::activation::activation::ActivationFunction;
use crate::error::{Result, TrainError};
use crate::layers::{Dense, Dropout, Layer};
use crate::network::metadata::{ModelMetadata, ModelShape};
use crate::network::network::Network;

/// Builds the layer stack of one architecture for a given input/output shape.
pub type ArchitectureBuilder = fn(&ModelShape, &mut StdRng) -> Vec<Layer>;

/// Maps architecture identifiers to their builders.
///
/// The trainer never looks at which architecture it got; new ones only need
/// to be registered here.
pub struct ArchitectureRegistry {
    builders: HashMap<String, ArchitectureBuilder>,
}

impl ArchitectureRegistry {
    pub fn empty() -> Self {
        Self { builders: HashMap::new() }
    }

    /// Registry with `linear`, `mlp` and `mlp_deep`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("linear", linear);
        registry.register("mlp", mlp);
        registry.register("mlp_deep", mlp_deep);
        registry
    }

    pub fn register(&mut self, name: &str, builder: ArchitectureBuilder) {
        self.builders.insert(name.to_owned(), builder);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Sorted list of registered identifiers.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn build(&self, name: &str, shape: &ModelShape, seed: u64) -> Result<Network> {
        let builder = self.builders
            .get(name)
            .ok_or_else(|| TrainError::UnknownArchitecture(name.to_owned()))?;
        let mut rng = StdRng::seed_from_u64(seed);
        let layers = builder(shape, &mut rng);
        let mut network = Network::new(
            ModelMetadata { architecture: name.to_owned(), shape: *shape },
            layers,
        );
        network.reseed(seed.wrapping_add(1));
        Ok(network)
    }
}

fn linear(shape: &ModelShape, rng: &mut StdRng) -> Vec<Layer> {
    vec![Layer::Dense(Dense::new(
        shape.input_size(), shape.classes, ActivationFunction::Identity, shape.weight_decay, rng,
    ))]
}

fn mlp(shape: &ModelShape, rng: &mut StdRng) -> Vec<Layer> {
    vec![
        Layer::Dense(Dense::new(shape.input_size(), 128, ActivationFunction::ReLU, shape.weight_decay, rng)),
        Layer::Dropout(Dropout::new(0.5)),
        Layer::Dense(Dense::new(128, shape.classes, ActivationFunction::Identity, shape.weight_decay, rng)),
    ]
}

fn mlp_deep(shape: &ModelShape, rng: &mut StdRng) -> Vec<Layer> {
    vec![
        Layer::Dense(Dense::new(shape.input_size(), 256, ActivationFunction::ReLU, shape.weight_decay, rng)),
        Layer::Dropout(Dropout::new(0.5)),
        Layer::Dense(Dense::new(256, 128, ActivationFunction::ReLU, shape.weight_decay, rng)),
        Layer::Dense(Dense::new(128, shape.classes, ActivationFunction::Identity, shape.weight_decay, rng)),
    ]
}
