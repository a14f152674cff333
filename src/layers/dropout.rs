use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::math::matrix::Matrix;

/// Inverted dropout. Active only when the forward pass runs in training mode;
/// evaluation passes are the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dropout {
    pub rate: f64,
    #[serde(skip)]
    mask: Option<Matrix>,
}

impl Dropout {
    pub fn new(rate: f64) -> Dropout {
        Dropout { rate, mask: None }
    }

    pub fn forward<R: Rng + ?Sized>(&mut self, input: &Matrix, training: bool, rng: &mut R) -> Matrix {
        if !training || self.rate <= 0.0 {
            self.mask = None;
            return input.clone();
        }
        let keep = 1.0 - self.rate;
        let mask = input.map(|_| if rng.gen::<f64>() < keep { 1.0 / keep } else { 0.0 });
        let out = input.hadamard(&mask);
        self.mask = Some(mask);
        out
    }

    pub fn backward(&self, grad_output: &Matrix) -> Matrix {
        match &self.mask {
            Some(mask) => grad_output.hadamard(mask),
            None => grad_output.clone(),
        }
    }
}
