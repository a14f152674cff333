pub mod dense;
pub mod dropout;

pub use dense::{Dense, DenseGrads};
pub use dropout::Dropout;

use serde::{Serialize, Deserialize};

/// One stage of a sequential network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Layer {
    Dense(Dense),
    Dropout(Dropout),
}
