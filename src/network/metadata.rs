use serde::{Deserialize, Serialize};

/// Input geometry and output width a network was built for.
///
/// Stored next to the weights in every checkpoint so a resume against a
/// differently-shaped configuration is refused instead of silently misread.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub classes: usize,
    /// L2 scale applied to every dense weight matrix.
    pub weight_decay: f64,
}

impl ModelShape {
    /// Length of one flattened (height, width, channels) sample.
    pub fn input_size(&self) -> usize {
        self.height * self.width * self.channels
    }
}

/// Annotations carried by a saved network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Registry key the network was built from.
    pub architecture: String,
    pub shape: ModelShape,
}
