pub mod metadata;
pub mod network;
pub mod registry;

pub use metadata::{ModelMetadata, ModelShape};
pub use network::{Gradients, Network};
pub use registry::{ArchitectureBuilder, ArchitectureRegistry};
