//! Data pipeline: on-disk corpus, crops/augmentation, minibatch streams.
//!
//! * **[`ImageDb`]**: memory-mapped corpus file; [`write_image_db`] creates one.
//! * **[`TrainStream`]** / **[`EvalStream`]**: the two [`DataStream`] modes.
//! * **[`PrefetchStream`]**: decodes training batches on a worker thread.
//! * [`idx`] and [`folder`]: importers used by `ferrite-cls pack`.

pub mod batch;
pub mod folder;
pub mod idx;
pub mod image_db;
pub mod prefetch;
pub mod stream;
pub mod transform;

pub use batch::{ImageBatch, Minibatch};
pub use image_db::{write_image_db, ImageDb, ImageDbHeader};
pub use prefetch::PrefetchStream;
pub use stream::{DataStream, EvalStream, StreamOptions, TrainStream};
