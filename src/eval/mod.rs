pub mod classification;

pub use classification::{accuracy_score, roc_auc};
