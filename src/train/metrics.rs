use crate::error::{Result, TrainError};

/// Metrics produced by every step, in this order: top-1 accuracy,
/// cross-entropy, regularization loss, total loss.
pub const METRIC_NAMES: [&str; 4] = ["acc", "xe", "re", "lo"];

/// Weighted running mean over a fixed, ordered list of named metrics.
///
/// Each update contributes `values * weight` to the sums and `weight` to the
/// count, so batches of different sizes are averaged per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricAccumulator {
    names: Vec<String>,
    sums: Vec<f64>,
    count: f64,
}

impl MetricAccumulator {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            sums: vec![0.0; names.len()],
            count: 0.0,
        }
    }

    /// Accumulator over [`METRIC_NAMES`].
    pub fn standard() -> Self {
        Self::new(&METRIC_NAMES)
    }

    pub fn reset(&mut self) {
        self.sums.iter_mut().for_each(|s| *s = 0.0);
        self.count = 0.0;
    }

    pub fn update(&mut self, values: &[f64], weight: f64) -> Result<()> {
        if values.len() != self.sums.len() {
            return Err(TrainError::ShapeMismatch { expected: self.sums.len(), actual: values.len() });
        }
        for (sum, v) in self.sums.iter_mut().zip(values) {
            *sum += v * weight;
        }
        self.count += weight;
        Ok(())
    }

    pub fn average(&self) -> Result<Vec<f64>> {
        if self.count == 0.0 {
            return Err(TrainError::DivisionByZero);
        }
        Ok(self.sums.iter().map(|s| s / self.count).collect())
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// `name=value` pairs with three decimals, space separated.
    pub fn format(&self, values: &[f64]) -> String {
        self.names.iter()
            .zip(values)
            .map(|(n, v)| format!("{}={:.3}", n, v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Pairs each value with its metric name.
    pub fn named(&self, values: &[f64]) -> Vec<(String, f64)> {
        self.names.iter().cloned().zip(values.iter().copied()).collect()
    }
}
