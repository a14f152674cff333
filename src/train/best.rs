use crate::error::{Result, TrainError};

/// Highest validation value seen so far for one named metric.
///
/// Starts at 0.0 and only moves on a strictly greater candidate, so it is
/// monotone non-decreasing for the lifetime of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct BestScoreTracker {
    metric: String,
    best: f64,
}

impl BestScoreTracker {
    pub fn new(metric: impl Into<String>) -> Self {
        Self { metric: metric.into(), best: 0.0 }
    }

    /// Restores a tracker from a saved best value.
    pub fn with_best(metric: impl Into<String>, best: f64) -> Self {
        Self { metric: metric.into(), best }
    }

    /// Returns `true` when `candidate` became the new best.
    pub fn update(&mut self, candidate: f64) -> bool {
        if candidate > self.best {
            self.best = candidate;
            true
        } else {
            false
        }
    }

    /// Looks the bound metric up by name in `(names, values)` and updates.
    pub fn update_from(&mut self, names: &[String], values: &[f64]) -> Result<bool> {
        let index = names.iter()
            .position(|n| *n == self.metric)
            .ok_or_else(|| TrainError::config(format!("metric '{}' is not produced by the trainer", self.metric)))?;
        let value = values.get(index)
            .copied()
            .ok_or(TrainError::ShapeMismatch { expected: names.len(), actual: values.len() })?;
        Ok(self.update(value))
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_strict_improvements_count() {
        let mut best = BestScoreTracker::new("acc");
        assert!(best.update(0.4));
        assert!(!best.update(0.4));
        assert!(!best.update(0.1));
        assert!(best.update(0.7));
        assert_eq!(best.best(), 0.7);
    }

    #[test]
    fn non_positive_scores_never_register() {
        let mut best = BestScoreTracker::new("acc");
        assert!(!best.update(0.0));
        assert!(!best.update(-1.0));
        assert_eq!(best.best(), 0.0);
    }

    #[test]
    fn binds_by_name() {
        let names: Vec<String> = ["xe", "acc"].iter().map(|s| s.to_string()).collect();
        let mut best = BestScoreTracker::new("acc");
        assert!(best.update_from(&names, &[2.3, 0.6]).unwrap());
        assert_eq!(best.best(), 0.6);

        let mut missing = BestScoreTracker::new("auc");
        assert!(missing.update_from(&names, &[2.3, 0.6]).is_err());
    }
}
