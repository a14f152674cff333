use crate::error::{Result, TrainError};
use crate::math::matrix::Matrix;

/// Small epsilon added inside log() to prevent log(0) = -inf.
const EPS: f64 = 1e-12;

/// Softmax cross-entropy over a batch of logits with integer labels.
pub struct SoftmaxCrossEntropy;

/// Everything one forward evaluation of the loss yields.
#[derive(Debug, Clone)]
pub struct LossOutput {
    /// Mean cross-entropy over the batch.
    pub cross_entropy: f64,
    /// Fraction of samples whose top-1 class equals the label.
    pub accuracy: f64,
    /// Row-wise softmax of the logits.
    pub probs: Matrix,
    /// ∂(mean cross-entropy)/∂logits: `(softmax - one_hot) / batch`.
    pub grad_logits: Matrix,
}

impl SoftmaxCrossEntropy {
    pub fn evaluate(logits: &Matrix, labels: &[usize]) -> Result<LossOutput> {
        if labels.len() != logits.rows {
            return Err(TrainError::ShapeMismatch { expected: logits.rows, actual: labels.len() });
        }
        let batch = logits.rows;
        let classes = logits.cols;
        let mut probs = Matrix::zeros(batch, classes);
        let mut grad_logits = Matrix::zeros(batch, classes);
        let mut xe_sum = 0.0;
        let mut correct = 0usize;

        for (r, &label) in labels.iter().enumerate() {
            if label >= classes {
                return Err(TrainError::dataset(format!(
                    "label {} out of range for {} classes", label, classes
                )));
            }
            let row = logits.row(r);
            let p = softmax(row);
            xe_sum += -(p[label] + EPS).ln();
            if argmax(row) == label {
                correct += 1;
            }
            for (c, &pc) in p.iter().enumerate() {
                let target = if c == label { 1.0 } else { 0.0 };
                grad_logits.data[r * classes + c] = (pc - target) / batch as f64;
            }
            probs.row_mut(r).copy_from_slice(&p);
        }

        Ok(LossOutput {
            cross_entropy: xe_sum / batch as f64,
            accuracy: correct as f64 / batch as f64,
            probs,
            grad_logits,
        })
    }
}

/// Numerically stable softmax of one row.
pub fn softmax(row: &[f64]) -> Vec<f64> {
    let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = row.iter().map(|&x| (x - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the maximum element; ties resolve to the lowest index.
pub fn argmax(v: &[f64]) -> usize {
    let mut best = 0;
    for (i, &x) in v.iter().enumerate() {
        if x > v[best] {
            best = i;
        }
    }
    best
}
