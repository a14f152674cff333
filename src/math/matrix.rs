use rand::Rng;
use serde::{Serialize, Deserialize};
use std::f64::consts::PI;
use std::ops::Mul;

/// Dense row-major matrix.  A minibatch is one row per sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix { rows, cols, data: vec![0.0; rows * cols] }
    }

    /// Wraps a flat row-major buffer.
    ///
    /// # Panics
    /// Panics if `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Matrix {
        assert_eq!(data.len(), rows * cols, "buffer does not match {}x{}", rows, cols);
        Matrix { rows, cols, data }
    }

    /// Samples a single value from N(0, 1) using the Box-Muller transform.
    fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
        // Both draws in (0, 1] so ln() stays finite.
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = 1.0 - rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// He initialization: N(0, sqrt(2 / rows)).
    ///
    /// Weights are stored as (fan_in, fan_out), so `rows` is the fan-in.
    pub fn he<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Matrix {
        let std_dev = (2.0 / rows.max(1) as f64).sqrt();
        let data = (0..rows * cols)
            .map(|_| Matrix::sample_standard_normal(rng) * std_dev)
            .collect();
        Matrix { rows, cols, data }
    }

    /// Xavier (Glorot) initialization: N(0, sqrt(1 / rows)).
    pub fn xavier<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Matrix {
        let std_dev = (1.0 / rows.max(1) as f64).sqrt();
        let data = (0..rows * cols)
            .map(|_| Matrix::sample_standard_normal(rng) * std_dev)
            .collect();
        Matrix { rows, cols, data }
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn transpose(&self) -> Matrix {
        let mut res = Matrix::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                res.data[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }
        res
    }

    pub fn map<F>(&self, mut functor: F) -> Matrix
    where
        F: FnMut(f64) -> f64,
    {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&x| functor(x)).collect(),
        }
    }

    /// Element-wise (Hadamard) product.
    pub fn hadamard(&self, other: &Matrix) -> Matrix {
        assert_eq!((self.rows, self.cols), (other.rows, other.cols), "hadamard shape mismatch");
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().zip(&other.data).map(|(a, b)| a * b).collect(),
        }
    }

    /// Adds `bias` (a 1 x cols matrix) to every row.
    pub fn add_row_broadcast(&mut self, bias: &Matrix) {
        assert_eq!(bias.cols, self.cols, "bias width mismatch");
        for r in 0..self.rows {
            for (x, b) in self.row_mut(r).iter_mut().zip(&bias.data) {
                *x += b;
            }
        }
    }

    /// Column sums as a 1 x cols matrix.
    pub fn sum_rows(&self) -> Matrix {
        let mut res = Matrix::zeros(1, self.cols);
        for r in 0..self.rows {
            for (acc, x) in res.data.iter_mut().zip(self.row(r)) {
                *acc += x;
            }
        }
        res
    }

    /// `self += alpha * other`
    pub fn axpy(&mut self, alpha: f64, other: &Matrix) {
        assert_eq!(self.data.len(), other.data.len(), "axpy shape mismatch");
        for (x, y) in self.data.iter_mut().zip(&other.data) {
            *x += alpha * y;
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for x in &mut self.data {
            *x *= factor;
        }
    }

    pub fn squared_norm(&self) -> f64 {
        self.data.iter().map(|x| x * x).sum()
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix { rows: 0, cols: 0, data: vec![] }
    }
}

impl Mul for &Matrix {
    type Output = Matrix;

    fn mul(self, rhs: &Matrix) -> Matrix {
        if self.cols != rhs.rows {
            panic!("Matrices are of incorrect sizes: {}x{} * {}x{}", self.rows, self.cols, rhs.rows, rhs.cols)
        }

        let mut res = Matrix::zeros(self.rows, rhs.cols);
        // i-k-j order keeps the inner loop on contiguous rows of both operands.
        for i in 0..self.rows {
            for k in 0..self.cols {
                let a = self.data[i * self.cols + k];
                if a == 0.0 {
                    continue;
                }
                let rhs_row = rhs.row(k);
                let out = res.row_mut(i);
                for (o, b) in out.iter_mut().zip(rhs_row) {
                    *o += a * b;
                }
            }
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matmul_matches_hand_computation() {
        let a = Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        let b = Matrix::from_vec(2, 1, vec![5.0, 6.0]);
        assert_eq!((&a * &b).data, vec![17.0, 39.0]);
    }

    #[test]
    fn transpose_swaps_layout() {
        let a = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let t = a.transpose();
        assert_eq!((t.rows, t.cols), (3, 2));
        assert_eq!(t.data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn broadcast_and_column_sums() {
        let mut a = Matrix::zeros(3, 2);
        a.add_row_broadcast(&Matrix::from_vec(1, 2, vec![1.0, -1.0]));
        assert_eq!(a.sum_rows().data, vec![3.0, -3.0]);
    }

    #[test]
    fn map_accepts_stateful_closures() {
        let a = Matrix::from_vec(1, 4, vec![1.0; 4]);
        let mut seen = 0.0;
        let m = a.map(|x| {
            seen += x;
            seen
        });
        assert_eq!(m.data, vec![1.0, 2.0, 3.0, 4.0]);
    }
}
