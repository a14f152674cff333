use crate::math::matrix::Matrix;

/// Pixel tensor of shape (batch, height, width, channels), row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl ImageBatch {
    pub fn new(batch: usize, height: usize, width: usize, channels: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), batch * height * width * channels, "image buffer does not match shape");
        Self { batch, height, width, channels, data }
    }

    pub fn sample_len(&self) -> usize {
        self.height * self.width * self.channels
    }

    /// Flattens to a (batch, h·w·c) network input, centered on 127 and
    /// scaled into roughly [-1, 1].
    pub fn to_input(&self) -> Matrix {
        let data = self.data.iter().map(|&p| (p as f64 - 127.0) / 128.0).collect();
        Matrix::from_vec(self.batch, self.sample_len(), data)
    }
}

/// One pull from a data stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Minibatch {
    pub labels: Vec<usize>,
    pub images: ImageBatch,
}

impl Minibatch {
    /// Number of samples; the weight this batch carries in running averages.
    pub fn len(&self) -> usize {
        self.images.batch
    }

    pub fn is_empty(&self) -> bool {
        self.images.batch == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_is_centered() {
        let batch = ImageBatch::new(1, 1, 1, 3, vec![127.0, 255.0, -1.0]);
        assert_eq!(batch.to_input().data, vec![0.0, 1.0, -1.0]);
    }
}
