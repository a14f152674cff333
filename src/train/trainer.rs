use crate::{
    data::Minibatch,
    error::{Result, TrainError},
    loss::{LossOutput, SoftmaxCrossEntropy},
    math::matrix::Matrix,
    network::Network,
    optim::MomentumOptimizer,
};

/// Converts a minibatch to network input, checking it against the geometry
/// the network was built for.
fn input_for(network: &Network, batch: &Minibatch) -> Result<Matrix> {
    let expected = network.metadata.shape.input_size();
    let actual = batch.images.sample_len();
    if expected != actual {
        return Err(TrainError::ShapeMismatch { expected, actual });
    }
    Ok(batch.images.to_input())
}

/// `[acc, xe, re, lo]` for one evaluated batch.
fn metric_vector(loss: &LossOutput, regularization: f64) -> Vec<f64> {
    vec![loss.accuracy, loss.cross_entropy, regularization, loss.cross_entropy + regularization]
}

/// One optimization step at `learning_rate`. Returns the metrics of the
/// forward pass that produced the gradients.
pub fn train_step(
    network: &mut Network,
    optimizer: &mut MomentumOptimizer,
    batch: &Minibatch,
    learning_rate: f64,
) -> Result<Vec<f64>> {
    let input = input_for(network, batch)?;
    let logits = network.forward(&input, true);
    let loss = SoftmaxCrossEntropy::evaluate(&logits, &batch.labels)?;
    let regularization = network.regularization_loss();

    let grads = network.backward(&loss.grad_logits);
    optimizer.step(network, &grads, learning_rate)?;

    Ok(metric_vector(&loss, regularization))
}

/// Inference-mode metrics plus the probability of class 1 per sample.
pub fn eval_step(network: &mut Network, batch: &Minibatch) -> Result<(Vec<f64>, Vec<f64>)> {
    let input = input_for(network, batch)?;
    let logits = network.forward(&input, false);
    let loss = SoftmaxCrossEntropy::evaluate(&logits, &batch.labels)?;
    let regularization = network.regularization_loss();

    let positive = if loss.probs.cols > 1 {
        (0..loss.probs.rows).map(|r| loss.probs.row(r)[1]).collect()
    } else {
        Vec::new()
    };
    Ok((metric_vector(&loss, regularization), positive))
}
