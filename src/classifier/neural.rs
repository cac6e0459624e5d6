//! A dense network with one ReLU hidden layer and a softmax output.
//!
//! Every neural classifier kind maps onto this network, only the hidden
//! width differs between kinds.

use crate::classifier::linear::softmax;
use crate::classifier::{train_epochs, Samples, Scores, TrainParams};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DenseNetwork {
    /// Hidden layer weights, one row per hidden unit.
    pub hidden_weights: Vec<Vec<f64>>,
    pub hidden_bias: Vec<f64>,
    /// Output layer weights, one row per class.
    pub output_weights: Vec<Vec<f64>>,
    pub output_bias: Vec<f64>,
}

/// Glorot uniform initialization of a `rows` x `cols` matrix.
fn glorot<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Vec<Vec<f64>> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    (0..rows).map(|_| (0..cols).map(|_| rng.gen_range(-limit..limit)).collect()).collect()
}

impl DenseNetwork {
    pub fn new(dim: usize, hidden: usize, n_classes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        DenseNetwork {
            hidden_weights: glorot(hidden, dim, &mut rng),
            hidden_bias: vec![0.0; hidden],
            output_weights: glorot(n_classes, hidden, &mut rng),
            output_bias: vec![0.0; n_classes],
        }
    }

    /// Returns the hidden activations and the output probabilities.
    fn forward(&self, x: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let hidden = self
            .hidden_weights
            .iter()
            .zip(&self.hidden_bias)
            .map(|(w, b)| (w.iter().zip(x).map(|(w, x)| w * x).sum::<f64>() + b).max(0.0))
            .collect::<Vec<_>>();
        let mut output = self
            .output_weights
            .iter()
            .zip(&self.output_bias)
            .map(|(w, b)| w.iter().zip(&hidden).map(|(w, h)| w * h).sum::<f64>() + b)
            .collect::<Vec<_>>();
        softmax(&mut output);
        (hidden, output)
    }

    pub fn fit(
        train: &Samples,
        validation: &Samples,
        n_classes: usize,
        dim: usize,
        hidden: usize,
        params: &TrainParams,
    ) -> Self {
        let mut model = DenseNetwork::new(dim, hidden, n_classes, params.seed);
        let rate = params.learning_rate;

        train_epochs(&mut model, train, validation, params, |model, batch| {
            let mut d_hidden_w = vec![vec![0.0; dim]; hidden];
            let mut d_hidden_b = vec![0.0; hidden];
            let mut d_output_w = vec![vec![0.0; hidden]; n_classes];
            let mut d_output_b = vec![0.0; n_classes];

            for i in batch {
                let x = &train.x[*i];
                let y = train.y[*i].unwrap_or(0);
                let (activations, probabilities) = model.forward(x);

                // softmax + cross-entropy gradient at the output
                let delta_output = probabilities
                    .iter()
                    .enumerate()
                    .map(|(c, p)| p - f64::from(u8::from(c == y)))
                    .collect::<Vec<_>>();
                for (c, delta) in delta_output.iter().enumerate() {
                    d_output_w[c].iter_mut().zip(&activations).for_each(|(g, h)| *g += delta * h);
                    d_output_b[c] += delta;
                }

                for (j, activation) in activations.iter().enumerate() {
                    // ReLU passes gradient only through active units
                    if *activation <= 0.0 {
                        continue;
                    }
                    let delta = delta_output
                        .iter()
                        .zip(&model.output_weights)
                        .map(|(d, w)| d * w[j])
                        .sum::<f64>();
                    d_hidden_w[j].iter_mut().zip(x).for_each(|(g, x)| *g += delta * x);
                    d_hidden_b[j] += delta;
                }
            }

            let n = batch.len() as f64;
            let update = |weights: &mut [Vec<f64>], gradient: &[Vec<f64>]| {
                weights.iter_mut().zip(gradient).for_each(|(w, g)| {
                    w.iter_mut().zip(g).for_each(|(w, g)| *w -= rate * g / n);
                });
            };
            update(&mut model.hidden_weights, &d_hidden_w);
            update(&mut model.output_weights, &d_output_w);
            model.hidden_bias.iter_mut().zip(&d_hidden_b).for_each(|(b, g)| *b -= rate * g / n);
            model.output_bias.iter_mut().zip(&d_output_b).for_each(|(b, g)| *b -= rate * g / n);
        });
        model
    }
}

impl Scores for DenseNetwork {
    fn scores(&self, x: &[f64], _counts: &[u32]) -> Vec<f64> {
        self.forward(x).1
    }
}
