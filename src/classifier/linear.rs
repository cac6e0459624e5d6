//! Linear estimators trained with mini-batch stochastic gradient descent.

use crate::classifier::bayes::MultinomialNb;
use crate::classifier::{train_epochs, Samples, Scores, TrainParams};
use serde::{Deserialize, Serialize};

/// L2 penalty applied to the weights at every step.
pub const L2: f64 = 1e-4;

/// Rescale `values` in place to probabilities that sum to one.
///
/// ```rust
/// use caribou::classifier::linear::softmax;
/// let mut scores = vec![0.0, 0.0];
/// softmax(&mut scores);
/// assert_eq!(scores, [0.5, 0.5]);
/// ```
pub fn softmax(values: &mut [f64]) {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    values.iter_mut().for_each(|v| *v = (*v - max).exp());
    let sum = values.iter().sum::<f64>();
    if sum > 0.0 {
        values.iter_mut().for_each(|v| *v /= sum);
    }
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

// ----------------------------------------------------------------------------
// Binary

/// Logistic regression between two classes (class 1 is the positive class).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LogisticBinary {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LogisticBinary {
    pub fn fit(train: &Samples, validation: &Samples, dim: usize, params: &TrainParams) -> Self {
        let mut model = LogisticBinary { weights: vec![0.0; dim], bias: 0.0 };
        let rate = params.learning_rate;
        train_epochs(&mut model, train, validation, params, |model, batch| {
            let mut gradient = vec![0.0; dim];
            let mut bias = 0.0;
            for i in batch {
                let (x, y) = (&train.x[*i], train.y[*i].unwrap_or(0) as f64);
                let error = sigmoid(dot(&model.weights, x) + model.bias) - y;
                gradient.iter_mut().zip(x).for_each(|(g, x)| *g += error * x);
                bias += error;
            }
            let n = batch.len() as f64;
            model.weights.iter_mut().zip(&gradient).for_each(|(w, g)| *w -= rate * (g / n + L2 * *w));
            model.bias -= rate * bias / n;
        });
        model
    }
}

impl Scores for LogisticBinary {
    fn scores(&self, x: &[f64], _counts: &[u32]) -> Vec<f64> {
        let p = sigmoid(dot(&self.weights, x) + self.bias);
        vec![1.0 - p, p]
    }
}

// ----------------------------------------------------------------------------
// Multiclass

/// Softmax regression over any number of classes.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SoftmaxSgd {
    /// One row of weights per class.
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl SoftmaxSgd {
    pub fn fit(
        train: &Samples,
        validation: &Samples,
        n_classes: usize,
        dim: usize,
        params: &TrainParams,
    ) -> Self {
        let mut model = SoftmaxSgd { weights: vec![vec![0.0; dim]; n_classes], bias: vec![0.0; n_classes] };
        let rate = params.learning_rate;
        train_epochs(&mut model, train, validation, params, |model, batch| {
            let mut gradient = vec![vec![0.0; dim]; n_classes];
            let mut bias = vec![0.0; n_classes];
            for i in batch {
                let x = &train.x[*i];
                let y = train.y[*i].unwrap_or(0);
                let probabilities = model.scores(x, &[]);
                for (c, p) in probabilities.iter().enumerate() {
                    let error = p - f64::from(u8::from(c == y));
                    gradient[c].iter_mut().zip(x).for_each(|(g, x)| *g += error * x);
                    bias[c] += error;
                }
            }
            let n = batch.len() as f64;
            for c in 0..n_classes {
                model.weights[c].iter_mut().zip(&gradient[c]).for_each(|(w, g)| *w -= rate * (g / n + L2 * *w));
                model.bias[c] -= rate * bias[c] / n;
            }
        });
        model
    }
}

impl Scores for SoftmaxSgd {
    fn scores(&self, x: &[f64], _counts: &[u32]) -> Vec<f64> {
        let mut scores = self.weights.iter().zip(&self.bias).map(|(w, b)| dot(w, x) + b).collect::<Vec<_>>();
        softmax(&mut scores);
        scores
    }
}

/// The multiclass linear family: discriminative (SGD) or generative (naive Bayes).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Multiclass {
    Sgd(SoftmaxSgd),
    NaiveBayes(MultinomialNb),
}

impl Scores for Multiclass {
    fn scores(&self, x: &[f64], counts: &[u32]) -> Vec<f64> {
        match self {
            Multiclass::Sgd(model) => model.scores(x, counts),
            Multiclass::NaiveBayes(model) => model.scores(x, counts),
        }
    }
}
