//! Multinomial naive Bayes over raw k-mer counts.

use crate::classifier::linear::softmax;
use crate::classifier::{Samples, Scores};
use serde::{Deserialize, Serialize};

/// Additive (Laplace) smoothing of the k-mer counts.
pub const ALPHA: f64 = 1.0;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MultinomialNb {
    pub log_prior: Vec<f64>,
    /// One row per class, one log probability per k-mer.
    pub log_likelihood: Vec<Vec<f64>>,
}

impl MultinomialNb {
    pub fn fit(train: &Samples, n_classes: usize, dim: usize) -> Self {
        let mut class_rows = vec![0_usize; n_classes];
        let mut class_counts = vec![vec![ALPHA; dim]; n_classes];
        for (i, y) in train.y.iter().enumerate() {
            if let Some(y) = y {
                class_rows[*y] += 1;
                class_counts[*y].iter_mut().zip(&train.counts[i]).for_each(|(c, n)| *c += *n as f64);
            }
        }

        let total_rows = class_rows.iter().sum::<usize>().max(1) as f64;
        let log_prior = class_rows.iter().map(|n| ((*n as f64 + ALPHA) / (total_rows + ALPHA * n_classes as f64)).ln()).collect();
        let log_likelihood = class_counts
            .into_iter()
            .map(|counts| {
                let total = counts.iter().sum::<f64>();
                counts.into_iter().map(|c| (c / total).ln()).collect()
            })
            .collect();

        MultinomialNb { log_prior, log_likelihood }
    }
}

impl Scores for MultinomialNb {
    fn scores(&self, _x: &[f64], counts: &[u32]) -> Vec<f64> {
        let mut log_posterior = self
            .log_prior
            .iter()
            .zip(&self.log_likelihood)
            .map(|(prior, likelihood)| {
                prior + counts.iter().zip(likelihood).map(|(n, l)| *n as f64 * l).sum::<f64>()
            })
            .collect::<Vec<_>>();
        softmax(&mut log_posterior);
        log_posterior
    }
}
