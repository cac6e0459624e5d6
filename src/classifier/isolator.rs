//! One-class isolator: a centroid and a radius around the training rows.

use crate::classifier::{Samples, Scores};
use color_eyre::eyre::{eyre, Report, Result};
use serde::{Deserialize, Serialize};

/// Share of training rows that must fall inside the radius.
pub const COVERAGE: f64 = 0.95;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OneClassIsolator {
    pub centroid: Vec<f64>,
    pub radius: f64,
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| (a - b).powi(2)).sum::<f64>().sqrt()
}

impl OneClassIsolator {
    /// Fit the centroid of every training row and the radius that covers [`COVERAGE`] of them.
    pub fn fit(train: &Samples) -> Result<Self, Report> {
        if train.is_empty() {
            return Err(eyre!("The one-class isolator needs at least one training row."));
        }
        let dim = train.x[0].len();
        let n = train.len() as f64;
        let mut centroid = vec![0.0; dim];
        for row in &train.x {
            centroid.iter_mut().zip(row).for_each(|(c, x)| *c += x / n);
        }

        let mut distances = train.x.iter().map(|row| distance(row, &centroid)).collect::<Vec<_>>();
        distances.sort_by(|a, b| a.total_cmp(b));
        let index = ((COVERAGE * n).ceil() as usize).clamp(1, distances.len()) - 1;
        let radius = distances[index].max(f64::EPSILON);

        Ok(OneClassIsolator { centroid, radius })
    }

    /// Returns whether `x` is inside the boundary, and a confidence that is at least 0.5 inside.
    pub fn decide(&self, x: &[f64]) -> (bool, f64) {
        let d = distance(x, &self.centroid);
        (d <= self.radius, self.radius / (self.radius + d))
    }
}

impl Scores for OneClassIsolator {
    fn scores(&self, x: &[f64], _counts: &[u32]) -> Vec<f64> {
        vec![self.decide(x).1]
    }
}
