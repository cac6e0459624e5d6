//! Evaluation of predictions against known labels.

use crate::classifier::{ClassifierKind, Prediction};
use crate::utils;
use color_eyre::eyre::{eyre, Report, Result, WrapErr};
use indoc::formatdoc;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::path::Path;

/// Counts for one label.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct LabelCounts {
    /// Rows whose true label is this label.
    pub support: usize,
    /// Rows predicted as this label.
    pub predicted: usize,
    /// Rows predicted as this label that truly are.
    pub correct: usize,
}

/// Evaluation of one classifier on a labelled split.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Evaluation {
    pub classifier: String,
    pub rank: String,
    pub rows: usize,
    /// Share of rows that received a label.
    pub classified_fraction: f64,
    /// Share of rows whose label is correct, unlabelled rows count as wrong.
    pub accuracy: f64,
    /// Share of labelled rows whose label is correct.
    pub precision: f64,
    pub labels: BTreeMap<String, LabelCounts>,
}

impl Evaluation {
    /// Compare `predictions` to `truth`, both in the same row order.
    ///
    /// ```rust
    /// use caribou::classifier::{metrics::Evaluation, ClassifierKind, Prediction};
    ///
    /// let prediction = |id: &str, label: Option<&str>| Prediction {
    ///     id: id.to_string(),
    ///     label: label.map(String::from),
    ///     confidence: 0.9,
    /// };
    /// let predictions = [prediction("a", Some("Vibrio")), prediction("b", None)];
    /// let truth = ["Vibrio".to_string(), "Vibrio".to_string()];
    ///
    /// let evaluation = Evaluation::new(ClassifierKind::Cnn, "genus", &predictions, &truth)?;
    /// assert_eq!(evaluation.accuracy, 0.5);
    /// assert_eq!(evaluation.precision, 1.0);
    /// assert_eq!(evaluation.labels["Vibrio"].support, 2);
    /// # Ok::<(), color_eyre::eyre::Report>(())
    /// ```
    pub fn new(
        kind: ClassifierKind,
        rank: &str,
        predictions: &[Prediction],
        truth: &[String],
    ) -> Result<Self, Report> {
        if predictions.len() != truth.len() {
            return Err(eyre!(
                "Cannot evaluate {} predictions against {} labels.",
                predictions.len(),
                truth.len()
            ));
        }

        let mut labels: BTreeMap<String, LabelCounts> = BTreeMap::new();
        let (mut classified, mut correct) = (0, 0);
        for (prediction, truth) in predictions.iter().zip(truth) {
            labels.entry(truth.clone()).or_default().support += 1;
            if let Some(label) = &prediction.label {
                classified += 1;
                let counts = labels.entry(label.clone()).or_default();
                counts.predicted += 1;
                if label == truth {
                    counts.correct += 1;
                    correct += 1;
                }
            }
        }

        let ratio = |n: usize, d: usize| if d == 0 { 0.0 } else { n as f64 / d as f64 };
        Ok(Evaluation {
            classifier: kind.to_string(),
            rank: rank.to_string(),
            rows: predictions.len(),
            classified_fraction: ratio(classified, predictions.len()),
            accuracy: ratio(correct, predictions.len()),
            precision: ratio(correct, classified),
            labels,
        })
    }

    /// Write the evaluation as JSON, and log its summary.
    pub fn write<P>(&self, path: &P) -> Result<(), Report>
    where
        P: AsRef<Path> + Debug,
    {
        info!("Evaluation of rank '{}':\n{self}", self.rank);
        utils::write_json(self, path).wrap_err_with(|| eyre!("Failed to write evaluation: {path:?}"))
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let labels = self
            .labels
            .iter()
            .map(|(label, c)| format!("- {label}: {}/{} correct, {} predicted", c.correct, c.support, c.predicted))
            .collect::<Vec<_>>();
        let text = formatdoc!(
            "classifier: {}
            rows: {}
            classified: {:.4}
            accuracy: {:.4}
            precision: {:.4}
            labels:\n  {}",
            self.classifier,
            self.rows,
            self.classified_fraction,
            self.accuracy,
            self.precision,
            labels.join("\n  "),
        );
        write!(f, "{text}")
    }
}
