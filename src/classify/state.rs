//! The partition of sequences into resolved (per rank) and unresolved.

use crate::classifier::Prediction;
use crate::error::Error;
use color_eyre::eyre::{Report, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Which sequences were labelled at which rank, and which are still pending.
///
/// Every input id is in exactly one place: resolved at a single rank, or unresolved.
///
/// ```rust
/// use caribou::classifier::Prediction;
/// use caribou::classify::state::ClassificationState;
///
/// let mut state = ClassificationState::new(["a", "b"].map(String::from));
/// let predictions = [
///     Prediction { id: "a".into(), label: Some("Bacteria".into()), confidence: 0.9 },
///     Prediction { id: "b".into(), label: None, confidence: 0.4 },
/// ];
/// assert_eq!(state.resolve("domain", &predictions)?, 1);
/// assert_eq!(state.label_of("a"), Some(("domain", "Bacteria")));
/// assert!(state.unresolved.contains("b"));
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ClassificationState {
    /// Ranks processed, in processing order.
    pub ranks: Vec<String>,
    /// Rank to (sequence id to label).
    pub resolved: BTreeMap<String, BTreeMap<String, String>>,
    /// Ids not confidently assigned yet.
    pub unresolved: BTreeSet<String>,
    /// Rank at which no sequence was left unresolved.
    pub termination_rank: Option<String>,
}

impl ClassificationState {
    pub fn new<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        ClassificationState { unresolved: ids.into_iter().collect(), ..Default::default() }
    }

    /// Record the predictions of `rank`. Labelled ids leave the unresolved set.
    ///
    /// Returns the number of newly resolved ids. Fails with
    /// [`Error::DataConsistency`] if a rank is processed twice, or a prediction
    /// is for an id that is not pending or appears twice.
    pub fn resolve(&mut self, rank: &str, predictions: &[Prediction]) -> Result<usize, Report> {
        if self.ranks.iter().any(|r| r == rank) {
            return Err(Error::DataConsistency(format!("Rank '{rank}' was already classified.")).into());
        }

        let mut seen = BTreeSet::new();
        for prediction in predictions {
            if !self.unresolved.contains(&prediction.id) || !seen.insert(prediction.id.as_str()) {
                return Err(Error::DataConsistency(format!(
                    "Sequence '{}' is not pending classification at rank '{rank}'.",
                    prediction.id
                ))
                .into());
            }
        }

        let labels = predictions
            .iter()
            .filter_map(|p| p.label.as_ref().map(|label| (p.id.clone(), label.clone())))
            .collect::<BTreeMap<_, _>>();
        labels.keys().for_each(|id| {
            self.unresolved.remove(id);
        });

        let resolved = labels.len();
        self.ranks.push(rank.to_string());
        self.resolved.insert(rank.to_string(), labels);
        Ok(resolved)
    }

    /// Set the termination rank, only the first call has an effect.
    pub fn terminate(&mut self, rank: &str) {
        if self.termination_rank.is_none() {
            self.termination_rank = Some(rank.to_string());
        }
    }

    /// Returns the rank and label a sequence was resolved with.
    pub fn label_of(&self, id: &str) -> Option<(&str, &str)> {
        self.ranks.iter().find_map(|rank| {
            self.resolved
                .get(rank)
                .and_then(|labels| labels.get(id))
                .map(|label| (rank.as_str(), label.as_str()))
        })
    }

    /// Number of ids resolved at any rank.
    pub fn resolved_count(&self) -> usize {
        self.resolved.values().map(|labels| labels.len()).sum()
    }
}
