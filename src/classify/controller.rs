//! The top-down classification controller.
//!
//! Ranks are processed coarsest first. At every rank the classifier is loaded
//! from its cached artifact, or trained and published, then it classifies the
//! sequences that are still unresolved. Only the sequences it could not label
//! are passed on to the next, finer rank.

use crate::classifier::metrics::Evaluation;
use crate::classifier::{Classifier, ClassifierFactory, ClassifierKind, Models, TrainParams};
use crate::classify::artifact::RankArtifact;
use crate::classify::assembler::{Assembler, HOST_RANK};
use crate::classify::state::ClassificationState;
use crate::dataset::TaxonomicDataset;
use crate::error::Error;
use crate::simulation::{ReadSimulator, Technology};
use crate::utils::Outdirs;
use caribou_table::FeatureTable;
use color_eyre::eyre::{Report, Result, WrapErr};
use color_eyre::Help;
use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ----------------------------------------------------------------------------
// Settings
// ----------------------------------------------------------------------------

/// Everything the controller is configured with, apart from the datasets.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Settings {
    /// K-mer length, must match the reference.
    pub k: usize,
    /// Classifier of the host-isolation rank.
    pub binary: ClassifierKind,
    /// Classifier of every finer rank.
    pub multiclass: ClassifierKind,
    /// Ranks to process, in any order.
    pub ranks: Vec<String>,
    pub params: TrainParams,
    pub outdirs: Outdirs,
    /// Name of the reference database, used to name artifacts.
    pub database: String,
    /// Build and evaluate a test split when training.
    pub cv: bool,
    pub technology: Technology,
}

// ----------------------------------------------------------------------------
// Stage
// ----------------------------------------------------------------------------

/// The stages a run moves through.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Stage {
    Pending(String),
    Training(String),
    Classifying(String),
    Done,
    Terminated(String),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Stage::Pending(rank) => write!(f, "pending({rank})"),
            Stage::Training(rank) => write!(f, "training({rank})"),
            Stage::Classifying(rank) => write!(f, "classifying({rank})"),
            Stage::Done => write!(f, "done"),
            Stage::Terminated(rank) => write!(f, "terminated({rank})"),
        }
    }
}

/// What the last run did at every rank.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct RunSummary {
    /// Ranks whose classifier was trained.
    pub trained: Vec<String>,
    /// Ranks whose classifier was loaded from its artifact.
    pub loaded: Vec<String>,
    /// Sequences resolved at every classified rank.
    pub classified: BTreeMap<String, usize>,
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

pub struct Controller<F: ClassifierFactory = Models> {
    settings: Settings,
    /// Ranks in processing order.
    ranks: Vec<String>,
    factory: F,
    assembler: Assembler,
    state: ClassificationState,
    history: Vec<Stage>,
    summary: RunSummary,
}

impl<F: ClassifierFactory> Controller<F> {
    /// Validate the configuration and create a controller.
    ///
    /// Fails with [`Error::Configuration`] when the ranks, classifiers or
    /// parameters do not fit the datasets, and with [`Error::DataConsistency`]
    /// when the bacteria and host k-mer lengths differ. Nothing is read or
    /// written before validation succeeds.
    pub fn new(
        bacteria: TaxonomicDataset,
        host: Option<TaxonomicDataset>,
        settings: Settings,
        factory: F,
        simulator: Box<dyn ReadSimulator>,
    ) -> Result<Self, Report> {
        let ranks = validate(&bacteria, host.as_ref(), &settings)?;
        info!("Ranks to classify: {}", ranks.join(", "));
        let assembler = Assembler::new(bacteria, host, simulator, settings.technology, settings.params.seed);
        Ok(Controller {
            settings,
            ranks,
            factory,
            assembler,
            state: ClassificationState::default(),
            history: Vec::new(),
            summary: RunSummary::default(),
        })
    }

    /// Ranks in processing order, coarsest first.
    pub fn ranks(&self) -> &[String] {
        &self.ranks
    }

    pub fn state(&self) -> &ClassificationState {
        &self.state
    }

    /// Stages of the last run, in order.
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Returns the classifier kind used at `rank`.
    pub fn kind(&self, rank: &str) -> ClassifierKind {
        match rank == HOST_RANK {
            true => self.settings.binary,
            false => self.settings.multiclass,
        }
    }

    fn artifact(&self, rank: &str) -> RankArtifact {
        let (outdirs, k, database) = (&self.settings.outdirs, self.settings.k, &self.settings.database);
        RankArtifact::new(outdirs, rank, k, self.kind(rank), database)
    }

    fn begin(&mut self, ids: Vec<String>) {
        self.state = ClassificationState::new(ids);
        self.history.clear();
        self.summary = RunSummary::default();
    }

    /// Classify `unclassified` down the ranks.
    ///
    /// Returns the rank at which no sequence was left unresolved, or [`None`]
    /// if every rank was processed. An empty input terminates at the first rank
    /// without fitting or predicting anything.
    pub fn run(&mut self, unclassified: &FeatureTable) -> Result<Option<String>, Report> {
        let unique = unclassified.ids.iter().unique().count();
        if unique != unclassified.row_count() {
            return Err(Error::DataConsistency(format!(
                "Sequence ids to classify are not unique: {} rows, {unique} ids.",
                unclassified.row_count()
            ))
            .into());
        }
        self.begin(unclassified.ids.clone());

        if unclassified.is_empty() {
            let first = self.ranks[0].clone();
            info!("No sequences to classify, terminating at rank '{first}'.");
            self.terminate(&first);
            return Ok(Some(first));
        }

        for rank in self.ranks.clone() {
            self.history.push(Stage::Pending(rank.clone()));
            let model = self.load_or_train(&rank)?;

            self.history.push(Stage::Classifying(rank.clone()));
            let pending = unclassified.filter_by_ids(&self.state.unresolved);
            let predictions = model
                .predict(&pending)
                .map_err(|report| classifier_error(report, &rank, "prediction"))?;
            let resolved = self.state.resolve(&rank, &predictions)?;
            self.summary.classified.insert(rank.clone(), resolved);
            info!(
                "Rank '{rank}': classified {resolved} of {} sequences, {} unresolved.",
                pending.row_count(),
                self.state.unresolved.len()
            );

            if self.state.unresolved.is_empty() {
                self.terminate(&rank);
                return Ok(Some(rank));
            }
        }

        self.history.push(Stage::Done);
        Ok(None)
    }

    /// Load or train the classifier of every rank, without classifying.
    pub fn train(&mut self) -> Result<(), Report> {
        self.begin(Vec::new());
        for rank in self.ranks.clone() {
            self.history.push(Stage::Pending(rank.clone()));
            self.load_or_train(&rank)?;
        }
        self.history.push(Stage::Done);
        Ok(())
    }

    fn terminate(&mut self, rank: &str) {
        self.state.terminate(rank);
        self.history.push(Stage::Terminated(rank.to_string()));
    }

    fn load_or_train(&mut self, rank: &str) -> Result<F::Model, Report> {
        let artifact = self.artifact(rank);
        if artifact.exists() {
            info!("Loading {} classifier of rank '{rank}': {:?}", self.kind(rank), artifact.model);
            let model = self
                .factory
                .load(&artifact.model)
                .wrap_err_with(|| format!("Failed to load the classifier of rank '{rank}'"))?;
            self.summary.loaded.push(rank.to_string());
            return Ok(model);
        }

        self.history.push(Stage::Training(rank.to_string()));
        let kind = self.kind(rank);
        info!("Training {kind} classifier of rank '{rank}'.");
        let splits = self.assembler.build_splits(rank, kind, self.settings.cv)?;

        let mut model = self.factory.build(kind, rank)?;
        model
            .fit(rank, &splits.train, &splits.validation)
            .map_err(|report| classifier_error(report, rank, "training"))?;
        artifact.publish(&splits.train, &model)?;

        if let Some(test) = &splits.test {
            let predictions =
                model.predict(test).map_err(|report| classifier_error(report, rank, "evaluation"))?;
            let evaluation = Evaluation::new(kind, rank, &predictions, test.label_column(rank)?)?;
            let path = self.settings.outdirs.results.join(format!("{kind}_{rank}_metrics.json"));
            evaluation.write(&path)?;
        }

        self.summary.trained.push(rank.to_string());
        Ok(model)
    }
}

/// Wrap a fit or predict failure as an [`Error::Classifier`] of `rank`.
fn classifier_error(report: Report, rank: &str, operation: &str) -> Report {
    report.wrap_err(Error::Classifier { rank: rank.to_string(), message: format!("{operation} failed") })
}

/// Check the settings against the datasets, returning the ranks in processing order.
fn validate(
    bacteria: &TaxonomicDataset,
    host: Option<&TaxonomicDataset>,
    settings: &Settings,
) -> Result<Vec<String>, Report> {
    let configuration = |message: String| -> Result<Vec<String>, Report> { Err(Error::Configuration(message).into()) };

    if settings.ranks.is_empty() {
        return configuration("At least one rank must be requested.".to_string());
    }
    if let Some(rank) = settings.ranks.iter().find(|rank| !bacteria.has_rank(rank)) {
        return Err(Error::Configuration(format!(
            "Rank '{rank}' is not a rank of dataset '{}'.",
            bacteria.name
        )))
        .suggestion(format!("Available ranks: {}", bacteria.ranks.join(", ")));
    }
    let requested = settings.ranks.iter().collect::<BTreeSet<_>>();
    let ranks = bacteria.ranks.iter().filter(|rank| requested.contains(rank)).cloned().collect_vec();

    let (binary, multiclass) = (settings.binary, settings.multiclass);
    if !binary.is_binary() {
        return configuration(format!("Classifier '{binary}' cannot separate host from bacteria."));
    }
    if multiclass.is_binary() {
        return configuration(format!("Classifier '{multiclass}' is a binary classifier."));
    }
    if ranks.iter().any(|rank| rank == HOST_RANK) {
        match (binary, host.is_some(), settings.cv) {
            (ClassifierKind::OneSvm, false, true) => {
                return configuration("Cross-validation of 'onesvm' requires host data.".to_string());
            }
            (ClassifierKind::OneSvm, true, false) => {
                return configuration("'onesvm' is trained without host data, but host data was given.".to_string());
            }
            (kind, false, _) if kind.is_supervised_binary() => {
                return configuration(format!("Classifier '{kind}' requires host data."));
            }
            _ => (),
        }
    }

    settings.params.validate()?;
    if settings.k != bacteria.k {
        return configuration(format!(
            "K-mer length {} does not match dataset '{}' (k={}).",
            settings.k, bacteria.name, bacteria.k
        ));
    }
    if let Some(host) = host {
        bacteria.check_compatible(host)?;
    }

    debug!("Validated settings: {settings:?}");
    Ok(ranks)
}
