//! Classifier adapters: one [`Model`] type over a closed set of estimators.
//!
//! The controller only sees the [`Classifier`] and [`ClassifierFactory`]
//! traits. [`Models`] is the production factory, it maps every
//! [`ClassifierKind`] to one of four [`Estimator`] variants.

pub mod bayes;
pub mod isolator;
pub mod linear;
pub mod metrics;
pub mod neural;

use crate::error::Error;
use crate::kmers::is_unlabelled;
use crate::utils;
use caribou_table::FeatureTable;
use chrono::Local;
use clap::ValueEnum;
use color_eyre::eyre::{eyre, Report, Result, WrapErr};
use color_eyre::Help;
use itertools::Itertools;
use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use strum::{EnumIter, EnumProperty, IntoEnumIterator};

#[cfg(test)]
mod tests;

// ----------------------------------------------------------------------------
// Classifier Kind
// ----------------------------------------------------------------------------

/// The classifier selected for a rank.
///
/// Binary kinds are only valid at the host-isolation rank, multiclass kinds
/// at every finer rank.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    EnumIter,
    EnumProperty,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    ValueEnum,
)]
pub enum ClassifierKind {
    /// One-class isolator trained on bacteria only.
    #[serde(rename = "onesvm")]
    #[value(name = "onesvm")]
    #[strum(props(binary = "true", estimator = "isolator"))]
    OneSvm,
    /// Supervised linear binary classifier.
    #[serde(rename = "linearsvm")]
    #[value(name = "linearsvm")]
    #[strum(props(binary = "true", estimator = "linear"))]
    LinearSvm,
    #[serde(rename = "attention")]
    #[value(name = "attention")]
    #[strum(props(binary = "true", estimator = "neural", hidden = "64"))]
    Attention,
    #[serde(rename = "lstm")]
    #[value(name = "lstm")]
    #[strum(props(binary = "true", estimator = "neural", hidden = "64"))]
    Lstm,
    #[serde(rename = "deeplstm")]
    #[value(name = "deeplstm")]
    #[strum(props(binary = "true", estimator = "neural", hidden = "128"))]
    DeepLstm,
    /// Multiclass linear classifier trained by stochastic gradient descent.
    #[serde(rename = "sgd")]
    #[value(name = "sgd")]
    #[strum(props(binary = "false", estimator = "linear"))]
    Sgd,
    /// Multinomial naive Bayes.
    #[serde(rename = "mnb")]
    #[value(name = "mnb")]
    #[strum(props(binary = "false", estimator = "bayes"))]
    Mnb,
    #[serde(rename = "lstm_attention")]
    #[value(name = "lstm_attention")]
    #[strum(props(binary = "false", estimator = "neural", hidden = "64"))]
    LstmAttention,
    #[serde(rename = "cnn")]
    #[value(name = "cnn")]
    #[strum(props(binary = "false", estimator = "neural", hidden = "32"))]
    Cnn,
    #[serde(rename = "widecnn")]
    #[value(name = "widecnn")]
    #[strum(props(binary = "false", estimator = "neural", hidden = "128"))]
    WideCnn,
}

impl ClassifierKind {
    /// True for kinds that separate host from bacteria.
    pub fn is_binary(&self) -> bool {
        self.get_str("binary") == Some("true")
    }

    /// True for binary kinds that need host data to train on.
    ///
    /// ```rust
    /// use caribou::classifier::ClassifierKind;
    /// assert!(ClassifierKind::LinearSvm.is_supervised_binary());
    /// assert!(!ClassifierKind::OneSvm.is_supervised_binary());
    /// assert!(!ClassifierKind::Cnn.is_supervised_binary());
    /// ```
    pub fn is_supervised_binary(&self) -> bool {
        self.is_binary() && *self != ClassifierKind::OneSvm
    }

    /// Width of the hidden layer for neural kinds.
    pub fn hidden_width(&self) -> Option<usize> {
        self.get_str("hidden").and_then(|h| h.parse().ok())
    }
}

impl std::fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClassifierKind::OneSvm => "onesvm",
            ClassifierKind::LinearSvm => "linearsvm",
            ClassifierKind::Attention => "attention",
            ClassifierKind::Lstm => "lstm",
            ClassifierKind::DeepLstm => "deeplstm",
            ClassifierKind::Sgd => "sgd",
            ClassifierKind::Mnb => "mnb",
            ClassifierKind::LstmAttention => "lstm_attention",
            ClassifierKind::Cnn => "cnn",
            ClassifierKind::WideCnn => "widecnn",
        };
        write!(f, "{name}")
    }
}

impl FromStr for ClassifierKind {
    type Err = Report;

    /// Convert a classifier name to a [`ClassifierKind`].
    ///
    /// ```rust
    /// use caribou::classifier::ClassifierKind;
    /// use std::str::FromStr;
    ///
    /// assert_eq!(ClassifierKind::from_str("lstm_attention")?, ClassifierKind::LstmAttention);
    /// assert!(ClassifierKind::from_str("svm").is_err());
    /// # Ok::<(), color_eyre::eyre::Report>(())
    /// ```
    fn from_str(name: &str) -> Result<Self, Report> {
        match ClassifierKind::iter().find(|kind| kind.to_string() == name) {
            Some(kind) => Ok(kind),
            None => Err(eyre!("Unknown classifier: {name}"))
                .suggestion(format!("Please choose from: {}", ClassifierKind::iter().join(", "))),
        }
    }
}

// ----------------------------------------------------------------------------
// Training Parameters
// ----------------------------------------------------------------------------

/// Parameters shared by every classifier fit.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TrainParams {
    /// Rows per gradient step.
    pub batch_size: usize,
    /// Passes over the training rows.
    pub epochs: usize,
    /// Minimum confidence for a prediction to be kept as a label.
    pub threshold: f64,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for TrainParams {
    fn default() -> Self {
        TrainParams { batch_size: 32, epochs: 100, threshold: 0.8, learning_rate: 0.1, seed: 42 }
    }
}

impl TrainParams {
    /// Fails with [`Error::Configuration`] on a zero batch size or epoch count, or a threshold outside (0, 1].
    pub fn validate(&self) -> Result<(), Report> {
        if self.batch_size == 0 {
            return Err(Error::Configuration("Batch size must be positive.".to_string()).into());
        }
        if self.epochs == 0 {
            return Err(Error::Configuration("Number of epochs must be positive.".to_string()).into());
        }
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(Error::Configuration(format!(
                "Confidence threshold must be in (0, 1], found: {}",
                self.threshold
            ))
            .into());
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::Configuration("Learning rate must be positive.".to_string()).into());
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Classifier Traits
// ----------------------------------------------------------------------------

/// A prediction for one row.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Prediction {
    pub id: String,
    /// [`None`] when the classifier is not confident enough.
    pub label: Option<String>,
    pub confidence: f64,
}

/// A trainable, persistable classifier for one rank.
pub trait Classifier {
    fn kind(&self) -> ClassifierKind;
    /// Fit on the `rank` label column of `train`, using `validation` to select the best weights.
    fn fit(&mut self, rank: &str, train: &FeatureTable, validation: &FeatureTable) -> Result<(), Report>;
    /// Predict every row of `data`, in row order.
    fn predict(&self, data: &FeatureTable) -> Result<Vec<Prediction>, Report>;
    /// Persist the fitted classifier.
    fn save(&self, path: &Path) -> Result<(), Report>;
}

/// Builds new classifiers and loads persisted ones.
pub trait ClassifierFactory {
    type Model: Classifier;
    fn build(&self, kind: ClassifierKind, rank: &str) -> Result<Self::Model, Report>;
    fn load(&self, path: &Path) -> Result<Self::Model, Report>;
}

// ----------------------------------------------------------------------------
// Features
// ----------------------------------------------------------------------------

/// Rows ready for an estimator: normalized features and optional class indices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Samples {
    pub x: Vec<Vec<f64>>,
    /// Raw counts, for count-based estimators.
    pub counts: Vec<Vec<u32>>,
    /// Class index of every row, [`None`] if the label is not a known class.
    pub y: Vec<Option<usize>>,
}

impl Samples {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Number of rows with a known class.
    pub fn labelled(&self) -> usize {
        self.y.iter().flatten().count()
    }
}

/// Returns the L2-normalized k-mer frequencies of a row.
///
/// ```rust
/// use caribou::classifier::normalize;
/// assert_eq!(normalize(&[3, 4]), [0.6, 0.8]);
/// assert_eq!(normalize(&[0, 0]), [0.0, 0.0]);
/// ```
pub fn normalize(counts: &[u32]) -> Vec<f64> {
    let norm = counts.iter().map(|c| (*c as f64).powi(2)).sum::<f64>().sqrt();
    match norm > 0.0 {
        true => counts.iter().map(|c| *c as f64 / norm).collect(),
        false => vec![0.0; counts.len()],
    }
}

/// Scores every class of one row, as probabilities that sum to one.
pub(crate) trait Scores {
    fn scores(&self, x: &[f64], counts: &[u32]) -> Vec<f64>;
}

/// Returns the index and value of the largest score.
pub(crate) fn argmax(scores: &[f64]) -> (usize, f64) {
    scores.iter().copied().enumerate().fold((0, f64::NEG_INFINITY), |best, (i, s)| match s > best.1 {
        true => (i, s),
        false => best,
    })
}

/// Fraction of labelled rows whose best score is their class.
pub(crate) fn accuracy<M: Scores>(model: &M, samples: &Samples) -> f64 {
    let (correct, total) = samples.y.iter().enumerate().filter_map(|(i, y)| y.map(|y| (i, y))).fold(
        (0, 0),
        |(correct, total), (i, y)| {
            let (best, _) = argmax(&model.scores(&samples.x[i], &samples.counts[i]));
            (correct + usize::from(best == y), total + 1)
        },
    );
    match total {
        0 => 0.0,
        _ => correct as f64 / total as f64,
    }
}

/// Run mini-batch epochs of `step`, keeping the weights with the best validation accuracy.
///
/// When `validation` has no labelled rows, the training accuracy is used instead.
/// Every epoch runs, there is no early stop.
pub(crate) fn train_epochs<M, F>(
    model: &mut M,
    train: &Samples,
    validation: &Samples,
    params: &TrainParams,
    mut step: F,
) where
    M: Scores + Clone,
    F: FnMut(&mut M, &[usize]),
{
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut order = (0..train.len()).filter(|i| train.y[*i].is_some()).collect_vec();
    let monitor = match validation.labelled() > 0 {
        true => validation,
        false => train,
    };

    // ties go to the later epoch
    let mut best = (f64::NEG_INFINITY, model.clone());
    for epoch in 0..params.epochs {
        order.shuffle(&mut rng);
        order.chunks(params.batch_size).for_each(|batch| step(model, batch));
        let score = accuracy(model, monitor);
        if score > best.0 {
            debug!("Epoch {epoch}: accuracy improved to {score:.4}");
        }
        if score >= best.0 {
            best = (score, model.clone());
        }
    }
    *model = best.1;
}

// ----------------------------------------------------------------------------
// Model
// ----------------------------------------------------------------------------

/// The fitted state of one of the four classifier families.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Estimator {
    OneClassIsolator(isolator::OneClassIsolator),
    LinearSupervisedBinary(linear::LogisticBinary),
    MulticlassLinear(linear::Multiclass),
    NeuralSequenceModel(neural::DenseNetwork),
}

impl Scores for Estimator {
    fn scores(&self, x: &[f64], counts: &[u32]) -> Vec<f64> {
        match self {
            Estimator::OneClassIsolator(e) => e.scores(x, counts),
            Estimator::LinearSupervisedBinary(e) => e.scores(x, counts),
            Estimator::MulticlassLinear(e) => e.scores(x, counts),
            Estimator::NeuralSequenceModel(e) => e.scores(x, counts),
        }
    }
}

/// A classifier of one rank, persisted as JSON.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Model {
    pub kind: ClassifierKind,
    pub rank: String,
    /// Crate version that trained the model.
    pub version: String,
    /// Local time of the fit.
    pub created: Option<String>,
    pub params: TrainParams,
    /// K-mer columns the model was fitted on.
    pub kmers: Vec<String>,
    /// Class labels, in estimator output order.
    pub classes: Vec<String>,
    pub estimator: Option<Estimator>,
}

impl Model {
    pub fn new(kind: ClassifierKind, rank: &str, params: TrainParams) -> Self {
        Model {
            kind,
            rank: rank.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created: None,
            params,
            kmers: Vec::new(),
            classes: Vec::new(),
            estimator: None,
        }
    }

    /// Returns the rows of `table` as [`Samples`], aligned to the model's k-mer columns.
    fn samples(&self, table: &FeatureTable, rank: Option<&str>) -> Result<Samples, Report> {
        let counts = match table.kmers == self.kmers {
            true => table.counts.clone(),
            false => {
                let columns = table.kmers.iter().enumerate().map(|(i, k)| (k.as_str(), i)).collect::<BTreeMap<_, _>>();
                let index = self.kmers.iter().map(|k| columns.get(k.as_str()).copied()).collect_vec();
                table
                    .counts
                    .iter()
                    .map(|row| index.iter().map(|i| i.map(|i| row[i]).unwrap_or(0)).collect())
                    .collect()
            }
        };
        let y = match rank {
            Some(rank) => table
                .label_column(rank)?
                .iter()
                .map(|label| self.classes.iter().position(|c| c == label))
                .collect(),
            None => vec![None; table.row_count()],
        };
        let x = counts.iter().map(|row: &Vec<u32>| normalize(row)).collect();
        Ok(Samples { x, counts, y })
    }

    /// Logs a warning if the model was trained by an incompatible crate version.
    pub fn check_version(&self) -> Result<bool, Report> {
        let current = Version::parse(env!("CARGO_PKG_VERSION"))?;
        let required = VersionReq::parse(&format!("^{}", self.version))
            .wrap_err_with(|| eyre!("Invalid model version: {}", self.version))?;
        let compatible = required.matches(&current);
        if !compatible {
            warn!(
                "Model version incompatibility. Current version {current} does not satisfy the {} {} model requirement {required}",
                self.kind, self.rank
            );
        }
        Ok(compatible)
    }
}

impl Classifier for Model {
    fn kind(&self) -> ClassifierKind {
        self.kind
    }

    fn fit(&mut self, rank: &str, train: &FeatureTable, validation: &FeatureTable) -> Result<(), Report> {
        if train.is_empty() {
            return Err(eyre!("Cannot fit {} at rank '{rank}' without training rows.", self.kind));
        }
        self.rank = rank.to_string();
        self.kmers = train.kmers.clone();
        self.classes = train.label_column(rank)?.iter().filter(|l| !is_unlabelled(l)).unique().sorted().cloned().collect();

        let n_classes = self.classes.len();
        let minimum = match self.kind {
            ClassifierKind::OneSvm => 1,
            _ => 2,
        };
        if n_classes < minimum {
            return Err(eyre!(
                "{} at rank '{rank}' needs at least {minimum} classes, found: {:?}",
                self.kind,
                self.classes
            ));
        }

        let train = self.samples(train, Some(rank))?;
        let validation = match validation.labels.contains_key(rank) {
            true => self.samples(validation, Some(rank))?,
            false => self.samples(validation, None)?,
        };
        let dim = self.kmers.len();
        let params = &self.params;
        debug!(
            "Fitting {} at rank '{rank}': {} rows, {} classes, {dim} features",
            self.kind,
            train.len(),
            n_classes
        );

        let estimator = match self.kind.get_str("estimator") {
            Some("isolator") => {
                Estimator::OneClassIsolator(isolator::OneClassIsolator::fit(&train)?)
            }
            Some("bayes") => Estimator::MulticlassLinear(linear::Multiclass::NaiveBayes(
                bayes::MultinomialNb::fit(&train, n_classes, dim),
            )),
            Some("linear") if self.kind.is_binary() => {
                if n_classes != 2 {
                    return Err(eyre!(
                        "{} at rank '{rank}' needs exactly 2 classes, found: {:?}",
                        self.kind,
                        self.classes
                    ));
                }
                Estimator::LinearSupervisedBinary(linear::LogisticBinary::fit(&train, &validation, dim, params))
            }
            Some("linear") => Estimator::MulticlassLinear(linear::Multiclass::Sgd(linear::SoftmaxSgd::fit(
                &train,
                &validation,
                n_classes,
                dim,
                params,
            ))),
            Some("neural") => {
                let hidden = self.kind.hidden_width().unwrap_or(64);
                Estimator::NeuralSequenceModel(neural::DenseNetwork::fit(
                    &train,
                    &validation,
                    n_classes,
                    dim,
                    hidden,
                    params,
                ))
            }
            other => return Err(eyre!("No estimator for classifier {}: {other:?}", self.kind)),
        };

        self.estimator = Some(estimator);
        self.created = Some(Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
        Ok(())
    }

    fn predict(&self, data: &FeatureTable) -> Result<Vec<Prediction>, Report> {
        let estimator = self
            .estimator
            .as_ref()
            .ok_or_else(|| eyre!("{} at rank '{}' has not been fitted.", self.kind, self.rank))?;
        let samples = self.samples(data, None)?;

        let predictions = data
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let (label, confidence) = match estimator {
                    // the isolator decides by its class boundary
                    Estimator::OneClassIsolator(isolator) => {
                        let (inside, confidence) = isolator.decide(&samples.x[i]);
                        (self.classes.first().filter(|_| inside).cloned(), confidence)
                    }
                    _ => {
                        let (best, confidence) = argmax(&estimator.scores(&samples.x[i], &samples.counts[i]));
                        let label = self.classes.get(best).filter(|_| confidence >= self.params.threshold).cloned();
                        (label, confidence)
                    }
                };
                Prediction { id: id.clone(), label, confidence }
            })
            .collect();
        Ok(predictions)
    }

    fn save(&self, path: &Path) -> Result<(), Report> {
        if self.estimator.is_none() {
            return Err(eyre!("Cannot save {} at rank '{}' before it is fitted.", self.kind, self.rank));
        }
        utils::write_json(self, &path).wrap_err_with(|| eyre!("Failed to save model: {path:?}"))
    }
}

/// The production [`ClassifierFactory`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Models {
    pub params: TrainParams,
}

impl Models {
    pub fn new(params: TrainParams) -> Self {
        Models { params }
    }
}

impl ClassifierFactory for Models {
    type Model = Model;

    fn build(&self, kind: ClassifierKind, rank: &str) -> Result<Model, Report> {
        self.params.validate()?;
        Ok(Model::new(kind, rank, self.params.clone()))
    }

    fn load(&self, path: &Path) -> Result<Model, Report> {
        let mut model: Model =
            utils::read_json(&path).wrap_err_with(|| eyre!("Failed to load model: {path:?}"))?;
        if model.estimator.is_none() {
            return Err(Error::artifact_io(path, "model file holds no fitted estimator").into());
        }
        if model.classes.is_empty() {
            return Err(Error::artifact_io(path, "model file holds no classes").into());
        }
        model.check_version()?;
        // prediction follows the current threshold, fitting does not happen after load
        model.params.threshold = self.params.threshold;
        Ok(model)
    }
}
