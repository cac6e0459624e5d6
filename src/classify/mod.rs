//! Train rank classifiers and classify metagenomes (`caribou train`, `caribou classify`).

pub mod artifact;
pub mod assembler;
pub mod controller;
pub mod state;

use crate::classifier::{ClassifierKind, Models, TrainParams};
use crate::classify::controller::{Controller, RunSummary, Settings};
use crate::classify::state::ClassificationState;
use crate::dataset::TaxonomicDataset;
use crate::error::Error;
use crate::simulation::{FragmentSimulator, Technology};
use crate::utils::{self, Outdirs};
use crate::Engine;
use clap::Parser;
use color_eyre::eyre::{eyre, Report, Result, WrapErr};
use itertools::Itertools;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;


/// Label of sequences left unresolved, in the classification table.
pub const UNCLASSIFIED: &str = "unclassified";

// ----------------------------------------------------------------------------
// Arguments
// ----------------------------------------------------------------------------

/// CLI arguments to train the classifiers of every requested rank.
#[derive(Clone, Debug, Deserialize, Parser, Serialize)]
pub struct TrainArgs {
    /// Dataset summary (json) of the bacteria reference, written by `caribou kmers`.
    #[clap(short = 'b', long, required = true)]
    pub bacteria: PathBuf,

    /// Dataset summary (json) of the host reference.
    #[clap(long)]
    pub host: Option<PathBuf>,

    /// Ranks to classify, comma separated (default: every rank of the bacteria).
    #[clap(short = 'r', long, value_delimiter = ',')]
    pub ranks: Option<Vec<String>>,

    /// Length of k-mers, must match the datasets.
    #[clap(short = 'k', long, required = true)]
    pub k: usize,

    /// Classifier of the host-isolation rank (default: onesvm without host, attention with host).
    #[clap(long, value_enum)]
    pub binary: Option<ClassifierKind>,

    /// Classifier of every finer rank.
    #[clap(long, value_enum, default_value_t = TrainArgs::default().multiclass)]
    pub multiclass: ClassifierKind,

    /// Rows per gradient step.
    #[clap(long, default_value_t = TrainArgs::default().batch_size)]
    pub batch_size: usize,

    /// Training epochs.
    #[clap(short = 'e', long, default_value_t = TrainArgs::default().epochs)]
    pub epochs: usize,

    /// Minimum confidence for a sequence to be labelled.
    #[clap(long, default_value_t = TrainArgs::default().threshold)]
    pub threshold: f64,

    /// Learning rate of gradient-trained classifiers.
    #[clap(long, default_value_t = TrainArgs::default().learning_rate)]
    pub learning_rate: f64,

    /// Seed of every random choice (sampling, simulation, weight initialization).
    #[clap(long, default_value_t = TrainArgs::default().seed)]
    pub seed: u64,

    /// Sequencing technology of the simulated holdout reads.
    #[clap(long, value_enum, default_value_t = Technology::default())]
    pub technology: Technology,

    /// Name of the reference database, used to name artifacts.
    #[clap(long, default_value_t = TrainArgs::default().database_name)]
    pub database_name: String,

    /// Cross-validate: build a test split and write evaluation metrics.
    #[clap(long)]
    pub cv: bool,

    /// Output directory, the same as the one given to `caribou kmers`.
    #[clap(short = 'o', long, required = true)]
    pub outdir: PathBuf,
}

impl Default for TrainArgs {
    fn default() -> Self {
        let params = TrainParams::default();
        TrainArgs {
            bacteria: PathBuf::new(),
            host: None,
            ranks: None,
            k: 0,
            binary: None,
            multiclass: ClassifierKind::Cnn,
            batch_size: params.batch_size,
            epochs: params.epochs,
            threshold: params.threshold,
            learning_rate: params.learning_rate,
            seed: params.seed,
            technology: Technology::default(),
            database_name: "database".to_string(),
            cv: false,
            outdir: PathBuf::new(),
        }
    }
}

impl TrainArgs {
    pub fn params(&self) -> TrainParams {
        TrainParams {
            batch_size: self.batch_size,
            epochs: self.epochs,
            threshold: self.threshold,
            learning_rate: self.learning_rate,
            seed: self.seed,
        }
    }

    /// Read [`TrainArgs`] from a JSON file.
    pub fn read<P>(path: &P) -> Result<Self, Report>
    where
        P: AsRef<Path> + Debug,
    {
        utils::read_json(path).wrap_err_with(|| eyre!("Failed to read run arguments: {path:?}"))
    }

    /// Write [`TrainArgs`] to a JSON file.
    pub fn write<P>(&self, path: &P) -> Result<(), Report>
    where
        P: AsRef<Path> + Debug,
    {
        utils::write_json(self, path).wrap_err_with(|| eyre!("Failed to write run arguments: {path:?}"))
    }
}

/// CLI arguments to classify a metagenome.
#[derive(Clone, Debug, Default, Deserialize, Parser, Serialize)]
pub struct ClassifyArgs {
    /// Dataset summary (json) of the metagenome, extracted with the reference k-mer list.
    #[clap(short = 'm', long, required = true)]
    pub metagenome: PathBuf,

    #[clap(flatten)]
    pub train: TrainArgs,
}

impl ClassifyArgs {
    /// Write [`ClassifyArgs`] to a JSON file.
    pub fn write<P>(&self, path: &P) -> Result<(), Report>
    where
        P: AsRef<Path> + Debug,
    {
        utils::write_json(self, path).wrap_err_with(|| eyre!("Failed to write run arguments: {path:?}"))
    }
}

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// The persisted result of a classification.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Classification {
    pub metagenome: String,
    pub state: ClassificationState,
    pub summary: RunSummary,
}

/// Read the datasets and build the production controller.
pub fn controller(engine: &Arc<Engine>, args: &TrainArgs) -> Result<Controller<Models>, Report> {
    let bacteria = TaxonomicDataset::read(&args.bacteria)?;
    let host = args.host.as_ref().map(TaxonomicDataset::read).transpose()?;

    let binary = args.binary.unwrap_or(match host {
        Some(_) => ClassifierKind::Attention,
        None => ClassifierKind::OneSvm,
    });
    let settings = Settings {
        k: args.k,
        binary,
        multiclass: args.multiclass,
        ranks: args.ranks.clone().unwrap_or_else(|| bacteria.ranks.clone()),
        params: args.params(),
        outdirs: Outdirs::new(&args.outdir),
        database: args.database_name.clone(),
        cv: args.cv,
        technology: args.technology,
    };
    let simulator = FragmentSimulator::new(Arc::clone(engine), args.k, args.seed);
    Controller::new(bacteria, host, settings, Models::new(args.params()), Box::new(simulator))
}

/// Train (or load) the classifier of every requested rank.
pub fn train(engine: &Arc<Engine>, args: &TrainArgs) -> Result<RunSummary, Report> {
    let mut controller = controller(engine, args)?;
    Outdirs::create(&args.outdir)?;
    args.write(&args.outdir.join("run_args.json"))?;

    controller.train()?;
    let summary = controller.summary().clone();
    info!("Trained ranks: {:?}, loaded ranks: {:?}", summary.trained, summary.loaded);
    Ok(summary)
}

/// Classify a metagenome and write the results.
pub fn classify(engine: &Arc<Engine>, args: &ClassifyArgs) -> Result<Classification, Report> {
    let mut controller = controller(engine, &args.train)?;
    let metagenome = TaxonomicDataset::read(&args.metagenome)?;
    if metagenome.k != args.train.k {
        return Err(Error::Configuration(format!(
            "K-mer length {} does not match metagenome '{}' (k={}).",
            args.train.k, metagenome.name, metagenome.k
        ))
        .into());
    }
    let outdirs = Outdirs::create(&args.train.outdir)?;
    args.write(&args.train.outdir.join("run_args.json"))?;

    let table = metagenome.load_profile()?;
    let termination = controller.run(&table)?;
    info!("Stages: {}", controller.history().iter().join(" -> "));
    match &termination {
        Some(rank) => info!("Every sequence was classified by rank '{rank}'."),
        None => info!("{} sequence(s) remain unclassified.", controller.state().unresolved.len()),
    }

    let classification = Classification {
        metagenome: metagenome.name.clone(),
        state: controller.state().clone(),
        summary: controller.summary().clone(),
    };
    let json = outdirs.results.join(format!("{}_classified.json", metagenome.name));
    utils::write_json(&classification, &json)?;
    let tsv = outdirs.results.join(format!("{}_classified.tsv", metagenome.name));
    write_table(&classification.state, &table.ids, &tsv)?;
    info!("Classification written to: {tsv:?}");

    Ok(classification)
}

/// Write one row per sequence (id, rank, label), in input order.
///
/// Unresolved sequences have an empty rank and the label [`UNCLASSIFIED`].
pub fn write_table<P>(state: &ClassificationState, ids: &[String], path: &P) -> Result<(), Report>
where
    P: AsRef<Path> + Debug,
{
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(Vec::new());
    writer.write_record(["id", "rank", "label"])?;
    for id in ids {
        let (rank, label) = state.label_of(id).unwrap_or(("", UNCLASSIFIED));
        writer.write_record([id.as_str(), rank, label])?;
    }
    let content = writer.into_inner().map_err(|e| eyre!("Failed to flush classification rows: {}", e.error()))?;
    utils::write_atomic(path, &content).wrap_err_with(|| eyre!("Failed to write classification: {path:?}"))
}
