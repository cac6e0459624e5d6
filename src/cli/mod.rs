//! [Command-line interface](Cli) (CLI) of the main binary.

use crate::{classify, kmers, Verbosity};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::default::Default;

// ----------------------------------------------------------------------------
// CLI Entry Point
// ----------------------------------------------------------------------------

/// The command-line interface (CLI).
/// ---
/// The CLI is intended for parsing user input from the command-line in the main function, with [`Cli::parse`](clap::Parser::parse).
/// Here is a manual example of setting the command-line input:
/// ```rust
/// use caribou::cli::Command;
/// use clap::Parser;
///
/// let input = ["caribou", "train", "-b", "data/Xy_genome_bacteria_data_K20.json", "-k", "20", "-o", "output", "-r", "genus,domain"];
/// let args = caribou::Cli::parse_from(input);
/// match &args.command {
///     Command::Train(train) => assert_eq!(train.ranks, Some(vec!["genus".to_string(), "domain".to_string()])),
///     _ => panic!("expected the train command"),
/// }
/// serde_json::to_string_pretty(&args)?;
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
#[derive(Debug, Deserialize, Parser, Serialize)]
#[clap(name = "caribou", author, version)]
#[clap(about = "caribou classifies metagenomic sequences top-down, from domain to the finest taxonomic rank.")]
pub struct Cli {
    #[clap(subcommand)]
    /// Pass CLI arguments to a particular [Command].
    #[clap(help = "Set the command.")]
    pub command: Command,

    /// Set the output [Verbosity] level.
    #[clap(short = 'v', long)]
    #[clap(value_enum, default_value_t = Verbosity::default())]
    #[clap(hide_possible_values = false)]
    #[clap(global = true)]
    #[clap(help = "Set the output verbosity level.")]
    pub verbosity: Verbosity,

    /// Worker threads of the compute engine (default: all cores).
    #[clap(short = 't', long, global = true)]
    pub threads: Option<usize>,
}

/// CLI [commands](#variants).
#[derive(Debug, Deserialize, Serialize, Subcommand)]
pub enum Command {
    /// Extract labelled k-mer profiles from fasta files.
    #[clap(about = "Extract the k-mer profiles of a reference (and host) or a metagenome.")]
    Kmers(kmers::Args),
    /// Train the classifier of every rank, without classifying.
    #[clap(about = "Train (or load) the classifier of every requested rank.")]
    Train(classify::TrainArgs),
    /// Classify a metagenome down the ranks.
    #[clap(about = "Classify the sequences of a metagenome down the taxonomic ranks.")]
    Classify(classify::ClassifyArgs),
}
