//! `caribou` classifies metagenomic sequences from **k-mer profiles**, one taxonomic rank at a time.
//!
//! ## How it works
//!
//! 1. `caribou kmers` counts the k-mers of a reference (and optionally host) fasta,
//!    labels every sequence with its taxonomy and persists the profiles.
//!
//! 1. `caribou train` fits one classifier per rank. The host-isolation rank
//!    (`domain`) uses a binary classifier, every finer rank a multiclass one.
//!    Holdout splits are simulated reads of sampled reference sequences.
//!
//! 1. `caribou classify` runs the ranks coarsest first. Sequences labelled with
//!    enough confidence stop at their rank, the rest are forwarded to the next
//!    one. Trained classifiers are cached and reused by later runs.

pub mod classifier;
pub mod classify;
pub mod cli;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod kmers;
pub mod simulation;
pub mod utils;

#[doc(inline)]
pub use crate::cli::Cli;
#[doc(inline)]
pub use crate::engine::Engine;
#[doc(inline)]
pub use crate::error::Error;
#[doc(inline)]
pub use caribou_table::FeatureTable;
#[doc(inline)]
pub use utils::verbosity::Verbosity;
