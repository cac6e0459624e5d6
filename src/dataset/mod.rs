//! Reference corpora ([`TaxonomicDataset`]) and their persisted summaries.

use crate::error::Error;
use crate::utils;
use caribou_table::FeatureTable;
use color_eyre::eyre::{eyre, Report, Result, WrapErr};
use color_eyre::Help;
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::fmt;
use std::fmt::Debug;
use std::path::{Path, PathBuf};


/// Returns the file stem shared by a dataset's profile and summary.
///
/// ```rust
/// use caribou::dataset::file_stem;
/// assert_eq!(file_stem("bacteria", 20), "Xy_genome_bacteria_data_K20");
/// ```
pub fn file_stem(name: &str, k: usize) -> String {
    format!("Xy_genome_{name}_data_K{k}")
}

// ----------------------------------------------------------------------------
// Taxonomic Dataset

/// One reference corpus (bacteria, host, or an unlabelled metagenome).
///
/// The k-mer counts and the per-rank labels live in the feature table at
/// `profile`; the dataset itself is the summary persisted next to it.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TaxonomicDataset {
    /// Dataset name, used to name files.
    pub name: String,
    /// K-mer length.
    pub k: usize,
    /// Taxonomic ranks, coarsest first (ex. domain, phylum, ..., species).
    pub ranks: Vec<String>,
    /// Sequence ids, in profile row order.
    pub ids: Vec<String>,
    /// K-mer column names of the profile.
    pub kmers: Vec<String>,
    /// Path to the k-mer profile feature table.
    pub profile: PathBuf,
    /// Fasta file(s) the profile was extracted from.
    pub fasta: Vec<PathBuf>,
    /// Crate version that created the dataset (ex. "caribou 0.1.0").
    pub version: String,
}

impl fmt::Display for TaxonomicDataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "name: {}, k: {}, sequences: {}", self.name, self.k, self.ids.len())
    }
}

impl TaxonomicDataset {
    /// Returns a dataset describing `table`, persisted (or to be persisted) at `profile`.
    pub fn from_table(
        name: &str,
        k: usize,
        ranks: Vec<String>,
        table: &FeatureTable,
        profile: PathBuf,
        fasta: Vec<PathBuf>,
    ) -> Self {
        TaxonomicDataset {
            name: name.to_string(),
            k,
            ranks,
            ids: table.ids.clone(),
            kmers: table.kmers.clone(),
            profile,
            fasta,
            version: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }

    /// Returns true if the dataset carries labels for `rank`.
    pub fn has_rank(&self, rank: &str) -> bool {
        self.ranks.iter().any(|r| r == rank)
    }

    /// Read the k-mer profile feature table.
    pub fn load_profile(&self) -> Result<FeatureTable, Report> {
        if !self.profile.exists() {
            return Err(Error::DataConsistency(format!(
                "Profile of dataset '{}' does not exist: {:?}",
                self.name, self.profile
            )))
            .suggestion("Was `caribou kmers` run with the same output directory?");
        }
        let table = FeatureTable::read(&self.profile)
            .wrap_err_with(|| eyre!("Failed to load profile of dataset: {}", self.name))?;
        Ok(table)
    }

    /// Returns the labels of every sequence at `rank`, in profile row order.
    pub fn labels(&self, rank: &str) -> Result<Vec<String>, Report> {
        if !self.has_rank(rank) {
            return Err(Error::DataConsistency(format!(
                "Dataset '{}' has no labels for rank '{rank}', available ranks: {:?}",
                self.name, self.ranks
            ))
            .into());
        }
        let table = self.load_profile()?;
        let labels = table.label_column(rank)?.to_vec();
        Ok(labels)
    }

    /// Fails with [`Error::DataConsistency`] if the two datasets use different k-mer lengths.
    ///
    /// ```rust
    /// use caribou::dataset::TaxonomicDataset;
    ///
    /// let bacteria = TaxonomicDataset { name: "bacteria".into(), k: 15, ..Default::default() };
    /// let host     = TaxonomicDataset { name: "host".into(), k: 13, ..Default::default() };
    /// assert!(bacteria.check_compatible(&host).is_err());
    /// ```
    pub fn check_compatible(&self, other: &TaxonomicDataset) -> Result<(), Report> {
        if self.k != other.k {
            return Err(Error::DataConsistency(format!(
                "K-mer length of '{}' (k={}) does not match '{}' (k={}).",
                self.name, self.k, other.name, other.k
            )))
            .suggestion("Extract both datasets with the same --k.");
        }
        Ok(())
    }

    /// Read a [`TaxonomicDataset`] summary from a JSON file.
    pub fn read<P>(path: &P) -> Result<Self, Report>
    where
        P: AsRef<Path> + Debug,
    {
        let dataset: TaxonomicDataset = utils::read_json(path)
            .wrap_err_with(|| eyre!("Failed to read dataset summary: {path:?}"))?;
        Ok(dataset)
    }

    /// Write the [`TaxonomicDataset`] summary to a JSON file.
    ///
    /// ```rust
    /// use caribou::dataset::TaxonomicDataset;
    ///
    /// let dataset = TaxonomicDataset { name: "bacteria".into(), k: 4, ..Default::default() };
    /// let dir     = tempfile::tempdir()?;
    /// let path    = dir.path().join("bacteria.json");
    ///
    /// dataset.write(&path)?;
    /// assert_eq!(TaxonomicDataset::read(&path)?, dataset);
    /// # Ok::<(), color_eyre::eyre::Report>(())
    /// ```
    pub fn write<P>(&self, path: &P) -> Result<(), Report>
    where
        P: AsRef<Path> + Debug,
    {
        utils::write_json(self, path)
            .wrap_err_with(|| eyre!("Failed to write dataset summary: {path:?}"))
    }
}
