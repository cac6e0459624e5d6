//! Synthesize holdout reads from reference sequences.

use crate::error::Error;
use crate::kmers::{count_records, read_fasta, NativeCounter};
use crate::Engine;
use caribou_table::FeatureTable;
use clap::ValueEnum;
use color_eyre::eyre::{eyre, Report, Result, WrapErr};
use color_eyre::Help;
use log::{debug, info};
use noodles::fasta;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum::EnumIter;

#[cfg(test)]
mod tests;

/// File name of the simulated reads, inside a simulation directory.
pub const READS: &str = "reads.fasta";
/// File name of the simulated k-mer profile, inside a simulation directory.
pub const PROFILE: &str = "profile.tsv.zst";

// ----------------------------------------------------------------------------
// Technology
// ----------------------------------------------------------------------------

/// Sequencing technology whose reads are simulated.
#[derive(Clone, Copy, Debug, Default, Deserialize, EnumIter, PartialEq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Technology {
    #[default]
    #[value(name = "miseq")]
    MiSeq,
    #[value(name = "hiseq")]
    HiSeq,
    #[value(name = "novaseq")]
    NovaSeq,
}

impl Technology {
    /// Read length in base pairs.
    ///
    /// ```rust
    /// use caribou::simulation::Technology;
    /// assert_eq!(Technology::MiSeq.read_length(), 300);
    /// ```
    pub fn read_length(&self) -> usize {
        match self {
            Technology::MiSeq => 300,
            Technology::HiSeq => 125,
            Technology::NovaSeq => 150,
        }
    }
}

impl std::fmt::Display for Technology {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let lowercase = format!("{:?}", self).to_lowercase();
        write!(f, "{lowercase}")
    }
}

// ----------------------------------------------------------------------------
// Read Simulator
// ----------------------------------------------------------------------------

/// Converts sampled reference rows into a profile of simulated reads.
pub trait ReadSimulator {
    /// Simulate reads of the `sampled` rows and return their labelled k-mer profile.
    ///
    /// ## Arguments
    ///
    /// - `fasta` - Fasta files that contain the reference sequence of every sampled id.
    /// - `sampled` - Rows to simulate from, with their label columns.
    /// - `technology` - Sequencing technology of the reads.
    /// - `out_dir` - Directory that will hold the reads and the profile.
    /// - `name` - Name of the simulation, for logging.
    fn simulate(
        &self,
        fasta: &[PathBuf],
        sampled: &FeatureTable,
        technology: Technology,
        out_dir: &Path,
        name: &str,
    ) -> Result<FeatureTable, Report>;
}

/// Cuts fixed-length fragments at random positions of each reference sequence.
#[derive(Clone, Debug)]
pub struct FragmentSimulator {
    pub engine: Arc<Engine>,
    pub k: usize,
    pub reads_per_sequence: usize,
    pub seed: u64,
}

impl FragmentSimulator {
    pub fn new(engine: Arc<Engine>, k: usize, seed: u64) -> Self {
        FragmentSimulator { engine, k, reads_per_sequence: 10, seed }
    }

    /// Returns the reference sequences of `ids`, failing if any is missing.
    fn references(
        &self,
        fasta: &[PathBuf],
        ids: &BTreeSet<&str>,
    ) -> Result<BTreeMap<String, Vec<u8>>, Report> {
        let mut references = BTreeMap::new();
        for path in fasta {
            if !path.exists() {
                return Err(Error::DataConsistency(format!(
                    "Reference fasta needed for read simulation does not exist: {path:?}"
                )))
                .suggestion("Holdout splits are simulated from the fasta files used by `caribou kmers`.");
            }
            for record in read_fasta(path)? {
                if ids.contains(record.name()) {
                    references.insert(record.name().to_string(), record.sequence().as_ref().to_vec());
                }
            }
        }
        if let Some(missing) = ids.iter().find(|id| !references.contains_key(**id)) {
            return Err(Error::DataConsistency(format!(
                "Sequence '{missing}' was not found in the reference fasta files: {fasta:?}"
            ))
            .into());
        }
        Ok(references)
    }
}

impl ReadSimulator for FragmentSimulator {
    fn simulate(
        &self,
        fasta: &[PathBuf],
        sampled: &FeatureTable,
        technology: Technology,
        out_dir: &Path,
        name: &str,
    ) -> Result<FeatureTable, Report> {
        info!("Simulating {technology} reads of {} sequences: {name}", sampled.row_count());
        let ids = sampled.ids.iter().map(|id| id.as_str()).collect::<BTreeSet<_>>();
        let references = self.references(fasta, &ids)?;

        // cut reads, each read inherits the labels of its parent sequence
        let mut rng = StdRng::seed_from_u64(self.seed);
        let length = technology.read_length();
        let mut reads = Vec::new();
        let mut parents = Vec::new();
        for (row, id) in sampled.ids.iter().enumerate() {
            let sequence = &references[id];
            for i in 0..self.reads_per_sequence {
                let fragment = match sequence.len() > length {
                    true => {
                        let start = rng.gen_range(0..=sequence.len() - length);
                        &sequence[start..start + length]
                    }
                    false => &sequence[..],
                };
                let definition = fasta::record::Definition::new(format!("{id}_read_{i}"), None);
                let sequence = fasta::record::Sequence::from(fragment.to_vec());
                reads.push(fasta::Record::new(definition, sequence));
                parents.push(row);
            }
        }

        let counter = NativeCounter::new(self.k);
        let profile = count_records(&self.engine, &counter, &reads, Some(sampled.kmers.clone()))?;
        let mut table = FeatureTable::new(profile.kmers.clone());
        for (i, id) in profile.ids.iter().enumerate() {
            let labels = sampled
                .labels
                .iter()
                .map(|(column, values)| (column.clone(), values[parents[i]].clone()))
                .collect::<BTreeMap<_, _>>();
            table.add_row(id, profile.counts[i].clone(), &labels)?;
        }
        sampled.labels.keys().for_each(|column| {
            table.labels.entry(column.clone()).or_default();
        });

        publish(out_dir, &reads, &table)?;
        table.path = Some(out_dir.join(PROFILE));
        debug!("Simulated {} reads into {out_dir:?}", table.row_count());
        Ok(table)
    }
}

/// Write the reads and profile to a temporary directory, then rename it to `out_dir`.
fn publish(out_dir: &Path, reads: &[fasta::Record], table: &FeatureTable) -> Result<(), Report> {
    let parent = crate::utils::create_parent_dir(&out_dir)?;
    let tmp = tempfile::Builder::new()
        .prefix(".simulation")
        .tempdir_in(&parent)
        .map_err(|source| Error::ArtifactIo { path: parent.clone(), source })?;

    let reads_path = tmp.path().join(READS);
    let mut writer = File::create(&reads_path).map(fasta::Writer::new)?;
    reads
        .iter()
        .try_for_each(|record| writer.write_record(record))
        .map_err(|source| Error::ArtifactIo { path: reads_path.clone(), source })?;
    drop(writer);
    table.write(&tmp.path().join(PROFILE))?;

    if out_dir.exists() {
        std::fs::remove_dir_all(out_dir)
            .map_err(|source| Error::ArtifactIo { path: out_dir.to_path_buf(), source })?;
    }
    let tmp_path = tmp.keep();
    std::fs::rename(&tmp_path, out_dir)
        .map_err(|source| Error::ArtifactIo { path: out_dir.to_path_buf(), source })
        .wrap_err_with(|| eyre!("Failed to publish simulation: {tmp_path:?}"))?;
    Ok(())
}

/// Read a simulation previously published in `out_dir`.
pub fn read_simulation(out_dir: &Path) -> Result<FeatureTable, Report> {
    FeatureTable::read(&out_dir.join(PROFILE))
        .wrap_err_with(|| eyre!("Failed to read simulation: {out_dir:?}"))
}
