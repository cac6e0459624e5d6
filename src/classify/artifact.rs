//! Cached per-rank artifacts and the names of derived files.

use crate::classifier::{Classifier, ClassifierKind};
use crate::utils::Outdirs;
use caribou_table::FeatureTable;
use color_eyre::eyre::{eyre, Report, Result, WrapErr};
use log::debug;
use std::path::{Path, PathBuf};

/// The extracted features and the trained model of one rank.
///
/// Both files existing means the rank is loaded instead of retrained.
///
/// ```rust
/// use caribou::classifier::ClassifierKind;
/// use caribou::classify::artifact::RankArtifact;
/// use caribou::utils::Outdirs;
/// use std::path::PathBuf;
///
/// let outdirs = Outdirs::new(&"output");
/// let artifact = RankArtifact::new(&outdirs, "genus", 20, ClassifierKind::Cnn, "refseq");
/// assert_eq!(artifact.features, PathBuf::from("output/data/Xy_genus_database_K20_cnn_refseq_data.tsv.zst"));
/// assert_eq!(artifact.model, PathBuf::from("output/models/cnn_genus.json"));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct RankArtifact {
    pub rank: String,
    /// Training rows the model was fitted on.
    pub features: PathBuf,
    pub model: PathBuf,
}

impl RankArtifact {
    pub fn new(outdirs: &Outdirs, rank: &str, k: usize, kind: ClassifierKind, database: &str) -> Self {
        RankArtifact {
            rank: rank.to_string(),
            features: outdirs.data.join(format!("Xy_{rank}_database_K{k}_{kind}_{database}_data.tsv.zst")),
            model: outdirs.models.join(format!("{kind}_{rank}.json")),
        }
    }

    pub fn exists(&self) -> bool {
        self.features.exists() && self.model.exists()
    }

    /// Write the features, then the model.
    ///
    /// Each file is renamed into place once complete, and the model is
    /// published last, so [`RankArtifact::exists`] never sees a partial pair.
    pub fn publish<C>(&self, features: &FeatureTable, model: &C) -> Result<(), Report>
    where
        C: Classifier,
    {
        features
            .write(&self.features)
            .wrap_err_with(|| eyre!("Failed to publish features of rank '{}'", self.rank))?;
        model.save(&self.model).wrap_err_with(|| eyre!("Failed to publish model of rank '{}'", self.rank))?;
        debug!("Published artifacts of rank '{}': {:?}", self.rank, self.model);
        Ok(())
    }
}

/// Returns the directory of a simulated holdout split, next to the profile it was sampled from.
///
/// ```rust
/// use caribou::classify::artifact::holdout_dir;
/// use std::path::{Path, PathBuf};
///
/// let dir = holdout_dir(Path::new("data/Xy_genome_bacteria_data_K4.tsv.zst"), "merged_test", 4);
/// assert_eq!(dir, PathBuf::from("data/Xy_genome_simulation_merged_test_data_K4"));
/// ```
pub fn holdout_dir(profile: &Path, split: &str, k: usize) -> PathBuf {
    let parent = profile.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("Xy_genome_simulation_{split}_data_K{k}"))
}

/// Returns the path of the bacteria + `host` merged profile.
///
/// ```rust
/// use caribou::classify::artifact::merged_path;
/// use std::path::{Path, PathBuf};
///
/// let merged = merged_path(Path::new("data/Xy_genome_bacteria_data_K4.tsv.zst"), "human");
/// assert_eq!(merged, PathBuf::from("data/Xy_genome_bacteria_data_K4_human_merged.tsv.zst"));
/// ```
pub fn merged_path(profile: &Path, host: &str) -> PathBuf {
    let name = profile.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let name = match name.split_once('.') {
        Some((stem, ext)) => format!("{stem}_{host}_merged.{ext}"),
        None => format!("{name}_{host}_merged"),
    };
    profile.with_file_name(name)
}
