//! Assemble the training, validation and test splits of a rank.
//!
//! Training rows come from the reference profiles. Holdout splits are never
//! read from the references directly: a sample of the reference sequences is
//! turned into simulated reads, whose profile becomes the split.

use crate::classifier::ClassifierKind;
use crate::classify::artifact::{holdout_dir, merged_path};
use crate::dataset::TaxonomicDataset;
use crate::error::Error;
use crate::kmers::is_unlabelled;
use crate::simulation::{read_simulation, ReadSimulator, Technology, PROFILE};
use caribou_table::FeatureTable;
use color_eyre::eyre::{eyre, Report, Result, WrapErr};
use color_eyre::Help;
use itertools::Itertools;
use log::{debug, info};
use rand::{rngs::StdRng, SeedableRng};
use std::path::PathBuf;

/// The rank at which host sequences are separated from bacteria.
pub const HOST_RANK: &str = "domain";

/// Share of the pool sampled for each holdout split.
pub const HOLDOUT_FRACTION: f64 = 0.1;

/// Label that archaea are merged into at the [`HOST_RANK`].
pub const BACTERIA: &str = "Bacteria";

/// The rows a classifier is fitted and evaluated on.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Splits {
    pub train: FeatureTable,
    pub validation: FeatureTable,
    /// Only built for cross-validation.
    pub test: Option<FeatureTable>,
}

/// Where holdout rows are sampled from.
struct Pool {
    table: FeatureTable,
    fasta: Vec<PathBuf>,
    /// Profile the pool was read from, holdouts are cached next to it.
    profile: PathBuf,
    merged: bool,
}

/// Builds [`Splits`] from a bacteria reference and an optional host.
pub struct Assembler {
    pub bacteria: TaxonomicDataset,
    pub host: Option<TaxonomicDataset>,
    pub simulator: Box<dyn ReadSimulator>,
    pub technology: Technology,
    pub seed: u64,
}

impl Assembler {
    pub fn new(
        bacteria: TaxonomicDataset,
        host: Option<TaxonomicDataset>,
        simulator: Box<dyn ReadSimulator>,
        technology: Technology,
        seed: u64,
    ) -> Self {
        Assembler { bacteria, host, simulator, technology, seed }
    }

    /// Returns the union of the bacteria and host profiles, restricted to the [`HOST_RANK`] labels.
    ///
    /// The union is cached next to the bacteria profile and reused when present.
    /// Without a host, this is the bacteria profile alone.
    pub fn merged(&self) -> Result<FeatureTable, Report> {
        let host = match &self.host {
            Some(host) => host,
            None => return project(&self.bacteria.load_profile()?, HOST_RANK),
        };
        // before any file is touched
        self.bacteria.check_compatible(host)?;

        let path = merged_path(&self.bacteria.profile, &host.name);
        if path.exists() {
            debug!("Loading merged reference: {path:?}");
            return FeatureTable::read(&path);
        }

        info!("Merging {} and {} at rank '{HOST_RANK}'.", self.bacteria.name, host.name);
        let bacteria = project(&self.bacteria.load_profile()?, HOST_RANK)?;
        let host_table = project(&host.load_profile()?, HOST_RANK)?;
        let merged = bacteria
            .union(&host_table)
            .map_err(|e| Error::DataConsistency(format!("{e}")))
            .wrap_err_with(|| eyre!("Failed to merge {} with {}", self.bacteria.name, host.name))?;
        merged.write(&path)?;
        Ok(merged)
    }

    fn pool(&self, rank: &str) -> Result<Pool, Report> {
        match (rank == HOST_RANK, &self.host) {
            (true, Some(host)) => Ok(Pool {
                table: self.merged()?,
                fasta: self.bacteria.fasta.iter().chain(&host.fasta).cloned().collect(),
                profile: merged_path(&self.bacteria.profile, &host.name),
                merged: true,
            }),
            _ => Ok(Pool {
                table: self.bacteria.load_profile()?,
                fasta: self.bacteria.fasta.clone(),
                profile: self.bacteria.profile.clone(),
                merged: false,
            }),
        }
    }

    /// Build the splits of `rank` for the classifier `kind`, with a test split if `want_test`.
    pub fn build_splits(&self, rank: &str, kind: ClassifierKind, want_test: bool) -> Result<Splits, Report> {
        if let Some(host) = &self.host {
            self.bacteria.check_compatible(host)?;
        }
        let pool = self.pool(rank)?;

        // the isolator learns the bacteria alone
        let train = match rank == HOST_RANK && kind == ClassifierKind::OneSvm {
            true => project(&self.bacteria.load_profile()?, rank)?,
            false => project(&pool.table, rank)?,
        };
        let labelled = train.label_column(rank)?.iter().positions(|label| !is_unlabelled(label)).collect_vec();
        let mut train = train.select_rows(&labelled);

        let prefix = if pool.merged { "merged_" } else { "" };
        let mut validation = project(&self.holdout(&pool, &format!("{prefix}validation"), 0)?, rank)?;
        let mut test = match want_test {
            true => Some(project(&self.holdout(&pool, &format!("{prefix}test"), 1)?, rank)?),
            false => None,
        };

        if rank == HOST_RANK {
            normalize_archaea(&mut train)?;
            normalize_archaea(&mut validation)?;
            if let Some(test) = test.as_mut() {
                normalize_archaea(test)?;
            }
        }

        debug!(
            "Splits of rank '{rank}': train {}, validation {}, test {:?}",
            train.row_count(),
            validation.row_count(),
            test.as_ref().map(|t| t.row_count())
        );
        Ok(Splits { train, validation, test })
    }

    /// Returns the cached holdout `split` of the pool, simulating it if absent.
    fn holdout(&self, pool: &Pool, split: &str, stream: u64) -> Result<FeatureTable, Report> {
        let dir = holdout_dir(&pool.profile, split, self.bacteria.k);
        if dir.join(PROFILE).exists() {
            debug!("Loading cached holdout '{split}': {dir:?}");
            return read_simulation(&dir);
        }
        if pool.table.is_empty() {
            return Err(Error::DataConsistency(format!(
                "Cannot build holdout '{split}' from an empty reference: {:?}",
                pool.profile
            )))
            .suggestion("Check that the reference profile has sequences.");
        }

        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(stream));
        let mut sampled = pool.table.sample_fraction(HOLDOUT_FRACTION, &mut rng);
        if sampled.is_empty() {
            let count = ((pool.table.row_count() as f64 * HOLDOUT_FRACTION).round() as usize).max(1);
            debug!("Holdout '{split}' sampled no rows, sampling {count} instead.");
            sampled = pool.table.sample_count(count, &mut rng);
        }

        self.simulator
            .simulate(&pool.fasta, &sampled, self.technology, &dir, split)
            .wrap_err_with(|| eyre!("Failed to simulate holdout '{split}'"))
    }
}

/// Keep only the `rank` label column, which must exist.
fn project(table: &FeatureTable, rank: &str) -> Result<FeatureTable, Report> {
    if !table.labels.contains_key(rank) {
        return Err(Error::DataConsistency(format!(
            "Label column '{rank}' was not found in table: {:?}",
            table.path
        ))
        .into());
    }
    table.select_labels(&[rank])
}

/// Merge archaea into bacteria at the [`HOST_RANK`].
///
/// ```rust
/// use caribou::classify::assembler::normalize_archaea;
/// use caribou_table::FeatureTable;
/// use std::collections::BTreeMap;
///
/// let mut table = FeatureTable::new(vec!["A".to_string()]);
/// for (id, domain) in [("a", "ARCHAEA"), ("b", "Host")] {
///     table.add_row(id, vec![1], &BTreeMap::from([("domain".to_string(), domain.to_string())]))?;
/// }
/// normalize_archaea(&mut table)?;
/// assert_eq!(table.label_column("domain")?, ["Bacteria", "Host"]);
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
pub fn normalize_archaea(table: &mut FeatureTable) -> Result<(), Report> {
    table.map_labels(HOST_RANK, |label| match label.eq_ignore_ascii_case("archaea") {
        true => BACTERIA.to_string(),
        false => label.to_string(),
    })
}

