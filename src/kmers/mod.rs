//! K-mer profile extraction from fasta files (`caribou kmers`).
//!
//! Every sequence is counted independently on the [`Engine`] pool, then the
//! sparse profiles are outer-joined by sequence id into a [`FeatureTable`].

use crate::dataset::{file_stem, TaxonomicDataset};
use crate::error::Error;
use crate::utils;
use crate::Engine;
use caribou_table::FeatureTable;
use clap::{Parser, ValueEnum};
use color_eyre::eyre::{eyre, Report, Result, WrapErr};
use color_eyre::Help;
use indicatif::{style::ProgressStyle, ProgressBar};
use itertools::Itertools;
use log::{debug, info, warn};
use noodles::fasta;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Command;

#[cfg(test)]
mod tests;

/// Label given to sequences that are missing from a class file.
pub const UNKNOWN: &str = "unknown";

/// Returns true if `label` is empty or the [`UNKNOWN`] placeholder, in any case.
///
/// Such rows are never trained on and never count as a classification.
///
/// ```rust
/// use caribou::kmers::is_unlabelled;
/// assert!(is_unlabelled("Unknown"));
/// assert!(is_unlabelled(" "));
/// assert!(!is_unlabelled("Vibrio"));
/// ```
pub fn is_unlabelled(label: &str) -> bool {
    let label = label.trim();
    label.is_empty() || label.eq_ignore_ascii_case(UNKNOWN)
}

/// File name of the k-mer list written by a reference extraction.
pub const KMERS_LIST: &str = "kmers_list.txt";

// ----------------------------------------------------------------------------
// Arguments
// ----------------------------------------------------------------------------

/// Which [`KmerCounter`] implementation to use.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize, ValueEnum)]
pub enum CounterKind {
    /// Count in-process with [`NativeCounter`].
    #[default]
    Native,
    /// Run the external KMC tools with [`Kmc`].
    Kmc,
}

/// CLI arguments to extract k-mer profiles.
#[derive(Clone, Debug, Deserialize, Parser, Serialize)]
#[clap(about = "Extract k-mer profiles of reference, host, or metagenome sequences.")]
pub struct Args {
    /// Fasta file of the sequences to extract.
    #[clap(short = 's', long, required = true)]
    pub seq_file: PathBuf,

    /// Class file (csv/tsv) with an `id` column then one column per rank, coarsest first.
    #[clap(short = 'c', long)]
    pub cls_file: Option<PathBuf>,

    /// Name of the dataset, used to name files.
    #[clap(short = 'd', long, default_value = "dataset")]
    pub dataset_name: String,

    /// Fasta file of host sequences, extracted with the reference k-mers.
    #[clap(long)]
    pub seq_file_host: Option<PathBuf>,

    /// Class file of the host sequences.
    #[clap(long)]
    pub cls_file_host: Option<PathBuf>,

    /// Name of the host, used to name files.
    #[clap(long, default_value = "host")]
    pub host_name: String,

    /// Length of k-mers to extract.
    #[clap(short = 'k', long, required = true)]
    pub k: usize,

    /// File with one k-mer per line. Only these k-mers are extracted.
    #[clap(short = 'l', long)]
    pub kmers_list: Option<PathBuf>,

    /// Output directory, profiles are written in its `data` subdirectory.
    #[clap(short = 'o', long, required = true)]
    pub outdir: PathBuf,

    /// K-mer counter implementation.
    #[clap(long, value_enum, default_value_t = CounterKind::default())]
    pub counter: CounterKind,

    /// Drop k-mers seen fewer times than this in a sequence.
    #[clap(long, default_value_t = 1)]
    pub min_count: u32,

    /// Directory of the `kmc` and `kmc_tools` binaries (default: PATH).
    #[clap(long)]
    pub kmc_dir: Option<PathBuf>,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            seq_file: PathBuf::new(),
            cls_file: None,
            dataset_name: "dataset".to_string(),
            seq_file_host: None,
            cls_file_host: None,
            host_name: "host".to_string(),
            k: 0,
            kmers_list: None,
            outdir: PathBuf::new(),
            counter: CounterKind::default(),
            min_count: 1,
            kmc_dir: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Counters
// ----------------------------------------------------------------------------

/// Counts the k-mers of one sequence.
pub trait KmerCounter: Sync {
    /// K-mer length.
    fn k(&self) -> usize;
    /// Returns the count of every k-mer observed in `sequence`.
    fn count(&self, id: &str, sequence: &[u8]) -> Result<BTreeMap<String, u32>, Report>;
}

/// In-process counter over a sliding window.
///
/// Windows containing anything other than `ACGT` (case-insensitive) are skipped.
///
/// ```rust
/// use caribou::kmers::{KmerCounter, NativeCounter};
///
/// let counter = NativeCounter::new(3);
/// let counts = counter.count("seq", b"ACGTNACG")?;
/// // ACG and its reverse complement CGT collapse onto ACG
/// assert_eq!(counts.get("ACG"), Some(&3));
/// assert_eq!(counts.len(), 1);
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct NativeCounter {
    pub k: usize,
    /// Count a k-mer and its reverse complement as the same (lexicographically smallest) k-mer.
    pub canonical: bool,
    pub min_count: u32,
}

impl NativeCounter {
    pub fn new(k: usize) -> Self {
        NativeCounter { k, canonical: true, min_count: 1 }
    }
}

fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        other => other,
    }
}

impl KmerCounter for NativeCounter {
    fn k(&self) -> usize {
        self.k
    }

    fn count(&self, _id: &str, sequence: &[u8]) -> Result<BTreeMap<String, u32>, Report> {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        if self.k == 0 || sequence.len() < self.k {
            return Ok(counts);
        }

        for window in sequence.windows(self.k) {
            let forward = window.iter().map(|b| b.to_ascii_uppercase()).collect_vec();
            if !forward.iter().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T')) {
                continue;
            }
            let kmer = match self.canonical {
                true => {
                    let reverse = forward.iter().rev().map(|b| complement(*b)).collect_vec();
                    forward.min(reverse)
                }
                false => forward,
            };
            let kmer: String = kmer.into_iter().map(char::from).collect();
            let count = counts.entry(kmer).or_insert(0);
            *count = count.saturating_add(1);
        }

        counts.retain(|_kmer, count| *count >= self.min_count);
        Ok(counts)
    }
}

/// Counter that delegates to the external KMC tools (`kmc` + `kmc_tools transform ... dump`).
#[derive(Clone, Debug, PartialEq)]
pub struct Kmc {
    pub k: usize,
    pub min_count: u32,
    /// Directory of the binaries, [`None`] to search the PATH.
    pub bin_dir: Option<PathBuf>,
}

impl Kmc {
    fn binary(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    fn run(&self, binary: &str, args: &[String]) -> Result<(), Report> {
        let program = self.binary(binary);
        debug!("Running: {program:?} {}", args.join(" "));
        let output = Command::new(&program)
            .args(args)
            .output()
            .map_err(|source| Error::ArtifactIo { path: program.clone(), source })
            .suggestion("Is KMC installed? Set its location with --kmc-dir.")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::artifact_io(
                &program,
                format!("{binary} exited with {}: {}", output.status, stderr.trim()),
            )
            .into());
        }
        Ok(())
    }
}

impl KmerCounter for Kmc {
    fn k(&self) -> usize {
        self.k
    }

    fn count(&self, id: &str, sequence: &[u8]) -> Result<BTreeMap<String, u32>, Report> {
        let tmp = tempfile::tempdir().wrap_err("Failed to create a KMC working directory.")?;
        let fasta_path = tmp.path().join("sequence.fa");
        let db = tmp.path().join("db");
        let dump = tmp.path().join("dump.txt");

        let record = fasta::Record::new(
            fasta::record::Definition::new(id, None),
            fasta::record::Sequence::from(sequence.to_vec()),
        );
        let mut writer = File::create(&fasta_path).map(fasta::Writer::new)?;
        writer.write_record(&record)?;
        drop(writer);

        let path_arg = |p: &Path| p.to_string_lossy().to_string();
        let count_args = vec![
            format!("-k{}", self.k),
            "-fm".to_string(),
            format!("-ci{}", self.min_count),
            "-cs1000000000".to_string(),
            "-m10".to_string(),
            "-hp".to_string(),
            path_arg(&fasta_path),
            path_arg(&db),
            path_arg(tmp.path()),
        ];
        self.run("kmc", &count_args)?;
        let dump_args = vec!["transform".to_string(), path_arg(&db), "dump".to_string(), path_arg(&dump)];
        self.run("kmc_tools", &dump_args)?;

        // dump lines: <kmer>\t<count>
        let content = std::fs::read_to_string(&dump)
            .map_err(|source| Error::ArtifactIo { path: dump.clone(), source })?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let (kmer, count) = line
                    .split_once('\t')
                    .ok_or_else(|| eyre!("Malformed KMC dump line: {line:?}"))?;
                let count = count.trim().parse::<u32>().wrap_err_with(|| eyre!("Invalid count: {line:?}"))?;
                Ok::<_, Report>((kmer.to_string(), count))
            })
            .collect()
    }
}

/// Returns the counter selected by the arguments.
pub fn counter(args: &Args) -> Box<dyn KmerCounter> {
    match args.counter {
        CounterKind::Native => {
            Box::new(NativeCounter { k: args.k, canonical: true, min_count: args.min_count })
        }
        CounterKind::Kmc => {
            Box::new(Kmc { k: args.k, min_count: args.min_count, bin_dir: args.kmc_dir.clone() })
        }
    }
}

// ----------------------------------------------------------------------------
// Inputs
// ----------------------------------------------------------------------------

/// Read every record of a fasta file.
pub fn read_fasta<P>(path: &P) -> Result<Vec<fasta::Record>, Report>
where
    P: AsRef<Path> + Debug,
{
    let mut reader = File::open(path)
        .map(BufReader::new)
        .map(fasta::Reader::new)
        .map_err(|source| Error::ArtifactIo { path: path.as_ref().to_path_buf(), source })
        .wrap_err_with(|| format!("Failed to read: {path:?}"))?;
    let records = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .wrap_err_with(|| format!("Failed to parse fasta records: {path:?}"))?;
    Ok(records)
}

/// Read a k-mer list (one per line) and check that every k-mer has length `k`.
pub fn read_kmers_list<P>(path: &P, k: usize) -> Result<Vec<String>, Report>
where
    P: AsRef<Path> + Debug,
{
    let content = std::fs::read_to_string(path)
        .map_err(|source| Error::ArtifactIo { path: path.as_ref().to_path_buf(), source })?;
    let kmers = content.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect_vec();
    if let Some(kmer) = kmers.iter().find(|kmer| kmer.len() != k) {
        return Err(Error::Configuration(format!(
            "K-mer {kmer:?} of list {path:?} does not have length k={k}."
        )))
        .suggestion("Use the --k the list was extracted with.");
    }
    Ok(kmers)
}

/// Taxonomic classes of sequences, read from a class file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Classes {
    /// Rank names (lowercase), coarsest first.
    pub ranks: Vec<String>,
    /// Sequence id to labels, in the order of `ranks`.
    pub labels: BTreeMap<String, Vec<String>>,
}

impl Classes {
    /// Read a class file: an `id` column followed by one column per rank.
    pub fn read<P>(path: &P) -> Result<Self, Report>
    where
        P: AsRef<Path> + Debug,
    {
        let delimiter = utils::get_delimiter(path)?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .from_path(path)
            .wrap_err_with(|| format!("Failed to read class file: {path:?}"))?;

        let headers = reader.headers()?.clone();
        if headers.get(0).map(|h| h.to_lowercase()) != Some("id".to_string()) {
            return Err(Error::DataConsistency(format!(
                "The first column of class file {path:?} must be 'id', found: {:?}",
                headers.get(0)
            ))
            .into());
        }
        let ranks = headers.iter().skip(1).map(|h| h.trim().to_lowercase()).collect_vec();

        let mut labels = BTreeMap::new();
        for record in reader.records() {
            let record = record?;
            let id = record.get(0).unwrap_or_default().to_string();
            let row = (1..=ranks.len()).map(|i| record.get(i).unwrap_or_default().to_string());
            labels.insert(id, row.collect_vec());
        }

        Ok(Classes { ranks, labels })
    }

    /// Returns a table with one label column per rank.
    ///
    /// Sequences missing from the classes are labelled [`UNKNOWN`] at every rank.
    pub fn label_table(&self, table: &FeatureTable) -> Result<FeatureTable, Report> {
        let mut labelled = FeatureTable::new(table.kmers.clone());
        let mut missing = 0;
        for (i, id) in table.ids.iter().enumerate() {
            let row = match self.labels.get(id) {
                Some(row) => row.clone(),
                None => {
                    missing += 1;
                    vec![UNKNOWN.to_string(); self.ranks.len()]
                }
            };
            let labels = self.ranks.iter().cloned().zip(row).collect::<BTreeMap<_, _>>();
            labelled.add_row(id, table.counts[i].clone(), &labels)?;
        }
        if missing > 0 {
            warn!("{missing} sequence(s) are missing from the class file, labelled as '{UNKNOWN}'.");
        }
        // keep the declared columns even for a table without rows
        for rank in &self.ranks {
            labelled.labels.entry(rank.clone()).or_default();
        }
        Ok(labelled)
    }
}

// ----------------------------------------------------------------------------
// Extraction
// ----------------------------------------------------------------------------

/// Count the k-mers of every record in parallel and outer-join them by id.
///
/// With `kmers`, only those k-mer columns are kept ("given" mode), otherwise the
/// columns are the sorted union of the observed k-mers ("seen" mode).
pub fn count_records<C>(
    engine: &Engine,
    counter: &C,
    records: &[fasta::Record],
    kmers: Option<Vec<String>>,
) -> Result<FeatureTable, Report>
where
    C: KmerCounter + ?Sized,
{
    let progress_bar_style = ProgressStyle::with_template(
        "{bar:40} {pos}/{len} ({percent}%) | Sequences / Second: {per_sec} | Elapsed: {elapsed_precise}",
    )
    .wrap_err("Failed to create progress bar from template.")?;
    let progress_bar = ProgressBar::new(records.len() as u64);
    progress_bar.set_style(progress_bar_style);

    let profiles = engine.install(|| {
        records
            .par_iter()
            .map(|record| {
                let id = record.name().to_string();
                let counts = counter
                    .count(&id, record.sequence().as_ref())
                    .wrap_err_with(|| eyre!("Failed to count k-mers of: {id}"))?;
                progress_bar.inc(1);
                Ok((id, counts))
            })
            .collect::<Result<Vec<_>, Report>>()
    })?;
    progress_bar.finish_and_clear();

    Ok(FeatureTable::from_profiles(profiles, kmers))
}

/// Extract, label and persist the profile of one dataset into `data_dir`.
pub fn extract_dataset<C>(
    engine: &Engine,
    counter: &C,
    name: &str,
    fasta: &Path,
    classes: Option<&Classes>,
    kmers: Option<Vec<String>>,
    data_dir: &Path,
) -> Result<TaxonomicDataset, Report>
where
    C: KmerCounter + ?Sized,
{
    info!("Extracting k-mers of {name}: {fasta:?}");
    let records = read_fasta(&fasta)?;
    let table = count_records(engine, counter, &records, kmers)?;
    let (table, ranks) = match classes {
        Some(classes) => (classes.label_table(&table)?, classes.ranks.clone()),
        None => (table, Vec::new()),
    };

    let stem = file_stem(name, counter.k());
    let profile = data_dir.join(format!("{stem}.tsv.zst"));
    table.write(&profile)?;

    let dataset = TaxonomicDataset::from_table(
        name,
        counter.k(),
        ranks,
        &table,
        profile,
        vec![fasta.to_path_buf()],
    );
    dataset.write(&data_dir.join(format!("{stem}.json")))?;
    info!("Extracted {} k-mers of {} sequences for {name}.", table.kmers.len(), table.row_count());
    Ok(dataset)
}

/// The datasets produced by [`extract`].
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Extraction {
    pub dataset: TaxonomicDataset,
    pub host: Option<TaxonomicDataset>,
    /// Written when the k-mer columns were discovered ("seen" mode).
    pub kmers_list: Option<PathBuf>,
}

fn verify_inputs(args: &Args) -> Result<(), Report> {
    if args.k == 0 {
        return Err(Error::Configuration("K-mer length must be positive.".to_string()).into());
    }
    let files = [
        Some(&args.seq_file),
        args.cls_file.as_ref(),
        args.seq_file_host.as_ref(),
        args.cls_file_host.as_ref(),
        args.kmers_list.as_ref(),
    ];
    if let Some(file) = files.into_iter().flatten().find(|f| !f.exists()) {
        return Err(Error::Configuration(format!("Input file does not exist: {file:?}")).into());
    }
    if args.seq_file_host.is_some() != args.cls_file_host.is_some() {
        return Err(Error::Configuration(
            "Host extraction requires both --seq-file-host and --cls-file-host.".to_string(),
        )
        .into());
    }
    if args.cls_file.is_none() && args.kmers_list.is_none() {
        return Err(Error::Configuration(
            "Sequences without a class file must be extracted with a k-mer list.".to_string(),
        ))
        .suggestion("Pass the kmers_list.txt written by the reference extraction with --kmers-list.");
    }
    Ok(())
}

/// Extract the k-mer profiles described by the arguments.
///
/// The reference (or metagenome) is extracted first. A host is extracted with
/// the reference k-mer columns so that both profiles can be merged.
pub fn extract(engine: &Engine, args: &Args) -> Result<Extraction, Report> {
    verify_inputs(args)?;
    let given = args.kmers_list.as_ref().map(|path| read_kmers_list(path, args.k)).transpose()?;

    let outdirs = utils::Outdirs::create(&args.outdir)?;
    utils::write_json(args, &args.outdir.join("run_args.json"))?;
    let counter = counter(args);

    let classes = args.cls_file.as_ref().map(Classes::read).transpose()?;
    let seen = given.is_none();
    let dataset = extract_dataset(
        engine,
        counter.as_ref(),
        &args.dataset_name,
        &args.seq_file,
        classes.as_ref(),
        given,
        &outdirs.data,
    )?;

    let kmers_list = match seen {
        true => {
            let path = outdirs.data.join(KMERS_LIST);
            let content = dataset.kmers.iter().map(|k| format!("{k}\n")).join("");
            utils::write_atomic(&path, content.as_bytes())?;
            Some(path)
        }
        false => None,
    };

    let host = match (&args.seq_file_host, &args.cls_file_host) {
        (Some(seq_file), Some(cls_file)) => {
            let classes = Classes::read(cls_file)?;
            let host = extract_dataset(
                engine,
                counter.as_ref(),
                &args.host_name,
                seq_file,
                Some(&classes),
                Some(dataset.kmers.clone()),
                &outdirs.data,
            )?;
            Some(host)
        }
        _ => None,
    };

    Ok(Extraction { dataset, host, kmers_list })
}
