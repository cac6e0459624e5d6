//! Create, manipulate, and persist a k-mer [`FeatureTable`].
//!
//! A [`FeatureTable`] holds one row per sequence: a row id, one count per k-mer
//! column, and any number of label columns (one per taxonomic rank). Counts are
//! stored row-major, labels column-major.

use color_eyre::eyre::{eyre, Report, Result, WrapErr};
use itertools::Itertools;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;


/// Header of the row id column.
pub const ID: &str = "id";

/// Returns true if a column name is a k-mer (only nucleotide characters).
///
/// ```
/// use caribou_table::is_kmer;
/// assert!(is_kmer("ACGT"));
/// assert!(!is_kmer("domain"));
/// assert!(!is_kmer(""));
/// ```
pub fn is_kmer(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T' | b'N'))
}

/// A table of k-mer counts with taxonomic label columns.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct FeatureTable {
    /// Row (sequence) ids.
    pub ids: Vec<String>,
    /// Names of the k-mer columns.
    pub kmers: Vec<String>,
    /// K-mer counts, one vector per row, in the order of `kmers`.
    pub counts: Vec<Vec<u32>>,
    /// Label columns, one vector per column, in the order of `ids`.
    pub labels: BTreeMap<String, Vec<String>>,
    /// Optional file path for where the table was read from.
    pub path: Option<PathBuf>,
}

impl FeatureTable {
    /// Returns a new empty [`FeatureTable`] over the k-mer columns.
    ///
    /// ```
    /// let table = caribou_table::FeatureTable::new(vec!["AA".to_string(), "AC".to_string()]);
    /// assert_eq!(table.row_count(), 0);
    /// assert_eq!(table.kmers, ["AA", "AC"]);
    /// ```
    pub fn new(kmers: Vec<String>) -> Self {
        FeatureTable { kmers, ..Default::default() }
    }

    /// Returns a [`FeatureTable`] built from sparse per-sequence k-mer profiles.
    ///
    /// This is an outer join on the sequence id: k-mers that a sequence did not
    /// contain are filled with zero. If `kmers` is [`None`], the columns are the
    /// sorted union of all observed k-mers, otherwise only the given k-mers are kept.
    ///
    /// ```
    /// use caribou_table::FeatureTable;
    /// use std::collections::BTreeMap;
    ///
    /// let a = BTreeMap::from([("AA".to_string(), 2), ("AC".to_string(), 1)]);
    /// let b = BTreeMap::from([("GT".to_string(), 4)]);
    /// let table = FeatureTable::from_profiles(vec![("a".into(), a), ("b".into(), b)], None);
    ///
    /// assert_eq!(table.kmers, ["AA", "AC", "GT"]);
    /// assert_eq!(table.counts, [[2, 1, 0], [0, 0, 4]]);
    /// ```
    pub fn from_profiles(
        profiles: Vec<(String, BTreeMap<String, u32>)>,
        kmers: Option<Vec<String>>,
    ) -> Self {
        let kmers = kmers.unwrap_or_else(|| {
            profiles.iter().flat_map(|(_id, p)| p.keys().cloned()).unique().sorted().collect()
        });

        let mut table = FeatureTable::new(kmers);
        for (id, profile) in profiles {
            let counts = table.kmers.iter().map(|k| profile.get(k).copied().unwrap_or(0)).collect();
            table.ids.push(id);
            table.counts.push(counts);
        }
        table
    }

    /// Returns the number of rows.
    pub fn row_count(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Add a new row to the table.
    ///
    /// The label keys of the first row define the label columns of an empty
    /// table, every following row must provide exactly the same columns.
    ///
    /// ```
    /// use caribou_table::FeatureTable;
    /// use std::collections::BTreeMap;
    ///
    /// let mut table = FeatureTable::new(vec!["AA".to_string()]);
    /// let labels = BTreeMap::from([("domain".to_string(), "Bacteria".to_string())]);
    /// table.add_row("seq_1", vec![3], &labels)?;
    ///
    /// assert_eq!(table.label_column("domain")?, ["Bacteria"]);
    /// assert!(table.add_row("seq_2", vec![1, 2], &labels).is_err());
    /// # Ok::<(), color_eyre::eyre::Report>(())
    /// ```
    pub fn add_row(
        &mut self,
        id: &str,
        counts: Vec<u32>,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Report> {
        let (ex, new) = (self.kmers.len(), counts.len());
        if ex != new {
            return Err(eyre!("New row size ({new}) does not match the k-mer columns ({ex})."));
        }

        if self.ids.is_empty() && self.labels.is_empty() {
            labels.keys().for_each(|k| {
                self.labels.insert(k.clone(), Vec::new());
            });
        }
        if !self.labels.keys().eq(labels.keys()) {
            return Err(eyre!(
                "Row labels {:?} do not match the label columns {:?}.",
                labels.keys().collect_vec(),
                self.labels.keys().collect_vec()
            ));
        }

        self.ids.push(id.to_string());
        self.counts.push(counts);
        labels.iter().for_each(|(k, v)| {
            if let Some(column) = self.labels.get_mut(k) {
                column.push(v.clone());
            }
        });
        Ok(())
    }

    /// Returns the values of a label column.
    pub fn label_column(&self, column: &str) -> Result<&[String], Report> {
        self.labels
            .get(column)
            .map(|c| c.as_slice())
            .ok_or_else(|| eyre!("Column '{column}' was not found in table: {:?}.", self.path))
    }

    /// Returns the label of a row under a label column, if both exist.
    pub fn label(&self, column: &str, row: usize) -> Option<&str> {
        self.labels.get(column).and_then(|c| c.get(row)).map(|s| s.as_str())
    }

    /// Returns a new table with only the rows at `indices`, in that order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        FeatureTable {
            ids: indices.iter().map(|i| self.ids[*i].clone()).collect(),
            kmers: self.kmers.clone(),
            counts: indices.iter().map(|i| self.counts[*i].clone()).collect(),
            labels: self
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), indices.iter().map(|i| v[*i].clone()).collect()))
                .collect(),
            path: None,
        }
    }

    /// Returns the rows whose id is in `ids`, keeping table order.
    pub fn filter_by_ids(&self, ids: &BTreeSet<String>) -> Self {
        let indices = self.ids.iter().positions(|id| ids.contains(id)).collect_vec();
        self.select_rows(&indices)
    }

    /// Returns a random sample where each row is kept with probability `fraction`.
    ///
    /// The sample can be empty, even for a non-empty table.
    pub fn sample_fraction<R>(&self, fraction: f64, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        let fraction = fraction.clamp(0.0, 1.0);
        let indices = (0..self.row_count()).filter(|_| rng.gen_bool(fraction)).collect_vec();
        self.select_rows(&indices)
    }

    /// Returns a random sample of `count` rows (or all rows if fewer), keeping table order.
    ///
    /// ```
    /// use caribou_table::FeatureTable;
    /// use rand::{rngs::StdRng, SeedableRng};
    /// use std::collections::BTreeMap;
    ///
    /// let mut table = FeatureTable::new(vec!["A".to_string()]);
    /// for i in 0..10 {
    ///     table.add_row(&format!("seq_{i}"), vec![i], &BTreeMap::new())?;
    /// }
    /// let mut rng = StdRng::seed_from_u64(1);
    /// assert_eq!(table.sample_count(3, &mut rng).row_count(), 3);
    /// assert_eq!(table.sample_count(30, &mut rng).row_count(), 10);
    /// # Ok::<(), color_eyre::eyre::Report>(())
    /// ```
    pub fn sample_count<R>(&self, count: usize, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        let count = count.min(self.row_count());
        let mut indices = rand::seq::index::sample(rng, self.row_count(), count).into_vec();
        indices.sort_unstable();
        self.select_rows(&indices)
    }

    /// Returns the union (row concatenation) of two tables with identical columns.
    pub fn union(&self, other: &FeatureTable) -> Result<Self, Report> {
        if self.kmers != other.kmers {
            return Err(eyre!(
                "Cannot union tables with different k-mer columns ({} vs {}).",
                self.kmers.len(),
                other.kmers.len()
            ));
        }
        if !self.labels.keys().eq(other.labels.keys()) {
            return Err(eyre!(
                "Cannot union tables with different label columns ({:?} vs {:?}).",
                self.labels.keys().collect_vec(),
                other.labels.keys().collect_vec()
            ));
        }

        let mut table = self.clone();
        table.path = None;
        table.ids.extend(other.ids.iter().cloned());
        table.counts.extend(other.counts.iter().cloned());
        for (column, values) in table.labels.iter_mut() {
            values.extend(other.labels[column].iter().cloned());
        }
        Ok(table)
    }

    /// Drops label and/or k-mer columns by name. Unknown names are ignored.
    pub fn drop_columns(&mut self, names: &[&str]) {
        self.labels.retain(|column, _| !names.contains(&column.as_str()));

        let keep = self.kmers.iter().positions(|k| !names.contains(&k.as_str())).collect_vec();
        if keep.len() != self.kmers.len() {
            self.kmers = keep.iter().map(|i| self.kmers[*i].clone()).collect();
            self.counts.iter_mut().for_each(|row| {
                *row = keep.iter().map(|i| row[*i]).collect();
            });
        }
    }

    /// Returns a copy that keeps only the listed label columns, which must exist.
    ///
    /// ```
    /// use caribou_table::FeatureTable;
    /// use std::collections::BTreeMap;
    ///
    /// let mut table = FeatureTable::new(vec!["A".to_string()]);
    /// let labels = BTreeMap::from([
    ///     ("domain".to_string(), "Bacteria".to_string()),
    ///     ("genus".to_string(), "Vibrio".to_string()),
    /// ]);
    /// table.add_row("seq_1", vec![1], &labels)?;
    ///
    /// let domain = table.select_labels(&["domain"])?;
    /// assert_eq!(domain.labels.keys().collect::<Vec<_>>(), ["domain"]);
    /// assert!(table.select_labels(&["species"]).is_err());
    /// # Ok::<(), color_eyre::eyre::Report>(())
    /// ```
    pub fn select_labels(&self, keep: &[&str]) -> Result<Self, Report> {
        if let Some(missing) = keep.iter().find(|k| !self.labels.contains_key(**k)) {
            return Err(eyre!("Column '{missing}' was not found in table: {:?}.", self.path));
        }
        let mut table = self.clone();
        let drop = self
            .labels
            .keys()
            .filter(|k| !keep.contains(&k.as_str()))
            .map(|k| k.as_str())
            .collect_vec();
        table.drop_columns(&drop);
        Ok(table)
    }

    /// Rewrites every value of a label column with `f`.
    pub fn map_labels<F>(&mut self, column: &str, mut f: F) -> Result<(), Report>
    where
        F: FnMut(&str) -> String,
    {
        let path = self.path.clone();
        let values = self
            .labels
            .get_mut(column)
            .ok_or_else(|| eyre!("Column '{column}' was not found in table: {path:?}."))?;
        values.iter_mut().for_each(|v| *v = f(v));
        Ok(())
    }

    /// Read a [`FeatureTable`] from a tab-separated file, zstd compressed if the extension is `.zst`.
    ///
    /// The first column must be `id`. Columns made only of nucleotide characters
    /// are k-mers, all others are labels. Empty counts are read as zero.
    pub fn read<P>(path: &P) -> Result<Self, Report>
    where
        P: AsRef<Path> + Debug,
    {
        let file = File::open(path).wrap_err_with(|| eyre!("Failed to read file: {path:?}"))?;
        let mut table = if is_compressed(path.as_ref()) {
            let decoder = zstd::stream::read::Decoder::new(file)
                .wrap_err_with(|| eyre!("Failed to decode: {path:?}"))?;
            Self::read_records(decoder)
        } else {
            Self::read_records(file)
        }
        .wrap_err_with(|| eyre!("Failed to parse table: {path:?}"))?;

        table.path = Some(path.as_ref().to_path_buf());
        Ok(table)
    }

    fn read_records<R: Read>(reader: R) -> Result<Self, Report> {
        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_reader(reader);
        let headers = reader.headers()?.clone();

        if headers.get(0) != Some(ID) {
            return Err(eyre!("The first column must be '{ID}', found: {:?}", headers.get(0)));
        }

        // split columns into k-mers and labels
        let (mut kmer_i, mut label_i) = (Vec::new(), Vec::new());
        headers.iter().enumerate().skip(1).for_each(|(i, h)| match is_kmer(h) {
            true => kmer_i.push(i),
            false => label_i.push(i),
        });

        let mut table = FeatureTable::new(kmer_i.iter().map(|i| headers[*i].to_string()).collect());
        label_i.iter().for_each(|i| {
            table.labels.insert(headers[*i].to_string(), Vec::new());
        });

        for record in reader.records() {
            let record = record?;
            let id = record.get(0).unwrap_or_default().to_string();
            let counts = kmer_i
                .iter()
                .map(|i| parse_count(record.get(*i).unwrap_or_default()))
                .collect::<Result<Vec<_>, Report>>()
                .wrap_err_with(|| eyre!("Failed to parse counts of row: {id}"))?;
            for i in &label_i {
                let value = record.get(*i).unwrap_or_default().to_string();
                if let Some(column) = table.labels.get_mut(&headers[*i]) {
                    column.push(value);
                }
            }
            table.ids.push(id);
            table.counts.push(counts);
        }

        Ok(table)
    }

    /// Write the [`FeatureTable`] as a tab-separated file, zstd compressed if the extension is `.zst`.
    ///
    /// The file is written to a temporary file in the same directory and then
    /// renamed, so `path` either holds the complete table or does not exist.
    ///
    /// ```
    /// use caribou_table::FeatureTable;
    /// use std::collections::BTreeMap;
    ///
    /// let dir = tempfile::tempdir()?;
    /// let path = dir.path().join("table.tsv.zst");
    ///
    /// let mut table = FeatureTable::new(vec!["AC".to_string(), "GT".to_string()]);
    /// let labels = BTreeMap::from([("domain".to_string(), "Archaea".to_string())]);
    /// table.add_row("seq_1", vec![5, 0], &labels)?;
    /// table.write(&path)?;
    ///
    /// let observed = FeatureTable::read(&path)?;
    /// assert_eq!(observed.counts, table.counts);
    /// assert_eq!(observed.labels, table.labels);
    /// # Ok::<(), color_eyre::eyre::Report>(())
    /// ```
    pub fn write<P>(&self, path: &P) -> Result<(), Report>
    where
        P: AsRef<Path> + Debug,
    {
        let dir = match path.as_ref().parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .wrap_err_with(|| eyre!("Failed to create directory: {dir:?}"))?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .wrap_err_with(|| eyre!("Failed to create temporary file in: {dir:?}"))?;

        if is_compressed(path.as_ref()) {
            let encoder = zstd::stream::write::Encoder::new(&mut tmp, 0)?;
            let encoder = self.write_records(encoder)?;
            encoder.finish().wrap_err_with(|| eyre!("Failed to compress: {path:?}"))?;
        } else {
            self.write_records(&mut tmp)?;
        }

        tmp.persist(path).map_err(|e| e.error).wrap_err_with(|| eyre!("Failed to write: {path:?}"))?;
        Ok(())
    }

    fn write_records<W: Write>(&self, writer: W) -> Result<W, Report> {
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);

        let headers = std::iter::once(ID)
            .chain(self.kmers.iter().map(|k| k.as_str()))
            .chain(self.labels.keys().map(|k| k.as_str()))
            .collect_vec();
        writer.write_record(&headers)?;

        for (i, id) in self.ids.iter().enumerate() {
            let counts = self.counts[i].iter().map(|c| c.to_string());
            let labels = self.labels.values().map(|column| column[i].clone());
            let row = std::iter::once(id.clone()).chain(counts).chain(labels).collect_vec();
            writer.write_record(&row)?;
        }

        writer.into_inner().map_err(|e| eyre!("Failed to flush table rows: {}", e.error()))
    }
}

fn is_compressed(path: &Path) -> bool {
    path.extension().map(|ext| ext == "zst").unwrap_or(false)
}

fn parse_count(value: &str) -> Result<u32, Report> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0);
    }
    match value.parse::<u32>() {
        Ok(count) => Ok(count),
        // counts written by dataframe tools can be floats (ex. 3.0)
        Err(_) => {
            let count: f64 = value.parse().wrap_err_with(|| eyre!("Invalid count: {value:?}"))?;
            Ok(count.max(0.0).round() as u32)
        }
    }
}
