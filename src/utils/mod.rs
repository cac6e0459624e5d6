//! Path, delimiter, and atomic file helpers shared by all commands.

pub mod verbosity;

use crate::error::Error;
use color_eyre::eyre::{eyre, ContextCompat, Report, Result, WrapErr};
use color_eyre::Help;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[cfg(test)]
mod tests;

/// Get delimiter based on file extension.
///
/// - `.tsv` => `\t`
/// - `.txt` => `\t`
/// - `.csv` => `,`
///
/// Note that `.txt` is assumed to be tab-delimited!
///
/// ```rust
/// use caribou::utils::get_delimiter;
///
/// assert_eq!(get_delimiter(&"classes.tsv")?, b'\t');
/// assert_eq!(get_delimiter(&"classes.csv")?, b',');
/// assert!(get_delimiter(&"classes").is_err());
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
pub fn get_delimiter<P>(path: &P) -> Result<u8, Report>
where
    P: AsRef<Path> + Debug,
{
    let ext = path
        .as_ref()
        .extension()
        .wrap_err_with(|| format!("Failed to get file extension: {path:?}"))?
        .to_str()
        .wrap_err_with(|| format!("Failed to convert file extension to str: {path:?}"))?;
    match ext {
        "tsv" | "txt" => Ok(b'\t'),
        "csv" => Ok(b','),
        _ext => {
            Err(eyre!("Unknown file extension: {_ext:?}").suggestion("Options: tsv, csv, or txt"))
        }
    }
}

/// Create the parent directory of a file path, if it doesn't exist yet.
pub fn create_parent_dir<P>(path: &P) -> Result<PathBuf, Report>
where
    P: AsRef<Path> + Debug,
{
    let dir = match path.as_ref().parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.exists() {
        std::fs::create_dir_all(&dir)
            .map_err(|source| Error::ArtifactIo { path: dir.clone(), source })?;
    }
    Ok(dir)
}

/// Write bytes to a temporary file next to `path`, then rename it into place.
///
/// Readers never observe a partially written file at `path`.
pub fn write_atomic<P>(path: &P, content: &[u8]) -> Result<(), Report>
where
    P: AsRef<Path> + Debug,
{
    let dir = create_parent_dir(path)?;
    let io_error = |source: std::io::Error| Error::ArtifactIo { path: path.as_ref().to_path_buf(), source };

    let mut file = NamedTempFile::new_in(&dir).map_err(io_error)?;
    file.write_all(content).map_err(io_error)?;
    file.persist(path).map_err(|e| io_error(e.error))?;
    Ok(())
}

/// Read any deserializable value from a JSON file.
pub fn read_json<T, P>(path: &P) -> Result<T, Report>
where
    T: DeserializeOwned,
    P: AsRef<Path> + Debug,
{
    let input = std::fs::read_to_string(path)
        .map_err(|source| Error::ArtifactIo { path: path.as_ref().to_path_buf(), source })?;
    let value = serde_json::from_str(&input)
        .wrap_err_with(|| format!("Failed to deserialize JSON file: {path:?}"))?;
    Ok(value)
}

/// Write any serializable value to a JSON file, atomically.
pub fn write_json<T, P>(value: &T, path: &P) -> Result<(), Report>
where
    T: Serialize + Debug,
    P: AsRef<Path> + Debug,
{
    let output = serde_json::to_string_pretty(value)
        .wrap_err_with(|| format!("Failed to serialize: {value:?}"))?;
    write_atomic(path, format!("{output}\n").as_bytes())
}

// ----------------------------------------------------------------------------
// Output Directories
// ----------------------------------------------------------------------------

/// The output directory layout: extracted features, trained models, and results.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Outdirs {
    /// K-mer profiles, dataset summaries and holdout splits.
    pub data: PathBuf,
    /// Trained classifiers.
    pub models: PathBuf,
    /// Classification results and evaluation metrics.
    pub results: PathBuf,
}

impl Outdirs {
    /// Returns the layout under `root` without touching the filesystem.
    ///
    /// ```rust
    /// use caribou::utils::Outdirs;
    /// use std::path::PathBuf;
    ///
    /// let outdirs = Outdirs::new(&"output");
    /// assert_eq!(outdirs.models, PathBuf::from("output/models"));
    /// ```
    pub fn new<P>(root: &P) -> Self
    where
        P: AsRef<Path> + Debug,
    {
        let root = root.as_ref();
        Outdirs { data: root.join("data"), models: root.join("models"), results: root.join("results") }
    }

    /// Returns the layout under `root` and creates every directory of it.
    pub fn create<P>(root: &P) -> Result<Self, Report>
    where
        P: AsRef<Path> + Debug,
    {
        let outdirs = Self::new(root);
        for dir in [&outdirs.data, &outdirs.models, &outdirs.results] {
            std::fs::create_dir_all(dir)
                .map_err(|source| Error::ArtifactIo { path: dir.clone(), source })
                .wrap_err_with(|| eyre!("Failed to create output directory: {dir:?}"))?;
        }
        Ok(outdirs)
    }
}
