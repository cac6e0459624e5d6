use clap::ValueEnum;
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// Verbosity
// -----------------------------------------------------------------------------

/// The output verbosity level, passed to `env_logger` through `RUST_LOG`.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize, ValueEnum)]
pub enum Verbosity {
    #[default]
    Info,
    Warn,
    Debug,
    Trace,
    Error,
}

impl Verbosity {
    /// Returns the `RUST_LOG` filter: our own crates at this level, dependencies at warn.
    ///
    /// ```rust
    /// use caribou::Verbosity;
    /// assert_eq!(Verbosity::Debug.filter(), "warn,caribou=debug,caribou_table=debug");
    /// ```
    pub fn filter(&self) -> String {
        format!("warn,caribou={self},caribou_table={self}")
    }
}

impl std::fmt::Display for Verbosity {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // Convert to lowercase for RUST_LOG env var compatibility
        let lowercase = format!("{:?}", self).to_lowercase();
        write!(f, "{lowercase}")
    }
}
