//! The execution [`Engine`]: a rayon thread pool with an explicit lifecycle.

use color_eyre::eyre::{Report, Result, WrapErr};
use log::debug;

/// Owns the worker pool used by leaf operations (k-mer counting, read simulation).
///
/// Started once by the binary and passed by reference to the operations that
/// need parallelism, so nothing relies on rayon's global pool.
///
/// ```rust
/// use caribou::Engine;
/// use rayon::prelude::*;
///
/// let engine = Engine::start(Some(2))?;
/// let total: u32 = engine.install(|| (1..=4_u32).into_par_iter().sum());
/// assert_eq!(total, 10);
/// engine.shutdown();
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
#[derive(Debug)]
pub struct Engine {
    pool: rayon::ThreadPool,
}

impl Engine {
    /// Start the engine with `threads` workers, or one per logical CPU when [`None`] (or 0).
    pub fn start(threads: Option<usize>) -> Result<Self, Report> {
        let threads = threads.filter(|t| *t > 0).unwrap_or_else(|| {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("caribou-worker-{i}"))
            .build()
            .wrap_err("Failed to start the thread pool.")?;
        debug!("Started engine with {threads} threads.");
        Ok(Engine { pool })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` inside the pool, parallel iterators in `op` use its workers.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// Stop the engine, workers exit once their queued jobs are finished.
    pub fn shutdown(self) {
        debug!("Shutting down engine with {} threads.", self.threads());
        drop(self.pool);
    }
}
