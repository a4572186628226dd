use std::sync::{Arc, Mutex, PoisonError};

use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Memory ceiling for buffered rows during stacking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum MemoryLimit {
    /// No ceiling configured: a conservative default block size is used.
    #[default]
    Unset,
    /// No ceiling at all: whole frames may be buffered.
    Unlimited,
    /// Absolute ceiling in bytes.
    Bytes(u64),
    /// Fraction of the currently available system memory (0.0..=1.0).
    AvailableRatio(f64),
}

impl MemoryLimit {
    /// Resolve the ceiling in bytes. `None` means no usable ceiling is known.
    pub fn resolve(&self) -> Option<u64> {
        match *self {
            Self::Unset => None,
            Self::Unlimited => Some(u64::MAX),
            Self::Bytes(b) => Some(b),
            Self::AvailableRatio(ratio) => {
                let available = available_memory();
                if available == 0 || ratio.is_nan() || ratio <= 0.0 {
                    None
                } else {
                    Some((available as f64 * ratio.min(1.0)) as u64)
                }
            }
        }
    }
}

impl std::fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unset => write!(f, "Default"),
            Self::Unlimited => write!(f, "Unlimited"),
            Self::Bytes(b) => write!(f, "{} MiB", b / (1024 * 1024)),
            Self::AvailableRatio(r) => write!(f, "{:.0}% of available", r * 100.0),
        }
    }
}

fn available_memory() -> u64 {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_memory();
    sys.available_memory()
}

/// Explicit execution parameters handed to every numeric entry point.
///
/// Clones share one worker pool, built on the first [`install`](Self::install).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ComputeContext {
    /// Worker threads; 0 means one per logical core.
    #[serde(default)]
    pub threads: usize,
    #[serde(default)]
    pub memory: MemoryLimit,
    #[serde(skip)]
    pool: Arc<Mutex<Option<Arc<ThreadPool>>>>,
}

impl PartialEq for ComputeContext {
    fn eq(&self, other: &Self) -> bool {
        self.threads == other.threads && self.memory == other.memory
    }
}

impl ComputeContext {
    pub fn new(threads: usize, memory: MemoryLimit) -> Self {
        Self {
            threads,
            memory,
            ..Default::default()
        }
    }

    /// Single-threaded context with no memory ceiling, handy for tests and small buffers.
    pub fn sequential() -> Self {
        Self::new(1, MemoryLimit::Unlimited)
    }

    /// Effective number of worker threads.
    pub fn thread_count(&self) -> usize {
        if self.threads == 0 {
            rayon::current_num_threads().max(1)
        } else {
            self.threads
        }
    }

    /// Run `op` on a pool sized for this context.
    ///
    /// With `threads == 0`, or when already on a worker of a pool that size,
    /// `op` runs on the current thread.
    pub fn install<R, F>(&self, op: F) -> Result<R>
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        if self.threads == 0
            || (rayon::current_thread_index().is_some()
                && rayon::current_num_threads() == self.threads)
        {
            return Ok(op());
        }
        Ok(self.pool()?.install(op))
    }

    /// The cached pool, rebuilt if `threads` changed since it was built.
    fn pool(&self) -> Result<Arc<ThreadPool>> {
        let mut slot = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = slot.as_ref() {
            if pool.current_num_threads() == self.threads {
                return Ok(Arc::clone(pool));
            }
        }
        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(self.threads)
                .build()?,
        );
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }
}
