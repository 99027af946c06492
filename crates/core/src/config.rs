//! Store configuration.
//!
//! Plain option structs with documented defaults; every resource bound the
//! executor honors comes from here.

use std::time::Duration;
use triad_model::{Result, StoreError};
use triad_vm::QueryLimits;

/// Options for opening a [`crate::db::triple_db::TripleDb`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Per-query resource bounds. Default: [`QueryLimits::default`].
    pub query_limits: QueryLimits,
    /// Number of prepared plans kept by the plan cache.
    ///
    /// Default: 256
    pub plan_cache_capacity: usize,
    /// How often the snapshot registry sweeps for expired entries.
    ///
    /// Default: 60 s
    pub snapshot_sweep_interval: Duration,
    /// TTL applied when a snapshot is created without an explicit one.
    ///
    /// Default: 5 min
    pub default_snapshot_ttl: Duration,
    /// Collect statistics on first query when none are persisted.
    ///
    /// Default: true
    pub collect_stats_on_first_query: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            query_limits: QueryLimits::default(),
            plan_cache_capacity: 256,
            snapshot_sweep_interval: Duration::from_secs(60),
            default_snapshot_ttl: Duration::from_secs(300),
            collect_stats_on_first_query: true,
        }
    }
}

/// Per-query execution options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Deadline for the whole query. `None` means no deadline.
    pub timeout: Option<Duration>,
    /// Evaluate against a snapshot taken at call time instead of the live
    /// state.
    pub snapshot_isolation: bool,
}

/// How aggressively the bulk loader batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryBudget {
    /// 1 000 triples per batch.
    Low,
    /// 10 000 triples per batch.
    Medium,
    /// 50 000 triples per batch.
    High,
    /// The loader default (currently the same as `Medium`).
    #[default]
    Auto,
}

impl MemoryBudget {
    pub fn batch_size(self) -> usize {
        match self {
            MemoryBudget::Low => 1_000,
            MemoryBudget::Medium => 10_000,
            MemoryBudget::High => 50_000,
            MemoryBudget::Auto => LoaderOptions::DEFAULT_BATCH_SIZE,
        }
    }
}

/// Bulk-load configuration.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Triples per batch, clamped to [100, 100 000].
    ///
    /// Default: 10 000
    pub batch_size: usize,
    /// Preset that overrides `batch_size` when not `Auto`.
    pub memory_budget: MemoryBudget,
    /// Write batches without syncing the WAL and flush once at the end.
    ///
    /// Default: false
    pub bulk_mode: bool,
    /// Fire the progress callback every this many batches.
    ///
    /// Default: 1
    pub progress_every: usize,
}

impl LoaderOptions {
    pub const DEFAULT_BATCH_SIZE: usize = 10_000;
    pub const MIN_BATCH_SIZE: usize = 100;
    pub const MAX_BATCH_SIZE: usize = 100_000;

    /// The effective batch size after presets and clamping.
    pub fn effective_batch_size(&self) -> usize {
        let size = match self.memory_budget {
            MemoryBudget::Auto => self.batch_size,
            preset => preset.batch_size(),
        };
        size.clamp(Self::MIN_BATCH_SIZE, Self::MAX_BATCH_SIZE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.progress_every == 0 {
            return Err(StoreError::InvalidConfig(
                "progress_every must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: Self::DEFAULT_BATCH_SIZE,
            memory_budget: MemoryBudget::Auto,
            bulk_mode: false,
            progress_every: 1,
        }
    }
}
