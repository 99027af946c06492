//! The store facade: open/close, writes through the coordinator, queries
//! through the plan cache, optimizer and executor, snapshots through the
//! registry.

use crate::config::{LoaderOptions, QueryOptions, StoreOptions};
use crate::db::coordinator::{Coordinator, WriteRequest, WriterContext};
use crate::db::dictionary::Dictionary;
use crate::db::loader::{self, LoadOutcome, ProgressCallback};
use crate::db::plan_cache::{PlanCache, PreparedPlan};
use crate::db::reader::{ReaderView, StoreReader};
use crate::db::snapshot_registry::{SnapshotGuard, SnapshotRegistry};
use crate::db::{index, stats};
use crate::kv::memory::MemoryBackend;
use crate::kv::rocks::RocksBackend;
use crate::kv::KvStore;
use crate::metrics::METRICS;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use triad_model::{Result, StoreError, Triple};
use triad_vm::{
    evaluate_query, fingerprint, optimize_query, DeleteInsert, ExecutionContext, Query,
    QueryResults, QuerySolution, TruncationKind,
};

/// Fully materialized query results, decoded through the dictionary.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResultsOwned {
    Solutions(Vec<QuerySolution>),
    Boolean(bool),
    Graph(Vec<Triple>),
}

/// The results of one query together with the bounded-result flag: when
/// `truncated` is set, a resource bound tripped and the result is a partial
/// answer, not a complete one.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub results: QueryResultsOwned,
    pub truncated: bool,
}

static MEMORY_STORE_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct TripleDb {
    kv: Arc<dyn KvStore>,
    dict: Arc<Dictionary>,
    stats: Arc<RwLock<Arc<stats::Statistics>>>,
    stats_generation: Arc<AtomicU64>,
    stats_missing: Mutex<bool>,
    plan_cache: Arc<PlanCache>,
    coordinator: Coordinator,
    registry: Arc<SnapshotRegistry>,
    triple_count: Arc<AtomicU64>,
    options: StoreOptions,
    label: String,
    closed: AtomicBool,
}

impl TripleDb {
    /// Open (or create) a persistent store. The RocksDB files live under
    /// `<path>/data`; the secondary counter file sits adjacent to them.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(|e| StoreError::OpenFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let kv: Arc<dyn KvStore> = RocksBackend::open(path.join("data"))?;
        let label = path.display().to_string();
        let counter_file = Some(path.join("counters.json"));
        Self::start(kv, counter_file, label, options)
    }

    /// An ephemeral store over the in-memory backend.
    pub fn open_in_memory(options: StoreOptions) -> Result<Self> {
        let kv: Arc<dyn KvStore> = MemoryBackend::new();
        let label = format!("memory-{}", MEMORY_STORE_SEQ.fetch_add(1, Ordering::Relaxed));
        Self::start(kv, None, label, options)
    }

    fn start(
        kv: Arc<dyn KvStore>,
        counter_file: Option<std::path::PathBuf>,
        label: String,
        options: StoreOptions,
    ) -> Result<Self> {
        let dict = Arc::new(Dictionary::open(kv.clone(), counter_file)?);

        let persisted = stats::load(kv.as_ref())?;
        let stats_missing = persisted.is_none();
        let exact_count = index::count(kv.as_ref())?;
        let mut initial = persisted.unwrap_or_default();
        initial.triple_count = exact_count;
        let stats = Arc::new(RwLock::new(Arc::new(initial)));
        let stats_generation = Arc::new(AtomicU64::new(0));
        let triple_count = Arc::new(AtomicU64::new(exact_count));

        let plan_cache = Arc::new(PlanCache::new(options.plan_cache_capacity, label.clone()));
        let registry = SnapshotRegistry::new(options.snapshot_sweep_interval, label.clone());
        let coordinator = Coordinator::spawn(WriterContext {
            kv: kv.clone(),
            dict: dict.clone(),
            stats: stats.clone(),
            stats_generation: stats_generation.clone(),
            plan_cache: plan_cache.clone(),
            triple_count: triple_count.clone(),
            limits: options.query_limits,
            label: label.clone(),
        });

        Ok(Self {
            kv,
            dict,
            stats,
            stats_generation,
            stats_missing: Mutex::new(stats_missing),
            plan_cache,
            coordinator,
            registry,
            triple_count,
            options,
            label,
            closed: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) || !self.kv.is_open() {
            return Err(StoreError::StoreClosed);
        }
        Ok(())
    }

    pub fn triple_count(&self) -> u64 {
        self.triple_count.load(Ordering::Acquire)
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    /// Insert triples; duplicates are no-ops. Returns the number actually
    /// added.
    pub fn insert(&self, triples: Vec<Triple>) -> Result<u64> {
        self.check_open()?;
        Ok(self
            .coordinator
            .submit(WriteRequest::Insert(triples))?
            .affected)
    }

    /// Delete exact triples; absent ones are no-ops. Returns the number
    /// actually removed.
    pub fn delete(&self, triples: Vec<Triple>) -> Result<u64> {
        self.check_open()?;
        Ok(self
            .coordinator
            .submit(WriteRequest::Delete(triples))?
            .affected)
    }

    /// Apply a DELETE/INSERT-WHERE update.
    pub fn update(&self, update: DeleteInsert, timeout: Option<Duration>) -> Result<u64> {
        self.check_open()?;
        Ok(self
            .coordinator
            .submit(WriteRequest::Update { update, timeout })?
            .affected)
    }

    /// Bulk load through the batched loader pipeline.
    pub fn load(
        &self,
        triples: impl IntoIterator<Item = Triple>,
        options: &LoaderOptions,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<LoadOutcome> {
        self.check_open()?;
        loader::load(
            &self.coordinator,
            self.kv.as_ref(),
            &self.dict,
            &self.label,
            triples,
            options,
            progress,
        )
    }

    /// Run a query: plan cache, optimizer, executor, result shaping.
    pub fn query(&self, query: &Query, options: &QueryOptions) -> Result<QueryOutcome> {
        self.check_open()?;
        self.ensure_statistics()?;

        let generation = self.stats_generation.load(Ordering::Acquire);
        let fp = fingerprint(query);
        let snapshot_guard = if options.snapshot_isolation {
            Some(
                self.registry
                    .create(self.kv.as_ref(), "query", self.options.default_snapshot_ttl)?,
            )
        } else {
            None
        };
        let view = match &snapshot_guard {
            Some(guard) => ReaderView::Snapshot(guard.view()),
            None => ReaderView::Live(self.kv.clone()),
        };
        let reader = StoreReader::new(
            view,
            self.dict.clone(),
            self.stats.read().clone(),
            self.label.clone(),
        );

        let plan = match self.plan_cache.get(fp) {
            Some(plan) if plan.stats_generation == generation => plan,
            _ => self.plan_cache.insert(
                fp,
                PreparedPlan {
                    query: optimize_query(&reader, query),
                    stats_generation: generation,
                },
            ),
        };

        let ctx = match options.timeout {
            Some(timeout) => ExecutionContext::with_timeout(self.options.query_limits, timeout),
            None => ExecutionContext::new(self.options.query_limits),
        };

        let results = match evaluate_query(&reader, &ctx, &plan.query)? {
            QueryResults::Solutions(solutions) => {
                QueryResultsOwned::Solutions(solutions.collect::<Result<_>>()?)
            }
            QueryResults::Boolean(b) => QueryResultsOwned::Boolean(b),
            QueryResults::Graph(triples) => {
                QueryResultsOwned::Graph(triples.collect::<Result<_>>()?)
            }
        };

        self.report_truncations(&ctx);
        Ok(QueryOutcome {
            results,
            truncated: ctx.truncated(),
        })
    }

    fn report_truncations(&self, ctx: &ExecutionContext) {
        const KINDS: [(TruncationKind, &str); 6] = [
            (TruncationKind::PathDepth, "path_depth"),
            (TruncationKind::PathFrontier, "path_frontier"),
            (TruncationKind::PathVisited, "path_visited"),
            (TruncationKind::PathResults, "path_results"),
            (TruncationKind::NodeEnumeration, "node_enumeration"),
            (TruncationKind::Describe, "describe"),
        ];
        for (kind, name) in KINDS {
            let trips = ctx.trip_count(kind);
            if trips > 0 {
                METRICS
                    .query_truncations
                    .with_label_values(&[&self.label, name])
                    .inc_by(trips);
            }
        }
    }

    /// Recompute and persist the full statistics record.
    pub fn refresh_statistics(&self) -> Result<()> {
        self.check_open()?;
        let collected = stats::collect(self.kv.as_ref())?;
        stats::persist(self.kv.as_ref(), &collected)?;
        self.triple_count
            .store(collected.triple_count, Ordering::Release);
        *self.stats.write() = Arc::new(collected);
        self.stats_generation.fetch_add(1, Ordering::AcqRel);
        self.plan_cache.invalidate_all();
        *self.stats_missing.lock() = false;
        log::info!("statistics refreshed for {}", self.label);
        Ok(())
    }

    /// First-query statistics collection when none were persisted.
    fn ensure_statistics(&self) -> Result<()> {
        if !self.options.collect_stats_on_first_query {
            return Ok(());
        }
        let mut missing = self.stats_missing.lock();
        if !*missing {
            return Ok(());
        }
        *missing = false;
        drop(missing);
        self.refresh_statistics()
    }

    /// Register a caller-owned snapshot with a TTL; the guard releases it
    /// on drop, the registry sweep is the backstop.
    pub fn snapshot(&self, owner: impl Into<String>, ttl: Option<Duration>) -> Result<SnapshotGuard> {
        self.check_open()?;
        self.registry.create(
            self.kv.as_ref(),
            owner,
            ttl.unwrap_or(self.options.default_snapshot_ttl),
        )
    }

    /// The snapshot registry, for scoped [`SnapshotRegistry::with_snapshot`]
    /// use.
    pub fn snapshots(&self) -> &SnapshotRegistry {
        &self.registry
    }

    pub fn plan_cache_len(&self) -> usize {
        self.plan_cache.len()
    }

    /// Flush, persist counters, stop the writer and the sweeper.
    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.coordinator.shutdown();
        self.registry.close();
        self.dict.persist_counter_file();
        self.kv.flush_wal(true)?;
        log::info!("closed store {}", self.label);
        Ok(())
    }
}

impl Drop for TripleDb {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            log::warn!("error while closing store {}: {e}", self.label);
        }
    }
}
