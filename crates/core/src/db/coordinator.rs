//! The transaction coordinator: one writer thread owning every mutation.
//!
//! Requests arrive over a channel with a bounded reply slot and are applied
//! serially, each as a single atomic KV batch, so rollback is simply the
//! batch being discarded. After every write that changed at least one
//! triple the coordinator invalidates the plan cache and runs the
//! statistics refresh hook before replying — a query issued after a write
//! returns therefore observes both the data and the invalidation.

use crate::db::dictionary::{Dictionary, EncodedTerm};
use crate::db::index;
use crate::db::plan_cache::PlanCache;
use crate::db::reader::{ReaderView, StoreReader};
use crate::db::stats::Statistics;
use crate::kv::KvStore;
use crate::metrics::METRICS;
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use triad_model::{Result, StoreError, Term, Triple};
use triad_vm::{
    evaluate_pattern, results, Binding, DeleteInsert, ExecutionContext, IdTriple, QueryLimits,
};

/// A triple whose terms are already canonicalized, produced by the
/// loader's parallel stage.
#[derive(Debug, Clone)]
pub struct PreparedTriple {
    pub subject: EncodedTerm,
    pub predicate: EncodedTerm,
    pub object: EncodedTerm,
}

pub enum WriteRequest {
    Insert(Vec<Triple>),
    Delete(Vec<Triple>),
    Update {
        update: DeleteInsert,
        timeout: Option<Duration>,
    },
    LoadBatch {
        triples: Vec<PreparedTriple>,
        sync: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Triples actually added or removed; duplicate inserts and absent
    /// deletes contribute nothing.
    pub affected: u64,
}

/// Net effect of one applied request.
struct Applied {
    added: u64,
    removed: u64,
}

/// Everything the writer thread owns a handle to.
pub struct WriterContext {
    pub kv: Arc<dyn KvStore>,
    pub dict: Arc<Dictionary>,
    /// The cached statistics record, swapped on refresh.
    pub stats: Arc<RwLock<Arc<Statistics>>>,
    /// Bumped whenever cached statistics change; plans remember the
    /// generation they were built against.
    pub stats_generation: Arc<AtomicU64>,
    pub plan_cache: Arc<PlanCache>,
    /// Live triple count, maintained incrementally.
    pub triple_count: Arc<AtomicU64>,
    pub limits: QueryLimits,
    pub label: String,
}

enum Envelope {
    Request(WriteRequest, Sender<Result<WriteOutcome>>),
    Shutdown,
}

pub struct Coordinator {
    tx: Sender<Envelope>,
    handle: Option<JoinHandle<()>>,
}

impl Coordinator {
    pub fn spawn(ctx: WriterContext) -> Self {
        let (tx, rx) = unbounded::<Envelope>();
        let handle = std::thread::Builder::new()
            .name("triad-writer".into())
            .spawn(move || {
                for envelope in rx {
                    match envelope {
                        Envelope::Request(request, reply) => {
                            let outcome = apply(&ctx, request);
                            // A receiver that went away already has its
                            // answer in the durable state.
                            let _ = reply.send(outcome);
                        }
                        Envelope::Shutdown => break,
                    }
                }
            })
            .expect("spawn writer thread");
        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Submit a write and wait for it to commit (or fail).
    pub fn submit(&self, request: WriteRequest) -> Result<WriteOutcome> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(Envelope::Request(request, reply_tx))
            .map_err(|_| StoreError::StoreClosed)?;
        reply_rx.recv().map_err(|_| StoreError::StoreClosed)?
    }

    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.tx.send(Envelope::Shutdown);
            let _ = handle.join();
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn apply(ctx: &WriterContext, request: WriteRequest) -> Result<WriteOutcome> {
    let applied = match request {
        WriteRequest::Insert(triples) => insert(ctx, &triples, true)?,
        WriteRequest::Delete(triples) => delete(ctx, &triples)?,
        WriteRequest::Update { update, timeout } => apply_update(ctx, &update, timeout)?,
        WriteRequest::LoadBatch { triples, sync } => load_batch(ctx, &triples, sync)?,
    };
    let affected = applied.added + applied.removed;
    if affected > 0 {
        // Plan cache first, then the stats refresh, so no later query can
        // observe the new data through a stale plan.
        ctx.plan_cache.invalidate_all();
        let count = ctx.triple_count.load(Ordering::Acquire) + applied.added - applied.removed;
        ctx.triple_count.store(count, Ordering::Release);
        {
            let mut cached = ctx.stats.write();
            let mut stats = (**cached).clone();
            stats.triple_count = count;
            *cached = Arc::new(stats);
        }
        ctx.stats_generation.fetch_add(1, Ordering::AcqRel);
        METRICS.writes_applied.with_label_values(&[&ctx.label]).inc();
    }
    Ok(WriteOutcome { affected })
}

fn triple_terms(triple: &Triple) -> [Term; 3] {
    [
        Term::from(triple.subject.clone()),
        Term::NamedNode(triple.predicate.clone()),
        triple.object.clone(),
    ]
}

fn insert(ctx: &WriterContext, triples: &[Triple], sync: bool) -> Result<Applied> {
    let mut batch = ctx.dict.batch();
    let mut ops_tail = Vec::new();
    let mut staged: FxHashSet<IdTriple> = FxHashSet::default();
    for triple in triples {
        let [s, p, o] = triple_terms(triple);
        let id_triple = IdTriple::new(
            batch.encode_new(&s)?,
            batch.encode_new(&p)?,
            batch.encode_new(&o)?,
        );
        if staged.contains(&id_triple) || index::contains(ctx.kv.as_ref(), id_triple)? {
            continue;
        }
        staged.insert(id_triple);
        index::insert_ops(id_triple, &mut ops_tail);
    }
    let mut ops = batch.finish();
    ops.extend(ops_tail);
    if !ops.is_empty() {
        ctx.kv.write_batch(ops, sync)?;
    }
    Ok(Applied {
        added: staged.len() as u64,
        removed: 0,
    })
}

fn delete(ctx: &WriterContext, triples: &[Triple]) -> Result<Applied> {
    let mut ops = Vec::new();
    let mut staged: FxHashSet<IdTriple> = FxHashSet::default();
    for triple in triples {
        let [s, p, o] = triple_terms(triple);
        // A term the dictionary has never seen cannot be part of a stored
        // triple, so the delete is a no-op.
        let (Some(s), Some(p), Some(o)) = (
            ctx.dict.lookup(&s)?,
            ctx.dict.lookup(&p)?,
            ctx.dict.lookup(&o)?,
        ) else {
            continue;
        };
        let id_triple = IdTriple::new(s, p, o);
        if staged.contains(&id_triple) || !index::contains(ctx.kv.as_ref(), id_triple)? {
            continue;
        }
        staged.insert(id_triple);
        index::delete_ops(id_triple, &mut ops);
    }
    if !ops.is_empty() {
        ctx.kv.write_batch(ops, true)?;
    }
    Ok(Applied {
        added: 0,
        removed: staged.len() as u64,
    })
}

fn load_batch(ctx: &WriterContext, triples: &[PreparedTriple], sync: bool) -> Result<Applied> {
    let mut batch = ctx.dict.batch();
    let mut ops_tail = Vec::new();
    let mut staged: FxHashSet<IdTriple> = FxHashSet::default();
    for prepared in triples {
        let id_triple = IdTriple::new(
            batch.encode_prepared(&prepared.subject)?,
            batch.encode_prepared(&prepared.predicate)?,
            batch.encode_prepared(&prepared.object)?,
        );
        if staged.contains(&id_triple) || index::contains(ctx.kv.as_ref(), id_triple)? {
            continue;
        }
        staged.insert(id_triple);
        index::insert_ops(id_triple, &mut ops_tail);
    }
    let mut ops = batch.finish();
    ops.extend(ops_tail);
    if !ops.is_empty() {
        ctx.kv.write_batch(ops, sync)?;
    }
    Ok(Applied {
        added: staged.len() as u64,
        removed: 0,
    })
}

/// DELETE/INSERT driven by a WHERE pattern. The pattern is evaluated over
/// a snapshot taken before any mutation, so the update reads a consistent
/// pre-state; deletes apply before inserts, and a triple that is both
/// deleted and re-inserted nets out to no change.
fn apply_update(
    ctx: &WriterContext,
    update: &DeleteInsert,
    timeout: Option<Duration>,
) -> Result<Applied> {
    let snapshot: Arc<dyn crate::kv::KvSnapshot> = Arc::from(ctx.kv.snapshot()?);
    let stats = ctx.stats.read().clone();
    let reader = StoreReader::new(
        ReaderView::Snapshot(snapshot),
        ctx.dict.clone(),
        stats,
        ctx.label.clone(),
    );
    let exec = match timeout {
        Some(t) => ExecutionContext::with_timeout(ctx.limits, t),
        None => ExecutionContext::new(ctx.limits),
    };

    let bindings: Vec<Binding> = match &update.pattern {
        Some(pattern) => {
            let optimized = triad_vm::optimize_pattern(&reader, pattern);
            evaluate_pattern(&reader, &exec, &optimized)?.collect::<Result<_>>()?
        }
        None => vec![Binding::new()],
    };

    let mut delete_set: FxHashSet<IdTriple> = FxHashSet::default();
    let mut insert_terms: Vec<Triple> = Vec::new();
    for binding in &bindings {
        for template in &update.delete {
            if let Some(triple) = results::instantiate(&reader, template, binding)? {
                let [s, p, o] = triple_terms(&triple);
                if let (Some(s), Some(p), Some(o)) = (
                    ctx.dict.lookup(&s)?,
                    ctx.dict.lookup(&p)?,
                    ctx.dict.lookup(&o)?,
                ) {
                    let id_triple = IdTriple::new(s, p, o);
                    if index::contains(ctx.kv.as_ref(), id_triple)? {
                        delete_set.insert(id_triple);
                    }
                }
            }
        }
        for template in &update.insert {
            if let Some(triple) = results::instantiate(&reader, template, binding)? {
                insert_terms.push(triple);
            }
        }
    }

    let mut batch = ctx.dict.batch();
    let mut ops_tail = Vec::new();
    let mut inserted: FxHashSet<IdTriple> = FxHashSet::default();
    for triple in &insert_terms {
        let [s, p, o] = triple_terms(triple);
        let id_triple = IdTriple::new(
            batch.encode_new(&s)?,
            batch.encode_new(&p)?,
            batch.encode_new(&o)?,
        );
        if inserted.contains(&id_triple) {
            continue;
        }
        if delete_set.remove(&id_triple) {
            // Deleted and re-inserted by the same update: net no change.
            continue;
        }
        if index::contains(ctx.kv.as_ref(), id_triple)? {
            continue;
        }
        inserted.insert(id_triple);
        index::insert_ops(id_triple, &mut ops_tail);
    }
    for id_triple in &delete_set {
        index::delete_ops(*id_triple, &mut ops_tail);
    }

    let mut ops = batch.finish();
    ops.extend(ops_tail);
    if !ops.is_empty() {
        ctx.kv.write_batch(ops, true)?;
    }
    Ok(Applied {
        added: inserted.len() as u64,
        removed: delete_set.len() as u64,
    })
}
