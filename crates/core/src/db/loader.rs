//! Batched bulk insert.
//!
//! The pipeline has two stages: canonicalization of terms runs on the rayon
//! pool (it is pure CPU), then each prepared batch goes through the single
//! serial writer, which probes the dictionary, allocates ids and commits
//! dictionary rows and the three index keys per triple in one batch. In
//! bulk mode batches skip the WAL sync and one explicit flush at the end
//! makes the whole load durable.

use crate::config::LoaderOptions;
use crate::db::coordinator::{Coordinator, PreparedTriple, WriteRequest};
use crate::db::dictionary::{prepare_term, Dictionary};
use crate::kv::KvStore;
use crate::metrics::METRICS;
use rayon::prelude::*;
use std::time::Instant;
use triad_model::{Result, Term, Triple};

/// Progress callback verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Continue,
    Halt,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub triples_loaded: u64,
    pub batch_no: u64,
    pub elapsed_ms: u64,
    /// Triples per second since the load started.
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Complete {
        count: u64,
    },
    /// The progress callback cancelled; everything counted is durable.
    Halted {
        count: u64,
    },
    /// The final bulk-mode flush failed; `count` triples were submitted and
    /// the caller may retry the flush.
    FlushFailed {
        count: u64,
        reason: String,
    },
}

pub type ProgressCallback<'a> = &'a mut dyn FnMut(&ProgressEvent) -> Progress;

pub fn load(
    coordinator: &Coordinator,
    kv: &dyn KvStore,
    dict: &Dictionary,
    label: &str,
    triples: impl IntoIterator<Item = Triple>,
    options: &LoaderOptions,
    mut progress: Option<ProgressCallback<'_>>,
) -> Result<LoadOutcome> {
    options.validate()?;
    let batch_size = options.effective_batch_size();
    let sync = !options.bulk_mode;
    let started = Instant::now();

    let mut loaded = 0u64;
    let mut batch_no = 0u64;
    let mut halted = false;
    let mut buffer: Vec<Triple> = Vec::with_capacity(batch_size);
    let mut source = triples.into_iter();

    loop {
        buffer.clear();
        buffer.extend(source.by_ref().take(batch_size));
        if buffer.is_empty() {
            break;
        }
        batch_no += 1;

        // Stage 1, parallel: canonical bytes per term.
        let prepared: Vec<PreparedTriple> = buffer
            .par_iter()
            .map(|triple| PreparedTriple {
                subject: prepare_term(&Term::from(triple.subject.clone())),
                predicate: prepare_term(&Term::NamedNode(triple.predicate.clone())),
                object: prepare_term(&triple.object),
            })
            .collect();

        // Stage 2, serial: allocate, build index keys, commit.
        let outcome = coordinator.submit(WriteRequest::LoadBatch {
            triples: prepared,
            sync,
        })?;
        loaded += outcome.affected;
        METRICS
            .triples_loaded
            .with_label_values(&[label])
            .inc_by(outcome.affected);

        if let Some(callback) = progress.as_mut() {
            if batch_no % options.progress_every as u64 == 0 {
                let elapsed = started.elapsed();
                let event = ProgressEvent {
                    triples_loaded: loaded,
                    batch_no,
                    elapsed_ms: elapsed.as_millis() as u64,
                    rate: loaded as f64 / elapsed.as_secs_f64().max(1e-9),
                };
                if callback(&event) == Progress::Halt {
                    halted = true;
                    break;
                }
            }
        }
    }

    dict.persist_counter_file();

    // In bulk mode nothing was synced along the way; one flush makes the
    // whole load (or the prefix of a halted one) durable.
    if options.bulk_mode {
        if let Err(e) = kv.flush_wal(true) {
            log::error!("bulk load flush failed after {loaded} triples: {e}");
            return Ok(LoadOutcome::FlushFailed {
                count: loaded,
                reason: e.to_string(),
            });
        }
    }

    log::info!(
        "loaded {loaded} triples in {} batches ({:?})",
        batch_no,
        started.elapsed()
    );
    Ok(if halted {
        LoadOutcome::Halted { count: loaded }
    } else {
        LoadOutcome::Complete { count: loaded }
    })
}
