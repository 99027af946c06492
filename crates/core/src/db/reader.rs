//! The executor's view of one store: live handle or snapshot, plus the
//! dictionary and the statistics the optimizer consults.

use crate::db::dictionary::Dictionary;
use crate::db::{estimation, index, stats::Statistics};
use crate::kv::{KvRead, KvSnapshot, KvStore};
use crate::metrics::METRICS;
use prometheus::core::{AtomicU64, GenericCounter};
use std::sync::Arc;
use triad_model::{Result, Term, TermId};
use triad_vm::datastore::IdTripleIter;
use triad_vm::{Datastore, EstimatePattern, IdPattern, IdTriple, InlineIntRange};

pub enum ReaderView {
    Live(Arc<dyn KvStore>),
    Snapshot(Arc<dyn KvSnapshot>),
}

impl ReaderView {
    fn kv(&self) -> &dyn KvRead {
        match self {
            ReaderView::Live(kv) => kv.as_ref(),
            ReaderView::Snapshot(snapshot) => snapshot.as_ref(),
        }
    }
}

/// A read view over the store implementing the executor's datastore
/// contract. Dictionary reads go to the live dictionary even under a
/// snapshot: rows are immutable and never deleted, so ids referenced by a
/// snapshot always resolve, and terms interned after the snapshot simply
/// match nothing in it.
pub struct StoreReader {
    view: ReaderView,
    dict: Arc<Dictionary>,
    stats: Arc<Statistics>,
    label: String,
}

impl StoreReader {
    pub fn new(
        view: ReaderView,
        dict: Arc<Dictionary>,
        stats: Arc<Statistics>,
        label: String,
    ) -> Self {
        Self {
            view,
            dict,
            stats,
            label,
        }
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }
}

/// Counts keys as they stream by, flushing into the metric when the scan
/// drops.
struct CountingIter<'a> {
    inner: IdTripleIter<'a>,
    counter: GenericCounter<AtomicU64>,
    seen: u64,
}

impl<'a> Iterator for CountingIter<'a> {
    type Item = Result<IdTriple>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next();
        if item.is_some() {
            self.seen += 1;
        }
        item
    }
}

impl Drop for CountingIter<'_> {
    fn drop(&mut self) {
        self.counter.inc_by(self.seen);
    }
}

impl Datastore for StoreReader {
    fn scan(&self, pattern: IdPattern) -> Result<IdTripleIter<'_>> {
        let inner = index::scan(self.view.kv(), pattern)?;
        Ok(Box::new(CountingIter {
            inner,
            counter: METRICS.keys_scanned.with_label_values(&[&self.label]),
            seen: 0,
        }))
    }

    fn scan_object_range(
        &self,
        subject: Option<TermId>,
        predicate: TermId,
        range: InlineIntRange,
    ) -> Option<Result<IdTripleIter<'_>>> {
        self.stats.numeric_histogram(predicate)?;
        METRICS.range_scans.with_label_values(&[&self.label]).inc();
        Some(
            index::range_scan(self.view.kv(), subject, predicate, range).map(|inner| {
                Box::new(CountingIter {
                    inner,
                    counter: METRICS
                        .range_keys_scanned
                        .with_label_values(&[&self.label]),
                    seen: 0,
                }) as IdTripleIter<'_>
            }),
        )
    }

    fn decode(&self, id: TermId) -> Result<Term> {
        self.dict.decode(id)
    }

    fn lookup(&self, term: &Term) -> Result<Option<TermId>> {
        self.dict.lookup(term)
    }

    fn estimate(&self, pattern: &EstimatePattern) -> u64 {
        estimation::estimate(&self.stats, pattern)
    }

    fn has_numeric_histogram(&self, predicate: TermId) -> bool {
        self.stats.numeric_histogram(predicate).is_some()
    }

    fn range_selectivity(&self, predicate: TermId, range: InlineIntRange) -> f64 {
        self.stats.range_selectivity(predicate, range)
    }

    fn triple_count(&self) -> u64 {
        self.stats.triple_count
    }

    fn contains(&self, triple: IdTriple) -> Result<bool> {
        index::contains(self.view.kv(), triple)
    }
}
