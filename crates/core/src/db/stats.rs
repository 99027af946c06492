//! Cost statistics: global counts, per-predicate cardinalities, and
//! equi-width histograms over inline-numeric objects.
//!
//! Collection runs full scans over the three indices; since each index is
//! sorted by the position of interest, distinct counts fall out of counting
//! run transitions. The record persists as one JSON blob under the reserved
//! statistics key of `id2str`.

use crate::db::dictionary::{reserved_key, STATS_KEY};
use crate::kv::{ColumnFamily, KvRead, KvStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use triad_model::id::IdTag;
use triad_model::{Result, StoreError, TermId};
use triad_vm::InlineIntRange;

pub const STATS_VERSION: u32 = 1;
pub const BUCKET_COUNT: u64 = 32;

/// Equi-width bucket counts over the inline-integer objects of one
/// predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram {
    pub min: i64,
    pub max: i64,
    pub bucket_width: u64,
    pub buckets: Vec<u64>,
    pub total: u64,
}

impl Histogram {
    fn new(min: i64, max: i64) -> Self {
        let span = (max as i128 - min as i128 + 1) as u64;
        let bucket_width = span.div_ceil(BUCKET_COUNT).max(1);
        let buckets = vec![0; span.div_ceil(bucket_width) as usize];
        Self {
            min,
            max,
            bucket_width,
            buckets,
            total: 0,
        }
    }

    fn add(&mut self, value: i64) {
        let offset = (value as i128 - self.min as i128) as u64;
        let index = (offset / self.bucket_width) as usize;
        if let Some(bucket) = self.buckets.get_mut(index) {
            *bucket += 1;
            self.total += 1;
        }
    }

    /// Estimated fraction of this predicate's numeric objects falling in
    /// `range`, assuming uniformity inside each bucket. Clamped to [0, 1].
    pub fn selectivity(&self, range: InlineIntRange) -> f64 {
        if self.total == 0 || range.min > range.max {
            return 0.0;
        }
        let width = self.bucket_width as i128;
        let mut matched = 0.0f64;
        for (i, count) in self.buckets.iter().enumerate() {
            let lo = self.min as i128 + i as i128 * width;
            let hi = (lo + width - 1).min(self.max as i128);
            let overlap_lo = lo.max(range.min as i128);
            let overlap_hi = hi.min(range.max as i128);
            if overlap_lo > overlap_hi {
                continue;
            }
            let fraction = (overlap_hi - overlap_lo + 1) as f64 / (hi - lo + 1) as f64;
            matched += *count as f64 * fraction;
        }
        (matched / self.total as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Statistics {
    pub triple_count: u64,
    pub distinct_s: u64,
    pub distinct_p: u64,
    pub distinct_o: u64,
    /// Triples per predicate, keyed by the raw predicate id.
    pub predicate_histogram: HashMap<u64, u64>,
    /// Numeric histograms, keyed by the raw predicate id.
    pub numeric_histograms: HashMap<u64, Histogram>,
    pub collected_at_ms: u64,
    pub version: u32,
}

impl Statistics {
    pub fn predicate_count(&self, predicate: TermId) -> Option<u64> {
        self.predicate_histogram.get(&predicate.as_u64()).copied()
    }

    pub fn numeric_histogram(&self, predicate: TermId) -> Option<&Histogram> {
        self.numeric_histograms.get(&predicate.as_u64())
    }

    pub fn range_selectivity(&self, predicate: TermId, range: InlineIntRange) -> f64 {
        self.numeric_histogram(predicate)
            .map_or(1.0, |h| h.selectivity(range))
    }
}

struct NumericSpread {
    min: i64,
    max: i64,
    count: u64,
}

/// Full statistics collection: SPO for distinct subjects, POS for
/// predicates and the numeric min/max pass, OSP for distinct objects, then
/// a second POS pass per numeric predicate to fill the buckets.
pub fn collect(kv: &dyn KvRead) -> Result<Statistics> {
    let mut stats = Statistics {
        version: STATS_VERSION,
        collected_at_ms: now_ms(),
        ..Statistics::default()
    };

    // SPO: total count and distinct leading ids.
    let mut previous: Option<[u8; 8]> = None;
    for entry in kv.prefix_iter(ColumnFamily::Spo, &[])? {
        let (key, _) = entry?;
        stats.triple_count += 1;
        if let Some(first) = leading_id(&key) {
            if previous != Some(first) {
                stats.distinct_s += 1;
                previous = Some(first);
            }
        }
    }

    // POS: distinct predicates, per-predicate counts, numeric spreads.
    let mut spreads: HashMap<u64, NumericSpread> = HashMap::new();
    let mut previous: Option<[u8; 8]> = None;
    for entry in kv.prefix_iter(ColumnFamily::Pos, &[])? {
        let (key, _) = entry?;
        let Some(first) = leading_id(&key) else {
            continue;
        };
        if previous != Some(first) {
            stats.distinct_p += 1;
            previous = Some(first);
        }
        let predicate = u64::from_be_bytes(first);
        *stats.predicate_histogram.entry(predicate).or_insert(0) += 1;

        if let Some(value) = object_of_pos_key(&key).and_then(TermId::as_integer) {
            spreads
                .entry(predicate)
                .and_modify(|s| {
                    s.min = s.min.min(value);
                    s.max = s.max.max(value);
                    s.count += 1;
                })
                .or_insert(NumericSpread {
                    min: value,
                    max: value,
                    count: 1,
                });
        }
    }

    // OSP: distinct objects.
    let mut previous: Option<[u8; 8]> = None;
    for entry in kv.prefix_iter(ColumnFamily::Osp, &[])? {
        let (key, _) = entry?;
        if let Some(first) = leading_id(&key) {
            if previous != Some(first) {
                stats.distinct_o += 1;
                previous = Some(first);
            }
        }
    }

    // Second pass per numeric predicate: place each value in its bucket.
    for (predicate, spread) in spreads {
        if spread.count == 0 {
            continue;
        }
        let mut histogram = Histogram::new(spread.min, spread.max);
        for entry in kv.prefix_iter(ColumnFamily::Pos, &predicate.to_be_bytes())? {
            let (key, _) = entry?;
            if let Some(value) = object_of_pos_key(&key).and_then(TermId::as_integer) {
                histogram.add(value);
            }
        }
        stats.numeric_histograms.insert(predicate, histogram);
    }

    Ok(stats)
}

pub fn persist(kv: &dyn KvStore, stats: &Statistics) -> Result<()> {
    let blob = serde_json::to_vec(stats).map_err(|e| StoreError::Internal(e.to_string()))?;
    kv.put(ColumnFamily::Id2Str, &reserved_key(STATS_KEY), &blob)
}

pub fn load(kv: &dyn KvRead) -> Result<Option<Statistics>> {
    match kv.get(ColumnFamily::Id2Str, &reserved_key(STATS_KEY))? {
        Some(blob) => {
            let stats =
                serde_json::from_slice(&blob).map_err(|e| StoreError::CorruptionDetected {
                    context: "statistics blob".into(),
                    detail: e.to_string(),
                })?;
            Ok(Some(stats))
        }
        None => Ok(None),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn leading_id(key: &[u8]) -> Option<[u8; 8]> {
    key.get(..8)?.try_into().ok()
}

fn object_of_pos_key(key: &[u8]) -> Option<TermId> {
    let bytes: [u8; 8] = key.get(8..16)?.try_into().ok()?;
    let id = TermId::from_be_bytes(bytes);
    (id.tag() == IdTag::Integer).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::index;
    use crate::kv::memory::MemoryBackend;
    use std::sync::Arc;
    use triad_vm::IdTriple;

    fn iri(n: u64) -> TermId {
        TermId::from_parts(IdTag::Iri, n)
    }

    fn populated() -> Arc<MemoryBackend> {
        let kv = MemoryBackend::new();
        let mut ops = Vec::new();
        let (p_type, p_age) = (iri(1), iri(2));
        for i in 0..10u64 {
            index::insert_ops(IdTriple::new(iri(100 + i), p_type, iri(500)), &mut ops);
        }
        for i in 0..100i64 {
            index::insert_ops(
                IdTriple::new(
                    iri(100 + i as u64),
                    p_age,
                    TermId::inline_integer(i).unwrap(),
                ),
                &mut ops,
            );
        }
        use crate::kv::KvStore;
        kv.write_batch(ops, false).unwrap();
        kv
    }

    #[test]
    fn counts_and_distincts() {
        let kv = populated();
        let stats = collect(kv.as_ref()).unwrap();
        assert_eq!(stats.triple_count, 110);
        assert_eq!(stats.distinct_s, 100);
        assert_eq!(stats.distinct_p, 2);
        // 500 plus the hundred distinct integers.
        assert_eq!(stats.distinct_o, 101);
        assert_eq!(stats.predicate_count(iri(1)), Some(10));
        assert_eq!(stats.predicate_count(iri(2)), Some(100));
        assert_eq!(stats.version, STATS_VERSION);
        assert!(stats.collected_at_ms > 0);
    }

    #[test]
    fn numeric_histogram_covers_the_value_spread() {
        let kv = populated();
        let stats = collect(kv.as_ref()).unwrap();
        let h = stats.numeric_histogram(iri(2)).expect("age histogram");
        assert_eq!((h.min, h.max), (0, 99));
        assert_eq!(h.total, 100);
        assert_eq!(h.buckets.iter().sum::<u64>(), 100);
        // The type predicate has no numeric objects.
        assert!(stats.numeric_histogram(iri(1)).is_none());
    }

    #[test]
    fn selectivity_estimates_uniform_ranges() {
        let kv = populated();
        let stats = collect(kv.as_ref()).unwrap();
        let h = stats.numeric_histogram(iri(2)).unwrap();
        let est = h.selectivity(InlineIntRange { min: 0, max: 49 });
        assert!((est - 0.5).abs() < 0.1, "estimate {est}");
        assert_eq!(h.selectivity(InlineIntRange { min: 200, max: 300 }), 0.0);
        assert!((h.selectivity(InlineIntRange { min: 0, max: 99 }) - 1.0).abs() < 1e-9);
        // Degenerate range.
        assert_eq!(h.selectivity(InlineIntRange { min: 5, max: 4 }), 0.0);
    }

    #[test]
    fn persistence_roundtrip() {
        let kv = populated();
        let stats = collect(kv.as_ref()).unwrap();
        persist(kv.as_ref(), &stats).unwrap();
        let loaded = load(kv.as_ref()).unwrap().expect("persisted stats");
        assert_eq!(loaded, stats);
    }

    #[test]
    fn absent_stats_load_as_none() {
        let kv = MemoryBackend::new();
        assert!(load(kv.as_ref()).unwrap().is_none());
    }

    #[test]
    fn negative_values_histogram() {
        let kv = MemoryBackend::new();
        let mut ops = Vec::new();
        let p = iri(3);
        for v in -50i64..50 {
            index::insert_ops(
                IdTriple::new(iri(1000 + (v + 50) as u64), p, TermId::inline_integer(v).unwrap()),
                &mut ops,
            );
        }
        use crate::kv::KvStore;
        kv.write_batch(ops, false).unwrap();

        let stats = collect(kv.as_ref()).unwrap();
        let h = stats.numeric_histogram(p).unwrap();
        assert_eq!((h.min, h.max), (-50, 49));
        assert_eq!(h.total, 100);
        let est = h.selectivity(InlineIntRange { min: -50, max: -1 });
        assert!((est - 0.5).abs() < 0.1, "estimate {est}");
    }
}
