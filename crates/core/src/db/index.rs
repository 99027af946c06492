//! The three redundant triple indices.
//!
//! Every key is exactly 24 bytes: three big-endian ids in the order the
//! column family is named after, with empty values. Big-endian keys make
//! lexicographic order coincide with id order, which is what lets prefix
//! scans answer every pattern shape and lets range scans walk inline
//! integers in value order.

use crate::kv::{BatchOp, ColumnFamily, KvRead};
use bytes::BufMut;
use triad_model::{Result, StoreError, TermId};
use triad_vm::{IdPattern, IdSlot, IdTriple, InlineIntRange};

pub type IdTripleIter<'a> = Box<dyn Iterator<Item = Result<IdTriple>> + 'a>;

pub const KEY_LEN: usize = 24;

fn key3(a: TermId, b: TermId, c: TermId) -> Vec<u8> {
    let mut key = Vec::with_capacity(KEY_LEN);
    key.put_u64(a.as_u64());
    key.put_u64(b.as_u64());
    key.put_u64(c.as_u64());
    key
}

pub fn spo_key(t: IdTriple) -> Vec<u8> {
    key3(t.s, t.p, t.o)
}

pub fn pos_key(t: IdTriple) -> Vec<u8> {
    key3(t.p, t.o, t.s)
}

pub fn osp_key(t: IdTriple) -> Vec<u8> {
    key3(t.o, t.s, t.p)
}

fn decode_key(cf: ColumnFamily, key: &[u8]) -> Result<IdTriple> {
    if key.len() != KEY_LEN {
        return Err(StoreError::CorruptionDetected {
            context: format!("{} index", cf.name()),
            detail: format!("key of length {} ({})", key.len(), hex::encode(key)),
        });
    }
    let id = |i: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&key[i * 8..(i + 1) * 8]);
        TermId::from_be_bytes(bytes)
    };
    let (a, b, c) = (id(0), id(1), id(2));
    Ok(match cf {
        ColumnFamily::Spo => IdTriple::new(a, b, c),
        ColumnFamily::Pos => IdTriple::new(c, a, b),
        ColumnFamily::Osp => IdTriple::new(b, c, a),
        other => {
            return Err(StoreError::Internal(format!(
                "{} is not a triple index",
                other.name()
            )))
        }
    })
}

/// Stage the three index puts for one triple.
pub fn insert_ops(t: IdTriple, ops: &mut Vec<BatchOp>) {
    ops.push(BatchOp::put(ColumnFamily::Spo, spo_key(t), Vec::new()));
    ops.push(BatchOp::put(ColumnFamily::Pos, pos_key(t), Vec::new()));
    ops.push(BatchOp::put(ColumnFamily::Osp, osp_key(t), Vec::new()));
}

/// Stage the three index deletes for one triple.
pub fn delete_ops(t: IdTriple, ops: &mut Vec<BatchOp>) {
    ops.push(BatchOp::delete(ColumnFamily::Spo, spo_key(t)));
    ops.push(BatchOp::delete(ColumnFamily::Pos, pos_key(t)));
    ops.push(BatchOp::delete(ColumnFamily::Osp, osp_key(t)));
}

pub fn contains(kv: &dyn KvRead, t: IdTriple) -> Result<bool> {
    kv.exists(ColumnFamily::Spo, &spo_key(t))
}

/// Exact number of triples, by walking the primary index.
pub fn count(kv: &dyn KvRead) -> Result<u64> {
    let mut n = 0u64;
    for entry in kv.prefix_iter(ColumnFamily::Spo, &[])? {
        entry?;
        n += 1;
    }
    Ok(n)
}

/// The index and scan prefix answering a pattern shape.
///
/// | s | p | o | index | prefix    |
/// |---|---|---|-------|-----------|
/// | B | B | B | SPO   | s‖p‖o     |
/// | B | B | V | SPO   | s‖p       |
/// | B | V | V | SPO   | s         |
/// | V | B | B | POS   | p‖o       |
/// | V | B | V | POS   | p         |
/// | V | V | B | OSP   | o         |
/// | B | V | B | OSP   | o‖s       |
/// | V | V | V | SPO   | (empty)   |
///
/// With OSP ordered `o‖s‖p`, the `B V B` row needs no post-filter: the
/// 16-byte prefix pins both bound positions and the unconstrained tail is
/// exactly the variable predicate.
pub fn scan_target(pattern: IdPattern) -> (ColumnFamily, Vec<u8>) {
    use IdSlot::*;
    let mut prefix = Vec::with_capacity(KEY_LEN);
    match (pattern.s, pattern.p, pattern.o) {
        (Bound(s), Bound(p), Bound(o)) => {
            prefix.put_u64(s.as_u64());
            prefix.put_u64(p.as_u64());
            prefix.put_u64(o.as_u64());
            (ColumnFamily::Spo, prefix)
        }
        (Bound(s), Bound(p), Var) => {
            prefix.put_u64(s.as_u64());
            prefix.put_u64(p.as_u64());
            (ColumnFamily::Spo, prefix)
        }
        (Bound(s), Var, Var) => {
            prefix.put_u64(s.as_u64());
            (ColumnFamily::Spo, prefix)
        }
        (Var, Bound(p), Bound(o)) => {
            prefix.put_u64(p.as_u64());
            prefix.put_u64(o.as_u64());
            (ColumnFamily::Pos, prefix)
        }
        (Var, Bound(p), Var) => {
            prefix.put_u64(p.as_u64());
            (ColumnFamily::Pos, prefix)
        }
        (Var, Var, Bound(o)) => {
            prefix.put_u64(o.as_u64());
            (ColumnFamily::Osp, prefix)
        }
        (Bound(s), Var, Bound(o)) => {
            prefix.put_u64(o.as_u64());
            prefix.put_u64(s.as_u64());
            (ColumnFamily::Osp, prefix)
        }
        (Var, Var, Var) => (ColumnFamily::Spo, prefix),
    }
}

/// Scan every triple matching the pattern, decoded back to (s, p, o)
/// order. Single-pass and lazy; restart by re-issuing.
pub fn scan<'a>(kv: &'a dyn KvRead, pattern: IdPattern) -> Result<IdTripleIter<'a>> {
    let (cf, prefix) = scan_target(pattern);
    let iter = kv.prefix_iter(cf, &prefix)?;
    Ok(Box::new(
        iter.map(move |entry| decode_key(cf, &entry?.0)),
    ))
}

/// The inline-integer id region `[lo, hi]` intersected with one sign, as a
/// key-space interval. In 60-bit two's complement the non-negative payloads
/// sort before the negative ones, so a general range is at most two
/// intervals.
fn integer_id_interval(lo: i64, hi: i64) -> Option<(TermId, TermId)> {
    let lo_id = TermId::inline_integer(lo)?;
    let hi_id = TermId::inline_integer(hi)?;
    Some((lo_id, hi_id))
}

fn range_intervals(range: InlineIntRange) -> Vec<(TermId, TermId)> {
    let mut intervals = Vec::new();
    if range.min > range.max {
        return intervals;
    }
    // Non-negative segment first: it occupies the lower key region.
    if range.max >= 0 {
        let lo = range.min.max(0);
        if let Some(iv) = integer_id_interval(lo, range.max) {
            intervals.push(iv);
        }
    }
    if range.min < 0 {
        let hi = range.max.min(-1);
        if let Some(iv) = integer_id_interval(range.min, hi) {
            intervals.push(iv);
        }
    }
    intervals
}

/// Specialized scan for `(subject?, predicate, ?object)` where the object
/// is an inline integer in `range`. Walks only the key region whose object
/// component lies in the range: POS `p ‖ o` when the subject is free, SPO
/// `s ‖ p ‖ o` when it is bound.
pub fn range_scan<'a>(
    kv: &'a dyn KvRead,
    subject: Option<TermId>,
    predicate: TermId,
    range: InlineIntRange,
) -> Result<IdTripleIter<'a>> {
    let mut segments: Vec<IdTripleIter<'a>> = Vec::new();
    for (lo_id, hi_id) in range_intervals(range) {
        let (cf, start, end) = match subject {
            None => {
                let mut start = Vec::with_capacity(16);
                start.put_u64(predicate.as_u64());
                start.put_u64(lo_id.as_u64());
                let mut end = Vec::with_capacity(16);
                end.put_u64(predicate.as_u64());
                end.put_u64(hi_id.as_u64() + 1);
                (ColumnFamily::Pos, start, end)
            }
            Some(s) => {
                let mut start = Vec::with_capacity(KEY_LEN);
                start.put_u64(s.as_u64());
                start.put_u64(predicate.as_u64());
                start.put_u64(lo_id.as_u64());
                let mut end = Vec::with_capacity(KEY_LEN);
                end.put_u64(s.as_u64());
                end.put_u64(predicate.as_u64());
                end.put_u64(hi_id.as_u64() + 1);
                (ColumnFamily::Spo, start, end)
            }
        };
        let iter = kv.range_iter(cf, &start, Some(&end))?;
        segments.push(Box::new(
            iter.map(move |entry| decode_key(cf, &entry?.0)),
        ));
    }
    Ok(Box::new(segments.into_iter().flatten()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryBackend;
    use crate::kv::KvStore;
    use triad_model::id::IdTag;

    fn id(tag: IdTag, payload: u64) -> TermId {
        TermId::from_parts(tag, payload)
    }

    fn iri(n: u64) -> TermId {
        id(IdTag::Iri, n)
    }

    fn store_with(triples: &[IdTriple]) -> std::sync::Arc<MemoryBackend> {
        let kv = MemoryBackend::new();
        let mut ops = Vec::new();
        for t in triples {
            insert_ops(*t, &mut ops);
        }
        kv.write_batch(ops, false).unwrap();
        kv
    }

    fn collect(kv: &dyn KvRead, pattern: IdPattern) -> Vec<IdTriple> {
        let mut out: Vec<_> = scan(kv, pattern).unwrap().map(|r| r.unwrap()).collect();
        out.sort();
        out
    }

    #[test]
    fn keys_are_24_bytes_with_empty_values() {
        let t = IdTriple::new(iri(1), iri(2), iri(3));
        assert_eq!(spo_key(t).len(), KEY_LEN);
        assert_eq!(pos_key(t).len(), KEY_LEN);
        assert_eq!(osp_key(t).len(), KEY_LEN);
        assert_eq!(decode_key(ColumnFamily::Spo, &spo_key(t)).unwrap(), t);
        assert_eq!(decode_key(ColumnFamily::Pos, &pos_key(t)).unwrap(), t);
        assert_eq!(decode_key(ColumnFamily::Osp, &osp_key(t)).unwrap(), t);
    }

    #[test]
    fn malformed_keys_are_corruption() {
        assert!(matches!(
            decode_key(ColumnFamily::Spo, &[0u8; 23]),
            Err(StoreError::CorruptionDetected { .. })
        ));
    }

    #[test]
    fn insert_writes_exactly_one_key_per_index() {
        let t = IdTriple::new(iri(1), iri(2), iri(3));
        let kv = store_with(&[t]);
        for cf in [ColumnFamily::Spo, ColumnFamily::Pos, ColumnFamily::Osp] {
            let keys: Vec<_> = kv.prefix_iter(cf, &[]).unwrap().collect();
            assert_eq!(keys.len(), 1, "{}", cf.name());
        }
        assert!(contains(kv.as_ref(), t).unwrap());

        let mut ops = Vec::new();
        delete_ops(t, &mut ops);
        kv.write_batch(ops, false).unwrap();
        for cf in [ColumnFamily::Spo, ColumnFamily::Pos, ColumnFamily::Osp] {
            assert_eq!(kv.prefix_iter(cf, &[]).unwrap().count(), 0);
        }
    }

    #[test]
    fn every_shape_returns_exactly_the_matches() {
        let (a, b, c) = (iri(10), iri(11), iri(12));
        let (p, q) = (iri(20), iri(21));
        let triples = [
            IdTriple::new(a, p, b),
            IdTriple::new(b, p, c),
            IdTriple::new(a, q, c),
        ];
        let kv = store_with(&triples);
        use IdSlot::*;

        let shapes = [
            IdPattern::new(Bound(a), Bound(p), Bound(b)),
            IdPattern::new(Bound(a), Bound(p), Var),
            IdPattern::new(Bound(a), Var, Var),
            IdPattern::new(Var, Bound(p), Bound(c)),
            IdPattern::new(Var, Bound(p), Var),
            IdPattern::new(Var, Var, Bound(c)),
            IdPattern::new(Bound(a), Var, Bound(c)),
            IdPattern::everything(),
        ];
        for pattern in shapes {
            let mut expected: Vec<_> = triples
                .iter()
                .copied()
                .filter(|t| pattern.matches(*t))
                .collect();
            expected.sort();
            assert_eq!(collect(kv.as_ref(), pattern), expected, "{pattern:?}");
        }
    }

    #[test]
    fn range_scan_walks_only_the_requested_region() {
        let p = iri(5);
        let mut triples = Vec::new();
        for v in -5i64..=5 {
            triples.push(IdTriple::new(
                iri(100 + (v + 5) as u64),
                p,
                TermId::inline_integer(v).unwrap(),
            ));
        }
        // A non-integer object under the same predicate stays out of range
        // results.
        triples.push(IdTriple::new(iri(200), p, iri(7)));
        let kv = store_with(&triples);

        let hits: Vec<_> = range_scan(
            kv.as_ref(),
            None,
            p,
            InlineIntRange { min: -2, max: 2 },
        )
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
        let mut values: Vec<i64> = hits.iter().map(|t| t.o.as_integer().unwrap()).collect();
        values.sort();
        assert_eq!(values, vec![-2, -1, 0, 1, 2]);
    }

    #[test]
    fn range_scan_with_bound_subject() {
        let p = iri(5);
        let s = iri(100);
        let mut triples = Vec::new();
        for v in 0i64..10 {
            triples.push(IdTriple::new(s, p, TermId::inline_integer(v).unwrap()));
            triples.push(IdTriple::new(
                iri(300 + v as u64),
                p,
                TermId::inline_integer(v).unwrap(),
            ));
        }
        let kv = store_with(&triples);
        let hits: Vec<_> = range_scan(
            kv.as_ref(),
            Some(s),
            p,
            InlineIntRange { min: 3, max: 6 },
        )
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|t| t.s == s));
    }

    #[test]
    fn empty_range_scans_nothing() {
        let kv = store_with(&[]);
        let hits = range_scan(
            kv.as_ref(),
            None,
            iri(5),
            InlineIntRange { min: 3, max: 2 },
        )
        .unwrap()
        .count();
        assert_eq!(hits, 0);
    }
}
