//! Cardinality estimation over the collected statistics.
//!
//! Two constrained positions pin a 16-byte index prefix, which we treat as
//! unique. A known predicate contributes its histogram count; every further
//! constrained position divides by the matching distinct count, i.e. the
//! fraction of unknowns that position eliminates under a uniformity
//! assumption.

use crate::db::stats::Statistics;
use triad_vm::{EstimatePattern, EstimateSlot};

pub fn estimate(stats: &Statistics, pattern: &EstimatePattern) -> u64 {
    if stats.triple_count == 0 {
        return 0;
    }
    let known = [pattern.s, pattern.p, pattern.o]
        .iter()
        .filter(|s| matches!(s, EstimateSlot::Known(_)))
        .count();
    if known >= 2 {
        return 1;
    }

    let mut estimate = match pattern.p {
        EstimateSlot::Known(p) => stats
            .predicate_count(p)
            .unwrap_or_else(|| per_distinct(stats.triple_count, stats.distinct_p)),
        EstimateSlot::BoundUnknown => per_distinct(stats.triple_count, stats.distinct_p),
        EstimateSlot::Var => stats.triple_count,
    } as f64;

    if pattern.s.is_constrained() {
        estimate /= stats.distinct_s.max(1) as f64;
    }
    if pattern.o.is_constrained() {
        estimate /= stats.distinct_o.max(1) as f64;
    }
    (estimate.ceil() as u64).max(1)
}

fn per_distinct(total: u64, distinct: u64) -> u64 {
    (total / distinct.max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use triad_model::{IdTag, TermId};

    fn iri(n: u64) -> TermId {
        TermId::from_parts(IdTag::Iri, n)
    }

    fn stats() -> Statistics {
        let mut predicate_histogram = HashMap::new();
        predicate_histogram.insert(iri(1).as_u64(), 900);
        predicate_histogram.insert(iri(2).as_u64(), 100);
        Statistics {
            triple_count: 1000,
            distinct_s: 100,
            distinct_p: 2,
            distinct_o: 500,
            predicate_histogram,
            ..Statistics::default()
        }
    }

    fn pattern(s: EstimateSlot, p: EstimateSlot, o: EstimateSlot) -> EstimatePattern {
        EstimatePattern { s, p, o }
    }

    #[test]
    fn two_known_positions_are_unique() {
        use EstimateSlot::*;
        let stats = stats();
        assert_eq!(
            estimate(&stats, &pattern(Known(iri(7)), Known(iri(1)), Var)),
            1
        );
        assert_eq!(
            estimate(&stats, &pattern(Known(iri(7)), Var, Known(iri(8)))),
            1
        );
    }

    #[test]
    fn known_predicate_uses_its_histogram() {
        use EstimateSlot::*;
        let stats = stats();
        assert_eq!(estimate(&stats, &pattern(Var, Known(iri(1)), Var)), 900);
        assert_eq!(estimate(&stats, &pattern(Var, Known(iri(2)), Var)), 100);
        // Unknown predicate falls back to the average.
        assert_eq!(estimate(&stats, &pattern(Var, Known(iri(9)), Var)), 500);
    }

    #[test]
    fn constrained_positions_divide() {
        use EstimateSlot::*;
        let stats = stats();
        // Bound-by-join subject over a known predicate.
        assert_eq!(
            estimate(&stats, &pattern(BoundUnknown, Known(iri(1)), Var)),
            9
        );
        // Bare subject scan.
        assert_eq!(estimate(&stats, &pattern(Known(iri(7)), Var, Var)), 10);
        // Everything free: the full store.
        assert_eq!(estimate(&stats, &pattern(Var, Var, Var)), 1000);
    }

    #[test]
    fn ordering_matches_selectivity() {
        use EstimateSlot::*;
        let stats = stats();
        let rare = estimate(&stats, &pattern(Var, Known(iri(2)), Var));
        let common = estimate(&stats, &pattern(Var, Known(iri(1)), Var));
        let scan = estimate(&stats, &pattern(Var, Var, Var));
        assert!(rare < common && common <= scan);
    }

    #[test]
    fn empty_store_estimates_zero() {
        use EstimateSlot::*;
        let empty = Statistics::default();
        assert_eq!(estimate(&empty, &pattern(Var, Var, Var)), 0);
    }
}
