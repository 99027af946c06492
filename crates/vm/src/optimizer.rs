//! Plan-time rewrites: BGP reordering by estimated cardinality and
//! detection of numeric range-scan opportunities.
//!
//! Optimization is best-effort and infallible: a store fault during
//! estimation falls back to default estimates and surfaces, if at all,
//! during evaluation.

use crate::binding::BindingKey;
use crate::datastore::{Datastore, EstimatePattern, EstimateSlot};
use crate::expr::{
    BgpMember, Expression, GraphPattern, InlineIntRange, Query, TermPattern, Variable,
};
use rustc_hash::{FxHashMap, FxHashSet};
use triad_model::id::{INLINE_INT_MAX, INLINE_INT_MIN};
use triad_model::{Numeric, Term, TermId};

/// Optimize a whole query: every BGP is reordered, and filters over BGPs
/// are mined for range-scan opportunities.
pub fn optimize_query(ds: &dyn Datastore, query: &Query) -> Query {
    let mut optimized = query.clone();
    let pattern = optimized.pattern_mut();
    *pattern = optimize_pattern(ds, pattern);
    optimized
}

pub fn optimize_pattern(ds: &dyn Datastore, pattern: &GraphPattern) -> GraphPattern {
    match pattern {
        GraphPattern::Bgp { patterns } => GraphPattern::Bgp {
            patterns: reorder_bgp(ds, patterns),
        },
        GraphPattern::Filter { inner, expr } => {
            let inner = match &**inner {
                GraphPattern::Bgp { patterns } => GraphPattern::Bgp {
                    patterns: reorder_bgp(ds, &apply_ranges(ds, patterns, expr)),
                },
                other => optimize_pattern(ds, other),
            };
            GraphPattern::Filter {
                inner: Box::new(inner),
                expr: expr.clone(),
            }
        }
        GraphPattern::Join {
            left,
            right,
            strategy,
        } => GraphPattern::Join {
            left: Box::new(optimize_pattern(ds, left)),
            right: Box::new(optimize_pattern(ds, right)),
            strategy: *strategy,
        },
        GraphPattern::LeftJoin {
            left,
            right,
            filter,
        } => GraphPattern::LeftJoin {
            left: Box::new(optimize_pattern(ds, left)),
            right: Box::new(optimize_pattern(ds, right)),
            filter: filter.clone(),
        },
        GraphPattern::Union { left, right } => GraphPattern::Union {
            left: Box::new(optimize_pattern(ds, left)),
            right: Box::new(optimize_pattern(ds, right)),
        },
        GraphPattern::Extend {
            inner,
            variable,
            expr,
        } => GraphPattern::Extend {
            inner: Box::new(optimize_pattern(ds, inner)),
            variable: variable.clone(),
            expr: expr.clone(),
        },
        GraphPattern::Project { inner, variables } => GraphPattern::Project {
            inner: Box::new(optimize_pattern(ds, inner)),
            variables: variables.clone(),
        },
        GraphPattern::Distinct { inner } => GraphPattern::Distinct {
            inner: Box::new(optimize_pattern(ds, inner)),
        },
        GraphPattern::Reduced { inner } => GraphPattern::Reduced {
            inner: Box::new(optimize_pattern(ds, inner)),
        },
        GraphPattern::OrderBy { inner, conditions } => GraphPattern::OrderBy {
            inner: Box::new(optimize_pattern(ds, inner)),
            conditions: conditions.clone(),
        },
        GraphPattern::Slice {
            inner,
            offset,
            limit,
        } => GraphPattern::Slice {
            inner: Box::new(optimize_pattern(ds, inner)),
            offset: *offset,
            limit: *limit,
        },
        GraphPattern::Group {
            inner,
            keys,
            aggregates,
        } => GraphPattern::Group {
            inner: Box::new(optimize_pattern(ds, inner)),
            keys: keys.clone(),
            aggregates: aggregates.clone(),
        },
    }
}

/// Greedy ascending-cardinality ordering. Ties break on the number of
/// positions bound by earlier members, then on original position, so the
/// order is fully deterministic.
fn reorder_bgp(ds: &dyn Datastore, members: &[BgpMember]) -> Vec<BgpMember> {
    let mut remaining: Vec<(usize, &BgpMember)> = members.iter().enumerate().collect();
    let mut bound: FxHashSet<BindingKey> = FxHashSet::default();
    let mut ordered = Vec::with_capacity(members.len());

    while !remaining.is_empty() {
        let mut best: Option<(usize, u64, usize)> = None; // (slot in remaining, estimate, constrained)
        for (slot, (original, member)) in remaining.iter().enumerate() {
            let estimate = estimate_member(ds, member, &bound);
            let constrained = constrained_positions(member, &bound);
            let better = match best {
                None => true,
                Some((best_slot, best_estimate, best_constrained)) => {
                    let best_original = remaining[best_slot].0;
                    (estimate, std::cmp::Reverse(constrained), *original)
                        < (best_estimate, std::cmp::Reverse(best_constrained), best_original)
                }
            };
            if better {
                best = Some((slot, estimate, constrained));
            }
        }
        let (slot, _, _) = best.expect("non-empty remaining set");
        let (_, member) = remaining.remove(slot);
        for key in member_keys(member) {
            bound.insert(key);
        }
        ordered.push(member.clone());
    }
    ordered
}

fn member_keys(member: &BgpMember) -> Vec<BindingKey> {
    let mut keys = Vec::new();
    let mut push = |position: &TermPattern| match position {
        TermPattern::Variable(v) => keys.push(BindingKey::Var(v.name_arc())),
        TermPattern::BlankNode(b) => keys.push(BindingKey::blank(b.as_str())),
        _ => {}
    };
    match member {
        BgpMember::Triple(t) => {
            push(&t.subject);
            push(&t.predicate);
            push(&t.object);
        }
        BgpMember::Path {
            subject, object, ..
        } => {
            push(subject);
            push(object);
        }
        BgpMember::ObjectRange {
            subject, object, ..
        } => {
            push(subject);
            keys.push(BindingKey::Var(object.name_arc()));
        }
    }
    keys
}

fn position_slot(
    ds: &dyn Datastore,
    position: &TermPattern,
    bound: &FxHashSet<BindingKey>,
) -> Option<EstimateSlot> {
    match position {
        TermPattern::NamedNode(_) | TermPattern::Literal(_) => {
            let term = position.as_term().expect("concrete position");
            match ds.lookup(&term) {
                // A term the store has never seen matches nothing.
                Ok(None) => None,
                Ok(Some(id)) => Some(EstimateSlot::Known(id)),
                Err(_) => Some(EstimateSlot::Var),
            }
        }
        TermPattern::Variable(v) => {
            if bound.contains(&BindingKey::Var(v.name_arc())) {
                Some(EstimateSlot::BoundUnknown)
            } else {
                Some(EstimateSlot::Var)
            }
        }
        TermPattern::BlankNode(b) => {
            if bound.contains(&BindingKey::blank(b.as_str())) {
                Some(EstimateSlot::BoundUnknown)
            } else {
                Some(EstimateSlot::Var)
            }
        }
    }
}

fn estimate_member(
    ds: &dyn Datastore,
    member: &BgpMember,
    bound: &FxHashSet<BindingKey>,
) -> u64 {
    match member {
        BgpMember::Triple(t) => {
            let (Some(s), Some(p), Some(o)) = (
                position_slot(ds, &t.subject, bound),
                position_slot(ds, &t.predicate, bound),
                position_slot(ds, &t.object, bound),
            ) else {
                return 0;
            };
            ds.estimate(&EstimatePattern { s, p, o })
        }
        // Recursive paths are evaluated late; fixed paths estimate like
        // their first link.
        BgpMember::Path { path, .. } => {
            if path.is_recursive() {
                ds.triple_count().saturating_mul(2)
            } else {
                ds.triple_count()
            }
        }
        BgpMember::ObjectRange {
            predicate, range, ..
        } => {
            let Ok(Some(p)) = ds.lookup(&Term::NamedNode(predicate.clone())) else {
                return 0;
            };
            let base = ds.estimate(&EstimatePattern {
                s: EstimateSlot::Var,
                p: EstimateSlot::Known(p),
                o: EstimateSlot::Var,
            });
            let selectivity = ds.range_selectivity(p, *range);
            ((base as f64) * selectivity).ceil() as u64
        }
    }
}

fn constrained_positions(member: &BgpMember, bound: &FxHashSet<BindingKey>) -> usize {
    let constrained = |position: &TermPattern| match position {
        TermPattern::NamedNode(_) | TermPattern::Literal(_) => true,
        TermPattern::Variable(v) => bound.contains(&BindingKey::Var(v.name_arc())),
        TermPattern::BlankNode(b) => bound.contains(&BindingKey::blank(b.as_str())),
    };
    match member {
        BgpMember::Triple(t) => [&t.subject, &t.predicate, &t.object]
            .into_iter()
            .filter(|p| constrained(p))
            .count(),
        BgpMember::Path {
            subject, object, ..
        } => [subject, object].into_iter().filter(|p| constrained(p)).count() + 1,
        BgpMember::ObjectRange { subject, .. } => {
            usize::from(constrained(subject)) + 1
        }
    }
}

/// Rewrite `(s, p, ?o)` members into range members when the filter above
/// them pins `?o` into an integer range and the store keeps a numeric
/// histogram for `p`. The filter itself stays in the tree, so the rewrite
/// only changes the access path.
fn apply_ranges(
    ds: &dyn Datastore,
    members: &[BgpMember],
    expr: &Expression,
) -> Vec<BgpMember> {
    let bounds = collect_ranges(expr);
    if bounds.is_empty() {
        return members.to_vec();
    }
    members
        .iter()
        .map(|member| {
            let BgpMember::Triple(t) = member else {
                return member.clone();
            };
            let TermPattern::NamedNode(predicate) = &t.predicate else {
                return member.clone();
            };
            let TermPattern::Variable(object) = &t.object else {
                return member.clone();
            };
            let Some(range) = bounds.get(object.name()) else {
                return member.clone();
            };
            let histogram = matches!(
                ds.lookup(&Term::NamedNode(predicate.clone())),
                Ok(Some(p)) if ds.has_numeric_histogram(p)
            );
            if !histogram || range.min > range.max {
                return member.clone();
            }
            BgpMember::ObjectRange {
                subject: t.subject.clone(),
                predicate: predicate.clone(),
                object: object.clone(),
                range: *range,
            }
        })
        .collect()
}

/// Walk the conjunctive spine of a filter and gather inclusive integer
/// bounds per variable.
fn collect_ranges(expr: &Expression) -> FxHashMap<String, InlineIntRange> {
    let mut bounds: FxHashMap<String, InlineIntRange> = FxHashMap::default();
    collect_into(expr, &mut bounds);
    bounds
}

fn collect_into(expr: &Expression, bounds: &mut FxHashMap<String, InlineIntRange>) {
    match expr {
        Expression::And(a, b) => {
            collect_into(a, bounds);
            collect_into(b, bounds);
        }
        Expression::GreaterOrEqual(a, b) => constrain(a, b, bounds, Cmp::Ge),
        Expression::Greater(a, b) => constrain(a, b, bounds, Cmp::Gt),
        Expression::LessOrEqual(a, b) => constrain(a, b, bounds, Cmp::Le),
        Expression::Less(a, b) => constrain(a, b, bounds, Cmp::Lt),
        _ => {}
    }
}

#[derive(Clone, Copy)]
enum Cmp {
    Ge,
    Gt,
    Le,
    Lt,
}

impl Cmp {
    fn flip(self) -> Cmp {
        match self {
            Cmp::Ge => Cmp::Le,
            Cmp::Gt => Cmp::Lt,
            Cmp::Le => Cmp::Ge,
            Cmp::Lt => Cmp::Gt,
        }
    }
}

fn constrain(
    a: &Expression,
    b: &Expression,
    bounds: &mut FxHashMap<String, InlineIntRange>,
    cmp: Cmp,
) {
    let (variable, constant, cmp) = match (a, b) {
        (Expression::Variable(v), Expression::Literal(l)) => (v, l, cmp),
        (Expression::Literal(l), Expression::Variable(v)) => (v, l, cmp.flip()),
        _ => return,
    };
    let Some(value) = integer_bound(constant) else {
        return;
    };
    let entry = bounds
        .entry(variable.name().to_owned())
        .or_insert(InlineIntRange {
            min: INLINE_INT_MIN,
            max: INLINE_INT_MAX,
        });
    match cmp {
        Cmp::Ge => entry.min = entry.min.max(value),
        Cmp::Gt => entry.min = entry.min.max(value.saturating_add(1)),
        Cmp::Le => entry.max = entry.max.min(value),
        Cmp::Lt => entry.max = entry.max.min(value.saturating_sub(1)),
    }
}

fn integer_bound(literal: &triad_model::Literal) -> Option<i64> {
    match Numeric::from_literal(literal)? {
        Numeric::Integer(v) => TermId::inline_integer(v).map(|_| v),
        _ => None,
    }
}
