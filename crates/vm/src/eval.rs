//! The algebra evaluator.
//!
//! Every operator takes child binding iterators and returns a new one; the
//! only operators allowed to materialize are the hash-join build side,
//! DISTINCT, ORDER BY and GROUP BY. Evaluation runs against a
//! `&dyn Datastore` and an [`ExecutionContext`] carrying limits, the
//! deadline, and truncation telemetry.

use crate::binding::{Binding, BindingKey, BindingValue};
use crate::datastore::{Datastore, IdPattern, IdSlot, IdTripleIter};
use crate::expr::{BgpMember, GraphPattern, TermPattern, TriplePattern};
use crate::{filter, group, join, modifiers, path};
use std::iter;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use triad_model::{Result, StoreError, TermId};

/// Resource bounds for one query execution. All defaults are deliberate
/// denial-of-service protection for adversarial queries; trips truncate and
/// flag rather than raise, except DISTINCT and ORDER BY where a partial
/// answer would be silently wrong.
#[derive(Debug, Clone, Copy)]
pub struct QueryLimits {
    /// Maximum BFS depth for recursive property paths. Default: 100.
    pub max_path_depth: usize,
    /// Maximum per-side depth for bidirectional search. Default: 50.
    pub max_bidirectional_depth: usize,
    /// Maximum BFS frontier size. Default: 100 000.
    pub max_path_frontier: usize,
    /// Maximum BFS visited-set size. Default: 1 000 000.
    pub max_path_visited: usize,
    /// Maximum results for a path with both endpoints unbound.
    /// Default: 100 000.
    pub max_unbounded_path_results: usize,
    /// Maximum nodes enumerated when a path start is unconstrained.
    /// Default: 50 000.
    pub max_node_enumeration: usize,
    /// Maximum unique bindings DISTINCT will hold. Default: 100 000.
    pub max_distinct: usize,
    /// Maximum bindings ORDER BY will materialize. Default: 1 000 000.
    pub max_order_by: usize,
    /// Maximum recursion depth of a DESCRIBE blank-node closure.
    /// Default: 100.
    pub max_describe_depth: usize,
    /// Maximum triples one DESCRIBE emits. Default: 10 000.
    pub max_describe_triples: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_path_depth: 100,
            max_bidirectional_depth: 50,
            max_path_frontier: 100_000,
            max_path_visited: 1_000_000,
            max_unbounded_path_results: 100_000,
            max_node_enumeration: 50_000,
            max_distinct: 100_000,
            max_order_by: 1_000_000,
            max_describe_depth: 100,
            max_describe_triples: 10_000,
        }
    }
}

/// Which resource bound tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationKind {
    PathDepth,
    PathFrontier,
    PathVisited,
    PathResults,
    NodeEnumeration,
    Describe,
}

#[derive(Debug, Default)]
struct EvalCounters {
    truncated: AtomicBool,
    path_depth: AtomicU64,
    path_frontier: AtomicU64,
    path_visited: AtomicU64,
    path_results: AtomicU64,
    node_enumeration: AtomicU64,
    describe: AtomicU64,
}

/// Per-execution state: limits, deadline, truncation telemetry.
#[derive(Debug)]
pub struct ExecutionContext {
    pub limits: QueryLimits,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    counters: EvalCounters,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(QueryLimits::default())
    }
}

impl ExecutionContext {
    pub fn new(limits: QueryLimits) -> Self {
        Self {
            limits,
            timeout: None,
            deadline: None,
            counters: EvalCounters::default(),
        }
    }

    pub fn with_timeout(limits: QueryLimits, timeout: Duration) -> Self {
        Self {
            limits,
            timeout: Some(timeout),
            deadline: Some(Instant::now() + timeout),
            counters: EvalCounters::default(),
        }
    }

    /// Checked between pattern transitions, BFS expansion steps, and
    /// materialization batches.
    pub fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(StoreError::Timeout {
                timeout: self.timeout.unwrap_or_default(),
            }),
            _ => Ok(()),
        }
    }

    /// Record a resource-bound trip. The result stays partial; callers
    /// distinguish it through [`Self::truncated`].
    pub fn mark_truncated(&self, kind: TruncationKind) {
        self.counters.truncated.store(true, Ordering::Relaxed);
        self.trip_counter(kind).fetch_add(1, Ordering::Relaxed);
        log::warn!("query result truncated: {kind:?} bound tripped");
    }

    pub fn truncated(&self) -> bool {
        self.counters.truncated.load(Ordering::Relaxed)
    }

    pub fn trip_count(&self, kind: TruncationKind) -> u64 {
        self.trip_counter(kind).load(Ordering::Relaxed)
    }

    fn trip_counter(&self, kind: TruncationKind) -> &AtomicU64 {
        match kind {
            TruncationKind::PathDepth => &self.counters.path_depth,
            TruncationKind::PathFrontier => &self.counters.path_frontier,
            TruncationKind::PathVisited => &self.counters.path_visited,
            TruncationKind::PathResults => &self.counters.path_results,
            TruncationKind::NodeEnumeration => &self.counters.node_enumeration,
            TruncationKind::Describe => &self.counters.describe,
        }
    }
}

pub type BindingIter<'a> = Box<dyn Iterator<Item = Result<Binding>> + 'a>;

/// Evaluate a graph pattern to a lazy binding stream.
pub fn evaluate_pattern<'a>(
    ds: &'a dyn Datastore,
    ctx: &'a ExecutionContext,
    pattern: &'a GraphPattern,
) -> Result<BindingIter<'a>> {
    Ok(match pattern {
        GraphPattern::Bgp { patterns } => evaluate_bgp(ds, ctx, patterns),
        GraphPattern::Join {
            left,
            right,
            strategy,
        } => {
            let left = evaluate_pattern(ds, ctx, left)?;
            let right = evaluate_pattern(ds, ctx, right)?;
            join::join(ctx, left, right, *strategy)?
        }
        GraphPattern::LeftJoin {
            left,
            right,
            filter: condition,
        } => {
            let left = evaluate_pattern(ds, ctx, left)?;
            let right = evaluate_pattern(ds, ctx, right)?;
            join::left_join(ds, ctx, left, right, condition.as_ref())?
        }
        GraphPattern::Union { left, right } => {
            // Lazy concatenation: left first, then right. Branch-local
            // variable sets are kept as-is.
            let left = evaluate_pattern(ds, ctx, left)?;
            Box::new(left.chain(DeferredPattern::new(ds, ctx, right)))
        }
        GraphPattern::Filter { inner, expr } => {
            let inner = evaluate_pattern(ds, ctx, inner)?;
            filter::filter_stream(ds, ctx, inner, expr)
        }
        GraphPattern::Extend {
            inner,
            variable,
            expr,
        } => {
            let inner = evaluate_pattern(ds, ctx, inner)?;
            let key = BindingKey::Var(variable.name_arc());
            Box::new(inner.map(move |binding| {
                let mut binding = binding?;
                match filter::evaluate_expression(ds, &binding, expr) {
                    Ok(Some(value)) => {
                        let value = filter::expr_value_to_binding(ds, value)?;
                        binding.bind(key.clone(), value);
                    }
                    // An erroring expression leaves the variable unbound.
                    Ok(None) => {}
                    Err(e) => return Err(e),
                }
                Ok(binding)
            }))
        }
        GraphPattern::Project { inner, variables } => {
            let inner = evaluate_pattern(ds, ctx, inner)?;
            let names: Vec<_> = variables.iter().map(|v| v.name_arc()).collect();
            Box::new(inner.map(move |binding| Ok(binding?.project(&names))))
        }
        GraphPattern::Distinct { inner } | GraphPattern::Reduced { inner } => {
            // Reduced merely permits duplicate removal; implementing it as
            // DISTINCT satisfies the contract.
            let inner = evaluate_pattern(ds, ctx, inner)?;
            modifiers::distinct(ctx, inner)
        }
        GraphPattern::OrderBy { inner, conditions } => {
            let inner = evaluate_pattern(ds, ctx, inner)?;
            modifiers::order_by(ds, ctx, inner, conditions)?
        }
        GraphPattern::Slice {
            inner,
            offset,
            limit,
        } => {
            let inner = evaluate_pattern(ds, ctx, inner)?;
            modifiers::slice(inner, *offset, *limit)
        }
        GraphPattern::Group {
            inner,
            keys,
            aggregates,
        } => {
            let inner = evaluate_pattern(ds, ctx, inner)?;
            group::group_by(ds, ctx, inner, keys, aggregates)?
        }
    })
}

/// Evaluate a BGP: seed with one empty binding, then bind each member in
/// order. Reordering is the optimizer's job and has already happened.
fn evaluate_bgp<'a>(
    ds: &'a dyn Datastore,
    ctx: &'a ExecutionContext,
    members: &'a [BgpMember],
) -> BindingIter<'a> {
    let mut stream: BindingIter<'a> = Box::new(iter::once(Ok(Binding::new())));
    for member in members {
        stream = apply_member(ds, ctx, stream, member);
    }
    stream
}

fn apply_member<'a>(
    ds: &'a dyn Datastore,
    ctx: &'a ExecutionContext,
    input: BindingIter<'a>,
    member: &'a BgpMember,
) -> BindingIter<'a> {
    match member {
        BgpMember::Triple(pattern) => Box::new(TriplePatternIter {
            ds,
            ctx,
            input,
            pattern,
            current: None,
        }),
        BgpMember::Path {
            subject,
            path,
            object,
        } => path::apply_path(ds, ctx, input, subject, path, object),
        BgpMember::ObjectRange {
            subject,
            predicate,
            object,
            range,
        } => Box::new(RangeMemberIter {
            ds,
            ctx,
            input,
            member: RangeMember {
                subject,
                predicate,
                object_key: BindingKey::Var(object.name_arc()),
                range: *range,
            },
            current: None,
        }),
    }
}

/// How one pattern position relates to the binding being extended.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    /// Forced by the scan prefix; nothing to do on extension.
    Fixed,
    /// Binds (or must agree with) this key.
    Key(BindingKey),
}

pub(crate) struct Slots {
    pub s: Slot,
    pub p: Slot,
    pub o: Slot,
}

/// Substitute a binding into a pattern position.
///
/// `Ok(None)` means the position names a term the store has never seen, so
/// the pattern cannot match anything.
pub(crate) fn resolve_position(
    ds: &dyn Datastore,
    position: &TermPattern,
    binding: &Binding,
) -> Result<Option<(IdSlot, Slot)>> {
    let key = match position {
        TermPattern::Variable(v) => BindingKey::Var(v.name_arc()),
        TermPattern::BlankNode(b) => BindingKey::blank(b.as_str()),
        TermPattern::NamedNode(_) | TermPattern::Literal(_) => {
            let term = position.as_term().expect("concrete position");
            return Ok(ds
                .lookup(&term)?
                .map(|id| (IdSlot::Bound(id), Slot::Fixed)));
        }
    };
    Ok(Some(match binding.get(&key) {
        Some(BindingValue::Id(id)) => (IdSlot::Bound(*id), Slot::Fixed),
        // A computed term that is not in the store can never match a stored
        // triple.
        Some(BindingValue::Term(_)) => return Ok(None),
        Some(BindingValue::Unbound) | None => (IdSlot::Var, Slot::Key(key)),
    }))
}

pub(crate) fn resolve_pattern(
    ds: &dyn Datastore,
    pattern: &TriplePattern,
    binding: &Binding,
) -> Result<Option<(IdPattern, Slots)>> {
    let Some((s, slot_s)) = resolve_position(ds, &pattern.subject, binding)? else {
        return Ok(None);
    };
    let Some((p, slot_p)) = resolve_position(ds, &pattern.predicate, binding)? else {
        return Ok(None);
    };
    let Some((o, slot_o)) = resolve_position(ds, &pattern.object, binding)? else {
        return Ok(None);
    };
    Ok(Some((
        IdPattern::new(s, p, o),
        Slots {
            s: slot_s,
            p: slot_p,
            o: slot_o,
        },
    )))
}

/// Extend `base` with one matched triple, observing the pattern's slots.
/// Positions are processed in order so that a repeated variable within one
/// pattern is an equality constraint.
pub(crate) fn extend_binding(
    base: &Binding,
    slots: &Slots,
    ids: [TermId; 3],
) -> Option<Binding> {
    let mut extended = base.clone();
    for (slot, id) in [&slots.s, &slots.p, &slots.o].into_iter().zip(ids) {
        if let Slot::Key(key) = slot {
            match extended.get(key) {
                Some(BindingValue::Id(existing)) if *existing == id => {}
                Some(BindingValue::Unbound) | None => {
                    extended.bind(key.clone(), BindingValue::Id(id));
                }
                Some(_) => return None,
            }
        }
    }
    Some(extended)
}

struct TriplePatternIter<'a> {
    ds: &'a dyn Datastore,
    ctx: &'a ExecutionContext,
    input: BindingIter<'a>,
    pattern: &'a TriplePattern,
    current: Option<(Binding, Slots, IdTripleIter<'a>)>,
}

impl<'a> Iterator for TriplePatternIter<'a> {
    type Item = Result<Binding>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((base, slots, scan)) = &mut self.current {
                for matched in scan.by_ref() {
                    let matched = match matched {
                        Ok(t) => t,
                        Err(e) => return Some(Err(e)),
                    };
                    if let Some(extended) =
                        extend_binding(base, slots, [matched.s, matched.p, matched.o])
                    {
                        return Some(Ok(extended));
                    }
                }
                self.current = None;
            }

            let base = match self.input.next()? {
                Ok(b) => b,
                Err(e) => return Some(Err(e)),
            };
            if let Err(e) = self.ctx.check_deadline() {
                return Some(Err(e));
            }
            match resolve_pattern(self.ds, self.pattern, &base) {
                Ok(Some((id_pattern, slots))) => match self.ds.scan(id_pattern) {
                    Ok(scan) => self.current = Some((base, slots, scan)),
                    Err(e) => return Some(Err(e)),
                },
                // The pattern references an unknown term: no matches for
                // this (or any) binding, but other input bindings may still
                // produce different substitutions, so keep pulling.
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

struct RangeMember<'a> {
    subject: &'a TermPattern,
    predicate: &'a triad_model::NamedNode,
    object_key: BindingKey,
    range: crate::expr::InlineIntRange,
}

struct RangeMemberIter<'a> {
    ds: &'a dyn Datastore,
    ctx: &'a ExecutionContext,
    input: BindingIter<'a>,
    member: RangeMember<'a>,
    current: Option<(Binding, Slots, IdTripleIter<'a>)>,
}

impl<'a> RangeMemberIter<'a> {
    /// Pick the access path for one input binding: the specialized range
    /// scan when the store offers one and the object is still unbound, the
    /// plain index scan otherwise.
    fn open_scan(
        &self,
        base: &Binding,
    ) -> Result<Option<(Slots, IdTripleIter<'a>)>> {
        let Some((s_slot, slot_s)) =
            resolve_position(self.ds, self.member.subject, base)?
        else {
            return Ok(None);
        };
        let predicate_term =
            triad_model::Term::NamedNode(self.member.predicate.clone());
        let Some(p_id) = self.ds.lookup(&predicate_term)? else {
            return Ok(None);
        };

        let object_bound = base.get(&self.member.object_key).cloned();
        let (o_slot, slot_o) = match object_bound {
            Some(BindingValue::Id(id)) => (IdSlot::Bound(id), Slot::Fixed),
            Some(BindingValue::Term(_)) => return Ok(None),
            Some(BindingValue::Unbound) | None => {
                (IdSlot::Var, Slot::Key(self.member.object_key.clone()))
            }
        };

        let slots = Slots {
            s: slot_s,
            p: Slot::Fixed,
            o: slot_o,
        };

        if matches!(o_slot, IdSlot::Var) {
            let subject_id = match s_slot {
                IdSlot::Bound(id) => Some(id),
                IdSlot::Var => None,
            };
            if let Some(scan) =
                self.ds
                    .scan_object_range(subject_id, p_id, self.member.range)
            {
                return Ok(Some((slots, scan?)));
            }
        }

        let scan = self.ds.scan(IdPattern::new(
            s_slot,
            IdSlot::Bound(p_id),
            o_slot,
        ))?;
        Ok(Some((slots, scan)))
    }
}

impl<'a> Iterator for RangeMemberIter<'a> {
    type Item = Result<Binding>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((base, slots, scan)) = &mut self.current {
                for matched in scan.by_ref() {
                    let matched = match matched {
                        Ok(t) => t,
                        Err(e) => return Some(Err(e)),
                    };
                    if let Some(extended) =
                        extend_binding(base, slots, [matched.s, matched.p, matched.o])
                    {
                        return Some(Ok(extended));
                    }
                }
                self.current = None;
            }

            let base = match self.input.next()? {
                Ok(b) => b,
                Err(e) => return Some(Err(e)),
            };
            if let Err(e) = self.ctx.check_deadline() {
                return Some(Err(e));
            }
            match self.open_scan(&base) {
                Ok(Some((slots, scan))) => self.current = Some((base, slots, scan)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Defers evaluation of a union branch until the left branch is exhausted,
/// keeping union lazy end to end.
struct DeferredPattern<'a> {
    ds: &'a dyn Datastore,
    ctx: &'a ExecutionContext,
    pattern: &'a GraphPattern,
    state: Option<BindingIter<'a>>,
    failed: bool,
}

impl<'a> DeferredPattern<'a> {
    fn new(ds: &'a dyn Datastore, ctx: &'a ExecutionContext, pattern: &'a GraphPattern) -> Self {
        Self {
            ds,
            ctx,
            pattern,
            state: None,
            failed: false,
        }
    }
}

impl<'a> Iterator for DeferredPattern<'a> {
    type Item = Result<Binding>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.state.is_none() {
            match evaluate_pattern(self.ds, self.ctx, self.pattern) {
                Ok(iter) => self.state = Some(iter),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        self.state.as_mut().and_then(|iter| iter.next())
    }
}
