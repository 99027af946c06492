//! Property path evaluation.
//!
//! Recursive operators run breadth-first with a visited set, so cycles are
//! never followed twice and evaluation always terminates. With both
//! endpoints bound, recursive paths switch to bidirectional search: expand
//! forward from the subject and backward from the object over the reversed
//! path, always growing the smaller frontier, and succeed on frontier
//! intersection. Every bound (depth, frontier, visited set, result count,
//! node enumeration) truncates with telemetry instead of erroring.

use crate::binding::{Binding, BindingValue};
use crate::datastore::{Datastore, IdPattern, IdSlot};
use crate::eval::{
    resolve_position, BindingIter, ExecutionContext, Slot, TruncationKind,
};
use crate::expr::{PathExpr, TermPattern};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use triad_model::{NamedNode, Result, Term, TermId};

/// Bind a path member over an input stream.
pub fn apply_path<'a>(
    ds: &'a dyn Datastore,
    ctx: &'a ExecutionContext,
    input: BindingIter<'a>,
    subject: &'a TermPattern,
    path: &'a PathExpr,
    object: &'a TermPattern,
) -> BindingIter<'a> {
    Box::new(PathMemberIter {
        ds,
        ctx,
        input,
        subject,
        object,
        path: normalize(path),
        pending: VecDeque::new(),
    })
}

struct PathMemberIter<'a> {
    ds: &'a dyn Datastore,
    ctx: &'a ExecutionContext,
    input: BindingIter<'a>,
    subject: &'a TermPattern,
    object: &'a TermPattern,
    /// Normalized once: inversions pushed down to links, so the recursive
    /// walkers only ever see `Inverse(Link(_))` as a base case.
    path: PathExpr,
    pending: VecDeque<Binding>,
}

impl<'a> Iterator for PathMemberIter<'a> {
    type Item = Result<Binding>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(binding) = self.pending.pop_front() {
                return Some(Ok(binding));
            }
            let base = match self.input.next()? {
                Ok(b) => b,
                Err(e) => return Some(Err(e)),
            };
            if let Err(e) = self.ctx.check_deadline() {
                return Some(Err(e));
            }
            match self.eval_for(&base) {
                Ok(results) => self.pending.extend(results),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<'a> PathMemberIter<'a> {
    fn eval_for(&self, base: &Binding) -> Result<Vec<Binding>> {
        let Some((s_slot, s_bind)) = resolve_position(self.ds, self.subject, base)? else {
            return Ok(Vec::new());
        };
        let Some((o_slot, o_bind)) = resolve_position(self.ds, self.object, base)? else {
            return Ok(Vec::new());
        };

        match (s_slot, o_slot) {
            (IdSlot::Bound(s), IdSlot::Bound(o)) => {
                if path_exists(self.ds, self.ctx, s, &self.path, o)? {
                    Ok(vec![base.clone()])
                } else {
                    Ok(Vec::new())
                }
            }
            (IdSlot::Bound(s), IdSlot::Var) => {
                let Slot::Key(o_key) = o_bind else {
                    unreachable!("unbound position always carries a key");
                };
                let nodes = eval_from(self.ds, self.ctx, s, &self.path)?;
                Ok(nodes
                    .into_iter()
                    .map(|o| {
                        let mut b = base.clone();
                        b.bind(o_key.clone(), BindingValue::Id(o));
                        b
                    })
                    .collect())
            }
            (IdSlot::Var, IdSlot::Bound(o)) => {
                let Slot::Key(s_key) = s_bind else {
                    unreachable!("unbound position always carries a key");
                };
                // Walk backwards over the reversed path.
                let nodes = eval_from(self.ds, self.ctx, o, &self.path.reverse())?;
                Ok(nodes
                    .into_iter()
                    .map(|s| {
                        let mut b = base.clone();
                        b.bind(s_key.clone(), BindingValue::Id(s));
                        b
                    })
                    .collect())
            }
            (IdSlot::Var, IdSlot::Var) => {
                let (Slot::Key(s_key), Slot::Key(o_key)) = (s_bind, o_bind) else {
                    unreachable!("unbound positions always carry keys");
                };
                self.eval_both_var(base, s_key, o_key)
            }
        }
    }

    fn eval_both_var(
        &self,
        base: &Binding,
        s_key: crate::binding::BindingKey,
        o_key: crate::binding::BindingKey,
    ) -> Result<Vec<Binding>> {
        // A single forward link needs no enumeration: the index answers it.
        if let PathExpr::Link(p) = &self.path {
            let Some(p_id) = self.ds.lookup(&Term::NamedNode(p.clone()))? else {
                return Ok(Vec::new());
            };
            let scan = self.ds.scan(IdPattern::new(
                IdSlot::Var,
                IdSlot::Bound(p_id),
                IdSlot::Var,
            ))?;
            let mut out = Vec::new();
            for triple in scan {
                let triple = triple?;
                let mut b = base.clone();
                if s_key == o_key {
                    if triple.s != triple.o {
                        continue;
                    }
                    b.bind(s_key.clone(), BindingValue::Id(triple.s));
                } else {
                    b.bind(s_key.clone(), BindingValue::Id(triple.s));
                    b.bind(o_key.clone(), BindingValue::Id(triple.o));
                }
                out.push(b);
                if out.len() >= self.ctx.limits.max_unbounded_path_results {
                    self.ctx.mark_truncated(TruncationKind::PathResults);
                    break;
                }
            }
            return Ok(out);
        }

        let starts = enumerate_nodes(self.ds, self.ctx)?;
        let mut out = Vec::new();
        'outer: for s in starts {
            self.ctx.check_deadline()?;
            if s_key == o_key {
                if path_exists(self.ds, self.ctx, s, &self.path, s)? {
                    let mut b = base.clone();
                    b.bind(s_key.clone(), BindingValue::Id(s));
                    out.push(b);
                }
                continue;
            }
            for o in eval_from(self.ds, self.ctx, s, &self.path)? {
                let mut b = base.clone();
                b.bind(s_key.clone(), BindingValue::Id(s));
                b.bind(o_key.clone(), BindingValue::Id(o));
                out.push(b);
                if out.len() >= self.ctx.limits.max_unbounded_path_results {
                    self.ctx.mark_truncated(TruncationKind::PathResults);
                    break 'outer;
                }
            }
        }
        Ok(out)
    }
}

/// Push inversions down to the links, so evaluation only ever sees
/// `Inverse(Link(_))` as a base case.
fn normalize(path: &PathExpr) -> PathExpr {
    match path {
        PathExpr::Link(_) => path.clone(),
        PathExpr::Inverse(inner) => match &**inner {
            PathExpr::Link(_) => path.clone(),
            other => normalize(other).reverse(),
        },
        PathExpr::Sequence(a, b) => PathExpr::Sequence(
            Box::new(normalize(a)),
            Box::new(normalize(b)),
        ),
        PathExpr::Alternative(a, b) => PathExpr::Alternative(
            Box::new(normalize(a)),
            Box::new(normalize(b)),
        ),
        PathExpr::NegatedPropertySet(_) => path.clone(),
        PathExpr::ZeroOrMore(inner) => PathExpr::ZeroOrMore(Box::new(normalize(inner))),
        PathExpr::OneOrMore(inner) => PathExpr::OneOrMore(Box::new(normalize(inner))),
        PathExpr::ZeroOrOne(inner) => PathExpr::ZeroOrOne(Box::new(normalize(inner))),
    }
}

/// A fixed-length chain of (possibly inverted) predicates, when the path is
/// one. Chains evaluate as successive index joins instead of recursive
/// path evaluation.
fn as_fixed_chain(path: &PathExpr) -> Option<Vec<(NamedNode, bool)>> {
    match path {
        PathExpr::Link(p) => Some(vec![(p.clone(), false)]),
        PathExpr::Inverse(inner) => match &**inner {
            PathExpr::Link(p) => Some(vec![(p.clone(), true)]),
            _ => None,
        },
        PathExpr::Sequence(a, b) => {
            let mut chain = as_fixed_chain(a)?;
            chain.extend(as_fixed_chain(b)?);
            Some(chain)
        }
        _ => None,
    }
}

/// All nodes reachable from `start` over `path` (normalized). Recursive
/// subpaths deduplicate through their visited sets; plain sequences keep
/// bag semantics.
fn eval_from(
    ds: &dyn Datastore,
    ctx: &ExecutionContext,
    start: TermId,
    path: &PathExpr,
) -> Result<Vec<TermId>> {
    if let Some(chain) = as_fixed_chain(path) {
        if chain.len() >= 2 {
            return eval_chain(ds, ctx, start, &chain);
        }
    }
    match path {
        PathExpr::Link(p) => step_link(ds, start, p, false),
        PathExpr::Inverse(inner) => match &**inner {
            PathExpr::Link(p) => step_link(ds, start, p, true),
            other => eval_from(ds, ctx, start, &other.reverse()),
        },
        PathExpr::Sequence(a, b) => {
            let mut out = Vec::new();
            for mid in eval_from(ds, ctx, start, a)? {
                out.extend(eval_from(ds, ctx, mid, b)?);
            }
            Ok(out)
        }
        PathExpr::Alternative(a, b) => {
            let mut out = eval_from(ds, ctx, start, a)?;
            out.extend(eval_from(ds, ctx, start, b)?);
            Ok(out)
        }
        PathExpr::NegatedPropertySet(set) => {
            let mut excluded = FxHashSet::default();
            for iri in set {
                if let Some(id) = ds.lookup(&Term::NamedNode(iri.clone()))? {
                    excluded.insert(id);
                }
            }
            let scan = ds.scan(IdPattern::new(
                IdSlot::Bound(start),
                IdSlot::Var,
                IdSlot::Var,
            ))?;
            let mut out = Vec::new();
            for triple in scan {
                let triple = triple?;
                if !excluded.contains(&triple.p) {
                    out.push(triple.o);
                }
            }
            Ok(out)
        }
        PathExpr::ZeroOrMore(inner) => bfs(ds, ctx, vec![start], inner),
        PathExpr::OneOrMore(inner) => {
            // Exclude identity at the initial step; the start node is still
            // reachable through a cycle.
            let mut seeds: Vec<TermId> = Vec::new();
            let mut seen = FxHashSet::default();
            for succ in eval_from(ds, ctx, start, inner)? {
                if seen.insert(succ) {
                    seeds.push(succ);
                }
            }
            bfs(ds, ctx, seeds, inner)
        }
        PathExpr::ZeroOrOne(inner) => {
            let mut seen = FxHashSet::default();
            seen.insert(start);
            let mut out = vec![start];
            for succ in eval_from(ds, ctx, start, inner)? {
                if seen.insert(succ) {
                    out.push(succ);
                }
            }
            Ok(out)
        }
    }
}

fn step_link(
    ds: &dyn Datastore,
    start: TermId,
    predicate: &NamedNode,
    inverted: bool,
) -> Result<Vec<TermId>> {
    let Some(p_id) = ds.lookup(&Term::NamedNode(predicate.clone()))? else {
        return Ok(Vec::new());
    };
    let pattern = if inverted {
        IdPattern::new(IdSlot::Var, IdSlot::Bound(p_id), IdSlot::Bound(start))
    } else {
        IdPattern::new(IdSlot::Bound(start), IdSlot::Bound(p_id), IdSlot::Var)
    };
    let mut out = Vec::new();
    for triple in ds.scan(pattern)? {
        let triple = triple?;
        out.push(if inverted { triple.s } else { triple.o });
    }
    Ok(out)
}

/// Evaluate a fixed predicate chain as successive index joins, frontier by
/// frontier.
fn eval_chain(
    ds: &dyn Datastore,
    ctx: &ExecutionContext,
    start: TermId,
    chain: &[(NamedNode, bool)],
) -> Result<Vec<TermId>> {
    let mut frontier = vec![start];
    for (predicate, inverted) in chain {
        ctx.check_deadline()?;
        let mut next = Vec::new();
        for node in frontier {
            next.extend(step_link(ds, node, predicate, *inverted)?);
        }
        frontier = next;
        if frontier.is_empty() {
            break;
        }
    }
    Ok(frontier)
}

/// Breadth-first closure over one path step. The seed set is part of the
/// result; pass the start node itself for zero-or-more, its direct
/// successors for one-or-more.
fn bfs(
    ds: &dyn Datastore,
    ctx: &ExecutionContext,
    seeds: Vec<TermId>,
    step: &PathExpr,
) -> Result<Vec<TermId>> {
    let limits = &ctx.limits;
    let mut visited: FxHashSet<TermId> = seeds.iter().copied().collect();
    let mut result: Vec<TermId> = visited.iter().copied().collect();
    let mut frontier = seeds;
    let mut depth = 0;
    while !frontier.is_empty() {
        if depth >= limits.max_path_depth {
            ctx.mark_truncated(TruncationKind::PathDepth);
            break;
        }
        depth += 1;
        ctx.check_deadline()?;
        let mut next = Vec::new();
        'expand: for node in frontier {
            for succ in eval_from(ds, ctx, node, step)? {
                if visited.insert(succ) {
                    result.push(succ);
                    next.push(succ);
                    if visited.len() > limits.max_path_visited {
                        ctx.mark_truncated(TruncationKind::PathVisited);
                        break 'expand;
                    }
                    if next.len() > limits.max_path_frontier {
                        ctx.mark_truncated(TruncationKind::PathFrontier);
                        break 'expand;
                    }
                }
            }
        }
        frontier = next;
    }
    Ok(result)
}

/// Does a path lead from `s` to `o`? Recursive operators use bidirectional
/// search; everything else materializes the reachable set.
fn path_exists(
    ds: &dyn Datastore,
    ctx: &ExecutionContext,
    s: TermId,
    path: &PathExpr,
    o: TermId,
) -> Result<bool> {
    match path {
        PathExpr::Link(p) => {
            let Some(p_id) = ds.lookup(&Term::NamedNode(p.clone()))? else {
                return Ok(false);
            };
            ds.contains(crate::datastore::IdTriple::new(s, p_id, o))
        }
        PathExpr::ZeroOrMore(inner) => {
            // Identity: start == target is a path even with no cycle.
            if s == o {
                return Ok(true);
            }
            bidirectional(ds, ctx, s, inner, o)
        }
        // For one-or-more, start == target needs an actual cycle; the
        // search below only succeeds after at least one expansion.
        PathExpr::OneOrMore(inner) => bidirectional(ds, ctx, s, inner, o),
        PathExpr::ZeroOrOne(inner) => {
            if s == o {
                return Ok(true);
            }
            Ok(eval_from(ds, ctx, s, inner)?.contains(&o))
        }
        other => Ok(eval_from(ds, ctx, s, other)?.contains(&o)),
    }
}

/// Bidirectional search over one recursive step: forward from `s`, backward
/// from `o` over the syntactic reversal, always expanding the smaller
/// frontier; true on frontier intersection.
fn bidirectional(
    ds: &dyn Datastore,
    ctx: &ExecutionContext,
    s: TermId,
    step: &PathExpr,
    o: TermId,
) -> Result<bool> {
    let limits = &ctx.limits;
    let reversed = step.reverse();
    let mut forward_visited: FxHashSet<TermId> = [s].into_iter().collect();
    let mut backward_visited: FxHashSet<TermId> = [o].into_iter().collect();
    let mut forward_frontier = vec![s];
    let mut backward_frontier = vec![o];

    for _ in 0..limits.max_bidirectional_depth {
        if forward_frontier.is_empty() && backward_frontier.is_empty() {
            return Ok(false);
        }
        ctx.check_deadline()?;
        let expand_forward = !forward_frontier.is_empty()
            && (backward_frontier.is_empty()
                || forward_frontier.len() <= backward_frontier.len());
        let (frontier, visited, other_visited, dir_step) = if expand_forward {
            (
                &mut forward_frontier,
                &mut forward_visited,
                &backward_visited,
                step,
            )
        } else {
            (
                &mut backward_frontier,
                &mut backward_visited,
                &forward_visited,
                &reversed,
            )
        };

        let mut next = Vec::new();
        for node in std::mem::take(frontier) {
            for succ in eval_from(ds, ctx, node, dir_step)? {
                if other_visited.contains(&succ) {
                    return Ok(true);
                }
                if visited.insert(succ) {
                    next.push(succ);
                    if visited.len() > limits.max_path_visited {
                        ctx.mark_truncated(TruncationKind::PathVisited);
                        return Ok(false);
                    }
                    if next.len() > limits.max_path_frontier {
                        ctx.mark_truncated(TruncationKind::PathFrontier);
                        return Ok(false);
                    }
                }
            }
        }
        *frontier = next;
    }
    if !forward_frontier.is_empty() || !backward_frontier.is_empty() {
        ctx.mark_truncated(TruncationKind::PathDepth);
    }
    Ok(false)
}

/// Candidate nodes for an unconstrained path start: every subject and
/// object in the store, bounded.
fn enumerate_nodes(ds: &dyn Datastore, ctx: &ExecutionContext) -> Result<Vec<TermId>> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    for triple in ds.scan(IdPattern::everything())? {
        let triple = triple?;
        for node in [triple.s, triple.o] {
            if seen.insert(node) {
                out.push(node);
                if out.len() >= ctx.limits.max_node_enumeration {
                    ctx.mark_truncated(TruncationKind::NodeEnumeration);
                    return Ok(out);
                }
            }
        }
    }
    Ok(out)
}
