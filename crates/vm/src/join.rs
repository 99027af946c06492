//! Physical join operators.
//!
//! Hash join is the default for arbitrary inputs; nested-loop is reserved
//! for callers that know the inner side is small. Left join implements the
//! SPARQL OPTIONAL semantic, including the inline filter over the merged
//! binding.

use crate::binding::{Binding, BindingKey, BindingValue};
use crate::datastore::Datastore;
use crate::eval::{BindingIter, ExecutionContext};
use crate::expr::{Expression, JoinStrategy};
use crate::filter;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use triad_model::Result;

/// Drain a stream into a vector, checking the deadline at batch boundaries.
pub(crate) fn collect_all(
    ctx: &ExecutionContext,
    iter: BindingIter<'_>,
) -> Result<Vec<Binding>> {
    let mut out = Vec::new();
    for (i, binding) in iter.enumerate() {
        if i % 1024 == 1023 {
            ctx.check_deadline()?;
        }
        out.push(binding?);
    }
    Ok(out)
}

/// Join two streams with the requested strategy. `Auto` resolves to hash.
pub fn join<'a>(
    ctx: &'a ExecutionContext,
    left: BindingIter<'a>,
    right: BindingIter<'a>,
    strategy: JoinStrategy,
) -> Result<BindingIter<'a>> {
    match strategy {
        JoinStrategy::Auto | JoinStrategy::Hash => hash_join(ctx, left, right),
        JoinStrategy::NestedLoop => nested_loop_join(ctx, left, right),
    }
}

/// The set of keys bound on both sides, over the whole input multisets.
fn shared_keys(left: &[Binding], right: &[Binding]) -> Vec<BindingKey> {
    let left_keys: FxHashSet<&BindingKey> = left.iter().flat_map(Binding::keys).collect();
    let right_keys: FxHashSet<&BindingKey> = right.iter().flat_map(Binding::keys).collect();
    let mut shared: Vec<BindingKey> = left_keys
        .intersection(&right_keys)
        .map(|k| (*k).clone())
        .collect();
    shared.sort();
    shared
}

/// The hash key of a binding over the join variables. `None` when the
/// binding leaves some join variable unbound (or carries the sentinel), in
/// which case it can only be matched by a full compatibility check.
fn join_key(binding: &Binding, shared: &[BindingKey]) -> Option<Vec<BindingValue>> {
    shared
        .iter()
        .map(|k| match binding.get(k) {
            Some(BindingValue::Unbound) | None => None,
            Some(v) => Some(v.clone()),
        })
        .collect()
}

/// Hash join: collect both sides, build a table on the smaller one keyed by
/// the join-variable tuple, probe with the other. With no shared variables
/// this degenerates to the Cartesian product.
pub fn hash_join<'a>(
    ctx: &'a ExecutionContext,
    left: BindingIter<'a>,
    right: BindingIter<'a>,
) -> Result<BindingIter<'a>> {
    let left = collect_all(ctx, left)?;
    let right = collect_all(ctx, right)?;
    let shared = shared_keys(&left, &right);

    if shared.is_empty() {
        let out = cartesian(left, right);
        return Ok(Box::new(out.into_iter().map(Ok)));
    }

    // Build on the smaller side.
    let (build, probe) = if left.len() <= right.len() {
        (left, right)
    } else {
        (right, left)
    };

    let mut table: FxHashMap<Vec<BindingValue>, Vec<Binding>> = FxHashMap::default();
    // Bindings that leave a join variable unbound cannot be hashed; they are
    // compatibility-checked against every probe row instead.
    let mut unkeyed: Vec<Binding> = Vec::new();
    for binding in build {
        match join_key(&binding, &shared) {
            Some(key) => table.entry(key).or_default().push(binding),
            None => unkeyed.push(binding),
        }
    }

    let mut out = Vec::new();
    for (i, probe_binding) in probe.iter().enumerate() {
        if i % 1024 == 1023 {
            ctx.check_deadline()?;
        }
        if let Some(key) = join_key(probe_binding, &shared) {
            if let Some(bucket) = table.get(&key) {
                for build_binding in bucket {
                    if let Some(merged) = build_binding.merge(probe_binding) {
                        out.push(merged);
                    }
                }
            }
        } else {
            // Probe row misses a join variable: scan the whole table.
            for bucket in table.values() {
                for build_binding in bucket {
                    if let Some(merged) = build_binding.merge(probe_binding) {
                        out.push(merged);
                    }
                }
            }
        }
        for build_binding in &unkeyed {
            if let Some(merged) = build_binding.merge(probe_binding) {
                out.push(merged);
            }
        }
    }
    Ok(Box::new(out.into_iter().map(Ok)))
}

fn cartesian(left: Vec<Binding>, right: Vec<Binding>) -> Vec<Binding> {
    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in &left {
        for r in &right {
            if let Some(merged) = l.merge(r) {
                out.push(merged);
            }
        }
    }
    out
}

/// Nested-loop join: materialize the right side, stream the left,
/// compatibility-check every pair. O(n·m) time, O(m) space.
pub fn nested_loop_join<'a>(
    ctx: &'a ExecutionContext,
    left: BindingIter<'a>,
    right: BindingIter<'a>,
) -> Result<BindingIter<'a>> {
    let right = collect_all(ctx, right)?;
    Ok(Box::new(NestedLoopIter {
        ctx,
        left,
        right,
        state: None,
    }))
}

struct NestedLoopIter<'a> {
    ctx: &'a ExecutionContext,
    left: BindingIter<'a>,
    right: Vec<Binding>,
    state: Option<(Binding, usize)>,
}

impl<'a> Iterator for NestedLoopIter<'a> {
    type Item = Result<Binding>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((current, idx)) = &mut self.state {
                while *idx < self.right.len() {
                    let candidate = &self.right[*idx];
                    *idx += 1;
                    if let Some(merged) = current.merge(candidate) {
                        return Some(Ok(merged));
                    }
                }
                self.state = None;
            }
            let next_left = match self.left.next()? {
                Ok(b) => b,
                Err(e) => return Some(Err(e)),
            };
            if let Err(e) = self.ctx.check_deadline() {
                return Some(Err(e));
            }
            self.state = Some((next_left, 0));
        }
    }
}

/// SPARQL OPTIONAL: for each left binding, the compatible right-extensions
/// that also pass the inline filter; the bare left binding when none
/// survive. The filter is evaluated over the merged binding with WHERE
/// semantics (error drops the extension, not the left row).
pub fn left_join<'a>(
    ds: &'a dyn Datastore,
    ctx: &'a ExecutionContext,
    left: BindingIter<'a>,
    right: BindingIter<'a>,
    condition: Option<&'a Expression>,
) -> Result<BindingIter<'a>> {
    let right = collect_all(ctx, right)?;
    Ok(Box::new(LeftJoinIter {
        ds,
        ctx,
        left,
        right,
        condition,
        pending: VecDeque::new(),
    }))
}

struct LeftJoinIter<'a> {
    ds: &'a dyn Datastore,
    ctx: &'a ExecutionContext,
    left: BindingIter<'a>,
    right: Vec<Binding>,
    condition: Option<&'a Expression>,
    pending: VecDeque<Binding>,
}

impl<'a> Iterator for LeftJoinIter<'a> {
    type Item = Result<Binding>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(binding) = self.pending.pop_front() {
                return Some(Ok(binding));
            }
            let left = match self.left.next()? {
                Ok(b) => b,
                Err(e) => return Some(Err(e)),
            };
            if let Err(e) = self.ctx.check_deadline() {
                return Some(Err(e));
            }
            let mut extended = false;
            for candidate in &self.right {
                let Some(merged) = left.merge(candidate) else {
                    continue;
                };
                let passes = match self.condition {
                    Some(expr) => match filter::evaluate_filter(self.ds, &merged, expr) {
                        Ok(v) => v,
                        Err(e) => return Some(Err(e)),
                    },
                    None => true,
                };
                if passes {
                    extended = true;
                    self.pending.push_back(merged);
                }
            }
            if !extended {
                return Some(Ok(left));
            }
        }
    }
}

/// Variable-aligned union: materializes both sides and pads every binding
/// with the explicit unbound sentinel so all rows share one key set.
pub fn union_aligned<'a>(
    ctx: &'a ExecutionContext,
    left: BindingIter<'a>,
    right: BindingIter<'a>,
) -> Result<BindingIter<'a>> {
    let left = collect_all(ctx, left)?;
    let right = collect_all(ctx, right)?;
    let universe: FxHashSet<BindingKey> = left
        .iter()
        .chain(right.iter())
        .flat_map(Binding::keys)
        .cloned()
        .collect();
    let pad = move |mut binding: Binding| {
        for key in &universe {
            if binding.get(key).is_none() {
                binding.bind(key.clone(), BindingValue::Unbound);
            }
        }
        Ok(binding)
    };
    Ok(Box::new(
        left.into_iter().chain(right).map(pad),
    ))
}
