//! GROUP BY and aggregation.
//!
//! The stream is partitioned by the tuple of group-key values (unbound keys
//! group together), each partition feeding one accumulator per aggregate.
//! With aggregates but no keys the whole stream is a single implicit group,
//! which exists even when the input is empty. HAVING is an ordinary filter
//! above the group node.

use crate::binding::{Binding, BindingKey, BindingValue};
use crate::datastore::Datastore;
use crate::eval::{BindingIter, ExecutionContext};
use crate::expr::{AggregateExpression, Expression, Variable};
use crate::filter::{self, ExprValue};
use crate::modifiers::compare_terms;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use triad_model::{Literal, Numeric, Result, Term};

pub fn group_by<'a>(
    ds: &'a dyn Datastore,
    ctx: &'a ExecutionContext,
    input: BindingIter<'a>,
    keys: &'a [Variable],
    aggregates: &'a [(Variable, AggregateExpression)],
) -> Result<BindingIter<'a>> {
    type GroupKey = Vec<Option<BindingValue>>;

    let mut order: Vec<GroupKey> = Vec::new();
    let mut groups: FxHashMap<GroupKey, Vec<Accumulator>> = FxHashMap::default();

    // The implicit group exists even for an empty stream.
    if keys.is_empty() {
        order.push(Vec::new());
        groups.insert(Vec::new(), new_accumulators(aggregates));
    }

    for (i, binding) in input.enumerate() {
        if i % 1024 == 1023 {
            ctx.check_deadline()?;
        }
        let binding = binding?;
        let key: GroupKey = keys
            .iter()
            .map(|k| binding.get_var(k.name()).cloned())
            .collect();
        let accumulators = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            new_accumulators(aggregates)
        });
        for (accumulator, (_, aggregate)) in accumulators.iter_mut().zip(aggregates) {
            accumulator.feed(ds, &binding, aggregate)?;
        }
    }

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let accumulators = groups.remove(&key).expect("group registered");
        let mut row = Binding::new();
        for (variable, value) in keys.iter().zip(&key) {
            if let Some(value) = value {
                row.bind(BindingKey::Var(variable.name_arc()), value.clone());
            }
        }
        for (accumulator, (variable, _)) in accumulators.into_iter().zip(aggregates) {
            if let Some(value) = accumulator.finish(ds)? {
                row.bind(BindingKey::Var(variable.name_arc()), value);
            }
        }
        out.push(row);
    }
    Ok(Box::new(out.into_iter().map(Ok)))
}

fn new_accumulators(aggregates: &[(Variable, AggregateExpression)]) -> Vec<Accumulator> {
    aggregates
        .iter()
        .map(|(_, a)| Accumulator::new(a))
        .collect()
}

/// Per-group, per-aggregate state.
enum Accumulator {
    CountAll(u64),
    Count {
        n: u64,
        seen: Option<FxHashSet<BindingValue>>,
    },
    /// SUM and AVG share the running numeric state; `poisoned` records a
    /// non-numeric or overflowing value, which makes the result unbound.
    Numeric {
        sum: Numeric,
        n: u64,
        average: bool,
        poisoned: bool,
        seen: Option<FxHashSet<BindingValue>>,
    },
    Extremum {
        best: Option<BindingValue>,
        max: bool,
    },
    GroupConcat {
        parts: Vec<String>,
        separator: String,
        seen: Option<FxHashSet<String>>,
    },
    Sample(Option<BindingValue>),
}

impl Accumulator {
    fn new(aggregate: &AggregateExpression) -> Self {
        let seen_if = |distinct: bool| distinct.then(FxHashSet::default);
        match aggregate {
            AggregateExpression::CountAll => Accumulator::CountAll(0),
            AggregateExpression::Count { distinct, .. } => Accumulator::Count {
                n: 0,
                seen: seen_if(*distinct),
            },
            AggregateExpression::Sum { distinct, .. } => Accumulator::Numeric {
                sum: Numeric::Integer(0),
                n: 0,
                average: false,
                poisoned: false,
                seen: seen_if(*distinct),
            },
            AggregateExpression::Avg { distinct, .. } => Accumulator::Numeric {
                sum: Numeric::Integer(0),
                n: 0,
                average: true,
                poisoned: false,
                seen: seen_if(*distinct),
            },
            AggregateExpression::Min { .. } => Accumulator::Extremum {
                best: None,
                max: false,
            },
            AggregateExpression::Max { .. } => Accumulator::Extremum {
                best: None,
                max: true,
            },
            AggregateExpression::GroupConcat {
                distinct,
                separator,
                ..
            } => Accumulator::GroupConcat {
                parts: Vec::new(),
                separator: separator.clone().unwrap_or_else(|| " ".to_owned()),
                seen: distinct.then(FxHashSet::default),
            },
            AggregateExpression::Sample { .. } => Accumulator::Sample(None),
        }
    }

    fn feed(
        &mut self,
        ds: &dyn Datastore,
        binding: &Binding,
        aggregate: &AggregateExpression,
    ) -> Result<()> {
        if let Accumulator::CountAll(n) = self {
            *n += 1;
            return Ok(());
        }
        let expr = aggregate_expr(aggregate);
        // Erroring evaluations contribute nothing to any aggregate.
        let Some(raw) = filter::evaluate_expression(ds, binding, expr)? else {
            return Ok(());
        };
        let canonical = filter::expr_value_to_binding(ds, raw.clone())?;

        match self {
            Accumulator::CountAll(_) => unreachable!("handled above"),
            Accumulator::Count { n, seen } => {
                if dedup(seen, &canonical) {
                    *n += 1;
                }
            }
            Accumulator::Numeric {
                sum,
                n,
                poisoned,
                seen,
                ..
            } => {
                if *poisoned || !dedup(seen, &canonical) {
                    return Ok(());
                }
                match numeric_of(ds, &raw)? {
                    Some(v) => match sum.checked_add(&v) {
                        Some(next) => {
                            *sum = next;
                            *n += 1;
                        }
                        None => *poisoned = true,
                    },
                    None => *poisoned = true,
                }
            }
            Accumulator::Extremum { best, max } => {
                let better = match best {
                    None => true,
                    Some(current) => {
                        let ordering = compare_terms(ds, &canonical, current)?;
                        if *max {
                            ordering == Ordering::Greater
                        } else {
                            ordering == Ordering::Less
                        }
                    }
                };
                if better {
                    *best = Some(canonical);
                }
            }
            Accumulator::GroupConcat { parts, seen, .. } => {
                let Some(text) = string_value(ds, &raw)? else {
                    return Ok(());
                };
                match seen {
                    Some(seen) => {
                        if seen.insert(text.clone()) {
                            parts.push(text);
                        }
                    }
                    None => parts.push(text),
                }
            }
            Accumulator::Sample(slot) => {
                if slot.is_none() {
                    *slot = Some(canonical);
                }
            }
        }
        Ok(())
    }

    /// The aggregate's value for the finished group; `None` leaves the
    /// result variable unbound.
    fn finish(self, ds: &dyn Datastore) -> Result<Option<BindingValue>> {
        Ok(match self {
            Accumulator::CountAll(n) => Some(integer_value(ds, n as i64)?),
            Accumulator::Count { n, .. } => Some(integer_value(ds, n as i64)?),
            Accumulator::Numeric {
                sum,
                n,
                average,
                poisoned,
                ..
            } => {
                if poisoned {
                    None
                } else if !average {
                    Some(numeric_value(ds, &sum)?)
                } else if n == 0 {
                    Some(numeric_value(ds, &Numeric::Integer(0))?)
                } else {
                    match sum.avg_over(n) {
                        Some(avg) => Some(numeric_value(ds, &avg)?),
                        None => None,
                    }
                }
            }
            Accumulator::Extremum { best, .. } => best,
            Accumulator::GroupConcat {
                parts, separator, ..
            } => Some(BindingValue::from_term(
                ds,
                Term::Literal(Literal::simple(parts.join(&separator))),
            )?),
            Accumulator::Sample(slot) => slot,
        })
    }
}

fn aggregate_expr(aggregate: &AggregateExpression) -> &Expression {
    match aggregate {
        AggregateExpression::CountAll => unreachable!("COUNT(*) has no expression"),
        AggregateExpression::Count { expr, .. }
        | AggregateExpression::Sum { expr, .. }
        | AggregateExpression::Avg { expr, .. }
        | AggregateExpression::Min { expr }
        | AggregateExpression::Max { expr }
        | AggregateExpression::GroupConcat { expr, .. }
        | AggregateExpression::Sample { expr } => expr,
    }
}

/// Returns true when the value should be counted (first sighting under
/// DISTINCT, always otherwise).
fn dedup(seen: &mut Option<FxHashSet<BindingValue>>, value: &BindingValue) -> bool {
    match seen {
        Some(seen) => seen.insert(value.clone()),
        None => true,
    }
}

fn numeric_of(ds: &dyn Datastore, value: &ExprValue) -> Result<Option<Numeric>> {
    match value {
        ExprValue::Id(id) => {
            if let Some(n) = Numeric::from_id(*id) {
                return Ok(Some(n));
            }
            if id.is_inline() {
                return Ok(None);
            }
            Ok(Numeric::from_term(&ds.decode(*id)?))
        }
        ExprValue::Term(t) => Ok(Numeric::from_term(t)),
    }
}

fn string_value(ds: &dyn Datastore, value: &ExprValue) -> Result<Option<String>> {
    let term = match value {
        ExprValue::Id(id) => ds.decode(*id)?,
        ExprValue::Term(t) => (**t).clone(),
    };
    Ok(match term {
        Term::Literal(l) => Some(l.value().to_owned()),
        Term::NamedNode(n) => Some(n.into_string()),
        Term::BlankNode(_) => None,
    })
}

fn integer_value(ds: &dyn Datastore, v: i64) -> Result<BindingValue> {
    BindingValue::from_term(ds, Term::Literal(Literal::integer(v)))
}

fn numeric_value(ds: &dyn Datastore, n: &Numeric) -> Result<BindingValue> {
    BindingValue::from_term(ds, Term::Literal(n.to_literal()))
}
