//! Solution modifiers: DISTINCT/REDUCED, ORDER BY, OFFSET/LIMIT.
//!
//! DISTINCT and ORDER BY materialize and therefore carry hard limits that
//! raise `LimitExceeded`: a partial deduplication or a partial sort would be
//! silently wrong, unlike the truncating path bounds.

use crate::binding::{Binding, BindingValue};
use crate::datastore::Datastore;
use crate::eval::{BindingIter, ExecutionContext};
use crate::expr::OrderExpression;
use crate::filter;
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use triad_model::error::LimitKind;
use triad_model::{Numeric, Result, StoreError, Term};

/// Streaming duplicate elimination by structural binding equality.
pub fn distinct<'a>(ctx: &'a ExecutionContext, input: BindingIter<'a>) -> BindingIter<'a> {
    let mut seen: FxHashSet<Binding> = FxHashSet::default();
    let mut overflowed = false;
    let mut since_deadline_check = 0u32;
    let limit = ctx.limits.max_distinct;
    Box::new(input.filter_map(move |binding| {
        if overflowed {
            return None;
        }
        let binding = match binding {
            Ok(b) => b,
            Err(e) => return Some(Err(e)),
        };
        since_deadline_check += 1;
        if since_deadline_check >= 256 {
            since_deadline_check = 0;
            if let Err(e) = ctx.check_deadline() {
                return Some(Err(e));
            }
        }
        if !seen.insert(binding.clone()) {
            return None;
        }
        if seen.len() > limit {
            overflowed = true;
            return Some(Err(StoreError::LimitExceeded {
                kind: LimitKind::Distinct,
                limit,
            }));
        }
        Some(Ok(binding))
    }))
}

/// Stable sort by a list of `(expression, direction)` comparators.
/// Materializes the stream; refuses past the configured bound.
pub fn order_by<'a>(
    ds: &'a dyn Datastore,
    ctx: &'a ExecutionContext,
    input: BindingIter<'a>,
    conditions: &'a [OrderExpression],
) -> Result<BindingIter<'a>> {
    let limit = ctx.limits.max_order_by;
    let mut keyed: Vec<(Vec<SortValue>, Binding)> = Vec::new();
    for (i, binding) in input.enumerate() {
        if i % 1024 == 1023 {
            ctx.check_deadline()?;
        }
        let binding = binding?;
        if keyed.len() >= limit {
            return Err(StoreError::LimitExceeded {
                kind: LimitKind::OrderBy,
                limit,
            });
        }
        let mut keys = Vec::with_capacity(conditions.len());
        for condition in conditions {
            keys.push(sort_value(ds, &binding, condition)?);
        }
        keyed.push((keys, binding));
    }

    keyed.sort_by(|(a, _), (b, _)| {
        for (i, condition) in conditions.iter().enumerate() {
            let ordering = a[i].cmp(&b[i]);
            let ordering = if condition.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    Ok(Box::new(keyed.into_iter().map(|(_, b)| Ok(b))))
}

/// Drop `offset` bindings, then take at most `limit`.
pub fn slice(input: BindingIter<'_>, offset: usize, limit: Option<usize>) -> BindingIter<'_> {
    match limit {
        Some(limit) => Box::new(input.skip(offset).take(limit)),
        None => Box::new(input.skip(offset)),
    }
}

/// A precomputed sort key implementing the SPARQL term ordering:
/// unbound < blank node < IRI < literal. Literals compare numerically when
/// both sides are numeric, by lexical form otherwise.
#[derive(Debug)]
enum SortValue {
    Unbound,
    Blank(String),
    Iri(String),
    Literal {
        numeric: Option<Numeric>,
        lexical: String,
        rendered: String,
    },
}

impl SortValue {
    fn rank(&self) -> u8 {
        match self {
            SortValue::Unbound => 0,
            SortValue::Blank(_) => 1,
            SortValue::Iri(_) => 2,
            SortValue::Literal { .. } => 3,
        }
    }

    fn cmp(&self, other: &SortValue) -> Ordering {
        match (self, other) {
            (SortValue::Blank(a), SortValue::Blank(b)) => a.cmp(b),
            (SortValue::Iri(a), SortValue::Iri(b)) => a.cmp(b),
            (
                SortValue::Literal {
                    numeric: na,
                    lexical: la,
                    rendered: ra,
                },
                SortValue::Literal {
                    numeric: nb,
                    lexical: lb,
                    rendered: rb,
                },
            ) => {
                if let (Some(x), Some(y)) = (na, nb) {
                    if let Some(ordering) = x.compare(y) {
                        if ordering != Ordering::Equal {
                            return ordering;
                        }
                    }
                }
                la.cmp(lb).then_with(|| ra.cmp(rb))
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn sort_value(
    ds: &dyn Datastore,
    binding: &Binding,
    condition: &OrderExpression,
) -> Result<SortValue> {
    // An erroring sort expression orders with the unbound group.
    let Some(value) = filter::evaluate_expression(ds, binding, &condition.expr)? else {
        return Ok(SortValue::Unbound);
    };
    let term = match &value {
        filter::ExprValue::Id(id) => ds.decode(*id)?,
        filter::ExprValue::Term(t) => (**t).clone(),
    };
    Ok(match term {
        Term::BlankNode(b) => SortValue::Blank(b.as_str().to_owned()),
        Term::NamedNode(n) => SortValue::Iri(n.into_string()),
        Term::Literal(l) => SortValue::Literal {
            numeric: Numeric::from_literal(&l),
            lexical: l.value().to_owned(),
            rendered: l.to_string(),
        },
    })
}

/// `Option<BindingValue>` ordering helper shared with aggregation MIN/MAX:
/// SPARQL term order over decoded values.
pub(crate) fn compare_terms(ds: &dyn Datastore, a: &BindingValue, b: &BindingValue) -> Result<Ordering> {
    let to_sort = |v: &BindingValue| -> Result<SortValue> {
        let term = match v {
            BindingValue::Id(id) => ds.decode(*id)?,
            BindingValue::Term(t) => (**t).clone(),
            BindingValue::Unbound => return Ok(SortValue::Unbound),
        };
        Ok(match term {
            Term::BlankNode(b) => SortValue::Blank(b.as_str().to_owned()),
            Term::NamedNode(n) => SortValue::Iri(n.into_string()),
            Term::Literal(l) => SortValue::Literal {
                numeric: Numeric::from_literal(&l),
                lexical: l.value().to_owned(),
                rendered: l.to_string(),
            },
        })
    };
    Ok(to_sort(a)?.cmp(&to_sort(b)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingKey;
    use crate::eval::QueryLimits;
    use crate::expr::Expression;
    use triad_model::{Literal, TermId};

    fn id(n: u64) -> BindingValue {
        // Inline integers decode without a dictionary, which keeps these
        // fixtures usable against an empty datastore.
        BindingValue::Id(TermId::inline_integer(n as i64).expect("small integer"))
    }

    fn b(pairs: &[(&str, u64)]) -> Binding {
        pairs
            .iter()
            .map(|(k, v)| (BindingKey::var(k), id(*v)))
            .collect()
    }

    fn boxed(rows: Vec<Binding>) -> BindingIter<'static> {
        Box::new(rows.into_iter().map(Ok))
    }

    #[test]
    fn distinct_deduplicates() {
        let ctx = ExecutionContext::default();
        let rows = vec![b(&[("x", 1)]), b(&[("x", 2)]), b(&[("x", 1)])];
        let out: Vec<_> = distinct(&ctx, boxed(rows)).map(|r| r.unwrap()).collect();
        assert_eq!(out, vec![b(&[("x", 1)]), b(&[("x", 2)])]);
    }

    #[test]
    fn distinct_limit_raises() {
        let limits = QueryLimits {
            max_distinct: 2,
            ..QueryLimits::default()
        };
        let ctx = ExecutionContext::new(limits);
        let rows = vec![b(&[("x", 1)]), b(&[("x", 2)]), b(&[("x", 3)])];
        let out: Result<Vec<_>> = distinct(&ctx, boxed(rows)).collect();
        assert!(matches!(
            out,
            Err(StoreError::LimitExceeded {
                kind: LimitKind::Distinct,
                ..
            })
        ));
    }

    #[test]
    fn order_by_follows_term_order() {
        let mut ds = crate::datastore::MemDatastore::new();
        let blank = ds.encode(&Term::BlankNode(triad_model::BlankNode::new("b")));
        let iri = ds.encode(&Term::iri("http://ex.org/x"));
        let lit = ds.encode(&Term::Literal(Literal::simple("x")));

        let mk = |v: TermId| -> Binding {
            [(BindingKey::var("x"), BindingValue::Id(v))]
                .into_iter()
                .collect()
        };
        let unbound = Binding::new();

        let ctx = ExecutionContext::default();
        let conditions = vec![OrderExpression {
            expr: Expression::variable("x"),
            descending: false,
        }];
        let out: Vec<_> = order_by(
            &ds,
            &ctx,
            boxed(vec![mk(lit), mk(iri), unbound.clone(), mk(blank)]),
            &conditions,
        )
        .unwrap()
        .map(|r| r.unwrap())
        .collect();

        assert_eq!(out[0], unbound);
        assert_eq!(out[1], mk(blank));
        assert_eq!(out[2], mk(iri));
        assert_eq!(out[3], mk(lit));
    }

    #[test]
    fn order_by_numeric_before_lexical() {
        let mut ds = crate::datastore::MemDatastore::new();
        let mut mk = |v: i64| -> Binding {
            let id = ds.encode(&Term::Literal(Literal::integer(v)));
            [(BindingKey::var("n"), BindingValue::Id(id))]
                .into_iter()
                .collect()
        };
        // Lexically "10" < "9"; numerically 9 < 10.
        let rows = vec![mk(10), mk(9)];
        let ctx = ExecutionContext::default();
        let conditions = vec![OrderExpression {
            expr: Expression::variable("n"),
            descending: false,
        }];
        let out: Vec<_> = order_by(&ds, &ctx, boxed(rows.clone()), &conditions)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(out, vec![rows[1].clone(), rows[0].clone()]);
    }

    #[test]
    fn order_by_descending_and_stability() {
        let ctx = ExecutionContext::default();
        let ds = crate::datastore::MemDatastore::new();
        // Two rows with equal keys keep their input order (stable sort).
        let r1 = b(&[("x", 5), ("tag", 1)]);
        let r2 = b(&[("x", 5), ("tag", 2)]);
        let conditions = vec![OrderExpression {
            expr: Expression::variable("x"),
            descending: true,
        }];
        let out: Vec<_> = order_by(&ds, &ctx, boxed(vec![r1.clone(), r2.clone()]), &conditions)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(out, vec![r1, r2]);
    }

    #[test]
    fn order_by_limit_raises() {
        let limits = QueryLimits {
            max_order_by: 1,
            ..QueryLimits::default()
        };
        let ctx = ExecutionContext::new(limits);
        let ds = crate::datastore::MemDatastore::new();
        let conditions = vec![OrderExpression {
            expr: Expression::variable("x"),
            descending: false,
        }];
        let out = order_by(
            &ds,
            &ctx,
            boxed(vec![b(&[("x", 1)]), b(&[("x", 2)])]),
            &conditions,
        )
        .map(|iter| iter.count());
        assert!(matches!(
            out,
            Err(StoreError::LimitExceeded {
                kind: LimitKind::OrderBy,
                ..
            })
        ));
    }

    #[test]
    fn slice_applies_offset_and_limit() {
        let rows: Vec<Binding> = (0..10).map(|i| b(&[("x", i)])).collect();
        let out: Vec<_> = slice(boxed(rows.clone()), 2, Some(3))
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(out, rows[2..5].to_vec());

        let unlimited: Vec<_> = slice(boxed(rows.clone()), 8, None)
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(unlimited, rows[8..].to_vec());
    }
}
