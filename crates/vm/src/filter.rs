//! Scalar expression evaluation: FILTER, HAVING, Extend and the inline
//! condition of OPTIONAL.
//!
//! A filter expression evaluates to `true`, `false` or `error`; only `true`
//! passes. [`evaluate_filter_3vl`] preserves the error arm for callers that
//! need it, [`evaluate_filter`] collapses error to `false` for WHERE-clause
//! semantics. Expression-level type errors are `Ok(None)`; storage faults
//! propagate as real errors.

use crate::binding::{Binding, BindingValue};
use crate::datastore::Datastore;
use crate::eval::{BindingIter, ExecutionContext};
use crate::expr::Expression;
use chrono::DateTime;
use std::cmp::Ordering;
use std::sync::Arc;
use triad_model::vocab::xsd;
use triad_model::{inline, IdTag, Literal, NamedNode, Numeric, Result, Term, TermId};

/// Three-valued filter outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Error,
}

/// An evaluated expression value: an id when the value is (or encodes to)
/// one, otherwise the term itself.
#[derive(Debug, Clone)]
pub enum ExprValue {
    Id(TermId),
    Term(Arc<Term>),
}

impl ExprValue {
    fn from_term(term: Term) -> Self {
        match inline::inline_id(&term) {
            Some(id) => ExprValue::Id(id),
            None => ExprValue::Term(Arc::new(term)),
        }
    }

    fn boolean(value: bool) -> Self {
        ExprValue::Id(TermId::inline_boolean(value))
    }

    fn to_term(&self, ds: &dyn Datastore) -> Result<Term> {
        match self {
            ExprValue::Id(id) => ds.decode(*id),
            ExprValue::Term(t) => Ok((**t).clone()),
        }
    }

    fn numeric(&self, ds: &dyn Datastore) -> Result<Option<Numeric>> {
        match self {
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
}

/// Evaluate an expression against a binding. `Ok(None)` is the SPARQL
/// expression error.
pub fn evaluate_expression(
    ds: &dyn Datastore,
    binding: &Binding,
    expr: &Expression,
) -> Result<Option<ExprValue>> {
    Ok(match expr {
        Expression::Literal(l) => Some(ExprValue::from_term(Term::Literal(l.clone()))),
        Expression::NamedNode(n) => Some(ExprValue::from_term(Term::NamedNode(n.clone()))),
        Expression::Variable(v) => match binding.get_var(v.name()) {
            Some(BindingValue::Id(id)) => Some(ExprValue::Id(*id)),
            Some(BindingValue::Term(t)) => Some(ExprValue::Term(t.clone())),
            Some(BindingValue::Unbound) | None => None,
        },
        Expression::Bound(v) => {
            let bound = matches!(
                binding.get_var(v.name()),
                Some(BindingValue::Id(_) | BindingValue::Term(_))
            );
            Some(ExprValue::boolean(bound))
        }
        Expression::Not(inner) => match truth(ds, binding, inner)? {
            Truth::True => Some(ExprValue::boolean(false)),
            Truth::False => Some(ExprValue::boolean(true)),
            Truth::Error => None,
        },
        Expression::And(a, b) => match truth(ds, binding, a)? {
            // Short-circuit: false wins regardless of the other side.
            Truth::False => Some(ExprValue::boolean(false)),
            lhs => match (lhs, truth(ds, binding, b)?) {
                (_, Truth::False) => Some(ExprValue::boolean(false)),
                (Truth::True, Truth::True) => Some(ExprValue::boolean(true)),
                _ => None,
            },
        },
        Expression::Or(a, b) => match truth(ds, binding, a)? {
            // Short-circuit: true wins regardless of the other side.
            Truth::True => Some(ExprValue::boolean(true)),
            lhs => match (lhs, truth(ds, binding, b)?) {
                (_, Truth::True) => Some(ExprValue::boolean(true)),
                (Truth::False, Truth::False) => Some(ExprValue::boolean(false)),
                _ => None,
            },
        },
        Expression::Equal(a, b) => binary(ds, binding, a, b)?
            .and_then(|(a, b)| compare_equality(ds, &a, &b).transpose())
            .transpose()?
            .map(ExprValue::boolean),
        Expression::SameTerm(a, b) => match binary(ds, binding, a, b)? {
            Some((a, b)) => {
                let same = a.to_term(ds)? == b.to_term(ds)?;
                Some(ExprValue::boolean(same))
            }
            None => None,
        },
        Expression::Greater(a, b) => ordering(ds, binding, a, b)?
            .map(|o| ExprValue::boolean(o == Ordering::Greater)),
        Expression::GreaterOrEqual(a, b) => ordering(ds, binding, a, b)?
            .map(|o| ExprValue::boolean(o != Ordering::Less)),
        Expression::Less(a, b) => {
            ordering(ds, binding, a, b)?.map(|o| ExprValue::boolean(o == Ordering::Less))
        }
        Expression::LessOrEqual(a, b) => ordering(ds, binding, a, b)?
            .map(|o| ExprValue::boolean(o != Ordering::Greater)),
        Expression::Add(a, b) => arithmetic(ds, binding, a, b, Numeric::checked_add)?,
        Expression::Subtract(a, b) => arithmetic(ds, binding, a, b, Numeric::checked_sub)?,
        Expression::Multiply(a, b) => arithmetic(ds, binding, a, b, Numeric::checked_mul)?,
        Expression::Divide(a, b) => arithmetic(ds, binding, a, b, Numeric::checked_div)?,
        Expression::UnaryMinus(inner) => match evaluate_expression(ds, binding, inner)? {
            Some(v) => v
                .numeric(ds)?
                .map(|n| ExprValue::from_term(Term::Literal(n.neg().to_literal()))),
            None => None,
        },
        Expression::IsIri(inner) => kind_test(ds, binding, inner, |t| {
            matches!(t, Term::NamedNode(_))
        })?,
        Expression::IsBlank(inner) => kind_test(ds, binding, inner, |t| {
            matches!(t, Term::BlankNode(_))
        })?,
        Expression::IsLiteral(inner) => kind_test(ds, binding, inner, |t| {
            matches!(t, Term::Literal(_))
        })?,
        Expression::IsNumeric(inner) => match evaluate_expression(ds, binding, inner)? {
            Some(v) => Some(ExprValue::boolean(v.numeric(ds)?.is_some())),
            None => None,
        },
        Expression::Str(inner) => match evaluate_expression(ds, binding, inner)? {
            Some(v) => match v.to_term(ds)? {
                Term::NamedNode(n) => Some(ExprValue::from_term(Term::Literal(
                    Literal::simple(n.into_string()),
                ))),
                Term::Literal(l) => Some(ExprValue::from_term(Term::Literal(
                    Literal::simple(l.value()),
                ))),
                Term::BlankNode(_) => None,
            },
            None => None,
        },
        Expression::Lang(inner) => match evaluate_expression(ds, binding, inner)? {
            Some(v) => match v.to_term(ds)? {
                Term::Literal(l) => Some(ExprValue::from_term(Term::Literal(
                    Literal::simple(l.language().unwrap_or("")),
                ))),
                _ => None,
            },
            None => None,
        },
        Expression::Datatype(inner) => match evaluate_expression(ds, binding, inner)? {
            Some(v) => match v.to_term(ds)? {
                Term::Literal(l) => Some(ExprValue::from_term(Term::NamedNode(
                    NamedNode::new(l.datatype()),
                ))),
                _ => None,
            },
            None => None,
        },
    })
}

fn binary(
    ds: &dyn Datastore,
    binding: &Binding,
    a: &Expression,
    b: &Expression,
) -> Result<Option<(ExprValue, ExprValue)>> {
    let Some(a) = evaluate_expression(ds, binding, a)? else {
        return Ok(None);
    };
    let Some(b) = evaluate_expression(ds, binding, b)? else {
        return Ok(None);
    };
    Ok(Some((a, b)))
}

fn arithmetic(
    ds: &dyn Datastore,
    binding: &Binding,
    a: &Expression,
    b: &Expression,
    op: fn(&Numeric, &Numeric) -> Option<Numeric>,
) -> Result<Option<ExprValue>> {
    let Some((a, b)) = binary(ds, binding, a, b)? else {
        return Ok(None);
    };
    let (Some(a), Some(b)) = (a.numeric(ds)?, b.numeric(ds)?) else {
        return Ok(None);
    };
    Ok(op(&a, &b).map(|n| ExprValue::from_term(Term::Literal(n.to_literal()))))
}

fn kind_test(
    ds: &dyn Datastore,
    binding: &Binding,
    inner: &Expression,
    test: fn(&Term) -> bool,
) -> Result<Option<ExprValue>> {
    match evaluate_expression(ds, binding, inner)? {
        Some(v) => {
            let term = v.to_term(ds)?;
            Ok(Some(ExprValue::boolean(test(&term))))
        }
        None => Ok(None),
    }
}

fn truth(ds: &dyn Datastore, binding: &Binding, expr: &Expression) -> Result<Truth> {
    match evaluate_expression(ds, binding, expr)? {
        Some(v) => Ok(match effective_boolean_value(ds, &v)? {
            Some(true) => Truth::True,
            Some(false) => Truth::False,
            None => Truth::Error,
        }),
        None => Ok(Truth::Error),
    }
}

/// The SPARQL effective boolean value. `None` is the EBV type error.
pub fn effective_boolean_value(ds: &dyn Datastore, value: &ExprValue) -> Result<Option<bool>> {
    // Inline ids answer without touching storage.
    if let ExprValue::Id(id) = value {
        match id.tag() {
            IdTag::Boolean => return Ok(id.as_boolean()),
            IdTag::Integer | IdTag::Decimal => {
                let n = Numeric::from_id(*id).expect("inline numeric");
                return Ok(Some(!n.is_zero()));
            }
            IdTag::DateTime => return Ok(None),
            _ => {}
        }
    }
    let term = value.to_term(ds)?;
    let Term::Literal(literal) = &term else {
        return Ok(None);
    };
    match literal.datatype() {
        xsd::BOOLEAN => Ok(match literal.value().trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }),
        xsd::STRING => Ok(Some(!literal.value().is_empty())),
        _ => match Numeric::from_literal(literal) {
            Some(n) => Ok(Some(!n.is_zero() && !n.is_nan())),
            None => Ok(None),
        },
    }
}

/// Full three-valued evaluation of a filter expression.
pub fn evaluate_filter_3vl(
    ds: &dyn Datastore,
    binding: &Binding,
    expr: &Expression,
) -> Result<Truth> {
    truth(ds, binding, expr)
}

/// WHERE-clause semantics: error collapses to false.
pub fn evaluate_filter(ds: &dyn Datastore, binding: &Binding, expr: &Expression) -> Result<bool> {
    Ok(matches!(evaluate_filter_3vl(ds, binding, expr)?, Truth::True))
}

/// Value equality per SPARQL `=`: term identity first, then value spaces,
/// `None` when the comparison itself is a type error.
fn compare_equality(
    ds: &dyn Datastore,
    a: &ExprValue,
    b: &ExprValue,
) -> Result<Option<bool>> {
    if let (ExprValue::Id(x), ExprValue::Id(y)) = (a, b) {
        if x == y {
            return Ok(Some(true));
        }
    }
    let ta = a.to_term(ds)?;
    let tb = b.to_term(ds)?;
    if ta == tb {
        return Ok(Some(true));
    }
    if let Some(ordering) = compare_values(ds, a, b, &ta, &tb)? {
        return Ok(Some(ordering == Ordering::Equal));
    }
    match (&ta, &tb) {
        // Two literals that share no comparable value space: equality is a
        // type error unless they are the identical term (handled above).
        (Term::Literal(_), Term::Literal(_)) => Ok(None),
        _ => Ok(Some(false)),
    }
}

fn ordering(
    ds: &dyn Datastore,
    binding: &Binding,
    a: &Expression,
    b: &Expression,
) -> Result<Option<Ordering>> {
    let Some((a, b)) = binary(ds, binding, a, b)? else {
        return Ok(None);
    };
    let ta = a.to_term(ds)?;
    let tb = b.to_term(ds)?;
    compare_values(ds, &a, &b, &ta, &tb)
}

/// Compare two values in a shared value space: numeric, string, boolean or
/// dateTime. `None` when no shared space exists (or NaN is involved).
fn compare_values(
    ds: &dyn Datastore,
    a: &ExprValue,
    b: &ExprValue,
    ta: &Term,
    tb: &Term,
) -> Result<Option<Ordering>> {
    if let (Some(x), Some(y)) = (a.numeric(ds)?, b.numeric(ds)?) {
        return Ok(x.compare(&y));
    }
    let (Term::Literal(la), Term::Literal(lb)) = (ta, tb) else {
        return Ok(None);
    };
    if is_string_literal(la) && is_string_literal(lb) {
        return Ok(Some(la.value().cmp(lb.value())));
    }
    if la.datatype() == xsd::BOOLEAN && lb.datatype() == xsd::BOOLEAN {
        let (Some(x), Some(y)) = (parse_bool(la), parse_bool(lb)) else {
            return Ok(None);
        };
        return Ok(Some(x.cmp(&y)));
    }
    if la.datatype() == xsd::DATE_TIME && lb.datatype() == xsd::DATE_TIME {
        let (Some(x), Some(y)) = (parse_datetime(la), parse_datetime(lb)) else {
            return Ok(None);
        };
        return Ok(Some(x.cmp(&y)));
    }
    Ok(None)
}

fn is_string_literal(l: &Literal) -> bool {
    l.is_simple() || l.datatype() == xsd::STRING
}

fn parse_bool(l: &Literal) -> Option<bool> {
    match l.value().trim() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_datetime(l: &Literal) -> Option<DateTime<chrono::FixedOffset>> {
    DateTime::parse_from_rfc3339(l.value().trim()).ok()
}

/// Convert an evaluated value into a binding value, canonicalizing to a
/// store id when possible.
pub fn expr_value_to_binding(ds: &dyn Datastore, value: ExprValue) -> Result<BindingValue> {
    match value {
        ExprValue::Id(id) => Ok(BindingValue::Id(id)),
        ExprValue::Term(t) => BindingValue::from_term(ds, (*t).clone()),
    }
}

/// Wrap a stream with a WHERE-clause filter.
pub fn filter_stream<'a>(
    ds: &'a dyn Datastore,
    ctx: &'a ExecutionContext,
    input: BindingIter<'a>,
    expr: &'a Expression,
) -> BindingIter<'a> {
    let mut since_deadline_check = 0u32;
    Box::new(input.filter_map(move |binding| {
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
        match evaluate_filter(ds, &binding, expr) {
            Ok(true) => Some(Ok(binding)),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemDatastore;
    use crate::expr::Variable;
    use triad_model::BlankNode;

    fn ds_with(binding_terms: &[(&str, Term)]) -> (MemDatastore, Binding) {
        let mut ds = MemDatastore::new();
        let mut binding = Binding::new();
        for (name, term) in binding_terms {
            let id = ds.encode(term);
            binding.bind(
                crate::binding::BindingKey::var(name),
                BindingValue::Id(id),
            );
        }
        (ds, binding)
    }

    fn int(v: i64) -> Term {
        Term::Literal(Literal::integer(v))
    }

    fn var(name: &str) -> Expression {
        Expression::variable(name)
    }

    fn lit(l: Literal) -> Expression {
        Expression::Literal(l)
    }

    #[test]
    fn ebv_rules() {
        let (ds, binding) = ds_with(&[
            ("t", Term::Literal(Literal::boolean(true))),
            ("zero", int(0)),
            ("n", int(3)),
            ("empty", Term::Literal(Literal::simple(""))),
            ("word", Term::Literal(Literal::simple("w"))),
            ("iri", Term::iri("http://ex.org/x")),
        ]);
        let check = |name: &str, expected: Truth| {
            assert_eq!(
                evaluate_filter_3vl(&ds, &binding, &var(name)).unwrap(),
                expected,
                "EBV of ?{name}"
            );
        };
        check("t", Truth::True);
        check("zero", Truth::False);
        check("n", Truth::True);
        check("empty", Truth::False);
        check("word", Truth::True);
        check("iri", Truth::Error);
    }

    #[test]
    fn where_semantics_collapse_error() {
        let (ds, binding) = ds_with(&[("iri", Term::iri("http://ex.org/x"))]);
        assert!(!evaluate_filter(&ds, &binding, &var("iri")).unwrap());
        assert!(!evaluate_filter(&ds, &binding, &var("missing")).unwrap());
    }

    #[test]
    fn three_valued_connectives() {
        let (ds, binding) = ds_with(&[
            ("t", Term::Literal(Literal::boolean(true))),
            ("f", Term::Literal(Literal::boolean(false))),
            ("e", Term::iri("http://ex.org/err")),
        ]);
        let and = |a: &str, b: &str| {
            evaluate_filter_3vl(&ds, &binding, &Expression::and(var(a), var(b))).unwrap()
        };
        let or = |a: &str, b: &str| {
            evaluate_filter_3vl(&ds, &binding, &Expression::or(var(a), var(b))).unwrap()
        };
        // error AND false = false; error AND true = error.
        assert_eq!(and("e", "f"), Truth::False);
        assert_eq!(and("e", "t"), Truth::Error);
        // error OR true = true; error OR false = error.
        assert_eq!(or("e", "t"), Truth::True);
        assert_eq!(or("e", "f"), Truth::Error);
    }

    #[test]
    fn numeric_comparison_across_types() {
        let (ds, binding) = ds_with(&[("n", int(150))]);
        let expr = Expression::and(
            Expression::greater_or_equal(var("n"), lit(Literal::integer(100))),
            Expression::less(var("n"), lit(Literal::integer(200))),
        );
        assert!(evaluate_filter(&ds, &binding, &expr).unwrap());

        let dec = Expression::less(
            var("n"),
            lit(Literal::typed("150.5", NamedNode::new(xsd::DECIMAL))),
        );
        assert!(evaluate_filter(&ds, &binding, &dec).unwrap());
    }

    #[test]
    fn equality_distinguishes_error_from_false() {
        let (ds, binding) = ds_with(&[
            ("a", Term::iri("http://ex.org/a")),
            ("b", Term::iri("http://ex.org/b")),
            ("odd", Term::Literal(Literal::typed("x", NamedNode::new("http://ex.org/dt")))),
            ("odd2", Term::Literal(Literal::typed("y", NamedNode::new("http://ex.org/dt")))),
        ]);
        let eq = |a: &str, b: &str| {
            evaluate_filter_3vl(
                &ds,
                &binding,
                &Expression::Equal(Box::new(var(a)), Box::new(var(b))),
            )
            .unwrap()
        };
        assert_eq!(eq("a", "a"), Truth::True);
        assert_eq!(eq("a", "b"), Truth::False);
        // Unknown datatypes share no value space.
        assert_eq!(eq("odd", "odd2"), Truth::Error);
    }

    #[test]
    fn bound_and_kind_tests() {
        let (ds, mut binding) = ds_with(&[
            ("iri", Term::iri("http://ex.org/x")),
            ("n", int(5)),
        ]);
        binding.bind(
            crate::binding::BindingKey::var("u"),
            BindingValue::Unbound,
        );
        let t = |e: Expression| evaluate_filter(&ds, &binding, &e).unwrap();
        assert!(t(Expression::Bound(Variable::new("iri"))));
        assert!(!t(Expression::Bound(Variable::new("u"))));
        assert!(!t(Expression::Bound(Variable::new("missing"))));
        assert!(t(Expression::IsIri(Box::new(var("iri")))));
        assert!(t(Expression::IsNumeric(Box::new(var("n")))));
        assert!(!t(Expression::IsLiteral(Box::new(var("iri")))));
    }

    #[test]
    fn arithmetic_with_promotion() {
        let (ds, binding) = ds_with(&[("n", int(7))]);
        let expr = Expression::Equal(
            Box::new(Expression::Add(
                Box::new(var("n")),
                Box::new(lit(Literal::typed("0.5", NamedNode::new(xsd::DECIMAL)))),
            )),
            Box::new(lit(Literal::typed("7.5", NamedNode::new(xsd::DECIMAL)))),
        );
        assert!(evaluate_filter(&ds, &binding, &expr).unwrap());
        // Division by zero is an expression error, not a fault.
        let div = Expression::Divide(Box::new(var("n")), Box::new(lit(Literal::integer(0))));
        assert_eq!(
            evaluate_filter_3vl(&ds, &binding, &div).unwrap(),
            Truth::Error
        );
    }

    #[test]
    fn str_lang_datatype_accessors() {
        let mut ds = MemDatastore::new();
        let mut binding = Binding::new();
        let id = ds.encode(&Term::Literal(Literal::lang("chat", "fr")));
        binding.bind(crate::binding::BindingKey::var("l"), BindingValue::Id(id));
        let blank = ds.encode(&Term::BlankNode(BlankNode::new("b")));
        binding.bind(
            crate::binding::BindingKey::var("b"),
            BindingValue::Id(blank),
        );

        let lang = evaluate_expression(&ds, &binding, &Expression::Lang(Box::new(var("l"))))
            .unwrap()
            .unwrap();
        assert_eq!(
            lang.to_term(&ds).unwrap(),
            Term::Literal(Literal::simple("fr"))
        );

        let dt = evaluate_expression(&ds, &binding, &Expression::Datatype(Box::new(var("l"))))
            .unwrap()
            .unwrap();
        assert_eq!(
            dt.to_term(&ds).unwrap(),
            Term::iri(triad_model::vocab::rdf::LANG_STRING)
        );

        // STR of a blank node is an error.
        assert!(
            evaluate_expression(&ds, &binding, &Expression::Str(Box::new(var("b"))))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn datetime_ordering() {
        let (ds, binding) = ds_with(&[(
            "d",
            Term::Literal(Literal::typed(
                "2024-05-01T00:00:00Z",
                NamedNode::new(xsd::DATE_TIME),
            )),
        )]);
        // Comparison against a non-UTC (interned) dateTime still works by
        // instant.
        let expr = Expression::Less(
            Box::new(var("d")),
            Box::new(lit(Literal::typed(
                "2024-05-01T03:00:00+02:00",
                NamedNode::new(xsd::DATE_TIME),
            ))),
        );
        assert!(evaluate_filter(&ds, &binding, &expr).unwrap());
    }
}
