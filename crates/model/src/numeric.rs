//! The numeric tower used by FILTER comparison and aggregation.
//!
//! SPARQL type promotion is `integer < decimal < double`: any operation
//! touching a double yields a double, otherwise touching a decimal yields a
//! decimal.

use crate::decimal::{decode_decimal, inline_decimal};
use crate::id::{IdTag, TermId};
use crate::term::{Literal, Term};
use crate::vocab::xsd;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Integer(i64),
    Decimal(Decimal),
    Double(f64),
}

impl Numeric {
    /// Interpret an inline id as a number, if it is one.
    pub fn from_id(id: TermId) -> Option<Self> {
        match id.tag() {
            IdTag::Integer => id.as_integer().map(Numeric::Integer),
            IdTag::Decimal => decode_decimal(id).map(Numeric::Decimal),
            _ => None,
        }
    }

    /// Interpret a decoded term as a number, if its datatype is numeric and
    /// its lexical form parses.
    pub fn from_term(term: &Term) -> Option<Self> {
        let literal = term.as_literal()?;
        Self::from_literal(literal)
    }

    pub fn from_literal(literal: &Literal) -> Option<Self> {
        match literal.datatype() {
            xsd::INTEGER => i64::from_str(literal.value().trim()).ok().map(Numeric::Integer),
            xsd::DECIMAL => Decimal::from_str(literal.value().trim())
                .ok()
                .map(Numeric::Decimal),
            xsd::DOUBLE | xsd::FLOAT => {
                f64::from_str(literal.value().trim()).ok().map(Numeric::Double)
            }
            _ => None,
        }
    }

    /// The inline id for this value, when it fits.
    pub fn to_inline_id(&self) -> Option<TermId> {
        match self {
            Numeric::Integer(v) => TermId::inline_integer(*v),
            Numeric::Decimal(d) => inline_decimal(d),
            Numeric::Double(_) => None,
        }
    }

    pub fn to_literal(&self) -> Literal {
        match self {
            Numeric::Integer(v) => Literal::integer(*v),
            Numeric::Decimal(d) => Literal::decimal(*d),
            Numeric::Double(d) => Literal::double(*d),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Numeric::Integer(v) => *v == 0,
            Numeric::Decimal(d) => d.is_zero(),
            Numeric::Double(d) => *d == 0.0,
        }
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Numeric::Double(d) if d.is_nan())
    }

    fn as_double(&self) -> f64 {
        match self {
            Numeric::Integer(v) => *v as f64,
            Numeric::Decimal(d) => d.to_f64().unwrap_or(f64::NAN),
            Numeric::Double(d) => *d,
        }
    }

    fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Numeric::Integer(v) => Some(Decimal::from(*v)),
            Numeric::Decimal(d) => Some(*d),
            Numeric::Double(_) => None,
        }
    }

    /// Addition with type promotion. `None` signals overflow.
    pub fn checked_add(&self, other: &Numeric) -> Option<Numeric> {
        match (self, other) {
            (Numeric::Integer(a), Numeric::Integer(b)) => a.checked_add(*b).map(Numeric::Integer),
            (Numeric::Double(_), _) | (_, Numeric::Double(_)) => {
                Some(Numeric::Double(self.as_double() + other.as_double()))
            }
            _ => {
                let (a, b) = (self.as_decimal()?, other.as_decimal()?);
                a.checked_add(b).map(Numeric::Decimal)
            }
        }
    }

    pub fn checked_sub(&self, other: &Numeric) -> Option<Numeric> {
        self.checked_add(&other.neg())
    }

    pub fn checked_mul(&self, other: &Numeric) -> Option<Numeric> {
        match (self, other) {
            (Numeric::Integer(a), Numeric::Integer(b)) => a.checked_mul(*b).map(Numeric::Integer),
            (Numeric::Double(_), _) | (_, Numeric::Double(_)) => {
                Some(Numeric::Double(self.as_double() * other.as_double()))
            }
            _ => {
                let (a, b) = (self.as_decimal()?, other.as_decimal()?);
                a.checked_mul(b).map(Numeric::Decimal)
            }
        }
    }

    /// Division. Integer / integer is decimal division per SPARQL; division
    /// by zero is `None` (a type error at the expression layer).
    pub fn checked_div(&self, other: &Numeric) -> Option<Numeric> {
        match (self, other) {
            (Numeric::Double(_), _) | (_, Numeric::Double(_)) => {
                let d = other.as_double();
                Some(Numeric::Double(self.as_double() / d))
            }
            _ => {
                let (a, b) = (self.as_decimal()?, other.as_decimal()?);
                if b.is_zero() {
                    return None;
                }
                a.checked_div(b).map(Numeric::Decimal)
            }
        }
    }

    pub fn neg(&self) -> Numeric {
        match self {
            Numeric::Integer(v) => Numeric::Integer(v.wrapping_neg()),
            Numeric::Decimal(d) => Numeric::Decimal(-*d),
            Numeric::Double(d) => Numeric::Double(-*d),
        }
    }

    /// Divide by a count, for AVG. The result is at least decimal.
    pub fn avg_over(&self, count: u64) -> Option<Numeric> {
        let promoted = match self {
            Numeric::Integer(v) => Numeric::Decimal(Decimal::from(*v)),
            other => *other,
        };
        promoted.checked_div(&Numeric::Integer(count as i64))
    }

    /// Value comparison across the tower. `None` for NaN involvement.
    pub fn compare(&self, other: &Numeric) -> Option<Ordering> {
        match (self, other) {
            (Numeric::Integer(a), Numeric::Integer(b)) => Some(a.cmp(b)),
            (Numeric::Double(_), _) | (_, Numeric::Double(_)) => {
                self.as_double().partial_cmp(&other.as_double())
            }
            _ => Some(self.as_decimal()?.cmp(&other.as_decimal()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_ladder() {
        let int = Numeric::Integer(2);
        let dec = Numeric::Decimal(Decimal::new(15, 1)); // 1.5
        let dbl = Numeric::Double(0.5);

        assert_eq!(int.checked_add(&int), Some(Numeric::Integer(4)));
        assert!(matches!(int.checked_add(&dec), Some(Numeric::Decimal(_))));
        assert!(matches!(dec.checked_add(&dbl), Some(Numeric::Double(_))));
    }

    #[test]
    fn integer_overflow_is_reported() {
        let max = Numeric::Integer(i64::MAX);
        assert_eq!(max.checked_add(&Numeric::Integer(1)), None);
    }

    #[test]
    fn division_semantics() {
        let a = Numeric::Integer(1);
        let b = Numeric::Integer(2);
        assert_eq!(
            a.checked_div(&b),
            Some(Numeric::Decimal(Decimal::new(5, 1)))
        );
        assert_eq!(a.checked_div(&Numeric::Integer(0)), None);
        // Doubles divide by zero to infinity, not error.
        assert!(matches!(
            Numeric::Double(1.0).checked_div(&Numeric::Double(0.0)),
            Some(Numeric::Double(d)) if d.is_infinite()
        ));
    }

    #[test]
    fn cross_type_comparison() {
        let a = Numeric::Integer(3);
        let b = Numeric::Decimal(Decimal::new(30, 1)); // 3.0
        assert_eq!(a.compare(&b), Some(Ordering::Equal));
        assert_eq!(
            Numeric::Double(f64::NAN).compare(&a),
            None
        );
    }

    #[test]
    fn parse_from_literals() {
        assert_eq!(
            Numeric::from_literal(&Literal::integer(41)),
            Some(Numeric::Integer(41))
        );
        assert_eq!(
            Numeric::from_literal(&Literal::typed("2.5", crate::NamedNode::new(xsd::DECIMAL))),
            Some(Numeric::Decimal(Decimal::new(25, 1)))
        );
        assert_eq!(Numeric::from_literal(&Literal::simple("3")), None);
    }

    #[test]
    fn avg_is_at_least_decimal() {
        let sum = Numeric::Integer(3);
        assert_eq!(
            sum.avg_over(2),
            Some(Numeric::Decimal(Decimal::new(15, 1)))
        );
    }
}
