//! The inline fast path: mapping small numeric, temporal and boolean
//! literals to self-contained ids and back.
//!
//! Inline encoding is value-based: `"01"^^xsd:integer` and `"1"^^xsd:integer`
//! share one id, and decoding yields the canonical lexical form. Values that
//! do not fit (wide integers, long decimals, non-UTC or sub-millisecond
//! dateTimes) return `None` and are interned instead.

use crate::decimal::{decode_decimal, inline_decimal};
use crate::id::{IdTag, TermId};
use crate::term::{Literal, NamedNode, Term};
use crate::vocab::xsd;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Try to encode `term` inline. `None` means the term must be interned.
pub fn inline_id(term: &Term) -> Option<TermId> {
    let literal = term.as_literal()?;
    match literal.datatype() {
        xsd::BOOLEAN => parse_boolean(literal.value()).map(TermId::inline_boolean),
        xsd::INTEGER => i64::from_str(literal.value().trim())
            .ok()
            .and_then(TermId::inline_integer),
        xsd::DECIMAL => Decimal::from_str(literal.value().trim())
            .ok()
            .and_then(|d| inline_decimal(&d)),
        xsd::DATE_TIME => parse_utc_millis(literal.value()).and_then(TermId::inline_datetime_ms),
        _ => None,
    }
}

/// Decode an inline id into its canonical term. `None` for interned tags.
pub fn decode_inline(id: TermId) -> Option<Term> {
    let literal = match id.tag() {
        IdTag::Integer => Literal::integer(id.as_integer()?),
        IdTag::Decimal => Literal::decimal(decode_decimal(id)?),
        IdTag::Boolean => Literal::boolean(id.as_boolean()?),
        IdTag::DateTime => {
            let ms = id.as_datetime_ms()?;
            let dt = Utc.timestamp_millis_opt(ms).single()?;
            Literal::typed(format_datetime(&dt), NamedNode::new(xsd::DATE_TIME))
        }
        _ => return None,
    };
    Some(Term::Literal(literal))
}

fn parse_boolean(lexical: &str) -> Option<bool> {
    match lexical.trim() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Parse an `xsd:dateTime` lexical form into epoch milliseconds, but only
/// when the encoding is lossless: an explicit UTC offset and no precision
/// finer than a millisecond.
fn parse_utc_millis(lexical: &str) -> Option<i64> {
    let parsed = DateTime::parse_from_rfc3339(lexical.trim()).ok()?;
    if parsed.offset().local_minus_utc() != 0 {
        return None;
    }
    if parsed.timestamp_subsec_nanos() % 1_000_000 != 0 {
        return None;
    }
    Some(parsed.timestamp_millis())
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    if dt.timestamp_subsec_millis() == 0 {
        dt.to_rfc3339_opts(SecondsFormat::Secs, true)
    } else {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}
