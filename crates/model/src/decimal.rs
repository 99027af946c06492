//! Inline codec for `xsd:decimal`.
//!
//! The payload layout is `sign[59] | exp[58:48] | mantissa[47:0]` with the
//! exponent biased by 1023; the denoted value is
//! `sign * mantissa * 10^(exp - 1023)`. Values whose normalized mantissa does
//! not fit 48 bits, or whose exponent leaves the 11-bit field, are rejected
//! and fall through to the interned path. The reverse mapping reproduces the
//! exact decimal value.

use crate::id::{IdTag, TermId};
use rust_decimal::Decimal;

const SIGN_BIT: u64 = 1 << 59;
const EXP_SHIFT: u32 = 48;
const EXP_MASK: u64 = (1 << 11) - 1;
const EXP_BIAS: i32 = 1023;
const MANTISSA_MASK: u64 = (1 << 48) - 1;

/// Encode `value` as an inline decimal id, if it is exactly representable.
pub fn inline_decimal(value: &Decimal) -> Option<TermId> {
    // Normalization strips trailing zeros so that equal values share one
    // encoding ("1.10" and "1.1" are the same xsd:decimal value).
    let value = value.normalize();
    let mantissa = value.mantissa();
    let negative = mantissa < 0;
    let mantissa = mantissa.unsigned_abs();
    if mantissa > MANTISSA_MASK as u128 {
        return None;
    }
    // rust_decimal scales are 0..=28, so the biased exponent always fits the
    // 11-bit field; keep the check anyway for the codec's own invariant.
    let exp = -(value.scale() as i32);
    let biased = exp + EXP_BIAS;
    if !(0..=EXP_MASK as i32).contains(&biased) {
        return None;
    }
    let mut payload = ((biased as u64) << EXP_SHIFT) | mantissa as u64;
    if negative {
        payload |= SIGN_BIT;
    }
    Some(TermId::from_parts(IdTag::Decimal, payload))
}

/// Decode an inline decimal id back into its exact value.
pub fn decode_decimal(id: TermId) -> Option<Decimal> {
    if id.tag() != IdTag::Decimal {
        return None;
    }
    let payload = id.payload();
    let negative = payload & SIGN_BIT != 0;
    let biased = ((payload >> EXP_SHIFT) & EXP_MASK) as i32;
    let mantissa = payload & MANTISSA_MASK;
    let scale = (EXP_BIAS - biased).max(0) as u32;
    let mut mantissa = i128::from(mantissa);
    let mut exp = biased - EXP_BIAS;
    // Positive exponents cannot come out of the encoder above, but the layout
    // admits them; expand into the mantissa so the value survives.
    while exp > 0 {
        mantissa = mantissa.checked_mul(10)?;
        exp -= 1;
    }
    if negative {
        mantissa = -mantissa;
    }
    Some(Decimal::from_i128_with_scale(mantissa, scale).normalize())
}
