//! The 64-bit term identifier.
//!
//! The high 4 bits carry a type tag, the low 60 bits the payload. Interned
//! tags (0..=3) hold a dictionary sequence number; inline tags (4..=7) hold
//! the value itself, so small numerics, timestamps and booleans never touch
//! the persistent dictionary.
//!
//! Keys derived from ids are big-endian so that lexicographic byte order in
//! the key-value engine matches numeric id order.

use crate::error::{Result, StoreError};

pub const TAG_SHIFT: u32 = 60;
pub const PAYLOAD_BITS: u32 = 60;
pub const PAYLOAD_MASK: u64 = (1 << PAYLOAD_BITS) - 1;

/// Smallest and largest signed values representable in a 60-bit two's
/// complement payload (inline integers and epoch-millisecond dateTimes).
pub const INLINE_INT_MIN: i64 = -(1 << 59);
pub const INLINE_INT_MAX: i64 = (1 << 59) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IdTag {
    /// Interned IRI.
    Iri = 0,
    /// Interned blank node.
    BlankNode = 1,
    /// Interned simple literal.
    SimpleLiteral = 2,
    /// Interned typed or language-tagged literal.
    TypedLiteral = 3,
    /// Inline `xsd:integer`, 60-bit two's complement.
    Integer = 4,
    /// Inline `xsd:decimal`, `sign(1) | exp(11, biased 1023) | mantissa(48)`.
    Decimal = 5,
    /// Inline `xsd:dateTime`, signed milliseconds since the Unix epoch.
    DateTime = 6,
    /// Inline `xsd:boolean`.
    Boolean = 7,
}

impl IdTag {
    pub fn from_bits(bits: u8) -> Result<Self> {
        Ok(match bits {
            0 => IdTag::Iri,
            1 => IdTag::BlankNode,
            2 => IdTag::SimpleLiteral,
            3 => IdTag::TypedLiteral,
            4 => IdTag::Integer,
            5 => IdTag::Decimal,
            6 => IdTag::DateTime,
            7 => IdTag::Boolean,
            other => {
                return Err(StoreError::CorruptionDetected {
                    context: "term id".into(),
                    detail: format!("unknown tag {other}"),
                })
            }
        })
    }

    pub fn is_inline(self) -> bool {
        (self as u8) >= 4
    }

    /// The interned tags, in allocation order.
    pub const INTERNED: [IdTag; 4] = [
        IdTag::Iri,
        IdTag::BlankNode,
        IdTag::SimpleLiteral,
        IdTag::TypedLiteral,
    ];
}

/// Identifier of any RDF term. Two distinct ids never denote the same term.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermId(u64);

impl TermId {
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_parts(tag: IdTag, payload: u64) -> Self {
        debug_assert!(payload <= PAYLOAD_MASK);
        Self(((tag as u64) << TAG_SHIFT) | (payload & PAYLOAD_MASK))
    }

    pub fn tag(self) -> IdTag {
        // The tag field is 3 significant bits wide plus the inline marker, so
        // all 8 values decode; from_bits cannot fail here.
        IdTag::from_bits((self.0 >> TAG_SHIFT) as u8).expect("4-bit tag is always in range")
    }

    pub fn payload(self) -> u64 {
        self.0 & PAYLOAD_MASK
    }

    pub fn is_inline(self) -> bool {
        self.tag().is_inline()
    }

    /// Dictionary sequence number, for interned ids only.
    pub fn sequence(self) -> Option<u64> {
        if self.is_inline() {
            None
        } else {
            Some(self.payload())
        }
    }

    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    // Inline integers.

    /// Encode `v` as an inline integer, if it fits in 60 bits.
    pub fn inline_integer(v: i64) -> Option<Self> {
        if (INLINE_INT_MIN..=INLINE_INT_MAX).contains(&v) {
            Some(Self::from_parts(IdTag::Integer, (v as u64) & PAYLOAD_MASK))
        } else {
            None
        }
    }

    /// Decode an inline integer, sign-extending the 60-bit payload.
    pub fn as_integer(self) -> Option<i64> {
        if self.tag() != IdTag::Integer {
            return None;
        }
        Some(sign_extend_60(self.payload()))
    }

    // Inline dateTimes.

    pub fn inline_datetime_ms(ms: i64) -> Option<Self> {
        if (INLINE_INT_MIN..=INLINE_INT_MAX).contains(&ms) {
            Some(Self::from_parts(IdTag::DateTime, (ms as u64) & PAYLOAD_MASK))
        } else {
            None
        }
    }

    pub fn as_datetime_ms(self) -> Option<i64> {
        if self.tag() != IdTag::DateTime {
            return None;
        }
        Some(sign_extend_60(self.payload()))
    }

    // Inline booleans.

    pub fn inline_boolean(v: bool) -> Self {
        Self::from_parts(IdTag::Boolean, v as u64)
    }

    pub fn as_boolean(self) -> Option<bool> {
        if self.tag() != IdTag::Boolean {
            return None;
        }
        Some(self.payload() != 0)
    }
}

fn sign_extend_60(payload: u64) -> i64 {
    ((payload << 4) as i64) >> 4
}

impl std::fmt::Debug for TermId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TermId({:?}, {:#x})", self.tag(), self.payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn tag_roundtrip() {
        for bits in 0u8..8 {
            let tag = IdTag::from_bits(bits).unwrap();
            let id = TermId::from_parts(tag, 42);
            assert_eq!(id.tag(), tag);
            assert_eq!(id.payload(), 42);
        }
        assert!(IdTag::from_bits(9).is_err());
    }

    #[test]
    fn integer_bounds() {
        assert!(TermId::inline_integer(INLINE_INT_MIN).is_some());
        assert!(TermId::inline_integer(INLINE_INT_MAX).is_some());
        assert!(TermId::inline_integer(INLINE_INT_MIN - 1).is_none());
        assert!(TermId::inline_integer(INLINE_INT_MAX + 1).is_none());
    }

    #[test]
    fn negative_integers_sign_extend() {
        let id = TermId::inline_integer(-1).unwrap();
        assert_eq!(id.as_integer(), Some(-1));
        let id = TermId::inline_integer(INLINE_INT_MIN).unwrap();
        assert_eq!(id.as_integer(), Some(INLINE_INT_MIN));
    }

    #[test]
    fn booleans() {
        assert_eq!(TermId::inline_boolean(true).as_boolean(), Some(true));
        assert_eq!(TermId::inline_boolean(false).as_boolean(), Some(false));
        assert_ne!(TermId::inline_boolean(true), TermId::inline_boolean(false));
    }

    #[test]
    fn big_endian_bytes_sort_like_ids() {
        let a = TermId::from_parts(IdTag::Iri, 1);
        let b = TermId::from_parts(IdTag::Iri, 300);
        assert!(a.to_be_bytes() < b.to_be_bytes());
        assert!(a < b);
    }

    proptest! {
        #[test]
        fn integer_roundtrip(v in INLINE_INT_MIN..=INLINE_INT_MAX) {
            let id = TermId::inline_integer(v).unwrap();
            prop_assert_eq!(id.as_integer(), Some(v));
            prop_assert!(id.is_inline());
        }

        #[test]
        fn datetime_roundtrip(ms in INLINE_INT_MIN..=INLINE_INT_MAX) {
            let id = TermId::inline_datetime_ms(ms).unwrap();
            prop_assert_eq!(id.as_datetime_ms(), Some(ms));
        }

        #[test]
        fn be_bytes_roundtrip(raw in any::<u64>()) {
            let id = TermId::from_u64(raw);
            prop_assert_eq!(TermId::from_be_bytes(id.to_be_bytes()), id);
        }

        #[test]
        fn nonnegative_integers_sort_by_bytes(a in 0..=INLINE_INT_MAX, b in 0..=INLINE_INT_MAX) {
            let ia = TermId::inline_integer(a).unwrap();
            let ib = TermId::inline_integer(b).unwrap();
            prop_assert_eq!(a.cmp(&b), ia.to_be_bytes().cmp(&ib.to_be_bytes()));
        }
    }
}
