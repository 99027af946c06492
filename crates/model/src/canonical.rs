//! Canonical byte form of interned terms.
//!
//! This is the value stored under `id2str` and the key stored under
//! `str2id`. The encoding is one kind byte followed by u32 big-endian
//! length-prefixed UTF-8 fields, carrying exactly enough to reconstruct the
//! term: lexical form, datatype IRI, and language tag where applicable.

use crate::error::{Result, StoreError};
use crate::term::{BlankNode, Literal, NamedNode, Term};
use bytes::{Buf, BufMut};

const KIND_IRI: u8 = 0;
const KIND_BLANK: u8 = 1;
const KIND_SIMPLE: u8 = 2;
const KIND_LANG: u8 = 3;
const KIND_TYPED: u8 = 4;

pub fn encode_term(term: &Term) -> Vec<u8> {
    let mut buf = Vec::with_capacity(term_encoded_len(term));
    match term {
        Term::NamedNode(n) => {
            buf.put_u8(KIND_IRI);
            put_field(&mut buf, n.as_str());
        }
        Term::BlankNode(b) => {
            buf.put_u8(KIND_BLANK);
            put_field(&mut buf, b.as_str());
        }
        Term::Literal(l) => match l.kind() {
            crate::term::LiteralKind::Simple => {
                buf.put_u8(KIND_SIMPLE);
                put_field(&mut buf, l.value());
            }
            crate::term::LiteralKind::Lang(tag) => {
                buf.put_u8(KIND_LANG);
                put_field(&mut buf, l.value());
                put_field(&mut buf, tag);
            }
            crate::term::LiteralKind::Typed(dt) => {
                buf.put_u8(KIND_TYPED);
                put_field(&mut buf, l.value());
                put_field(&mut buf, dt.as_str());
            }
        },
    }
    buf
}

pub fn decode_term(mut bytes: &[u8]) -> Result<Term> {
    if bytes.is_empty() {
        return Err(corrupt("empty canonical term"));
    }
    let kind = bytes.get_u8();
    let term = match kind {
        KIND_IRI => Term::NamedNode(NamedNode::new(get_field(&mut bytes)?)),
        KIND_BLANK => Term::BlankNode(BlankNode::new(get_field(&mut bytes)?)),
        KIND_SIMPLE => Term::Literal(Literal::simple(get_field(&mut bytes)?)),
        KIND_LANG => {
            let value = get_field(&mut bytes)?;
            let tag = get_field(&mut bytes)?;
            Term::Literal(Literal::lang(value, tag))
        }
        KIND_TYPED => {
            let value = get_field(&mut bytes)?;
            let dt = get_field(&mut bytes)?;
            Term::Literal(Literal::typed(value, NamedNode::new(dt)))
        }
        other => return Err(corrupt(format!("unknown term kind byte {other}"))),
    };
    if bytes.has_remaining() {
        return Err(corrupt("trailing bytes after canonical term"));
    }
    Ok(term)
}

fn term_encoded_len(term: &Term) -> usize {
    1 + match term {
        Term::NamedNode(n) => 4 + n.as_str().len(),
        Term::BlankNode(b) => 4 + b.as_str().len(),
        Term::Literal(l) => match l.kind() {
            crate::term::LiteralKind::Simple => 4 + l.value().len(),
            crate::term::LiteralKind::Lang(tag) => 8 + l.value().len() + tag.len(),
            crate::term::LiteralKind::Typed(dt) => 8 + l.value().len() + dt.as_str().len(),
        },
    }
}

fn put_field(buf: &mut Vec<u8>, field: &str) {
    buf.put_u32(field.len() as u32);
    buf.put_slice(field.as_bytes());
}

fn get_field(bytes: &mut &[u8]) -> Result<String> {
    if bytes.remaining() < 4 {
        return Err(corrupt("truncated field length"));
    }
    let len = bytes.get_u32() as usize;
    if bytes.remaining() < len {
        return Err(corrupt("truncated field body"));
    }
    let field = std::str::from_utf8(&bytes[..len])
        .map_err(|e| corrupt(format!("invalid UTF-8 in field: {e}")))?
        .to_owned();
    bytes.advance(len);
    Ok(field)
}

fn corrupt(detail: impl Into<String>) -> StoreError {
    StoreError::CorruptionDetected {
        context: "dictionary row".into(),
        detail: detail.into(),
    }
}
