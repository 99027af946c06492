//! The RDF term tree: IRIs, blank nodes, literals, and triples.
//!
//! Construction is unchecked: syntax validation belongs to the parsers, which
//! sit outside this workspace. [`std::fmt::Display`] renders the N-Triples
//! form, which doubles as the diagnostic representation.

use crate::vocab::xsd;
use std::fmt;

/// An IRI reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamedNode {
    iri: String,
}

impl NamedNode {
    pub fn new(iri: impl Into<String>) -> Self {
        Self { iri: iri.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.iri
    }

    pub fn into_string(self) -> String {
        self.iri
    }
}

impl fmt::Display for NamedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.iri)
    }
}

/// A blank node, identified by its label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlankNode {
    id: String,
}

impl BlankNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for BlankNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_:{}", self.id)
    }
}

/// The three shapes an RDF literal can take.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LiteralKind {
    /// A plain literal with no datatype or language.
    Simple,
    /// A language-tagged string. Tags are stored lowercased.
    Lang(String),
    /// A literal with an explicit datatype IRI.
    Typed(NamedNode),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Literal {
    value: String,
    kind: LiteralKind,
}

impl Literal {
    pub fn simple(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: LiteralKind::Simple,
        }
    }

    pub fn lang(value: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: LiteralKind::Lang(tag.into().to_ascii_lowercase()),
        }
    }

    pub fn typed(value: impl Into<String>, datatype: NamedNode) -> Self {
        Self {
            value: value.into(),
            kind: LiteralKind::Typed(datatype),
        }
    }

    pub fn integer(value: i64) -> Self {
        Self::typed(value.to_string(), NamedNode::new(xsd::INTEGER))
    }

    pub fn boolean(value: bool) -> Self {
        Self::typed(value.to_string(), NamedNode::new(xsd::BOOLEAN))
    }

    pub fn decimal(value: rust_decimal::Decimal) -> Self {
        Self::typed(value.normalize().to_string(), NamedNode::new(xsd::DECIMAL))
    }

    pub fn double(value: f64) -> Self {
        Self::typed(format!("{value:E}"), NamedNode::new(xsd::DOUBLE))
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> &LiteralKind {
        &self.kind
    }

    pub fn language(&self) -> Option<&str> {
        match &self.kind {
            LiteralKind::Lang(tag) => Some(tag),
            _ => None,
        }
    }

    /// The datatype IRI, following RDF 1.1: simple literals are `xsd:string`,
    /// language-tagged strings are `rdf:langString`.
    pub fn datatype(&self) -> &str {
        match &self.kind {
            LiteralKind::Simple => xsd::STRING,
            LiteralKind::Lang(_) => crate::vocab::rdf::LANG_STRING,
            LiteralKind::Typed(dt) => dt.as_str(),
        }
    }

    pub fn is_simple(&self) -> bool {
        matches!(self.kind, LiteralKind::Simple)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"")?;
        for c in self.value.chars() {
            match c {
                '"' => write!(f, "\\\"")?,
                '\\' => write!(f, "\\\\")?,
                '\n' => write!(f, "\\n")?,
                '\r' => write!(f, "\\r")?,
                _ => write!(f, "{c}")?,
            }
        }
        write!(f, "\"")?;
        match &self.kind {
            LiteralKind::Simple => Ok(()),
            LiteralKind::Lang(tag) => write!(f, "@{tag}"),
            LiteralKind::Typed(dt) => write!(f, "^^{dt}"),
        }
    }
}

/// Any RDF term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    NamedNode(NamedNode),
    BlankNode(BlankNode),
    Literal(Literal),
}

impl Term {
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::NamedNode(NamedNode::new(iri))
    }

    pub fn as_named_node(&self) -> Option<&NamedNode> {
        match self {
            Term::NamedNode(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Term::Literal(l) => Some(l),
            _ => None,
        }
    }

    pub fn is_blank_node(&self) -> bool {
        matches!(self, Term::BlankNode(_))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::NamedNode(n) => n.fmt(f),
            Term::BlankNode(b) => b.fmt(f),
            Term::Literal(l) => l.fmt(f),
        }
    }
}

macro_rules! impl_term_from {
    ($ty:ident) => {
        impl From<$ty> for Term {
            fn from(value: $ty) -> Self {
                Term::$ty(value)
            }
        }
    };
}

impl_term_from!(NamedNode);
impl_term_from!(BlankNode);
impl_term_from!(Literal);

/// A triple subject: an IRI or a blank node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    NamedNode(NamedNode),
    BlankNode(BlankNode),
}

impl From<Subject> for Term {
    fn from(s: Subject) -> Self {
        match s {
            Subject::NamedNode(n) => Term::NamedNode(n),
            Subject::BlankNode(b) => Term::BlankNode(b),
        }
    }
}

impl From<NamedNode> for Subject {
    fn from(n: NamedNode) -> Self {
        Subject::NamedNode(n)
    }
}

impl From<BlankNode> for Subject {
    fn from(b: BlankNode) -> Self {
        Subject::BlankNode(b)
    }
}

impl TryFrom<Term> for Subject {
    type Error = crate::StoreError;

    fn try_from(t: Term) -> Result<Self, Self::Error> {
        match t {
            Term::NamedNode(n) => Ok(Subject::NamedNode(n)),
            Term::BlankNode(b) => Ok(Subject::BlankNode(b)),
            Term::Literal(_) => Err(crate::StoreError::InvalidInput(
                "a literal cannot be a triple subject".into(),
            )),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::NamedNode(n) => n.fmt(f),
            Subject::BlankNode(b) => b.fmt(f),
        }
    }
}

/// An RDF triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Triple {
    pub subject: Subject,
    pub predicate: NamedNode,
    pub object: Term,
}

impl Triple {
    pub fn new(
        subject: impl Into<Subject>,
        predicate: impl Into<NamedNode>,
        object: impl Into<Term>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

impl From<String> for NamedNode {
    fn from(iri: String) -> Self {
        NamedNode::new(iri)
    }
}

impl From<&str> for NamedNode {
    fn from(iri: &str) -> Self {
        NamedNode::new(iri)
    }
}
