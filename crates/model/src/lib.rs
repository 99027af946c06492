//! RDF term model and value-level codecs shared by the triad storage and
//! query layers.
//!
//! Everything in this crate is independent of any particular storage backend:
//! the [`Term`] tree, the 64-bit [`TermId`] encoding with its inline numeric
//! fast paths, the canonical byte form persisted in the dictionary, and the
//! error taxonomy surfaced by the whole workspace.

pub mod canonical;
pub mod decimal;
pub mod error;
pub mod id;
pub mod inline;
pub mod numeric;
pub mod term;
pub mod vocab;

pub use error::{ErrorCategory, Result, StoreError};
pub use id::{IdTag, TermId};
pub use numeric::Numeric;
pub use term::{BlankNode, Literal, LiteralKind, NamedNode, Subject, Term, Triple};
