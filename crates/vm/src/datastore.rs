//! The executor's view of storage.
//!
//! The evaluator only ever sees id-triples through [`Datastore`]; the
//! persistent store implements it over its indices and dictionary, and
//! [`MemDatastore`] implements it over sorted sets for tests and ephemeral
//! use.

use crate::expr::InlineIntRange;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use triad_model::canonical::encode_term;
use triad_model::id::IdTag;
use triad_model::{inline, Result, StoreError, Term, TermId, Triple};

/// A triple in id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdTriple {
    pub s: TermId,
    pub p: TermId,
    pub o: TermId,
}

impl IdTriple {
    pub fn new(s: TermId, p: TermId, o: TermId) -> Self {
        Self { s, p, o }
    }
}

/// One position of a lookup pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdSlot {
    Bound(TermId),
    Var,
}

impl IdSlot {
    pub fn matches(self, id: TermId) -> bool {
        match self {
            IdSlot::Bound(expected) => expected == id,
            IdSlot::Var => true,
        }
    }

    pub fn is_bound(self) -> bool {
        matches!(self, IdSlot::Bound(_))
    }
}

/// A lookup pattern over the indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdPattern {
    pub s: IdSlot,
    pub p: IdSlot,
    pub o: IdSlot,
}

impl IdPattern {
    pub fn new(s: IdSlot, p: IdSlot, o: IdSlot) -> Self {
        Self { s, p, o }
    }

    pub fn everything() -> Self {
        Self::new(IdSlot::Var, IdSlot::Var, IdSlot::Var)
    }

    pub fn matches(&self, t: IdTriple) -> bool {
        self.s.matches(t.s) && self.p.matches(t.p) && self.o.matches(t.o)
    }

    pub fn bound_positions(&self) -> usize {
        [self.s, self.p, self.o]
            .iter()
            .filter(|slot| slot.is_bound())
            .count()
    }
}

/// One position of a cardinality-estimation request: the optimizer knows a
/// value, knows a value will exist by evaluation time, or knows nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateSlot {
    Known(TermId),
    BoundUnknown,
    Var,
}

impl EstimateSlot {
    pub fn is_constrained(self) -> bool {
        !matches!(self, EstimateSlot::Var)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimatePattern {
    pub s: EstimateSlot,
    pub p: EstimateSlot,
    pub o: EstimateSlot,
}

pub type IdTripleIter<'a> = Box<dyn Iterator<Item = Result<IdTriple>> + 'a>;

/// What the executor needs from a store. Object-safe; evaluation holds a
/// `&dyn Datastore` for the duration of one query.
pub trait Datastore {
    /// Lazy scan of every triple matching `pattern`. Restartable only by
    /// re-issuing the scan.
    fn scan(&self, pattern: IdPattern) -> Result<IdTripleIter<'_>>;

    /// Specialized scan for `(subject?, predicate, ?o)` where the object is
    /// known to be constrained to an inline-integer range. `None` when the
    /// store has no better access path than scan-and-filter.
    fn scan_object_range(
        &self,
        subject: Option<TermId>,
        predicate: TermId,
        range: InlineIntRange,
    ) -> Option<Result<IdTripleIter<'_>>>;

    /// Decode an id back to its term. Inline ids decode without storage.
    fn decode(&self, id: TermId) -> Result<Term>;

    /// Read-only id lookup; inline-encodable terms resolve without storage.
    fn lookup(&self, term: &Term) -> Result<Option<TermId>>;

    /// Estimated number of matches, for pattern reordering. Never errs:
    /// estimation must not fail a query.
    fn estimate(&self, pattern: &EstimatePattern) -> u64;

    /// Whether a numeric histogram exists for `predicate`.
    fn has_numeric_histogram(&self, predicate: TermId) -> bool;

    /// Estimated fraction of `predicate`'s triples whose object falls in
    /// `range`, in `[0, 1]`.
    fn range_selectivity(&self, predicate: TermId, range: InlineIntRange) -> f64;

    fn triple_count(&self) -> u64;

    /// Exact membership; the default answers through a fully-bound scan.
    fn contains(&self, triple: IdTriple) -> Result<bool> {
        let pattern = IdPattern::new(
            IdSlot::Bound(triple.s),
            IdSlot::Bound(triple.p),
            IdSlot::Bound(triple.o),
        );
        let mut iter = self.scan(pattern)?;
        match iter.next() {
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => Err(e),
            None => Ok(false),
        }
    }
}

const ID_MIN: TermId = TermId::from_u64(0);
const ID_MAX: TermId = TermId::from_u64(u64::MAX);

type Key3 = (TermId, TermId, TermId);

/// An in-memory datastore over sorted sets, mirroring the persistent
/// store's three index orderings.
#[derive(Debug, Default)]
pub struct MemDatastore {
    spo: BTreeSet<Key3>,
    pos: BTreeSet<Key3>,
    osp: BTreeSet<Key3>,
    term_to_id: FxHashMap<Vec<u8>, TermId>,
    id_to_term: FxHashMap<TermId, Term>,
    next_seq: [u64; 4],
    numeric_predicates: FxHashSet<TermId>,
}

impl MemDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern or inline a term, allocating a fresh id if needed.
    pub fn encode(&mut self, term: &Term) -> TermId {
        if let Some(id) = inline::inline_id(term) {
            return id;
        }
        let canonical = encode_term(term);
        if let Some(id) = self.term_to_id.get(&canonical) {
            return *id;
        }
        let tag = interned_tag(term);
        let seq = &mut self.next_seq[tag as usize];
        let id = TermId::from_parts(tag, *seq);
        *seq += 1;
        self.term_to_id.insert(canonical, id);
        self.id_to_term.insert(id, term.clone());
        id
    }

    pub fn insert(&mut self, triple: &Triple) -> IdTriple {
        let s = self.encode(&Term::from(triple.subject.clone()));
        let p = self.encode(&Term::NamedNode(triple.predicate.clone()));
        let o = self.encode(&triple.object);
        self.insert_ids(IdTriple::new(s, p, o));
        IdTriple::new(s, p, o)
    }

    pub fn insert_ids(&mut self, t: IdTriple) {
        self.spo.insert((t.s, t.p, t.o));
        self.pos.insert((t.p, t.o, t.s));
        self.osp.insert((t.o, t.s, t.p));
    }

    pub fn remove_ids(&mut self, t: IdTriple) {
        self.spo.remove(&(t.s, t.p, t.o));
        self.pos.remove(&(t.p, t.o, t.s));
        self.osp.remove(&(t.o, t.s, t.p));
    }

    pub fn len(&self) -> usize {
        self.spo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spo.is_empty()
    }

    /// Declare that `predicate` has a numeric histogram, enabling the
    /// specialized range scan.
    pub fn add_numeric_predicate(&mut self, predicate: TermId) {
        self.numeric_predicates.insert(predicate);
    }

    fn matches(&self, pattern: IdPattern) -> Box<dyn Iterator<Item = IdTriple> + '_> {
        use IdSlot::*;
        match (pattern.s, pattern.p, pattern.o) {
            (Bound(s), Bound(p), Bound(o)) => {
                range_iter(&self.spo, (s, p, o), (s, p, o), |(s, p, o)| {
                    IdTriple::new(s, p, o)
                })
            }
            (Bound(s), Bound(p), Var) => {
                range_iter(&self.spo, (s, p, ID_MIN), (s, p, ID_MAX), |(s, p, o)| {
                    IdTriple::new(s, p, o)
                })
            }
            (Bound(s), Var, Var) => range_iter(
                &self.spo,
                (s, ID_MIN, ID_MIN),
                (s, ID_MAX, ID_MAX),
                |(s, p, o)| IdTriple::new(s, p, o),
            ),
            (Var, Bound(p), Bound(o)) => {
                range_iter(&self.pos, (p, o, ID_MIN), (p, o, ID_MAX), |(p, o, s)| {
                    IdTriple::new(s, p, o)
                })
            }
            (Var, Bound(p), Var) => range_iter(
                &self.pos,
                (p, ID_MIN, ID_MIN),
                (p, ID_MAX, ID_MAX),
                |(p, o, s)| IdTriple::new(s, p, o),
            ),
            (Var, Var, Bound(o)) => range_iter(
                &self.osp,
                (o, ID_MIN, ID_MIN),
                (o, ID_MAX, ID_MAX),
                |(o, s, p)| IdTriple::new(s, p, o),
            ),
            (Bound(s), Var, Bound(o)) => {
                range_iter(&self.osp, (o, s, ID_MIN), (o, s, ID_MAX), |(o, s, p)| {
                    IdTriple::new(s, p, o)
                })
            }
            (Var, Var, Var) => Box::new(
                self.spo
                    .iter()
                    .map(|&(s, p, o)| IdTriple::new(s, p, o)),
            ),
        }
    }
}

fn range_iter<'a>(
    set: &'a BTreeSet<Key3>,
    lo: Key3,
    hi: Key3,
    reorder: fn(Key3) -> IdTriple,
) -> Box<dyn Iterator<Item = IdTriple> + 'a> {
    Box::new(set.range(lo..=hi).map(move |&k| reorder(k)))
}

fn interned_tag(term: &Term) -> IdTag {
    match term {
        Term::NamedNode(_) => IdTag::Iri,
        Term::BlankNode(_) => IdTag::BlankNode,
        Term::Literal(l) if l.is_simple() => IdTag::SimpleLiteral,
        Term::Literal(_) => IdTag::TypedLiteral,
    }
}

impl Datastore for MemDatastore {
    fn scan(&self, pattern: IdPattern) -> Result<IdTripleIter<'_>> {
        Ok(Box::new(self.matches(pattern).map(Ok)))
    }

    fn scan_object_range(
        &self,
        subject: Option<TermId>,
        predicate: TermId,
        range: InlineIntRange,
    ) -> Option<Result<IdTripleIter<'_>>> {
        if !self.numeric_predicates.contains(&predicate) {
            return None;
        }
        let base = IdPattern::new(
            subject.map_or(IdSlot::Var, IdSlot::Bound),
            IdSlot::Bound(predicate),
            IdSlot::Var,
        );
        let iter = self
            .matches(base)
            .filter(move |t| t.o.as_integer().is_some_and(|v| range.contains(v)))
            .map(Ok);
        Some(Ok(Box::new(iter)))
    }

    fn decode(&self, id: TermId) -> Result<Term> {
        if let Some(term) = inline::decode_inline(id) {
            return Ok(term);
        }
        self.id_to_term
            .get(&id)
            .cloned()
            .ok_or(StoreError::DictionaryMissing { id: id.as_u64() })
    }

    fn lookup(&self, term: &Term) -> Result<Option<TermId>> {
        if let Some(id) = inline::inline_id(term) {
            return Ok(Some(id));
        }
        Ok(self.term_to_id.get(&encode_term(term)).copied())
    }

    fn estimate(&self, pattern: &EstimatePattern) -> u64 {
        let scan = IdPattern::new(
            known_slot(pattern.s),
            known_slot(pattern.p),
            known_slot(pattern.o),
        );
        let exact = self.matches(scan).count() as u64;
        // Positions that will be bound at evaluation time but whose value is
        // unknown still constrain the result; halve per such position.
        let unknown_bound = [pattern.s, pattern.p, pattern.o]
            .iter()
            .filter(|s| matches!(s, EstimateSlot::BoundUnknown))
            .count() as u32;
        (exact >> unknown_bound).max(u64::from(exact > 0))
    }

    fn has_numeric_histogram(&self, predicate: TermId) -> bool {
        self.numeric_predicates.contains(&predicate)
    }

    fn range_selectivity(&self, predicate: TermId, range: InlineIntRange) -> f64 {
        let total = self
            .matches(IdPattern::new(
                IdSlot::Var,
                IdSlot::Bound(predicate),
                IdSlot::Var,
            ))
            .count();
        if total == 0 {
            return 0.0;
        }
        let matching = self
            .matches(IdPattern::new(
                IdSlot::Var,
                IdSlot::Bound(predicate),
                IdSlot::Var,
            ))
            .filter(|t| t.o.as_integer().is_some_and(|v| range.contains(v)))
            .count();
        matching as f64 / total as f64
    }

    fn triple_count(&self) -> u64 {
        self.spo.len() as u64
    }

    fn contains(&self, triple: IdTriple) -> Result<bool> {
        Ok(self.spo.contains(&(triple.s, triple.p, triple.o)))
    }
}

fn known_slot(slot: EstimateSlot) -> IdSlot {
    match slot {
        EstimateSlot::Known(id) => IdSlot::Bound(id),
        EstimateSlot::BoundUnknown | EstimateSlot::Var => IdSlot::Var,
    }
}
