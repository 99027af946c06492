//! Solution mappings.
//!
//! A binding maps variables (and blank-node labels acting as join variables,
//! kept in their own key namespace) to term values. Pattern matching binds
//! ids; Extend and aggregation can introduce computed terms that have no id,
//! which stay in term form. The constructor upholds the invariant that a
//! term value is only stored when the term has no id in the consulted store,
//! so an id value and a term value can never denote the same term and
//! compatibility stays a pure structural check.

use crate::datastore::Datastore;
use rustc_hash::FxHashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use triad_model::{inline, Result, Term, TermId};

/// A binding key: a user variable or a blank-node label. The two namespaces
/// never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingKey {
    Var(Arc<str>),
    Blank(Arc<str>),
}

impl BindingKey {
    pub fn var(name: impl AsRef<str>) -> Self {
        BindingKey::Var(Arc::from(name.as_ref()))
    }

    pub fn blank(label: impl AsRef<str>) -> Self {
        BindingKey::Blank(Arc::from(label.as_ref()))
    }

    pub fn is_var(&self) -> bool {
        matches!(self, BindingKey::Var(_))
    }
}

/// A bound value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingValue {
    /// A term known to the store.
    Id(TermId),
    /// A computed term with no id in the store.
    Term(Arc<Term>),
    /// The explicit unbound sentinel, emitted only by variable-aligned
    /// unions. Compatible with everything, like UNDEF.
    Unbound,
}

impl BindingValue {
    /// Wrap a computed term, canonicalizing to an id when the store knows
    /// one. This is what keeps id-vs-term equality sound.
    pub fn from_term(ds: &dyn Datastore, term: Term) -> Result<Self> {
        if let Some(id) = inline::inline_id(&term) {
            return Ok(BindingValue::Id(id));
        }
        Ok(match ds.lookup(&term)? {
            Some(id) => BindingValue::Id(id),
            None => BindingValue::Term(Arc::new(term)),
        })
    }

    pub fn as_id(&self) -> Option<TermId> {
        match self {
            BindingValue::Id(id) => Some(*id),
            _ => None,
        }
    }

    /// Structural agreement, with the sentinel compatible with anything.
    fn agrees_with(&self, other: &BindingValue) -> bool {
        match (self, other) {
            (BindingValue::Unbound, _) | (_, BindingValue::Unbound) => true,
            _ => self == other,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Binding {
    entries: FxHashMap<BindingKey, BindingValue>,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &BindingKey) -> Option<&BindingValue> {
        self.entries.get(key)
    }

    pub fn get_var(&self, name: &str) -> Option<&BindingValue> {
        self.entries.get(&BindingKey::var(name))
    }

    pub fn bind(&mut self, key: BindingKey, value: BindingValue) {
        self.entries.insert(key, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BindingKey, &BindingValue)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &BindingKey> {
        self.entries.keys()
    }

    /// Two bindings are compatible iff every key present in both agrees.
    pub fn is_compatible(&self, other: &Binding) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.entries.iter().all(|(k, v)| {
            large.entries.get(k).map_or(true, |w| v.agrees_with(w))
        })
    }

    /// The union of two compatible bindings; `None` when incompatible.
    pub fn merge(&self, other: &Binding) -> Option<Binding> {
        if !self.is_compatible(other) {
            return None;
        }
        let mut merged = self.clone();
        for (k, v) in &other.entries {
            match merged.entries.get(k) {
                // Keep the concrete value over the sentinel.
                Some(BindingValue::Unbound) | None => {
                    merged.entries.insert(k.clone(), v.clone());
                }
                Some(_) => {}
            }
        }
        Some(merged)
    }

    /// Retain only the named variables in `keep`; drops blank-node keys and
    /// everything else, without introducing sentinels.
    pub fn project(&self, keep: &[Arc<str>]) -> Binding {
        let mut out = Binding::new();
        for name in keep {
            let key = BindingKey::Var(name.clone());
            if let Some(v) = self.entries.get(&key) {
                out.entries.insert(key, v.clone());
            }
        }
        out
    }

    /// Drop blank-node keys; emitted result rows carry user variables only.
    pub fn strip_blanks(&mut self) {
        self.entries.retain(|k, _| k.is_var());
    }

    /// Entries in key order, for hashing and deterministic comparison.
    pub fn sorted_entries(&self) -> Vec<(&BindingKey, &BindingValue)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

impl PartialEq for Binding {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for Binding {}

impl Hash for Binding {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (k, v) in self.sorted_entries() {
            k.hash(state);
            v.hash(state);
        }
    }
}

impl FromIterator<(BindingKey, BindingValue)> for Binding {
    fn from_iter<I: IntoIterator<Item = (BindingKey, BindingValue)>>(iter: I) -> Self {
        Binding {
            entries: iter.into_iter().collect(),
        }
    }
}
