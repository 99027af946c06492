//! Shaping binding streams into query results.
//!
//! SELECT decodes bindings into term-valued solutions, ASK takes one
//! binding, CONSTRUCT instantiates triple templates, DESCRIBE emits the
//! concise bounded description of each resource (subject triples plus the
//! depth- and size-bounded blank-node closure).

use crate::binding::{Binding, BindingKey, BindingValue};
use crate::datastore::{Datastore, IdPattern, IdSlot, IdTriple};
use crate::eval::{evaluate_pattern, BindingIter, ExecutionContext, TruncationKind};
use crate::expr::{DescribeTarget, Query, TermPattern, TriplePattern};
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use triad_model::{IdTag, Result, StoreError, Subject, Term, TermId, Triple};

/// One SELECT row: variable name to decoded term.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QuerySolution {
    entries: BTreeMap<String, Term>,
}

impl QuerySolution {
    pub fn get(&self, name: &str) -> Option<&Term> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Term)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Term)> for QuerySolution {
    fn from_iter<I: IntoIterator<Item = (String, Term)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

pub type SolutionIter<'a> = Box<dyn Iterator<Item = Result<QuerySolution>> + 'a>;
pub type TripleIter<'a> = Box<dyn Iterator<Item = Result<Triple>> + 'a>;

/// The three result shapes.
pub enum QueryResults<'a> {
    Solutions(SolutionIter<'a>),
    Boolean(bool),
    Graph(TripleIter<'a>),
}

/// Evaluate a query against a datastore. The context outlives the returned
/// iterators and carries the truncation flag.
pub fn evaluate_query<'a>(
    ds: &'a dyn Datastore,
    ctx: &'a ExecutionContext,
    query: &'a Query,
) -> Result<QueryResults<'a>> {
    match query {
        Query::Select { pattern } => {
            let bindings = evaluate_pattern(ds, ctx, pattern)?;
            Ok(QueryResults::Solutions(Box::new(
                bindings.map(move |b| decode_solution(ds, b?)),
            )))
        }
        Query::Ask { pattern } => {
            let mut bindings = evaluate_pattern(ds, ctx, pattern)?;
            Ok(QueryResults::Boolean(bindings.next().transpose()?.is_some()))
        }
        Query::Construct { template, pattern } => {
            let bindings = evaluate_pattern(ds, ctx, pattern)?;
            Ok(QueryResults::Graph(construct(ds, bindings, template)))
        }
        Query::Describe { targets, pattern } => {
            let resources = describe_resources(ds, ctx, targets, pattern)?;
            Ok(QueryResults::Graph(describe(ds, ctx, resources)))
        }
    }
}

/// Decode a binding into a solution: user variables only, sentinels elided,
/// ids decoded through the dictionary.
fn decode_solution(ds: &dyn Datastore, binding: Binding) -> Result<QuerySolution> {
    let mut entries = BTreeMap::new();
    for (key, value) in binding.iter() {
        let BindingKey::Var(name) = key else {
            continue;
        };
        let term = match value {
            BindingValue::Id(id) => ds.decode(*id)?,
            BindingValue::Term(t) => (**t).clone(),
            BindingValue::Unbound => continue,
        };
        entries.insert(name.to_string(), term);
    }
    Ok(QuerySolution { entries })
}

/// Instantiate the template for every binding; a template instance is
/// skipped when a required variable is unbound or the instantiation is not
/// a valid triple.
fn construct<'a>(
    ds: &'a dyn Datastore,
    bindings: BindingIter<'a>,
    template: &'a [TriplePattern],
) -> TripleIter<'a> {
    let mut pending: VecDeque<Triple> = VecDeque::new();
    let mut bindings = bindings;
    Box::new(std::iter::from_fn(move || loop {
        if let Some(t) = pending.pop_front() {
            return Some(Ok(t));
        }
        let binding = match bindings.next()? {
            Ok(b) => b,
            Err(e) => return Some(Err(e)),
        };
        for pattern in template {
            match instantiate(ds, pattern, &binding) {
                Ok(Some(triple)) => pending.push_back(triple),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }))
}

/// Instantiate one triple template against a binding. `Ok(None)` when a
/// required variable is unbound or the instantiation is not a valid triple.
/// Shared with the update path, which instantiates DELETE/INSERT templates
/// the same way.
pub fn instantiate(
    ds: &dyn Datastore,
    pattern: &TriplePattern,
    binding: &Binding,
) -> Result<Option<Triple>> {
    let Some(subject) = instantiate_position(ds, &pattern.subject, binding)? else {
        return Ok(None);
    };
    let Some(predicate) = instantiate_position(ds, &pattern.predicate, binding)? else {
        return Ok(None);
    };
    let Some(object) = instantiate_position(ds, &pattern.object, binding)? else {
        return Ok(None);
    };
    let Ok(subject) = Subject::try_from(subject) else {
        return Ok(None);
    };
    let Term::NamedNode(predicate) = predicate else {
        return Ok(None);
    };
    Ok(Some(Triple {
        subject,
        predicate,
        object,
    }))
}

fn instantiate_position(
    ds: &dyn Datastore,
    position: &TermPattern,
    binding: &Binding,
) -> Result<Option<Term>> {
    let key = match position {
        TermPattern::NamedNode(n) => return Ok(Some(Term::NamedNode(n.clone()))),
        TermPattern::Literal(l) => return Ok(Some(Term::Literal(l.clone()))),
        TermPattern::Variable(v) => BindingKey::Var(v.name_arc()),
        TermPattern::BlankNode(b) => BindingKey::blank(b.as_str()),
    };
    match binding.get(&key) {
        Some(BindingValue::Id(id)) => Ok(Some(ds.decode(*id)?)),
        Some(BindingValue::Term(t)) => Ok(Some((**t).clone())),
        Some(BindingValue::Unbound) | None => Ok(None),
    }
}

/// Resolve the DESCRIBE targets to resource ids: direct IRIs plus every
/// value the WHERE pattern binds for the target variables.
fn describe_resources(
    ds: &dyn Datastore,
    ctx: &ExecutionContext,
    targets: &[DescribeTarget],
    pattern: &crate::expr::GraphPattern,
) -> Result<Vec<TermId>> {
    let mut seen = FxHashSet::default();
    let mut resources = Vec::new();
    let mut add = |id: TermId| {
        if seen.insert(id) {
            resources.push(id);
        }
    };

    let variables: Vec<_> = targets
        .iter()
        .filter_map(|t| match t {
            DescribeTarget::Variable(v) => Some(v.clone()),
            DescribeTarget::NamedNode(_) => None,
        })
        .collect();

    for target in targets {
        if let DescribeTarget::NamedNode(n) = target {
            if let Some(id) = ds.lookup(&Term::NamedNode(n.clone()))? {
                add(id);
            }
        }
    }

    if !variables.is_empty() {
        for binding in evaluate_pattern(ds, ctx, pattern)? {
            let binding = binding?;
            for variable in &variables {
                if let Some(BindingValue::Id(id)) = binding.get_var(variable.name()) {
                    add(*id);
                }
            }
        }
    }
    Ok(resources)
}

/// The concise bounded description: all triples with the resource as
/// subject, recursing into blank-node objects up to the configured depth
/// and triple budget.
fn describe<'a>(
    ds: &'a dyn Datastore,
    ctx: &'a ExecutionContext,
    resources: Vec<TermId>,
) -> TripleIter<'a> {
    let mut emitted = 0usize;
    let mut queue: VecDeque<(TermId, usize)> = resources.into_iter().map(|r| (r, 0)).collect();
    let mut described: FxHashSet<TermId> = queue.iter().map(|(r, _)| *r).collect();
    let mut current: Option<crate::datastore::IdTripleIter<'a>> = None;
    let mut current_depth = 0usize;

    Box::new(std::iter::from_fn(move || loop {
        if let Some(scan) = &mut current {
            match scan.next() {
                Some(Ok(triple)) => {
                    if emitted >= ctx.limits.max_describe_triples {
                        ctx.mark_truncated(TruncationKind::Describe);
                        current = None;
                        queue.clear();
                        return None;
                    }
                    emitted += 1;
                    // Blank-node objects are described in turn, depth-bounded.
                    if triple.o.tag() == IdTag::BlankNode && !described.contains(&triple.o) {
                        if current_depth < ctx.limits.max_describe_depth {
                            described.insert(triple.o);
                            queue.push_back((triple.o, current_depth + 1));
                        } else {
                            ctx.mark_truncated(TruncationKind::Describe);
                        }
                    }
                    return Some(decode_triple(ds, triple));
                }
                Some(Err(e)) => return Some(Err(e)),
                None => current = None,
            }
        }
        let (resource, depth) = queue.pop_front()?;
        current_depth = depth;
        match ds.scan(IdPattern::new(
            IdSlot::Bound(resource),
            IdSlot::Var,
            IdSlot::Var,
        )) {
            Ok(scan) => current = Some(scan),
            Err(e) => return Some(Err(e)),
        }
    }))
}

fn decode_triple(ds: &dyn Datastore, triple: IdTriple) -> Result<Triple> {
    let subject = Subject::try_from(ds.decode(triple.s)?).map_err(|_| {
        StoreError::CorruptionDetected {
            context: "triple index".into(),
            detail: "literal in subject position".into(),
        }
    })?;
    let Term::NamedNode(predicate) = ds.decode(triple.p)? else {
        return Err(StoreError::CorruptionDetected {
            context: "triple index".into(),
            detail: "non-IRI in predicate position".into(),
        });
    };
    let object = ds.decode(triple.o)?;
    Ok(Triple {
        subject,
        predicate,
        object,
    })
}
