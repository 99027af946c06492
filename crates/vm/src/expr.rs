//! The query algebra.
//!
//! The executor is an interpreter over this tree: one sum type per concern
//! (graph patterns, property paths, scalar expressions, aggregates) with the
//! evaluator matching on the variant. Everything is `Eq + Hash` so a whole
//! query can be fingerprinted for the plan cache.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use triad_model::{Literal, NamedNode, Term};

/// A query variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable {
    name: Arc<str>,
}

impl Variable {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.name.clone()
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.name)
    }
}

/// One position of a triple pattern.
///
/// A blank node here is not data: inside a pattern it acts as a join
/// variable keyed by its label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermPattern {
    Variable(Variable),
    NamedNode(NamedNode),
    BlankNode(triad_model::BlankNode),
    Literal(Literal),
}

impl TermPattern {
    pub fn as_term(&self) -> Option<Term> {
        match self {
            TermPattern::NamedNode(n) => Some(Term::NamedNode(n.clone())),
            TermPattern::Literal(l) => Some(Term::Literal(l.clone())),
            TermPattern::Variable(_) | TermPattern::BlankNode(_) => None,
        }
    }

    /// Whether this position is forced to a concrete term.
    pub fn is_concrete(&self) -> bool {
        matches!(self, TermPattern::NamedNode(_) | TermPattern::Literal(_))
    }
}

impl From<Variable> for TermPattern {
    fn from(v: Variable) -> Self {
        TermPattern::Variable(v)
    }
}

impl From<NamedNode> for TermPattern {
    fn from(n: NamedNode) -> Self {
        TermPattern::NamedNode(n)
    }
}

impl From<Literal> for TermPattern {
    fn from(l: Literal) -> Self {
        TermPattern::Literal(l)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriplePattern {
    pub subject: TermPattern,
    pub predicate: TermPattern,
    pub object: TermPattern,
}

impl TriplePattern {
    pub fn new(
        subject: impl Into<TermPattern>,
        predicate: impl Into<TermPattern>,
        object: impl Into<TermPattern>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

/// An inclusive integer range over inline-encoded objects, produced by the
/// optimizer when a FILTER constrains a pattern's object numerically and the
/// statistics justify a range scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InlineIntRange {
    pub min: i64,
    pub max: i64,
}

impl InlineIntRange {
    pub fn contains(&self, v: i64) -> bool {
        v >= self.min && v <= self.max
    }
}

/// An entry of a basic graph pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BgpMember {
    Triple(TriplePattern),
    Path {
        subject: TermPattern,
        path: PathExpr,
        object: TermPattern,
    },
    /// A triple pattern whose object is additionally constrained to a numeric
    /// range; answered by the specialized range scan when the store offers
    /// one. The originating FILTER stays in the tree, so the rewrite is
    /// purely an access-path hint.
    ObjectRange {
        subject: TermPattern,
        predicate: NamedNode,
        object: Variable,
        range: InlineIntRange,
    },
}

/// Property path expressions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathExpr {
    Link(NamedNode),
    Inverse(Box<PathExpr>),
    Sequence(Box<PathExpr>, Box<PathExpr>),
    Alternative(Box<PathExpr>, Box<PathExpr>),
    NegatedPropertySet(Vec<NamedNode>),
    ZeroOrMore(Box<PathExpr>),
    OneOrMore(Box<PathExpr>),
    ZeroOrOne(Box<PathExpr>),
}

impl PathExpr {
    pub fn link(iri: impl Into<NamedNode>) -> Self {
        PathExpr::Link(iri.into())
    }

    pub fn sequence(a: PathExpr, b: PathExpr) -> Self {
        PathExpr::Sequence(Box::new(a), Box::new(b))
    }

    pub fn alternative(a: PathExpr, b: PathExpr) -> Self {
        PathExpr::Alternative(Box::new(a), Box::new(b))
    }

    /// The syntactic reversal of a path: `evaluate(p, s, o)` succeeds iff
    /// `evaluate(p.reverse(), o, s)` does. Drives the backward half of
    /// bidirectional search.
    pub fn reverse(&self) -> PathExpr {
        match self {
            PathExpr::Link(p) => PathExpr::Inverse(Box::new(PathExpr::Link(p.clone()))),
            PathExpr::Inverse(inner) => (**inner).clone(),
            PathExpr::Sequence(a, b) => {
                PathExpr::Sequence(Box::new(b.reverse()), Box::new(a.reverse()))
            }
            PathExpr::Alternative(a, b) => {
                PathExpr::Alternative(Box::new(a.reverse()), Box::new(b.reverse()))
            }
            PathExpr::NegatedPropertySet(set) => PathExpr::NegatedPropertySet(set.clone()),
            PathExpr::ZeroOrMore(inner) => PathExpr::ZeroOrMore(Box::new(inner.reverse())),
            PathExpr::OneOrMore(inner) => PathExpr::OneOrMore(Box::new(inner.reverse())),
            PathExpr::ZeroOrOne(inner) => PathExpr::ZeroOrOne(Box::new(inner.reverse())),
        }
    }

    /// Whether evaluation of this path can recurse (contains a `*`/`+`).
    pub fn is_recursive(&self) -> bool {
        match self {
            PathExpr::Link(_) | PathExpr::NegatedPropertySet(_) => false,
            PathExpr::Inverse(x) | PathExpr::ZeroOrOne(x) => x.is_recursive(),
            PathExpr::Sequence(a, b) | PathExpr::Alternative(a, b) => {
                a.is_recursive() || b.is_recursive()
            }
            PathExpr::ZeroOrMore(_) | PathExpr::OneOrMore(_) => true,
        }
    }
}

/// How a join node picks its physical algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JoinStrategy {
    /// Hash join: the safe default on arbitrary inputs.
    #[default]
    Auto,
    Hash,
    /// Reserved for small inner inputs where early termination pays off.
    NestedLoop,
}

/// Scalar expressions, as used by FILTER, Extend and HAVING.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expression {
    Literal(Literal),
    NamedNode(NamedNode),
    Variable(Variable),
    Bound(Variable),
    Not(Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Equal(Box<Expression>, Box<Expression>),
    SameTerm(Box<Expression>, Box<Expression>),
    Greater(Box<Expression>, Box<Expression>),
    GreaterOrEqual(Box<Expression>, Box<Expression>),
    Less(Box<Expression>, Box<Expression>),
    LessOrEqual(Box<Expression>, Box<Expression>),
    Add(Box<Expression>, Box<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
    Multiply(Box<Expression>, Box<Expression>),
    Divide(Box<Expression>, Box<Expression>),
    UnaryMinus(Box<Expression>),
    IsIri(Box<Expression>),
    IsBlank(Box<Expression>),
    IsLiteral(Box<Expression>),
    IsNumeric(Box<Expression>),
    Str(Box<Expression>),
    Lang(Box<Expression>),
    Datatype(Box<Expression>),
}

impl Expression {
    pub fn variable(name: impl AsRef<str>) -> Self {
        Expression::Variable(Variable::new(name))
    }

    pub fn and(a: Expression, b: Expression) -> Self {
        Expression::And(Box::new(a), Box::new(b))
    }

    pub fn or(a: Expression, b: Expression) -> Self {
        Expression::Or(Box::new(a), Box::new(b))
    }

    pub fn greater_or_equal(a: Expression, b: Expression) -> Self {
        Expression::GreaterOrEqual(Box::new(a), Box::new(b))
    }

    pub fn less(a: Expression, b: Expression) -> Self {
        Expression::Less(Box::new(a), Box::new(b))
    }
}

/// A sort key of an ORDER BY.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderExpression {
    pub expr: Expression,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AggregateExpression {
    CountAll,
    Count { expr: Expression, distinct: bool },
    Sum { expr: Expression, distinct: bool },
    Avg { expr: Expression, distinct: bool },
    Min { expr: Expression },
    Max { expr: Expression },
    GroupConcat {
        expr: Expression,
        distinct: bool,
        separator: Option<String>,
    },
    Sample { expr: Expression },
}

/// Graph pattern algebra. Operands are carried by value; the evaluator
/// matches on the variant and returns a lazy binding stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GraphPattern {
    Bgp {
        patterns: Vec<BgpMember>,
    },
    Join {
        left: Box<GraphPattern>,
        right: Box<GraphPattern>,
        strategy: JoinStrategy,
    },
    LeftJoin {
        left: Box<GraphPattern>,
        right: Box<GraphPattern>,
        filter: Option<Expression>,
    },
    Union {
        left: Box<GraphPattern>,
        right: Box<GraphPattern>,
    },
    Filter {
        inner: Box<GraphPattern>,
        expr: Expression,
    },
    Extend {
        inner: Box<GraphPattern>,
        variable: Variable,
        expr: Expression,
    },
    Project {
        inner: Box<GraphPattern>,
        variables: Vec<Variable>,
    },
    Distinct {
        inner: Box<GraphPattern>,
    },
    Reduced {
        inner: Box<GraphPattern>,
    },
    OrderBy {
        inner: Box<GraphPattern>,
        conditions: Vec<OrderExpression>,
    },
    Slice {
        inner: Box<GraphPattern>,
        offset: usize,
        limit: Option<usize>,
    },
    Group {
        inner: Box<GraphPattern>,
        keys: Vec<Variable>,
        aggregates: Vec<(Variable, AggregateExpression)>,
    },
}

impl GraphPattern {
    pub fn bgp(patterns: impl IntoIterator<Item = TriplePattern>) -> Self {
        GraphPattern::Bgp {
            patterns: patterns.into_iter().map(BgpMember::Triple).collect(),
        }
    }

    pub fn path(
        subject: impl Into<TermPattern>,
        path: PathExpr,
        object: impl Into<TermPattern>,
    ) -> Self {
        GraphPattern::Bgp {
            patterns: vec![BgpMember::Path {
                subject: subject.into(),
                path,
                object: object.into(),
            }],
        }
    }

    pub fn union(left: GraphPattern, right: GraphPattern) -> Self {
        GraphPattern::Union {
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

/// What DESCRIBE is asked to describe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DescribeTarget {
    NamedNode(NamedNode),
    Variable(Variable),
}

/// A full query, ready for the executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    Select {
        pattern: GraphPattern,
    },
    Ask {
        pattern: GraphPattern,
    },
    Construct {
        template: Vec<TriplePattern>,
        pattern: GraphPattern,
    },
    Describe {
        targets: Vec<DescribeTarget>,
        pattern: GraphPattern,
    },
}

impl Query {
    pub fn pattern(&self) -> &GraphPattern {
        match self {
            Query::Select { pattern }
            | Query::Ask { pattern }
            | Query::Construct { pattern, .. }
            | Query::Describe { pattern, .. } => pattern,
        }
    }

    pub fn pattern_mut(&mut self) -> &mut GraphPattern {
        match self {
            Query::Select { pattern }
            | Query::Ask { pattern }
            | Query::Construct { pattern, .. }
            | Query::Describe { pattern, .. } => pattern,
        }
    }
}

/// The update algebra: DELETE/INSERT templates driven by an optional WHERE
/// pattern. Ground updates leave `pattern` empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeleteInsert {
    pub delete: Vec<TriplePattern>,
    pub insert: Vec<TriplePattern>,
    pub pattern: Option<GraphPattern>,
}

/// Canonical hash of a query, used as the plan cache key.
pub fn fingerprint(query: &Query) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    query.hash(&mut hasher);
    hasher.finish()
}
