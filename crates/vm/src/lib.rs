//! The query engine of the triad triple store.
//!
//! This crate is storage-agnostic: it defines the SPARQL algebra
//! ([`expr`]), evaluates it as pull-based iterators over any
//! [`datastore::Datastore`], and shapes the output into SELECT / ASK /
//! CONSTRUCT / DESCRIBE results. The persistent store implements the
//! datastore trait; [`datastore::MemDatastore`] serves tests and ephemeral
//! graphs.

pub mod binding;
pub mod datastore;
pub mod eval;
pub mod expr;
pub mod filter;
pub mod group;
pub mod join;
pub mod modifiers;
pub mod optimizer;
pub mod path;
pub mod results;

pub use binding::{Binding, BindingKey, BindingValue};
pub use datastore::{Datastore, EstimatePattern, EstimateSlot, IdPattern, IdSlot, IdTriple, MemDatastore};
pub use eval::{evaluate_pattern, BindingIter, ExecutionContext, QueryLimits, TruncationKind};
pub use expr::{
    fingerprint, AggregateExpression, BgpMember, DeleteInsert, DescribeTarget, Expression,
    GraphPattern, InlineIntRange, JoinStrategy, OrderExpression, PathExpr, Query, TermPattern,
    TriplePattern, Variable,
};
pub use filter::{evaluate_filter, evaluate_filter_3vl, Truth};
pub use optimizer::{optimize_pattern, optimize_query};
pub use results::{evaluate_query, QueryResults, QuerySolution, SolutionIter, TripleIter};
