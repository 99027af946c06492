//! triad: an embedded RDF triple store.
//!
//! Terms are dictionary-encoded into 64-bit ids with inline fast paths for
//! small numerics, booleans and timestamps; triples live as key-only rows
//! in three redundant RocksDB column families (SPO, POS, OSP) so every
//! access pattern is a prefix scan. Queries are parsed-algebra trees
//! evaluated by the iterator engine in `triad-vm`, planned against
//! collected statistics and cached by fingerprint. All writes serialize
//! through a single coordinator thread; snapshots are TTL-tracked RAII
//! guards.

pub mod config;
pub mod db;
pub mod kv;
pub mod metrics;

pub use config::{LoaderOptions, MemoryBudget, QueryOptions, StoreOptions};
pub use db::loader::{LoadOutcome, Progress, ProgressEvent};
pub use db::snapshot_registry::SnapshotGuard;
pub use db::triple_db::{QueryOutcome, QueryResultsOwned, TripleDb};
pub use triad_model::{
    BlankNode, ErrorCategory, Literal, NamedNode, Numeric, Result, StoreError, Subject, Term,
    TermId, Triple,
};
pub use triad_vm::{
    AggregateExpression, DeleteInsert, DescribeTarget, Expression, GraphPattern, JoinStrategy,
    OrderExpression, PathExpr, Query, QueryLimits, QuerySolution, TermPattern, TriplePattern,
    Variable,
};
