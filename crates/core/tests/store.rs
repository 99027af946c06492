//! End-to-end store scenarios: the full path from RDF triples through the
//! dictionary, indices, optimizer and executor.

use pretty_assertions::assert_eq;
use std::time::Duration;
use triad::{
    AggregateExpression, DeleteInsert, Expression, GraphPattern, LoaderOptions, Literal,
    NamedNode, PathExpr, Query, QueryOptions, QueryResultsOwned, StoreError, StoreOptions, Term,
    TermPattern, Triple, TriplePattern, TripleDb, Variable,
};

fn ex(s: &str) -> NamedNode {
    NamedNode::new(format!("http://ex.org/{s}"))
}

fn int(v: i64) -> Term {
    Term::Literal(Literal::integer(v))
}

fn var(name: &str) -> Variable {
    Variable::new(name)
}

/// (ex:a, ex:p, ex:b) (ex:b, ex:p, ex:c) (ex:a, ex:q, 1) (ex:a, ex:q, 2)
fn fixture() -> TripleDb {
    let _ = env_logger::builder().is_test(true).try_init();
    let db = TripleDb::open_in_memory(StoreOptions::default()).unwrap();
    let inserted = db
        .insert(vec![
            Triple::new(ex("a"), ex("p"), Term::NamedNode(ex("b"))),
            Triple::new(ex("b"), ex("p"), Term::NamedNode(ex("c"))),
            Triple::new(ex("a"), ex("q"), int(1)),
            Triple::new(ex("a"), ex("q"), int(2)),
        ])
        .unwrap();
    assert_eq!(inserted, 4);
    db
}

fn select(db: &TripleDb, query: &Query) -> Vec<triad::QuerySolution> {
    match db.query(query, &QueryOptions::default()).unwrap().results {
        QueryResultsOwned::Solutions(rows) => rows,
        other => panic!("expected solutions, got {other:?}"),
    }
}

#[test]
fn s1_bgp() {
    let db = fixture();
    let query = Query::Select {
        pattern: GraphPattern::bgp([TriplePattern::new(ex("a"), ex("p"), var("x"))]),
    };
    let rows = select(&db, &query);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("x"), Some(&Term::NamedNode(ex("b"))));
}

#[test]
fn s2_join() {
    let db = fixture();
    let query = Query::Select {
        pattern: GraphPattern::Project {
            inner: Box::new(GraphPattern::bgp([
                TriplePattern::new(ex("a"), ex("p"), var("x")),
                TriplePattern::new(var("x"), ex("p"), var("y")),
            ])),
            variables: vec![var("y")],
        },
    };
    let rows = select(&db, &query);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("y"), Some(&Term::NamedNode(ex("c"))));
}

#[test]
fn s3_optional() {
    let db = fixture();
    let query = Query::Select {
        pattern: GraphPattern::LeftJoin {
            left: Box::new(GraphPattern::bgp([TriplePattern::new(
                ex("a"),
                ex("p"),
                var("x"),
            )])),
            right: Box::new(GraphPattern::bgp([TriplePattern::new(
                var("x"),
                ex("p"),
                var("y"),
            )])),
            filter: None,
        },
    };
    let rows = select(&db, &query);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("y"), Some(&Term::NamedNode(ex("c"))));

    db.insert(vec![Triple::new(ex("a"), ex("p"), Term::NamedNode(ex("d")))])
        .unwrap();
    let rows = select(&db, &query);
    assert_eq!(rows.len(), 2);
    let bare = rows
        .iter()
        .find(|r| r.get("x") == Some(&Term::NamedNode(ex("d"))))
        .expect("row for ex:d");
    assert!(bare.get("y").is_none());
}

#[test]
fn s4_union() {
    let db = fixture();
    let query = Query::Select {
        pattern: GraphPattern::union(
            GraphPattern::bgp([TriplePattern::new(ex("a"), ex("p"), var("x"))]),
            GraphPattern::bgp([TriplePattern::new(ex("b"), ex("p"), var("x"))]),
        ),
    };
    let rows = select(&db, &query);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("x"), Some(&Term::NamedNode(ex("b"))));
    assert_eq!(rows[1].get("x"), Some(&Term::NamedNode(ex("c"))));
}

#[test]
fn s5_recursive_path() {
    let db = fixture();
    let plus = Query::Select {
        pattern: GraphPattern::path(
            TermPattern::NamedNode(ex("a")),
            PathExpr::OneOrMore(Box::new(PathExpr::link(ex("p")))),
            TermPattern::Variable(var("x")),
        ),
    };
    let mut found: Vec<Term> = select(&db, &plus)
        .iter()
        .map(|r| r.get("x").unwrap().clone())
        .collect();
    found.sort();
    let mut expected = vec![Term::NamedNode(ex("b")), Term::NamedNode(ex("c"))];
    expected.sort();
    assert_eq!(found, expected);

    let star = Query::Select {
        pattern: GraphPattern::path(
            TermPattern::NamedNode(ex("a")),
            PathExpr::ZeroOrMore(Box::new(PathExpr::link(ex("p")))),
            TermPattern::Variable(var("x")),
        ),
    };
    let rows = select(&db, &star);
    assert_eq!(rows.len(), 3);
    assert!(rows
        .iter()
        .any(|r| r.get("x") == Some(&Term::NamedNode(ex("a")))));
}

#[test]
fn s6_aggregation() {
    let db = fixture();
    let query = Query::Select {
        pattern: GraphPattern::Group {
            inner: Box::new(GraphPattern::bgp([TriplePattern::new(
                ex("a"),
                ex("q"),
                var("y"),
            )])),
            keys: vec![],
            aggregates: vec![
                (
                    var("n"),
                    AggregateExpression::Count {
                        expr: Expression::variable("y"),
                        distinct: false,
                    },
                ),
                (
                    var("s"),
                    AggregateExpression::Sum {
                        expr: Expression::variable("y"),
                        distinct: false,
                    },
                ),
            ],
        },
    };
    let rows = select(&db, &query);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("n"), Some(&int(2)));
    assert_eq!(rows[0].get("s"), Some(&int(3)));
}

#[test]
fn s7_range_query_uses_the_histogram() {
    let db = TripleDb::open_in_memory(StoreOptions::default()).unwrap();
    let triples: Vec<Triple> = (0..1000)
        .map(|k| Triple::new(ex(&format!("i{k}")), ex("age"), int(k)))
        .collect();
    db.insert(triples).unwrap();
    db.refresh_statistics().unwrap();

    let query = Query::Select {
        pattern: GraphPattern::Filter {
            expr: Expression::and(
                Expression::greater_or_equal(
                    Expression::variable("a"),
                    Expression::Literal(Literal::integer(100)),
                ),
                Expression::less(
                    Expression::variable("a"),
                    Expression::Literal(Literal::integer(200)),
                ),
            ),
            inner: Box::new(GraphPattern::bgp([TriplePattern::new(
                var("i"),
                ex("age"),
                var("a"),
            )])),
        },
    };

    // Only this test exercises range scans, so process-wide counter deltas
    // are safe even with tests running in parallel.
    let scans_before: u64 = gather_counter("triad_range_scans_total");
    let keys_before: u64 = gather_counter("triad_range_keys_scanned_total");

    let rows = select(&db, &query);
    assert_eq!(rows.len(), 100);

    let scans_after: u64 = gather_counter("triad_range_scans_total");
    let keys_after: u64 = gather_counter("triad_range_keys_scanned_total");
    assert!(
        scans_after > scans_before,
        "range scan telemetry did not move"
    );
    assert!(
        keys_after - keys_before <= 150,
        "scanned {} keys for a 100-triple range",
        keys_after - keys_before
    );
}

fn gather_counter(name: &str) -> u64 {
    prometheus::gather()
        .iter()
        .filter(|family| family.get_name() == name)
        .flat_map(|family| family.get_metric())
        .map(|metric| metric.get_counter().get_value() as u64)
        .sum()
}

#[test]
fn triple_count_tracks_net_changes() {
    let db = fixture();
    assert_eq!(db.triple_count(), 4);

    // Duplicate insert is a no-op.
    let added = db
        .insert(vec![Triple::new(ex("a"), ex("p"), Term::NamedNode(ex("b")))])
        .unwrap();
    assert_eq!(added, 0);
    assert_eq!(db.triple_count(), 4);

    let removed = db
        .delete(vec![
        Triple::new(ex("a"), ex("p"), Term::NamedNode(ex("b"))),
        // Deleting something absent is a no-op.
        Triple::new(ex("z"), ex("p"), Term::NamedNode(ex("b"))),
    ])
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(db.triple_count(), 3);
}

#[test]
fn read_your_writes() {
    let db = fixture();
    let query = Query::Ask {
        pattern: GraphPattern::bgp([TriplePattern::new(ex("new"), ex("p"), var("x"))]),
    };
    assert_eq!(
        db.query(&query, &QueryOptions::default()).unwrap().results,
        QueryResultsOwned::Boolean(false)
    );
    db.insert(vec![Triple::new(ex("new"), ex("p"), Term::NamedNode(ex("b")))])
        .unwrap();
    assert_eq!(
        db.query(&query, &QueryOptions::default()).unwrap().results,
        QueryResultsOwned::Boolean(true)
    );
}

#[test]
fn plan_cache_invalidates_on_write() {
    let db = fixture();
    let query = Query::Select {
        pattern: GraphPattern::bgp([TriplePattern::new(ex("a"), ex("p"), var("x"))]),
    };
    select(&db, &query);
    assert_eq!(db.plan_cache_len(), 1);

    db.insert(vec![Triple::new(ex("x"), ex("p"), Term::NamedNode(ex("y")))])
        .unwrap();
    assert_eq!(db.plan_cache_len(), 0);

    // Repeat query repopulates and reuses.
    select(&db, &query);
    select(&db, &query);
    assert_eq!(db.plan_cache_len(), 1);
}

#[test]
fn snapshot_isolation_pins_the_view() {
    let db = fixture();
    let guard = db.snapshot("test-reader", None).unwrap();

    db.insert(vec![Triple::new(ex("late"), ex("p"), Term::NamedNode(ex("b")))])
        .unwrap();

    // A live query sees the write.
    let ask = Query::Ask {
        pattern: GraphPattern::bgp([TriplePattern::new(ex("late"), ex("p"), var("x"))]),
    };
    assert_eq!(
        db.query(&ask, &QueryOptions::default()).unwrap().results,
        QueryResultsOwned::Boolean(true)
    );

    // The snapshot-bound view still reflects the state at creation time.
    use triad::kv::{ColumnFamily, KvRead};
    let snapshot_keys = guard
        .view()
        .prefix_iter(ColumnFamily::Spo, &[])
        .unwrap()
        .count();
    assert_eq!(snapshot_keys, 4);
    drop(guard);
    assert_eq!(db.snapshots().active(), 0);
}

#[test]
fn update_delete_insert_where() {
    let db = fixture();
    // Rewrite every (?s, ex:p, ?o) edge into (?s, ex:r, ?o).
    let update = DeleteInsert {
        delete: vec![TriplePattern::new(var("s"), ex("p"), var("o"))],
        insert: vec![TriplePattern::new(var("s"), ex("r"), var("o"))],
        pattern: Some(GraphPattern::bgp([TriplePattern::new(
            var("s"),
            ex("p"),
            var("o"),
        )])),
    };
    let affected = db.update(update, None).unwrap();
    assert_eq!(affected, 4);
    assert_eq!(db.triple_count(), 4);

    let old = Query::Ask {
        pattern: GraphPattern::bgp([TriplePattern::new(var("s"), ex("p"), var("o"))]),
    };
    let new = Query::Ask {
        pattern: GraphPattern::bgp([TriplePattern::new(var("s"), ex("r"), var("o"))]),
    };
    assert_eq!(
        db.query(&old, &QueryOptions::default()).unwrap().results,
        QueryResultsOwned::Boolean(false)
    );
    assert_eq!(
        db.query(&new, &QueryOptions::default()).unwrap().results,
        QueryResultsOwned::Boolean(true)
    );
}

#[test]
fn ground_update_without_pattern() {
    let db = TripleDb::open_in_memory(StoreOptions::default()).unwrap();
    let update = DeleteInsert {
        delete: vec![],
        insert: vec![TriplePattern::new(ex("a"), ex("p"), ex("b"))],
        pattern: None,
    };
    assert_eq!(db.update(update, None).unwrap(), 1);
    assert_eq!(db.triple_count(), 1);
}

#[test]
fn loader_batches_and_reports_progress() {
    let db = TripleDb::open_in_memory(StoreOptions::default()).unwrap();
    let triples: Vec<Triple> = (0..2500)
        .map(|k| Triple::new(ex(&format!("s{k}")), ex("v"), int(k)))
        .collect();

    let mut events = Vec::new();
    let mut callback = |event: &triad::ProgressEvent| {
        events.push((event.batch_no, event.triples_loaded));
        triad::Progress::Continue
    };
    let options = LoaderOptions {
        batch_size: 1000,
        ..LoaderOptions::default()
    };
    let outcome = db.load(triples, &options, Some(&mut callback)).unwrap();
    assert_eq!(outcome, triad::LoadOutcome::Complete { count: 2500 });
    assert_eq!(db.triple_count(), 2500);
    assert_eq!(events.len(), 3);
    assert_eq!(events.last(), Some(&(3, 2500)));
}

#[test]
fn loader_halt_keeps_partial_data() {
    let db = TripleDb::open_in_memory(StoreOptions::default()).unwrap();
    let triples: Vec<Triple> = (0..1000)
        .map(|k| Triple::new(ex(&format!("s{k}")), ex("v"), int(k)))
        .collect();

    let mut callback =
        |_event: &triad::ProgressEvent| triad::Progress::Halt;
    let options = LoaderOptions {
        batch_size: 200,
        bulk_mode: true,
        ..LoaderOptions::default()
    };
    let outcome = db.load(triples, &options, Some(&mut callback)).unwrap();
    assert_eq!(outcome, triad::LoadOutcome::Halted { count: 200 });
    assert_eq!(db.triple_count(), 200);
}

#[test]
fn query_timeout_raises() {
    let db = fixture();
    let query = Query::Select {
        pattern: GraphPattern::bgp([TriplePattern::new(var("s"), var("p"), var("o"))]),
    };
    let options = QueryOptions {
        timeout: Some(Duration::ZERO),
        ..QueryOptions::default()
    };
    let result = db.query(&query, &options);
    match result {
        Err(e @ StoreError::Timeout { .. }) => {
            assert_eq!(e.code(), 1102);
            assert!(e.is_retriable());
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[test]
fn distinct_limit_error_is_coded() {
    let options = StoreOptions {
        query_limits: triad::QueryLimits {
            max_distinct: 2,
            ..triad::QueryLimits::default()
        },
        ..StoreOptions::default()
    };
    let db = TripleDb::open_in_memory(options).unwrap();
    db.insert(
        (0..10)
            .map(|k| Triple::new(ex(&format!("s{k}")), ex("p"), int(k)))
            .collect(),
    )
    .unwrap();
    let query = Query::Select {
        pattern: GraphPattern::Distinct {
            inner: Box::new(GraphPattern::bgp([TriplePattern::new(
                var("s"),
                ex("p"),
                var("o"),
            )])),
        },
    };
    match db.query(&query, &QueryOptions::default()) {
        Err(e @ StoreError::LimitExceeded { .. }) => assert_eq!(e.code(), 1103),
        other => panic!("expected limit error, got {other:?}"),
    }
}

#[test]
fn truncated_results_are_flagged_not_errors() {
    let options = StoreOptions {
        query_limits: triad::QueryLimits {
            max_path_depth: 2,
            ..triad::QueryLimits::default()
        },
        ..StoreOptions::default()
    };
    let db = TripleDb::open_in_memory(options).unwrap();
    db.insert(
        (0..20)
            .map(|k| {
                Triple::new(
                    ex(&format!("n{k}")),
                    ex("next"),
                    Term::NamedNode(ex(&format!("n{}", k + 1))),
                )
            })
            .collect(),
    )
    .unwrap();

    let query = Query::Select {
        pattern: GraphPattern::path(
            TermPattern::NamedNode(ex("n0")),
            PathExpr::OneOrMore(Box::new(PathExpr::link(ex("next")))),
            TermPattern::Variable(var("x")),
        ),
    };
    let outcome = db.query(&query, &QueryOptions::default()).unwrap();
    assert!(outcome.truncated);
    match outcome.results {
        QueryResultsOwned::Solutions(rows) => assert!(!rows.is_empty() && rows.len() < 20),
        other => panic!("expected solutions, got {other:?}"),
    }
}

#[test]
fn persistent_store_survives_reopen() {
    let dir = tempfile::TempDir::with_prefix("triad-store-test").unwrap();
    let path = dir.path().join("store");

    {
        let db = TripleDb::open(&path, StoreOptions::default()).unwrap();
        db.insert(vec![
            Triple::new(ex("a"), ex("p"), Term::NamedNode(ex("b"))),
            Triple::new(ex("a"), ex("q"), int(42)),
        ])
        .unwrap();
        db.close().unwrap();
    }

    let db = TripleDb::open(&path, StoreOptions::default()).unwrap();
    assert_eq!(db.triple_count(), 2);
    let query = Query::Select {
        pattern: GraphPattern::bgp([TriplePattern::new(ex("a"), ex("q"), var("v"))]),
    };
    let rows = select(&db, &query);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("v"), Some(&int(42)));

    // New interned terms after reopen never collide with old ids.
    db.insert(vec![Triple::new(ex("fresh"), ex("p"), Term::NamedNode(ex("b")))])
        .unwrap();
    let all = Query::Select {
        pattern: GraphPattern::bgp([TriplePattern::new(var("s"), var("p"), var("o"))]),
    };
    assert_eq!(select(&db, &all).len(), 3);
}

#[test]
fn blank_nodes_roundtrip_through_storage() {
    let db = TripleDb::open_in_memory(StoreOptions::default()).unwrap();
    let blank = triad::BlankNode::new("b0");
    db.insert(vec![
        Triple::new(blank.clone(), ex("p"), Term::NamedNode(ex("x"))),
    ])
    .unwrap();
    let query = Query::Select {
        pattern: GraphPattern::bgp([TriplePattern::new(var("s"), ex("p"), var("o"))]),
    };
    let rows = select(&db, &query);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("s"), Some(&Term::BlankNode(blank)));
}

#[test]
fn close_is_clean_and_idempotent_with_drop() {
    let db = fixture();
    db.close().unwrap();

    // Dropping without an explicit close also tears down cleanly.
    let db = fixture();
    drop(db);
}
