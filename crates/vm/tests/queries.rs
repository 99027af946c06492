//! End-to-end executor scenarios over the in-memory datastore.

use pretty_assertions::assert_eq;
use triad_model::{Literal, NamedNode, Term, Triple};
use triad_vm::{
    evaluate_pattern, evaluate_query, optimize_query, AggregateExpression, Binding, Datastore,
    DescribeTarget, ExecutionContext, Expression, GraphPattern, JoinStrategy, MemDatastore,
    PathExpr, Query, QueryResults, QuerySolution, TermPattern, TriplePattern, Variable,
};

fn ex(s: &str) -> NamedNode {
    NamedNode::new(format!("http://ex.org/{s}"))
}

fn int(v: i64) -> Term {
    Term::Literal(Literal::integer(v))
}

/// The shared §8 fixture:
/// (ex:a, ex:p, ex:b) (ex:b, ex:p, ex:c) (ex:a, ex:q, 1) (ex:a, ex:q, 2)
fn fixture() -> MemDatastore {
    let mut ds = MemDatastore::new();
    ds.insert(&Triple::new(ex("a"), ex("p"), Term::NamedNode(ex("b"))));
    ds.insert(&Triple::new(ex("b"), ex("p"), Term::NamedNode(ex("c"))));
    ds.insert(&Triple::new(ex("a"), ex("q"), int(1)));
    ds.insert(&Triple::new(ex("a"), ex("q"), int(2)));
    ds
}

fn select(ds: &MemDatastore, ctx: &ExecutionContext, query: &Query) -> Vec<QuerySolution> {
    let optimized = optimize_query(ds, query);
    let result = match evaluate_query(ds, ctx, &optimized) {
        Ok(QueryResults::Solutions(solutions)) => {
            solutions.map(|s| s.unwrap()).collect()
        }
        Ok(_) => panic!("expected solutions"),
        Err(e) => panic!("query failed: {e}"),
    };
    result
}

fn var(name: &str) -> Variable {
    Variable::new(name)
}

#[test]
fn s1_single_pattern() {
    let ds = fixture();
    let ctx = ExecutionContext::default();
    let query = Query::Select {
        pattern: GraphPattern::bgp([TriplePattern::new(ex("a"), ex("p"), var("x"))]),
    };
    let rows = select(&ds, &ctx, &query);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("x"), Some(&Term::NamedNode(ex("b"))));
}

#[test]
fn s2_join_through_shared_variable() {
    let ds = fixture();
    let ctx = ExecutionContext::default();
    let query = Query::Select {
        pattern: GraphPattern::Project {
            inner: Box::new(GraphPattern::bgp([
                TriplePattern::new(ex("a"), ex("p"), var("x")),
                TriplePattern::new(var("x"), ex("p"), var("y")),
            ])),
            variables: vec![var("y")],
        },
    };
    let rows = select(&ds, &ctx, &query);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("y"), Some(&Term::NamedNode(ex("c"))));
    assert!(rows[0].get("x").is_none());
}

#[test]
fn s3_optional_keeps_unmatched_left_rows() {
    let mut ds = fixture();
    let ctx = ExecutionContext::default();
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
    let rows = select(&ds, &ctx, &query);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("x"), Some(&Term::NamedNode(ex("b"))));
    assert_eq!(rows[0].get("y"), Some(&Term::NamedNode(ex("c"))));

    // With a dead-end edge added, the unmatched row comes through bare.
    ds.insert(&Triple::new(ex("a"), ex("p"), Term::NamedNode(ex("d"))));
    let rows = select(&ds, &ctx, &query);
    assert_eq!(rows.len(), 2);
    let dead_end = rows
        .iter()
        .find(|r| r.get("x") == Some(&Term::NamedNode(ex("d"))))
        .expect("row for ex:d");
    assert!(dead_end.get("y").is_none());
}

#[test]
fn s4_union_concatenates_in_order() {
    let ds = fixture();
    let ctx = ExecutionContext::default();
    let query = Query::Select {
        pattern: GraphPattern::union(
            GraphPattern::bgp([TriplePattern::new(ex("a"), ex("p"), var("x"))]),
            GraphPattern::bgp([TriplePattern::new(ex("b"), ex("p"), var("x"))]),
        ),
    };
    let rows = select(&ds, &ctx, &query);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("x"), Some(&Term::NamedNode(ex("b"))));
    assert_eq!(rows[1].get("x"), Some(&Term::NamedNode(ex("c"))));
}

#[test]
fn s5_recursive_paths() {
    let ds = fixture();
    let ctx = ExecutionContext::default();
    let plus = Query::Select {
        pattern: GraphPattern::path(
            TermPattern::NamedNode(ex("a")),
            PathExpr::OneOrMore(Box::new(PathExpr::link(ex("p")))),
            var("x"),
        ),
    };
    let rows = select(&ds, &ctx, &plus);
    let mut found: Vec<_> = rows
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
            var("x"),
        ),
    };
    let rows = select(&ds, &ctx, &star);
    assert_eq!(rows.len(), 3);
    assert!(rows
        .iter()
        .any(|r| r.get("x") == Some(&Term::NamedNode(ex("a")))));
}

#[test]
fn s6_aggregation() {
    let ds = fixture();
    let ctx = ExecutionContext::default();
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
    let rows = select(&ds, &ctx, &query);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("n"), Some(&int(2)));
    assert_eq!(rows[0].get("s"), Some(&int(3)));
}

#[test]
fn filter_with_numeric_range() {
    let mut ds = MemDatastore::new();
    for k in 0..100 {
        ds.insert(&Triple::new(ex(&format!("i{k}")), ex("age"), int(k)));
    }
    let ctx = ExecutionContext::default();
    let query = Query::Select {
        pattern: GraphPattern::Filter {
            expr: Expression::and(
                Expression::greater_or_equal(
                    Expression::variable("a"),
                    Expression::Literal(Literal::integer(10)),
                ),
                Expression::less(
                    Expression::variable("a"),
                    Expression::Literal(Literal::integer(20)),
                ),
            ),
            inner: Box::new(GraphPattern::bgp([TriplePattern::new(
                var("i"),
                ex("age"),
                var("a"),
            )])),
        },
    };
    // Identical results with and without the range-scan rewrite.
    let unoptimized = select(&ds, &ctx, &query);
    assert_eq!(unoptimized.len(), 10);

    let age = ds
        .lookup(&Term::NamedNode(ex("age")))
        .unwrap()
        .unwrap();
    ds.add_numeric_predicate(age);
    let optimized = select(&ds, &ctx, &query);
    assert_eq!(optimized.len(), 10);
}

#[test]
fn union_cardinality_is_preserved() {
    let ds = fixture();
    let ctx = ExecutionContext::default();
    // |union(A, B)| = |A| + |B| even when both branches emit the same rows.
    let branch = GraphPattern::bgp([TriplePattern::new(var("s"), ex("q"), var("o"))]);
    let query = Query::Select {
        pattern: GraphPattern::union(branch.clone(), branch),
    };
    let rows = select(&ds, &ctx, &query);
    assert_eq!(rows.len(), 4);
}

#[test]
fn join_strategies_agree() {
    let ds = fixture();
    let ctx = ExecutionContext::default();
    let left = GraphPattern::bgp([TriplePattern::new(var("s"), ex("p"), var("m"))]);
    let right = GraphPattern::bgp([TriplePattern::new(var("m"), ex("p"), var("o"))]);
    let run = |strategy: JoinStrategy| -> Vec<QuerySolution> {
        let query = Query::Select {
            pattern: GraphPattern::Join {
                left: Box::new(left.clone()),
                right: Box::new(right.clone()),
                strategy,
            },
        };
        let mut rows = select(&ds, &ctx, &query);
        rows.sort_by_key(|r| format!("{r:?}"));
        rows
    };
    assert_eq!(run(JoinStrategy::Hash), run(JoinStrategy::NestedLoop));
    assert_eq!(run(JoinStrategy::Auto), run(JoinStrategy::Hash));
}

#[test]
fn distinct_order_and_slice_pipeline() {
    let ds = fixture();
    let ctx = ExecutionContext::default();
    let query = Query::Select {
        pattern: GraphPattern::Slice {
            inner: Box::new(GraphPattern::OrderBy {
                inner: Box::new(GraphPattern::Distinct {
                    inner: Box::new(GraphPattern::Project {
                        inner: Box::new(GraphPattern::bgp([TriplePattern::new(
                            ex("a"),
                            ex("q"),
                            var("y"),
                        )])),
                        variables: vec![var("y")],
                    }),
                }),
                conditions: vec![triad_vm::OrderExpression {
                    expr: Expression::variable("y"),
                    descending: true,
                }],
            }),
            offset: 0,
            limit: Some(1),
        },
    };
    let rows = select(&ds, &ctx, &query);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("y"), Some(&int(2)));
}

#[test]
fn describe_roundtrip() {
    let ds = fixture();
    let ctx = ExecutionContext::default();
    let query = Query::Describe {
        targets: vec![DescribeTarget::NamedNode(ex("a"))],
        pattern: GraphPattern::Bgp { patterns: vec![] },
    };
    let optimized = optimize_query(&ds, &query);
    let QueryResults::Graph(triples) = evaluate_query(&ds, &ctx, &optimized).unwrap() else {
        panic!("graph expected");
    };
    let triples: Vec<_> = triples.map(|t| t.unwrap()).collect();
    // ex:a has three outgoing triples.
    assert_eq!(triples.len(), 3);
}

#[test]
fn zero_or_more_reflexivity_property() {
    // For every node n in the store, n (p*) n holds.
    let ds = fixture();
    let ctx = ExecutionContext::default();
    let pattern = GraphPattern::path(
        var("s"),
        PathExpr::ZeroOrMore(Box::new(PathExpr::link(ex("p")))),
        var("o"),
    );
    let rows: Vec<Binding> = evaluate_pattern(&ds, &ctx, &pattern)
        .unwrap()
        .map(|b| b.unwrap())
        .collect();
    let nodes: Vec<&str> = vec!["a", "b", "c"];
    for node in nodes {
        let id = ds
            .lookup(&Term::NamedNode(ex(node)))
            .unwrap()
            .unwrap();
        assert!(
            rows.iter().any(|b| {
                b.get_var("s").and_then(|v| v.as_id()) == Some(id)
                    && b.get_var("o").and_then(|v| v.as_id()) == Some(id)
            }),
            "identity pair missing for {node}"
        );
    }
}
