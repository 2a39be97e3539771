//! End-to-end evaluation scenarios.

use pretty_assertions::assert_eq;

use super::*;
use crate::lang::{Atom, BinOp, Const, Literal, Program, Rule, Term};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn vars(names: &[&str]) -> Vec<Term> {
    names.iter().map(|v| Term::var(v)).collect()
}

fn strs(values: &[&str]) -> Vec<Value> {
    values.iter().map(|v| Value::from(*v)).collect()
}

fn fact(pred: &str, values: &[&str]) -> Fact {
    Fact::new(pred, strs(values))
}

fn engine(rules: Vec<Rule>) -> Engine {
    init();
    let params = Params {
        sanity_check: true,
        ..Default::default()
    };
    crate::load(&Program::new(rules), params).unwrap()
}

fn transitive_closure() -> Vec<Rule> {
    vec![
        Rule::new(
            Atom::new("Reachable", vars(&["x", "y"])),
            vec![Literal::atom("Link", vars(&["x", "y"]))],
        ),
        Rule::new(
            Atom::new("Reachable", vars(&["x", "y"])),
            vec![
                Literal::atom("Reachable", vars(&["x", "z"])),
                Literal::atom("Link", vars(&["z", "y"])),
            ],
        ),
    ]
}

fn sum_items() -> Rule {
    Rule::new(
        Atom::new("Total", vec![Term::var("k"), Term::sum(Term::var("v"))]),
        vec![Literal::atom("Item", vars(&["k", "v"]))],
    )
}

fn item(k: &str, v: i64) -> Fact {
    Fact::new("Item", vec![Value::from(k), Value::Int(v)])
}

#[test]
fn test_transitive_closure_across_calls() {
    let mut engine = engine(transitive_closure());
    engine
        .add_tuples(&[fact("Link", &["a", "b"]), fact("Link", &["b", "c"])])
        .unwrap();
    assert_eq!(
        engine.tuples_of("Reachable"),
        vec![strs(&["a", "b"]), strs(&["a", "c"]), strs(&["b", "c"])]
    );

    let before = engine.tuples();
    let ids: Vec<TupleId> = [["a", "b"], ["a", "c"], ["b", "c"]]
        .iter()
        .map(|vs| engine.lookup("Reachable", &strs(vs)).unwrap())
        .collect();

    engine.add_tuples(&[fact("Link", &["c", "d"])]).unwrap();
    assert_eq!(
        engine.tuples_of("Reachable"),
        vec![
            strs(&["a", "b"]),
            strs(&["a", "c"]),
            strs(&["a", "d"]),
            strs(&["b", "c"]),
            strs(&["b", "d"]),
            strs(&["c", "d"]),
        ]
    );
    for (vs, id) in [["a", "b"], ["a", "c"], ["b", "c"]].iter().zip(&ids) {
        assert_eq!(engine.lookup("Reachable", &strs(vs)), Some(*id));
    }
    assert!(before.is_subset(&engine.tuples()));
    assert_eq!(engine.metrics().derived_per_predicate["Reachable"], 3);
}

#[test]
fn test_every_tuple_is_reachable_from_edb() {
    let mut engine = engine(transitive_closure());
    engine
        .add_tuples(&[
            fact("Link", &["a", "b"]),
            fact("Link", &["b", "c"]),
            fact("Link", &["c", "a"]),
        ])
        .unwrap();
    let reachable = engine.reachable_tuples(engine.edb_tuples().iter().copied());
    assert_eq!(reachable, engine.tuples());
    assert_eq!(engine.tuples_of("Reachable").len(), 9);
    engine.sanity_check().unwrap();
}

#[test]
fn test_aggregation_replaces_previous_result() {
    let mut engine = engine(vec![sum_items()]);
    engine.add_tuples(&[item("g", 3), item("g", 4)]).unwrap();
    assert_eq!(
        engine.tuples_of("Total"),
        vec![vec![Value::from("g"), Value::Int(7)]]
    );
    let seven = engine
        .lookup("Total", &[Value::from("g"), Value::Int(7)])
        .unwrap();

    engine.add_tuples(&[item("g", 5), item("h", 1)]).unwrap();
    assert_eq!(
        engine.tuples_of("Total"),
        vec![
            vec![Value::from("g"), Value::Int(12)],
            vec![Value::from("h"), Value::Int(1)],
        ]
    );
    assert!(!engine.tuple_store().is_live(seven));
    assert!(!engine.contains("Total", &[Value::from("g"), Value::Int(7)]));

    // A grounding seen before does not contribute twice.
    engine.add_tuples(&[item("g", 3)]).unwrap();
    assert!(engine.contains("Total", &[Value::from("g"), Value::Int(12)]));
    engine.sanity_check().unwrap();
}

#[test]
fn test_aggregation_counts_distinct_groundings() {
    let mut engine = engine(vec![Rule::new(
        Atom::new("Total", vec![Term::var("k"), Term::sum(Term::var("v"))]),
        vec![Literal::atom("Sale", vars(&["k", "id", "v"]))],
    )]);
    let sale = |id: &str, v: i64| {
        Fact::new("Sale", vec![Value::from("g"), Value::from(id), Value::Int(v)])
    };
    engine.add_tuples(&[sale("s1", 2), sale("s2", 2)]).unwrap();
    assert_eq!(
        engine.tuples_of("Total"),
        vec![vec![Value::from("g"), Value::Int(4)]]
    );
}

#[test]
fn test_consumers_of_superseded_aggregates_are_withdrawn() {
    let mut engine = engine(vec![
        sum_items(),
        Rule::new(
            Atom::new("Doubled", vars(&["k", "w"])),
            vec![
                Literal::atom("Total", vars(&["k", "v"])),
                Literal::assign("w", Term::bin(BinOp::Mul, Term::var("v"), Term::int(2))),
            ],
        ),
    ]);
    engine.add_tuples(&[item("g", 3), item("g", 4)]).unwrap();
    assert!(engine.contains("Doubled", &[Value::from("g"), Value::Int(14)]));

    engine.add_tuples(&[item("g", 5)]).unwrap();
    assert_eq!(
        engine.tuples_of("Doubled"),
        vec![vec![Value::from("g"), Value::Int(24)]]
    );
    assert!(!engine.contains("Doubled", &[Value::from("g"), Value::Int(14)]));
    assert_eq!(engine.metrics().superseded_results, 1);
    assert_eq!(engine.metrics().withdrawn_tuples, 1);

    let supported = engine.reachable_tuples(engine.edb_tuples().iter().copied());
    assert_eq!(supported, engine.tuples());
}

#[test]
fn test_withdrawn_consumer_returns_with_its_result() {
    let mut engine = engine(vec![
        sum_items(),
        Rule::new(
            Atom::new("Seen", vars(&["k", "t"])),
            vec![Literal::atom("Total", vars(&["k", "t"]))],
        ),
    ]);
    let seen = |t: i64| vec![Value::from("g"), Value::Int(t)];

    engine.add_tuples(&[item("g", 3), item("g", 4)]).unwrap();
    engine.add_tuples(&[item("g", 5)]).unwrap();
    assert_eq!(engine.tuples_of("Seen"), vec![seen(12)]);

    engine.add_tuples(&[item("g", -5)]).unwrap();
    assert_eq!(engine.tuples_of("Total"), vec![seen(7)]);
    assert_eq!(engine.tuples_of("Seen"), vec![seen(7)]);
    engine.sanity_check().unwrap();
}

#[test]
fn test_repeated_body_atom_keeps_input_order() {
    let mut engine = engine(vec![Rule::new(
        Atom::new("P", vars(&["x"])),
        vec![
            Literal::atom("Q", vars(&["x"])),
            Literal::atom("Q", vars(&["x"])),
        ],
    )]);
    engine.add_tuples(&[fact("Q", &["a"])]).unwrap();
    let q = engine.lookup("Q", &strs(&["a"])).unwrap();
    let products: Vec<Vec<TupleId>> = engine
        .provenance()
        .products()
        .map(|(_, p)| p.inputs.clone())
        .collect();
    assert_eq!(products, vec![vec![q, q]]);
    assert_eq!(engine.tuples_of("P"), vec![strs(&["a"])]);
    engine.sanity_check().unwrap();
}

#[test]
fn test_nested_aggregation_is_refused_at_load() {
    init();
    let program = Program::new(vec![
        sum_items(),
        Rule::new(
            Atom::new("Grand", vec![Term::sum(Term::var("t"))]),
            vec![Literal::atom("Total", vars(&["k", "t"]))],
        ),
    ]);
    assert!(matches!(
        crate::load(&program, Params::default()),
        Err(crate::Error::Analysis(
            crate::analysis::AnalysisError::NestedAggregation { .. }
        ))
    ));
}

#[test]
fn test_stratified_negation() {
    let mut engine = engine(vec![Rule::new(
        Atom::new("P", vars(&["x"])),
        vec![Literal::atom("Q", vars(&["x"])), Literal::neg("R", vars(&["x"]))],
    )]);
    let analysis = engine.analysis();
    assert!(
        analysis.predicate_stratum("R").unwrap().id < analysis.predicate_stratum("P").unwrap().id
    );

    engine
        .add_tuples(&[fact("R", &["a"]), fact("Q", &["a"]), fact("Q", &["b"])])
        .unwrap();
    assert_eq!(engine.tuples_of("P"), vec![strs(&["b"])]);
}

#[test]
fn test_negation_is_not_retracted_across_calls() {
    let mut engine = engine(vec![Rule::new(
        Atom::new("P", vars(&["x"])),
        vec![Literal::atom("Q", vars(&["x"])), Literal::neg("R", vars(&["x"]))],
    )]);
    engine.add_tuples(&[fact("Q", &["a"])]).unwrap();
    engine.add_tuples(&[fact("R", &["a"])]).unwrap();
    assert_eq!(engine.tuples_of("P"), vec![strs(&["a"])]);
}

#[test]
fn test_repeated_call_is_idempotent() {
    let mut engine = engine(transitive_closure());
    let facts = [fact("Link", &["a", "b"]), fact("Link", &["b", "c"])];
    engine.add_tuples(&facts).unwrap();
    let before = engine.tuples();

    engine.add_tuples(&facts).unwrap();
    assert_eq!(engine.tuples(), before);
    assert_eq!(engine.metrics().total_derived(), 0);
    assert_eq!(engine.metrics().groundings, 0);
}

#[test]
fn test_body_and_rule_order_do_not_change_results() {
    let unreached = |negation_first: bool| {
        let node = Literal::atom("Node", vars(&["x"]));
        let not_reached = Literal::neg("Reachable", vec![Term::str("a"), Term::var("x")]);
        let body = if negation_first {
            vec![not_reached, node]
        } else {
            vec![node, not_reached]
        };
        Rule::new(Atom::new("Unreached", vars(&["x"])), body)
    };

    let mut forward = transitive_closure();
    forward.push(unreached(false));

    let mut shuffled = vec![
        unreached(true),
        Rule::new(
            Atom::new("Reachable", vars(&["x", "y"])),
            vec![
                Literal::atom("Link", vars(&["z", "y"])),
                Literal::atom("Reachable", vars(&["x", "z"])),
            ],
        ),
    ];
    shuffled.push(transitive_closure().remove(0));

    let facts: Vec<Fact> = [("a", "b"), ("b", "c"), ("c", "a"), ("d", "e")]
        .iter()
        .map(|&(x, y)| fact("Link", &[x, y]))
        .chain(["a", "b", "c", "d", "e"].iter().map(|&n| fact("Node", &[n])))
        .collect();

    let results: Vec<(Vec<Vec<Value>>, Vec<Vec<Value>>)> = [forward, shuffled]
        .into_iter()
        .map(|rules| {
            let mut engine = engine(rules);
            engine.add_tuples(&facts).unwrap();
            (engine.tuples_of("Reachable"), engine.tuples_of("Unreached"))
        })
        .collect();
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0].1, vec![strs(&["d"]), strs(&["e"])]);
}

#[test]
fn test_mutual_recursion() {
    let succ = |x: &str, y: &str| {
        Rule::new(
            Atom::new(y, vars(&["b"])),
            vec![
                Literal::atom(x, vars(&["a"])),
                Literal::atom("Succ", vars(&["a", "b"])),
            ],
        )
    };
    let mut engine = engine(vec![
        Rule::new(
            Atom::new("Even", vars(&["x"])),
            vec![Literal::atom("Zero", vars(&["x"]))],
        ),
        succ("Odd", "Even"),
        succ("Even", "Odd"),
    ]);
    let int_fact = |pred: &str, values: &[i64]| {
        Fact::new(pred, values.iter().map(|v| Value::Int(*v)).collect())
    };
    engine
        .add_tuples(&[
            int_fact("Zero", &[0]),
            int_fact("Succ", &[0, 1]),
            int_fact("Succ", &[1, 2]),
            int_fact("Succ", &[2, 3]),
        ])
        .unwrap();
    assert_eq!(
        engine.tuples_of("Even"),
        vec![vec![Value::Int(0)], vec![Value::Int(2)]]
    );
    assert_eq!(
        engine.tuples_of("Odd"),
        vec![vec![Value::Int(1)], vec![Value::Int(3)]]
    );
}

#[test]
fn test_assignment_in_recursion() {
    let mut engine = engine(vec![
        Rule::new(
            Atom::new("Dist", vec![Term::var("x"), Term::var("y"), Term::int(1)]),
            vec![Literal::atom("Link", vars(&["x", "y"]))],
        ),
        Rule::new(
            Atom::new("Dist", vars(&["x", "y", "d"])),
            vec![
                Literal::atom("Dist", vars(&["x", "z", "d0"])),
                Literal::atom("Link", vars(&["z", "y"])),
                Literal::assign("d", Term::bin(BinOp::Add, Term::var("d0"), Term::int(1))),
            ],
        ),
    ]);
    engine
        .add_tuples(&[
            fact("Link", &["a", "b"]),
            fact("Link", &["b", "c"]),
            fact("Link", &["c", "d"]),
        ])
        .unwrap();
    assert!(engine.contains("Dist", &[Value::from("a"), Value::from("d"), Value::Int(3)]));
    assert!(engine.contains("Dist", &[Value::from("b"), Value::from("d"), Value::Int(2)]));
    assert_eq!(engine.tuples_of("Dist").len(), 6);
}

#[test]
fn test_functor_terms() {
    let mut engine = engine(vec![
        Rule::new(
            Atom::new("Wrapped", vars(&["w"])),
            vec![
                Literal::atom("Item", vars(&["k", "v"])),
                Literal::assign("w", Term::functor("box", vars(&["k"]))),
            ],
        ),
        Rule::new(
            Atom::new("Unwrapped", vars(&["k"])),
            vec![Literal::atom("Wrapped", vec![Term::functor("box", vars(&["k"]))])],
        ),
    ]);
    let boxed = |k: &str| Value::functor("box", vec![Value::from(k)]);

    engine.add_tuples(&[item("g", 1), item("h", 2)]).unwrap();
    assert_eq!(
        engine.tuples_of("Wrapped"),
        vec![vec![boxed("g")], vec![boxed("h")]]
    );
    assert_eq!(engine.tuples_of("Unwrapped"), vec![strs(&["g"]), strs(&["h"])]);

    engine
        .add_tuples(&[Fact::new("Wrapped", vec![boxed("z")])])
        .unwrap();
    assert!(engine.contains("Unwrapped", &strs(&["z"])));
    let id = engine.lookup("Wrapped", &[boxed("z")]).unwrap();
    assert_eq!(engine.display_tuple(id), "Wrapped(box(\"z\"))");
}

#[test]
fn test_invalid_facts_change_nothing() {
    let mut engine = engine(vec![sum_items()]);
    let cases = [
        (
            vec![item("g", 1), fact("Nope", &["x"])],
            EngineError::UnknownPredicate("Nope".to_string()),
        ),
        (
            vec![fact("Item", &["g"])],
            EngineError::FactArity {
                pred: "Item".to_string(),
                expected: 2,
                found: 1,
            },
        ),
        (
            vec![Fact::new("Total", vec![Value::from("g"), Value::Int(1)])],
            EngineError::AggregatingFact("Total".to_string()),
        ),
        (
            vec![Fact::new(
                "Item",
                vec![Value::functor("crate", vec![]), Value::Int(1)],
            )],
            EngineError::UnknownFunctor("crate".to_string()),
        ),
    ];
    for (facts, expected) in cases {
        assert_eq!(engine.add_tuples(&facts).unwrap_err(), expected);
        assert!(engine.tuples().is_empty());
    }
}

#[test]
fn test_program_facts_and_reset() {
    let mut rules = transitive_closure();
    rules.push(Rule::fact(Atom::new(
        "Link",
        vec![Term::str("a"), Term::str("b")],
    )));
    let mut engine = engine(rules);

    engine.add_tuples(&[]).unwrap();
    assert_eq!(engine.tuples_of("Reachable"), vec![strs(&["a", "b"])]);
    assert_eq!(engine.edb_tuples().len(), 1);

    engine.reset();
    assert!(engine.tuples().is_empty());
    assert!(engine.edb_tuples().is_empty());

    engine.add_tuples(&[fact("Link", &["b", "c"])]).unwrap();
    assert_eq!(
        engine.tuples_of("Reachable"),
        vec![strs(&["a", "b"]), strs(&["a", "c"]), strs(&["b", "c"])]
    );
}

#[test]
fn test_rules_without_positive_atoms() {
    let mut engine = engine(vec![
        Rule::new(
            Atom::new("Five", vars(&["x"])),
            vec![Literal::assign(
                "x",
                Term::bin(BinOp::Add, Term::int(2), Term::int(3)),
            )],
        ),
        Rule::new(
            Atom::new("Lonely", vec![Term::int(1)]),
            vec![Literal::neg("Q", vec![Term::int(1)])],
        ),
        Rule::new(
            Atom::new("Never", vec![Term::int(1)]),
            vec![Literal::Lit(Const::Bool(false))],
        ),
    ]);
    engine.add_tuples(&[]).unwrap();
    assert_eq!(engine.tuples_of("Five"), vec![vec![Value::Int(5)]]);
    assert_eq!(engine.tuples_of("Lonely"), vec![vec![Value::Int(1)]]);
    assert!(engine.tuples_of("Never").is_empty());

    engine
        .add_tuples(&[Fact::new("Q", vec![Value::Int(1)])])
        .unwrap();
    assert_eq!(engine.metrics().total_derived(), 0);
    assert_eq!(engine.metrics().redundant_groundings, 1);
}

#[test]
fn test_arithmetic_failures_skip_groundings() {
    let mut engine = engine(vec![Rule::new(
        Atom::new("Ratio", vars(&["k", "r"])),
        vec![
            Literal::atom("Pair", vars(&["k", "a", "b"])),
            Literal::assign("r", Term::bin(BinOp::Div, Term::var("a"), Term::var("b"))),
        ],
    )]);
    let pair = |k: &str, a: i64, b: i64| {
        Fact::new("Pair", vec![Value::from(k), Value::Int(a), Value::Int(b)])
    };
    engine
        .add_tuples(&[pair("x", 6, 3), pair("y", 1, 0)])
        .unwrap();
    assert_eq!(
        engine.tuples_of("Ratio"),
        vec![vec![Value::from("x"), Value::Int(2)]]
    );
    assert_eq!(engine.metrics().skipped_groundings, 1);
}

fn naturals() -> Program {
    Program::new(vec![
        Rule::fact(Atom::new("Nat", vec![Term::str("zero")])),
        Rule::new(
            Atom::new("Nat", vec![Term::functor("s", vars(&["x"]))]),
            vec![Literal::atom("Nat", vars(&["x"]))],
        ),
    ])
}

#[test]
fn test_term_depth_bound() {
    init();
    let params = Params {
        max_term_depth: Some(5),
        ..Default::default()
    };
    let mut engine = crate::load(&naturals(), params).unwrap();
    assert_eq!(
        engine.add_tuples(&[]).unwrap_err(),
        EngineError::TermDepthLimit {
            pred: "Nat".to_string(),
            depth: 6,
            limit: 5,
        }
    );
}

#[test]
fn test_fixpoint_iteration_bound() {
    init();
    let params = Params {
        max_fixpoint_iterations: Some(3),
        ..Default::default()
    };
    let mut engine = crate::load(&naturals(), params).unwrap();
    assert_eq!(
        engine.add_tuples(&[]).unwrap_err(),
        EngineError::FixpointLimit {
            stratum: 0,
            limit: 3
        }
    );
}

#[test]
fn test_dot_export() {
    let mut engine = engine(vec![sum_items()]);
    engine.add_tuples(&[item("g", 3)]).unwrap();
    engine.add_tuples(&[item("g", 4)]).unwrap();
    let dot = engine.to_dot();
    assert!(dot.starts_with("digraph Lineage {"));
    assert!(dot.contains(r#"[label="Item(\"g\", 3)", style=filled, fillcolor=lightblue];"#));
    assert!(dot.contains(r#"[label="Total(\"g\", 3)", style=dashed, color=gray];"#));
    assert!(dot.contains(r#"[label="Total(\"g\", 7)"];"#));
    assert!(dot.contains("shape=diamond"));
    assert_eq!(dot.matches(" -> pg").count(), 2);
}

#[test]
fn test_program_from_json_end_to_end() {
    init();
    let program = crate::lang::program_from_json(
        r#"{"rules": [
            {"head": {"pred": "P", "terms": [{"Var": "x"}]},
             "body": [{"Atom": {"pred": "Q", "terms": [{"Var": "x"}]}},
                      {"Neg": {"pred": "R", "terms": [{"Var": "x"}]}}]}
        ]}"#,
    )
    .unwrap();
    let facts: Vec<Fact> = serde_json::from_str(
        r#"[{"pred": "Q", "values": ["a"]},
            {"pred": "Q", "values": ["b"]},
            {"pred": "R", "values": ["b"]}]"#,
    )
    .unwrap();
    let mut engine = crate::load(&program, Params::default()).unwrap();
    engine.add_tuples(&facts).unwrap();
    let mut out = String::new();
    engine.write_tuples(&mut out).unwrap();
    assert_eq!(out, "P(\"a\")\nQ(\"a\")\nQ(\"b\")\nR(\"b\")\n");
}
