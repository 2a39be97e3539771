//! Abstract syntax of rule programs.
//!
//! This is the format the external rule-language parser produces and the only
//! input the analysis and solver consume. Every node is immutable once built
//! and serialisable, so a parsed program can be handed over as JSON.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString};

/// Stable identity of a rule: its position in the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub usize);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rule{}", self.0)
    }
}

// --- Constants ---

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Const {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl From<i64> for Const {
    fn from(v: i64) -> Self {
        Const::Int(v)
    }
}

impl From<bool> for Const {
    fn from(v: bool) -> Self {
        Const::Bool(v)
    }
}

impl From<&str> for Const {
    fn from(v: &str) -> Self {
        Const::Str(v.to_string())
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Int(v) => write!(f, "{}", v),
            Const::Bool(v) => write!(f, "{}", v),
            Const::Str(s) => write!(f, "{:?}", s),
        }
    }
}

// --- Operators ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, StrumDisplay,
)]
pub enum BinOp {
    #[strum(serialize = "+")]
    #[serde(rename = "+")]
    Add,
    #[strum(serialize = "-")]
    #[serde(rename = "-")]
    Sub,
    #[strum(serialize = "*")]
    #[serde(rename = "*")]
    Mul,
    #[strum(serialize = "/")]
    #[serde(rename = "/")]
    Div,
    #[strum(serialize = "%")]
    #[serde(rename = "%")]
    Rem,
}

/// Aggregation strategies. Only incremental summation is defined.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, StrumDisplay,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    Sum,
}

// --- Terms ---

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    Var(String),
    Lit(Const),
    /// A nested atom used as a data constructor (functor term).
    Atom(Atom),
    Bin(BinOp, Box<Term>, Box<Term>),
    /// Only valid as the last term of a rule head.
    Agg(Aggregator, Box<Term>),
}

impl Term {
    pub fn var(name: &str) -> Self {
        Term::Var(name.to_string())
    }

    pub fn int(v: i64) -> Self {
        Term::Lit(Const::Int(v))
    }

    pub fn str(v: &str) -> Self {
        Term::Lit(Const::Str(v.to_string()))
    }

    pub fn bool(v: bool) -> Self {
        Term::Lit(Const::Bool(v))
    }

    pub fn functor(name: &str, terms: Vec<Term>) -> Self {
        Term::Atom(Atom::new(name, terms))
    }

    pub fn bin(op: BinOp, left: Term, right: Term) -> Self {
        Term::Bin(op, Box::new(left), Box::new(right))
    }

    pub fn sum(aggregand: Term) -> Self {
        Term::Agg(Aggregator::Sum, Box::new(aggregand))
    }

    /// Appends every variable name occurring in this term, in order of appearance.
    pub fn collect_vars<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Term::Var(name) => out.push(name),
            Term::Lit(_) => {}
            Term::Atom(atom) => atom.terms.iter().for_each(|t| t.collect_vars(out)),
            Term::Bin(_, l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
            Term::Agg(_, t) => t.collect_vars(out),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(name) => write!(f, "{}", name),
            Term::Lit(c) => write!(f, "{}", c),
            Term::Atom(atom) => write!(f, "{}", atom),
            Term::Bin(op, l, r) => {
                let operand = |t: &Term| match t {
                    Term::Bin(..) => format!("({})", t),
                    _ => t.to_string(),
                };
                write!(f, "{} {} {}", operand(l), op, operand(r))
            }
            Term::Agg(agg, t) => write!(f, "{}<{}>", agg, t),
        }
    }
}

// --- Atoms & body literals ---

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Atom {
    pub pred: String,
    pub terms: Vec<Term>,
}

impl Atom {
    pub fn new(pred: &str, terms: Vec<Term>) -> Self {
        Self {
            pred: pred.to_string(),
            terms,
        }
    }

    pub fn arity(&self) -> usize {
        self.terms.len()
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.pred, self.terms.iter().join(", "))
    }
}

/// An arithmetic or boolean application. Opaque to analysis and evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct App {
    pub operator: String,
    pub args: Vec<Term>,
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operator, self.args.iter().join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assign {
    pub operator: String,
    pub target: Term,
    pub expr: Term,
}

impl fmt::Display for Assign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.target, self.operator, self.expr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Literal {
    Atom(Atom),
    Neg(Atom),
    App(App),
    Assign(Assign),
    Lit(Const),
}

impl Literal {
    pub fn atom(pred: &str, terms: Vec<Term>) -> Self {
        Literal::Atom(Atom::new(pred, terms))
    }

    pub fn neg(pred: &str, terms: Vec<Term>) -> Self {
        Literal::Neg(Atom::new(pred, terms))
    }

    pub fn assign(var: &str, expr: Term) -> Self {
        Literal::Assign(Assign {
            operator: "=".to_string(),
            target: Term::var(var),
            expr,
        })
    }

    pub fn app(operator: &str, args: Vec<Term>) -> Self {
        Literal::App(App {
            operator: operator.to_string(),
            args,
        })
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Atom(atom) => write!(f, "{}", atom),
            Literal::Neg(atom) => write!(f, "not {}", atom),
            Literal::App(app) => write!(f, "{}", app),
            Literal::Assign(assign) => write!(f, "{}", assign),
            Literal::Lit(c) => write!(f, "{}", c),
        }
    }
}

// --- Rules & programs ---

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub head: Atom,
    #[serde(default)]
    pub body: Vec<Literal>,
}

impl Rule {
    pub fn new(head: Atom, body: Vec<Literal>) -> Self {
        Self { head, body }
    }

    /// A body-less rule, i.e. a fact stated in the program.
    pub fn fact(head: Atom) -> Self {
        Self {
            head,
            body: Vec::new(),
        }
    }

    /// Whether the head ends in an aggregation term.
    pub fn aggregates(&self) -> bool {
        matches!(self.head.terms.last(), Some(Term::Agg(..)))
    }

    /// The body atoms that are queried positively, with their body positions.
    pub fn positive_atoms(&self) -> impl Iterator<Item = (usize, &Atom)> {
        self.body.iter().enumerate().filter_map(|(i, lit)| match lit {
            Literal::Atom(atom) => Some((i, atom)),
            _ => None,
        })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.body.is_empty() {
            write!(f, "{}.", self.head)
        } else {
            write!(f, "{} :- {}.", self.head, self.body.iter().join(", "))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub rules: Vec<Rule>,
}

impl Program {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.0]
    }

    pub fn rules_with_ids(&self) -> impl Iterator<Item = (RuleId, &Rule)> {
        self.rules.iter().enumerate().map(|(i, r)| (RuleId(i), r))
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rule in &self.rules {
            writeln!(f, "{}", rule)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;

    use super::*;

    fn reachable() -> Program {
        Program::new(vec![
            Rule::new(
                Atom::new("Reachable", vec![Term::var("x"), Term::var("y")]),
                vec![Literal::atom("Link", vec![Term::var("x"), Term::var("y")])],
            ),
            Rule::new(
                Atom::new("Reachable", vec![Term::var("x"), Term::var("y")]),
                vec![
                    Literal::atom("Reachable", vec![Term::var("x"), Term::var("z")]),
                    Literal::atom("Link", vec![Term::var("z"), Term::var("y")]),
                ],
            ),
        ])
    }

    #[test]
    fn test_display_program() {
        assert_eq!(
            reachable().to_string(),
            "Reachable(x, y) :- Link(x, y).\n\
             Reachable(x, y) :- Reachable(x, z), Link(z, y).\n"
        );
    }

    #[test]
    fn test_display_aggregate_and_negation() {
        let rule = Rule::new(
            Atom::new(
                "Total",
                vec![
                    Term::var("k"),
                    Term::sum(Term::bin(BinOp::Mul, Term::var("v"), Term::int(2))),
                ],
            ),
            vec![
                Literal::atom("Item", vec![Term::var("k"), Term::var("v")]),
                Literal::neg("Hidden", vec![Term::var("k")]),
                Literal::assign("w", Term::functor("pair", vec![Term::var("k"), Term::str("a")])),
            ],
        );
        assert!(rule.aggregates());
        assert_eq!(
            rule.to_string(),
            "Total(k, sum<v * 2>) :- Item(k, v), not Hidden(k), w = pair(k, \"a\")."
        );
    }

    #[test]
    fn test_operator_symbols() {
        assert_eq!(BinOp::from_str("%").unwrap(), BinOp::Rem);
        assert_eq!(Aggregator::from_str("sum").unwrap(), Aggregator::Sum);
        assert!(BinOp::from_str("^").is_err());
    }

    #[test]
    fn test_collect_vars_in_order() {
        let term = Term::functor(
            "f",
            vec![Term::var("a"), Term::bin(BinOp::Add, Term::var("b"), Term::var("a"))],
        );
        let mut vars = Vec::new();
        term.collect_vars(&mut vars);
        assert_eq!(vars, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_json_roundtrip_keeps_program() {
        let program = reachable();
        let json = serde_json::to_string(&program).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back, program);
    }
}
