//! Collects predicates and functors from a program and records the
//! dependency edges between predicates.

use std::collections::{BTreeSet, HashMap};

use log::trace;
use serde::{Deserialize, Serialize};

use super::{error::AnalysisError, StratumId};
use crate::lang::{Atom, Literal, Program, RuleId, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PredId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FunctorId(pub usize);

/// A queryable relation of the program.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub id: PredId,
    pub name: String,
    pub arity: usize,
    /// True until some rule with a non-empty body defines this predicate.
    pub is_extensional: bool,
    /// Rules whose head is this predicate.
    pub rules: BTreeSet<RuleId>,
    pub pos_depends_on: BTreeSet<PredId>,
    pub neg_depends_on: BTreeSet<PredId>,
    pub pos_appears_in: BTreeSet<RuleId>,
    pub neg_appears_in: BTreeSet<RuleId>,
    /// Predicates that depend on this one, positively or negatively.
    pub precedes: BTreeSet<PredId>,
    stratum: Option<StratumId>,
}

impl Predicate {
    fn new(id: PredId, name: &str, arity: usize) -> Self {
        Self {
            id,
            name: name.to_string(),
            arity,
            is_extensional: true,
            rules: BTreeSet::new(),
            pos_depends_on: BTreeSet::new(),
            neg_depends_on: BTreeSet::new(),
            pos_appears_in: BTreeSet::new(),
            neg_appears_in: BTreeSet::new(),
            precedes: BTreeSet::new(),
            stratum: None,
        }
    }

    pub fn stratum(&self) -> Option<StratumId> {
        self.stratum
    }

    pub(super) fn assign_stratum(&mut self, stratum: StratumId) {
        debug_assert!(
            self.stratum.is_none(),
            "stratum of {} assigned twice",
            self.name
        );
        self.stratum = Some(stratum);
    }
}

/// A data constructor used inside nested terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Functor {
    pub id: FunctorId,
    pub name: String,
    pub arity: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    predicates: Vec<Predicate>,
    name2pred: HashMap<String, PredId>,
    functors: Vec<Functor>,
    name2functor: HashMap<String, FunctorId>,
}

impl Registry {
    /// Walks every rule once, creating predicate and functor records and the
    /// dependency edges between predicates.
    pub fn register(program: &Program) -> Result<Self, AnalysisError> {
        let mut registry = Registry::default();

        for (rule_id, rule) in program.rules_with_ids() {
            let head = registry.handle_atom(&rule.head, rule_id)?;
            registry.predicates[head.0].rules.insert(rule_id);
            if !rule.body.is_empty() {
                registry.predicates[head.0].is_extensional = false;
            }

            for literal in &rule.body {
                match literal {
                    Literal::Atom(atom) => {
                        let pred = registry.handle_atom(atom, rule_id)?;
                        registry.predicates[pred.0].precedes.insert(head);
                        registry.predicates[pred.0].pos_appears_in.insert(rule_id);
                        registry.predicates[head.0].pos_depends_on.insert(pred);
                    }
                    Literal::Neg(atom) => {
                        let pred = registry.handle_atom(atom, rule_id)?;
                        registry.predicates[pred.0].precedes.insert(head);
                        registry.predicates[pred.0].neg_appears_in.insert(rule_id);
                        registry.predicates[head.0].neg_depends_on.insert(pred);
                    }
                    Literal::App(app) => {
                        for term in &app.args {
                            registry.scan_term(term, rule_id)?;
                        }
                    }
                    Literal::Assign(assign) => {
                        registry.scan_term(&assign.target, rule_id)?;
                        registry.scan_term(&assign.expr, rule_id)?;
                    }
                    Literal::Lit(_) => {}
                }
            }
        }

        for (rule_id, rule) in program.rules_with_ids() {
            if rule.aggregates() {
                let pred = &registry.predicates[registry.name2pred[&rule.head.pred].0];
                if pred.rules.len() != 1 {
                    return Err(AnalysisError::MixedAggregation {
                        predicate: pred.name.clone(),
                        rules: pred.rules.len(),
                    });
                }
                trace!("{} aggregates into {}", rule_id, pred.name);
            }
        }

        Ok(registry)
    }

    fn handle_atom(&mut self, atom: &Atom, rule: RuleId) -> Result<PredId, AnalysisError> {
        if self.name2functor.contains_key(&atom.pred) {
            return Err(AnalysisError::NameCollision {
                name: atom.pred.clone(),
                rule,
            });
        }
        let id = match self.name2pred.get(&atom.pred) {
            Some(&id) => {
                let expected = self.predicates[id.0].arity;
                if expected != atom.arity() {
                    return Err(AnalysisError::PredicateArityMismatch {
                        name: atom.pred.clone(),
                        rule,
                        expected,
                        found: atom.arity(),
                    });
                }
                id
            }
            None => {
                let id = PredId(self.predicates.len());
                self.predicates
                    .push(Predicate::new(id, &atom.pred, atom.arity()));
                self.name2pred.insert(atom.pred.clone(), id);
                id
            }
        };
        for term in &atom.terms {
            self.scan_term(term, rule)?;
        }
        Ok(id)
    }

    fn handle_functor(&mut self, atom: &Atom, rule: RuleId) -> Result<FunctorId, AnalysisError> {
        if self.name2pred.contains_key(&atom.pred) {
            return Err(AnalysisError::NameCollision {
                name: atom.pred.clone(),
                rule,
            });
        }
        let id = match self.name2functor.get(&atom.pred) {
            Some(&id) => {
                let expected = self.functors[id.0].arity;
                if expected != atom.arity() {
                    return Err(AnalysisError::FunctorArityMismatch {
                        name: atom.pred.clone(),
                        rule,
                        expected,
                        found: atom.arity(),
                    });
                }
                id
            }
            None => {
                let id = FunctorId(self.functors.len());
                self.functors.push(Functor {
                    id,
                    name: atom.pred.clone(),
                    arity: atom.arity(),
                });
                self.name2functor.insert(atom.pred.clone(), id);
                id
            }
        };
        for term in &atom.terms {
            self.scan_term(term, rule)?;
        }
        Ok(id)
    }

    /// Registers every nested atom inside `term` as a functor.
    fn scan_term(&mut self, term: &Term, rule: RuleId) -> Result<(), AnalysisError> {
        match term {
            Term::Atom(atom) => self.handle_functor(atom, rule).map(|_| ()),
            Term::Bin(_, l, r) => {
                self.scan_term(l, rule)?;
                self.scan_term(r, rule)
            }
            Term::Agg(_, t) => self.scan_term(t, rule),
            Term::Var(_) | Term::Lit(_) => Ok(()),
        }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub(super) fn predicates_mut(&mut self) -> &mut [Predicate] {
        &mut self.predicates
    }

    pub fn predicate(&self, id: PredId) -> &Predicate {
        &self.predicates[id.0]
    }

    pub fn pred_id(&self, name: &str) -> Option<PredId> {
        self.name2pred.get(name).copied()
    }

    pub fn functors(&self) -> &[Functor] {
        &self.functors
    }

    pub fn functor(&self, id: FunctorId) -> &Functor {
        &self.functors[id.0]
    }

    pub fn functor_id(&self, name: &str) -> Option<FunctorId> {
        self.name2functor.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::{Literal, Rule};

    fn atom(pred: &str, vars: &[&str]) -> Atom {
        Atom::new(pred, vars.iter().map(|v| Term::var(v)).collect())
    }

    #[test]
    fn test_dependency_edges() {
        let program = Program::new(vec![Rule::new(
            atom("P", &["x"]),
            vec![
                Literal::Atom(atom("Q", &["x"])),
                Literal::Neg(atom("R", &["x"])),
            ],
        )]);
        let registry = Registry::register(&program).unwrap();
        let p = registry.pred_id("P").unwrap();
        let q = registry.pred_id("Q").unwrap();
        let r = registry.pred_id("R").unwrap();

        let pp = registry.predicate(p);
        assert!(!pp.is_extensional);
        assert_eq!(pp.pos_depends_on, BTreeSet::from([q]));
        assert_eq!(pp.neg_depends_on, BTreeSet::from([r]));
        assert!(registry.predicate(q).is_extensional);
        assert!(registry.predicate(q).precedes.contains(&p));
        assert!(registry.predicate(r).precedes.contains(&p));
        assert!(registry.predicate(r).neg_appears_in.contains(&RuleId(0)));
        assert!(registry.predicate(q).pos_appears_in.contains(&RuleId(0)));
    }

    #[test]
    fn test_fact_rule_keeps_predicate_extensional() {
        let program = Program::new(vec![Rule::fact(Atom::new("Q", vec![Term::int(1)]))]);
        let registry = Registry::register(&program).unwrap();
        let q = registry.predicate(registry.pred_id("Q").unwrap());
        assert!(q.is_extensional);
        assert_eq!(q.rules.len(), 1);
    }

    #[test]
    fn test_predicate_arity_mismatch() {
        let program = Program::new(vec![
            Rule::new(atom("P", &["x"]), vec![Literal::Atom(atom("Q", &["x"]))]),
            Rule::new(atom("P", &["x"]), vec![Literal::Atom(atom("Q", &["x", "y"]))]),
        ]);
        let err = Registry::register(&program).unwrap_err();
        assert_eq!(
            err,
            AnalysisError::PredicateArityMismatch {
                name: "Q".to_string(),
                rule: RuleId(1),
                expected: 1,
                found: 2,
            }
        );
    }

    #[test]
    fn test_nested_functor_arity_mismatch() {
        let nested = |terms| Atom::new("P", vec![Term::functor("f", terms)]);
        let program = Program::new(vec![
            Rule::fact(nested(vec![Term::int(1)])),
            Rule::fact(nested(vec![Term::int(1), Term::int(2)])),
        ]);
        let err = Registry::register(&program).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::FunctorArityMismatch { ref name, expected: 1, found: 2, .. } if name == "f"
        ));
    }

    #[test]
    fn test_functors_inside_expressions_are_registered() {
        let program = Program::new(vec![Rule::new(
            atom("P", &["y"]),
            vec![
                Literal::Atom(atom("Q", &["x"])),
                Literal::assign("y", Term::functor("wrap", vec![Term::var("x")])),
            ],
        )]);
        let registry = Registry::register(&program).unwrap();
        let wrap = registry.functor(registry.functor_id("wrap").unwrap());
        assert_eq!(wrap.arity, 1);
        assert!(registry.pred_id("wrap").is_none());
    }

    #[test]
    fn test_name_collision() {
        let program = Program::new(vec![
            Rule::new(
                atom("P", &["x"]),
                vec![Literal::atom("Q", vec![Term::functor("Q", vec![Term::var("x")])])],
            ),
        ]);
        let err = Registry::register(&program).unwrap_err();
        assert_eq!(
            err,
            AnalysisError::NameCollision {
                name: "Q".to_string(),
                rule: RuleId(0)
            }
        );
    }

    #[test]
    fn test_name_collision_functor_first() {
        let program = Program::new(vec![
            Rule::fact(Atom::new("P", vec![Term::functor("f", vec![Term::int(1)])])),
            Rule::new(atom("f", &["x"]), vec![Literal::Atom(atom("P", &["x"]))]),
        ]);
        let err = Registry::register(&program).unwrap_err();
        assert!(matches!(err, AnalysisError::NameCollision { ref name, .. } if name == "f"));
    }

    #[test]
    fn test_aggregating_predicate_needs_single_rule() {
        let program = Program::new(vec![
            Rule::new(
                Atom::new("Total", vec![Term::var("k"), Term::sum(Term::var("v"))]),
                vec![Literal::Atom(atom("Item", &["k", "v"]))],
            ),
            Rule::new(atom("Total", &["k", "v"]), vec![Literal::Atom(atom("Item", &["k", "v"]))]),
        ]);
        let err = Registry::register(&program).unwrap_err();
        assert_eq!(
            err,
            AnalysisError::MixedAggregation {
                predicate: "Total".to_string(),
                rules: 2
            }
        );
    }
}
