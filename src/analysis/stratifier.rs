//! Stratification of the predicate dependency graph.
//!
//! Strongly connected components are computed with Tarjan's algorithm over the
//! combined positive and negative "precedes" edges. Each component becomes one
//! stratum; the resulting list is in dependency order, so a stratum only reads
//! predicates of strata at or before its own position.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use super::{
    error::AnalysisError,
    registry::{PredId, Predicate, Registry},
};
use crate::lang::{Literal, Program, RuleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StratumId(pub usize);

/// A body position that negates some predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegSite {
    pub rule: RuleId,
    pub position: usize,
}

#[derive(Debug, Clone)]
pub struct Stratum {
    pub id: StratumId,
    pub preds: Vec<PredId>,
    pub non_recursive_rules: Vec<RuleId>,
    /// Rules with a positive body atom over a predicate of this stratum.
    pub recursive_rules: Vec<RuleId>,
    /// Negated predicate name -> sites negating it in this stratum's rules.
    pub neg_sites: BTreeMap<String, Vec<NegSite>>,
    pub pos_depends_on: BTreeSet<PredId>,
    pub neg_depends_on: BTreeSet<PredId>,
}

impl Stratum {
    pub fn contains(&self, pred: PredId) -> bool {
        self.preds.contains(&pred)
    }

    pub fn has_rules(&self) -> bool {
        !self.non_recursive_rules.is_empty() || !self.recursive_rules.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = RuleId> + '_ {
        self.non_recursive_rules
            .iter()
            .chain(self.recursive_rules.iter())
            .copied()
    }
}

/// Tarjan's strongly connected components over `Predicate::precedes`.
///
/// The depth-first search keeps its own stack of open nodes, so long
/// dependency chains do not grow the call stack.
struct Tarjan {
    edges: Vec<Vec<PredId>>,
    next_index: usize,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<PredId>,
    sccs: Vec<Vec<PredId>>,
}

impl Tarjan {
    fn new(preds: &[Predicate]) -> Self {
        Self {
            edges: preds
                .iter()
                .map(|p| p.precedes.iter().copied().collect())
                .collect(),
            next_index: 0,
            index: vec![None; preds.len()],
            lowlink: vec![0; preds.len()],
            on_stack: vec![false; preds.len()],
            stack: Vec::new(),
            sccs: Vec::new(),
        }
    }

    /// Components come out in reverse topological order.
    fn run(mut self) -> Vec<Vec<PredId>> {
        for v in 0..self.edges.len() {
            if self.index[v].is_none() {
                self.strong_connect(PredId(v));
            }
        }
        self.sccs
    }

    fn open(&mut self, v: PredId) {
        self.index[v.0] = Some(self.next_index);
        self.lowlink[v.0] = self.next_index;
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack[v.0] = true;
    }

    fn strong_connect(&mut self, root: PredId) {
        // (node, position of its next successor to visit)
        let mut work = vec![(root, 0)];
        self.open(root);

        while let Some(&(v, next)) = work.last() {
            let successor = self.edges[v.0].get(next).copied();
            if let Some(w) = successor {
                if let Some(frame) = work.last_mut() {
                    frame.1 += 1;
                }
                match self.index[w.0] {
                    None => {
                        self.open(w);
                        work.push((w, 0));
                    }
                    Some(w_index) if self.on_stack[w.0] => {
                        self.lowlink[v.0] = self.lowlink[v.0].min(w_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            work.pop();
            if let Some(&(parent, _)) = work.last() {
                self.lowlink[parent.0] = self.lowlink[parent.0].min(self.lowlink[v.0]);
            }
            if Some(self.lowlink[v.0]) == self.index[v.0] {
                let mut scc = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w.0] = false;
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                scc.sort();
                self.sccs.push(scc);
            }
        }
    }
}

/// Orders the predicates of `registry` into strata and assigns each predicate
/// its stratum.
pub fn stratify(registry: &mut Registry, program: &Program) -> Result<Vec<Stratum>, AnalysisError> {
    let mut sccs = Tarjan::new(registry.predicates()).run();
    sccs.reverse();

    let mut strata = Vec::with_capacity(sccs.len());
    for (i, scc) in sccs.into_iter().enumerate() {
        let stratum = make_stratum(registry, program, StratumId(i), scc)?;
        debug!(
            "Stratum {}: preds {:?}, non-recursive {:?}, recursive {:?}",
            i,
            stratum
                .preds
                .iter()
                .map(|p| registry.predicate(*p).name.as_str())
                .collect::<Vec<_>>(),
            stratum.non_recursive_rules,
            stratum.recursive_rules
        );
        for &pred in &stratum.preds {
            registry.predicates_mut()[pred.0].assign_stratum(stratum.id);
        }
        strata.push(stratum);
    }
    check_nested_aggregation(registry, program)?;
    Ok(strata)
}

/// Rejects aggregating rules that read, directly or through other
/// predicates, the result of another aggregation: a replaced result would
/// keep its contribution in the outer sum.
fn check_nested_aggregation(registry: &Registry, program: &Program) -> Result<(), AnalysisError> {
    let aggregating: BTreeSet<PredId> = program
        .rules
        .iter()
        .filter(|r| r.aggregates())
        .filter_map(|r| registry.pred_id(&r.head.pred))
        .collect();

    for (rule_id, rule) in program.rules_with_ids().filter(|(_, r)| r.aggregates()) {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<PredId> = rule
            .body
            .iter()
            .filter_map(|lit| match lit {
                Literal::Atom(atom) | Literal::Neg(atom) => registry.pred_id(&atom.pred),
                _ => None,
            })
            .collect();
        while let Some(pred) = stack.pop() {
            if !seen.insert(pred) {
                continue;
            }
            if aggregating.contains(&pred) {
                return Err(AnalysisError::NestedAggregation {
                    predicate: rule.head.pred.clone(),
                    rule: rule_id,
                    reads: registry.predicate(pred).name.clone(),
                });
            }
            let pred = registry.predicate(pred);
            stack.extend(pred.pos_depends_on.iter().chain(&pred.neg_depends_on));
        }
    }
    Ok(())
}

fn make_stratum(
    registry: &Registry,
    program: &Program,
    id: StratumId,
    preds: Vec<PredId>,
) -> Result<Stratum, AnalysisError> {
    let mut stratum = Stratum {
        id,
        preds,
        non_recursive_rules: Vec::new(),
        recursive_rules: Vec::new(),
        neg_sites: BTreeMap::new(),
        pos_depends_on: BTreeSet::new(),
        neg_depends_on: BTreeSet::new(),
    };

    for &pred_id in &stratum.preds {
        let pred = registry.predicate(pred_id);
        if let Some(negated) = pred
            .neg_depends_on
            .iter()
            .find(|dep| stratum.preds.contains(dep))
        {
            return Err(AnalysisError::UnstratifiableNegation {
                predicate: pred.name.clone(),
                negated: registry.predicate(*negated).name.clone(),
            });
        }
        stratum.pos_depends_on.extend(&pred.pos_depends_on);
        stratum.neg_depends_on.extend(&pred.neg_depends_on);
    }

    let mut rules: Vec<RuleId> = stratum
        .preds
        .iter()
        .flat_map(|p| registry.predicate(*p).rules.iter().copied())
        .collect();
    rules.sort();

    for rule_id in rules {
        let rule = program.rule(rule_id);
        let recursive = rule.positive_atoms().any(|(_, atom)| {
            registry
                .pred_id(&atom.pred)
                .is_some_and(|p| stratum.preds.contains(&p))
        });
        if recursive {
            if rule.aggregates() {
                return Err(AnalysisError::RecursiveAggregation {
                    predicate: rule.head.pred.clone(),
                    rule: rule_id,
                });
            }
            stratum.recursive_rules.push(rule_id);
        } else {
            stratum.non_recursive_rules.push(rule_id);
        }

        for (position, literal) in rule.body.iter().enumerate() {
            if let Literal::Neg(atom) = literal {
                stratum
                    .neg_sites
                    .entry(atom.pred.clone())
                    .or_default()
                    .push(NegSite {
                        rule: rule_id,
                        position,
                    });
            }
        }
    }

    Ok(stratum)
}
