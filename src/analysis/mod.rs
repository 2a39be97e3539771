//! Static analysis of a rule program: predicate/functor registration,
//! dependency collection and stratification.
//!
//! The result of `stratify` is everything the solver needs to plan rules and
//! drive evaluation in dependency order.

pub mod error;
pub mod registry;
pub mod stratifier;

use std::fmt;

use itertools::Itertools;
use serde::Serialize;

pub use error::AnalysisError;
pub use registry::{Functor, FunctorId, PredId, Predicate, Registry};
pub use stratifier::{NegSite, Stratum, StratumId};

use crate::lang::{Program, RuleId};

/// Output of the analysis of one program.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    program: Program,
    registry: Registry,
    strata: Vec<Stratum>,
    rule2stratum: Vec<StratumId>,
}

/// Analyses `program`, failing when it is inconsistent or cannot be stratified.
pub fn stratify(program: &Program) -> Result<AnalysisResult, AnalysisError> {
    let mut registry = Registry::register(program)?;
    let strata = stratifier::stratify(&mut registry, program)?;

    let mut rule2stratum = vec![StratumId(0); program.rules.len()];
    for stratum in &strata {
        for rule in stratum.rules() {
            rule2stratum[rule.0] = stratum.id;
        }
    }

    Ok(AnalysisResult {
        program: program.clone(),
        registry,
        strata,
        rule2stratum,
    })
}

impl AnalysisResult {
    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn predicates(&self) -> &[Predicate] {
        self.registry.predicates()
    }

    pub fn functors(&self) -> &[Functor] {
        self.registry.functors()
    }

    /// Strata in dependency order.
    pub fn strata(&self) -> &[Stratum] {
        &self.strata
    }

    pub fn predicate(&self, name: &str) -> Option<&Predicate> {
        self.registry.pred_id(name).map(|id| self.registry.predicate(id))
    }

    pub fn predicate_stratum(&self, name: &str) -> Option<&Stratum> {
        self.predicate(name)
            .and_then(Predicate::stratum)
            .map(|s| &self.strata[s.0])
    }

    pub fn rule_stratum(&self, rule: RuleId) -> &Stratum {
        &self.strata[self.rule2stratum[rule.0].0]
    }

    pub fn rule_is_recursive(&self, rule: RuleId) -> bool {
        self.rule_stratum(rule).recursive_rules.contains(&rule)
    }

    pub fn rule_is_non_recursive(&self, rule: RuleId) -> bool {
        self.rule_stratum(rule).non_recursive_rules.contains(&rule)
    }

    /// Whether some rule defines `pred` from lower strata only. True for
    /// predicates that are extensional inside their stratum but derived globally.
    pub fn pred_has_non_recursive_rule(&self, pred: PredId) -> bool {
        self.registry
            .predicate(pred)
            .rules
            .iter()
            .any(|r| self.rule_is_non_recursive(*r))
    }

    pub fn pred_has_recursive_rule(&self, pred: PredId) -> bool {
        self.registry
            .predicate(pred)
            .rules
            .iter()
            .any(|r| self.rule_is_recursive(*r))
    }

    /// A predicate aggregates when its single defining rule has an aggregating head.
    pub fn pred_is_aggregating(&self, pred: PredId) -> bool {
        let rules = &self.registry.predicate(pred).rules;
        rules.len() == 1
            && rules
                .iter()
                .next()
                .is_some_and(|r| self.program.rule(*r).aggregates())
    }

    pub fn stratum_has_recursive_rule(&self, stratum: StratumId) -> bool {
        !self.strata[stratum.0].recursive_rules.is_empty()
    }

    /// Sites in `stratum` that negate the predicate named `pred_name`.
    pub fn negative_sites(&self, stratum: StratumId, pred_name: &str) -> &[NegSite] {
        self.strata[stratum.0]
            .neg_sites
            .get(pred_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn summary(&self) -> AnalysisSummary {
        let name = |p: &PredId| self.registry.predicate(*p).name.clone();
        AnalysisSummary {
            strata: self
                .strata
                .iter()
                .map(|s| StratumSummary {
                    id: s.id.0,
                    predicates: s.preds.iter().map(name).collect(),
                    non_recursive_rules: s.non_recursive_rules.iter().map(|r| r.0).collect(),
                    recursive_rules: s.recursive_rules.iter().map(|r| r.0).collect(),
                    negated: s.neg_sites.keys().cloned().collect(),
                })
                .collect(),
            functors: self
                .functors()
                .iter()
                .map(|f| format!("{}/{}", f.name, f.arity))
                .collect(),
        }
    }
}

/// Serialisable overview of the stratification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisSummary {
    pub strata: Vec<StratumSummary>,
    pub functors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StratumSummary {
    pub id: usize,
    pub predicates: Vec<String>,
    pub non_recursive_rules: Vec<usize>,
    pub recursive_rules: Vec<usize>,
    pub negated: Vec<String>,
}

impl fmt::Display for AnalysisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Strata:")?;
        writeln!(f, "{}", "-".repeat(45))?;
        for stratum in &self.strata {
            let preds = stratum
                .preds
                .iter()
                .map(|p| self.registry.predicate(*p).name.as_str())
                .join(", ");
            let kind = if stratum.recursive_rules.is_empty() {
                "non-recursive"
            } else {
                "recursive"
            };
            writeln!(f, "#{} [{}] {{{}}}", stratum.id.0, kind, preds)?;
            for rule in stratum.rules() {
                writeln!(f, "  {}: {}", rule, self.program.rule(rule))?;
            }
        }
        Ok(())
    }
}
