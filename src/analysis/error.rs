use thiserror::Error;

use crate::lang::RuleId;

/// Errors that make a program impossible to stratify.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("arity mismatch for predicate {name} in {rule}: expected arity {expected}, got {found}")]
    PredicateArityMismatch {
        name: String,
        rule: RuleId,
        expected: usize,
        found: usize,
    },
    #[error("arity mismatch for functor {name} in {rule}: expected arity {expected}, got {found}")]
    FunctorArityMismatch {
        name: String,
        rule: RuleId,
        expected: usize,
        found: usize,
    },
    #[error("{name} is used both as a predicate and as a functor (in {rule})")]
    NameCollision { name: String, rule: RuleId },
    #[error("predicate {predicate} negates {negated} within its own recursive component")]
    UnstratifiableNegation { predicate: String, negated: String },
    #[error("aggregating {rule} for {predicate} reads a predicate of its own stratum")]
    RecursiveAggregation { predicate: String, rule: RuleId },
    #[error("aggregating predicate {predicate} must be defined by exactly one rule, found {rules}")]
    MixedAggregation { predicate: String, rules: usize },
    #[error("aggregating {rule} for {predicate} reads the aggregated predicate {reads}")]
    NestedAggregation {
        predicate: String,
        rule: RuleId,
        reads: String,
    },
}
