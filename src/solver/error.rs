use thiserror::Error;

use crate::lang::RuleId;

/// Errors raised while turning rules into firing plans.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("{rule}: variable {var} is assigned but already bound")]
    AssignToBound { rule: RuleId, var: String },
    #[error("{rule}: unsupported assignment operator {operator:?}")]
    UnsupportedOperator { rule: RuleId, operator: String },
    #[error("{rule}: unsupported term {term} in {context}")]
    UnsupportedTerm {
        rule: RuleId,
        term: String,
        context: &'static str,
    },
    #[error("{rule}: variable {var} is never bound by a positive atom or assignment")]
    UnboundVariable { rule: RuleId, var: String },
    #[error("{rule}: aggregation is only allowed as the last head term")]
    MisplacedAggregate { rule: RuleId },
    #[error("{rule}: body-less rule must have a ground head without aggregation")]
    NonGroundFact { rule: RuleId },
    #[error("{rule}: {name} is not a registered predicate or functor")]
    UnknownName { rule: RuleId, name: String },
}

/// Failure to evaluate an arithmetic expression for one grounding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArithmeticError {
    #[error("operator {0} expects integer operands")]
    TypeMismatch(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow in {0}")]
    Overflow(String),
    #[error("aggregand must evaluate to an integer")]
    NonIntegerAggregand,
    #[error("slot {0} read before it was bound")]
    UnboundSlot(usize),
}

/// Errors raised by `Engine::add_tuples` and the consistency check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("unknown predicate {0}")]
    UnknownPredicate(String),
    #[error("fact for {pred} has arity {found}, expected {expected}")]
    FactArity {
        pred: String,
        expected: usize,
        found: usize,
    },
    #[error("unknown functor {0} in fact")]
    UnknownFunctor(String),
    #[error("functor {name} in fact has arity {found}, expected {expected}")]
    FunctorArity {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("facts cannot be asserted for aggregating predicate {0}")]
    AggregatingFact(String),
    #[error("stratum {stratum} did not reach a fixpoint within {limit} iterations")]
    FixpointLimit { stratum: usize, limit: usize },
    #[error("term of depth {depth} derived for {pred} exceeds the limit of {limit}")]
    TermDepthLimit {
        pred: String,
        depth: usize,
        limit: usize,
    },
    #[error("aggregate for {pred} overflowed")]
    AggregateOverflow { pred: String },
    #[error("provenance check failed: {mismatched} tuple(s) differ between the live set and the provenance closure, e.g. {example}")]
    SanityCheck { mismatched: usize, example: String },
}
