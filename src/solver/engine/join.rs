//! Interpretation of a `RulePlan` body: a breadth-first nested-loop join that
//! turns candidate tuples into groundings.
//!
//! Joining only reads the tuple store, so the candidate set of every scan is
//! stable while a rule fires. Functor values built by assignments or
//! arithmetic patterns are interned on the way.

use log::{trace, warn};

use crate::{
    lang::{BinOp, RuleId},
    solver::{
        error::ArithmeticError,
        metrics::Metrics,
        planner::{Expr, Pattern, RulePlan, Step},
        store::{TupleId, TupleStore},
        value::{Datum, FunctorStore},
    },
};

/// Variable slots bound by one successful pass through the body, and the
/// positive-atom tuples that matched, in body order.
#[derive(Debug, Clone)]
pub(super) struct Grounding {
    pub slots: Vec<Option<Datum>>,
    pub inputs: Vec<TupleId>,
}

/// A body position whose candidates come from `tuples` instead of the full
/// extension of its predicate.
pub(super) type DeltaSource<'a> = (usize, &'a [TupleId]);

/// Enumerates the groundings of `plan`'s body. With `delta = Some((p, ts))`
/// the scan at body position `p` ranges over `ts`; every other scan ranges
/// over the live extension of its predicate.
pub(super) fn ground(
    plan: &RulePlan,
    delta: Option<DeltaSource<'_>>,
    tuples: &TupleStore,
    functors: &mut FunctorStore,
    metrics: &mut Metrics,
) -> Vec<Grounding> {
    let mut current = vec![Grounding {
        slots: vec![None; plan.slots.len()],
        inputs: Vec::new(),
    }];

    for step in &plan.steps {
        let mut next = Vec::new();
        match step {
            Step::Scan {
                position,
                pred,
                patterns,
            } => {
                let is_delta = delta.is_some_and(|(p, _)| p == *position);
                let candidates: Vec<TupleId> = match delta {
                    Some((_, ts)) if is_delta => {
                        ts.iter().copied().filter(|t| tuples.is_live(*t)).collect()
                    }
                    _ => tuples.live(*pred).collect(),
                };
                trace!(
                    "    {}: scan at {} over {} tuples (is_delta: {})",
                    plan.rule,
                    position,
                    candidates.len(),
                    is_delta
                );
                for grounding in &current {
                    for &candidate in &candidates {
                        let mut slots = grounding.slots.clone();
                        match unify_all(patterns, &tuples.get(candidate).terms, &mut slots, functors) {
                            Ok(true) => {
                                let mut inputs = grounding.inputs.clone();
                                inputs.push(candidate);
                                next.push(Grounding { slots, inputs });
                            }
                            Ok(false) => {}
                            Err(e) => skip(plan.rule, *position, &e, metrics),
                        }
                    }
                }
            }
            Step::Negate {
                position,
                pred,
                terms,
            } => {
                for grounding in current {
                    match eval_all(terms, &grounding.slots, functors) {
                        Ok(values) if !tuples.contains_live(*pred, &values) => next.push(grounding),
                        Ok(_) => {}
                        Err(e) => skip(plan.rule, *position, &e, metrics),
                    }
                }
            }
            Step::Assign {
                position,
                slot,
                expr,
            } => {
                for mut grounding in current {
                    match eval(expr, &grounding.slots, functors) {
                        Ok(value) => {
                            grounding.slots[*slot] = Some(value);
                            next.push(grounding);
                        }
                        Err(e) => skip(plan.rule, *position, &e, metrics),
                    }
                }
            }
            Step::Fail { .. } => {}
        }

        trace!("      Groundings after step: {}", next.len());
        if next.is_empty() {
            return next;
        }
        current = next;
    }
    current
}

fn skip(rule: RuleId, position: usize, err: &ArithmeticError, metrics: &mut Metrics) {
    warn!("{}: skipping grounding at body position {}: {}", rule, position, err);
    metrics.skipped_groundings += 1;
}

fn unify_all(
    patterns: &[Pattern],
    values: &[Datum],
    slots: &mut [Option<Datum>],
    functors: &mut FunctorStore,
) -> Result<bool, ArithmeticError> {
    for (pattern, value) in patterns.iter().zip(values) {
        if !unify(pattern, value, slots, functors)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn unify(
    pattern: &Pattern,
    value: &Datum,
    slots: &mut [Option<Datum>],
    functors: &mut FunctorStore,
) -> Result<bool, ArithmeticError> {
    Ok(match pattern {
        Pattern::Bind(slot) => {
            slots[*slot] = Some(value.clone());
            true
        }
        Pattern::Check(slot) => slots[*slot].as_ref() == Some(value),
        Pattern::Const(c) => c == value,
        Pattern::Eval(expr) => eval(expr, slots, functors)? == *value,
        Pattern::Functor { functor, args } => match value {
            Datum::Functor(id) => {
                let (actual, values) = functors.get(*id);
                if actual != *functor {
                    return Ok(false);
                }
                let values = values.to_vec();
                unify_all(args, &values, slots, functors)?
            }
            _ => false,
        },
    })
}

pub(super) fn eval_all(
    exprs: &[Expr],
    slots: &[Option<Datum>],
    functors: &mut FunctorStore,
) -> Result<Vec<Datum>, ArithmeticError> {
    exprs.iter().map(|e| eval(e, slots, functors)).collect()
}

pub(super) fn eval(
    expr: &Expr,
    slots: &[Option<Datum>],
    functors: &mut FunctorStore,
) -> Result<Datum, ArithmeticError> {
    match expr {
        Expr::Slot(slot) => slots[*slot]
            .clone()
            .ok_or(ArithmeticError::UnboundSlot(*slot)),
        Expr::Const(c) => Ok(c.clone()),
        Expr::Functor(functor, args) => {
            let args = eval_all(args, slots, functors)?;
            Ok(Datum::Functor(functors.intern(*functor, args)))
        }
        Expr::Binary(op, l, r) => {
            let (Datum::Int(l), Datum::Int(r)) = (eval(l, slots, functors)?, eval(r, slots, functors)?)
            else {
                return Err(ArithmeticError::TypeMismatch(op.to_string()));
            };
            let overflow = || ArithmeticError::Overflow(format!("{} {} {}", l, op, r));
            let result = match op {
                BinOp::Add => l.checked_add(r).ok_or_else(overflow)?,
                BinOp::Sub => l.checked_sub(r).ok_or_else(overflow)?,
                BinOp::Mul => l.checked_mul(r).ok_or_else(overflow)?,
                BinOp::Div | BinOp::Rem if r == 0 => return Err(ArithmeticError::DivisionByZero),
                BinOp::Div => l.checked_div(r).ok_or_else(overflow)?,
                BinOp::Rem => l.checked_rem(r).ok_or_else(overflow)?,
            };
            Ok(Datum::Int(result))
        }
    }
}
