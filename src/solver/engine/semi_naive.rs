//! Incremental stratified evaluation.
//!
//! `add_tuples` drives every stratum in dependency order. Non-recursive rules
//! fire once per call, with the delta position ranging over the body
//! predicates that received new tuples earlier in the call. Recursive rules
//! then run to a semi-naive fixpoint: each pass joins the previous pass's
//! new tuples (the local delta) at one body position against the full
//! extensions at all other positions, until a pass derives nothing new.
//!
//! Negated atoms read the live extension of a predicate that, by
//! stratification, was saturated earlier in the same call. Facts for a
//! negated predicate that arrive in a later call do not retract derivations
//! made before them.
//!
//! When an aggregate result is replaced, tuples that only followed from the
//! old result are withdrawn from the extension right after the aggregating
//! stratum finishes.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Instant,
};

use log::{debug, trace, warn};

use super::{
    join::{self, DeltaSource, Grounding},
    Engine,
};
use crate::{
    analysis::{PredId, Stratum},
    lang::RuleId,
    solver::{
        error::{ArithmeticError, EngineError},
        metrics::Metrics,
        planner::{Expr, HeadAction, RulePlan},
        provenance::GroupId,
        store::{TupleId, TupleStore},
        value::{Datum, Fact},
    },
};

/// Tuples that newly entered each predicate's extension.
type Deltas = BTreeMap<PredId, Vec<TupleId>>;

impl Engine {
    /// Asserts `facts` and evaluates every stratum until all consequences are
    /// derived.
    ///
    /// Facts are validated before any state changes. Facts already asserted
    /// are ignored, so repeating a call is a no-op. An `EngineError` raised
    /// during evaluation leaves the engine partially updated; `reset` it
    /// before reuse.
    pub fn add_tuples(&mut self, facts: &[Fact]) -> Result<(), EngineError> {
        let start = Instant::now();
        for fact in facts {
            self.validate_fact(fact)?;
        }
        self.metrics = Metrics::default();

        let mut asserted = self.program_facts();
        for fact in facts {
            let pred = self.fact_pred(fact)?;
            let terms = fact
                .values
                .iter()
                .map(|v| self.intern_value(v))
                .collect::<Result<Vec<_>, _>>()?;
            asserted.push((pred, terms));
        }

        let mut deltas = Deltas::new();
        for (pred, terms) in asserted {
            let tuple = self.tuples.intern(pred, terms);
            if self.edb.insert(tuple) && self.tuples.set_live(tuple, true) {
                deltas.entry(pred).or_default().push(tuple);
            }
        }
        debug!(
            "Asserted {} new facts across {} predicates",
            deltas.values().map(Vec::len).sum::<usize>(),
            deltas.len()
        );

        let analysis = Arc::clone(&self.analysis);
        for stratum in analysis.strata() {
            if stratum.has_rules() {
                let superseded = self.metrics.superseded_results;
                self.eval_stratum(stratum, &mut deltas)?;
                // Consumers of replaced results sit in later strata; drop
                // them before those strata read or negate them.
                if self.metrics.superseded_results > superseded {
                    self.withdraw_unsupported();
                }
            }
        }

        self.metrics.evaluation_time = Some(start.elapsed());
        debug!(
            "Call finished: {} tuples derived, {} groundings ({} redundant, {} skipped), {} iterations",
            self.metrics.total_derived(),
            self.metrics.groundings,
            self.metrics.redundant_groundings,
            self.metrics.skipped_groundings,
            self.metrics.fixpoint_iterations
        );

        if self.params.sanity_check {
            self.sanity_check()?;
        }
        Ok(())
    }

    fn fact_pred(&self, fact: &Fact) -> Result<PredId, EngineError> {
        self.analysis
            .registry()
            .pred_id(&fact.pred)
            .ok_or_else(|| EngineError::UnknownPredicate(fact.pred.clone()))
    }

    fn validate_fact(&self, fact: &Fact) -> Result<(), EngineError> {
        let pred = self.fact_pred(fact)?;
        if self.analysis.pred_is_aggregating(pred) {
            return Err(EngineError::AggregatingFact(fact.pred.clone()));
        }
        let expected = self.analysis.registry().predicate(pred).arity;
        if expected != fact.values.len() {
            return Err(EngineError::FactArity {
                pred: fact.pred.clone(),
                expected,
                found: fact.values.len(),
            });
        }
        fact.values.iter().try_for_each(|v| self.check_value(v))
    }

    /// Heads of body-less rules, asserted on every call.
    fn program_facts(&mut self) -> Vec<(PredId, Vec<Datum>)> {
        let plans = Arc::clone(&self.plans);
        let mut facts = Vec::new();
        for plan in plans.iter().filter(|p| p.is_fact) {
            let HeadAction::Produce { pred, terms } = &plan.head else {
                continue;
            };
            match join::eval_all(terms, &[], &mut self.functors) {
                Ok(values) => facts.push((*pred, values)),
                Err(e) => {
                    warn!("{}: skipping fact: {}", plan.rule, e);
                    self.metrics.skipped_groundings += 1;
                }
            }
        }
        facts
    }

    fn eval_stratum(&mut self, stratum: &Stratum, deltas: &mut Deltas) -> Result<(), EngineError> {
        let plans = Arc::clone(&self.plans);
        let lower: &Deltas = deltas;
        let mut produced = Vec::new();

        for &rule in &stratum.non_recursive_rules {
            let plan = &plans[rule.0];
            if plan.is_fact {
                continue;
            }
            let sources = delta_sources(plan, |pred| lower.get(&pred));
            if sources.is_empty() && plan.has_scans() {
                trace!("  {}: no new input, skipped", rule);
                continue;
            }
            produced.extend(self.fire(rule, &sources)?);
        }

        if !stratum.recursive_rules.is_empty() {
            let mut local = group_by_pred(
                &self.tuples,
                stratum
                    .preds
                    .iter()
                    .flat_map(|p| lower.get(p).into_iter().flatten())
                    .chain(&produced)
                    .copied(),
            );
            let mut iteration = 0;
            loop {
                iteration += 1;
                if let Some(limit) = self.params.max_fixpoint_iterations {
                    if iteration > limit {
                        return Err(EngineError::FixpointLimit {
                            stratum: stratum.id.0,
                            limit,
                        });
                    }
                }
                debug!(
                    "Stratum {}: starting semi-naive iteration {}",
                    stratum.id.0, iteration
                );

                let mut next = Vec::new();
                for &rule in &stratum.recursive_rules {
                    // Lower-stratum deltas only matter on the first pass; afterwards
                    // they are already part of the full extensions.
                    let sources = delta_sources(&plans[rule.0], |pred| {
                        if stratum.contains(pred) {
                            local.get(&pred)
                        } else if iteration == 1 {
                            lower.get(&pred)
                        } else {
                            None
                        }
                    });
                    if sources.is_empty() {
                        continue;
                    }
                    next.extend(self.fire(rule, &sources)?);
                }
                self.metrics.fixpoint_iterations += 1;

                if next.is_empty() {
                    debug!(
                        "Stratum {}: fixpoint reached after {} iterations",
                        stratum.id.0, iteration
                    );
                    break;
                }
                trace!("  Δ for next iteration: {:?}", next);
                produced.extend(&next);
                local = group_by_pred(&self.tuples, next.into_iter());
            }
        }

        for (pred, tuples) in group_by_pred(&self.tuples, produced.into_iter()) {
            deltas.entry(pred).or_default().extend(tuples);
        }
        Ok(())
    }

    /// Fires `rule` once per delta source, or once over the full extensions
    /// when the rule scans no predicate. Returns the tuples that newly became
    /// live.
    fn fire(
        &mut self,
        rule: RuleId,
        sources: &[DeltaSource<'_>],
    ) -> Result<Vec<TupleId>, EngineError> {
        let plans = Arc::clone(&self.plans);
        let plan = &plans[rule.0];
        trace!(
            "Firing {} with delta positions {:?}",
            rule,
            sources.iter().map(|s| s.0).collect::<Vec<_>>()
        );

        let mut groundings = Vec::new();
        if plan.has_scans() {
            for source in sources {
                groundings.extend(join::ground(
                    plan,
                    Some(*source),
                    &self.tuples,
                    &mut self.functors,
                    &mut self.metrics,
                ));
            }
        } else {
            groundings = join::ground(
                plan,
                None,
                &self.tuples,
                &mut self.functors,
                &mut self.metrics,
            );
        }
        self.metrics.groundings += groundings.len();

        let derived = match &plan.head {
            HeadAction::Produce { pred, terms } => self.produce(plan, *pred, terms, groundings)?,
            HeadAction::Aggregate {
                pred,
                group_by,
                aggregand,
                ..
            } => self.aggregate(plan, *pred, group_by, aggregand, groundings)?,
        };
        if !derived.is_empty() {
            let name = self.pred_name(plan.head.pred()).to_string();
            *self.metrics.derived_per_predicate.entry(name).or_default() += derived.len();
        }
        Ok(derived)
    }

    fn produce(
        &mut self,
        plan: &RulePlan,
        pred: PredId,
        terms: &[Expr],
        groundings: Vec<Grounding>,
    ) -> Result<Vec<TupleId>, EngineError> {
        let mut derived = Vec::new();
        for grounding in groundings {
            let values = match join::eval_all(terms, &grounding.slots, &mut self.functors) {
                Ok(values) => values,
                Err(e) => {
                    self.skip_head(plan.rule, &e);
                    continue;
                }
            };
            self.check_depth(pred, &values)?;
            let tuple = self.tuples.intern(pred, values);

            let product = self.provenance.product(plan.rule, grounding.inputs.clone());
            let known = self.provenance.get_product(product).output == Some(tuple);
            if !known {
                self.provenance.get_product_mut(product).output = Some(tuple);
                for input in &grounding.inputs {
                    self.tuples.get_mut(*input).out_products.insert(product);
                }
            }
            // A known product can still revive a tuple withdrawn earlier.
            if self.tuples.set_live(tuple, true) {
                trace!("New tuple derived by {}: {}", plan.rule, self.display_tuple(tuple));
                derived.push(tuple);
            } else if known {
                self.metrics.redundant_groundings += 1;
            }
        }
        Ok(derived)
    }

    /// Accumulates new contributions per group-by key, then folds them onto
    /// each touched group's previous sum. The new result tuple replaces the
    /// previous one in the extension.
    fn aggregate(
        &mut self,
        plan: &RulePlan,
        pred: PredId,
        group_by: &[Expr],
        aggregand: &Expr,
        groundings: Vec<Grounding>,
    ) -> Result<Vec<TupleId>, EngineError> {
        let pred_name = self.pred_name(pred).to_string();
        let overflow = || EngineError::AggregateOverflow {
            pred: pred_name.clone(),
        };

        let mut pending: BTreeMap<GroupId, i64> = BTreeMap::new();
        for grounding in groundings {
            let evaluated = join::eval_all(group_by, &grounding.slots, &mut self.functors)
                .and_then(|key| {
                    match join::eval(aggregand, &grounding.slots, &mut self.functors)? {
                        Datum::Int(v) => Ok((key, v)),
                        _ => Err(ArithmeticError::NonIntegerAggregand),
                    }
                });
            let (key, value) = match evaluated {
                Ok(kv) => kv,
                Err(e) => {
                    self.skip_head(plan.rule, &e);
                    continue;
                }
            };

            let group = self.provenance.group(plan.rule, key);
            let Some(product) = self
                .provenance
                .product_gb(plan.rule, grounding.inputs.clone(), value, group)
            else {
                self.metrics.redundant_groundings += 1;
                continue;
            };
            for input in &grounding.inputs {
                self.tuples.get_mut(*input).out_products_gb.insert(product);
            }
            let sum = pending.entry(group).or_insert(0);
            *sum = sum.checked_add(value).ok_or_else(overflow)?;
        }

        let mut derived = Vec::new();
        for (group, contribution) in pending {
            let record = self.provenance.get_group(group);
            let value = record.value.checked_add(contribution).ok_or_else(overflow)?;
            let previous = record.output;
            let mut terms = record.key.clone();
            terms.push(Datum::Int(value));
            self.check_depth(pred, &terms)?;
            let tuple = self.tuples.intern(pred, terms);

            let record = self.provenance.get_group_mut(group);
            record.value = value;
            if previous == Some(tuple) {
                continue;
            }
            record.output = Some(tuple);
            if let Some(old) = previous {
                record.superseded.push(old);
                self.tuples.set_live(old, false);
                self.metrics.superseded_results += 1;
                debug!(
                    "{} replaces {} with {}",
                    plan.rule,
                    self.display_tuple(old),
                    self.display_tuple(tuple)
                );
            }
            if self.tuples.set_live(tuple, true) {
                derived.push(tuple);
            }
        }
        Ok(derived)
    }

    fn skip_head(&mut self, rule: RuleId, err: &ArithmeticError) {
        warn!("{}: skipping grounding, head not computable: {}", rule, err);
        self.metrics.skipped_groundings += 1;
    }

    fn check_depth(&self, pred: PredId, values: &[Datum]) -> Result<(), EngineError> {
        let Some(limit) = self.params.max_term_depth else {
            return Ok(());
        };
        match values.iter().map(|v| self.functors.depth(v)).max() {
            Some(depth) if depth > limit => Err(EngineError::TermDepthLimit {
                pred: self.pred_name(pred).to_string(),
                depth,
                limit,
            }),
            _ => Ok(()),
        }
    }
}

/// Body positions of `plan` whose predicate has a non-empty delta according
/// to `delta_of`.
fn delta_sources<'a>(
    plan: &RulePlan,
    delta_of: impl Fn(PredId) -> Option<&'a Vec<TupleId>>,
) -> Vec<DeltaSource<'a>> {
    plan.scans()
        .filter_map(|(position, pred)| {
            delta_of(pred)
                .filter(|ts| !ts.is_empty())
                .map(|ts| (position, ts.as_slice()))
        })
        .collect()
}

/// Live tuples grouped by predicate, deduplicated, in first-seen order.
fn group_by_pred(
    store: &TupleStore,
    tuples: impl Iterator<Item = TupleId>,
) -> Deltas {
    let mut seen = BTreeSet::new();
    let mut grouped = Deltas::new();
    for tuple in tuples {
        if store.is_live(tuple) && seen.insert(tuple) {
            grouped.entry(store.get(tuple).pred).or_default().push(tuple);
        }
    }
    grouped
}
