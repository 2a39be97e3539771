//! The executable engine produced by `compile`: it owns the fact universe of
//! one program instance and answers queries about it.

mod join;
pub mod semi_naive;

use std::{
    collections::{BTreeSet, HashMap},
    hash::Hash,
    sync::Arc,
};

use itertools::Itertools;
use log::{debug, trace};

use crate::{
    analysis::{AnalysisResult, PredId},
    solver::{
        config::Params,
        error::EngineError,
        metrics::Metrics,
        planner::RulePlan,
        provenance::ProvenanceStore,
        store::{TupleId, TupleStore},
        value::{Datum, FunctorStore, Value},
    },
};

/// A compiled program together with its interned tuples and provenance.
///
/// All tables are owned by the instance; calls that mutate it must be
/// serialized by the caller.
#[derive(Debug, Clone)]
pub struct Engine {
    analysis: Arc<AnalysisResult>,
    plans: Arc<[RulePlan]>,
    params: Params,
    tuples: TupleStore,
    functors: FunctorStore,
    provenance: ProvenanceStore,
    edb: BTreeSet<TupleId>,
    metrics: Metrics,
}

impl Engine {
    pub(crate) fn new(analysis: AnalysisResult, plans: Vec<RulePlan>, params: Params) -> Self {
        let num_preds = analysis.predicates().len();
        Self {
            analysis: Arc::new(analysis),
            plans: plans.into(),
            params,
            tuples: TupleStore::new(num_preds),
            functors: FunctorStore::default(),
            provenance: ProvenanceStore::default(),
            edb: BTreeSet::new(),
            metrics: Metrics::default(),
        }
    }

    pub fn analysis(&self) -> &AnalysisResult {
        &self.analysis
    }

    pub fn plans(&self) -> &[RulePlan] {
        &self.plans
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn tuple_store(&self) -> &TupleStore {
        &self.tuples
    }

    pub fn provenance(&self) -> &ProvenanceStore {
        &self.provenance
    }

    /// Every tuple currently in some predicate's extension.
    pub fn tuples(&self) -> BTreeSet<TupleId> {
        self.tuples.all_live().collect()
    }

    /// Every fact ever asserted, including the heads of body-less rules.
    pub fn edb_tuples(&self) -> &BTreeSet<TupleId> {
        &self.edb
    }

    /// The extension of `pred` as values, sorted. Empty for unknown names.
    pub fn tuples_of(&self, pred: &str) -> Vec<Vec<Value>> {
        let Some(pred) = self.analysis.registry().pred_id(pred) else {
            return Vec::new();
        };
        self.tuples
            .live(pred)
            .map(|t| self.tuple_values(t))
            .sorted()
            .collect()
    }

    /// The interned tuple for `pred(values)`, live or not.
    pub fn lookup(&self, pred: &str, values: &[Value]) -> Option<TupleId> {
        let pred = self.analysis.registry().pred_id(pred)?;
        let terms = values
            .iter()
            .map(|v| self.find_datum(v))
            .collect::<Option<Vec<_>>>()?;
        self.tuples.lookup(pred, &terms)
    }

    pub fn contains(&self, pred: &str, values: &[Value]) -> bool {
        self.lookup(pred, values)
            .is_some_and(|t| self.tuples.is_live(t))
    }

    pub fn tuple_predicate(&self, tuple: TupleId) -> &str {
        &self
            .analysis
            .registry()
            .predicate(self.tuples.get(tuple).pred)
            .name
    }

    pub fn tuple_values(&self, tuple: TupleId) -> Vec<Value> {
        self.tuples
            .get(tuple)
            .terms
            .iter()
            .map(|d| self.datum_to_value(d))
            .collect()
    }

    /// Renders a tuple as `Pred(v1, v2)`.
    pub fn display_tuple(&self, tuple: TupleId) -> String {
        format!(
            "{}({})",
            self.tuple_predicate(tuple),
            self.tuple_values(tuple).iter().join(", ")
        )
    }

    /// Clears every interning, provenance and fact table.
    pub fn reset(&mut self) {
        self.tuples = TupleStore::new(self.analysis.predicates().len());
        self.functors.clear();
        self.provenance = ProvenanceStore::default();
        self.edb.clear();
        self.metrics = Metrics::default();
    }

    /// Tuples derivable from `seeds` along current provenance: a product's
    /// output is reached once all of its inputs are, and a group-by key's
    /// current output once all inputs of one of its contributions are.
    /// Superseded aggregate results are not followed.
    pub fn reachable_tuples(&self, seeds: impl IntoIterator<Item = TupleId>) -> BTreeSet<TupleId> {
        let mut seen = BTreeSet::new();
        let mut pending = HashMap::new();
        let mut pending_gb = HashMap::new();
        let mut worklist: Vec<TupleId> = seeds.into_iter().collect();
        while let Some(tuple) = worklist.pop() {
            if !seen.insert(tuple) {
                continue;
            }
            let record = self.tuples.get(tuple);
            for &id in &record.out_products {
                let product = self.provenance.get_product(id);
                if all_inputs_reached(&mut pending, id, &product.inputs) {
                    worklist.extend(product.output);
                }
            }
            for &id in &record.out_products_gb {
                let product = self.provenance.get_product_gb(id);
                if all_inputs_reached(&mut pending_gb, id, &product.inputs) {
                    worklist.extend(self.provenance.get_group(product.group).output);
                }
            }
        }
        seen
    }

    /// Asserted facts plus outputs of groundings with no input tuples.
    fn provenance_roots(&self) -> BTreeSet<TupleId> {
        let mut roots = self.edb.clone();
        for (_, product) in self.provenance.products() {
            if product.inputs.is_empty() {
                roots.extend(product.output);
            }
        }
        for (_, product) in self.provenance.products_gb() {
            if product.inputs.is_empty() {
                roots.extend(self.provenance.get_group(product.group).output);
            }
        }
        roots
    }

    /// Removes from the extension every live tuple that no longer follows
    /// from the roots, i.e. tuples derived from superseded aggregate results.
    pub(crate) fn withdraw_unsupported(&mut self) {
        let supported = self.reachable_tuples(self.provenance_roots());
        let stale: Vec<TupleId> = self
            .tuples
            .all_live()
            .filter(|t| !supported.contains(t))
            .collect();
        for &tuple in &stale {
            trace!("Withdrawing {}", self.display_tuple(tuple));
            self.tuples.set_live(tuple, false);
        }
        if !stale.is_empty() {
            debug!("Withdrew {} tuples derived from superseded results", stale.len());
        }
        self.metrics.withdrawn_tuples += stale.len();
    }

    /// Checks that the provenance closure of the roots is exactly the live
    /// universe.
    pub fn sanity_check(&self) -> Result<(), EngineError> {
        let reachable = self.reachable_tuples(self.provenance_roots());
        let mismatched: Vec<TupleId> = self
            .tuples
            .all_live()
            .filter(|t| !reachable.contains(t))
            .chain(reachable.iter().copied().filter(|t| !self.tuples.is_live(*t)))
            .collect();

        match mismatched.first() {
            None => Ok(()),
            Some(&example) => Err(EngineError::SanityCheck {
                mismatched: mismatched.len(),
                example: self.display_tuple(example),
            }),
        }
    }

    pub(crate) fn datum_to_value(&self, datum: &Datum) -> Value {
        match datum {
            Datum::Int(v) => Value::Int(*v),
            Datum::Bool(v) => Value::Bool(*v),
            Datum::Str(s) => Value::Str(s.to_string()),
            Datum::Functor(id) => {
                let (functor, args) = self.functors.get(*id);
                Value::Functor {
                    name: self.analysis.registry().functor(functor).name.clone(),
                    args: args.iter().map(|a| self.datum_to_value(a)).collect(),
                }
            }
        }
    }

    /// The datum for `value` if it is representable without interning.
    fn find_datum(&self, value: &Value) -> Option<Datum> {
        Some(match value {
            Value::Int(v) => Datum::Int(*v),
            Value::Bool(v) => Datum::Bool(*v),
            Value::Str(s) => Datum::Str(Arc::from(s.as_str())),
            Value::Functor { name, args } => {
                let functor = self.analysis.registry().functor_id(name)?;
                let args = args
                    .iter()
                    .map(|a| self.find_datum(a))
                    .collect::<Option<Vec<_>>>()?;
                Datum::Functor(self.functors.lookup(functor, &args)?)
            }
        })
    }

    fn check_value(&self, value: &Value) -> Result<(), EngineError> {
        if let Value::Functor { name, args } = value {
            let functor = self
                .analysis
                .registry()
                .functor_id(name)
                .ok_or_else(|| EngineError::UnknownFunctor(name.clone()))?;
            let expected = self.analysis.registry().functor(functor).arity;
            if expected != args.len() {
                return Err(EngineError::FunctorArity {
                    name: name.clone(),
                    expected,
                    found: args.len(),
                });
            }
            for arg in args {
                self.check_value(arg)?;
            }
        }
        Ok(())
    }

    fn intern_value(&mut self, value: &Value) -> Result<Datum, EngineError> {
        Ok(match value {
            Value::Int(v) => Datum::Int(*v),
            Value::Bool(v) => Datum::Bool(*v),
            Value::Str(s) => Datum::Str(Arc::from(s.as_str())),
            Value::Functor { name, args } => {
                let functor = self
                    .analysis
                    .registry()
                    .functor_id(name)
                    .ok_or_else(|| EngineError::UnknownFunctor(name.clone()))?;
                let args = args
                    .iter()
                    .map(|a| self.intern_value(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Datum::Functor(self.functors.intern(functor, args))
            }
        })
    }

    fn pred_name(&self, pred: PredId) -> &str {
        &self.analysis.registry().predicate(pred).name
    }
}

/// Marks one more distinct input of record `id` as reached and reports
/// whether none is left.
fn all_inputs_reached<K: Eq + Hash>(
    pending: &mut HashMap<K, usize>,
    id: K,
    inputs: &[TupleId],
) -> bool {
    let left = pending
        .entry(id)
        .or_insert_with(|| inputs.iter().collect::<BTreeSet<_>>().len());
    *left = left.saturating_sub(1);
    *left == 0
}
