//! Per-engine tuple interning tables.
//!
//! Every tuple ever constructed lives in one arena and is addressed by its
//! `TupleId`. Each predicate owns a `Relation` that maps term vectors to ids,
//! so constructing a tuple twice yields the same instance. A tuple is part of
//! its predicate's extension only while it is `live`; superseded aggregate
//! results stay interned but are no longer live.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use super::{
    provenance::{ProductGbId, ProductId},
    value::Datum,
};
use crate::analysis::PredId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TupleId(pub usize);

#[derive(Debug, Clone)]
pub struct TupleRecord {
    pub pred: PredId,
    pub terms: Vec<Datum>,
    pub live: bool,
    /// Products this tuple is an input of.
    pub out_products: BTreeSet<ProductId>,
    /// Aggregation products this tuple is an input of.
    pub out_products_gb: BTreeSet<ProductGbId>,
}

#[derive(Debug, Clone, Default)]
struct Relation {
    index: HashMap<Vec<Datum>, TupleId>,
    members: Vec<TupleId>,
}

#[derive(Debug, Clone)]
pub struct TupleStore {
    tuples: Vec<TupleRecord>,
    relations: Vec<Relation>,
}

impl TupleStore {
    pub fn new(num_preds: usize) -> Self {
        Self {
            tuples: Vec::new(),
            relations: vec![Relation::default(); num_preds],
        }
    }

    /// Returns the interned tuple for `(pred, terms)`, creating a non-live one
    /// if it has not been seen.
    pub fn intern(&mut self, pred: PredId, terms: Vec<Datum>) -> TupleId {
        let relation = &mut self.relations[pred.0];
        if let Some(&id) = relation.index.get(&terms) {
            return id;
        }
        let id = TupleId(self.tuples.len());
        relation.index.insert(terms.clone(), id);
        relation.members.push(id);
        self.tuples.push(TupleRecord {
            pred,
            terms,
            live: false,
            out_products: BTreeSet::new(),
            out_products_gb: BTreeSet::new(),
        });
        id
    }

    pub fn lookup(&self, pred: PredId, terms: &[Datum]) -> Option<TupleId> {
        self.relations[pred.0].index.get(terms).copied()
    }

    pub fn contains_live(&self, pred: PredId, terms: &[Datum]) -> bool {
        self.lookup(pred, terms).is_some_and(|id| self.is_live(id))
    }

    pub fn get(&self, id: TupleId) -> &TupleRecord {
        &self.tuples[id.0]
    }

    pub fn get_mut(&mut self, id: TupleId) -> &mut TupleRecord {
        &mut self.tuples[id.0]
    }

    pub fn is_live(&self, id: TupleId) -> bool {
        self.tuples[id.0].live
    }

    /// Sets the liveness of `id`, returning whether it changed.
    pub fn set_live(&mut self, id: TupleId, live: bool) -> bool {
        let record = &mut self.tuples[id.0];
        let changed = record.live != live;
        record.live = live;
        changed
    }

    /// The current extension of `pred`, in interning order.
    pub fn live(&self, pred: PredId) -> impl Iterator<Item = TupleId> + '_ {
        self.relations[pred.0]
            .members
            .iter()
            .copied()
            .filter(|id| self.tuples[id.0].live)
    }

    pub fn all_live(&self) -> impl Iterator<Item = TupleId> + '_ {
        self.tuples
            .iter()
            .enumerate()
            .filter(|(_, t)| t.live)
            .map(|(i, _)| TupleId(i))
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }
}
