//! Provenance records linking rule groundings to the tuples they yield.
//!
//! Products are interned by `(rule, inputs)`, with inputs ordered by body
//! position, so a grounding that is found again maps to the same record.

use std::collections::HashMap;

use serde::Serialize;

use super::{store::TupleId, value::Datum};
use crate::lang::RuleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ProductId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ProductGbId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupId(pub usize);

/// One grounding of a plain rule.
#[derive(Debug, Clone)]
pub struct Product {
    pub rule: RuleId,
    pub inputs: Vec<TupleId>,
    pub output: Option<TupleId>,
}

/// Accumulator for one group of an aggregating rule.
#[derive(Debug, Clone)]
pub struct GroupByKey {
    pub rule: RuleId,
    pub key: Vec<Datum>,
    pub value: i64,
    pub output: Option<TupleId>,
    /// Earlier results, replaced as contributions arrived.
    pub superseded: Vec<TupleId>,
}

/// One grounding of an aggregating rule and the value it contributed.
#[derive(Debug, Clone)]
pub struct ProductGb {
    pub rule: RuleId,
    pub inputs: Vec<TupleId>,
    pub value: i64,
    pub group: GroupId,
}

#[derive(Debug, Clone, Default)]
pub struct ProvenanceStore {
    products: Vec<Product>,
    product_index: HashMap<(RuleId, Vec<TupleId>), ProductId>,
    groups: Vec<GroupByKey>,
    group_index: HashMap<(RuleId, Vec<Datum>), GroupId>,
    products_gb: Vec<ProductGb>,
    product_gb_index: HashMap<(RuleId, Vec<TupleId>), ProductGbId>,
}

impl ProvenanceStore {
    pub fn product(&mut self, rule: RuleId, inputs: Vec<TupleId>) -> ProductId {
        let key = (rule, inputs);
        if let Some(&id) = self.product_index.get(&key) {
            return id;
        }
        let id = ProductId(self.products.len());
        self.products.push(Product {
            rule,
            inputs: key.1.clone(),
            output: None,
        });
        self.product_index.insert(key, id);
        id
    }

    pub fn group(&mut self, rule: RuleId, key: Vec<Datum>) -> GroupId {
        let index_key = (rule, key);
        if let Some(&id) = self.group_index.get(&index_key) {
            return id;
        }
        let id = GroupId(self.groups.len());
        self.groups.push(GroupByKey {
            rule,
            key: index_key.1.clone(),
            value: 0,
            output: None,
            superseded: Vec::new(),
        });
        self.group_index.insert(index_key, id);
        id
    }

    /// Records an aggregation grounding. Returns `None` when this grounding
    /// was already recorded, so its contribution must not be counted again.
    pub fn product_gb(
        &mut self,
        rule: RuleId,
        inputs: Vec<TupleId>,
        value: i64,
        group: GroupId,
    ) -> Option<ProductGbId> {
        let key = (rule, inputs);
        if self.product_gb_index.contains_key(&key) {
            return None;
        }
        let id = ProductGbId(self.products_gb.len());
        self.products_gb.push(ProductGb {
            rule,
            inputs: key.1.clone(),
            value,
            group,
        });
        self.product_gb_index.insert(key, id);
        Some(id)
    }

    pub fn get_product(&self, id: ProductId) -> &Product {
        &self.products[id.0]
    }

    pub fn get_product_mut(&mut self, id: ProductId) -> &mut Product {
        &mut self.products[id.0]
    }

    pub fn get_group(&self, id: GroupId) -> &GroupByKey {
        &self.groups[id.0]
    }

    pub fn get_group_mut(&mut self, id: GroupId) -> &mut GroupByKey {
        &mut self.groups[id.0]
    }

    pub fn get_product_gb(&self, id: ProductGbId) -> &ProductGb {
        &self.products_gb[id.0]
    }

    pub fn products(&self) -> impl Iterator<Item = (ProductId, &Product)> {
        self.products
            .iter()
            .enumerate()
            .map(|(i, p)| (ProductId(i), p))
    }

    pub fn groups(&self) -> impl Iterator<Item = (GroupId, &GroupByKey)> {
        self.groups.iter().enumerate().map(|(i, g)| (GroupId(i), g))
    }

    pub fn products_gb(&self) -> impl Iterator<Item = (ProductGbId, &ProductGb)> {
        self.products_gb
            .iter()
            .enumerate()
            .map(|(i, p)| (ProductGbId(i), p))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_products_are_keyed_by_rule_and_inputs() {
        let mut store = ProvenanceStore::default();
        let p = store.product(RuleId(0), vec![TupleId(1), TupleId(2)]);
        assert_eq!(store.product(RuleId(0), vec![TupleId(1), TupleId(2)]), p);
        assert_ne!(store.product(RuleId(0), vec![TupleId(2), TupleId(1)]), p);
        assert_ne!(store.product(RuleId(1), vec![TupleId(1), TupleId(2)]), p);
        assert_eq!(store.get_product(p).output, None);
    }

    #[test]
    fn test_repeated_aggregation_grounding_is_rejected() {
        let mut store = ProvenanceStore::default();
        let g = store.group(RuleId(0), vec![Datum::Int(1)]);
        assert_eq!(store.group(RuleId(0), vec![Datum::Int(1)]), g);
        assert!(store.product_gb(RuleId(0), vec![TupleId(0)], 3, g).is_some());
        assert!(store.product_gb(RuleId(0), vec![TupleId(0)], 3, g).is_none());
        assert_eq!(store.products_gb().count(), 1);
    }
}
