//! Term values: the external `Value` used for facts and query results, and the
//! interned `Datum` the engine stores inside tuples.

use std::{collections::HashMap, fmt, sync::Arc};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{analysis::FunctorId, lang::Const};

/// A concrete term value as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
    Functor { name: String, args: Vec<Value> },
}

impl Value {
    pub fn functor(name: &str, args: Vec<Value>) -> Self {
        Value::Functor {
            name: name.to_string(),
            args,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<&Const> for Value {
    fn from(c: &Const) -> Self {
        match c {
            Const::Int(v) => Value::Int(*v),
            Const::Bool(v) => Value::Bool(*v),
            Const::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Functor { name, args } => write!(f, "{}({})", name, args.iter().join(", ")),
        }
    }
}

/// A fact asserted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fact {
    pub pred: String,
    pub values: Vec<Value>,
}

impl Fact {
    pub fn new(pred: &str, values: Vec<Value>) -> Self {
        Self {
            pred: pred.to_string(),
            values,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctorValueId(pub usize);

/// Engine-internal term value. Functor values are interned, so two nested
/// terms are equal iff they are the same instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Datum {
    Int(i64),
    Bool(bool),
    Str(Arc<str>),
    Functor(FunctorValueId),
}

impl From<&Const> for Datum {
    fn from(c: &Const) -> Self {
        match c {
            Const::Int(v) => Datum::Int(*v),
            Const::Bool(v) => Datum::Bool(*v),
            Const::Str(s) => Datum::Str(Arc::from(s.as_str())),
        }
    }
}

#[derive(Debug, Clone)]
struct FunctorValue {
    functor: FunctorId,
    args: Vec<Datum>,
    depth: usize,
}

/// Interning table for nested functor values.
#[derive(Debug, Clone, Default)]
pub struct FunctorStore {
    values: Vec<FunctorValue>,
    index: HashMap<(FunctorId, Vec<Datum>), FunctorValueId>,
}

impl FunctorStore {
    pub fn intern(&mut self, functor: FunctorId, args: Vec<Datum>) -> FunctorValueId {
        let key = (functor, args);
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let depth = 1 + key.1.iter().map(|d| self.depth(d)).max().unwrap_or(0);
        let id = FunctorValueId(self.values.len());
        self.values.push(FunctorValue {
            functor,
            args: key.1.clone(),
            depth,
        });
        self.index.insert(key, id);
        id
    }

    pub fn lookup(&self, functor: FunctorId, args: &[Datum]) -> Option<FunctorValueId> {
        self.index.get(&(functor, args.to_vec())).copied()
    }

    pub fn get(&self, id: FunctorValueId) -> (FunctorId, &[Datum]) {
        let value = &self.values[id.0];
        (value.functor, &value.args)
    }

    /// Nesting depth of a datum; primitives have depth 0.
    pub fn depth(&self, datum: &Datum) -> usize {
        match datum {
            Datum::Functor(id) => self.values[id.0].depth,
            _ => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_functor_values_are_interned() {
        let mut store = FunctorStore::default();
        let inner = store.intern(FunctorId(0), vec![Datum::Int(1)]);
        let again = store.intern(FunctorId(0), vec![Datum::Int(1)]);
        assert_eq!(inner, again);
        assert_eq!(store.len(), 1);

        let outer = store.intern(FunctorId(1), vec![Datum::Functor(inner), Datum::Bool(true)]);
        assert_eq!(store.depth(&Datum::Functor(outer)), 2);
        assert_eq!(store.depth(&Datum::Str(Arc::from("x"))), 0);
        assert_eq!(store.lookup(FunctorId(0), &[Datum::Int(1)]), Some(inner));
        assert_eq!(store.lookup(FunctorId(0), &[Datum::Int(2)]), None);
        assert_eq!(store.get(outer).0, FunctorId(1));
    }

    #[test]
    fn test_value_json_forms() {
        let values: Vec<Value> =
            serde_json::from_str(r#"[1, true, "a", {"name": "pair", "args": [2, "b"]}]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Int(1),
                Value::Bool(true),
                Value::from("a"),
                Value::functor("pair", vec![Value::Int(2), Value::from("b")]),
            ]
        );
        assert_eq!(values[3].to_string(), "pair(2, \"b\")");
    }
}
